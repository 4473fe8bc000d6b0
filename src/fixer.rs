//! Entity and structure repairs for content documents
//!
//! [fix_named_entities] runs on the raw text before parsing; the remaining
//! repairs are tree edits applied by [fix_document] in a fixed order:
//! namespaces, horizontal rules, inline styles, stylesheet links, images.
//! Every change is reported as it is made.

use std::{mem, path::Path};

use crate::{
    document::{Document, Element, Node},
    filename::normalize_filename,
    report::Reporter,
    utils::{LIST_ELEMENTS, OPS_NAMESPACE, XHTML_NAMESPACE},
};

/// Named character references that are not predefined in XML, with the
/// numeric reference each is rewritten to
pub const NAMED_ENTITIES: [(&str, &str); 13] = [
    ("&nbsp;", "&#160;"),
    ("&ensp;", "&#8194;"),
    ("&emsp;", "&#8195;"),
    ("&thinsp;", "&#8201;"),
    ("&ndash;", "&#8211;"),
    ("&mdash;", "&#8212;"),
    ("&hellip;", "&#8230;"),
    ("&lsquo;", "&#8216;"),
    ("&rsquo;", "&#8217;"),
    ("&ldquo;", "&#8220;"),
    ("&rdquo;", "&#8221;"),
    ("&copy;", "&#169;"),
    ("&reg;", "&#174;"),
];

/// Shared stylesheets every content document links to
pub const REQUIRED_STYLESHEETS: [&str; 2] = ["../styles/style.css", "../styles/fonts.css"];

/// Replaces the named references of [NAMED_ENTITIES] with numeric ones
///
/// This is a literal find-and-replace over the raw text, so occurrences
/// inside comments or CDATA sections are rewritten as well.
pub fn fix_named_entities(text: &str, reporter: &dyn Reporter) -> String {
    let mut corrected = text.to_string();

    for (named, numeric) in NAMED_ENTITIES {
        let count = corrected.matches(named).count();
        if count == 0 {
            continue;
        }

        corrected = corrected.replace(named, numeric);
        reporter.info(&format!("Replacing {} × {} → {}", count, named, numeric));
    }

    corrected
}

/// Applies every tree repair to a parsed content document
///
/// `file` only labels the reported changes. Returns the number of changes.
pub fn fix_document(document: &mut Document, file: &str, reporter: &dyn Reporter) -> usize {
    ensure_namespaces(document, file, reporter)
        + hoist_rules(document, file, reporter)
        + strip_styles(document, file, reporter)
        + ensure_stylesheets(document, file, reporter)
        + fix_images(document, file, reporter)
}

/// Declares the XHTML and OPS namespaces on the `html` element
///
/// Existing declarations are never overwritten. A document without an
/// `html` element is left alone.
pub fn ensure_namespaces(document: &mut Document, file: &str, reporter: &dyn Reporter) -> usize {
    let Some(html) = document.find_first_mut("html") else {
        return 0;
    };

    let mut added = 0;
    for (name, namespace) in [("xmlns", XHTML_NAMESPACE), ("xmlns:epub", OPS_NAMESPACE)] {
        if html.has_attr(name) {
            continue;
        }

        html.set_attr(name, namespace);
        reporter.info(&format!("Adding {}=\"{}\" in {}", name, namespace, file));
        added += 1;
    }

    added
}

fn is_list(element: &Element) -> bool {
    LIST_ELEMENTS.iter().any(|name| element.is(name))
}

/// Moves every `hr` out of list structures
///
/// A rule anywhere below a `ul`, `ol` or `li` is re-inserted as the sibling
/// immediately following its outermost list ancestor. Several rules leaving
/// the same list keep their document order.
pub fn hoist_rules(document: &mut Document, file: &str, reporter: &dyn Reporter) -> usize {
    let moved = hoist_rules_in(&mut document.nodes);
    if moved > 0 {
        reporter.info(&format!(
            "Moving {} <hr> element(s) out of lists in {}",
            moved, file
        ));
    }
    moved
}

/// Walks a sibling list outside any list context
fn hoist_rules_in(siblings: &mut Vec<Node>) -> usize {
    let mut moved = 0;

    for node in mem::take(siblings) {
        match node {
            Node::Element(mut element) if is_list(&element) => {
                let mut rules = Vec::new();
                extract_rules(&mut element, &mut rules);
                moved += rules.len();

                siblings.push(Node::Element(element));
                siblings.extend(rules.into_iter().map(Node::Element));
            }
            Node::Element(mut element) => {
                moved += hoist_rules_in(&mut element.children);
                siblings.push(Node::Element(element));
            }
            other => siblings.push(other),
        }
    }

    moved
}

/// Detaches every `hr` below `element`, in document order
fn extract_rules(element: &mut Element, rules: &mut Vec<Element>) {
    for node in mem::take(&mut element.children) {
        match node {
            Node::Element(child) if child.is("hr") => rules.push(child),
            Node::Element(mut child) => {
                extract_rules(&mut child, rules);
                element.children.push(Node::Element(child));
            }
            other => element.children.push(other),
        }
    }
}

/// Removes the `style` attribute from every element
pub fn strip_styles(document: &mut Document, file: &str, reporter: &dyn Reporter) -> usize {
    let mut removed = 0;

    document.walk_mut(&mut |element: &mut Element| {
        if let Some(style) = element.remove_attr("style") {
            reporter.info(&format!(
                "Removing style=\"{}\" from <{}> in {}",
                style, element.name, file
            ));
            removed += 1;
        }
    });

    removed
}

fn is_stylesheet_link(node: &Node, href: &str) -> bool {
    node.as_element().is_some_and(|element| {
        element.is("link") && element.get_attr("href").as_deref() == Some(href)
    })
}

/// Makes the head link each of [REQUIRED_STYLESHEETS] exactly once
///
/// Missing links are appended; repeated ones are dropped. Nothing is done
/// when the document has no head.
pub fn ensure_stylesheets(document: &mut Document, file: &str, reporter: &dyn Reporter) -> usize {
    let Some(head) = document.find_first_mut("head") else {
        return 0;
    };

    let mut changes = 0;
    for href in REQUIRED_STYLESHEETS {
        let mut seen = false;
        let before = head.children.len();
        head.children.retain(|node| {
            if !is_stylesheet_link(node, href) {
                return true;
            }
            let keep = !seen;
            seen = true;
            keep
        });

        let duplicates = before - head.children.len();
        if duplicates > 0 {
            reporter.info(&format!(
                "Removing {} duplicate link(s) to {} in {}",
                duplicates, href, file
            ));
            changes += duplicates;
        }

        if !seen {
            let link = Element::new("link")
                .with_attr("rel", "stylesheet")
                .with_attr("href", href);
            head.children.push(Node::Element(link));
            reporter.info(&format!("Adding stylesheet link {} in {}", href, file));
            changes += 1;
        }
    }

    changes
}

/// Builds the alternative text for an image from its normalized source
fn describe_image(src: &str) -> String {
    let stem = Path::new(src)
        .file_stem()
        .map(|stem| stem.to_string_lossy().replace('-', " "))
        .unwrap_or_default();

    let mut chars = stem.trim().chars();
    match chars.next() {
        Some(first) => format!("Illustration: {}{}", first.to_uppercase(), chars.as_str()),
        None => "Illustration".to_string(),
    }
}

/// Whether `src` names a remote resource: it has a URL scheme such as
/// `https:` or is protocol-relative
fn is_remote_source(src: &str) -> bool {
    if src.starts_with("//") {
        return true;
    }

    let Some((scheme, _)) = src.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Normalizes image sources and fills in missing alternative text
///
/// `data:` URIs are not file references and are skipped entirely. Remote
/// sources keep their URL and only get alternative text.
pub fn fix_images(document: &mut Document, file: &str, reporter: &dyn Reporter) -> usize {
    let mut changes = 0;

    document.walk_mut(&mut |element: &mut Element| {
        if !element.is("img") {
            return;
        }
        let Some(src) = element.get_attr("src") else {
            return;
        };
        if src.trim_start().to_ascii_lowercase().starts_with("data:") {
            return;
        }

        let normalized = if is_remote_source(src.trim()) {
            src.clone()
        } else {
            normalize_filename(&src)
        };
        if normalized != src {
            reporter.info(&format!(
                "Updating image src in {}: {} → {}",
                file, src, normalized
            ));
            element.set_attr("src", &normalized);
            changes += 1;
        }

        let has_alt = element
            .get_attr("alt")
            .is_some_and(|alt| !alt.trim().is_empty());
        if !has_alt {
            let alt = describe_image(&normalized);
            reporter.info(&format!(
                "Adding alt text to {} in {}: \"{}\"",
                normalized, file, alt
            ));
            element.set_attr("alt", &alt);
            changes += 1;
        }
    });

    changes
}
