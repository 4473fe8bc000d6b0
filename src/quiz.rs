//! Quiz markup normalization
//!
//! Quiz content is recognized by authoring conventions: option lists carry
//! the `quiz-options` class, and answer-key documents have `quizkey` in
//! their file name (ignoring case, `-` and `_`).

use std::path::Path;

use crate::{
    document::{Document, Element, Node},
    report::Reporter,
    utils::NormalizeWhitespace,
};

/// Class token marking a list of quiz options
pub const QUIZ_OPTIONS_CLASS: &str = "quiz-options";

/// Number of options every quiz is padded to
pub const MIN_QUIZ_OPTIONS: usize = 4;

/// Whether the file at `path` is a quiz answer key
pub fn is_quiz_key<P: AsRef<Path>>(path: P) -> bool {
    let Some(stem) = path.as_ref().file_stem() else {
        return false;
    };

    stem.to_string_lossy()
        .to_lowercase()
        .replace(['-', '_'], "")
        .contains("quizkey")
}

/// Pads every quiz-options list with placeholder items
///
/// Only direct `li` children are counted. Lists that already have
/// [MIN_QUIZ_OPTIONS] or more items are never shortened.
///
/// ## Return
/// The number of placeholder items added.
pub fn pad_quiz_options(document: &mut Document, file: &str, reporter: &dyn Reporter) -> usize {
    let mut added = 0;

    document.walk_mut(&mut |element: &mut Element| {
        if !(element.is("ul") || element.is("ol")) || !element.has_class(QUIZ_OPTIONS_CLASS) {
            return;
        }

        let count = element.find_children_by_name("li").count();
        for index in count + 1..=MIN_QUIZ_OPTIONS {
            let placeholder = Element::new("li").with_text(&format!("Placeholder option {}", index));
            element.children.push(Node::Element(placeholder));
            added += 1;
        }

        if count < MIN_QUIZ_OPTIONS {
            reporter.info(&format!(
                "Padding quiz options in {}: {} → {}",
                file, count, MIN_QUIZ_OPTIONS
            ));
        }
    });

    added
}

/// Turns the loose answers of a quiz key into an ordered list
///
/// Every direct `p` or `div` child of the body becomes an `li` holding the
/// block's text with whitespace collapsed; the blocks are removed and the
/// list is appended to the body. Markup inside the answers is discarded.
///
/// ## Return
/// The number of answers moved into the list, zero when there is no body
/// or no answer block.
pub fn restructure_quiz_key(document: &mut Document, file: &str, reporter: &dyn Reporter) -> usize {
    let Some(body) = document.find_first_mut("body") else {
        return 0;
    };

    let mut answers = Vec::new();
    body.children.retain(|node| match node.as_element() {
        Some(block) if block.is("p") || block.is("div") => {
            answers.push(block.text().normalize_whitespace());
            false
        }
        _ => true,
    });

    if answers.is_empty() {
        return 0;
    }

    let mut list = Element::new("ol");
    for answer in &answers {
        let mut item = Element::new("li");
        // Flattened text is already escaped
        item.children.push(Node::Text(answer.clone()));
        list.children.push(Node::Element(item));
    }
    body.children.push(Node::Element(list));

    reporter.info(&format!(
        "Restructured quiz key in {}: {} answer block(s) → <ol>",
        file,
        answers.len()
    ));

    answers.len()
}

#[cfg(test)]
mod tests {
    use crate::{
        document::Document,
        quiz::{is_quiz_key, pad_quiz_options, restructure_quiz_key},
        report::MemoryReporter,
    };

    #[test]
    fn test_is_quiz_key() {
        assert!(is_quiz_key("text/Quiz Key.xhtml"));
        assert!(is_quiz_key("text/chapter-3-quiz-key.xhtml"));
        assert!(is_quiz_key("QUIZ_KEY.xhtml"));
        assert!(!is_quiz_key("text/quiz.xhtml"));
        assert!(!is_quiz_key("quizkey/answers.xhtml"));
    }

    #[test]
    fn test_pad_two_options_to_four() {
        let mut document = Document::parse(
            r#"<body><ul class="quiz-options"><li>A</li><li>B</li></ul></body>"#,
        )
        .unwrap();
        let reporter = MemoryReporter::new();

        assert_eq!(pad_quiz_options(&mut document, "q.xhtml", &reporter), 2);
        assert_eq!(
            document.to_xhtml().unwrap(),
            r#"<body><ul class="quiz-options"><li>A</li><li>B</li><li>Placeholder option 3</li><li>Placeholder option 4</li></ul></body>"#
        );
        assert!(reporter.contains("Padding quiz options in q.xhtml: 2 → 4"));
    }

    #[test]
    fn test_pad_counts_items_without_end_tags() {
        let mut document =
            Document::parse(r#"<ul class="quiz-options"><li>A<li>B<li>C</ul>"#).unwrap();

        assert_eq!(
            pad_quiz_options(&mut document, "q.xhtml", &MemoryReporter::new()),
            1
        );
        assert_eq!(
            document.to_xhtml().unwrap(),
            r#"<ul class="quiz-options"><li>A</li><li>B</li><li>C</li><li>Placeholder option 4</li></ul>"#
        );
    }

    #[test]
    fn test_pad_never_reduces() {
        let source = r#"<ol class="quiz quiz-options"><li>1</li><li>2</li><li>3</li><li>4</li><li>5</li></ol>"#;
        let mut document = Document::parse(source).unwrap();

        assert_eq!(
            pad_quiz_options(&mut document, "q.xhtml", &MemoryReporter::new()),
            0
        );
        assert_eq!(document.to_xhtml().unwrap(), source);
    }

    #[test]
    fn test_pad_counts_direct_items_only() {
        let mut document = Document::parse(
            r#"<ul class="quiz-options"><li>A<ul><li>x</li><li>y</li><li>z</li></ul></li></ul>"#,
        )
        .unwrap();

        assert_eq!(
            pad_quiz_options(&mut document, "q.xhtml", &MemoryReporter::new()),
            3
        );
        let list = document.root().unwrap();
        assert_eq!(list.find_children_by_name("li").count(), 4);
    }

    #[test]
    fn test_pad_ignores_unmarked_lists() {
        let mut document = Document::parse("<ul class=\"options\"><li>A</li></ul>").unwrap();

        assert_eq!(
            pad_quiz_options(&mut document, "q.xhtml", &MemoryReporter::new()),
            0
        );
    }

    #[test]
    fn test_restructure_quiz_key() {
        let mut document = Document::parse(
            "<html><body><h1>Answers</h1><p>1. <b>B</b>\n  &amp; C</p><div>2.   A</div><section><p>kept</p></section></body></html>",
        )
        .unwrap();
        let reporter = MemoryReporter::new();

        assert_eq!(restructure_quiz_key(&mut document, "quiz-key.xhtml", &reporter), 2);
        assert_eq!(
            document.to_xhtml().unwrap(),
            "<html><body><h1>Answers</h1><section><p>kept</p></section><ol><li>1. B &amp; C</li><li>2. A</li></ol></body></html>"
        );
        assert!(reporter.contains("Restructured quiz key in quiz-key.xhtml"));
    }

    #[test]
    fn test_restructure_without_answers() {
        let source = "<html><body><h1>Nothing</h1></body></html>";
        let mut document = Document::parse(source).unwrap();

        assert_eq!(
            restructure_quiz_key(&mut document, "quiz-key.xhtml", &MemoryReporter::new()),
            0
        );
        assert_eq!(document.to_xhtml().unwrap(), source);
    }
}
