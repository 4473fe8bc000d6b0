//! Mutable markup tree for content documents
//!
//! Content documents are read with `quick_xml` into a [Document]: an ordered
//! list of [Node]s where elements own their attributes and children. All
//! repairs are tree edits; [Document::to_xhtml] then writes the tree back.
//!
//! ## Tolerance
//!
//! Input is expected to be close to XHTML, not well-formed. The reader
//! repairs the usual authoring slips instead of failing:
//!
//! - void HTML elements written as start tags (`<hr>`, `<br>`, `<img ...>`)
//!   are treated as empty elements;
//! - an end tag closes the nearest open element with the same name, closing
//!   everything opened after it;
//! - end tags that match no open element are dropped;
//! - elements still open at the end of input are closed;
//! - a start tag ends what HTML leaves implicit: a new `li` closes the open
//!   `li` of the same list, a new `dt`/`dd` closes the open one, and a
//!   block element closes an open `p`;
//! - valueless and unquoted attributes are accepted;
//! - a bare `&` in text or attribute values is escaped, and so is a `<` in
//!   text that cannot start markup (`a < b`);
//! - `script` and `style` bodies without CDATA are read as plain text.
//!
//! Lexical errors the reader cannot get past (unterminated tags, comments or
//! declarations) are returned as [PrepError::QuickXmlError]. Markup that only
//! reads as a tag with an impossible name or a stray `<` among its attributes
//! (`<b then</p>`) is rejected with [PrepError::MalformedMarkup] rather than
//! rewritten. The caller decides whether either is fatal.
//!
//! ## Raw values
//!
//! Text nodes and attribute values are stored escaped, exactly as read, so
//! character references survive a read/write cycle unchanged. Use
//! [Element::get_attr] / [Element::set_attr] and [Node::text] to cross the
//! escaped/unescaped boundary.

use std::borrow::Cow;

use indexmap::IndexMap;
use quick_xml::{
    Reader, Writer,
    escape::{escape, unescape},
    events::{BytesCData, BytesEnd, BytesPI, BytesStart, BytesText, Event, attributes::Attribute},
    name::QName,
};

use crate::error::PrepError;

/// HTML elements that never have content
pub const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Start tags that end an open `p`
const CLOSES_PARAGRAPH: [&str; 28] = [
    "address", "article", "aside", "blockquote", "dd", "details", "div", "dl", "dt", "fieldset",
    "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr",
    "li", "main", "nav", "ol", "p", "ul",
];

/// Elements an implied end tag never reaches past
const SCOPE_BOUNDARIES: [&str; 10] = [
    "applet", "button", "caption", "html", "marquee", "object", "table", "td", "template", "th",
];

/// Elements whose content is script or style text, not markup
const RAW_TEXT_ELEMENTS: [&str; 2] = ["script", "style"];

type XmlWriter = Writer<Vec<u8>>;

/// A node of the markup tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),

    /// Escaped character data
    Text(String),

    Comment(String),
    CData(String),

    /// Content of the XML declaration, e.g. `xml version="1.0"`
    Declaration(String),

    ProcessingInstruction(String),
    Doctype(String),
}

impl Node {
    /// Creates a text node from unescaped text
    pub fn text(value: &str) -> Self {
        Node::Text(escape(value).to_string())
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(element) => Some(element),
            _ => None,
        }
    }

    /// Whether this node is an element with the given local name
    pub fn is_element(&self, name: &str) -> bool {
        self.as_element().is_some_and(|element| element.is(name))
    }
}

/// Represents an element node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Qualified name as written, e.g. `html` or `epub:switch`
    pub name: String,

    /// Attributes in document order; values are stored escaped
    pub attributes: IndexMap<String, String>,

    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attributes: IndexMap::new(),
            children: Vec::new(),
        }
    }

    /// Builder-style attribute setter; `value` is unescaped text
    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Builder-style text child; `text` is unescaped text
    pub fn with_text(mut self, text: &str) -> Self {
        self.children.push(Node::text(text));
        self
    }

    /// The local name of the element (excluding namespace prefix)
    pub fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    /// Case-insensitive comparison of the local name
    pub fn is(&self, name: &str) -> bool {
        self.local_name().eq_ignore_ascii_case(name)
    }

    pub fn is_void(&self) -> bool {
        VOID_ELEMENTS.iter().any(|void| self.is(void))
    }

    fn attr_key(&self, name: &str) -> Option<&String> {
        self.attributes
            .keys()
            .find(|key| key.eq_ignore_ascii_case(name))
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr_key(name).is_some()
    }

    /// Returns the unescaped value of the specified attribute
    ///
    /// Attribute names are matched case-insensitively. A value holding a
    /// reference that cannot be resolved is returned as written.
    pub fn get_attr(&self, name: &str) -> Option<String> {
        let key = self.attr_key(name)?;
        let raw = &self.attributes[key];

        Some(match unescape(raw) {
            Ok(value) => value.to_string(),
            Err(_) => raw.clone(),
        })
    }

    /// Sets an attribute from unescaped text, keeping its position if present
    pub fn set_attr(&mut self, name: &str, value: &str) {
        let key = match self.attr_key(name) {
            Some(key) => key.clone(),
            None => name.to_string(),
        };
        self.attributes.insert(key, escape(value).to_string());
    }

    /// Removes an attribute, returning its raw value
    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let key = self.attr_key(name)?.clone();
        self.attributes.shift_remove(&key)
    }

    /// Whether the whitespace-separated `class` attribute contains `class`
    pub fn has_class(&self, class: &str) -> bool {
        self.get_attr("class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }

    /// Gets the escaped text content of the element and all its descendants
    pub fn text(&self) -> String {
        let mut result = String::new();
        self.collect_text(&mut result);
        result
    }

    fn collect_text(&self, result: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(text) => result.push_str(text),
                Node::CData(cdata) => result.push_str(&escape(cdata.as_str())),
                Node::Element(element) => element.collect_text(result),
                _ => {}
            }
        }
    }

    /// Get children elements
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    /// Find all child elements with the specified local name
    pub fn find_children_by_name(&self, name: &str) -> impl Iterator<Item = &Element> {
        self.child_elements().filter(move |child| child.is(name))
    }

    /// Find all elements with the specified name, this element included,
    /// in document order
    pub fn find_elements_by_name(&self, name: &str) -> impl Iterator<Item = &Element> {
        SearchElementsByNameIter::new(self, name)
    }

    /// Depth-first search for the first element with the specified name
    pub fn find_first_mut(&mut self, name: &str) -> Option<&mut Element> {
        if self.is(name) {
            return Some(self);
        }

        for child in self.children.iter_mut() {
            if let Node::Element(element) = child {
                if let Some(found) = element.find_first_mut(name) {
                    return Some(found);
                }
            }
        }

        None
    }

    /// Visits this element and every descendant element in document order
    pub fn walk_mut(&mut self, visit: &mut dyn FnMut(&mut Element)) {
        visit(self);
        for child in self.children.iter_mut() {
            if let Node::Element(element) = child {
                element.walk_mut(visit);
            }
        }
    }

    fn from_start(start: &BytesStart) -> Result<Self, PrepError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).to_string();
        if !is_markup_name(&name) {
            return Err(PrepError::MalformedMarkup {
                detail: format!("impossible element name \"{}\"", name),
            });
        }
        if has_unquoted_lt(start.attributes_raw()) {
            return Err(PrepError::MalformedMarkup {
                detail: format!("unquoted '<' inside the <{}> tag", name),
            });
        }
        let mut element = Element::new(&name);

        for attr in start.html_attributes().flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let value = repair_raw_value(&String::from_utf8_lossy(&attr.value));

            // The first occurrence of a duplicated attribute wins
            element.attributes.entry(key).or_insert(value);
        }

        Ok(element)
    }
}

struct SearchElementsByNameIter<'a> {
    elements: Vec<&'a Element>,
    current_index: usize,
    target_name: String,
}

impl<'a> SearchElementsByNameIter<'a> {
    fn new(root: &'a Element, name: &str) -> Self {
        let mut elements = Vec::new();
        Self::collect_elements(root, &mut elements);
        Self {
            elements,
            current_index: 0,
            target_name: name.to_string(),
        }
    }

    fn collect_elements(element: &'a Element, collection: &mut Vec<&'a Element>) {
        collection.push(element);
        for child in element.child_elements() {
            Self::collect_elements(child, collection);
        }
    }
}

impl<'a> Iterator for SearchElementsByNameIter<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        while self.current_index < self.elements.len() {
            let element = self.elements[self.current_index];
            self.current_index += 1;
            if element.is(&self.target_name) {
                return Some(element);
            }
        }
        None
    }
}

/// A parsed content document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    /// Top-level nodes: declaration, doctype, comments and the root element
    pub nodes: Vec<Node>,
}

impl Document {
    /// Parses markup text into a tree, repairing structural slips
    pub fn parse(content: &str) -> Result<Self, PrepError> {
        if content.trim().is_empty() {
            return Err(PrepError::EmptyDataError);
        }

        let content = repair_markup(content);
        let mut reader = Reader::from_str(&content);
        let config = reader.config_mut();
        config.trim_text(false);
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
        config.expand_empty_elements = false;

        let mut builder = TreeBuilder::default();

        loop {
            match reader.read_event()? {
                Event::Eof => break,

                Event::Start(e) => builder.start(Element::from_start(&e)?),

                Event::Empty(e) => {
                    let element = Element::from_start(&e)?;
                    builder.close_implied(&element);
                    builder.attach(Node::Element(element));
                }

                Event::End(e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    builder.close(&name);
                }

                Event::Text(e) => builder.push_text(&String::from_utf8_lossy(&e)),

                // Entity and character references come back as separate events;
                // they are kept verbatim inside the surrounding text.
                Event::GeneralRef(e) => {
                    builder.push_text(&format!("&{};", String::from_utf8_lossy(&e)))
                }

                Event::CData(e) => {
                    builder.attach(Node::CData(String::from_utf8_lossy(&e).to_string()))
                }

                Event::Comment(e) => {
                    builder.attach(Node::Comment(String::from_utf8_lossy(&e).to_string()))
                }

                Event::Decl(e) => {
                    builder.attach(Node::Declaration(String::from_utf8_lossy(&e).to_string()))
                }

                Event::PI(e) => builder.attach(Node::ProcessingInstruction(
                    String::from_utf8_lossy(&e).to_string(),
                )),

                Event::DocType(e) => {
                    builder.attach(Node::Doctype(String::from_utf8_lossy(&e).to_string()))
                }
            }
        }

        Ok(Document {
            nodes: builder.finish(),
        })
    }

    /// The first top-level element
    pub fn root(&self) -> Option<&Element> {
        self.nodes.iter().find_map(Node::as_element)
    }

    /// Depth-first search for the first element with the specified name
    pub fn find_first_mut(&mut self, name: &str) -> Option<&mut Element> {
        for node in self.nodes.iter_mut() {
            if let Node::Element(element) = node {
                if let Some(found) = element.find_first_mut(name) {
                    return Some(found);
                }
            }
        }

        None
    }

    /// Find all elements with the specified name, in document order
    pub fn find_elements_by_name(&self, name: &str) -> Vec<&Element> {
        self.nodes
            .iter()
            .filter_map(Node::as_element)
            .flat_map(|element| element.find_elements_by_name(name))
            .collect()
    }

    /// Visits every element in document order
    pub fn walk_mut(&mut self, visit: &mut dyn FnMut(&mut Element)) {
        for node in self.nodes.iter_mut() {
            if let Node::Element(element) = node {
                element.walk_mut(visit);
            }
        }
    }

    /// Serializes the tree back to markup text
    ///
    /// Void elements are written self-closed; every other element gets an
    /// explicit end tag, even when empty.
    pub fn to_xhtml(&self) -> Result<String, PrepError> {
        let mut writer = Writer::new(Vec::new());

        for node in &self.nodes {
            write_node(&mut writer, node)?;
        }

        Ok(String::from_utf8(writer.into_inner())?)
    }
}

/// Stack of open elements while reading
#[derive(Default)]
struct TreeBuilder {
    nodes: Vec<Node>,
    stack: Vec<Element>,
}

impl TreeBuilder {
    fn start(&mut self, element: Element) {
        self.close_implied(&element);
        if element.is_void() {
            self.attach(Node::Element(element));
        } else {
            self.stack.push(element);
        }
    }

    /// Closes the open elements a new start tag ends implicitly
    fn close_implied(&mut self, element: &Element) {
        if element.is("li") {
            self.close_in_scope(&["li"], &["ul", "ol", "menu"]);
        } else if element.is("dt") || element.is("dd") {
            self.close_in_scope(&["dt", "dd"], &["dl"]);
        }

        if CLOSES_PARAGRAPH.iter().any(|block| element.is(block)) {
            self.close_in_scope(&["p"], &[]);
        }
    }

    /// Closes the nearest open element named in `targets`, unless a
    /// boundary element is open above it
    fn close_in_scope(&mut self, targets: &[&str], boundaries: &[&str]) {
        let nearest = self.stack.iter().rposition(|open| {
            targets
                .iter()
                .chain(boundaries)
                .chain(SCOPE_BOUNDARIES.iter())
                .any(|name| open.is(name))
        });

        if let Some(position) = nearest {
            if targets.iter().any(|name| self.stack[position].is(name)) {
                while self.stack.len() > position {
                    self.close_top();
                }
            }
        }
    }

    fn attach(&mut self, node: Node) {
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => self.nodes.push(node),
        }
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }

        let siblings = match self.stack.last_mut() {
            Some(parent) => &mut parent.children,
            None => &mut self.nodes,
        };

        match siblings.last_mut() {
            Some(Node::Text(previous)) => previous.push_str(text),
            _ => siblings.push(Node::Text(text.to_string())),
        }
    }

    /// Closes the nearest open element named `name` and everything above it
    fn close(&mut self, name: &str) {
        let Some(position) = self
            .stack
            .iter()
            .rposition(|open| open.name.eq_ignore_ascii_case(name))
        else {
            return;
        };

        while self.stack.len() > position {
            self.close_top();
        }
    }

    fn close_top(&mut self) {
        if let Some(element) = self.stack.pop() {
            self.attach(Node::Element(element));
        }
    }

    fn finish(mut self) -> Vec<Node> {
        while !self.stack.is_empty() {
            self.close_top();
        }
        self.nodes
    }
}

fn write_node(writer: &mut XmlWriter, node: &Node) -> Result<(), PrepError> {
    match node {
        Node::Element(element) => write_element(writer, element)?,
        Node::Text(text) => writer.write_event(Event::Text(BytesText::from_escaped(text.as_str())))?,
        Node::Comment(comment) => {
            writer.write_event(Event::Comment(BytesText::from_escaped(comment.as_str())))?
        }
        Node::CData(cdata) => writer.write_event(Event::CData(BytesCData::new(cdata.as_str())))?,
        Node::Declaration(content) | Node::ProcessingInstruction(content) => {
            writer.write_event(Event::PI(BytesPI::new(content.as_str())))?
        }
        Node::Doctype(doctype) => {
            writer.write_event(Event::DocType(BytesText::from_escaped(doctype.as_str())))?
        }
    }

    Ok(())
}

fn write_element(writer: &mut XmlWriter, element: &Element) -> Result<(), PrepError> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        let value = value.replace('"', "&quot;").replace('<', "&lt;");
        start.push_attribute(Attribute {
            key: QName(key.as_bytes()),
            value: Cow::Owned(value.into_bytes()),
        });
    }

    if element.is_void() && element.children.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    for child in &element.children {
        write_node(writer, child)?;
    }
    writer.write_event(Event::End(BytesEnd::new(element.name.as_str())))?;

    Ok(())
}

/// Escapes `&` and `<` in character data where they cannot start markup
///
/// Tags, comments, CDATA sections, declarations and processing
/// instructions are copied as they are. The bodies of `script` and `style`
/// elements are escaped whole unless they already use CDATA.
fn repair_markup(content: &str) -> String {
    let mut repaired = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(position) = rest.find(['<', '&']) {
        repaired.push_str(&rest[..position]);
        rest = &rest[position..];

        if rest.starts_with('&') {
            repaired.push_str(if starts_with_reference(rest) { "&" } else { "&amp;" });
            rest = &rest[1..];
            continue;
        }

        let Some(length) = markup_length(rest) else {
            repaired.push_str("&lt;");
            rest = &rest[1..];
            continue;
        };

        let (markup, tail) = rest.split_at(length);
        repaired.push_str(markup);
        rest = tail;

        if let Some(name) = raw_text_element(markup) {
            let end = rest
                .to_ascii_lowercase()
                .find(&format!("</{}", name))
                .unwrap_or(rest.len());
            let (body, tail) = rest.split_at(end);
            if body.contains("<![CDATA[") {
                repaired.push_str(body);
            } else {
                repaired.push_str(&repair_raw_value(body).replace('<', "&lt;"));
            }
            rest = tail;
        }
    }

    repaired.push_str(rest);
    repaired
}

/// Length of the markup construct at the start of `text`, `None` when the
/// `<` there cannot start markup
///
/// An unterminated construct spans the rest of the input, so the reader
/// reports it.
fn markup_length(text: &str) -> Option<usize> {
    let until = |terminator: &str, from: usize| {
        text[from..]
            .find(terminator)
            .map_or(text.len(), |end| from + end + terminator.len())
    };

    if text.starts_with("<!--") {
        return Some(until("-->", 4));
    }
    if text.starts_with("<![CDATA[") {
        return Some(until("]]>", 9));
    }
    if text.starts_with("<?") {
        return Some(until("?>", 2));
    }
    if text.starts_with("<!") {
        return Some(until(">", 2));
    }

    let name_start = if text.starts_with("</") { 2 } else { 1 };
    if !text[name_start..].chars().next().is_some_and(is_name_start) {
        return None;
    }

    let mut quote = None;
    for (index, ch) in text.char_indices().skip(name_start) {
        match (quote, ch) {
            (None, '"' | '\'') => quote = Some(ch),
            (Some(open), _) if open == ch => quote = None,
            (None, '>') => return Some(index + 1),
            _ => {}
        }
    }

    Some(text.len())
}

/// The name of a `script` or `style` start tag that has a body
fn raw_text_element(markup: &str) -> Option<&'static str> {
    let name: String = markup
        .strip_prefix('<')?
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '/' && *c != '>')
        .collect();

    if markup.ends_with("/>") {
        return None;
    }

    RAW_TEXT_ELEMENTS
        .into_iter()
        .find(|raw| name.eq_ignore_ascii_case(raw))
}

fn is_name_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_' || ch == ':'
}

/// Whether `name` can be an element name
fn is_markup_name(name: &str) -> bool {
    name.chars().next().is_some_and(is_name_start)
        && !name.contains(['<', '>', '/', '=', '"', '\'', '&'])
}

/// Whether the attribute part of a tag holds a `<` outside quoted values
fn has_unquoted_lt(raw: &[u8]) -> bool {
    let mut quote = None;
    for &byte in raw {
        match (quote, byte) {
            (None, b'"' | b'\'') => quote = Some(byte),
            (Some(open), _) if open == byte => quote = None,
            (None, b'<') => return true,
            _ => {}
        }
    }
    false
}

/// Escapes every `&` that does not start a character or entity reference
fn repair_raw_value(raw: &str) -> String {
    let mut repaired = String::with_capacity(raw.len());

    for (index, ch) in raw.char_indices() {
        if ch == '&' && !starts_with_reference(&raw[index..]) {
            repaired.push_str("&amp;");
        } else {
            repaired.push(ch);
        }
    }

    repaired
}

fn starts_with_reference(text: &str) -> bool {
    let Some(end) = text.find(';') else {
        return false;
    };
    let body = &text[1..end];

    if let Some(decimal) = body.strip_prefix('#') {
        if let Some(hex) = decimal.strip_prefix(['x', 'X']) {
            return !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit());
        }
        return !decimal.is_empty() && decimal.chars().all(|c| c.is_ascii_digit());
    }

    let mut chars = body.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric())
}
