use std::collections::HashMap;

use uuid::Uuid;

/// Association from original relative path to normalized relative path
///
/// Built once by the rename pass and read-only afterwards. Keys and values are
/// project-relative paths with `/` separators. Only exact key matches are ever
/// looked up; values are never matched against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilenameMapping {
    entries: HashMap<String, String>,
}

impl FilenameMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `old` was renamed to `new`
    pub fn insert(&mut self, old: &str, new: &str) -> &mut Self {
        self.entries.insert(old.to_string(), new.to_string());
        self
    }

    /// Returns the new path for an exact old path match
    pub fn get(&self, old: &str) -> Option<&str> {
        self.entries.get(old).map(String::as_str)
    }

    /// Returns the new path when `path` was renamed, otherwise `path` itself
    pub fn resolve<'a>(&'a self, path: &'a str) -> &'a str {
        self.get(path).unwrap_or(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(old, new)` pairs in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Descriptive metadata of the book
///
/// Every field is a plain string; missing values in the metadata document are
/// replaced with fixed fallbacks when the metadata is resolved. Immutable once
/// constructed for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookMetadata {
    pub title: String,
    pub creator: String,
    pub language: String,

    /// Unique identifier of the publication
    ///
    /// A fresh `urn:uuid:` identifier is generated when none is supplied.
    pub identifier: String,

    /// Subjects joined with ", "; empty when there are none
    pub subject: String,

    /// Rights statement; empty when there is none
    pub rights: String,
}

impl BookMetadata {
    pub const DEFAULT_TITLE: &'static str = "Untitled Book";
    pub const DEFAULT_CREATOR: &'static str = "Unknown Author";
    pub const DEFAULT_LANGUAGE: &'static str = "en";

    /// Generate a fresh `urn:uuid:` identifier
    pub fn generate_identifier() -> String {
        format!("urn:uuid:{}", Uuid::new_v4())
    }
}

impl Default for BookMetadata {
    fn default() -> Self {
        Self {
            title: Self::DEFAULT_TITLE.to_string(),
            creator: Self::DEFAULT_CREATOR.to_string(),
            language: Self::DEFAULT_LANGUAGE.to_string(),
            identifier: Self::generate_identifier(),
            subject: String::new(),
            rights: String::new(),
        }
    }
}

/// Represents a resource item declared in the package manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    /// Unique identifier of the item within the manifest
    pub id: String,

    /// Project-relative path of the resource, `/`-separated
    pub href: String,

    /// The media type of the resource
    pub mime: String,

    /// Optional space-separated properties, such as `nav`
    pub properties: Option<String>,
}

impl ManifestItem {
    pub fn new(id: &str, href: &str, mime: &str) -> Self {
        Self {
            id: id.to_string(),
            href: href.to_string(),
            mime: mime.to_string(),
            properties: None,
        }
    }

    pub fn append_property(mut self, property: &str) -> Self {
        let properties = match self.properties.take() {
            Some(existing) if !existing.is_empty() => format!("{} {}", existing, property),
            _ => property.to_string(),
        };
        self.properties = Some(properties);
        self
    }

    pub fn has_property(&self, property: &str) -> bool {
        self.properties
            .as_deref()
            .is_some_and(|properties| properties.split_whitespace().any(|p| p == property))
    }

    /// Attributes of the `<item>` element, in output order
    pub fn attributes(&self) -> Vec<(&str, &str)> {
        let mut attributes = vec![
            ("id", self.id.as_str()),
            ("href", self.href.as_str()),
            ("media-type", self.mime.as_str()),
        ];

        if let Some(properties) = &self.properties {
            attributes.push(("properties", properties.as_str()));
        }

        attributes
    }
}

/// Represents an item in the spine, defining the reading order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineItem {
    /// The ID reference to a manifest item
    pub idref: String,
}

impl SpineItem {
    pub fn new(idref: &str) -> Self {
        Self {
            idref: idref.to_string(),
        }
    }

    pub fn attributes(&self) -> Vec<(&str, &str)> {
        vec![("idref", self.idref.as_str())]
    }
}

#[cfg(test)]
mod tests {
    use crate::types::{BookMetadata, FilenameMapping, ManifestItem};

    #[test]
    fn test_mapping_resolves_exact_keys_only() {
        let mut mapping = FilenameMapping::new();
        mapping.insert("Chapter One_Final.xhtml", "chapter-one.xhtml");

        assert_eq!(
            mapping.resolve("Chapter One_Final.xhtml"),
            "chapter-one.xhtml"
        );
        assert_eq!(mapping.resolve("chapter-one.xhtml"), "chapter-one.xhtml");
        assert_eq!(mapping.get("Chapter One"), None);
        assert_eq!(mapping.len(), 1);
    }

    #[test]
    fn test_default_metadata_generates_identifier() {
        let first = BookMetadata::default();
        let second = BookMetadata::default();

        assert!(first.identifier.starts_with("urn:uuid:"));
        assert_ne!(first.identifier, second.identifier);
        assert_eq!(first.title, "Untitled Book");
        assert_eq!(first.creator, "Unknown Author");
        assert_eq!(first.language, "en");
    }

    #[test]
    fn test_manifest_item_properties() {
        let item = ManifestItem::new("nav", "toc.xhtml", "application/xhtml+xml")
            .append_property("nav")
            .append_property("scripted");

        assert!(item.has_property("nav"));
        assert!(item.has_property("scripted"));
        assert!(!item.has_property("svg"));
        assert_eq!(
            item.attributes(),
            vec![
                ("id", "nav"),
                ("href", "toc.xhtml"),
                ("media-type", "application/xhtml+xml"),
                ("properties", "nav scripted"),
            ]
        );
    }
}
