use std::path::Path;

#[cfg(test)]
use chrono::Local;

use crate::error::PrepError;

/// XHTML namespace declared on the root element of every content document
pub const XHTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// EPUB structural semantics (OPS) namespace
pub const OPS_NAMESPACE: &str = "http://www.idpf.org/2007/ops";

/// Literal payload of the `mimetype` entry
pub const EPUB_MIMETYPE: &str = "application/epub+zip";

/// Elements that are lists or list items, for the purposes of rule relocation
pub const LIST_ELEMENTS: [&str; 3] = ["ul", "ol", "li"];

/// Image extensions recognized by the rename pass and the manifest builder
pub const IMAGE_MEDIA_TYPES: [(&str, &str); 5] = [
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
];

/// Font extensions recognized by the manifest builder
pub const FONT_MEDIA_TYPES: [(&str, &str); 4] = [
    ("ttf", "font/ttf"),
    ("otf", "font/otf"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
];

/// Returns the current time with custom format
#[cfg(test)]
pub fn local_time() -> String {
    Local::now().format("%Y-%m-%dT%H-%M-%S.%fU%z").to_string()
}

/// Looks up the media type registered for an extension in one of the tables above
pub fn media_type_for<'a>(table: &[(&str, &'a str)], extension: &str) -> Option<&'a str> {
    let extension = extension.to_lowercase();
    table
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, mime)| *mime)
}

/// Returns the lower-cased extension of a path, or an empty string
pub fn lowercase_extension<P: AsRef<Path>>(path: P) -> String {
    match path.as_ref().extension() {
        Some(ext) => ext.to_string_lossy().to_lowercase(),
        None => String::new(),
    }
}

/// Whether the path names an XHTML content document
pub fn is_xhtml<P: AsRef<Path>>(path: P) -> bool {
    lowercase_extension(path) == "xhtml"
}

/// Expresses `path` relative to `root` using `/` separators
///
/// The result is the form used for mapping keys, manifest hrefs and
/// archive entry names.
pub fn relative_path(root: &Path, path: &Path) -> Result<String, PrepError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| PrepError::PathOutsideProject {
            path: path.to_string_lossy().to_string(),
        })?;

    Ok(relative.to_string_lossy().replace('\\', "/"))
}

/// Checks that a project-relative path stays inside the project
///
/// Absolute paths and paths that climb above the root with `..` are rejected.
pub fn is_contained_relative_path(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') || path.starts_with('\\') {
        return false;
    }

    let mut depth: i32 = 0;
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => depth += 1,
        }
    }

    depth > 0
}

/// Decodes the bytes of a text file
///
/// This trait decodes byte data into strings, supporting multiple encoding formats,
/// including UTF-8 (with or without BOM), UTF-16 BE, and UTF-16 LE.
///
/// ## Notes
/// - When attempting to parse a byte stream lacking a BOM (Byte Order Mark), the parsing
///   results may be unreadable; caution should be exercised when using such streams.
pub trait DecodeBytes {
    fn decode(&self) -> Result<String, PrepError>;
}

impl DecodeBytes for Vec<u8> {
    fn decode(&self) -> Result<String, PrepError> {
        if self.is_empty() || self.len() < 4 {
            return Err(PrepError::EmptyDataError);
        }

        match self[0..3] {
            // Check UTF-8 BOM (0xEF, 0xBB, 0xBF)
            [0xEF, 0xBB, 0xBF, ..] => {
                String::from_utf8(self[3..].to_vec()).map_err(PrepError::from)
            }

            // Check UTF-16 BE BOM (0xFE, 0xFF)
            [0xFE, 0xFF, ..] => {
                let utf16_units: Vec<u16> = self[2..]
                    .chunks_exact(2)
                    .map(|b| u16::from_be_bytes([b[0], b[1]]))
                    .collect();

                String::from_utf16(&utf16_units).map_err(PrepError::from)
            }

            // Check UTF-16 LE BOM (0xFF, 0xFE)
            [0xFF, 0xFE, ..] => {
                let utf16_units: Vec<u16> = self[2..]
                    .chunks_exact(2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]))
                    .collect();

                String::from_utf16(&utf16_units).map_err(PrepError::from)
            }

            // Content documents are authored as UTF-8; anything else is
            // an error, never a lossy guess.
            _ => String::from_utf8(self.to_vec()).map_err(PrepError::from),
        }
    }
}

/// Provides functionality for normalizing whitespace characters
///
/// This trait normalizes various sequences of whitespace characters
/// (including spaces, tabs, newlines, etc.) in a string into a single
/// whitespace character, removing leading and trailing whitespace characters.
pub trait NormalizeWhitespace {
    fn normalize_whitespace(&self) -> String;
}

impl NormalizeWhitespace for &str {
    fn normalize_whitespace(&self) -> String {
        self.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

impl NormalizeWhitespace for String {
    fn normalize_whitespace(&self) -> String {
        self.as_str().normalize_whitespace()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use crate::{
        error::PrepError,
        utils::{
            DecodeBytes, IMAGE_MEDIA_TYPES, NormalizeWhitespace, is_contained_relative_path,
            media_type_for, relative_path,
        },
    };

    /// Test with empty data
    #[test]
    fn test_decode_empty_data() {
        let data = vec![];
        let result = data.decode();
        assert!(result.is_err());
        assert_eq!(result.unwrap_err(), PrepError::EmptyDataError);
    }

    /// Testing text decoding with UTF-8 BOM
    #[test]
    fn test_decode_utf8_with_bom() {
        let data: Vec<u8> = vec![0xEF, 0xBB, 0xBF, b'H', b'e', b'l', b'l', b'o'];
        let result = data.decode();
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "Hello");
    }

    /// Test text decoding with UTF-16 LE BOM
    #[test]
    fn test_decode_utf16_le_with_bom() {
        let data = vec![
            0xFF, 0xFE, // BOM
            b'H', 0x00, // H
            b'e', 0x00, // e
            b'l', 0x00, // l
            b'l', 0x00, // l
            b'o', 0x00, // o
        ];
        let result = data.decode();
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "Hello");
    }

    #[test]
    fn test_decode_plain_utf8() {
        let data = "<p>Caf\u{e9}</p>".as_bytes().to_vec();
        assert_eq!(data.decode().unwrap(), "<p>Caf\u{e9}</p>");
    }

    #[test]
    fn test_decode_latin1_is_rejected() {
        let data = b"<p>Caf\xE9</p>".to_vec();

        assert!(matches!(
            data.decode(),
            Err(PrepError::Utf8DecodeError { .. })
        ));
    }

    #[test]
    fn test_normalize_whitespace_trait() {
        let text = "  Hello,\tWorld!\n\nRust  ";
        assert_eq!(text.normalize_whitespace(), "Hello, World! Rust");
    }

    #[test]
    fn test_media_type_lookup_ignores_case() {
        assert_eq!(media_type_for(&IMAGE_MEDIA_TYPES, "JPG"), Some("image/jpeg"));
        assert_eq!(media_type_for(&IMAGE_MEDIA_TYPES, "bmp"), None);
    }

    #[test]
    fn test_relative_path() {
        let root = Path::new("/book/OEBPS");
        let path = Path::new("/book/OEBPS/text/ch1.xhtml");
        assert_eq!(relative_path(root, path).unwrap(), "text/ch1.xhtml");

        let outside = Path::new("/other/ch1.xhtml");
        assert_eq!(
            relative_path(root, outside).unwrap_err(),
            PrepError::PathOutsideProject {
                path: "/other/ch1.xhtml".to_string()
            }
        );
    }

    #[test]
    fn test_is_contained_relative_path() {
        assert!(is_contained_relative_path("content.opf"));
        assert!(is_contained_relative_path("OEBPS/content.opf"));
        assert!(is_contained_relative_path("a/../content.opf"));
        assert!(!is_contained_relative_path("../content.opf"));
        assert!(!is_contained_relative_path("/content.opf"));
        assert!(!is_contained_relative_path("a/../.."));
        assert!(!is_contained_relative_path(""));
    }
}
