//! Package descriptor synthesis
//!
//! The descriptor is rebuilt from scratch on every run: metadata comes from
//! the `book` mapping of the metadata document, the manifest from what is on
//! disk once every rename and repair has happened.
//!
//! ## Manifest ids
//!
//! - content documents get `item1`..`itemN` in lexicographic order of their
//!   relative paths, which is also the spine order;
//! - the navigation document always gets `nav`, and keeps its spine slot
//!   when it is also a content document;
//! - stylesheets, images and fonts use their sanitized file stem, suffixed
//!   with `_2`, `_3`, ... on collision.

use std::{fs, io::Cursor, path::Path};

use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;
use infer::Infer;
use quick_xml::{
    Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};
use serde_yaml::Value;
use walkdir::WalkDir;

use crate::{
    error::PrepError,
    report::Reporter,
    types::{BookMetadata, ManifestItem, SpineItem},
    utils::{
        FONT_MEDIA_TYPES, IMAGE_MEDIA_TYPES, is_xhtml, lowercase_extension, media_type_for,
        relative_path,
    },
};

type XmlWriter = Writer<Cursor<Vec<u8>>>;

pub const XHTML_MEDIA_TYPE: &str = "application/xhtml+xml";
pub const CSS_MEDIA_TYPE: &str = "text/css";

/// Manifest id reserved for the navigation document
pub const NAV_ID: &str = "nav";

const STYLES_DIR: &str = "styles";
const IMAGES_DIR: &str = "images";
const FONTS_DIR: &str = "fonts";

/// Reads the book metadata from the `book` mapping of a YAML document
///
/// Missing fields fall back to the [BookMetadata] defaults. A missing
/// document, or one whose shape is not a mapping, yields all defaults.
///
/// ## Return
/// - `Ok(BookMetadata)`: the resolved metadata
/// - `Err(PrepError)`: the document exists but cannot be parsed
pub fn load_metadata(yaml_path: &Path, reporter: &dyn Reporter) -> Result<BookMetadata, PrepError> {
    if !yaml_path.is_file() {
        reporter.warn(&format!(
            "YAML file {} not found; using default metadata.",
            yaml_path.display()
        ));
        return Ok(BookMetadata::default());
    }

    let content = fs::read_to_string(yaml_path)?;
    let data: Value =
        serde_yaml::from_str(&content).map_err(|source| PrepError::MalformedMetadata {
            path: yaml_path.to_string_lossy().to_string(),
            source,
        })?;

    Ok(metadata_from_value(&data, reporter))
}

/// Resolves metadata from an already parsed document
pub fn metadata_from_value(data: &Value, reporter: &dyn Reporter) -> BookMetadata {
    let mut metadata = BookMetadata::default();

    let book = match data.get("book") {
        Some(book) if book.is_mapping() => book,
        _ => {
            reporter.warn("No `book` mapping in the metadata document; using default metadata.");
            return metadata;
        }
    };

    if let Some(title) = book.get("title").and_then(scalar_to_string) {
        metadata.title = title;
    }
    if let Some(creator) = book.get("author").and_then(scalar_to_string) {
        metadata.creator = creator;
    }
    if let Some(language) = book.get("language").and_then(scalar_to_string) {
        metadata.language = language;
    }

    let identifier = match book.get("identifier") {
        Some(nested) if nested.is_mapping() => nested.get("text").and_then(scalar_to_string),
        Some(scalar) => scalar_to_string(scalar),
        None => None,
    };
    if let Some(identifier) = identifier {
        metadata.identifier = identifier;
    }

    metadata.subject = match book.get("subject") {
        Some(Value::Sequence(subjects)) => subjects
            .iter()
            .filter_map(scalar_to_string)
            .collect::<Vec<_>>()
            .join(", "),
        Some(subject) => scalar_to_string(subject).unwrap_or_default(),
        None => String::new(),
    };

    if let Some(rights) = book.get("rights").and_then(scalar_to_string) {
        metadata.rights = rights;
    }

    metadata
}

/// Stringifies a non-empty scalar
fn scalar_to_string(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Tagged(tagged) => return scalar_to_string(&tagged.value),
        Value::Null | Value::Sequence(_) | Value::Mapping(_) => return None,
    };

    if text.is_empty() { None } else { Some(text) }
}

/// Collects every XHTML file under `root` as sorted relative paths
pub fn collect_xhtml_files(root: &Path) -> Result<Vec<String>, PrepError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if entry.file_type().is_file() && is_xhtml(entry.path()) {
            files.push(relative_path(root, entry.path())?);
        }
    }

    files.sort();
    Ok(files)
}

/// Collects the files of `root/dir` accepted by `accept`, as sorted relative
/// paths; an absent directory contributes nothing
fn collect_assets(
    root: &Path,
    dir: &str,
    accept: impl Fn(&str) -> bool,
) -> Result<Vec<String>, PrepError> {
    let dir = root.join(dir);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(&dir) {
        let entry = entry?;
        if entry.file_type().is_file() && accept(&lowercase_extension(entry.path())) {
            files.push(relative_path(root, entry.path())?);
        }
    }

    files.sort();
    Ok(files)
}

/// Makes a file stem usable as an XML id
fn sanitize_id(stem: &str, prefix: &str) -> String {
    let id: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    match id.chars().next() {
        Some(first) if !first.is_ascii_digit() => id,
        _ => format!("{}_{}", prefix, id),
    }
}

/// Expresses a project-relative `target` relative to the directory `base`
fn href_from(base: &str, target: &str) -> String {
    let base: Vec<&str> = base.split('/').filter(|part| !part.is_empty()).collect();
    let target: Vec<&str> = target.split('/').collect();

    let common = base
        .iter()
        .zip(&target[..target.len().saturating_sub(1)])
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts = vec![".."; base.len() - common];
    parts.extend(&target[common..]);
    parts.join("/")
}

/// The package document: metadata, manifest and spine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDescriptor {
    pub metadata: BookMetadata,

    /// Manifest items keyed by id, in output order
    pub manifest: IndexMap<String, ManifestItem>,

    pub spine: Vec<SpineItem>,

    /// Value of `dcterms:modified`
    pub modified: String,
}

impl PackageDescriptor {
    /// Creates an empty descriptor stamped with the current time
    pub fn new(metadata: BookMetadata) -> Self {
        Self {
            metadata,
            manifest: IndexMap::new(),
            spine: Vec::new(),
            modified: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    /// Builds the descriptor from the files currently under `root`
    ///
    /// `nav_path` and `package_path` are relative to `root`; manifest hrefs
    /// are written relative to the directory holding the package document.
    pub fn from_project(
        root: &Path,
        metadata: BookMetadata,
        nav_path: &str,
        package_path: &str,
        reporter: &dyn Reporter,
    ) -> Result<Self, PrepError> {
        let base = match package_path.rfind('/') {
            Some(index) => &package_path[..index],
            None => "",
        };

        let mut descriptor = Self::new(metadata);

        let mut nav_listed = false;
        let mut counter = 0;
        for file in collect_xhtml_files(root)? {
            let href = href_from(base, &file);
            if file == nav_path {
                descriptor.insert(
                    ManifestItem::new(NAV_ID, &href, XHTML_MEDIA_TYPE).append_property("nav"),
                );
                descriptor.spine.push(SpineItem::new(NAV_ID));
                nav_listed = true;
                continue;
            }

            counter += 1;
            let id = format!("item{}", counter);
            descriptor.insert(ManifestItem::new(&id, &href, XHTML_MEDIA_TYPE));
            descriptor.spine.push(SpineItem::new(&id));
        }

        for file in collect_assets(root, STYLES_DIR, |ext| ext == "css")? {
            let id = descriptor.unique_id(&file, "style");
            descriptor.insert(ManifestItem::new(&id, &href_from(base, &file), CSS_MEDIA_TYPE));
        }

        for file in collect_assets(root, IMAGES_DIR, |ext| {
            media_type_for(&IMAGE_MEDIA_TYPES, ext).is_some()
        })? {
            let Some(mime) = media_type_for(&IMAGE_MEDIA_TYPES, &lowercase_extension(&file)) else {
                continue;
            };
            check_image_type(&root.join(&file), &file, mime, reporter)?;

            let id = descriptor.unique_id(&file, "image");
            descriptor.insert(ManifestItem::new(&id, &href_from(base, &file), mime));
        }

        for file in collect_assets(root, FONTS_DIR, |ext| {
            media_type_for(&FONT_MEDIA_TYPES, ext).is_some()
        })? {
            let Some(mime) = media_type_for(&FONT_MEDIA_TYPES, &lowercase_extension(&file)) else {
                continue;
            };

            let id = descriptor.unique_id(&file, "font");
            descriptor.insert(ManifestItem::new(&id, &href_from(base, &file), mime));
        }

        if !root.join(nav_path).is_file() {
            reporter.warn(&format!(
                "Navigation document {} not found; listing it in the manifest anyway.",
                nav_path
            ));
        }
        if !nav_listed {
            descriptor.insert(
                ManifestItem::new(NAV_ID, &href_from(base, nav_path), XHTML_MEDIA_TYPE)
                    .append_property("nav"),
            );
        }

        Ok(descriptor)
    }

    fn insert(&mut self, item: ManifestItem) {
        self.manifest.insert(item.id.clone(), item);
    }

    /// Derives an unused id from the stem of `file`
    fn unique_id(&self, file: &str, prefix: &str) -> String {
        let stem = Path::new(file)
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        let base = sanitize_id(&stem, prefix);

        let taken = |id: &str| id == NAV_ID || self.manifest.contains_key(id);
        if !taken(&base) {
            return base;
        }

        let mut index = 2;
        loop {
            let candidate = format!("{}_{}", base, index);
            if !taken(&candidate) {
                return candidate;
            }
            index += 1;
        }
    }

    /// Renders the package document
    pub fn to_xml(&self) -> Result<String, PrepError> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        writer.write_event(Event::Start(BytesStart::new("package").with_attributes([
            ("xmlns", "http://www.idpf.org/2007/opf"),
            ("unique-identifier", "book-id"),
            ("version", "3.0"),
        ])))?;

        self.make_metadata(&mut writer)?;
        self.make_manifest(&mut writer)?;
        self.make_spine(&mut writer)?;

        writer.write_event(Event::End(BytesEnd::new("package")))?;

        Ok(String::from_utf8(writer.into_inner().into_inner())?)
    }

    fn make_metadata(&self, writer: &mut XmlWriter) -> Result<(), PrepError> {
        writer.write_event(Event::Start(
            BytesStart::new("metadata")
                .with_attributes([("xmlns:dc", "http://purl.org/dc/elements/1.1/")]),
        ))?;

        let metadata = &self.metadata;
        let mut elements = vec![
            ("dc:title", vec![], metadata.title.as_str()),
            ("dc:creator", vec![], metadata.creator.as_str()),
            ("dc:language", vec![], metadata.language.as_str()),
            ("dc:identifier", vec![("id", "book-id")], metadata.identifier.as_str()),
        ];
        if !metadata.subject.is_empty() {
            elements.push(("dc:subject", vec![], metadata.subject.as_str()));
        }
        if !metadata.rights.is_empty() {
            elements.push(("dc:rights", vec![], metadata.rights.as_str()));
        }
        elements.push((
            "meta",
            vec![("property", "dcterms:modified")],
            self.modified.as_str(),
        ));

        for (tag_name, attributes, value) in elements {
            writer.write_event(Event::Start(
                BytesStart::new(tag_name).with_attributes(attributes),
            ))?;
            writer.write_event(Event::Text(BytesText::new(value)))?;
            writer.write_event(Event::End(BytesEnd::new(tag_name)))?;
        }

        writer.write_event(Event::End(BytesEnd::new("metadata")))?;

        Ok(())
    }

    fn make_manifest(&self, writer: &mut XmlWriter) -> Result<(), PrepError> {
        writer.write_event(Event::Start(BytesStart::new("manifest")))?;

        for manifest in self.manifest.values() {
            writer.write_event(Event::Empty(
                BytesStart::new("item").with_attributes(manifest.attributes()),
            ))?;
        }

        writer.write_event(Event::End(BytesEnd::new("manifest")))?;

        Ok(())
    }

    fn make_spine(&self, writer: &mut XmlWriter) -> Result<(), PrepError> {
        writer.write_event(Event::Start(BytesStart::new("spine")))?;

        for spine in &self.spine {
            writer.write_event(Event::Empty(
                BytesStart::new("itemref").with_attributes(spine.attributes()),
            ))?;
        }

        writer.write_event(Event::End(BytesEnd::new("spine")))?;

        Ok(())
    }

    /// Writes the package document to `path`, creating parent directories
    pub fn write(&self, path: &Path, reporter: &dyn Reporter) -> Result<(), PrepError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        fs::write(path, self.to_xml()?)?;
        reporter.info(&format!(
            "Generated {} with {} manifest items.",
            path.display(),
            self.manifest.len()
        ));

        Ok(())
    }
}

/// Warns when the bytes of an image disagree with its extension
fn check_image_type(
    path: &Path,
    file: &str,
    expected: &str,
    reporter: &dyn Reporter,
) -> Result<(), PrepError> {
    let buf = fs::read(path)?;
    if let Some(kind) = Infer::new().get(&buf) {
        if kind.mime_type() != expected {
            reporter.warn(&format!(
                "Image {} is declared as {} but its content looks like {}",
                file,
                expected,
                kind.mime_type()
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, env, fs, path::PathBuf};

    use serde_yaml::Value;
    use uuid::Uuid;

    use crate::{
        error::PrepError,
        package::{
            PackageDescriptor, collect_xhtml_files, href_from, load_metadata,
            metadata_from_value, sanitize_id,
        },
        report::MemoryReporter,
        types::{BookMetadata, ManifestItem, SpineItem},
        utils::local_time,
    };

    const PNG: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    fn make_project(name: &str) -> PathBuf {
        let root = env::temp_dir().join(format!("{}-{}", local_time(), name));
        for dir in ["text", "styles", "images/maps", "fonts"] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        fs::write(root.join("text/b.xhtml"), "<html/>").unwrap();
        fs::write(root.join("text/a.xhtml"), "<html/>").unwrap();
        fs::write(root.join("3-TableOfContents.xhtml"), "<html/>").unwrap();
        fs::write(root.join("styles/style.css"), "p {}").unwrap();
        fs::write(root.join("styles/notes.txt"), "ignored").unwrap();
        fs::write(root.join("images/cover.png"), PNG).unwrap();
        fs::write(root.join("images/maps/cover.png"), PNG).unwrap();
        fs::write(root.join("images/1-map.gif"), PNG).unwrap();
        fs::write(root.join("fonts/serif.woff2"), "font").unwrap();
        root
    }

    #[test]
    fn test_metadata_full() {
        let metadata = metadata_from_value(
            &yaml(
                r#"
book:
  title: A Tale & More
  author: Jane Doe
  language: fr
  identifier:
    text: isbn:123
    scheme: ISBN
  subject: [History, Science]
  rights: 2024
"#,
            ),
            &MemoryReporter::new(),
        );

        assert_eq!(metadata.title, "A Tale & More");
        assert_eq!(metadata.creator, "Jane Doe");
        assert_eq!(metadata.language, "fr");
        assert_eq!(metadata.identifier, "isbn:123");
        assert_eq!(metadata.subject, "History, Science");
        assert_eq!(metadata.rights, "2024");
    }

    #[test]
    fn test_metadata_defaults_and_generated_identifier() {
        let metadata = metadata_from_value(
            &yaml("book:\n  title: Only Title\n  subject: Poetry\n"),
            &MemoryReporter::new(),
        );

        assert_eq!(metadata.title, "Only Title");
        assert_eq!(metadata.creator, BookMetadata::DEFAULT_CREATOR);
        assert_eq!(metadata.language, BookMetadata::DEFAULT_LANGUAGE);
        assert_eq!(metadata.subject, "Poetry");
        assert_eq!(metadata.rights, "");

        let uuid = metadata.identifier.strip_prefix("urn:uuid:").unwrap();
        assert!(Uuid::parse_str(uuid).is_ok());
    }

    #[test]
    fn test_metadata_identifier_scalar_and_empty() {
        let reporter = MemoryReporter::new();

        let scalar = metadata_from_value(&yaml("book:\n  identifier: 9781234\n"), &reporter);
        assert_eq!(scalar.identifier, "9781234");

        let empty = metadata_from_value(&yaml("book:\n  identifier:\n    text: ''\n"), &reporter);
        assert!(empty.identifier.starts_with("urn:uuid:"));
    }

    #[test]
    fn test_metadata_without_book_mapping() {
        let reporter = MemoryReporter::new();
        let metadata = metadata_from_value(&yaml("- just\n- a list\n"), &reporter);

        assert_eq!(metadata.title, BookMetadata::DEFAULT_TITLE);
        assert!(reporter.contains("No `book` mapping"));
    }

    #[test]
    fn test_load_metadata_missing_and_malformed() {
        let reporter = MemoryReporter::new();
        let missing = env::temp_dir().join(format!("{}-none.yaml", local_time()));
        assert_eq!(
            load_metadata(&missing, &reporter).unwrap().title,
            BookMetadata::DEFAULT_TITLE
        );

        let broken = env::temp_dir().join(format!("{}-bad-metadata.yaml", local_time()));
        fs::write(&broken, "book: {title: [").unwrap();
        assert!(matches!(
            load_metadata(&broken, &reporter),
            Err(PrepError::MalformedMetadata { .. })
        ));
        fs::remove_file(broken).unwrap();
    }

    #[test]
    fn test_sanitize_id() {
        assert_eq!(sanitize_id("cover-art", "image"), "cover_art");
        assert_eq!(sanitize_id("1-map", "image"), "image_1_map");
        assert_eq!(sanitize_id("", "font"), "font_");
    }

    #[test]
    fn test_href_from() {
        assert_eq!(href_from("", "text/a.xhtml"), "text/a.xhtml");
        assert_eq!(href_from("OEBPS", "OEBPS/text/a.xhtml"), "text/a.xhtml");
        assert_eq!(href_from("OEBPS", "styles/a.css"), "../styles/a.css");
        assert_eq!(href_from("a/b", "a/c/d.png"), "../c/d.png");
    }

    #[test]
    fn test_collect_xhtml_files_sorted() {
        let root = make_project("collect");

        assert_eq!(
            collect_xhtml_files(&root).unwrap(),
            vec!["3-TableOfContents.xhtml", "text/a.xhtml", "text/b.xhtml"]
        );

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_from_project_manifest_and_spine() {
        let root = make_project("descriptor");
        let reporter = MemoryReporter::new();

        let descriptor = PackageDescriptor::from_project(
            &root,
            BookMetadata::default(),
            "3-TableOfContents.xhtml",
            "content.opf",
            &reporter,
        )
        .unwrap();

        let ids: Vec<&str> = descriptor.manifest.keys().map(String::as_str).collect();
        assert_eq!(
            ids,
            vec!["nav", "item1", "item2", "style", "image_1_map", "cover", "cover_2", "serif"]
        );

        let unique: HashSet<&str> = descriptor.manifest.values().map(|i| i.id.as_str()).collect();
        assert_eq!(unique.len(), descriptor.manifest.len());

        let spine: Vec<&str> = descriptor.spine.iter().map(|s| s.idref.as_str()).collect();
        assert_eq!(spine, vec!["nav", "item1", "item2"]);
        assert!(spine.iter().all(|id| descriptor.manifest.contains_key(*id)));

        assert!(descriptor.manifest["nav"].has_property("nav"));
        assert_eq!(descriptor.manifest["item1"].href, "text/a.xhtml");
        assert_eq!(descriptor.manifest["cover_2"].href, "images/maps/cover.png");
        assert_eq!(descriptor.manifest["serif"].mime, "font/woff2");
        assert_eq!(descriptor.manifest["image_1_map"].mime, "image/gif");

        // 1-map.gif holds PNG bytes
        assert!(reporter.contains("Image images/1-map.gif is declared as image/gif"));

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_from_project_without_asset_dirs_or_nav() {
        let root = env::temp_dir().join(format!("{}-bare-project", local_time()));
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("chapter.xhtml"), "<html/>").unwrap();
        let reporter = MemoryReporter::new();

        let descriptor = PackageDescriptor::from_project(
            &root,
            BookMetadata::default(),
            "toc.xhtml",
            "OEBPS/content.opf",
            &reporter,
        )
        .unwrap();

        let ids: Vec<&str> = descriptor.manifest.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["item1", "nav"]);
        assert_eq!(descriptor.manifest["item1"].href, "../chapter.xhtml");
        assert_eq!(descriptor.manifest["nav"].href, "../toc.xhtml");
        assert!(reporter.contains("Navigation document toc.xhtml not found"));

        fs::remove_dir_all(root).unwrap();
    }

    #[test]
    fn test_to_xml() {
        let mut metadata = BookMetadata::default();
        metadata.title = "Cats & Dogs".to_string();
        metadata.identifier = "urn:uuid:0000".to_string();
        metadata.rights = "CC-BY".to_string();

        let mut descriptor = PackageDescriptor::new(metadata);
        descriptor.modified = "2024-01-01T00:00:00Z".to_string();
        descriptor.insert(ManifestItem::new("item1", "a.xhtml", "application/xhtml+xml"));
        descriptor.spine.push(SpineItem::new("item1"));

        let xml = descriptor.to_xml().unwrap();
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
        assert!(xml.contains(
            r#"<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="book-id" version="3.0">"#
        ));
        assert!(xml.contains("<dc:title>Cats &amp; Dogs</dc:title>"));
        assert!(xml.contains(r#"<dc:identifier id="book-id">urn:uuid:0000</dc:identifier>"#));
        assert!(xml.contains("<dc:rights>CC-BY</dc:rights>"));
        assert!(!xml.contains("dc:subject"));
        assert!(xml.contains(
            r#"<meta property="dcterms:modified">2024-01-01T00:00:00Z</meta>"#
        ));
        assert!(xml.contains(
            r#"<item id="item1" href="a.xhtml" media-type="application/xhtml+xml"/>"#
        ));
        assert!(xml.contains(r#"<itemref idref="item1"/>"#));
    }
}
