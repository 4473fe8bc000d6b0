//! EPUB container assembly
//!
//! The container format has two hard rules: the first entry is `mimetype`,
//! stored without compression, holding exactly `application/epub+zip`; and
//! `META-INF/container.xml` points at the package document. Every other
//! project file follows, deflated.

use std::{
    fs::{self, File},
    io::{Cursor, Write},
    path::{Path, PathBuf},
};

use quick_xml::{
    Writer,
    events::{BytesDecl, BytesEnd, BytesStart, Event},
};
use walkdir::WalkDir;
use zip::{CompressionMethod, ZipWriter, write::FileOptions};

use crate::{
    error::{PackagingError, PrepError},
    report::Reporter,
    utils::{EPUB_MIMETYPE, is_contained_relative_path, lowercase_extension, relative_path},
};

/// Archive path of the mimetype marker
pub const MIMETYPE_PATH: &str = "mimetype";

/// Archive path of the container pointer document
pub const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Renders `META-INF/container.xml` pointing at `package_path`
pub fn make_container_xml(package_path: &str) -> Result<String, PrepError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    writer.write_event(Event::Start(BytesStart::new("container").with_attributes([
        ("version", "1.0"),
        ("xmlns", "urn:oasis:names:tc:opendocument:xmlns:container"),
    ])))?;
    writer.write_event(Event::Start(BytesStart::new("rootfiles")))?;

    writer.write_event(Event::Empty(BytesStart::new("rootfile").with_attributes([
        ("full-path", package_path),
        ("media-type", "application/oebps-package+xml"),
    ])))?;

    writer.write_event(Event::End(BytesEnd::new("rootfiles")))?;
    writer.write_event(Event::End(BytesEnd::new("container")))?;

    Ok(String::from_utf8(writer.into_inner().into_inner())?)
}

/// Creates the `mimetype` marker and the container pointer under `root`
///
/// An existing `mimetype` with the wrong payload is rewritten. The
/// container document is regenerated every time.
///
/// ## Return
/// - `Ok(())`: both files are in place
/// - `Err(PrepError)`: `package_path` escapes the project, or a write failed
pub fn ensure_bootstrap_files(
    root: &Path,
    package_path: &str,
    reporter: &dyn Reporter,
) -> Result<(), PrepError> {
    if !is_contained_relative_path(package_path) {
        return Err(PackagingError::IllegalPackagePath {
            path: package_path.to_string(),
        }
        .into());
    }

    let mimetype = root.join(MIMETYPE_PATH);
    if !mimetype.is_file() {
        fs::write(&mimetype, EPUB_MIMETYPE)?;
        reporter.info(&format!("Created {}", MIMETYPE_PATH));
    } else if fs::read(&mimetype)? != EPUB_MIMETYPE.as_bytes() {
        fs::write(&mimetype, EPUB_MIMETYPE)?;
        reporter.warn(&format!(
            "Rewrote {} with the payload {}",
            MIMETYPE_PATH, EPUB_MIMETYPE
        ));
    }

    let container = root.join(CONTAINER_PATH);
    if let Some(parent) = container.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(&container, make_container_xml(package_path)?)?;
    reporter.info(&format!("Wrote {} → {}", CONTAINER_PATH, package_path));

    Ok(())
}

/// One file to be added to the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// `/`-separated path inside the archive
    pub name: String,

    /// File on disk holding the entry's bytes
    pub source: PathBuf,

    pub compression: CompressionMethod,
}

/// The ordered list of entries making up an archive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchivePlan {
    pub entries: Vec<ArchiveEntry>,
}

impl ArchivePlan {
    /// Plans an archive of every file under `root`
    ///
    /// `mimetype` comes first and is stored; everything else is deflated, in
    /// walk order. Directories get no entries of their own, and `exclude`
    /// (typically a previous output archive) is left out.
    pub fn from_project(root: &Path, exclude: Option<&Path>) -> Result<Self, PrepError> {
        let exclude = exclude.and_then(|path| fs::canonicalize(path).ok());

        let mut plan = ArchivePlan::default();
        plan.entries.push(ArchiveEntry {
            name: MIMETYPE_PATH.to_string(),
            source: root.join(MIMETYPE_PATH),
            compression: CompressionMethod::Stored,
        });

        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let name = relative_path(root, entry.path())?;
            if name == MIMETYPE_PATH {
                continue;
            }
            if exclude.is_some() && fs::canonicalize(entry.path()).ok() == exclude {
                continue;
            }

            plan.entries.push(ArchiveEntry {
                name,
                source: entry.into_path(),
                compression: CompressionMethod::Deflated,
            });
        }

        Ok(plan)
    }

    /// Writes the planned entries to `output`, replacing any existing file
    pub fn write(&self, output: &Path) -> Result<(), PrepError> {
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = File::create(output)?;
        let mut zip = ZipWriter::new(file);

        for entry in &self.entries {
            let options = FileOptions::<()>::default().compression_method(entry.compression);
            zip.start_file(entry.name.as_str(), options)?;
            zip.write_all(&fs::read(&entry.source)?)?;
        }

        zip.finish()?;
        Ok(())
    }
}

/// Refuses an output path that would clobber part of the project
fn check_output(root: &Path, output: &Path) -> Result<(), PrepError> {
    let collides = || {
        PrepError::from(PackagingError::OutputCollidesWithProject {
            output: output.to_string_lossy().to_string(),
        })
    };

    if output.is_dir() {
        return Err(collides());
    }

    if output.is_file() && lowercase_extension(output) != "epub" {
        let inside = match (fs::canonicalize(root), fs::canonicalize(output)) {
            (Ok(root), Ok(output)) => output.starts_with(root),
            _ => false,
        };
        if inside {
            return Err(collides());
        }
    }

    Ok(())
}

/// Bundles the project under `root` into the archive at `output`
///
/// The bootstrap files must already exist, see [ensure_bootstrap_files].
pub fn write_archive(root: &Path, output: &Path, reporter: &dyn Reporter) -> Result<(), PrepError> {
    check_output(root, output)?;

    let plan = ArchivePlan::from_project(root, Some(output))?;
    plan.write(output)?;

    reporter.info(&format!(
        "Created EPUB archive at {} ({} entries).",
        output.display(),
        plan.entries.len()
    ));

    Ok(())
}
