//! Filename normalization
//!
//! [normalize_filename] is a pure string transform used both to rename files
//! on disk and to rewrite image references inside content documents.
//! [rename_files] applies it to the project and records what moved in a
//! [FilenameMapping].

use std::{fs, path::Path};

use walkdir::WalkDir;

use crate::{
    error::PrepError,
    report::Reporter,
    types::FilenameMapping,
    utils::{IMAGE_MEDIA_TYPES, is_xhtml, lowercase_extension, media_type_for, relative_path},
};

/// Returns the normalized form of a filename or path string
///
/// Rules, in order:
/// 1. lower-case the stem and the extension;
/// 2. replace spaces with hyphens;
/// 3. strip a trailing `final` token preceded by `-` or `_`;
/// 4. collapse runs of hyphens;
/// 5. strip trailing hyphens.
///
/// The rules are applied until nothing changes, which keeps the function
/// idempotent for names such as `notes-final-final`, `notes-final-` or
/// `-final.xhtml`. The extension is only ever lower-cased.
pub fn normalize_filename(name: &str) -> String {
    let mut normalized = normalize_once(name);
    loop {
        // After the first pass only removals remain, so this terminates.
        let next = normalize_once(&normalized);
        if next == normalized {
            return normalized;
        }
        normalized = next;
    }
}

fn normalize_once(name: &str) -> String {
    let (stem, extension) = split_extension(name);

    let stem = stem.to_lowercase().replace(' ', "-");
    let stem = trim_hyphens(&collapse_hyphens(strip_final_suffix(&stem)));

    format!("{}{}", stem, extension.to_lowercase())
}

/// Splits `name` into stem and extension (with its dot)
///
/// Only the last `/`-separated component is considered, and a leading dot
/// does not start an extension: `.hidden` has none.
fn split_extension(name: &str) -> (&str, &str) {
    let component_start = name.rfind('/').map_or(0, |index| index + 1);
    let component = &name[component_start..];

    let leading_dots = component.len() - component.trim_start_matches('.').len();
    match component[leading_dots..].rfind('.') {
        Some(index) => name.split_at(component_start + leading_dots + index),
        None => (name, ""),
    }
}

fn strip_final_suffix(stem: &str) -> &str {
    match stem.strip_suffix("final") {
        Some(rest) if rest.ends_with('-') || rest.ends_with('_') => &rest[..rest.len() - 1],
        _ => stem,
    }
}

fn collapse_hyphens(stem: &str) -> String {
    let mut collapsed = String::with_capacity(stem.len());
    for ch in stem.chars() {
        if ch == '-' && collapsed.ends_with('-') {
            continue;
        }
        collapsed.push(ch);
    }
    collapsed
}

fn trim_hyphens(stem: &str) -> String {
    stem.trim_end_matches('-').to_string()
}

/// Whether the rename pass is responsible for this file
fn is_renamable(path: &Path) -> bool {
    is_xhtml(path) || media_type_for(&IMAGE_MEDIA_TYPES, &lowercase_extension(path)).is_some()
}

/// Normalizes the names of every XHTML and image file under `root`
///
/// Only the final path component is renamed; directories keep their names.
/// A rename whose target already exists is skipped with a warning rather
/// than overwriting another file.
///
/// ## Return
/// - `Ok(FilenameMapping)`: old relative path to new relative path, for every
///   file that was actually renamed
/// - `Err(PrepError)`: the project could not be walked or a rename failed
pub fn rename_files(root: &Path, reporter: &dyn Reporter) -> Result<FilenameMapping, PrepError> {
    reporter.info("Normalizing XHTML and image filenames…");

    let mut candidates = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() && is_renamable(entry.path()) {
            candidates.push(entry.into_path());
        }
    }

    let mut mapping = FilenameMapping::new();
    for path in candidates {
        let Some(file_name) = path.file_name().map(|name| name.to_string_lossy().to_string())
        else {
            continue;
        };

        let new_name = normalize_filename(&file_name);
        if new_name == file_name {
            continue;
        }

        let new_path = path.with_file_name(&new_name);
        let old_relative = relative_path(root, &path)?;
        let new_relative = relative_path(root, &new_path)?;

        if new_path.exists() && !is_same_file(&path, &new_path) {
            reporter.warn(&format!(
                "Not renaming {} → {}: target already exists",
                old_relative, new_relative
            ));
            continue;
        }

        reporter.info(&format!("Renaming {} → {}", old_relative, new_relative));
        fs::rename(&path, &new_path)?;
        mapping.insert(&old_relative, &new_relative);
    }

    Ok(mapping)
}

/// Whether `a` and `b` resolve to the same file, as they do for a change of
/// case on a case-insensitive filesystem
fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
