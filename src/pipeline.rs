//! The end-to-end preparation run
//!
//! [run] executes the stages in order: rename, rewrite references, repair
//! every content document, build the package descriptor, assemble the
//! archive, validate. The Filename Mapping and the resolved paths are
//! handed from stage to stage explicitly.
//!
//! ## Failure policy
//!
//! - a missing project directory, malformed metadata or an illegal package
//!   path end the run with an error;
//! - a content document that cannot be read or parsed is reported, left
//!   untouched, and the run moves on to the next one;
//! - missing optional inputs (metadata, TOC, validator) are reported and
//!   skipped;
//! - validator failures are reported but do not fail the run.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    archive::{ensure_bootstrap_files, write_archive},
    document::Document,
    error::{PackagingError, PrepError},
    filename::rename_files,
    fixer::{fix_document, fix_named_entities},
    package::{PackageDescriptor, collect_xhtml_files, load_metadata},
    quiz::{is_quiz_key, pad_quiz_options, restructure_quiz_key},
    references::{update_toc, update_yaml_references},
    report::Reporter,
    types::FilenameMapping,
    utils::{DecodeBytes, is_contained_relative_path},
    validator::{ValidationOutcome, ValidatorCommand},
};

/// Settings of a preparation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepConfig {
    /// Root directory of the project
    pub project_dir: PathBuf,

    /// Metadata document, relative to the project root
    pub metadata_path: String,

    /// Table of contents, relative to the project root
    pub toc_path: String,

    /// Package document to generate, relative to the project root
    pub package_path: String,

    /// Output archive; a relative path is resolved against the parent of
    /// the project root
    pub output: PathBuf,

    /// Validator to run on the archive, `None` to skip validation
    pub validator: Option<PathBuf>,

    /// Upper bound on the validator's run time
    pub validator_timeout: Option<Duration>,
}

impl Default for PrepConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            metadata_path: "book-map.yaml".to_string(),
            toc_path: "3-TableOfContents.xhtml".to_string(),
            package_path: "content.opf".to_string(),
            output: PathBuf::from("output.epub"),
            validator: Some(PathBuf::from("epubcheck.jar")),
            validator_timeout: None,
        }
    }
}

impl PrepConfig {
    pub fn new<P: AsRef<Path>>(project_dir: P) -> Self {
        Self {
            project_dir: project_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Resolves the output archive path for the canonical project `root`
    pub fn output_path(&self, root: &Path) -> PathBuf {
        if self.output.is_absolute() {
            return self.output.clone();
        }

        root.parent().unwrap_or(root).join(&self.output)
    }
}

/// What a run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrepReport {
    /// Files renamed by the normalizer
    pub mapping: FilenameMapping,

    /// Content documents repaired and rewritten
    pub processed: Vec<String>,

    /// Content documents that could not be processed, with the reason
    pub failures: Vec<(String, String)>,

    /// Table of contents path after renaming, relative to the project root
    pub toc_path: String,

    pub package_path: PathBuf,
    pub archive_path: PathBuf,

    /// `None` when validation was disabled
    pub validation: Option<ValidationOutcome>,
}

/// Repairs one content document in place
///
/// `label` names the file in reported changes. The document is only written
/// once every repair has succeeded.
///
/// ## Return
/// - `Ok(usize)`: the number of tree changes made
/// - `Err(PrepError)`: the file could not be read, parsed or written
pub fn process_content_file(
    path: &Path,
    label: &str,
    reporter: &dyn Reporter,
) -> Result<usize, PrepError> {
    reporter.info(&format!("Processing {}…", label));

    let original = fs::read(path)?.decode()?;
    let corrected = fix_named_entities(&original, reporter);
    let mut document = Document::parse(&corrected)?;

    let mut changes = fix_document(&mut document, label, reporter);
    changes += pad_quiz_options(&mut document, label, reporter);
    if is_quiz_key(path) {
        changes += restructure_quiz_key(&mut document, label, reporter);
    }

    fs::write(path, document.to_xhtml()?)?;

    Ok(changes)
}

/// Runs every stage against the project in `config`
pub fn run(config: &PrepConfig, reporter: &dyn Reporter) -> Result<PrepReport, PrepError> {
    let root = match fs::canonicalize(&config.project_dir) {
        Ok(root) if root.is_dir() => root,
        _ => {
            return Err(PackagingError::ProjectNotFound {
                project_dir: config.project_dir.to_string_lossy().to_string(),
            }
            .into());
        }
    };

    if !is_contained_relative_path(&config.package_path) {
        return Err(PackagingError::IllegalPackagePath {
            path: config.package_path.clone(),
        }
        .into());
    }

    let mut report = PrepReport::default();

    report.mapping = rename_files(&root, reporter)?;

    let yaml_path = root.join(&config.metadata_path);
    update_yaml_references(&yaml_path, &report.mapping, reporter)?;

    report.toc_path = config.toc_path.clone();
    if let Some(renamed) = report.mapping.get(&config.toc_path) {
        reporter.warn(&format!(
            "TOC file {} was renamed to {}; using the new name.",
            config.toc_path, renamed
        ));
        report.toc_path = renamed.to_string();
    }

    if let Err(err) = update_toc(&root.join(&report.toc_path), &report.mapping, reporter) {
        reporter.error(&format!("Failed to update TOC {}: {}", report.toc_path, err));
        report
            .failures
            .push((report.toc_path.clone(), err.to_string()));
    }

    for file in collect_xhtml_files(&root)? {
        match process_content_file(&root.join(&file), &file, reporter) {
            Ok(_) => report.processed.push(file),
            Err(err) => {
                reporter.error(&format!("Failed to process {}: {}", file, err));
                report.failures.push((file, err.to_string()));
            }
        }
    }

    let metadata = load_metadata(&yaml_path, reporter)?;
    let descriptor = PackageDescriptor::from_project(
        &root,
        metadata,
        &report.toc_path,
        &config.package_path,
        reporter,
    )?;
    report.package_path = root.join(&config.package_path);
    descriptor.write(&report.package_path, reporter)?;

    ensure_bootstrap_files(&root, &config.package_path, reporter)?;
    report.archive_path = config.output_path(&root);
    write_archive(&root, &report.archive_path, reporter)?;

    report.validation = match &config.validator {
        Some(validator) => {
            let command = ValidatorCommand::from_path(validator);
            match command.run(&report.archive_path, config.validator_timeout, reporter) {
                Ok(outcome) => Some(outcome),
                Err(err) => {
                    reporter.error(&format!("Validator could not be run: {}", err));
                    Some(ValidationOutcome::Skipped {
                        reason: err.to_string(),
                    })
                }
            }
        }
        None => {
            reporter.info("Validation disabled; skipping.");
            None
        }
    };

    Ok(report)
}
