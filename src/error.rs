//! Error Type Definition Module
//!
//! This module defines the error types that may be encountered while
//! normalizing and packaging an EPUB project. All errors are uniformly wrapped
//! in the `PrepError` enumeration for convenient error handling by the caller.
//!
//! ## Main Error Types
//!
//! - [PrepError] - Enumeration of main errors during project preparation
//! - [PackagingError] - Preconditions of the project layout and the packaging step
//!
//! Not every problem is an error: missing optional inputs (metadata document,
//! table of contents, validator) are reported through a
//! [Reporter](crate::report::Reporter) and the run continues.

use thiserror::Error;

/// Types of errors that can occur while preparing an EPUB project
#[derive(Debug, Error)]
pub enum PrepError {
    /// ZIP archive related errors
    ///
    /// Errors occur while writing the output archive.
    #[error("Archive error: {source}")]
    ArchiveError { source: zip::result::ZipError },

    /// Data Decoding Error - Null data
    ///
    /// This error occurs when trying to decode an empty stream.
    #[error("Decode error: The data is empty.")]
    EmptyDataError,

    #[error("IO error: {source}")]
    IOError { source: std::io::Error },

    /// Malformed markup error
    ///
    /// The content document reads as markup that cannot be repaired without
    /// guessing, such as a tag whose name or attribute holds `<` or `/`.
    #[error("Malformed markup: {detail}")]
    MalformedMarkup { detail: String },

    /// Malformed metadata document error
    ///
    /// The structured metadata document could not be parsed. This is fatal:
    /// no partial metadata is recovered.
    #[error("Malformed metadata document \"{path}\": {source}")]
    MalformedMetadata {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("Packaging error: {source}")]
    PackagingError { source: PackagingError },

    /// Path outside project error
    ///
    /// This error occurs when a file found while walking the project cannot be
    /// expressed relative to the project root.
    #[error("Path \"{path}\" is outside the project directory.")]
    PathOutsideProject { path: String },

    /// QuickXml error
    ///
    /// This error occurs when the markup reader meets input it cannot recover
    /// from, or when writing markup fails.
    #[error("QuickXml error: {source}")]
    QuickXmlError { source: quick_xml::Error },

    /// UTF-8 decoding error
    #[error("Decode error: {source}")]
    Utf8DecodeError { source: std::string::FromUtf8Error },

    /// UTF-16 decoding error
    #[error("Decode error: {source}")]
    Utf16DecodeError { source: std::string::FromUtf16Error },

    /// WalkDir error
    ///
    /// This error occurs when using the WalkDir library to traverse the project.
    #[error("WalkDir error: {source}")]
    WalkDirError { source: walkdir::Error },

    /// YAML serialization error
    ///
    /// This error occurs when the rewritten metadata document cannot be dumped.
    #[error("YAML error: {source}")]
    YamlError { source: serde_yaml::Error },
}

impl From<zip::result::ZipError> for PrepError {
    fn from(value: zip::result::ZipError) -> Self {
        PrepError::ArchiveError { source: value }
    }
}

impl From<quick_xml::Error> for PrepError {
    fn from(value: quick_xml::Error) -> Self {
        PrepError::QuickXmlError { source: value }
    }
}

impl From<std::io::Error> for PrepError {
    fn from(value: std::io::Error) -> Self {
        PrepError::IOError { source: value }
    }
}

impl From<std::string::FromUtf8Error> for PrepError {
    fn from(value: std::string::FromUtf8Error) -> Self {
        PrepError::Utf8DecodeError { source: value }
    }
}

impl From<std::string::FromUtf16Error> for PrepError {
    fn from(value: std::string::FromUtf16Error) -> Self {
        PrepError::Utf16DecodeError { source: value }
    }
}

impl From<walkdir::Error> for PrepError {
    fn from(value: walkdir::Error) -> Self {
        PrepError::WalkDirError { source: value }
    }
}

impl From<serde_yaml::Error> for PrepError {
    fn from(value: serde_yaml::Error) -> Self {
        PrepError::YamlError { source: value }
    }
}

impl From<PackagingError> for PrepError {
    fn from(value: PackagingError) -> Self {
        PrepError::PackagingError { source: value }
    }
}

#[cfg(test)]
impl PartialEq for PrepError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::MalformedMetadata { path: l_path, .. },
                Self::MalformedMetadata { path: r_path, .. },
            ) => l_path == r_path,
            (
                Self::PackagingError { source: l_source },
                Self::PackagingError { source: r_source },
            ) => l_source == r_source,
            (
                Self::PathOutsideProject { path: l_path },
                Self::PathOutsideProject { path: r_path },
            ) => l_path == r_path,
            (
                Self::Utf8DecodeError { source: l_source },
                Self::Utf8DecodeError { source: r_source },
            ) => l_source == r_source,

            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

/// Types of errors that can occur while packaging a project
///
/// These errors describe a project layout or configuration the packager
/// refuses to work with. They are always fatal for the run.
#[derive(Debug, Error)]
#[cfg_attr(test, derive(PartialEq))]
pub enum PackagingError {
    /// Illegal package descriptor path error
    ///
    /// The package descriptor path is written into `META-INF/container.xml`,
    /// so it must be a relative path that stays inside the project.
    #[error("The package document path '{path}' must be relative and must not start with '../'.")]
    IllegalPackagePath { path: String },

    /// Output collides with a project file
    ///
    /// The output archive may not replace one of the files it packages.
    #[error("The output archive '{output}' would overwrite a project file.")]
    OutputCollidesWithProject { output: String },

    /// Project directory not found error
    #[error("Project directory '{project_dir}' does not exist or is not a directory.")]
    ProjectNotFound { project_dir: String },
}

#[cfg(test)]
mod tests {
    use crate::error::{PackagingError, PrepError};

    #[test]
    fn test_packaging_error_display() {
        let err: PrepError = PackagingError::IllegalPackagePath {
            path: "../content.opf".to_string(),
        }
        .into();

        assert_eq!(
            err.to_string(),
            "Packaging error: The package document path '../content.opf' must be relative and must not start with '../'."
        );
    }

    #[test]
    fn test_prep_error_eq_by_payload() {
        let left = PrepError::PathOutsideProject {
            path: "a".to_string(),
        };
        let right = PrepError::PathOutsideProject {
            path: "b".to_string(),
        };

        assert_ne!(left, right);
        assert_eq!(PrepError::EmptyDataError, PrepError::EmptyDataError);
    }
}
