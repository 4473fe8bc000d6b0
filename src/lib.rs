//! EPUB project preparation
//!
//! A Rust library for turning a directory of loosely authored XHTML, CSS,
//! image and font files plus a YAML book map into a valid EPUB 3 archive.
//!
//! The work happens in stages, each of which can also be used on its own:
//!
//! - [filename]: normalize file names and record what was renamed;
//! - [references]: follow renames in the book map and the table of contents;
//! - [fixer] and [quiz]: repair content documents in place;
//! - [package]: synthesize the package document from the files on disk;
//! - [archive]: write the container with `mimetype` first and uncompressed;
//! - [validator]: run an external checker such as EPUBCheck.
//!
//! [pipeline::run] chains all of them. Every change is announced through a
//! [report::Reporter], so callers decide where the audit trail goes.
//!
//! ## Quick Start
//!
//! ```rust, ignore
//! # use epub_prep::{pipeline::{run, PrepConfig}, report::LogReporter};
//! # fn main() -> Result<(), epub_prep::error::PrepError> {
//! let config = PrepConfig::new("book/OEBPS");
//! let report = run(&config, &LogReporter)?;
//!
//! println!("Wrote {}", report.archive_path.display());
//! for (file, reason) in &report.failures {
//!     println!("Skipped {}: {}", file, reason);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! - `cli` (default): builds the `epub-prep` binary and pulls in `clap` and
//!   `tracing-subscriber`. Library users can turn it off.

pub(crate) mod utils;

pub mod archive;
pub mod document;
pub mod error;
pub mod filename;
pub mod fixer;
pub mod package;
pub mod pipeline;
pub mod quiz;
pub mod references;
pub mod report;
pub mod types;
pub mod validator;

pub use utils::{DecodeBytes, NormalizeWhitespace};
