//! epub-prep - Normalize and package an EPUB project

use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use epub_prep::{
    pipeline::{self, PrepConfig},
    report::LogReporter,
    validator::ValidationOutcome,
};

#[derive(Parser)]
#[command(name = "epub-prep")]
#[command(version, about = "Clean and package an EPUB project", long_about = None)]
#[command(after_help = "EXAMPLES:
    epub-prep --project-dir book/OEBPS                      Write book/output.epub
    epub-prep --project-dir OEBPS --output novel.epub --skip-validation")]
struct Cli {
    /// Root directory of the EPUB project (e.g., OEBPS)
    #[arg(long, value_name = "DIR")]
    project_dir: PathBuf,

    /// Path to the book map, relative to the project root
    #[arg(long, default_value = "book-map.yaml")]
    yaml: String,

    /// Path to the TOC document, relative to the project root
    #[arg(long, default_value = "3-TableOfContents.xhtml")]
    toc: String,

    /// Output EPUB file name (relative names land next to the project)
    #[arg(long, default_value = "output.epub")]
    output: PathBuf,

    /// Path to the EPUBCheck JAR or executable
    #[arg(long, default_value = "epubcheck.jar")]
    epubcheck: PathBuf,

    /// Stop the validator after this many seconds
    #[arg(long, value_name = "SECS")]
    epubcheck_timeout: Option<u64>,

    /// Do not run the validator
    #[arg(long)]
    skip_validation: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "epub_prep=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config = PrepConfig {
        project_dir: cli.project_dir,
        metadata_path: cli.yaml,
        toc_path: cli.toc,
        output: cli.output,
        validator: (!cli.skip_validation).then_some(cli.epubcheck),
        validator_timeout: cli.epubcheck_timeout.map(Duration::from_secs),
        ..PrepConfig::default()
    };

    match pipeline::run(&config, &LogReporter) {
        Ok(report) => {
            println!("Archive: {}", report.archive_path.display());
            println!(
                "Renamed {} file(s), processed {} document(s), {} failure(s)",
                report.mapping.len(),
                report.processed.len(),
                report.failures.len()
            );
            for (file, reason) in &report.failures {
                println!("  failed: {file}: {reason}");
            }
            match &report.validation {
                Some(ValidationOutcome::Passed { .. }) => println!("Validation: passed"),
                Some(ValidationOutcome::ErrorsFound { .. }) => println!("Validation: errors found"),
                Some(ValidationOutcome::TimedOut { .. }) => println!("Validation: timed out"),
                Some(ValidationOutcome::Skipped { reason }) => {
                    println!("Validation: skipped ({reason})")
                }
                None => println!("Validation: disabled"),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
