//! External validation of the produced archive
//!
//! The validator is a third-party program (EPUBCheck by default) run as a
//! subprocess with the archive path as its last argument. Its output is
//! surfaced verbatim; a non-zero exit means "errors found" and never undoes
//! the archive. A validator that cannot be found is skipped.

use std::{
    ffi::{OsStr, OsString},
    io::{ErrorKind, Read},
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{error::PrepError, report::Reporter, utils::lowercase_extension};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Result of a validation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// The validator could not be run
    Skipped { reason: String },

    /// The validator exited successfully
    Passed { output: String },

    /// The validator exited with a failure status
    ///
    /// `status` is `None` when the process was ended by a signal.
    ErrorsFound { output: String, status: Option<i32> },

    /// The validator was killed after exceeding the configured timeout
    TimedOut { output: String },
}

impl ValidationOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, ValidationOutcome::Passed { .. })
    }

    /// Captured validator output, if the validator ran
    pub fn output(&self) -> Option<&str> {
        match self {
            ValidationOutcome::Skipped { .. } => None,
            ValidationOutcome::Passed { output }
            | ValidationOutcome::ErrorsFound { output, .. }
            | ValidationOutcome::TimedOut { output } => Some(output),
        }
    }
}

/// How to invoke the validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorCommand {
    pub program: OsString,
    pub args: Vec<OsString>,

    /// File that must exist for the validator to be usable
    pub required: Option<PathBuf>,
}

impl ValidatorCommand {
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            required: None,
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Builds the command for a configured validator path
    ///
    /// A `.jar` is run with `java -jar`; anything else is executed directly.
    /// Paths with a directory component must exist; bare names are looked up
    /// on `PATH` when the command runs.
    pub fn from_path(path: &Path) -> Self {
        if lowercase_extension(path) == "jar" {
            let mut command = Self::new("java").arg("-jar").arg(path);
            command.required = Some(path.to_path_buf());
            return command;
        }

        let mut command = Self::new(path);
        if path.components().count() > 1 {
            command.required = Some(path.to_path_buf());
        }
        command
    }

    /// Runs the validator against `epub` and reports what it said
    ///
    /// With a `timeout`, the process is killed once the deadline passes.
    ///
    /// ## Return
    /// - `Ok(ValidationOutcome)`: the validator ran, timed out or was skipped
    /// - `Err(PrepError)`: waiting on the process failed
    pub fn run(
        &self,
        epub: &Path,
        timeout: Option<Duration>,
        reporter: &dyn Reporter,
    ) -> Result<ValidationOutcome, PrepError> {
        if let Some(required) = &self.required {
            if !required.is_file() {
                let reason = format!("{} not found", required.display());
                reporter.warn(&format!("Validator {}; skipping validation.", reason));
                return Ok(ValidationOutcome::Skipped { reason });
            }
        }

        let spawned = Command::new(&self.program)
            .args(&self.args)
            .arg(epub)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let reason = format!("{} is not available", self.program.to_string_lossy());
                reporter.warn(&format!("Validator {}; skipping validation.", reason));
                return Ok(ValidationOutcome::Skipped { reason });
            }
            Err(err) => return Err(err.into()),
        };

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match timeout {
            Some(timeout) => wait_with_deadline(&mut child, Instant::now() + timeout)?,
            None => Some(child.wait()?),
        };

        let mut output = collect(stdout);
        let errors = collect(stderr);
        if !errors.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&errors);
        }

        reporter.info(&format!("Validator output:\n{}", output));

        let outcome = match status {
            None => {
                reporter.error(&format!(
                    "Validator did not finish within {:?} and was stopped.",
                    timeout.unwrap_or_default()
                ));
                ValidationOutcome::TimedOut { output }
            }
            Some(status) if status.success() => {
                reporter.info("Validator completed with no critical errors.");
                ValidationOutcome::Passed { output }
            }
            Some(status) => {
                reporter.error("Validator found errors.");
                ValidationOutcome::ErrorsFound {
                    output,
                    status: status.code(),
                }
            }
        };

        Ok(outcome)
    }
}

/// Reads a child pipe to the end on a helper thread
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            // A read error just truncates the captured output
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).to_string())
        .unwrap_or_default()
}

/// Polls `child` until it exits or `deadline` passes
///
/// Returns `None` when the child had to be killed.
fn wait_with_deadline(
    child: &mut Child,
    deadline: Instant,
) -> Result<Option<std::process::ExitStatus>, PrepError> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }

        if Instant::now() >= deadline {
            // The child may exit between the poll and the kill
            let _ = child.kill();
            child.wait()?;
            return Ok(None);
        }

        thread::sleep(POLL_INTERVAL);
    }
}
