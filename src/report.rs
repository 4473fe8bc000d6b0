//! Change reporting
//!
//! Every component receives a [Reporter] instead of writing to a global
//! logger directly, so the caller decides where the audit trail goes.
//! [LogReporter] forwards to the `log` facade; [MemoryReporter] keeps the
//! records in memory, which is what the tests use.

use std::cell::RefCell;

use log::Level;

pub trait Reporter {
    fn report(&self, level: Level, message: &str);

    fn error(&self, message: &str) {
        self.report(Level::Error, message);
    }

    fn warn(&self, message: &str) {
        self.report(Level::Warn, message);
    }

    fn info(&self, message: &str) {
        self.report(Level::Info, message);
    }

    fn debug(&self, message: &str) {
        self.report(Level::Debug, message);
    }
}

/// Forwards every record to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, level: Level, message: &str) {
        log::log!(level, "{}", message);
    }
}

/// Collects records in memory
#[derive(Debug, Default)]
pub struct MemoryReporter {
    records: RefCell<Vec<(Level, String)>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded messages, in the order they were reported
    pub fn messages(&self) -> Vec<String> {
        self.records
            .borrow()
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// Whether any recorded message contains `fragment`
    pub fn contains(&self, fragment: &str) -> bool {
        self.records
            .borrow()
            .iter()
            .any(|(_, message)| message.contains(fragment))
    }

    /// Number of records at exactly `level`
    pub fn count(&self, level: Level) -> usize {
        self.records
            .borrow()
            .iter()
            .filter(|(record_level, _)| *record_level == level)
            .count()
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, level: Level, message: &str) {
        self.records.borrow_mut().push((level, message.to_string()));
    }
}
