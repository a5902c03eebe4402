// src/diagnostics.rs

//! Diagnostics sinks
//!
//! Policy loading and manifest compilation report what they do through a
//! `DiagnosticSink` handed to them by the caller instead of a process-wide
//! logger. Implementations include:
//! - `LogDiagnostics`: forwards every record to tracing
//! - `CollectDiagnostics`: keeps an ordered list of structured records
//! - `SilentDiagnostics`: drops everything
//!
//! # Example
//!
//! ```ignore
//! use aibuild::diagnostics::{CollectDiagnostics, DiagnosticLevel};
//!
//! let sink = CollectDiagnostics::new();
//! let policy = PolicyLoader::new(&sink)?.load(path, "qemu")?;
//! for record in sink.records() {
//!     println!("[{}] {}: {}", record.level, record.component, record.message);
//! }
//! ```

use std::sync::Mutex;
use strum_macros::Display;
use tracing::{debug, info, warn};

/// Severity of a diagnostic record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
#[strum(serialize_all = "lowercase")]
pub enum DiagnosticLevel {
    Debug,
    Info,
    Warning,
}

/// One structured diagnostic record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    /// Which part of the compiler produced the record (e.g. "policy", "content")
    pub component: &'static str,
    pub message: String,
}

/// Receiver for diagnostic records
pub trait DiagnosticSink: Send + Sync {
    /// Accept one record
    fn record(&self, diagnostic: Diagnostic);

    fn debug(&self, component: &'static str, message: String) {
        self.record(Diagnostic {
            level: DiagnosticLevel::Debug,
            component,
            message,
        });
    }

    fn info(&self, component: &'static str, message: String) {
        self.record(Diagnostic {
            level: DiagnosticLevel::Info,
            component,
            message,
        });
    }

    fn warning(&self, component: &'static str, message: String) {
        self.record(Diagnostic {
            level: DiagnosticLevel::Warning,
            component,
            message,
        });
    }
}

/// Silent sink (no-op)
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentDiagnostics;

impl DiagnosticSink for SilentDiagnostics {
    fn record(&self, _diagnostic: Diagnostic) {}
}

/// Sink that forwards records to tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDiagnostics;

impl DiagnosticSink for LogDiagnostics {
    fn record(&self, diagnostic: Diagnostic) {
        match diagnostic.level {
            DiagnosticLevel::Debug => debug!("{}: {}", diagnostic.component, diagnostic.message),
            DiagnosticLevel::Info => info!("{}: {}", diagnostic.component, diagnostic.message),
            DiagnosticLevel::Warning => warn!("{}: {}", diagnostic.component, diagnostic.message),
        }
    }
}

/// Sink that keeps every record, in arrival order
#[derive(Debug, Default)]
pub struct CollectDiagnostics {
    records: Mutex<Vec<Diagnostic>>,
}

impl CollectDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the records received so far
    pub fn records(&self) -> Vec<Diagnostic> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Records from one component only
    pub fn records_for(&self, component: &str) -> Vec<Diagnostic> {
        self.records()
            .into_iter()
            .filter(|d| d.component == component)
            .collect()
    }

    /// Drain all records, leaving the sink empty
    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(
            &mut *self
                .records
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

impl DiagnosticSink for CollectDiagnostics {
    fn record(&self, diagnostic: Diagnostic) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(diagnostic);
    }
}
