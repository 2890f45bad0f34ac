//! # Diagnostics and Debug Reporting
//!
//! Shared error report collecting semantic diagnostics across passes, and
//! the debug reporter that gathers named sections of intermediate analysis
//! output when `debug_report` is enabled.
//!
//! Transformers never abort on user-program errors; they append a
//! diagnostic and keep going so a single run reports as many errors as
//! possible.

use crate::ast::SrcLoc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

/// A single message with an optional source location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticMessage {
    pub text: String,
    pub loc: Option<SrcLoc>,
}

impl DiagnosticMessage {
    pub fn new(text: impl Into<String>, loc: Option<SrcLoc>) -> Self {
        DiagnosticMessage { text: text.into(), loc }
    }
}

impl fmt::Display for DiagnosticMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.loc {
            Some(loc) => write!(f, "{} [{}]", self.text, loc),
            None => write!(f, "{}", self.text),
        }
    }
}

/// A diagnostic: a primary message plus optional secondary notes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub primary: DiagnosticMessage,
    pub secondary: Vec<DiagnosticMessage>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{tag}: {}", self.primary)?;
        for note in &self.secondary {
            write!(f, "\n  note: {note}")?;
        }
        Ok(())
    }
}

/// Ordered collection of diagnostics shared by all passes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    diagnostics: Vec<Diagnostic>,
}

impl ErrorReport {
    pub fn new() -> Self {
        ErrorReport::default()
    }

    /// Append a full diagnostic
    pub fn add_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Append an error with a single message
    pub fn add_error(&mut self, text: impl Into<String>, loc: Option<SrcLoc>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            primary: DiagnosticMessage::new(text, loc),
            secondary: Vec::new(),
        });
    }

    /// Append a warning with a single message
    pub fn add_warning(&mut self, text: impl Into<String>, loc: Option<SrcLoc>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            primary: DiagnosticMessage::new(text, loc),
            secondary: Vec::new(),
        });
    }

    /// All collected diagnostics, in insertion order
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Number of error-severity diagnostics
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    /// Number of warning-severity diagnostics
    pub fn warning_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count()
    }

    /// Check whether any error-severity diagnostic was reported
    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// Render the diagnostics as JSON for host tooling
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.diagnostics).unwrap_or_default()
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for diagnostic in &self.diagnostics {
            writeln!(f, "{diagnostic}")?;
        }
        Ok(())
    }
}

/// Ordered sequence of named report sections. Analyses and transformers
/// append a section each when debug reporting is enabled; the driver
/// renders the whole sequence at the end of the run.
#[derive(Debug, Clone, Default)]
pub struct DebugReporter {
    enabled: bool,
    sections: Vec<(String, String)>,
}

impl DebugReporter {
    pub fn new(enabled: bool) -> Self {
        DebugReporter { enabled, sections: Vec::new() }
    }

    /// Whether sections are being collected
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Append a named section; a no-op when disabled
    pub fn add_section(&mut self, title: impl Into<String>, body: impl Into<String>) {
        if self.enabled {
            self.sections.push((title.into(), body.into()));
        }
    }

    /// All collected sections, in insertion order
    pub fn sections(&self) -> &[(String, String)] {
        &self.sections
    }
}

impl fmt::Display for DebugReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (title, body) in &self.sections {
            writeln!(f, "--- {title} ---")?;
            writeln!(f, "{body}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_report_counts() {
        let mut report = ErrorReport::new();
        report.add_error("bad plan", None);
        report.add_warning("cyclic alias", None);
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.warning_count(), 1);
        assert!(report.has_errors());
    }

    #[test]
    fn test_diagnostic_display() {
        let diag = Diagnostic {
            severity: Severity::Error,
            primary: DiagnosticMessage::new("invalid execution order in plan", None),
            secondary: vec![DiagnosticMessage::new("only versions 0..1 permitted", None)],
        };
        let rendered = diag.to_string();
        assert!(rendered.starts_with("error:"));
        assert!(rendered.contains("note:"));
    }

    #[test]
    fn test_debug_reporter_disabled_discards() {
        let mut reporter = DebugReporter::new(false);
        reporter.add_section("scc-graph", "digraph {}");
        assert!(reporter.sections().is_empty());
    }

    #[test]
    fn test_report_json_rendering() {
        let mut report = ErrorReport::new();
        report.add_error("invalid execution order in plan", None);
        let json = report.to_json();
        assert!(json.contains("invalid execution order"));
        assert!(json.contains("Error"));
    }
}
