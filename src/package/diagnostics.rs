//! Diagnostics collected while loading packages.
//!
//! Loading tolerates damage and drift: a renamed field is skipped, a type mismatch is skipped,
//! an export whose class disappeared is marked dead. None of these abort the load transaction,
//! but callers still need to know they happened, so they are recorded here.
//!
//! [`Diagnostics`] is append-only and backed by `boxcar::Vec`, so a session can hand out an
//! `Arc` of it to consumers on other threads. Every entry is also emitted as a `tracing` event
//! carrying the category, package and export as structured fields.
//!
//! ```rust
//! use pkgscope::package::diagnostics::{Diagnostic, Diagnostics, DiagnosticCategory, DiagnosticSeverity};
//!
//! let diagnostics = Diagnostics::new();
//! diagnostics.push(
//!     Diagnostic::new(DiagnosticSeverity::Warning, DiagnosticCategory::Property, "Skipping Health")
//!         .with_package("Widgets")
//!         .with_export(2),
//! );
//!
//! assert_eq!(diagnostics.for_export("Widgets", 2).len(), 1);
//! assert!(!diagnostics.has_errors());
//! ```

use std::fmt;

/// How bad a recorded problem is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticSeverity {
    /// Something was skipped or defaulted; the object still loaded.
    Warning,
    /// One request failed; sibling objects were unaffected.
    Error,
}

impl fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiagnosticSeverity::Warning => "WARN",
            DiagnosticSeverity::Error => "ERROR",
        })
    }
}

/// Which stage of loading recorded a problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCategory {
    /// Opening a package: header, chunk table, record tables.
    Header,
    /// Constructing exports, including exports marked dead.
    Export,
    /// Edges that could not be followed: archetypes, references, imports.
    Dependency,
    /// Tagged property streams: unknown tags, type mismatches, struct drift.
    Property,
}

impl fmt::Display for DiagnosticCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiagnosticCategory::Header => "Header",
            DiagnosticCategory::Export => "Export",
            DiagnosticCategory::Dependency => "Dependency",
            DiagnosticCategory::Property => "Property",
        })
    }
}

/// One recorded problem.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity.
    pub severity: DiagnosticSeverity,
    /// Stage that recorded it.
    pub category: DiagnosticCategory,
    /// Description.
    pub message: String,
    /// Offset inside the property stream or package body, if known.
    pub offset: Option<u64>,
    /// Name of the package, if known.
    pub package: Option<String>,
    /// Zero-based export table position, if known.
    pub export: Option<u32>,
}

impl Diagnostic {
    /// Creates an entry without context.
    pub fn new(severity: DiagnosticSeverity, category: DiagnosticCategory, message: impl Into<String>) -> Self {
        Self {
            severity,
            category,
            message: message.into(),
            offset: None,
            package: None,
            export: None,
        }
    }

    /// Attaches an offset.
    #[must_use]
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Attaches the package name.
    #[must_use]
    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    /// Attaches the export position.
    #[must_use]
    pub fn with_export(mut self, export: u32) -> Self {
        self.export = Some(export);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.category)?;
        match (&self.package, self.export) {
            (Some(package), Some(export)) => write!(f, " {package}:Export({export})")?,
            (Some(package), None) => write!(f, " {package}")?,
            (None, Some(export)) => write!(f, " Export({export})")?,
            (None, None) => {}
        }
        if let Some(offset) = self.offset {
            write!(f, " @0x{offset:x}")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Append-only, thread-safe list of [`Diagnostic`]s.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: boxcar::Vec<Diagnostic>,
}

impl Diagnostics {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an entry and emits it as a `tracing` event.
    pub fn push(&self, diagnostic: Diagnostic) {
        let category = diagnostic.category;
        let package = diagnostic.package.as_deref().unwrap_or_default();
        let export = diagnostic.export;
        match diagnostic.severity {
            DiagnosticSeverity::Warning => {
                tracing::warn!(%category, package, ?export, "{}", diagnostic.message);
            }
            DiagnosticSeverity::Error => {
                tracing::error!(%category, package, ?export, "{}", diagnostic.message);
            }
        }
        self.entries.push(diagnostic);
    }

    /// Records a warning without context.
    pub fn warning(&self, category: DiagnosticCategory, message: impl Into<String>) {
        self.push(Diagnostic::new(DiagnosticSeverity::Warning, category, message));
    }

    /// Records an error without context.
    pub fn error(&self, category: DiagnosticCategory, message: impl Into<String>) {
        self.push(Diagnostic::new(DiagnosticSeverity::Error, category, message));
    }

    /// All entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().map(|(_, d)| d)
    }

    /// Number of entries.
    pub fn count(&self) -> usize {
        self.entries.count()
    }

    /// Returns `true` if anything was recorded.
    pub fn has_any(&self) -> bool {
        self.count() > 0
    }

    /// Returns `true` if an error was recorded.
    pub fn has_errors(&self) -> bool {
        self.iter().any(|d| d.severity == DiagnosticSeverity::Error)
    }

    /// Returns `true` if a warning was recorded.
    pub fn has_warnings(&self) -> bool {
        self.iter().any(|d| d.severity == DiagnosticSeverity::Warning)
    }

    /// Number of warnings.
    pub fn warning_count(&self) -> usize {
        self.iter().filter(|d| d.severity == DiagnosticSeverity::Warning).count()
    }

    /// Number of errors.
    pub fn error_count(&self) -> usize {
        self.iter().filter(|d| d.severity == DiagnosticSeverity::Error).count()
    }

    /// All warnings.
    pub fn warnings(&self) -> Vec<&Diagnostic> {
        self.iter().filter(|d| d.severity == DiagnosticSeverity::Warning).collect()
    }

    /// All errors.
    pub fn errors(&self) -> Vec<&Diagnostic> {
        self.iter().filter(|d| d.severity == DiagnosticSeverity::Error).collect()
    }

    /// Entries of one category.
    pub fn by_category(&self, category: DiagnosticCategory) -> Vec<&Diagnostic> {
        self.iter().filter(|d| d.category == category).collect()
    }

    /// Entries recorded against one export of one package.
    pub fn for_export(&self, package: &str, export: u32) -> Vec<&Diagnostic> {
        self.iter()
            .filter(|d| d.package.as_deref() == Some(package) && d.export == Some(export))
            .collect()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} error(s), {} warning(s)", self.error_count(), self.warning_count())?;
        for diagnostic in self.iter() {
            writeln!(f, "  {diagnostic}")?;
        }
        Ok(())
    }
}
