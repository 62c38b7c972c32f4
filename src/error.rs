//! Diagnostic model shared by every stage of the engine.
//!
//! A graph walk must accumulate problems and keep going on independent
//! branches, so the engine reports through [`Diagnostics`] rather than
//! returning on the first error. Component-level failures that never cross
//! a walk boundary keep dedicated error enums.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// One problem report: a short summary, a longer detail, and optionally the
/// address of the object it concerns.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
    pub address: Option<String>,
}

impl Diagnostic {
    pub fn error(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            summary: summary.into(),
            detail: detail.into(),
            address: None,
        }
    }

    pub fn warning(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            summary: summary.into(),
            detail: detail.into(),
            address: None,
        }
    }

    /// An engine bug surfaced as a diagnostic rather than a panic, so the
    /// caller still gets its partial artifacts back.
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::error("Internal engine error", detail)
    }

    pub fn with_address(mut self, addr: impl fmt::Display) -> Self {
        self.address = Some(addr.to_string());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

// Display is used by test assertions and log lines; keep it single-line.
impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.summary)?;
        if let Some(ref addr) = self.address {
            write!(f, " (with {})", addr)?;
        }
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

/// An ordered collection of diagnostics.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.0.push(diag);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| !d.is_error())
    }

    /// Flatten into one string for error contexts that want prose.
    pub fn to_summary(&self) -> String {
        self.0
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(diag: Diagnostic) -> Self {
        Self(vec![diag])
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<Diagnostic> for Diagnostics {
    fn from_iter<T: IntoIterator<Item = Diagnostic>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AddrError {
    #[error("invalid address {input:?}: {reason}")]
    Invalid { input: String, reason: String },
}

impl AddrError {
    pub fn new(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExprError {
    #[error("parse error at offset {offset}: {reason}")]
    Parse { offset: usize, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Every strongly-connected component with more than one member (or a
    /// self-loop), reported together so the user sees all cycles at once.
    #[error("dependency cycles detected: {}", render_cycles(.0))]
    Cycles(Vec<Vec<String>>),

    #[error("graph has {0} sink vertices, expected exactly one root")]
    BadRoot(usize),
}

fn render_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|c| c.join(" -> "))
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<GraphError> for Diagnostic {
    fn from(err: GraphError) -> Self {
        match &err {
            GraphError::Cycles(_) => Diagnostic::error("Dependency cycle", err.to_string()),
            GraphError::BadRoot(_) => Diagnostic::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_severity_accounting() {
        let mut diags = Diagnostics::new();
        assert!(!diags.has_errors());
        diags.push(Diagnostic::warning("w", "warn detail"));
        assert!(!diags.has_errors());
        diags.push(Diagnostic::error("e", "err detail").with_address("test.a"));
        assert!(diags.has_errors());
        assert_eq!(diags.errors().count(), 1);
        assert_eq!(diags.warnings().count(), 1);
    }

    #[test]
    fn diagnostic_display_includes_address() {
        let d = Diagnostic::error("Missing provider", "no factory").with_address("provider[\"x\"]");
        let text = d.to_string();
        assert!(text.contains("Missing provider"));
        assert!(text.contains("provider[\"x\"]"));
    }

    #[test]
    fn cycle_error_lists_all_cycles() {
        let err = GraphError::Cycles(vec![
            vec!["a".into(), "b".into()],
            vec!["c".into(), "d".into()],
        ]);
        let text = err.to_string();
        assert!(text.contains("a -> b"));
        assert!(text.contains("c -> d"));
    }
}
