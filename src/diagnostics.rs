//! Diagnostics reported while validating and applying resource blocks

use serde::Serialize;
use std::fmt;

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single problem found in a resource block, optionally tied to an attribute path
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "Error",
            Severity::Warning => "Warning",
        };
        write!(f, "{}: {}", level, self.summary)?;
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        if let Some(path) = &self.attribute {
            write!(f, " (at {})", path)?;
        }
        Ok(())
    }
}

/// Ordered collection of diagnostics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error diagnostic
    pub fn error(
        &mut self,
        summary: impl Into<String>,
        detail: impl Into<String>,
        attribute: Option<&str>,
    ) {
        self.0.push(Diagnostic {
            severity: Severity::Error,
            summary: summary.into(),
            detail: detail.into(),
            attribute: attribute.filter(|p| !p.is_empty()).map(str::to_string),
        });
    }

    /// Record a warning diagnostic
    pub fn warning(
        &mut self,
        summary: impl Into<String>,
        detail: impl Into<String>,
        attribute: Option<&str>,
    ) {
        self.0.push(Diagnostic {
            severity: Severity::Warning,
            summary: summary.into(),
            detail: detail.into(),
            attribute: attribute.filter(|p| !p.is_empty()).map(str::to_string),
        });
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    /// Prefix every attribute path, used when a block is validated on its own
    pub fn within(mut self, prefix: &str) -> Self {
        for diag in &mut self.0 {
            diag.attribute = Some(match diag.attribute.take() {
                Some(path) => format!("{}.{}", prefix, path),
                None => prefix.to_string(),
            });
        }
        self
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.severity == Severity::Warning)
    }

    /// Turn error diagnostics into [`crate::Error::Validation`]; warnings alone pass
    pub fn into_result(self) -> crate::Result<()> {
        if self.has_errors() {
            Err(crate::Error::Validation(self))
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, diag) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", diag)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warnings_do_not_fail() {
        let mut diags = Diagnostics::new();
        diags.warning("Deprecated attribute", "use spec instead", Some("old"));
        assert!(!diags.has_errors());
        assert!(diags.into_result().is_ok());
    }

    #[test]
    fn test_errors_fail() {
        let mut diags = Diagnostics::new();
        diags.error("Missing required argument", "", Some("metadata.0.name"));
        let err = diags.into_result().unwrap_err();
        assert!(err.to_string().contains("metadata.0.name"));
    }

    #[test]
    fn test_within_prefixes_paths() {
        let mut diags = Diagnostics::new();
        diags.error("Invalid value", "", Some("url"));
        diags.error("Invalid block", "", None);
        let diags = diags.within("webhook.0.client_config.0");
        let paths: Vec<_> = diags.iter().map(|d| d.attribute.clone().unwrap()).collect();
        assert_eq!(
            paths,
            vec!["webhook.0.client_config.0.url", "webhook.0.client_config.0"]
        );
    }
}
