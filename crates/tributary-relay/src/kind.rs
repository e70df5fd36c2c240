//! Output kinds: the filename suffixes a run is expected to produce.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A category of produced file, identified by its suffix (including the
/// leading dot, e.g. `.bam`).
///
/// Kinds are ordered and hashable so expected sets and aggregate documents
/// have a stable, deterministic layout.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputKind(String);

impl OutputKind {
    /// Creates an output kind from a suffix.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` unless the suffix starts with a dot
    /// followed by at least one character and contains no path separator.
    pub fn new(suffix: impl Into<String>) -> Result<Self> {
        let suffix = suffix.into();
        if !suffix.starts_with('.') || suffix.len() < 2 {
            return Err(Error::configuration(format!(
                "output kind must be a dotted suffix, got '{suffix}'"
            )));
        }
        if suffix.contains('/') {
            return Err(Error::configuration(format!(
                "output kind must not contain '/', got '{suffix}'"
            )));
        }
        Ok(Self(suffix))
    }

    /// Derives the kind from an object name's final suffix.
    ///
    /// Returns `None` for names without an extension.
    #[must_use]
    pub fn from_object_name(name: &str) -> Option<Self> {
        let file_name = name.rsplit('/').next()?;
        let (stem, extension) = file_name.rsplit_once('.')?;
        if stem.is_empty() || extension.is_empty() {
            return None;
        }
        Some(Self(format!(".{extension}")))
    }

    /// Returns the suffix as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns whether an object name ends with this suffix.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        name.ends_with(&self.0)
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OutputKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_dotted_suffixes() {
        assert_eq!(OutputKind::new(".bam").unwrap().as_str(), ".bam");
        assert_eq!(
            OutputKind::new(".md_metrics").unwrap().as_str(),
            ".md_metrics"
        );
    }

    #[test]
    fn rejects_bare_and_empty_suffixes() {
        assert!(OutputKind::new("bam").is_err());
        assert!(OutputKind::new(".").is_err());
        assert!(OutputKind::new("").is_err());
        assert!(OutputKind::new("./x").is_err());
    }

    #[test]
    fn derives_kind_from_object_name() {
        let kind = OutputKind::from_object_name("Pipeline/run-1/call/sample.bam");
        assert_eq!(kind, Some(OutputKind::new(".bam").unwrap()));
    }

    #[test]
    fn takes_the_final_suffix_only() {
        let kind = OutputKind::from_object_name("Pipeline/run-1/sample.aligned.bam");
        assert_eq!(kind, Some(OutputKind::new(".bam").unwrap()));
    }

    #[test]
    fn extensionless_names_have_no_kind() {
        assert_eq!(OutputKind::from_object_name("Pipeline/run-1/README"), None);
        assert_eq!(OutputKind::from_object_name("Pipeline/run-1/.hidden"), None);
    }

    #[test]
    fn matches_checks_name_suffix() {
        let kind = OutputKind::new(".bai").unwrap();
        assert!(kind.matches("Pipeline/run-1/call/sample.bai"));
        assert!(!kind.matches("Pipeline/run-1/call/sample.bam"));
    }
}
