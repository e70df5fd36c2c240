//! Relay configuration.
//!
//! The expected-kinds set and pipeline prefix are explicit configuration
//! passed into the router, aggregator, and detector at construction. Kind
//! membership is validated here, at startup; the handlers never re-validate
//! per call.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::kind::OutputKind;

/// Default sentinel filename for aggregate documents.
pub const DEFAULT_SENTINEL: &str = "output.json";

/// Default debounce before a completion signal reads the document.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(5);

/// Configuration shared by the router, aggregator, and detector.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pipeline: String,
    expected_kinds: BTreeSet<OutputKind>,
    sentinel: String,
    debounce: Duration,
    merge_attempts: usize,
}

impl RelayConfig {
    /// Creates a validated configuration.
    ///
    /// The merge-attempt bound defaults to the number of expected kinds:
    /// in the worst case every other expected output's writer is racing to
    /// update the same document.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the pipeline prefix is empty, the
    /// expected set is empty, the sentinel is empty or contains a path
    /// separator, or the sentinel ends with one of the expected suffixes
    /// (which would shadow the completion route).
    pub fn new(
        pipeline: impl Into<String>,
        expected_kinds: impl IntoIterator<Item = OutputKind>,
        sentinel: impl Into<String>,
    ) -> Result<Self> {
        let pipeline = pipeline.into();
        let expected_kinds: BTreeSet<OutputKind> = expected_kinds.into_iter().collect();
        let sentinel = sentinel.into();

        if pipeline.is_empty() {
            return Err(Error::configuration("pipeline prefix must not be empty"));
        }
        if expected_kinds.is_empty() {
            return Err(Error::configuration(
                "at least one expected output kind is required",
            ));
        }
        if sentinel.is_empty() || sentinel.contains('/') {
            return Err(Error::configuration(format!(
                "sentinel must be a bare filename, got '{sentinel}'"
            )));
        }
        if let Some(kind) = expected_kinds.iter().find(|k| k.matches(&sentinel)) {
            return Err(Error::configuration(format!(
                "sentinel '{sentinel}' ends with expected kind '{kind}'"
            )));
        }

        let merge_attempts = expected_kinds.len();
        Ok(Self {
            pipeline,
            expected_kinds,
            sentinel,
            debounce: DEFAULT_DEBOUNCE,
            merge_attempts,
        })
    }

    /// Overrides the debounce delay (zero disables it).
    #[must_use]
    pub const fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Overrides the merge-attempt bound.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if `attempts` is zero.
    pub fn with_merge_attempts(mut self, attempts: usize) -> Result<Self> {
        if attempts == 0 {
            return Err(Error::configuration("merge attempts must be at least 1"));
        }
        self.merge_attempts = attempts;
        Ok(self)
    }

    /// The pipeline name prefix events must carry to be handled.
    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// The closed set of output kinds a run must produce.
    #[must_use]
    pub const fn expected_kinds(&self) -> &BTreeSet<OutputKind> {
        &self.expected_kinds
    }

    /// The aggregate document's filename.
    #[must_use]
    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    /// Delay before a completion signal reads the document.
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Upper bound on conditional-write attempts when merging an output.
    #[must_use]
    pub const fn merge_attempts(&self) -> usize {
        self.merge_attempts
    }
}
