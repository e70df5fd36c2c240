//! Run identity derived from object names.

use std::fmt;

use crate::error::{Error, Result};

/// Identity of a pipeline run, taken from the first two path segments of
/// any of its objects' names (`{pipeline}/{run}/...`).
///
/// Every output of a run shares this prefix, so any member object locates
/// the run's aggregate document without further lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunKey {
    pipeline: String,
    run: String,
}

impl RunKey {
    /// Derives the run key from an object name.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidEvent` if the name has fewer than two
    /// non-empty path segments.
    pub fn from_object_name(name: &str) -> Result<Self> {
        let trimmed = name.trim_matches('/');
        let mut segments = trimmed.split('/').filter(|s| !s.is_empty());
        let (Some(pipeline), Some(run)) = (segments.next(), segments.next()) else {
            return Err(Error::invalid_event(format!(
                "object name '{name}' has no run prefix"
            )));
        };
        Ok(Self {
            pipeline: pipeline.to_string(),
            run: run.to_string(),
        })
    }

    /// Returns the pipeline segment.
    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Returns the run's object-name prefix (`{pipeline}/{run}`).
    #[must_use]
    pub fn prefix(&self) -> String {
        format!("{}/{}", self.pipeline, self.run)
    }

    /// Returns the path of the run's aggregate document.
    #[must_use]
    pub fn document_path(&self, sentinel: &str) -> String {
        format!("{}/{}/{sentinel}", self.pipeline, self.run)
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pipeline, self.run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_key_from_output_name() {
        let key = RunKey::from_object_name("Pipeline/run-1/call/sample.bam").unwrap();
        assert_eq!(key.pipeline(), "Pipeline");
        assert_eq!(key.prefix(), "Pipeline/run-1");
        assert_eq!(
            key.document_path("output.json"),
            "Pipeline/run-1/output.json"
        );
    }

    #[test]
    fn derives_the_same_key_from_the_sentinel_itself() {
        let from_output = RunKey::from_object_name("Pipeline/run-1/call/sample.bam").unwrap();
        let from_sentinel = RunKey::from_object_name("Pipeline/run-1/output.json").unwrap();
        assert_eq!(from_output, from_sentinel);
    }

    #[test]
    fn tolerates_surrounding_slashes() {
        let key = RunKey::from_object_name("/Pipeline/run-1/sample.bam").unwrap();
        assert_eq!(key.prefix(), "Pipeline/run-1");
    }

    #[test]
    fn rejects_names_without_a_run_prefix() {
        assert!(RunKey::from_object_name("orphan.bam").is_err());
        assert!(RunKey::from_object_name("").is_err());
        assert!(RunKey::from_object_name("/").is_err());
    }
}
