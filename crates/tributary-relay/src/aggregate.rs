//! Output aggregation under optimistic concurrency.
//!
//! Every workflow task uploads one output; each upload's event is merged
//! into the run's aggregate document through a read-observed-version →
//! conditional-write cycle. Concurrent writers for other kinds lose the
//! race benignly: the loser reloads and retries with the winner's entries
//! intact, so no update is ever lost short of retry exhaustion.

use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tributary_core::storage::{
    ObjectVersion, StorageBackend, WritePrecondition, WriteResult,
};

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::kind::OutputKind;
use crate::metrics;
use crate::run_key::RunKey;

/// The aggregate document: a mapping from output kind to the canonical
/// storage address of the file that satisfied it.
///
/// Serializes as a plain JSON object (`{".bam": "gs://…", …}`). Ordered by
/// kind so successive serializations of the same content are identical.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateDoc {
    outputs: BTreeMap<OutputKind, String>,
}

impl AggregateDoc {
    /// Parses a document from stored bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if the content is not a JSON object
    /// of kind → address strings.
    pub fn from_bytes(data: &Bytes) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Serializes the document for storage.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if encoding fails.
    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Returns the recorded address for a kind, if any.
    #[must_use]
    pub fn get(&self, kind: &OutputKind) -> Option<&str> {
        self.outputs.get(kind).map(String::as_str)
    }

    /// Records an address for a kind, replacing any previous entry.
    pub fn record(&mut self, kind: OutputKind, address: impl Into<String>) {
        self.outputs.insert(kind, address.into());
    }

    /// Returns the expected kinds not yet present in the document.
    #[must_use]
    pub fn missing<'a>(&self, expected: &'a BTreeSet<OutputKind>) -> Vec<&'a OutputKind> {
        expected
            .iter()
            .filter(|kind| !self.outputs.contains_key(*kind))
            .collect()
    }

    /// Returns whether every expected kind is present.
    #[must_use]
    pub fn is_complete(&self, expected: &BTreeSet<OutputKind>) -> bool {
        self.missing(expected).is_empty()
    }

    /// Returns the number of recorded outputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Returns whether no outputs are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// Result of recording an output.
#[derive(Debug, Clone)]
pub enum RecordOutcome {
    /// The output was merged into the document.
    Recorded {
        /// Document version identity after the write.
        version: ObjectVersion,
    },
    /// The document already carried this exact entry; nothing was written.
    Duplicate,
}

impl RecordOutcome {
    /// Returns true if the document was written.
    #[must_use]
    pub const fn is_recorded(&self) -> bool {
        matches!(self, Self::Recorded { .. })
    }
}

/// Merges output references into run aggregate documents.
pub struct Aggregator<S> {
    storage: Arc<S>,
    config: Arc<RelayConfig>,
}

impl<S: StorageBackend> Aggregator<S> {
    /// Creates an aggregator over the given storage backend.
    #[must_use]
    pub fn new(storage: Arc<S>, config: Arc<RelayConfig>) -> Self {
        Self { storage, config }
    }

    /// Records that `kind` was produced at `address` for `run`.
    ///
    /// Re-delivered notifications for an already-recorded entry return
    /// [`RecordOutcome::Duplicate`] without writing, so the document's
    /// version identity is unchanged by duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConflictExhausted`] when the configured attempt
    /// bound is spent without a successful conditional write, and
    /// propagates storage failures as-is.
    pub async fn record_output(
        &self,
        run: &RunKey,
        kind: &OutputKind,
        address: &str,
    ) -> Result<RecordOutcome> {
        let path = run.document_path(self.config.sentinel());
        let attempts = self.config.merge_attempts();

        for attempt in 1..=attempts {
            let (mut doc, precondition) = match self.storage.read(&path).await? {
                Some(current) => (
                    AggregateDoc::from_bytes(&current.data)?,
                    WritePrecondition::MatchesVersion(current.version),
                ),
                None => (AggregateDoc::default(), WritePrecondition::DoesNotExist),
            };

            if doc.get(kind) == Some(address) {
                tracing::info!(run = %run, %kind, "output already recorded, skipping");
                metrics::record_duplicate_output();
                return Ok(RecordOutcome::Duplicate);
            }

            doc.record(kind.clone(), address);

            match self
                .storage
                .put(&path, doc.to_bytes()?, precondition)
                .await?
            {
                WriteResult::Success { version } => {
                    tracing::info!(
                        run = %run,
                        %kind,
                        address,
                        recorded = doc.len(),
                        expected = self.config.expected_kinds().len(),
                        "recorded output"
                    );
                    metrics::record_output_recorded();
                    return Ok(RecordOutcome::Recorded { version });
                }
                WriteResult::PreconditionFailed => {
                    tracing::debug!(run = %run, %kind, attempt, "lost merge race, reloading");
                    metrics::record_merge_conflict();
                }
            }
        }

        Err(Error::ConflictExhausted { path, attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(suffix: &str) -> OutputKind {
        OutputKind::new(suffix).unwrap()
    }

    #[test]
    fn serializes_as_plain_object() {
        let mut doc = AggregateDoc::default();
        doc.record(kind(".bam"), "gs://outputs/p/r/sample.bam");
        let json = String::from_utf8(doc.to_bytes().unwrap().to_vec()).unwrap();
        assert_eq!(json, r#"{".bam":"gs://outputs/p/r/sample.bam"}"#);
    }

    #[test]
    fn missing_reports_unrecorded_kinds() {
        let expected: BTreeSet<OutputKind> =
            [kind(".bam"), kind(".bai"), kind(".metrics")].into();

        let mut doc = AggregateDoc::default();
        assert_eq!(doc.missing(&expected).len(), 3);
        assert!(!doc.is_complete(&expected));

        doc.record(kind(".bam"), "gs://outputs/p/r/s.bam");
        doc.record(kind(".metrics"), "gs://outputs/p/r/s.metrics");
        assert_eq!(doc.missing(&expected), vec![&kind(".bai")]);

        doc.record(kind(".bai"), "gs://outputs/p/r/s.bai");
        assert!(doc.is_complete(&expected));
    }

    #[test]
    fn unexpected_extras_do_not_mask_missing_kinds() {
        let expected: BTreeSet<OutputKind> = [kind(".bam"), kind(".bai")].into();

        let mut doc = AggregateDoc::default();
        doc.record(kind(".bam"), "gs://outputs/p/r/s.bam");
        doc.record(kind(".log"), "gs://outputs/p/r/s.log");
        assert_eq!(doc.missing(&expected), vec![&kind(".bai")]);
    }

    #[test]
    fn record_replaces_previous_entry() {
        let mut doc = AggregateDoc::default();
        doc.record(kind(".bam"), "gs://outputs/p/r/old.bam");
        doc.record(kind(".bam"), "gs://outputs/p/r/new.bam");
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.get(&kind(".bam")), Some("gs://outputs/p/r/new.bam"));
    }
}
