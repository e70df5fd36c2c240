//! Completion detection and the exactly-once downstream trigger.
//!
//! Every write to a run's aggregate document produces a completion signal
//! carrying the tokens of that specific revision. The detector reads the
//! document conditionally on those tokens, and only a signal that observed
//! the *current* revision of a *complete* document may try to claim the
//! handled marker — a conditional metadata patch using the same token pair.
//! The store's atomicity of that patch is what makes the downstream call
//! fire at most once.

use std::collections::HashMap;
use std::sync::Arc;

use ulid::Ulid;

use tributary_core::event::ObjectEvent;
use tributary_core::storage::{ConditionalRead, StorageBackend, WriteResult};

use crate::aggregate::AggregateDoc;
use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::kind::OutputKind;
use crate::metrics;
use crate::notify::Notifier;
use crate::run_key::RunKey;

/// Metadata key holding the handled marker.
pub const HANDLED_BY_KEY: &str = "tributary-handled-by";

/// Result of handling a completion signal.
///
/// Every variant other than [`CompletionOutcome::Notified`] is a quiet
/// exit: the signal was redundant, superseded, or early, and a different
/// signal is (or was) authoritative.
#[derive(Debug, Clone)]
pub enum CompletionOutcome {
    /// This invocation claimed the document and notified downstream.
    Notified,
    /// The document moved past the signal's revision; a newer signal is
    /// authoritative.
    Superseded,
    /// The document does not yet carry every expected kind.
    Incomplete {
        /// The kinds still missing.
        missing: Vec<OutputKind>,
    },
    /// Another invocation already claimed the handled marker.
    AlreadyClaimed,
}

impl CompletionOutcome {
    /// Returns true if this invocation performed the downstream call.
    #[must_use]
    pub const fn is_notified(&self) -> bool {
        matches!(self, Self::Notified)
    }

    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Notified => "notified",
            Self::Superseded => "superseded",
            Self::Incomplete { .. } => "incomplete",
            Self::AlreadyClaimed => "already_claimed",
        }
    }
}

/// Decides whether a run is complete and fires the downstream notifier
/// at most once per run.
pub struct CompletionDetector<S, N> {
    storage: Arc<S>,
    notifier: Arc<N>,
    config: Arc<RelayConfig>,
    handler_id: String,
}

impl<S: StorageBackend, N: Notifier> CompletionDetector<S, N> {
    /// Creates a detector over the given storage backend and notifier.
    ///
    /// Each detector instance gets a unique handler ID, recorded as the
    /// handled marker's value when this instance wins the claim.
    #[must_use]
    pub fn new(storage: Arc<S>, notifier: Arc<N>, config: Arc<RelayConfig>) -> Self {
        Self {
            storage,
            notifier,
            config,
            handler_id: Ulid::new().to_string(),
        }
    }

    /// Returns this instance's handler ID.
    #[must_use]
    pub fn handler_id(&self) -> &str {
        &self.handler_id
    }

    /// Handles one completion signal for the document named by `event`.
    ///
    /// The claim happens before the downstream call: a notifier failure
    /// leaves the marker set, so redelivered signals exit at the marker
    /// check and the run must be re-driven by an operator (the error
    /// carries the run key).
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidEvent` if the event lacks version tokens,
    /// `Error::Notifier` if the downstream call fails after a successful
    /// claim, and propagates storage failures as-is.
    pub async fn on_completion_signal(&self, event: &ObjectEvent) -> Result<CompletionOutcome> {
        // A burst of output writes produces a burst of near-duplicate
        // signals; waiting lets the burst settle so the earliest signals
        // observe themselves superseded instead of reading a partial
        // document.
        let debounce = self.config.debounce();
        if !debounce.is_zero() {
            tokio::time::sleep(debounce).await;
        }

        let run = RunKey::from_object_name(&event.name)?;
        let Some(version) = event.version() else {
            return Err(Error::invalid_event(format!(
                "completion signal for '{}' carries no version tokens",
                event.name
            )));
        };

        let object = match self.storage.read_if_match(&event.name, &version).await? {
            ConditionalRead::Matched(object) => object,
            ConditionalRead::Changed => {
                tracing::info!(run = %run, %version, "signal out of date, exiting");
                metrics::record_completion("superseded");
                return Ok(CompletionOutcome::Superseded);
            }
        };

        let doc = AggregateDoc::from_bytes(&object.data)?;
        let missing: Vec<OutputKind> = doc
            .missing(self.config.expected_kinds())
            .into_iter()
            .cloned()
            .collect();
        if !missing.is_empty() {
            tracing::info!(
                run = %run,
                missing = %missing
                    .iter()
                    .map(OutputKind::as_str)
                    .collect::<Vec<_>>()
                    .join(","),
                "document still incomplete, exiting"
            );
            metrics::record_completion("incomplete");
            return Ok(CompletionOutcome::Incomplete { missing });
        }

        if object.metadata.contains_key(HANDLED_BY_KEY) {
            tracing::info!(run = %run, "completion already handled, exiting");
            metrics::record_completion("already_claimed");
            return Ok(CompletionOutcome::AlreadyClaimed);
        }

        let marker = HashMap::from([(HANDLED_BY_KEY.to_string(), self.handler_id.clone())]);
        match self
            .storage
            .patch_metadata(&event.name, marker, &version)
            .await?
        {
            WriteResult::Success { .. } => {}
            WriteResult::PreconditionFailed => {
                tracing::info!(run = %run, "concurrent invocation claimed the marker, exiting");
                metrics::record_completion("already_claimed");
                return Ok(CompletionOutcome::AlreadyClaimed);
            }
        }

        tracing::info!(run = %run, outputs = doc.len(), "claimed completion, notifying downstream");
        self.notifier.notify(&run, &doc).await.map_err(|e| {
            tracing::error!(run = %run, error = %e, "downstream notification failed after claim");
            match e {
                err @ Error::Notifier { .. } => err,
                other => Error::Notifier {
                    run: run.clone(),
                    message: other.to_string(),
                },
            }
        })?;

        metrics::record_completion("notified");
        Ok(CompletionOutcome::Notified)
    }
}
