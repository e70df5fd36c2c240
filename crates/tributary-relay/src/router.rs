//! Event routing.
//!
//! Incoming object-change events are matched against an ordered table of
//! `(pattern, action)` pairs — one suffix route per expected output kind,
//! then the sentinel route for the aggregate document itself. The first
//! match wins and invokes exactly one handler; unmatched events are a
//! logged no-op, not an error.

use std::sync::Arc;

use tributary_core::event::ObjectEvent;
use tributary_core::storage::StorageBackend;

use crate::aggregate::{Aggregator, RecordOutcome};
use crate::config::RelayConfig;
use crate::detector::{CompletionDetector, CompletionOutcome};
use crate::error::Result;
use crate::kind::OutputKind;
use crate::notify::Notifier;
use crate::run_key::RunKey;

/// How an event was dispatched.
#[derive(Debug)]
pub enum Disposition {
    /// The event named an output file; it was merged into the aggregate.
    Recorded(RecordOutcome),
    /// The event named the aggregate document; completion was checked.
    Completion(CompletionOutcome),
    /// The event's name does not carry the configured pipeline prefix.
    ForeignPrefix,
    /// The event matched no route.
    Unmatched,
}

#[derive(Debug, Clone)]
enum RoutePattern {
    /// Name ends with the given suffix.
    Suffix(OutputKind),
    /// Final path segment equals the given filename.
    FileName(String),
}

impl RoutePattern {
    fn matches(&self, name: &str) -> bool {
        match self {
            Self::Suffix(kind) => kind.matches(name),
            Self::FileName(file_name) => {
                name.rsplit('/').next().is_some_and(|last| last == file_name)
            }
        }
    }

    fn label(&self) -> &str {
        match self {
            Self::Suffix(kind) => kind.as_str(),
            Self::FileName(file_name) => file_name,
        }
    }
}

#[derive(Debug, Clone)]
enum RouteAction {
    RecordOutput(OutputKind),
    CheckCompletion,
}

#[derive(Debug, Clone)]
struct Route {
    pattern: RoutePattern,
    action: RouteAction,
}

/// Maps events to handlers through the ordered route table.
pub struct Router<S, N> {
    config: Arc<RelayConfig>,
    routes: Vec<Route>,
    aggregator: Aggregator<S>,
    detector: CompletionDetector<S, N>,
}

impl<S: StorageBackend, N: Notifier> Router<S, N> {
    /// Creates a router and its handlers over the given backend and
    /// notifier.
    #[must_use]
    pub fn new(storage: Arc<S>, notifier: Arc<N>, config: Arc<RelayConfig>) -> Self {
        let mut routes: Vec<Route> = config
            .expected_kinds()
            .iter()
            .map(|kind| Route {
                pattern: RoutePattern::Suffix(kind.clone()),
                action: RouteAction::RecordOutput(kind.clone()),
            })
            .collect();
        routes.push(Route {
            pattern: RoutePattern::FileName(config.sentinel().to_string()),
            action: RouteAction::CheckCompletion,
        });

        let aggregator = Aggregator::new(Arc::clone(&storage), Arc::clone(&config));
        let detector = CompletionDetector::new(storage, notifier, Arc::clone(&config));

        Self {
            config,
            routes,
            aggregator,
            detector,
        }
    }

    /// Dispatches one event to at most one handler.
    ///
    /// # Errors
    ///
    /// Propagates handler errors; ignored and unmatched events are `Ok`.
    pub async fn dispatch(&self, event: &ObjectEvent) -> Result<Disposition> {
        if !event.name.starts_with(self.config.pipeline()) {
            tracing::info!(
                name = %event.name,
                pipeline = %self.config.pipeline(),
                "event outside pipeline prefix, ignoring"
            );
            return Ok(Disposition::ForeignPrefix);
        }

        for route in &self.routes {
            if !route.pattern.matches(&event.name) {
                continue;
            }
            tracing::debug!(name = %event.name, route = route.pattern.label(), "routing event");
            return match &route.action {
                RouteAction::RecordOutput(kind) => {
                    let run = RunKey::from_object_name(&event.name)?;
                    let outcome = self
                        .aggregator
                        .record_output(&run, kind, &event.address())
                        .await?;
                    Ok(Disposition::Recorded(outcome))
                }
                RouteAction::CheckCompletion => {
                    let outcome = self.detector.on_completion_signal(event).await?;
                    Ok(Disposition::Completion(outcome))
                }
            };
        }

        tracing::info!(name = %event.name, "event matched no route, ignoring");
        Ok(Disposition::Unmatched)
    }
}
