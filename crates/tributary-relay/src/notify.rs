//! Downstream notification seam.
//!
//! The downstream system receives the completed output map once per run.
//! Its payload contract is opaque to the relay; failures are reported
//! as-is and never retried here — redelivery is the platform's job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tributary_core::token::TokenSource;

use crate::aggregate::AggregateDoc;
use crate::error::{Error, Result};
use crate::run_key::RunKey;

/// Sink for completed runs.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Delivers the completed output map for a run.
    async fn notify(&self, run: &RunKey, outputs: &AggregateDoc) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct NotifyRequest<'a> {
    run: String,
    outputs: &'a AggregateDoc,
    completed_at: DateTime<Utc>,
}

/// HTTP notifier: POSTs the completed output map as JSON with a bearer
/// token.
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
    tokens: Arc<dyn TokenSource>,
}

impl HttpNotifier {
    /// Creates a notifier for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the HTTP client cannot be
    /// constructed.
    pub fn new(endpoint: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::configuration(format!("failed to build notifier client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            tokens,
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, run: &RunKey, outputs: &AggregateDoc) -> Result<()> {
        let token = self.tokens.access_token().await?;
        let request = NotifyRequest {
            run: run.to_string(),
            outputs,
            completed_at: Utc::now(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Notifier {
                run: run.clone(),
                message: format!("request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Notifier {
                run: run.clone(),
                message: format!("endpoint returned {status}: {body}"),
            });
        }

        Ok(())
    }
}

/// In-memory notifier for tests: records every delivery and can be told
/// to fail.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    deliveries: Mutex<Vec<(String, AggregateDoc)>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    /// Creates an empty recording notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `notify` calls fail.
    pub fn fail_deliveries(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Returns the number of successful deliveries.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn delivery_count(&self) -> usize {
        self.deliveries.lock().unwrap().len()
    }

    /// Returns the recorded deliveries as `(run, outputs)` pairs.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn deliveries(&self) -> Vec<(String, AggregateDoc)> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, run: &RunKey, outputs: &AggregateDoc) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Notifier {
                run: run.clone(),
                message: "injected delivery failure".into(),
            });
        }

        self.deliveries
            .lock()
            .map_err(|_| Error::Notifier {
                run: run.clone(),
                message: "delivery log poisoned".into(),
            })?
            .push((run.to_string(), outputs.clone()));
        Ok(())
    }
}
