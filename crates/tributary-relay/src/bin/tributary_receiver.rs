//! Tributary event receiver service.
//!
//! Receives storage object-change notifications as Pub/Sub push messages
//! and routes them to the aggregation handlers. Non-2xx responses tell the
//! platform to redeliver.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router as HttpRouter};
use base64::Engine as _;
use clap::Parser;
use serde::Deserialize;

use tributary_core::observability::{init_logging, LogFormat};
use tributary_core::{GcsBackend, MetadataTokenSource, ObjectEvent};
use tributary_relay::config::RelayConfig;
use tributary_relay::kind::OutputKind;
use tributary_relay::notify::HttpNotifier;
use tributary_relay::router::{Disposition, Router};

#[derive(Debug, Parser)]
#[command(name = "tributary-receiver", about = "Output aggregation event receiver")]
struct Args {
    /// Port to listen on.
    #[arg(long, env = "TRIBUTARY_PORT", default_value_t = 8080)]
    port: u16,

    /// Bucket holding pipeline outputs and aggregate documents.
    #[arg(long, env = "TRIBUTARY_BUCKET")]
    bucket: String,

    /// Pipeline name prefix; events outside it are ignored.
    #[arg(long, env = "TRIBUTARY_PIPELINE")]
    pipeline: String,

    /// Aggregate document filename.
    #[arg(long, env = "TRIBUTARY_SENTINEL", default_value = "output.json")]
    sentinel: String,

    /// Expected output suffixes, comma-separated (e.g. `.bam,.bai,.metrics`).
    #[arg(long, env = "TRIBUTARY_KINDS", value_delimiter = ',', required = true)]
    kinds: Vec<String>,

    /// Downstream notification endpoint.
    #[arg(long, env = "TRIBUTARY_NOTIFY_URL")]
    notify_url: String,

    /// Debounce before completion signals read the document, in seconds.
    #[arg(long, env = "TRIBUTARY_DEBOUNCE_SECS", default_value_t = 5)]
    debounce_secs: u64,

    /// Log output format: `json` or `pretty`.
    #[arg(long, env = "TRIBUTARY_LOG_FORMAT", default_value = "pretty")]
    log_format: String,
}

struct AppState {
    router: Router<GcsBackend, HttpNotifier>,
}

/// Pub/Sub push delivery envelope.
#[derive(Debug, Deserialize)]
struct PushEnvelope {
    message: PushMessage,
}

#[derive(Debug, Deserialize)]
struct PushMessage {
    /// Base64-encoded object-change notification JSON.
    data: String,
}

async fn handle_push(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<PushEnvelope>,
) -> Response {
    let decoded = match base64::engine::general_purpose::STANDARD.decode(&envelope.message.data) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::warn!(error = %e, "undecodable push payload, dropping");
            // Acknowledge: redelivery cannot fix a malformed payload.
            return StatusCode::NO_CONTENT.into_response();
        }
    };

    let event: ObjectEvent = match serde_json::from_slice(&decoded) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable object event, dropping");
            return StatusCode::NO_CONTENT.into_response();
        }
    };

    match state.router.dispatch(&event).await {
        Ok(disposition) => {
            match &disposition {
                Disposition::Recorded(outcome) => {
                    tracing::debug!(name = %event.name, recorded = outcome.is_recorded(), "output event handled");
                }
                Disposition::Completion(outcome) => {
                    tracing::debug!(name = %event.name, outcome = outcome.as_str(), "completion event handled");
                }
                Disposition::ForeignPrefix | Disposition::Unmatched => {}
            }
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => {
            tracing::error!(name = %event.name, error = %e, "event handling failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_format = match args.log_format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Pretty,
    };
    init_logging(log_format);

    let kinds = args
        .kinds
        .iter()
        .map(OutputKind::new)
        .collect::<Result<Vec<_>, _>>()
        .context("invalid expected kinds")?;
    let config = Arc::new(
        RelayConfig::new(&args.pipeline, kinds, &args.sentinel)
            .context("invalid relay configuration")?
            .with_debounce(Duration::from_secs(args.debounce_secs)),
    );

    let tokens = Arc::new(MetadataTokenSource::new().context("token source")?);
    let storage = Arc::new(
        GcsBackend::new(&args.bucket, tokens.clone()).context("storage backend")?,
    );
    let notifier = Arc::new(HttpNotifier::new(&args.notify_url, tokens).context("notifier")?);

    let state = Arc::new(AppState {
        router: Router::new(storage, notifier, config),
    });

    let app = HttpRouter::new()
        .route("/events", post(handle_push))
        .route("/healthz", get(healthz))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    tracing::info!(%addr, bucket = %args.bucket, pipeline = %args.pipeline, "receiver listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind listener")?;
    axum::serve(listener, app).await.context("server exited")?;

    Ok(())
}
