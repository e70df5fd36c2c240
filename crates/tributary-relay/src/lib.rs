//! # tributary-relay
//!
//! Consolidates per-file "output produced" notifications from a workflow
//! pipeline into a single aggregate document and fires a downstream
//! notification exactly once when the aggregate is complete.
//!
//! ## How It Works
//!
//! Each workflow task uploads one output file; the platform delivers one
//! object-change event per upload, at least once, in no particular order,
//! to stateless concurrent handler invocations. The relay coordinates them
//! through a single versioned document per run:
//!
//! - The [`router::Router`] matches an event's name against an ordered
//!   pattern table and invokes exactly one handler
//! - The [`aggregate::Aggregator`] merges the output's address into the
//!   run's document under optimistic concurrency, retrying on conflicts and
//!   suppressing duplicate deliveries
//! - The [`detector::CompletionDetector`] watches writes to the document
//!   itself, and once every expected output kind is present, claims a
//!   handled marker in the document's metadata via a conditional patch —
//!   the exactly-once gate — before notifying downstream
//!
//! A run's document moves `absent → partial → complete,unclaimed →
//! complete,claimed`; the final transition happens at most once no matter
//! how many signals race for it.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod aggregate;
pub mod config;
pub mod detector;
pub mod error;
pub mod kind;
pub mod metrics;
pub mod notify;
pub mod router;
pub mod run_key;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::aggregate::{AggregateDoc, Aggregator, RecordOutcome};
    pub use crate::config::RelayConfig;
    pub use crate::detector::{CompletionDetector, CompletionOutcome};
    pub use crate::error::{Error, Result};
    pub use crate::kind::OutputKind;
    pub use crate::notify::{HttpNotifier, Notifier, RecordingNotifier};
    pub use crate::router::{Disposition, Router};
    pub use crate::run_key::RunKey;
}
