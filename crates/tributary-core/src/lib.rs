//! # tributary-core
//!
//! Shared primitives for the Tributary output relay:
//!
//! - **Storage Contract**: A versioned object store with conditional
//!   read/write/patch operations, the only coordination primitive the relay
//!   uses
//! - **Backends**: An in-memory backend for tests and a Google Cloud Storage
//!   backend for production
//! - **Token Sourcing**: Access-token acquisition for outbound calls
//! - **Event Model**: The inbound object-change notification
//! - **Error Types**: Shared error definitions and result types
//!
//! ## Version Tokens
//!
//! Every stored object carries two opaque version tokens: a *generation*
//! that changes on every content write, and a *metageneration* that changes
//! on metadata-only patches. Conditional operations take both, which lets
//! callers use the metadata channel as a second, independent CAS lock over
//! the same object.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod event;
pub mod gcs;
pub mod observability;
pub mod storage;
pub mod token;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::event::ObjectEvent;
    pub use crate::gcs::GcsBackend;
    pub use crate::storage::{
        ConditionalRead, MemoryBackend, ObjectVersion, StorageBackend, VersionedObject,
        WritePrecondition, WriteResult,
    };
    pub use crate::token::{MetadataTokenSource, StaticTokenSource, TokenSource};
}

pub use error::{Error, Result};
pub use event::ObjectEvent;
pub use gcs::GcsBackend;
pub use observability::{init_logging, LogFormat};
pub use storage::{
    ConditionalRead, MemoryBackend, ObjectVersion, StorageBackend, VersionedObject,
    WritePrecondition, WriteResult,
};
pub use token::{MetadataTokenSource, StaticTokenSource, TokenSource};
