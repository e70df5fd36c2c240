//! Storage backend abstraction for versioned object storage.
//!
//! This module defines the storage contract the relay coordinates through:
//! - Conditional reads and writes preconditioned on version tokens
//! - Metadata-only patches that bump the metageneration channel
//!
//! ## Version Tokens
//!
//! Tokens are opaque `String`s to support different backends:
//! - GCS: numeric generation/metageneration (stored as strings)
//! - Memory: numeric counters (stored as strings)
//!
//! A content write produces a fresh generation; a metadata patch produces a
//! fresh metageneration without changing the generation. Conditional
//! operations take both tokens and fail atomically if either does not match
//! the object's current state.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// The version identity of a stored object.
///
/// `generation` changes on every content write; `metageneration` changes on
/// any write including metadata-only patches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectVersion {
    /// Content version token.
    pub generation: String,
    /// Metadata version token.
    pub metageneration: String,
}

impl ObjectVersion {
    /// Creates a version from the two token channels.
    #[must_use]
    pub fn new(generation: impl Into<String>, metageneration: impl Into<String>) -> Self {
        Self {
            generation: generation.into(),
            metageneration: metageneration.into(),
        }
    }
}

impl fmt::Display for ObjectVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.generation, self.metageneration)
    }
}

/// A stored object together with its metadata and version identity.
#[derive(Debug, Clone)]
pub struct VersionedObject {
    /// Object content.
    pub data: Bytes,
    /// Custom metadata key/value pairs.
    pub metadata: HashMap<String, String>,
    /// Version identity at read time.
    pub version: ObjectVersion,
}

/// Precondition for conditional writes (CAS operations).
#[derive(Debug, Clone)]
pub enum WritePrecondition {
    /// Write only if the object does not exist.
    DoesNotExist,
    /// Write only if the object's version matches the given tokens.
    MatchesVersion(ObjectVersion),
    /// Write unconditionally.
    None,
}

/// Result of a conditional write or patch.
///
/// Precondition failure is a normal result, never an `Err` — callers decide
/// whether to reload-and-retry or exit quietly.
#[derive(Debug, Clone)]
pub enum WriteResult {
    /// The write succeeded, returning the object's new version identity.
    Success {
        /// Version identity after the write.
        version: ObjectVersion,
    },
    /// The precondition did not hold; nothing was written.
    PreconditionFailed,
}

impl WriteResult {
    /// Returns true if the write was applied.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Result of a conditional read.
#[derive(Debug, Clone)]
pub enum ConditionalRead {
    /// The object still matches the requested version.
    Matched(VersionedObject),
    /// The object has moved past the requested version.
    Changed,
}

/// Storage backend trait for versioned object storage.
///
/// All backends (GCS, memory) implement this trait. Every mutation goes
/// through a read-observed-version → conditional-write cycle; the store's
/// atomicity of a single conditional operation is the only serialization
/// primitive callers may rely on.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Reads an object with its metadata and version identity.
    ///
    /// Returns `None` if the object does not exist.
    async fn read(&self, path: &str) -> Result<Option<VersionedObject>>;

    /// Reads an object only if it still matches `version` on both channels.
    ///
    /// Returns `ConditionalRead::Changed` if either token has moved on.
    /// Returns `Error::NotFound` if the object does not exist.
    async fn read_if_match(&self, path: &str, version: &ObjectVersion) -> Result<ConditionalRead>;

    /// Writes object content under the given precondition.
    ///
    /// A successful write produces a fresh generation. Returns
    /// `WriteResult::PreconditionFailed` if the precondition is not met —
    /// never an error for that case.
    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult>;

    /// Merges metadata keys into an object, preconditioned on `version`.
    ///
    /// A successful patch bumps only the metageneration; the generation and
    /// content are untouched. Returns `Error::NotFound` if the object does
    /// not exist.
    async fn patch_metadata(
        &self,
        path: &str,
        patch: HashMap<String, String>,
        version: &ObjectVersion,
    ) -> Result<WriteResult>;
}

/// In-memory storage backend for testing.
///
/// Thread-safe via `RwLock`. Not suitable for production. Uses numeric
/// tokens internally (stored as strings): a content write bumps the
/// generation and resets the metageneration to 1, a metadata patch bumps
/// only the metageneration.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    metadata: HashMap<String, String>,
    generation: i64,
    metageneration: i64,
}

impl StoredObject {
    fn version(&self) -> ObjectVersion {
        ObjectVersion::new(self.generation.to_string(), self.metageneration.to_string())
    }

    fn matches(&self, version: &ObjectVersion) -> bool {
        self.version() == *version
    }
}

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn read(&self, path: &str) -> Result<Option<VersionedObject>> {
        let objects = self.objects.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        Ok(objects.get(path).map(|o| VersionedObject {
            data: o.data.clone(),
            metadata: o.metadata.clone(),
            version: o.version(),
        }))
    }

    async fn read_if_match(&self, path: &str, version: &ObjectVersion) -> Result<ConditionalRead> {
        let objects = self.objects.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        let Some(obj) = objects.get(path) else {
            return Err(Error::NotFound(format!("object not found: {path}")));
        };

        if !obj.matches(version) {
            return Ok(ConditionalRead::Changed);
        }

        Ok(ConditionalRead::Matched(VersionedObject {
            data: obj.data.clone(),
            metadata: obj.metadata.clone(),
            version: obj.version(),
        }))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let mut objects = self.objects.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        let current = objects.get(path);

        match precondition {
            WritePrecondition::DoesNotExist => {
                if current.is_some() {
                    return Ok(WriteResult::PreconditionFailed);
                }
            }
            WritePrecondition::MatchesVersion(expected) => match current {
                Some(obj) if !obj.matches(&expected) => {
                    return Ok(WriteResult::PreconditionFailed);
                }
                None => return Ok(WriteResult::PreconditionFailed),
                _ => {}
            },
            WritePrecondition::None => {}
        }

        let new_generation = current.map_or(1, |o| o.generation + 1);
        let stored = StoredObject {
            data,
            // Metadata does not survive a content rewrite of the aggregate;
            // a fresh generation starts a fresh metadata channel.
            metadata: HashMap::new(),
            generation: new_generation,
            metageneration: 1,
        };
        let version = stored.version();
        objects.insert(path.to_string(), stored);
        drop(objects);

        Ok(WriteResult::Success { version })
    }

    async fn patch_metadata(
        &self,
        path: &str,
        patch: HashMap<String, String>,
        version: &ObjectVersion,
    ) -> Result<WriteResult> {
        let mut objects = self.objects.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        let Some(obj) = objects.get_mut(path) else {
            return Err(Error::NotFound(format!("object not found: {path}")));
        };

        if !obj.matches(version) {
            return Ok(WriteResult::PreconditionFailed);
        }

        obj.metadata.extend(patch);
        obj.metageneration += 1;
        let new_version = obj.version();
        drop(objects);

        Ok(WriteResult::Success {
            version: new_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_and_read_roundtrip() {
        let backend = MemoryBackend::new();
        let data = Bytes::from("hello world");

        let result = backend
            .put("runs/a/output.json", data.clone(), WritePrecondition::None)
            .await
            .expect("put should succeed");
        assert!(result.is_success());

        let obj = backend
            .read("runs/a/output.json")
            .await
            .expect("read should succeed")
            .expect("object should exist");
        assert_eq!(obj.data, data);
        assert_eq!(obj.version, ObjectVersion::new("1", "1"));
    }

    #[tokio::test]
    async fn read_missing_object_is_none() {
        let backend = MemoryBackend::new();
        assert!(backend.read("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn content_write_bumps_generation_and_resets_metageneration() {
        let backend = MemoryBackend::new();

        let first = backend
            .put("obj", Bytes::from("v1"), WritePrecondition::None)
            .await
            .unwrap();
        let WriteResult::Success { version: v1 } = first else {
            panic!("expected success");
        };

        backend
            .patch_metadata("obj", HashMap::from([("k".into(), "v".into())]), &v1)
            .await
            .unwrap();

        let second = backend
            .put("obj", Bytes::from("v2"), WritePrecondition::None)
            .await
            .unwrap();
        let WriteResult::Success { version: v2 } = second else {
            panic!("expected success");
        };
        assert_eq!(v2, ObjectVersion::new("2", "1"));
    }

    #[tokio::test]
    async fn patch_bumps_only_metageneration() {
        let backend = MemoryBackend::new();

        let result = backend
            .put("obj", Bytes::from("data"), WritePrecondition::None)
            .await
            .unwrap();
        let WriteResult::Success { version } = result else {
            panic!("expected success");
        };

        let patched = backend
            .patch_metadata(
                "obj",
                HashMap::from([("handled".into(), "yes".into())]),
                &version,
            )
            .await
            .unwrap();
        let WriteResult::Success { version: after } = patched else {
            panic!("expected success");
        };

        assert_eq!(after.generation, version.generation);
        assert_ne!(after.metageneration, version.metageneration);

        let obj = backend.read("obj").await.unwrap().unwrap();
        assert_eq!(obj.metadata.get("handled").map(String::as_str), Some("yes"));
        assert_eq!(obj.data, Bytes::from("data"));
    }

    #[tokio::test]
    async fn precondition_does_not_exist() {
        let backend = MemoryBackend::new();

        let first = backend
            .put("new", Bytes::from("data"), WritePrecondition::DoesNotExist)
            .await
            .unwrap();
        assert!(first.is_success());

        let second = backend
            .put("new", Bytes::from("data2"), WritePrecondition::DoesNotExist)
            .await
            .unwrap();
        assert!(matches!(second, WriteResult::PreconditionFailed));
    }

    #[tokio::test]
    async fn precondition_matches_version() {
        let backend = MemoryBackend::new();

        let result = backend
            .put("obj", Bytes::from("v1"), WritePrecondition::None)
            .await
            .unwrap();
        let WriteResult::Success { version } = result else {
            panic!("expected success");
        };

        let updated = backend
            .put(
                "obj",
                Bytes::from("v2"),
                WritePrecondition::MatchesVersion(version.clone()),
            )
            .await
            .unwrap();
        assert!(updated.is_success());

        // The tokens observed before the update are now stale.
        let stale = backend
            .put(
                "obj",
                Bytes::from("v3"),
                WritePrecondition::MatchesVersion(version),
            )
            .await
            .unwrap();
        assert!(matches!(stale, WriteResult::PreconditionFailed));
    }

    #[tokio::test]
    async fn precondition_matches_version_on_missing_object_fails() {
        let backend = MemoryBackend::new();
        let result = backend
            .put(
                "absent",
                Bytes::from("data"),
                WritePrecondition::MatchesVersion(ObjectVersion::new("1", "1")),
            )
            .await
            .unwrap();
        assert!(matches!(result, WriteResult::PreconditionFailed));
    }

    #[tokio::test]
    async fn read_if_match_detects_supersession() {
        let backend = MemoryBackend::new();

        let result = backend
            .put("obj", Bytes::from("v1"), WritePrecondition::None)
            .await
            .unwrap();
        let WriteResult::Success { version } = result else {
            panic!("expected success");
        };

        let matched = backend.read_if_match("obj", &version).await.unwrap();
        assert!(matches!(matched, ConditionalRead::Matched(_)));

        backend
            .put("obj", Bytes::from("v2"), WritePrecondition::None)
            .await
            .unwrap();

        let changed = backend.read_if_match("obj", &version).await.unwrap();
        assert!(matches!(changed, ConditionalRead::Changed));
    }

    #[tokio::test]
    async fn read_if_match_detects_metadata_supersession() {
        let backend = MemoryBackend::new();

        let result = backend
            .put("obj", Bytes::from("v1"), WritePrecondition::None)
            .await
            .unwrap();
        let WriteResult::Success { version } = result else {
            panic!("expected success");
        };

        backend
            .patch_metadata("obj", HashMap::from([("k".into(), "v".into())]), &version)
            .await
            .unwrap();

        // Generation is unchanged but the metageneration moved on.
        let changed = backend.read_if_match("obj", &version).await.unwrap();
        assert!(matches!(changed, ConditionalRead::Changed));
    }

    #[tokio::test]
    async fn read_if_match_missing_object_is_not_found() {
        let backend = MemoryBackend::new();
        let err = backend
            .read_if_match("absent", &ObjectVersion::new("1", "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn patch_with_stale_version_fails() {
        let backend = MemoryBackend::new();

        let result = backend
            .put("obj", Bytes::from("v1"), WritePrecondition::None)
            .await
            .unwrap();
        let WriteResult::Success { version } = result else {
            panic!("expected success");
        };

        // First claim wins.
        let first = backend
            .patch_metadata("obj", HashMap::from([("k".into(), "a".into())]), &version)
            .await
            .unwrap();
        assert!(first.is_success());

        // Second claim with the same observed tokens loses.
        let second = backend
            .patch_metadata("obj", HashMap::from([("k".into(), "b".into())]), &version)
            .await
            .unwrap();
        assert!(matches!(second, WriteResult::PreconditionFailed));

        let obj = backend.read("obj").await.unwrap().unwrap();
        assert_eq!(obj.metadata.get("k").map(String::as_str), Some("a"));
    }
}
