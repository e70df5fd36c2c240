//! Google Cloud Storage backend over the JSON API.
//!
//! Conditional semantics map directly onto the API's precondition
//! parameters:
//! - `ifGenerationMatch` / `ifMetagenerationMatch` guard writes and reads;
//!   a failed precondition surfaces as HTTP 412
//! - `ifGenerationMatch=0` is the store's "does not exist" sentinel for
//!   creates
//! - metadata-only updates go through `PATCH` on the object resource and
//!   bump only the metageneration

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::storage::{
    ConditionalRead, ObjectVersion, StorageBackend, VersionedObject, WritePrecondition,
    WriteResult,
};
use crate::token::TokenSource;

/// Default GCS JSON API endpoint.
const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Object resource fields the relay cares about.
#[derive(Debug, Deserialize)]
struct ObjectResource {
    generation: String,
    metageneration: String,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
}

impl ObjectResource {
    fn version(&self) -> ObjectVersion {
        ObjectVersion::new(self.generation.clone(), self.metageneration.clone())
    }
}

/// Storage backend for a single GCS bucket.
pub struct GcsBackend {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    tokens: Arc<dyn TokenSource>,
}

impl GcsBackend {
    /// Creates a backend for `bucket` against the public GCS endpoint.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the HTTP client cannot be constructed.
    pub fn new(bucket: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        Self::with_endpoint(DEFAULT_ENDPOINT, bucket, tokens)
    }

    /// Creates a backend against a custom endpoint (emulators, proxies).
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the HTTP client cannot be constructed.
    pub fn with_endpoint(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::storage_with_source("failed to build storage client", e))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            tokens,
        })
    }

    /// URL of the object resource (`/storage/v1/b/{bucket}/o/{object}`).
    ///
    /// The object name is a single percent-encoded path segment, so slashes
    /// within it survive the round trip.
    fn object_url(&self, path: &str) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| Error::storage(format!("invalid storage endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| Error::storage("storage endpoint cannot be a base URL"))?
            .extend(["storage", "v1", "b", &self.bucket, "o", path]);
        Ok(url)
    }

    /// URL of the media upload endpoint for this bucket.
    fn upload_url(&self, path: &str) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| Error::storage(format!("invalid storage endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| Error::storage("storage endpoint cannot be a base URL"))?
            .extend(["upload", "storage", "v1", "b", &self.bucket, "o"]);
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", path);
        Ok(url)
    }

    async fn bearer(&self) -> Result<String> {
        let token = self.tokens.access_token().await?;
        Ok(format!("Bearer {token}"))
    }

    /// Fetches the object resource, optionally preconditioned on `version`.
    async fn fetch_resource(
        &self,
        path: &str,
        version: Option<&ObjectVersion>,
    ) -> Result<ResourceFetch> {
        let mut url = self.object_url(path)?;
        if let Some(v) = version {
            url.query_pairs_mut()
                .append_pair("ifGenerationMatch", &v.generation)
                .append_pair("ifMetagenerationMatch", &v.metageneration);
        }

        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.bearer().await?)
            .send()
            .await
            .map_err(|e| Error::storage_with_source(format!("metadata read failed: {path}"), e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(ResourceFetch::Missing),
            StatusCode::PRECONDITION_FAILED => Ok(ResourceFetch::Superseded),
            status if status.is_success() => {
                let resource: ObjectResource = response.json().await.map_err(|e| {
                    Error::storage_with_source(format!("malformed object resource: {path}"), e)
                })?;
                Ok(ResourceFetch::Found(resource))
            }
            status => Err(status_error("metadata read", path, status, response).await),
        }
    }

    /// Downloads content pinned to a specific generation.
    async fn fetch_media(&self, path: &str, generation: &str) -> Result<Option<Bytes>> {
        let mut url = self.object_url(path)?;
        url.query_pairs_mut()
            .append_pair("alt", "media")
            .append_pair("generation", generation);

        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, self.bearer().await?)
            .send()
            .await
            .map_err(|e| Error::storage_with_source(format!("media read failed: {path}"), e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let data = response.bytes().await.map_err(|e| {
                    Error::storage_with_source(format!("media body read failed: {path}"), e)
                })?;
                Ok(Some(data))
            }
            status => Err(status_error("media read", path, status, response).await),
        }
    }
}

enum ResourceFetch {
    Found(ObjectResource),
    Missing,
    Superseded,
}

async fn status_error(
    operation: &str,
    path: &str,
    status: StatusCode,
    response: reqwest::Response,
) -> Error {
    let body = response.text().await.unwrap_or_default();
    Error::storage(format!("{operation} for {path} returned {status}: {body}"))
}

#[async_trait]
impl StorageBackend for GcsBackend {
    async fn read(&self, path: &str) -> Result<Option<VersionedObject>> {
        let resource = match self.fetch_resource(path, None).await? {
            ResourceFetch::Found(resource) => resource,
            ResourceFetch::Missing => return Ok(None),
            ResourceFetch::Superseded => {
                return Err(Error::Internal {
                    message: format!("unconditional read of {path} reported a precondition"),
                })
            }
        };

        // Pinning the download to the observed generation keeps content and
        // version identity consistent across the two requests.
        match self.fetch_media(path, &resource.generation).await? {
            Some(data) => {
                let version = resource.version();
                Ok(Some(VersionedObject {
                    data,
                    metadata: resource.metadata.unwrap_or_default(),
                    version,
                }))
            }
            // The generation vanished between the two reads.
            None => Ok(None),
        }
    }

    async fn read_if_match(&self, path: &str, version: &ObjectVersion) -> Result<ConditionalRead> {
        let resource = match self.fetch_resource(path, Some(version)).await? {
            ResourceFetch::Found(resource) => resource,
            ResourceFetch::Missing => {
                return Err(Error::NotFound(format!("object not found: {path}")))
            }
            ResourceFetch::Superseded => return Ok(ConditionalRead::Changed),
        };

        match self.fetch_media(path, &resource.generation).await? {
            Some(data) => {
                let version = resource.version();
                Ok(ConditionalRead::Matched(VersionedObject {
                    data,
                    metadata: resource.metadata.unwrap_or_default(),
                    version,
                }))
            }
            None => Ok(ConditionalRead::Changed),
        }
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let mut url = self.upload_url(path)?;
        match &precondition {
            WritePrecondition::DoesNotExist => {
                url.query_pairs_mut().append_pair("ifGenerationMatch", "0");
            }
            WritePrecondition::MatchesVersion(v) => {
                url.query_pairs_mut()
                    .append_pair("ifGenerationMatch", &v.generation)
                    .append_pair("ifMetagenerationMatch", &v.metageneration);
            }
            WritePrecondition::None => {}
        }

        let response = self
            .client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, self.bearer().await?)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(|e| Error::storage_with_source(format!("write failed: {path}"), e))?;

        match response.status() {
            StatusCode::PRECONDITION_FAILED => {
                tracing::debug!(path, "write precondition failed");
                Ok(WriteResult::PreconditionFailed)
            }
            status if status.is_success() => {
                let resource: ObjectResource = response.json().await.map_err(|e| {
                    Error::storage_with_source(format!("malformed write response: {path}"), e)
                })?;
                Ok(WriteResult::Success {
                    version: resource.version(),
                })
            }
            status => Err(status_error("write", path, status, response).await),
        }
    }

    async fn patch_metadata(
        &self,
        path: &str,
        patch: HashMap<String, String>,
        version: &ObjectVersion,
    ) -> Result<WriteResult> {
        let mut url = self.object_url(path)?;
        url.query_pairs_mut()
            .append_pair("ifGenerationMatch", &version.generation)
            .append_pair("ifMetagenerationMatch", &version.metageneration);

        let body = serde_json::json!({ "metadata": patch });

        let response = self
            .client
            .patch(url)
            .header(reqwest::header::AUTHORIZATION, self.bearer().await?)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::storage_with_source(format!("metadata patch failed: {path}"), e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(Error::NotFound(format!("object not found: {path}"))),
            StatusCode::PRECONDITION_FAILED => {
                tracing::debug!(path, "metadata patch precondition failed");
                Ok(WriteResult::PreconditionFailed)
            }
            status if status.is_success() => {
                let resource: ObjectResource = response.json().await.map_err(|e| {
                    Error::storage_with_source(format!("malformed patch response: {path}"), e)
                })?;
                Ok(WriteResult::Success {
                    version: resource.version(),
                })
            }
            status => Err(status_error("metadata patch", path, status, response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::StaticTokenSource;

    fn backend() -> GcsBackend {
        GcsBackend::new("outputs", Arc::new(StaticTokenSource::new("t"))).expect("client")
    }

    #[test]
    fn object_url_encodes_name_as_single_segment() {
        let url = backend()
            .object_url("Pipeline/run-1/output.json")
            .expect("url");
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/storage/v1/b/outputs/o/Pipeline%2Frun-1%2Foutput.json"
        );
    }

    #[test]
    fn upload_url_carries_name_in_query() {
        let url = backend().upload_url("Pipeline/run-1/output.json").expect("url");
        assert_eq!(url.path(), "/upload/storage/v1/b/outputs/o");
        assert!(url
            .query()
            .is_some_and(|q| q.contains("uploadType=media") && q.contains("name=")));
    }
}
