#![doc = "HTTP asset store: the production storage collaborator for deployment archives."]
//
//! Implements the core [`ArtifactStore`] trait against an object store that accepts
//! `PUT {endpoint}/{bucket}/{key}` (S3-compatible gateways, presigning proxies, etc.).
//!
//! - Keys are content addressed via [`content_key`], so re-uploading an unchanged
//!   archive targets the same object.
//! - Any transport error or non-2xx response becomes `UploadFailed`.
//! - The bearer token, if any, comes from `ASSET_STORE_API_KEY` (see `load_config`).

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use chalice_bundle_core::artifact::content_key;
use chalice_bundle_core::contract::{ArtifactReference, ArtifactStore};
use chalice_bundle_core::PackagingError;

pub struct HttpAssetStore {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    api_key: Option<String>,
}

impl HttpAssetStore {
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            api_key,
        }
    }

    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint.trim_end_matches('/'), self.bucket, key)
    }
}

#[async_trait]
impl ArtifactStore for HttpAssetStore {
    async fn upload(&self, archive_path: &Path) -> Result<ArtifactReference, PackagingError> {
        let upload_failed = |reason: String| PackagingError::UploadFailed { reason };

        let key = content_key(archive_path).map_err(|e| upload_failed(e.to_string()))?;
        let body = fs::read(archive_path).map_err(|e| upload_failed(e.to_string()))?;
        let url = self.object_url(&key);
        tracing::info!(url = %url, bytes = body.len(), "Uploading deployment archive");

        let mut request = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/zip")
            .body(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = ?e, url = %url, "Asset upload request failed");
            upload_failed(format!("request to {url} failed: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<Failed to decode response body>"));
            tracing::error!(status = %status, url = %url, "Asset store returned error. Response body: {text}");
            return Err(upload_failed(format!("{url} returned {status}: {text}")));
        }

        tracing::info!(bucket = %self.bucket, key = %key, "Deployment archive uploaded");
        Ok(ArtifactReference {
            location: self.bucket.clone(),
            key,
        })
    }
}
