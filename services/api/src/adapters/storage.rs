//! services/api/src/adapters/storage.rs
//!
//! Implements the `BlobStorage` port against a Supabase-compatible storage REST API.
//! Objects live in one bucket; public URLs are served from the bucket's public path.

use async_trait::async_trait;
use residency_core::ports::{BlobStorage, ObjectProbe, PortError, PortResult};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct StorageAdapter {
    http_client: reqwest::Client,
    base_url: String,
    service_key: String,
    bucket: String,
}

#[derive(Debug, Deserialize)]
struct SignedUrlResponse {
    #[serde(rename = "signedURL")]
    signed_url: String,
}

impl StorageAdapter {
    pub fn new(base_url: String, service_key: String, bucket: String) -> PortResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(Self {
            http_client,
            base_url,
            service_key,
            bucket,
        })
    }

    fn object_url(&self, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, self.bucket, path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header(AUTHORIZATION, format!("Bearer {}", self.service_key))
            .header("apikey", &self.service_key)
    }

    async fn check(response: reqwest::Response, operation: &str) -> PortResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let error_text = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            404 => PortError::NotFound(format!("{}: {}", operation, error_text)),
            409 => PortError::InvalidInput(format!("{}: object already exists", operation)),
            code if code >= 500 => PortError::Unavailable(format!("{}: {}", operation, error_text)),
            code => PortError::Unexpected(format!("{} returned {}: {}", operation, code, error_text)),
        })
    }
}

#[async_trait]
impl BlobStorage for StorageAdapter {
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> PortResult<String> {
        let size = bytes.len();
        let response = self
            .authorized(self.http_client.post(self.object_url(path)))
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await
            .map_err(|e| PortError::Unavailable(e.to_string()))?;
        Self::check(response, "Upload").await?;
        info!(path, size, "Object uploaded");
        Ok(path.to_string())
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, path
        )
    }

    async fn probe(&self, url: &str) -> PortResult<ObjectProbe> {
        let response = self
            .http_client
            .head(url)
            .send()
            .await
            .map_err(|e| PortError::Unavailable(e.to_string()))?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(ObjectProbe {
            ok: response.status().is_success(),
            content_type,
        })
    }

    async fn signed_url(&self, path: &str, ttl: Duration) -> PortResult<String> {
        let response = self
            .authorized(self.http_client.post(format!(
                "{}/storage/v1/object/sign/{}/{}",
                self.base_url, self.bucket, path
            )))
            .json(&json!({ "expiresIn": ttl.as_secs() }))
            .send()
            .await
            .map_err(|e| PortError::Unavailable(e.to_string()))?;
        let signed: SignedUrlResponse = Self::check(response, "Sign")
            .await?
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(absolute_signed_url(&self.base_url, &signed.signed_url))
    }
}

/// The API answers with a path relative to `/storage/v1`.
fn absolute_signed_url(base_url: &str, signed: &str) -> String {
    if signed.starts_with("http://") || signed.starts_with("https://") {
        signed.to_string()
    } else {
        format!("{}/storage/v1{}", base_url, signed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> StorageAdapter {
        StorageAdapter::new(
            "https://project.storage.test".to_string(),
            "key".to_string(),
            "documents".to_string(),
        )
        .unwrap()
    }

    #[test]
    fn public_urls_use_the_public_bucket_path() {
        assert_eq!(
            adapter().public_url("u1/1700000000000-abc.png"),
            "https://project.storage.test/storage/v1/object/public/documents/u1/1700000000000-abc.png"
        );
    }

    #[test]
    fn relative_signed_paths_are_made_absolute() {
        assert_eq!(
            absolute_signed_url(
                "https://project.storage.test",
                "/object/sign/documents/u1/a.png?token=t"
            ),
            "https://project.storage.test/storage/v1/object/sign/documents/u1/a.png?token=t"
        );
        assert_eq!(
            absolute_signed_url("https://x.test", "https://cdn.test/a.png?token=t"),
            "https://cdn.test/a.png?token=t"
        );
    }
}
