//! crates/residency_core/src/intake.rs
//!
//! Validates an uploaded image, stores it under the owner's namespace and
//! confirms the stored object can be fetched back as an image.

use crate::domain::Upload;
use crate::ports::{BlobStorage, PortError};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const ALLOWED_CONTENT_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("File type not allowed. Use JPG, PNG or WebP")]
    UnsupportedType(String),
    #[error("File must not exceed 10MB")]
    TooLarge(usize),
    #[error("Error uploading document")]
    Upload(#[source] PortError),
    #[error("Error verifying uploaded file")]
    Verification(String),
}

impl IntakeError {
    /// Rejected before any network call was made.
    pub fn is_validation(&self) -> bool {
        matches!(self, IntakeError::UnsupportedType(_) | IntakeError::TooLarge(_))
    }
}

/// Checks type and size. Runs before any call to storage.
pub fn validate(upload: &Upload) -> Result<(), IntakeError> {
    if upload.bytes.len() > MAX_UPLOAD_BYTES {
        return Err(IntakeError::TooLarge(upload.bytes.len()));
    }
    if !ALLOWED_CONTENT_TYPES.contains(&upload.content_type.as_str()) {
        return Err(IntakeError::UnsupportedType(upload.content_type.clone()));
    }
    Ok(())
}

/// `{user_id}/{unix millis}-{random}.{subtype}`, e.g. `…/1718000000000-3f2a….png`.
pub fn storage_path(user_id: Uuid, content_type: &str) -> String {
    let extension = content_type.rsplit('/').next().unwrap_or("bin");
    format!(
        "{}/{}-{}.{}",
        user_id,
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple(),
        extension
    )
}

#[derive(Clone)]
pub struct DocumentIntake {
    storage: Arc<dyn BlobStorage>,
}

impl DocumentIntake {
    pub fn new(storage: Arc<dyn BlobStorage>) -> Self {
        Self { storage }
    }

    /// Stores the upload and returns its path inside the bucket.
    pub async fn store(&self, user_id: Uuid, upload: &Upload) -> Result<String, IntakeError> {
        validate(upload)?;

        let path = storage_path(user_id, &upload.content_type);
        let stored_path = self
            .storage
            .upload(&path, upload.bytes.clone(), &upload.content_type)
            .await
            .map_err(|e| {
                error!(%user_id, "Document upload failed: {:?}", e);
                IntakeError::Upload(e)
            })?;

        let url = self.storage.public_url(&stored_path);
        let probe = self.storage.probe(&url).await.map_err(|e| {
            error!(%user_id, "Could not probe stored document: {:?}", e);
            IntakeError::Verification(e.to_string())
        })?;

        let is_image = probe
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("image/"));
        if !probe.ok || !is_image {
            error!(%user_id, path = %stored_path, ?probe, "Stored document failed verification");
            return Err(IntakeError::Verification(format!(
                "HEAD {} returned ok={} content-type={:?}",
                url, probe.ok, probe.content_type
            )));
        }

        info!(%user_id, path = %stored_path, bytes = upload.bytes.len(), "Document stored");
        Ok(stored_path)
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use crate::ports::{BlobStorage, ObjectProbe, PortError, PortResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    pub struct FakeStorage {
        pub calls: AtomicUsize,
        pub uploaded: Mutex<Vec<(String, String)>>,
        pub fail_upload: bool,
        /// Content type the HEAD probe reports; `None` reports the uploaded one.
        pub probe_content_type: Option<String>,
    }

    impl FakeStorage {
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BlobStorage for FakeStorage {
        async fn upload(&self, path: &str, _bytes: Vec<u8>, content_type: &str) -> PortResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_upload {
                return Err(PortError::Unavailable("connection reset".to_string()));
            }
            self.uploaded
                .lock()
                .unwrap()
                .push((path.to_string(), content_type.to_string()));
            Ok(path.to_string())
        }

        fn public_url(&self, path: &str) -> String {
            format!("https://storage.test/public/documents/{}", path)
        }

        async fn probe(&self, _url: &str) -> PortResult<ObjectProbe> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let content_type = self.probe_content_type.clone().or_else(|| {
                self.uploaded.lock().unwrap().last().map(|(_, ct)| ct.clone())
            });
            Ok(ObjectProbe {
                ok: true,
                content_type,
            })
        }

        async fn signed_url(&self, path: &str, ttl: Duration) -> PortResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!(
                "https://storage.test/sign/documents/{}?expires={}",
                path,
                ttl.as_secs()
            ))
        }
    }
}
