//! crates/residency_core/src/documents.rs
//!
//! Document submission (intake, analysis, persistence) and the read paths
//! over stored documents.

use crate::analysis::{AnalysisError, DocumentAnalyzer};
use crate::domain::{Document, Upload, User};
use crate::intake::{DocumentIntake, IntakeError};
use crate::ports::{BlobStorage, DatabaseService, NewDocument, PortError, PortResult};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Intake(#[from] IntakeError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error("Error saving document")]
    Persist(#[source] PortError),
}

/// Where a stored document can be previewed and downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentLinks {
    pub preview_url: String,
    pub download_url: String,
}

#[derive(Clone)]
pub struct DocumentService {
    db: Arc<dyn DatabaseService>,
    storage: Arc<dyn BlobStorage>,
    intake: DocumentIntake,
    analyzer: DocumentAnalyzer,
    download_ttl: Duration,
}

impl DocumentService {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        storage: Arc<dyn BlobStorage>,
        analyzer: DocumentAnalyzer,
        download_ttl: Duration,
    ) -> Self {
        Self {
            intake: DocumentIntake::new(storage.clone()),
            db,
            storage,
            analyzer,
            download_ttl,
        }
    }

    /// Stores, analyzes and records one upload. Nothing is recorded unless all three succeed.
    pub async fn submit(&self, user_id: Uuid, upload: Upload) -> Result<Document, SubmitError> {
        let file_path = self.intake.store(user_id, &upload).await?;
        let analysis_result = self.analyzer.analyze(&upload.bytes).await?;

        let document = self
            .db
            .create_document(NewDocument {
                user_id,
                analysis_result,
                file_path,
            })
            .await
            .map_err(|e| {
                error!(%user_id, "Failed to record analyzed document: {:?}", e);
                SubmitError::Persist(e)
            })?;

        info!(
            %user_id,
            document_id = %document.id,
            document_type = %document.document_type,
            "Document submitted"
        );
        Ok(document)
    }

    pub async fn list(&self, user_id: Uuid) -> PortResult<Vec<Document>> {
        self.db.list_documents(user_id).await
    }

    /// Preview and time-limited download links. Only the owner and agency staff may ask.
    pub async fn links(&self, caller: &User, document_id: Uuid) -> PortResult<DocumentLinks> {
        let document = self.db.get_document(document_id).await?;
        if !caller.is_agency() && document.user_id != caller.user_id {
            return Err(PortError::Unauthorized);
        }
        let download_url = self
            .storage
            .signed_url(&document.file_path, self.download_ttl)
            .await?;
        Ok(DocumentLinks {
            preview_url: self.storage.public_url(&document.file_path),
            download_url,
        })
    }

    /// Attaches agency notes. The analysis result itself never changes.
    pub async fn annotate(&self, document_id: Uuid, notes: &str) -> PortResult<Document> {
        self.db.set_document_notes(document_id, notes).await?;
        self.db.get_document(document_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::fakes::FakeVision;
    use crate::domain::{AnalysisStatus, DocumentType, Role};
    use crate::intake::fakes::FakeStorage;
    use crate::memory::InMemoryDatabase;

    fn service(db: Arc<InMemoryDatabase>, storage: Arc<FakeStorage>) -> DocumentService {
        let vision = Arc::new(FakeVision::passport("PASSPORT"));
        let analyzer = DocumentAnalyzer::new(vision.clone(), vision.clone(), vision);
        DocumentService::new(db, storage, analyzer, Duration::from_secs(3600))
    }

    fn png() -> Upload {
        Upload {
            file_name: "passport.png".to_string(),
            content_type: "image/png".to_string(),
            bytes: b"\x89PNG\r\n".to_vec(),
        }
    }

    #[tokio::test]
    async fn submitted_passport_is_recorded_for_review() {
        let db = Arc::new(InMemoryDatabase::new());
        let user = db.add_user("p@example.com", Role::Customer);
        let documents = service(db.clone(), Arc::new(FakeStorage::default()));

        let document = documents.submit(user.user_id, png()).await.unwrap();
        assert_eq!(document.document_type, DocumentType::Passport);
        assert_eq!(document.analysis_result.status, AnalysisStatus::Review);
        assert!(document.file_path.starts_with(&user.user_id.to_string()));

        let listed = documents.list(user.user_id).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn rejected_upload_records_nothing() {
        let db = Arc::new(InMemoryDatabase::new());
        let user = db.add_user("p@example.com", Role::Customer);
        let documents = service(db.clone(), Arc::new(FakeStorage::default()));

        let mut pdf = png();
        pdf.content_type = "application/pdf".to_string();
        let err = documents.submit(user.user_id, pdf).await.unwrap_err();
        assert!(matches!(err, SubmitError::Intake(IntakeError::UnsupportedType(_))));
        assert!(documents.list(user.user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn links_are_limited_to_owner_and_agency() {
        let db = Arc::new(InMemoryDatabase::new());
        let owner = db.add_user("owner@example.com", Role::Customer);
        let other = db.add_user("other@example.com", Role::Customer);
        let agent = db.add_user("agent@example.com", Role::Agency);
        let documents = service(db.clone(), Arc::new(FakeStorage::default()));
        let document = documents.submit(owner.user_id, png()).await.unwrap();

        let links = documents.links(&owner, document.id).await.unwrap();
        assert!(links.preview_url.ends_with(&document.file_path));
        assert!(links.download_url.contains("expires=3600"));
        assert!(documents.links(&agent, document.id).await.is_ok());
        assert!(matches!(
            documents.links(&other, document.id).await,
            Err(PortError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn notes_leave_the_analysis_untouched() {
        let db = Arc::new(InMemoryDatabase::new());
        let owner = db.add_user("owner@example.com", Role::Customer);
        let documents = service(db.clone(), Arc::new(FakeStorage::default()));
        let document = documents.submit(owner.user_id, png()).await.unwrap();

        let annotated = documents.annotate(document.id, "Apostille missing").await.unwrap();
        assert_eq!(annotated.agency_notes.as_deref(), Some("Apostille missing"));
        assert_eq!(annotated.analysis_result, document.analysis_result);
    }
}
