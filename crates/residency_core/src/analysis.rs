//! crates/residency_core/src/analysis.rs
//!
//! The document classification pipeline: vision, then language detection, then
//! classification, then the requirement rules. Stages run strictly in order
//! because each one consumes the previous stage's output.

use crate::domain::{AnalysisResult, AnalysisStatus};
use crate::ports::{
    DocumentClassificationService, LanguageDetectionService, PortError, TextExtractionService,
};
use crate::requirements::requirements_for;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;
use tracing::{error, info};

/// The country whose immigration office reviews the documents.
pub const REVIEW_COUNTRY: &str = "Paraguay";
/// The working language of that office.
pub const REVIEW_LANGUAGE: &str = "Spanish";

const APOSTILLE_MARKER: &str = "apostill";
const CONDITION_UNDER_ANALYSIS: &str = "Document under analysis";

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Error processing document image")]
    TextExtraction(#[source] PortError),
    #[error("Error detecting document language")]
    LanguageDetection(#[source] PortError),
    #[error("Error classifying document type")]
    Classification(#[source] PortError),
}

/// Orchestrates the three remote analysis calls.
#[derive(Clone)]
pub struct DocumentAnalyzer {
    extractor: Arc<dyn TextExtractionService>,
    language: Arc<dyn LanguageDetectionService>,
    classifier: Arc<dyn DocumentClassificationService>,
}

impl DocumentAnalyzer {
    pub fn new(
        extractor: Arc<dyn TextExtractionService>,
        language: Arc<dyn LanguageDetectionService>,
        classifier: Arc<dyn DocumentClassificationService>,
    ) -> Self {
        Self {
            extractor,
            language,
            classifier,
        }
    }

    /// Analyzes one image. Any stage failing aborts the whole analysis.
    pub async fn analyze(&self, image: &[u8]) -> Result<AnalysisResult, AnalysisError> {
        let encoded = STANDARD.encode(image);

        let extracted = self.extractor.extract(&encoded).await.map_err(|e| {
            error!("Text extraction failed: {:?}", e);
            AnalysisError::TextExtraction(e)
        })?;

        let verdict = self
            .language
            .detect_language(&extracted.text)
            .await
            .map_err(|e| {
                error!("Language detection failed: {:?}", e);
                AnalysisError::LanguageDetection(e)
            })?;

        let classification = self
            .classifier
            .classify(&extracted.text, extracted.has_face)
            .await
            .map_err(|e| {
                error!("Document classification failed: {:?}", e);
                AnalysisError::Classification(e)
            })?;

        let requirements = requirements_for(classification.document_type, verdict.is_spanish);
        let validity_period = requirements.validity.validity_period.clone();

        info!(
            document_type = %classification.document_type,
            country = %classification.country,
            language = %verdict.detected_language,
            has_face = extracted.has_face,
            "Document analyzed"
        );

        Ok(AnalysisResult {
            document_type: classification.document_type,
            country: classification.country,
            is_apostilled: mentions_apostille(&extracted.text),
            status: AnalysisStatus::Review,
            condition: CONDITION_UNDER_ANALYSIS.to_string(),
            observations: observations(&verdict.detected_language),
            requirements,
            validity_period,
        })
    }
}

pub fn mentions_apostille(text: &str) -> bool {
    text.to_lowercase().contains(APOSTILLE_MARKER)
}

fn observations(detected_language: &str) -> Vec<String> {
    vec![
        format!("Detected language: {}", detected_language),
        "Verify data authenticity".to_string(),
        "Ensure data matches other submitted documents".to_string(),
        format!("Confirm document meets specific requirements for {}", REVIEW_COUNTRY),
    ]
}
