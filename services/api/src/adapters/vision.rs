//! services/api/src/adapters/vision.rs
//!
//! Implements the `TextExtractionService` port against the Google Cloud Vision
//! `images:annotate` endpoint. One request asks for text and face detection together.

use async_trait::async_trait;
use residency_core::ports::{ExtractedText, PortError, PortResult, TextExtractionService};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct GoogleVisionAdapter {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GoogleVisionAdapter {
    pub fn new(base_url: String, api_key: String) -> PortResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(Self {
            http_client,
            base_url,
            api_key,
        })
    }
}

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<ImageAnnotation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageAnnotation {
    full_text_annotation: Option<FullText>,
    #[serde(default)]
    face_annotations: Vec<serde_json::Value>,
    error: Option<AnnotationError>,
}

#[derive(Debug, Deserialize)]
struct FullText {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnnotationError {
    #[serde(default)]
    message: String,
}

impl AnnotateResponse {
    fn into_extracted(self) -> PortResult<ExtractedText> {
        let annotation = self.responses.into_iter().next().unwrap_or_default();
        if let Some(error) = annotation.error {
            return Err(PortError::Unexpected(format!("Vision error: {}", error.message)));
        }
        Ok(ExtractedText {
            text: annotation
                .full_text_annotation
                .map(|t| t.text)
                .unwrap_or_default(),
            has_face: !annotation.face_annotations.is_empty(),
        })
    }
}

#[async_trait]
impl TextExtractionService for GoogleVisionAdapter {
    async fn extract(&self, image_base64: &str) -> PortResult<ExtractedText> {
        let body = json!({
            "requests": [{
                "image": { "content": image_base64 },
                "features": [
                    { "type": "TEXT_DETECTION" },
                    { "type": "DOCUMENT_TEXT_DETECTION" },
                    { "type": "FACE_DETECTION" }
                ]
            }]
        });

        let response = self
            .http_client
            .post(format!("{}/images:annotate", self.base_url))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| PortError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(PortError::Unexpected(format!(
                "Vision API returned {}: {}",
                status.as_u16(),
                error_text
            )));
        }

        let parsed: AnnotateResponse = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let extracted = parsed.into_extracted()?;
        debug!(
            chars = extracted.text.len(),
            has_face = extracted.has_face,
            "Vision annotation received"
        );
        Ok(extracted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> PortResult<ExtractedText> {
        serde_json::from_str::<AnnotateResponse>(raw)
            .unwrap()
            .into_extracted()
    }

    #[test]
    fn text_and_face_are_read_from_the_first_response() {
        let extracted = parse(
            r#"{"responses":[{"fullTextAnnotation":{"text":"PASAPORTE"},"faceAnnotations":[{"detectionConfidence":0.98}]}]}"#,
        )
        .unwrap();
        assert_eq!(extracted.text, "PASAPORTE");
        assert!(extracted.has_face);
    }

    #[test]
    fn missing_annotations_mean_no_text_and_no_face() {
        let extracted = parse(r#"{"responses":[{}]}"#).unwrap();
        assert_eq!(extracted, ExtractedText { text: String::new(), has_face: false });
        assert_eq!(parse(r#"{}"#).unwrap().text, "");
    }

    #[test]
    fn per_image_errors_fail_the_call() {
        let result = parse(r#"{"responses":[{"error":{"code":3,"message":"Bad image data."}}]}"#);
        assert!(matches!(result, Err(PortError::Unexpected(ref m)) if m.contains("Bad image data")));
    }
}
