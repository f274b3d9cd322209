//! Client for the thumbnail orientation analyzer service.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Result type for analyzer operations
pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Errors that can occur while talking to the analyzer. These are values to
/// render, never conditions that abort the caller.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("analyzer request failed: {0}")]
    Http(String),

    #[error("analyzer request timed out after {0:?}")]
    Timeout(Duration),

    #[error("analyzer response could not be parsed: {0}")]
    Parse(String),

    #[error("analyzer reported an error: {0}")]
    Backend(String),

    #[error("processed image is not a base64 data URI")]
    BadImageData,
}

/// Orientation classification, as tagged on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    #[serde(rename = "縦長")]
    Portrait,
    #[serde(rename = "横長")]
    Landscape,
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Orientation::Portrait => write!(f, "縦長"),
            Orientation::Landscape => write!(f, "横長"),
        }
    }
}

/// Successful analyzer response: image dimensions, the detected content
/// band, the orientation verdict, and optionally an edge-overlay rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailReport {
    pub thumbnail_url: String,
    pub width: u32,
    pub height: u32,
    pub vertical_width: u32,
    pub vertical_height: u32,
    pub orientation: Orientation,
    /// Edge-overlay rendering as a base64 `data:` URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_image: Option<String>,
}

impl ThumbnailReport {
    /// Decode the processed image data URI into raw image bytes.
    pub fn decode_processed_image(&self) -> AnalysisResult<Option<Vec<u8>>> {
        use base64::{engine::general_purpose::STANDARD, Engine as _};

        let Some(data_uri) = &self.processed_image else {
            return Ok(None);
        };
        let encoded = data_uri
            .split_once(";base64,")
            .map(|(_, data)| data)
            .ok_or(AnalysisError::BadImageData)?;
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|_| AnalysisError::BadImageData)?;
        Ok(Some(bytes))
    }
}

/// The analyzer answers failures with an `{ "error": … }` body and status
/// 200, so both shapes are decoded from the success path.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnalyzerResponse {
    Report(ThumbnailReport),
    Failure { error: String },
}

/// HTTP client for the analyzer endpoint.
pub struct ThumbnailClient {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl ThumbnailClient {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap();

        Self {
            base_url,
            timeout,
            client,
        }
    }

    /// Ask the analyzer to classify the thumbnail at `thumbnail_url`.
    pub async fn analyze(&self, thumbnail_url: &str) -> AnalysisResult<ThumbnailReport> {
        let url = format!("{}/api/analyze-thumbnail", self.base_url);

        let response = tokio::time::timeout(
            self.timeout,
            self.client
                .get(&url)
                .query(&[("url", thumbnail_url)])
                .send(),
        )
        .await
        .map_err(|_| AnalysisError::Timeout(self.timeout))?
        .map_err(|e| AnalysisError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AnalysisError::Http(format!(
                "analyzer returned status {}",
                response.status()
            )));
        }

        match response.json::<AnalyzerResponse>().await {
            Ok(AnalyzerResponse::Report(report)) => Ok(report),
            Ok(AnalyzerResponse::Failure { error }) => Err(AnalysisError::Backend(error)),
            Err(e) => Err(AnalysisError::Parse(e.to_string())),
        }
    }
}
