//! Text extraction: send a captured image to an OCR service, get raw text back.
//!
//! The service response is untrusted input. It is decoded into a private
//! boundary type and immediately turned into either [`RawOcrText`] or a
//! [`ScanError`]; nothing downstream looks at response fields directly.
//!
//! ## Failure classes
//!
//! * Transport failure (DNS, refused connection, timeout) →
//!   [`ScanError::NetworkError`], retried with exponential backoff
//!   (`retry_backoff_ms * 2^attempt`, capped at one minute).
//! * Non-2xx status or `IsErroredOnProcessing: true` →
//!   [`ScanError::ServiceError`], never retried: the same image would fail
//!   the same way.
//! * A successful response with empty text is *not* an error; it parses to
//!   zero line items.

use crate::config::ScanConfig;
use crate::error::{snippet, ScanError};
use crate::pipeline::encode::CapturedImage;
use async_trait::async_trait;
use reqwest::multipart::Form;
use serde::Deserialize;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Longest pause between two OCR attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Unstructured text recognised in one captured image.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawOcrText(String);

impl RawOcrText {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RawOcrText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Anything that can turn an invoice image into text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, image: &CapturedImage) -> Result<RawOcrText, ScanError>;

    /// Short name used in logs and error messages.
    fn name(&self) -> &str;
}

/// Client for an OCR.space-compatible HTTP endpoint.
#[derive(Clone)]
pub struct OcrSpaceClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    engine: String,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl fmt::Debug for OcrSpaceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrSpaceClient")
            .field("endpoint", &self.endpoint)
            .field("engine", &self.engine)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl OcrSpaceClient {
    /// Build a client from the session configuration.
    ///
    /// # Errors
    /// [`ScanError::InvalidConfig`] when no API key is configured.
    pub fn from_config(config: &ScanConfig) -> Result<Self, ScanError> {
        let api_key = config.ocr_api_key.clone().ok_or_else(|| {
            ScanError::InvalidConfig(
                "OCR API key is not set.\nProvide it with --ocr-api-key or INVOICE_SCAN_OCR_API_KEY."
                    .into(),
            )
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ScanError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.ocr_endpoint.clone(),
            api_key,
            engine: config.ocr_engine.clone(),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        })
    }

    async fn send_once(&self, data_uri: &str) -> Result<RawOcrText, ScanError> {
        let form = Form::new()
            .text("apikey", self.api_key.clone())
            .text("base64Image", data_uri.to_string())
            .text("ocrEngine", self.engine.clone());

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.network_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.network_error(e))?;

        if !status.is_success() {
            return Err(ScanError::ServiceError {
                message: format!("HTTP {}: {}", status.as_u16(), snippet(&body)),
            });
        }

        decode_response(&body)
    }

    fn network_error(&self, e: reqwest::Error) -> ScanError {
        let reason = if e.is_timeout() {
            "request timed out".to_string()
        } else {
            e.to_string()
        };
        ScanError::NetworkError {
            service: format!("OCR service {}", self.endpoint),
            reason,
        }
    }
}

#[async_trait]
impl TextExtractor for OcrSpaceClient {
    async fn extract(&self, image: &CapturedImage) -> Result<RawOcrText, ScanError> {
        let start = Instant::now();
        let data_uri = image.to_data_uri();
        debug!("OCR upload: {} bytes data URI", data_uri.len());

        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                let backoff = backoff_delay(self.retry_backoff_ms, attempt);
                warn!(
                    "OCR: retry {}/{} after {:?}",
                    attempt, self.max_retries, backoff
                );
                sleep(backoff).await;
            }

            match self.send_once(&data_uri).await {
                Ok(text) => {
                    info!(
                        "OCR: {} chars in {:?}",
                        text.as_str().len(),
                        start.elapsed()
                    );
                    return Ok(text);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    warn!("OCR: attempt {} failed: {}", attempt + 1, e);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn name(&self) -> &str {
        "ocr.space"
    }
}

/// Extractor that returns text recognised earlier, e.g. a saved OCR result.
#[derive(Debug, Clone)]
pub struct SavedText(RawOcrText);

impl SavedText {
    pub fn new(text: impl Into<String>) -> Self {
        Self(RawOcrText::new(text))
    }
}

#[async_trait]
impl TextExtractor for SavedText {
    async fn extract(&self, _image: &CapturedImage) -> Result<RawOcrText, ScanError> {
        Ok(self.0.clone())
    }

    fn name(&self) -> &str {
        "saved-text"
    }
}

// ── Response boundary ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OcrResponse {
    is_errored_on_processing: bool,
    #[serde(default)]
    parsed_results: Option<Vec<ParsedResult>>,
    #[serde(default)]
    error_message: Option<ErrorMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParsedResult {
    parsed_text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorMessage {
    One(String),
    Many(Vec<String>),
}

impl ErrorMessage {
    fn joined(self) -> String {
        match self {
            ErrorMessage::One(s) => s,
            ErrorMessage::Many(v) => v.join("; "),
        }
    }
}

/// Decode an OCR service response body into text or a service error.
pub fn decode_response(body: &str) -> Result<RawOcrText, ScanError> {
    let response: OcrResponse =
        serde_json::from_str(body).map_err(|e| ScanError::ServiceError {
            message: format!("unreadable OCR response ({e}): {}", snippet(body)),
        })?;

    if response.is_errored_on_processing {
        let message = response
            .error_message
            .map(ErrorMessage::joined)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "processing failed".to_string());
        return Err(ScanError::ServiceError { message });
    }

    let text = response
        .parsed_results
        .and_then(|results| results.into_iter().next())
        .and_then(|first| first.parsed_text)
        .ok_or_else(|| ScanError::ServiceError {
            message: "response has no ParsedResults[0].ParsedText".into(),
        })?;

    Ok(RawOcrText(text))
}

/// Pause before retry number `attempt` (1-based): `base_ms * 2^(attempt-1)`.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor)).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_success_payload() {
        let body = r#"{
            "ParsedResults": [{"TextOverlay": {}, "ParsedText": "DESCRIPTION\r\nMuffin\r\n", "ErrorMessage": ""}],
            "OCRExitCode": 1,
            "IsErroredOnProcessing": false,
            "ProcessingTimeInMilliseconds": "343"
        }"#;
        let text = decode_response(body).expect("success");
        assert_eq!(text.as_str(), "DESCRIPTION\r\nMuffin\r\n");
    }

    #[test]
    fn empty_text_is_success() {
        let body = r#"{"ParsedResults":[{"ParsedText":""}],"IsErroredOnProcessing":false}"#;
        assert_eq!(decode_response(body).unwrap(), RawOcrText::default());
    }

    #[test]
    fn errored_flag_with_message_list() {
        let body = r#"{"IsErroredOnProcessing":true,"ErrorMessage":["E101: Timed out","Retry later"]}"#;
        let err = decode_response(body).unwrap_err();
        assert!(matches!(err, ScanError::ServiceError { .. }));
        assert!(err.to_string().contains("E101: Timed out; Retry later"), "got: {err}");
    }

    #[test]
    fn errored_flag_with_plain_message() {
        let body = r#"{"IsErroredOnProcessing":true,"ErrorMessage":"Invalid API key"}"#;
        assert!(decode_response(body)
            .unwrap_err()
            .to_string()
            .contains("Invalid API key"));
    }

    #[test]
    fn errored_flag_without_message() {
        let body = r#"{"IsErroredOnProcessing":true,"ErrorMessage":null}"#;
        assert!(decode_response(body)
            .unwrap_err()
            .to_string()
            .contains("processing failed"));
    }

    #[test]
    fn missing_flag_is_service_error() {
        let err = decode_response(r#"{"ParsedResults":[{"ParsedText":"x"}]}"#).unwrap_err();
        assert!(matches!(err, ScanError::ServiceError { .. }));
    }

    #[test]
    fn missing_results_is_service_error() {
        let err = decode_response(r#"{"IsErroredOnProcessing":false,"ParsedResults":[]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("ParsedResults"));
    }

    #[test]
    fn non_json_is_service_error() {
        let err = decode_response("<html>502 Bad Gateway</html>").unwrap_err();
        assert!(err.to_string().contains("502 Bad Gateway"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn client_requires_api_key() {
        let config = ScanConfig::default();
        let err = OcrSpaceClient::from_config(&config).unwrap_err();
        assert!(matches!(err, ScanError::InvalidConfig(_)));
    }

    #[test]
    fn backoff_doubles_then_caps() {
        assert_eq!(backoff_delay(500, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(500, 3), Duration::from_millis(2000));
        assert_eq!(backoff_delay(500, 70), MAX_BACKOFF);
        assert_eq!(backoff_delay(u64::MAX, 2), MAX_BACKOFF);
        assert_eq!(backoff_delay(0, u32::MAX), Duration::ZERO);
    }
}
