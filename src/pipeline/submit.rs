//! Submission: package reviewed line items and POST them to the inventory backend.
//!
//! The backend exposes `POST /invoices/` (201 on success), plus the two read
//! endpoints a receiver needs around a scan: `GET /vendors/` to pick the
//! supplier and `GET /invoices/` to see what has already been received.

use crate::config::ScanConfig;
use crate::error::{snippet, ScanError};
use crate::pipeline::parse::LineItem;
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

// ── Invoice numbers ──────────────────────────────────────────────────────

static RE_INVOICE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9\s]*$").expect("static regex"));

static INVOICE_SEQ: AtomicU64 = AtomicU64::new(0);

const MAX_INVOICE_NUMBER_LEN: usize = 100;

/// Identifier of one submission attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvoiceNumber(String);

impl InvoiceNumber {
    /// Timestamp-derived number, unique within the process.
    ///
    /// Format: `INV-<UTC yyyymmddHHMMSSmmm>-<seq>`.
    pub fn generate() -> Self {
        let seq = INVOICE_SEQ.fetch_add(1, Ordering::Relaxed);
        let stamp = Utc::now().format("%Y%m%d%H%M%S%3f");
        Self(format!("INV-{stamp}-{seq}"))
    }

    /// Validate an operator-entered invoice number.
    ///
    /// Letters, digits and spaces only; surrounding whitespace is trimmed.
    pub fn parse(input: &str) -> Result<Self, ScanError> {
        let trimmed = input.trim();
        if trimmed.is_empty()
            || trimmed.len() > MAX_INVOICE_NUMBER_LEN
            || !RE_INVOICE_NUMBER.is_match(trimmed)
        {
            return Err(ScanError::InvalidInvoiceNumber(input.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvoiceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Submission types ─────────────────────────────────────────────────────

/// Who is submitting and for which vendor.
///
/// Passed explicitly into every submission instead of being read from
/// ambient state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionContext {
    pub vendor_name: String,
    /// Employee id of the receiver doing the scan.
    pub scanned_by: u32,
    /// Operator-entered invoice number; generated when absent.
    pub invoice_number: Option<InvoiceNumber>,
    /// Where the invoice image was uploaded, if anywhere.
    pub image_file_path: Option<String>,
}

impl SubmissionContext {
    pub fn new(vendor_name: impl Into<String>, scanned_by: u32) -> Self {
        Self {
            vendor_name: vendor_name.into(),
            scanned_by,
            invoice_number: None,
            image_file_path: None,
        }
    }

    pub fn with_invoice_number(mut self, number: InvoiceNumber) -> Self {
        self.invoice_number = Some(number);
        self
    }

    pub fn with_image_file_path(mut self, path: impl Into<String>) -> Self {
        self.image_file_path = Some(path.into());
        self
    }
}

/// One invoice ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSubmission {
    pub invoice_number: InvoiceNumber,
    pub vendor_name: String,
    pub scanned_by: u32,
    pub image_file_path: Option<String>,
    pub line_items: Vec<LineItem>,
}

impl InvoiceSubmission {
    /// Assemble a submission from the reviewed items.
    ///
    /// # Errors
    /// [`ScanError::InvalidSubmission`] for an empty item list, a blank
    /// vendor or a zero employee id; the backend would reject all three.
    pub fn build(ctx: &SubmissionContext, items: &[LineItem]) -> Result<Self, ScanError> {
        if items.is_empty() {
            return Err(ScanError::InvalidSubmission(
                "no line items to submit".into(),
            ));
        }
        if ctx.vendor_name.trim().is_empty() {
            return Err(ScanError::InvalidSubmission("vendor name is empty".into()));
        }
        if ctx.scanned_by == 0 {
            return Err(ScanError::InvalidSubmission(
                "scanned_by must be a positive employee id".into(),
            ));
        }

        Ok(Self {
            invoice_number: ctx
                .invoice_number
                .clone()
                .unwrap_or_else(InvoiceNumber::generate),
            vendor_name: ctx.vendor_name.trim().to_string(),
            scanned_by: ctx.scanned_by,
            image_file_path: ctx.image_file_path.clone(),
            line_items: items.to_vec(),
        })
    }

    /// The JSON body of `POST /invoices/`.
    pub fn request_body(&self) -> CreateInvoiceBody<'_> {
        CreateInvoiceBody {
            invoice_number: self.invoice_number.as_str(),
            vendor_name: &self.vendor_name,
            scanned_by: self.scanned_by,
            image_file_path: self.image_file_path.as_deref(),
            scanned_invoice_items: self
                .line_items
                .iter()
                .map(|item| ScannedItemBody {
                    item_code: &item.external_id,
                    quantity: item.quantity,
                })
                .collect(),
        }
    }
}

/// Wire shape of the invoice-creation request.
#[derive(Debug, Serialize)]
pub struct CreateInvoiceBody<'a> {
    pub invoice_number: &'a str,
    pub vendor_name: &'a str,
    pub scanned_by: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_file_path: Option<&'a str>,
    pub scanned_invoice_items: Vec<ScannedItemBody<'a>>,
}

#[derive(Debug, Serialize)]
pub struct ScannedItemBody<'a> {
    pub item_code: &'a str,
    pub quantity: u32,
}

/// Backend acknowledgment of a created invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub invoice_number: InvoiceNumber,
    pub status: u16,
    /// Backend id of the stored scan, when the response carries one.
    pub scan_id: Option<i64>,
    pub message: Option<String>,
}

/// A supplier known to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vendor {
    pub vendor_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorRef {
    pub name: String,
}

/// One previously received invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedInvoiceSummary {
    pub scan_id: i64,
    pub invoice_number: String,
    #[serde(default)]
    pub vendor: Option<VendorRef>,
    pub total_items: u32,
    #[serde(default)]
    pub created_at: Option<String>,
}

// ── Backend port ─────────────────────────────────────────────────────────

/// The inventory backend as seen by a scan session.
#[async_trait]
pub trait InvoiceBackend: Send + Sync {
    async fn create_invoice(
        &self,
        submission: &InvoiceSubmission,
    ) -> Result<SubmissionReceipt, ScanError>;

    async fn list_vendors(&self) -> Result<Vec<Vendor>, ScanError>;

    async fn list_invoices(&self) -> Result<Vec<ScannedInvoiceSummary>, ScanError>;
}

/// reqwest-backed [`InvoiceBackend`].
#[derive(Debug, Clone)]
pub struct HttpInvoiceBackend {
    client: reqwest::Client,
    invoices_url: String,
    vendors_url: String,
}

impl HttpInvoiceBackend {
    pub fn from_config(config: &ScanConfig) -> Result<Self, ScanError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ScanError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            invoices_url: config.invoices_url(),
            vendors_url: config.vendors_url(),
        })
    }

    fn network_error(url: &str, e: reqwest::Error) -> ScanError {
        ScanError::NetworkError {
            service: format!("backend {url}"),
            reason: if e.is_timeout() {
                "request timed out".to_string()
            } else {
                e.to_string()
            },
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, ScanError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::network_error(url, e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Self::network_error(url, e))?;
        if !status.is_success() {
            return Err(ScanError::BackendRejected {
                status: status.as_u16(),
                detail: error_detail(&body),
            });
        }
        serde_json::from_str(&body).map_err(|e| ScanError::BackendRejected {
            status: status.as_u16(),
            detail: format!("unexpected response shape from {url}: {e}"),
        })
    }
}

#[derive(Deserialize)]
struct CreatedBody {
    message: Option<String>,
    #[serde(rename = "scanned invoice")]
    scan_id: Option<i64>,
}

#[async_trait]
impl InvoiceBackend for HttpInvoiceBackend {
    async fn create_invoice(
        &self,
        submission: &InvoiceSubmission,
    ) -> Result<SubmissionReceipt, ScanError> {
        let body = submission.request_body();
        debug!(
            "POST {} ({} items)",
            self.invoices_url,
            body.scanned_invoice_items.len()
        );

        let response = self
            .client
            .post(&self.invoices_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::network_error(&self.invoices_url, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Self::network_error(&self.invoices_url, e))?;

        if !status.is_success() {
            return Err(ScanError::BackendRejected {
                status: status.as_u16(),
                detail: error_detail(&text),
            });
        }

        let created: Option<CreatedBody> = serde_json::from_str(&text).ok();
        info!(
            "Invoice {} accepted (HTTP {})",
            submission.invoice_number,
            status.as_u16()
        );

        Ok(SubmissionReceipt {
            invoice_number: submission.invoice_number.clone(),
            status: status.as_u16(),
            scan_id: created.as_ref().and_then(|c| c.scan_id),
            message: created.and_then(|c| c.message),
        })
    }

    async fn list_vendors(&self) -> Result<Vec<Vendor>, ScanError> {
        self.get_json(&self.vendors_url).await
    }

    async fn list_invoices(&self) -> Result<Vec<ScannedInvoiceSummary>, ScanError> {
        self.get_json(&self.invoices_url).await
    }
}

/// Pull a readable reason out of an error body (`{"detail": ...}` or raw text).
fn error_detail(body: &str) -> String {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("detail").cloned())
        .map(|d| match d {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        });
    detail.unwrap_or_else(|| snippet(body))
}
