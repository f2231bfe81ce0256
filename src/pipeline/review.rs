//! Review/edit store: the parsed line items while the operator checks them.
//!
//! The store is sized by the parse. Rows cannot be inserted or removed, only
//! their fields edited, since a scan always describes one fixed invoice page.
//! Nothing here talks to the backend; edits become visible there only
//! through an explicit submission.

use crate::error::ScanError;
use crate::pipeline::parse::{coerce_quantity, LineItem};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A single-field change to one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldEdit {
    Description(String),
    ExternalId(String),
    Quantity(u32),
}

impl FieldEdit {
    /// Build an edit from a field name and its textual value.
    ///
    /// Field names: `description` (`desc`), `id` (`external_id`, `code`),
    /// `quantity` (`qty`, `qt`). Quantity text is coerced the same way the
    /// parser coerces OCR tokens.
    pub fn from_text(field: &str, value: &str) -> Result<Self, ScanError> {
        match field.trim().to_lowercase().as_str() {
            "description" | "desc" => Ok(FieldEdit::Description(value.to_string())),
            "id" | "external_id" | "externalid" | "code" => {
                Ok(FieldEdit::ExternalId(value.to_string()))
            }
            "quantity" | "qty" | "qt" => Ok(FieldEdit::Quantity(coerce_quantity(value))),
            other => Err(ScanError::InvalidSubmission(format!(
                "unknown line-item field '{other}' (expected description, id or quantity)"
            ))),
        }
    }
}

/// Ordered, fixed-length list of line items under review.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewStore {
    items: Vec<LineItem>,
}

impl ReviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole list with a fresh parse.
    pub fn replace_all(&mut self, items: Vec<LineItem>) {
        debug!("Review store: {} → {} rows", self.items.len(), items.len());
        self.items = items;
    }

    /// Change one field of the row at `index`.
    pub fn edit(&mut self, index: usize, edit: FieldEdit) -> Result<(), ScanError> {
        let len = self.items.len();
        let row = self
            .items
            .get_mut(index)
            .ok_or(ScanError::RowOutOfRange { index, len })?;
        match edit {
            FieldEdit::Description(v) => row.description = v,
            FieldEdit::ExternalId(v) => row.external_id = v,
            FieldEdit::Quantity(v) => row.quantity = v,
        }
        Ok(())
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
