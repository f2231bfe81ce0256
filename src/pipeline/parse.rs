//! Line-item parser: raw OCR text → ordered [`LineItem`]s.
//!
//! The OCR service returns the invoice as unstructured lines with no
//! reliable row grouping. The printed invoice, however, lays its table out as
//! three columns under literal headers (`DESCRIPTION`, `ID`, `QT.`), and the
//! OCR engine reads each column top to bottom. Slicing the line sequence at
//! those three anchors recovers the columns; zipping them by position
//! recovers the rows.
//!
//! Header matching is exact. A header misread by the OCR engine (for example
//! `DESCRIPTI0N`) makes the whole page parse to nothing.

use crate::error::{MalformedInput, ScanError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One parsed row of an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub description: String,
    pub external_id: String,
    pub quantity: u32,
}

/// The three literal section headers the parser anchors on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnHeaders {
    pub description: String,
    pub identifier: String,
    pub quantity: String,
}

impl Default for ColumnHeaders {
    fn default() -> Self {
        Self {
            description: "DESCRIPTION".to_string(),
            identifier: "ID".to_string(),
            quantity: "QT.".to_string(),
        }
    }
}

impl ColumnHeaders {
    /// Headers must be non-blank and pairwise distinct, otherwise the column
    /// boundaries are ambiguous.
    pub fn validate(&self) -> Result<(), ScanError> {
        let all = [&self.description, &self.identifier, &self.quantity];
        if all.iter().any(|h| h.trim().is_empty()) {
            return Err(ScanError::InvalidConfig(
                "Column headers must not be blank".into(),
            ));
        }
        if self.description == self.identifier
            || self.identifier == self.quantity
            || self.description == self.quantity
        {
            return Err(ScanError::InvalidConfig(
                "Column headers must be distinct".into(),
            ));
        }
        Ok(())
    }
}

/// Parse OCR text into line items, treating missing headers as "no items".
pub fn parse(text: &str, headers: &ColumnHeaders) -> Vec<LineItem> {
    match try_parse(text, headers) {
        Ok(items) => items,
        Err(e) => {
            debug!("No line items: {}", e);
            Vec::new()
        }
    }
}

/// Parse OCR text into line items, reporting which header was missing.
pub fn try_parse(text: &str, headers: &ColumnHeaders) -> Result<Vec<LineItem>, MalformedInput> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let desc_at = find_header(&lines, 0, &headers.description)?;
    let id_at = find_header(&lines, desc_at + 1, &headers.identifier)?;
    let qty_at = find_header(&lines, id_at + 1, &headers.quantity)?;

    let descriptions = &lines[desc_at + 1..id_at];
    let ids = &lines[id_at + 1..qty_at];
    let quantities = &lines[qty_at + 1..];

    let rows = descriptions.len().max(ids.len()).max(quantities.len());
    debug!(
        "Columns: {} descriptions, {} ids, {} quantities → {} rows",
        descriptions.len(),
        ids.len(),
        quantities.len(),
        rows
    );

    Ok((0..rows)
        .map(|i| LineItem {
            description: descriptions.get(i).copied().unwrap_or_default().to_string(),
            external_id: ids.get(i).copied().unwrap_or_default().to_string(),
            quantity: quantities.get(i).map_or(0, |q| coerce_quantity(q)),
        })
        .collect())
}

/// Best-effort conversion of a quantity token to a non-negative integer.
///
/// Anything that does not parse as an integer, including negative numbers,
/// becomes 0.
pub fn coerce_quantity(token: &str) -> u32 {
    token.trim().parse::<u32>().unwrap_or(0)
}

fn find_header(lines: &[&str], from: usize, header: &str) -> Result<usize, MalformedInput> {
    lines
        .iter()
        .skip(from)
        .position(|l| *l == header)
        .map(|offset| from + offset)
        .ok_or_else(|| MalformedInput {
            header: header.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(description: &str, external_id: &str, quantity: u32) -> LineItem {
        LineItem {
            description: description.into(),
            external_id: external_id.into(),
            quantity,
        }
    }

    #[test]
    fn parses_example_invoice() {
        let text = "DESCRIPTION\nMuffin\nBagel\nID\n1001\n1002\nQT.\n3\n5";
        let items = parse(text, &ColumnHeaders::default());
        assert_eq!(items, vec![item("Muffin", "1001", 3), item("Bagel", "1002", 5)]);
    }

    #[test]
    fn missing_identifier_header_yields_nothing() {
        let text = "DESCRIPTION\nMuffin\nQT.\n3";
        assert!(parse(text, &ColumnHeaders::default()).is_empty());

        let err = try_parse(text, &ColumnHeaders::default()).unwrap_err();
        assert_eq!(err.header, "ID");
    }

    #[test]
    fn missing_each_header_is_reported() {
        let headers = ColumnHeaders::default();
        assert_eq!(
            try_parse("ID\n1\nQT.\n2", &headers).unwrap_err().header,
            "DESCRIPTION"
        );
        assert_eq!(
            try_parse("DESCRIPTION\nA\nID\n1", &headers).unwrap_err().header,
            "QT."
        );
        assert!(parse("", &headers).is_empty());
    }

    #[test]
    fn row_count_is_longest_column() {
        let text = "DESCRIPTION\nA\nID\n1\n2\n3\nQT.\n4";
        let items = parse(text, &ColumnHeaders::default());
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], item("A", "1", 4));
        assert_eq!(items[1], item("", "2", 0));
        assert_eq!(items[2], item("", "3", 0));
    }

    #[test]
    fn quantity_column_longest() {
        let text = "DESCRIPTION\nA\nID\nQT.\n1\n2";
        let items = parse(text, &ColumnHeaders::default());
        assert_eq!(items, vec![item("A", "", 1), item("", "", 2)]);
    }

    #[test]
    fn headers_only_yields_empty_success() {
        let items = try_parse("DESCRIPTION\nID\nQT.", &ColumnHeaders::default()).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn blank_lines_and_padding_are_ignored() {
        let text = "  Invoice 42  \r\n\r\nDESCRIPTION \n\n  Muffin\n ID\n1001  \n\nQT.\n 3 \n";
        let items = parse(text, &ColumnHeaders::default());
        assert_eq!(items, vec![item("Muffin", "1001", 3)]);
    }

    #[test]
    fn text_before_description_header_is_skipped() {
        let text = "ACME Bakery Supply\nInvoice #881\nDESCRIPTION\nRye\nID\n77\nQT.\n12";
        let items = parse(text, &ColumnHeaders::default());
        assert_eq!(items, vec![item("Rye", "77", 12)]);
    }

    #[test]
    fn identifier_header_before_description_is_not_an_anchor() {
        // "ID" above the description header must not end the description column.
        let text = "ID\nDESCRIPTION\nRye\nID\n77\nQT.\n1";
        let items = parse(text, &ColumnHeaders::default());
        assert_eq!(items, vec![item("Rye", "77", 1)]);
    }

    #[test]
    fn header_match_is_exact() {
        let text = "DESCRIPTI0N\nMuffin\nID\n1001\nQT.\n3";
        assert!(parse(text, &ColumnHeaders::default()).is_empty());
        let text = "description\nMuffin\nID\n1001\nQT.\n3";
        assert!(parse(text, &ColumnHeaders::default()).is_empty());
    }

    #[test]
    fn quantity_coercion() {
        assert_eq!(coerce_quantity("7"), 7);
        assert_eq!(coerce_quantity(" 12 "), 12);
        assert_eq!(coerce_quantity("abc"), 0);
        assert_eq!(coerce_quantity("-4"), 0);
        assert_eq!(coerce_quantity("2.5"), 0);
        assert_eq!(coerce_quantity(""), 0);
    }

    #[test]
    fn custom_headers() {
        let headers = ColumnHeaders {
            description: "ITEM".into(),
            identifier: "SKU".into(),
            quantity: "QTY".into(),
        };
        let items = parse("ITEM\nFlour\nSKU\nF-1\nQTY\n9", &headers);
        assert_eq!(items, vec![item("Flour", "F-1", 9)]);
    }

    #[test]
    fn header_validation() {
        assert!(ColumnHeaders::default().validate().is_ok());
        let dup = ColumnHeaders {
            description: "X".into(),
            identifier: "X".into(),
            quantity: "Y".into(),
        };
        assert!(dup.validate().is_err());
        let blank = ColumnHeaders {
            quantity: " ".into(),
            ..ColumnHeaders::default()
        };
        assert!(blank.validate().is_err());
    }
}
