//! Pipeline stages for invoice capture and extraction.
//!
//! Each submodule implements exactly one transformation step, so every stage
//! is testable on its own and the camera, OCR provider or backend can be
//! swapped without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! capture ──▶ encode ──▶ ocr ──▶ parse ──▶ review ──▶ submit
//! (camera)    (PNG/b64)  (HTTP)  (columns) (edits)    (HTTP)
//! ```
//!
//! 1. [`capture`] own the camera device and grab a still frame
//! 2. [`encode`] downscale, encode, and wrap the frame as a data URI
//! 3. [`ocr`] call the OCR service; the first stage with network I/O
//! 4. [`parse`] slice the text at the section headers into line items
//! 5. [`review`] hold the items while the operator corrects them
//! 6. [`submit`] POST the reviewed invoice to the backend

pub mod capture;
pub mod encode;
pub mod ocr;
pub mod parse;
pub mod review;
pub mod submit;
