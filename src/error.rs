//! Error types for the edgequake-vision2md library.
//!
//! Two distinct error types reflect two distinct layers:
//!
//! * [`InferenceError`]: raised by the inference layer for a single request.
//!   It carries an [`InferenceErrorKind`] so the client can decide locally
//!   whether to back off and retry or give up immediately.
//!
//! * [`Vision2MdError`]: **Fatal**: the run cannot continue. Returned as
//!   `Err(Vision2MdError)` from every public entry point. A page that fails
//!   inference is wrapped in [`Vision2MdError::PageFailed`] together with the
//!   artifact path, so the caller knows exactly where to resume from.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// How the inference layer should treat a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InferenceErrorKind {
    /// Transient: rate limiting, 5xx, timeouts, dropped connections.
    Retryable,
    /// The backend rejected the request outright (auth, bad image, bad prompt).
    NonRetryable,
    /// A retryable failure persisted past the configured retry ceiling.
    RetriesExhausted,
}

impl fmt::Display for InferenceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InferenceErrorKind::Retryable => "retryable",
            InferenceErrorKind::NonRetryable => "non-retryable",
            InferenceErrorKind::RetriesExhausted => "retries exhausted",
        };
        f.write_str(s)
    }
}

/// A failed inference request.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind} inference error: {message}")]
pub struct InferenceError {
    pub kind: InferenceErrorKind,
    pub message: String,
    /// HTTP status reported by the backend, when there was one.
    pub status: Option<u16>,
}

impl InferenceError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: InferenceErrorKind::Retryable,
            message: message.into(),
            status: None,
        }
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            kind: InferenceErrorKind::NonRetryable,
            message: message.into(),
            status: None,
        }
    }

    /// Wrap the last retryable failure once the retry budget is spent.
    pub fn exhausted(attempts: u32, last: InferenceError) -> Self {
        Self {
            kind: InferenceErrorKind::RetriesExhausted,
            message: format!("gave up after {attempts} attempts: {}", last.message),
            status: last.status,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == InferenceErrorKind::Retryable
    }
}

/// All fatal errors returned by the edgequake-vision2md library.
#[derive(Debug, Error)]
pub enum Vision2MdError {
    // ── Run errors ────────────────────────────────────────────────────────
    /// The requested starting page is past the end of the document.
    #[error("Start page {start_page} is out of range (document has {total} pages)")]
    InvalidStartPage { start_page: usize, total: usize },

    /// The input produced no pages at all.
    #[error("No pages found in '{input}'")]
    NoPages { input: String },

    /// A page failed inference; everything before it is safely on disk.
    #[error(
        "Page {page} failed: {source}\n\
Partial output preserved at '{output}'.\n\
Re-run with the same output path to resume; completed pages are skipped automatically."
    )]
    PageFailed {
        page: usize,
        output: PathBuf,
        #[source]
        source: InferenceError,
    },

    /// The single whole-document request failed. Nothing was written.
    #[error("Batch conversion for '{output}' failed: {source}")]
    BatchFailed {
        output: PathBuf,
        #[source]
        source: InferenceError,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not read an existing output artifact while scanning for progress.
    #[error("Failed to read output file '{path}': {source}")]
    OutputReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input was not found at the given path.
    #[error("Input not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the input.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// The file is not an image type any page source understands.
    #[error("Unsupported image file '{path}' (expected png, jpg, jpeg, webp or gif)")]
    UnsupportedImage { path: PathBuf },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// A page number outside `1..=total` was requested from a page source.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Install pdfium system-wide or set PDFIUM_LIB_PATH=/path/to/libpdfium."
    )]
    PdfiumBindingFailed(String),

    // ── Backend errors ────────────────────────────────────────────────────
    /// The configured backend is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_failed_display_has_resume_guidance() {
        let e = Vision2MdError::PageFailed {
            page: 7,
            output: PathBuf::from("out/report.md"),
            source: InferenceError::non_retryable("401 Unauthorized"),
        };
        let msg = e.to_string();
        assert!(msg.contains("Page 7"), "got: {msg}");
        assert!(msg.contains("401 Unauthorized"), "got: {msg}");
        assert!(msg.contains("out/report.md"), "got: {msg}");
        assert!(msg.contains("resume"), "got: {msg}");
    }

    #[test]
    fn invalid_start_page_display() {
        let e = Vision2MdError::InvalidStartPage {
            start_page: 10,
            total: 3,
        };
        let msg = e.to_string();
        assert!(msg.contains("10"));
        assert!(msg.contains("3 pages"));
    }

    #[test]
    fn exhausted_keeps_status_and_last_message() {
        let last = InferenceError::retryable("429 Too Many Requests").with_status(429);
        let e = InferenceError::exhausted(4, last);
        assert_eq!(e.kind, InferenceErrorKind::RetriesExhausted);
        assert_eq!(e.status, Some(429));
        assert!(e.message.contains("4 attempts"));
        assert!(e.message.contains("Too Many Requests"));
        assert!(!e.is_retryable());
    }

    #[test]
    fn kind_display() {
        let e = InferenceError::non_retryable("bad image");
        assert_eq!(e.to_string(), "non-retryable inference error: bad image");
    }
}
