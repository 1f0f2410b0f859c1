//! Error types for the pdf2md-batch library.
//!
//! Three error types map onto the three levels at which things can go wrong:
//!
//! * [`BatchError`]: **Fatal for a document** (or for the whole run when it
//!   happens before any document starts): unreadable PDF, rasterisation
//!   failure, checkpoint/report write failure, bad configuration. The batch
//!   driver records it against the document and moves on to the next one.
//!
//! * [`InferenceError`]: **One failed attempt** at extracting a page. It is
//!   either transient (timeout, transport) and retried, or permanent (rejected
//!   or empty response) and recorded straight away. It never leaves the
//!   pipeline.
//!
//! * [`PageError`]: **The failure marker** stored inside a failed
//!   [`crate::output::PageResult`] once a page is given up on. It is
//!   serialisable so checkpoints and resumed runs carry failures verbatim.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a document (or the run, when raised before the first
/// document starts).
#[derive(Debug, Error)]
pub enum BatchError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file or directory was not found at the given path.
    #[error("Input not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the input.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// A URL input could not be downloaded.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Two documents in one batch share an identifier and would overwrite
    /// each other's checkpoints and reports.
    #[error("Document id '{id}' appears more than once in the batch")]
    DuplicateDocument { id: String },

    // ── Rasterisation errors ──────────────────────────────────────────────
    /// The PDF could not be opened or a page could not be rendered.
    #[error("Rasterisation failed for '{document}': {detail}")]
    Rasterization { document: String, detail: String },

    /// Rasterisation succeeded but produced no page images.
    #[error("Document '{document}' has no pages to extract")]
    NoPages { document: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or pass --pdfium-library."
    )]
    PdfiumBindingFailed(String),

    // ── Storage errors ────────────────────────────────────────────────────
    /// A checkpoint, report or scratch image could not be written.
    #[error("Failed to write '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A checkpoint exists but does not describe this document.
    #[error("Checkpoint for '{document}' does not match the document: {detail}")]
    CheckpointMismatch { document: String, detail: String },

    // ── Pipeline invariants ───────────────────────────────────────────────
    /// A page result arrived out of cursor order.
    #[error("Document '{document}': expected page {expected}, got page {got}")]
    OrderViolation {
        document: String,
        expected: usize,
        got: usize,
    },

    /// The pipeline state machine was asked to make an illegal move.
    #[error("Invalid pipeline transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    // ── Inference setup ───────────────────────────────────────────────────
    /// The configured provider could not be created.
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

impl BatchError {
    /// Wrap an I/O failure on `path` as a [`BatchError::Storage`].
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BatchError::Storage {
            path: path.into(),
            source,
        }
    }
}

/// Failure of a single inference attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InferenceError {
    /// The call did not complete within the configured timeout.
    #[error("inference call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Connection reset, 5xx, rate limiting and similar.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend refused the request (auth, bad request, unknown model,
    /// content filter).
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The model answered with nothing usable.
    #[error("model returned an empty response")]
    EmptyResponse,
}

impl InferenceError {
    /// Whether another attempt could change the outcome.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InferenceError::Timeout { .. } | InferenceError::Transport(_)
        )
    }
}

/// Recorded failure of one page after the retry policy gave up on it.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Every attempt failed with a transient error.
    #[error("Page {page}: extraction failed after {attempts} attempts: {detail}")]
    RetriesExhausted {
        page: usize,
        attempts: u32,
        detail: String,
    },

    /// An attempt failed with an error that retrying cannot fix.
    #[error("Page {page}: extraction rejected on attempt {attempts}: {detail}")]
    Permanent {
        page: usize,
        attempts: u32,
        detail: String,
    },

    /// The page image could not be read back from scratch storage.
    #[error("Page {page}: image could not be loaded: {detail}")]
    ImageUnavailable { page: usize, detail: String },
}

impl PageError {
    /// Number of inference attempts spent on the page.
    pub fn attempts(&self) -> u32 {
        match self {
            PageError::RetriesExhausted { attempts, .. } | PageError::Permanent { attempts, .. } => {
                *attempts
            }
            PageError::ImageUnavailable { .. } => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(InferenceError::Timeout { secs: 30 }.is_transient());
        assert!(InferenceError::Transport("connection reset".into()).is_transient());
        assert!(!InferenceError::Rejected("401 unauthorized".into()).is_transient());
        assert!(!InferenceError::EmptyResponse.is_transient());
    }

    #[test]
    fn storage_display_names_path() {
        let e = BatchError::storage(
            "/out/report.md",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = e.to_string();
        assert!(msg.contains("/out/report.md"), "got: {msg}");
        assert!(msg.contains("denied"), "got: {msg}");
    }

    #[test]
    fn order_violation_display() {
        let e = BatchError::OrderViolation {
            document: "invoice".into(),
            expected: 3,
            got: 5,
        };
        assert_eq!(e.to_string(), "Document 'invoice': expected page 3, got page 5");
    }

    #[test]
    fn page_error_roundtrips_through_json() {
        let e = PageError::RetriesExhausted {
            page: 2,
            attempts: 3,
            detail: "timed out".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: PageError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
        assert_eq!(back.attempts(), 3);
    }
}
