//! Progress-callback trait for batch, document and page events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::BatchConfigBuilder::progress_callback`] to receive events
//! as the driver works through the batch. The CLI renders them as a progress
//! bar; a GUI would forward them to its widgets.
//!
//! # Example
//!
//! ```rust
//! use pdf2md_batch::{BatchConfig, BatchProgressCallback, DocumentId};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct FailureCounter {
//!     failed: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for FailureCounter {
//!     fn on_page_complete(&self, _doc: &DocumentId, _page: usize, _total: usize, success: bool) {
//!         if !success {
//!             self.failed.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//!
//! let config = BatchConfig::builder()
//!     .progress_callback(Arc::new(FailureCounter { failed: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::document::DocumentId;
use crate::output::DocumentStatus;
use crate::pipeline::checkpoint::CheckpointHandle;
use std::sync::Arc;

/// Called by the driver and pipeline as a batch progresses.
///
/// All methods have no-op defaults. Page events arrive in page order even
/// when `concurrency > 1`, but they may arrive on any tokio worker thread.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first document.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called once a document has been rasterised and its page count is known.
    fn on_document_start(&self, document: &DocumentId, total_pages: usize) {
        let _ = (document, total_pages);
    }

    /// Called when a checkpoint is restored, with the number of pages it
    /// already covers. Those pages get no `on_page_complete` event.
    fn on_resume(&self, document: &DocumentId, restored_pages: usize) {
        let _ = (document, restored_pages);
    }

    /// Called after each page result is recorded.
    ///
    /// # Arguments
    /// * `page`       : 1-indexed page number
    /// * `total_pages`: pages in the document
    /// * `success`    : false when the page carries a failure annotation
    fn on_page_complete(&self, document: &DocumentId, page: usize, total_pages: usize, success: bool) {
        let _ = (document, page, total_pages, success);
    }

    /// Called after a checkpoint has been durably written.
    fn on_checkpoint(&self, document: &DocumentId, checkpoint: &CheckpointHandle) {
        let _ = (document, checkpoint);
    }

    /// Called once per document, whatever its outcome.
    fn on_document_complete(&self, document: &DocumentId, status: &DocumentStatus) {
        let _ = (document, status);
    }

    /// Called once after the last document.
    ///
    /// # Arguments
    /// * `succeeded`: documents for which a report was written
    /// * `failed`   : documents that were aborted
    fn on_batch_complete(&self, succeeded: usize, failed: usize) {
        let _ = (succeeded, failed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::BatchConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracking {
        pages: AtomicUsize,
        failures: AtomicUsize,
        documents: AtomicUsize,
    }

    impl BatchProgressCallback for Tracking {
        fn on_page_complete(&self, _doc: &DocumentId, _page: usize, _total: usize, success: bool) {
            self.pages.fetch_add(1, Ordering::SeqCst);
            if !success {
                self.failures.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn on_document_complete(&self, _doc: &DocumentId, _status: &DocumentStatus) {
            self.documents.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        let id = DocumentId::new("doc");
        cb.on_batch_start(2);
        cb.on_document_start(&id, 3);
        cb.on_page_complete(&id, 1, 3, true);
        cb.on_document_complete(&id, &DocumentStatus::Completed);
        cb.on_batch_complete(1, 1);
    }

    #[test]
    fn tracking_callback_through_arc_dyn() {
        let tracker = Arc::new(Tracking::default());
        let cb: ProgressCallback = tracker.clone();
        let id = DocumentId::new("doc");

        cb.on_page_complete(&id, 1, 2, true);
        cb.on_page_complete(&id, 2, 2, false);
        cb.on_document_complete(&id, &DocumentStatus::CompletedWithErrors { failed_pages: 1 });

        assert_eq!(tracker.pages.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.failures.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.documents.load(Ordering::SeqCst), 1);
    }
}
