//! Pipeline state: the per-document state machine and the ordered result
//! buffer it drives.
//!
//! ```text
//! Idle ─▶ Loading ─▶ Processing(1) ─▶ … ─▶ Processing(i) ─▶ Checkpointing(i)
//!                                              ▲                 │
//!                                              └─ Processing(i+1)◀┘
//!                     … ─▶ Finalizing ─▶ Idle
//! Loading / Processing / Checkpointing / Finalizing ─▶ Aborted ─▶ Idle
//! ```
//!
//! [`BatchState`] only ever grows at its cursor, which is what keeps the
//! report in source page order whatever order inference calls finish in.

use crate::document::DocumentId;
use crate::error::BatchError;
use crate::output::PageResult;
use std::fmt;

/// Where the pipeline is in processing one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    /// Rasterising pages and restoring any checkpoint.
    Loading,
    /// Recording the result of `page`.
    Processing { page: usize },
    /// Writing a checkpoint that covers pages `1..=page`.
    Checkpointing { page: usize },
    /// Assembling and writing the report.
    Finalizing,
    /// The document was given up on.
    Aborted,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "Idle"),
            PipelineState::Loading => write!(f, "Loading"),
            PipelineState::Processing { page } => write!(f, "Processing(page={page})"),
            PipelineState::Checkpointing { page } => write!(f, "Checkpointing(page={page})"),
            PipelineState::Finalizing => write!(f, "Finalizing"),
            PipelineState::Aborted => write!(f, "Aborted"),
        }
    }
}

impl PipelineState {
    /// Move to `next`, or fail if the move is not an edge of the machine.
    ///
    /// Page numbers must advance by exactly one between successive
    /// `Processing` states, with at most one `Checkpointing` in between.
    /// The first `Processing` page after `Loading` is free so a resumed
    /// document can start past page 1.
    pub fn transition(self, next: PipelineState) -> Result<PipelineState, BatchError> {
        use PipelineState::*;

        let allowed = match (self, next) {
            (Idle, Loading) => true,
            (Loading, Processing { page }) => page >= 1,
            (Loading, Finalizing) => true,
            (Processing { page: a }, Processing { page: b }) => b == a + 1,
            (Processing { page: a }, Checkpointing { page: b }) => a == b,
            (Processing { .. }, Finalizing) => true,
            (Checkpointing { page: a }, Processing { page: b }) => b == a + 1,
            (Checkpointing { .. }, Finalizing) => true,
            (Finalizing, Idle) => true,
            (Loading | Processing { .. } | Checkpointing { .. } | Finalizing, Aborted) => true,
            (Aborted, Idle) => true,
            _ => false,
        };

        if allowed {
            Ok(next)
        } else {
            Err(BatchError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Aborted)
    }
}

/// Ordered page results of the document in progress, plus its cursor.
#[derive(Debug, Clone)]
pub struct BatchState {
    document_id: DocumentId,
    total_pages: usize,
    results: Vec<PageResult>,
}

impl BatchState {
    pub fn new(document_id: DocumentId, total_pages: usize) -> Self {
        Self {
            document_id,
            total_pages,
            results: Vec::with_capacity(total_pages),
        }
    }

    /// Rebuild a state from previously recorded results, validating order.
    pub fn restore(
        document_id: DocumentId,
        total_pages: usize,
        results: Vec<PageResult>,
    ) -> Result<Self, BatchError> {
        let mut state = Self::new(document_id, total_pages);
        for result in results {
            state.record(result)?;
        }
        Ok(state)
    }

    /// Append the result for the page at the cursor and advance it.
    pub fn record(&mut self, result: PageResult) -> Result<(), BatchError> {
        let expected = self.cursor();
        if result.document_id != self.document_id {
            return Err(BatchError::Internal(format!(
                "result for '{}' recorded into state of '{}'",
                result.document_id, self.document_id
            )));
        }
        if result.page_index != expected || expected > self.total_pages {
            return Err(BatchError::OrderViolation {
                document: self.document_id.to_string(),
                expected,
                got: result.page_index,
            });
        }
        self.results.push(result);
        Ok(())
    }

    /// Next unprocessed page index (1-based). `total_pages + 1` once
    /// every page is recorded.
    pub fn cursor(&self) -> usize {
        self.results.len() + 1
    }

    pub fn recorded(&self) -> usize {
        self.results.len()
    }

    pub fn is_complete(&self) -> bool {
        self.results.len() == self.total_pages
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    pub fn results(&self) -> &[PageResult] {
        &self.results
    }
}
