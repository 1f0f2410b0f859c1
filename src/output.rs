//! Result types: per-page results, reports, and the batch outcome.

use crate::document::DocumentId;
use crate::error::PageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What an extraction produced for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PageOutcome {
    /// Markdown returned by the model, after post-processing.
    Extracted { markdown: String },
    /// The page was given up on; the report carries a failure annotation.
    Failed { error: PageError },
}

/// The recorded result of one page. At most one exists per
/// (document, page index).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub document_id: DocumentId,
    /// 1-indexed page number.
    pub page_index: usize,
    pub outcome: PageOutcome,
    /// When the last attempt finished.
    pub completed_at: DateTime<Utc>,
    /// Wall-clock time across all attempts, backoff included.
    pub duration_ms: u64,
    pub attempts: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl PageResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, PageOutcome::Extracted { .. })
    }

    /// The markdown body, if the page was extracted.
    pub fn markdown(&self) -> Option<&str> {
        match &self.outcome {
            PageOutcome::Extracted { markdown } => Some(markdown),
            PageOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&PageError> {
        match &self.outcome {
            PageOutcome::Extracted { .. } => None,
            PageOutcome::Failed { error } => Some(error),
        }
    }
}

/// The assembled markdown for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub document_id: DocumentId,
    pub total_pages: usize,
    /// 1-indexed pages rendered as failure annotations.
    pub failed_pages: Vec<usize>,
    pub markdown: String,
}

impl Report {
    pub fn has_failures(&self) -> bool {
        !self.failed_pages.is_empty()
    }
}

/// Counters for one processed document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub total_pages: usize,
    pub extracted_pages: usize,
    pub failed_pages: usize,
    /// Pages restored from a checkpoint instead of extracted in this run.
    pub resumed_pages: usize,
    pub checkpoints_written: usize,
    pub total_attempts: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
}

impl DocumentStats {
    /// Fold a page result into the counters.
    pub fn record(&mut self, result: &PageResult) {
        if result.is_success() {
            self.extracted_pages += 1;
        } else {
            self.failed_pages += 1;
        }
        self.total_attempts += u64::from(result.attempts);
        self.total_input_tokens += result.input_tokens;
        self.total_output_tokens += result.output_tokens;
    }
}

/// Final status of one document in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Every page was extracted.
    Completed,
    /// A report was written but some pages carry failure annotations.
    CompletedWithErrors { failed_pages: usize },
    /// The document was aborted; no report was written.
    Failed { error: String },
    /// Cancellation was requested before the document finished.
    Cancelled,
}

impl DocumentStatus {
    /// A report exists for this document.
    pub fn has_report(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Completed | DocumentStatus::CompletedWithErrors { .. }
        )
    }
}

/// Everything the driver knows about one document after the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentOutcome {
    pub document_id: DocumentId,
    pub status: DocumentStatus,
    pub report: Option<Report>,
    pub report_path: Option<PathBuf>,
    /// Last checkpoint left on disk, if any (cancelled or aborted runs).
    pub checkpoint_path: Option<PathBuf>,
    pub stats: DocumentStats,
}

/// Result of a whole batch run, in input order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub documents: Vec<DocumentOutcome>,
    pub total_duration_ms: u64,
}

impl BatchOutcome {
    /// Reports in input order, skipping documents without one.
    pub fn reports(&self) -> impl Iterator<Item = &Report> {
        self.documents.iter().filter_map(|d| d.report.as_ref())
    }

    pub fn succeeded(&self) -> usize {
        self.documents
            .iter()
            .filter(|d| d.status.has_report())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.documents
            .iter()
            .filter(|d| matches!(d.status, DocumentStatus::Failed { .. }))
            .count()
    }

    pub fn was_cancelled(&self) -> bool {
        self.documents
            .iter()
            .any(|d| d.status == DocumentStatus::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(page: usize, ok: bool) -> PageResult {
        PageResult {
            document_id: DocumentId::new("doc"),
            page_index: page,
            outcome: if ok {
                PageOutcome::Extracted {
                    markdown: format!("page {page}"),
                }
            } else {
                PageOutcome::Failed {
                    error: PageError::Permanent {
                        page,
                        attempts: 1,
                        detail: "rejected".into(),
                    },
                }
            },
            completed_at: Utc::now(),
            duration_ms: 10,
            attempts: if ok { 2 } else { 1 },
            input_tokens: 100,
            output_tokens: 40,
        }
    }

    #[test]
    fn stats_fold_results() {
        let mut stats = DocumentStats::default();
        stats.record(&result(1, true));
        stats.record(&result(2, false));
        assert_eq!(stats.extracted_pages, 1);
        assert_eq!(stats.failed_pages, 1);
        assert_eq!(stats.total_attempts, 3);
        assert_eq!(stats.total_input_tokens, 200);
    }

    #[test]
    fn page_outcome_serialises_with_status_tag() {
        let json = serde_json::to_value(result(4, true)).unwrap();
        assert_eq!(json["outcome"]["status"], "extracted");
        assert_eq!(json["outcome"]["markdown"], "page 4");
    }

    #[test]
    fn accessors_match_outcome() {
        let ok = result(1, true);
        assert_eq!(ok.markdown(), Some("page 1"));
        assert!(ok.error().is_none());
        let failed = result(2, false);
        assert!(failed.markdown().is_none());
        assert!(failed.error().is_some());
    }
}
