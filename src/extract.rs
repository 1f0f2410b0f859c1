//! Per-document extraction: the pipeline state machine in motion.
//!
//! [`DocumentPipeline::process_document`] takes one document from
//! rasterisation to a written report:
//!
//! ```text
//! Loading     rasterise → PageTasks, optionally restore a checkpoint
//! Processing  for each page at the cursor: load image, extract with retry,
//!             record the PageResult, release the image
//! Checkpoint  every K recorded pages
//! Finalizing  assemble the report, write it, drop the checkpoint
//! ```
//!
//! With `concurrency > 1` up to that many pages are extracted at once, but
//! results come out of an ordered buffer, so recording, checkpoints and
//! progress events still happen strictly in page order.
//!
//! A page that cannot be extracted never aborts the document. Rasterisation,
//! checkpoint and report-write failures do.

use crate::config::BatchConfig;
use crate::document::{Document, DocumentId, PageTask};
use crate::error::{BatchError, PageError};
use crate::output::{
    DocumentOutcome, DocumentStats, DocumentStatus, PageOutcome, PageResult, Report,
};
use crate::pipeline::assemble::{assemble, finalize};
use crate::pipeline::checkpoint::CheckpointStore;
use crate::pipeline::encode::PageImage;
use crate::pipeline::inference::InferenceClient;
use crate::pipeline::retry::{extract_with_retry, RetryPolicy};
use crate::pipeline::source::PageSource;
use crate::pipeline::state::{BatchState, PipelineState};
use crate::progress::{BatchProgressCallback, NoopProgressCallback};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

static NOOP_PROGRESS: NoopProgressCallback = NoopProgressCallback;

/// Extracts documents one at a time with a fixed client, source and config.
pub struct DocumentPipeline<'a> {
    config: &'a BatchConfig,
    client: Arc<dyn InferenceClient>,
    source: Arc<dyn PageSource>,
    store: CheckpointStore,
    policy: RetryPolicy,
    checkpoint_interval: usize,
}

/// Bookkeeping that must survive an early return.
struct Tracker {
    state: PipelineState,
    stats: DocumentStats,
    checkpoint_path: Option<PathBuf>,
}

impl Tracker {
    fn advance(&mut self, next: PipelineState) -> Result<(), BatchError> {
        self.state = self.state.transition(next)?;
        debug!("Pipeline → {}", self.state);
        Ok(())
    }

    /// Move to `Aborted` from wherever the pipeline stopped.
    fn abort(&mut self) {
        self.state = self
            .state
            .transition(PipelineState::Aborted)
            .unwrap_or(PipelineState::Aborted);
    }
}

/// How the page loop ended.
enum Finished {
    Report { report: Report, path: PathBuf },
    Cancelled,
}

/// One page's trip through the worker.
enum PageRun {
    Done(PageResult),
    Cancelled,
}

impl<'a> DocumentPipeline<'a> {
    pub fn new(
        config: &'a BatchConfig,
        client: Arc<dyn InferenceClient>,
        source: Arc<dyn PageSource>,
    ) -> Self {
        Self {
            config,
            client,
            source,
            store: CheckpointStore::new(config.checkpoint_dir()),
            policy: RetryPolicy::from_config(config),
            checkpoint_interval: config.checkpoint_interval.max(1),
        }
    }

    fn progress(&self) -> &dyn BatchProgressCallback {
        match &self.config.progress_callback {
            Some(cb) => cb.as_ref(),
            None => &NOOP_PROGRESS,
        }
    }

    /// Take one document from rasterisation to a written report.
    ///
    /// Never fails: document-fatal errors come back as
    /// [`DocumentStatus::Failed`], cancellation as
    /// [`DocumentStatus::Cancelled`].
    pub async fn process_document(&self, document: &Document) -> DocumentOutcome {
        let started = Instant::now();
        let mut tracker = Tracker {
            state: PipelineState::Idle,
            stats: DocumentStats::default(),
            checkpoint_path: None,
        };

        let outcome = self.drive(document, &mut tracker).await;
        tracker.stats.total_duration_ms = started.elapsed().as_millis() as u64;

        let (status, report, report_path) = match outcome {
            Ok(Finished::Report { report, path }) => {
                let status = if report.has_failures() {
                    DocumentStatus::CompletedWithErrors {
                        failed_pages: report.failed_pages.len(),
                    }
                } else {
                    DocumentStatus::Completed
                };
                (status, Some(report), Some(path))
            }
            Ok(Finished::Cancelled) => {
                tracker.abort();
                warn!(
                    "{}: cancelled after {} pages",
                    document.id,
                    tracker.stats.extracted_pages + tracker.stats.failed_pages
                );
                (DocumentStatus::Cancelled, None, None)
            }
            Err(e) => {
                tracker.abort();
                error!("{}: aborted: {}", document.id, e);
                (
                    DocumentStatus::Failed {
                        error: e.to_string(),
                    },
                    None,
                    None,
                )
            }
        };

        DocumentOutcome {
            document_id: document.id.clone(),
            status,
            report,
            report_path,
            checkpoint_path: tracker.checkpoint_path,
            stats: tracker.stats,
        }
    }

    async fn drive(
        &self,
        document: &Document,
        tracker: &mut Tracker,
    ) -> Result<Finished, BatchError> {
        let id = &document.id;
        let source_label = document.input.to_string();
        info!("{}: processing {}", id, source_label);

        // ── Loading ──────────────────────────────────────────────────────
        tracker.advance(PipelineState::Loading)?;
        let (tasks, _scratch) = self.source.rasterize(document).await?.into_parts();
        let total_pages = tasks.len();
        if total_pages == 0 {
            return Err(BatchError::NoPages {
                document: id.to_string(),
            });
        }
        check_task_order(id, &tasks)?;
        tracker.stats.total_pages = total_pages;
        self.progress().on_document_start(id, total_pages);

        let mut state = self.initial_state(id, &source_label, total_pages).await?;
        for result in state.results() {
            tracker.stats.record(result);
        }
        tracker.stats.resumed_pages = state.recorded();
        if state.recorded() > 0 {
            tracker.checkpoint_path = Some(self.store.path_for(id));
            self.progress().on_resume(id, state.recorded());
            info!(
                "{}: resuming at page {}/{}",
                id,
                state.cursor(),
                total_pages
            );
        }

        // ── Processing / Checkpointing ──────────────────────────────────
        // Pacing is applied at dispatch: consecutive pages start at least
        // `inter_page_delay_ms` apart, whatever the concurrency.
        let remaining = tasks.into_iter().skip(state.recorded());
        let pages = stream::iter(remaining)
            .enumerate()
            .then(move |(i, task)| async move {
                let cancelled = i > 0 && self.pause_between_pages().await;
                (task, cancelled)
            })
            .map(move |(task, cancelled)| self.run_page(task, cancelled))
            .buffered(self.config.concurrency.max(1));
        let mut pages = std::pin::pin!(pages);

        while let Some(run) = pages.next().await {
            let result = match run {
                PageRun::Done(result) => result,
                PageRun::Cancelled => return Ok(Finished::Cancelled),
            };
            let page = result.page_index;
            let success = result.is_success();

            tracker.advance(PipelineState::Processing { page })?;
            tracker.stats.record(&result);
            state.record(result)?;
            self.progress()
                .on_page_complete(id, page, total_pages, success);

            if state.recorded() % self.checkpoint_interval == 0 {
                tracker.advance(PipelineState::Checkpointing { page })?;
                let handle = self
                    .store
                    .checkpoint(&state, &source_label, self.client.model())
                    .await?;
                tracker.stats.checkpoints_written += 1;
                tracker.checkpoint_path = Some(handle.path.clone());
                self.progress().on_checkpoint(id, &handle);
            }
        }

        if !state.is_complete() {
            return Err(BatchError::Internal(format!(
                "page loop for '{}' ended at cursor {} of {}",
                id,
                state.cursor(),
                total_pages
            )));
        }

        // ── Finalizing ──────────────────────────────────────────────────
        tracker.advance(PipelineState::Finalizing)?;
        let report = assemble(id, total_pages, state.results(), &self.config.page_marker)?;
        let path = finalize(&report, &self.config.output_dir).await?;

        if !self.config.keep_checkpoints {
            match self.store.remove(id).await {
                Ok(()) => tracker.checkpoint_path = None,
                Err(e) => warn!("{}: could not remove checkpoint: {}", id, e),
            }
        }
        tracker.advance(PipelineState::Idle)?;

        Ok(Finished::Report { report, path })
    }

    /// Fresh state, or the checkpointed one when resuming.
    async fn initial_state(
        &self,
        id: &DocumentId,
        source_label: &str,
        total_pages: usize,
    ) -> Result<BatchState, BatchError> {
        if !self.config.resume {
            return Ok(BatchState::new(id.clone(), total_pages));
        }
        match self.store.load(id).await? {
            Some(checkpoint) => {
                checkpoint.validate(id, source_label, total_pages)?;
                checkpoint.into_state()
            }
            None => Ok(BatchState::new(id.clone(), total_pages)),
        }
    }

    /// Extract one page. The image lives only inside this call.
    async fn run_page(&self, task: PageTask, cancelled: bool) -> PageRun {
        if cancelled || self.config.is_cancelled() {
            return PageRun::Cancelled;
        }

        let started = Instant::now();
        let page = task.page_index;
        let (outcome, attempts, input_tokens, output_tokens) = match PageImage::load(&task).await
        {
            Ok(image) => {
                let attempt = extract_with_retry(self.client.as_ref(), &image, &self.policy).await;
                drop(image);
                match attempt.result {
                    Ok(extraction) => (
                        PageOutcome::Extracted {
                            markdown: extraction.markdown,
                        },
                        attempt.attempts,
                        extraction.input_tokens,
                        extraction.output_tokens,
                    ),
                    Err(error) => (PageOutcome::Failed { error }, attempt.attempts, 0, 0),
                }
            }
            Err(e) => {
                warn!("Page {}: image unavailable: {}", page, e);
                let error = PageError::ImageUnavailable {
                    page,
                    detail: e.to_string(),
                };
                (PageOutcome::Failed { error }, 0, 0, 0)
            }
        };

        PageRun::Done(PageResult {
            document_id: task.document_id,
            page_index: page,
            outcome,
            completed_at: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
            attempts,
            input_tokens,
            output_tokens,
        })
    }

    /// Sleep for the inter-page delay. Returns `true` if cancellation was
    /// requested while waiting.
    async fn pause_between_pages(&self) -> bool {
        let delay = Duration::from_millis(self.config.inter_page_delay_ms);
        if delay.is_zero() {
            return false;
        }
        match &self.config.cancellation {
            Some(token) => tokio::select! {
                _ = token.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            },
            None => {
                tokio::time::sleep(delay).await;
                false
            }
        }
    }
}

/// Page tasks must be numbered `1..=N` in order and belong to `id`.
fn check_task_order(id: &DocumentId, tasks: &[PageTask]) -> Result<(), BatchError> {
    for (i, task) in tasks.iter().enumerate() {
        if task.page_index != i + 1 || &task.document_id != id {
            return Err(BatchError::OrderViolation {
                document: id.to_string(),
                expected: i + 1,
                got: task.page_index,
            });
        }
    }
    Ok(())
}
