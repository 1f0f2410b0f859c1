//! # pdf2md-batch
//!
//! Batch-convert PDFs to Markdown with a vision model, one call per page.
//!
//! Each page is rasterised to an image, sent to a vision-language model
//! (a local Ollama model by default, or any provider `edgequake-llm`
//! supports) and the answers are stitched back together into one report per
//! document. Long batches are made safe to interrupt: every few pages the
//! results so far are checkpointed, transient model failures are retried,
//! and a page that cannot be extracted is annotated in place instead of
//! aborting its document.
//!
//! ## Pipeline Overview
//!
//! ```text
//! documents
//!  │
//!  └─ for each document (one at a time)
//!      ├─ 1. Load        resolve input, rasterise pages via pdfium
//!      ├─ 2. Process     per page: load image → model call (retry) → record
//!      ├─ 3. Checkpoint  every K recorded pages
//!      └─ 4. Finalize    ordered report with page markers → output_dir
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2md_batch::{discover_documents, run, BatchConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BatchConfig::builder()
//!         .source_dir("./data")
//!         .output_dir("./output")
//!         .checkpoint_interval(5)
//!         .build()?;
//!     let documents = discover_documents(&config.source_dir)?;
//!     let outcome = run(&documents, &config).await?;
//!     eprintln!("{} ok, {} failed", outcome.succeeded(), outcome.failed());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2md-batch` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdf2md-batch = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod document;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{resolve_client, run, run_source_dir, run_sync};
pub use config::{BatchConfig, BatchConfigBuilder, ImageFormat, PageMarker, DEFAULT_MODEL};
pub use document::{discover_documents, Document, DocumentId, DocumentInput, ImageHandle, PageTask};
pub use error::{BatchError, InferenceError, PageError};
pub use extract::DocumentPipeline;
pub use output::{
    BatchOutcome, DocumentOutcome, DocumentStats, DocumentStatus, PageOutcome, PageResult, Report,
};
pub use pipeline::assemble::{assemble, finalize};
pub use pipeline::checkpoint::{Checkpoint, CheckpointHandle, CheckpointStore};
pub use pipeline::encode::PageImage;
pub use pipeline::inference::{Extraction, InferenceClient, VlmClient};
pub use pipeline::retry::RetryPolicy;
pub use pipeline::source::{PageSet, PageSource, Rasterizer, ScratchDir};
pub use pipeline::state::{BatchState, PipelineState};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
