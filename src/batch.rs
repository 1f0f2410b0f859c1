//! Batch driver: run the pipeline over many documents, one at a time.
//!
//! A document that fails (rasterisation, storage, checkpoint mismatch) is
//! recorded as failed and the driver moves on; only setup errors such as an
//! unusable provider fail the run itself. Cancellation is checked before
//! each document and, inside the pipeline, before each page.

use crate::config::BatchConfig;
use crate::document::{discover_documents, Document};
use crate::error::BatchError;
use crate::extract::DocumentPipeline;
use crate::output::{BatchOutcome, DocumentOutcome, DocumentStats, DocumentStatus};
use crate::pipeline::inference::{InferenceClient, VlmClient};
use crate::pipeline::source::{PageSource, Rasterizer};
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Extract every document in order and write one report per document.
///
/// # Returns
/// One [`DocumentOutcome`] per input document, in input order, even when
/// some of them failed.
///
/// # Errors
/// Only setup failures: the inference client could not be built.
///
/// # Example
/// ```rust,no_run
/// use pdf2md_batch::{run, BatchConfig, Document};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = BatchConfig::builder().output_dir("./output").build()?;
/// let docs = vec![Document::pdf("a.pdf"), Document::pdf("b.pdf")];
/// let outcome = run(&docs, &config).await?;
/// for doc in &outcome.documents {
///     println!("{}: {:?}", doc.document_id, doc.status);
/// }
/// # Ok(())
/// # }
/// ```
pub async fn run(documents: &[Document], config: &BatchConfig) -> Result<BatchOutcome, BatchError> {
    let started = Instant::now();
    let client = resolve_client(config)?;
    let source = resolve_source(config);
    let pipeline = DocumentPipeline::new(config, client, source);

    info!("Starting batch of {} documents", documents.len());
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(documents.len());
    }

    let mut seen = HashSet::with_capacity(documents.len());
    let mut outcomes = Vec::with_capacity(documents.len());

    for document in documents {
        let outcome = if config.is_cancelled() {
            not_started(document, DocumentStatus::Cancelled)
        } else if !seen.insert(document.id.clone()) {
            let e = BatchError::DuplicateDocument {
                id: document.id.to_string(),
            };
            error!("{}", e);
            not_started(
                document,
                DocumentStatus::Failed {
                    error: e.to_string(),
                },
            )
        } else {
            pipeline.process_document(document).await
        };

        if let Some(ref cb) = config.progress_callback {
            cb.on_document_complete(&outcome.document_id, &outcome.status);
        }
        outcomes.push(outcome);
    }

    let batch = BatchOutcome {
        documents: outcomes,
        total_duration_ms: started.elapsed().as_millis() as u64,
    };

    if batch.was_cancelled() {
        warn!("Batch cancelled");
    }
    info!(
        "Batch complete: {} succeeded, {} failed, {}ms",
        batch.succeeded(),
        batch.failed(),
        batch.total_duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(batch.succeeded(), batch.failed());
    }

    Ok(batch)
}

/// Discover the PDFs in `config.source_dir` and run them as one batch.
pub async fn run_source_dir(config: &BatchConfig) -> Result<BatchOutcome, BatchError> {
    let documents = discover_documents(&config.source_dir)?;
    if documents.is_empty() {
        warn!("No PDF files found in {}", config.source_dir.display());
    }
    run(&documents, config).await
}

/// Synchronous wrapper around [`run`].
///
/// Creates a temporary tokio runtime internally.
pub fn run_sync(documents: &[Document], config: &BatchConfig) -> Result<BatchOutcome, BatchError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| BatchError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(run(documents, config))
}

fn not_started(document: &Document, status: DocumentStatus) -> DocumentOutcome {
    DocumentOutcome {
        document_id: document.id.clone(),
        status,
        report: None,
        report_path: None,
        checkpoint_path: None,
        stats: DocumentStats::default(),
    }
}

// ── Client and source resolution ─────────────────────────────────────────

/// The inference client for this run: a pre-built client, or a
/// [`VlmClient`] over the resolved provider.
pub fn resolve_client(config: &BatchConfig) -> Result<Arc<dyn InferenceClient>, BatchError> {
    if let Some(ref client) = config.inference {
        return Ok(Arc::clone(client));
    }
    let provider = resolve_provider(config)?;
    info!(
        "Using provider '{}' with model '{}'",
        config.provider_name.as_deref().unwrap_or("auto"),
        config.model
    );
    Ok(Arc::new(VlmClient::new(provider, config)))
}

fn resolve_source(config: &BatchConfig) -> Arc<dyn PageSource> {
    match config.page_source {
        Some(ref source) => Arc::clone(source),
        None => Arc::new(Rasterizer::from_config(config)),
    }
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. `config.provider`, used as-is
/// 2. `config.provider_name` with `config.model`
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set
/// 4. a local Ollama server with `config.model`
fn resolve_provider(config: &BatchConfig) -> Result<Arc<dyn LLMProvider>, BatchError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, &config.model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    create_vision_provider("ollama", &config.model)
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, BatchError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        BatchError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}
