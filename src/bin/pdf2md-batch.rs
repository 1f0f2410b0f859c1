//! CLI binary for pdf2md-batch.
//!
//! A thin shim over the library crate that maps CLI flags to `BatchConfig`,
//! draws progress, wires Ctrl-C to cancellation and prints a summary.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use pdf2md_batch::{
    run, BatchConfig, BatchOutcome, BatchProgressCallback, CheckpointHandle, Document,
    DocumentId, DocumentStatus, ImageFormat, PageMarker, ProgressCallback, DEFAULT_MODEL,
};
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// Two bars: documents in the batch, and pages of the current document.
struct CliProgress {
    _multi: MultiProgress,
    batch: ProgressBar,
    pages: ProgressBar,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let multi = MultiProgress::new();

        let batch = multi.add(ProgressBar::new(0));
        batch.set_style(
            ProgressStyle::with_template("{prefix:.bold}  [{bar:30.cyan/238}] {pos}/{len} documents")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        batch.set_prefix("Batch");

        let pages = multi.add(ProgressBar::new(0));
        pages.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        pages.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            _multi: multi,
            batch,
            pages,
        })
    }
}

impl BatchProgressCallback for CliProgress {
    fn on_batch_start(&self, total_documents: usize) {
        self.batch.set_length(total_documents as u64);
    }

    fn on_document_start(&self, document: &DocumentId, total_pages: usize) {
        self.pages.reset();
        self.pages.set_length(total_pages as u64);
        self.pages.set_prefix(document.to_string());
        self.pages.set_message("");
    }

    fn on_resume(&self, _document: &DocumentId, restored_pages: usize) {
        self.pages.set_position(restored_pages as u64);
        self.pages
            .set_message(dim(&format!("resumed {restored_pages} pages")));
    }

    fn on_page_complete(&self, document: &DocumentId, page: usize, total_pages: usize, success: bool) {
        if !success {
            self.pages.println(format!(
                "  {} {} page {:>3}/{:<3} failed, annotated in report",
                red("✗"),
                document,
                page,
                total_pages
            ));
        }
        self.pages.inc(1);
    }

    fn on_checkpoint(&self, _document: &DocumentId, checkpoint: &CheckpointHandle) {
        self.pages
            .set_message(dim(&format!("checkpoint @ {}", checkpoint.revision)));
    }

    fn on_document_complete(&self, document: &DocumentId, status: &DocumentStatus) {
        let line = match status {
            DocumentStatus::Completed => format!("{} {}", green("✔"), document),
            DocumentStatus::CompletedWithErrors { failed_pages } => format!(
                "{} {}  ({} pages failed)",
                yellow("⚠"),
                document,
                failed_pages
            ),
            DocumentStatus::Failed { error } => {
                let first_line = error.lines().next().unwrap_or_default();
                format!("{} {}  {}", red("✘"), document, red(first_line))
            }
            DocumentStatus::Cancelled => format!("{} {}  cancelled", yellow("■"), document),
        };
        self.batch.println(line);
        self.batch.inc(1);
    }

    fn on_batch_complete(&self, _succeeded: usize, _failed: usize) {
        self.pages.finish_and_clear();
        self.batch.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Every PDF in ./data, reports in ./output
  pdf2md-batch

  # Specific files, a URL, and a folder of page scans
  pdf2md-batch report.pdf https://example.com/paper.pdf ./scans/invoice-2024

  # Use a hosted model instead of local Ollama
  pdf2md-batch --provider openai --model gpt-4.1-mini data/*.pdf

  # Resume an interrupted run from its checkpoints
  pdf2md-batch --resume

ENVIRONMENT VARIABLES:
  EDGEQUAKE_LLM_PROVIDER  Provider when --provider is not given (with EDGEQUAKE_MODEL)
  EDGEQUAKE_MODEL         Model ID
  OPENAI_API_KEY          OpenAI API key (and likewise for other providers)
  PDFIUM_LIB_PATH         Path to libpdfium
  RUST_LOG                Overrides the log filter chosen by -v / -q
"#;

/// Batch-convert PDFs to Markdown with a vision model, one call per page.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2md-batch",
    version,
    about = "Batch-convert PDFs to Markdown with a vision model, with checkpoints and retries",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files, http(s) URLs or directories of page images. When empty,
    /// every PDF in --source-dir is processed.
    inputs: Vec<String>,

    /// Directory scanned for PDFs when no inputs are given.
    #[arg(long, env = "PDF2MD_BATCH_SOURCE_DIR", default_value = "./data")]
    source_dir: PathBuf,

    /// Scratch directory for rasterised page images.
    #[arg(long, env = "PDF2MD_BATCH_TARGET_DIR", default_value = "./temp")]
    target_dir: PathBuf,

    /// Directory for the final reports.
    #[arg(short, long, env = "PDF2MD_BATCH_OUTPUT_DIR", default_value = "./output")]
    output_dir: PathBuf,

    /// Directory for checkpoints (default: <output-dir>/checkpoints).
    #[arg(long, env = "PDF2MD_BATCH_CHECKPOINT_DIR")]
    checkpoint_dir: Option<PathBuf>,

    /// Vision model ID.
    #[arg(long, env = "EDGEQUAKE_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// LLM provider: ollama, openai, anthropic, gemini, azure, …
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Page image format.
    #[arg(long, env = "PDF2MD_BATCH_FORMAT", value_enum, default_value = "jpeg")]
    format: FormatArg,

    /// JPEG quality (1–100).
    #[arg(long, env = "PDF2MD_BATCH_QUALITY", default_value_t = 75,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDF2MD_BATCH_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Cap on the longest edge of a rendered page, in pixels.
    #[arg(long, env = "PDF2MD_BATCH_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// Write a checkpoint every N recorded pages.
    #[arg(long, env = "PDF2MD_BATCH_CHECKPOINT_INTERVAL", default_value_t = 5)]
    checkpoint_interval: usize,

    /// Attempts per page, the first one included.
    #[arg(long, env = "PDF2MD_BATCH_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Pause between pages, in milliseconds.
    #[arg(long, env = "PDF2MD_BATCH_PAGE_DELAY_MS", default_value_t = 1000)]
    page_delay_ms: u64,

    /// Base wait before a retry, in milliseconds.
    #[arg(long, env = "PDF2MD_BATCH_RETRY_BACKOFF_MS", default_value_t = 500)]
    retry_backoff_ms: u64,

    /// Wait the same backoff before every retry instead of doubling it.
    #[arg(long, env = "PDF2MD_BATCH_FIXED_BACKOFF")]
    fixed_backoff: bool,

    /// Per-call model timeout in seconds.
    #[arg(long, env = "PDF2MD_BATCH_API_TIMEOUT", default_value_t = 300)]
    api_timeout: u64,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "PDF2MD_BATCH_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Max output tokens per page.
    #[arg(long, env = "PDF2MD_BATCH_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Text file with a custom extraction prompt.
    #[arg(long, env = "PDF2MD_BATCH_PROMPT")]
    prompt: Option<PathBuf>,

    /// Text file with a system prompt.
    #[arg(long, env = "PDF2MD_BATCH_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// How each page section is introduced in the report.
    #[arg(long, env = "PDF2MD_BATCH_PAGE_MARKER", value_enum, default_value = "heading")]
    page_marker: MarkerArg,

    /// Pages extracted at once within a document.
    #[arg(short, long, env = "PDF2MD_BATCH_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Continue documents from their checkpoints.
    #[arg(long, env = "PDF2MD_BATCH_RESUME")]
    resume: bool,

    /// Keep rasterised page images after each document.
    #[arg(long, env = "PDF2MD_BATCH_KEEP_IMAGES")]
    keep_images: bool,

    /// Keep checkpoints after the report is written.
    #[arg(long, env = "PDF2MD_BATCH_KEEP_CHECKPOINTS")]
    keep_checkpoints: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2MD_BATCH_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Path to libpdfium.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_library: Option<PathBuf>,

    /// Also write logs to this file.
    #[arg(long, env = "PDF2MD_BATCH_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Print the batch outcome as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bars.
    #[arg(long, env = "PDF2MD_BATCH_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum FormatArg {
    Jpeg,
    Png,
}

impl From<FormatArg> for ImageFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Jpeg => ImageFormat::Jpeg,
            FormatArg::Png => ImageFormat::Png,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum MarkerArg {
    Heading,
    Comment,
    Hr,
}

impl From<MarkerArg> for PageMarker {
    fn from(v: MarkerArg) -> Self {
        match v {
            MarkerArg::Heading => PageMarker::Heading,
            MarkerArg::Comment => PageMarker::Comment,
            MarkerArg::Hr => PageMarker::HorizontalRule,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs would fight with the progress bars; keep them to
    // warnings unless asked otherwise.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else if show_progress {
        "warn"
    } else {
        "info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_file {
        Some(ref path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_ansi(false)
                .with_writer(io::stderr.and(Mutex::new(file)))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .init();
        }
    }

    // ── Cancellation ─────────────────────────────────────────────────────
    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!(
                    "{}",
                    yellow("Stopping after the current page (Ctrl-C again to abort)…")
                );
                token.cancel();
                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(130);
                }
            }
        });
    }

    // ── Build config and document list ───────────────────────────────────
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgress::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress, token).await?;

    let documents = if cli.inputs.is_empty() {
        pdf2md_batch::discover_documents(&config.source_dir)
            .with_context(|| format!("Failed to list {}", config.source_dir.display()))?
    } else {
        cli.inputs.iter().map(|s| Document::from_input(s)).collect()
    };
    if documents.is_empty() {
        eprintln!("No documents to process.");
        return Ok(ExitCode::SUCCESS);
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let outcome = run(&documents, &config).await.context("Batch failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome).context("Failed to serialise outcome")?
        );
    } else if !cli.quiet {
        print_summary(&outcome);
    }

    Ok(if outcome.failed() > 0 {
        ExitCode::FAILURE
    } else if outcome.was_cancelled() {
        ExitCode::from(130)
    } else {
        ExitCode::SUCCESS
    })
}

fn print_summary(outcome: &BatchOutcome) {
    for doc in &outcome.documents {
        match (&doc.status, &doc.report_path) {
            (DocumentStatus::Completed, Some(path)) => {
                eprintln!("{} {}  →  {}", green("✔"), doc.document_id, bold(&path.display().to_string()))
            }
            (DocumentStatus::CompletedWithErrors { failed_pages }, Some(path)) => eprintln!(
                "{} {}  →  {}  ({}/{} pages failed)",
                yellow("⚠"),
                doc.document_id,
                bold(&path.display().to_string()),
                failed_pages,
                doc.stats.total_pages
            ),
            (DocumentStatus::Failed { error }, _) => {
                eprintln!("{} {}  {}", red("✘"), doc.document_id, red(error))
            }
            (DocumentStatus::Cancelled, _) => {
                let hint = doc
                    .checkpoint_path
                    .as_ref()
                    .map(|p| format!("  checkpoint: {}", p.display()))
                    .unwrap_or_default();
                eprintln!("{} {}  cancelled{}", yellow("■"), doc.document_id, dim(&hint))
            }
            (_, None) => eprintln!("{} {}", dim("?"), doc.document_id),
        }
    }

    let pages: usize = outcome.documents.iter().map(|d| d.stats.total_pages).sum();
    let input_tokens: u64 = outcome
        .documents
        .iter()
        .map(|d| d.stats.total_input_tokens)
        .sum();
    let output_tokens: u64 = outcome
        .documents
        .iter()
        .map(|d| d.stats.total_output_tokens)
        .sum();
    eprintln!(
        "{}/{} documents, {} pages, {}ms   {} tokens in  /  {} tokens out",
        outcome.succeeded(),
        outcome.documents.len(),
        pages,
        outcome.total_duration_ms,
        dim(&input_tokens.to_string()),
        dim(&output_tokens.to_string()),
    );
}

/// Map CLI args to `BatchConfig`.
async fn build_config(
    cli: &Cli,
    progress: Option<ProgressCallback>,
    token: CancellationToken,
) -> Result<BatchConfig> {
    let mut builder = BatchConfig::builder()
        .source_dir(&cli.source_dir)
        .target_dir(&cli.target_dir)
        .output_dir(&cli.output_dir)
        .model(cli.model.clone())
        .image_format(cli.format.clone().into())
        .image_quality(cli.quality)
        .dpi(cli.dpi)
        .max_rendered_pixels(cli.max_pixels)
        .checkpoint_interval(cli.checkpoint_interval)
        .max_attempts(cli.max_attempts)
        .inter_page_delay_ms(cli.page_delay_ms)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .exponential_backoff(!cli.fixed_backoff)
        .api_timeout_secs(cli.api_timeout)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .page_marker(cli.page_marker.clone().into())
        .concurrency(cli.concurrency)
        .resume(cli.resume)
        .keep_images(cli.keep_images)
        .keep_checkpoints(cli.keep_checkpoints)
        .download_timeout_secs(cli.download_timeout)
        .cancellation(token);

    if let Some(ref dir) = cli.checkpoint_dir {
        builder = builder.checkpoint_dir(dir);
    }
    if let Some(ref name) = cli.provider {
        builder = builder.provider_name(name.clone());
    }
    if let Some(ref path) = cli.pdfium_library {
        builder = builder.pdfium_library(path);
    }
    if let Some(ref path) = cli.prompt {
        builder = builder.prompt(read_text(path).await?);
    }
    if let Some(ref path) = cli.system_prompt {
        builder = builder.system_prompt(read_text(path).await?);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn read_text(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}
