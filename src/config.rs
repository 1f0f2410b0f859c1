//! Configuration for a batch extraction run.
//!
//! Every knob lives in [`BatchConfig`], built via [`BatchConfigBuilder`].
//! The config is passed explicitly into [`crate::batch::run`]; nothing is
//! read from process-wide mutable state once a run has started.

use crate::error::BatchError;
use crate::pipeline::inference::InferenceClient;
use crate::pipeline::source::PageSource;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "llama3.2-vision:11b-instruct-q8_0";

/// Configuration for a batch run.
///
/// # Example
/// ```rust
/// use pdf2md_batch::{BatchConfig, ImageFormat};
///
/// let config = BatchConfig::builder()
///     .output_dir("./reports")
///     .image_format(ImageFormat::Png)
///     .checkpoint_interval(10)
///     .max_attempts(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.checkpoint_interval, 10);
/// ```
#[derive(Clone)]
pub struct BatchConfig {
    /// Directory scanned for `*.pdf` by [`crate::document::discover_documents`].
    pub source_dir: PathBuf,

    /// Scratch directory for rasterised page images. Each document gets its
    /// own sub-directory, removed when the document finishes unless
    /// `keep_images` is set.
    pub target_dir: PathBuf,

    /// Directory for final reports.
    pub output_dir: PathBuf,

    /// Directory for checkpoints. Defaults to `<output_dir>/checkpoints`.
    pub checkpoint_dir: Option<PathBuf>,

    /// Vision model identifier.
    pub model: String,

    /// Provider name (e.g. "ollama", "openai"). If None, see
    /// [`crate::batch`] for the resolution order.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed inference client. Takes precedence over `provider`.
    pub inference: Option<Arc<dyn InferenceClient>>,

    /// Pre-constructed page source. Defaults to the pdfium [`crate::pipeline::source::Rasterizer`].
    pub page_source: Option<Arc<dyn PageSource>>,

    /// File format of rasterised pages. Default: JPEG.
    pub image_format: ImageFormat,

    /// JPEG quality, 1–100. Default: 75. Ignored for PNG.
    pub image_quality: u8,

    /// Rendering DPI. Range: 72–400. Default: 200.
    pub dpi: u32,

    /// Cap on the longest rendered edge in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Write a checkpoint every this many recorded pages. Default: 5.
    ///
    /// A crash loses at most `checkpoint_interval - 1` completed pages.
    pub checkpoint_interval: usize,

    /// Total inference attempts per page, first try included. Default: 3.
    pub max_attempts: u32,

    /// Pause before each page after the first, in milliseconds. Default: 1000.
    ///
    /// Gives a local inference backend room to release memory between
    /// pages. Not needed for correctness; set to 0 for hosted APIs.
    pub inter_page_delay_ms: u64,

    /// Delay before the second attempt of a page, in milliseconds. Default: 500.
    pub retry_backoff_ms: u64,

    /// Double the retry delay after every failed attempt. Default: true.
    pub exponential_backoff: bool,

    /// Per-call inference timeout in seconds. Default: 300.
    ///
    /// Local vision models on CPU can take minutes per dense page.
    pub api_timeout_secs: u64,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens generated per page. Default: 4096.
    pub max_tokens: usize,

    /// User instruction sent with each page image. If None, uses
    /// [`crate::prompts::DEFAULT_EXTRACTION_PROMPT`].
    pub prompt: Option<String>,

    /// Optional system message sent before the page.
    pub system_prompt: Option<String>,

    /// How each page-section is introduced in the report. Default: heading.
    pub page_marker: PageMarker,

    /// Pages of one document in flight at once. Default: 1 (sequential).
    pub concurrency: usize,

    /// Continue a document from its checkpoint if one exists. Default: false.
    pub resume: bool,

    /// Keep rasterised images after a document finishes. Default: false.
    pub keep_images: bool,

    /// Keep the checkpoint after the final report is written. Default: false.
    pub keep_checkpoints: bool,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Explicit libpdfium path. Falls back to `PDFIUM_LIB_PATH`, the working
    /// directory, then the system library.
    pub pdfium_library: Option<PathBuf>,

    /// Progress events for the presentation layer.
    pub progress_callback: Option<ProgressCallback>,

    /// Cooperative cancellation, checked between page attempts.
    pub cancellation: Option<CancellationToken>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("./data"),
            target_dir: PathBuf::from("./temp"),
            output_dir: PathBuf::from("./output"),
            checkpoint_dir: None,
            model: DEFAULT_MODEL.to_string(),
            provider_name: None,
            provider: None,
            inference: None,
            page_source: None,
            image_format: ImageFormat::default(),
            image_quality: 75,
            dpi: 200,
            max_rendered_pixels: 2000,
            checkpoint_interval: 5,
            max_attempts: 3,
            inter_page_delay_ms: 1000,
            retry_backoff_ms: 500,
            exponential_backoff: true,
            api_timeout_secs: 300,
            temperature: 0.1,
            max_tokens: 4096,
            prompt: None,
            system_prompt: None,
            page_marker: PageMarker::default(),
            concurrency: 1,
            resume: false,
            keep_images: false,
            keep_checkpoints: false,
            download_timeout_secs: 120,
            pdfium_library: None,
            progress_callback: None,
            cancellation: None,
        }
    }
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("source_dir", &self.source_dir)
            .field("target_dir", &self.target_dir)
            .field("output_dir", &self.output_dir)
            .field("checkpoint_dir", &self.checkpoint_dir)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("inference", &self.inference.as_ref().map(|_| "<dyn InferenceClient>"))
            .field("page_source", &self.page_source.as_ref().map(|_| "<dyn PageSource>"))
            .field("image_format", &self.image_format)
            .field("image_quality", &self.image_quality)
            .field("dpi", &self.dpi)
            .field("checkpoint_interval", &self.checkpoint_interval)
            .field("max_attempts", &self.max_attempts)
            .field("inter_page_delay_ms", &self.inter_page_delay_ms)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("exponential_backoff", &self.exponential_backoff)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("page_marker", &self.page_marker)
            .field("concurrency", &self.concurrency)
            .field("resume", &self.resume)
            .field("keep_images", &self.keep_images)
            .field("keep_checkpoints", &self.keep_checkpoints)
            .finish()
    }
}

impl BatchConfig {
    /// Create a new builder for `BatchConfig`.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }

    /// Directory checkpoints are written to.
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.checkpoint_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join("checkpoints"))
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn source_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.source_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn target_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.target_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn output_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.output_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn checkpoint_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.checkpoint_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn inference(mut self, client: Arc<dyn InferenceClient>) -> Self {
        self.config.inference = Some(client);
        self
    }

    pub fn page_source(mut self, source: Arc<dyn PageSource>) -> Self {
        self.config.page_source = Some(source);
        self
    }

    pub fn image_format(mut self, format: ImageFormat) -> Self {
        self.config.image_format = format;
        self
    }

    pub fn image_quality(mut self, quality: u8) -> Self {
        self.config.image_quality = quality.clamp(1, 100);
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn checkpoint_interval(mut self, pages: usize) -> Self {
        self.config.checkpoint_interval = pages;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn inter_page_delay_ms(mut self, ms: u64) -> Self {
        self.config.inter_page_delay_ms = ms;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn exponential_backoff(mut self, v: bool) -> Self {
        self.config.exponential_backoff = v;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn page_marker(mut self, marker: PageMarker) -> Self {
        self.config.page_marker = marker;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn resume(mut self, v: bool) -> Self {
        self.config.resume = v;
        self
    }

    pub fn keep_images(mut self, v: bool) -> Self {
        self.config.keep_images = v;
        self
    }

    pub fn keep_checkpoints(mut self, v: bool) -> Self {
        self.config.keep_checkpoints = v;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn pdfium_library(mut self, path: impl AsRef<Path>) -> Self {
        self.config.pdfium_library = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.config.cancellation = Some(token);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BatchConfig, BatchError> {
        let c = &self.config;
        if c.checkpoint_interval == 0 {
            return Err(BatchError::InvalidConfig(
                "Checkpoint interval must be ≥ 1 page".into(),
            ));
        }
        if c.max_attempts == 0 {
            return Err(BatchError::InvalidConfig(
                "Max attempts must be ≥ 1".into(),
            ));
        }
        if c.concurrency == 0 {
            return Err(BatchError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.model.trim().is_empty() {
            return Err(BatchError::InvalidConfig("Model must not be empty".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(BatchError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// File format used for rasterised pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImageFormat {
    /// Lossy, small; quality is controlled by `image_quality`. (default)
    #[default]
    Jpeg,
    /// Lossless, larger.
    Png,
}

impl ImageFormat {
    /// File extension without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
        }
    }

    /// MIME type sent to the model.
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }

    /// Infer the format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "png" => Some(ImageFormat::Png),
            _ => None,
        }
    }
}

/// How each page-section of a report is introduced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageMarker {
    /// `## Page N of M` (default)
    #[default]
    Heading,
    /// `<!-- page N of M -->`
    Comment,
    /// `---` followed by `**Page N of M**`
    HorizontalRule,
}

impl PageMarker {
    /// Render the marker line(s) for the given 1-indexed page.
    pub fn render(&self, page: usize, total: usize) -> String {
        match self {
            PageMarker::Heading => format!("## Page {page} of {total}"),
            PageMarker::Comment => format!("<!-- page {page} of {total} -->"),
            PageMarker::HorizontalRule => format!("---\n\n**Page {page} of {total}**"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_documented_values() {
        let c = BatchConfig::default();
        assert_eq!(c.checkpoint_interval, 5);
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.inter_page_delay_ms, 1000);
        assert_eq!(c.image_format, ImageFormat::Jpeg);
        assert_eq!(c.model, DEFAULT_MODEL);
        assert_eq!(c.checkpoint_dir(), PathBuf::from("./output/checkpoints"));
    }

    #[test]
    fn build_rejects_zero_interval_and_attempts() {
        assert!(BatchConfig::builder().checkpoint_interval(0).build().is_err());
        assert!(BatchConfig::builder().max_attempts(0).build().is_err());
        assert!(BatchConfig::builder().concurrency(0).build().is_err());
        assert!(BatchConfig::builder().model("  ").build().is_err());
    }

    #[test]
    fn builder_clamps_ranges() {
        let c = BatchConfig::builder()
            .dpi(1000)
            .image_quality(0)
            .build()
            .unwrap();
        assert_eq!(c.dpi, 400);
        assert_eq!(c.image_quality, 1);
    }

    #[test]
    fn page_marker_contains_page_number() {
        assert_eq!(PageMarker::Heading.render(3, 10), "## Page 3 of 10");
        assert_eq!(PageMarker::Comment.render(1, 2), "<!-- page 1 of 2 -->");
        assert!(PageMarker::HorizontalRule.render(7, 9).contains("Page 7 of 9"));
    }

    #[test]
    fn image_format_from_extension() {
        assert_eq!(ImageFormat::from_extension("JPEG"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_extension("png"), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::from_extension("tiff"), None);
    }

    #[test]
    fn cancellation_is_observed() {
        let token = CancellationToken::new();
        let c = BatchConfig::builder()
            .cancellation(token.clone())
            .build()
            .unwrap();
        assert!(!c.is_cancelled());
        token.cancel();
        assert!(c.is_cancelled());
    }
}
