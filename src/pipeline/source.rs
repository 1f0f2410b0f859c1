//! Page sources: turn a [`Document`] into an ordered set of [`PageTask`]s.
//!
//! [`PageSource`] is the seam between the pipeline and whatever produces
//! page images. The default [`Rasterizer`] renders PDFs with pdfium into a
//! per-document scratch directory and lists image directories as they are.
//! Tests and embedders can swap in their own source through
//! [`crate::config::BatchConfig::page_source`].

use crate::config::{BatchConfig, ImageFormat};
use crate::document::{Document, ImageHandle, PageTask};
use crate::error::BatchError;
use crate::pipeline::input::{resolve_input, ResolvedInput};
use crate::pipeline::render::{render_document, RenderSettings};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Produces the ordered page images of one document.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Rasterise (or list) every page of `document`, in page order.
    ///
    /// A failure here is fatal for the document, never for a single page.
    async fn rasterize(&self, document: &Document) -> Result<PageSet, BatchError>;
}

/// The pages of one document plus the scratch storage backing them.
///
/// Dropping the set (or the [`ScratchDir`] taken out of it) removes the
/// scratch images, so cleanup happens on every exit path.
pub struct PageSet {
    pub tasks: Vec<PageTask>,
    scratch: Option<ScratchDir>,
}

impl PageSet {
    /// Pages that live in caller-owned storage; nothing is removed on drop.
    pub fn new(tasks: Vec<PageTask>) -> Self {
        Self {
            tasks,
            scratch: None,
        }
    }

    /// Pages rendered into `scratch`, removed when the set is dropped.
    pub fn with_scratch(tasks: Vec<PageTask>, scratch: ScratchDir) -> Self {
        Self {
            tasks,
            scratch: Some(scratch),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn into_parts(self) -> (Vec<PageTask>, Option<ScratchDir>) {
        (self.tasks, self.scratch)
    }
}

/// A scratch directory removed on drop unless `keep` is set.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    keep: bool,
}

impl ScratchDir {
    pub fn new(path: PathBuf, keep: bool) -> Self {
        Self { path, keep }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Removed scratch images in {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", self.path.display(), e),
        }
    }
}

/// Default page source: pdfium for PDFs and URLs, directory listing for
/// image folders.
pub struct Rasterizer {
    settings: RenderSettings,
    target_dir: PathBuf,
    keep_images: bool,
    download_timeout_secs: u64,
}

impl Rasterizer {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            settings: RenderSettings {
                dpi: config.dpi,
                max_rendered_pixels: config.max_rendered_pixels,
                format: config.image_format,
                quality: config.image_quality,
                pdfium_library: config.pdfium_library.clone(),
            },
            target_dir: config.target_dir.clone(),
            keep_images: config.keep_images,
            download_timeout_secs: config.download_timeout_secs,
        }
    }

    async fn rasterize_pdf(
        &self,
        document: &Document,
        pdf_path: &Path,
    ) -> Result<PageSet, BatchError> {
        let scratch_path = self.target_dir.join(document.id.as_str());
        // Images left behind by an interrupted run would otherwise mix with
        // this run's pages.
        if scratch_path.exists() {
            tokio::fs::remove_dir_all(&scratch_path)
                .await
                .map_err(|e| BatchError::storage(&scratch_path, e))?;
        }
        tokio::fs::create_dir_all(&scratch_path)
            .await
            .map_err(|e| BatchError::storage(&scratch_path, e))?;
        let scratch = ScratchDir::new(scratch_path.clone(), self.keep_images);

        let rendered = render_document(
            pdf_path,
            &scratch_path,
            document.id.as_str(),
            &self.settings,
        )
        .await?;

        let tasks = rendered
            .into_iter()
            .map(|(page_index, path)| PageTask {
                document_id: document.id.clone(),
                page_index,
                image: ImageHandle {
                    path,
                    format: self.settings.format,
                },
            })
            .collect();

        Ok(PageSet::with_scratch(tasks, scratch))
    }
}

#[async_trait]
impl PageSource for Rasterizer {
    async fn rasterize(&self, document: &Document) -> Result<PageSet, BatchError> {
        let resolved = resolve_input(&document.input, self.download_timeout_secs).await?;

        let set = match &resolved {
            ResolvedInput::ImageDir(dir) => PageSet::new(list_page_images(document, dir).await?),
            ResolvedInput::Pdf(_) | ResolvedInput::Downloaded { .. } => {
                self.rasterize_pdf(document, resolved.path()).await?
            }
        };

        if set.is_empty() {
            return Err(BatchError::NoPages {
                document: document.id.to_string(),
            });
        }
        info!("{}: {} page images ready", document.id, set.len());
        Ok(set)
    }
}

/// List the images in `dir` as pages, in natural file-name order
/// (`page2.png` before `page10.png`).
pub async fn list_page_images(document: &Document, dir: &Path) -> Result<Vec<PageTask>, BatchError> {
    let list_err = |e: std::io::Error| BatchError::Rasterization {
        document: document.id.to_string(),
        detail: format!("cannot list {}: {e}", dir.display()),
    };

    let mut images: Vec<(String, PathBuf, ImageFormat)> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await.map_err(list_err)?;
    while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let format = path
            .extension()
            .and_then(|ext| ImageFormat::from_extension(&ext.to_string_lossy()));
        if let Some(format) = format {
            let name = entry.file_name().to_string_lossy().to_string();
            images.push((name, path, format));
        }
    }
    images.sort_by(|a, b| natural_cmp(&a.0, &b.0));

    Ok(images
        .into_iter()
        .enumerate()
        .map(|(i, (_, path, format))| PageTask {
            document_id: document.id.clone(),
            page_index: i + 1,
            image: ImageHandle { path, format },
        })
        .collect())
}

/// Compare strings treating runs of ASCII digits as numbers.
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let is_digit = |c: char| c.is_ascii_digit();
    let (mut a, mut b) = (a, b);
    loop {
        match (a.chars().next(), b.chars().next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) if is_digit(ca) && is_digit(cb) => {
                let na = a.len() - a.trim_start_matches(is_digit).len();
                let nb = b.len() - b.trim_start_matches(is_digit).len();
                let (da, rest_a) = a.split_at(na);
                let (db, rest_b) = b.split_at(nb);
                let (ta, tb) = (da.trim_start_matches('0'), db.trim_start_matches('0'));
                let ord = ta
                    .len()
                    .cmp(&tb.len())
                    .then_with(|| ta.cmp(tb))
                    .then_with(|| da.len().cmp(&db.len()));
                if ord != Ordering::Equal {
                    return ord;
                }
                a = rest_a;
                b = rest_b;
            }
            (Some(ca), Some(cb)) => {
                if ca != cb {
                    return ca.cmp(&cb);
                }
                a = &a[ca.len_utf8()..];
                b = &b[cb.len_utf8()..];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_order_handles_numbers() {
        let mut names = vec!["page10.png", "page2.png", "page1.png", "page02.png", "cover.png"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(
            names,
            vec!["cover.png", "page1.png", "page2.png", "page02.png", "page10.png"]
        );
    }

    #[tokio::test]
    async fn image_dir_lists_images_in_page_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["scan10.jpg", "scan2.png", "scan1.jpeg", "readme.txt"] {
            std::fs::write(dir.path().join(name), b"img").unwrap();
        }
        let doc = Document::image_dir(dir.path());

        let tasks = list_page_images(&doc, dir.path()).await.unwrap();
        let names: Vec<String> = tasks
            .iter()
            .map(|t| t.image.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["scan1.jpeg", "scan2.png", "scan10.jpg"]);
        assert_eq!(
            tasks.iter().map(|t| t.page_index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(tasks[1].image.format, ImageFormat::Png);
    }

    #[tokio::test]
    async fn empty_image_dir_is_no_pages() {
        let dir = tempfile::tempdir().unwrap();
        let config = BatchConfig::builder()
            .target_dir(dir.path().join("scratch"))
            .build()
            .unwrap();
        let source = Rasterizer::from_config(&config);
        let err = source
            .rasterize(&Document::image_dir(dir.path()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BatchError::NoPages { .. }));
    }

    #[test]
    fn scratch_dir_removed_on_drop_unless_kept() {
        let root = tempfile::tempdir().unwrap();
        let gone = root.path().join("gone");
        let kept = root.path().join("kept");
        std::fs::create_dir(&gone).unwrap();
        std::fs::create_dir(&kept).unwrap();
        std::fs::write(gone.join("p-0001.jpg"), b"x").unwrap();

        drop(ScratchDir::new(gone.clone(), false));
        drop(ScratchDir::new(kept.clone(), true));

        assert!(!gone.exists());
        assert!(kept.exists());
    }
}
