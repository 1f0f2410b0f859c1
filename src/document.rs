//! Documents and the page tasks they are split into.
//!
//! A [`Document`] names one source (a PDF file, a PDF URL, or a directory of
//! already-rasterised page images) under a stable [`DocumentId`]. The id is
//! what checkpoints and reports are keyed on, so it is derived from the file
//! name and sanitised to something safe to use as a file name.
//!
//! A [`PageTask`] is one unit of work: a page index plus a handle to the
//! page image on disk. Tasks are created by a
//! [`crate::pipeline::source::PageSource`] and moved into the pipeline, which
//! consumes each exactly once.

use crate::config::ImageFormat;
use crate::error::BatchError;
use crate::pipeline::input::is_url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stable, filesystem-safe identifier of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    /// Build an id from an arbitrary name, replacing anything that is not
    /// alphanumeric, `-`, `_` or `.` with `_`.
    pub fn new(name: &str) -> Self {
        let cleaned: String = name
            .trim()
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let cleaned = cleaned.trim_matches('.').to_string();
        if cleaned.is_empty() {
            DocumentId("document".to_string())
        } else {
            DocumentId(cleaned)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a document's pages come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentInput {
    /// A local PDF file, rasterised with pdfium.
    Pdf(PathBuf),
    /// A PDF behind an HTTP/HTTPS URL, downloaded before rasterising.
    Url(String),
    /// A directory of page images (`.png`, `.jpg`, `.jpeg`), used as-is.
    ImageDir(PathBuf),
}

impl fmt::Display for DocumentInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentInput::Pdf(p) | DocumentInput::ImageDir(p) => write!(f, "{}", p.display()),
            DocumentInput::Url(u) => f.write_str(u),
        }
    }
}

/// One source document in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: DocumentId,
    pub input: DocumentInput,
}

impl Document {
    /// A local PDF; the id is the file stem.
    pub fn pdf(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let id = DocumentId::new(&stem_of(&path));
        Self {
            id,
            input: DocumentInput::Pdf(path),
        }
    }

    /// A directory of page images; the id is the directory name.
    pub fn image_dir(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            id: DocumentId::new(&name),
            input: DocumentInput::ImageDir(path),
        }
    }

    /// A PDF URL; the id is the last path segment without extension.
    pub fn url(url: impl Into<String>) -> Self {
        let url = url.into();
        let last = url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            id: DocumentId::new(&stem_of(Path::new(&last))),
            input: DocumentInput::Url(url),
        }
    }

    /// Classify a user-supplied string: URL, directory, or PDF file.
    pub fn from_input(input: &str) -> Self {
        if is_url(input) {
            Self::url(input)
        } else if Path::new(input).is_dir() {
            Self::image_dir(input)
        } else {
            Self::pdf(input)
        }
    }
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// A page image on durable storage, loaded only while its page is being
/// extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHandle {
    pub path: PathBuf,
    pub format: ImageFormat,
}

/// One page of one document, ready for extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTask {
    pub document_id: DocumentId,
    /// 1-indexed page number.
    pub page_index: usize,
    pub image: ImageHandle,
}

/// List the PDFs in `dir`, sorted by file name.
///
/// Only regular files whose extension is `pdf` (any case) are returned.
pub fn discover_documents(dir: &Path) -> Result<Vec<Document>, BatchError> {
    let entries = std::fs::read_dir(dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => BatchError::FileNotFound {
            path: dir.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => BatchError::PermissionDenied {
            path: dir.to_path_buf(),
        },
        _ => BatchError::Internal(format!("Failed to list {}: {e}", dir.display())),
    })?;

    let mut pdfs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .collect();
    pdfs.sort();

    debug!("Discovered {} PDFs in {}", pdfs.len(), dir.display());
    Ok(pdfs.into_iter().map(Document::pdf).collect())
}
