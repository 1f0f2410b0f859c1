//! Input resolution: turn a [`DocumentInput`] into something on local disk.
//!
//! pdfium needs a file-system path, so URL inputs are downloaded into a
//! `TempDir` that is removed when the [`ResolvedInput`] is dropped. Local
//! PDFs are checked for the `%PDF` magic bytes up front so a stray file in
//! the source directory fails with a clear error instead of a pdfium one.

use crate::document::DocumentInput;
use crate::error::BatchError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// A document input that is ready to be read from local disk.
pub enum ResolvedInput {
    /// A local PDF file.
    Pdf(PathBuf),
    /// A PDF downloaded to a temp directory, kept alive with the value.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
    /// A directory of page images.
    ImageDir(PathBuf),
}

impl ResolvedInput {
    /// Path to the PDF file or image directory.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Pdf(p) | ResolvedInput::ImageDir(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a document input, downloading it first when it is a URL.
pub async fn resolve_input(
    input: &DocumentInput,
    download_timeout_secs: u64,
) -> Result<ResolvedInput, BatchError> {
    match input {
        DocumentInput::Pdf(path) => resolve_local_pdf(path),
        DocumentInput::Url(url) => download_url(url, download_timeout_secs).await,
        DocumentInput::ImageDir(path) => {
            if !path.is_dir() {
                return Err(BatchError::FileNotFound { path: path.clone() });
            }
            Ok(ResolvedInput::ImageDir(path.clone()))
        }
    }
}

/// Validate existence, readability and PDF magic bytes.
fn resolve_local_pdf(path: &Path) -> Result<ResolvedInput, BatchError> {
    let path = path.to_path_buf();
    if !path.exists() {
        return Err(BatchError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                return Err(BatchError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(BatchError::PermissionDenied { path });
        }
        Err(_) => return Err(BatchError::FileNotFound { path }),
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Pdf(path))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, BatchError> {
    info!("Downloading PDF from: {}", url);
    let failed = |reason: String| BatchError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            failed(format!("timed out after {timeout_secs}s"))
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;

    let temp_dir = TempDir::new().map_err(|e| BatchError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join("downloaded.pdf");

    if bytes.len() >= 4 && &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        return Err(BatchError::NotAPdf {
            path: file_path,
            magic,
        });
    }

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| BatchError::storage(&file_path, e))?;

    info!("Downloaded {} bytes to {}", bytes.len(), file_path.display());
    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[tokio::test]
    async fn local_pdf_magic_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.pdf");
        let bad = dir.path().join("bad.pdf");
        std::fs::write(&good, b"%PDF-1.4\n").unwrap();
        std::fs::write(&bad, b"PK\x03\x04zip").unwrap();

        let resolved = resolve_input(&DocumentInput::Pdf(good.clone()), 5).await.unwrap();
        assert_eq!(resolved.path(), good.as_path());
        assert!(matches!(resolved, ResolvedInput::Pdf(_)));

        let err = resolve_input(&DocumentInput::Pdf(bad), 5).await.err().unwrap();
        assert!(matches!(err, BatchError::NotAPdf { magic, .. } if &magic == b"PK\x03\x04"));
    }

    #[tokio::test]
    async fn missing_inputs_are_not_found() {
        let err = resolve_input(&DocumentInput::Pdf("/no/such.pdf".into()), 5)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BatchError::FileNotFound { .. }));

        let err = resolve_input(&DocumentInput::ImageDir("/no/such/dir".into()), 5)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BatchError::FileNotFound { .. }));
    }
}
