//! Scoped page-image acquisition: image file → base64 `ImageData`.
//!
//! A [`PageImage`] is the only place page pixels live in memory. The
//! pipeline loads it right before the first attempt on a page, hands it to
//! every retry of that page, and drops it as soon as the page result is
//! recorded. Because release is tied to `Drop`, it happens on success,
//! permanent failure and cancellation alike.

use crate::config::ImageFormat;
use crate::document::PageTask;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use tracing::debug;

/// One page image held in memory for one attempt cycle.
pub struct PageImage {
    page_index: usize,
    data: ImageData,
    raw_len: usize,
}

impl PageImage {
    /// Read the page's image file and encode it for the model.
    pub async fn load(task: &PageTask) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(&task.image.path).await?;
        Ok(Self::from_bytes(task.page_index, &bytes, task.image.format))
    }

    /// Encode raw image bytes.
    ///
    /// `detail: "high"` asks GPT-class models for full-resolution tiling;
    /// providers that do not know the hint ignore it.
    pub fn from_bytes(page_index: usize, bytes: &[u8], format: ImageFormat) -> Self {
        let b64 = STANDARD.encode(bytes);
        debug!(
            "Page {}: loaded {} bytes → {} bytes base64",
            page_index,
            bytes.len(),
            b64.len()
        );
        Self {
            page_index,
            data: ImageData::new(b64, format.mime_type()).with_detail("high"),
            raw_len: bytes.len(),
        }
    }

    pub fn page_index(&self) -> usize {
        self.page_index
    }

    pub fn data(&self) -> &ImageData {
        &self.data
    }

    /// Size of the image file before encoding.
    pub fn raw_len(&self) -> usize {
        self.raw_len
    }
}

impl Drop for PageImage {
    fn drop(&mut self) {
        debug!("Page {}: released image ({} bytes)", self.page_index, self.raw_len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentId, ImageHandle};

    #[test]
    fn encodes_bytes_as_base64_with_mime() {
        let img = PageImage::from_bytes(4, b"\x89PNG fake", ImageFormat::Png);
        assert_eq!(img.page_index(), 4);
        assert_eq!(img.raw_len(), 9);
        assert_eq!(img.data().mime_type, "image/png");
        let decoded = STANDARD.decode(&img.data().data).expect("valid base64");
        assert_eq!(decoded, b"\x89PNG fake");
    }

    #[tokio::test]
    async fn load_reads_task_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc-0002.jpg");
        std::fs::write(&path, b"jpeg-bytes").unwrap();
        let task = PageTask {
            document_id: DocumentId::new("doc"),
            page_index: 2,
            image: ImageHandle {
                path,
                format: ImageFormat::Jpeg,
            },
        };

        let img = PageImage::load(&task).await.unwrap();
        assert_eq!(img.page_index(), 2);
        assert_eq!(img.data().mime_type, "image/jpeg");
    }

    #[tokio::test]
    async fn load_missing_file_fails() {
        let task = PageTask {
            document_id: DocumentId::new("doc"),
            page_index: 1,
            image: ImageHandle {
                path: "/no/such/image.jpg".into(),
                format: ImageFormat::Jpeg,
            },
        };
        assert!(PageImage::load(&task).await.is_err());
    }
}
