//! PDF rasterisation: render every page to an image file via pdfium.
//!
//! pdfium is not async-safe, so the whole document is rendered inside
//! `tokio::task::spawn_blocking`. Pages are written to disk one at a time
//! and each bitmap is dropped before the next page is rendered, so peak
//! memory is one page regardless of document length.

use crate::config::ImageFormat;
use crate::error::BatchError;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Rendering knobs taken from [`crate::config::BatchConfig`].
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub dpi: u32,
    pub max_rendered_pixels: u32,
    pub format: ImageFormat,
    pub quality: u8,
    pub pdfium_library: Option<PathBuf>,
}

/// Rasterise every page of `pdf_path` into `out_dir`.
///
/// Files are named `<prefix>-0001.jpg`, `<prefix>-0002.jpg`, … so a plain
/// directory listing is already in page order.
///
/// # Returns
/// `(page_index_1based, image_path)` for every page, in page order.
pub async fn render_document(
    pdf_path: &Path,
    out_dir: &Path,
    prefix: &str,
    settings: &RenderSettings,
) -> Result<Vec<(usize, PathBuf)>, BatchError> {
    let pdf_path = pdf_path.to_path_buf();
    let out_dir = out_dir.to_path_buf();
    let prefix = prefix.to_string();
    let settings = settings.clone();

    tokio::task::spawn_blocking(move || {
        render_document_blocking(&pdf_path, &out_dir, &prefix, &settings)
    })
    .await
    .map_err(|e| BatchError::Internal(format!("Render task panicked: {}", e)))?
}

fn render_document_blocking(
    pdf_path: &Path,
    out_dir: &Path,
    prefix: &str,
    settings: &RenderSettings,
) -> Result<Vec<(usize, PathBuf)>, BatchError> {
    let rasterization = |detail: String| BatchError::Rasterization {
        document: prefix.to_string(),
        detail,
    };

    let pdfium = bind_pdfium(settings.pdfium_library.as_deref())?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| rasterization(format!("cannot open {}: {:?}", pdf_path.display(), e)))?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    let max_pixels = settings.max_rendered_pixels as i32;
    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(settings.dpi as f32 / 72.0)
        .set_maximum_width(max_pixels)
        .set_maximum_height(max_pixels);

    let mut results = Vec::with_capacity(total_pages);
    for idx in 0..total_pages {
        let page_num = idx + 1;
        let page = pages
            .get(idx as u16)
            .map_err(|e| rasterization(format!("page {page_num}: {e:?}")))?;

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| rasterization(format!("page {page_num}: {e:?}")))?;
        let image = bitmap.as_image();

        let path = out_dir.join(format!(
            "{prefix}-{page_num:04}.{}",
            settings.format.extension()
        ));
        save_image(&image, &path, settings.format, settings.quality)?;
        debug!(
            "Rendered page {} → {}x{} px → {}",
            page_num,
            image.width(),
            image.height(),
            path.display()
        );

        results.push((page_num, path));
    }

    Ok(results)
}

/// Bind pdfium: explicit path, then `PDFIUM_LIB_PATH`, then the working
/// directory, then the system library.
fn bind_pdfium(explicit: Option<&Path>) -> Result<Pdfium, BatchError> {
    let configured = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

    let bindings = match configured {
        Some(path) => Pdfium::bind_to_library(&path),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| BatchError::PdfiumBindingFailed(format!("{e:?}")))?;

    Ok(Pdfium::new(bindings))
}

/// Write `image` to `path` in the requested format.
///
/// JPEG has no alpha channel, so the image is flattened to RGB first.
pub fn save_image(
    image: &DynamicImage,
    path: &Path,
    format: ImageFormat,
    quality: u8,
) -> Result<(), BatchError> {
    let file = std::fs::File::create(path).map_err(|e| BatchError::storage(path, e))?;
    let mut writer = BufWriter::new(file);

    let encoded = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8())
            .write_with_encoder(JpegEncoder::new_with_quality(&mut writer, quality)),
        ImageFormat::Png => image.write_to(&mut writer, image::ImageFormat::Png),
    };
    encoded.map_err(|e| BatchError::Rasterization {
        document: path.display().to_string(),
        detail: format!("image encoding failed: {e}"),
    })?;

    writer.flush().map_err(|e| BatchError::storage(path, e))
}
