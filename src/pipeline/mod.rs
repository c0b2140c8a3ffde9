//! Image loading pipeline: uploaded bytes -> ordered raster frames.
//!
//! Branches on the (case-insensitive) file extension. PDFs are rasterized
//! one RGB frame per page via pdfium; single raster formats decode to a
//! one-element sequence. Everything happens in memory; callers own any
//! temporary storage.
//!
//! pdfium wraps a C++ library with thread-local state, so callers in async
//! contexts should run [`load_into_images`] under
//! `tokio::task::spawn_blocking`.

use image::DynamicImage;
use pdfium_render::prelude::*;
use thiserror::Error;

use crate::storage::file_extension;

/// Raster extensions decodable by the `image` crate.
const RASTER_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tiff"];

/// Errors from the image loading pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported file format: {0:?}")]
    UnsupportedFormat(Option<String>),

    #[error("PDF rasterization failed: {0}")]
    Pdf(String),

    #[error("image decoding failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Whether the pipeline can decode a file with this name.
pub fn is_supported(filename: &str) -> bool {
    match file_extension(filename) {
        Some(ext) => ext == "pdf" || RASTER_EXTENSIONS.contains(&ext.as_str()),
        None => false,
    }
}

/// Decode uploaded bytes into an ordered sequence of raster frames.
///
/// The filename is used only for extension sniffing. Fails without a
/// partial result on unsupported extensions or undecodable content.
pub fn load_into_images(
    bytes: &[u8],
    filename: &str,
    dpi: u32,
) -> Result<Vec<DynamicImage>, PipelineError> {
    let ext = file_extension(filename);
    match ext.as_deref() {
        Some("pdf") => render_pdf_pages(bytes, dpi),
        Some(e) if RASTER_EXTENSIONS.contains(&e) => {
            let img = image::load_from_memory(bytes)?;
            Ok(vec![img])
        }
        _ => Err(PipelineError::UnsupportedFormat(ext)),
    }
}

/// Rasterize every page of a PDF, in page order, one RGB frame per page.
fn render_pdf_pages(bytes: &[u8], dpi: u32) -> Result<Vec<DynamicImage>, PipelineError> {
    let pdfium = Pdfium::default();
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| PipelineError::Pdf(format!("{e:?}")))?;

    let pages = document.pages();
    let mut frames = Vec::with_capacity(pages.len() as usize);

    for page in pages.iter() {
        // Page sizes are in points (1/72 inch); scale to the target DPI.
        let width_px = (page.width().value * dpi as f32 / 72.0).round() as i32;
        let config = PdfRenderConfig::new().set_target_width(width_px.max(1));

        let bitmap = page
            .render_with_config(&config)
            .map_err(|e| PipelineError::Pdf(format!("{e:?}")))?;
        frames.push(DynamicImage::ImageRgb8(bitmap.as_image().to_rgb8()));
    }

    Ok(frames)
}
