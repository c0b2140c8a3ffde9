//! Inference invoker: frames + prompt -> decoded text.
//!
//! The vision-language model is an external collaborator reached over an
//! OpenAI-compatible HTTP API. The `VlmClient` trait is the seam: the
//! worker holds one process-scoped handle (models are expensive to warm
//! up, the backend reuses them across requests), and tests substitute a
//! stub.

mod http;

pub use http::{HttpVlmClient, VlmConfig};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use thiserror::Error;

/// Errors from model invocation. Never swallowed: the worker records them
/// on the document and re-raises them into its logs.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("inference backend returned {status}: {detail}")]
    Api { status: u16, detail: String },

    #[error("model returned an empty completion")]
    EmptyCompletion,

    #[error("frame encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// A handle to the vision-language model.
#[async_trait]
pub trait VlmClient: Send + Sync {
    /// Model identifier, for logging.
    fn model_id(&self) -> &str;

    /// Run one multimodal turn: the prompt plus all frames, in order.
    ///
    /// Decoding is deterministic (no sampling, bounded new-token budget)
    /// and the returned text is only the generated continuation - input
    /// tokens are never echoed back.
    async fn generate(
        &self,
        frames: &[DynamicImage],
        prompt: &str,
    ) -> Result<String, InferenceError>;
}

/// Encode a frame as a base64 PNG data URI for the VLM API.
///
/// PNG is lossless; compression artifacts on rendered text degrade OCR
/// accuracy, and payload size matters less than text crispness here.
pub(crate) fn encode_frame(img: &DynamicImage) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(&buf)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn encode_frame_produces_data_uri() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([0, 0, 0])));
        let uri = encode_frame(&img).unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));

        let b64 = uri.strip_prefix("data:image/png;base64,").unwrap();
        let decoded = STANDARD.decode(b64).unwrap();
        // PNG magic header survives the round trip.
        assert_eq!(&decoded[..4], b"\x89PNG");
    }
}
