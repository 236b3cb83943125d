use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};

use crate::models::operation::Operation;

/// 3x3 Laplacian used for edge detection (same kernel as PIL's FIND_EDGES).
const EDGE_KERNEL: [f32; 9] = [-1.0, -1.0, -1.0, -1.0, 8.0, -1.0, -1.0, -1.0, -1.0];

/// Result of a successful transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
}

/// Pixel-processing capability. Implementations are CPU-bound and are
/// called from the blocking worker pool.
pub trait Transform: Send + Sync {
    fn apply(&self, bytes: &[u8], mime_type: &str, operation: &Operation) -> Result<TransformOutput, TransformError>;
}

/// `Transform` backed by the `image` crate; transformed outputs are PNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageTransform;

impl ImageTransform {
    fn encode_png(image: &DynamicImage) -> Result<TransformOutput, TransformError> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| TransformError::Encode(e.to_string()))?;

        Ok(TransformOutput {
            bytes,
            width: image.width(),
            height: image.height(),
            mime_type: "image/png".to_string(),
        })
    }
}

impl Transform for ImageTransform {
    fn apply(&self, bytes: &[u8], mime_type: &str, operation: &Operation) -> Result<TransformOutput, TransformError> {
        let _span = tracing::debug_span!("transform", op = operation.name()).entered();

        let image = image::load_from_memory(bytes).map_err(|e| TransformError::Decode(e.to_string()))?;

        match *operation {
            Operation::Grayscale => Self::encode_png(&image.grayscale()),
            Operation::Edge => Self::encode_png(&image.grayscale().filter3x3(&EDGE_KERNEL)),
            Operation::Resize { width, height } => {
                Self::encode_png(&image.resize_exact(width, height, FilterType::Triangle))
            }
            Operation::Passthrough => {
                let (width, height) = image.dimensions();
                Ok(TransformOutput {
                    bytes: bytes.to_vec(),
                    width,
                    height,
                    mime_type: mime_type.to_string(),
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("invalid image: {0}")]
    Decode(String),

    #[error("failed to encode output: {0}")]
    Encode(String),

    #[error("{0}")]
    Failed(String),
}
