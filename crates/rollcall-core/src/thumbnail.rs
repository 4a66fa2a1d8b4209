//! Baseline descriptor extractor over a downsampled grayscale thumbnail.
//!
//! Not a face recognizer: it lets the pipeline run end to end without model
//! files. Any real detector plugs in through [`DescriptorExtractor`].

use crate::features::{DescriptorExtractor, FeatureError};
use crate::types::Descriptor;
use image::imageops::FilterType;

// --- Named constants ---
const THUMB_WIDTH: u32 = 16;
const THUMB_HEIGHT: u32 = 8;
const THUMB_MODEL_VERSION: &str = "thumbnail-16x8";
/// Pixels below this value count as dark.
const DARK_PIXEL_LEVEL: u8 = 32;
/// Fraction of dark pixels above which the frame is treated as empty.
const DARK_FRAME_RATIO: f32 = 0.95;
/// Minimum standard deviation (0–255 scale) for a frame to contain anything.
const MIN_CONTRAST: f32 = 2.0;

#[derive(Debug, Default, Clone, Copy)]
pub struct ThumbnailExtractor;

impl ThumbnailExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl DescriptorExtractor for ThumbnailExtractor {
    fn extract(&mut self, image: &[u8]) -> Result<Descriptor, FeatureError> {
        let decoded =
            image::load_from_memory(image).map_err(|e| FeatureError::InvalidImage(e.to_string()))?;
        let gray = decoded.to_luma8();

        if is_dark_frame(gray.as_raw(), DARK_FRAME_RATIO) {
            return Err(FeatureError::NoFace);
        }

        let thumb = image::imageops::resize(&gray, THUMB_WIDTH, THUMB_HEIGHT, FilterType::Triangle);
        let values = normalize(thumb.as_raw()).ok_or(FeatureError::NoFace)?;

        Ok(Descriptor {
            values,
            model_version: Some(THUMB_MODEL_VERSION.to_string()),
        })
    }
}

/// True if more than `ratio` of the pixels are darker than [`DARK_PIXEL_LEVEL`].
fn is_dark_frame(gray: &[u8], ratio: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < DARK_PIXEL_LEVEL).count();
    (dark as f32 / gray.len() as f32) > ratio
}

/// Mean-centre and L2-normalise. `None` for a flat (featureless) thumbnail.
fn normalize(pixels: &[u8]) -> Option<Vec<f32>> {
    let n = pixels.len() as f32;
    let mean = pixels.iter().map(|&p| p as f32).sum::<f32>() / n;
    let centred: Vec<f32> = pixels.iter().map(|&p| p as f32 - mean).collect();

    let norm = centred.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm / n.sqrt() < MIN_CONTRAST {
        return None;
    }
    Some(centred.into_iter().map(|v| v / norm).collect())
}
