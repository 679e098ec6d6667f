use image::imageops::FilterType;
use image::RgbImage;
use ndarray::{Array3, Array4};

use crate::config::NormalizationConfig;
use crate::model::oracle::normalize_in_place;

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("Image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Empty image payload")]
    Empty,
}

/// One decoded image in the two forms the explainers need.
///
/// Both are built from the same decode, so overlays line up pixel for pixel
/// with what the classifier saw.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    /// `[1, H, W, 3]`, normalized for the network.
    pub normalized: Array4<f32>,
    /// Resized RGB, unnormalized, for compositing.
    pub display: RgbImage,
}

impl PreparedImage {
    pub fn from_display(display: RgbImage, norm: &NormalizationConfig) -> Self {
        let (h, w) = (display.height() as usize, display.width() as usize);
        let mut normalized = Array4::from_shape_fn((1, h, w, 3), |(_, y, x, c)| {
            display.get_pixel(x as u32, y as u32)[c] as f32
        });
        normalize_in_place(&mut normalized, norm);
        Self { normalized, display }
    }
}

pub fn prepare(
    bytes: &[u8],
    input_size: u32,
    norm: &NormalizationConfig,
) -> Result<PreparedImage, PreprocessError> {
    if bytes.is_empty() {
        return Err(PreprocessError::Empty);
    }
    let img = image::load_from_memory(bytes)?;
    let display = img
        .resize_exact(input_size, input_size, FilterType::Triangle)
        .to_rgb8();
    let prepared = PreparedImage::from_display(display, norm);
    log::debug!(
        "Preprocessed image shape: {:?}, range: [{}, {}]",
        prepared.normalized.shape(),
        prepared.normalized.iter().copied().fold(f32::INFINITY, f32::min),
        prepared.normalized.iter().copied().fold(f32::NEG_INFINITY, f32::max),
    );
    Ok(prepared)
}

pub fn rgb_to_array(img: &RgbImage) -> Array3<f32> {
    let (w, h) = img.dimensions();
    Array3::from_shape_fn((h as usize, w as usize, 3), |(y, x, c)| {
        img.get_pixel(x as u32, y as u32)[c] as f32
    })
}
