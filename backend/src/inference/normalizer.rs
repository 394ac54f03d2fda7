//! Decoding, background cropping and resizing of uploaded leaf photos.
//!
//! The classifiers were calibrated against Lanczos3 resampling; swapping the
//! filter changes model accuracy and must be re-validated first.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array3;
use shared::NormalizationMode;

use super::config::ImageConfig;
use super::error::InferenceError;
use super::types::NormalizedTensor;

const RESIZE_FILTER: FilterType = FilterType::Lanczos3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }
}

#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    target_size: u32,
    crop_threshold: u8,
}

impl ImageNormalizer {
    pub fn new(config: &ImageConfig) -> Self {
        Self {
            target_size: config.target_size,
            crop_threshold: config.crop_threshold,
        }
    }

    pub fn target_size(&self) -> u32 {
        self.target_size
    }

    pub fn normalize(&self, bytes: &[u8]) -> Result<RgbImage, InferenceError> {
        let image = decode_rgb(bytes)?;
        self.normalize_image(image)
    }

    pub fn normalize_image(&self, image: RgbImage) -> Result<RgbImage, InferenceError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(InferenceError::Preprocessing(
                "image has zero width or height".into(),
            ));
        }
        let cropped = match foreground_bbox(&image, self.crop_threshold) {
            Some(bbox) => {
                imageops::crop_imm(&image, bbox.left, bbox.top, bbox.width(), bbox.height())
                    .to_image()
            }
            None => image,
        };
        let square = center_square(&cropped);
        Ok(imageops::resize(
            &square,
            self.target_size,
            self.target_size,
            RESIZE_FILTER,
        ))
    }
}

pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, InferenceError> {
    let image = image::load_from_memory(bytes)?;
    Ok(image.to_rgb8())
}

/// ITU-R 601-2 luma with integer rounding.
pub(crate) fn luma(pixel: &image::Rgb<u8>) -> u8 {
    let [r, g, b] = pixel.0;
    ((r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16) as u8
}

/// Bounding box of pixels whose inverted luma reaches `threshold`.
///
/// Dark leaf content on a light background survives the inversion; a uniform
/// light image yields `None` and is left uncropped.
pub fn foreground_bbox(image: &RgbImage, threshold: u8) -> Option<BoundingBox> {
    let mut bbox: Option<BoundingBox> = None;
    for (x, y, pixel) in image.enumerate_pixels() {
        if 255 - luma(pixel) < threshold {
            continue;
        }
        bbox = Some(match bbox {
            None => BoundingBox {
                left: x,
                top: y,
                right: x + 1,
                bottom: y + 1,
            },
            Some(b) => BoundingBox {
                left: b.left.min(x),
                top: b.top.min(y),
                right: b.right.max(x + 1),
                bottom: b.bottom.max(y + 1),
            },
        });
    }
    bbox
}

pub fn center_square(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    let side = width.min(height);
    let left = (width - side) / 2;
    let top = (height - side) / 2;
    imageops::crop_imm(image, left, top, side, side).to_image()
}

pub fn to_tensor(image: &RgbImage, mode: NormalizationMode) -> NormalizedTensor {
    let (width, height) = image.dimensions();
    Array3::from_shape_fn((height as usize, width as usize, 3), |(y, x, c)| {
        let value = image.get_pixel(x as u32, y as u32)[c] as f32;
        match mode {
            NormalizationMode::ZeroToOne => value / 255.0,
            NormalizationMode::MinusOneToOne => value / 127.5 - 1.0,
        }
    })
}
