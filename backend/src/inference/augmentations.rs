use image::imageops;
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use serde::Serialize;

use super::config::AugmentationConfig;
use super::normalizer::luma;

/// Number of test-time variants produced per image, shared by both models.
pub const TTA_VARIANTS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AugmentationKind {
    Original,
    HorizontalFlip,
    RotateCounterClockwise,
    RotateClockwise,
    Brightness,
    Contrast,
}

impl AugmentationKind {
    pub const ORDER: [AugmentationKind; TTA_VARIANTS] = [
        AugmentationKind::Original,
        AugmentationKind::HorizontalFlip,
        AugmentationKind::RotateCounterClockwise,
        AugmentationKind::RotateClockwise,
        AugmentationKind::Brightness,
        AugmentationKind::Contrast,
    ];
}

#[derive(Debug, Clone)]
pub struct AugmentedImage {
    pub kind: AugmentationKind,
    pub image: RgbImage,
}

#[derive(Debug, Clone)]
pub struct TestTimeAugmentation {
    rotation_degrees: f32,
    brightness_factor: f32,
    contrast_factor: f32,
}

impl TestTimeAugmentation {
    pub fn new(config: &AugmentationConfig) -> Self {
        Self {
            rotation_degrees: config.rotation_degrees,
            brightness_factor: config.brightness_factor,
            contrast_factor: config.contrast_factor,
        }
    }

    pub fn generate(&self, image: &RgbImage) -> Vec<AugmentedImage> {
        AugmentationKind::ORDER
            .iter()
            .map(|&kind| AugmentedImage {
                kind,
                image: self.apply(kind, image),
            })
            .collect()
    }

    fn apply(&self, kind: AugmentationKind, image: &RgbImage) -> RgbImage {
        match kind {
            AugmentationKind::Original => image.clone(),
            AugmentationKind::HorizontalFlip => imageops::flip_horizontal(image),
            AugmentationKind::RotateCounterClockwise => rotate(image, self.rotation_degrees),
            AugmentationKind::RotateClockwise => rotate(image, -self.rotation_degrees),
            AugmentationKind::Brightness => brightness(image, self.brightness_factor),
            AugmentationKind::Contrast => contrast(image, self.contrast_factor),
        }
    }
}

/// Rotates counter-clockwise by `degrees` on the same canvas, filling with black.
fn rotate(image: &RgbImage, degrees: f32) -> RgbImage {
    // imageproc rotates clockwise for positive theta.
    rotate_about_center(
        image,
        -degrees.to_radians(),
        Interpolation::Nearest,
        Rgb([0, 0, 0]),
    )
}

/// Blends every channel toward `base` by `factor`, truncating then clipping.
fn blend_channel(base: f32, value: u8, factor: f32) -> u8 {
    let blended = (base + factor * (value as f32 - base)) as i32;
    blended.clamp(0, 255) as u8
}

fn brightness(image: &RgbImage, factor: f32) -> RgbImage {
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            *channel = blend_channel(0.0, *channel, factor);
        }
    }
    out
}

fn contrast(image: &RgbImage, factor: f32) -> RgbImage {
    let mean = mean_luma(image);
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            *channel = blend_channel(mean, *channel, factor);
        }
    }
    out
}

fn mean_luma(image: &RgbImage) -> f32 {
    let count = image.width() as u64 * image.height() as u64;
    if count == 0 {
        return 0.0;
    }
    let total: u64 = image.pixels().map(|p| luma(p) as u64).sum();
    (total as f64 / count as f64 + 0.5).floor() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(size: u32) -> RgbImage {
        RgbImage::from_fn(size, size, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 11 % 256) as u8, ((x + y) * 3 % 256) as u8])
        })
    }

    #[test]
    fn yields_fixed_number_of_variants_in_stable_order() {
        let tta = TestTimeAugmentation::new(&AugmentationConfig::default());
        let variants = tta.generate(&gradient(24));
        assert_eq!(variants.len(), TTA_VARIANTS);
        let kinds: Vec<_> = variants.iter().map(|v| v.kind).collect();
        assert_eq!(kinds, AugmentationKind::ORDER.to_vec());
        assert!(variants.iter().all(|v| v.image.dimensions() == (24, 24)));
    }

    #[test]
    fn repeated_generation_is_identical() {
        let tta = TestTimeAugmentation::new(&AugmentationConfig::default());
        let image = gradient(32);
        let first = tta.generate(&image);
        let second = tta.generate(&image);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.image, b.image, "{:?} differs between runs", a.kind);
        }
    }

    #[test]
    fn first_variant_is_untouched_and_second_is_mirrored() {
        let tta = TestTimeAugmentation::new(&AugmentationConfig::default());
        let image = gradient(10);
        let variants = tta.generate(&image);
        assert_eq!(variants[0].image, image);
        assert_eq!(variants[1].image.get_pixel(0, 3), image.get_pixel(9, 3));
    }

    #[test]
    fn rotation_keeps_center_and_blackens_corners() {
        let image = RgbImage::from_pixel(41, 41, Rgb([200, 150, 100]));
        let rotated = rotate(&image, 15.0);
        assert_eq!(rotated.get_pixel(20, 20), &Rgb([200, 150, 100]));
        assert_eq!(rotated.get_pixel(0, 0), &Rgb([0, 0, 0]));
    }

    #[test]
    fn brightness_scales_and_clips() {
        let mut image = RgbImage::from_pixel(2, 1, Rgb([100, 200, 250]));
        image.put_pixel(1, 0, Rgb([0, 10, 20]));
        let out = brightness(&image, 1.1);
        assert_eq!(out.get_pixel(0, 0), &Rgb([110, 220, 255]));
        assert_eq!(out.get_pixel(1, 0), &Rgb([0, 11, 22]));
    }

    #[test]
    fn contrast_of_uniform_image_is_identity() {
        let image = RgbImage::from_pixel(4, 4, Rgb([90, 90, 90]));
        assert_eq!(contrast(&image, 1.1), image);
    }
}
