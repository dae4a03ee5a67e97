//! Per-sample image transforms: crop, resize, greyscale, and conversion to a
//! CHW float tensor in `[0, 1]`.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array3;
use rand::Rng;
use serde::Deserialize;

use crate::DataError;

/// Turns a decoded image into the model's input tensor.
///
/// Every output of one transform must have the same shape, whatever the
/// source image size or format.
pub trait ImageTransform: Send + Sync {
    fn apply(&self, image: RgbImage) -> Array3<f32>;

    /// `[channels, height, width]` of every tensor this transform produces.
    fn output_shape(&self) -> [usize; 3];
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Output images are `resize_size × resize_size`.
    pub resize_size: u32,
    /// Random-resized-crop area fraction, e.g. `(0.7, 0.8)`. `None` disables cropping.
    pub crop_scale_bounds: Option<(f32, f32)>,
    /// Random-resized-crop aspect ratio bounds.
    pub crop_ratio_bounds: (f32, f32),
    /// Collapse to a single luminance channel.
    pub greyscale: bool,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            resize_size: 224,
            crop_scale_bounds: None,
            crop_ratio_bounds: (0.9, 1.1),
            greyscale: false,
        }
    }
}

impl TransformConfig {
    pub fn validate(&self) -> Result<(), DataError> {
        if self.resize_size == 0 {
            return Err(DataError::InvalidConfig("resize_size must be positive".into()));
        }
        if let Some((lo, hi)) = self.crop_scale_bounds
            && !(lo > 0.0 && lo <= hi && hi <= 1.0)
        {
            return Err(DataError::InvalidConfig(format!(
                "crop_scale_bounds must satisfy 0 < min <= max <= 1, got ({lo}, {hi})"
            )));
        }
        let (lo, hi) = self.crop_ratio_bounds;
        if !(lo > 0.0 && lo <= hi) {
            return Err(DataError::InvalidConfig(format!(
                "crop_ratio_bounds must satisfy 0 < min <= max, got ({lo}, {hi})"
            )));
        }
        Ok(())
    }
}

/// Optional random-resized crop, square resize, optional greyscale, then CHW floats.
#[derive(Debug, Clone)]
pub struct StandardTransform {
    config: TransformConfig,
}

impl StandardTransform {
    pub fn new(config: TransformConfig) -> Result<Self, DataError> {
        config.validate()?;
        Ok(Self { config })
    }

    fn crop(&self, image: RgbImage) -> RgbImage {
        let Some(scale) = self.config.crop_scale_bounds else {
            return image;
        };
        let (width, height) = image.dimensions();
        let (x, y, w, h) = random_crop_box(
            width,
            height,
            scale,
            self.config.crop_ratio_bounds,
            &mut rand::thread_rng(),
        );
        imageops::crop_imm(&image, x, y, w, h).to_image()
    }
}

impl ImageTransform for StandardTransform {
    fn apply(&self, image: RgbImage) -> Array3<f32> {
        let image = self.crop(image);
        let size = self.config.resize_size;
        let image = if image.dimensions() == (size, size) {
            image
        } else {
            imageops::resize(&image, size, size, FilterType::Triangle)
        };

        if self.config.greyscale {
            let grey = imageops::grayscale(&image);
            let (w, h) = grey.dimensions();
            Array3::from_shape_fn((1, h as usize, w as usize), |(_, y, x)| {
                f32::from(grey.get_pixel(x as u32, y as u32).0[0]) / 255.0
            })
        } else {
            to_chw(&image)
        }
    }

    fn output_shape(&self) -> [usize; 3] {
        let size = self.config.resize_size as usize;
        let channels = if self.config.greyscale { 1 } else { 3 };
        [channels, size, size]
    }
}

/// HWC `u8` RGB image to CHW `f32` scaled into `[0, 1]`.
pub fn to_chw(image: &RgbImage) -> Array3<f32> {
    let (w, h) = image.dimensions();
    Array3::from_shape_fn((3, h as usize, w as usize), |(c, y, x)| {
        f32::from(image.get_pixel(x as u32, y as u32).0[c]) / 255.0
    })
}

/// Pick a crop covering a random area fraction in `scale` with a random
/// aspect ratio in `ratio` (log-uniform). Falls back to the whole image when
/// no candidate fits after a few tries.
fn random_crop_box<R: Rng>(
    width: u32,
    height: u32,
    scale: (f32, f32),
    ratio: (f32, f32),
    rng: &mut R,
) -> (u32, u32, u32, u32) {
    let area = (width as f32) * (height as f32);
    let (log_lo, log_hi) = (ratio.0.ln(), ratio.1.ln());

    for _ in 0..10 {
        let target = area * rng.gen_range(scale.0..=scale.1);
        let aspect = rng.gen_range(log_lo..=log_hi).exp();
        let w = (target * aspect).sqrt().round() as u32;
        let h = (target / aspect).sqrt().round() as u32;
        if w > 0 && h > 0 && w <= width && h <= height {
            let x = rng.gen_range(0..=width - w);
            let y = rng.gen_range(0..=height - h);
            return (x, y, w, h);
        }
    }
    (0, 0, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn to_chw_scales_and_reorders() {
        let mut img = RgbImage::from_pixel(2, 1, Rgb([0, 0, 0]));
        img.put_pixel(1, 0, Rgb([255, 51, 0]));
        let t = to_chw(&img);
        assert_eq!(t.shape(), &[3, 1, 2]);
        assert_eq!(t[[0, 0, 1]], 1.0);
        assert!((t[[1, 0, 1]] - 0.2).abs() < 1e-6);
        assert_eq!(t[[2, 0, 1]], 0.0);
        assert_eq!(t[[0, 0, 0]], 0.0);
    }

    #[test]
    fn output_shape_independent_of_source_size() {
        let transform = StandardTransform::new(TransformConfig {
            resize_size: 8,
            ..TransformConfig::default()
        })
        .unwrap();
        for (w, h) in [(8, 8), (30, 12), (3, 50)] {
            let out = transform.apply(RgbImage::from_pixel(w, h, Rgb([128, 64, 32])));
            assert_eq!(out.shape(), &transform.output_shape());
        }
    }

    #[test]
    fn greyscale_single_channel() {
        let transform = StandardTransform::new(TransformConfig {
            resize_size: 4,
            greyscale: true,
            ..TransformConfig::default()
        })
        .unwrap();
        let out = transform.apply(RgbImage::from_pixel(10, 10, Rgb([255, 255, 255])));
        assert_eq!(out.shape(), &[1, 4, 4]);
        assert!(out.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn crop_keeps_output_shape() {
        let transform = StandardTransform::new(TransformConfig {
            resize_size: 16,
            crop_scale_bounds: Some((0.7, 0.8)),
            ..TransformConfig::default()
        })
        .unwrap();
        let out = transform.apply(RgbImage::from_pixel(40, 30, Rgb([9, 9, 9])));
        assert_eq!(out.shape(), &[3, 16, 16]);
    }

    #[test]
    fn crop_box_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let (x, y, w, h) = random_crop_box(100, 100, (0.7, 0.8), (0.9, 1.1), &mut rng);
            assert!(x + w <= 100 && y + h <= 100);
            let frac = (w * h) as f32 / 10_000.0;
            assert!(frac > 0.65 && frac < 0.85, "area fraction {frac}");
        }
    }

    #[test]
    fn crop_box_falls_back_to_whole_image() {
        // A 10:1 strip cannot host a near-square crop of 70-80% of its area.
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            random_crop_box(100, 10, (0.7, 0.8), (0.9, 1.1), &mut rng),
            (0, 0, 100, 10)
        );
    }

    #[test]
    fn invalid_configs_rejected() {
        let bad = [
            TransformConfig {
                resize_size: 0,
                ..TransformConfig::default()
            },
            TransformConfig {
                crop_scale_bounds: Some((0.9, 0.5)),
                ..TransformConfig::default()
            },
            TransformConfig {
                crop_ratio_bounds: (0.0, 1.0),
                ..TransformConfig::default()
            },
        ];
        for config in bad {
            assert!(matches!(
                StandardTransform::new(config),
                Err(DataError::InvalidConfig(_))
            ));
        }
    }
}
