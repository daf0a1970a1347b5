//! Image preprocessing: fixed square resize and rescale into [0, 1].

use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use plant_core::{ImageDimensions, LabelSet, Result};

use crate::dataset::{ImageSample, LabeledImage};
use crate::loader::ImageLoader;

/// Image preprocessor for plant images
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    target: ImageDimensions,
}

impl ImagePreprocessor {
    /// Preprocessor producing `size`×`size` RGB tensors
    pub fn new(size: usize) -> Self {
        Self {
            target: ImageDimensions::square(size),
        }
    }

    pub fn dims(&self) -> ImageDimensions {
        self.target
    }

    /// Resizes to the target square (bilinear, aspect ratio not kept),
    /// converts to RGB and divides by 255. Output is channel-major.
    pub fn preprocess(&self, image: &DynamicImage) -> Vec<f32> {
        let (w, h) = (self.target.width, self.target.height);
        let resized = if image.dimensions() == (w, h) {
            image.to_rgb8()
        } else {
            image.resize_exact(w, h, FilterType::Triangle).to_rgb8()
        };

        let plane = (w * h) as usize;
        let mut pixels = vec![0.0f32; plane * 3];
        for (x, y, pixel) in resized.enumerate_pixels() {
            let idx = (y * w + x) as usize;
            for c in 0..3 {
                pixels[c * plane + idx] = pixel[c] as f32 / 255.0;
            }
        }
        pixels
    }

    /// Loads, decodes and preprocesses one labelled file
    pub fn load_sample(&self, item: &LabeledImage, labels: &LabelSet) -> Result<ImageSample> {
        let image = ImageLoader::load_image(&item.path)?;
        ImageSample::new(self.preprocess(&image), self.target, item.label, labels)
    }

    pub fn preprocess_from_path(&self, path: &Path) -> Result<Vec<f32>> {
        let image = ImageLoader::load_image(path)?;
        Ok(self.preprocess(&image))
    }

    /// Output tensor shape `[C, H, W]`
    pub fn output_shape(&self) -> [usize; 3] {
        self.target.chw()
    }
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new(plant_core::IMAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, Rgba};

    fn assert_normalized(pixels: &[f32], expected_len: usize) {
        assert_eq!(pixels.len(), expected_len);
        assert!(pixels.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_output_shape() {
        assert_eq!(ImagePreprocessor::default().output_shape(), [3, 224, 224]);
    }

    #[test]
    fn test_preprocess_any_size_and_orientation() {
        let preprocessor = ImagePreprocessor::new(32);
        for (w, h) in [(10, 10), (300, 40), (40, 300), (32, 32), (1, 1)] {
            let img = DynamicImage::ImageRgb8(ImageBuffer::from_fn(w, h, |x, y| {
                Rgb([(x % 256) as u8, (y % 256) as u8, 255])
            }));
            assert_normalized(&preprocessor.preprocess(&img), 3 * 32 * 32);
        }
    }

    #[test]
    fn test_preprocess_converts_rgba_and_grayscale() {
        let preprocessor = ImagePreprocessor::new(8);
        let rgba = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(5, 7, Rgba([10, 20, 30, 0])));
        let gray = DynamicImage::ImageLuma8(ImageBuffer::from_pixel(9, 3, image::Luma([128])));

        assert_normalized(&preprocessor.preprocess(&rgba), 3 * 64);
        assert_normalized(&preprocessor.preprocess(&gray), 3 * 64);
    }

    #[test]
    fn test_normalization_values() {
        let preprocessor = ImagePreprocessor::new(4);
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(4, 4, Rgb([255, 0, 51])));
        let pixels = preprocessor.preprocess(&img);

        // Channel-major: all red values first
        assert!(pixels[..16].iter().all(|v| (*v - 1.0).abs() < 1e-6));
        assert!(pixels[16..32].iter().all(|v| v.abs() < 1e-6));
        assert!(pixels[32..].iter().all(|v| (*v - 0.2).abs() < 1e-6));
    }
}
