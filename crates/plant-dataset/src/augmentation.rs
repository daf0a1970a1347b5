//! Training-time augmentation on preprocessed samples.
//!
//! Transforms operate on channel-major `[0, 1]` pixels and keep values in
//! that range. Each transform draws its own parameter, so a call applies
//! any subset of them. Validation streams never reach this module.

use plant_core::AugmentationConfig;
use rand::Rng;

use crate::dataset::ImageSample;

/// Random flip / rotation / zoom / contrast / brightness
#[derive(Debug, Clone)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Augments a sample in place
    pub fn augment<R: Rng + ?Sized>(&self, sample: &mut ImageSample, rng: &mut R) {
        if !self.config.enabled {
            return;
        }
        let [channels, height, width] = sample.dims.chw();
        let pixels = &mut sample.pixels;

        if self.config.horizontal_flip && rng.gen_bool(0.5) {
            flip_horizontal(pixels, channels, height, width);
        }

        if self.config.rotation_factor > 0.0 {
            let max_angle = self.config.rotation_factor * std::f32::consts::TAU;
            let angle = rng.gen_range(-max_angle..=max_angle);
            *pixels = resample(pixels, channels, height, width, angle, 1.0);
        }

        if self.config.zoom_factor > 0.0 {
            // scale > 1 zooms out, < 1 zooms in
            let zoom = self.config.zoom_factor;
            let scale = rng.gen_range((1.0 - zoom)..=(1.0 + zoom));
            *pixels = resample(pixels, channels, height, width, 0.0, scale);
        }

        if self.config.contrast_factor > 0.0 {
            let c = self.config.contrast_factor;
            let factor = rng.gen_range((1.0 - c).max(0.0)..=(1.0 + c));
            adjust_contrast(pixels, channels, factor);
        }

        if self.config.brightness_factor > 0.0 {
            let b = self.config.brightness_factor;
            let delta = rng.gen_range(-b..=b);
            adjust_brightness(pixels, delta);
        }
    }
}

fn flip_horizontal(pixels: &mut [f32], channels: usize, height: usize, width: usize) {
    for c in 0..channels {
        for y in 0..height {
            let row = (c * height + y) * width;
            pixels[row..row + width].reverse();
        }
    }
}

/// Maps each output pixel back through a rotation by `angle` (radians) and a
/// scale about the image centre, sampling bilinearly with reflect fill.
fn resample(
    pixels: &[f32],
    channels: usize,
    height: usize,
    width: usize,
    angle: f32,
    scale: f32,
) -> Vec<f32> {
    let mut output = vec![0.0; pixels.len()];
    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;
    let (sin_a, cos_a) = angle.sin_cos();

    for y in 0..height {
        for x in 0..width {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let src_x = cx + scale * (dx * cos_a + dy * sin_a);
            let src_y = cy + scale * (-dx * sin_a + dy * cos_a);

            for c in 0..channels {
                let plane = &pixels[c * height * width..(c + 1) * height * width];
                output[(c * height + y) * width + x] =
                    bilinear_sample(plane, height, width, src_x, src_y);
            }
        }
    }
    output
}

fn bilinear_sample(plane: &[f32], height: usize, width: usize, x: f32, y: f32) -> f32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let at = |xi: i64, yi: i64| {
        let xr = reflect(xi, width);
        let yr = reflect(yi, height);
        plane[yr * width + xr]
    };

    let top = at(x0, y0) * (1.0 - fx) + at(x0 + 1, y0) * fx;
    let bottom = at(x0, y0 + 1) * (1.0 - fx) + at(x0 + 1, y0 + 1) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Reflect-about-edge index (d c b a | a b c d | d c b a).
fn reflect(index: i64, size: usize) -> usize {
    let n = size as i64;
    let period = 2 * n;
    let m = index.rem_euclid(period);
    (if m >= n { period - 1 - m } else { m }) as usize
}

fn adjust_contrast(pixels: &mut [f32], channels: usize, factor: f32) {
    let plane = pixels.len() / channels;
    for c in 0..channels {
        let channel = &mut pixels[c * plane..(c + 1) * plane];
        let mean = channel.iter().sum::<f32>() / plane as f32;
        for v in channel.iter_mut() {
            *v = ((*v - mean) * factor + mean).clamp(0.0, 1.0);
        }
    }
}

fn adjust_brightness(pixels: &mut [f32], delta: f32) {
    for v in pixels.iter_mut() {
        *v = (*v + delta).clamp(0.0, 1.0);
    }
}
