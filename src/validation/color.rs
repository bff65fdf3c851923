use crate::config::HsvBand;
use crate::image::ImageTransforms;
use image::RgbImage;
use serde::Serialize;

impl HsvBand {
    /// Inclusive on every channel.
    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|i| self.lower[i] <= hsv[i] && hsv[i] <= self.upper[i])
    }
}

/// Share of pixels falling in the retina colour bands, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColorStats {
    pub red_percentage: f32,
    pub yellow_percentage: f32,
}

impl ColorStats {
    pub fn measure(image: &RgbImage, red: &HsvBand, yellow: &HsvBand) -> Self {
        let total = image.width() as u64 * image.height() as u64;
        if total == 0 {
            return Self {
                red_percentage: 0.0,
                yellow_percentage: 0.0,
            };
        }

        let (mut red_count, mut yellow_count) = (0u64, 0u64);
        for pixel in image.pixels() {
            let hsv = ImageTransforms::rgb_to_hsv(*pixel);
            if red.contains(hsv) {
                red_count += 1;
            }
            if yellow.contains(hsv) {
                yellow_count += 1;
            }
        }

        Self {
            red_percentage: (red_count as f64 / total as f64 * 100.0) as f32,
            yellow_percentage: (yellow_count as f64 / total as f64 * 100.0) as f32,
        }
    }

    /// Either band strictly above `min_percentage`.
    pub fn has_retina_colors(&self, min_percentage: f32) -> bool {
        self.red_percentage > min_percentage || self.yellow_percentage > min_percentage
    }
}
