//! Heuristic check that an upload plausibly is a retinal fundus photograph.
//!
//! Two signals must agree: a large circular region (the fundus disc) and a
//! sufficient share of reddish or yellowish pixels.

pub mod color;
pub mod hough;

pub use color::ColorStats;
pub use hough::{Circle, HoughCircleDetector};

use crate::config::ValidatorConfig;
use crate::image::ImageTransforms;
use image::{GrayImage, RgbImage};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub width: u32,
    pub height: u32,
    pub circle: Option<Circle>,
    pub colors: ColorStats,
    pub has_circle: bool,
    pub has_retina_colors: bool,
}

impl ValidationReport {
    pub fn is_retina(&self) -> bool {
        self.has_circle && self.has_retina_colors
    }
}

pub struct RetinaValidator {
    config: ValidatorConfig,
    detector: HoughCircleDetector,
}

impl RetinaValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        let detector = HoughCircleDetector::new(config.hough.clone());
        Self { config, detector }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Accept/reject decision. Skips circle detection when the colours already fail.
    pub fn validate(&self, image: &RgbImage) -> bool {
        if image.width() == 0 || image.height() == 0 {
            return false;
        }

        let colors = self.measure_colors(image);
        if !colors.has_retina_colors(self.config.min_color_percentage) {
            tracing::debug!(
                "No retina colours: red={:.2}% yellow={:.2}%",
                colors.red_percentage,
                colors.yellow_percentage
            );
            return false;
        }

        let circle = self.find_circle(image);
        tracing::debug!(
            "Retina validation: circle={:?} red={:.2}% yellow={:.2}%",
            circle,
            colors.red_percentage,
            colors.yellow_percentage
        );
        circle.is_some()
    }

    /// Full diagnostic record; `inspect(img).is_retina() == validate(img)`.
    pub fn inspect(&self, image: &RgbImage) -> ValidationReport {
        let colors = self.measure_colors(image);
        let circle = if image.width() == 0 || image.height() == 0 {
            None
        } else {
            self.find_circle(image)
        };

        ValidationReport {
            width: image.width(),
            height: image.height(),
            circle,
            has_circle: circle.is_some(),
            has_retina_colors: colors.has_retina_colors(self.config.min_color_percentage),
            colors,
        }
    }

    fn measure_colors(&self, image: &RgbImage) -> ColorStats {
        ColorStats::measure(image, &self.config.red_band, &self.config.yellow_band)
    }

    fn find_circle(&self, image: &RgbImage) -> Option<Circle> {
        let blurred = self.blurred_gray(image);
        self.detector.detect(&blurred, Some(1)).into_iter().next()
    }

    fn blurred_gray(&self, image: &RgbImage) -> GrayImage {
        let gray = ImageTransforms::to_grayscale(image);
        ImageTransforms::gaussian_blur(&gray, self.config.blur_kernel_size, self.config.blur_sigma)
    }
}

impl Default for RetinaValidator {
    fn default() -> Self {
        Self::new(ValidatorConfig::default())
    }
}
