use crate::config::ClassifierConfig;
use crate::utils::error::RetinaError;
use crate::Result;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;

pub struct ImagePreprocessor {
    input_size: u32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl ImagePreprocessor {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            input_size: config.input_size,
            mean: config.mean,
            std: config.std,
        }
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Resize to the model input and build a normalized `[1, 3, H, W]` tensor.
    pub fn to_tensor(&self, image: &RgbImage) -> Result<Array4<f32>> {
        if image.width() == 0 || image.height() == 0 {
            return Err(RetinaError::InvalidInput("Empty image".to_string()));
        }
        if self.std.iter().any(|s| *s == 0.0) {
            return Err(RetinaError::Config("Normalization std must be non-zero".to_string()));
        }

        let size = self.input_size;
        let resized = imageops::resize(image, size, size, FilterType::Triangle);

        let side = size as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                tensor[[0, c, y as usize, x as usize]] = (value - self.mean[c]) / self.std[c];
            }
        }

        Ok(tensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn produces_nchw_tensor_of_model_size() {
        let pre = ImagePreprocessor::new(&ClassifierConfig::default());
        let img = RgbImage::from_pixel(640, 480, Rgb([0, 0, 0]));
        let tensor = pre.to_tensor(&img).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 224, 224]);
    }

    #[test]
    fn applies_imagenet_statistics() {
        let pre = ImagePreprocessor::new(&ClassifierConfig::default());
        let img = RgbImage::from_pixel(50, 50, Rgb([255, 0, 128]));
        let tensor = pre.to_tensor(&img).unwrap();

        let r = tensor[[0, 0, 100, 100]];
        let g = tensor[[0, 1, 100, 100]];
        let b = tensor[[0, 2, 100, 100]];
        assert!((r - (1.0 - 0.485) / 0.229).abs() < 1e-4);
        assert!((g - (0.0 - 0.456) / 0.224).abs() < 1e-4);
        assert!((b - (128.0 / 255.0 - 0.406) / 0.225).abs() < 1e-4);
    }

    #[test]
    fn empty_image_is_rejected() {
        let pre = ImagePreprocessor::new(&ClassifierConfig::default());
        assert!(pre.to_tensor(&RgbImage::new(0, 0)).is_err());
    }
}
