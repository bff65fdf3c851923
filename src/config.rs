use crate::utils::error::RetinaError;
use crate::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub bind_addr: String,

    /// Directory holding the checkpoint and the label reference file
    pub models_dir: PathBuf,

    /// Explicit checkpoint path, overrides `models_dir`
    pub model_file: Option<PathBuf>,

    /// Explicit label reference path, overrides `models_dir`
    pub labels_file: Option<PathBuf>,

    /// Blocking worker threads
    pub workers: usize,

    /// Development mode
    pub dev_mode: bool,

    pub onnx_config: OnnxConfig,

    pub server_config: ServerConfig,

    pub validator: ValidatorConfig,

    pub classifier: ClassifierConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OnnxConfig {
    /// CPU threads per inference
    pub intra_threads: usize,

    /// Graph optimization level, 0-3
    pub optimization_level: i32,

    pub enable_optimization: bool,
}

impl Default for OnnxConfig {
    fn default() -> Self {
        Self {
            intra_threads: (num_cpus::get() * 3 / 4).max(1),
            optimization_level: 3,
            enable_optimization: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Request timeout in seconds
    pub request_timeout: u64,

    /// Maximum request body in bytes
    pub max_request_size: usize,

    /// Largest decodable image, in pixels per side
    pub max_image_width: u32,
    pub max_image_height: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request_timeout: 60,
            max_request_size: 50 * 1024 * 1024,
            max_image_width: 8192,
            max_image_height: 8192,
        }
    }
}

/// `[server]` keys are merged field by field so CLI-derived values survive.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServerOverrides {
    request_timeout: Option<u64>,
    max_request_size: Option<usize>,
    max_image_width: Option<u32>,
    max_image_height: Option<u32>,
}

impl ServerOverrides {
    fn apply(self, server: &mut ServerConfig) {
        if let Some(v) = self.request_timeout {
            server.request_timeout = v;
        }
        if let Some(v) = self.max_request_size {
            server.max_request_size = v;
        }
        if let Some(v) = self.max_image_width {
            server.max_image_width = v;
        }
        if let Some(v) = self.max_image_height {
            server.max_image_height = v;
        }
    }
}

/// Inclusive HSV range in the 8-bit convention (H in 0..180, S and V in 0..=255).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct HsvBand {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvBand {
    pub const RED: HsvBand = HsvBand {
        lower: [0, 50, 50],
        upper: [10, 255, 255],
    };

    pub const YELLOW: HsvBand = HsvBand {
        lower: [20, 50, 50],
        upper: [30, 255, 255],
    };
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HoughConfig {
    /// Inverse accumulator resolution ratio
    pub dp: f32,

    /// Minimum distance between detected centres, in pixels
    pub min_dist: f32,

    /// Upper Canny threshold; the lower one is half of it
    pub canny_threshold: f32,

    /// Votes needed for a centre and edge support needed for a radius
    pub accumulator_threshold: u32,

    pub min_radius: u32,

    /// 0 means "up to the larger image side"
    pub max_radius: u32,
}

impl Default for HoughConfig {
    fn default() -> Self {
        Self {
            dp: 1.0,
            min_dist: 50.0,
            canny_threshold: 50.0,
            accumulator_threshold: 30,
            min_radius: 100,
            max_radius: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Gaussian kernel side, must be odd
    pub blur_kernel_size: u32,

    /// Non-positive means derived from the kernel size
    pub blur_sigma: f32,

    pub hough: HoughConfig,

    pub red_band: HsvBand,

    pub yellow_band: HsvBand,

    /// A colour band must cover strictly more than this share of pixels (percent)
    pub min_color_percentage: f32,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            blur_kernel_size: 5,
            blur_sigma: 0.0,
            hough: HoughConfig::default(),
            red_band: HsvBand::RED,
            yellow_band: HsvBand::YELLOW,
            min_color_percentage: 5.0,
        }
    }
}

impl ValidatorConfig {
    pub fn check(&self) -> Result<()> {
        if self.blur_kernel_size == 0 || self.blur_kernel_size % 2 == 0 {
            return Err(RetinaError::Config(format!(
                "blur_kernel_size must be odd, got {}",
                self.blur_kernel_size
            )));
        }
        if self.hough.dp < 1.0 {
            return Err(RetinaError::Config(format!(
                "hough.dp must be >= 1, got {}",
                self.hough.dp
            )));
        }
        if self.hough.max_radius != 0 && self.hough.max_radius < self.hough.min_radius {
            return Err(RetinaError::Config(format!(
                "hough.max_radius ({}) is below hough.min_radius ({})",
                self.hough.max_radius, self.hough.min_radius
            )));
        }
        for band in [&self.red_band, &self.yellow_band] {
            if band.lower[0] > band.upper[0] || band.upper[0] >= 180 {
                return Err(RetinaError::Config(format!(
                    "invalid hue range {}..={}",
                    band.lower[0], band.upper[0]
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Square model input side
    pub input_size: u32,

    pub mean: [f32; 3],

    pub std: [f32; 3],

    /// A label is detected when its probability is strictly above this
    pub detection_threshold: f32,

    /// Column of the reference file that is not a disease label
    pub id_column: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            input_size: 224,
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
            detection_threshold: 0.5,
            id_column: "ID".to_string(),
        }
    }
}

/// Optional TOML overrides. `[server]` is merged, the other sections replace
/// their defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: Option<ServerOverrides>,
    onnx: Option<OnnxConfig>,
    validator: Option<ValidatorConfig>,
    classifier: Option<ClassifierConfig>,
}

impl Config {
    pub fn new(
        bind_addr: String,
        models_dir: String,
        workers: Option<usize>,
        dev_mode: bool,
    ) -> Result<Self> {
        let workers = workers.unwrap_or_else(num_cpus::get);

        let server_config = ServerConfig {
            request_timeout: if dev_mode { 300 } else { 60 },
            ..ServerConfig::default()
        };

        Ok(Self {
            bind_addr,
            models_dir: PathBuf::from(models_dir),
            model_file: None,
            labels_file: None,
            workers,
            dev_mode,
            onnx_config: OnnxConfig::default(),
            server_config,
            validator: ValidatorConfig::default(),
            classifier: ClassifierConfig::default(),
        })
    }

    /// Apply overrides from a TOML file.
    pub fn with_file(mut self, path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RetinaError::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        self.apply_toml(&raw)?;
        Ok(self)
    }

    pub fn apply_toml(&mut self, raw: &str) -> Result<()> {
        let file: ConfigFile = toml::from_str(raw)?;

        if let Some(server) = file.server {
            server.apply(&mut self.server_config);
        }
        if let Some(onnx) = file.onnx {
            self.onnx_config = onnx;
        }
        if let Some(validator) = file.validator {
            validator.check()?;
            self.validator = validator;
        }
        if let Some(classifier) = file.classifier {
            self.classifier = classifier;
        }
        Ok(())
    }

    /// Checkpoint path
    pub fn model_path(&self) -> PathBuf {
        self.model_file
            .clone()
            .unwrap_or_else(|| self.models_dir.join("mobile_retina_vit.onnx"))
    }

    /// Label reference file path
    pub fn labels_path(&self) -> PathBuf {
        self.labels_file
            .clone()
            .unwrap_or_else(|| self.models_dir.join("train_data.csv"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config::new("127.0.0.1:0".into(), "Model".into(), Some(2), false).unwrap()
    }

    #[test]
    fn defaults_match_reference_thresholds() {
        let config = base();
        let hough = &config.validator.hough;
        assert_eq!(hough.dp, 1.0);
        assert_eq!(hough.min_dist, 50.0);
        assert_eq!(hough.canny_threshold, 50.0);
        assert_eq!(hough.accumulator_threshold, 30);
        assert_eq!((hough.min_radius, hough.max_radius), (100, 300));
        assert_eq!(config.validator.min_color_percentage, 5.0);
        assert_eq!(config.classifier.detection_threshold, 0.5);
        assert_eq!(config.classifier.input_size, 224);
    }

    #[test]
    fn default_paths_live_in_models_dir() {
        let config = base();
        assert_eq!(config.model_path(), PathBuf::from("Model/mobile_retina_vit.onnx"));
        assert_eq!(config.labels_path(), PathBuf::from("Model/train_data.csv"));
    }

    #[test]
    fn toml_overrides_replace_sections() {
        let mut config = base();
        config
            .apply_toml(
                r#"
                [validator]
                min_color_percentage = 12.5

                [validator.hough]
                min_radius = 40
                max_radius = 120

                [classifier]
                id_column = "image_id"
                "#,
            )
            .unwrap();

        assert_eq!(config.validator.min_color_percentage, 12.5);
        assert_eq!(config.validator.hough.min_radius, 40);
        assert_eq!(config.validator.hough.accumulator_threshold, 30);
        assert_eq!(config.validator.red_band, HsvBand::RED);
        assert_eq!(config.classifier.id_column, "image_id");
        assert_eq!(config.classifier.input_size, 224);
    }

    #[test]
    fn server_section_keeps_dev_timeout() {
        let mut config = Config::new("127.0.0.1:0".into(), "Model".into(), Some(2), true).unwrap();
        config
            .apply_toml("[server]\nmax_image_width = 4096\n")
            .unwrap();

        assert_eq!(config.server_config.request_timeout, 300);
        assert_eq!(config.server_config.max_image_width, 4096);
        assert_eq!(config.server_config.max_image_height, 8192);
        assert_eq!(config.server_config.max_request_size, 50 * 1024 * 1024);

        config.apply_toml("[server]\nrequest_timeout = 15\n").unwrap();
        assert_eq!(config.server_config.request_timeout, 15);
    }

    #[test]
    fn rejects_even_blur_kernel() {
        let mut config = base();
        let err = config
            .apply_toml("[validator]\nblur_kernel_size = 4\n")
            .unwrap_err();
        assert!(matches!(err, RetinaError::Config(_)));
    }
}
