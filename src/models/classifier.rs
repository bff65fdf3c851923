use crate::diagnosis::PredictionMap;
use crate::image::ImagePreprocessor;
use crate::models::DiseaseLabels;
use crate::utils::error::RetinaError;
use crate::{Config, Result};
use image::RgbImage;
use ndarray::Array4;
use ort::{
    inputs,
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// Multi-label disease classifier over a validated retina image.
pub trait DiseaseClassifier: Send + Sync {
    /// Output labels, in prediction order
    fn labels(&self) -> &[String];

    /// Any preprocessing or inference failure comes back as
    /// `RetinaError::Classification`.
    fn classify(&self, image: &RgbImage) -> Result<PredictionMap>;

    fn name(&self) -> &str {
        "custom"
    }

    fn checkpoint(&self) -> Option<&Path> {
        None
    }
}

fn load_error<E: std::fmt::Display>(model_path: &Path) -> impl Fn(E) -> RetinaError + '_ {
    move |e| RetinaError::ModelLoad(format!("{}: {}", model_path.display(), e))
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// ViT-B/16 retina classifier exported to ONNX.
///
/// The graph ends in the replaced head (768 -> 512 -> ReLU -> Dropout(0.3) ->
/// num_classes) and emits one logit per label; it is exported in eval mode, so
/// inference is deterministic.
pub struct OnnxDiseaseClassifier {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    labels: DiseaseLabels,
    preprocessor: ImagePreprocessor,
    threshold: f32,
    model_path: PathBuf,
}

impl OnnxDiseaseClassifier {
    pub fn new(config: &Config, labels: DiseaseLabels) -> Result<Self> {
        let model_path = config.model_path();

        if !model_path.exists() {
            return Err(RetinaError::ModelLoad(format!(
                "Model checkpoint not found: {}",
                model_path.display()
            )));
        }

        tracing::info!("Loading classification model from: {}", model_path.display());

        let session = Self::build_session(config, &model_path)?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| RetinaError::ModelLoad("Classification model has no inputs".to_string()))?;

        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| RetinaError::ModelLoad("Classification model has no outputs".to_string()))?;

        tracing::info!(
            "Classification model input: '{}', output: '{}'",
            input_name,
            output_name
        );
        for (i, output) in session.outputs.iter().enumerate() {
            tracing::debug!("Classification output[{}]: '{}'", i, output.name);
        }

        let classifier = Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            labels,
            preprocessor: ImagePreprocessor::new(&config.classifier),
            threshold: config.classifier.detection_threshold,
            model_path,
        };

        classifier.check_output_width()?;
        Ok(classifier)
    }

    fn build_session(config: &Config, model_path: &Path) -> Result<Session> {
        let onnx = &config.onnx_config;
        let level = if !onnx.enable_optimization {
            GraphOptimizationLevel::Disable
        } else {
            match onnx.optimization_level {
                i32::MIN..=0 => GraphOptimizationLevel::Disable,
                1 => GraphOptimizationLevel::Level1,
                2 => GraphOptimizationLevel::Level2,
                _ => GraphOptimizationLevel::Level3,
            }
        };

        let builder = Session::builder()
            .map_err(load_error(model_path))?
            .with_optimization_level(level)
            .map_err(load_error(model_path))?
            .with_intra_threads(onnx.intra_threads)
            .map_err(load_error(model_path))?;

        #[cfg(feature = "cuda")]
        let builder = builder
            .with_execution_providers([
                ort::execution_providers::CUDAExecutionProvider::default().build(),
            ])
            .map_err(load_error(model_path))?;

        builder
            .commit_from_file(model_path)
            .map_err(load_error(model_path))
    }

    /// Run a blank input: the checkpoint must emit one score per label.
    fn check_output_width(&self) -> Result<()> {
        let side = self.preprocessor.input_size() as usize;
        let blank = Array4::<f32>::zeros((1, 3, side, side));
        let logits = self
            .forward(blank)
            .map_err(|e| RetinaError::ModelLoad(format!("startup inference failed: {}", e)))?;

        if logits.len() != self.labels.len() {
            return Err(RetinaError::ModelLoad(format!(
                "checkpoint {} produces {} outputs but the reference file declares {} labels",
                self.model_path.display(),
                logits.len(),
                self.labels.len()
            )));
        }
        Ok(())
    }

    fn forward(&self, input: Array4<f32>) -> Result<Vec<f32>> {
        let input_tensor = Tensor::from_array(input)?;

        let mut session = self.session.lock();
        let outputs = session.run(inputs![self.input_name.as_str() => input_tensor])?;

        match outputs.get(self.output_name.as_str()) {
            Some(output) => {
                let logits = output.try_extract_array::<f32>()?;
                Ok(logits.iter().copied().collect())
            }
            None => {
                let available: Vec<String> = outputs.keys().map(|s| s.to_string()).collect();
                Err(RetinaError::Inference(format!(
                    "Classification output '{}' not found. Available outputs: {:?}",
                    self.output_name, available
                )))
            }
        }
    }

    fn predict(&self, image: &RgbImage) -> Result<PredictionMap> {
        let input = self.preprocessor.to_tensor(image)?;
        let logits = self.forward(input)?;
        let probabilities: Vec<f32> = logits.into_iter().map(sigmoid).collect();
        PredictionMap::from_probabilities(self.labels.as_slice(), &probabilities, self.threshold)
    }
}

impl DiseaseClassifier for OnnxDiseaseClassifier {
    fn labels(&self) -> &[String] {
        self.labels.as_slice()
    }

    fn classify(&self, image: &RgbImage) -> Result<PredictionMap> {
        self.predict(image)
            .map_err(|e| RetinaError::Classification(e.to_string()))
    }

    fn name(&self) -> &str {
        "onnx-vit-b16"
    }

    fn checkpoint(&self) -> Option<&Path> {
        Some(&self.model_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// `[1,3,224,224] -> ReduceMean -> Gemm -> [1,4]`, biases 4, -4, 0, 2 and
    /// weights small enough that the bias decides each label.
    fn fixture_config() -> Config {
        let mut config = Config::new("127.0.0.1:0".into(), "Model".into(), Some(1), false).unwrap();
        config.model_file = Some(
            Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data/tiny_classifier.onnx"),
        );
        config.onnx_config.intra_threads = 1;
        config
    }

    fn labels(names: &[&str]) -> DiseaseLabels {
        DiseaseLabels::new(names.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    fn fundus_like() -> RgbImage {
        RgbImage::from_fn(300, 260, |x, y| Rgb([(x % 256) as u8, 90, (y % 200) as u8]))
    }

    #[test]
    fn onnx_checkpoint_scores_every_label_in_order() {
        let classifier =
            OnnxDiseaseClassifier::new(&fixture_config(), labels(&["DR", "ARMD", "MH", "DN"]))
                .unwrap();

        let predictions = classifier.classify(&fundus_like()).unwrap();
        assert_eq!(
            predictions.labels().collect::<Vec<_>>(),
            vec!["DR", "ARMD", "MH", "DN"]
        );
        for (_, p) in predictions.iter() {
            assert!((0.0..=1.0).contains(&p.probability));
            assert_eq!(p.detected, p.probability > 0.5);
        }
        assert!(predictions.get("DR").unwrap().detected);
        assert!(!predictions.get("ARMD").unwrap().detected);
        assert!(predictions.get("DN").unwrap().detected);
        assert_eq!(classifier.name(), "onnx-vit-b16");
        assert!(classifier.checkpoint().unwrap().ends_with("tiny_classifier.onnx"));
    }

    #[test]
    fn onnx_inference_is_deterministic() {
        let classifier =
            OnnxDiseaseClassifier::new(&fixture_config(), labels(&["DR", "ARMD", "MH", "DN"]))
                .unwrap();
        let image = fundus_like();

        let first = classifier.classify(&image).unwrap();
        let second = classifier.classify(&image).unwrap();
        for ((_, a), (_, b)) in first.iter().zip(second.iter()) {
            assert_eq!(a.probability.to_bits(), b.probability.to_bits());
        }
    }

    #[test]
    fn label_count_mismatch_is_fatal_at_load() {
        match OnnxDiseaseClassifier::new(&fixture_config(), labels(&["DR", "ARMD", "MH"])) {
            Err(RetinaError::ModelLoad(msg)) => assert!(msg.contains("4 outputs"), "{}", msg),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("checkpoint with 4 outputs accepted 3 labels"),
        }
    }

    #[test]
    fn sigmoid_is_bounded_and_centered() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(8.0) > 0.99);
        assert!(sigmoid(-8.0) < 0.01);
        assert_eq!(sigmoid(-1000.0), 0.0);
        assert_eq!(sigmoid(1000.0), 1.0);
    }

    #[test]
    fn missing_checkpoint_is_a_load_error() {
        let mut config = Config::new("127.0.0.1:0".into(), "Model".into(), Some(1), false).unwrap();
        config.model_file = Some(PathBuf::from("/nonexistent/model.onnx"));
        let labels = DiseaseLabels::new(vec!["DR".to_string()]).unwrap();

        match OnnxDiseaseClassifier::new(&config, labels) {
            Err(RetinaError::ModelLoad(msg)) => assert!(msg.contains("not found")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("loading a missing checkpoint succeeded"),
        }
    }
}
