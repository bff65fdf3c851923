use crate::models::{DiseaseClassifier, DiseaseLabels, OnnxDiseaseClassifier};
use crate::utils::error::RetinaError;
use crate::{Config, Result};
use std::sync::Arc;

/// Owns the process-wide classifier. Built once at startup and handed to the
/// web layer; read-only afterwards.
pub struct ModelManager {
    classifier: Arc<dyn DiseaseClassifier>,
    config: Config,
}

impl ModelManager {
    /// Load labels and checkpoint. Any failure here is fatal for the service.
    pub fn load(config: Config) -> Result<Self> {
        tracing::info!("Initializing model manager...");

        let labels_path = config.labels_path();
        let labels = DiseaseLabels::from_reference_file(&labels_path, &config.classifier.id_column)?;
        tracing::debug!("Disease labels: {:?}", labels.as_slice());

        let classifier = OnnxDiseaseClassifier::new(&config, labels)?;

        tracing::info!("Model manager initialized successfully");
        Ok(Self::with_classifier(Arc::new(classifier), config))
    }

    /// Wrap an already constructed classifier.
    pub fn with_classifier(classifier: Arc<dyn DiseaseClassifier>, config: Config) -> Self {
        Self { classifier, config }
    }

    pub fn classifier(&self) -> Arc<dyn DiseaseClassifier> {
        Arc::clone(&self.classifier)
    }

    pub fn labels(&self) -> &[String] {
        self.classifier.labels()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn health_check(&self) -> Result<()> {
        tracing::debug!("Performing model health check...");

        if self.labels().is_empty() {
            return Err(RetinaError::ModelLoad("classifier has no labels".to_string()));
        }
        if let Some(path) = self.classifier.checkpoint() {
            if !path.exists() {
                return Err(RetinaError::ModelLoad(format!(
                    "checkpoint {} disappeared",
                    path.display()
                )));
            }
        }

        tracing::debug!("Model health check passed");
        Ok(())
    }

    pub fn get_stats(&self) -> ModelStats {
        ModelStats {
            classifier: self.classifier.name().to_string(),
            checkpoint: self
                .classifier
                .checkpoint()
                .map(|p| p.display().to_string()),
            num_labels: self.labels().len(),
            labels: self.labels().to_vec(),
            input_size: self.config.classifier.input_size,
            detection_threshold: self.config.classifier.detection_threshold,
            intra_threads: self.config.onnx_config.intra_threads,
            optimization_level: self.config.onnx_config.optimization_level,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ModelStats {
    pub classifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    pub num_labels: usize,
    pub labels: Vec<String>,
    pub input_size: u32,
    pub detection_threshold: f32,
    pub intra_threads: usize,
    pub optimization_level: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnosis::PredictionMap;
    use image::RgbImage;

    struct Fixed(Vec<String>);

    impl DiseaseClassifier for Fixed {
        fn labels(&self) -> &[String] {
            &self.0
        }

        fn classify(&self, _image: &RgbImage) -> Result<PredictionMap> {
            PredictionMap::from_probabilities(&self.0, &vec![0.25; self.0.len()], 0.5)
        }
    }

    fn config() -> Config {
        Config::new("127.0.0.1:0".into(), "Model".into(), Some(1), false).unwrap()
    }

    #[test]
    fn injected_classifier_reports_stats() {
        let manager = ModelManager::with_classifier(
            Arc::new(Fixed(vec!["DR".into(), "MH".into()])),
            config(),
        );
        manager.health_check().unwrap();

        let stats = manager.get_stats();
        assert_eq!(stats.classifier, "custom");
        assert_eq!(stats.num_labels, 2);
        assert_eq!(stats.labels, vec!["DR", "MH"]);
        assert!(stats.checkpoint.is_none());
    }

    #[test]
    fn empty_label_set_fails_health_check() {
        let manager = ModelManager::with_classifier(Arc::new(Fixed(Vec::new())), config());
        assert!(manager.health_check().is_err());
    }

    fn reference_csv(header: &str) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", header).unwrap();
        writeln!(file, "1,0,1,0,0").unwrap();
        file
    }

    fn onnx_config(labels: &std::path::Path) -> Config {
        let mut config = config();
        config.model_file = Some(
            std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data/tiny_classifier.onnx"),
        );
        config.labels_file = Some(labels.to_path_buf());
        config
    }

    #[test]
    fn loads_checkpoint_with_labels_from_reference_file() {
        let csv = reference_csv("ID,DR,ARMD,MH,DN");
        let manager = ModelManager::load(onnx_config(csv.path())).unwrap();

        manager.health_check().unwrap();
        assert_eq!(manager.labels(), ["DR", "ARMD", "MH", "DN"]);
        let stats = manager.get_stats();
        assert_eq!(stats.classifier, "onnx-vit-b16");
        assert!(stats.checkpoint.unwrap().ends_with("tiny_classifier.onnx"));
    }

    #[test]
    fn load_refuses_checkpoint_with_other_label_count() {
        let csv = reference_csv("ID,DR,ARMD,MH,DN,ODC");
        let err = ModelManager::load(onnx_config(csv.path())).err().unwrap();
        assert!(matches!(err, RetinaError::ModelLoad(_)));
    }

    #[test]
    fn load_fails_without_reference_file() {
        let mut config = config();
        config.models_dir = "/nonexistent/models".into();
        let err = ModelManager::load(config).err().unwrap();
        assert!(matches!(err, RetinaError::LabelFile(_)));
    }
}
