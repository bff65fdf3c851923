pub mod classifier;
pub mod labels;
pub mod manager;

pub use classifier::{sigmoid, DiseaseClassifier, OnnxDiseaseClassifier};
pub use labels::DiseaseLabels;
pub use manager::{ModelManager, ModelStats};
