use crate::utils::error::RetinaError;
use crate::Result;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiseasePrediction {
    /// Independent sigmoid probability in [0, 1]
    pub probability: f32,
    pub detected: bool,
}

/// Per-label predictions in label order. Serializes as a JSON object whose keys
/// keep that order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PredictionMap {
    entries: Vec<(String, DiseasePrediction)>,
}

impl PredictionMap {
    /// Pair labels with probabilities; `detected` iff probability > `threshold`.
    pub fn from_probabilities(labels: &[String], probabilities: &[f32], threshold: f32) -> Result<Self> {
        if labels.len() != probabilities.len() {
            return Err(RetinaError::Inference(format!(
                "model produced {} scores for {} labels",
                probabilities.len(),
                labels.len()
            )));
        }

        let mut entries = Vec::with_capacity(labels.len());
        for (label, &probability) in labels.iter().zip(probabilities) {
            if !(0.0..=1.0).contains(&probability) {
                return Err(RetinaError::Inference(format!(
                    "probability {} for '{}' outside [0, 1]",
                    probability, label
                )));
            }
            entries.push((
                label.clone(),
                DiseasePrediction {
                    probability,
                    detected: probability > threshold,
                },
            ));
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&DiseasePrediction> {
        self.entries
            .iter()
            .find(|(name, _)| name == label)
            .map(|(_, prediction)| prediction)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DiseasePrediction)> {
        self.entries.iter().map(|(name, p)| (name.as_str(), p))
    }

    pub fn detected(&self) -> impl Iterator<Item = &str> {
        self.iter().filter(|(_, p)| p.detected).map(|(name, _)| name)
    }
}

impl Serialize for PredictionMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (label, prediction) in &self.entries {
            map.serialize_entry(label, prediction)?;
        }
        map.end()
    }
}

/// Stage timings of one diagnosis
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnosisStats {
    pub decode_time_ms: u64,
    pub validation_time_ms: u64,
    pub classification_time_ms: u64,
    pub total_time_ms: u64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct Diagnosis {
    pub predictions: PredictionMap,
    pub stats: DiagnosisStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<String> {
        ["DR", "ARMD", "MH"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn detection_threshold_is_strict() {
        let map = PredictionMap::from_probabilities(&labels(), &[0.5, 0.5001, 0.1], 0.5).unwrap();
        assert!(!map.get("DR").unwrap().detected);
        assert!(map.get("ARMD").unwrap().detected);
        assert!(!map.get("MH").unwrap().detected);
        assert_eq!(map.detected().collect::<Vec<_>>(), vec!["ARMD"]);
    }

    #[test]
    fn serializes_in_label_order() {
        let labels: Vec<String> = ["zeta", "alpha", "mid"].iter().map(|s| s.to_string()).collect();
        let map = PredictionMap::from_probabilities(&labels, &[0.9, 0.2, 0.6], 0.5).unwrap();
        let json = serde_json::to_string(&map).unwrap();

        let zeta = json.find("\"zeta\"").unwrap();
        let alpha = json.find("\"alpha\"").unwrap();
        let mid = json.find("\"mid\"").unwrap();
        assert!(zeta < alpha && alpha < mid);
        assert!(json.contains("\"alpha\":{\"probability\":0.2,\"detected\":false}"));
    }

    #[test]
    fn length_mismatch_is_an_inference_error() {
        let err = PredictionMap::from_probabilities(&labels(), &[0.1, 0.2], 0.5).unwrap_err();
        assert!(matches!(err, RetinaError::Inference(_)));
    }

    #[test]
    fn out_of_range_probability_is_refused() {
        assert!(PredictionMap::from_probabilities(&labels(), &[0.1, f32::NAN, 0.3], 0.5).is_err());
        assert!(PredictionMap::from_probabilities(&labels(), &[0.1, 1.2, 0.3], 0.5).is_err());
    }
}
