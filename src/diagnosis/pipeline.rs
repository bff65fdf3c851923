use crate::{
    diagnosis::{Diagnosis, DiagnosisStats},
    image::{ImageLoader, UploadLimits},
    models::ModelManager,
    utils::error::RetinaError,
    validation::RetinaValidator,
    Result,
};
use axum::body::Bytes;
use std::sync::Arc;
use std::time::Instant;

/// decode -> validate -> classify
pub struct DiagnosisPipeline {
    validator: RetinaValidator,
    models: Arc<ModelManager>,
    limits: UploadLimits,
}

impl DiagnosisPipeline {
    pub fn new(validator: RetinaValidator, models: Arc<ModelManager>, limits: UploadLimits) -> Self {
        Self {
            validator,
            models,
            limits,
        }
    }

    pub fn validator(&self) -> &RetinaValidator {
        &self.validator
    }

    /// Run the whole pipeline on the blocking pool.
    ///
    /// Blocking tasks cannot be cancelled: when the caller is dropped (for
    /// instance by the request timeout) the task still runs to completion and
    /// its result is discarded.
    pub async fn process_bytes(self: Arc<Self>, bytes: Bytes) -> Result<Diagnosis> {
        tokio::task::spawn_blocking(move || self.diagnose(&bytes))
            .await
            .map_err(|e| RetinaError::Internal(format!("Diagnosis task failed: {}", e)))?
    }

    pub fn diagnose(&self, bytes: &[u8]) -> Result<Diagnosis> {
        let start_time = Instant::now();

        let image = ImageLoader::rgb_from_bytes(bytes, self.limits)?;
        let decode_time = start_time.elapsed();

        let validation_start = Instant::now();
        if !self.validator.validate(&image) {
            tracing::info!(
                "Rejected {}x{} upload: not a retina image",
                image.width(),
                image.height()
            );
            return Err(RetinaError::NotRetina);
        }
        let validation_time = validation_start.elapsed();

        let classification_start = Instant::now();
        let predictions = self.models.classifier().classify(&image)?;
        let classification_time = classification_start.elapsed();

        let stats = DiagnosisStats {
            decode_time_ms: decode_time.as_millis() as u64,
            validation_time_ms: validation_time.as_millis() as u64,
            classification_time_ms: classification_time.as_millis() as u64,
            total_time_ms: start_time.elapsed().as_millis() as u64,
            width: image.width(),
            height: image.height(),
        };

        tracing::info!(
            "Diagnosis completed: labels={}, detected={:?}, total_time={}ms",
            predictions.len(),
            predictions.detected().collect::<Vec<_>>(),
            stats.total_time_ms
        );

        Ok(Diagnosis { predictions, stats })
    }
}
