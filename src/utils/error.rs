use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Message returned when an upload fails retina validation.
pub const NOT_RETINA_MESSAGE: &str =
    "This image does not appear to be a retina image. Please upload a valid retina image.";

/// Message returned when the classifier could not produce predictions.
pub const CLASSIFICATION_FAILED_MESSAGE: &str = "Failed to process the image. Please try again.";

#[derive(Error, Debug)]
pub enum RetinaError {
    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Label reference file error: {0}")]
    LabelFile(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("File too large: {0} bytes, max allowed: {1} bytes")]
    FileTooLarge(usize, usize),

    #[error("Image too large: {0}")]
    ImageTooLarge(String),

    #[error("Image decode error: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("{}", NOT_RETINA_MESSAGE)]
    NotRetina,

    /// The cause is kept for the logs only; clients get a fixed message.
    #[error("{}", CLASSIFICATION_FAILED_MESSAGE)]
    Classification(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl RetinaError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RetinaError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RetinaError::NotRetina => StatusCode::BAD_REQUEST,
            RetinaError::FileTooLarge(_, _) => StatusCode::PAYLOAD_TOO_LARGE,
            RetinaError::ImageTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            RetinaError::ModelLoad(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            RetinaError::ModelLoad(_) => "MODEL_LOAD_ERROR",
            RetinaError::Config(_) => "CONFIG_ERROR",
            RetinaError::LabelFile(_) => "LABEL_FILE_ERROR",
            RetinaError::InvalidInput(_) => "INVALID_INPUT",
            RetinaError::FileTooLarge(_, _) => "FILE_TOO_LARGE",
            RetinaError::ImageTooLarge(_) => "IMAGE_TOO_LARGE",
            RetinaError::ImageDecode(_) => "IMAGE_DECODE_ERROR",
            RetinaError::NotRetina => "NOT_RETINA_IMAGE",
            RetinaError::Classification(_) => "CLASSIFICATION_ERROR",
            RetinaError::Inference(_) => "INFERENCE_ERROR",
            RetinaError::Io(_) => "IO_ERROR",
            RetinaError::Ort(_) => "ORT_ERROR",
            RetinaError::Toml(_) => "TOML_ERROR",
            RetinaError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for RetinaError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();
        let error_response = serde_json::json!({
            "detail": message,
            "error": {
                "code": self.error_code(),
                "message": message,
            }
        });

        match &self {
            RetinaError::NotRetina => tracing::info!("Request rejected: {} ({})", self, status),
            RetinaError::Classification(cause) => {
                tracing::error!("Classification failed: {} ({})", cause, status)
            }
            _ => tracing::error!("Request failed: {} ({})", self, status),
        }

        (status, axum::Json(error_response)).into_response()
    }
}
