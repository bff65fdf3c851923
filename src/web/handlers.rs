use crate::{
    diagnosis::PredictionMap, utils::error::RetinaError, web::extractors::RequestId,
    web::AppState, Result,
};
use axum::{
    body::Bytes,
    extract::{Multipart, State},
    response::Json,
};
use std::sync::Arc;
use std::time::Instant;

/// Multipart upload: field `file` carries the fundus image.
pub async fn predict_handler(
    State(state): State<AppState>,
    RequestId(request_id): RequestId,
    mut multipart: Multipart,
) -> Result<Json<PredictionMap>> {
    let start_time = Instant::now();

    tracing::info!("Processing prediction request: request_id={}", request_id);

    let mut image_data: Option<Bytes> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        RetinaError::InvalidInput(format!("Failed to read multipart field: {}", e))
    })? {
        let field_name = field.name().unwrap_or("unknown").to_string();

        if field_name != "file" {
            tracing::debug!("Ignoring unknown field: {}", field_name);
            continue;
        }

        let data = field.bytes().await.map_err(|e| {
            RetinaError::InvalidInput(format!("Failed to read file data: {}", e))
        })?;

        tracing::debug!("Received file: {} bytes", data.len());
        image_data = Some(data);
    }

    let image_data = image_data
        .ok_or_else(|| RetinaError::InvalidInput("No image file provided".to_string()))?;

    let diagnosis = Arc::clone(&state.pipeline)
        .process_bytes(image_data)
        .await?;

    tracing::info!(
        "Prediction completed: request_id={}, image={}x{}, classify={}ms, time={:.3}s",
        request_id,
        diagnosis.stats.width,
        diagnosis.stats.height,
        diagnosis.stats.classification_time_ms,
        start_time.elapsed().as_secs_f32()
    );

    Ok(Json(diagnosis.predictions))
}
