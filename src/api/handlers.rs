//! HTTP handlers for try-on, health and readiness

use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::codec::ImagePayload;
use crate::dispatch::TryOnRequest;
use crate::error::{AppError, Result};
use crate::model::{Device, LoadState, Precision};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct TryOnResponse {
    pub result: String,
}

/// `POST /tryon` with multipart fields `person` and `cloth`
pub async fn tryon(
    State(state): State<Arc<AppState>>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<TryOnResponse>> {
    let mut multipart =
        multipart.map_err(|e| AppError::Validation(format!("Expected a multipart form: {}", e)))?;

    let mut request = TryOnRequest::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to read multipart field: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name != "person" && name != "cloth" {
            continue;
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Failed to read '{}': {}", name, e)))?;
        let payload = Some(ImagePayload::Binary(bytes.to_vec()));

        if name == "person" {
            request.person = payload;
        } else {
            request.cloth = payload;
        }
    }

    let output = state.dispatcher.handle(request).await?;
    Ok(Json(TryOnResponse {
        result: output.result,
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub model_error: Option<String>,
    pub state: LoadState,
    pub model_id: Option<String>,
    pub device: Option<Device>,
    pub precision: Option<Precision>,
    pub loaded_at: Option<DateTime<Utc>>,
}

/// `GET /health`; answers even when the model failed to load
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = state.resource.status();
    Json(HealthResponse {
        status: "ok",
        model_loaded: status.state == LoadState::Ready,
        model_error: status.last_error,
        state: status.state,
        model_id: status.model_id,
        device: status.device,
        precision: status.precision,
        loaded_at: status.loaded_at,
    })
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct NotReadyResponse {
    pub status: &'static str,
    pub model_error: Option<String>,
}

/// `GET /ready`; 503 until the model is usable
pub async fn ready(State(state): State<Arc<AppState>>) -> Response {
    let status = state.resource.status();
    if status.state == LoadState::Ready {
        return Json(ReadyResponse { status: "ready" }).into_response();
    }

    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(NotReadyResponse {
            status: "not ready",
            model_error: status.last_error,
        }),
    )
        .into_response()
}
