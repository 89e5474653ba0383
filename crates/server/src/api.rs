//! HTTP handlers.

use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::jobs::{spawn_convert_job, spawn_ingest_job, ConvertRequest};
use crate::state::AppState;
use crate::status::JobKind;

type ApiError = (StatusCode, Json<Value>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "error": message.into() })),
    )
}

fn internal(message: impl Into<String>) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": message.into() })),
    )
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// POST /convert: accept dataset metadata and convert in the background.
pub async fn convert(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<Json<Value>, ApiError> {
    let value: Value = serde_json::from_str(&body)
        .map_err(|_| bad_request("POST data empty or not JSON"))?;
    if !value.is_object() {
        return Err(bad_request("POST data empty or not JSON"));
    }
    let request: ConvertRequest = serde_json::from_value(value)
        .map_err(|e| bad_request(format!("invalid convert request: {e}")))?;

    let id = state.status.create(JobKind::Convert).await;
    info!(status_id = %id, "convert request accepted");
    spawn_convert_job(state.clone(), id, request);
    Ok(Json(json!({ "success": true, "status_id": id })))
}

/// POST /ingest: multipart `file` plus optional `status_id`.
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut file: Option<Vec<u8>> = None;
    let mut status_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("cannot read file part: {e}")))?;
                file = Some(bytes.to_vec());
            }
            Some("status_id") | Some("mdf_status_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("cannot read status id: {e}")))?;
                status_id = Some(text.trim().to_string()).filter(|s| !s.is_empty());
            }
            other => warn!(field = ?other, "ignoring multipart field"),
        }
    }

    let Some(file) = file else {
        return Err(bad_request("No feedstock file uploaded"));
    };

    let id = match status_id {
        Some(raw) => {
            let id = Uuid::parse_str(&raw).map_err(|_| bad_request(format!("invalid status id: {raw}")))?;
            if !state.status.contains(id).await {
                return Err(bad_request(format!("unknown status id: {id}")));
            }
            id
        }
        None => state.status.create(JobKind::Ingest).await,
    };

    let dir = &state.config.paths.feedstock_path;
    let path = dir.join(format!("{id}.json"));
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| internal(format!("cannot create feedstock dir: {e}")))?;
    tokio::fs::write(&path, &file)
        .await
        .map_err(|e| internal(format!("cannot save feedstock: {e}")))?;

    info!(status_id = %id, bytes = file.len(), "ingest request accepted");
    spawn_ingest_job(state.clone(), id, path);
    Ok(Json(json!({ "success": true, "status_id": id })))
}

/// GET|POST /status: every known job, oldest first.
pub async fn status_list(State(state): State<Arc<AppState>>) -> Json<Value> {
    let jobs = state.status.list().await;
    Json(json!({ "success": true, "jobs": jobs }))
}

/// GET /status/{id}
pub async fn status_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let job = state.status.get(id).await.ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": format!("status not found: {id}") })),
        )
    })?;
    Ok(Json(json!({ "success": true, "job": job })))
}
