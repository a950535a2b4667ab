//! HTTP handlers.

use crate::engine::UploadedImage;
use crate::error::ApiError;
use crate::server::AppState;
use anyhow::Context;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const ROOT_GREETING: &str = "This is a dev face recogntion server!";

/// Body of a successful comparison.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct MatchResponse {
    pub matched: bool,
}

/// `GET /` — static payload, doubles as a liveness check.
pub async fn root_page() -> Json<Value> {
    Json(json!({ "Hi!": ROOT_GREETING }))
}

/// `POST /face-recognition` — do `file1` and `file2` show the same face?
pub async fn compare_faces(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<MatchResponse>, ApiError> {
    tracing::info!("received a request to compare faces");

    let mut multipart = multipart.context("request is not a readable multipart form")?;
    let (first, second) = read_uploads(&mut multipart).await?;

    let matched = state
        .engine
        .compare(first, second)
        .await
        .context("face comparison failed")?;

    tracing::info!(matched, "face comparison successful");
    Ok(Json(MatchResponse { matched }))
}

/// Read every part, keeping `file1` and `file2` fully in memory.
///
/// Only file parts (those with a filename) count as uploads; other parts are
/// skipped. A repeated upload keeps its last occurrence.
async fn read_uploads(
    multipart: &mut Multipart,
) -> Result<(UploadedImage, UploadedImage), ApiError> {
    let mut file1 = None;
    let mut file2 = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .context("failed to read multipart field")?
    {
        let slot = match field.name() {
            Some("file1") => &mut file1,
            Some("file2") => &mut file2,
            other => {
                tracing::debug!(field = ?other, "ignoring unexpected form field");
                continue;
            }
        };

        let name = field.name().unwrap_or_default().to_owned();
        if field.file_name().is_none() {
            tracing::debug!(part = %name, "ignoring non-file value for upload part");
            continue;
        }

        let content_type = field.content_type().map(str::to_owned);
        let bytes = field
            .bytes()
            .await
            .with_context(|| format!("failed to read upload part {name}"))?;

        tracing::debug!(
            part = %name,
            size = bytes.len(),
            content_type = ?content_type,
            "upload part read"
        );
        *slot = Some(UploadedImage { bytes, content_type });
    }

    let file1 = file1.ok_or(ApiError::MissingPart("file1"))?;
    let file2 = file2.ok_or(ApiError::MissingPart("file2"))?;
    Ok((file1, file2))
}
