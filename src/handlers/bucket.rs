use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::BucketPatch;
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketBody {
    pub name: Option<String>,
    pub versioning: Option<VersioningBody>,
    pub default_event_based_hold: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct VersioningBody {
    pub enabled: Option<bool>,
}

impl BucketBody {
    fn versioning_enabled(&self) -> Option<bool> {
        self.versioning.as_ref().and_then(|v| v.enabled)
    }
}

pub async fn list_buckets(State(state): State<AppState>) -> Result<Response> {
    let buckets = state.backend.list_buckets().await?;
    let items: Vec<serde_json::Value> = buckets.iter().map(|b| b.to_resource()).collect();
    Ok(Json(serde_json::json!({
        "kind": "storage#buckets",
        "items": items,
    }))
    .into_response())
}

pub async fn insert_bucket(
    State(state): State<AppState>,
    body: String,
) -> Result<Response> {
    let body: BucketBody = serde_json::from_str(&body)
        .map_err(|_| Error::invalid("malformed bucket resource"))?;
    let name = body
        .name
        .as_deref()
        .ok_or_else(|| Error::invalid("bucket name is required"))?;

    debug!("creating bucket {}", name);
    let bucket = state
        .backend
        .create_bucket(name, body.versioning_enabled().unwrap_or(false))
        .await?;

    if let Some(hold) = body.default_event_based_hold {
        let patch = BucketPatch {
            default_event_based_hold: Some(hold),
            ..Default::default()
        };
        let bucket = state.backend.update_bucket(name, patch).await?;
        return Ok(Json(bucket.to_resource()).into_response());
    }
    Ok(Json(bucket.to_resource()).into_response())
}

pub async fn get_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<Response> {
    let bucket = state.backend.get_bucket(&bucket).await?;
    Ok(Json(bucket.to_resource()).into_response())
}

pub async fn update_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    body: String,
) -> Result<Response> {
    apply_bucket_patch(&state, &bucket, &body).await
}

pub async fn patch_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    body: String,
) -> Result<Response> {
    apply_bucket_patch(&state, &bucket, &body).await
}

async fn apply_bucket_patch(state: &AppState, bucket: &str, body: &str) -> Result<Response> {
    let body: BucketBody = if body.trim().is_empty() {
        BucketBody::default()
    } else {
        serde_json::from_str(body).map_err(|_| Error::invalid("malformed bucket resource"))?
    };

    let patch = BucketPatch {
        versioning_enabled: body.versioning_enabled(),
        default_event_based_hold: body.default_event_based_hold,
    };
    let bucket = state.backend.update_bucket(bucket, patch).await?;
    Ok(Json(bucket.to_resource()).into_response())
}

pub async fn delete_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<Response> {
    state.backend.delete_bucket(&bucket).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
