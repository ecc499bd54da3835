use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::notify::NotificationConfig;
use crate::server::AppState;

/// Request body for inserting a notification config. The service resource
/// uses snake_case field names.
#[derive(Debug, Deserialize)]
pub struct NotificationBody {
    pub topic: Option<String>,
    #[serde(default)]
    pub payload_format: Option<String>,
    #[serde(default)]
    pub object_name_prefix: Option<String>,
    #[serde(default)]
    pub event_types: Option<Vec<String>>,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<Response> {
    state.backend.get_bucket(&bucket).await?;
    let items: Vec<serde_json::Value> = state
        .notifications
        .list(&bucket)
        .iter()
        .map(|c| c.to_resource())
        .collect();
    Ok(Json(serde_json::json!({
        "kind": "storage#notifications",
        "items": items,
    }))
    .into_response())
}

pub async fn insert_notification(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    body: String,
) -> Result<Response> {
    state.backend.get_bucket(&bucket).await?;
    let body: NotificationBody = serde_json::from_str(&body)
        .map_err(|_| Error::invalid("malformed notification config"))?;
    let topic = body
        .topic
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::invalid("topic is required"))?;

    let config = state.notifications.insert(
        &bucket,
        NotificationConfig {
            id: String::new(),
            bucket_name: bucket.clone(),
            topic,
            payload_format: body.payload_format.unwrap_or_default(),
            object_name_prefix: body.object_name_prefix,
            event_types: body.event_types,
        },
    );
    Ok(Json(config.to_resource()).into_response())
}

pub async fn get_notification(
    State(state): State<AppState>,
    Path((bucket, id)): Path<(String, String)>,
) -> Result<Response> {
    state.backend.get_bucket(&bucket).await?;
    let config = state.notifications.get(&bucket, &id)?;
    Ok(Json(config.to_resource()).into_response())
}

pub async fn delete_notification(
    State(state): State<AppState>,
    Path((bucket, id)): Path<(String, String)>,
) -> Result<Response> {
    state.backend.get_bucket(&bucket).await?;
    state.notifications.delete(&bucket, &id)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
