#![allow(dead_code)]

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

pub const PUBLIC_HOST: &str = "storage.googleapis.com";
pub const EXTERNAL_URL: &str = "https://storage.googleapis.com";

/// Publisher that records every event it receives, for asserting on
/// dispatch order and payload shape.
pub struct RecordingPublisher {
    pub events: Mutex<Vec<(serde_json::Value, HashMap<String, String>)>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        RecordingPublisher {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, attrs)| attrs["eventType"].clone())
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait::async_trait]
impl irongcs::Publisher for RecordingPublisher {
    async fn publish(
        &self,
        payload: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> anyhow::Result<()> {
        let doc = serde_json::from_slice(&payload)?;
        self.events.lock().unwrap().push((doc, attributes));
        Ok(())
    }
}

/// In-memory app with synchronous event publishing.
pub fn test_app() -> (Router, Arc<RecordingPublisher>) {
    let backend = Arc::new(irongcs::InMemoryBackend::new());
    let publisher = Arc::new(RecordingPublisher::new());
    let app = irongcs::app_with_publisher(
        backend,
        Some(publisher.clone()),
        PUBLIC_HOST,
        EXTERNAL_URL,
        true,
    );
    (app, publisher)
}

pub async fn send(app: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let (parts, body) = resp.into_parts();
    let bytes = body.collect().await.unwrap().to_bytes();
    (parts.status, parts.headers, bytes)
}

pub async fn send_json(app: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let (status, _, body) = send(app, req).await;
    let doc = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
    };
    (status, doc)
}

/// Creates a bucket through the JSON API.
pub async fn create_bucket(app: &Router, name: &str, versioning: bool) {
    let body = serde_json::json!({
        "name": name,
        "versioning": {"enabled": versioning},
    });
    let req = Request::builder()
        .method("POST")
        .uri("/storage/v1/b")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, _) = send_json(app, req).await;
    assert_eq!(status, StatusCode::OK);
}

/// Uploads an object through the simple-upload endpoint.
pub async fn put_object(app: &Router, bucket: &str, name: &str, content: &[u8]) -> serde_json::Value {
    let req = Request::builder()
        .method("POST")
        .uri(format!(
            "/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            bucket,
            urlencoding::encode(name)
        ))
        .header("content-type", "text/plain")
        .body(Body::from(content.to_vec()))
        .unwrap();
    let (status, doc) = send_json(app, req).await;
    assert_eq!(status, StatusCode::OK, "upload of {} failed: {}", name, doc);
    doc
}

/// Pulls a tag's text out of an XML document.
pub fn xml_tag(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].to_string())
}
