use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::backend::{CreateOutcome, DeleteOutcome};
use crate::error::{Error, Result};
use crate::models::{rfc3339, ObjectAttrs};

/// Sink for object mutation events. Implemented by the embedding process;
/// an absent publisher disables event dispatch entirely.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        payload: Vec<u8>,
        attributes: HashMap<String, String>,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Finalize,
    Delete,
    Archive,
    MetadataUpdate,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Finalize => "OBJECT_FINALIZE",
            EventKind::Delete => "OBJECT_DELETE",
            EventKind::Archive => "OBJECT_ARCHIVE",
            EventKind::MetadataUpdate => "OBJECT_METADATA_UPDATE",
        }
    }
}

/// Which event kinds the manager forwards.
#[derive(Debug, Clone, Copy)]
pub struct EventMask {
    pub finalize: bool,
    pub delete: bool,
    pub archive: bool,
    pub metadata_update: bool,
}

impl EventMask {
    pub fn all() -> Self {
        EventMask {
            finalize: true,
            delete: true,
            archive: true,
            metadata_update: true,
        }
    }

    /// Parses a comma-separated list such as
    /// `OBJECT_FINALIZE,OBJECT_DELETE`. Empty input enables everything.
    pub fn parse(spec: &str) -> Self {
        if spec.trim().is_empty() {
            return EventMask::all();
        }
        let mut mask = EventMask {
            finalize: false,
            delete: false,
            archive: false,
            metadata_update: false,
        };
        for kind in spec.split(',') {
            match kind.trim() {
                "OBJECT_FINALIZE" => mask.finalize = true,
                "OBJECT_DELETE" => mask.delete = true,
                "OBJECT_ARCHIVE" => mask.archive = true,
                "OBJECT_METADATA_UPDATE" => mask.metadata_update = true,
                other => warn!("ignoring unknown event type {:?}", other),
            }
        }
        mask
    }

    fn allows(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::Finalize => self.finalize,
            EventKind::Delete => self.delete,
            EventKind::Archive => self.archive,
            EventKind::MetadataUpdate => self.metadata_update,
        }
    }
}

/// A single mutation to report.
pub struct Event<'a> {
    pub kind: EventKind,
    pub attrs: &'a ObjectAttrs,
    pub overwrote_generation: Option<i64>,
    pub overwritten_by_generation: Option<i64>,
}

impl<'a> Event<'a> {
    pub fn new(kind: EventKind, attrs: &'a ObjectAttrs) -> Self {
        Event {
            kind,
            attrs,
            overwrote_generation: None,
            overwritten_by_generation: None,
        }
    }
}

/// Filters mutations by object-name prefix and event-kind mask and hands
/// the surviving payloads to the publisher. Dispatch is fire-and-forget
/// unless `sync_publish` is set, in which case the caller awaits the
/// publish and ordering equals handler execution order.
pub struct EventManager {
    publisher: Option<Arc<dyn Publisher>>,
    object_prefix: String,
    mask: EventMask,
    sync_publish: bool,
}

impl EventManager {
    pub fn new(
        publisher: Option<Arc<dyn Publisher>>,
        object_prefix: String,
        mask: EventMask,
        sync_publish: bool,
    ) -> Self {
        EventManager {
            publisher,
            object_prefix,
            mask,
            sync_publish,
        }
    }

    pub fn disabled() -> Self {
        EventManager::new(None, String::new(), EventMask::all(), false)
    }

    pub async fn trigger(&self, event: Event<'_>) {
        let publisher = match &self.publisher {
            Some(p) => p.clone(),
            None => return,
        };
        if !self.mask.allows(event.kind) {
            return;
        }
        if !self.object_prefix.is_empty() && !event.attrs.name.starts_with(&self.object_prefix) {
            return;
        }

        let payload = event_payload(event.attrs);
        let attributes = event_attributes(&event);
        debug!(
            "dispatching {} for {}/{}",
            event.kind.as_str(),
            event.attrs.bucket_name,
            event.attrs.name
        );

        if self.sync_publish {
            if let Err(e) = publisher.publish(payload, attributes).await {
                warn!("event publish failed: {}", e);
            }
        } else {
            tokio::spawn(async move {
                if let Err(e) = publisher.publish(payload, attributes).await {
                    warn!("event publish failed: {}", e);
                }
            });
        }
    }
}

/// `storage#object`-shaped JSON document carried as the event payload.
fn event_payload(attrs: &ObjectAttrs) -> Vec<u8> {
    let mut doc = serde_json::json!({
        "kind": "storage#object",
        "id": attrs.id(),
        "name": attrs.name,
        "bucket": attrs.bucket_name,
        "generation": attrs.generation.to_string(),
        "contentType": attrs.content_type,
        "timeCreated": rfc3339(&attrs.created),
        "updated": rfc3339(&attrs.updated),
        "storageClass": attrs.storage_class,
        "size": attrs.size.to_string(),
        "md5Hash": attrs.md5_hash,
        "crc32c": attrs.crc32c,
    });
    let obj = doc.as_object_mut().unwrap();
    if !attrs.content_encoding.is_empty() {
        obj.insert("contentEncoding".into(), attrs.content_encoding.clone().into());
    }
    if !attrs.metadata.is_empty() {
        obj.insert(
            "metadata".into(),
            serde_json::to_value(&attrs.metadata).unwrap_or_default(),
        );
    }
    doc.to_string().into_bytes()
}

/// Emits the event pair for a successful create: archive-or-delete for a
/// replaced current version, then finalize for the new generation.
pub async fn publish_create_events(events: &EventManager, outcome: &CreateOutcome) {
    if let Some(replaced) = &outcome.replaced {
        let kind = if replaced.archived {
            EventKind::Archive
        } else {
            EventKind::Delete
        };
        let mut event = Event::new(kind, &replaced.attrs);
        event.overwritten_by_generation = Some(outcome.attrs.generation);
        events.trigger(event).await;
    }
    let mut event = Event::new(EventKind::Finalize, &outcome.attrs);
    event.overwrote_generation = outcome.replaced.as_ref().map(|r| r.attrs.generation);
    events.trigger(event).await;
}

pub async fn publish_delete_events(events: &EventManager, outcome: &DeleteOutcome) {
    let kind = if outcome.archived {
        EventKind::Archive
    } else {
        EventKind::Delete
    };
    events.trigger(Event::new(kind, &outcome.attrs)).await;
}

/// A registered notification configuration, keyed by `(bucket, id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub id: String,
    pub bucket_name: String,
    pub topic: String,
    pub payload_format: String,
    #[serde(default)]
    pub object_name_prefix: Option<String>,
    #[serde(default)]
    pub event_types: Option<Vec<String>>,
}

impl NotificationConfig {
    pub fn to_resource(&self) -> serde_json::Value {
        let mut doc = serde_json::json!({
            "kind": "storage#notification",
            "id": self.id,
            "topic": self.topic,
            "payload_format": self.payload_format,
            "etag": self.id,
            "selfLink": format!(
                "/storage/v1/b/{}/notificationConfigs/{}",
                self.bucket_name, self.id
            ),
        });
        let obj = doc.as_object_mut().unwrap();
        if let Some(prefix) = &self.object_name_prefix {
            obj.insert("object_name_prefix".into(), prefix.clone().into());
        }
        if let Some(types) = &self.event_types {
            obj.insert(
                "event_types".into(),
                serde_json::to_value(types).unwrap_or_default(),
            );
        }
        doc
    }
}

/// Per-bucket registry of notification configs with dense server-assigned
/// string ids.
pub struct NotificationRegistry {
    inner: Mutex<HashMap<String, Vec<NotificationConfig>>>,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        NotificationRegistry {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn list(&self, bucket: &str) -> Vec<NotificationConfig> {
        self.inner
            .lock()
            .unwrap()
            .get(bucket)
            .cloned()
            .unwrap_or_default()
    }

    pub fn insert(&self, bucket: &str, mut config: NotificationConfig) -> NotificationConfig {
        let mut inner = self.inner.lock().unwrap();
        let entries = inner.entry(bucket.to_string()).or_default();
        let next_id = entries
            .iter()
            .filter_map(|c| c.id.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        config.id = next_id.to_string();
        config.bucket_name = bucket.to_string();
        if config.payload_format.is_empty() {
            config.payload_format = "JSON_API_V1".to_string();
        }
        entries.push(config.clone());
        config
    }

    pub fn get(&self, bucket: &str, id: &str) -> Result<NotificationConfig> {
        self.inner
            .lock()
            .unwrap()
            .get(bucket)
            .and_then(|entries| entries.iter().find(|c| c.id == id).cloned())
            .ok_or(Error::NoSuchNotification)
    }

    pub fn delete(&self, bucket: &str, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let entries = inner.get_mut(bucket).ok_or(Error::NoSuchNotification)?;
        let before = entries.len();
        entries.retain(|c| c.id != id);
        if entries.len() == before {
            return Err(Error::NoSuchNotification);
        }
        Ok(())
    }
}

impl Default for NotificationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn event_attributes(event: &Event<'_>) -> HashMap<String, String> {
    let attrs = event.attrs;
    let mut out = HashMap::from([
        ("bucketId".to_string(), attrs.bucket_name.clone()),
        (
            "eventTime".to_string(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
        ("eventType".to_string(), event.kind.as_str().to_string()),
        (
            "objectGeneration".to_string(),
            attrs.generation.to_string(),
        ),
        ("objectId".to_string(), attrs.name.clone()),
        ("payloadFormat".to_string(), "JSON_API_V1".to_string()),
    ]);
    if let Some(g) = event.overwrote_generation {
        out.insert("overwroteGeneration".to_string(), g.to_string());
    }
    if let Some(g) = event.overwritten_by_generation {
        out.insert("overwrittenByGeneration".to_string(), g.to_string());
    }
    out
}
