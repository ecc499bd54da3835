use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};

use crate::error::{Error, Result};

/// Bucket attributes as stored by a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
    #[serde(default)]
    pub versioning_enabled: bool,
    #[serde(default)]
    pub default_event_based_hold: bool,
    pub time_created: DateTime<Utc>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

impl Bucket {
    pub fn new(name: &str, versioning: bool) -> Self {
        Bucket {
            name: name.to_string(),
            versioning_enabled: versioning,
            default_event_based_hold: false,
            time_created: Utc::now(),
            updated: None,
        }
    }

    /// `storage#bucket` resource shape.
    pub fn to_resource(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": "storage#bucket",
            "id": self.name,
            "name": self.name,
            "versioning": { "enabled": self.versioning_enabled },
            "defaultEventBasedHold": self.default_event_based_hold,
            "timeCreated": rfc3339(&self.time_created),
            "updated": rfc3339(&self.updated.unwrap_or(self.time_created)),
            "location": "US-CENTRAL1",
            "storageClass": "STANDARD",
            "etag": "RVRhZw==",
        })
    }
}

/// Fields a bucket update/patch may change.
#[derive(Debug, Clone, Default)]
pub struct BucketPatch {
    pub versioning_enabled: Option<bool>,
    pub default_event_based_hold: Option<bool>,
}

/// Access control entry on an object or bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AclRule {
    pub entity: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_team: Option<ProjectTeam>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectTeam {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
}

pub fn default_acl() -> Vec<AclRule> {
    vec![AclRule {
        entity: "projectOwner-test-project".to_string(),
        role: "OWNER".to_string(),
        entity_id: None,
        domain: None,
        email: None,
        project_team: None,
    }]
}

/// Object retention configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Retention {
    pub mode: String,
    pub retain_until_time: DateTime<Utc>,
}

impl Retention {
    pub fn locked(&self) -> bool {
        self.mode == "Locked"
    }
}

/// Object attributes, shared between backends, sidecar files, JSON
/// resources and event payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectAttrs {
    pub bucket_name: String,
    pub name: String,
    pub size: i64,
    pub storage_class: String,
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub content_encoding: String,
    #[serde(default)]
    pub content_disposition: String,
    #[serde(default)]
    pub content_language: String,
    #[serde(default)]
    pub cache_control: String,
    pub crc32c: String,
    pub md5_hash: String,
    pub etag: String,
    #[serde(default)]
    pub acl: Vec<AclRule>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub deleted: Option<DateTime<Utc>>,
    #[serde(default)]
    pub custom_time: Option<DateTime<Utc>>,
    pub generation: i64,
    #[serde(default = "default_metageneration")]
    pub metageneration: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub retention: Option<Retention>,
}

fn default_metageneration() -> i64 {
    1
}

impl ObjectAttrs {
    /// Template for a not-yet-stored object; checksums, times and
    /// generation are filled in by the backend on create.
    pub fn new(bucket: &str, name: &str) -> Self {
        ObjectAttrs {
            bucket_name: bucket.to_string(),
            name: name.to_string(),
            size: 0,
            storage_class: "STANDARD".to_string(),
            content_type: String::new(),
            content_encoding: String::new(),
            content_disposition: String::new(),
            content_language: String::new(),
            cache_control: String::new(),
            crc32c: String::new(),
            md5_hash: String::new(),
            etag: String::new(),
            acl: default_acl(),
            created: Utc::now(),
            updated: Utc::now(),
            deleted: None,
            custom_time: None,
            generation: 0,
            metageneration: 1,
            metadata: HashMap::new(),
            retention: None,
        }
    }

    pub fn id(&self) -> String {
        format!("{}/{}/{}", self.bucket_name, self.name, self.generation)
    }

    /// `storage#object` resource shape. `full` projection includes the ACL.
    pub fn to_resource(&self, full_projection: bool) -> serde_json::Value {
        let mut v = serde_json::json!({
            "kind": "storage#object",
            "id": self.id(),
            "bucket": self.bucket_name,
            "name": self.name,
            "size": self.size.to_string(),
            "generation": self.generation.to_string(),
            "metageneration": self.metageneration.to_string(),
            "storageClass": self.storage_class,
            "crc32c": self.crc32c,
            "md5Hash": self.md5_hash,
            "etag": self.etag,
            "timeCreated": rfc3339(&self.created),
            "updated": rfc3339(&self.updated),
        });
        let obj = v.as_object_mut().unwrap();
        if !self.content_type.is_empty() {
            obj.insert("contentType".into(), self.content_type.clone().into());
        }
        if !self.content_encoding.is_empty() {
            obj.insert("contentEncoding".into(), self.content_encoding.clone().into());
        }
        if !self.content_disposition.is_empty() {
            obj.insert(
                "contentDisposition".into(),
                self.content_disposition.clone().into(),
            );
        }
        if !self.content_language.is_empty() {
            obj.insert("contentLanguage".into(), self.content_language.clone().into());
        }
        if !self.cache_control.is_empty() {
            obj.insert("cacheControl".into(), self.cache_control.clone().into());
        }
        if let Some(deleted) = &self.deleted {
            obj.insert("timeDeleted".into(), rfc3339(deleted).into());
        }
        if let Some(custom) = &self.custom_time {
            obj.insert("customTime".into(), rfc3339(custom).into());
        }
        if !self.metadata.is_empty() {
            obj.insert(
                "metadata".into(),
                serde_json::to_value(&self.metadata).unwrap_or_default(),
            );
        }
        if let Some(retention) = &self.retention {
            obj.insert(
                "retention".into(),
                serde_json::json!({
                    "mode": retention.mode,
                    "retainUntilTime": rfc3339(&retention.retain_until_time),
                }),
            );
        }
        if full_projection {
            obj.insert(
                "acl".into(),
                serde_json::to_value(&self.acl).unwrap_or_default(),
            );
        }
        v
    }
}

/// RFC 3339 with second precision, the format the service emits.
pub fn rfc3339(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Seekable reader backing a streaming object.
pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// Object content is either fully buffered or backed by a seekable reader
/// (a file in the filesystem backend). The streaming form is readable once
/// and buffers on demand when random access is needed.
pub enum ObjectContent {
    Buffered(Bytes),
    Streaming(Box<dyn ReadSeek>),
}

impl ObjectContent {
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        ObjectContent::Buffered(data.into())
    }

    /// Consume the content into a contiguous buffer.
    pub fn into_bytes(self) -> Result<Bytes> {
        match self {
            ObjectContent::Buffered(b) => Ok(b),
            ObjectContent::Streaming(mut r) => {
                let mut buf = Vec::new();
                r.read_to_end(&mut buf).map_err(Error::Io)?;
                Ok(Bytes::from(buf))
            }
        }
    }

    /// Read `len` bytes starting at `start` without consuming the rest.
    pub fn read_range(&mut self, start: u64, len: u64) -> Result<Vec<u8>> {
        match self {
            ObjectContent::Buffered(b) => {
                let start = start.min(b.len() as u64) as usize;
                let end = (start + len as usize).min(b.len());
                Ok(b[start..end].to_vec())
            }
            ObjectContent::Streaming(r) => {
                r.seek(SeekFrom::Start(start)).map_err(Error::Io)?;
                let mut buf = vec![0u8; len as usize];
                let mut filled = 0;
                while filled < buf.len() {
                    let n = r.read(&mut buf[filled..]).map_err(Error::Io)?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
                buf.truncate(filled);
                Ok(buf)
            }
        }
    }
}

impl std::fmt::Debug for ObjectContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectContent::Buffered(b) => write!(f, "Buffered({} bytes)", b.len()),
            ObjectContent::Streaming(_) => write!(f, "Streaming(..)"),
        }
    }
}

/// An object together with its content, as returned by backend reads and
/// accepted by `create_object`.
#[derive(Debug)]
pub struct StreamingObject {
    pub attrs: ObjectAttrs,
    pub content: ObjectContent,
}

impl StreamingObject {
    pub fn buffered(attrs: ObjectAttrs, data: impl Into<Bytes>) -> Self {
        StreamingObject {
            attrs,
            content: ObjectContent::from_bytes(data),
        }
    }

    pub fn into_bytes(self) -> Result<Bytes> {
        self.content.into_bytes()
    }
}

/// Validates a bucket name: `^[A-Za-z0-9][A-Za-z0-9._-]*[A-Za-z0-9]$`.
pub fn valid_bucket_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.len() < 2 {
        return false;
    }
    let edge_ok = |b: u8| b.is_ascii_alphanumeric();
    if !edge_ok(bytes[0]) || !edge_ok(bytes[bytes.len() - 1]) {
        return false;
    }
    bytes[1..bytes.len() - 1]
        .iter()
        .all(|&b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-')
}
