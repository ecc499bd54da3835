use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::checksum;
use crate::error::{Error, Result};

pub const MAX_PART_NUMBER: i32 = 10_000;
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

#[derive(Clone)]
pub struct Part {
    pub part_number: i32,
    pub etag: String,
    pub size: u64,
    pub crc32c: String,
    pub last_modified: DateTime<Utc>,
    pub data: Bytes,
}

pub struct MultipartUpload {
    pub upload_id: String,
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
    pub initiated: DateTime<Utc>,
    pub parts: HashMap<i32, Part>,
}

/// Summary row for upload listings, detached from the live entry.
#[derive(Clone)]
pub struct UploadSummary {
    pub upload_id: String,
    pub bucket: String,
    pub key: String,
    pub initiated: DateTime<Utc>,
}

/// What a completed upload hands back: the concatenated content plus the
/// metadata captured at initiate time.
pub struct CompletedUpload {
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
    pub data: Bytes,
}

/// Server-retained state for S3-style multipart uploads, keyed by upload
/// id. Created by initiate, destroyed by abort or a successful complete.
pub struct MultipartManager {
    uploads: Mutex<HashMap<String, MultipartUpload>>,
}

impl MultipartManager {
    pub fn new() -> Self {
        MultipartManager {
            uploads: Mutex::new(HashMap::new()),
        }
    }

    pub fn initiate(
        &self,
        bucket: &str,
        key: &str,
        content_type: String,
        metadata: HashMap<String, String>,
    ) -> String {
        let upload_id = Uuid::new_v4().simple().to_string();
        debug!("multipart upload {} initiated for {}/{}", upload_id, bucket, key);
        self.uploads.lock().unwrap().insert(
            upload_id.clone(),
            MultipartUpload {
                upload_id: upload_id.clone(),
                bucket: bucket.to_string(),
                key: key.to_string(),
                content_type,
                metadata,
                initiated: Utc::now(),
                parts: HashMap::new(),
            },
        );
        upload_id
    }

    /// Stores one part, last writer wins per part number. Returns the part
    /// metadata (etag and hashes) for the response headers.
    pub fn put_part(&self, upload_id: &str, part_number: i32, data: Bytes) -> Result<Part> {
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(Error::invalid("bad partNumber"));
        }
        if data.len() as u64 > MAX_PART_SIZE {
            return Err(Error::LimitExceeded(format!(
                "part exceeds {} bytes",
                MAX_PART_SIZE
            )));
        }

        let part = Part {
            part_number,
            etag: checksum::encoded_md5(&data),
            size: data.len() as u64,
            crc32c: checksum::encoded_crc32c(&data),
            last_modified: Utc::now(),
            data,
        };

        let mut uploads = self.uploads.lock().unwrap();
        let upload = uploads.get_mut(upload_id).ok_or(Error::NoSuchUpload)?;
        let meta = part.clone();
        upload.parts.insert(part_number, part);
        Ok(meta)
    }

    /// Validates the referenced parts and assembles the final content in
    /// the requested order. The upload entry is removed on success.
    pub fn complete(
        &self,
        upload_id: &str,
        bucket: &str,
        key: &str,
        requested: &[(i32, String)],
    ) -> Result<CompletedUpload> {
        let mut uploads = self.uploads.lock().unwrap();
        let upload = uploads.get(upload_id).ok_or(Error::NoSuchUpload)?;
        if upload.bucket != bucket || upload.key != key {
            return Err(Error::NoSuchUpload);
        }
        if requested.is_empty() {
            return Err(Error::invalid("no parts in completion request"));
        }

        let mut total = 0usize;
        for (index, (number, etag)) in requested.iter().enumerate() {
            let part = upload
                .parts
                .get(number)
                .ok_or_else(|| Error::invalid(format!("part {} not uploaded", number)))?;
            if etag != "*" && etag.trim_matches('"') != part.etag {
                return Err(Error::invalid(format!(
                    "etag mismatch for part {}",
                    number
                )));
            }
            let is_final = index == requested.len() - 1;
            if !is_final && part.size < MIN_PART_SIZE {
                return Err(Error::invalid(format!(
                    "part {} is smaller than {} bytes",
                    number, MIN_PART_SIZE
                )));
            }
            total += part.data.len();
        }

        let upload = uploads.remove(upload_id).unwrap();
        let mut data = Vec::with_capacity(total);
        for (number, _) in requested {
            data.extend_from_slice(&upload.parts[number].data);
        }
        debug!(
            "multipart upload {} completed with {} parts, {} bytes",
            upload_id,
            requested.len(),
            data.len()
        );
        Ok(CompletedUpload {
            bucket: upload.bucket,
            key: upload.key,
            content_type: upload.content_type,
            metadata: upload.metadata,
            data: Bytes::from(data),
        })
    }

    pub fn abort(&self, upload_id: &str) -> Result<()> {
        self.uploads
            .lock()
            .unwrap()
            .remove(upload_id)
            .map(|_| ())
            .ok_or(Error::NoSuchUpload)
    }

    /// All open uploads for a bucket, sorted by key then upload id.
    pub fn list_uploads(&self, bucket: &str) -> Vec<UploadSummary> {
        let uploads = self.uploads.lock().unwrap();
        let mut rows: Vec<UploadSummary> = uploads
            .values()
            .filter(|u| u.bucket == bucket)
            .map(|u| UploadSummary {
                upload_id: u.upload_id.clone(),
                bucket: u.bucket.clone(),
                key: u.key.clone(),
                initiated: u.initiated,
            })
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key).then(a.upload_id.cmp(&b.upload_id)));
        rows
    }

    /// Parts of one upload sorted by part number, without their content.
    pub fn list_parts(&self, upload_id: &str, bucket: &str, key: &str) -> Result<Vec<Part>> {
        let uploads = self.uploads.lock().unwrap();
        let upload = uploads.get(upload_id).ok_or(Error::NoSuchUpload)?;
        if upload.bucket != bucket || upload.key != key {
            return Err(Error::NoSuchUpload);
        }
        let mut parts: Vec<Part> = upload
            .parts
            .values()
            .map(|p| Part {
                data: Bytes::new(),
                ..p.clone()
            })
            .collect();
        parts.sort_by_key(|p| p.part_number);
        Ok(parts)
    }
}

impl Default for MultipartManager {
    fn default() -> Self {
        Self::new()
    }
}
