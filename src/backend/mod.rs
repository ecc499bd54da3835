pub mod filesystem;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::models::{AclRule, Bucket, BucketPatch, ObjectAttrs, Retention, StreamingObject};

pub use filesystem::FilesystemBackend;
pub use memory::InMemoryBackend;

/// Generation/metageneration preconditions attached to a write.
/// A match against a missing object compares against generation 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct Conditions {
    pub if_generation_match: Option<i64>,
    pub if_generation_not_match: Option<i64>,
    pub if_metageneration_match: Option<i64>,
    pub if_metageneration_not_match: Option<i64>,
}

impl Conditions {
    pub fn check(&self, current: Option<&ObjectAttrs>) -> Result<()> {
        let generation = current.map(|a| a.generation).unwrap_or(0);
        let metageneration = current.map(|a| a.metageneration).unwrap_or(0);

        if let Some(want) = self.if_generation_match {
            if generation != want {
                return Err(Error::PreconditionFailed(format!(
                    "generation {} does not match {}",
                    generation, want
                )));
            }
        }
        if let Some(taboo) = self.if_generation_not_match {
            if generation == taboo {
                return Err(Error::PreconditionFailed(format!(
                    "generation matches {}",
                    taboo
                )));
            }
        }
        if let Some(want) = self.if_metageneration_match {
            if metageneration != want {
                return Err(Error::PreconditionFailed(format!(
                    "metageneration {} does not match {}",
                    metageneration, want
                )));
            }
        }
        if let Some(taboo) = self.if_metageneration_not_match {
            if metageneration == taboo {
                return Err(Error::PreconditionFailed(format!(
                    "metageneration matches {}",
                    taboo
                )));
            }
        }
        Ok(())
    }
}

/// The previous current version displaced by a create or delete.
/// `archived` tells whether it was moved to the archive (versioned bucket)
/// or dropped outright.
#[derive(Debug)]
pub struct Replaced {
    pub attrs: ObjectAttrs,
    pub archived: bool,
}

#[derive(Debug)]
pub struct CreateOutcome {
    pub attrs: ObjectAttrs,
    pub replaced: Option<Replaced>,
}

#[derive(Debug)]
pub struct DeleteOutcome {
    pub attrs: ObjectAttrs,
    pub archived: bool,
}

/// Metadata changes for patch (merge) and update (replace) operations.
/// `metadata` values of `None` delete the key on patch.
#[derive(Debug, Clone, Default)]
pub struct ObjectPatch {
    pub metadata: Option<HashMap<String, Option<String>>>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub content_disposition: Option<String>,
    pub content_language: Option<String>,
    pub cache_control: Option<String>,
    pub storage_class: Option<String>,
    pub custom_time: Option<DateTime<Utc>>,
    pub acl: Option<Vec<AclRule>>,
    pub event_based_hold: Option<bool>,
    pub retention: Option<Option<Retention>>,
}

#[derive(Debug, Clone)]
pub struct ComposeSource {
    pub name: String,
    pub generation: Option<i64>,
}

pub const MAX_COMPOSE_SOURCES: usize = 32;

/// Storage contract shared by the memory and filesystem backends. Writes to
/// one (bucket, name) are totally ordered by the backend's lock.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn create_bucket(&self, name: &str, versioning: bool) -> Result<Bucket>;
    async fn get_bucket(&self, name: &str) -> Result<Bucket>;
    async fn list_buckets(&self) -> Result<Vec<Bucket>>;
    async fn update_bucket(&self, name: &str, patch: BucketPatch) -> Result<Bucket>;
    async fn delete_bucket(&self, name: &str) -> Result<()>;

    /// Consumes the stream, computes size/crc32c/md5/etag, assigns a fresh
    /// generation unless one was supplied, and archives or drops any
    /// previous current version per the bucket's versioning flag.
    async fn create_object(
        &self,
        obj: StreamingObject,
        conditions: Conditions,
    ) -> Result<CreateOutcome>;

    /// Current version only.
    async fn get_object(&self, bucket: &str, name: &str) -> Result<StreamingObject>;

    /// Matches the current version or any archived generation.
    async fn get_object_with_generation(
        &self,
        bucket: &str,
        name: &str,
        generation: i64,
    ) -> Result<StreamingObject>;

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        versions: bool,
    ) -> Result<Vec<ObjectAttrs>>;

    async fn delete_object(&self, bucket: &str, name: &str) -> Result<DeleteOutcome>;

    /// Merge semantics: patch metadata keys overwrite per key, absent keys
    /// are preserved, `None` values delete.
    async fn patch_object(
        &self,
        bucket: &str,
        name: &str,
        patch: ObjectPatch,
    ) -> Result<ObjectAttrs>;

    /// Replace semantics: the whole metadata mapping is swapped out.
    async fn update_object(
        &self,
        bucket: &str,
        name: &str,
        patch: ObjectPatch,
    ) -> Result<ObjectAttrs>;

    /// Concatenates up to 32 sources into a new current generation of the
    /// destination.
    async fn compose_object(
        &self,
        bucket: &str,
        sources: Vec<ComposeSource>,
        dest: ObjectAttrs,
    ) -> Result<CreateOutcome> {
        if sources.is_empty() {
            return Err(Error::invalid("no source objects"));
        }
        if sources.len() > MAX_COMPOSE_SOURCES {
            return Err(Error::LimitExceeded(format!(
                "compose accepts at most {} source objects, got {}",
                MAX_COMPOSE_SOURCES,
                sources.len()
            )));
        }

        let mut data = Vec::new();
        for source in &sources {
            let obj = match source.generation {
                Some(generation) => {
                    self.get_object_with_generation(bucket, &source.name, generation)
                        .await?
                }
                None => self.get_object(bucket, &source.name).await?,
            };
            data.extend_from_slice(&obj.into_bytes()?);
        }

        self.create_object(
            StreamingObject::buffered(dest, data),
            Conditions::default(),
        )
        .await
    }
}

/// Applies a patch or update to stored attributes. The caller holds the
/// backend write lock. Rejected when existing retention is locked and the
/// patch touches retention.
pub fn apply_patch(attrs: &mut ObjectAttrs, patch: &ObjectPatch, merge: bool) -> Result<()> {
    if patch.retention.is_some() {
        if let Some(existing) = &attrs.retention {
            if existing.locked() {
                return Err(Error::Locked);
            }
        }
    }

    match &patch.metadata {
        Some(entries) if merge => {
            for (key, value) in entries {
                match value {
                    Some(v) => {
                        attrs.metadata.insert(key.clone(), v.clone());
                    }
                    None => {
                        attrs.metadata.remove(key);
                    }
                }
            }
        }
        Some(entries) => {
            attrs.metadata = entries
                .iter()
                .filter_map(|(k, v)| v.clone().map(|v| (k.clone(), v)))
                .collect();
        }
        None if !merge => attrs.metadata.clear(),
        None => {}
    }

    if let Some(v) = &patch.content_type {
        attrs.content_type = v.clone();
    }
    if let Some(v) = &patch.content_encoding {
        attrs.content_encoding = v.clone();
    }
    if let Some(v) = &patch.content_disposition {
        attrs.content_disposition = v.clone();
    }
    if let Some(v) = &patch.content_language {
        attrs.content_language = v.clone();
    }
    if let Some(v) = &patch.cache_control {
        attrs.cache_control = v.clone();
    }
    if let Some(v) = &patch.storage_class {
        attrs.storage_class = v.clone();
    }
    if let Some(v) = patch.custom_time {
        attrs.custom_time = Some(v);
    }
    if let Some(v) = &patch.acl {
        attrs.acl = v.clone();
    }
    if let Some(v) = &patch.retention {
        attrs.retention = v.clone();
    }

    attrs.metageneration += 1;
    attrs.updated = Utc::now();
    Ok(())
}

/// Fills in the content-derived attributes on create.
pub fn finalize_attrs(attrs: &mut ObjectAttrs, data: &[u8]) {
    attrs.size = data.len() as i64;
    attrs.crc32c = crate::checksum::encoded_crc32c(data);
    attrs.md5_hash = crate::checksum::encoded_md5(data);
    attrs.etag = attrs.md5_hash.clone();
    if attrs.storage_class.is_empty() {
        attrs.storage_class = "STANDARD".to_string();
    }
    let now = Utc::now();
    attrs.created = now;
    attrs.updated = now;
    attrs.deleted = None;
    attrs.metageneration = 1;
}

/// Time-based generation numbering: unique per object name and strictly
/// greater than `previous`.
pub fn next_generation(previous: i64) -> i64 {
    let now = Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or(i64::MAX / 2);
    now.max(previous + 1)
}
