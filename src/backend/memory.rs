use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

use super::{
    apply_patch, finalize_attrs, next_generation, Conditions, CreateOutcome, DeleteOutcome,
    ObjectPatch, Replaced, StorageBackend,
};
use crate::error::{Error, Result};
use crate::models::{
    valid_bucket_name, Bucket, BucketPatch, ObjectAttrs, StreamingObject,
};

#[derive(Clone)]
struct StoredEntry {
    attrs: ObjectAttrs,
    data: Bytes,
}

struct BucketEntry {
    bucket: Bucket,
    objects: HashMap<String, StoredEntry>,
    archived: HashMap<String, Vec<StoredEntry>>,
}

/// Map-backed store. One read/write lock guards the whole backend: write
/// mode for mutations, read mode for reads and lists, so archiving the
/// previous version, writing the new current and assigning its generation
/// happen under one critical section.
pub struct InMemoryBackend {
    state: RwLock<HashMap<String, BucketEntry>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        InMemoryBackend {
            state: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn create_bucket(&self, name: &str, versioning: bool) -> Result<Bucket> {
        if !valid_bucket_name(name) {
            return Err(Error::invalid("invalid bucket name"));
        }
        let mut state = self.state.write().unwrap();
        if state.contains_key(name) {
            return Err(Error::BucketAlreadyExists);
        }
        let bucket = Bucket::new(name, versioning);
        state.insert(
            name.to_string(),
            BucketEntry {
                bucket: bucket.clone(),
                objects: HashMap::new(),
                archived: HashMap::new(),
            },
        );
        debug!("created bucket {} (versioning: {})", name, versioning);
        Ok(bucket)
    }

    async fn get_bucket(&self, name: &str) -> Result<Bucket> {
        let state = self.state.read().unwrap();
        state
            .get(name)
            .map(|e| e.bucket.clone())
            .ok_or(Error::NoSuchBucket)
    }

    async fn list_buckets(&self) -> Result<Vec<Bucket>> {
        let state = self.state.read().unwrap();
        let mut buckets: Vec<Bucket> = state.values().map(|e| e.bucket.clone()).collect();
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(buckets)
    }

    async fn update_bucket(&self, name: &str, patch: BucketPatch) -> Result<Bucket> {
        let mut state = self.state.write().unwrap();
        let entry = state.get_mut(name).ok_or(Error::NoSuchBucket)?;
        if let Some(v) = patch.versioning_enabled {
            entry.bucket.versioning_enabled = v;
        }
        if let Some(v) = patch.default_event_based_hold {
            entry.bucket.default_event_based_hold = v;
        }
        entry.bucket.updated = Some(Utc::now());
        Ok(entry.bucket.clone())
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let entry = state.get(name).ok_or(Error::NoSuchBucket)?;
        if !entry.objects.is_empty() || entry.archived.values().any(|v| !v.is_empty()) {
            return Err(Error::BucketNotEmpty);
        }
        state.remove(name);
        debug!("deleted bucket {}", name);
        Ok(())
    }

    async fn create_object(
        &self,
        obj: StreamingObject,
        conditions: Conditions,
    ) -> Result<CreateOutcome> {
        let StreamingObject { mut attrs, content } = obj;
        let data = content.into_bytes()?;
        finalize_attrs(&mut attrs, &data);

        let mut state = self.state.write().unwrap();
        let entry = state
            .get_mut(&attrs.bucket_name)
            .ok_or(Error::NoSuchBucket)?;

        let previous = entry.objects.get(&attrs.name);
        conditions.check(previous.map(|e| &e.attrs))?;

        if attrs.generation == 0 {
            let floor = previous.map(|e| e.attrs.generation).unwrap_or(0);
            attrs.generation = next_generation(floor);
        }

        let replaced = entry.objects.remove(&attrs.name).map(|mut old| {
            if entry.bucket.versioning_enabled {
                old.attrs.deleted = Some(Utc::now());
                let archived_attrs = old.attrs.clone();
                entry
                    .archived
                    .entry(attrs.name.clone())
                    .or_default()
                    .push(old);
                Replaced {
                    attrs: archived_attrs,
                    archived: true,
                }
            } else {
                Replaced {
                    attrs: old.attrs,
                    archived: false,
                }
            }
        });

        entry.objects.insert(
            attrs.name.clone(),
            StoredEntry {
                attrs: attrs.clone(),
                data,
            },
        );
        debug!(
            "stored {}/{} generation {}",
            attrs.bucket_name, attrs.name, attrs.generation
        );
        Ok(CreateOutcome { attrs, replaced })
    }

    async fn get_object(&self, bucket: &str, name: &str) -> Result<StreamingObject> {
        let state = self.state.read().unwrap();
        let entry = state.get(bucket).ok_or(Error::NoSuchBucket)?;
        let stored = entry.objects.get(name).ok_or(Error::NoSuchKey)?;
        Ok(StreamingObject::buffered(
            stored.attrs.clone(),
            stored.data.clone(),
        ))
    }

    async fn get_object_with_generation(
        &self,
        bucket: &str,
        name: &str,
        generation: i64,
    ) -> Result<StreamingObject> {
        let state = self.state.read().unwrap();
        let entry = state.get(bucket).ok_or(Error::NoSuchBucket)?;

        if let Some(stored) = entry.objects.get(name) {
            if stored.attrs.generation == generation {
                return Ok(StreamingObject::buffered(
                    stored.attrs.clone(),
                    stored.data.clone(),
                ));
            }
        }
        entry
            .archived
            .get(name)
            .and_then(|versions| {
                versions
                    .iter()
                    .find(|s| s.attrs.generation == generation)
                    .map(|s| StreamingObject::buffered(s.attrs.clone(), s.data.clone()))
            })
            .ok_or(Error::NoSuchKey)
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        versions: bool,
    ) -> Result<Vec<ObjectAttrs>> {
        let state = self.state.read().unwrap();
        let entry = state.get(bucket).ok_or(Error::NoSuchBucket)?;

        let mut attrs: Vec<ObjectAttrs> = entry
            .objects
            .values()
            .filter(|s| s.attrs.name.starts_with(prefix))
            .map(|s| s.attrs.clone())
            .collect();
        if versions {
            attrs.extend(
                entry
                    .archived
                    .values()
                    .flatten()
                    .filter(|s| s.attrs.name.starts_with(prefix))
                    .map(|s| s.attrs.clone()),
            );
        }
        Ok(attrs)
    }

    async fn delete_object(&self, bucket: &str, name: &str) -> Result<DeleteOutcome> {
        let mut state = self.state.write().unwrap();
        let entry = state.get_mut(bucket).ok_or(Error::NoSuchBucket)?;
        let mut stored = entry.objects.remove(name).ok_or(Error::NoSuchKey)?;

        if entry.bucket.versioning_enabled {
            stored.attrs.deleted = Some(Utc::now());
            let attrs = stored.attrs.clone();
            entry
                .archived
                .entry(name.to_string())
                .or_default()
                .push(stored);
            Ok(DeleteOutcome {
                attrs,
                archived: true,
            })
        } else {
            Ok(DeleteOutcome {
                attrs: stored.attrs,
                archived: false,
            })
        }
    }

    async fn patch_object(
        &self,
        bucket: &str,
        name: &str,
        patch: ObjectPatch,
    ) -> Result<ObjectAttrs> {
        self.mutate_attrs(bucket, name, patch, true)
    }

    async fn update_object(
        &self,
        bucket: &str,
        name: &str,
        patch: ObjectPatch,
    ) -> Result<ObjectAttrs> {
        self.mutate_attrs(bucket, name, patch, false)
    }
}

impl InMemoryBackend {
    fn mutate_attrs(
        &self,
        bucket: &str,
        name: &str,
        patch: ObjectPatch,
        merge: bool,
    ) -> Result<ObjectAttrs> {
        let mut state = self.state.write().unwrap();
        let entry = state.get_mut(bucket).ok_or(Error::NoSuchBucket)?;
        let stored = entry.objects.get_mut(name).ok_or(Error::NoSuchKey)?;
        apply_patch(&mut stored.attrs, &patch, merge)?;
        Ok(stored.attrs.clone())
    }
}
