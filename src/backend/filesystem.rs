use async_trait::async_trait;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use super::{
    apply_patch, finalize_attrs, next_generation, Conditions, CreateOutcome, DeleteOutcome,
    ObjectPatch, Replaced, StorageBackend,
};
use crate::error::{Error, Result};
use crate::models::{
    valid_bucket_name, Bucket, BucketPatch, ObjectAttrs, ObjectContent, StreamingObject,
};

const BUCKET_ATTRS_FILE: &str = ".bucketAttrs";
const METADATA_SUFFIX: &str = ".metadata";
const GENERATIONS_DIR: &str = "generations";

/// Directory-backed store. Layout under `<root>`:
///
/// ```text
/// <root>/<bucket>/.bucketAttrs
/// <root>/<bucket>/<escaped-object-name>
/// <root>/<bucket>/<escaped-object-name>.metadata
/// <root>/<bucket>/generations/<escaped-object-name>/<generation>
/// <root>/<bucket>/generations/<escaped-object-name>/<generation>.metadata
/// ```
///
/// Object names are URL-escaped so slashes in keys never create
/// directories. Content and sidecar are written via temp-file + rename,
/// sidecar last. State is rebuilt from sidecars on every read; a missing
/// or corrupt sidecar invalidates that entry.
pub struct FilesystemBackend {
    root: PathBuf,
    lock: RwLock<()>,
}

impl FilesystemBackend {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(FilesystemBackend {
            root,
            lock: RwLock::new(()),
        })
    }

    fn bucket_path(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    fn object_path(&self, bucket: &str, name: &str) -> PathBuf {
        self.bucket_path(bucket).join(escape_name(name).as_ref())
    }

    fn sidecar_path(&self, bucket: &str, name: &str) -> PathBuf {
        self.bucket_path(bucket)
            .join(format!("{}{}", escape_name(name), METADATA_SUFFIX))
    }

    fn generation_dir(&self, bucket: &str, name: &str) -> PathBuf {
        self.bucket_path(bucket)
            .join(GENERATIONS_DIR)
            .join(escape_name(name).into_owned())
    }

    fn load_bucket(&self, name: &str) -> Result<Bucket> {
        let raw = fs::read(self.bucket_path(name).join(BUCKET_ATTRS_FILE))
            .map_err(|_| Error::NoSuchBucket)?;
        serde_json::from_slice(&raw).map_err(|_| Error::NoSuchBucket)
    }

    fn store_bucket(&self, bucket: &Bucket) -> Result<()> {
        let path = self.bucket_path(&bucket.name).join(BUCKET_ATTRS_FILE);
        write_atomic(&path, &serde_json::to_vec(bucket)?)?;
        Ok(())
    }

    fn load_sidecar(&self, path: &Path) -> Result<ObjectAttrs> {
        let raw = fs::read(path).map_err(|_| Error::NoSuchKey)?;
        serde_json::from_slice(&raw).map_err(|e| {
            warn!("corrupt sidecar {:?}: {}", path, e);
            Error::NoSuchKey
        })
    }

    fn store_sidecar(&self, path: &Path, attrs: &ObjectAttrs) -> Result<()> {
        write_atomic(path, &serde_json::to_vec(attrs)?)?;
        Ok(())
    }

    /// Moves the current version into the generations tree, stamping its
    /// deletion time. Content is renamed first, sidecar written last.
    fn archive_current(&self, bucket: &str, name: &str, mut attrs: ObjectAttrs) -> Result<ObjectAttrs> {
        attrs.deleted = Some(Utc::now());
        let dir = self.generation_dir(bucket, name);
        fs::create_dir_all(&dir)?;

        let content_dest = dir.join(attrs.generation.to_string());
        fs::rename(self.object_path(bucket, name), &content_dest)?;
        self.store_sidecar(
            &dir.join(format!("{}{}", attrs.generation, METADATA_SUFFIX)),
            &attrs,
        )?;
        Ok(attrs)
    }
}

fn escape_name(name: &str) -> std::borrow::Cow<'_, str> {
    urlencoding::encode(name)
}

/// Write to a temp file in the same directory, then rename into place.
fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp-{}", file_name, Uuid::new_v4().simple()));
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)
}

fn is_sidecar(path: &Path) -> bool {
    path.to_string_lossy().ends_with(METADATA_SUFFIX)
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn create_bucket(&self, name: &str, versioning: bool) -> Result<Bucket> {
        if !valid_bucket_name(name) {
            return Err(Error::invalid("invalid bucket name"));
        }
        let _guard = self.lock.write().unwrap();
        let path = self.bucket_path(name);
        if path.exists() {
            return Err(Error::BucketAlreadyExists);
        }
        fs::create_dir_all(&path)?;
        let bucket = Bucket::new(name, versioning);
        self.store_bucket(&bucket)?;
        debug!("created bucket {} at {:?}", name, path);
        Ok(bucket)
    }

    async fn get_bucket(&self, name: &str) -> Result<Bucket> {
        let _guard = self.lock.read().unwrap();
        self.load_bucket(name)
    }

    async fn list_buckets(&self) -> Result<Vec<Bucket>> {
        let _guard = self.lock.read().unwrap();
        let mut buckets = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match self.load_bucket(&name) {
                Ok(bucket) => buckets.push(bucket),
                Err(_) => warn!("skipping directory without bucket attrs: {:?}", entry.path()),
            }
        }
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(buckets)
    }

    async fn update_bucket(&self, name: &str, patch: BucketPatch) -> Result<Bucket> {
        let _guard = self.lock.write().unwrap();
        let mut bucket = self.load_bucket(name)?;
        if let Some(v) = patch.versioning_enabled {
            bucket.versioning_enabled = v;
        }
        if let Some(v) = patch.default_event_based_hold {
            bucket.default_event_based_hold = v;
        }
        bucket.updated = Some(Utc::now());
        self.store_bucket(&bucket)?;
        Ok(bucket)
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        let _guard = self.lock.write().unwrap();
        self.load_bucket(name)?;
        let path = self.bucket_path(name);

        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name == BUCKET_ATTRS_FILE {
                continue;
            }
            if file_name == GENERATIONS_DIR {
                let occupied = WalkDir::new(entry.path())
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .any(|e| e.file_type().is_file());
                if occupied {
                    return Err(Error::BucketNotEmpty);
                }
                continue;
            }
            return Err(Error::BucketNotEmpty);
        }

        fs::remove_dir_all(&path)?;
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

        let _guard = self.lock.write().unwrap();
        let bucket = self.load_bucket(&attrs.bucket_name)?;

        let sidecar = self.sidecar_path(&attrs.bucket_name, &attrs.name);
        let previous = self.load_sidecar(&sidecar).ok();
        conditions.check(previous.as_ref())?;

        if attrs.generation == 0 {
            let floor = previous.as_ref().map(|a| a.generation).unwrap_or(0);
            attrs.generation = next_generation(floor);
        }

        let replaced = match previous {
            Some(old) if bucket.versioning_enabled => {
                let archived = self.archive_current(&attrs.bucket_name, &attrs.name, old)?;
                Some(Replaced {
                    attrs: archived,
                    archived: true,
                })
            }
            Some(old) => Some(Replaced {
                attrs: old,
                archived: false,
            }),
            None => None,
        };

        write_atomic(&self.object_path(&attrs.bucket_name, &attrs.name), &data)?;
        self.store_sidecar(&sidecar, &attrs)?;
        debug!(
            "stored {}/{} generation {} ({} bytes)",
            attrs.bucket_name,
            attrs.name,
            attrs.generation,
            data.len()
        );
        Ok(CreateOutcome { attrs, replaced })
    }

    async fn get_object(&self, bucket: &str, name: &str) -> Result<StreamingObject> {
        let _guard = self.lock.read().unwrap();
        self.load_bucket(bucket)?;
        let attrs = self.load_sidecar(&self.sidecar_path(bucket, name))?;
        let file = fs::File::open(self.object_path(bucket, name)).map_err(|_| Error::NoSuchKey)?;
        Ok(StreamingObject {
            attrs,
            content: ObjectContent::Streaming(Box::new(file)),
        })
    }

    async fn get_object_with_generation(
        &self,
        bucket: &str,
        name: &str,
        generation: i64,
    ) -> Result<StreamingObject> {
        let _guard = self.lock.read().unwrap();
        self.load_bucket(bucket)?;

        if let Ok(attrs) = self.load_sidecar(&self.sidecar_path(bucket, name)) {
            if attrs.generation == generation {
                let file =
                    fs::File::open(self.object_path(bucket, name)).map_err(|_| Error::NoSuchKey)?;
                return Ok(StreamingObject {
                    attrs,
                    content: ObjectContent::Streaming(Box::new(file)),
                });
            }
        }

        let dir = self.generation_dir(bucket, name);
        let attrs =
            self.load_sidecar(&dir.join(format!("{}{}", generation, METADATA_SUFFIX)))?;
        let file =
            fs::File::open(dir.join(generation.to_string())).map_err(|_| Error::NoSuchKey)?;
        Ok(StreamingObject {
            attrs,
            content: ObjectContent::Streaming(Box::new(file)),
        })
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        versions: bool,
    ) -> Result<Vec<ObjectAttrs>> {
        let _guard = self.lock.read().unwrap();
        self.load_bucket(bucket)?;
        let path = self.bucket_path(bucket);

        let mut result = Vec::new();
        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            if !entry.path().is_file() || !is_sidecar(&entry.path()) {
                continue;
            }
            match self.load_sidecar(&entry.path()) {
                Ok(attrs) if attrs.name.starts_with(prefix) => result.push(attrs),
                Ok(_) => {}
                Err(_) => warn!("skipping unreadable sidecar {:?}", entry.path()),
            }
        }

        if versions {
            let generations = path.join(GENERATIONS_DIR);
            if generations.is_dir() {
                for entry in WalkDir::new(&generations)
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file() && is_sidecar(e.path()))
                {
                    match self.load_sidecar(entry.path()) {
                        Ok(attrs) if attrs.name.starts_with(prefix) => result.push(attrs),
                        Ok(_) => {}
                        Err(_) => warn!("skipping unreadable sidecar {:?}", entry.path()),
                    }
                }
            }
        }
        Ok(result)
    }

    async fn delete_object(&self, bucket: &str, name: &str) -> Result<DeleteOutcome> {
        let _guard = self.lock.write().unwrap();
        let bucket_attrs = self.load_bucket(bucket)?;
        let sidecar = self.sidecar_path(bucket, name);
        let attrs = self.load_sidecar(&sidecar)?;

        if bucket_attrs.versioning_enabled {
            let archived = self.archive_current(bucket, name, attrs)?;
            fs::remove_file(&sidecar)?;
            Ok(DeleteOutcome {
                attrs: archived,
                archived: true,
            })
        } else {
            fs::remove_file(self.object_path(bucket, name)).ok();
            fs::remove_file(&sidecar)?;
            Ok(DeleteOutcome {
                attrs,
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

impl FilesystemBackend {
    fn mutate_attrs(
        &self,
        bucket: &str,
        name: &str,
        patch: ObjectPatch,
        merge: bool,
    ) -> Result<ObjectAttrs> {
        let _guard = self.lock.write().unwrap();
        self.load_bucket(bucket)?;
        let sidecar = self.sidecar_path(bucket, name);
        let mut attrs = self.load_sidecar(&sidecar)?;
        apply_patch(&mut attrs, &patch, merge)?;
        self.store_sidecar(&sidecar, &attrs)?;
        Ok(attrs)
    }
}
