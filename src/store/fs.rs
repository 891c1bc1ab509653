//! Filesystem blob store.
//!
//! Objects live at `{root}/{bucket}/{key}`. Object metadata (content
//! type and encoding) is kept in an optional JSON sidecar next to the
//! object, `{key}.meta.json`. Writes go to a temporary file in the same
//! directory and are renamed into place, so a reader never observes a
//! partially written object.

use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use super::{clamp_range, Blob, BlobStore, ObjectMeta, PutOptions, StoreResult};
use crate::error::StorageError;

const SIDECAR_SUFFIX: &str = ".meta.json";

/// Sidecar metadata persisted next to each object.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Sidecar {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_encoding: Option<String>,
}

/// A [`BlobStore`] backed by a local directory tree.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a bucket and key onto a path below the root.
    ///
    /// Rejects empty names, absolute keys and any `..` or `.` component.
    fn object_path(&self, bucket: &str, key: &str) -> StoreResult<PathBuf> {
        if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket == "." || bucket == ".." {
            return Err(StorageError::InvalidKey(format!("{bucket}/{key}")));
        }
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && !key.ends_with('/')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::InvalidKey(format!("{bucket}/{key}")));
        }
        Ok(self.root.join(bucket).join(relative))
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(SIDECAR_SUFFIX);
        PathBuf::from(name)
    }

    async fn read_sidecar(path: &Path) -> StoreResult<Sidecar> {
        let sidecar = Self::sidecar_path(path);
        match tokio::fs::read(&sidecar).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                StorageError::Backend(format!("corrupt metadata '{}': {e}", sidecar.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Sidecar::default()),
            Err(e) => Err(StorageError::io(sidecar, e)),
        }
    }

    async fn meta(&self, bucket: &str, key: &str, path: &Path) -> StoreResult<ObjectMeta> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| map_io(bucket, key, path, e))?;
        if !metadata.is_file() {
            return Err(not_found(bucket, key));
        }
        let sidecar = Self::read_sidecar(path).await?;
        Ok(ObjectMeta {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: metadata.len(),
            content_type: sidecar.content_type,
            content_encoding: sidecar.content_encoding,
        })
    }
}

fn not_found(bucket: &str, key: &str) -> StorageError {
    StorageError::NotFound {
        bucket: bucket.to_string(),
        key: key.to_string(),
    }
}

fn map_io(bucket: &str, key: &str, path: &Path, e: std::io::Error) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        not_found(bucket, key)
    } else {
        StorageError::io(path, e)
    }
}

/// Write `data` to `path` via a temporary sibling and an atomic rename.
async fn write_atomic(path: &Path, data: &[u8]) -> StoreResult<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| StorageError::io(parent, e))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("object");
    let tmp = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));

    if let Err(e) = tokio::fs::write(&tmp, data).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StorageError::io(&tmp, e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StorageError::io(path, e));
    }
    Ok(())
}

#[async_trait]
impl BlobStore for FsStore {
    async fn head(&self, bucket: &str, key: &str) -> StoreResult<ObjectMeta> {
        let path = self.object_path(bucket, key)?;
        self.meta(bucket, key, &path).await
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Blob> {
        let path = self.object_path(bucket, key)?;
        let meta = self.meta(bucket, key, &path).await?;
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| map_io(bucket, key, &path, e))?;
        Ok(Blob {
            meta,
            data: Bytes::from(data),
        })
    }

    async fn get_range(&self, bucket: &str, key: &str, range: Range<u64>) -> StoreResult<Bytes> {
        let path = self.object_path(bucket, key)?;
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| map_io(bucket, key, &path, e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| StorageError::io(&path, e))?
            .len();
        let range = clamp_range(range, len);
        debug!(
            bucket,
            key,
            offset = range.start,
            length = range.len(),
            "Reading object range"
        );
        file.seek(SeekFrom::Start(range.start as u64))
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        let mut buf = vec![0u8; range.len()];
        file.read_exact(&mut buf)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        Ok(Bytes::from(buf))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        options: PutOptions,
    ) -> StoreResult<()> {
        let path = self.object_path(bucket, key)?;
        let sidecar = Sidecar {
            content_type: options.content_type,
            content_encoding: options.content_encoding,
        };
        if sidecar.content_type.is_some() || sidecar.content_encoding.is_some() {
            let json = serde_json::to_vec(&sidecar)
                .map_err(|e| StorageError::Backend(format!("cannot encode metadata: {e}")))?;
            write_atomic(&Self::sidecar_path(&path), &json).await?;
        } else {
            let stale = Self::sidecar_path(&path);
            match tokio::fs::remove_file(&stale).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::io(stale, e)),
            }
        }
        write_atomic(&path, &data).await?;
        debug!(bucket, key, size = data.len(), "Wrote object");
        Ok(())
    }
}
