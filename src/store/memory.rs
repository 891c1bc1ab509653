//! In-memory blob store.
//!
//! Besides plain storage, [`MemoryStore`] can inject per-object latency
//! and failures and counts reads and writes, which is what the stage
//! tests use to observe fetch ordering and the absence of rewrites.

use std::collections::HashMap;
use std::ops::Range;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::{clamp_range, Blob, BlobStore, ObjectMeta, PutOptions, StoreResult};
use crate::error::StorageError;

type ObjectKey = (String, String);

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    options: PutOptions,
}

#[derive(Debug, Default)]
struct Counters {
    heads: HashMap<ObjectKey, usize>,
    gets: HashMap<ObjectKey, usize>,
    puts: HashMap<ObjectKey, usize>,
}

/// A [`BlobStore`] kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<ObjectKey, StoredObject>>,
    latency: RwLock<HashMap<ObjectKey, Duration>>,
    failures: RwLock<HashMap<ObjectKey, String>>,
    counters: RwLock<Counters>,
}

fn object_key(bucket: &str, key: &str) -> ObjectKey {
    (bucket.to_string(), key.to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without touching the put counter.
    pub async fn insert(
        &self,
        bucket: &str,
        key: &str,
        data: impl Into<Bytes>,
        options: PutOptions,
    ) {
        self.objects.write().await.insert(
            object_key(bucket, key),
            StoredObject {
                data: data.into(),
                options,
            },
        );
    }

    /// Delay every access to one object by `delay`.
    pub async fn set_latency(&self, bucket: &str, key: &str, delay: Duration) {
        self.latency
            .write()
            .await
            .insert(object_key(bucket, key), delay);
    }

    /// Make every access to one object fail with a backend error.
    pub async fn fail_with(&self, bucket: &str, key: &str, message: impl Into<String>) {
        self.failures
            .write()
            .await
            .insert(object_key(bucket, key), message.into());
    }

    /// Raw stored bytes of an object, bypassing counters.
    pub async fn contents(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .read()
            .await
            .get(&object_key(bucket, key))
            .map(|o| o.data.clone())
    }

    /// Number of `head` calls made for an object.
    pub async fn head_count(&self, bucket: &str, key: &str) -> usize {
        let counters = self.counters.read().await;
        counters.heads.get(&object_key(bucket, key)).copied().unwrap_or(0)
    }

    /// Number of `get` and `get_range` calls made for an object.
    pub async fn get_count(&self, bucket: &str, key: &str) -> usize {
        let counters = self.counters.read().await;
        counters.gets.get(&object_key(bucket, key)).copied().unwrap_or(0)
    }

    /// Number of `put` calls made for an object.
    pub async fn put_count(&self, bucket: &str, key: &str) -> usize {
        let counters = self.counters.read().await;
        counters.puts.get(&object_key(bucket, key)).copied().unwrap_or(0)
    }

    /// Apply injected latency and failures, then return the stored object.
    async fn access(&self, bucket: &str, key: &str) -> StoreResult<Option<StoredObject>> {
        let id = object_key(bucket, key);
        let delay = self.latency.read().await.get(&id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.failures.read().await.get(&id) {
            return Err(StorageError::Backend(message.clone()));
        }
        Ok(self.objects.read().await.get(&id).cloned())
    }

    fn meta_of(bucket: &str, key: &str, object: &StoredObject) -> ObjectMeta {
        ObjectMeta {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: object.data.len() as u64,
            content_type: object.options.content_type.clone(),
            content_encoding: object.options.content_encoding.clone(),
        }
    }
}

fn not_found(bucket: &str, key: &str) -> StorageError {
    StorageError::NotFound {
        bucket: bucket.to_string(),
        key: key.to_string(),
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn head(&self, bucket: &str, key: &str) -> StoreResult<ObjectMeta> {
        *self
            .counters
            .write()
            .await
            .heads
            .entry(object_key(bucket, key))
            .or_default() += 1;
        let object = self
            .access(bucket, key)
            .await?
            .ok_or_else(|| not_found(bucket, key))?;
        Ok(Self::meta_of(bucket, key, &object))
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Blob> {
        *self
            .counters
            .write()
            .await
            .gets
            .entry(object_key(bucket, key))
            .or_default() += 1;
        let object = self
            .access(bucket, key)
            .await?
            .ok_or_else(|| not_found(bucket, key))?;
        Ok(Blob {
            meta: Self::meta_of(bucket, key, &object),
            data: object.data,
        })
    }

    async fn get_range(&self, bucket: &str, key: &str, range: Range<u64>) -> StoreResult<Bytes> {
        *self
            .counters
            .write()
            .await
            .gets
            .entry(object_key(bucket, key))
            .or_default() += 1;
        let object = self
            .access(bucket, key)
            .await?
            .ok_or_else(|| not_found(bucket, key))?;
        let range = clamp_range(range, object.data.len() as u64);
        Ok(object.data.slice(range))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        options: PutOptions,
    ) -> StoreResult<()> {
        *self
            .counters
            .write()
            .await
            .puts
            .entry(object_key(bucket, key))
            .or_default() += 1;
        if let Some(message) = self.failures.read().await.get(&object_key(bucket, key)) {
            return Err(StorageError::Backend(message.clone()));
        }
        self.objects
            .write()
            .await
            .insert(object_key(bucket, key), StoredObject { data, options });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let store = MemoryStore::new();
        let err = store.head("b", "missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(store.get("b", "missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_put_then_get_keeps_metadata() {
        let store = MemoryStore::new();
        let options = PutOptions {
            content_type: Some("text/plain".into()),
            content_encoding: Some("gzip".into()),
        };
        store
            .put("b", "k", Bytes::from_static(b"hello"), options)
            .await
            .unwrap();
        let blob = store.get("b", "k").await.unwrap();
        assert_eq!(&blob.data[..], b"hello");
        assert_eq!(blob.meta.size, 5);
        assert_eq!(blob.meta.content_type.as_deref(), Some("text/plain"));
        assert_eq!(blob.meta.content_encoding.as_deref(), Some("gzip"));
        assert_eq!(store.put_count("b", "k").await, 1);
        assert_eq!(store.get_count("b", "k").await, 1);
    }

    #[tokio::test]
    async fn test_get_range_is_clamped() {
        let store = MemoryStore::new();
        store
            .insert("b", "k", &b"0123456789"[..], PutOptions::default())
            .await;
        assert_eq!(&store.get_range("b", "k", 2..5).await.unwrap()[..], b"234");
        assert_eq!(&store.get_range("b", "k", 8..50).await.unwrap()[..], b"89");
        assert!(store.get_range("b", "k", 20..30).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure_is_not_not_found() {
        let store = MemoryStore::new();
        store.fail_with("b", "k", "access denied").await;
        let err = store.head("b", "k").await.unwrap_err();
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("access denied"));
    }
}
