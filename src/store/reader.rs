//! Seekable reader over a remote object, fetched in cached chunks.

use std::io::SeekFrom;
use std::num::NonZeroUsize;
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use tracing::debug;

use super::{BlobStore, StoreResult};
use crate::error::StorageError;

/// Default ranged-read chunk size.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Default number of chunks kept in the LRU cache.
pub const DEFAULT_CACHE_CHUNKS: usize = 100;

/// Reads an object through ranged gets without buffering it whole.
///
/// Chunks of `chunk_size` bytes are fetched on demand and kept in an LRU
/// cache so that seeking back over recently read data does not repeat
/// remote reads. A reader has a single consumer; it is not shared.
pub struct SeekableReader {
    store: Arc<dyn BlobStore>,
    bucket: String,
    key: String,
    len: u64,
    position: u64,
    chunk_size: usize,
    cache: LruCache<u64, Bytes>,
}

impl SeekableReader {
    /// Open a reader, probing the object's size.
    pub async fn open(
        store: Arc<dyn BlobStore>,
        bucket: &str,
        key: &str,
        chunk_size: usize,
        cache_chunks: usize,
    ) -> StoreResult<Self> {
        let meta = store.head(bucket, key).await?;
        let cache_size = NonZeroUsize::new(cache_chunks).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            store,
            bucket: bucket.to_string(),
            key: key.to_string(),
            len: meta.size,
            position: 0,
            chunk_size: chunk_size.max(1),
            cache: LruCache::new(cache_size),
        })
    }

    /// Total object size in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Move the read position. Seeking past the end is allowed; reads
    /// there return zero bytes.
    pub fn seek(&mut self, pos: SeekFrom) -> StoreResult<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            StorageError::Backend(format!(
                "invalid seek before start of {}/{}",
                self.bucket, self.key
            ))
        })?;
        self.position = target;
        Ok(target)
    }

    /// Read up to `buf.len()` bytes at the current position.
    ///
    /// Never crosses a chunk boundary; returns `0` at end of object.
    pub async fn read(&mut self, buf: &mut [u8]) -> StoreResult<usize> {
        if self.position >= self.len || buf.is_empty() {
            return Ok(0);
        }
        let chunk_size = self.chunk_size as u64;
        let index = self.position / chunk_size;
        let chunk = self.chunk(index).await?;
        let offset = (self.position - index * chunk_size) as usize;
        if offset >= chunk.len() {
            return Ok(0);
        }
        let n = buf.len().min(chunk.len() - offset);
        buf[..n].copy_from_slice(&chunk[offset..offset + n]);
        self.position += n as u64;
        Ok(n)
    }

    /// Read from the current position to the end of the object.
    pub async fn read_to_end(&mut self) -> StoreResult<Vec<u8>> {
        let remaining = self.len.saturating_sub(self.position) as usize;
        let mut out = Vec::with_capacity(remaining);
        let mut buf = vec![0u8; self.chunk_size.min(remaining.max(1))];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }

    async fn chunk(&mut self, index: u64) -> StoreResult<Bytes> {
        if let Some(chunk) = self.cache.get(&index) {
            return Ok(chunk.clone());
        }
        let start = index * self.chunk_size as u64;
        let end = (start + self.chunk_size as u64).min(self.len);
        debug!(
            bucket = %self.bucket,
            key = %self.key,
            offset = start,
            length = end - start,
            "Fetching object chunk"
        );
        let chunk = self
            .store
            .get_range(&self.bucket, &self.key, start..end)
            .await?;
        self.cache.put(index, chunk.clone());
        Ok(chunk)
    }
}
