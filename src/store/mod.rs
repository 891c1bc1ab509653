//! Blob storage boundary.
//!
//! Both stages talk to durable storage only through [`BlobStore`], which
//! is injected into each stage's entry point. [`memory::MemoryStore`] is
//! the in-process implementation used by tests; [`fs::FsStore`] maps
//! buckets onto directories for local runs.

pub mod fs;
pub mod memory;
pub mod reader;

use std::ops::Range;

use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::percent_decode_str;

use crate::error::StorageError;
use crate::model::request::BlobLocation;

/// Convenience alias for `Result<T, StorageError>`.
pub type StoreResult<T> = std::result::Result<T, StorageError>;

/// Metadata of a stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMeta {
    pub bucket: String,
    pub key: String,
    /// Size of the stored (possibly encoded) bytes.
    pub size: u64,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
}

/// Metadata supplied when writing an object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
}

/// A whole object together with its metadata.
#[derive(Debug, Clone)]
pub struct Blob {
    pub meta: ObjectMeta,
    pub data: Bytes,
}

/// Object storage addressed by bucket and key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch an object's metadata.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the object does not exist.
    async fn head(&self, bucket: &str, key: &str) -> StoreResult<ObjectMeta>;

    /// Fetch a whole object.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the object does not exist.
    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Blob>;

    /// Fetch a byte range of an object. The range is clamped to the object size.
    async fn get_range(&self, bucket: &str, key: &str, range: Range<u64>) -> StoreResult<Bytes>;

    /// Write a whole object, replacing any existing one.
    async fn put(&self, bucket: &str, key: &str, data: Bytes, options: PutOptions)
        -> StoreResult<()>;
}

/// Parse an absolute blob URI of the form `scheme://bucket/key`.
///
/// Returns `None` for relative references, URIs without a bucket or key,
/// and keys whose percent-escapes do not decode to UTF-8.
pub fn parse_blob_uri(uri: &str) -> Option<BlobLocation> {
    let parsed = url::Url::parse(uri).ok()?;
    let bucket = parsed.host_str().filter(|h| !h.is_empty())?;
    let key = parsed.path().trim_start_matches('/');
    if key.is_empty() {
        return None;
    }
    let key = percent_decode_str(key).decode_utf8().ok()?;
    Some(BlobLocation::new(bucket, key))
}

/// Clamp a requested range to an object of `len` bytes.
pub(crate) fn clamp_range(range: Range<u64>, len: u64) -> Range<usize> {
    let start = range.start.min(len) as usize;
    let end = range.end.min(len).max(range.start.min(len)) as usize;
    start..end
}
