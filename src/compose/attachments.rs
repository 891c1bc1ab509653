//! Attachment resolution: concurrent fetch, then content decoding.

use std::io::Read;

use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::model::attachment::{ContentEncoding, ResolvedAttachment};
use crate::model::request::AttachmentRef;
use crate::store::BlobStore;

/// Buffer size handed to the brotli decoder.
const BROTLI_BUFFER_SIZE: usize = 4096;

/// Fetch and decode every referenced attachment.
///
/// Up to `max_concurrent` fetches are in flight at once (`0` means one
/// per attachment). Results keep the order of `refs` regardless of which
/// fetch finishes first, and the first failure fails the whole call.
pub async fn resolve_attachments(
    store: &dyn BlobStore,
    refs: &[AttachmentRef],
    max_concurrent: usize,
) -> Result<Vec<ResolvedAttachment>> {
    if refs.is_empty() {
        return Ok(Vec::new());
    }
    let limit = if max_concurrent == 0 {
        refs.len()
    } else {
        max_concurrent
    };

    let resolved: Vec<ResolvedAttachment> = stream::iter(refs)
        .map(|r| resolve_one(store, r))
        .buffered(limit)
        .try_collect()
        .await?;

    let total: usize = resolved.iter().map(|a| a.data.len()).sum();
    info!(
        count = resolved.len(),
        size = %humansize::format_size(total, humansize::BINARY),
        "Resolved attachments"
    );
    Ok(resolved)
}

async fn resolve_one(store: &dyn BlobStore, reference: &AttachmentRef) -> Result<ResolvedAttachment> {
    let location = &reference.location;
    let blob = store
        .get(&location.bucket, &location.key)
        .await
        .map_err(|e| PipelineError::AttachmentResolution {
            reference: location.to_string(),
            reason: e.to_string(),
        })?;

    let encoding = ContentEncoding::from_header(blob.meta.content_encoding.as_deref());
    let data = decode(encoding, blob.data).map_err(|e| PipelineError::AttachmentResolution {
        reference: location.to_string(),
        reason: format!("cannot decode {encoding:?} content: {e}"),
    })?;
    debug!(
        reference = %location,
        ?encoding,
        size = data.len(),
        "Fetched attachment"
    );

    Ok(ResolvedAttachment {
        source_key: location.key.clone(),
        filename: reference
            .filename
            .clone()
            .unwrap_or_else(|| location.file_name().to_string()),
        content_type: reference.content_type.clone().or(blob.meta.content_type),
        encoding,
        data,
    })
}

/// Decompress stored bytes to their original content.
///
/// `deflate` accepts both zlib-wrapped and raw deflate streams.
pub fn decode(encoding: ContentEncoding, data: Bytes) -> std::io::Result<Bytes> {
    let mut out = Vec::new();
    match encoding {
        ContentEncoding::Identity => return Ok(data),
        ContentEncoding::Gzip => {
            flate2::read::MultiGzDecoder::new(&data[..]).read_to_end(&mut out)?;
        }
        ContentEncoding::Deflate => {
            if looks_like_zlib(&data) {
                flate2::read::ZlibDecoder::new(&data[..]).read_to_end(&mut out)?;
            } else {
                flate2::read::DeflateDecoder::new(&data[..]).read_to_end(&mut out)?;
            }
        }
        ContentEncoding::Brotli => {
            brotli::Decompressor::new(&data[..], BROTLI_BUFFER_SIZE).read_to_end(&mut out)?;
        }
    }
    Ok(Bytes::from(out))
}

/// RFC 1950 header check: CM = 8 and the header checksum is a multiple of 31.
fn looks_like_zlib(data: &[u8]) -> bool {
    match data {
        [cmf, flg, ..] => cmf & 0x0f == 8 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0,
        _ => false,
    }
}
