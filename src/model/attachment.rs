//! Resolved attachment content.
//!
//! Attachment bytes are held in memory for the duration of one
//! composition; they are base64-inflated in the final message anyway.

use bytes::Bytes;

/// Stored `Content-Encoding` of an attachment object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    Gzip,
    Deflate,
    Brotli,
}

impl ContentEncoding {
    /// Interpret a stored `Content-Encoding` value.
    ///
    /// Anything other than `gzip`, `deflate` or `br` is used verbatim.
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("gzip") | Some("x-gzip") => Self::Gzip,
            Some("deflate") => Self::Deflate,
            Some("br") => Self::Brotli,
            _ => Self::Identity,
        }
    }
}

/// An attachment fetched from the blob store and decoded to its original bytes.
#[derive(Debug, Clone)]
pub struct ResolvedAttachment {
    /// Key of the source object.
    pub source_key: String,
    /// Filename presented in the message.
    pub filename: String,
    /// MIME content type, if known.
    pub content_type: Option<String>,
    /// Encoding the stored bytes were decoded from.
    pub encoding: ContentEncoding,
    /// Decoded content.
    pub data: Bytes,
}

/// Content-ID assigned to an attachment part, keyed by its filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentId {
    pub filename: String,
    /// Bare id without angle brackets.
    pub content_id: String,
}
