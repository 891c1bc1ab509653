//! Composer request types.

use lettre::message::Mailbox;
use serde::{Deserialize, Serialize};

/// A fully qualified blob reference: an invocation's input object, an
/// attachment or a data document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLocation {
    pub bucket: String,
    pub key: String,
}

impl BlobLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Last path segment of the key, used as the default attachment filename.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

impl std::fmt::Display for BlobLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Text and HTML body templates. At least one is present after validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyContent {
    pub text: Option<String>,
    pub html: Option<String>,
}

/// A reference to a stored attachment, with optional inline overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    /// Location of the stored object.
    pub location: BlobLocation,
    /// Filename override; defaults to the last segment of the key.
    pub filename: Option<String>,
    /// Content type override; defaults to the stored object's metadata.
    pub content_type: Option<String>,
}

impl AttachmentRef {
    pub fn new(location: BlobLocation) -> Self {
        Self {
            location,
            filename: None,
            content_type: None,
        }
    }
}

/// A validated email request.
#[derive(Debug, Clone)]
pub struct EmailRequest {
    pub from: Mailbox,
    /// Never empty.
    pub to: Vec<Mailbox>,
    pub cc: Vec<Mailbox>,
    pub bcc: Vec<Mailbox>,
    pub reply_to: Vec<Mailbox>,
    pub subject: String,
    pub body: BodyContent,
    pub attachments: Vec<AttachmentRef>,
    /// External JSON document used as the template context.
    pub data: Option<BlobLocation>,
}

/// Composer output: the location of the composed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDescriptor {
    pub bucket: String,
    pub key: String,
    pub uri: String,
}

impl OutputDescriptor {
    pub fn new(bucket: &str, key: &str, scheme: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            uri: format!("{scheme}://{bucket}/{key}"),
        }
    }
}
