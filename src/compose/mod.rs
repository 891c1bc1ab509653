//! The composer stage: request location → composed message location.
//!
//! One invocation runs these steps, in order:
//! 1. validate `location` (no I/O),
//! 2. probe for the output object and return early if it exists,
//! 3. load the request document (inline or from `location`) and validate it,
//! 4. load the template data document and resolve attachments,
//! 5. build the whole message in memory,
//! 6. write it to the output key.
//!
//! Nothing is written unless every earlier step succeeded.

pub mod attachments;
pub mod idempotency;
pub mod mime;
pub mod template;
pub mod validate;

use std::sync::Arc;

use bytes::Bytes;
use serde_json::{json, Value};
use tracing::info;

use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::model::request::{BlobLocation, OutputDescriptor};
use crate::store::reader::SeekableReader;
use crate::store::{BlobStore, PutOptions};

use self::idempotency::{has_queued_suffix, output_key_for, probe, ProbeOutcome};
use self::template::TemplateRenderer;

/// Content type of stored composed messages.
pub const MESSAGE_CONTENT_TYPE: &str = "message/rfc822";

/// Tunables of the composer stage.
#[derive(Debug, Clone)]
pub struct ComposeOptions {
    /// Scheme of the reported output URI.
    pub scheme: String,
    /// Reject input keys without the `.queued.json` suffix.
    pub require_queued_suffix: bool,
    /// Maximum in-flight attachment fetches (0 = one per attachment).
    pub max_concurrent_fetches: usize,
    /// Chunk size for reading the stored request document.
    pub read_chunk_size: usize,
    /// LRU capacity, in chunks, for reading the stored request document.
    pub read_cache_chunks: usize,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ComposeOptions {
    fn from(config: &Config) -> Self {
        Self {
            scheme: config.storage.scheme.clone(),
            require_queued_suffix: config.compose.require_queued_suffix,
            max_concurrent_fetches: config.compose.max_concurrent_fetches,
            read_chunk_size: config.storage.read_chunk_size,
            read_cache_chunks: config.storage.read_cache_chunks,
        }
    }
}

/// Builds composed messages from request documents.
pub struct Composer {
    store: Arc<dyn BlobStore>,
    renderer: Arc<dyn TemplateRenderer>,
    options: ComposeOptions,
}

impl Composer {
    pub fn new(
        store: Arc<dyn BlobStore>,
        renderer: Arc<dyn TemplateRenderer>,
        options: ComposeOptions,
    ) -> Self {
        Self {
            store,
            renderer,
            options,
        }
    }

    /// Run the stage for one input document.
    ///
    /// Input shape: `{"location": {"bucket", "key"}, "request"?: {...}}`.
    /// When `request` is absent the request document is read from `location`.
    pub async fn compose(&self, input: &Value) -> Result<OutputDescriptor> {
        let location = validate::validate_location(input)?;
        if self.options.require_queued_suffix && !has_queued_suffix(&location.key) {
            return Err(PipelineError::validation(
                "location.key",
                format!("must end with '{}'", idempotency::QUEUED_SUFFIX),
            ));
        }

        let output_key = output_key_for(&location.key);
        let output = OutputDescriptor::new(&location.bucket, &output_key, &self.options.scheme);
        info!(bucket = %location.bucket, key = %location.key, uri = %output.uri, "Composing message");

        if probe(self.store.as_ref(), &location.bucket, &output_key).await? == ProbeOutcome::Exists {
            return Ok(output);
        }

        let document = self.load_request(input, &location).await?;
        let request = validate::validate_request(&document, &location.bucket)?;
        let data = self.load_data(request.data.as_ref()).await?;
        let resolved = attachments::resolve_attachments(
            self.store.as_ref(),
            &request.attachments,
            self.options.max_concurrent_fetches,
        )
        .await?;

        let composed = mime::compose_message(&request, &data, &resolved, self.renderer.as_ref())?;
        let size = composed.bytes.len();

        self.store
            .put(
                &location.bucket,
                &output_key,
                Bytes::from(composed.bytes),
                PutOptions {
                    content_type: Some(MESSAGE_CONTENT_TYPE.to_string()),
                    content_encoding: None,
                },
            )
            .await?;

        info!(
            uri = %output.uri,
            size = %humansize::format_size(size, humansize::BINARY),
            attachments = composed.attachment_ids.len(),
            "Wrote composed message"
        );
        Ok(output)
    }

    async fn load_request(&self, input: &Value, location: &BlobLocation) -> Result<Value> {
        match input.get("request") {
            Some(request @ Value::Object(_)) => return Ok(request.clone()),
            None | Some(Value::Null) => {}
            Some(_) => return Err(PipelineError::validation("request", "is not an object")),
        }

        let mut reader = SeekableReader::open(
            Arc::clone(&self.store),
            &location.bucket,
            &location.key,
            self.options.read_chunk_size,
            self.options.read_cache_chunks,
        )
        .await?;
        let raw = reader.read_to_end().await?;
        info!(
            bucket = %location.bucket,
            key = %location.key,
            size = raw.len(),
            "Fetched request document"
        );
        serde_json::from_slice(&raw)
            .map_err(|e| PipelineError::validation("request", format!("is not valid JSON: {e}")))
    }

    /// Fetch the template context; an empty object when there is none.
    async fn load_data(&self, data: Option<&BlobLocation>) -> Result<Value> {
        let Some(location) = data else {
            return Ok(json!({}));
        };
        let blob = self.store.get(&location.bucket, &location.key).await?;
        serde_json::from_slice(&blob.data).map_err(|e| {
            PipelineError::validation("request.data", format!("is not valid JSON: {e}"))
        })
    }
}
