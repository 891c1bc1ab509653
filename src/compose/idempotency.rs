//! Idempotency guard: the composed object's existence is the marker.

use tracing::info;

use crate::error::Result;
use crate::store::BlobStore;

/// Suffix of queued request documents.
pub const QUEUED_SUFFIX: &str = ".queued.json";

/// Suffix of composed messages.
pub const SEND_SUFFIX: &str = ".send.eml";

/// Derive the composed message key from a request key.
///
/// `dir/x.queued.json` becomes `dir/x.send.eml`. A key without the
/// queued suffix is returned unchanged; callers decide whether that is
/// acceptable (see [`has_queued_suffix`]).
pub fn output_key_for(key: &str) -> String {
    match key.strip_suffix(QUEUED_SUFFIX) {
        Some(stem) => format!("{stem}{SEND_SUFFIX}"),
        None => key.to_string(),
    }
}

/// `true` if `key` follows the `.queued.json` naming convention.
pub fn has_queued_suffix(key: &str) -> bool {
    key.len() > QUEUED_SUFFIX.len() && key.ends_with(QUEUED_SUFFIX)
}

/// Result of the existence probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The composed object already exists; skip composition.
    Exists,
    /// No composed object yet; compose it.
    Absent,
}

/// Probe for the composed object.
///
/// Only the store's not-found signal means [`ProbeOutcome::Absent`];
/// every other failure is returned as an error.
pub async fn probe(store: &dyn BlobStore, bucket: &str, key: &str) -> Result<ProbeOutcome> {
    match store.head(bucket, key).await {
        Ok(_) => {
            info!(bucket, key, "Composed object already exists, no need to proceed");
            Ok(ProbeOutcome::Exists)
        }
        Err(e) if e.is_not_found() => {
            info!(bucket, key, "Composed object doesn't exist yet, continuing");
            Ok(ProbeOutcome::Absent)
        }
        Err(e) => Err(e.into()),
    }
}
