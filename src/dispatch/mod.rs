//! The dispatcher stage: composed message location → delivery receipt.

pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::model::receipt::{DeliveryReceipt, DispatchInput};
use crate::store::BlobStore;

use self::transport::Transport;

/// Time budget granted by the invoking host.
#[derive(Debug, Clone, Copy)]
pub struct InvocationContext {
    deadline: Instant,
}

impl InvocationContext {
    /// A context whose deadline is `remaining` from now.
    pub fn from_remaining(remaining: Duration) -> Self {
        Self {
            deadline: Instant::now() + remaining,
        }
    }

    /// Time left until the deadline, zero once it has passed.
    pub fn remaining_time(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Submits composed messages to a transport.
pub struct Dispatcher {
    store: Arc<dyn BlobStore>,
    transport: Arc<dyn Transport>,
    margin: Duration,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn BlobStore>, transport: Arc<dyn Transport>, margin: Duration) -> Self {
        Self {
            store,
            transport,
            margin,
        }
    }

    /// Run the stage for one input document (`{"bucket", "key"}`).
    pub async fn dispatch(&self, input: &Value, ctx: &InvocationContext) -> Result<DeliveryReceipt> {
        let input = validate_input(input)?;
        self.dispatch_location(&input, ctx).await
    }

    /// Fetch and submit the message at `input` within the context's budget.
    ///
    /// The budget is the remaining time minus the safety margin and covers
    /// both the fetch and the submission. When it runs out the in-flight
    /// work is dropped and [`PipelineError::DeadlineExceeded`] is returned.
    pub async fn dispatch_location(
        &self,
        input: &DispatchInput,
        ctx: &InvocationContext,
    ) -> Result<DeliveryReceipt> {
        let budget = ctx.remaining_time().saturating_sub(self.margin);
        if budget.is_zero() {
            warn!(bucket = %input.bucket, key = %input.key, "No time left to dispatch");
            return Err(PipelineError::DeadlineExceeded { budget });
        }

        info!(bucket = %input.bucket, key = %input.key, ?budget, "Dispatching message");
        let receipt = tokio::time::timeout(budget, self.fetch_and_send(input))
            .await
            .map_err(|_| {
                warn!(bucket = %input.bucket, key = %input.key, ?budget, "Dispatch deadline exceeded");
                PipelineError::DeadlineExceeded { budget }
            })??;

        info!(
            status = %receipt.status,
            message_id = %receipt.message_id,
            "Message submitted"
        );
        Ok(receipt)
    }

    async fn fetch_and_send(&self, input: &DispatchInput) -> Result<DeliveryReceipt> {
        let blob = self.store.get(&input.bucket, &input.key).await?;
        Ok(self.transport.send_raw(&blob.data).await?)
    }
}

/// Check that `bucket` and `key` are present, non-empty strings.
fn validate_input(input: &Value) -> Result<DispatchInput> {
    let field = |name: &str| match input.get(name) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(_) => Err(PipelineError::validation(name, "must be a non-empty string")),
        None => Err(PipelineError::validation(name, "is missing")),
    };
    Ok(DispatchInput {
        bucket: field("bucket")?,
        key: field("key")?,
    })
}
