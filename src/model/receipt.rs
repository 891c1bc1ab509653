//! Dispatcher input and output.

use serde::{Deserialize, Serialize};

/// Location of a composed message to submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchInput {
    pub bucket: String,
    pub key: String,
}

/// Transport acknowledgement for a submitted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub status: String,
    pub message_id: String,
}
