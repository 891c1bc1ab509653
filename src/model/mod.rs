//! Core data model types for requests, addresses, attachments and receipts.

pub mod address;
pub mod attachment;
pub mod receipt;
pub mod request;
