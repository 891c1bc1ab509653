//! Email parsing: read-back of composed messages.

pub mod mime;
