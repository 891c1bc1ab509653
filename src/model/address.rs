//! Email address parsing (RFC 5322 §3.4).
//!
//! Request documents may supply every address field either as a single
//! string or as an array of strings. Both shapes are promoted to a list
//! before each entry is parsed as a mailbox.

use lettre::message::Mailbox;
use serde_json::Value;

use crate::error::{PipelineError, Result};

/// Parse a single mailbox, naming `field` in the error.
///
/// Supported formats are those of RFC 5322 mailboxes:
/// - `"user@domain.com"`
/// - `"<user@domain.com>"`
/// - `"Display Name <user@domain.com>"`
/// - `"\"Display, Name\" <user@domain.com>"`
pub fn parse_mailbox(field: &str, raw: &str) -> Result<Mailbox> {
    raw.trim()
        .parse::<Mailbox>()
        .map_err(|e| PipelineError::validation(field, format!("malformed address '{raw}': {e}")))
}

/// Promote a string-or-array JSON value to a list of strings.
///
/// `None` and `null` become an empty list. Any other shape fails
/// validation; array entries must themselves be strings.
pub fn promote_to_list(field: &str, value: Option<&Value>) -> Result<Vec<String>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::String(s) => Ok(s.clone()),
                _ => Err(PipelineError::validation(
                    format!("{field}[{i}]"),
                    "must be a string",
                )),
            })
            .collect(),
        Some(_) => Err(PipelineError::validation(
            field,
            "must be a string or an array of strings",
        )),
    }
}

/// Promote and parse an address field into mailboxes, preserving order.
pub fn parse_mailbox_list(field: &str, value: Option<&Value>) -> Result<Vec<Mailbox>> {
    let raw = promote_to_list(field, value)?;
    let single = raw.len() == 1 && matches!(value, Some(Value::String(_)));
    raw.iter()
        .enumerate()
        .map(|(i, addr)| {
            if single {
                parse_mailbox(field, addr)
            } else {
                parse_mailbox(&format!("{field}[{i}]"), addr)
            }
        })
        .collect()
}
