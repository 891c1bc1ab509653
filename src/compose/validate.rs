//! Request validation.
//!
//! Checks run in a fixed order and stop at the first failure, so the
//! error always names the earliest offending field:
//! `location.bucket`, `location.key`, then the required
//! `request.email.from`, `to`, `subject` and `body`, then the optional
//! `cc`, `bcc`, `reply_to`, `attachments` and finally `request.data`.

use serde_json::{Map, Value};

use crate::error::{PipelineError, Result};
use crate::model::address::{parse_mailbox, parse_mailbox_list};
use crate::model::request::{AttachmentRef, BlobLocation, BodyContent, EmailRequest};
use crate::store::parse_blob_uri;

/// Extract and check `location.bucket` and `location.key`.
pub fn validate_location(input: &Value) -> Result<BlobLocation> {
    let location = input
        .get("location")
        .and_then(Value::as_object)
        .ok_or_else(|| PipelineError::validation("location", "is missing or not an object"))?;
    let bucket = required_non_empty(location, "bucket", "location.bucket")?;
    let key = required_non_empty(location, "key", "location.key")?;
    Ok(BlobLocation { bucket, key })
}

/// Validate a request document (`{"data"?, "email": {...}}`).
///
/// Attachment references given as bare keys resolve against `bucket`.
pub fn validate_request(doc: &Value, bucket: &str) -> Result<EmailRequest> {
    let request = doc
        .as_object()
        .ok_or_else(|| PipelineError::validation("request", "is not an object"))?;
    let email = request
        .get("email")
        .and_then(Value::as_object)
        .ok_or_else(|| PipelineError::validation("request.email", "is missing or not an object"))?;

    let from = match email.get("from") {
        Some(Value::String(s)) => parse_mailbox("request.email.from", s)?,
        Some(_) => return Err(PipelineError::validation("request.email.from", "must be a string")),
        None => return Err(PipelineError::validation("request.email.from", "is missing")),
    };

    let to = match email.get("to") {
        None => return Err(PipelineError::validation("request.email.to", "is missing")),
        Some(value @ (Value::String(_) | Value::Array(_))) => {
            parse_mailbox_list("request.email.to", Some(value))?
        }
        Some(_) => {
            return Err(PipelineError::validation(
                "request.email.to",
                "must be a string or an array of strings",
            ))
        }
    };
    if to.is_empty() {
        return Err(PipelineError::validation(
            "request.email.to",
            "must contain at least one address",
        ));
    }

    let subject = match email.get("subject") {
        Some(Value::String(s)) => s.clone(),
        Some(_) => {
            return Err(PipelineError::validation(
                "request.email.subject",
                "must be a string",
            ))
        }
        None => return Err(PipelineError::validation("request.email.subject", "is missing")),
    };

    let body = validate_body(email.get("body"))?;

    let cc = parse_mailbox_list("request.email.cc", email.get("cc"))?;
    let bcc = parse_mailbox_list("request.email.bcc", email.get("bcc"))?;
    let reply_to = parse_mailbox_list("request.email.reply_to", email.get("reply_to"))?;
    let attachments = validate_attachments(email.get("attachments"), bucket)?;
    let data = validate_data(request.get("data"))?;

    Ok(EmailRequest {
        from,
        to,
        cc,
        bcc,
        reply_to,
        subject,
        body,
        attachments,
        data,
    })
}

fn required_non_empty(obj: &Map<String, Value>, name: &str, field: &str) -> Result<String> {
    match obj.get(name) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(PipelineError::validation(field, "is empty")),
        Some(_) => Err(PipelineError::validation(field, "must be a string")),
        None => Err(PipelineError::validation(field, "is missing")),
    }
}

enum BodyField {
    Absent,
    Text(String),
    Invalid,
}

fn body_field(value: Option<&Value>) -> BodyField {
    match value {
        None | Some(Value::Null) => BodyField::Absent,
        Some(Value::String(s)) => BodyField::Text(s.clone()),
        Some(_) => BodyField::Invalid,
    }
}

fn validate_body(value: Option<&Value>) -> Result<BodyContent> {
    let body = match value {
        Some(Value::Object(body)) => body,
        Some(_) => {
            return Err(PipelineError::validation(
                "request.email.body",
                "must be an object",
            ))
        }
        None => return Err(PipelineError::validation("request.email.body", "is missing")),
    };

    match (body_field(body.get("text")), body_field(body.get("html"))) {
        (BodyField::Absent, BodyField::Absent) => Err(PipelineError::MissingBodyContent),
        (BodyField::Invalid, _) => Err(PipelineError::InvalidBodyContent {
            field: "request.email.body.text".into(),
        }),
        (_, BodyField::Invalid) => Err(PipelineError::InvalidBodyContent {
            field: "request.email.body.html".into(),
        }),
        (text, html) => Ok(BodyContent {
            text: match text {
                BodyField::Text(s) => Some(s),
                _ => None,
            },
            html: match html {
                BodyField::Text(s) => Some(s),
                _ => None,
            },
        }),
    }
}

fn validate_attachments(value: Option<&Value>, bucket: &str) -> Result<Vec<AttachmentRef>> {
    let items = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(PipelineError::validation(
                "request.email.attachments",
                "must be an array",
            ))
        }
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| parse_attachment_ref(&format!("request.email.attachments[{i}]"), item, bucket))
        .collect()
}

/// Parse one attachment reference: a blob URI, a bare key, or an object
/// with `uri`/`key` and optional `filename` / `content_type` overrides.
pub fn parse_attachment_ref(field: &str, value: &Value, bucket: &str) -> Result<AttachmentRef> {
    match value {
        Value::String(s) => Ok(AttachmentRef::new(location_of(field, s, bucket)?)),
        Value::Object(obj) => {
            let target = match (obj.get("uri"), obj.get("key")) {
                (Some(Value::String(s)), _) | (None, Some(Value::String(s))) => s,
                _ => {
                    return Err(PipelineError::validation(
                        field,
                        "must have a string `uri` or `key`",
                    ))
                }
            };
            Ok(AttachmentRef {
                location: location_of(field, target, bucket)?,
                filename: optional_string(obj, "filename", field)?,
                content_type: optional_string(obj, "content_type", field)?,
            })
        }
        _ => Err(PipelineError::validation(
            field,
            "must be a string or an object",
        )),
    }
}

fn location_of(field: &str, reference: &str, bucket: &str) -> Result<BlobLocation> {
    if reference.contains("://") {
        return parse_blob_uri(reference)
            .ok_or_else(|| PipelineError::validation(field, format!("invalid blob URI '{reference}'")));
    }
    let key = reference.trim_start_matches('/');
    if key.is_empty() {
        return Err(PipelineError::validation(field, "is empty"));
    }
    Ok(BlobLocation::new(bucket, key))
}

fn optional_string(obj: &Map<String, Value>, name: &str, field: &str) -> Result<Option<String>> {
    match obj.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if !s.is_empty() => Ok(Some(s.clone())),
        Some(_) => Err(PipelineError::validation(
            format!("{field}.{name}"),
            "must be a non-empty string",
        )),
    }
}

fn validate_data(value: Option<&Value>) -> Result<Option<BlobLocation>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => parse_blob_uri(s).map(Some).ok_or_else(|| {
            PipelineError::validation("request.data", "must be an absolute blob URI")
        }),
        Some(_) => Err(PipelineError::validation(
            "request.data",
            "must be an absolute blob URI",
        )),
    }
}
