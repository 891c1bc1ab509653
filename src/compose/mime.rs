//! MIME composition: request + data + attachments → RFC 822 bytes.

use lettre::message::header::{
    ContentDisposition, ContentId, ContentTransferEncoding, ContentType,
};
use lettre::message::{MultiPart, SinglePart};
use lettre::Message;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::template::TemplateRenderer;
use crate::error::{PipelineError, Result};
use crate::model::attachment::{AttachmentId, ResolvedAttachment};
use crate::model::request::EmailRequest;

/// Content type used when an attachment's stored metadata has none.
pub const DEFAULT_ATTACHMENT_TYPE: &str = "application/octet-stream";

/// The display body of a message, chosen from the rendered text and HTML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyShape {
    PlainOnly(String),
    HtmlOnly(String),
    /// `multipart/alternative` with the plain part first.
    Alternative { text: String, html: String },
    Missing,
}

impl BodyShape {
    /// Select the body shape from the presence of each rendering.
    pub fn select(text: Option<String>, html: Option<String>) -> Self {
        match (text, html) {
            (Some(text), Some(html)) => Self::Alternative { text, html },
            (Some(text), None) => Self::PlainOnly(text),
            (None, Some(html)) => Self::HtmlOnly(html),
            (None, None) => Self::Missing,
        }
    }
}

/// The display body as a lettre part.
enum BodyPart {
    Single(SinglePart),
    Multi(MultiPart),
}

impl BodyShape {
    fn into_part(self) -> Result<BodyPart> {
        match self {
            Self::PlainOnly(text) => Ok(BodyPart::Single(SinglePart::plain(text))),
            Self::HtmlOnly(html) => Ok(BodyPart::Single(SinglePart::html(html))),
            Self::Alternative { text, html } => Ok(BodyPart::Multi(
                MultiPart::alternative()
                    .singlepart(SinglePart::plain(text))
                    .singlepart(SinglePart::html(html)),
            )),
            Self::Missing => Err(PipelineError::MissingBodyContent),
        }
    }
}

/// A serialized message and the content-ids assigned to its attachments.
#[derive(Debug, Clone)]
pub struct ComposedMessage {
    pub bytes: Vec<u8>,
    /// In attachment order; filenames may repeat, ids never do.
    pub attachment_ids: Vec<AttachmentId>,
}

impl ComposedMessage {
    /// Content-id of the first attachment named `filename`.
    pub fn content_id_for(&self, filename: &str) -> Option<&str> {
        self.attachment_ids
            .iter()
            .find(|a| a.filename == filename)
            .map(|a| a.content_id.as_str())
    }
}

/// Build and serialize one message.
///
/// Nothing is written anywhere: the caller persists `bytes` only after
/// this returns successfully.
pub fn compose_message(
    request: &EmailRequest,
    data: &Value,
    attachments: &[ResolvedAttachment],
    renderer: &dyn TemplateRenderer,
) -> Result<ComposedMessage> {
    let mut builder = Message::builder()
        .from(request.from.clone())
        .subject(request.subject.clone())
        .keep_bcc();
    for mailbox in &request.to {
        builder = builder.to(mailbox.clone());
    }
    for mailbox in &request.cc {
        builder = builder.cc(mailbox.clone());
    }
    for mailbox in &request.bcc {
        builder = builder.bcc(mailbox.clone());
    }
    for mailbox in &request.reply_to {
        builder = builder.reply_to(mailbox.clone());
    }

    let text = request
        .body
        .text
        .as_deref()
        .map(|t| renderer.render(t, data))
        .transpose()?;
    let html = request
        .body
        .html
        .as_deref()
        .map(|t| renderer.render_html(t, data))
        .transpose()?;
    let body = BodyShape::select(text, html).into_part()?;

    let domain = request.from.email.domain().to_string();
    let mut attachment_ids = Vec::with_capacity(attachments.len());
    let mut attachment_parts = Vec::with_capacity(attachments.len());
    for attachment in attachments {
        let content_id = generate_content_id(&domain);
        attachment_parts.push(attachment_part(attachment, &content_id)?);
        attachment_ids.push(AttachmentId {
            filename: attachment.filename.clone(),
            content_id,
        });
    }

    let built = if attachment_parts.is_empty() {
        match body {
            BodyPart::Single(part) => builder.singlepart(part),
            BodyPart::Multi(part) => builder.multipart(part),
        }
    } else {
        let mixed = match body {
            BodyPart::Single(part) => MultiPart::mixed().singlepart(part),
            BodyPart::Multi(part) => MultiPart::mixed().multipart(part),
        };
        let mixed = attachment_parts
            .into_iter()
            .fold(mixed, |mixed, part| mixed.singlepart(part));
        builder.multipart(mixed)
    };
    let message = built.map_err(|e| PipelineError::Build(e.to_string()))?;

    let bytes = message.formatted();
    debug!(
        size = bytes.len(),
        attachments = attachment_ids.len(),
        "Composed message"
    );
    Ok(ComposedMessage {
        bytes,
        attachment_ids,
    })
}

/// A fresh, globally unique content-id (without angle brackets).
fn generate_content_id(domain: &str) -> String {
    format!("{}@{}", Uuid::new_v4().simple(), domain)
}

fn attachment_part(attachment: &ResolvedAttachment, content_id: &str) -> Result<SinglePart> {
    let raw_type = attachment
        .content_type
        .as_deref()
        .unwrap_or(DEFAULT_ATTACHMENT_TYPE);
    let content_type = ContentType::parse(raw_type).map_err(|e| PipelineError::AttachmentPart {
        filename: attachment.filename.clone(),
        reason: format!("invalid content type '{raw_type}': {e}"),
    })?;

    Ok(SinglePart::builder()
        .header(content_type)
        .header(ContentDisposition::attachment(&attachment.filename))
        .header(ContentId::from(format!("<{content_id}>")))
        .header(ContentTransferEncoding::Base64)
        .body(attachment.data.to_vec()))
}
