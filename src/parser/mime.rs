//! Read-back of composed messages: MIME structure summary and SMTP envelope.

use lettre::address::Envelope;
use lettre::Address as LettreAddress;
use mail_parser::{Address, MessageParser, MimeHeaders, PartType};
use serde::Serialize;

use crate::error::{PipelineError, Result, TransportError};

/// Maximum depth for recursive multipart descent (to prevent stack overflow on adversarial input).
const MAX_DEPTH: usize = 10;

/// One node of a message's MIME tree.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PartSummary {
    /// `type/subtype`, e.g. `multipart/alternative`.
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    /// Decoded size in bytes (0 for containers).
    pub size: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PartSummary>,
}

impl PartSummary {
    /// Leaf parts in document order.
    pub fn leaves(&self) -> Vec<&PartSummary> {
        if self.children.is_empty() {
            return vec![self];
        }
        self.children.iter().flat_map(|c| c.leaves()).collect()
    }
}

/// Headers and MIME structure of a message.
#[derive(Debug, Clone, Serialize)]
pub struct MessageSummary {
    pub from: Vec<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub reply_to: Vec<String>,
    pub subject: Option<String>,
    pub message_id: Option<String>,
    pub structure: PartSummary,
}

/// Parse a raw message and summarize its headers and part tree.
pub fn summarize(raw_message: &[u8]) -> Result<MessageSummary> {
    let parser = MessageParser::default();
    let msg = parser
        .parse(raw_message)
        .ok_or_else(|| PipelineError::Build("message could not be parsed".into()))?;

    let structure = summarize_part(&msg, 0, 0)
        .ok_or_else(|| PipelineError::Build("message has no root part".into()))?;

    Ok(MessageSummary {
        from: addresses(msg.from()),
        to: addresses(msg.to()),
        cc: addresses(msg.cc()),
        bcc: addresses(msg.bcc()),
        reply_to: addresses(msg.reply_to()),
        subject: msg.subject().map(String::from),
        message_id: msg.message_id().map(String::from),
        structure,
    })
}

/// Decoded contents of every leaf part that carries a filename, in order.
pub fn attachment_contents(raw_message: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let parser = MessageParser::default();
    let msg = parser
        .parse(raw_message)
        .ok_or_else(|| PipelineError::Build("message could not be parsed".into()))?;
    Ok(msg
        .attachments()
        .map(|part| {
            (
                part.attachment_name().unwrap_or("").to_string(),
                part.contents().to_vec(),
            )
        })
        .collect())
}

/// Build an SMTP envelope from the `From`, `To`, `Cc` and `Bcc` headers.
pub fn envelope_of(raw_message: &[u8]) -> std::result::Result<Envelope, TransportError> {
    let parser = MessageParser::default();
    let msg = parser
        .parse(raw_message)
        .ok_or_else(|| TransportError::Envelope("message could not be parsed".into()))?;

    let from = addresses(msg.from())
        .into_iter()
        .next()
        .map(|a| parse_address(&a))
        .transpose()?;

    let recipients = [msg.to(), msg.cc(), msg.bcc()]
        .into_iter()
        .flat_map(addresses)
        .map(|a| parse_address(&a))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Envelope::new(from, recipients).map_err(|e| TransportError::Envelope(e.to_string()))
}

/// The `Message-ID` header of a raw message, without angle brackets.
pub fn message_id_of(raw_message: &[u8]) -> Option<String> {
    MessageParser::default()
        .parse(raw_message)
        .and_then(|m| m.message_id().map(String::from))
}

fn parse_address(raw: &str) -> std::result::Result<LettreAddress, TransportError> {
    raw.parse::<LettreAddress>()
        .map_err(|e| TransportError::Envelope(format!("invalid address '{raw}': {e}")))
}

/// Bare addresses of a header, flattening groups.
fn addresses(header: Option<&Address<'_>>) -> Vec<String> {
    let Some(header) = header else {
        return Vec::new();
    };
    let addrs: Vec<_> = match header {
        Address::List(list) => list.iter().collect(),
        Address::Group(groups) => groups.iter().flat_map(|g| g.addresses.iter()).collect(),
    };
    addrs
        .into_iter()
        .filter_map(|a| a.address.as_ref().map(|s| s.to_string()))
        .collect()
}

fn summarize_part(
    msg: &mail_parser::Message<'_>,
    part_id: usize,
    depth: usize,
) -> Option<PartSummary> {
    let part = msg.parts.get(part_id)?;

    let content_type = part
        .content_type()
        .map(|ct: &mail_parser::ContentType| {
            let main = ct.ctype();
            match ct.subtype() {
                Some(sub) => format!("{main}/{sub}"),
                None => main.to_string(),
            }
        })
        .unwrap_or_else(|| "text/plain".to_string())
        .to_ascii_lowercase();

    let children = match &part.body {
        PartType::Multipart(ids) if depth < MAX_DEPTH => ids
            .iter()
            .filter_map(|id| summarize_part(msg, *id as usize, depth + 1))
            .collect(),
        _ => Vec::new(),
    };

    let size = if children.is_empty() {
        part.contents().len()
    } else {
        0
    };

    Some(PartSummary {
        content_type,
        filename: part.attachment_name().map(String::from),
        content_id: part.content_id().map(String::from),
        size,
        children,
    })
}
