//! Mail transports: hand a raw RFC 822 message to a delivery service.

use std::path::PathBuf;

use async_trait::async_trait;
use lettre::address::Envelope;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tracing::{debug, info};

use crate::config::{DispatchConfig, SmtpConfig, TransportKind};
use crate::error::TransportError;
use crate::model::receipt::DeliveryReceipt;
use crate::parser::mime::{envelope_of, message_id_of};

/// A delivery service that accepts raw messages.
///
/// The envelope is derived from the message's own headers, so `raw`
/// must carry `From` and at least one of `To`, `Cc` or `Bcc`. The bytes
/// handed to the service never contain the `Bcc` field.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_raw(&self, raw: &[u8]) -> Result<DeliveryReceipt, TransportError>;
}

/// Relay through an SMTP server.
pub struct SmtpTransport {
    inner: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    pub fn new(config: &SmtpConfig) -> Result<Self, TransportError> {
        let builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };
        let builder = builder.port(config.port);
        let builder = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => {
                builder.credentials(Credentials::new(user.clone(), pass.clone()))
            }
            _ => builder,
        };
        info!(host = %config.host, port = config.port, starttls = config.starttls, "SMTP transport ready");
        Ok(Self {
            inner: builder.build(),
        })
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send_raw(&self, raw: &[u8]) -> Result<DeliveryReceipt, TransportError> {
        let (envelope, wire) = prepare_submission(raw)?;
        debug!(recipients = envelope.to().len(), "Submitting over SMTP");
        let response = self.inner.send_raw(&envelope, &wire).await?;

        let message_id = response
            .first_line()
            .map(str::to_string)
            .or_else(|| message_id_of(raw))
            .unwrap_or_default();
        Ok(DeliveryReceipt {
            status: response.code().to_string(),
            message_id,
        })
    }
}

/// Write each message as a `.eml` file into an outbox directory.
pub struct FileTransport {
    inner: AsyncFileTransport<Tokio1Executor>,
    dir: PathBuf,
}

impl FileTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            inner: AsyncFileTransport::new(&dir),
            dir,
        }
    }
}

#[async_trait]
impl Transport for FileTransport {
    async fn send_raw(&self, raw: &[u8]) -> Result<DeliveryReceipt, TransportError> {
        let (envelope, wire) = prepare_submission(raw)?;
        let id = self.inner.send_raw(&envelope, &wire).await?;
        debug!(dir = %self.dir.display(), %id, "Wrote message to outbox");
        Ok(DeliveryReceipt {
            status: "OK".to_string(),
            message_id: id,
        })
    }
}

/// Derive the envelope from `raw` and return the bytes to submit.
///
/// Bcc recipients stay in the envelope but the `Bcc` field, folded
/// continuation lines included, is removed from the submitted header.
pub fn prepare_submission(raw: &[u8]) -> Result<(Envelope, Vec<u8>), TransportError> {
    let envelope = envelope_of(raw)?;
    Ok((envelope, strip_bcc(raw)))
}

/// Copy `raw` without its `Bcc` header field. The body is copied verbatim.
fn strip_bcc(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut skipping = false;
    let mut lines = raw.split_inclusive(|&b| b == b'\n');
    for line in lines.by_ref() {
        if line == b"\r\n" || line == b"\n" {
            out.extend_from_slice(line);
            break;
        }
        let continuation = matches!(line.first(), Some(b' ' | b'\t'));
        if !continuation {
            skipping = is_bcc_field(line);
        }
        if !skipping {
            out.extend_from_slice(line);
        }
    }
    for line in lines {
        out.extend_from_slice(line);
    }
    out
}

fn is_bcc_field(line: &[u8]) -> bool {
    line.iter()
        .position(|&b| b == b':')
        .is_some_and(|colon| line[..colon].trim_ascii_end().eq_ignore_ascii_case(b"bcc"))
}

/// Construct the configured transport.
///
/// The outbox directory of the file transport is created if missing.
pub fn build_transport(config: &DispatchConfig) -> Result<Box<dyn Transport>, TransportError> {
    match config.transport {
        TransportKind::Smtp => Ok(Box::new(SmtpTransport::new(&config.smtp)?)),
        TransportKind::File => {
            std::fs::create_dir_all(&config.outbox_dir).map_err(|source| TransportError::Io {
                path: config.outbox_dir.clone(),
                source,
            })?;
            Ok(Box::new(FileTransport::new(&config.outbox_dir)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &[u8] = b"From: a@x.com\r\nTo: b@x.com\r\nBcc: c@x.com\r\nSubject: Hi\r\n\
Message-ID: <m1@x.com>\r\n\r\nhello\r\n";

    #[tokio::test]
    async fn test_file_transport_writes_outbox() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FileTransport::new(dir.path());
        let receipt = transport.send_raw(RAW).await.unwrap();
        assert_eq!(receipt.status, "OK");
        assert!(!receipt.message_id.is_empty());

        let written = std::fs::read(dir.path().join(format!("{}.eml", receipt.message_id))).unwrap();
        assert_eq!(
            written,
            b"From: a@x.com\r\nTo: b@x.com\r\nSubject: Hi\r\nMessage-ID: <m1@x.com>\r\n\r\nhello\r\n"
        );
    }

    #[test]
    fn test_submission_drops_folded_bcc_but_keeps_envelope() {
        let raw = b"From: a@x.com\r\nbcc: c@x.com,\r\n\td@x.com\r\nTo: b@x.com\r\n\
Subject: Bcc: in subject\r\n\r\nBcc: body line\r\n";
        let (envelope, wire) = prepare_submission(raw).unwrap();

        let recipients: Vec<String> = envelope.to().iter().map(ToString::to_string).collect();
        assert!(recipients.contains(&"c@x.com".to_string()));
        assert!(recipients.contains(&"d@x.com".to_string()));
        assert_eq!(
            wire,
            b"From: a@x.com\r\nTo: b@x.com\r\nSubject: Bcc: in subject\r\n\r\nBcc: body line\r\n"
        );
    }

    #[test]
    fn test_submission_without_bcc_is_unchanged() {
        let raw = b"From: a@x.com\nTo: b@x.com\n\nhello\n";
        let (_, wire) = prepare_submission(raw).unwrap();
        assert_eq!(wire, raw);
    }

    #[tokio::test]
    async fn test_message_without_recipients_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FileTransport::new(dir.path());
        let err = transport
            .send_raw(b"From: a@x.com\r\nSubject: Hi\r\n\r\nhello\r\n")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Envelope(_)));
    }

    #[test]
    fn test_build_file_transport_creates_outbox() {
        let dir = tempfile::tempdir().unwrap();
        let config = DispatchConfig {
            outbox_dir: dir.path().join("nested/outbox"),
            ..DispatchConfig::default()
        };
        build_transport(&config).unwrap();
        assert!(config.outbox_dir.is_dir());
    }

    #[test]
    fn test_outbox_under_a_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let config = DispatchConfig {
            outbox_dir: blocker.join("outbox"),
            ..DispatchConfig::default()
        };
        let err = build_transport(&config).err().unwrap();
        assert!(matches!(err, TransportError::Io { ref path, .. } if *path == config.outbox_dir));
    }
}
