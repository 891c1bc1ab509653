//! Integration tests driving the composer and dispatcher stages end to end
//! against the in-memory store and fake transports.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use mailpipe::compose::template::{IdentityRenderer, PlaceholderRenderer, TemplateRenderer};
use mailpipe::compose::{ComposeOptions, Composer};
use mailpipe::dispatch::transport::{prepare_submission, FileTransport, Transport};
use mailpipe::dispatch::{Dispatcher, InvocationContext};
use mailpipe::error::{PipelineError, StorageError, TransportError};
use mailpipe::model::receipt::DeliveryReceipt;
use mailpipe::parser::mime::{attachment_contents, envelope_of, summarize};
use mailpipe::store::memory::MemoryStore;
use mailpipe::store::PutOptions;

fn fixture(name: &str) -> Vec<u8> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    std::fs::read(path).unwrap()
}

fn composer_with(store: &Arc<MemoryStore>, renderer: Arc<dyn TemplateRenderer>) -> Composer {
    Composer::new(store.clone(), renderer, ComposeOptions::default())
}

fn composer(store: &Arc<MemoryStore>) -> Composer {
    composer_with(store, Arc::new(IdentityRenderer))
}

fn basic_input() -> Value {
    json!({
        "location": {"bucket": "b", "key": "x.queued.json"},
        "request": {"email": {
            "from": "a@x.com", "to": "b@x.com", "subject": "Hi", "body": {"text": "hello"}
        }}
    })
}

fn with_email(mut input: Value, field: &str, value: Value) -> Value {
    input["request"]["email"][field] = value;
    input
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

/// Records every submitted message and the envelope it would be sent with.
#[derive(Default)]
struct RecordingTransport {
    delay: Duration,
    sent: Mutex<Vec<(Vec<String>, Vec<u8>)>>,
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_raw(&self, raw: &[u8]) -> Result<DeliveryReceipt, TransportError> {
        tokio::time::sleep(self.delay).await;
        let envelope = envelope_of(raw)?;
        let recipients = envelope.to().iter().map(|a| a.to_string()).collect();
        self.sent.lock().await.push((recipients, raw.to_vec()));
        Ok(DeliveryReceipt {
            status: "250".into(),
            message_id: format!("msg-{}", raw.len()),
        })
    }
}

// ─── Test 1: Plain-text request → single-part message at .send.eml ──

#[tokio::test]
async fn test_plain_text_scenario() {
    let store = Arc::new(MemoryStore::new());
    let output = composer(&store).compose(&basic_input()).await.unwrap();

    assert_eq!(
        serde_json::to_value(&output).unwrap(),
        json!({"bucket": "b", "key": "x.send.eml", "uri": "s3://b/x.send.eml"})
    );

    let raw = store.contents("b", "x.send.eml").await.unwrap();
    let summary = summarize(&raw).unwrap();
    assert_eq!(summary.structure.content_type, "text/plain");
    assert!(summary.structure.children.is_empty());
    assert_eq!(summary.from, vec!["a@x.com"]);
    assert_eq!(summary.to, vec!["b@x.com"]);
    assert_eq!(summary.subject.as_deref(), Some("Hi"));
}

// ─── Test 2: Second run short-circuits without rewriting ────────────

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let composer = composer(&store);

    let first = composer.compose(&basic_input()).await.unwrap();
    let bytes_after_first = store.contents("b", "x.send.eml").await.unwrap();

    let second = composer.compose(&basic_input()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(store.put_count("b", "x.send.eml").await, 1);
    assert_eq!(
        store.contents("b", "x.send.eml").await.unwrap(),
        bytes_after_first
    );
}

// ─── Test 3: Stored request is not re-fetched on the second run ─────

#[tokio::test]
async fn test_stored_request_not_refetched() {
    let store = Arc::new(MemoryStore::new());
    let request = basic_input()["request"].clone();
    store
        .insert(
            "b",
            "x.queued.json",
            serde_json::to_vec(&request).unwrap(),
            PutOptions::default(),
        )
        .await;
    let input = json!({"location": {"bucket": "b", "key": "x.queued.json"}});
    let composer = composer(&store);

    let first = composer.compose(&input).await.unwrap();
    let reads_after_first = store.get_count("b", "x.queued.json").await;
    assert!(reads_after_first >= 1);

    let second = composer.compose(&input).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(store.get_count("b", "x.queued.json").await, reads_after_first);
    assert_eq!(store.put_count("b", "x.send.eml").await, 1);
}

// ─── Test 4: Full request: data, templates, encodings, overrides ────

#[tokio::test]
async fn test_full_request_from_store() {
    let store = Arc::new(MemoryStore::new());
    store
        .insert("mail", "jobs/report.queued.json", fixture("report.queued.json"), PutOptions::default())
        .await;
    store
        .insert("mail", "data/report.json", fixture("report.data.json"), PutOptions::default())
        .await;
    store
        .insert(
            "mail",
            "attachments/summary.csv",
            gzip(b"month,total\njan,42\n"),
            PutOptions {
                content_type: Some("text/csv".into()),
                content_encoding: Some("gzip".into()),
            },
        )
        .await;
    store
        .insert(
            "mail",
            "attachments/chart.bin",
            &b"\x89PNG\r\n\x1a\nfake"[..],
            PutOptions::default(),
        )
        .await;

    let output = composer_with(&store, Arc::new(PlaceholderRenderer))
        .compose(&json!({"location": {"bucket": "mail", "key": "jobs/report.queued.json"}}))
        .await
        .unwrap();
    assert_eq!(output.key, "jobs/report.send.eml");

    let raw = store.contents("mail", "jobs/report.send.eml").await.unwrap();
    let summary = summarize(&raw).unwrap();
    assert_eq!(summary.to, vec!["alice@example.com", "bob@example.com"]);
    assert_eq!(summary.cc, vec!["carol@example.com"]);
    assert_eq!(summary.bcc, vec!["audit@example.com"]);
    assert_eq!(summary.reply_to, vec!["support@example.com"]);

    let root = &summary.structure;
    assert_eq!(root.content_type, "multipart/mixed");
    assert_eq!(root.children.len(), 3);
    assert_eq!(root.children[0].content_type, "multipart/alternative");
    assert_eq!(root.children[1].filename.as_deref(), Some("summary.csv"));
    assert_eq!(root.children[1].content_type, "text/csv");
    assert_eq!(root.children[2].filename.as_deref(), Some("chart.png"));
    assert_eq!(root.children[2].content_type, "image/png");

    let parsed = mail_parser::MessageParser::default().parse(&raw[..]).unwrap();
    assert_eq!(
        parsed.body_text(0).unwrap().trim_end(),
        "Hello Alice, your total is 42."
    );
    assert!(parsed.body_html(0).unwrap().contains("<b>Alice</b>"));

    let contents = attachment_contents(&raw).unwrap();
    assert_eq!(contents[0].1, b"month,total\njan,42\n");
    assert_eq!(contents[1].1, b"\x89PNG\r\n\x1a\nfake");
}

// ─── Test 5: Attachment order survives out-of-order completion ──────

#[tokio::test(start_paused = true)]
async fn test_attachment_order_preserved_under_latency() {
    let store = Arc::new(MemoryStore::new());
    let names = ["first.txt", "second.txt", "third.txt", "fourth.txt"];
    for (i, name) in names.iter().enumerate() {
        store
            .insert("b", name, name.as_bytes().to_vec(), PutOptions::default())
            .await;
        // Earlier attachments finish last.
        store
            .set_latency("b", name, Duration::from_millis(400 - 100 * i as u64))
            .await;
    }
    let input = with_email(basic_input(), "attachments", json!(names));

    composer(&store).compose(&input).await.unwrap();

    let raw = store.contents("b", "x.send.eml").await.unwrap();
    let filenames: Vec<String> = attachment_contents(&raw)
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(filenames, names);
}

// ─── Test 6: Identical filenames get distinct content-ids ───────────

#[tokio::test]
async fn test_duplicate_filenames_distinct_content_ids() {
    let store = Arc::new(MemoryStore::new());
    store
        .insert("b", "one/report.pdf", &b"one"[..], PutOptions::default())
        .await;
    store
        .insert("b", "two/report.pdf", &b"two"[..], PutOptions::default())
        .await;
    let input = with_email(
        basic_input(),
        "attachments",
        json!(["one/report.pdf", "two/report.pdf"]),
    );

    composer(&store).compose(&input).await.unwrap();

    let raw = store.contents("b", "x.send.eml").await.unwrap();
    let summary = summarize(&raw).unwrap();
    let parts: Vec<_> = summary
        .structure
        .leaves()
        .into_iter()
        .filter(|p| p.filename.as_deref() == Some("report.pdf"))
        .collect();
    assert_eq!(parts.len(), 2);
    assert!(parts[0].content_id.is_some());
    assert_ne!(parts[0].content_id, parts[1].content_id);
}

// ─── Test 7: Text + HTML → alternative with plain first ─────────────

#[tokio::test]
async fn test_alternative_plain_first() {
    let store = Arc::new(MemoryStore::new());
    let input = with_email(
        basic_input(),
        "body",
        json!({"text": "hello", "html": "<p>hello</p>"}),
    );
    composer(&store).compose(&input).await.unwrap();

    let raw = store.contents("b", "x.send.eml").await.unwrap();
    let root = summarize(&raw).unwrap().structure;
    assert_eq!(root.content_type, "multipart/alternative");
    assert_eq!(root.children[0].content_type, "text/plain");
    assert_eq!(root.children[1].content_type, "text/html");
}

// ─── Test 8: Missing body fails and writes nothing ──────────────────

#[tokio::test]
async fn test_missing_body_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let input = with_email(basic_input(), "body", json!({}));
    assert!(matches!(
        composer(&store).compose(&input).await,
        Err(PipelineError::MissingBodyContent)
    ));
    assert!(store.contents("b", "x.send.eml").await.is_none());
}

// ─── Test 9: Scalar `to` and one-element array are equivalent ───────

#[tokio::test]
async fn test_scalar_and_array_to_are_equivalent() {
    let scalar_store = Arc::new(MemoryStore::new());
    let array_store = Arc::new(MemoryStore::new());
    composer(&scalar_store)
        .compose(&with_email(basic_input(), "to", json!("b@x.com")))
        .await
        .unwrap();
    composer(&array_store)
        .compose(&with_email(basic_input(), "to", json!(["b@x.com"])))
        .await
        .unwrap();

    let scalar = summarize(&scalar_store.contents("b", "x.send.eml").await.unwrap()).unwrap();
    let array = summarize(&array_store.contents("b", "x.send.eml").await.unwrap()).unwrap();
    assert_eq!(scalar.to, array.to);
}

// ─── Test 10: Probe failure other than not-found propagates ─────────

#[tokio::test]
async fn test_probe_failure_propagates() {
    let store = Arc::new(MemoryStore::new());
    store.fail_with("b", "x.send.eml", "access denied").await;

    let err = composer(&store).compose(&basic_input()).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Storage(StorageError::Backend(ref m)) if m == "access denied"
    ));
    assert_eq!(store.put_count("b", "x.send.eml").await, 0);
}

// ─── Test 11: One missing attachment aborts the whole composition ───

#[tokio::test]
async fn test_missing_attachment_aborts() {
    let store = Arc::new(MemoryStore::new());
    store
        .insert("b", "present.txt", &b"here"[..], PutOptions::default())
        .await;
    let input = with_email(
        basic_input(),
        "attachments",
        json!(["present.txt", "s3://b/absent.txt"]),
    );

    let err = composer(&store).compose(&input).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::AttachmentResolution { ref reference, .. } if reference == "b/absent.txt"
    ));
    assert_eq!(store.put_count("b", "x.send.eml").await, 0);
}

// ─── Test 12: Malformed address fails validation, naming the field ──

#[tokio::test]
async fn test_malformed_address_names_field() {
    let store = Arc::new(MemoryStore::new());
    let input = with_email(basic_input(), "cc", json!(["ok@x.com", "not an address"]));
    let err = composer(&store).compose(&input).await.unwrap_err();
    assert!(matches!(err, PipelineError::Validation { .. }));
    assert!(err.to_string().contains("request.email.cc"));
}

// ─── Test 13: Compose then dispatch, Bcc reaches the envelope ───────

#[tokio::test]
async fn test_compose_then_dispatch() {
    let store = Arc::new(MemoryStore::new());
    let input = with_email(basic_input(), "bcc", json!("hidden@x.com"));
    let output = composer(&store).compose(&input).await.unwrap();

    let transport = Arc::new(RecordingTransport::default());
    let dispatcher = Dispatcher::new(store.clone(), transport.clone(), Duration::from_millis(100));
    let ctx = InvocationContext::from_remaining(Duration::from_secs(10));
    let receipt = dispatcher
        .dispatch(&json!({"bucket": output.bucket, "key": output.key}), &ctx)
        .await
        .unwrap();
    assert_eq!(receipt.status, "250");

    let sent = transport.sent.lock().await;
    assert_eq!(sent.len(), 1);
    let (recipients, raw) = &sent[0];
    assert_eq!(recipients, &vec!["b@x.com".to_string(), "hidden@x.com".to_string()]);
    assert_eq!(
        raw.as_slice(),
        &store.contents("b", "x.send.eml").await.unwrap()[..]
    );
}

// ─── Test 14: Slow transport is cancelled at the deadline ───────────

#[tokio::test(start_paused = true)]
async fn test_dispatch_deadline_exceeded() {
    let store = Arc::new(MemoryStore::new());
    composer(&store).compose(&basic_input()).await.unwrap();

    let transport = Arc::new(RecordingTransport {
        delay: Duration::from_secs(60),
        ..Default::default()
    });
    let dispatcher = Dispatcher::new(store.clone(), transport.clone(), Duration::from_millis(250));
    let ctx = InvocationContext::from_remaining(Duration::from_secs(3));

    let err = dispatcher
        .dispatch(&json!({"bucket": "b", "key": "x.send.eml"}), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::DeadlineExceeded { budget } if budget == Duration::from_millis(2750)
    ));
    assert!(transport.sent.lock().await.is_empty());
    assert_eq!(ctx.remaining_time(), Duration::from_millis(250));
}

// ─── Test 15: Delivered copy has no Bcc header, envelope keeps it ───

#[tokio::test]
async fn test_delivered_message_hides_bcc() {
    let store = Arc::new(MemoryStore::new());
    let input = with_email(basic_input(), "bcc", json!(["hidden@x.com"]));
    composer(&store).compose(&input).await.unwrap();
    let stored = store.contents("b", "x.send.eml").await.unwrap();

    let outbox = tempfile::tempdir().unwrap();
    let dispatcher = Dispatcher::new(
        store.clone(),
        Arc::new(FileTransport::new(outbox.path())),
        Duration::from_millis(100),
    );
    let ctx = InvocationContext::from_remaining(Duration::from_secs(10));
    let receipt = dispatcher
        .dispatch(&json!({"bucket": "b", "key": "x.send.eml"}), &ctx)
        .await
        .unwrap();

    let delivered = std::fs::read(outbox.path().join(format!("{}.eml", receipt.message_id))).unwrap();
    let text = String::from_utf8_lossy(&delivered);
    assert!(!text
        .lines()
        .any(|line| line.to_ascii_lowercase().starts_with("bcc:")));
    assert!(!text.contains("hidden@x.com"));

    let (envelope, wire) = prepare_submission(&stored).unwrap();
    assert!(envelope.to().iter().any(|a| a.to_string() == "hidden@x.com"));
    assert_eq!(wire, delivered);
}
