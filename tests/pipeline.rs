#![allow(missing_docs)]
// End-to-end pipeline tests: a real log file on disk, a mock webhook
// endpoint, and the full tail → parse → format → deliver path in
// between, including restart and rotation behavior.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use chatrelay::config::RelayConfig;
use chatrelay::pipeline;
use chatrelay::status::{StatusEvent, StatusSink};

// ── Test fixtures ──

#[derive(Clone, Default)]
struct RecordingSink(Arc<Mutex<Vec<StatusEvent>>>);

impl RecordingSink {
    fn events(&self) -> Vec<StatusEvent> {
        self.0.lock().expect("sink lock").clone()
    }
}

impl StatusSink for RecordingSink {
    fn emit(&self, event: StatusEvent) {
        self.0.lock().expect("sink lock").push(event);
    }
}

fn chat_line(speaker: &str, message: &str) -> String {
    format!(
        "2026-08-30T12:00:00 77.123 INF Chat (from 'Steam_76561199', entity id '171', to 'Global'): '{speaker}': {message}"
    )
}

fn append(path: &Path, lines: &[String]) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("open log for append");
    for line in lines {
        writeln!(file, "{line}").expect("append line");
    }
    file.sync_all().expect("sync log");
}

fn test_config(dir: &Path, webhook_url: &str) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.watch.log_file = dir.join("server_log.txt").display().to_string();
    config.watch.poll_interval_ms = 25;
    config.watch.skip_backlog = false;
    config.webhook.url = webhook_url.to_owned();
    config.paths.checkpoint_file = dir.join("checkpoint.json").display().to_string();
    config.delivery.backoff_base_ms = 10;
    config.delivery.backoff_max_ms = 100;
    config.delivery.shutdown_grace_secs = 5;
    config
}

/// Spawn the pipeline; returns the cancellation token and join handle.
fn spawn_pipeline(
    config: RelayConfig,
    sink: RecordingSink,
) -> (CancellationToken, tokio::task::JoinHandle<anyhow::Result<()>>) {
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let handle =
        tokio::spawn(async move { pipeline::run(&config, Arc::new(sink), task_cancel).await });
    (cancel, handle)
}

/// Poll the mock server until it has seen `count` requests.
async fn wait_for_requests(server: &MockServer, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let received = server
            .received_requests()
            .await
            .expect("request recording enabled");
        if received.len() >= count {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "webhook saw {} of {count} expected requests",
            received.len()
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

async fn received_contents(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .expect("request recording enabled")
        .iter()
        .map(|req| {
            let body: serde_json::Value =
                serde_json::from_slice(&req.body).expect("JSON body");
            body.get("content")
                .and_then(|v| v.as_str())
                .expect("content field")
                .to_owned()
        })
        .collect()
}

async fn shutdown(
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
) {
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("pipeline stops within grace period")
        .expect("task join")
        .expect("pipeline exits cleanly");
}

// ── End-to-end ──

#[tokio::test]
async fn relays_chat_lines_and_skips_the_rest() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path(), &server.uri());
    let log_path = PathBuf::from(&config.watch.log_file);
    append(
        &log_path,
        &[
            chat_line("Azzlaer", "buenas noches xDDD"),
            "2026-08-30T12:00:01 77.456 INF PlayerSpawnedInWorld".to_owned(),
            chat_line("Rott", "gn8"),
        ],
    );

    let sink = RecordingSink::default();
    let (cancel, handle) = spawn_pipeline(config, sink.clone());
    wait_for_requests(&server, 2).await;
    shutdown(cancel, handle).await;

    assert_eq!(
        received_contents(&server).await,
        vec![
            "🧟 Steam — **Azzlaer**: buenas noches xDDD",
            "🧟 Steam — **Rott**: gn8",
        ]
    );
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, StatusEvent::LineSkipped { raw } if raw.contains("PlayerSpawnedInWorld"))));

    // Checkpoint covers everything written so far.
    let checkpoint: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("checkpoint.json")).expect("checkpoint exists"),
    )
    .expect("checkpoint parses");
    let expected = std::fs::metadata(&log_path).expect("log metadata").len();
    assert_eq!(checkpoint["offset"].as_u64(), Some(expected));
}

#[tokio::test]
async fn custom_template_controls_rendering() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(dir.path(), &server.uri());
    config.webhook.message_template = "[{platform}] {speaker} says {message}".to_owned();
    let log_path = PathBuf::from(&config.watch.log_file);
    append(&log_path, &[chat_line("Ann", "hello")]);

    let (cancel, handle) = spawn_pipeline(config, RecordingSink::default());
    wait_for_requests(&server, 1).await;
    shutdown(cancel, handle).await;

    assert_eq!(
        received_contents(&server).await,
        vec!["[Steam] Ann says hello"]
    );
}

// ── Restart ──

#[tokio::test]
async fn restart_resumes_from_checkpoint_without_duplicates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path(), &server.uri());
    let log_path = PathBuf::from(&config.watch.log_file);
    append(&log_path, &[chat_line("Ann", "first")]);

    let (cancel, handle) = spawn_pipeline(config.clone(), RecordingSink::default());
    wait_for_requests(&server, 1).await;
    shutdown(cancel, handle).await;

    // More chat arrives while the relay is down.
    append(&log_path, &[chat_line("Bob", "second")]);

    let (cancel, handle) = spawn_pipeline(config, RecordingSink::default());
    wait_for_requests(&server, 2).await;
    shutdown(cancel, handle).await;

    // Only the new line crossed the wire on restart.
    assert_eq!(
        received_contents(&server).await,
        vec!["🧟 Steam — **Ann**: first", "🧟 Steam — **Bob**: second"]
    );
}

#[tokio::test]
async fn skip_backlog_starts_at_end_of_file() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(dir.path(), &server.uri());
    config.watch.skip_backlog = true;
    let log_path = PathBuf::from(&config.watch.log_file);
    append(&log_path, &[chat_line("Old", "stale backlog")]);

    let (cancel, handle) = spawn_pipeline(config, RecordingSink::default());
    // Give the pipeline a couple of poll cycles, then write fresh chat.
    tokio::time::sleep(Duration::from_millis(100)).await;
    append(&log_path, &[chat_line("New", "fresh")]);
    wait_for_requests(&server, 1).await;
    shutdown(cancel, handle).await;

    assert_eq!(
        received_contents(&server).await,
        vec!["🧟 Steam — **New**: fresh"]
    );
}

// ── Rotation ──

#[tokio::test]
async fn truncation_restarts_from_offset_zero() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path(), &server.uri());
    let log_path = PathBuf::from(&config.watch.log_file);
    append(&log_path, &[chat_line("Ann", "before rotation, a long line")]);

    let sink = RecordingSink::default();
    let (cancel, handle) = spawn_pipeline(config, sink.clone());
    wait_for_requests(&server, 1).await;

    // The server restarts its log: same path, contents reset.
    std::fs::write(&log_path, "").expect("truncate log");
    append(&log_path, &[chat_line("Bob", "after")]);

    wait_for_requests(&server, 2).await;
    shutdown(cancel, handle).await;

    assert_eq!(
        received_contents(&server).await,
        vec![
            "🧟 Steam — **Ann**: before rotation, a long line",
            "🧟 Steam — **Bob**: after",
        ]
    );
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, StatusEvent::RotationDetected { .. })));
}

// ── Backpressure ──

#[tokio::test]
async fn full_queue_pauses_polling_without_losing_messages() {
    let server = MockServer::start().await;
    // A slow destination keeps the dispatcher busy long enough for the
    // polling side to fill the one-slot queue.
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(dir.path(), &server.uri());
    config.delivery.queue_capacity = 1;
    config.watch.poll_interval_ms = 10;
    let log_path = PathBuf::from(&config.watch.log_file);
    append(
        &log_path,
        &[
            chat_line("Ann", "one"),
            chat_line("Bob", "two"),
            chat_line("Cid", "three"),
            chat_line("Dee", "four"),
        ],
    );

    let sink = RecordingSink::default();
    let (cancel, handle) = spawn_pipeline(config, sink.clone());
    wait_for_requests(&server, 4).await;
    shutdown(cancel, handle).await;

    // Polling paused instead of shedding: every message arrives, in order.
    assert_eq!(
        received_contents(&server).await,
        vec![
            "🧟 Steam — **Ann**: one",
            "🧟 Steam — **Bob**: two",
            "🧟 Steam — **Cid**: three",
            "🧟 Steam — **Dee**: four",
        ]
    );
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, StatusEvent::QueueSaturated)));
}

// ── Resilience ──

#[tokio::test]
async fn missing_log_file_is_not_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(dir.path(), &server.uri());
    let log_path = PathBuf::from(&config.watch.log_file);

    // Start with no log file at all; it appears later.
    let (cancel, handle) = spawn_pipeline(config, RecordingSink::default());
    tokio::time::sleep(Duration::from_millis(100)).await;
    append(&log_path, &[chat_line("Late", "file just appeared")]);
    wait_for_requests(&server, 1).await;
    shutdown(cancel, handle).await;

    assert_eq!(
        received_contents(&server).await,
        vec!["🧟 Steam — **Late**: file just appeared"]
    );
}
