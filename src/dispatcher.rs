//! Webhook delivery — serial FIFO dispatch with retries and rate-limit
//! handling.
//!
//! The dispatcher drains its queue one message at a time and never starts
//! message N+1 before message N reaches a terminal state, so the
//! destination sees chat in chronological order. Per attempt:
//!
//! - 2xx — delivered; the checkpoint advances and the message is gone.
//! - 429 — park until the destination's retry-after, then re-send the
//!   same message (does not count against the retry ceiling).
//! - network error / 5xx — exponential backoff with jitter, bounded by
//!   the retry ceiling, then dropped and reported.
//! - other 4xx — permanent; dropped after the one attempt, reported,
//!   and the pipeline moves on.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::checkpoint::{Checkpoint, PositionStore};
use crate::formatter::OutboundMessage;
use crate::status::{DropReason, StatusEvent, StatusSink};
use crate::tailer::FileIdentity;

/// A message queued for delivery, carrying the file position it came
/// from so the checkpoint can advance once it is delivered.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// The rendered message.
    pub message: OutboundMessage,
    /// Identity of the file the source line was read from.
    pub identity: FileIdentity,
    /// Byte offset just past the source line.
    pub end_offset: u64,
}

/// Exponential backoff schedule for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts before a message is dropped (1 = no retries).
    pub max_attempts: u32,
    /// Base delay; attempt k waits `min(max, base * 2^(k-1))` plus
    /// jitter up to one base unit.
    pub base_delay: Duration,
    /// Upper bound on the exponential part of the delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retrying after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);

        let doublings = attempt.saturating_sub(1);
        let factor = 1u64.checked_shl(doublings).unwrap_or(u64::MAX);
        let delay = base_ms.saturating_mul(factor).min(max_ms);

        let jitter = if base_ms > 0 {
            rand::thread_rng().gen_range(0..base_ms)
        } else {
            0
        };
        Duration::from_millis(delay.saturating_add(jitter))
    }
}

/// Outcome of a single HTTP attempt.
#[derive(Debug)]
enum AttemptOutcome {
    /// 2xx — message accepted.
    Delivered,
    /// 429 — park for the indicated duration, then re-attempt.
    RateLimited(Duration),
    /// Network failure or 5xx — retry with backoff.
    Transient(String),
    /// Non-retryable 4xx — drop and report.
    Permanent(String),
}

/// Serial webhook dispatcher.
///
/// Owns the HTTP client, the retry policy, and the checkpoint store;
/// the checkpoint is written here because successful delivery is the
/// only thing that advances it.
pub struct Dispatcher {
    client: reqwest::Client,
    webhook_url: Url,
    policy: RetryPolicy,
    store: PositionStore,
    /// Path of the watched log, recorded into every checkpoint so a
    /// restart can tell whether the record belongs to its file.
    log_path: PathBuf,
    sink: Arc<dyn StatusSink>,
}

impl Dispatcher {
    /// Create a dispatcher for one destination.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        webhook_url: Url,
        request_timeout: Duration,
        policy: RetryPolicy,
        store: PositionStore,
        log_path: PathBuf,
        sink: Arc<dyn StatusSink>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            webhook_url,
            policy,
            store,
            log_path,
            sink,
        })
    }

    /// Drain the queue until it closes or `cancel` fires.
    ///
    /// Cancellation is honored between attempts: the in-flight HTTP
    /// request is allowed to finish (it is bounded by the request
    /// timeout), but no new attempt starts afterwards. An undelivered
    /// message is simply re-read from the log on the next start — the
    /// checkpoint only ever reflects confirmed deliveries.
    pub async fn run(self, mut queue: mpsc::Receiver<Envelope>, cancel: CancellationToken) {
        loop {
            let envelope = tokio::select! {
                _ = cancel.cancelled() => break,
                next = queue.recv() => match next {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            self.deliver(envelope, &cancel).await;
        }
        debug!("dispatcher stopped");
    }

    /// Drive one message to a terminal state: delivered, permanently
    /// rejected, retries exhausted, or shutdown.
    async fn deliver(&self, envelope: Envelope, cancel: &CancellationToken) {
        let speaker = envelope.message.event.speaker.clone();
        let mut attempt: u32 = 1;

        loop {
            match self.attempt(&envelope.message).await {
                AttemptOutcome::Delivered => {
                    self.sink.emit(StatusEvent::Delivered {
                        speaker,
                        attempts: attempt,
                    });
                    self.advance_checkpoint(&envelope);
                    return;
                }
                AttemptOutcome::RateLimited(delay) => {
                    // Not a failure of ours; the same message is re-sent
                    // after the destination's window and the attempt
                    // counter stays put.
                    self.sink.emit(StatusEvent::RateLimited { delay });
                    if !self.sleep_unless_cancelled(delay, cancel).await {
                        return;
                    }
                }
                AttemptOutcome::Transient(reason) => {
                    if attempt >= self.policy.max_attempts {
                        self.sink.emit(StatusEvent::Dropped {
                            speaker,
                            content: envelope.message.content.clone(),
                            reason: DropReason::RetriesExhausted(attempt),
                        });
                        return;
                    }
                    let delay = self.policy.backoff(attempt);
                    self.sink.emit(StatusEvent::Retrying {
                        speaker: speaker.clone(),
                        attempt,
                        delay,
                        reason,
                    });
                    if !self.sleep_unless_cancelled(delay, cancel).await {
                        return;
                    }
                    attempt = attempt.saturating_add(1);
                }
                AttemptOutcome::Permanent(reason) => {
                    self.sink.emit(StatusEvent::Dropped {
                        speaker,
                        content: envelope.message.content.clone(),
                        reason: DropReason::Permanent(reason),
                    });
                    return;
                }
            }
        }
    }

    /// Issue one HTTP POST and classify the result.
    async fn attempt(&self, message: &OutboundMessage) -> AttemptOutcome {
        let body = serde_json::json!({ "content": message.content });

        let response = match self
            .client
            .post(self.webhook_url.clone())
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return AttemptOutcome::Transient(format!("request failed: {e}")),
        };

        let status = response.status();
        if status.is_success() {
            return AttemptOutcome::Delivered;
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let delay = match retry_after(&response) {
                Some(delay) => delay,
                None => read_body_retry_after(response)
                    .await
                    .unwrap_or(self.policy.base_delay),
            };
            return AttemptOutcome::RateLimited(delay);
        }
        if status.is_server_error() {
            return AttemptOutcome::Transient(format!("destination returned {status}"));
        }
        AttemptOutcome::Permanent(format!("destination returned {status}"))
    }

    /// Persist the checkpoint for a delivered message. Best-effort: a
    /// failed write costs at most a re-delivery after restart, which the
    /// at-least-once contract already allows.
    fn advance_checkpoint(&self, envelope: &Envelope) {
        let checkpoint = Checkpoint::new(
            self.log_path.clone(),
            envelope.identity,
            envelope.end_offset,
        );
        if let Err(e) = self.store.save(&checkpoint) {
            warn!(error = %e, "failed to persist checkpoint");
        }
    }

    /// Sleep, returning `false` if cancelled first.
    async fn sleep_unless_cancelled(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}

/// Send a one-shot probe message to the webhook and report the outcome.
///
/// Backs the `test-webhook` subcommand; no retries, no checkpoint — the
/// operator just wants to know whether the URL works.
///
/// # Errors
///
/// Returns an error on a transport failure or any non-2xx status.
pub async fn send_probe(
    webhook_url: &Url,
    request_timeout: Duration,
    text: &str,
) -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .timeout(request_timeout)
        .build()?;
    let body = serde_json::json!({ "content": text });
    let response = client.post(webhook_url.clone()).json(&body).send().await?;
    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("webhook probe rejected with {status}");
    }
    Ok(())
}

/// Parse a `Retry-After` header (delta-seconds form).
fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    let value = response.headers().get(reqwest::header::RETRY_AFTER)?;
    let seconds: u64 = value.to_str().ok()?.trim().parse().ok()?;
    Some(Duration::from_secs(seconds))
}

/// Parse a Discord-style JSON body with a fractional `retry_after`
/// seconds field. Consumes the response body.
async fn read_body_retry_after(response: reqwest::Response) -> Option<Duration> {
    let value: serde_json::Value = response.json().await.ok()?;
    let seconds = value.get("retry_after")?.as_f64()?;
    if seconds.is_finite() && seconds >= 0.0 {
        Some(Duration::from_secs_f64(seconds))
    } else {
        None
    }
}
