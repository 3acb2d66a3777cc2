//! Operator-facing status events.
//!
//! The pipeline reports what it is doing through a [`StatusSink`] rather
//! than dictating any rendering. The default sink logs through `tracing`;
//! a GUI or TUI front-end would provide its own, and tests use a
//! recording sink.

use std::path::PathBuf;
use std::time::Duration;

/// Why a message was abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The destination rejected the message with a non-retryable status.
    Permanent(String),
    /// Transient failures persisted past the retry ceiling.
    RetriesExhausted(u32),
}

/// Structured pipeline event for the presentation layer.
#[derive(Debug, Clone)]
pub enum StatusEvent {
    /// A line was read but is not a chat line. Routine, trace-level.
    LineSkipped {
        /// The raw line text.
        raw: String,
    },
    /// A message reached the destination.
    Delivered {
        /// Speaker of the underlying chat event.
        speaker: String,
        /// How many attempts it took (1 = first try).
        attempts: u32,
    },
    /// A transient failure; the message will be retried.
    Retrying {
        /// Speaker of the underlying chat event.
        speaker: String,
        /// The attempt that just failed (1-based).
        attempt: u32,
        /// Backoff before the next attempt.
        delay: Duration,
        /// What went wrong.
        reason: String,
    },
    /// The destination asked us to slow down.
    RateLimited {
        /// How long the dispatcher parks before re-sending.
        delay: Duration,
    },
    /// A message was abandoned.
    Dropped {
        /// Speaker of the underlying chat event.
        speaker: String,
        /// The text that was not delivered.
        content: String,
        /// Why.
        reason: DropReason,
    },
    /// The watched file was rotated or truncated; tailing restarted at
    /// offset 0.
    RotationDetected {
        /// The watched path.
        path: PathBuf,
    },
    /// The delivery queue is full; polling is paused until it drains.
    QueueSaturated,
}

/// Destination-agnostic presentation hook for pipeline events.
pub trait StatusSink: Send + Sync {
    /// Report one event. Implementations must not block.
    fn emit(&self, event: StatusEvent);
}

/// Default sink: renders events as `tracing` records at conventional
/// levels (skips at trace, retries at warn, drops at error).
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn emit(&self, event: StatusEvent) {
        match event {
            StatusEvent::LineSkipped { raw } => {
                tracing::trace!(line = %raw, "skipped non-chat line");
            }
            StatusEvent::Delivered { speaker, attempts } => {
                tracing::info!(speaker, attempts, "message delivered");
            }
            StatusEvent::Retrying {
                speaker,
                attempt,
                delay,
                reason,
            } => {
                tracing::warn!(
                    speaker,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    reason,
                    "delivery failed, retrying"
                );
            }
            StatusEvent::RateLimited { delay } => {
                tracing::warn!(
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "destination rate limit, parking"
                );
            }
            StatusEvent::Dropped {
                speaker,
                content,
                reason,
            } => {
                tracing::error!(speaker, content, ?reason, "message dropped");
            }
            StatusEvent::RotationDetected { path } => {
                tracing::info!(path = %path.display(), "log rotation detected, restarting from start of file");
            }
            StatusEvent::QueueSaturated => {
                tracing::warn!("delivery queue full, pausing log polling");
            }
        }
    }
}
