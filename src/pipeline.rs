//! Pipeline wiring — tailer → parser → formatter → dispatcher.
//!
//! Two cooperating tasks: the polling loop reads the log and feeds a
//! bounded queue; the dispatcher drains it serially toward the webhook.
//! The only shared state is that queue and the checkpoint file, which the
//! dispatch side alone writes. A full queue pauses polling (blocking
//! send) instead of growing without bound.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::checkpoint::PositionStore;
use crate::config::RelayConfig;
use crate::dispatcher::{Dispatcher, Envelope, RetryPolicy};
use crate::formatter;
use crate::parser;
use crate::status::{StatusEvent, StatusSink};
use crate::tailer::LogTailer;

/// Run the relay pipeline until `cancel` fires.
///
/// Startup restores the checkpoint (fatal if corrupt); a checkpoint for a
/// different log path or none at all starts from offset 0, or from the
/// current end of file when `skip_backlog` is set. Shutdown stops polling
/// promptly, gives the in-flight delivery a bounded grace period, and
/// leaves the checkpoint reflecting only confirmed deliveries.
///
/// # Errors
///
/// Returns an error for startup failures only: a corrupt checkpoint
/// record or an unusable webhook URL. Everything after startup is
/// retried or skipped, never fatal.
pub async fn run(
    config: &RelayConfig,
    sink: Arc<dyn StatusSink>,
    cancel: CancellationToken,
) -> Result<()> {
    let webhook_url = Url::parse(&config.webhook.url).context("invalid webhook URL")?;

    let store = PositionStore::new(config.checkpoint_path()?);
    let mut tailer = restore_tailer(config, &store)?;

    let policy = RetryPolicy {
        max_attempts: config.delivery.max_attempts,
        base_delay: std::time::Duration::from_millis(config.delivery.backoff_base_ms),
        max_delay: std::time::Duration::from_millis(config.delivery.backoff_max_ms),
    };
    let dispatcher = Dispatcher::new(
        webhook_url,
        config.webhook.request_timeout(),
        policy,
        store,
        tailer.path().to_path_buf(),
        Arc::clone(&sink),
    )?;

    let (tx, rx) = mpsc::channel::<Envelope>(config.delivery.queue_capacity);

    let dispatch_cancel = cancel.clone();
    let dispatch_handle = tokio::spawn(async move {
        dispatcher.run(rx, dispatch_cancel).await;
    });

    info!(
        log_file = %tailer.path().display(),
        offset = tailer.offset(),
        "pipeline started"
    );

    poll_loop(config, &mut tailer, &tx, sink, &cancel).await;

    // Close the queue so the dispatcher stops after its current message,
    // then give the in-flight attempt a bounded grace period.
    drop(tx);
    if tokio::time::timeout(config.delivery.shutdown_grace(), dispatch_handle)
        .await
        .is_err()
    {
        warn!("dispatcher did not stop within the shutdown grace period");
    }

    info!("pipeline stopped");
    Ok(())
}

/// Build the tailer from the persisted checkpoint, if one applies.
fn restore_tailer(config: &RelayConfig, store: &PositionStore) -> Result<LogTailer> {
    let log_path = std::path::PathBuf::from(&config.watch.log_file);

    match store.load().context("failed to restore checkpoint")? {
        Some(checkpoint) if checkpoint.log_path == log_path => {
            info!(
                offset = checkpoint.offset,
                "resuming from persisted checkpoint"
            );
            Ok(LogTailer::resume(
                log_path,
                checkpoint.identity,
                checkpoint.offset,
            ))
        }
        Some(checkpoint) => {
            info!(
                old = %checkpoint.log_path.display(),
                "checkpoint belongs to a different log file, starting fresh"
            );
            fresh_tailer(config, log_path)
        }
        None => fresh_tailer(config, log_path),
    }
}

fn fresh_tailer(config: &RelayConfig, log_path: std::path::PathBuf) -> Result<LogTailer> {
    let mut tailer = LogTailer::new(log_path);
    if config.watch.skip_backlog {
        tailer
            .skip_to_end()
            .context("failed to seek past existing log content")?;
    }
    Ok(tailer)
}

/// Poll the log on a fixed interval, parse and render new lines, and
/// feed the delivery queue until cancelled.
async fn poll_loop(
    config: &RelayConfig,
    tailer: &mut LogTailer,
    tx: &mpsc::Sender<Envelope>,
    sink: Arc<dyn StatusSink>,
    cancel: &CancellationToken,
) {
    let mut interval = tokio::time::interval(config.watch.poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let polled = match tailer.poll() {
            Ok(polled) => polled,
            Err(e) => {
                // Recoverable: report and keep polling.
                warn!(error = %e, "log read failed, will retry next poll");
                continue;
            }
        };

        if polled.rotated {
            sink.emit(StatusEvent::RotationDetected {
                path: tailer.path().to_path_buf(),
            });
        }

        let Some(identity) = polled.identity else {
            continue;
        };

        for line in polled.lines {
            let end_offset = line.end;
            let Some(event) = parser::parse(&line) else {
                sink.emit(StatusEvent::LineSkipped { raw: line.text });
                continue;
            };

            let message = formatter::format(event, &config.webhook.message_template);
            let envelope = Envelope {
                message,
                identity,
                end_offset,
            };

            if !enqueue(tx, envelope, &sink, cancel).await {
                return;
            }
        }
    }
}

/// Hand a message to the dispatcher, pausing (and surfacing that fact)
/// when the queue is full. Returns `false` on cancellation or a closed
/// queue.
async fn enqueue(
    tx: &mpsc::Sender<Envelope>,
    envelope: Envelope,
    sink: &Arc<dyn StatusSink>,
    cancel: &CancellationToken,
) -> bool {
    let envelope = match tx.try_send(envelope) {
        Ok(()) => return true,
        Err(mpsc::error::TrySendError::Full(envelope)) => {
            sink.emit(StatusEvent::QueueSaturated);
            envelope
        }
        Err(mpsc::error::TrySendError::Closed(_)) => return false,
    };

    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = tx.send(envelope) => sent.is_ok(),
    }
}
