//! The stream multiplexer: one ordered channel out of push + poll delivery.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use stepscope_core::WorkerRef;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::{EventTransport, PushStream};
use crate::types::{EventFrame, LiveSource, PollBatch, SourceMessage, TerminalReason};

/// Safety-net / fallback poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Fixed delay before retrying a failed poll. Deliberately not exponential:
/// the source is expected to come back, and the operator is watching.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(3);
/// Maximum events requested per poll.
pub const DEFAULT_BATCH_LIMIT: usize = 200;

/// Handle to one running live source.
///
/// Dropping the receiver or cancelling stops delivery; after `stop()` the
/// task winds down and no further message reaches the channel.
pub struct SourceHandle {
    /// Ordered stream of source messages, ending with at most one
    /// `Terminal`.
    pub events: mpsc::UnboundedReceiver<SourceMessage>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SourceHandle {
    /// Stop the source. Idempotent; safe to call any number of times.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop and wait for the source task to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

/// Normalizes one live event source into a single ordered callback stream.
///
/// Push-first: while the WebSocket channel is open every decoded frame is
/// forwarded, and a bounded-interval poll runs alongside as a safety net so
/// a silently degraded push channel still reaches terminal detection. If
/// push fails or closes, delivery transparently falls back to pure polling
/// with a `from_row_id` resume cursor. Row-id dedup guarantees no event is
/// delivered twice across the overlap or across stale poll responses.
pub struct StreamMultiplexer {
    transport: Arc<dyn EventTransport>,
    poll_interval: Duration,
    retry_backoff: Duration,
    batch_limit: usize,
}

impl StreamMultiplexer {
    /// Multiplexer over a transport with default timings.
    pub fn new(transport: Arc<dyn EventTransport>) -> Self {
        Self {
            transport,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            batch_limit: DEFAULT_BATCH_LIMIT,
        }
    }

    /// Override the safety-net / fallback poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the fixed retry backoff.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Override the poll batch limit.
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.max(1);
        self
    }

    /// Begin delivering events for a worker from the given live source.
    pub fn start(&self, worker: WorkerRef, source: LiveSource) -> SourceHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_source(
            self.transport.clone(),
            worker,
            source,
            SourceConfig {
                poll_interval: self.poll_interval,
                retry_backoff: self.retry_backoff,
                batch_limit: self.batch_limit,
            },
            tx,
            cancel.clone(),
        ));

        SourceHandle {
            events: rx,
            cancel,
            task,
        }
    }
}

#[derive(Clone, Copy)]
struct SourceConfig {
    poll_interval: Duration,
    retry_backoff: Duration,
    batch_limit: usize,
}

/// The consumer dropped the channel; delivery is pointless.
struct ConsumerGone;

/// Tracks the resume cursor and forwards deduplicated events.
struct Delivery {
    tx: mpsc::UnboundedSender<SourceMessage>,
    /// Highest row id delivered so far; doubles as the resume cursor.
    last_row: u64,
}

impl Delivery {
    /// Forward one frame unless its row was already delivered. Returns the
    /// terminal reason when the event carried a terminal phase.
    fn deliver(&mut self, frame: EventFrame) -> Result<Option<TerminalReason>, ConsumerGone> {
        if frame.row_id <= self.last_row {
            debug!(row_id = frame.row_id, "dropping already-delivered row");
            return Ok(None);
        }
        self.last_row = frame.row_id;

        let reason = frame
            .event
            .run_phase
            .as_deref()
            .and_then(TerminalReason::from_phase);
        self.tx
            .send(SourceMessage::Event(frame.event))
            .map_err(|_| ConsumerGone)?;
        Ok(reason)
    }

    /// Forward a whole poll batch, then advance the cursor to the response's.
    fn deliver_batch(&mut self, batch: PollBatch) -> Result<Option<TerminalReason>, ConsumerGone> {
        let mut terminal = None;
        for frame in batch.events {
            if let Some(reason) = self.deliver(frame)? {
                terminal.get_or_insert(reason);
            }
        }
        self.last_row = self.last_row.max(batch.resume_cursor);

        if terminal.is_none() {
            terminal = batch
                .run_phase
                .as_deref()
                .and_then(TerminalReason::from_phase);
        }
        Ok(terminal)
    }

    /// Emit the terminal message. Called exactly once, right before the
    /// source task returns.
    fn finish(&self, reason: TerminalReason) {
        info!(reason = reason.label(), "source reached terminal condition");
        let _ = self.tx.send(SourceMessage::Terminal(reason));
    }
}

enum PushOutcome {
    Terminal(TerminalReason),
    Degraded,
    Cancelled,
    ConsumerGone,
}

async fn run_source(
    transport: Arc<dyn EventTransport>,
    worker: WorkerRef,
    source: LiveSource,
    config: SourceConfig,
    tx: mpsc::UnboundedSender<SourceMessage>,
    cancel: CancellationToken,
) {
    let mut delivery = Delivery { tx, last_row: 0 };

    match transport.open_push(&worker, source).await {
        Ok(push) => {
            info!(worker = %worker, source = ?source, "push channel open");
            match run_push(push, &*transport, &worker, source, config, &mut delivery, &cancel)
                .await
            {
                PushOutcome::Terminal(reason) => {
                    delivery.finish(reason);
                    return;
                }
                PushOutcome::Cancelled | PushOutcome::ConsumerGone => return,
                PushOutcome::Degraded => {
                    warn!(worker = %worker, "push channel degraded, falling back to polling");
                }
            }
        }
        Err(err) => {
            debug!(worker = %worker, error = %err, "push unavailable, polling instead");
        }
    }

    run_poll(&*transport, &worker, source, config, &mut delivery, &cancel).await;
}

async fn run_push(
    mut push: PushStream,
    transport: &dyn EventTransport,
    worker: &WorkerRef,
    source: LiveSource,
    config: SourceConfig,
    delivery: &mut Delivery,
    cancel: &CancellationToken,
) -> PushOutcome {
    let mut safety_net = tokio::time::interval(config.poll_interval);
    safety_net.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return PushOutcome::Cancelled,

            frame = push.next() => match frame {
                Some(Ok(frame)) => match delivery.deliver(frame) {
                    Ok(Some(reason)) => return PushOutcome::Terminal(reason),
                    Ok(None) => {}
                    Err(ConsumerGone) => return PushOutcome::ConsumerGone,
                },
                Some(Err(err)) => {
                    warn!(error = %err, "push channel error");
                    return PushOutcome::Degraded;
                }
                None => {
                    debug!("push channel closed");
                    return PushOutcome::Degraded;
                }
            },

            // Safety net: even a silently stuck push channel reaches
            // terminal detection through the bounded-interval poll.
            _ = safety_net.tick() => {
                match transport
                    .poll(worker, source, delivery.last_row, config.batch_limit)
                    .await
                {
                    Ok(batch) => match delivery.deliver_batch(batch) {
                        Ok(Some(reason)) => return PushOutcome::Terminal(reason),
                        Ok(None) => {}
                        Err(ConsumerGone) => return PushOutcome::ConsumerGone,
                    },
                    // Push is the primary path; a failed safety-net poll is
                    // not worth a retry dance.
                    Err(err) => debug!(error = %err, "safety-net poll failed"),
                }
            }
        }
    }
}

async fn run_poll(
    transport: &dyn EventTransport,
    worker: &WorkerRef,
    source: LiveSource,
    config: SourceConfig,
    delivery: &mut Delivery,
    cancel: &CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        let wait = match transport
            .poll(worker, source, delivery.last_row, config.batch_limit)
            .await
        {
            Ok(batch) => match delivery.deliver_batch(batch) {
                Ok(Some(reason)) => {
                    delivery.finish(reason);
                    return;
                }
                Ok(None) => config.poll_interval,
                Err(ConsumerGone) => return,
            },
            Err(err) => {
                warn!(error = %err, "poll failed, retrying after fixed backoff");
                config.retry_backoff
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }
    }
}
