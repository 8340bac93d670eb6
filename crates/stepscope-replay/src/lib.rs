//! Replay of recorded runs: cursor navigation and timed auto-advance.
//!
//! The sequencer loads a finite, immutable step list for one run and walks
//! a cursor over it. Every cursor move synchronously emits the step's
//! `ExecutionEvent` on the same `SourceMessage` channel shape the live
//! sources use, so the rest of the pipeline cannot tell replayed history
//! from live delivery.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use stepscope_core::{ReplayState, ReplayStep, WorkerRef};
use stepscope_stream::{HistoryProvider, SourceMessage, StreamError, MAX_REPLAY_STEPS};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Floor on the auto-advance interval so a near-zero request cannot flood
/// the render pipeline.
pub const MIN_STEP_INTERVAL: Duration = Duration::from_millis(80);
/// Default auto-advance interval.
pub const DEFAULT_STEP_INTERVAL: Duration = Duration::from_millis(600);

/// Result type for replay operations.
pub type ReplayResult<T> = Result<T, ReplayError>;

/// Errors that can occur while driving a replay.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The history provider could not deliver the run's steps.
    #[error("failed to load run {run_id}: {source}")]
    LoadFailed {
        run_id: String,
        #[source]
        source: StreamError,
    },
}

struct Inner {
    run_id: Option<String>,
    steps: Vec<ReplayStep>,
    /// -1 means "before the first step".
    cursor: i64,
    playing: bool,
    play_cancel: Option<CancellationToken>,
}

/// Cursor-driven sequencer over one recorded run.
#[derive(Clone)]
pub struct ReplaySequencer {
    history: Arc<dyn HistoryProvider>,
    worker: WorkerRef,
    events_tx: mpsc::UnboundedSender<SourceMessage>,
    inner: Arc<Mutex<Inner>>,
}

impl ReplaySequencer {
    /// Create a sequencer; the receiver side carries every emitted event.
    pub fn new(
        history: Arc<dyn HistoryProvider>,
        worker: WorkerRef,
    ) -> (Self, mpsc::UnboundedReceiver<SourceMessage>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                history,
                worker,
                events_tx,
                inner: Arc::new(Mutex::new(Inner {
                    run_id: None,
                    steps: Vec::new(),
                    cursor: -1,
                    playing: false,
                    play_cancel: None,
                })),
            },
            events_rx,
        )
    }

    /// Load the full step list for a run and reset the cursor to before the
    /// first step. Replaces any previously selected run wholesale.
    pub async fn set_run(&self, run_id: &str) -> ReplayResult<usize> {
        self.pause();

        let steps = self
            .history
            .list_steps(&self.worker, run_id, MAX_REPLAY_STEPS)
            .await
            .map_err(|source| ReplayError::LoadFailed {
                run_id: run_id.to_string(),
                source,
            })?;

        let mut inner = self.lock();
        info!(run_id, steps = steps.len(), "run loaded for replay");
        inner.run_id = Some(run_id.to_string());
        inner.steps = steps;
        inner.cursor = -1;
        Ok(inner.steps.len())
    }

    /// Advance the cursor by one and emit that step. A no-op at the last
    /// step, but still stops auto-play.
    pub fn next(&self) -> bool {
        let mut inner = self.lock();
        let moved = next_locked(&mut inner, &self.events_tx);
        if !moved {
            stop_play_locked(&mut inner);
        }
        moved
    }

    /// Move the cursor back by one and emit that step. A no-op at index 0
    /// (and before the first step).
    pub fn prev(&self) -> bool {
        let mut inner = self.lock();
        if inner.cursor <= 0 {
            return false;
        }
        inner.cursor -= 1;
        emit_current(&inner, &self.events_tx);
        true
    }

    /// Jump the cursor to `index`, clamped to `[0, total - 1]`, and emit.
    pub fn seek(&self, index: usize) -> bool {
        let mut inner = self.lock();
        if inner.steps.is_empty() {
            return false;
        }
        inner.cursor = (index as i64).min(inner.steps.len() as i64 - 1);
        emit_current(&inner, &self.events_tx);
        true
    }

    /// Auto-advance on a repeating timer. The interval is floored at
    /// `MIN_STEP_INTERVAL`; auto-play stops itself at the last step.
    pub fn play(&self, interval: Duration) {
        let mut inner = self.lock();
        if inner.playing || inner.steps.is_empty() {
            return;
        }

        let interval = interval.max(MIN_STEP_INTERVAL);
        let cancel = CancellationToken::new();
        inner.playing = true;
        inner.play_cancel = Some(cancel.clone());

        let shared = self.inner.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }

                let mut inner = shared.lock().expect("replay lock poisoned");
                if !inner.playing {
                    return;
                }
                if !next_locked(&mut inner, &tx) {
                    debug!("auto-play reached the last step");
                    stop_play_locked(&mut inner);
                    return;
                }
            }
        });
    }

    /// Cancel the auto-advance timer, leaving the cursor where it is.
    pub fn pause(&self) {
        stop_play_locked(&mut self.lock());
    }

    /// Cancel the timer and reset the cursor to before the first step.
    pub fn stop(&self) {
        let mut inner = self.lock();
        stop_play_locked(&mut inner);
        inner.cursor = -1;
    }

    /// Current cursor readout.
    pub fn state(&self) -> ReplayState {
        let inner = self.lock();
        ReplayState {
            run_id: inner.run_id.clone(),
            index: inner.cursor,
            total: inner.steps.len(),
            playing: inner.playing,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("replay lock poisoned")
    }
}

fn next_locked(inner: &mut Inner, tx: &mpsc::UnboundedSender<SourceMessage>) -> bool {
    let len = inner.steps.len() as i64;
    if len == 0 || inner.cursor >= len - 1 {
        return false;
    }
    inner.cursor += 1;
    emit_current(inner, tx);
    true
}

fn emit_current(inner: &Inner, tx: &mpsc::UnboundedSender<SourceMessage>) {
    if let Some(step) = usize::try_from(inner.cursor)
        .ok()
        .and_then(|i| inner.steps.get(i))
    {
        let _ = tx.send(SourceMessage::Event(step.to_event()));
    }
}

fn stop_play_locked(inner: &mut Inner) {
    if let Some(cancel) = inner.play_cancel.take() {
        cancel.cancel();
    }
    inner.playing = false;
}
