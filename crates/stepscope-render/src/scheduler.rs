//! Serializes renders at a bounded cadence, coalescing bursts.
//!
//! The scheduler owns a single worker task. While a render is in flight only
//! the newest request is retained; it runs immediately after the in-flight
//! render completes. A request whose fingerprint (description + current node
//! + trail) matches the last applied render skips the backend entirely and
//! surfaces as a highlight-only outcome.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stepscope_core::{CacheKey, FlowGraph};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::artifact::RenderedArtifact;
use crate::backend::describe;
use crate::cache::GraphCache;

/// Default floor between two render starts.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(1);

/// One requested visual update.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    /// Flow to describe and render.
    pub graph: Arc<FlowGraph>,
    /// Which artifact to produce.
    pub key: CacheKey,
    /// Node at the trail head, part of the change fingerprint.
    pub current_node: Option<String>,
    /// Trail contents, part of the change fingerprint.
    pub trail: Vec<String>,
    /// Bypass the unchanged-fingerprint skip (operator force refresh).
    pub force: bool,
}

/// What became of a scheduled request.
#[derive(Debug)]
pub enum RenderOutcome {
    /// A full render was applied.
    Rendered {
        key: CacheKey,
        artifact: Arc<RenderedArtifact>,
    },
    /// Nothing changed; only the lightweight highlight path should run.
    HighlightOnly { key: CacheKey },
    /// The render failed; surfaced in place of the artifact.
    Failed { key: CacheKey, message: String },
}

/// Handle to the render worker task.
pub struct RenderScheduler {
    pending: Arc<Mutex<Option<RenderRequest>>>,
    notify: Arc<Notify>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RenderScheduler {
    /// Spawn the worker with the default cadence floor.
    pub fn spawn(cache: Arc<GraphCache>) -> (Self, mpsc::UnboundedReceiver<RenderOutcome>) {
        Self::spawn_with_interval(cache, DEFAULT_MIN_INTERVAL)
    }

    /// Spawn the worker with an explicit cadence floor.
    pub fn spawn_with_interval(
        cache: Arc<GraphCache>,
        min_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<RenderOutcome>) {
        let pending = Arc::new(Mutex::new(None));
        let notify = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(worker(
            cache,
            min_interval,
            pending.clone(),
            notify.clone(),
            cancel.clone(),
            outcomes_tx,
        ));

        (
            Self {
                pending,
                notify,
                cancel,
                task,
            },
            outcomes_rx,
        )
    }

    /// Request a visual update. Replaces any not-yet-processed request.
    pub fn schedule(&self, request: RenderRequest) {
        let mut pending = self.pending.lock().expect("scheduler lock poisoned");
        if pending.replace(request).is_some() {
            debug!("coalescing render burst into newest request");
        }
        drop(pending);
        self.notify.notify_one();
    }

    /// Stop the worker. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for the worker task to finish after `shutdown()`.
    pub async fn join(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

fn take_pending(pending: &Mutex<Option<RenderRequest>>) -> Option<RenderRequest> {
    pending.lock().expect("scheduler lock poisoned").take()
}

fn fingerprint(description: &str, request: &RenderRequest) -> u64 {
    let mut hasher = DefaultHasher::new();
    description.hash(&mut hasher);
    request.current_node.hash(&mut hasher);
    request.trail.hash(&mut hasher);
    hasher.finish()
}

async fn worker(
    cache: Arc<GraphCache>,
    min_interval: Duration,
    pending: Arc<Mutex<Option<RenderRequest>>>,
    notify: Arc<Notify>,
    cancel: CancellationToken,
    outcomes: mpsc::UnboundedSender<RenderOutcome>,
) {
    let mut last_fingerprint: Option<u64> = None;
    let mut last_render_at: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = notify.notified() => {}
        }

        'drain: while let Some(mut request) = take_pending(&pending) {
            loop {
                let description = match describe(&request.graph, &request.key) {
                    Ok(description) => description,
                    Err(err) => {
                        let _ = outcomes.send(RenderOutcome::Failed {
                            key: request.key.clone(),
                            message: err.to_string(),
                        });
                        continue 'drain;
                    }
                };

                let print = fingerprint(&description, &request);
                if !request.force && last_fingerprint == Some(print) {
                    let _ = outcomes.send(RenderOutcome::HighlightOnly {
                        key: request.key.clone(),
                    });
                    continue 'drain;
                }

                // Cadence ceiling: do not start a render until the floor has
                // elapsed since the previous start; a newer request arriving
                // during the wait supersedes this one.
                if let Some(at) = last_render_at {
                    let elapsed = at.elapsed();
                    if elapsed < min_interval {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(min_interval - elapsed) => {}
                        }
                        if let Some(newer) = take_pending(&pending) {
                            request = newer;
                            continue;
                        }
                    }
                }

                last_render_at = Some(Instant::now());
                match cache.ensure_render(&request.graph, &request.key).await {
                    Ok(artifact) => {
                        last_fingerprint = Some(print);
                        let _ = outcomes.send(RenderOutcome::Rendered {
                            key: request.key.clone(),
                            artifact,
                        });
                    }
                    Err(err) => {
                        let _ = outcomes.send(RenderOutcome::Failed {
                            key: request.key.clone(),
                            message: err.to_string(),
                        });
                    }
                }
                continue 'drain;
            }
        }
    }
}
