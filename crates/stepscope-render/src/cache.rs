//! Bounded LRU cache of rendered artifacts with single-flight rendering.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use stepscope_core::{CacheKey, FlowGraph};
use tokio::sync::watch;
use tracing::debug;

use crate::artifact::RenderedArtifact;
use crate::backend::{describe, RenderBackend};
use crate::error::{RenderError, RenderResult};

/// Default maximum number of cached artifacts.
pub const DEFAULT_CACHE_CAPACITY: usize = 40;

/// Outcome shared with callers awaiting an in-flight render.
type SharedRender = Option<Result<Arc<RenderedArtifact>, String>>;

struct CacheEntry {
    artifact: Arc<RenderedArtifact>,
    last_used: u64,
}

struct Inner {
    entries: HashMap<CacheKey, CacheEntry>,
    pending: HashMap<CacheKey, watch::Receiver<SharedRender>>,
    /// Monotonic touch counter; higher means more recently used.
    tick: u64,
    /// Bumped by `clear()` so renders started before it do not repopulate.
    generation: u64,
}

/// Bounded cache of rendered artifacts keyed by `(kind, subgraph, options)`.
///
/// Strict LRU above capacity: every hit refreshes recency, every insertion
/// over capacity evicts the least-recently-touched entry. At most one render
/// is in flight per key; late callers await the first caller's result over a
/// watch channel instead of invoking the backend again.
pub struct GraphCache {
    backend: Arc<dyn RenderBackend>,
    capacity: usize,
    inner: Mutex<Inner>,
}

impl GraphCache {
    /// Create a cache with the default capacity.
    pub fn new(backend: Arc<dyn RenderBackend>) -> Self {
        Self::with_capacity(backend, DEFAULT_CACHE_CAPACITY)
    }

    /// Create a cache bounded to `capacity` entries (minimum 1).
    pub fn with_capacity(backend: Arc<dyn RenderBackend>, capacity: usize) -> Self {
        Self {
            backend,
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                pending: HashMap::new(),
                tick: 0,
                generation: 0,
            }),
        }
    }

    /// Return the cached artifact for `key`, rendering it on a miss.
    pub async fn ensure_render(
        &self,
        graph: &FlowGraph,
        key: &CacheKey,
    ) -> RenderResult<Arc<RenderedArtifact>> {
        let wait_or_render = {
            let mut inner = self.inner.lock().expect("cache lock poisoned");

            if let Some(entry) = inner.entries.get(key) {
                let artifact = entry.artifact.clone();
                inner.tick += 1;
                let tick = inner.tick;
                inner
                    .entries
                    .get_mut(key)
                    .expect("entry vanished under lock")
                    .last_used = tick;
                return Ok(artifact);
            }

            if let Some(rx) = inner.pending.get(key).cloned() {
                Err(rx)
            } else {
                let (tx, rx) = watch::channel(None);
                inner.pending.insert(key.clone(), rx);
                Ok((tx, inner.generation))
            }
        };

        let (tx, generation) = match wait_or_render {
            Err(mut rx) => loop {
                let shared = rx.borrow_and_update().clone();
                if let Some(result) = shared {
                    return result.map_err(|message| RenderError::SharedRenderFailed { message });
                }
                if rx.changed().await.is_err() {
                    return Err(RenderError::SharedRenderFailed {
                        message: "rendering caller went away".into(),
                    });
                }
            },
            Ok(pair) => pair,
        };

        let result = match describe(graph, key) {
            Ok(description) => self.backend.render(&description, key).await,
            Err(err) => Err(err),
        };

        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.pending.remove(key);

        match result {
            Ok(artifact) => {
                let artifact = Arc::new(artifact);
                if inner.generation == generation {
                    inner.tick += 1;
                    let tick = inner.tick;
                    inner.entries.insert(
                        key.clone(),
                        CacheEntry {
                            artifact: artifact.clone(),
                            last_used: tick,
                        },
                    );
                    evict_over_capacity(&mut inner, self.capacity);
                } else {
                    debug!(?key, "discarding render finished after clear()");
                }
                let _ = tx.send(Some(Ok(artifact.clone())));
                Ok(artifact)
            }
            Err(err) => {
                let _ = tx.send(Some(Err(err.to_string())));
                Err(err)
            }
        }
    }

    /// Drop every cached artifact. In-flight renders finish for their
    /// waiters but do not repopulate the cache.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.entries.clear();
        inner.generation += 1;
    }

    /// Number of artifacts currently cached.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").entries.len()
    }

    /// Whether the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is cached. Does not touch recency.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner
            .lock()
            .expect("cache lock poisoned")
            .entries
            .contains_key(key)
    }
}

fn evict_over_capacity(inner: &mut Inner, capacity: usize) {
    while inner.entries.len() > capacity {
        let Some(oldest) = inner
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone())
        else {
            break;
        };
        debug!(key = ?oldest, "evicting least-recently-used artifact");
        inner.entries.remove(&oldest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StaticBackend;
    use std::time::Duration;
    use stepscope_core::{FlowEdge, FlowNode, RenderKind, RenderOptions};

    fn graph() -> FlowGraph {
        FlowGraph {
            nodes: vec![
                FlowNode {
                    id: "a".into(),
                    label: "A".into(),
                    subgraph: None,
                },
                FlowNode {
                    id: "b".into(),
                    label: "B".into(),
                    subgraph: None,
                },
            ],
            edges: vec![FlowEdge {
                from: "a".into(),
                to: "b".into(),
                label: None,
            }],
        }
    }

    fn key_with(show_labels: bool, hide_end: bool) -> CacheKey {
        CacheKey::new(RenderKind::Process).with_options(RenderOptions {
            hide_start: false,
            hide_end,
            show_labels,
        })
    }

    #[tokio::test]
    async fn test_hit_skips_backend() {
        let backend = Arc::new(StaticBackend::new());
        let cache = GraphCache::new(backend.clone());
        let key = CacheKey::new(RenderKind::Process);

        let first = cache.ensure_render(&graph(), &key).await.unwrap();
        let second = cache.ensure_render(&graph(), &key).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(backend.render_calls(), 1);
    }

    #[tokio::test]
    async fn test_lru_eviction_respects_recency() {
        let backend = Arc::new(StaticBackend::new());
        let cache = GraphCache::with_capacity(backend, 2);
        let graph = graph();

        let k1 = key_with(true, false);
        let k2 = key_with(false, false);
        let k3 = key_with(true, true);

        cache.ensure_render(&graph, &k1).await.unwrap();
        cache.ensure_render(&graph, &k2).await.unwrap();
        // Hit refreshes K1 as most recently used.
        cache.ensure_render(&graph, &k1).await.unwrap();
        cache.ensure_render(&graph, &k3).await.unwrap();

        assert!(cache.contains(&k1));
        assert!(!cache.contains(&k2));
        assert!(cache.contains(&k3));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_single_flight_for_same_key() {
        let backend = Arc::new(StaticBackend::new().with_delay(Duration::from_millis(20)));
        let cache = GraphCache::new(backend.clone());
        let graph = graph();
        let key = CacheKey::new(RenderKind::Process);

        let (a, b) = tokio::join!(
            cache.ensure_render(&graph, &key),
            cache.ensure_render(&graph, &key)
        );

        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(backend.render_calls(), 1);
    }

    #[tokio::test]
    async fn test_clear_empties_unconditionally() {
        let backend = Arc::new(StaticBackend::new());
        let cache = GraphCache::new(backend);
        let graph = graph();

        cache
            .ensure_render(&graph, &CacheKey::new(RenderKind::Process))
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_render_failure_is_not_cached() {
        let backend = Arc::new(StaticBackend::new());
        let cache = GraphCache::new(backend);
        let key = CacheKey::subgraph(RenderKind::Subgraph, "missing");

        assert!(cache.ensure_render(&graph(), &key).await.is_err());
        assert!(cache.is_empty());
    }
}
