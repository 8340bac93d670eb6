//! Shared highlight-level state for the current artifact.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use stepscope_trail::{HighlightBatch, HighlightOp, HighlightSink};

/// Highlight intensity per artifact element, shared between the engine and
/// any running animation task. This is the styling a UI layer reads to
/// paint the artifact.
#[derive(Debug, Clone, Default)]
pub struct SharedStyles {
    levels: Arc<Mutex<HashMap<String, f32>>>,
}

impl SharedStyles {
    /// Empty styling.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current intensity of an element, if highlighted.
    pub fn level(&self, element_id: &str) -> Option<f32> {
        self.lock().get(element_id).copied()
    }

    /// Snapshot of every highlighted element.
    pub fn snapshot(&self) -> HashMap<String, f32> {
        self.lock().clone()
    }

    /// Number of highlighted elements.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is highlighted.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Apply a whole computed batch: restyles plus clears.
    pub fn apply_batch(&self, batch: &HighlightBatch) {
        let mut levels = self.lock();
        for op in &batch.ops {
            levels.insert(op.element_id.clone(), op.intensity);
        }
        for element_id in &batch.cleared {
            levels.remove(element_id);
        }
    }

    /// Remove every highlight (mode switch, new artifact).
    pub fn reset(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, f32>> {
        self.levels.lock().expect("styles lock poisoned")
    }
}

impl HighlightSink for SharedStyles {
    fn apply(&mut self, ops: &[HighlightOp]) {
        let mut levels = self.lock();
        for op in ops {
            levels.insert(op.element_id.clone(), op.intensity);
        }
    }

    fn clear(&mut self, element_ids: &[String]) {
        let mut levels = self.lock();
        for element_id in element_ids {
            levels.remove(element_id);
        }
    }
}
