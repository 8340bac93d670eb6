//! Multi-phase animation for single-step trail transitions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use crate::highlight::{HighlightOp, HighlightSink, HEAD_INTENSITY, MID_INTENSITY};

/// Shortest allowed phase pause.
pub const MIN_PHASE_PAUSE: Duration = Duration::from_millis(30);
/// Longest allowed phase pause.
pub const MAX_PHASE_PAUSE: Duration = Duration::from_millis(250);
/// Default phase pause when no replay speed has been configured.
pub const DEFAULT_PHASE_PAUSE: Duration = Duration::from_millis(120);

/// Everything a single-step transition needs to restyle, precomputed by the
/// highlighter so the animator itself never resolves anything.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPlan {
    /// Element id of the new head node.
    pub new_node: String,
    /// Connector from the previous head into the new head, if resolvable.
    pub connecting_edge: Option<String>,
    /// Element id of the previous head node, if resolvable.
    pub prev_node: Option<String>,
    /// Connector feeding into the previous head, if resolvable.
    pub prev_incoming_edge: Option<String>,
    /// Every connector between consecutive trail entries.
    pub trail_edges: Vec<String>,
    /// Node evicted off the tail by this advance, if any.
    pub evicted_node: Option<String>,
    /// Connector leading out of the evicted node, if any.
    pub evicted_edge: Option<String>,
}

/// Plays the six-phase step transition against a highlight sink.
///
/// Only one transition may run at a time; a transition requested while one
/// is in progress is dropped rather than queued, so overlapping animations
/// can never fight over the same elements.
#[derive(Debug, Clone)]
pub struct StepAnimator {
    pause: Duration,
    active: Arc<AtomicBool>,
}

impl Default for StepAnimator {
    fn default() -> Self {
        Self {
            pause: DEFAULT_PHASE_PAUSE,
            active: Arc::new(AtomicBool::new(false)),
        }
    }
}

struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl StepAnimator {
    /// Animator with the default pause.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the phase pause from the configured replay step interval so
    /// the whole transition fits comfortably inside one step.
    pub fn set_replay_interval(&mut self, interval: Duration) {
        self.pause = (interval / 6).clamp(MIN_PHASE_PAUSE, MAX_PHASE_PAUSE);
    }

    /// Current pause between phases.
    pub fn phase_pause(&self) -> Duration {
        self.pause
    }

    /// Whether a transition is running right now.
    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Play the transition. Returns `false` without touching the sink when
    /// another transition is already in progress.
    pub async fn run<S: HighlightSink>(&self, sink: &mut S, plan: TransitionPlan) -> bool {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            trace!("transition already running, dropping request");
            return false;
        }
        let _guard = ActiveGuard(self.active.clone());

        // Phase 1: light the connecting edge at head intensity.
        if let Some(edge) = &plan.connecting_edge {
            sink.apply(&[HighlightOp::new(edge.clone(), HEAD_INTENSITY)]);
            self.pause().await;
        }

        // Phase 2: light the new head node.
        sink.apply(&[HighlightOp::new(plan.new_node.clone(), HEAD_INTENSITY)]);
        self.pause().await;

        // Phase 3: demote the previous head node.
        if let Some(node) = &plan.prev_node {
            sink.apply(&[HighlightOp::new(node.clone(), MID_INTENSITY)]);
            self.pause().await;
        }

        // Phase 4: demote the edge that fed into the previous head.
        if let Some(edge) = &plan.prev_incoming_edge {
            sink.apply(&[HighlightOp::new(edge.clone(), MID_INTENSITY)]);
            self.pause().await;
        }

        // Phase 5: re-affirm every trail edge at mid, then restore the
        // newest edge to head intensity.
        if !plan.trail_edges.is_empty() {
            let ops: Vec<HighlightOp> = plan
                .trail_edges
                .iter()
                .map(|edge| HighlightOp::new(edge.clone(), MID_INTENSITY))
                .collect();
            sink.apply(&ops);
            if let Some(edge) = &plan.connecting_edge {
                sink.apply(&[HighlightOp::new(edge.clone(), HEAD_INTENSITY)]);
            }
            self.pause().await;
        }

        // Phase 6: clear whatever fell off the tail.
        let mut cleared = Vec::new();
        if let Some(node) = &plan.evicted_node {
            cleared.push(node.clone());
        }
        if let Some(edge) = &plan.evicted_edge {
            cleared.push(edge.clone());
        }
        if !cleared.is_empty() {
            sink.clear(&cleared);
        }

        true
    }

    async fn pause(&self) {
        tokio::time::sleep(self.pause).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct RecordingSink {
        applied: Vec<HighlightOp>,
        cleared: Vec<String>,
    }

    impl HighlightSink for RecordingSink {
        fn apply(&mut self, ops: &[HighlightOp]) {
            self.applied.extend_from_slice(ops);
        }

        fn clear(&mut self, element_ids: &[String]) {
            self.cleared.extend_from_slice(element_ids);
        }
    }

    fn plan() -> TransitionPlan {
        TransitionPlan {
            new_node: "c".into(),
            connecting_edge: Some("link-1".into()),
            prev_node: Some("b".into()),
            prev_incoming_edge: Some("link-0".into()),
            trail_edges: vec!["link-0".into(), "link-1".into()],
            evicted_node: Some("a".into()),
            evicted_edge: Some("link-a".into()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_phases_run_in_order() {
        let animator = StepAnimator::new();
        let mut sink = RecordingSink::default();

        assert!(animator.run(&mut sink, plan()).await);

        let sequence: Vec<(String, f32)> = sink
            .applied
            .iter()
            .map(|op| (op.element_id.clone(), op.intensity))
            .collect();
        assert_eq!(
            sequence,
            vec![
                ("link-1".to_string(), HEAD_INTENSITY), // phase 1
                ("c".to_string(), HEAD_INTENSITY),      // phase 2
                ("b".to_string(), MID_INTENSITY),       // phase 3
                ("link-0".to_string(), MID_INTENSITY),  // phase 4
                ("link-0".to_string(), MID_INTENSITY),  // phase 5: re-affirm
                ("link-1".to_string(), MID_INTENSITY),
                ("link-1".to_string(), HEAD_INTENSITY), // newest edge restored
            ]
        );
        assert_eq!(sink.cleared, ["a", "link-a"]); // phase 6
        assert!(!animator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_minimal_plan_skips_optional_phases() {
        let animator = StepAnimator::new();
        let mut sink = RecordingSink::default();

        let minimal = TransitionPlan {
            new_node: "a".into(),
            connecting_edge: None,
            prev_node: None,
            prev_incoming_edge: None,
            trail_edges: Vec::new(),
            evicted_node: None,
            evicted_edge: None,
        };
        assert!(animator.run(&mut sink, minimal).await);
        assert_eq!(sink.applied.len(), 1);
        assert!(sink.cleared.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_transition_is_dropped() {
        let animator = StepAnimator::new();

        let first = {
            let animator = animator.clone();
            tokio::spawn(async move {
                let mut sink = RecordingSink::default();
                animator.run(&mut sink, plan()).await
            })
        };
        // Let the first transition take the guard and park on its pause.
        tokio::task::yield_now().await;

        let mut sink = RecordingSink::default();
        assert!(!animator.run(&mut sink, plan()).await);
        assert!(sink.applied.is_empty());

        assert!(first.await.unwrap());
    }

    #[test]
    fn test_pause_derived_from_replay_interval() {
        let mut animator = StepAnimator::new();

        animator.set_replay_interval(Duration::from_millis(600));
        assert_eq!(animator.phase_pause(), Duration::from_millis(100));

        animator.set_replay_interval(Duration::from_millis(10));
        assert_eq!(animator.phase_pause(), MIN_PHASE_PAUSE);

        animator.set_replay_interval(Duration::from_secs(10));
        assert_eq!(animator.phase_pause(), MAX_PHASE_PAUSE);
    }
}
