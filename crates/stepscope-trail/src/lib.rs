//! Trail state and highlight computation for Stepscope.
//!
//! The trail is the bounded, head-first history of recently executed nodes.
//! `TrailHighlighter` turns trail changes into batches of restyle operations
//! against the current artifact, and `StepAnimator` plays the multi-phase
//! transition when the head advances by one step.

mod animation;
mod highlight;
mod trail;

pub use animation::{StepAnimator, TransitionPlan};
pub use highlight::{
    intensity_at, Advance, HighlightBatch, HighlightOp, HighlightSink, TrailHighlighter,
    HEAD_INTENSITY, MID_INTENSITY,
};
pub use trail::{Trail, TrailAdvance, DEFAULT_TRAIL_LEN, MAX_TRAIL_LEN, MIN_TRAIL_LEN};
