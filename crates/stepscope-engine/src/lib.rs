//! The Stepscope engine: one task that owns the session.
//!
//! `Engine` is the mode controller and the only place that mutates session
//! state. It owns exactly one active event source at a time (live stream or
//! replay sequencer), pumps source events through the trail highlighter,
//! and drives the render scheduler. Everything the surrounding UI needs is
//! exposed through `EngineHandle`: a command sender, a session-state watch,
//! and an execution-event broadcast for side panels.

mod command;
mod engine;
mod styles;

pub use command::Command;
pub use engine::{Engine, EngineConfig, EngineHandle};
pub use styles::SharedStyles;
