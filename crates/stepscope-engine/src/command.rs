//! The user-facing command surface.

use std::time::Duration;

use stepscope_core::Mode;

/// Commands the surrounding UI may issue against the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Switch the viewing mode. A no-op when the mode is already active.
    SetMode(Mode),
    /// Select the run to replay. Only meaningful in `Mode::Replay`.
    SelectRun(String),
    /// Start replay auto-advance at the configured speed.
    Play,
    /// Pause replay auto-advance, keeping the cursor.
    Pause,
    /// Step the replay cursor forward.
    Next,
    /// Step the replay cursor back.
    Prev,
    /// Jump the replay cursor to an index (clamped).
    Seek(usize),
    /// Reconfigure the trail length (clamped to 1..=10).
    SetTrailLength(usize),
    /// Reconfigure the replay auto-advance interval.
    SetReplaySpeed(Duration),
    /// Drop every cached artifact and re-render the current view.
    ForceRefresh,
    /// Tear everything down and end the engine task.
    Shutdown,
}
