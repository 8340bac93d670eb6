//! Wire and channel types for live event sources.

use serde::{Deserialize, Serialize};
use stepscope_core::{is_terminal_phase, ExecutionEvent};

/// Which of the two live sources a stream draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveSource {
    /// Passive observation of a running worker.
    Observe,
    /// Step-debugging stream.
    Debug,
}

impl LiveSource {
    /// URL path segment for this source.
    pub fn path_segment(&self) -> &'static str {
        match self {
            LiveSource::Observe => "observe",
            LiveSource::Debug => "debug",
        }
    }
}

/// Envelope around one event on the wire. `row_id` is the monotonically
/// increasing unit the resume cursor counts in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    /// Monotonically increasing row identifier.
    pub row_id: u64,
    /// The decoded event.
    pub event: ExecutionEvent,
}

/// One bounded batch of polled events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollBatch {
    /// Events in row order.
    #[serde(default)]
    pub events: Vec<EventFrame>,
    /// Cursor to resume from; pass back as `from_row_id` on the next poll.
    pub resume_cursor: u64,
    /// Run-level phase reported with the batch, used for terminal detection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_phase: Option<String>,
}

/// Why a source terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// The run finished successfully.
    Completed,
    /// The run failed.
    Failed,
    /// The run was canceled.
    Canceled,
    /// Generic terminal marker.
    Terminal,
}

impl TerminalReason {
    /// Map a run phase onto a terminal reason, if it is one.
    pub fn from_phase(phase: &str) -> Option<Self> {
        if !is_terminal_phase(phase) {
            return None;
        }
        Some(match phase {
            "completed" => TerminalReason::Completed,
            "failed" => TerminalReason::Failed,
            "canceled" => TerminalReason::Canceled,
            _ => TerminalReason::Terminal,
        })
    }

    /// Display label.
    pub fn label(&self) -> &'static str {
        match self {
            TerminalReason::Completed => "completed",
            TerminalReason::Failed => "failed",
            TerminalReason::Canceled => "canceled",
            TerminalReason::Terminal => "terminal",
        }
    }
}

/// What an active source delivers to its consumer.
#[derive(Debug, Clone)]
pub enum SourceMessage {
    /// An ordinary execution event.
    Event(ExecutionEvent),
    /// The source observed a terminal condition and stopped itself.
    /// Emitted at most once, always last.
    Terminal(TerminalReason),
}
