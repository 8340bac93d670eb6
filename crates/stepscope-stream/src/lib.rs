//! Live event sources for Stepscope.
//!
//! `StreamMultiplexer` normalizes the two live sources (observe, debug) into
//! one ordered channel of `SourceMessage`s: push-first over WebSocket with a
//! bounded-interval safety-net poll, transparent fallback to pure polling
//! with a resume cursor, row-id dedup across the overlap, and exactly-once
//! terminal detection.

mod error;
mod history;
mod multiplexer;
mod transport;
mod types;

pub use error::{StreamError, StreamResult};
pub use history::{HistoryProvider, HttpHistoryClient, MAX_REPLAY_STEPS};
pub use multiplexer::{
    SourceHandle, StreamMultiplexer, DEFAULT_BATCH_LIMIT, DEFAULT_POLL_INTERVAL,
    DEFAULT_RETRY_BACKOFF,
};
pub use transport::{EventTransport, HttpTransport, PushStream};
pub use types::{EventFrame, LiveSource, PollBatch, SourceMessage, TerminalReason};
