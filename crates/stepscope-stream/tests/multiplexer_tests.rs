//! Integration tests for the stream multiplexer using a scripted transport.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use stepscope_core::{ExecutionEvent, StepStatus, WorkerRef};
use stepscope_stream::{
    EventFrame, EventTransport, LiveSource, PollBatch, PushStream, SourceMessage, StreamError,
    StreamMultiplexer, StreamResult, TerminalReason,
};

// ============================================================================
// Scripted transport (no network)
// ============================================================================

/// Transport whose push frames and poll batches are scripted up front.
struct ScriptedTransport {
    /// `None` means the push channel cannot be opened at all.
    push: Mutex<Option<Vec<StreamResult<EventFrame>>>>,
    /// Responses handed out per poll call; exhausted scripts return empty
    /// batches that keep the cursor where it is.
    polls: Mutex<VecDeque<StreamResult<PollBatch>>>,
    poll_calls: AtomicUsize,
    /// Keep the push stream open after the scripted frames run out.
    hold_push_open: bool,
}

impl ScriptedTransport {
    fn without_push(polls: Vec<StreamResult<PollBatch>>) -> Self {
        Self {
            push: Mutex::new(None),
            polls: Mutex::new(polls.into()),
            poll_calls: AtomicUsize::new(0),
            hold_push_open: false,
        }
    }

    fn with_push(frames: Vec<StreamResult<EventFrame>>) -> Self {
        Self {
            push: Mutex::new(Some(frames)),
            polls: Mutex::new(VecDeque::new()),
            poll_calls: AtomicUsize::new(0),
            hold_push_open: true,
        }
    }

    fn with_push_then_polls(
        frames: Vec<StreamResult<EventFrame>>,
        polls: Vec<StreamResult<PollBatch>>,
    ) -> Self {
        Self {
            push: Mutex::new(Some(frames)),
            polls: Mutex::new(polls.into()),
            poll_calls: AtomicUsize::new(0),
            hold_push_open: false,
        }
    }

    fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventTransport for ScriptedTransport {
    async fn open_push(
        &self,
        _worker: &WorkerRef,
        _source: LiveSource,
    ) -> StreamResult<PushStream> {
        match self.push.lock().unwrap().take() {
            Some(frames) => {
                let scripted = futures_util::stream::iter(frames);
                if self.hold_push_open {
                    Ok(Box::pin(scripted.chain(futures_util::stream::pending())))
                } else {
                    Ok(Box::pin(scripted))
                }
            }
            None => Err(StreamError::Connect {
                url: "scripted".into(),
                message: "push disabled".into(),
            }),
        }
    }

    async fn poll(
        &self,
        _worker: &WorkerRef,
        _source: LiveSource,
        from_row_id: u64,
        _limit: usize,
    ) -> StreamResult<PollBatch> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        self.polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(PollBatch {
                    events: Vec::new(),
                    resume_cursor: from_row_id,
                    run_phase: None,
                })
            })
    }
}

fn frame(row_id: u64, node: &str) -> EventFrame {
    EventFrame {
        row_id,
        event: ExecutionEvent::new(node, StepStatus::Running),
    }
}

fn terminal_frame(row_id: u64, node: &str, phase: &str) -> EventFrame {
    let mut event = ExecutionEvent::new(node, StepStatus::Succeeded);
    event.run_phase = Some(phase.into());
    EventFrame { row_id, event }
}

fn fast_multiplexer(transport: std::sync::Arc<ScriptedTransport>) -> StreamMultiplexer {
    StreamMultiplexer::new(transport)
        .with_poll_interval(Duration::from_millis(5))
        .with_retry_backoff(Duration::from_millis(5))
}

/// Drain the handle until the channel closes, collecting every message.
async fn collect_all(
    mut handle: stepscope_stream::SourceHandle,
    deadline: Duration,
) -> Vec<SourceMessage> {
    let mut messages = Vec::new();
    let drain = async {
        while let Some(message) = handle.events.recv().await {
            messages.push(message);
        }
    };
    tokio::time::timeout(deadline, drain)
        .await
        .expect("source did not finish in time");
    messages
}

fn event_nodes(messages: &[SourceMessage]) -> Vec<&str> {
    messages
        .iter()
        .filter_map(|m| match m {
            SourceMessage::Event(event) => Some(event.node_id.as_str()),
            SourceMessage::Terminal(_) => None,
        })
        .collect()
}

fn terminal_reasons(messages: &[SourceMessage]) -> Vec<TerminalReason> {
    messages
        .iter()
        .filter_map(|m| match m {
            SourceMessage::Terminal(reason) => Some(*reason),
            SourceMessage::Event(_) => None,
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_poll_fallback_deduplicates_stale_batches() {
    // Two poll responses with resume_cursor 10 twice: the second is a stale
    // duplicate and must produce no events.
    let transport = std::sync::Arc::new(ScriptedTransport::without_push(vec![
        Ok(PollBatch {
            events: vec![frame(9, "fetch"), frame(10, "parse")],
            resume_cursor: 10,
            run_phase: None,
        }),
        Ok(PollBatch {
            events: vec![frame(9, "fetch"), frame(10, "parse")],
            resume_cursor: 10,
            run_phase: None,
        }),
        Ok(PollBatch {
            events: vec![frame(11, "publish")],
            resume_cursor: 11,
            run_phase: Some("completed".into()),
        }),
    ]));

    let handle = fast_multiplexer(transport).start(WorkerRef::new("w1"), LiveSource::Observe);
    let messages = collect_all(handle, Duration::from_secs(2)).await;

    assert_eq!(event_nodes(&messages), ["fetch", "parse", "publish"]);
    assert_eq!(terminal_reasons(&messages), [TerminalReason::Completed]);
}

#[tokio::test]
async fn test_push_terminal_event_stops_source_once() {
    let transport = std::sync::Arc::new(ScriptedTransport::with_push(vec![
        Ok(frame(1, "fetch")),
        Ok(frame(2, "parse")),
        Ok(terminal_frame(3, "publish", "failed")),
    ]));

    // Long poll interval keeps the safety net quiet for this test.
    let multiplexer = StreamMultiplexer::new(transport.clone())
        .with_poll_interval(Duration::from_secs(60));
    let handle = multiplexer.start(WorkerRef::new("w1"), LiveSource::Debug);
    let messages = collect_all(handle, Duration::from_secs(2)).await;

    assert_eq!(event_nodes(&messages), ["fetch", "parse", "publish"]);
    assert_eq!(terminal_reasons(&messages), [TerminalReason::Failed]);
}

#[tokio::test]
async fn test_push_failure_falls_back_to_polling_without_duplicates() {
    // Push delivers row 1 then dies; polling resumes from the cursor and
    // re-serves row 1, which must be dropped.
    let transport = std::sync::Arc::new(ScriptedTransport::with_push_then_polls(
        vec![
            Ok(frame(1, "fetch")),
            Err(StreamError::Connect {
                url: "scripted".into(),
                message: "push died".into(),
            }),
        ],
        vec![
            Ok(PollBatch {
                events: vec![frame(1, "fetch"), frame(2, "parse")],
                resume_cursor: 2,
                run_phase: None,
            }),
            Ok(PollBatch {
                events: vec![frame(3, "publish")],
                resume_cursor: 3,
                run_phase: Some("completed".into()),
            }),
        ],
    ));

    let handle =
        fast_multiplexer(transport.clone()).start(WorkerRef::new("w1"), LiveSource::Observe);
    let messages = collect_all(handle, Duration::from_secs(2)).await;

    assert_eq!(event_nodes(&messages), ["fetch", "parse", "publish"]);
    assert_eq!(terminal_reasons(&messages), [TerminalReason::Completed]);
}

#[tokio::test]
async fn test_poll_errors_retry_with_fixed_backoff() {
    let transport = std::sync::Arc::new(ScriptedTransport::without_push(vec![
        Err(StreamError::Connect {
            url: "scripted".into(),
            message: "transient".into(),
        }),
        Err(StreamError::Connect {
            url: "scripted".into(),
            message: "transient".into(),
        }),
        Ok(PollBatch {
            events: vec![frame(1, "fetch")],
            resume_cursor: 1,
            run_phase: Some("completed".into()),
        }),
    ]));

    let handle =
        fast_multiplexer(transport.clone()).start(WorkerRef::new("w1"), LiveSource::Observe);
    let messages = collect_all(handle, Duration::from_secs(2)).await;

    assert_eq!(event_nodes(&messages), ["fetch"]);
    assert_eq!(terminal_reasons(&messages), [TerminalReason::Completed]);
    assert!(transport.poll_calls() >= 3);
}

#[tokio::test]
async fn test_stop_is_idempotent_and_silences_the_source() {
    // Endless empty batches: the source would poll forever without stop().
    let transport = std::sync::Arc::new(ScriptedTransport::without_push(Vec::new()));

    let mut handle =
        fast_multiplexer(transport).start(WorkerRef::new("w1"), LiveSource::Observe);
    handle.stop();
    handle.stop();

    // The channel closes without a terminal message.
    let last = tokio::time::timeout(Duration::from_secs(2), handle.events.recv())
        .await
        .expect("source did not stop in time");
    assert!(last.is_none());
}

#[tokio::test]
async fn test_batch_terminal_phase_without_events() {
    let transport = std::sync::Arc::new(ScriptedTransport::without_push(vec![Ok(PollBatch {
        events: Vec::new(),
        resume_cursor: 0,
        run_phase: Some("canceled".into()),
    })]));

    let handle = fast_multiplexer(transport).start(WorkerRef::new("w1"), LiveSource::Observe);
    let messages = collect_all(handle, Duration::from_secs(2)).await;

    assert!(event_nodes(&messages).is_empty());
    assert_eq!(terminal_reasons(&messages), [TerminalReason::Canceled]);
}
