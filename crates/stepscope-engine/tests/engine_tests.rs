//! Integration tests for the engine: mode switching, trail progression,
//! replay driving, and the view/cache readouts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stepscope_core::{
    ExecutionEvent, FlowEdge, FlowGraph, FlowNode, Mode, RenderKind, ReplayStep, RunSummary,
    SessionState, StepStatus, WorkerRef,
};
use stepscope_engine::{Command, Engine, EngineConfig, EngineHandle};
use stepscope_render::StaticBackend;
use stepscope_stream::{
    EventFrame, EventTransport, HistoryProvider, LiveSource, PollBatch, PushStream, StreamError,
    StreamResult,
};
use tokio::sync::{mpsc, watch};

// ============================================================================
// Test doubles
// ============================================================================

/// Transport whose push channel is fed interactively by the test.
struct TestTransport {
    push_rx: Mutex<Option<mpsc::UnboundedReceiver<EventFrame>>>,
    open_calls: AtomicUsize,
}

impl TestTransport {
    fn new() -> (mpsc::UnboundedSender<EventFrame>, Arc<Self>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Arc::new(Self {
                push_rx: Mutex::new(Some(rx)),
                open_calls: AtomicUsize::new(0),
            }),
        )
    }

    fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventTransport for TestTransport {
    async fn open_push(
        &self,
        _worker: &WorkerRef,
        _source: LiveSource,
    ) -> StreamResult<PushStream> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        match self.push_rx.lock().unwrap().take() {
            Some(rx) => Ok(Box::pin(futures_util::stream::unfold(rx, |mut rx| async {
                rx.recv().await.map(|frame| (Ok(frame), rx))
            }))),
            None => Err(StreamError::Connect {
                url: "test".into(),
                message: "push already consumed".into(),
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
        Ok(PollBatch {
            events: Vec::new(),
            resume_cursor: from_row_id,
            run_phase: None,
        })
    }
}

struct FixedHistory {
    steps: Vec<ReplayStep>,
}

#[async_trait]
impl HistoryProvider for FixedHistory {
    async fn list_runs(&self, _worker: &WorkerRef) -> StreamResult<Vec<RunSummary>> {
        Ok(vec![RunSummary {
            run_id: "run-1".into(),
            started_at: None,
            finished_at: None,
            phase: "completed".into(),
            step_count: self.steps.len(),
        }])
    }

    async fn list_steps(
        &self,
        _worker: &WorkerRef,
        _run_id: &str,
        limit: usize,
    ) -> StreamResult<Vec<ReplayStep>> {
        Ok(self.steps.iter().take(limit).cloned().collect())
    }
}

fn flow() -> FlowGraph {
    FlowGraph {
        nodes: ["a", "b", "c"]
            .into_iter()
            .map(|id| FlowNode {
                id: id.into(),
                label: id.to_uppercase(),
                subgraph: None,
            })
            .collect(),
        edges: vec![
            FlowEdge {
                from: "a".into(),
                to: "b".into(),
                label: None,
            },
            FlowEdge {
                from: "b".into(),
                to: "c".into(),
                label: None,
            },
        ],
    }
}

fn replay_steps() -> Vec<ReplayStep> {
    ["a", "b", "c"]
        .into_iter()
        .enumerate()
        .map(|(index, node)| ReplayStep {
            index,
            node_id: node.into(),
            status: StepStatus::Succeeded,
            started_at: None,
            finished_at: None,
            io_in: serde_json::Value::Null,
            io_out_preview: String::new(),
        })
        .collect()
}

fn frame(row_id: u64, node: &str, status: StepStatus) -> EventFrame {
    EventFrame {
        row_id,
        event: ExecutionEvent::new(node, status),
    }
}

fn spawn_engine(transport: Arc<TestTransport>) -> EngineHandle {
    let mut config = EngineConfig::new(
        WorkerRef::new("w1"),
        flow(),
        transport,
        Arc::new(FixedHistory {
            steps: replay_steps(),
        }),
        Arc::new(StaticBackend::new()),
    );
    config.render_interval = Duration::ZERO;
    Engine::spawn(config)
}

async fn wait_for(
    session: &mut watch::Receiver<SessionState>,
    what: &str,
    pred: impl Fn(&SessionState) -> bool,
) {
    let result = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if pred(&session.borrow()) {
                return;
            }
            if session.changed().await.is_err() {
                panic!("engine went away while waiting for: {what}");
            }
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for: {what}");
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_observe_events_drive_the_trail() {
    let (events, transport) = TestTransport::new();
    let handle = spawn_engine(transport);
    let mut session = handle.watch_session();

    // Let the initial render land before the first event.
    wait_for(&mut session, "initial render", |s| s.cache_entries >= 1).await;

    events.send(frame(1, "a", StepStatus::Running)).unwrap();
    wait_for(&mut session, "trail [a]", |s| s.trail == ["a"]).await;

    events.send(frame(2, "b", StepStatus::Running)).unwrap();
    events.send(frame(3, "c", StepStatus::Running)).unwrap();
    wait_for(&mut session, "trail [c,b,a]", |s| s.trail == ["c", "b", "a"]).await;

    assert_eq!(session.borrow().current_node.as_deref(), Some("c"));
    handle.shutdown().await;
}

#[tokio::test]
async fn test_symbolic_events_reach_panels_but_not_the_trail() {
    let (events, transport) = TestTransport::new();
    let handle = spawn_engine(transport);
    let mut session = handle.watch_session();
    let mut panel = handle.subscribe_events();

    wait_for(&mut session, "initial render", |s| s.cache_entries >= 1).await;

    events.send(frame(1, "a", StepStatus::Running)).unwrap();
    wait_for(&mut session, "trail [a]", |s| s.trail == ["a"]).await;

    events.send(frame(2, "b", StepStatus::Symbolic)).unwrap();

    // The side panel sees both events.
    let first = panel.recv().await.unwrap();
    let second = panel.recv().await.unwrap();
    assert_eq!(first.node_id, "a");
    assert_eq!(second.node_id, "b");
    assert_eq!(second.status, StepStatus::Symbolic);

    // The trail never moved for the symbolic marker.
    assert_eq!(handle.session().trail, ["a"]);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_set_mode_is_idempotent_for_the_active_mode() {
    let (_events, transport) = TestTransport::new();
    let handle = spawn_engine(transport.clone());
    let mut session = handle.watch_session();

    wait_for(&mut session, "observe source up", |s| s.mode == Mode::Observe).await;
    let opened = transport.open_calls();
    assert_eq!(opened, 1);

    // Same mode again: the source must not be torn down and recreated.
    handle.send(Command::SetMode(Mode::Observe));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.open_calls(), 1);

    // A different mode starts a fresh source.
    handle.send(Command::SetMode(Mode::DebugStream));
    wait_for(&mut session, "debug mode", |s| s.mode == Mode::DebugStream).await;
    assert_eq!(transport.open_calls(), 2);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_entering_replay_resets_the_view_to_overview() {
    let (_events, transport) = TestTransport::new();
    let handle = spawn_engine(transport);
    let mut session = handle.watch_session();

    handle.send(Command::SetMode(Mode::Replay));
    wait_for(&mut session, "replay overview", |s| {
        s.mode == Mode::Replay && s.view.kind == RenderKind::Overview
    })
    .await;

    let state = handle.session();
    assert!(state.trail.is_empty());
    assert_eq!(state.replay.as_ref().map(|r| r.index), Some(-1));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_replay_stepping_drives_the_trail() {
    let (_events, transport) = TestTransport::new();
    let handle = spawn_engine(transport);
    let mut session = handle.watch_session();

    handle.send(Command::SetMode(Mode::Replay));
    handle.send(Command::SelectRun("run-1".into()));
    wait_for(&mut session, "run loaded", |s| {
        s.replay
            .as_ref()
            .is_some_and(|r| r.run_id.as_deref() == Some("run-1") && r.total == 3)
    })
    .await;

    handle.send(Command::Next);
    wait_for(&mut session, "trail [a]", |s| s.trail == ["a"]).await;
    assert_eq!(handle.session().replay.unwrap().index, 0);

    handle.send(Command::Next);
    wait_for(&mut session, "trail [b,a]", |s| s.trail == ["b", "a"]).await;

    handle.send(Command::Prev);
    wait_for(&mut session, "cursor back to 0", |s| {
        s.replay.as_ref().is_some_and(|r| r.index == 0)
    })
    .await;

    handle.shutdown().await;
}

#[tokio::test]
async fn test_selecting_unknown_run_surfaces_the_failure() {
    struct FailingHistory;

    #[async_trait]
    impl HistoryProvider for FailingHistory {
        async fn list_runs(&self, _worker: &WorkerRef) -> StreamResult<Vec<RunSummary>> {
            Ok(Vec::new())
        }

        async fn list_steps(
            &self,
            _worker: &WorkerRef,
            _run_id: &str,
            _limit: usize,
        ) -> StreamResult<Vec<ReplayStep>> {
            Err(StreamError::Connect {
                url: "test".into(),
                message: "no such run".into(),
            })
        }
    }

    let (_events, transport) = TestTransport::new();
    let mut config = EngineConfig::new(
        WorkerRef::new("w1"),
        flow(),
        transport,
        Arc::new(FailingHistory),
        Arc::new(StaticBackend::new()),
    );
    config.render_interval = Duration::ZERO;
    let handle = Engine::spawn(config);
    let mut session = handle.watch_session();

    handle.send(Command::SetMode(Mode::Replay));
    handle.send(Command::SelectRun("missing".into()));
    wait_for(&mut session, "failure surfaced", |s| s.last_error.is_some()).await;

    // The engine stays in Replay with an empty source; no silent revert.
    let state = handle.session();
    assert_eq!(state.mode, Mode::Replay);
    assert_eq!(state.replay.unwrap().total, 0);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_mode_switch_clears_trail_but_keeps_cache() {
    let (events, transport) = TestTransport::new();
    let handle = spawn_engine(transport);
    let mut session = handle.watch_session();

    wait_for(&mut session, "initial render", |s| s.cache_entries >= 1).await;
    events.send(frame(1, "a", StepStatus::Running)).unwrap();
    wait_for(&mut session, "trail [a]", |s| s.trail == ["a"]).await;

    let cached_before = handle.session().cache_entries;
    handle.send(Command::SetMode(Mode::Replay));
    wait_for(&mut session, "replay mode", |s| s.mode == Mode::Replay).await;

    let state = handle.session();
    assert!(state.trail.is_empty());
    // Artifacts persist across mode switches.
    assert!(state.cache_entries >= cached_before);

    handle.shutdown().await;
}
