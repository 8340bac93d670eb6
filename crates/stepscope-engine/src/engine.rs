//! Mode controller and event pump.

use std::sync::Arc;
use std::time::Duration;

use stepscope_core::{
    CacheKey, ExecutionEvent, FlowGraph, Mode, RenderKind, SessionState, WorkerRef,
};
use stepscope_render::{
    EdgeIndex, GraphCache, NodeResolver, RenderBackend, RenderOutcome, RenderRequest,
    RenderScheduler, RenderedArtifact, DEFAULT_CACHE_CAPACITY, DEFAULT_MIN_INTERVAL,
};
use stepscope_replay::{ReplaySequencer, DEFAULT_STEP_INTERVAL, MIN_STEP_INTERVAL};
use stepscope_stream::{
    EventTransport, HistoryProvider, LiveSource, SourceHandle, SourceMessage, StreamMultiplexer,
    DEFAULT_POLL_INTERVAL,
};
use stepscope_trail::{
    Advance, HighlightBatch, StepAnimator, TrailHighlighter, TransitionPlan, DEFAULT_TRAIL_LEN,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::styles::SharedStyles;

/// Everything the engine needs to boot.
pub struct EngineConfig {
    /// Worker whose flow is opened.
    pub worker: WorkerRef,
    /// The worker's logical step graph.
    pub flow: FlowGraph,
    /// Live event transport.
    pub transport: Arc<dyn EventTransport>,
    /// Run/step history provider.
    pub history: Arc<dyn HistoryProvider>,
    /// Rendering backend.
    pub backend: Arc<dyn RenderBackend>,
    /// Mode to start in.
    pub initial_mode: Mode,
    /// Trail capacity (clamped to 1..=10).
    pub trail_len: usize,
    /// Replay auto-advance interval.
    pub replay_interval: Duration,
    /// Artifact cache capacity.
    pub cache_capacity: usize,
    /// Render cadence floor.
    pub render_interval: Duration,
    /// Safety-net / fallback poll interval for live sources.
    pub poll_interval: Duration,
}

impl EngineConfig {
    /// Configuration with the default tunables.
    pub fn new(
        worker: WorkerRef,
        flow: FlowGraph,
        transport: Arc<dyn EventTransport>,
        history: Arc<dyn HistoryProvider>,
        backend: Arc<dyn RenderBackend>,
    ) -> Self {
        Self {
            worker,
            flow,
            transport,
            history,
            backend,
            initial_mode: Mode::Observe,
            trail_len: DEFAULT_TRAIL_LEN,
            replay_interval: DEFAULT_STEP_INTERVAL,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            render_interval: DEFAULT_MIN_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Handle to a running engine.
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    session: watch::Receiver<SessionState>,
    events: broadcast::Sender<ExecutionEvent>,
    styles: SharedStyles,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Issue a command. Returns `false` once the engine is gone.
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Snapshot of the session state.
    pub fn session(&self) -> SessionState {
        self.session.borrow().clone()
    }

    /// Watch session-state changes.
    pub fn watch_session(&self) -> watch::Receiver<SessionState> {
        self.session.clone()
    }

    /// Subscribe to the execution-event fan-out for side panels.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    /// Highlight levels of the current artifact.
    pub fn styles(&self) -> &SharedStyles {
        &self.styles
    }

    /// Tear down and wait for the engine task to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        let _ = self.task.await;
    }
}

enum Tick {
    Command(Option<Command>),
    Live(Option<SourceMessage>),
    Replay(Option<SourceMessage>),
    Render(Option<RenderOutcome>),
}

/// Coordinates all runtime subsystems for one open worker view.
pub struct Engine {
    worker: WorkerRef,
    flow: Arc<FlowGraph>,
    mode: Mode,

    multiplexer: StreamMultiplexer,
    live: Option<SourceHandle>,
    replay: ReplaySequencer,
    replay_rx: mpsc::UnboundedReceiver<SourceMessage>,
    replay_interval: Duration,

    cache: Arc<GraphCache>,
    scheduler: RenderScheduler,
    outcomes_rx: mpsc::UnboundedReceiver<RenderOutcome>,

    resolver: NodeResolver,
    highlighter: TrailHighlighter,
    animator: StepAnimator,
    animation_task: Option<JoinHandle<()>>,
    styles: SharedStyles,

    current_view: CacheKey,
    current_artifact: Option<(Arc<RenderedArtifact>, EdgeIndex)>,
    /// Node waiting for a view-switch render before its highlight retries.
    pending_node: Option<String>,

    session: SessionState,
    session_tx: watch::Sender<SessionState>,
    events_tx: broadcast::Sender<ExecutionEvent>,
}

impl Engine {
    /// Boot the engine and return its handle. The engine runs as one task;
    /// all mutation happens inside it, in event order.
    pub fn spawn(config: EngineConfig) -> EngineHandle {
        let EngineConfig {
            worker,
            flow,
            transport,
            history,
            backend,
            initial_mode,
            trail_len,
            replay_interval,
            cache_capacity,
            render_interval,
            poll_interval,
        } = config;

        let cache = Arc::new(GraphCache::with_capacity(backend, cache_capacity));
        let (scheduler, outcomes_rx) =
            RenderScheduler::spawn_with_interval(cache.clone(), render_interval);
        let multiplexer = StreamMultiplexer::new(transport).with_poll_interval(poll_interval);
        let (replay, replay_rx) = ReplaySequencer::new(history, worker.clone());

        let mut animator = StepAnimator::new();
        animator.set_replay_interval(replay_interval);

        let session = SessionState::new(initial_mode, worker.clone());
        let (session_tx, session_rx) = watch::channel(session.clone());
        let (events_tx, _) = broadcast::channel(256);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let styles = SharedStyles::new();

        let engine = Engine {
            worker,
            flow: Arc::new(flow),
            mode: initial_mode,
            multiplexer,
            live: None,
            replay,
            replay_rx,
            replay_interval: replay_interval.max(MIN_STEP_INTERVAL),
            cache,
            scheduler,
            outcomes_rx,
            resolver: NodeResolver::new(),
            highlighter: TrailHighlighter::new(trail_len),
            animator,
            animation_task: None,
            styles: styles.clone(),
            current_view: CacheKey::new(RenderKind::Process),
            current_artifact: None,
            pending_node: None,
            session,
            session_tx,
            events_tx: events_tx.clone(),
        };

        let task = tokio::spawn(engine.run(commands_rx));

        EngineHandle {
            commands: commands_tx,
            session: session_rx,
            events: events_tx,
            styles,
            task,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.enter_mode(self.mode).await;

        loop {
            let tick = tokio::select! {
                command = commands.recv() => Tick::Command(command),
                message = recv_live(&mut self.live) => Tick::Live(message),
                message = self.replay_rx.recv(), if self.mode == Mode::Replay => {
                    Tick::Replay(message)
                }
                outcome = self.outcomes_rx.recv() => Tick::Render(outcome),
            };

            match tick {
                Tick::Command(None) => break,
                Tick::Command(Some(command)) => {
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                Tick::Live(None) => {
                    // Source task ended (terminal or consumer-side stop).
                    self.live = None;
                }
                Tick::Live(Some(message)) | Tick::Replay(Some(message)) => {
                    self.handle_source_message(message);
                }
                Tick::Replay(None) => {}
                Tick::Render(None) => break,
                Tick::Render(Some(outcome)) => self.handle_render_outcome(outcome),
            }
        }

        self.teardown().await;
    }

    // =========================================================================
    // Commands
    // =========================================================================

    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::SetMode(mode) => self.set_mode(mode).await,
            Command::SelectRun(run_id) => self.select_run(&run_id).await,
            Command::Play => {
                self.replay.play(self.replay_interval);
                self.sync_replay_state();
            }
            Command::Pause => {
                self.replay.pause();
                self.sync_replay_state();
            }
            Command::Next => {
                self.replay.next();
                self.sync_replay_state();
            }
            Command::Prev => {
                self.replay.prev();
                self.sync_replay_state();
            }
            Command::Seek(index) => {
                self.replay.seek(index);
                self.sync_replay_state();
            }
            Command::SetTrailLength(len) => {
                let evicted = self.highlighter.set_trail_length(len);
                if !evicted.is_empty() {
                    self.clear_nodes(&evicted);
                }
                self.session.trail = self.highlighter.trail().to_vec();
                self.publish_session();
            }
            Command::SetReplaySpeed(interval) => {
                self.replay_interval = interval.max(MIN_STEP_INTERVAL);
                self.animator.set_replay_interval(self.replay_interval);
            }
            Command::ForceRefresh => {
                info!("force refresh: clearing artifact cache");
                self.cache.clear();
                self.request_render(true);
                self.publish_session();
            }
            Command::Shutdown => return false,
        }
        true
    }

    /// Switch viewing modes. Idempotent for the active mode; otherwise the
    /// previous source is fully torn down before the next one starts.
    async fn set_mode(&mut self, mode: Mode) {
        if mode == self.mode {
            debug!(mode = mode.label(), "set_mode no-op, mode already active");
            return;
        }
        self.enter_mode(mode).await;
    }

    async fn enter_mode(&mut self, mode: Mode) {
        info!(mode = mode.label(), "entering mode");

        // Teardown: cancel the live source, stop replay timers, kill any
        // running animation, forget trail and highlights. Nothing of the
        // previous source may reach the pipeline after this point.
        if let Some(handle) = self.live.take() {
            handle.shutdown().await;
        }
        self.replay.stop();
        while self.replay_rx.try_recv().is_ok() {}
        if let Some(task) = self.animation_task.take() {
            task.abort();
        }
        self.highlighter.clear();
        self.styles.reset();
        self.pending_node = None;
        self.session.trail.clear();
        self.session.current_node = None;
        self.session.last_error = None;

        self.mode = mode;
        self.session.mode = mode;
        match mode {
            Mode::Observe => {
                self.live = Some(
                    self.multiplexer
                        .start(self.worker.clone(), LiveSource::Observe),
                );
                self.session.replay = None;
            }
            Mode::DebugStream => {
                self.live = Some(
                    self.multiplexer
                        .start(self.worker.clone(), LiveSource::Debug),
                );
                self.session.replay = None;
            }
            Mode::Replay => {
                // A historical run starts from a neutral view rather than
                // wherever the previous mode left the camera.
                self.set_view(CacheKey::new(RenderKind::Overview));
                self.session.replay = Some(self.replay.state());
            }
        }

        self.request_render(false);
        self.publish_session();
    }

    async fn select_run(&mut self, run_id: &str) {
        if self.mode != Mode::Replay {
            warn!(run_id, "select_run ignored outside replay mode");
            return;
        }

        match self.replay.set_run(run_id).await {
            Ok(steps) => {
                debug!(run_id, steps, "replay run selected");
                // Upstream data changed wholesale; cached artifacts may
                // describe a stale flow.
                self.cache.clear();
                self.highlighter.clear();
                self.styles.reset();
                self.pending_node = None;
                self.session.trail.clear();
                self.session.current_node = None;
                self.session.last_error = None;
                self.set_view(CacheKey::new(RenderKind::Overview));
                self.request_render(true);
            }
            Err(err) => {
                // Stay in Replay with an empty source; never silently
                // revert to the previous mode.
                warn!(run_id, error = %err, "failed to load replay run");
                self.session.last_error = Some(err.to_string());
            }
        }
        self.sync_replay_state();
    }

    // =========================================================================
    // Source events
    // =========================================================================

    fn handle_source_message(&mut self, message: SourceMessage) {
        match message {
            SourceMessage::Event(event) => {
                // Side panels see every event, symbolic ones included.
                let _ = self.events_tx.send(event.clone());

                if event.is_symbolic() {
                    debug!(node = %event.node_id, "symbolic event, not highlighting");
                    return;
                }

                self.apply_node(event.node_id, false);
                if self.mode == Mode::Replay {
                    self.sync_replay_state();
                }
            }
            SourceMessage::Terminal(reason) => {
                info!(reason = reason.label(), "active source terminated");
                if let Some(handle) = self.live.take() {
                    handle.stop();
                }
                self.publish_session();
            }
        }
    }

    /// Advance the trail to `node_id` against the current artifact.
    fn apply_node(&mut self, node_id: String, retried: bool) {
        self.session.current_node = Some(node_id.clone());

        let advance = match &self.current_artifact {
            Some((artifact, edges)) => Some(self.highlighter.advance(
                &self.flow,
                artifact,
                edges,
                &self.resolver,
                &node_id,
            )),
            None => None,
        };

        let Some(advance) = advance else {
            // No artifact yet; render first, highlight when it arrives.
            self.pending_node = Some(node_id);
            self.request_render(false);
            self.publish_session();
            return;
        };

        match advance {
            Advance::Applied { batch, transition } => {
                self.styles.apply_batch(&batch);
                if let Some(plan) = transition {
                    self.spawn_animation(plan);
                }
                self.session.trail = self.highlighter.trail().to_vec();
                self.request_render(false);
            }
            Advance::DuplicateHead => {}
            Advance::NeedsViewSwitch { subgraph } => {
                if retried {
                    // The switched view still lacks the node; a final miss.
                    self.resolver.note_miss(self.current_view.kind, &node_id);
                } else {
                    debug!(node = %node_id, subgraph, "switching view to resolve node");
                    self.pending_node = Some(node_id);
                    self.set_view(CacheKey::subgraph(RenderKind::CurrentSubgraph, subgraph));
                    self.request_render(false);
                }
            }
            Advance::Unresolved => {
                self.resolver.note_miss(self.current_view.kind, &node_id);
            }
        }
        self.publish_session();
    }

    // =========================================================================
    // Render outcomes
    // =========================================================================

    fn handle_render_outcome(&mut self, outcome: RenderOutcome) {
        match outcome {
            RenderOutcome::Rendered { key, artifact } => {
                if key != self.current_view {
                    debug!("dropping render outcome for a superseded view");
                    return;
                }

                let edges = EdgeIndex::build(&artifact);
                self.current_artifact = Some((artifact, edges));
                self.session.last_error = None;

                // Restyle from scratch against the fresh artifact.
                self.styles.reset();
                if let Some((artifact, edges)) = &self.current_artifact {
                    let batch = self.highlighter.recompute(artifact, edges, &self.resolver);
                    self.styles.apply_batch(&batch);
                }

                if let Some(node) = self.pending_node.take() {
                    self.apply_node(node, true);
                }
                self.publish_session();
            }
            RenderOutcome::HighlightOnly { .. } => {
                if let Some((artifact, edges)) = &self.current_artifact {
                    let batch = self.highlighter.recompute(artifact, edges, &self.resolver);
                    self.styles.apply_batch(&batch);
                }
            }
            RenderOutcome::Failed { key, message } => {
                warn!(?key, %message, "render failed");
                self.session.last_error = Some(message);
                self.publish_session();
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn set_view(&mut self, view: CacheKey) {
        self.current_view = view.clone();
        self.session.view = view;
    }

    fn request_render(&self, force: bool) {
        self.scheduler.schedule(RenderRequest {
            graph: self.flow.clone(),
            key: self.current_view.clone(),
            current_node: self.session.current_node.clone(),
            trail: self.highlighter.trail().to_vec(),
            force,
        });
    }

    fn spawn_animation(&mut self, plan: TransitionPlan) {
        // One transition at a time; a request while one runs is dropped.
        if self.animator.is_running() {
            debug!("animation in progress, dropping transition");
            return;
        }
        let animator = self.animator.clone();
        let mut sink = self.styles.clone();
        self.animation_task = Some(tokio::spawn(async move {
            animator.run(&mut sink, plan).await;
        }));
    }

    fn clear_nodes(&mut self, nodes: &[String]) {
        if let Some((artifact, _)) = &self.current_artifact {
            let cleared: Vec<String> = nodes
                .iter()
                .filter_map(|node| self.resolver.resolve(artifact, node))
                .map(|element| element.id.clone())
                .collect();
            self.styles.apply_batch(&HighlightBatch {
                ops: Vec::new(),
                cleared,
            });
        }
    }

    fn sync_replay_state(&mut self) {
        if self.mode == Mode::Replay {
            self.session.replay = Some(self.replay.state());
        }
        self.publish_session();
    }

    fn publish_session(&mut self) {
        self.session.cache_entries = self.cache.len();
        self.session_tx.send_replace(self.session.clone());
    }

    async fn teardown(mut self) {
        if let Some(handle) = self.live.take() {
            handle.shutdown().await;
        }
        self.replay.stop();
        if let Some(task) = self.animation_task.take() {
            task.abort();
        }
        self.scheduler.shutdown();
        info!("engine stopped");
    }
}

async fn recv_live(live: &mut Option<SourceHandle>) -> Option<SourceMessage> {
    match live {
        Some(handle) => handle.events.recv().await,
        None => std::future::pending().await,
    }
}
