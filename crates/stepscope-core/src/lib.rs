//! Core domain types shared across the entire Stepscope workspace.

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::SystemTime;

// =============================================================================
// Step Execution Types
// =============================================================================

/// Outcome (or in-progress state) of a single step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step is currently executing.
    Running,
    /// Step finished successfully.
    Succeeded,
    /// Step finished with an error.
    Failed,
    /// Process-boundary marker step; never drives visualization changes.
    Symbolic,
}

impl StepStatus {
    /// Get a display label for the status.
    pub fn label(&self) -> &'static str {
        match self {
            StepStatus::Running => "Running",
            StepStatus::Succeeded => "Succeeded",
            StepStatus::Failed => "Failed",
            StepStatus::Symbolic => "Symbolic",
        }
    }

    /// Get a short symbol for the status.
    pub fn symbol(&self) -> &'static str {
        match self {
            StepStatus::Running => "▶",
            StepStatus::Succeeded => "✓",
            StepStatus::Failed => "✗",
            StepStatus::Symbolic => "·",
        }
    }
}

/// Run-level phases that indicate the run has ended.
pub const TERMINAL_PHASES: [&str; 4] = ["completed", "failed", "canceled", "terminal"];

/// Check whether a run-level phase value marks the end of a run.
pub fn is_terminal_phase(phase: &str) -> bool {
    TERMINAL_PHASES.contains(&phase)
}

/// A single step-execution event emitted by a live or historical source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    /// Logical identifier of the executed step node.
    pub node_id: String,
    /// Execution status of the step.
    pub status: StepStatus,
    /// When the step started, if known.
    pub started_at: Option<SystemTime>,
    /// When the step finished, if known.
    pub finished_at: Option<SystemTime>,
    /// Input payload handed to the step.
    #[serde(default)]
    pub io_in: Value,
    /// Truncated preview of the step's output.
    #[serde(default)]
    pub io_out_preview: String,
    /// Error message when the step failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Run-level phase carried alongside the event, used for terminal detection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_phase: Option<String>,
}

impl ExecutionEvent {
    /// Create a minimal event for a node with the given status.
    pub fn new(node_id: impl Into<String>, status: StepStatus) -> Self {
        Self {
            node_id: node_id.into(),
            status,
            started_at: None,
            finished_at: None,
            io_in: Value::Null,
            io_out_preview: String::new(),
            error_message: None,
            run_phase: None,
        }
    }

    /// Symbolic events mark process boundaries and never move the highlight.
    pub fn is_symbolic(&self) -> bool {
        self.status == StepStatus::Symbolic
    }

    /// Whether the attached run phase indicates the run has ended.
    pub fn is_terminal(&self) -> bool {
        self.run_phase
            .as_deref()
            .map(is_terminal_phase)
            .unwrap_or(false)
    }
}

/// One immutable historical step of a finished (or still recorded) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayStep {
    /// Position of the step within the run, starting at 0.
    pub index: usize,
    /// Logical identifier of the executed step node.
    pub node_id: String,
    /// Execution status of the step.
    pub status: StepStatus,
    /// When the step started, if known.
    pub started_at: Option<SystemTime>,
    /// When the step finished, if known.
    pub finished_at: Option<SystemTime>,
    /// Input payload handed to the step.
    #[serde(default)]
    pub io_in: Value,
    /// Truncated preview of the step's output.
    #[serde(default)]
    pub io_out_preview: String,
}

impl ReplayStep {
    /// Convert the historical step into the event shape the pipeline consumes.
    pub fn to_event(&self) -> ExecutionEvent {
        ExecutionEvent {
            node_id: self.node_id.clone(),
            status: self.status,
            started_at: self.started_at,
            finished_at: self.finished_at,
            io_in: self.io_in.clone(),
            io_out_preview: self.io_out_preview.clone(),
            error_message: None,
            run_phase: None,
        }
    }
}

/// Summary of a recorded run, as returned by the run/step history provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Identifier of the run.
    pub run_id: String,
    /// When the run started.
    pub started_at: Option<SystemTime>,
    /// When the run finished, if it has.
    pub finished_at: Option<SystemTime>,
    /// Final (or current) run phase.
    pub phase: String,
    /// Number of recorded steps.
    pub step_count: usize,
}

/// Reference to the worker process whose flow is being observed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerRef {
    /// Stable identifier of the worker.
    pub id: String,
}

impl WorkerRef {
    /// Create a reference from any string-ish identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl std::fmt::Display for WorkerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

// =============================================================================
// Viewing Modes
// =============================================================================

/// The three mutually exclusive viewing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Watch a live worker without interfering.
    Observe,
    /// Live step-debugging stream.
    DebugStream,
    /// Replay of a recorded past run.
    Replay,
}

impl Mode {
    /// Get a display label for the mode.
    pub fn label(&self) -> &'static str {
        match self {
            Mode::Observe => "Observe",
            Mode::DebugStream => "Debug",
            Mode::Replay => "Replay",
        }
    }
}

// =============================================================================
// Render Keys
// =============================================================================

/// Which slice of the worker flow a rendered artifact shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderKind {
    /// The whole process graph.
    Process,
    /// A single named subgraph.
    Subgraph,
    /// Condensed overview of all subgraphs.
    Overview,
    /// The subgraph containing the currently executing node.
    CurrentSubgraph,
}

impl RenderKind {
    /// Get a display label for the render kind.
    pub fn label(&self) -> &'static str {
        match self {
            RenderKind::Process => "Process",
            RenderKind::Subgraph => "Subgraph",
            RenderKind::Overview => "Overview",
            RenderKind::CurrentSubgraph => "Current subgraph",
        }
    }
}

/// Options that change how a graph description is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Omit the synthetic start marker.
    pub hide_start: bool,
    /// Omit the synthetic end marker.
    pub hide_end: bool,
    /// Render human-readable node labels instead of raw identifiers.
    pub show_labels: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            hide_start: false,
            hide_end: false,
            show_labels: true,
        }
    }
}

/// Cache key for rendered artifacts, deterministic over kind + subgraph + options.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Which slice of the flow is rendered.
    pub kind: RenderKind,
    /// Subgraph parameter for `Subgraph` / `CurrentSubgraph` kinds.
    pub subgraph: Option<String>,
    /// Render options baked into the artifact.
    pub options: RenderOptions,
}

impl CacheKey {
    /// Key for a plain, unparameterized render kind.
    pub fn new(kind: RenderKind) -> Self {
        Self {
            kind,
            subgraph: None,
            options: RenderOptions::default(),
        }
    }

    /// Key for a subgraph-parameterized render kind.
    pub fn subgraph(kind: RenderKind, subgraph: impl Into<String>) -> Self {
        Self {
            kind,
            subgraph: Some(subgraph.into()),
            options: RenderOptions::default(),
        }
    }

    /// Replace the render options.
    pub fn with_options(mut self, options: RenderOptions) -> Self {
        self.options = options;
        self
    }
}

// =============================================================================
// Flow Graph
// =============================================================================

/// A node in the worker's logical step graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    /// Logical identifier; matches `ExecutionEvent::node_id`.
    pub id: String,
    /// Human-readable label.
    pub label: String,
    /// Named subgraph this node belongs to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subgraph: Option<String>,
}

/// A directed edge between two flow nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEdge {
    /// Originating node identifier.
    pub from: String,
    /// Destination node identifier.
    pub to: String,
    /// Optional edge label (condition, branch name).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// The logical step-execution graph for one worker.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct FlowGraph {
    /// All step nodes.
    pub nodes: Vec<FlowNode>,
    /// All directed edges.
    pub edges: Vec<FlowEdge>,
}

impl FlowGraph {
    /// Creates an empty graph with no nodes or edges.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the number of nodes currently tracked.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the number of edges currently tracked.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Look up a node by its logical identifier.
    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The subgraph a node belongs to, if the node is known and tagged.
    pub fn subgraph_of(&self, node_id: &str) -> Option<&str> {
        self.node(node_id).and_then(|n| n.subgraph.as_deref())
    }

    /// All distinct subgraph names, in first-seen order.
    pub fn subgraph_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.nodes
            .iter()
            .filter_map(|n| n.subgraph.as_deref())
            .filter(|s| seen.insert(*s))
            .collect()
    }

    /// Ids of all nodes inside the named subgraph.
    pub fn subgraph_nodes(&self, subgraph: &str) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.subgraph.as_deref() == Some(subgraph))
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Convert to petgraph StableDiGraph for traversal/analysis.
    /// Returns the graph and a mapping from node id to NodeIndex.
    pub fn to_petgraph(&self) -> (StableDiGraph<FlowNode, ()>, HashMap<String, NodeIndex>) {
        let mut graph = StableDiGraph::new();
        let mut id_to_index = HashMap::new();

        for node in &self.nodes {
            let idx = graph.add_node(node.clone());
            id_to_index.insert(node.id.clone(), idx);
        }

        for edge in &self.edges {
            if let (Some(&from_idx), Some(&to_idx)) =
                (id_to_index.get(&edge.from), id_to_index.get(&edge.to))
            {
                graph.add_edge(from_idx, to_idx, ());
            }
        }

        (graph, id_to_index)
    }

    /// Node ids reachable from `start`, in breadth-first order (start included).
    /// Used to lay out a description deterministically from an entry node.
    pub fn reachable_from(&self, start: &str) -> Vec<String> {
        let (graph, id_to_index) = self.to_petgraph();
        let Some(&start_idx) = id_to_index.get(start) else {
            return Vec::new();
        };

        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::new();
        visited.insert(start_idx);
        queue.push_back(start_idx);

        while let Some(idx) = queue.pop_front() {
            order.push(graph[idx].id.clone());
            for neighbor in graph.neighbors(idx) {
                if visited.insert(neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }

        order
    }
}

// =============================================================================
// Session Readouts
// =============================================================================

/// Replay cursor readout exposed to surrounding UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayState {
    /// Selected run, if any.
    pub run_id: Option<String>,
    /// Cursor position; -1 means "before the first step".
    pub index: i64,
    /// Number of loaded steps.
    pub total: usize,
    /// Whether auto-advance is running.
    pub playing: bool,
}

/// Snapshot of everything the surrounding UI may read about the session.
///
/// One shared struct owned by the mode controller; components receive it by
/// reference instead of reaching for module-level globals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// Active viewing mode.
    pub mode: Mode,
    /// Worker whose flow is open.
    pub worker: WorkerRef,
    /// Which artifact the view currently shows.
    pub view: CacheKey,
    /// Node currently highlighted at the trail head, if any.
    pub current_node: Option<String>,
    /// Trail contents, head first.
    pub trail: Vec<String>,
    /// Replay cursor when the mode is `Replay`.
    pub replay: Option<ReplayState>,
    /// Number of artifacts currently cached.
    pub cache_entries: usize,
    /// Most recent surfaced failure, cleared on the next success.
    pub last_error: Option<String>,
}

impl SessionState {
    /// Fresh state for a newly opened worker in the given mode.
    pub fn new(mode: Mode, worker: WorkerRef) -> Self {
        Self {
            mode,
            worker,
            view: CacheKey::new(RenderKind::Process),
            current_node: None,
            trail: Vec::new(),
            replay: None,
            cache_entries: 0,
            last_error: None,
        }
    }
}
