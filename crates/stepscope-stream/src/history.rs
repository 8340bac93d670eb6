//! Run and step history: the provider contract and its HTTP client.

use async_trait::async_trait;
use stepscope_core::{FlowGraph, ReplayStep, RunSummary, WorkerRef};

use crate::error::StreamResult;

/// Upper bound on the steps loaded for one replay run.
pub const MAX_REPLAY_STEPS: usize = 1000;

/// Source of recorded runs and their steps.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// List recorded runs for a worker, newest first.
    async fn list_runs(&self, worker: &WorkerRef) -> StreamResult<Vec<RunSummary>>;

    /// Load up to `limit` steps of one run, in execution order.
    async fn list_steps(
        &self,
        worker: &WorkerRef,
        run_id: &str,
        limit: usize,
    ) -> StreamResult<Vec<ReplayStep>>;
}

/// HTTP client for the run/step history endpoints.
#[derive(Debug, Clone)]
pub struct HttpHistoryClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpHistoryClient {
    /// Client rooted at `base_url`, e.g. `http://localhost:8800`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Fetch the worker's logical step graph.
    pub async fn fetch_flow(&self, worker: &WorkerRef) -> StreamResult<FlowGraph> {
        let url = format!("{}/workers/{}/flow", self.base_url, worker.id);
        let flow = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<FlowGraph>()
            .await?;
        Ok(flow)
    }
}

#[async_trait]
impl HistoryProvider for HttpHistoryClient {
    async fn list_runs(&self, worker: &WorkerRef) -> StreamResult<Vec<RunSummary>> {
        let url = format!("{}/workers/{}/runs", self.base_url, worker.id);
        let runs = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<RunSummary>>()
            .await?;
        Ok(runs)
    }

    async fn list_steps(
        &self,
        worker: &WorkerRef,
        run_id: &str,
        limit: usize,
    ) -> StreamResult<Vec<ReplayStep>> {
        let url = format!(
            "{}/workers/{}/runs/{}/steps",
            self.base_url, worker.id, run_id
        );
        let steps = self
            .client
            .get(&url)
            .query(&[("limit", limit.min(MAX_REPLAY_STEPS) as u64)])
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<ReplayStep>>()
            .await?;
        Ok(steps)
    }
}
