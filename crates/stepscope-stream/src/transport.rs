//! Transport contract for live event delivery, plus the HTTP implementation.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use stepscope_core::WorkerRef;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use crate::error::{StreamError, StreamResult};
use crate::types::{EventFrame, LiveSource, PollBatch};

/// A long-lived push channel of decoded event frames.
pub type PushStream = Pin<Box<dyn Stream<Item = StreamResult<EventFrame>> + Send>>;

/// How the multiplexer reaches an event source. Abstracted so tests can
/// script delivery without a network.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Open the push channel for a worker. Failing here is not fatal; the
    /// multiplexer falls back to pure polling.
    async fn open_push(&self, worker: &WorkerRef, source: LiveSource)
        -> StreamResult<PushStream>;

    /// Request one bounded batch of events at the given resume cursor.
    async fn poll(
        &self,
        worker: &WorkerRef,
        source: LiveSource,
        from_row_id: u64,
        limit: usize,
    ) -> StreamResult<PollBatch>;
}

/// HTTP/WebSocket transport against the event endpoints.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Transport rooted at `base_url`, e.g. `http://localhost:8800`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn ws_base(&self) -> String {
        self.base_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1)
    }
}

#[async_trait]
impl EventTransport for HttpTransport {
    async fn open_push(
        &self,
        worker: &WorkerRef,
        source: LiveSource,
    ) -> StreamResult<PushStream> {
        let url = format!(
            "{}/workers/{}/{}/stream",
            self.ws_base(),
            worker.id,
            source.path_segment()
        );

        let (ws, _) = connect_async(&url).await.map_err(|err| {
            debug!(%url, error = %err, "push channel unavailable");
            StreamError::Connect {
                url: url.clone(),
                message: err.to_string(),
            }
        })?;

        let stream = ws.filter_map(|message| async move {
            match message {
                Ok(WsMessage::Text(text)) => {
                    Some(serde_json::from_str::<EventFrame>(&text).map_err(StreamError::from))
                }
                // Close, ping/pong, and binary frames carry no events.
                Ok(_) => None,
                Err(err) => {
                    warn!(error = %err, "push channel error");
                    Some(Err(StreamError::from(err)))
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn poll(
        &self,
        worker: &WorkerRef,
        source: LiveSource,
        from_row_id: u64,
        limit: usize,
    ) -> StreamResult<PollBatch> {
        let url = format!(
            "{}/workers/{}/{}/events",
            self.base_url,
            worker.id,
            source.path_segment()
        );

        let batch = self
            .client
            .get(&url)
            .query(&[("from_row_id", from_row_id), ("limit", limit as u64)])
            .send()
            .await?
            .error_for_status()?
            .json::<PollBatch>()
            .await?;

        Ok(batch)
    }
}
