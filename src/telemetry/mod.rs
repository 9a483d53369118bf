//! Per-attempt call metadata
//!
//! Every upstream attempt, success or failure, produces one append-only
//! row. Recording is fire-and-forget through a bounded channel into a
//! background writer; a full queue or a failed insert costs a debug log
//! line, never a request.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::AppResult;

/// One dispatch attempt's audit record
///
/// `generation_id` joins the retries of a single client request; `attempt`
/// distinguishes them. Field names are stable; reporting tools read these
/// rows directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallMetadata {
    pub id: i64,
    pub generation_id: String,
    pub request_id: String,
    pub user_id: i64,
    pub token_id: i64,
    pub channel_id: i64,
    pub model: String,
    pub api_path: String,
    pub is_stream: bool,
    pub status_code: u16,
    pub latency_ms: i64,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub attempt: u32,
    pub created_at: i64,
}

/// Append-only metadata store
#[async_trait]
pub trait TelemetryRepo: Send + Sync {
    async fn insert(&self, row: &CallMetadata) -> AppResult<()>;
}

/// Vec-backed store for tests and single-node runs
pub struct InMemoryTelemetryRepo {
    rows: std::sync::RwLock<Vec<CallMetadata>>,
}

impl InMemoryTelemetryRepo {
    pub fn new() -> Self {
        Self {
            rows: std::sync::RwLock::new(Vec::new()),
        }
    }

    /// Snapshot of everything recorded so far
    pub fn rows(&self) -> Vec<CallMetadata> {
        self.rows.read().unwrap().clone()
    }
}

impl Default for InMemoryTelemetryRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelemetryRepo for InMemoryTelemetryRepo {
    async fn insert(&self, row: &CallMetadata) -> AppResult<()> {
        let mut rows = self.rows.write().unwrap();
        let mut row = row.clone();
        row.id = rows.len() as i64 + 1;
        rows.push(row);
        Ok(())
    }
}

enum SinkMessage {
    Row(Box<CallMetadata>),
    Flush(oneshot::Sender<()>),
}

/// Fire-and-forget metadata writer
///
/// Rows flow through a bounded channel into a background task so inserts
/// never sit on the request path.
pub struct TelemetrySink {
    sender: mpsc::Sender<SinkMessage>,
}

impl TelemetrySink {
    /// Spawn the background writer
    pub fn new(repo: Arc<dyn TelemetryRepo>, buffer: usize) -> Self {
        let (sender, receiver) = mpsc::channel(buffer);
        tokio::spawn(Self::writer(repo, receiver));
        Self { sender }
    }

    /// Queue one row; drops (with a debug log) when the buffer is full
    pub fn record(&self, row: CallMetadata) {
        if let Err(e) = self.sender.try_send(SinkMessage::Row(Box::new(row))) {
            debug!(error = %e, "Telemetry row dropped, queue full");
        }
    }

    /// Wait until every row queued before this call has been written
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(SinkMessage::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn writer(repo: Arc<dyn TelemetryRepo>, mut receiver: mpsc::Receiver<SinkMessage>) {
        while let Some(message) = receiver.recv().await {
            match message {
                SinkMessage::Row(row) => {
                    if let Err(e) = repo.insert(&row).await {
                        debug!(
                            generation_id = %row.generation_id,
                            attempt = row.attempt,
                            error = %e,
                            "Telemetry insert failed"
                        );
                    }
                }
                SinkMessage::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
    }
}
