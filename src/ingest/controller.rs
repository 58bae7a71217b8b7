use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::event::CommitEvent;
use super::handler::CommitHandler;
use super::loop_worker::ingest_loop;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Owns the ingestion task. The stream consumer pushes decoded commits into
/// the sender returned by [`IngestController::start`].
pub struct IngestController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl Default for IngestController {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn start(
        &mut self,
        handler: Arc<CommitHandler>,
        capacity: usize,
    ) -> Result<mpsc::Sender<CommitEvent>> {
        if self.handle.is_some() {
            bail!("ingestion already active");
        }

        let cancel_token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(capacity.max(1));

        info!("Starting commit ingestion for {}", handler.service());
        let handle = tokio::spawn(ingest_loop(rx, handler, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(tx)
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("ingest loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}
