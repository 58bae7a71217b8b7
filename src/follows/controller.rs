use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{info, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::loop_worker::{follows_loop, FollowsSynchronizer};

/// Owns the background follows refresh task.
pub struct FollowsController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl Default for FollowsController {
    fn default() -> Self {
        Self::new()
    }
}

impl FollowsController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawns the refresh loop and returns once its first refresh attempt has
    /// finished, so ingestion starts against a populated set whenever the API
    /// is reachable. Cancelling `cancel_token` (or a parent of it) ends both
    /// that wait and the loop.
    pub async fn start(
        &mut self,
        synchronizer: Arc<FollowsSynchronizer>,
        interval: Duration,
        cancel_token: CancellationToken,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("follows refresh already running");
        }

        let (ready_tx, ready_rx) = oneshot::channel();

        let handle = tokio::spawn(follows_loop(
            Arc::clone(&synchronizer),
            cancel_token.clone(),
            interval,
            Some(ready_tx),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);

        if ready_rx.await.is_err() {
            warn!("follows loop exited before completing its first refresh");
            return Ok(());
        }

        info!(
            "Started follows refresh every {}s ({} accounts followed)",
            interval.as_secs(),
            synchronizer.followed().len()
        );
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("follows loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}
