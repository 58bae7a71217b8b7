use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::event::CommitEvent;
use super::handler::CommitHandler;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_info;

/// Feeds commits from the stream consumer into `handler` until the channel
/// closes or `cancel_token` fires. A commit already being written is finished
/// before the loop exits.
pub async fn ingest_loop(
    mut events: mpsc::Receiver<CommitEvent>,
    handler: Arc<CommitHandler>,
    cancel_token: CancellationToken,
) {
    let mut processed: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("ingest loop shutting down after {processed} commits");
                break;
            }
            event = events.recv() => match event {
                Some(event) => {
                    handler.on_commit(&event).await;
                    processed += 1;
                }
                None => {
                    log_info!("commit stream closed after {processed} commits");
                    break;
                }
            }
        }
    }
}
