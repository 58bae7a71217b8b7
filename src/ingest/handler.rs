use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};

use super::event::CommitEvent;
use crate::db::{Database, Post};
use crate::follows::FollowedSet;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

pub const DEFAULT_CHECKPOINT_EVERY: u64 = 1000;

/// The entry point the stream consumer calls for every commit: keeps posts
/// authored by followed accounts and advances the checkpoint.
///
/// Posts whose write failed are held by sequence number and retried on every
/// later commit. While any are held, the checkpoint stays below the oldest of
/// them, so a restart replays it from the stream.
pub struct CommitHandler {
    db: Database,
    followed: FollowedSet,
    service: String,
    checkpoint_every: i64,
    last_checkpoint: AtomicI64,
    unwritten: Mutex<BTreeMap<i64, Vec<Post>>>,
}

impl CommitHandler {
    pub fn new(
        db: Database,
        followed: FollowedSet,
        service: impl Into<String>,
        checkpoint_every: u64,
    ) -> Self {
        Self {
            db,
            followed,
            service: service.into(),
            checkpoint_every: i64::try_from(checkpoint_every.max(1)).unwrap_or(i64::MAX),
            last_checkpoint: AtomicI64::new(0),
            unwritten: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Stored stream position to resume from, if any.
    pub async fn resume_cursor(&self) -> Result<Option<i64>> {
        let cursor = self
            .db
            .get_cursor(&self.service)
            .await
            .with_context(|| format!("failed to read checkpoint for {}", self.service))?;
        if let Some(cursor) = cursor {
            self.last_checkpoint.fetch_max(cursor, Ordering::Relaxed);
        }
        Ok(cursor)
    }

    /// Sequence number of the oldest commit whose posts are not yet stored.
    pub fn oldest_unwritten(&self) -> Option<i64> {
        self.lock_unwritten().keys().next().copied()
    }

    /// Never fails: errors are logged so one bad commit cannot take down the
    /// consumer loop.
    pub async fn on_commit(&self, event: &CommitEvent) {
        if let Err(err) = self.handle_commit(event).await {
            log_error!(
                "failed to process commit seq {} from {} on {}: {err:#}",
                event.seq,
                event.repo,
                self.service
            );
        }
    }

    /// Returns how many new posts were stored for this commit.
    pub async fn handle_commit(&self, event: &CommitEvent) -> Result<usize> {
        self.retry_unwritten().await;

        let followed = self.followed.snapshot();
        let posts = if followed.contains(&event.repo) {
            event.created_posts()
        } else {
            Vec::new()
        };

        if !posts.is_empty() {
            let cursor = self.checkpoint_ceiling(event.seq);
            let written = self.db.record_commit(&posts, &self.service, cursor).await;
            let inserted = match written {
                Ok(inserted) => inserted,
                Err(err) => {
                    self.lock_unwritten().insert(event.seq, posts);
                    return Err(err);
                }
            };
            self.last_checkpoint.fetch_max(cursor, Ordering::Relaxed);
            log_info!(
                "stored {inserted}/{} posts from {} (seq {})",
                posts.len(),
                event.repo,
                event.seq
            );
            return Ok(inserted);
        }

        if self.checkpoint_due(event.seq) {
            let cursor = self.checkpoint_ceiling(event.seq);
            if cursor > self.last_checkpoint.load(Ordering::Relaxed) {
                self.db.set_cursor(&self.service, cursor).await?;
                self.last_checkpoint.fetch_max(cursor, Ordering::Relaxed);
            }
        }

        Ok(0)
    }

    async fn retry_unwritten(&self) {
        let pending = std::mem::take(&mut *self.lock_unwritten());
        if pending.is_empty() {
            return;
        }

        let mut still_failing = BTreeMap::new();
        for (seq, posts) in pending {
            match self.db.insert_posts(&posts).await {
                Ok(inserted) => {
                    log_info!("stored {inserted} held posts from seq {seq} on retry");
                }
                Err(err) => {
                    log_warn!("retry of held posts from seq {seq} failed: {err:#}");
                    still_failing.insert(seq, posts);
                }
            }
        }

        // Commits that failed while the lock was released are kept too.
        self.lock_unwritten().append(&mut still_failing);
    }

    /// Highest sequence number that may be checkpointed for a commit at `seq`.
    fn checkpoint_ceiling(&self, seq: i64) -> i64 {
        match self.oldest_unwritten() {
            Some(oldest) => seq.min(oldest - 1),
            None => seq,
        }
    }

    fn checkpoint_due(&self, seq: i64) -> bool {
        let last = self.last_checkpoint.load(Ordering::Relaxed);
        seq.saturating_sub(last) >= self.checkpoint_every
    }

    fn lock_unwritten(&self) -> std::sync::MutexGuard<'_, BTreeMap<i64, Vec<Post>>> {
        self.unwritten.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
