use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::{bail, Context, Result};
use tokio::sync::oneshot;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::client::{GraphClient, MAX_PAGE_LIMIT};
use super::followed_set::FollowedSet;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(900);
const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(10);

/// Rebuilds the followed set from the social-graph API.
pub struct FollowsSynchronizer {
    client: Arc<dyn GraphClient>,
    actor: String,
    followed: FollowedSet,
    cycles: AtomicU64,
}

impl FollowsSynchronizer {
    pub fn new(client: Arc<dyn GraphClient>, actor: impl Into<String>, followed: FollowedSet) -> Self {
        Self {
            client,
            actor: actor.into(),
            followed,
            cycles: AtomicU64::new(0),
        }
    }

    pub fn followed(&self) -> &FollowedSet {
        &self.followed
    }

    /// Runs one full refresh cycle and publishes the result. On failure the
    /// previously published set stays in place and the error is returned after
    /// being logged.
    pub async fn refresh_once(&self) -> Result<usize> {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        log_info!("follows refresh cycle {cycle}: fetching accounts followed by @{}", self.actor);

        match self.fetch_all(cycle).await {
            Ok(dids) => {
                let total = dids.len();
                self.followed.publish(dids);
                log_info!("follows refresh cycle {cycle}: published {total} followed accounts for @{}", self.actor);
                Ok(total)
            }
            Err(err) => {
                log_error!(
                    "follows refresh cycle {cycle} for @{} failed, keeping {} previously published accounts: {err:#}",
                    self.actor,
                    self.followed.len()
                );
                Err(err)
            }
        }
    }

    async fn fetch_all(&self, cycle: u64) -> Result<HashSet<String>> {
        self.client.login().await.context("login failed")?;

        let expected = self
            .client
            .follows_count(&self.actor)
            .await
            .context("profile lookup failed")?;
        if let Some(expected) = expected {
            log_info!("follows refresh cycle {cycle}: @{} follows {expected} accounts, fetching pages", self.actor);
        }

        let mut dids = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let page = self
                .client
                .get_follows(&self.actor, MAX_PAGE_LIMIT, cursor.as_deref())
                .await
                .with_context(|| format!("fetching follows page {} failed", pages + 1))?;
            pages += 1;

            dids.extend(page.follows.into_iter().map(|follow| follow.did));

            match page.cursor {
                Some(next) if !next.is_empty() => {
                    if cursor.as_deref() == Some(next.as_str()) {
                        bail!("API returned the same page cursor twice ({next})");
                    }
                    cursor = Some(next);
                }
                _ => break,
            }
        }

        if let Some(expected) = expected {
            if expected != dids.len() as u64 {
                log_warn!(
                    "follows refresh cycle {cycle}: profile reports {expected} follows but {pages} pages yielded {}",
                    dids.len()
                );
            }
        }

        Ok(dids)
    }
}

/// Refreshes immediately, then waits `interval` after each refresh finishes,
/// until `cancel_token` fires. `ready` is signalled once the first refresh
/// attempt has finished, whether it succeeded or not.
pub async fn follows_loop(
    synchronizer: Arc<FollowsSynchronizer>,
    cancel_token: CancellationToken,
    interval: Duration,
    ready: Option<oneshot::Sender<()>>,
) {
    let mut ready = ready;
    let interval = interval.max(MIN_REFRESH_INTERVAL);

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("follows refresh abandoned, shutdown requested");
                break;
            }
            // Failures are logged by refresh_once; the next cycle retries.
            _ = synchronizer.refresh_once() => {}
        }

        if let Some(tx) = ready.take() {
            let _ = tx.send(());
        }

        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("follows loop shutting down");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::follows::client::{Follow, FollowsPage, GraphError};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Serves scripted pages in order; `None` in the script means "fail here".
    pub(crate) struct ScriptedClient {
        pages: Mutex<VecDeque<Option<FollowsPage>>>,
        pub(crate) logins: AtomicU64,
    }

    impl ScriptedClient {
        pub(crate) fn new(pages: Vec<Option<FollowsPage>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                logins: AtomicU64::new(0),
            }
        }

        pub(crate) fn push(&self, page: Option<FollowsPage>) {
            self.pages.lock().unwrap().push_back(page);
        }
    }

    pub(crate) fn page(dids: &[&str], cursor: Option<&str>) -> FollowsPage {
        FollowsPage {
            follows: dids
                .iter()
                .map(|did| Follow {
                    did: did.to_string(),
                    handle: None,
                })
                .collect(),
            cursor: cursor.map(str::to_string),
        }
    }

    #[async_trait]
    impl GraphClient for ScriptedClient {
        async fn login(&self) -> Result<(), GraphError> {
            self.logins.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn follows_count(&self, _actor: &str) -> Result<Option<u64>, GraphError> {
            Ok(None)
        }

        async fn get_follows(
            &self,
            _actor: &str,
            limit: u8,
            _cursor: Option<&str>,
        ) -> Result<FollowsPage, GraphError> {
            assert!(limit <= MAX_PAGE_LIMIT);
            match self.pages.lock().unwrap().pop_front() {
                Some(Some(page)) => Ok(page),
                _ => Err(GraphError::Api {
                    status: 502,
                    message: "upstream unavailable".into(),
                }),
            }
        }

        async fn get_posts(&self, _uris: &[String]) -> Result<Vec<serde_json::Value>, GraphError> {
            Ok(Vec::new())
        }
    }

    /// Decodes a fixed response body the way the HTTP client does.
    struct RawBodyClient(&'static str);

    #[async_trait]
    impl GraphClient for RawBodyClient {
        async fn login(&self) -> Result<(), GraphError> {
            Ok(())
        }

        async fn follows_count(&self, _actor: &str) -> Result<Option<u64>, GraphError> {
            Ok(None)
        }

        async fn get_follows(
            &self,
            _actor: &str,
            _limit: u8,
            _cursor: Option<&str>,
        ) -> Result<FollowsPage, GraphError> {
            serde_json::from_str(self.0).map_err(|err| GraphError::Parse(err.to_string()))
        }

        async fn get_posts(&self, _uris: &[String]) -> Result<Vec<serde_json::Value>, GraphError> {
            Ok(Vec::new())
        }
    }

    /// Every page takes `delay` to arrive; records when each request began.
    struct SlowClient {
        delay: Duration,
        started: Mutex<Vec<tokio::time::Instant>>,
    }

    #[async_trait]
    impl GraphClient for SlowClient {
        async fn login(&self) -> Result<(), GraphError> {
            Ok(())
        }

        async fn follows_count(&self, _actor: &str) -> Result<Option<u64>, GraphError> {
            Ok(None)
        }

        async fn get_follows(
            &self,
            _actor: &str,
            _limit: u8,
            _cursor: Option<&str>,
        ) -> Result<FollowsPage, GraphError> {
            self.started.lock().unwrap().push(tokio::time::Instant::now());
            tokio::time::sleep(self.delay).await;
            Ok(page(&["did:a"], None))
        }

        async fn get_posts(&self, _uris: &[String]) -> Result<Vec<serde_json::Value>, GraphError> {
            Ok(Vec::new())
        }
    }

    fn names(followed: &FollowedSet) -> Vec<String> {
        let mut all: Vec<_> = followed.snapshot().iter().cloned().collect();
        all.sort();
        all
    }

    #[tokio::test]
    async fn refresh_collects_every_page() {
        let client = Arc::new(ScriptedClient::new(vec![
            Some(page(&["did:a", "did:b"], Some("p2"))),
            Some(page(&["did:c"], Some("p3"))),
            Some(page(&["did:d"], None)),
        ]));
        let sync = FollowsSynchronizer::new(client.clone(), "me.test", FollowedSet::new());

        assert_eq!(sync.refresh_once().await.unwrap(), 4);
        assert_eq!(names(sync.followed()), vec!["did:a", "did:b", "did:c", "did:d"]);
        assert_eq!(client.logins.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn failure_mid_pagination_keeps_previous_set() {
        let followed = FollowedSet::new();
        followed.publish(["did:a", "did:b"].iter().map(|s| s.to_string()).collect());

        let client = Arc::new(ScriptedClient::new(vec![
            Some(page(&["did:x"], Some("p2"))),
            None,
        ]));
        let sync = FollowsSynchronizer::new(client, "me.test", followed.clone());

        assert!(sync.refresh_once().await.is_err());
        assert_eq!(names(&followed), vec!["did:a", "did:b"]);
    }

    #[tokio::test]
    async fn body_without_follows_keeps_previous_set() {
        let followed = FollowedSet::new();
        followed.publish(["did:a", "did:b"].iter().map(|s| s.to_string()).collect());

        let sync = FollowsSynchronizer::new(
            Arc::new(RawBodyClient(r#"{"error": "oops"}"#)),
            "me.test",
            followed.clone(),
        );

        assert!(sync.refresh_once().await.is_err());
        assert_eq!(names(&followed), vec!["did:a", "did:b"]);
    }

    #[tokio::test]
    async fn empty_follows_list_is_published() {
        let followed = FollowedSet::new();
        followed.publish(["did:a"].iter().map(|s| s.to_string()).collect());

        let sync = FollowsSynchronizer::new(
            Arc::new(RawBodyClient(r#"{"follows": []}"#)),
            "me.test",
            followed.clone(),
        );

        assert_eq!(sync.refresh_once().await.unwrap(), 0);
        assert!(followed.is_empty());
    }

    #[tokio::test]
    async fn repeated_cursor_aborts_cycle() {
        let followed = FollowedSet::new();
        followed.publish(["did:a"].iter().map(|s| s.to_string()).collect());

        let client = Arc::new(ScriptedClient::new(vec![
            Some(page(&["did:x"], Some("same"))),
            Some(page(&["did:y"], Some("same"))),
        ]));
        let sync = FollowsSynchronizer::new(client, "me.test", followed.clone());

        assert!(sync.refresh_once().await.is_err());
        assert_eq!(names(&followed), vec!["did:a"]);
    }

    #[tokio::test]
    async fn loop_signals_ready_and_stops_on_cancel() {
        let client = Arc::new(ScriptedClient::new(vec![Some(page(&["did:a"], None))]));
        let sync = Arc::new(FollowsSynchronizer::new(client, "me.test", FollowedSet::new()));
        let token = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();

        let handle = tokio::spawn(follows_loop(
            sync.clone(),
            token.clone(),
            Duration::from_secs(3600),
            Some(ready_tx),
        ));

        ready_rx.await.unwrap();
        assert!(sync.followed().contains("did:a"));

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop did not stop promptly")
            .unwrap();
    }

    #[tokio::test]
    async fn loop_keeps_refreshing_on_interval() {
        let client = Arc::new(ScriptedClient::new(vec![Some(page(&["did:a"], None))]));
        let sync = Arc::new(FollowsSynchronizer::new(client.clone(), "me.test", FollowedSet::new()));
        let token = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();

        let handle = tokio::spawn(follows_loop(
            sync.clone(),
            token.clone(),
            Duration::from_millis(20),
            Some(ready_tx),
        ));
        ready_rx.await.unwrap();

        client.push(Some(page(&["did:b"], None)));
        let mut replaced = false;
        for _ in 0..100 {
            if sync.followed().contains("did:b") {
                replaced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        token.cancel();
        handle.await.unwrap();
        assert!(replaced);
        assert!(!sync.followed().contains("did:a"));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_starts_after_refresh_finishes() {
        let client = Arc::new(SlowClient {
            delay: Duration::from_secs(60),
            started: Mutex::new(Vec::new()),
        });
        let sync = Arc::new(FollowsSynchronizer::new(client.clone(), "me.test", FollowedSet::new()));
        let token = CancellationToken::new();

        let handle = tokio::spawn(follows_loop(
            sync,
            token.clone(),
            Duration::from_secs(100),
            None,
        ));

        while client.started.lock().unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        token.cancel();
        handle.await.unwrap();

        let started = client.started.lock().unwrap();
        assert!(started[1] - started[0] >= Duration::from_secs(160));
    }
}
