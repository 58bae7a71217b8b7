use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::algos::AlgorithmRegistry;
use crate::db::Database;
use crate::follows::{FollowedSet, FollowsController, FollowsSynchronizer, GraphClient, XrpcClient};
use crate::ingest::{CommitEvent, CommitHandler, IngestController, DEFAULT_QUEUE_CAPACITY};
use crate::server::{self, hosts_did_document, AppState};
use crate::settings::Settings;

/// A running feed generator: storage, follows refresh and ingestion, ready to
/// serve HTTP.
pub struct Service {
    settings: Settings,
    db: Database,
    registry: Arc<AlgorithmRegistry>,
    followed: FollowedSet,
    graph: Arc<dyn GraphClient>,
    follows: FollowsController,
    ingest: IngestController,
    commits: mpsc::Sender<CommitEvent>,
    resume_cursor: Option<i64>,
    shutdown: CancellationToken,
}

impl Service {
    pub async fn start(settings: Settings, shutdown: CancellationToken) -> Result<Self> {
        let client = XrpcClient::new(&settings.xrpc_config())
            .context("failed to build social-graph API client")?;
        Self::start_with_client(settings, Arc::new(client), shutdown).await
    }

    /// Brings the pieces up in dependency order: storage, then one follows
    /// refresh, then ingestion. Storage failure after all retries is fatal.
    pub async fn start_with_client(
        settings: Settings,
        client: Arc<dyn GraphClient>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let db = Database::connect(
            settings.db_path.clone(),
            settings.db_retries,
            settings.db_retry_delay,
            &shutdown,
        )
        .await
        .context("could not connect to the database")?;

        let registry = Arc::new(AlgorithmRegistry::with_builtin(&settings.service_did));
        if !hosts_did_document(&settings.service_did, &settings.hostname) {
            info!(
                "{} is not rooted at {}; /.well-known/did.json will answer 404",
                settings.service_did, settings.hostname
            );
        }
        if registry.is_empty() {
            warn!("No feed algorithms registered; every feed request will be rejected");
        }

        let followed = FollowedSet::new();
        let synchronizer = Arc::new(FollowsSynchronizer::new(
            Arc::clone(&client),
            settings.handle.clone(),
            followed.clone(),
        ));
        let mut follows = FollowsController::new();
        follows
            .start(
                synchronizer,
                settings.follows_refresh_interval,
                shutdown.child_token(),
            )
            .await?;
        if shutdown.is_cancelled() {
            follows.stop().await?;
            bail!("startup interrupted by shutdown request");
        }

        let handler = Arc::new(CommitHandler::new(
            db.clone(),
            followed.clone(),
            settings.stream_service.clone(),
            settings.checkpoint_every,
        ));
        let resume_cursor = match handler.resume_cursor().await {
            Ok(cursor) => cursor,
            Err(err) => {
                warn!("Could not read stream checkpoint, starting from live: {err:#}");
                None
            }
        };
        match resume_cursor {
            Some(cursor) => info!("Resuming {} from cursor {cursor}", settings.stream_service),
            None => info!("No checkpoint for {}, starting from live", settings.stream_service),
        }

        let mut ingest = IngestController::new();
        let commits = ingest.start(handler, DEFAULT_QUEUE_CAPACITY)?;

        Ok(Self {
            settings,
            db,
            registry,
            followed,
            graph: client,
            follows,
            ingest,
            commits,
            resume_cursor,
            shutdown,
        })
    }

    /// Where the firehose consumer delivers decoded commits.
    pub fn commit_sender(&self) -> mpsc::Sender<CommitEvent> {
        self.commits.clone()
    }

    pub fn resume_cursor(&self) -> Option<i64> {
        self.resume_cursor
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn followed(&self) -> &FollowedSet {
        &self.followed
    }

    pub fn registry(&self) -> &Arc<AlgorithmRegistry> {
        &self.registry
    }

    /// Serves HTTP on `listener` until the shutdown token fires.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let state = AppState::new(
            self.db.clone(),
            Arc::clone(&self.registry),
            self.settings.hostname.clone(),
        )
        .with_graph_client(Arc::clone(&self.graph));
        server::serve(listener, state, self.shutdown.clone()).await
    }

    /// Signals every background task and waits for each to exit.
    pub async fn stop(mut self) -> Result<()> {
        info!("Stopping feed generator...");
        self.shutdown.cancel();

        let ingest = self.ingest.stop().await;
        if let Err(err) = &ingest {
            error!("Ingest loop did not stop cleanly: {err:#}");
        }
        let follows = self.follows.stop().await;
        if let Err(err) = &follows {
            error!("Follows loop did not stop cleanly: {err:#}");
        }

        info!("Feed generator stopped");
        ingest.and(follows)
    }
}
