use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use log::{error, info, warn};
use rusqlite::Connection;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::migrations::run_migrations;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

/// One SQLite connection pinned to its own OS thread.
struct Worker {
    name: &'static str,
    sender: mpsc::Sender<DbCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let mut guard = match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to {} thread: {err}", self.name);
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join {} thread: {join_err:?}", self.name);
            }
        }
    }
}

impl Worker {
    fn spawn(
        name: &'static str,
        db_path: &Path,
        init: fn(&mut Connection) -> Result<()>,
    ) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.to_path_buf();

        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(
                            anyhow::Error::new(err).context("failed to open SQLite database")
                        ));
                        return;
                    }
                };

                if let Err(err) = conn.busy_timeout(BUSY_TIMEOUT) {
                    error!("Failed to set busy timeout on {name}: {err}");
                }

                if ready_tx.send(init(&mut conn)).is_err() {
                    error!("{name} initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => task(&mut conn),
                        DbCommand::Shutdown => break,
                    }
                }

                info!("{name} thread shutting down");
            })
            .with_context(|| format!("failed to spawn {name} thread"))?;

        let worker = Self {
            name,
            sender: command_tx,
            handle: Mutex::new(Some(handle)),
        };

        ready_rx
            .recv()
            .with_context(|| format!("{name} exited before signaling readiness"))??;

        Ok(worker)
    }

    async fn run<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        self.sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to {}: {err}", self.name))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("{} terminated unexpectedly", self.name))?
    }
}

fn init_writer(conn: &mut Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("failed to enable WAL mode")?;
    run_migrations(conn).context("failed to run database migrations")
}

fn init_reader(conn: &mut Connection) -> Result<()> {
    conn.pragma_update(None, "query_only", "ON")
        .context("failed to mark reader connection query-only")
}

/// Handle to the post/subscription store.
///
/// Writes (ingestion, checkpoints) go through a dedicated writer connection and
/// reads (feed queries) through a separate reader connection, so a slow feed
/// query never queues behind ingestion and vice versa. WAL mode lets the reader
/// see every committed write.
#[derive(Clone)]
pub struct Database {
    writer: Arc<Worker>,
    reader: Arc<Worker>,
    db_path: Arc<PathBuf>,
}

impl Database {
    /// Opens the store once. Blocks the calling thread until both connections are
    /// ready and the schema is in place.
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }

        let writer = Worker::spawn("feedgen-db-writer", &db_path, init_writer)?;
        let reader = Worker::spawn("feedgen-db-reader", &db_path, init_reader)?;

        info!("Database initialized at {}", db_path.display());

        Ok(Self {
            writer: Arc::new(writer),
            reader: Arc::new(reader),
            db_path: Arc::new(db_path),
        })
    }

    /// Opens the store, retrying up to `retries` times with a fixed `delay`
    /// between attempts. Cancelling `cancel` aborts the wait between attempts.
    pub async fn connect(
        db_path: PathBuf,
        retries: u32,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let attempts = retries.max(1);

        for attempt in 1..=attempts {
            info!("Attempting to open the database (attempt {attempt}/{attempts})...");

            let path = db_path.clone();
            let opened = tokio::task::spawn_blocking(move || Database::new(path))
                .await
                .context("database open task panicked")?;

            match opened {
                Ok(database) => return Ok(database),
                Err(err) => {
                    warn!("Database connection failed: {err:#}");
                    if attempt == attempts {
                        break;
                    }
                    info!("Retrying in {} seconds...", delay.as_secs());
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => bail!("database connection aborted"),
                    }
                }
            }
        }

        error!("Max retries reached. Could not open the database.");
        bail!(
            "could not open database at {} after {attempts} attempts",
            db_path.display()
        )
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Runs `task` on the writer connection.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.writer.run(task).await
    }

    /// Runs `task` on the read-only connection.
    pub async fn read<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.reader.run(task).await
    }
}
