use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

// Set to true to log slow statements and worker lifecycle
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Writes sit on the completion path; anything slower is worth a warning.
const SLOW_TASK: Duration = Duration::from_millis(250);
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const WORKER_NAME: &str = "spadesk-db";

type DeskTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum WorkerCommand {
    Run { label: &'static str, task: DeskTask },
    Stop,
}

/// Owns the worker; stopping it on drop flushes every queued write first.
struct Worker {
    commands: mpsc::Sender<WorkerCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else { return };

        if let Err(err) = self.commands.send(WorkerCommand::Stop) {
            error!("Desk database worker already gone at shutdown: {err}");
        }
        if let Err(err) = handle.join() {
            error!("Desk database worker panicked: {err:?}");
        }
    }
}

/// Desk store backed by one SQLite file. Statements run in order on a single
/// worker thread, so a completion write never interleaves with another write.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    path: Arc<PathBuf>,
}

impl Database {
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create desk data directory {}", parent.display())
            })?;
        }

        let (commands, inbox) = mpsc::channel::<WorkerCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let worker_path = path.clone();

        let handle = thread::Builder::new()
            .name(WORKER_NAME.into())
            .spawn(move || {
                let mut conn = match open_desk_store(&worker_path) {
                    Ok(conn) => conn,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    return;
                }
                serve(&mut conn, inbox);
            })
            .context("failed to spawn desk database worker")?;

        ready_rx
            .recv()
            .context("desk database worker exited before it was ready")??;

        info!("Desk database ready at {}", path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                commands,
                handle: Mutex::new(Some(handle)),
            }),
            path: Arc::new(path),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Queues `task` on the worker and waits for its result. `label` names
    /// the statement in errors and slow-task warnings.
    pub async fn execute<F, T>(&self, label: &'static str, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let task: DeskTask = Box::new(move |conn| {
            if reply_tx.send(task(conn)).is_err() {
                log_debug!("Caller of {} stopped waiting for its result", label);
            }
        });

        self.worker
            .commands
            .send(WorkerCommand::Run { label, task })
            .map_err(|_| anyhow!("desk database worker is gone; cannot run {label}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("desk database worker stopped while running {label}"))?
    }
}

fn open_desk_store(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open desk database {}", path.display()))?;

    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        error!("Failed to enable WAL mode: {err}");
    }
    if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
        error!("Failed to enable foreign keys: {err}");
    }
    if let Err(err) = conn.busy_timeout(BUSY_TIMEOUT) {
        error!("Failed to set busy timeout: {err}");
    }

    run_migrations(&mut conn).context("failed to migrate desk schema")?;
    Ok(conn)
}

fn serve(conn: &mut Connection, inbox: mpsc::Receiver<WorkerCommand>) {
    let mut served: u64 = 0;
    while let Ok(command) = inbox.recv() {
        match command {
            WorkerCommand::Run { label, task } => {
                let started = Instant::now();
                task(conn);
                let elapsed = started.elapsed();
                if elapsed >= SLOW_TASK {
                    log_warn!("Slow desk statement {}: {:?}", label, elapsed);
                }
                served += 1;
            }
            WorkerCommand::Stop => break,
        }
    }
    log_debug!("Desk database worker stopping after {} statement(s)", served);
}
