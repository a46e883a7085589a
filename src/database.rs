//! Database handles.
//!
//! One capability interface, two implementations selected at construction
//! time: worker-backed (lazy, the default when a worker is configured) and
//! direct (in-process fallback, no worker at all). Callers cannot tell them
//! apart by the operations they expose.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::config::{DbPath, OpenFlags, OpenOptions, WorkerMode};
use crate::engine;
use crate::error::Error;
use crate::lazy::LazyConnection;
use crate::transport::{BinarySpawner, LaunchSpec, WorkerSpawner};

/// The capability every database variant implements.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, Error>;
    async fn close(&self) -> Result<(), Error>;
}

/// A database handle whose operations never block the calling task.
#[derive(Clone)]
pub struct Database {
    backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Open a handle according to `options`.
    ///
    /// With a worker configured this returns immediately; the worker is
    /// launched lazily on the first command. Without one, the engine is
    /// opened in-process right here, so open errors surface now.
    pub async fn open(options: OpenOptions) -> Result<Database, Error> {
        let path = options
            .path
            .clone()
            .resolved()
            .map_err(|e| Error::Spawn(format!("cannot resolve database path: {e}")))?;

        let backend: Arc<dyn Backend> = match &options.worker {
            Some(mode) => {
                let spawner: Arc<dyn WorkerSpawner> = match mode {
                    WorkerMode::Binary(program) => Arc::new(BinarySpawner::new(program)),
                    WorkerMode::Spawner(custom) => Arc::clone(custom),
                };
                let spec = LaunchSpec {
                    database: path.wire(),
                    flags: options.flags.bits(),
                };
                Arc::new(LazyBackend {
                    conn: LazyConnection::new(spawner, spec, options.idle),
                })
            }
            None => Arc::new(DirectBackend::open(path, options.flags).await?),
        };

        Ok(Database { backend })
    }

    /// Raw method dispatch. The typed helpers below cover the common cases.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, Error> {
        self.backend.call(method, args).await
    }

    /// Execute a batch of statements, discarding any rows.
    pub async fn exec(&self, sql: &str) -> Result<(), Error> {
        self.backend.call("exec", vec![json!(sql)]).await.map(|_| ())
    }

    /// Execute one statement, returning `{changes, last_insert_rowid}`.
    pub async fn run(&self, sql: &str, params: Vec<Value>) -> Result<Value, Error> {
        let mut args = vec![json!(sql)];
        args.extend(params);
        self.backend.call("run", args).await
    }

    /// Run a query, returning `{columns, rows}`.
    pub async fn query(&self, sql: &str, params: Vec<Value>) -> Result<Value, Error> {
        let mut args = vec![json!(sql)];
        args.extend(params);
        self.backend.call("query", args).await
    }

    /// Process id of whatever executes engine calls for this handle: the
    /// worker's pid, or this process in direct mode.
    pub async fn engine_pid(&self) -> Result<u32, Error> {
        let value = self.backend.call("pid", vec![]).await?;
        value.as_u64().map(|pid| pid as u32).ok_or(Error::Command {
            code: "BAD_RESPONSE".to_string(),
            message: "pid was not an integer".to_string(),
        })
    }

    /// Terminal close. Lazy handles stop launching workers and shut down a
    /// running one; direct handles drop the engine connection.
    pub async fn close(&self) -> Result<(), Error> {
        self.backend.close().await
    }
}

struct LazyBackend {
    conn: LazyConnection,
}

#[async_trait]
impl Backend for LazyBackend {
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, Error> {
        self.conn.call(method, args).await
    }

    async fn close(&self) -> Result<(), Error> {
        self.conn.close().await
    }
}

/// In-process fallback: same operations, no worker. Engine calls run on the
/// blocking pool so the async caller still never blocks.
struct DirectBackend {
    conn: Arc<Mutex<Option<rusqlite::Connection>>>,
}

impl DirectBackend {
    async fn open(path: DbPath, flags: OpenFlags) -> Result<Self, Error> {
        let conn = tokio::task::spawn_blocking(move || engine::open(&path, flags))
            .await
            .map_err(internal)??;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }
}

#[async_trait]
impl Backend for DirectBackend {
    async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, Error> {
        let shared = Arc::clone(&self.conn);
        let method = method.to_string();
        tokio::task::spawn_blocking(move || {
            let guard = lock(&shared);
            match guard.as_ref() {
                Some(conn) => engine::dispatch(conn, &method, &args).map_err(Error::from),
                None => Err(Error::Closed),
            }
        })
        .await
        .map_err(internal)?
    }

    async fn close(&self) -> Result<(), Error> {
        let shared = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            // Dropping the connection closes the engine.
            lock(&shared).take();
        })
        .await
        .map_err(internal)?;
        Ok(())
    }
}

fn lock(
    shared: &Mutex<Option<rusqlite::Connection>>,
) -> std::sync::MutexGuard<'_, Option<rusqlite::Connection>> {
    match shared.lock() {
        Ok(guard) => guard,
        // A panic mid-call cannot leave the engine handle half-updated;
        // recover the guard rather than propagating the poison.
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn internal(err: tokio::task::JoinError) -> Error {
    Error::Command {
        code: "INTERNAL".to_string(),
        message: format!("engine task failed: {err}"),
    }
}
