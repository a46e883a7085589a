//! Worker transport: spawn a worker process and produce a ready-to-use
//! duplex byte stream connected to it.
//!
//! Two strategies:
//! - **pipe** (unix): the worker's stdin/stdout are the protocol stream.
//! - **socket** (fallback, and always available for explicit use): the
//!   worker connects back to a loopback listener whose address it receives
//!   as a startup argument.

use std::path::PathBuf;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

use crate::error::Error;

#[cfg(unix)]
pub mod pipe;
pub mod socket;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An open duplex stream plus the worker process backing it.
///
/// Exclusively owned by one command channel for its whole lifetime. The
/// child is spawned with `kill_on_drop`, so abandoning a transport (or an
/// in-flight launch holding one) terminates the worker.
pub struct Transport {
    pub(crate) reader: BoxedReader,
    pub(crate) writer: BoxedWriter,
    pub(crate) child: Child,
}

impl Transport {
    /// OS pid of the worker, if it is still running.
    pub fn worker_id(&self) -> Option<u32> {
        self.child.id()
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("worker_id", &self.worker_id())
            .finish_non_exhaustive()
    }
}

/// What the launcher tells the worker about the database. Flags are the
/// engine's own bit values, passed through opaquely.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub database: String,
    pub flags: u32,
}

impl LaunchSpec {
    fn apply(&self, cmd: &mut Command) {
        cmd.arg("--database").arg(&self.database);
        cmd.arg("--flags").arg(self.flags.to_string());
    }
}

/// Extension point for different worker spawn strategies.
///
/// The spawner owns the program and any bootstrap arguments (packaged
/// distributions can substitute their own loader invocation here); the
/// launcher owns stdio wiring and protocol arguments.
pub trait WorkerSpawner: Send + Sync {
    fn command(&self) -> Command;
}

/// Runs a worker executable by path.
pub struct BinarySpawner {
    program: PathBuf,
}

impl BinarySpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl WorkerSpawner for BinarySpawner {
    fn command(&self) -> Command {
        Command::new(&self.program)
    }
}

/// Launch a worker and establish its transport, choosing the strategy by
/// platform: inherited pipes where process pipes are reliable, the loopback
/// socket handshake elsewhere.
///
/// Cancellable: dropping the returned future terminates the spawned process
/// and closes any listener, leaving nothing behind.
pub async fn launch(spawner: &dyn WorkerSpawner, spec: &LaunchSpec) -> Result<Transport, Error> {
    #[cfg(unix)]
    {
        pipe::launch(spawner, spec).await
    }
    #[cfg(not(unix))]
    {
        socket::launch(spawner, spec).await
    }
}
