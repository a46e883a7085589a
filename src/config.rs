//! Open-time configuration: database location, open flags, worker selection
//! and idle teardown. Everything is explicit — there are no process-global
//! defaults.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transport::WorkerSpawner;

/// Marker for an in-memory database.
pub const MEMORY_MARKER: &str = ":memory:";

/// Where the engine stores data.
///
/// The two markers mirror the engine's own conventions: `:memory:` is a
/// private in-memory database, and the empty string is a private temporary
/// on-disk database that is deleted on close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbPath {
    Memory,
    Temporary,
    File(PathBuf),
}

impl DbPath {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "" => DbPath::Temporary,
            MEMORY_MARKER => DbPath::Memory,
            path => DbPath::File(PathBuf::from(path)),
        }
    }

    /// Resolve a relative file path against the parent's current working
    /// directory. The worker has its own working directory, so the string
    /// handed to it must not be ambiguous about which one applies.
    pub fn resolved(self) -> std::io::Result<Self> {
        match self {
            DbPath::File(path) if path.is_relative() => {
                let cwd = std::env::current_dir()?;
                Ok(DbPath::File(cwd.join(path)))
            }
            other => Ok(other),
        }
    }

    /// The string form handed to the worker (or the engine, in direct mode).
    pub fn wire(&self) -> String {
        match self {
            DbPath::Memory => MEMORY_MARKER.to_string(),
            DbPath::Temporary => String::new(),
            DbPath::File(path) => path.to_string_lossy().into_owned(),
        }
    }
}

impl From<&str> for DbPath {
    fn from(raw: &str) -> Self {
        DbPath::parse(raw)
    }
}

impl From<String> for DbPath {
    fn from(raw: String) -> Self {
        DbPath::parse(&raw)
    }
}

impl From<&Path> for DbPath {
    fn from(path: &Path) -> Self {
        DbPath::File(path.to_path_buf())
    }
}

impl From<PathBuf> for DbPath {
    fn from(path: PathBuf) -> Self {
        DbPath::File(path)
    }
}

/// Engine open flags, passed through to the worker opaquely as the engine's
/// own bit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpenFlags(u32);

impl OpenFlags {
    pub const READ_ONLY: OpenFlags = OpenFlags(0x0000_0001);
    pub const READ_WRITE: OpenFlags = OpenFlags(0x0000_0002);
    pub const CREATE: OpenFlags = OpenFlags(0x0000_0004);

    pub const fn empty() -> Self {
        OpenFlags(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        OpenFlags(bits)
    }

    pub const fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for OpenFlags {
    fn default() -> Self {
        OpenFlags::READ_WRITE | OpenFlags::CREATE
    }
}

impl std::ops::BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

/// How the worker process is started, if one is used at all.
#[derive(Clone)]
pub(crate) enum WorkerMode {
    Binary(PathBuf),
    Spawner(Arc<dyn WorkerSpawner>),
}

/// Builder for database handles.
///
/// Without a worker the handle runs the engine in-process; with one, engine
/// calls are offloaded to the worker and the connection is established
/// lazily on first use.
#[derive(Clone)]
pub struct OpenOptions {
    pub(crate) path: DbPath,
    pub(crate) flags: OpenFlags,
    pub(crate) idle: Option<Duration>,
    pub(crate) worker: Option<WorkerMode>,
}

impl OpenOptions {
    pub fn new(path: impl Into<DbPath>) -> Self {
        Self {
            path: path.into(),
            flags: OpenFlags::default(),
            idle: None,
            worker: None,
        }
    }

    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Tear down an unused worker after `secs` seconds. Non-positive values
    /// disable automatic teardown (the default).
    pub fn idle_secs(mut self, secs: f64) -> Self {
        self.idle = (secs > 0.0).then(|| Duration::from_secs_f64(secs));
        self
    }

    /// Offload engine calls to the worker binary at `path`.
    pub fn worker(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker = Some(WorkerMode::Binary(path.into()));
        self
    }

    /// Offload engine calls to a worker started by a custom spawner, for
    /// deployments where the worker is not a plain executable on disk.
    pub fn spawner(mut self, spawner: Arc<dyn WorkerSpawner>) -> Self {
        self.worker = Some(WorkerMode::Spawner(spawner));
        self
    }
}
