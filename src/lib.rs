//! sidelite: non-blocking SQLite access by offloading engine calls to a
//! sidecar worker process.

pub mod bridge;
mod channel;
mod config;
mod database;
mod engine;
mod error;
mod lazy;
pub mod transport;
pub mod worker;

pub use channel::CommandChannel;
pub use config::{DbPath, MEMORY_MARKER, OpenFlags, OpenOptions};
pub use database::{Backend, Database};
pub use error::Error;
pub use lazy::LazyConnection;
pub use transport::{BinarySpawner, LaunchSpec, Transport, WorkerSpawner, launch};
