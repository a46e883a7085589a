//! sidelite-worker: executes engine calls on behalf of a parent process.
//!
//! Speaks length-prefixed JSON frames over stdin/stdout, or over a loopback
//! socket in `--connect` mode. Diagnostics go to stderr only — stdout may be
//! the protocol channel.

use std::net::SocketAddr;

use clap::Parser;
use sidelite::OpenFlags;
use sidelite::worker::{WorkerConfig, run_worker};

#[derive(Parser, Debug)]
#[command(name = "sidelite-worker", version)]
struct Args {
    /// Database location: a path, `:memory:`, or empty for a temporary
    /// database.
    #[arg(long, default_value = "")]
    database: String,

    /// Engine open flags, passed through as raw bits.
    #[arg(long, default_value_t = OpenFlags::default().bits())]
    flags: u32,

    /// Dial the parent at this address instead of using stdio.
    #[arg(long)]
    connect: Option<SocketAddr>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    run_worker(WorkerConfig {
        database: args.database,
        flags: args.flags,
        connect: args.connect,
    })
    .await?;
    Ok(())
}
