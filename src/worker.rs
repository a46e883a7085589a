//! Worker-side loop — runs inside the worker process.
//!
//! The parent side (spawning, transport establishment) is in `transport`;
//! this is the half the `sidelite-worker` binary runs. It attaches the
//! transport the parent chose — stdin/stdout in pipe mode, or a loopback
//! socket whose address arrived as a startup argument — and then executes
//! one command at a time against the engine.
//!
//! Exactly one request is outstanding at any time, so the loop is a plain
//! read-dispatch-write cycle: the engine call is synchronous by design,
//! matching the single-writer engine underneath.

use std::io;
use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::bridge::codec::JsonCodec;
use crate::bridge::protocol::{WireRequest, WireResponse};
use crate::config::{DbPath, OpenFlags};
use crate::engine;

pub struct WorkerConfig {
    /// Database location in wire form: a path, `:memory:`, or empty.
    pub database: String,
    /// Engine open flags as raw bits.
    pub flags: u32,
    /// Dial the parent here instead of using stdio.
    pub connect: Option<SocketAddr>,
}

/// Run the worker until the parent shuts it down or the transport closes.
pub async fn run_worker(config: WorkerConfig) -> io::Result<()> {
    let path = DbPath::parse(&config.database);
    let conn = engine::open(&path, OpenFlags::from_bits(config.flags))
        .map_err(|e| io::Error::other(format!("cannot open database: {}", e.message)))?;
    tracing::info!(database = %config.database, flags = config.flags, "engine open");

    match config.connect {
        Some(addr) => {
            let stream = tokio::net::TcpStream::connect(addr).await?;
            tracing::debug!(%addr, "connected back to parent");
            let (read_half, write_half) = stream.into_split();
            serve(read_half, write_half, conn).await
        }
        None => serve(tokio::io::stdin(), tokio::io::stdout(), conn).await,
    }
}

async fn serve<R, W>(reader: R, writer: W, conn: rusqlite::Connection) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut requests = FramedRead::new(reader, JsonCodec::<WireRequest>::new());
    let mut responses = FramedWrite::new(writer, JsonCodec::<WireResponse>::new());

    loop {
        match requests.next().await {
            Some(Ok(WireRequest::Call { method, args })) => {
                tracing::trace!(%method, "executing command");
                let response = match engine::dispatch(&conn, &method, &args) {
                    Ok(value) => WireResponse::result(value),
                    Err(err) => WireResponse::error(err.code, err.message),
                };
                responses.send(response).await?;
            }
            Some(Ok(WireRequest::Shutdown)) => {
                tracing::info!("shutdown requested");
                break;
            }
            Some(Err(err)) => {
                tracing::error!(error = %err, "malformed frame, exiting");
                return Err(err);
            }
            None => {
                tracing::info!("transport closed by parent, exiting");
                break;
            }
        }
    }
    Ok(())
}
