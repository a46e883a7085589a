//! Loopback socket transport.
//!
//! Used where inherited process pipes are unreliable, and directly testable
//! everywhere. The parent binds an ephemeral loopback listener, passes its
//! address to the worker as a startup argument, and waits for exactly one
//! inbound connection. The listener is single-use: it closes as soon as the
//! worker is connected.

use std::process::Stdio;
use std::time::Duration;

use tokio::net::TcpListener;

use super::{LaunchSpec, Transport, WorkerSpawner};
use crate::error::Error;

/// How long the worker gets to connect back before the launch fails.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn launch(spawner: &dyn WorkerSpawner, spec: &LaunchSpec) -> Result<Transport, Error> {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .map_err(|e| Error::Spawn(format!("cannot bind loopback listener: {e}")))?;
    let addr = listener
        .local_addr()
        .map_err(|e| Error::Spawn(format!("cannot read listener address: {e}")))?;

    let mut cmd = spawner.command();
    spec.apply(&mut cmd);
    cmd.arg("--connect").arg(addr.to_string());
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(Error::spawn)?;
    tracing::debug!(pid = child.id(), %addr, "worker spawned (socket transport)");

    // The worker's exit and the handshake are raced so a worker that dies
    // before connecting fails the launch instead of stalling it until the
    // timeout.
    let accepted = tokio::select! {
        accepted = listener.accept() => {
            accepted.map_err(|e| Error::Spawn(format!("accept failed: {e}")))
        }
        status = child.wait() => {
            Err(Error::WorkerExited {
                code: status.ok().and_then(|s| s.code()),
            })
        }
        _ = tokio::time::sleep(HANDSHAKE_TIMEOUT) => Err(Error::HandshakeTimeout),
    };

    let (stream, peer) = match accepted {
        Ok(pair) => pair,
        Err(err) => {
            // All-or-nothing cleanup: no worker may outlive a failed launch,
            // and the listener drops on return.
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Err(err);
        }
    };
    drop(listener);

    let _ = stream.set_nodelay(true);
    tracing::debug!(%peer, "worker connected");

    let (read_half, write_half) = stream.into_split();
    Ok(Transport {
        reader: Box::new(read_half),
        writer: Box::new(write_half),
        child,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::BinarySpawner;

    fn spec() -> LaunchSpec {
        LaunchSpec {
            database: ":memory:".to_string(),
            flags: 0,
        }
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let spawner = BinarySpawner::new("/nonexistent/sidelite-worker");
        let err = launch(&spawner, &spec()).await.unwrap_err();
        assert!(matches!(err, Error::Spawn(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn worker_exit_before_connecting_fails_the_launch() {
        // `true` exits immediately without ever dialing back.
        let spawner = BinarySpawner::new("/bin/true");
        let err = launch(&spawner, &spec()).await.unwrap_err();
        assert!(matches!(err, Error::WorkerExited { .. }));
    }
}
