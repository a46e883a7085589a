//! Lazy connection manager.
//!
//! Wraps a command-channel lifecycle behind a connection-agnostic handle:
//! the worker is launched on first use, commands issued before it is ready
//! are queued and flushed in order, launch failures reject exactly the
//! commands queued for that attempt, and an idle worker is torn down after
//! a configurable delay.
//!
//! All state lives in one manager task driven by a `tokio::select!` loop;
//! handles talk to it over an mpsc mailbox, so commands are FIFO by
//! construction and resolve in exactly the order they were issued, no
//! matter how many idle/ready cycles happen in between.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::channel::CommandChannel;
use crate::error::Error;
use crate::transport::{self, LaunchSpec, Transport, WorkerSpawner};

/// Handle to a worker-backed connection that is established on first use.
///
/// Cheap to clone; all clones feed the same manager task.
#[derive(Clone)]
pub struct LazyConnection {
    tx: mpsc::UnboundedSender<Msg>,
}

struct PendingCall {
    method: String,
    args: Vec<Value>,
    reply: oneshot::Sender<Result<Value, Error>>,
}

impl PendingCall {
    fn reject(self, err: Error) {
        let _ = self.reply.send(Err(err));
    }
}

enum Msg {
    Call(PendingCall),
    Close(oneshot::Sender<()>),
}

impl LazyConnection {
    pub fn new(
        spawner: Arc<dyn WorkerSpawner>,
        spec: LaunchSpec,
        idle: Option<Duration>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Manager {
            rx,
            queue: VecDeque::new(),
            spawner,
            spec,
            idle,
        };
        tokio::spawn(manager.run());
        Self { tx }
    }

    /// Issue one command. Never blocks the caller on worker startup; the
    /// command queues until a channel is ready.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, Error> {
        let (reply, rx) = oneshot::channel();
        let call = PendingCall {
            method: method.to_string(),
            args,
            reply,
        };
        self.tx.send(Msg::Call(call)).map_err(|_| Error::Closed)?;
        rx.await.unwrap_or(Err(Error::Closed))
    }

    /// Terminal close.
    ///
    /// Idle: resolves immediately, never launching anything. Connecting:
    /// cancels the in-flight launch and rejects the commands queued for it.
    /// Ready: shuts the worker down gracefully. Afterwards every `call`
    /// fails with [`Error::Closed`] and no launch is ever attempted again.
    pub async fn close(&self) -> Result<(), Error> {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Msg::Close(ack)).is_err() {
            // Manager already gone; closed is closed.
            return Ok(());
        }
        let _ = done.await;
        Ok(())
    }
}

struct Manager {
    rx: mpsc::UnboundedReceiver<Msg>,
    queue: VecDeque<PendingCall>,
    spawner: Arc<dyn WorkerSpawner>,
    spec: LaunchSpec,
    idle: Option<Duration>,
}

enum ConnectOutcome {
    Launched(Transport),
    Failed,
    Closing(oneshot::Sender<()>),
    HandlesDropped,
}

enum Served {
    /// Idle teardown or connection failure; a later call launches afresh.
    Disconnected,
    /// Terminal close requested; ack once the worker is gone.
    Closing(oneshot::Sender<()>),
    HandlesDropped,
}

impl Manager {
    async fn run(mut self) {
        loop {
            // Idle: no worker, nothing queued.
            debug_assert!(self.queue.is_empty());
            match self.rx.recv().await {
                None => return,
                Some(Msg::Close(ack)) => {
                    let _ = ack.send(());
                    break;
                }
                Some(Msg::Call(call)) => self.queue.push_back(call),
            }

            // Connecting.
            let transport = match self.connect().await {
                ConnectOutcome::Launched(transport) => transport,
                ConnectOutcome::Failed => continue,
                ConnectOutcome::Closing(ack) => {
                    let _ = ack.send(());
                    break;
                }
                ConnectOutcome::HandlesDropped => return,
            };

            let channel = CommandChannel::new(transport);
            tracing::debug!(pid = channel.worker_id(), "connection ready");

            // Ready.
            match self.serve(channel).await {
                Served::Disconnected => continue,
                Served::Closing(ack) => {
                    let _ = ack.send(());
                    break;
                }
                Served::HandlesDropped => return,
            }
        }

        // Closed: terminal. Reject everything from here on, without ever
        // launching again.
        while let Some(msg) = self.rx.recv().await {
            match msg {
                Msg::Call(call) => call.reject(Error::Closed),
                Msg::Close(ack) => {
                    let _ = ack.send(());
                }
            }
        }
    }

    /// Poll the launch and the mailbox together, so commands keep queuing
    /// while the worker starts and a close can cancel the launch.
    async fn connect(&mut self) -> ConnectOutcome {
        let spawner = Arc::clone(&self.spawner);
        let spec = self.spec.clone();
        let launch = async move { transport::launch(spawner.as_ref(), &spec).await };
        tokio::pin!(launch);
        loop {
            tokio::select! {
                result = &mut launch => match result {
                    Ok(transport) => return ConnectOutcome::Launched(transport),
                    Err(err) => {
                        tracing::warn!(error = %err, "worker launch failed");
                        // Commands that raced into the mailbox while the
                        // launch was resolving belong to this attempt too.
                        let close = self.drain_mailbox();
                        self.fail_queue(&err);
                        return match close {
                            Some(ack) => ConnectOutcome::Closing(ack),
                            None => ConnectOutcome::Failed,
                        };
                    }
                },
                msg = self.rx.recv() => match msg {
                    Some(Msg::Call(call)) => self.queue.push_back(call),
                    Some(Msg::Close(ack)) => {
                        // Returning drops the launch future, which kills the
                        // spawned process and closes any listener.
                        self.fail_queue(&Error::Cancelled);
                        return ConnectOutcome::Closing(ack);
                    }
                    None => return ConnectOutcome::HandlesDropped,
                },
            }
        }
    }

    async fn serve(&mut self, mut channel: CommandChannel) -> Served {
        loop {
            // Flush queued commands strictly in order, one in flight. The
            // idle timer is unarmed for as long as anything is queued.
            while let Some(call) = self.queue.pop_front() {
                let PendingCall {
                    method,
                    args,
                    reply,
                } = call;
                match channel.send(&method, args).await {
                    Ok(value) => {
                        let _ = reply.send(Ok(value));
                    }
                    Err(err) if !err.is_connection_error() => {
                        // Engine-level failure: resolve this one command,
                        // keep the connection. Never retried.
                        let _ = reply.send(Err(err));
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "connection failed; dropping worker");
                        let _ = reply.send(Err(err));
                        // Fan out to everything behind the failed request,
                        // in issue order.
                        let close = self.drain_mailbox();
                        self.fail_queue(&Error::ConnectionClosed);
                        let _ = channel.close().await;
                        return match close {
                            Some(ack) => Served::Closing(ack),
                            None => Served::Disconnected,
                        };
                    }
                }
            }

            // Ready with an empty queue: wait for work, or tear the worker
            // down once the idle delay elapses.
            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(Msg::Call(call)) => self.queue.push_back(call),
                    Some(Msg::Close(ack)) => {
                        let _ = channel.close().await;
                        return Served::Closing(ack);
                    }
                    None => {
                        let _ = channel.close().await;
                        return Served::HandlesDropped;
                    }
                },
                _ = idle_delay(self.idle) => {
                    tracing::debug!("idle timeout; closing worker");
                    let _ = channel.close().await;
                    return Served::Disconnected;
                }
            }
        }
    }

    /// Pull everything already sitting in the mailbox. Commands join the
    /// queue; a close request is handed back to the caller. Anything sent
    /// after that close is rejected by the terminal loop.
    fn drain_mailbox(&mut self) -> Option<oneshot::Sender<()>> {
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                Msg::Call(call) => self.queue.push_back(call),
                Msg::Close(ack) => return Some(ack),
            }
        }
        None
    }

    fn fail_queue(&mut self, err: &Error) {
        for call in self.queue.drain(..) {
            call.reject(err.clone());
        }
    }
}

async fn idle_delay(idle: Option<Duration>) {
    match idle {
        Some(delay) => tokio::time::sleep(delay).await,
        // Teardown disabled: park this branch forever.
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::BinarySpawner;

    fn broken() -> LazyConnection {
        LazyConnection::new(
            Arc::new(BinarySpawner::new("/nonexistent/sidelite-worker")),
            LaunchSpec {
                database: ":memory:".to_string(),
                flags: 0,
            },
            None,
        )
    }

    #[tokio::test]
    async fn launch_failure_rejects_the_whole_attempt_in_order() {
        let conn = broken();
        let (r1, r2, r3) = tokio::join!(
            conn.call("pid", vec![]),
            conn.call("pid", vec![]),
            conn.call("pid", vec![]),
        );

        let e1 = r1.unwrap_err();
        assert!(matches!(e1, Error::Spawn(_)));
        // Identical underlying error for every command of the attempt.
        assert_eq!(e1, r2.unwrap_err());
        assert_eq!(e1, r3.unwrap_err());
    }

    #[tokio::test]
    async fn launch_failure_is_not_terminal() {
        let conn = broken();
        assert!(matches!(
            conn.call("pid", vec![]).await.unwrap_err(),
            Error::Spawn(_)
        ));
        // A later call attempts a fresh launch rather than failing fast.
        assert!(matches!(
            conn.call("pid", vec![]).await.unwrap_err(),
            Error::Spawn(_)
        ));
    }

    #[tokio::test]
    async fn close_while_idle_never_launches() {
        let conn = broken();
        conn.close().await.unwrap();

        // Closed, not a spawn failure: no launch was attempted.
        assert_eq!(conn.call("pid", vec![]).await.unwrap_err(), Error::Closed);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let conn = broken();
        conn.close().await.unwrap();
        conn.close().await.unwrap();
    }
}
