//! End-to-end lifecycle tests against the real worker binary.

use std::time::Duration;

use serde_json::json;
use sidelite::{Database, Error, OpenOptions};

const WORKER: &str = env!("CARGO_BIN_EXE_sidelite-worker");

async fn open_memory(idle: f64) -> Database {
    Database::open(OpenOptions::new(":memory:").worker(WORKER).idle_secs(idle))
        .await
        .unwrap()
}

#[tokio::test]
async fn commands_resolve_in_issue_order() {
    let db = open_memory(0.0).await;

    // Issue the whole burst while the connection is still idle: the first
    // command triggers the launch, the rest queue behind it. The inserts
    // only succeed if the CREATE TABLE issued first also ran first.
    let mut burst = vec![db.run("CREATE TABLE t(seq)", vec![])];
    burst.extend((0..8).map(|i| db.run("INSERT INTO t VALUES (?1)", vec![json!(i)])));
    for result in futures::future::join_all(burst).await {
        result.unwrap();
    }

    let rows = db
        .query("SELECT seq FROM t ORDER BY rowid", vec![])
        .await
        .unwrap();
    assert_eq!(
        rows["rows"],
        json!([[0], [1], [2], [3], [4], [5], [6], [7]])
    );
    db.close().await.unwrap();
}

#[tokio::test]
async fn idle_timeout_tears_down_and_relaunches() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(
        OpenOptions::new(dir.path().join("idle.db"))
            .worker(WORKER)
            .idle_secs(0.1),
    )
    .await
    .unwrap();

    db.exec("CREATE TABLE t(x)").await.unwrap();
    let first = db.engine_pid().await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    // A fresh worker serves the second burst, and the on-disk database
    // carried the table across the respawn.
    let second = db.engine_pid().await.unwrap();
    assert_ne!(first, second);
    db.query("SELECT * FROM t", vec![]).await.unwrap();

    db.close().await.unwrap();
}

#[tokio::test]
async fn spawn_failure_rejects_the_attempt_and_recovers() {
    let db = Database::open(OpenOptions::new(":memory:").worker("/nonexistent/worker-binary"))
        .await
        .unwrap();

    let (r1, r2, r3) = tokio::join!(
        db.exec("SELECT 1"),
        db.exec("SELECT 1"),
        db.exec("SELECT 1"),
    );
    let e1 = r1.unwrap_err();
    assert!(matches!(e1, Error::Spawn(_)));
    assert_eq!(e1, r2.unwrap_err());
    assert_eq!(e1, r3.unwrap_err());

    // Back to idle, not poisoned: the next call tries a fresh launch.
    assert!(matches!(
        db.exec("SELECT 1").await.unwrap_err(),
        Error::Spawn(_)
    ));
}

#[tokio::test]
async fn close_while_idle_resolves_without_launching() {
    let db = Database::open(OpenOptions::new(":memory:").worker("/nonexistent/worker-binary"))
        .await
        .unwrap();

    // Would reject with Spawn if close tried to launch the (broken) worker.
    db.close().await.unwrap();
    assert_eq!(db.exec("SELECT 1").await.unwrap_err(), Error::Closed);
}

#[cfg(unix)]
#[tokio::test]
async fn close_shuts_the_worker_down() {
    let db = open_memory(0.0).await;
    let pid = db.engine_pid().await.unwrap();

    db.close().await.unwrap();

    let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok();
    assert!(!alive, "worker {pid} survived close()");
    assert_eq!(db.exec("SELECT 1").await.unwrap_err(), Error::Closed);
}

#[tokio::test]
async fn close_racing_a_first_command_leaves_nothing_dangling() {
    let db = open_memory(0.0).await;

    let racer = db.clone();
    let command = tokio::spawn(async move { racer.exec("SELECT 1").await });
    db.close().await.unwrap();

    // Depending on who wins the race the command made it in before the
    // close, was cancelled with the launch, or found the handle already
    // closed; it must not hang or report anything else.
    match command.await.unwrap() {
        Ok(()) | Err(Error::Cancelled) | Err(Error::Closed) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(db.exec("SELECT 1").await.unwrap_err(), Error::Closed);
}

#[tokio::test]
async fn engine_errors_resolve_one_command_without_poisoning() {
    let db = open_memory(0.0).await;

    let err = db.exec("NOT REAL SQL").await.unwrap_err();
    assert!(matches!(err, Error::Command { .. }));

    // Same worker keeps serving.
    let before = db.engine_pid().await.unwrap();
    db.exec("CREATE TABLE ok(x)").await.unwrap();
    assert_eq!(db.engine_pid().await.unwrap(), before);

    db.close().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn worker_crash_fans_out_then_recovers() {
    let db = open_memory(0.0).await;
    let pid = db.engine_pid().await.unwrap();

    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(pid as i32),
        nix::sys::signal::Signal::SIGKILL,
    )
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        db.exec("SELECT 1").await.unwrap_err(),
        Error::ConnectionClosed
    );

    // Recovered: a later call gets a brand new worker.
    let second = db.engine_pid().await.unwrap();
    assert_ne!(pid, second);
    db.close().await.unwrap();
}
