//! Pipe transport: the worker's stdin/stdout carry the protocol, stderr is
//! inherited for diagnostics only.
//!
//! Before spawning, every parent descriptor above the three standard
//! streams is neutralized in the child by redirecting it to `/dev/null`, so
//! the worker never gains access to file handles the parent has open. This
//! is a security invariant, not an optimization.
//!
//! ## Safety contracts
//!
//! The `pre_exec` hook runs in the forked child before exec. It only issues
//! `dup2` syscalls; the descriptor list and the null sink are prepared in
//! the parent beforehand, so the hook never allocates.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::process::Stdio;

use super::{LaunchSpec, Transport, WorkerSpawner};
use crate::error::Error;

/// Upper bound when the platform offers no descriptor listing and we have
/// to probe instead.
const MAX_PROBED_FD: RawFd = 256;

pub async fn launch(spawner: &dyn WorkerSpawner, spec: &LaunchSpec) -> Result<Transport, Error> {
    let mut cmd = spawner.command();
    spec.apply(&mut cmd);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    // Snapshot taken immediately before spawn; the listing fd itself may be
    // in it, and neutralizing an already-closed slot is harmless.
    let inherited = open_descriptors();
    if !inherited.is_empty() {
        tracing::debug!(count = inherited.len(), "neutralizing inherited descriptors");
        let null = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/null")
            .map_err(Error::spawn)?;
        // Safety: the hook only calls dup2 (async-signal-safe) on
        // pre-computed descriptors.
        unsafe {
            cmd.pre_exec(move || neutralize(&inherited, &null));
        }
    }

    let mut child = cmd.spawn().map_err(Error::spawn)?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::Spawn("stdin not captured".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Spawn("stdout not captured".to_string()))?;

    tracing::debug!(pid = child.id(), "worker spawned (pipe transport)");
    Ok(Transport {
        reader: Box::new(stdout),
        writer: Box::new(stdin),
        child,
    })
}

/// Runs post-fork, pre-exec in the child: point every inherited descriptor
/// at the null sink. The copies created by `dup2` do not carry CLOEXEC, so
/// they survive exec while the originals close with it.
fn neutralize(fds: &[RawFd], null: &std::fs::File) -> std::io::Result<()> {
    for &fd in fds {
        if fd == null.as_raw_fd() {
            continue;
        }
        // Adopt the target slot, dup2 over it, forget so the temporary
        // OwnedFd does not close the slot we just filled.
        let mut target = unsafe { OwnedFd::from_raw_fd(fd) };
        let res = nix::unistd::dup2(null, &mut target);
        std::mem::forget(target);
        res.map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
    }
    Ok(())
}

/// Descriptors above the three standard streams currently open in this
/// process.
fn open_descriptors() -> Vec<RawFd> {
    for listing in ["/proc/self/fd", "/dev/fd"] {
        if let Ok(entries) = std::fs::read_dir(listing) {
            let mut fds: Vec<RawFd> = entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().to_str().and_then(|n| n.parse().ok()))
                .filter(|&fd| fd > 2)
                .collect();
            fds.sort_unstable();
            return fds;
        }
    }

    // No listing available; probe a fixed range.
    (3..MAX_PROBED_FD)
        .filter(|&fd| {
            let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
            nix::fcntl::fcntl(borrowed, nix::fcntl::FcntlArg::F_GETFD).is_ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_descriptors_excludes_standard_streams() {
        let file = tempfile::tempfile().unwrap();
        let fds = open_descriptors();
        assert!(fds.iter().all(|&fd| fd > 2));
        assert!(fds.contains(&file.as_raw_fd()));
    }
}
