//! Sandbox orchestration.
//!
//! `Sandbox::run` owns the whole lifecycle: create the overlay, fork the
//! guest, collect the guest's listener-fd prediction over a socketpair,
//! import the listener via `pidfd_getfd`, run the supervisor loop until
//! the guest is gone, then reap it and report its exit status.
//!
//! The `pidfd_getfd` import races the guest's filter install: until the
//! kernel has allocated the listener, the predicted fd does not exist in
//! the guest's table and the import fails `EBADF`. Retry with short
//! sleeps; a guest that never installs its filter is a broken guest.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::thread;
use std::time::Duration;

use rustix::io::Errno;
use rustix::process::{Pid, PidfdFlags, PidfdGetfdFlags};

use bvisor_sys::last_errno;

use crate::child;
use crate::config::SandboxConfig;
use crate::dispatch::Engine;
use crate::errors::{Result, SandboxError};
use crate::overlay::OverlayRoot;
use crate::supervisor::Supervisor;

const HANDOFF_TIMEOUT_MS: i32 = 30_000;
const IMPORT_ATTEMPTS: u32 = 100;
const IMPORT_BACKOFF: Duration = Duration::from_millis(10);

/// How the guest ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestStatus {
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

impl GuestStatus {
    /// Shell-convention process exit code.
    pub fn code(&self) -> i32 {
        match (self.exit_code, self.signal) {
            (Some(code), _) => code,
            (None, Some(sig)) => 128 + sig,
            (None, None) => 0,
        }
    }
}

pub struct Sandbox;

impl Sandbox {
    /// Run `config.cmd` as a supervised guest to completion.
    pub fn run(config: SandboxConfig) -> Result<GuestStatus> {
        let tmpdir = config
            .tmpdir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let overlay = OverlayRoot::create_in(&tmpdir).map_err(SandboxError::Overlay)?;

        let (parent_sock, child_sock) = socketpair()?;

        let child_pid = unsafe { libc::fork() };
        if child_pid < 0 {
            return Err(SandboxError::Fork(last_errno()));
        }
        if child_pid == 0 {
            drop(parent_sock);
            child::bootstrap(&config, child_sock.as_raw_fd());
        }
        drop(child_sock);
        tracing::info!(guest = child_pid, cmd = ?config.cmd, "guest forked");

        // The guest sends the fd its seccomp listener will land on.
        let predicted = recv_prediction(&parent_sock, child_pid)?;

        // SAFETY: fork returned a positive pid we have not reaped.
        let pid = unsafe { Pid::from_raw_unchecked(child_pid) };
        let pidfd =
            rustix::process::pidfd_open(pid, PidfdFlags::empty()).map_err(SandboxError::Pidfd)?;
        let listener = import_listener(&pidfd, predicted, child_pid)?;
        tracing::debug!(predicted, "listener imported");

        let engine = Engine::new(config, overlay, child_pid);
        let supervisor = Supervisor::new(listener, engine);
        let loop_result = supervisor.run();

        if loop_result.is_err() {
            unsafe { libc::kill(child_pid, libc::SIGKILL) };
        }
        // Release the listener before reaping so no guest thread stays
        // blocked in an unanswered trap.
        drop(supervisor);

        let status = wait_guest(child_pid)?;
        // Surface a fatal loop error only after the guest is reaped.
        loop_result?;
        tracing::info!(code = status.code(), "guest finished");
        Ok(status)
    }
}

/// `AF_UNIX` stream socketpair; parent keeps one end, the guest the
/// other.
fn socketpair() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0i32; 2];
    let ret = unsafe {
        libc::socketpair(
            libc::AF_UNIX,
            libc::SOCK_STREAM | libc::SOCK_CLOEXEC,
            0,
            fds.as_mut_ptr(),
        )
    };
    if ret < 0 {
        return Err(SandboxError::Handoff(format!(
            "socketpair: {}",
            last_errno()
        )));
    }
    // SAFETY: on success both fds are valid and owned by us.
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// Wait for the guest's predicted listener fd number, killing it if the
/// handoff stalls.
fn recv_prediction(sock: &OwnedFd, child_pid: libc::pid_t) -> Result<RawFd> {
    let mut pfd = libc::pollfd {
        fd: sock.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    if unsafe { libc::poll(&mut pfd, 1, HANDOFF_TIMEOUT_MS) } <= 0 {
        unsafe { libc::kill(child_pid, libc::SIGKILL) };
        return Err(SandboxError::Handoff("timeout waiting for prediction".into()));
    }

    let mut bytes = [0u8; size_of::<RawFd>()];
    let got = unsafe { libc::read(sock.as_raw_fd(), bytes.as_mut_ptr().cast(), bytes.len()) };
    if got != bytes.len() as isize {
        unsafe { libc::kill(child_pid, libc::SIGKILL) };
        return Err(SandboxError::Handoff(format!(
            "short prediction read: {}",
            last_errno()
        )));
    }
    Ok(RawFd::from_ne_bytes(bytes))
}

/// Import the guest's listener fd, retrying while its filter install is
/// still pending.
fn import_listener(pidfd: &OwnedFd, target: RawFd, child_pid: libc::pid_t) -> Result<OwnedFd> {
    for _ in 0..IMPORT_ATTEMPTS {
        match rustix::process::pidfd_getfd(pidfd, target, PidfdGetfdFlags::empty()) {
            Ok(fd) => return Ok(fd),
            Err(Errno::BADF) => thread::sleep(IMPORT_BACKOFF),
            Err(e) => {
                unsafe { libc::kill(child_pid, libc::SIGKILL) };
                return Err(SandboxError::Handoff(format!("pidfd_getfd: {e}")));
            }
        }
    }
    unsafe { libc::kill(child_pid, libc::SIGKILL) };
    Err(SandboxError::Handoff(
        "listener fd never materialised".into(),
    ))
}

fn wait_guest(child_pid: libc::pid_t) -> Result<GuestStatus> {
    let mut status = 0i32;
    loop {
        let ret = unsafe { libc::waitpid(child_pid, &mut status, 0) };
        if ret == child_pid {
            break;
        }
        let e = last_errno();
        if e != Errno::INTR {
            return Err(SandboxError::Wait(e));
        }
    }
    Ok(if libc::WIFEXITED(status) {
        GuestStatus {
            exit_code: Some(libc::WEXITSTATUS(status)),
            signal: None,
        }
    } else if libc::WIFSIGNALED(status) {
        GuestStatus {
            exit_code: None,
            signal: Some(libc::WTERMSIG(status)),
        }
    } else {
        GuestStatus {
            exit_code: None,
            signal: None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read as _, Write as _};

    #[test]
    fn status_codes() {
        let exited = GuestStatus {
            exit_code: Some(3),
            signal: None,
        };
        assert_eq!(exited.code(), 3);

        let killed = GuestStatus {
            exit_code: None,
            signal: Some(libc::SIGKILL),
        };
        assert_eq!(killed.code(), 128 + libc::SIGKILL);
    }

    #[test]
    fn socketpair_carries_a_prediction() {
        let (parent, child) = socketpair().unwrap();

        let predicted: RawFd = 7;
        let mut w = std::fs::File::from(child);
        w.write_all(&predicted.to_ne_bytes()).unwrap();
        drop(w);

        let mut r = std::fs::File::from(parent);
        let mut bytes = [0u8; size_of::<RawFd>()];
        r.read_exact(&mut bytes).unwrap();
        assert_eq!(RawFd::from_ne_bytes(bytes), 7);
    }
}
