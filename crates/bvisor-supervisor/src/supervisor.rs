//! The supervisor loop.
//!
//! Strictly single-threaded and cooperative: one notification is carried
//! from receive to send before the next is picked up. The kernel already
//! serialises delivery per listener fd and keeps the trapped guest thread
//! blocked until its reply lands, so there is nothing to overlap. The
//! engine sits behind a mutex anyway - test doubles and a future worker
//! pool take it contended, production takes it free.

use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::Mutex;

use rustix::io::Errno;

use bvisor_sys::notify::{notif_recv, notif_send, SeccompNotif};

use crate::dispatch::{dispatch, syscall_name, Engine};
use crate::errors::{Result, SandboxError};

/// Drives the notification protocol end-to-end for one guest.
pub struct Supervisor {
    listener: OwnedFd,
    engine: Mutex<Engine>,
}

impl Supervisor {
    pub fn new(listener: OwnedFd, mut engine: Engine) -> Self {
        engine.listener = Some(listener.as_raw_fd());
        Self {
            listener,
            engine: Mutex::new(engine),
        }
    }

    /// Receive, dispatch, respond; repeat until the guest is gone.
    ///
    /// `ENOENT` from receive means no guest threads remain: clean exit.
    /// `ENOENT` from send means the notifying thread died before the
    /// reply could be delivered: drop it and move on. Every other errno
    /// is fatal.
    pub fn run(&self) -> Result<()> {
        let fd = self.listener.as_raw_fd();
        loop {
            let mut notif = SeccompNotif::default();
            match notif_recv(fd, &mut notif) {
                Ok(()) => {}
                Err(Errno::NOENT) => {
                    tracing::info!("guest exited, supervisor done");
                    return Ok(());
                }
                Err(Errno::INTR) => continue,
                Err(e) => return Err(SandboxError::Recv(e)),
            }

            tracing::trace!(
                tid = notif.pid,
                syscall = syscall_name(notif.data.nr),
                "trap"
            );

            let outcome = {
                let mut engine = self.engine.lock().unwrap_or_else(|e| e.into_inner());
                dispatch(&mut engine, &notif)
            };

            match notif_send(fd, &outcome.into_response(notif.id)) {
                Ok(()) => {}
                Err(Errno::NOENT) => {
                    tracing::debug!(tid = notif.pid, "guest exited before reply");
                }
                Err(e) => return Err(SandboxError::Send(e)),
            }
        }
    }

    /// Shared access to the engine, for inspection in tests and tools.
    pub fn engine(&self) -> &Mutex<Engine> {
        &self.engine
    }
}
