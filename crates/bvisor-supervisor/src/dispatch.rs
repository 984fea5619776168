//! Syscall dispatch.
//!
//! Routes each notification to its handler by syscall number and packs
//! the handler's verdict into the kernel reply. Unknown syscall numbers
//! CONTINUE: the filter traps everything, so the policy surface stays
//! positive - we emulate or block the syscalls we know about and trust
//! the kernel with the rest.

use std::os::fd::RawFd;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use rustix::io::Errno;

use bvisor_sys::notify::{
    notif_id_valid, SeccompNotif, SeccompNotifResp, SECCOMP_USER_NOTIF_FLAG_CONTINUE,
};

use crate::bridge::GuestMem;
use crate::config::SandboxConfig;
use crate::fdtable::FdTable;
use crate::handlers;
use crate::overlay::OverlayRoot;
use crate::threads::ThreadRegistry;
use crate::AbsTid;

/// A handler's verdict on one trapped syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallOutcome {
    /// Let the kernel execute the syscall itself.
    Continue,
    /// Emulated; the guest sees this return value.
    Success(i64),
    /// Emulated; the guest sees this errno.
    Error(Errno),
}

impl SyscallOutcome {
    pub fn into_response(self, id: u64) -> SeccompNotifResp {
        match self {
            SyscallOutcome::Continue => SeccompNotifResp {
                id,
                val: 0,
                error: 0,
                flags: SECCOMP_USER_NOTIF_FLAG_CONTINUE,
            },
            SyscallOutcome::Success(val) => SeccompNotifResp {
                id,
                val,
                error: 0,
                flags: 0,
            },
            SyscallOutcome::Error(errno) => SeccompNotifResp {
                id,
                val: 0,
                error: -errno.raw_os_error(),
                flags: 0,
            },
        }
    }
}

/// Handlers report a verdict or the errno the guest should see.
pub type HandlerResult = Result<SyscallOutcome, Errno>;

/// Everything the handlers operate on: the virtualisation state of one
/// guest.
#[derive(Debug)]
pub struct Engine {
    pub registry: ThreadRegistry,
    pub overlay: OverlayRoot,
    pub config: SandboxConfig,
    pub started: Instant,
    /// Listener fd for TOCTOU re-checks; `None` in unit tests.
    pub listener: Option<RawFd>,
}

impl Engine {
    pub fn new(config: SandboxConfig, overlay: OverlayRoot, root_tid: AbsTid) -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        Self {
            registry: ThreadRegistry::new(root_tid, cwd),
            overlay,
            config,
            started: Instant::now(),
            listener: None,
        }
    }

    pub fn mem(&self, tid: AbsTid) -> GuestMem {
        GuestMem::new(tid)
    }

    /// The FD table of `tid`'s thread group.
    pub fn thread_files(&self, tid: AbsTid) -> Result<Arc<FdTable>, Errno> {
        self.registry
            .get(tid)
            .map(|t| t.files.clone())
            .ok_or(Errno::SRCH)
    }

    /// Re-validate a notification after reading guest memory.
    pub fn notif_still_valid(&self, id: u64) -> bool {
        match self.listener {
            Some(fd) => notif_id_valid(fd, id).is_ok(),
            None => true,
        }
    }
}

/// Dispatch one notification to its handler.
///
/// A handler that panics or reports an internal error never takes the
/// supervisor down; the guest sees `ENOSYS` and the incident is logged.
pub fn dispatch(engine: &mut Engine, notif: &SeccompNotif) -> SyscallOutcome {
    let tid = notif.pid as AbsTid;
    // The caller may have been cloned before its registration caught up.
    if engine.registry.get(tid).is_none() {
        engine.registry.sync_new_threads();
    }

    match catch_unwind(AssertUnwindSafe(|| route_syscall(engine, notif))) {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(errno)) => SyscallOutcome::Error(errno),
        Err(_) => {
            tracing::error!(
                tid,
                syscall = syscall_name(notif.data.nr),
                "handler panicked"
            );
            SyscallOutcome::Error(Errno::NOSYS)
        }
    }
}

fn route_syscall(engine: &mut Engine, notif: &SeccompNotif) -> HandlerResult {
    match i64::from(notif.data.nr) {
        libc::SYS_openat => handlers::fs::openat(engine, notif),
        libc::SYS_read => handlers::fs::read(engine, notif),
        libc::SYS_readv => handlers::fs::readv(engine, notif),
        libc::SYS_write => handlers::fs::write(engine, notif),
        libc::SYS_writev => handlers::fs::writev(engine, notif),
        libc::SYS_close => handlers::fs::close(engine, notif),
        libc::SYS_fstat => handlers::fs::fstat(engine, notif),
        libc::SYS_newfstatat => handlers::fs::newfstatat(engine, notif),
        libc::SYS_faccessat | libc::SYS_faccessat2 => handlers::fs::faccessat(engine, notif),
        libc::SYS_sysinfo => handlers::info::sysinfo(engine, notif),
        libc::SYS_getpid => handlers::process::getpid(engine, notif),
        libc::SYS_gettid => handlers::process::gettid(engine, notif),
        libc::SYS_getppid => handlers::process::getppid(engine, notif),
        libc::SYS_kill => handlers::process::kill(engine, notif),
        libc::SYS_exit => handlers::process::exit(engine, notif),
        libc::SYS_exit_group => handlers::process::exit_group(engine, notif),
        libc::SYS_clone => handlers::process::clone(engine, notif),
        libc::SYS_clone3 => handlers::process::clone3(engine, notif),
        libc::SYS_fork | libc::SYS_vfork => handlers::process::fork(engine, notif),
        libc::SYS_clock_nanosleep => handlers::time::clock_nanosleep(engine, notif),
        nr => {
            tracing::trace!(tid = notif.pid, nr, "passthrough");
            Ok(SyscallOutcome::Continue)
        }
    }
}

/// Map syscall number to name for logging.
pub fn syscall_name(nr: i32) -> &'static str {
    match i64::from(nr) {
        libc::SYS_openat => "openat",
        libc::SYS_read => "read",
        libc::SYS_readv => "readv",
        libc::SYS_write => "write",
        libc::SYS_writev => "writev",
        libc::SYS_close => "close",
        libc::SYS_fstat => "fstat",
        libc::SYS_newfstatat => "newfstatat",
        libc::SYS_faccessat => "faccessat",
        libc::SYS_faccessat2 => "faccessat2",
        libc::SYS_sysinfo => "sysinfo",
        libc::SYS_getpid => "getpid",
        libc::SYS_gettid => "gettid",
        libc::SYS_getppid => "getppid",
        libc::SYS_kill => "kill",
        libc::SYS_exit => "exit",
        libc::SYS_exit_group => "exit_group",
        libc::SYS_clone => "clone",
        libc::SYS_clone3 => "clone3",
        libc::SYS_fork => "fork",
        libc::SYS_vfork => "vfork",
        libc::SYS_clock_nanosleep => "clock_nanosleep",
        _ => "unknown",
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// An engine over a throwaway overlay with `root_tid` as the guest
    /// root. The TempDir must outlive the engine.
    pub fn engine(root_tid: AbsTid) -> (tempfile::TempDir, Engine) {
        let base = tempfile::TempDir::new().unwrap();
        let overlay = OverlayRoot::create_in(base.path()).unwrap();
        let engine = Engine::new(SandboxConfig::new(["test"]), overlay, root_tid);
        (base, engine)
    }

    /// A notification as the kernel would deliver it.
    pub fn notif(tid: AbsTid, nr: i64, args: [u64; 6]) -> SeccompNotif {
        let mut n = SeccompNotif::default();
        n.id = 1;
        n.pid = tid as u32;
        n.data.nr = nr as i32;
        n.data.args = args;
        n
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{engine, notif};
    use super::*;

    #[test]
    fn unknown_syscalls_continue() {
        let (_base, mut eng) = engine(100);
        let n = notif(100, libc::SYS_mmap, [0; 6]);
        assert_eq!(dispatch(&mut eng, &n), SyscallOutcome::Continue);
    }

    #[test]
    fn outcome_serialisation() {
        let resp = SyscallOutcome::Continue.into_response(7);
        assert_eq!(resp.id, 7);
        assert_eq!(resp.flags, SECCOMP_USER_NOTIF_FLAG_CONTINUE);

        let resp = SyscallOutcome::Success(42).into_response(8);
        assert_eq!(resp.val, 42);
        assert_eq!(resp.error, 0);
        assert_eq!(resp.flags, 0);

        let resp = SyscallOutcome::Error(Errno::ACCESS).into_response(9);
        assert_eq!(resp.error, -libc::EACCES);
        assert_eq!(resp.flags, 0);
    }

    #[test]
    fn syscall_names() {
        assert_eq!(syscall_name(libc::SYS_openat as i32), "openat");
        assert_eq!(syscall_name(libc::SYS_kill as i32), "kill");
        assert_eq!(syscall_name(9999), "unknown");
    }

    #[test]
    fn handler_errno_becomes_error_outcome() {
        let (_base, mut eng) = engine(100);
        // kill(0, ...) is EINVAL by contract
        let n = notif(100, libc::SYS_kill, [0, 15, 0, 0, 0, 0]);
        assert_eq!(dispatch(&mut eng, &n), SyscallOutcome::Error(Errno::INVAL));
    }
}
