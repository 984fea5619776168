//! Guest-side bootstrap.
//!
//! Runs in the forked child, before and during the seccomp handoff:
//!
//! 1. Predict the fd the seccomp listener will land on (`dup(0)`, note
//!    the value, `close` it - the next allocation reuses it)
//! 2. Send the predicted value to the supervisor over the socketpair
//! 3. Install the trap-everything filter with `NEW_LISTENER`
//! 4. `execvp` the guest command
//!
//! The order matters: once the filter is installed every syscall this
//! process makes blocks until the supervisor answers, so the prediction
//! must already be on the wire. The exec itself is the first trapped
//! syscall; the guest sits in it until the supervisor imports the
//! listener and starts the loop.

use std::ffi::CString;
use std::io::{self, Write as _};
use std::os::fd::RawFd;

use bvisor_sys::last_errno;
use bvisor_sys::seccomp::{build_trap_all_filter, seccomp_set_mode_filter_listener, SockFprog};

use crate::config::SandboxConfig;

/// Post-fork entry point; never returns.
pub fn bootstrap(config: &SandboxConfig, sock: RawFd) -> ! {
    let err = run(config, sock);
    // Only reached on failure; exec replaces us on success.
    writeln!(io::stderr(), "bvisor guest setup: {err}").ok();
    unsafe { libc::_exit(126) }
}

fn run(config: &SandboxConfig, sock: RawFd) -> String {
    // 1. Predict the listener fd
    let predicted = unsafe { libc::dup(0) };
    if predicted < 0 {
        return format!("dup: {}", last_errno());
    }
    unsafe { libc::close(predicted) };

    // 2. Ship the prediction before the filter goes live
    let bytes = predicted.to_ne_bytes();
    let wrote = unsafe { libc::write(sock, bytes.as_ptr().cast(), bytes.len()) };
    if wrote != bytes.len() as isize {
        return format!("handoff write: {}", last_errno());
    }

    // Environment tweaks while syscalls are still free
    for (key, value) in &config.env {
        std::env::set_var(key, value);
    }

    // 3. Install the filter; the kernel must hand us the predicted fd
    let filter = build_trap_all_filter();
    let fprog = SockFprog {
        len: filter.len() as u16,
        filter: filter.as_ptr(),
    };
    let listener = match unsafe { seccomp_set_mode_filter_listener(&fprog) } {
        Ok(fd) => fd,
        Err(e) => return format!("seccomp install: {e}"),
    };
    if std::os::fd::AsRawFd::as_raw_fd(&listener) != predicted {
        return "listener fd prediction missed".into();
    }
    // The supervisor imports this fd; it must stay open across exec.
    std::mem::forget(listener);

    // 4. Become the guest
    match exec(config) {
        Ok(never) => match never {},
        Err(e) => e,
    }
}

fn exec(config: &SandboxConfig) -> Result<std::convert::Infallible, String> {
    if config.cmd.is_empty() {
        return Err("empty guest command".into());
    }
    let argv: Vec<CString> = config
        .cmd
        .iter()
        .map(|a| CString::new(a.as_bytes()))
        .collect::<Result<_, _>>()
        .map_err(|_| "NUL in argument".to_string())?;
    let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|a| a.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());

    unsafe { libc::execvp(argv[0].as_ptr(), argv_ptrs.as_ptr()) };
    Err(format!("exec {}: {}", config.cmd[0], last_errno()))
}
