//! Seccomp user notification (`SECCOMP_RET_USER_NOTIF`) support.
//!
//! Seccomp user notification lets a supervisor process intercept syscalls
//! from a guest and answer them on its behalf. The guest installs a filter
//! with `SECCOMP_FILTER_FLAG_NEW_LISTENER`; the resulting listener fd is
//! imported by the supervisor, which then drives a receive/respond loop:
//!
//! 1. `SECCOMP_IOCTL_NOTIF_RECV` blocks until a guest thread traps
//! 2. The supervisor inspects the syscall and replies with either
//!    `SECCOMP_USER_NOTIF_FLAG_CONTINUE` (kernel executes the syscall),
//!    an emulated return value, or an errno
//! 3. `SECCOMP_IOCTL_NOTIF_SEND` delivers the reply and unblocks the guest
//!
//! ## TOCTOU Protection
//!
//! Between receiving a notification and responding, the guest's memory may
//! change. Call `notif_id_valid` after reading guest memory to verify the
//! notification is still alive before acting on what was read.

use rustix::io::Errno;

use crate::last_errno;

/// Let the syscall proceed as-is (supervisor approves).
pub const SECCOMP_USER_NOTIF_FLAG_CONTINUE: u32 = 1;

// ioctl numbers for seccomp notify (from kernel headers, x86_64).
// SECCOMP_IOCTL_NOTIF_RECV = SECCOMP_IOWR(0, struct seccomp_notif)
// SECCOMP_IOCTL_NOTIF_SEND = SECCOMP_IOWR(1, struct seccomp_notif_resp)
// SECCOMP_IOCTL_NOTIF_ID_VALID = SECCOMP_IOW(2, __u64)

/// ioctl to receive a notification from the seccomp listener fd.
pub const SECCOMP_IOCTL_NOTIF_RECV: u64 = 0xc0502100;
/// ioctl to send a response to a seccomp notification.
pub const SECCOMP_IOCTL_NOTIF_SEND: u64 = 0xc0182101;
/// ioctl to check if a notification ID is still valid (TOCTOU protection).
pub const SECCOMP_IOCTL_NOTIF_ID_VALID: u64 = 0x40082102;

/// Seccomp notification data (mirrors kernel `struct seccomp_data`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SeccompData {
    /// Syscall number.
    pub nr: i32,
    /// Architecture (`AUDIT_ARCH_*`).
    pub arch: u32,
    /// Instruction pointer at time of syscall.
    pub instruction_pointer: u64,
    /// Syscall arguments.
    pub args: [u64; 6],
}

/// Seccomp notification received from the guest (mirrors kernel `struct seccomp_notif`).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SeccompNotif {
    /// Unique notification ID.
    pub id: u64,
    /// TID of the notifying thread (in the supervisor's PID namespace).
    pub pid: u32,
    /// Flags (currently unused, must be 0).
    pub flags: u32,
    /// The syscall data.
    pub data: SeccompData,
}

impl Default for SeccompNotif {
    fn default() -> Self {
        // SAFETY: SeccompNotif is a plain C struct with no invariants.
        unsafe { std::mem::zeroed() }
    }
}

/// Response to a seccomp notification (mirrors kernel `struct seccomp_notif_resp`).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SeccompNotifResp {
    /// Must match the notification ID.
    pub id: u64,
    /// Return value for the syscall.
    pub val: i64,
    /// Errno value (negated, kernel convention).
    pub error: i32,
    /// Flags (e.g., `SECCOMP_USER_NOTIF_FLAG_CONTINUE`).
    pub flags: u32,
}

/// Receive a notification from the seccomp listener fd.
///
/// Blocks until a notification is available.
///
/// # Errors
///
/// Returns `Errno::NOENT` once no filter users remain (the guest exited);
/// other errnos indicate a broken listener.
pub fn notif_recv(listener_fd: i32, notif: &mut SeccompNotif) -> Result<(), Errno> {
    let ret = unsafe {
        libc::ioctl(
            listener_fd,
            SECCOMP_IOCTL_NOTIF_RECV,
            notif as *mut SeccompNotif,
        )
    };
    if ret < 0 { Err(last_errno()) } else { Ok(()) }
}

/// Send a response to a seccomp notification.
///
/// # Errors
///
/// Returns `Errno::NOENT` if the notifying thread died before the reply
/// could be delivered.
pub fn notif_send(listener_fd: i32, resp: &SeccompNotifResp) -> Result<(), Errno> {
    let ret = unsafe {
        libc::ioctl(
            listener_fd,
            SECCOMP_IOCTL_NOTIF_SEND,
            resp as *const SeccompNotifResp,
        )
    };
    if ret < 0 { Err(last_errno()) } else { Ok(()) }
}

/// Check if a notification ID is still valid.
///
/// Call after reading guest memory to protect against TOCTOU attacks.
///
/// # Errors
///
/// Returns `Errno::NOENT` if the notification is no longer valid.
pub fn notif_id_valid(listener_fd: i32, id: u64) -> Result<(), Errno> {
    let ret = unsafe { libc::ioctl(listener_fd, SECCOMP_IOCTL_NOTIF_ID_VALID, &id as *const u64) };
    if ret < 0 { Err(last_errno()) } else { Ok(()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_sizes() {
        // Verify struct sizes match kernel expectations
        assert_eq!(size_of::<SeccompData>(), 64);
        assert_eq!(size_of::<SeccompNotif>(), 80);
        assert_eq!(size_of::<SeccompNotifResp>(), 24);
    }

    #[test]
    fn default_notif_is_zeroed() {
        let notif = SeccompNotif::default();
        assert_eq!(notif.id, 0);
        assert_eq!(notif.pid, 0);
        assert_eq!(notif.data.nr, 0);
    }
}
