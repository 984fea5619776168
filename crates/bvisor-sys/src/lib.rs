//! Low-level Linux syscall wrappers for the bVisor supervisor.
//!
//! This crate provides thin wrappers around the Linux-specific facilities
//! that are not available in rustix or libc as typed calls. For standard
//! syscalls, use rustix.
//!
//! ## Modules
//!
//! - **notify** - Seccomp user-notification ABI (`SECCOMP_IOCTL_NOTIF_*`)
//! - **seccomp** - Seccomp-BPF filter construction and installation
//! - **process_vm** - Cross-address-space memory transfer
//!
//! # Safety
//!
//! This crate contains raw syscall wrappers. Casts between integer types
//! are unavoidable when interfacing with the kernel ABI.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod notify;
pub mod process_vm;
pub mod seccomp;

#[inline]
pub fn last_errno() -> rustix::io::Errno {
    // SAFETY: __errno_location always returns valid thread-local pointer.
    rustix::io::Errno::from_raw_os_error(unsafe { *libc::__errno_location() })
}
