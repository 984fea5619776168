//! Cross-address-space memory transfer via `process_vm_{readv,writev}`.
//!
//! The supervisor reads syscall argument buffers out of the guest and
//! writes emulated results back in. Both wrappers use a single local and
//! a single remote iovec; the higher-level memory bridge deals with
//! chunking and page boundaries.

use rustix::io::Errno;

use crate::last_errno;

/// Copy up to `local.len()` bytes from `remote_addr` in the address space
/// of `pid` into `local`.
///
/// Returns the number of bytes actually transferred; the kernel stops at
/// the first unmapped remote page.
///
/// # Errors
///
/// `Errno::FAULT` for invalid remote addresses, `Errno::SRCH` if the
/// process is gone.
pub fn read_from(pid: i32, remote_addr: u64, local: &mut [u8]) -> Result<usize, Errno> {
    if local.is_empty() {
        return Ok(0);
    }
    let local_iov = libc::iovec {
        iov_base: local.as_mut_ptr().cast(),
        iov_len: local.len(),
    };
    let remote_iov = libc::iovec {
        iov_base: remote_addr as *mut libc::c_void,
        iov_len: local.len(),
    };
    let ret = unsafe { libc::process_vm_readv(pid, &local_iov, 1, &remote_iov, 1, 0) };
    if ret < 0 { Err(last_errno()) } else { Ok(ret as usize) }
}

/// Copy `local` into the address space of `pid` at `remote_addr`.
///
/// Returns the number of bytes actually transferred.
///
/// # Errors
///
/// `Errno::FAULT` for invalid remote addresses, `Errno::SRCH` if the
/// process is gone.
pub fn write_to(pid: i32, remote_addr: u64, local: &[u8]) -> Result<usize, Errno> {
    if local.is_empty() {
        return Ok(0);
    }
    let local_iov = libc::iovec {
        iov_base: local.as_ptr() as *mut libc::c_void,
        iov_len: local.len(),
    };
    let remote_iov = libc::iovec {
        iov_base: remote_addr as *mut libc::c_void,
        iov_len: local.len(),
    };
    let ret = unsafe { libc::process_vm_writev(pid, &local_iov, 1, &remote_iov, 1, 0) };
    if ret < 0 { Err(last_errno()) } else { Ok(ret as usize) }
}
