//! Private `/tmp` backend.
//!
//! `/tmp/<x>` in the guest is `overlay/tmp/<x>` on the host; the full
//! requested flag set is honoured, so this is the one place the guest
//! gets ordinary writable files.

use std::fs;
use std::os::fd::OwnedFd;

use rustix::io::Errno;

use super::{io_errno, statx_fd, FileStat, OpenFlags};
use crate::overlay::OverlayRoot;

#[derive(Debug)]
pub struct TmpFile {
    fd: OwnedFd,
}

impl TmpFile {
    pub fn open(overlay: &OverlayRoot, path: &str, flags: &OpenFlags) -> Result<Self, Errno> {
        let remainder = path.strip_prefix("/tmp").unwrap_or(path);
        let host = overlay.tmp_path(remainder);
        if flags.create {
            if let Some(parent) = host.parent() {
                fs::create_dir_all(parent).map_err(|e| io_errno(&e))?;
            }
        }
        let fd = rustix::fs::open(&host, flags.to_oflags(), flags.creation_mode())?;
        Ok(Self { fd })
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Errno> {
        rustix::io::read(&self.fd, buf)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize, Errno> {
        write_all(&self.fd, data)
    }

    pub fn stat(&self) -> Result<FileStat, Errno> {
        statx_fd(&self.fd)
    }

    pub(super) fn into_fd(self) -> OwnedFd {
        self.fd
    }
}

/// Backends never return short writes; loop until done.
pub(super) fn write_all(fd: &OwnedFd, data: &[u8]) -> Result<usize, Errno> {
    let mut written = 0;
    while written < data.len() {
        match rustix::io::write(fd, &data[written..]) {
            Ok(0) => return Err(Errno::IO),
            Ok(n) => written += n,
            Err(Errno::INTR) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}
