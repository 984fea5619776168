//! Copy-on-write backend.
//!
//! The default backend for everything the router does not claim. A handle
//! starts in one of two modes and the only transition is one-way:
//!
//! - **Passthrough**: a read-only host fd. Writes return `EROFS`.
//! - **Writecopy**: an fd into `overlay/cow/<path>`. Chosen at open time
//!   when the caller asks for any write intent, or when an earlier open
//!   already materialised a copy of this path.
//!
//! Materialisation copies the host file's current bytes into the overlay,
//! so read-only opens keep observing the original host bytes until the
//! first write-intent open of that path; every open after that sees the
//! overlay copy.

use std::fs;
use std::io::ErrorKind;
use std::os::fd::OwnedFd;

use rustix::fs::{Mode, OFlags};
use rustix::io::Errno;

use super::tmp::write_all;
use super::{io_errno, statx_fd, FileStat, OpenFlags};
use crate::overlay::OverlayRoot;

/// Which side of the copy-on-write boundary a handle is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CowMode {
    Passthrough,
    Writecopy,
}

#[derive(Debug)]
pub struct CowFile {
    fd: OwnedFd,
    mode: CowMode,
}

impl CowFile {
    pub fn open(overlay: &OverlayRoot, path: &str, flags: &OpenFlags) -> Result<Self, Errno> {
        let shadow = overlay.cow_path(path);
        if flags.wants_write() || shadow.exists() {
            if !shadow.exists() {
                materialize(path, &shadow, flags)?;
            }
            let fd = rustix::fs::open(&shadow, flags.to_oflags(), flags.creation_mode())?;
            Ok(Self {
                fd,
                mode: CowMode::Writecopy,
            })
        } else {
            let fd = rustix::fs::open(path, OFlags::RDONLY | OFlags::CLOEXEC, Mode::empty())?;
            Ok(Self {
                fd,
                mode: CowMode::Passthrough,
            })
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Errno> {
        rustix::io::read(&self.fd, buf)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize, Errno> {
        match self.mode {
            CowMode::Passthrough => Err(Errno::ROFS),
            CowMode::Writecopy => write_all(&self.fd, data),
        }
    }

    pub fn stat(&self) -> Result<FileStat, Errno> {
        statx_fd(&self.fd)
    }

    #[inline]
    pub fn mode(&self) -> CowMode {
        self.mode
    }

    pub(super) fn into_fd(self) -> OwnedFd {
        self.fd
    }
}

/// Copy the host file into the overlay, creating parent directories.
///
/// A missing host file is fine when the caller is creating: the
/// subsequent `O_CREAT` open starts the overlay copy empty.
fn materialize(path: &str, shadow: &std::path::Path, flags: &OpenFlags) -> Result<(), Errno> {
    if let Some(parent) = shadow.parent() {
        fs::create_dir_all(parent).map_err(|e| io_errno(&e))?;
    }
    match fs::copy(path, shadow) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound && flags.create => Ok(()),
        Err(e) => Err(io_errno(&e)),
    }
}
