//! Read-only passthrough backend.
//!
//! Used for the handful of device nodes the router lets through
//! (`/dev/null`, `/dev/urandom`, ...). The host file is opened directly;
//! any write intent is refused at open time so the handle can never turn
//! into a writable view of the host.

use std::os::fd::OwnedFd;

use rustix::fs::{Mode, OFlags};
use rustix::io::Errno;

use super::{statx_fd, FileStat, OpenFlags};

#[derive(Debug)]
pub struct PassthroughFile {
    fd: OwnedFd,
}

impl PassthroughFile {
    pub fn open(path: &str, flags: &OpenFlags) -> Result<Self, Errno> {
        if flags.wants_write() {
            return Err(Errno::ROFS);
        }
        let fd = rustix::fs::open(
            path,
            OFlags::RDONLY | OFlags::CLOEXEC | OFlags::NOCTTY,
            Mode::empty(),
        )?;
        Ok(Self { fd })
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Errno> {
        rustix::io::read(&self.fd, buf)
    }

    pub fn write(&mut self, _data: &[u8]) -> Result<usize, Errno> {
        Err(Errno::ROFS)
    }

    pub fn stat(&self) -> Result<FileStat, Errno> {
        statx_fd(&self.fd)
    }

    pub(super) fn into_fd(self) -> OwnedFd {
        self.fd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_intent_is_refused() {
        let flags = OpenFlags::from_raw(libc::O_WRONLY, 0);
        assert_eq!(
            PassthroughFile::open("/dev/null", &flags).err(),
            Some(Errno::ROFS)
        );
        let flags = OpenFlags::from_raw(libc::O_RDONLY | libc::O_CREAT, 0o644);
        assert_eq!(
            PassthroughFile::open("/dev/null", &flags).err(),
            Some(Errno::ROFS)
        );
    }

    #[test]
    fn reads_host_bytes() {
        let mut f = PassthroughFile::open("/dev/zero", &OpenFlags::read_only()).unwrap();
        let mut buf = [0xffu8; 16];
        assert_eq!(f.read(&mut buf).unwrap(), 16);
        assert_eq!(buf, [0u8; 16]);
        assert_eq!(f.write(b"x"), Err(Errno::ROFS));
    }

    #[test]
    fn stat_reports_device() {
        let f = PassthroughFile::open("/dev/null", &OpenFlags::read_only()).unwrap();
        let st = f.stat().unwrap();
        assert_eq!(st.mode & libc::S_IFMT, libc::S_IFCHR);
    }
}
