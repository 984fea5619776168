//! The virtual filesystem: path routing and file backends.
//!
//! Every open file the guest holds is a [`FileHandle`], a tagged variant
//! over the four backends:
//!
//! - [`passthrough`] - read-only view of a host file (safe device nodes)
//! - [`cow`] - copy-on-write view of a host file, materialised into the
//!   overlay on first write intent
//! - [`tmp`] - the guest's private `/tmp`, backed by the overlay
//! - [`proc`] - virtualised `/proc` entries rendered from the thread
//!   registry at open time
//!
//! All backends share one contract: `read` returns 0 at EOF and short
//! reads are permitted; `write` is never short on success; `close` is
//! infallible from the caller's perspective (underlying errors are
//! logged); the per-handle byte offset advances on read/write.

use std::os::fd::{AsFd, IntoRawFd, OwnedFd};
use std::path::{Path, PathBuf};

use rustix::fs::{AtFlags, StatxFlags};
use rustix::io::Errno;

use crate::overlay::OverlayRoot;

pub mod cow;
pub mod passthrough;
pub mod proc;
pub mod router;
pub mod tmp;

pub use cow::{CowFile, CowMode};
pub use passthrough::PassthroughFile;
pub use proc::ProcFile;
pub use router::{normalize, resolve, route, Backend, RouteResult};
pub use tmp::TmpFile;

/// Open flags in the backends' vocabulary, converted once from the
/// guest's raw `O_*` bits at the syscall boundary.
#[derive(Debug, Clone, Copy)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
    pub append: bool,
    pub excl: bool,
    pub mode: u32,
}

impl OpenFlags {
    pub fn from_raw(flags: i32, mode: u32) -> Self {
        let acc = flags & libc::O_ACCMODE;
        Self {
            read: acc == libc::O_RDONLY || acc == libc::O_RDWR,
            write: acc == libc::O_WRONLY || acc == libc::O_RDWR,
            create: flags & libc::O_CREAT != 0,
            truncate: flags & libc::O_TRUNC != 0,
            append: flags & libc::O_APPEND != 0,
            excl: flags & libc::O_EXCL != 0,
            mode,
        }
    }

    /// Read-only convenience, used by tests and the stat handlers.
    pub fn read_only() -> Self {
        Self::from_raw(libc::O_RDONLY, 0)
    }

    /// Any intent that requires a writable filesystem underneath.
    pub fn wants_write(&self) -> bool {
        self.write || self.create || self.truncate || self.append
    }

    fn to_oflags(self) -> rustix::fs::OFlags {
        use rustix::fs::OFlags;
        let mut o = OFlags::CLOEXEC;
        o |= match (self.read, self.write) {
            (_, false) => OFlags::RDONLY,
            (false, true) => OFlags::WRONLY,
            (true, true) => OFlags::RDWR,
        };
        if self.create {
            o |= OFlags::CREATE;
        }
        if self.truncate {
            o |= OFlags::TRUNC;
        }
        if self.append {
            o |= OFlags::APPEND;
        }
        if self.excl {
            o |= OFlags::EXCL;
        }
        o
    }

    fn creation_mode(self) -> rustix::fs::Mode {
        rustix::fs::Mode::from_bits_truncate(self.mode)
    }
}

/// File metadata in backend-neutral form.
///
/// Host-backed handles fill this from `statx`; the proc backend
/// synthesises it from the rendered buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub size: i64,
    pub blksize: i64,
    pub blocks: i64,
    pub atime: (i64, i64),
    pub mtime: (i64, i64),
    pub ctime: (i64, i64),
}

impl FileStat {
    pub fn from_statx(sx: &rustix::fs::Statx) -> Self {
        Self {
            dev: libc::makedev(sx.stx_dev_major, sx.stx_dev_minor),
            ino: sx.stx_ino,
            mode: u32::from(sx.stx_mode),
            nlink: u64::from(sx.stx_nlink),
            uid: sx.stx_uid,
            gid: sx.stx_gid,
            size: sx.stx_size as i64,
            blksize: i64::from(sx.stx_blksize),
            blocks: sx.stx_blocks as i64,
            atime: (sx.stx_atime.tv_sec, i64::from(sx.stx_atime.tv_nsec)),
            mtime: (sx.stx_mtime.tv_sec, i64::from(sx.stx_mtime.tv_nsec)),
            ctime: (sx.stx_ctime.tv_sec, i64::from(sx.stx_ctime.tv_nsec)),
        }
    }

    /// Metadata for a rendered in-memory file.
    pub fn synthetic(size: usize) -> Self {
        Self {
            mode: libc::S_IFREG | 0o444,
            nlink: 1,
            size: size as i64,
            blksize: 4096,
            ..Default::default()
        }
    }

    /// Pack into the `struct stat` layout the stat-family syscalls write.
    pub fn to_stat(&self) -> libc::stat {
        // SAFETY: stat is a plain C struct; zero is a valid initial state.
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        st.st_dev = self.dev;
        st.st_ino = self.ino;
        st.st_mode = self.mode;
        st.st_nlink = self.nlink;
        st.st_uid = self.uid;
        st.st_gid = self.gid;
        st.st_size = self.size;
        st.st_blksize = self.blksize;
        st.st_blocks = self.blocks;
        st.st_atime = self.atime.0;
        st.st_atime_nsec = self.atime.1;
        st.st_mtime = self.mtime.0;
        st.st_mtime_nsec = self.mtime.1;
        st.st_ctime = self.ctime.0;
        st.st_ctime_nsec = self.ctime.1;
        st
    }
}

/// One open file, tagged by backend.
#[derive(Debug)]
pub enum FileHandle {
    Passthrough(PassthroughFile),
    Cow(CowFile),
    Tmp(TmpFile),
    Proc(ProcFile),
}

impl FileHandle {
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Errno> {
        match self {
            FileHandle::Passthrough(f) => f.read(buf),
            FileHandle::Cow(f) => f.read(buf),
            FileHandle::Tmp(f) => f.read(buf),
            FileHandle::Proc(f) => f.read(buf),
        }
    }

    /// Write all of `data`. Never short on success.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, Errno> {
        match self {
            FileHandle::Passthrough(f) => f.write(data),
            FileHandle::Cow(f) => f.write(data),
            FileHandle::Tmp(f) => f.write(data),
            FileHandle::Proc(f) => f.write(data),
        }
    }

    pub fn stat(&self) -> Result<FileStat, Errno> {
        match self {
            FileHandle::Passthrough(f) => f.stat(),
            FileHandle::Cow(f) => f.stat(),
            FileHandle::Tmp(f) => f.stat(),
            FileHandle::Proc(f) => f.stat(),
        }
    }

    /// Close the handle, logging rather than surfacing any host error.
    pub fn close(self) {
        let fd = match self {
            FileHandle::Passthrough(f) => Some(f.into_fd()),
            FileHandle::Cow(f) => Some(f.into_fd()),
            FileHandle::Tmp(f) => Some(f.into_fd()),
            FileHandle::Proc(_) => None,
        };
        if let Some(fd) = fd {
            close_logged(fd);
        }
    }
}

pub(crate) fn close_logged(fd: OwnedFd) {
    let raw = fd.into_raw_fd();
    if unsafe { libc::close(raw) } < 0 {
        tracing::debug!(fd = raw, errno = ?bvisor_sys::last_errno(), "close failed");
    }
}

/// `statx` a host fd.
pub(crate) fn statx_fd<F: AsFd>(fd: F) -> Result<FileStat, Errno> {
    let sx = rustix::fs::statx(fd, "", AtFlags::EMPTY_PATH, StatxFlags::BASIC_STATS)?;
    Ok(FileStat::from_statx(&sx))
}

/// `statx` a host path.
pub(crate) fn statx_path(path: &Path) -> Result<FileStat, Errno> {
    let sx = rustix::fs::statx(
        rustix::fs::CWD,
        path,
        AtFlags::empty(),
        StatxFlags::BASIC_STATS,
    )?;
    Ok(FileStat::from_statx(&sx))
}

/// Translate an io::Error from std fs calls back into an errno.
pub(crate) fn io_errno(e: &std::io::Error) -> Errno {
    e.raw_os_error().map_or(Errno::IO, Errno::from_raw_os_error)
}

/// The host path that stat/access should consult for a routed path, or
/// `None` when the backend has no host-side representation (`Proc`).
pub fn host_view(overlay: &OverlayRoot, backend: Backend, path: &str) -> Option<PathBuf> {
    match backend {
        Backend::Passthrough => Some(PathBuf::from(path)),
        Backend::Cow => {
            let shadow = overlay.cow_path(path);
            if shadow.exists() {
                Some(shadow)
            } else {
                Some(PathBuf::from(path))
            }
        }
        Backend::Tmp => {
            let remainder = path.strip_prefix("/tmp").unwrap_or(path);
            Some(overlay.tmp_path(remainder))
        }
        Backend::Proc => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_flags_from_raw() {
        let f = OpenFlags::from_raw(libc::O_RDONLY, 0);
        assert!(f.read && !f.write && !f.wants_write());

        let f = OpenFlags::from_raw(libc::O_WRONLY | libc::O_CREAT, 0o644);
        assert!(!f.read && f.write && f.create && f.wants_write());
        assert_eq!(f.mode, 0o644);

        let f = OpenFlags::from_raw(libc::O_RDONLY | libc::O_TRUNC, 0);
        assert!(f.wants_write());
    }

    #[test]
    fn synthetic_stat() {
        let st = FileStat::synthetic(6).to_stat();
        assert_eq!(st.st_size, 6);
        assert_eq!(st.st_mode & libc::S_IFMT, libc::S_IFREG);
        assert_eq!(st.st_mode & 0o777, 0o444);
    }

    #[test]
    fn host_view_prefers_overlay_copy() {
        let base = tempfile::TempDir::new().unwrap();
        let overlay = OverlayRoot::create_in(base.path()).unwrap();

        // No copy yet: the host file is consulted
        assert_eq!(
            host_view(&overlay, Backend::Cow, "/etc/hosts"),
            Some(PathBuf::from("/etc/hosts"))
        );

        // Materialise a copy: the overlay wins
        let shadow = overlay.cow_path("/etc/hosts");
        std::fs::create_dir_all(shadow.parent().unwrap()).unwrap();
        std::fs::write(&shadow, b"x").unwrap();
        assert_eq!(host_view(&overlay, Backend::Cow, "/etc/hosts"), Some(shadow));

        assert_eq!(
            host_view(&overlay, Backend::Tmp, "/tmp/a/b"),
            Some(overlay.tmp_path("a/b"))
        );
        assert_eq!(host_view(&overlay, Backend::Proc, "/proc/self"), None);
    }
}
