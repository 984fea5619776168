//! Filesystem syscall handlers.
//!
//! Stdio stays with the kernel: fd 0 reads and fd 1/2 writes CONTINUE so
//! the guest talks to the terminal it inherited. Everything else goes
//! through the virtual FD table and the backends.
//!
//! Blocked-path policy: `EACCES` for `openat`/`faccessat`, `EPERM` for
//! the stat family. Backend `EROFS` is surfaced as `EIO` on the write
//! path so the guest cannot probe for the copy-on-write boundary.

use rustix::io::Errno;

use bvisor_sys::notify::SeccompNotif;

use super::STAGING_CAP;
use crate::dispatch::{Engine, HandlerResult, SyscallOutcome};
use crate::fdtable::VirtualFd;
use crate::fs::{
    self, host_view, normalize, proc, resolve, route, Backend, CowFile, FileHandle, FileStat,
    OpenFlags, PassthroughFile, ProcFile, RouteResult, TmpFile,
};
use crate::AbsTid;

const PATH_BUF: usize = 4096;

pub fn openat(engine: &mut Engine, notif: &SeccompNotif) -> HandlerResult {
    let tid = notif.pid as AbsTid;
    let mem = engine.mem(tid);

    let mut buf = [0u8; PATH_BUF];
    let path = mem.read_string(notif.data.args[1], &mut buf)?;
    if !path.starts_with('/') {
        // No AT_FDCWD-relative resolution at this layer.
        return Err(Errno::INVAL);
    }
    if !engine.notif_still_valid(notif.id) {
        return Err(Errno::SRCH);
    }
    let path = normalize(path);

    match route(&path) {
        RouteResult::Block => {
            tracing::debug!(tid, %path, "open blocked");
            Err(Errno::ACCESS)
        }
        RouteResult::Handle(backend) => {
            let flags = OpenFlags::from_raw(notif.data.args[2] as i32, notif.data.args[3] as u32);
            let handle = open_backend(engine, backend, &path, &flags, tid)?;
            let files = engine.thread_files(tid)?;
            let vfd = files.insert(handle)?;
            tracing::trace!(tid, %path, vfd, ?backend, "opened");
            Ok(SyscallOutcome::Success(i64::from(vfd)))
        }
    }
}

fn open_backend(
    engine: &Engine,
    backend: Backend,
    path: &str,
    flags: &OpenFlags,
    viewer: AbsTid,
) -> Result<FileHandle, Errno> {
    match backend {
        Backend::Passthrough => PassthroughFile::open(path, flags).map(FileHandle::Passthrough),
        Backend::Cow => CowFile::open(&engine.overlay, path, flags).map(FileHandle::Cow),
        Backend::Tmp => TmpFile::open(&engine.overlay, path, flags).map(FileHandle::Tmp),
        Backend::Proc => {
            if flags.wants_write() {
                return Err(Errno::ROFS);
            }
            ProcFile::open(path, viewer, &engine.registry).map(FileHandle::Proc)
        }
    }
}

pub fn read(engine: &mut Engine, notif: &SeccompNotif) -> HandlerResult {
    let tid = notif.pid as AbsTid;
    let fd = notif.data.args[0] as VirtualFd;
    if fd == 0 {
        return Ok(SyscallOutcome::Continue);
    }
    let count = notif.data.args[2] as usize;

    let handle = engine.thread_files(tid)?.get(fd)?;
    let mut staging = [0u8; STAGING_CAP];
    let want = count.min(STAGING_CAP);
    let n = lock(&handle).read(&mut staging[..want]).map_err(read_errno)?;

    engine.mem(tid).write_slice(notif.data.args[1], &staging[..n])?;
    Ok(SyscallOutcome::Success(n as i64))
}

pub fn readv(engine: &mut Engine, notif: &SeccompNotif) -> HandlerResult {
    let tid = notif.pid as AbsTid;
    let fd = notif.data.args[0] as VirtualFd;
    if fd == 0 {
        return Ok(SyscallOutcome::Continue);
    }
    let iov = read_iovecs(engine, tid, notif.data.args[1], notif.data.args[2])?;
    if iov.is_empty() {
        return Ok(SyscallOutcome::Success(0));
    }

    let total: usize = iov.iter().map(|v| v.iov_len).sum();
    let handle = engine.thread_files(tid)?.get(fd)?;
    let mut staging = [0u8; STAGING_CAP];
    let want = total.min(STAGING_CAP);
    let n = lock(&handle).read(&mut staging[..want]).map_err(read_errno)?;

    // Scatter the staging buffer across the guest's iovecs.
    let mem = engine.mem(tid);
    let mut offset = 0;
    for v in &iov {
        if offset == n {
            break;
        }
        let take = v.iov_len.min(n - offset);
        mem.write_slice(v.iov_base as u64, &staging[offset..offset + take])?;
        offset += take;
    }
    Ok(SyscallOutcome::Success(n as i64))
}

pub fn write(engine: &mut Engine, notif: &SeccompNotif) -> HandlerResult {
    let tid = notif.pid as AbsTid;
    let fd = notif.data.args[0] as VirtualFd;
    if fd == 1 || fd == 2 {
        return Ok(SyscallOutcome::Continue);
    }
    let count = notif.data.args[2] as usize;

    let handle = engine.thread_files(tid)?.get(fd)?;
    let mut staging = [0u8; STAGING_CAP];
    let want = count.min(STAGING_CAP);
    engine
        .mem(tid)
        .read_slice(notif.data.args[1], &mut staging[..want])?;

    let n = lock(&handle).write(&staging[..want]).map_err(write_errno)?;
    Ok(SyscallOutcome::Success(n as i64))
}

pub fn writev(engine: &mut Engine, notif: &SeccompNotif) -> HandlerResult {
    let tid = notif.pid as AbsTid;
    let fd = notif.data.args[0] as VirtualFd;
    if fd == 1 || fd == 2 {
        return Ok(SyscallOutcome::Continue);
    }
    let iov = read_iovecs(engine, tid, notif.data.args[1], notif.data.args[2])?;
    if iov.is_empty() {
        return Ok(SyscallOutcome::Success(0));
    }

    // Gather the guest's iovecs into the staging buffer.
    let mem = engine.mem(tid);
    let mut staging = [0u8; STAGING_CAP];
    let mut filled = 0;
    for v in &iov {
        if filled == STAGING_CAP {
            break;
        }
        let take = v.iov_len.min(STAGING_CAP - filled);
        mem.read_slice(v.iov_base as u64, &mut staging[filled..filled + take])?;
        filled += take;
    }

    let handle = engine.thread_files(tid)?.get(fd)?;
    let n = lock(&handle).write(&staging[..filled]).map_err(write_errno)?;
    Ok(SyscallOutcome::Success(n as i64))
}

pub fn close(engine: &mut Engine, notif: &SeccompNotif) -> HandlerResult {
    let tid = notif.pid as AbsTid;
    let fd = notif.data.args[0] as VirtualFd;
    if (0..=2).contains(&fd) {
        return Ok(SyscallOutcome::Continue);
    }
    let entry = engine.thread_files(tid)?.remove(fd)?;
    // Close now if we hold the last reference; an in-flight handler
    // otherwise closes it on drop.
    if let Ok(mutex) = std::sync::Arc::try_unwrap(entry) {
        match mutex.into_inner() {
            Ok(handle) => handle.close(),
            Err(poisoned) => poisoned.into_inner().close(),
        }
    }
    Ok(SyscallOutcome::Success(0))
}

pub fn fstat(engine: &mut Engine, notif: &SeccompNotif) -> HandlerResult {
    let tid = notif.pid as AbsTid;
    let fd = notif.data.args[0] as VirtualFd;
    if (0..=2).contains(&fd) {
        return Ok(SyscallOutcome::Continue);
    }
    let handle = engine.thread_files(tid)?.get(fd)?;
    let stat = lock(&handle).stat()?;
    engine.mem(tid).write(notif.data.args[1], &stat.to_stat())?;
    Ok(SyscallOutcome::Success(0))
}

pub fn newfstatat(engine: &mut Engine, notif: &SeccompNotif) -> HandlerResult {
    let tid = notif.pid as AbsTid;
    let at_flags = notif.data.args[3] as i32;

    let mut buf = [0u8; PATH_BUF];
    let path = engine.mem(tid).read_string(notif.data.args[1], &mut buf)?;

    if path.is_empty() && at_flags & libc::AT_EMPTY_PATH != 0 {
        let fd = notif.data.args[0] as VirtualFd;
        if (0..=2).contains(&fd) {
            return Ok(SyscallOutcome::Continue);
        }
        let handle = engine.thread_files(tid)?.get(fd)?;
        let stat = lock(&handle).stat()?;
        engine.mem(tid).write(notif.data.args[2], &stat.to_stat())?;
        return Ok(SyscallOutcome::Success(0));
    }

    let abs = resolve_with_cwd(engine, tid, path)?;
    let stat = stat_routed(engine, tid, &abs)?;
    engine.mem(tid).write(notif.data.args[2], &stat.to_stat())?;
    Ok(SyscallOutcome::Success(0))
}

fn stat_routed(engine: &Engine, viewer: AbsTid, path: &str) -> Result<FileStat, Errno> {
    match route(path) {
        RouteResult::Block => Err(Errno::PERM),
        RouteResult::Handle(Backend::Proc) => {
            let content = proc::render(path, viewer, &engine.registry)?;
            Ok(FileStat::synthetic(content.len()))
        }
        RouteResult::Handle(backend) => {
            let host = host_view(&engine.overlay, backend, path).ok_or(Errno::NOENT)?;
            fs::statx_path(&host)
        }
    }
}

pub fn faccessat(engine: &mut Engine, notif: &SeccompNotif) -> HandlerResult {
    let tid = notif.pid as AbsTid;

    let mut buf = [0u8; PATH_BUF];
    let path = engine.mem(tid).read_string(notif.data.args[1], &mut buf)?;
    let abs = resolve_with_cwd(engine, tid, path)?;

    match route(&abs) {
        RouteResult::Block => Err(Errno::ACCESS),
        RouteResult::Handle(Backend::Proc) => {
            if proc::exists(&abs, tid, &engine.registry) {
                Ok(SyscallOutcome::Success(0))
            } else {
                Err(Errno::NOENT)
            }
        }
        RouteResult::Handle(backend) => {
            let host = host_view(&engine.overlay, backend, &abs).ok_or(Errno::NOENT)?;
            let mode = rustix::fs::Access::from_bits_truncate(notif.data.args[2] as u32);
            rustix::fs::access(&host, mode)?;
            Ok(SyscallOutcome::Success(0))
        }
    }
}

/// Resolve a guest path against the caller's working directory.
fn resolve_with_cwd(engine: &Engine, tid: AbsTid, path: &str) -> Result<String, Errno> {
    if path.starts_with('/') {
        return Ok(normalize(path));
    }
    let cwd = engine
        .registry
        .get(tid)
        .map(|t| t.cwd.to_string_lossy().into_owned())
        .ok_or(Errno::SRCH)?;
    Ok(resolve(&cwd, path))
}

/// Read the guest's iovec array, bounded like the kernel bounds it.
fn read_iovecs(
    engine: &Engine,
    tid: AbsTid,
    addr: u64,
    count: u64,
) -> Result<Vec<libc::iovec>, Errno> {
    let count = count as i64;
    if !(0..=libc::UIO_MAXIOV as i64).contains(&count) {
        return Err(Errno::INVAL);
    }
    let mem = engine.mem(tid);
    let mut iov = Vec::with_capacity(count as usize);
    for i in 0..count as u64 {
        iov.push(mem.read::<libc::iovec>(addr + i * size_of::<libc::iovec>() as u64)?);
    }
    Ok(iov)
}

fn lock(handle: &crate::fdtable::HandleRef) -> std::sync::MutexGuard<'_, FileHandle> {
    handle.lock().unwrap_or_else(|e| e.into_inner())
}

/// Backend read failures are plain I/O errors to the guest.
fn read_errno(_e: Errno) -> Errno {
    Errno::IO
}

/// Write failures surface as I/O errors, except the space family the
/// guest can act on. `EROFS` in particular stays hidden.
fn write_errno(e: Errno) -> Errno {
    match e {
        Errno::NOSPC | Errno::FBIG => e,
        _ => Errno::IO,
    }
}
