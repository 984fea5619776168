//! The virtual file-descriptor table.
//!
//! One table per thread group. Virtual fds are small integers allocated
//! lowest-free from 3; 0, 1 and 2 belong to the guest's real stdio and
//! are never issued. Entries are reference-counted so a handle obtained
//! by an in-flight handler stays alive even if a later notification
//! removes it from the table; the backing descriptor closes exactly once,
//! when the last reference drops.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use rustix::io::Errno;

use crate::fs::FileHandle;

pub type VirtualFd = i32;

/// First fd value ever issued; stdio stays below.
const FIRST_VFD: VirtualFd = 3;
/// Table capacity; exceeding it is the guest's `EMFILE`.
const MAX_FDS: usize = 1024;

/// Shared handle to one open file.
pub type HandleRef = Arc<Mutex<FileHandle>>;

#[derive(Debug, Default)]
pub struct FdTable {
    entries: RwLock<BTreeMap<VirtualFd, HandleRef>>,
}

impl FdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a handle at the lowest unused vfd ≥ 3.
    pub fn insert(&self, handle: FileHandle) -> Result<VirtualFd, Errno> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.len() >= MAX_FDS {
            return Err(Errno::MFILE);
        }
        let mut vfd = FIRST_VFD;
        for &occupied in entries.keys() {
            if occupied == vfd {
                vfd += 1;
            } else if occupied > vfd {
                break;
            }
        }
        entries.insert(vfd, Arc::new(Mutex::new(handle)));
        Ok(vfd)
    }

    /// Clone out the handle at `vfd`.
    pub fn get(&self, vfd: VirtualFd) -> Result<HandleRef, Errno> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&vfd).cloned().ok_or(Errno::BADF)
    }

    /// Remove the entry at `vfd`, making the value reusable. The handle
    /// itself lives on until its last reference drops.
    pub fn remove(&self, vfd: VirtualFd) -> Result<HandleRef, Errno> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(&vfd).ok_or(Errno::BADF)
    }

    /// Fork semantics: a fresh map over the same ref-counted handles, so
    /// both sides keep sharing file offsets.
    pub fn deep_copy(&self) -> FdTable {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        FdTable {
            entries: RwLock::new(entries.clone()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ProcFile;

    fn handle(content: &[u8]) -> FileHandle {
        FileHandle::Proc(ProcFile::from_rendered(content.to_vec()))
    }

    #[test]
    fn stdio_is_never_issued() {
        let table = FdTable::new();
        assert_eq!(table.insert(handle(b"a")).unwrap(), 3);
        assert_eq!(table.insert(handle(b"b")).unwrap(), 4);
        assert_eq!(table.insert(handle(b"c")).unwrap(), 5);
    }

    #[test]
    fn lowest_free_slot_is_reused() {
        let table = FdTable::new();
        let a = table.insert(handle(b"a")).unwrap();
        let b = table.insert(handle(b"b")).unwrap();
        let c = table.insert(handle(b"c")).unwrap();
        assert_eq!((a, b, c), (3, 4, 5));

        table.remove(b).unwrap();
        assert_eq!(table.insert(handle(b"d")).unwrap(), 4);
        assert_eq!(table.insert(handle(b"e")).unwrap(), 6);
    }

    #[test]
    fn get_after_remove_is_ebadf() {
        let table = FdTable::new();
        let vfd = table.insert(handle(b"x")).unwrap();
        assert!(table.get(vfd).is_ok());
        table.remove(vfd).unwrap();
        assert_eq!(table.get(vfd).err(), Some(Errno::BADF));
        assert_eq!(table.remove(vfd).err(), Some(Errno::BADF));
        assert_eq!(table.get(99).err(), Some(Errno::BADF));
    }

    #[test]
    fn removal_keeps_inflight_handles_alive() {
        let table = FdTable::new();
        let vfd = table.insert(handle(b"payload")).unwrap();
        let held = table.get(vfd).unwrap();
        table.remove(vfd).unwrap();

        // The slow caller can still use its clone
        let mut buf = [0u8; 7];
        let n = held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .read(&mut buf)
            .unwrap();
        assert_eq!(&buf[..n], b"payload");
    }

    #[test]
    fn deep_copy_shares_offsets() {
        let table = FdTable::new();
        let vfd = table.insert(handle(b"abcdef")).unwrap();
        let copy = table.deep_copy();

        let mut buf = [0u8; 3];
        table
            .get(vfd)
            .unwrap()
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .read(&mut buf)
            .unwrap();
        assert_eq!(&buf, b"abc");

        // The copy sees the advanced offset: same underlying handle
        copy.get(vfd)
            .unwrap()
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .read(&mut buf)
            .unwrap();
        assert_eq!(&buf, b"def");
    }

    #[test]
    fn open_close_conservation() {
        let table = FdTable::new();
        let mut opens = 0;
        let mut closes = 0;
        let mut vfds = Vec::new();
        for i in 0..10 {
            vfds.push(table.insert(handle(format!("{i}").as_bytes())).unwrap());
            opens += 1;
        }
        for vfd in vfds.drain(..5) {
            table.remove(vfd).unwrap();
            closes += 1;
        }
        assert_eq!(table.len(), opens - closes);
    }
}
