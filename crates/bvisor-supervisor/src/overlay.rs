//! Per-sandbox overlay root.
//!
//! The overlay is a host-side directory tree that materialises everything
//! the guest is allowed to mutate:
//!
//! - `cow/` mirrors the host root; copy-on-write backends place their
//!   private file copies here under the original absolute path
//! - `tmp/` backs the guest's private `/tmp`
//!
//! The tree lives at `<tmpdir>/.bvisor/<uid>` where `<uid>` is sixteen
//! lowercase hex digits; the path router blocks `<tmpdir>/.bvisor` so the
//! guest can never look behind its own curtain. Created on supervisor
//! start, removed on drop.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Directory under the tmpdir that holds every sandbox's overlay.
pub const OVERLAY_BASE: &str = ".bvisor";

/// Host-side directory tree backing the CoW and private-tmp contents.
#[derive(Debug)]
pub struct OverlayRoot {
    root: PathBuf,
}

impl OverlayRoot {
    /// Create the overlay under the system tmpdir.
    pub fn create() -> io::Result<Self> {
        Self::create_in(&std::env::temp_dir())
    }

    /// Create the overlay under an explicit base directory.
    pub fn create_in(tmpdir: &Path) -> io::Result<Self> {
        let root = tmpdir.join(OVERLAY_BASE).join(uid());
        fs::create_dir_all(root.join("cow"))?;
        fs::create_dir_all(root.join("tmp"))?;
        Ok(Self { root })
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the CoW copy of the host file at absolute `path` lives.
    pub fn cow_path(&self, path: &str) -> PathBuf {
        self.root.join("cow").join(path.trim_start_matches('/'))
    }

    /// Where the guest's `/tmp/<remainder>` lives.
    pub fn tmp_path(&self, remainder: &str) -> PathBuf {
        self.root.join("tmp").join(remainder.trim_start_matches('/'))
    }
}

impl Drop for OverlayRoot {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.root) {
            tracing::warn!(root = %self.root.display(), error = %e, "overlay cleanup failed");
        }
    }
}

#[cfg(not(test))]
fn uid() -> String {
    let mut raw = [0u8; 8];
    // Best effort; an all-zero uid still works, it is just predictable.
    let _ = rustix::rand::getrandom(&mut raw[..], rustix::rand::GetRandomFlags::empty());
    let mut s = String::with_capacity(16);
    for b in raw {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

// Deterministic paths for tests.
#[cfg(test)]
fn uid() -> String {
    "testtesttesttest".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        let base = tempfile::TempDir::new().unwrap();
        let overlay = OverlayRoot::create_in(base.path()).unwrap();
        assert!(overlay.root().join("cow").is_dir());
        assert!(overlay.root().join("tmp").is_dir());
        assert!(overlay.root().ends_with(".bvisor/testtesttesttest"));
    }

    #[test]
    fn path_mapping() {
        let base = tempfile::TempDir::new().unwrap();
        let overlay = OverlayRoot::create_in(base.path()).unwrap();
        assert_eq!(
            overlay.cow_path("/etc/hosts"),
            overlay.root().join("cow/etc/hosts")
        );
        assert_eq!(overlay.tmp_path("foo/bar"), overlay.root().join("tmp/foo/bar"));
        assert_eq!(overlay.tmp_path("/foo"), overlay.root().join("tmp/foo"));
    }

    #[test]
    fn drop_removes_tree() {
        let base = tempfile::TempDir::new().unwrap();
        let root = {
            let overlay = OverlayRoot::create_in(base.path()).unwrap();
            fs::write(overlay.tmp_path("f"), b"x").unwrap();
            overlay.root().to_path_buf()
        };
        assert!(!root.exists());
    }
}
