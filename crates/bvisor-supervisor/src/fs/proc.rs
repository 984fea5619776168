//! Virtualised `/proc`.
//!
//! The guest must see its own PID world, not the host's, so the few proc
//! entries bVisor supports are rendered from the thread registry at open
//! time and served from memory:
//!
//! - `/proc/self`, `/proc/<n>` - the namespaced tgid, decimal + newline
//! - `/proc/self/status`, `/proc/<n>/status` - a status record whose
//!   `Pid:`, `PPid:` and `NSpid:` lines reflect the guest's own view
//!
//! `<n>` is interpreted in the calling thread's innermost namespace; a
//! target that is not visible there does not exist. Everything else under
//! `/proc` does not exist either.

use rustix::io::Errno;

use super::FileStat;
use crate::threads::ThreadRegistry;
use crate::{AbsTid, NsTid};

/// An open, fully rendered proc file.
#[derive(Debug)]
pub struct ProcFile {
    content: Vec<u8>,
    offset: usize,
}

impl ProcFile {
    pub fn open(path: &str, viewer: AbsTid, registry: &ThreadRegistry) -> Result<Self, Errno> {
        Ok(Self::from_rendered(render(path, viewer, registry)?))
    }

    pub(crate) fn from_rendered(content: Vec<u8>) -> Self {
        Self { content, offset: 0 }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Errno> {
        let remaining = &self.content[self.offset.min(self.content.len())..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.offset += n;
        Ok(n)
    }

    pub fn write(&mut self, _data: &[u8]) -> Result<usize, Errno> {
        Err(Errno::ROFS)
    }

    pub fn stat(&self) -> Result<FileStat, Errno> {
        Ok(FileStat::synthetic(self.content.len()))
    }

    #[cfg(test)]
    pub(crate) fn content(&self) -> &[u8] {
        &self.content
    }
}

/// Whether `path` names a proc entry that exists for `viewer`.
pub fn exists(path: &str, viewer: AbsTid, registry: &ThreadRegistry) -> bool {
    render(path, viewer, registry).is_ok()
}

/// Render a proc entry into its byte content.
pub fn render(path: &str, viewer: AbsTid, registry: &ThreadRegistry) -> Result<Vec<u8>, Errno> {
    let rest = path.strip_prefix("/proc").ok_or(Errno::NOENT)?;
    let parts: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

    match parts.as_slice() {
        ["self"] => {
            let tgid = registry.get(viewer).ok_or(Errno::SRCH)?.tgid;
            let ns_tgid = registry.ns_view(viewer, tgid).ok_or(Errno::NOENT)?;
            Ok(numeric(ns_tgid))
        }
        ["self", "status"] => {
            let tgid = registry.get(viewer).ok_or(Errno::SRCH)?.tgid;
            render_status(viewer, tgid, registry)
        }
        [n] => {
            let ns_tgid: NsTid = n.parse().map_err(|_| Errno::NOENT)?;
            // ENOENT, not ESRCH: a pid that is not visible in the caller's
            // namespace simply has no proc entry.
            registry
                .get_namespaced(viewer, ns_tgid)
                .map_err(|_| Errno::NOENT)?;
            Ok(numeric(ns_tgid))
        }
        [n, "status"] => {
            let ns_tgid: NsTid = n.parse().map_err(|_| Errno::NOENT)?;
            let abs = registry
                .get_namespaced(viewer, ns_tgid)
                .map_err(|_| Errno::NOENT)?;
            let tgid = registry.get(abs).ok_or(Errno::NOENT)?.tgid;
            render_status(viewer, tgid, registry)
        }
        _ => Err(Errno::NOENT),
    }
}

fn numeric(n: NsTid) -> Vec<u8> {
    format!("{n}\n").into_bytes()
}

/// The `status` record for the process led by `leader`, as seen by
/// `viewer`.
fn render_status(
    viewer: AbsTid,
    leader: AbsTid,
    registry: &ThreadRegistry,
) -> Result<Vec<u8>, Errno> {
    let leader_thread = registry.get(leader).ok_or(Errno::NOENT)?;
    let pid = registry.ns_view(viewer, leader).ok_or(Errno::NOENT)?;

    let ppid = leader_thread
        .parent
        .and_then(|p| registry.get(p))
        .map(|p| p.tgid)
        .and_then(|ptgid| registry.ns_view(viewer, ptgid))
        .unwrap_or(0);

    // NSpid runs from the viewer's namespace down to the target's
    // innermost.
    let viewer_ns = registry.get(viewer).ok_or(Errno::SRCH)?.ns;
    let chain = registry.namespace_chain(leader_thread.ns);
    let from = chain
        .iter()
        .position(|&ns| ns == viewer_ns)
        .ok_or(Errno::NOENT)?;
    let ns_pids: Vec<String> = chain[from..]
        .iter()
        .filter_map(|&ns| registry.namespace(ns))
        .filter_map(|ns| ns.ns_tid_of(leader))
        .map(|t| t.to_string())
        .collect();

    Ok(format!(
        "Tgid:\t{pid}\nPid:\t{pid}\nPPid:\t{ppid}\nNSpid:\t{}\n",
        ns_pids.join(" ")
    )
    .into_bytes())
}
