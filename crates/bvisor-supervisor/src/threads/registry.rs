//! The thread registry.
//!
//! Sole owner of every [`Thread`] and [`Namespace`] record. Threads are
//! admitted when the guest root is registered, when a clone is observed,
//! or when `sync_new_threads` discovers a thread whose first syscall
//! arrived before its clone could be bookkept. Threads are removed on
//! observed exits; a namespace dies with its last member.
//!
//! A thread is a member of every namespace on its ancestry chain up to
//! and including its innermost one, carrying a distinct id in each. A
//! viewer resolves and sees exactly the members of its own innermost
//! namespace, which is how a `CLONE_NEWPID` child loses sight of its
//! parent.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use rustix::io::Errno;

use super::namespace::{Namespace, NamespaceId};
use super::procfs::{self, ProcStatus};
use crate::fdtable::FdTable;
use crate::{AbsTgid, AbsTid, NsTgid, NsTid};

const CLONE_NEWPID: u64 = libc::CLONE_NEWPID as u64;
const CLONE_THREAD: u64 = libc::CLONE_THREAD as u64;
const CLONE_FILES: u64 = libc::CLONE_FILES as u64;

/// A virtualised execution context.
#[derive(Debug)]
pub struct Thread {
    pub tid: AbsTid,
    /// The group leader's tid. `tgid == tid` iff this is the leader.
    pub tgid: AbsTgid,
    pub parent: Option<AbsTid>,
    /// Innermost namespace.
    pub ns: NamespaceId,
    pub cwd: PathBuf,
    /// FD table, shared across the thread group.
    pub files: Arc<FdTable>,
}

/// Owner of all thread and namespace records.
#[derive(Debug)]
pub struct ThreadRegistry {
    threads: HashMap<AbsTid, Thread>,
    namespaces: HashMap<NamespaceId, Namespace>,
    next_ns_id: u64,
    root_tid: AbsTid,
    /// Clone flags captured at trap time, consumed when the child
    /// surfaces in a scan.
    pending_clone_flags: HashMap<AbsTid, u64>,
}

impl ThreadRegistry {
    /// Admit the guest root and create the root namespace.
    pub fn new(root_tid: AbsTid, cwd: PathBuf) -> Self {
        let mut registry = Self {
            threads: HashMap::new(),
            namespaces: HashMap::new(),
            next_ns_id: 0,
            root_tid,
            pending_clone_flags: HashMap::new(),
        };
        let root_ns = registry.create_namespace(None);
        let assigned = registry
            .namespaces
            .get_mut(&root_ns)
            .map(|ns| ns.admit(root_tid));
        debug_assert_eq!(assigned, Some(1));
        registry.threads.insert(
            root_tid,
            Thread {
                tid: root_tid,
                tgid: root_tid,
                parent: None,
                ns: root_ns,
                cwd,
                files: Arc::new(FdTable::new()),
            },
        );
        registry
    }

    #[inline]
    pub fn root_tid(&self) -> AbsTid {
        self.root_tid
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn get(&self, tid: AbsTid) -> Option<&Thread> {
        self.threads.get(&tid)
    }

    pub fn namespace(&self, id: NamespaceId) -> Option<&Namespace> {
        self.namespaces.get(&id)
    }

    pub fn namespace_count(&self) -> usize {
        self.namespaces.len()
    }

    /// Ancestry chain of `ns`, root-first, ending at `ns` itself.
    pub fn namespace_chain(&self, ns: NamespaceId) -> Vec<NamespaceId> {
        let mut chain = Vec::new();
        let mut cursor = Some(ns);
        while let Some(id) = cursor {
            chain.push(id);
            cursor = self.namespaces.get(&id).and_then(Namespace::parent);
        }
        chain.reverse();
        chain
    }

    /// Admit a newly observed child of `parent`.
    pub fn register_child(
        &mut self,
        parent: AbsTid,
        child: AbsTid,
        flags: u64,
    ) -> Result<(), Errno> {
        if self.threads.contains_key(&child) {
            return Ok(());
        }
        let p = self.threads.get(&parent).ok_or(Errno::SRCH)?;
        let (p_tgid, p_parent, p_ns, p_cwd, p_files) =
            (p.tgid, p.parent, p.ns, p.cwd.clone(), p.files.clone());

        // The parent link is the parent *process*: a new process hangs off
        // the cloning thread's group, a new thread inherits the group's
        // own parent so every thread answers getppid alike.
        let (ns, tgid, parent_link, files) = if flags & CLONE_NEWPID != 0 {
            let ns = self.create_namespace(Some(p_ns));
            (ns, child, Some(p_tgid), self.inherit_files(p_files, flags))
        } else if flags & CLONE_THREAD != 0 {
            (p_ns, p_tgid, p_parent, p_files)
        } else {
            (p_ns, child, Some(p_tgid), self.inherit_files(p_files, flags))
        };

        for ns_id in self.namespace_chain(ns) {
            if let Some(namespace) = self.namespaces.get_mut(&ns_id) {
                namespace.admit(child);
            }
        }

        tracing::debug!(child, parent, tgid, flags, "thread admitted");
        self.threads.insert(
            child,
            Thread {
                tid: child,
                tgid,
                parent: parent_link,
                ns,
                cwd: p_cwd,
                files,
            },
        );
        Ok(())
    }

    fn inherit_files(&self, parent: Arc<FdTable>, flags: u64) -> Arc<FdTable> {
        if flags & CLONE_FILES != 0 {
            parent
        } else {
            Arc::new(parent.deep_copy())
        }
    }

    /// Remove an exiting thread from the registry and from every
    /// namespace it is visible in.
    pub fn handle_exit(&mut self, tid: AbsTid) {
        let Some(thread) = self.threads.remove(&tid) else {
            return;
        };
        self.pending_clone_flags.remove(&tid);

        for ns_id in self.namespace_chain(thread.ns) {
            let emptied = match self.namespaces.get_mut(&ns_id) {
                Some(ns) => {
                    ns.remove(tid);
                    ns.is_empty()
                }
                None => false,
            };
            if emptied {
                self.namespaces.remove(&ns_id);
                tracing::debug!(ns = ns_id.0, "namespace destroyed");
            }
        }

        // A dying group leader orphans its children onto the guest root.
        if thread.tid == thread.tgid {
            let root = self.root_tid;
            for t in self.threads.values_mut() {
                if t.parent == Some(tid) {
                    t.parent = Some(root);
                }
            }
        }
        tracing::debug!(tid, "thread removed");
    }

    /// Remove every thread of `tid`'s group.
    pub fn handle_exit_group(&mut self, tid: AbsTid) {
        let Some(tgid) = self.threads.get(&tid).map(|t| t.tgid) else {
            return;
        };
        let members: Vec<AbsTid> = self
            .threads
            .values()
            .filter(|t| t.tgid == tgid)
            .map(|t| t.tid)
            .collect();
        for member in members {
            self.handle_exit(member);
        }
    }

    /// The id `target` carries in `viewer`'s innermost namespace, if
    /// visible there.
    pub fn ns_view(&self, viewer: AbsTid, target: AbsTid) -> Option<NsTid> {
        let ns = self.threads.get(&viewer)?.ns;
        self.namespaces.get(&ns)?.ns_tid_of(target)
    }

    /// Resolve a namespaced tgid the way `viewer` names it.
    pub fn get_namespaced(&self, viewer: AbsTid, ns_tgid: NsTgid) -> Result<AbsTid, Errno> {
        let ns = self.threads.get(&viewer).ok_or(Errno::SRCH)?.ns;
        self.namespaces
            .get(&ns)
            .and_then(|n| n.resolve(ns_tgid))
            .ok_or(Errno::SRCH)
    }

    /// Remember the flags of a clone trap until the child surfaces.
    pub fn record_clone_flags(&mut self, parent: AbsTid, flags: u64) {
        self.pending_clone_flags.insert(parent, flags);
    }

    /// Re-scan `/proc` for threads that appeared through clones we have
    /// not bookkept yet (their first syscall can arrive before the
    /// parent's clone trap is processed).
    pub fn sync_new_threads(&mut self) -> usize {
        let mut added = 0;
        loop {
            let known: Vec<(AbsTid, AbsTgid)> =
                self.threads.iter().map(|(&t, th)| (t, th.tgid)).collect();
            let mut discovered: Vec<(AbsTid, AbsTid)> = Vec::new();
            for (tid, tgid) in known {
                for t in procfs::list_tasks(tgid).unwrap_or_default() {
                    if !self.threads.contains_key(&t) {
                        discovered.push((tid, t));
                    }
                }
                for c in procfs::list_children(tgid, tid).unwrap_or_default() {
                    if !self.threads.contains_key(&c) {
                        discovered.push((tid, c));
                    }
                }
            }
            let before = added;
            for (hint, new_tid) in discovered {
                if self.threads.contains_key(&new_tid) {
                    continue;
                }
                if self.admit_discovered(hint, new_tid).is_ok() {
                    added += 1;
                }
            }
            if added == before {
                break;
            }
        }
        if added > 0 {
            tracing::debug!(added, "threads discovered by scan");
        }
        added
    }

    fn admit_discovered(&mut self, hint: AbsTid, new_tid: AbsTid) -> Result<(), Errno> {
        let status = procfs::read_status(new_tid).map_err(|_| Errno::SRCH)?;
        let (parent, flags) = self.classify(hint, &status);
        self.register_child(parent, new_tid, flags)
    }

    /// Recover the parent and clone flags for a discovered thread, per
    /// the trap-recorded flags or the `/proc` evidence.
    fn classify(&mut self, hint: AbsTid, status: &ProcStatus) -> (AbsTid, u64) {
        // Same tgid as an existing group: it is a thread of that group.
        if status.tgid != status.tid && self.threads.contains_key(&status.tgid) {
            return (status.tgid, CLONE_THREAD);
        }
        let parent = if self.threads.contains_key(&status.ppid) {
            status.ppid
        } else {
            hint
        };
        // A longer NSpid chain than the parent's namespace depth means the
        // clone crossed a CLONE_NEWPID boundary.
        let parent_depth = self
            .threads
            .get(&parent)
            .and_then(|p| self.namespaces.get(&p.ns))
            .map_or(1, |ns| ns.depth() as usize);
        let inferred = if status.ns_tids.len() > parent_depth {
            CLONE_NEWPID
        } else {
            0
        };
        let flags = match self.pending_clone_flags.remove(&parent) {
            // A recorded CLONE_THREAD that contradicts the /proc evidence
            // is stale (the recorded clone's child surfaced elsewhere).
            Some(f) if f & CLONE_THREAD != 0 => inferred,
            Some(f) => f,
            None => inferred,
        };
        (parent, flags)
    }

    fn create_namespace(&mut self, parent: Option<NamespaceId>) -> NamespaceId {
        let id = NamespaceId(self.next_ns_id);
        self.next_ns_id += 1;
        let depth = parent
            .and_then(|p| self.namespaces.get(&p))
            .map_or(1, |p| p.depth() + 1);
        self.namespaces.insert(id, Namespace::new(id, parent, depth));
        id
    }
}
