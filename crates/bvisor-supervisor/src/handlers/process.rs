//! Process identity, signals and exit bookkeeping.
//!
//! Identity syscalls answer from the thread registry, remapped into the
//! caller's innermost namespace. Exits update the registry and then
//! CONTINUE so the kernel performs the real teardown. Clone traps only
//! record flags: the child's tid is unknown until it surfaces in a scan.

use rustix::io::Errno;

use bvisor_sys::last_errno;
use bvisor_sys::notify::SeccompNotif;

use crate::dispatch::{Engine, HandlerResult, SyscallOutcome};
use crate::{AbsTid, NsTgid};

pub fn getpid(engine: &mut Engine, notif: &SeccompNotif) -> HandlerResult {
    let tid = notif.pid as AbsTid;
    let tgid = engine.registry.get(tid).ok_or(Errno::SRCH)?.tgid;
    let ns_tgid = engine.registry.ns_view(tid, tgid).unwrap_or(0);
    Ok(SyscallOutcome::Success(i64::from(ns_tgid)))
}

pub fn gettid(engine: &mut Engine, notif: &SeccompNotif) -> HandlerResult {
    let tid = notif.pid as AbsTid;
    let ns_tid = engine.registry.ns_view(tid, tid).ok_or(Errno::SRCH)?;
    Ok(SyscallOutcome::Success(i64::from(ns_tid)))
}

/// Returns 0 for the guest root and for parents the caller cannot see
/// (the clone crossed a `CLONE_NEWPID` boundary).
pub fn getppid(engine: &mut Engine, notif: &SeccompNotif) -> HandlerResult {
    let tid = notif.pid as AbsTid;
    let parent = engine.registry.get(tid).ok_or(Errno::SRCH)?.parent;
    let ns_ppid = parent
        .and_then(|p| engine.registry.get(p))
        .map(|p| p.tgid)
        .and_then(|ptgid| engine.registry.ns_view(tid, ptgid))
        .unwrap_or(0);
    Ok(SyscallOutcome::Success(i64::from(ns_ppid)))
}

/// `kill(tgid, sig)`: resolve the namespaced target, then signal the
/// absolute thread group on the host.
pub fn kill(engine: &mut Engine, notif: &SeccompNotif) -> HandlerResult {
    let tid = notif.pid as AbsTid;
    let target = notif.data.args[0] as i64 as NsTgid;
    if target <= 0 {
        // Process groups and broadcast are out of scope.
        return Err(Errno::INVAL);
    }
    let abs = engine.registry.get_namespaced(tid, target)?;
    let abs_tgid = engine.registry.get(abs).ok_or(Errno::SRCH)?.tgid;
    let sig = notif.data.args[1] as i32;

    tracing::debug!(tid, target, abs_tgid, sig, "kill");
    if unsafe { libc::kill(abs_tgid, sig) } < 0 {
        return Err(last_errno());
    }
    Ok(SyscallOutcome::Success(0))
}

pub fn exit(engine: &mut Engine, notif: &SeccompNotif) -> HandlerResult {
    engine.registry.handle_exit(notif.pid as AbsTid);
    Ok(SyscallOutcome::Continue)
}

pub fn exit_group(engine: &mut Engine, notif: &SeccompNotif) -> HandlerResult {
    engine.registry.handle_exit_group(notif.pid as AbsTid);
    Ok(SyscallOutcome::Continue)
}

/// The clone trap cannot tell us the child tid (it does not exist yet),
/// so remember the flags for the scan that will discover the child.
pub fn clone(engine: &mut Engine, notif: &SeccompNotif) -> HandlerResult {
    let tid = notif.pid as AbsTid;
    engine.registry.record_clone_flags(tid, notif.data.args[0]);
    Ok(SyscallOutcome::Continue)
}

/// fork/vfork are flagless clones; record that so a stale recording from
/// an earlier clone cannot leak onto this child.
pub fn fork(engine: &mut Engine, notif: &SeccompNotif) -> HandlerResult {
    engine
        .registry
        .record_clone_flags(notif.pid as AbsTid, 0);
    Ok(SyscallOutcome::Continue)
}

/// `clone3` passes its flags in a guest-memory struct; read them through
/// the bridge, falling back to `/proc` inference if the read fails.
pub fn clone3(engine: &mut Engine, notif: &SeccompNotif) -> HandlerResult {
    let tid = notif.pid as AbsTid;
    let size = notif.data.args[1];
    if size >= size_of::<u64>() as u64 {
        // struct clone_args starts with the flags word.
        if let Ok(flags) = engine.mem(tid).read::<u64>(notif.data.args[0]) {
            engine.registry.record_clone_flags(tid, flags);
        }
    }
    Ok(SyscallOutcome::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::dispatch;
    use crate::dispatch::testutil::{engine, notif};

    const TID: AbsTid = 100;
    const CLONE_NEWPID: u64 = libc::CLONE_NEWPID as u64;

    #[test]
    fn identity_of_the_guest_root() {
        let (_base, mut eng) = engine(TID);
        let n = notif(TID, libc::SYS_getpid, [0; 6]);
        assert_eq!(dispatch(&mut eng, &n), SyscallOutcome::Success(1));
        let n = notif(TID, libc::SYS_gettid, [0; 6]);
        assert_eq!(dispatch(&mut eng, &n), SyscallOutcome::Success(1));
        let n = notif(TID, libc::SYS_getppid, [0; 6]);
        assert_eq!(dispatch(&mut eng, &n), SyscallOutcome::Success(0));
    }

    #[test]
    fn namespace_isolation() {
        let (_base, mut eng) = engine(TID);
        eng.registry.register_child(TID, 200, CLONE_NEWPID).unwrap();

        // Child of a CLONE_NEWPID clone: pid 1 in its world, no parent
        let n = notif(200, libc::SYS_getpid, [0; 6]);
        assert_eq!(dispatch(&mut eng, &n), SyscallOutcome::Success(1));
        let n = notif(200, libc::SYS_getppid, [0; 6]);
        assert_eq!(dispatch(&mut eng, &n), SyscallOutcome::Success(0));
    }

    #[test]
    fn visible_parent_is_reported() {
        let (_base, mut eng) = engine(TID);
        eng.registry.register_child(TID, 200, 0).unwrap();
        let n = notif(200, libc::SYS_getppid, [0; 6]);
        assert_eq!(dispatch(&mut eng, &n), SyscallOutcome::Success(1));
        let n = notif(200, libc::SYS_getpid, [0; 6]);
        assert_eq!(dispatch(&mut eng, &n), SyscallOutcome::Success(2));
    }

    #[test]
    fn kill_rejects_non_positive_targets() {
        let (_base, mut eng) = engine(TID);
        let n = notif(TID, libc::SYS_kill, [0, libc::SIGKILL as u64, 0, 0, 0, 0]);
        assert_eq!(dispatch(&mut eng, &n), SyscallOutcome::Error(Errno::INVAL));
        let n = notif(
            TID,
            libc::SYS_kill,
            [(-5i64) as u64, libc::SIGTERM as u64, 0, 0, 0, 0],
        );
        assert_eq!(dispatch(&mut eng, &n), SyscallOutcome::Error(Errno::INVAL));
    }

    #[test]
    fn kill_unknown_target_is_esrch() {
        let (_base, mut eng) = engine(TID);
        let n = notif(TID, libc::SYS_kill, [42, libc::SIGTERM as u64, 0, 0, 0, 0]);
        assert_eq!(dispatch(&mut eng, &n), SyscallOutcome::Error(Errno::SRCH));
    }

    #[test]
    fn exit_updates_registry_and_continues() {
        let (_base, mut eng) = engine(TID);
        eng.registry.register_child(TID, 200, 0).unwrap();
        let n = notif(200, libc::SYS_exit, [0; 6]);
        assert_eq!(dispatch(&mut eng, &n), SyscallOutcome::Continue);
        assert!(eng.registry.get(200).is_none());
    }

    #[test]
    fn exit_group_removes_the_whole_group() {
        let (_base, mut eng) = engine(TID);
        eng.registry.register_child(TID, 200, 0).unwrap();
        eng.registry
            .register_child(200, 201, libc::CLONE_THREAD as u64)
            .unwrap();
        let n = notif(200, libc::SYS_exit_group, [0; 6]);
        assert_eq!(dispatch(&mut eng, &n), SyscallOutcome::Continue);
        assert!(eng.registry.get(200).is_none());
        assert!(eng.registry.get(201).is_none());
    }

    #[test]
    fn clone_records_flags_for_the_scan() {
        let (_base, mut eng) = engine(TID);
        let n = notif(TID, libc::SYS_clone, [CLONE_NEWPID, 0, 0, 0, 0, 0]);
        assert_eq!(dispatch(&mut eng, &n), SyscallOutcome::Continue);
        // The recorded flags are consumed when the child surfaces; the
        // classification path itself is covered by the registry tests.
    }

    #[test]
    fn clone3_reads_flags_from_guest_memory() {
        let (_base, mut eng) = engine(TID);
        // struct clone_args { u64 flags; ... }
        let args = [CLONE_NEWPID, 0u64, 0, 0, 0, 0, 0, 0];
        let n = notif(
            TID,
            libc::SYS_clone3,
            [args.as_ptr() as u64, (args.len() * 8) as u64, 0, 0, 0, 0],
        );
        assert_eq!(dispatch(&mut eng, &n), SyscallOutcome::Continue);
    }
}
