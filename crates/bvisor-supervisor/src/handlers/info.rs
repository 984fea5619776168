//! System information.
//!
//! `sysinfo` is fully synthesised: the guest gets a fixed 2 GiB machine
//! with half its memory free, no load, a process count matching the
//! threads we know about, and an uptime measured from supervisor start.
//! Nothing of the host shines through.

use bvisor_sys::notify::SeccompNotif;

use crate::dispatch::{Engine, HandlerResult, SyscallOutcome};
use crate::AbsTid;

const TOTAL_RAM: u64 = 2 * 1024 * 1024 * 1024;
const FREE_RAM: u64 = 1024 * 1024 * 1024;

pub fn sysinfo(engine: &mut Engine, notif: &SeccompNotif) -> HandlerResult {
    let tid = notif.pid as AbsTid;

    // SAFETY: sysinfo is a plain C struct; zero is a valid initial state.
    let mut info: libc::sysinfo = unsafe { std::mem::zeroed() };
    info.uptime = engine.started.elapsed().as_secs() as libc::c_long;
    info.loads = [0; 3];
    info.totalram = TOTAL_RAM;
    info.freeram = FREE_RAM;
    info.procs = engine.registry.len().min(usize::from(u16::MAX)) as u16;
    info.mem_unit = 1;

    engine.mem(tid).write(notif.data.args[0], &info)?;
    Ok(SyscallOutcome::Success(0))
}
