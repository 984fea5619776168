//! Time syscalls.
//!
//! `clock_nanosleep` passes through in production. With the experimental
//! time-scale knob set, relative sleep requests are rewritten in guest
//! memory before the kernel executes them; absolute deadlines are left
//! alone since scaling them would skew the guest's clock arithmetic.

use bvisor_sys::notify::SeccompNotif;

use crate::dispatch::{Engine, HandlerResult, SyscallOutcome};
use crate::AbsTid;

pub fn clock_nanosleep(engine: &mut Engine, notif: &SeccompNotif) -> HandlerResult {
    if let Some(scale) = engine.config.time_scale {
        let flags = notif.data.args[1] as i32;
        if flags & libc::TIMER_ABSTIME == 0 {
            rescale_request(engine, notif, scale);
        }
    }
    Ok(SyscallOutcome::Continue)
}

fn rescale_request(engine: &Engine, notif: &SeccompNotif, scale: f64) {
    let tid = notif.pid as AbsTid;
    let mem = engine.mem(tid);
    let addr = notif.data.args[2];
    let Ok(ts) = mem.read::<libc::timespec>(addr) else {
        return;
    };

    let total = ts.tv_sec as f64 + ts.tv_nsec as f64 / 1e9;
    let scaled = (total * scale).max(0.0);
    let rewritten = libc::timespec {
        tv_sec: scaled.trunc() as libc::time_t,
        tv_nsec: ((scaled.fract() * 1e9) as libc::c_long).clamp(0, 999_999_999),
    };
    if mem.write(addr, &rewritten).is_err() {
        tracing::debug!(tid, "timespec rewrite failed");
    } else {
        tracing::trace!(tid, scale, "sleep rescaled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::dispatch;
    use crate::dispatch::testutil::{engine, notif};

    const TID: AbsTid = 100;

    #[test]
    fn passthrough_by_default() {
        let (_base, mut eng) = engine(TID);
        let ts = libc::timespec {
            tv_sec: 10,
            tv_nsec: 0,
        };
        let n = notif(
            TID,
            libc::SYS_clock_nanosleep,
            [libc::CLOCK_MONOTONIC as u64, 0, &ts as *const _ as u64, 0, 0, 0],
        );
        assert_eq!(dispatch(&mut eng, &n), SyscallOutcome::Continue);
        // Untouched
        assert_eq!(ts.tv_sec, 10);
        assert_eq!(ts.tv_nsec, 0);
    }

    #[test]
    fn relative_sleeps_are_rescaled() {
        let (_base, mut eng) = engine(TID);
        eng.config.time_scale = Some(0.5);
        let mut ts = libc::timespec {
            tv_sec: 10,
            tv_nsec: 0,
        };
        let n = notif(
            TID,
            libc::SYS_clock_nanosleep,
            [
                libc::CLOCK_MONOTONIC as u64,
                0,
                &mut ts as *mut _ as u64,
                0,
                0,
                0,
            ],
        );
        assert_eq!(dispatch(&mut eng, &n), SyscallOutcome::Continue);
        assert_eq!(ts.tv_sec, 5);
        assert_eq!(ts.tv_nsec, 0);
    }

    #[test]
    fn absolute_deadlines_stay_put() {
        let (_base, mut eng) = engine(TID);
        eng.config.time_scale = Some(0.5);
        let mut ts = libc::timespec {
            tv_sec: 1000,
            tv_nsec: 0,
        };
        let n = notif(
            TID,
            libc::SYS_clock_nanosleep,
            [
                libc::CLOCK_MONOTONIC as u64,
                libc::TIMER_ABSTIME as u64,
                &mut ts as *mut _ as u64,
                0,
                0,
                0,
            ],
        );
        assert_eq!(dispatch(&mut eng, &n), SyscallOutcome::Continue);
        assert_eq!(ts.tv_sec, 1000);
    }

    #[test]
    fn fractional_scaling_splits_into_nanos() {
        let (_base, mut eng) = engine(TID);
        eng.config.time_scale = Some(0.25);
        let mut ts = libc::timespec {
            tv_sec: 1,
            tv_nsec: 0,
        };
        let n = notif(
            TID,
            libc::SYS_clock_nanosleep,
            [
                libc::CLOCK_MONOTONIC as u64,
                0,
                &mut ts as *mut _ as u64,
                0,
                0,
                0,
            ],
        );
        dispatch(&mut eng, &n);
        assert_eq!(ts.tv_sec, 0);
        assert!((ts.tv_nsec - 250_000_000).abs() < 1000, "{}", ts.tv_nsec);
    }
}
