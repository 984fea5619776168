//! Reading the host's `/proc` to learn about guest threads.
//!
//! Clone traps do not tell the supervisor which tid the kernel handed
//! out, so new threads are discovered after the fact by re-scanning the
//! `/proc` entries of threads we already know. The `NSpid:` field length
//! and the `Tgid`/`Pid` relation recover the clone flags the trap could
//! not.

use std::fs;
use std::io;

use crate::{AbsTgid, AbsTid};

/// The fields of `/proc/<tid>/status` the registry cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcStatus {
    pub tid: AbsTid,
    pub tgid: AbsTgid,
    pub ppid: AbsTid,
    /// Thread id in each PID namespace from the supervisor's down to the
    /// thread's innermost, per the `NSpid:` line.
    pub ns_tids: Vec<i32>,
}

/// Read and parse `/proc/<tid>/status`.
pub fn read_status(tid: AbsTid) -> io::Result<ProcStatus> {
    let text = fs::read_to_string(format!("/proc/{tid}/status"))?;
    parse_status(&text).ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad status file"))
}

pub fn parse_status(text: &str) -> Option<ProcStatus> {
    let mut tid = None;
    let mut tgid = None;
    let mut ppid = None;
    let mut ns_tids = Vec::new();
    for line in text.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let rest = rest.trim();
        match key {
            "Pid" => tid = rest.parse().ok(),
            "Tgid" => tgid = rest.parse().ok(),
            "PPid" => ppid = rest.parse().ok(),
            "NSpid" => {
                ns_tids = rest
                    .split_whitespace()
                    .filter_map(|t| t.parse().ok())
                    .collect();
            }
            _ => {}
        }
    }
    let tid = tid?;
    if ns_tids.is_empty() {
        // Old kernels omit NSpid; the thread is then only in our own
        // namespace.
        ns_tids.push(tid);
    }
    Some(ProcStatus {
        tid,
        tgid: tgid?,
        ppid: ppid?,
        ns_tids,
    })
}

/// All thread ids of a thread group, from `/proc/<tgid>/task`.
pub fn list_tasks(tgid: AbsTgid) -> io::Result<Vec<AbsTid>> {
    let mut tids = Vec::new();
    for entry in fs::read_dir(format!("/proc/{tgid}/task"))? {
        let entry = entry?;
        if let Ok(tid) = entry.file_name().to_string_lossy().parse() {
            tids.push(tid);
        }
    }
    Ok(tids)
}

/// Direct children of a thread, from `/proc/<tgid>/task/<tid>/children`.
pub fn list_children(tgid: AbsTgid, tid: AbsTid) -> io::Result<Vec<AbsTid>> {
    let text = fs::read_to_string(format!("/proc/{tgid}/task/{tid}/children"))?;
    Ok(text
        .split_whitespace()
        .filter_map(|t| t.parse().ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Name:\tcat
Umask:\t0022
State:\tR (running)
Tgid:\t4242
Ngid:\t0
Pid:\t4242
PPid:\t4200
TracerPid:\t0
NSpid:\t4242 2 1
Threads:\t1
";

    #[test]
    fn parses_the_interesting_fields() {
        let st = parse_status(SAMPLE).unwrap();
        assert_eq!(st.tid, 4242);
        assert_eq!(st.tgid, 4242);
        assert_eq!(st.ppid, 4200);
        assert_eq!(st.ns_tids, vec![4242, 2, 1]);
    }

    #[test]
    fn missing_nspid_defaults_to_own_pid() {
        let st = parse_status("Tgid:\t7\nPid:\t8\nPPid:\t1\n").unwrap();
        assert_eq!(st.ns_tids, vec![8]);
        assert_eq!(st.tgid, 7);
    }

    #[test]
    fn truncated_status_is_rejected() {
        assert!(parse_status("Pid:\t8\n").is_none());
    }

    #[test]
    fn reads_own_status() {
        let tid = unsafe { libc::gettid() };
        let st = read_status(tid).unwrap();
        assert_eq!(st.tid, tid);
        assert_eq!(st.tgid, unsafe { libc::getpid() });
    }

    #[test]
    fn lists_own_tasks() {
        let pid = unsafe { libc::getpid() };
        let tasks = list_tasks(pid).unwrap();
        assert!(tasks.contains(&unsafe { libc::gettid() }));
    }
}
