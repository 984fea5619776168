//! bvisor-supervisor: sandbox supervision without containers or VMs.
//!
//! A parent supervisor process forks a guest, has the guest install a
//! seccomp filter that traps every syscall into `SECCOMP_RET_USER_NOTIF`,
//! imports the resulting listener fd via `pidfd_getfd`, and then answers
//! each trapped syscall on the guest's behalf. On top of that loop the
//! crate virtualises:
//!
//! - **Filesystem** - a path router sends each absolute path to one of four
//!   backends: read-only passthrough, copy-on-write, a private `/tmp`, or a
//!   rendered `/proc`
//! - **Processes** - a thread registry mirrors the guest's PID-namespace
//!   tree so `getpid`/`getppid`/`kill`/`/proc` agree with the guest's view
//! - **Time** - `clock_nanosleep` passes through, with an experimental
//!   scaling hook
//!
//! ## Quick Start
//!
//! ```ignore
//! use bvisor_supervisor::{Sandbox, SandboxConfig};
//!
//! let status = Sandbox::run(SandboxConfig::new(["echo", "hello"]))?;
//! std::process::exit(status.code());
//! ```

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod bridge;
pub mod child;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod fdtable;
pub mod fs;
pub mod handlers;
pub mod overlay;
pub mod sandbox;
pub mod supervisor;
pub mod threads;

pub use config::SandboxConfig;
pub use errors::SandboxError;
pub use sandbox::{GuestStatus, Sandbox};
pub use supervisor::Supervisor;

/// Thread id as seen in the supervisor's own PID namespace.
pub type AbsTid = i32;
/// Thread-group id as seen in the supervisor's own PID namespace.
pub type AbsTgid = i32;
/// Thread id as seen from inside a (possibly nested) guest PID namespace.
pub type NsTid = i32;
/// Thread-group id as seen from inside a guest PID namespace.
pub type NsTgid = i32;
