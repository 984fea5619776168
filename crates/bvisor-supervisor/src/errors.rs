//! Supervisor-fatal error types.
//!
//! Guest-visible failures are plain `rustix::io::Errno` values carried in
//! handler results and turned into errno returns at the reply boundary;
//! they never appear here. `SandboxError` is reserved for conditions that
//! end the supervisor itself: a broken listener fd, a failed fork, a
//! handoff that never completed.

use std::io;

use rustix::io::Errno;
use thiserror::Error;

/// Error that terminates the sandbox run.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("fork: {0}")]
    Fork(Errno),

    #[error("overlay: {0}")]
    Overlay(io::Error),

    #[error("fd handoff: {0}")]
    Handoff(String),

    #[error("pidfd: {0}")]
    Pidfd(Errno),

    #[error("notify recv: {0}")]
    Recv(Errno),

    #[error("notify send: {0}")]
    Send(Errno),

    #[error("wait: {0}")]
    Wait(Errno),

    #[error("io: {0}")]
    Io(#[from] io::Error),
}

/// Result type for supervisor operations.
pub type Result<T> = std::result::Result<T, SandboxError>;
