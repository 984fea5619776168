//! Sandbox configuration.
//!
//! A `SandboxConfig` describes everything needed to run a command under
//! the supervisor: the guest command line, where the overlay root should
//! live, and the experimental knobs.
//!
//! ## Example
//!
//! ```ignore
//! use bvisor_supervisor::SandboxConfig;
//!
//! let config = SandboxConfig::new(["python3", "main.py"])
//!     .env("PYTHONUNBUFFERED", "1");
//! ```
//!
//! ## Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `tmpdir` | `std::env::temp_dir()` |
//! | `env` | inherited from the supervisor |
//! | `time_scale` | `None` (clock_nanosleep passes through) |

use std::path::PathBuf;

/// Complete sandbox configuration.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Guest command line; `cmd[0]` is resolved via `PATH`.
    pub cmd: Vec<String>,
    /// Extra environment entries layered over the inherited environment.
    pub env: Vec<(String, String)>,
    /// Base directory for the overlay root. `None` uses the system tmpdir.
    pub tmpdir: Option<PathBuf>,
    /// Experimental: scale factor applied to guest `clock_nanosleep`
    /// requests. `None` (production) passes sleeps through untouched.
    pub time_scale: Option<f64>,
}

impl SandboxConfig {
    pub fn new(cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            tmpdir: None,
            time_scale: None,
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn tmpdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tmpdir = Some(dir.into());
        self
    }

    /// Enable the experimental time-scaling hook.
    ///
    /// When set, guest relative sleeps are rewritten (through the memory
    /// bridge) by this factor before the kernel executes them.
    pub fn time_scale(mut self, scale: f64) -> Self {
        self.time_scale = Some(scale);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_new() {
        let config = SandboxConfig::new(["echo", "hi"]);
        assert_eq!(config.cmd, vec!["echo", "hi"]);
        assert!(config.time_scale.is_none());
        assert!(config.tmpdir.is_none());
    }

    #[test]
    fn config_builder() {
        let config = SandboxConfig::new(["sleep", "60"])
            .env("TZ", "UTC")
            .tmpdir("/var/tmp")
            .time_scale(0.01);
        assert_eq!(config.env, vec![("TZ".into(), "UTC".into())]);
        assert_eq!(config.tmpdir.as_deref(), Some(std::path::Path::new("/var/tmp")));
        assert_eq!(config.time_scale, Some(0.01));
    }
}
