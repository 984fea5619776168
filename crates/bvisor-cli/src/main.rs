//! bvisor CLI - run a command under the sandbox supervisor.
//!
//! ```text
//! bvisor [--time-scale <f>] <cmd> [args...]
//! ```
//!
//! The guest inherits stdio; the exit code is the guest's.

use clap::Parser;

use bvisor_supervisor::{Sandbox, SandboxConfig};

#[derive(Parser)]
#[command(name = "bvisor")]
#[command(author, version, about = "User-space sandbox supervisor")]
struct Cli {
    /// Experimental: scale guest clock_nanosleep requests by this factor
    #[arg(long, hide = true)]
    time_scale: Option<f64>,

    /// Base directory for the sandbox overlay (defaults to the tmpdir)
    #[arg(long)]
    tmpdir: Option<std::path::PathBuf>,

    /// Guest command line
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    cmd: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bvisor_supervisor=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = SandboxConfig::new(cli.cmd);
    if let Some(scale) = cli.time_scale {
        config = config.time_scale(scale);
    }
    if let Some(tmpdir) = cli.tmpdir {
        config = config.tmpdir(tmpdir);
    }

    let status = Sandbox::run(config)?;
    std::process::exit(status.code());
}
