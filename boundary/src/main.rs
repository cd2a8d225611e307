//! Boundary CLI - runs one pipeline against one host.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use boundary::channel::SshChannel;
use boundary::config::Config;
use boundary::observability::{init_tracing, LogFormat};
use boundary::pipeline::Orchestrator;

#[derive(Parser)]
#[command(name = "boundary")]
#[command(about = "Staged, audited takeover of a remote host", long_about = None)]
#[command(version)]
struct Cli {
    /// Pipeline configuration (JSON)
    #[arg(short, long, env = "BOUNDARY_CONFIG")]
    config: PathBuf,

    /// Directory for the audit record (overrides the configuration)
    #[arg(long, env = "BOUNDARY_AUDIT_DIR")]
    audit_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Per-command SSH timeout in seconds
    #[arg(long, default_value = "60")]
    command_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    init_tracing(LogFormat::from_json_flag(cli.json_logs)).context("failed to initialise logging")?;

    let mut config = Config::from_json_file(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    if let Some(dir) = cli.audit_dir {
        config.audit_dir = dir;
    }

    let channel = SshChannel::from_config(&config)
        .with_timeout(std::time::Duration::from_secs(cli.command_timeout));
    let report = Orchestrator::new(Arc::new(channel), config)
        .run()
        .await
        .context("audit record could not be written")?;

    println!("{}", report.audit_path.display());

    if let Some(error) = &report.error {
        eprintln!("{}: {error}", report.final_state);
        if let Some(armed) = report.armed_switch {
            eprintln!(
                "dead man's switch (pid {}) stays armed; recovery runs within {}s",
                armed.pid, armed.timeout_seconds
            );
        }
    }

    Ok(if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
