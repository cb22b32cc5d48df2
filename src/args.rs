use std::path::PathBuf;

use clap::Parser;

/// Command-line arguments for the E2E harness binary.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "End-to-end orchestration harness for the rssdm backend", long_about = None)]
pub struct Args {
    /// Path to harness.toml (optional)
    #[arg(short, long, env = "RSSDM_E2E_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the docker compose file for dependency services
    #[arg(long)]
    pub compose_file: Option<PathBuf>,

    /// Compose project name (isolation namespace for containers and volumes)
    #[arg(long)]
    pub project: Option<String>,

    /// Command used to launch the backend subprocess
    #[arg(long)]
    pub backend_command: Option<String>,

    /// Overall run deadline, e.g. "10m"
    #[arg(long)]
    pub deadline: Option<String>,

    /// Leave services running after the run (skip teardown)
    #[arg(long)]
    pub keep_services: bool,
}
