use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;

/// Thin wrapper over the `docker` CLI. The binary path is injectable so
/// tests can point it at a fake script.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStatus {
    pub service: String,
    pub container_id: String,
    pub status: String,
    pub health: Option<String>,
}

impl ContainerStatus {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == "running" && self.health.as_deref().is_none_or(|h| h == "healthy")
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Brings the declared service group up in detached mode and waits for
    /// compose's own health-check semantics, bounded by `wait_timeout`.
    ///
    /// # Errors
    /// Returns an error if the compose invocation fails or exits non-zero.
    pub async fn compose_up(
        &self,
        compose_file: &Path,
        project: &str,
        wait_timeout: Duration,
    ) -> Result<()> {
        let args = compose_up_args(compose_file, project, wait_timeout);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&args, "docker compose up").await
    }

    /// Tears the service group down, removing volumes. Safe to call when
    /// nothing is running; compose treats that as a no-op.
    ///
    /// # Errors
    /// Returns an error if the compose invocation fails or exits non-zero.
    pub async fn compose_down(&self, compose_file: &Path, project: &str) -> Result<()> {
        let args = compose_down_args(compose_file, project);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&args, "docker compose down").await
    }

    /// Reports per-service status for the given services.
    ///
    /// # Errors
    /// Returns an error if any service has no container or inspect fails.
    pub async fn compose_ps(
        &self,
        compose_file: &Path,
        project: &str,
        services: &[String],
    ) -> Result<Vec<ContainerStatus>> {
        let mut statuses = Vec::with_capacity(services.len());
        for service in services {
            let container_id = self
                .output(
                    &[
                        "compose",
                        "-f",
                        compose_file.to_string_lossy().as_ref(),
                        "-p",
                        project,
                        "ps",
                        "-q",
                        service,
                    ],
                    "docker compose ps",
                )
                .await?;
            let container_id = container_id.trim().to_string();
            if container_id.is_empty() {
                anyhow::bail!("no container found for compose service '{service}'");
            }
            let inspect = self
                .output(
                    &[
                        "inspect",
                        "--format",
                        "{{.State.Status}}|{{if .State.Health}}{{.State.Health.Status}}{{end}}",
                        &container_id,
                    ],
                    "docker inspect",
                )
                .await?;
            let (status, health) = parse_container_state(&inspect);
            statuses.push(ContainerStatus {
                service: service.clone(),
                container_id,
                status,
                health,
            });
        }
        Ok(statuses)
    }

    /// Returns the combined stdout and stderr of `docker logs <container>`.
    /// The download client writes its generated password to stderr.
    ///
    /// # Errors
    /// Returns an error if the container does not exist.
    pub async fn logs(&self, container: &str) -> Result<String> {
        let output = Command::new(&self.program)
            .args(["logs", container])
            .output()
            .await
            .with_context(|| format!("Failed to run docker logs {container}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("docker logs {container} failed: {stderr}");
        }
        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }

    async fn run(&self, args: &[&str], context: &str) -> Result<()> {
        let status = Command::new(&self.program)
            .args(args)
            .status()
            .await
            .with_context(|| format!("Failed to run {context}"))?;
        if !status.success() {
            anyhow::bail!("{context} failed with status: {status}");
        }
        Ok(())
    }

    async fn output(&self, args: &[&str], context: &str) -> Result<String> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to run {context}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{context} failed: {stderr}");
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

fn compose_up_args(compose_file: &Path, project: &str, wait_timeout: Duration) -> Vec<String> {
    vec![
        "compose".to_string(),
        "-f".to_string(),
        compose_file.to_string_lossy().to_string(),
        "-p".to_string(),
        project.to_string(),
        "up".to_string(),
        "-d".to_string(),
        "--wait".to_string(),
        "--wait-timeout".to_string(),
        wait_timeout.as_secs().max(1).to_string(),
    ]
}

fn compose_down_args(compose_file: &Path, project: &str) -> Vec<String> {
    vec![
        "compose".to_string(),
        "-f".to_string(),
        compose_file.to_string_lossy().to_string(),
        "-p".to_string(),
        project.to_string(),
        "down".to_string(),
        "-v".to_string(),
    ]
}

fn parse_container_state(raw: &str) -> (String, Option<String>) {
    let trimmed = raw.trim();
    let mut parts = trimmed.splitn(2, '|');
    let status = parts.next().unwrap_or_default().to_string();
    let health = parts.next().and_then(|value| {
        let value = value.trim();
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    });
    (status, health)
}
