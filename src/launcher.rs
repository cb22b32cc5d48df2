use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::TempDir;
use tracing::{info, warn};

use crate::config::Settings;
use crate::docker::DockerCli;
use crate::error::HarnessError;
use crate::probe::{self, ReadinessCheck};

pub const BACKEND_SERVICE: &str = "backend";

const BACKEND_CONFIG_DIR: &str = "config";
const BACKEND_DATA_DIR: &str = "data";
const BACKEND_STDOUT_LOG: &str = "backend.stdout.log";
const BACKEND_STDERR_LOG: &str = "backend.stderr.log";
const TERM_WAIT: Duration = Duration::from_secs(10);
const KILL_WAIT: Duration = Duration::from_secs(5);
const ROLLBACK_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Subprocess,
    Container,
}

/// Lifecycle states of a managed service. Transitions are monotonic:
/// Stopped → Starting → Ready → Stopped; Failed and StoppedWithError are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Ready,
    Failed,
    StoppedWithError,
}

impl ServiceState {
    fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Stopped, Self::Starting)
                | (Self::Starting, Self::Ready | Self::Failed | Self::Stopped)
                | (Self::Ready, Self::Stopped | Self::StoppedWithError)
        )
    }
}

/// The harness's record of one externally managed dependency.
#[derive(Debug)]
pub struct ServiceHandle {
    name: String,
    kind: ServiceKind,
    address: String,
    container: Option<String>,
    state: ServiceState,
}

impl ServiceHandle {
    fn new(name: &str, kind: ServiceKind, address: String, container: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            address,
            container,
            state: ServiceState::Stopped,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }

    #[must_use]
    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// Applies a state transition if it is legal; illegal transitions are
    /// ignored, which is what makes repeated stop calls no-ops.
    fn advance(&mut self, next: ServiceState) -> bool {
        if self.state.can_advance_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }
}

/// Starts and stops the three external services the harness depends on: the
/// backend subprocess, the download client container, and the fixture server
/// container. Owns all `ServiceHandle`s; nothing else mutates them.
pub struct ServiceLauncher {
    settings: Settings,
    docker: DockerCli,
    work_root: TempDir,
    backend: Option<tokio::process::Child>,
    handles: Vec<ServiceHandle>,
    compose_started: bool,
    torn_down: bool,
}

impl ServiceLauncher {
    /// Brings up the full service group and blocks until every service is
    /// ready. If any one service misses its readiness timeout, everything
    /// already started is stopped before the error is returned; partial
    /// successes are never left running.
    ///
    /// # Errors
    /// Returns [`HarnessError::Startup`] naming the failed service.
    pub async fn start_all(settings: &Settings) -> Result<Self, HarnessError> {
        let docker = DockerCli::new(&settings.compose.docker_bin);
        let work_root = tempfile::Builder::new()
            .prefix("rssdm-e2e-")
            .tempdir()
            .map_err(|err| {
                startup_error(
                    BACKEND_SERVICE,
                    "temp dir creation failed",
                    &err,
                    Duration::ZERO,
                )
            })?;

        let mut launcher = Self {
            settings: settings.clone(),
            docker,
            work_root,
            backend: None,
            handles: build_handles(settings),
            compose_started: false,
            torn_down: false,
        };

        if let Err(err) = launcher.start_inner().await {
            launcher.mark_failed(err.service());
            let limit = settings
                .teardown_timeout()
                .unwrap_or(ROLLBACK_TEARDOWN_TIMEOUT);
            if tokio::time::timeout(limit, launcher.teardown()).await.is_err() {
                warn!("rollback teardown did not finish within {limit:?}");
            }
            return Err(err);
        }
        Ok(launcher)
    }

    async fn start_inner(&mut self) -> Result<(), HarnessError> {
        let settings = self.settings.clone();
        let timeout = settings.ready_timeout().map_err(|err| {
            startup_error(BACKEND_SERVICE, "invalid ready timeout", &err, Duration::ZERO)
        })?;
        let interval = settings.poll_interval().map_err(|err| {
            startup_error(BACKEND_SERVICE, "invalid poll interval", &err, Duration::ZERO)
        })?;

        for handle in &mut self.handles {
            handle.advance(ServiceState::Starting);
        }

        info!("bringing up compose project '{}'", settings.compose.project);
        self.docker
            .compose_up(&settings.compose.file, &settings.compose.project, timeout)
            .await
            .map_err(|err| {
                startup_error(
                    &settings.compose.downloader_service,
                    "compose up failed",
                    &err,
                    timeout,
                )
            })?;
        self.compose_started = true;

        self.spawn_backend()
            .map_err(|err| startup_error(BACKEND_SERVICE, "spawn failed", &err, timeout))?;

        // None of the three depends on another being ready; poll in parallel.
        let targets = vec![
            (
                BACKEND_SERVICE.to_string(),
                ReadinessCheck::Http {
                    url: format!("{}/api/v1/setup/status", settings.backend_url()),
                },
            ),
            (
                settings.compose.downloader_service.clone(),
                ReadinessCheck::Http {
                    url: settings.downloader_url(),
                },
            ),
            (
                settings.compose.fixture_service.clone(),
                ReadinessCheck::Http {
                    url: format!("{}/health", settings.fixture_url()),
                },
            ),
        ];
        probe::wait_all_ready(targets, timeout, interval).await?;

        for handle in &mut self.handles {
            handle.advance(ServiceState::Ready);
            info!(
                "service '{}' ready at {}",
                handle.name(),
                handle.address()
            );
        }
        Ok(())
    }

    /// Creates the isolated working directory layout the backend resolves
    /// paths against and launches it from there.
    fn spawn_backend(&mut self) -> Result<()> {
        let workdir = self.work_root.path().join("backend");
        std::fs::create_dir_all(workdir.join(BACKEND_CONFIG_DIR))
            .context("Failed to create backend config dir")?;
        std::fs::create_dir_all(workdir.join(BACKEND_DATA_DIR))
            .context("Failed to create backend data dir")?;

        let stdout = std::fs::File::create(workdir.join(BACKEND_STDOUT_LOG))
            .context("Failed to create backend stdout log")?;
        let stderr = std::fs::File::create(workdir.join(BACKEND_STDERR_LOG))
            .context("Failed to create backend stderr log")?;

        let child = tokio::process::Command::new(&self.settings.backend.command)
            .args(&self.settings.backend.args)
            .current_dir(&workdir)
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .with_context(|| {
                format!("Failed to spawn backend: {}", self.settings.backend.command)
            })?;
        info!(
            "backend subprocess spawned (pid {:?}, workdir {})",
            child.id(),
            workdir.display()
        );
        self.backend = Some(child);
        Ok(())
    }

    #[must_use]
    pub fn handles(&self) -> &[ServiceHandle] {
        &self.handles
    }

    #[must_use]
    pub fn docker(&self) -> &DockerCli {
        &self.docker
    }

    /// Stops the backend subprocess: SIGTERM first so it can flush and exit
    /// cleanly, SIGKILL only if it outlives the grace period. Idempotent;
    /// calling with the backend already stopped is a no-op.
    pub async fn stop_backend(&mut self) -> Result<(), HarnessError> {
        let Some(mut child) = self.backend.take() else {
            return Ok(());
        };
        let result = async {
            if let Some(pid) = child.id() {
                terminate(pid).await;
                if let Ok(waited) = tokio::time::timeout(TERM_WAIT, child.wait()).await {
                    waited?;
                    return Ok(());
                }
                warn!("backend (pid {pid}) outlived SIGTERM grace period, killing");
            }
            child.start_kill()?;
            tokio::time::timeout(KILL_WAIT, child.wait()).await??;
            Ok::<(), anyhow::Error>(())
        }
        .await;

        let state = if result.is_ok() {
            ServiceState::Stopped
        } else {
            ServiceState::StoppedWithError
        };
        if let Some(handle) = self.handle_mut(BACKEND_SERVICE) {
            handle.advance(state);
        }
        result.map_err(|err| HarnessError::Teardown {
            resource: BACKEND_SERVICE.to_string(),
            detail: err.to_string(),
        })
    }

    /// Stops every managed service. Best-effort: each failure is logged and
    /// never re-raised, so a teardown problem cannot mask the failure that
    /// triggered teardown. Safe to call more than once.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if let Err(err) = self.stop_backend().await {
            warn!("{err}");
        }

        if self.compose_started {
            let settings = self.settings.clone();
            if let Err(err) = self
                .docker
                .compose_down(&settings.compose.file, &settings.compose.project)
                .await
            {
                warn!(
                    "{}",
                    HarnessError::Teardown {
                        resource: settings.compose.project.clone(),
                        detail: err.to_string(),
                    }
                );
            } else {
                for handle in &mut self.handles {
                    if handle.kind() == ServiceKind::Container {
                        handle.advance(ServiceState::Stopped);
                    }
                }
            }
        }
        // The temp work root is removed when the TempDir drops with the
        // launcher itself.
        info!("teardown complete");
    }

    fn handle_mut(&mut self, name: &str) -> Option<&mut ServiceHandle> {
        self.handles.iter_mut().find(|handle| handle.name == name)
    }

    fn mark_failed(&mut self, name: &str) {
        if let Some(handle) = self.handle_mut(name) {
            handle.advance(ServiceState::Failed);
        }
    }
}

fn build_handles(settings: &Settings) -> Vec<ServiceHandle> {
    vec![
        ServiceHandle::new(
            BACKEND_SERVICE,
            ServiceKind::Subprocess,
            settings.backend_url(),
            None,
        ),
        ServiceHandle::new(
            &settings.compose.downloader_service,
            ServiceKind::Container,
            settings.downloader_url(),
            Some(settings.container_name(&settings.compose.downloader_service)),
        ),
        ServiceHandle::new(
            &settings.compose.fixture_service,
            ServiceKind::Container,
            settings.fixture_url(),
            Some(settings.container_name(&settings.compose.fixture_service)),
        ),
    ]
}

async fn terminate(pid: u32) {
    if let Err(err) = tokio::process::Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status()
        .await
    {
        warn!("failed to send SIGTERM to pid {pid}: {err}");
    }
}

fn startup_error(
    service: &str,
    what: &str,
    err: &dyn std::fmt::Display,
    timeout: Duration,
) -> HarnessError {
    HarnessError::Startup {
        service: service.to_string(),
        timeout,
        last_observed: format!("{what}: {err}"),
    }
}
