use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub backend: BackendSettings,
    pub compose: ComposeSettings,
    pub downloader: DownloaderSettings,
    pub fixture: FixtureSettings,
    pub credentials: Credentials,
    pub timeouts: TimeoutSettings,
}

/// The application-under-test, launched as a local subprocess.
#[derive(Debug, Deserialize, Clone)]
pub struct BackendSettings {
    pub command: String,
    pub args: Vec<String>,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ComposeSettings {
    pub file: PathBuf,
    pub project: String,
    pub downloader_service: String,
    pub fixture_service: String,
    pub docker_bin: String,
}

/// The real download client container (qBittorrent-compatible WebUI).
#[derive(Debug, Deserialize, Clone)]
pub struct DownloaderSettings {
    pub port: u16,
    pub username: String,
    /// Log line pattern with exactly one capture group for the generated
    /// WebUI password.
    pub secret_pattern: String,
}

/// The static fixture server container.
#[derive(Debug, Deserialize, Clone)]
pub struct FixtureSettings {
    pub port: u16,
    pub feed_path: String,
}

/// Account created through the setup wizard and used for login checks.
#[derive(Debug, Deserialize, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// All waits in the harness are bounded by one of these.
#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutSettings {
    pub ready: String,
    pub poll_interval: String,
    pub secret: String,
    pub run_deadline: String,
    pub teardown: String,
}

const DEFAULT_BACKEND_COMMAND: &str = "rssdm-server";
const DEFAULT_BACKEND_HOST: &str = "127.0.0.1";
const DEFAULT_BACKEND_PORT: u16 = 7892;
const DEFAULT_COMPOSE_FILE: &str = "docker-compose.test.yml";
const DEFAULT_PROJECT: &str = "rssdm-e2e";
const DEFAULT_DOWNLOADER_SERVICE: &str = "qbittorrent";
const DEFAULT_FIXTURE_SERVICE: &str = "mock-rss";
const DEFAULT_DOCKER_BIN: &str = "docker";
const DEFAULT_DOWNLOADER_PORT: u16 = 18080;
const DEFAULT_DOWNLOADER_USERNAME: &str = "admin";
const DEFAULT_SECRET_PATTERN: &str = r"temporary password is provided for this session: (\S+)";
const DEFAULT_FIXTURE_PORT: u16 = 18888;
const DEFAULT_FEED_PATH: &str = "/rss/mikan.xml";
const DEFAULT_USERNAME: &str = "testadmin";
const DEFAULT_PASSWORD: &str = "testpassword123";
const DEFAULT_READY_TIMEOUT: &str = "30s";
const DEFAULT_POLL_INTERVAL: &str = "1s";
const DEFAULT_SECRET_TIMEOUT: &str = "60s";
const DEFAULT_RUN_DEADLINE: &str = "10m";
const DEFAULT_TEARDOWN_TIMEOUT: &str = "60s";

impl Settings {
    /// Loads settings from defaults, an optional TOML file, and `RSSDM`
    /// environment variables, in that precedence order.
    ///
    /// # Errors
    /// Returns error if configuration parsing fails (e.g. invalid format).
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut s = Config::builder();

        s = s
            .set_default("backend.command", DEFAULT_BACKEND_COMMAND)?
            .set_default("backend.args", Vec::<String>::new())?
            .set_default("backend.host", DEFAULT_BACKEND_HOST)?
            .set_default("backend.port", DEFAULT_BACKEND_PORT)?
            .set_default("compose.file", DEFAULT_COMPOSE_FILE)?
            .set_default("compose.project", DEFAULT_PROJECT)?
            .set_default("compose.downloader_service", DEFAULT_DOWNLOADER_SERVICE)?
            .set_default("compose.fixture_service", DEFAULT_FIXTURE_SERVICE)?
            .set_default("compose.docker_bin", DEFAULT_DOCKER_BIN)?
            .set_default("downloader.port", DEFAULT_DOWNLOADER_PORT)?
            .set_default("downloader.username", DEFAULT_DOWNLOADER_USERNAME)?
            .set_default("downloader.secret_pattern", DEFAULT_SECRET_PATTERN)?
            .set_default("fixture.port", DEFAULT_FIXTURE_PORT)?
            .set_default("fixture.feed_path", DEFAULT_FEED_PATH)?
            .set_default("credentials.username", DEFAULT_USERNAME)?
            .set_default("credentials.password", DEFAULT_PASSWORD)?
            .set_default("timeouts.ready", DEFAULT_READY_TIMEOUT)?
            .set_default("timeouts.poll_interval", DEFAULT_POLL_INTERVAL)?
            .set_default("timeouts.secret", DEFAULT_SECRET_TIMEOUT)?
            .set_default("timeouts.run_deadline", DEFAULT_RUN_DEADLINE)?
            .set_default("timeouts.teardown", DEFAULT_TEARDOWN_TIMEOUT)?;

        let path = config_path.unwrap_or_else(|| PathBuf::from("harness.toml"));
        s = s.add_source(File::from(path).required(false));

        // e.g. RSSDM_BACKEND_PORT, RSSDM_COMPOSE_PROJECT
        s = s.add_source(Environment::with_prefix("RSSDM").separator("_"));

        s.build()?.try_deserialize()
    }

    /// Merges CLI arguments into the settings, overriding values if present.
    pub fn merge_with_args(&mut self, args: &crate::args::Args) {
        if let Some(compose_file) = &args.compose_file {
            compose_file.clone_into(&mut self.compose.file);
        }
        if let Some(project) = &args.project {
            project.clone_into(&mut self.compose.project);
        }
        if let Some(command) = &args.backend_command {
            command.clone_into(&mut self.backend.command);
        }
        if let Some(deadline) = &args.deadline {
            deadline.clone_into(&mut self.timeouts.run_deadline);
        }
    }

    /// Validates configuration values for correctness.
    ///
    /// # Errors
    /// Returns error if any setting is invalid or out of range.
    pub fn validate(&self) -> Result<()> {
        if self.backend.command.trim().is_empty() {
            anyhow::bail!("backend.command must not be empty");
        }
        if self.compose.project.trim().is_empty() {
            anyhow::bail!("compose.project must not be empty");
        }
        regex::Regex::new(&self.downloader.secret_pattern)
            .map_err(|err| anyhow::anyhow!("downloader.secret_pattern is invalid: {err}"))
            .and_then(|re| {
                if re.captures_len() == 2 {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!(
                        "downloader.secret_pattern must have exactly one capture group"
                    ))
                }
            })?;
        for (name, value) in [
            ("timeouts.ready", &self.timeouts.ready),
            ("timeouts.poll_interval", &self.timeouts.poll_interval),
            ("timeouts.secret", &self.timeouts.secret),
            ("timeouts.run_deadline", &self.timeouts.run_deadline),
            ("timeouts.teardown", &self.timeouts.teardown),
        ] {
            let parsed = humantime::parse_duration(value)
                .map_err(|err| anyhow::anyhow!("{name} is not a valid duration: {err}"))?;
            if parsed.is_zero() {
                anyhow::bail!("{name} must be greater than 0");
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn backend_url(&self) -> String {
        format!("http://{}:{}", self.backend.host, self.backend.port)
    }

    #[must_use]
    pub fn downloader_url(&self) -> String {
        format!("http://{}:{}", self.backend.host, self.downloader.port)
    }

    #[must_use]
    pub fn fixture_url(&self) -> String {
        format!("http://{}:{}", self.backend.host, self.fixture.port)
    }

    /// Compose assigns `<project>-<service>-1` to single-replica services.
    #[must_use]
    pub fn container_name(&self, service: &str) -> String {
        format!("{}-{service}-1", self.compose.project)
    }

    pub fn ready_timeout(&self) -> Result<Duration> {
        parse_timeout("timeouts.ready", &self.timeouts.ready)
    }

    pub fn poll_interval(&self) -> Result<Duration> {
        parse_timeout("timeouts.poll_interval", &self.timeouts.poll_interval)
    }

    pub fn secret_timeout(&self) -> Result<Duration> {
        parse_timeout("timeouts.secret", &self.timeouts.secret)
    }

    pub fn run_deadline(&self) -> Result<Duration> {
        parse_timeout("timeouts.run_deadline", &self.timeouts.run_deadline)
    }

    pub fn teardown_timeout(&self) -> Result<Duration> {
        parse_timeout("timeouts.teardown", &self.timeouts.teardown)
    }
}

fn parse_timeout(name: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|err| anyhow::anyhow!("{name} is not a valid duration: {err}"))
}
