use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::client::{ApiClient, ApiResponse};
use crate::config::Settings;
use crate::report::{Outcome, RunReport};
use crate::state::SharedState;

/// Version string a development build reports. Dev builds accept every
/// request as an implicit default identity, so unauthenticated-access checks
/// must branch on this.
pub const DEV_VERSION: &str = "DEV_VERSION";

const RAW_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Executes the ordered workflow phases against a ready environment.
///
/// A failed check records its result and does not abort sibling checks or
/// later phases; tests are independent observations. The terminal state is
/// always a full [`RunReport`].
pub struct PhaseRunner {
    pub(crate) api: ApiClient,
    /// Plain client for infrastructure URLs (fixture server, download client
    /// WebUI). No cookie store; these are not backend sessions.
    pub(crate) raw: reqwest::Client,
    pub(crate) settings: Settings,
    pub(crate) downloader_password: String,
    pub(crate) state: SharedState,
    pub(crate) dev_mode: Option<bool>,
    report: RunReport,
}

impl PhaseRunner {
    /// # Errors
    /// Returns an error if the HTTP clients cannot be built.
    pub fn new(settings: &Settings, downloader_password: String) -> Result<Self> {
        let api = ApiClient::new(&settings.backend_url())?;
        let raw = reqwest::Client::builder()
            .timeout(RAW_REQUEST_TIMEOUT)
            .build()
            .context("Failed to build raw HTTP client")?;
        Ok(Self {
            api,
            raw,
            settings: settings.clone(),
            downloader_password,
            state: SharedState::new(),
            dev_mode: None,
            report: RunReport::new(),
        })
    }

    /// Runs all phases in their fixed order, recording each check's outcome.
    /// Results accumulate on the runner itself, so a caller that cancels the
    /// returned future mid-run (deadline expiry) still gets everything
    /// recorded up to that point from [`Self::into_report`].
    pub async fn run(&mut self) {
        self.state.clear();
        self.run_setup().await;
        self.run_auth().await;
        self.run_config().await;
        self.run_feeds().await;
        self.run_lifecycle().await;
        self.run_downloader().await;
        self.run_cleanup().await;
    }

    #[must_use]
    pub fn into_report(self) -> RunReport {
        self.report
    }

    pub(crate) fn record(&mut self, phase: &'static str, check: &'static str, result: Result<()>) {
        match result {
            Ok(()) => {
                info!("[{phase}] {check}: pass");
                self.report.record(phase, check, Outcome::Passed, None);
            }
            Err(err) => {
                let detail = format!("{err:#}");
                warn!("[{phase}] {check}: fail: {detail}");
                self.report
                    .record(phase, check, Outcome::Failed, Some(detail));
            }
        }
    }

    /// The documented behavior for unauthenticated protected calls depends on
    /// the build under test; checks must not hard-code one expectation.
    pub(crate) fn expected_unauthenticated_status(&self) -> Result<u16> {
        match self.dev_mode {
            Some(true) => Ok(200),
            Some(false) => Ok(401),
            None => anyhow::bail!("build mode unknown: setup status was never observed"),
        }
    }
}

pub(crate) fn expect_status(response: &ApiResponse, expected: u16) -> Result<()> {
    if response.status.as_u16() == expected {
        Ok(())
    } else {
        anyhow::bail!(
            "expected status {expected}, got {} (body: {})",
            response.status.as_u16(),
            response.body
        )
    }
}

pub(crate) fn expect_field_bool(response: &ApiResponse, key: &str, expected: bool) -> Result<()> {
    match response.field(key).and_then(serde_json::Value::as_bool) {
        Some(actual) if actual == expected => Ok(()),
        Some(actual) => anyhow::bail!("expected field '{key}' = {expected}, got {actual}"),
        None => anyhow::bail!("field '{key}' missing or not a bool (body: {})", response.body),
    }
}
