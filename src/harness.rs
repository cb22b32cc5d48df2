//! Top-level orchestration: launch services, extract the download-client
//! credential, drive the workflow phases, and tear everything down on every
//! exit path.

use regex::Regex;
use tracing::{info, warn};

use crate::config::Settings;
use crate::launcher::ServiceLauncher;
use crate::report::RunReport;
use crate::runner::PhaseRunner;
use crate::secret;

/// Runs one full harness pass. Never returns an error: infrastructure
/// failures become the report's fatal summary so the caller can map them to
/// the startup-failure exit code.
pub async fn run(settings: &Settings, keep_services: bool) -> RunReport {
    let mut launcher = match ServiceLauncher::start_all(settings).await {
        Ok(launcher) => launcher,
        Err(err) => {
            // start_all already rolled back whatever had started.
            return fatal_report(err.to_string());
        }
    };

    let report = run_phases(settings, &launcher).await;

    if keep_services {
        warn!("--keep-services set; leaving services running");
        return report;
    }

    let teardown_timeout = settings
        .teardown_timeout()
        .unwrap_or(std::time::Duration::from_secs(60));
    if tokio::time::timeout(teardown_timeout, launcher.teardown())
        .await
        .is_err()
    {
        warn!("teardown did not finish within {teardown_timeout:?}");
    }
    report
}

async fn run_phases(settings: &Settings, launcher: &ServiceLauncher) -> RunReport {
    let pattern = match Regex::new(&settings.downloader.secret_pattern) {
        Ok(pattern) => pattern,
        Err(err) => return fatal_report(format!("invalid secret pattern: {err}")),
    };
    let (secret_timeout, interval, deadline) = match (
        settings.secret_timeout(),
        settings.poll_interval(),
        settings.run_deadline(),
    ) {
        (Ok(s), Ok(i), Ok(d)) => (s, i, d),
        (Err(err), ..) | (_, Err(err), _) | (.., Err(err)) => {
            return fatal_report(format!("invalid timeout settings: {err}"));
        }
    };

    let container = settings.container_name(&settings.compose.downloader_service);
    let password = match secret::extract_secret(
        launcher.docker(),
        &settings.compose.downloader_service,
        &container,
        &pattern,
        secret_timeout,
        interval,
    )
    .await
    {
        Ok(password) => password,
        Err(err) => return fatal_report(err.to_string()),
    };
    info!("download client credential extracted");

    let mut runner = match PhaseRunner::new(settings, password) {
        Ok(runner) => runner,
        Err(err) => return fatal_report(format!("failed to build phase runner: {err:#}")),
    };

    // The harness-wide deadline aborts any in-flight check; teardown still
    // runs in the caller. Checks recorded before expiry stay in the report.
    if tokio::time::timeout(deadline, runner.run()).await.is_err() {
        let mut report = runner.into_report();
        report.record_fatal(format!(
            "run deadline of {deadline:?} exceeded; remaining checks never ran"
        ));
        return report;
    }
    runner.into_report()
}

fn fatal_report(summary: String) -> RunReport {
    let mut report = RunReport::new();
    report.record_fatal(summary);
    report
}
