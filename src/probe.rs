use std::time::Duration;

use tracing::debug;

use crate::docker::DockerCli;
use crate::error::HarnessError;

const HTTP_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// One readiness predicate. A check is data describing what to test; the
/// prober dispatches on the variant.
#[derive(Debug, Clone)]
pub enum ReadinessCheck {
    /// Ready once a GET to the URL returns a 2xx status.
    Http { url: String },
    /// Ready once a TCP connection to `addr` succeeds.
    Tcp { addr: String },
    /// Ready once any log line of the container contains `needle`.
    LogLine {
        docker: DockerCli,
        container: String,
        needle: String,
    },
}

impl ReadinessCheck {
    async fn poll_once(&self, client: &reqwest::Client) -> Result<(), String> {
        match self {
            Self::Http { url } => match client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        Ok(())
                    } else {
                        Err(format!("HTTP probe of {url} returned {status}"))
                    }
                }
                Err(err) => Err(format!("HTTP probe of {url} failed: {err}")),
            },
            Self::Tcp { addr } => tokio::net::TcpStream::connect(addr)
                .await
                .map(|_| ())
                .map_err(|err| format!("TCP connect to {addr} failed: {err}")),
            Self::LogLine {
                docker,
                container,
                needle,
            } => match docker.logs(container).await {
                Ok(text) => {
                    if text.lines().any(|line| line.contains(needle)) {
                        Ok(())
                    } else {
                        Err(format!("no log line of {container} contains '{needle}'"))
                    }
                }
                Err(err) => Err(format!("log fetch for {container} failed: {err}")),
            },
        }
    }
}

/// Polls `check` at a fixed interval until it succeeds or `timeout` elapses.
///
/// # Errors
/// Returns [`HarnessError::Startup`] carrying the last observed failure on
/// expiry.
pub async fn wait_until_ready(
    service: &str,
    check: &ReadinessCheck,
    timeout: Duration,
    interval: Duration,
) -> Result<(), HarnessError> {
    let client = match reqwest::Client::builder()
        .timeout(HTTP_PROBE_TIMEOUT)
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            return Err(HarnessError::Startup {
                service: service.to_string(),
                timeout,
                last_observed: format!("failed to build probe client: {err}"),
            });
        }
    };

    let mut last_observed = "not yet polled".to_string();
    let waited = tokio::time::timeout(timeout, async {
        loop {
            match check.poll_once(&client).await {
                Ok(()) => break,
                Err(observed) => {
                    debug!("service '{service}' not ready: {observed}");
                    last_observed = observed;
                    tokio::time::sleep(interval).await;
                }
            }
        }
    })
    .await;

    match waited {
        Ok(()) => {
            debug!("service '{service}' is ready");
            Ok(())
        }
        Err(_) => Err(HarnessError::Startup {
            service: service.to_string(),
            timeout,
            last_observed,
        }),
    }
}

/// Waits for all targets concurrently. The targets have no dependency on one
/// another, so polling them in parallel bounds total startup latency. Blocks
/// until every wait resolves; the first failure (in target order) is returned.
///
/// # Errors
/// Returns the first [`HarnessError::Startup`] among the targets.
pub async fn wait_all_ready(
    targets: Vec<(String, ReadinessCheck)>,
    timeout: Duration,
    interval: Duration,
) -> Result<(), HarnessError> {
    let mut handles = Vec::with_capacity(targets.len());
    for (service, check) in targets {
        handles.push(tokio::spawn(async move {
            wait_until_ready(&service, &check, timeout, interval).await
        }));
    }

    let mut first_error = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
            Err(err) => {
                if first_error.is_none() {
                    first_error = Some(HarnessError::Startup {
                        service: "readiness-wait".to_string(),
                        timeout,
                        last_observed: format!("wait task join error: {err}"),
                    });
                }
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}
