use std::time::Duration;

use regex::Regex;
use tracing::debug;

use crate::docker::DockerCli;
use crate::error::HarnessError;

/// Re-reads a container's logs until one line matches `pattern`, returning
/// the content of its single capture group.
///
/// Matching is line-oriented, case-sensitive, first-match-wins. The value is
/// stable for a single service lifetime, so calling this twice against an
/// unrestarted container returns the same secret.
///
/// # Errors
/// Returns [`HarnessError::SecretNotFound`] if `timeout` elapses with no
/// matching line. This is fatal to the run; a missing credential makes all
/// later phases meaningless.
pub async fn extract_secret(
    docker: &DockerCli,
    service: &str,
    container: &str,
    pattern: &Regex,
    timeout: Duration,
    interval: Duration,
) -> Result<String, HarnessError> {
    let found = tokio::time::timeout(timeout, async {
        loop {
            match docker.logs(container).await {
                Ok(text) => {
                    if let Some(secret) = find_secret_line(&text, pattern) {
                        return secret;
                    }
                    debug!("secret for '{service}' not in logs yet");
                }
                Err(err) => debug!("log fetch for '{service}' failed: {err}"),
            }
            tokio::time::sleep(interval).await;
        }
    })
    .await;

    found.map_err(|_| HarnessError::SecretNotFound {
        service: service.to_string(),
        timeout,
    })
}

fn find_secret_line(text: &str, pattern: &Regex) -> Option<String> {
    text.lines().find_map(|line| {
        pattern
            .captures(line)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    })
}
