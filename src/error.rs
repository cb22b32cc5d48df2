use std::time::Duration;

use thiserror::Error;

/// Fatal harness failures. Check-level assertion failures are not errors;
/// they are recorded as [`crate::report::CheckResult`] entries instead.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A dependency service never reached ready state. Aborts the run and
    /// triggers teardown of whatever already started. `timeout` is zero for
    /// failures that happen before any readiness wait begins.
    #[error("service '{service}' did not become ready{} (last observed: {last_observed})", wait_window(.timeout))]
    Startup {
        service: String,
        timeout: Duration,
        last_observed: String,
    },

    /// The generated credential never appeared in the service's logs.
    #[error("secret for service '{service}' did not appear in logs within {timeout:?}")]
    SecretNotFound { service: String, timeout: Duration },

    /// Cleanup of one resource failed after the run concluded. Logged by the
    /// caller, never allowed to mask the primary failure.
    #[error("teardown of '{resource}' failed: {detail}")]
    Teardown { resource: String, detail: String },
}

fn wait_window(timeout: &Duration) -> String {
    if timeout.is_zero() {
        String::new()
    } else {
        format!(" within {timeout:?}")
    }
}

impl HarnessError {
    #[must_use]
    pub fn service(&self) -> &str {
        match self {
            Self::Startup { service, .. } | Self::SecretNotFound { service, .. } => service,
            Self::Teardown { resource, .. } => resource,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_error_names_service_and_last_state() {
        let err = HarnessError::Startup {
            service: "qbittorrent".to_string(),
            timeout: Duration::from_secs(30),
            last_observed: "connection refused".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("qbittorrent"));
        assert!(msg.contains("within 30s"));
        assert!(msg.contains("connection refused"));
        assert_eq!(err.service(), "qbittorrent");
    }

    #[test]
    fn test_startup_error_before_any_wait_omits_the_window() {
        let err = HarnessError::Startup {
            service: "qbittorrent".to_string(),
            timeout: Duration::ZERO,
            last_observed: "compose up failed: exit status 1".to_string(),
        };
        let msg = err.to_string();
        assert!(!msg.contains("within"), "no bogus zero window: {msg}");
        assert!(msg.contains("compose up failed"));
    }

    #[test]
    fn test_secret_not_found_error_names_service() {
        let err = HarnessError::SecretNotFound {
            service: "qbittorrent".to_string(),
            timeout: Duration::from_secs(60),
        };
        assert!(err.to_string().contains("did not appear in logs"));
    }
}
