// Helper functions are shared across multiple test crates; not every helper is
// referenced in each test module.
#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rssdm_e2e::Settings;
use serde_json::json;
use wiremock::matchers::{body_json, body_partial_json, body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Password the fake download-client container "generates" in its logs.
pub(crate) const FAKE_QB_PASSWORD: &str = "Xy9zQp1w";

pub(crate) fn write_fake_docker(dir: &Path) -> Result<PathBuf> {
    write_fake_docker_with_status(dir, "running", "healthy")
}

/// Writes a `docker` stand-in script into `dir`. Every invocation is appended
/// to `docker.log` next to the script; `logs` replays `logs.txt`.
pub(crate) fn write_fake_docker_with_status(
    dir: &Path,
    status: &str,
    health: &str,
) -> Result<PathBuf> {
    let script = format!(
        r#"#!/bin/sh
set -eu
dir="$(cd "$(dirname "$0")" && pwd)"
echo "$@" >> "$dir/docker.log"

if [ "${{1:-}}" = "compose" ]; then
  case "${{6:-}}" in
    up|down)
      exit 0
      ;;
    ps)
      printf "cid-%s" "${{8:-}}"
      exit 0
      ;;
  esac
  exit 0
fi

if [ "${{1:-}}" = "inspect" ]; then
  printf "{status}|{health}"
  exit 0
fi

if [ "${{1:-}}" = "logs" ]; then
  cat "$dir/logs.txt" 2>/dev/null || true
  exit 0
fi

exit 0
"#
    );
    let path = dir.join("docker");
    fs::write(&path, script).context("Failed to write fake docker script")?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o700))
        .context("Failed to set fake docker permissions")?;
    Ok(path)
}

pub(crate) fn write_fake_container_logs(dir: &Path, contents: &str) -> Result<()> {
    fs::write(dir.join("logs.txt"), contents).context("Failed to write logs.txt")
}

pub(crate) fn fake_qb_log_lines() -> String {
    format!(
        "*** Starting WebUI ***\n\
         The WebUI administrator password was not set. \
         A temporary password is provided for this session: {FAKE_QB_PASSWORD}\n\
         WebUI is listening on port 18080\n"
    )
}

pub(crate) fn read_docker_log(dir: &Path) -> String {
    fs::read_to_string(dir.join("docker.log")).unwrap_or_default()
}

/// Settings pointed at the fake docker script and ephemeral ports, with
/// timeouts tightened so failure paths resolve quickly.
pub(crate) fn test_settings(fake_docker_dir: &Path) -> Settings {
    let mut settings = Settings::new(None).expect("default settings");
    settings.compose.docker_bin = fake_docker_dir.join("docker").to_string_lossy().to_string();
    settings.compose.file = fake_docker_dir.join("docker-compose.test.yml");
    settings.compose.project = "rssdm-e2e-test".to_string();
    // A subprocess that stays alive without serving anything; readiness is
    // answered by wiremock on the backend port.
    settings.backend.command = "/bin/sleep".to_string();
    settings.backend.args = vec!["30".to_string()];
    settings.timeouts.ready = "5s".to_string();
    settings.timeouts.poll_interval = "100ms".to_string();
    settings.timeouts.secret = "2s".to_string();
    settings.timeouts.teardown = "10s".to_string();
    settings
}

pub(crate) const STUB_TOKEN: &str = "stub-token";

/// Mounts the whole workflow surface the phase runner exercises.
///
/// `dev` selects the build mode the backend reports (and whether protected
/// endpoints are cookie-gated); `mask_password` controls whether the config
/// read masks the downloader password.
pub(crate) async fn mount_workflow(
    backend: &MockServer,
    downloader: &MockServer,
    fixture: &MockServer,
    dev: bool,
    mask_password: bool,
) {
    let version = if dev { "DEV_VERSION" } else { "1.2.3" };

    // Setup wizard: unconfigured exactly once, configured afterwards;
    // repeated completion is rejected.
    Mock::given(method("GET"))
        .and(path("/api/v1/setup/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "need_setup": true,
            "version": version,
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(backend)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/setup/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "need_setup": false,
            "version": version,
        })))
        .with_priority(5)
        .mount(backend)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/setup/complete"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": true})))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(backend)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/setup/complete"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"detail": "setup done"})))
        .with_priority(5)
        .mount(backend)
        .await;

    // Authentication: only the setup credentials log in; login sets the
    // session cookie, logout deletes it. The setup password works exactly
    // once more after the cleanup phase rotates it.
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .and(body_string("username=testadmin&password=testpassword123"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": STUB_TOKEN, "token_type": "bearer"}))
                .insert_header("set-cookie", format!("token={STUB_TOKEN}; Path=/").as_str()),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(backend)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .and(body_string(
            "username=testadmin&password=rotatedpassword456",
        ))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": STUB_TOKEN, "token_type": "bearer"}))
                .insert_header("set-cookie", format!("token={STUB_TOKEN}; Path=/").as_str()),
        )
        .with_priority(1)
        .mount(backend)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "unauthorized"})))
        .with_priority(5)
        .mount(backend)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/auth/refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "stub-token-2",
            "token_type": "bearer",
        })))
        .mount(backend)
        .await;

    // Credential rotation performed by the cleanup phase.
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/update"))
        .and(body_partial_json(json!({"password": "rotatedpassword456"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "stub-token-3",
            "message": "update success",
        })))
        .expect(1)
        .mount(backend)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/auth/logout"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"message": "logout success"}))
                .insert_header("set-cookie", "token=; Path=/; Max-Age=0"),
        )
        .mount(backend)
        .await;

    // Protected program status: dev builds answer everyone, production
    // builds require the session cookie.
    let status_body = json!({"status": false, "version": version, "first_run": true});
    if dev {
        Mock::given(method("GET"))
            .and(path("/api/v1/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_body))
            .mount(backend)
            .await;
    } else {
        Mock::given(method("GET"))
            .and(path("/api/v1/status"))
            .and(header("cookie", format!("token={STUB_TOKEN}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_body))
            .with_priority(1)
            .mount(backend)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/status"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"detail": "unauthorized"})),
            )
            .with_priority(5)
            .mount(backend)
            .await;
    }

    // Configuration: masked read until the update lands, then the new value.
    let password_on_read = if mask_password {
        "********"
    } else {
        FAKE_QB_PASSWORD
    };
    let config_before = json!({
        "program": {"rss_time": 300},
        "downloader": {"type": "mock", "password": password_on_read},
        "rss_parser": {"enable": true},
    });
    let config_after = json!({
        "program": {"rss_time": 600},
        "downloader": {"type": "mock", "password": password_on_read},
        "rss_parser": {"enable": true},
    });
    Mock::given(method("GET"))
        .and(path("/api/v1/config/get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(config_before))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(backend)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/config/get"))
        .respond_with(ResponseTemplate::new(200).set_body_json(config_after))
        .with_priority(5)
        .mount(backend)
        .await;

    // The update must re-supply the real downloader password, not the mask.
    Mock::given(method("PATCH"))
        .and(path("/api/v1/config/update"))
        .and(body_partial_json(json!({
            "program": {"rss_time": 600},
            "downloader": {"password": FAKE_QB_PASSWORD},
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"msg": "updated"})))
        .expect(1)
        .mount(backend)
        .await;

    // Feeds: each list read reflects the mutation the phase performed just
    // before it (add, disable, enable, rename, delete), in execution order.
    let initial_feed = json!({"id": 1, "name": "Initial Test Feed", "enabled": true});
    let second_feed = json!({"id": 2, "name": "E2E Second Feed", "enabled": true});
    let second_disabled = json!({"id": 2, "name": "E2E Second Feed", "enabled": false});
    let second_renamed = json!({"id": 2, "name": "Renamed E2E Feed", "enabled": true});
    let list_stages = [
        json!([initial_feed.clone()]),
        json!([initial_feed.clone(), second_feed.clone()]),
        json!([initial_feed.clone(), second_disabled]),
        json!([initial_feed.clone(), second_feed]),
        json!([initial_feed.clone(), second_renamed]),
    ];
    for (stage, body) in list_stages.into_iter().enumerate() {
        Mock::given(method("GET"))
            .and(path("/api/v1/rss"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .up_to_n_times(1)
            .with_priority(u8::try_from(stage + 1).expect("stage fits"))
            .mount(backend)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/api/v1/rss"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([initial_feed])))
        .with_priority(10)
        .mount(backend)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/api/v1/rss/disable/2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"msg": "disabled"})))
        .expect(1)
        .mount(backend)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/rss/enable/many"))
        .and(body_json(json!([2])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"msg": "enabled"})))
        .expect(1)
        .mount(backend)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/v1/rss/update/2"))
        .and(body_partial_json(json!({"name": "Renamed E2E Feed"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"msg": "updated"})))
        .expect(1)
        .mount(backend)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/rss/add"))
        .and(body_partial_json(json!({"name": "E2E Second Feed"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"msg": "added"})))
        .with_priority(1)
        .mount(backend)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/rss/add"))
        .respond_with(ResponseTemplate::new(406).set_body_json(json!({"msg": "duplicate url"})))
        .with_priority(5)
        .mount(backend)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/api/v1/rss/delete/2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"msg": "deleted"})))
        .expect(1)
        .mount(backend)
        .await;

    // Program lifecycle: stop is rejected until start, accepted once, then
    // rejected again.
    Mock::given(method("GET"))
        .and(path("/api/v1/stop"))
        .respond_with(ResponseTemplate::new(406).set_body_json(json!({"msg": "not running"})))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(backend)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/stop"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"msg": "stopped"})))
        .up_to_n_times(1)
        .with_priority(2)
        .mount(backend)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/stop"))
        .respond_with(ResponseTemplate::new(406).set_body_json(json!({"msg": "not running"})))
        .with_priority(5)
        .mount(backend)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/start"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"msg": "started"})))
        .mount(backend)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/restart"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"msg": "restarted"})))
        .mount(backend)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/check/downloader"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": true})))
        .mount(backend)
        .await;

    // Download client WebUI: only the extracted password logs in.
    Mock::given(method("POST"))
        .and(path("/api/v2/auth/login"))
        .and(body_string(
            format!("username=admin&password={FAKE_QB_PASSWORD}").as_str(),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_string("Ok."))
        .with_priority(1)
        .mount(downloader)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Fails."))
        .with_priority(5)
        .mount(downloader)
        .await;

    // Static fixture server.
    Mock::given(method("GET"))
        .and(path("/rss/mikan.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<rss version=\"2.0\"><channel><title>Frieren</title></channel></rss>"),
        )
        .mount(fixture)
        .await;
}
