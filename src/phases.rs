//! The ordered workflow phases. Each check performs one or more API calls,
//! asserts status and payload shape, and may thread identifiers through
//! [`crate::state::SharedState`] for later checks.

use anyhow::{Context, Result};
use serde_json::Value;

use crate::client::{ApiClient, FeedRequest, SetupRequest};
use crate::runner::{DEV_VERSION, PhaseRunner, expect_field_bool, expect_status};

const PHASE_SETUP: &str = "setup";
const PHASE_AUTH: &str = "auth";
const PHASE_CONFIG: &str = "config";
const PHASE_FEEDS: &str = "feeds";
const PHASE_LIFECYCLE: &str = "lifecycle";
const PHASE_DOWNLOADER: &str = "downloader";
const PHASE_CLEANUP: &str = "cleanup";

const MASKED: &str = "********";
const SETUP_FEED_NAME: &str = "Initial Test Feed";
const SECOND_FEED_NAME: &str = "E2E Second Feed";
const RENAMED_FEED_NAME: &str = "Renamed E2E Feed";
const ROTATED_PASSWORD: &str = "rotatedpassword456";

impl PhaseRunner {
    // ------------------------------------------------------------------
    // Phase 1: Setup wizard
    // ------------------------------------------------------------------

    pub(crate) async fn run_setup(&mut self) {
        let result = self.check_status_reports_unconfigured().await;
        self.record(PHASE_SETUP, "status_reports_unconfigured", result);
        let result = self.check_fixture_feed_served().await;
        self.record(PHASE_SETUP, "fixture_feed_served", result);
        let result = self.check_complete_setup().await;
        self.record(PHASE_SETUP, "complete_setup", result);
        let result = self.check_status_reports_configured().await;
        self.record(PHASE_SETUP, "status_reports_configured", result);
        let result = self.check_repeat_setup_rejected().await;
        self.record(PHASE_SETUP, "repeat_setup_rejected", result);
    }

    async fn check_status_reports_unconfigured(&mut self) -> Result<()> {
        let response = self.api.setup_status().await?;
        expect_status(&response, 200)?;
        expect_field_bool(&response, "need_setup", true)?;
        let version = response
            .field("version")
            .and_then(Value::as_str)
            .context("setup status is missing 'version'")?;
        self.dev_mode = Some(version == DEV_VERSION);
        Ok(())
    }

    async fn check_fixture_feed_served(&self) -> Result<()> {
        let url = self.feed_url();
        let response = self
            .raw
            .get(&url)
            .send()
            .await
            .with_context(|| format!("fixture feed request failed: {url}"))?;
        let status = response.status().as_u16();
        if status != 200 {
            anyhow::bail!("expected status 200 from fixture feed, got {status}");
        }
        let body = response.text().await.context("fixture feed body unreadable")?;
        if !body.contains("<rss") {
            anyhow::bail!("fixture feed is not RSS XML");
        }
        Ok(())
    }

    async fn check_complete_setup(&mut self) -> Result<()> {
        let request = self.setup_request(
            &self.settings.credentials.username,
            &self.settings.credentials.password,
        );
        let response = self.api.complete_setup(&request).await?;
        expect_status(&response, 200)?;
        expect_field_bool(&response, "status", true)?;
        self.state.insert("setup_complete", true);
        Ok(())
    }

    async fn check_status_reports_configured(&self) -> Result<()> {
        let response = self.api.setup_status().await?;
        expect_status(&response, 200)?;
        expect_field_bool(&response, "need_setup", false)
    }

    async fn check_repeat_setup_rejected(&self) -> Result<()> {
        let request = self.setup_request("another", "anotherpassword");
        let response = self.api.complete_setup(&request).await?;
        expect_status(&response, 403)
    }

    fn setup_request(&self, username: &str, password: &str) -> SetupRequest {
        SetupRequest {
            username: username.to_string(),
            password: password.to_string(),
            downloader_type: "mock".to_string(),
            downloader_host: format!("{}:{}", self.settings.backend.host, self.settings.downloader.port),
            downloader_username: self.settings.downloader.username.clone(),
            downloader_password: self.downloader_password.clone(),
            downloader_path: "/downloads".to_string(),
            downloader_ssl: false,
            rss_url: Some(self.feed_url()),
            rss_name: Some(SETUP_FEED_NAME.to_string()),
        }
    }

    fn feed_url(&self) -> String {
        format!(
            "{}{}",
            self.settings.fixture_url(),
            self.settings.fixture.feed_path
        )
    }

    // ------------------------------------------------------------------
    // Phase 2: Authentication
    // ------------------------------------------------------------------

    pub(crate) async fn run_auth(&mut self) {
        let result = self.check_login_sets_session().await;
        self.record(PHASE_AUTH, "login_sets_session", result);
        let result = self.check_session_reaches_protected_endpoint().await;
        self.record(PHASE_AUTH, "session_reaches_protected_endpoint", result);
        let result = self.check_refresh_token().await;
        self.record(PHASE_AUTH, "refresh_token", result);
        let result = self.check_wrong_password_rejected().await;
        self.record(PHASE_AUTH, "wrong_password_rejected", result);
        let result = self.check_unknown_user_rejected().await;
        self.record(PHASE_AUTH, "unknown_user_rejected", result);
        let result = self.check_unauthenticated_access_matches_build_mode().await;
        self.record(
            PHASE_AUTH,
            "unauthenticated_access_matches_build_mode",
            result,
        );
    }

    async fn check_login_sets_session(&mut self) -> Result<()> {
        let response = self
            .api
            .login(
                &self.settings.credentials.username,
                &self.settings.credentials.password,
            )
            .await?;
        expect_status(&response, 200)?;
        let token = response
            .field("access_token")
            .and_then(Value::as_str)
            .context("login response is missing 'access_token'")?;
        self.state.insert("token", token);
        Ok(())
    }

    /// The session cookie set on login must ride along automatically; the
    /// check supplies no credentials of its own.
    async fn check_session_reaches_protected_endpoint(&self) -> Result<()> {
        let response = self.api.program_status().await?;
        expect_status(&response, 200)?;
        for key in ["status", "version", "first_run"] {
            if response.field(key).is_none() {
                anyhow::bail!("program status is missing '{key}' (body: {})", response.body);
            }
        }
        Ok(())
    }

    async fn check_refresh_token(&mut self) -> Result<()> {
        let response = self.api.refresh_token().await?;
        expect_status(&response, 200)?;
        let token = response
            .field("access_token")
            .and_then(Value::as_str)
            .context("refresh response is missing 'access_token'")?;
        self.state.insert("token", token);
        Ok(())
    }

    async fn check_wrong_password_rejected(&self) -> Result<()> {
        let response = self
            .api
            .login(&self.settings.credentials.username, "wrong_password")
            .await?;
        expect_status(&response, 401)
    }

    async fn check_unknown_user_rejected(&self) -> Result<()> {
        let response = self.api.login("no_such_user", "irrelevant").await?;
        expect_status(&response, 401)
    }

    async fn check_unauthenticated_access_matches_build_mode(&self) -> Result<()> {
        let expected = self.expected_unauthenticated_status()?;
        let fresh = ApiClient::new(&self.settings.backend_url())?;
        let response = fresh.program_status().await?;
        expect_status(&response, expected)
    }

    // ------------------------------------------------------------------
    // Phase 3: Configuration
    // ------------------------------------------------------------------

    pub(crate) async fn run_config(&mut self) {
        let result = self.check_config_sections_present().await;
        self.record(PHASE_CONFIG, "config_sections_present", result);
        let result = self.check_passwords_masked().await;
        self.record(PHASE_CONFIG, "passwords_masked", result);
        let result = self.check_update_config().await;
        self.record(PHASE_CONFIG, "update_config", result);
        let result = self.check_update_persisted().await;
        self.record(PHASE_CONFIG, "update_persisted", result);
    }

    async fn check_config_sections_present(&mut self) -> Result<()> {
        let response = self.api.get_config().await?;
        expect_status(&response, 200)?;
        for section in ["program", "downloader", "rss_parser"] {
            if response.field(section).is_none() {
                anyhow::bail!("config is missing section '{section}'");
            }
        }
        match response.pointer("/downloader/type").and_then(Value::as_str) {
            Some("mock") => {}
            other => anyhow::bail!("expected downloader.type = \"mock\", got {other:?}"),
        }
        self.state.insert("config_snapshot", response.body.clone());
        Ok(())
    }

    /// Sensitive fields must come back masked, never the stored value.
    async fn check_passwords_masked(&self) -> Result<()> {
        let response = self.api.get_config().await?;
        expect_status(&response, 200)?;
        let password = response
            .pointer("/downloader/password")
            .and_then(Value::as_str)
            .context("config is missing downloader.password")?;
        if password != MASKED {
            anyhow::bail!("downloader.password is not masked");
        }
        if password == self.downloader_password {
            anyhow::bail!("downloader.password leaked the stored value");
        }
        Ok(())
    }

    async fn check_update_config(&mut self) -> Result<()> {
        let mut config = self
            .state
            .get("config_snapshot")
            .context("no config snapshot recorded by an earlier check")?
            .clone();
        config
            .get_mut("program")
            .and_then(Value::as_object_mut)
            .context("config section 'program' is not an object")?
            .insert("rss_time".to_string(), Value::from(600));
        // Masked reads must be replaced with real values before writing back.
        config
            .get_mut("downloader")
            .and_then(Value::as_object_mut)
            .context("config section 'downloader' is not an object")?
            .insert(
                "password".to_string(),
                Value::from(self.downloader_password.clone()),
            );
        let response = self.api.update_config(&config).await?;
        expect_status(&response, 200)
    }

    async fn check_update_persisted(&self) -> Result<()> {
        let response = self.api.get_config().await?;
        expect_status(&response, 200)?;
        match response.pointer("/program/rss_time").and_then(Value::as_i64) {
            Some(600) => Ok(()),
            other => anyhow::bail!("expected program.rss_time = 600 after update, got {other:?}"),
        }
    }

    // ------------------------------------------------------------------
    // Phase 4: Feed management
    // ------------------------------------------------------------------

    pub(crate) async fn run_feeds(&mut self) {
        let result = self.check_initial_feed_from_setup().await;
        self.record(PHASE_FEEDS, "initial_feed_from_setup", result);
        let result = self.check_add_feed().await;
        self.record(PHASE_FEEDS, "add_feed", result);
        let result = self.check_list_includes_added_feed().await;
        self.record(PHASE_FEEDS, "list_includes_added_feed", result);
        let result = self.check_disable_feed().await;
        self.record(PHASE_FEEDS, "disable_feed", result);
        let result = self.check_feed_disabled_in_list().await;
        self.record(PHASE_FEEDS, "feed_disabled_in_list", result);
        let result = self.check_enable_feed().await;
        self.record(PHASE_FEEDS, "enable_feed", result);
        let result = self.check_feed_enabled_in_list().await;
        self.record(PHASE_FEEDS, "feed_enabled_in_list", result);
        let result = self.check_rename_feed().await;
        self.record(PHASE_FEEDS, "rename_feed", result);
        let result = self.check_rename_persisted().await;
        self.record(PHASE_FEEDS, "rename_persisted", result);
        let result = self.check_duplicate_url_rejected().await;
        self.record(PHASE_FEEDS, "duplicate_url_rejected", result);
        let result = self.check_delete_added_feed().await;
        self.record(PHASE_FEEDS, "delete_added_feed", result);
        let result = self.check_feed_absent_after_delete().await;
        self.record(PHASE_FEEDS, "feed_absent_after_delete", result);
    }

    async fn check_initial_feed_from_setup(&mut self) -> Result<()> {
        let response = self.api.list_feeds().await?;
        expect_status(&response, 200)?;
        let feeds = response
            .body
            .as_array()
            .context("feed list is not an array")?;
        let initial = feeds
            .iter()
            .find(|feed| feed.get("name").and_then(Value::as_str) == Some(SETUP_FEED_NAME))
            .context("feed created by the setup wizard is missing")?;
        let id = initial
            .get("id")
            .and_then(Value::as_i64)
            .context("setup feed has no id")?;
        self.state.insert("initial_feed_id", id);
        Ok(())
    }

    async fn check_add_feed(&self) -> Result<()> {
        let request = FeedRequest {
            url: format!("{}?tag=e2e", self.feed_url()),
            name: SECOND_FEED_NAME.to_string(),
            aggregate: false,
            parser: "mikan".to_string(),
        };
        let response = self.api.add_feed(&request).await?;
        expect_status(&response, 200)
    }

    async fn check_list_includes_added_feed(&mut self) -> Result<()> {
        let response = self.api.list_feeds().await?;
        expect_status(&response, 200)?;
        let feeds = response
            .body
            .as_array()
            .context("feed list is not an array")?;
        let added = feeds
            .iter()
            .find(|feed| feed.get("name").and_then(Value::as_str) == Some(SECOND_FEED_NAME))
            .context("added feed is not in the list")?;
        let id = added
            .get("id")
            .and_then(Value::as_i64)
            .context("added feed has no generated id")?;
        self.state.insert("second_feed_id", id);
        Ok(())
    }

    async fn check_disable_feed(&self) -> Result<()> {
        let feed_id = self.second_feed_id()?;
        let response = self.api.disable_feed(feed_id).await?;
        expect_status(&response, 200)
    }

    async fn check_feed_disabled_in_list(&self) -> Result<()> {
        self.expect_feed_flag(self.second_feed_id()?, false).await
    }

    async fn check_enable_feed(&self) -> Result<()> {
        let feed_id = self.second_feed_id()?;
        let response = self.api.enable_feeds(&[feed_id]).await?;
        expect_status(&response, 200)
    }

    async fn check_feed_enabled_in_list(&self) -> Result<()> {
        self.expect_feed_flag(self.second_feed_id()?, true).await
    }

    async fn check_rename_feed(&self) -> Result<()> {
        let feed_id = self.second_feed_id()?;
        let body = serde_json::json!({"name": RENAMED_FEED_NAME});
        let response = self.api.update_feed(feed_id, &body).await?;
        expect_status(&response, 200)
    }

    async fn check_rename_persisted(&self) -> Result<()> {
        let feed = self.find_feed(self.second_feed_id()?).await?;
        match feed.get("name").and_then(Value::as_str) {
            Some(RENAMED_FEED_NAME) => Ok(()),
            other => anyhow::bail!("expected feed name {RENAMED_FEED_NAME:?}, got {other:?}"),
        }
    }

    fn second_feed_id(&self) -> Result<i64> {
        self.state
            .get_i64("second_feed_id")
            .context("no feed id recorded by an earlier check")
    }

    async fn find_feed(&self, feed_id: i64) -> Result<Value> {
        let response = self.api.list_feeds().await?;
        expect_status(&response, 200)?;
        let feeds = response
            .body
            .as_array()
            .context("feed list is not an array")?;
        feeds
            .iter()
            .find(|feed| feed.get("id").and_then(Value::as_i64) == Some(feed_id))
            .cloned()
            .with_context(|| format!("feed {feed_id} is not in the list"))
    }

    async fn expect_feed_flag(&self, feed_id: i64, expected: bool) -> Result<()> {
        let feed = self.find_feed(feed_id).await?;
        match feed.get("enabled").and_then(Value::as_bool) {
            Some(actual) if actual == expected => Ok(()),
            other => anyhow::bail!("expected feed {feed_id} enabled = {expected}, got {other:?}"),
        }
    }

    async fn check_duplicate_url_rejected(&self) -> Result<()> {
        let request = FeedRequest {
            url: self.feed_url(),
            name: "Duplicate Feed".to_string(),
            aggregate: false,
            parser: "mikan".to_string(),
        };
        let response = self.api.add_feed(&request).await?;
        expect_status(&response, 406)
    }

    async fn check_delete_added_feed(&self) -> Result<()> {
        let feed_id = self
            .state
            .get_i64("second_feed_id")
            .context("no feed id recorded by an earlier check")?;
        let response = self.api.delete_feed(feed_id).await?;
        expect_status(&response, 200)
    }

    async fn check_feed_absent_after_delete(&self) -> Result<()> {
        let feed_id = self
            .state
            .get_i64("second_feed_id")
            .context("no feed id recorded by an earlier check")?;
        let response = self.api.list_feeds().await?;
        expect_status(&response, 200)?;
        let feeds = response
            .body
            .as_array()
            .context("feed list is not an array")?;
        if feeds
            .iter()
            .any(|feed| feed.get("id").and_then(Value::as_i64) == Some(feed_id))
        {
            anyhow::bail!("feed {feed_id} still listed after delete");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase 5: Program lifecycle
    // ------------------------------------------------------------------

    pub(crate) async fn run_lifecycle(&mut self) {
        let result = self.check_program_status_shape().await;
        self.record(PHASE_LIFECYCLE, "program_status_shape", result);
        let result = self.check_stop_when_not_running_rejected().await;
        self.record(PHASE_LIFECYCLE, "stop_when_not_running_rejected", result);
        let result = self.check_start_program().await;
        self.record(PHASE_LIFECYCLE, "start_program", result);
        let result = self.check_stop_program().await;
        self.record(PHASE_LIFECYCLE, "stop_program", result);
        let result = self.check_stop_again_rejected().await;
        self.record(PHASE_LIFECYCLE, "stop_again_rejected", result);
        let result = self.check_restart_program().await;
        self.record(PHASE_LIFECYCLE, "restart_program", result);
    }

    async fn check_program_status_shape(&self) -> Result<()> {
        let response = self.api.program_status().await?;
        expect_status(&response, 200)?;
        if !response.field("status").is_some_and(Value::is_boolean) {
            anyhow::bail!("program status 'status' is not a bool");
        }
        if !response.field("version").is_some_and(Value::is_string) {
            anyhow::bail!("program status 'version' is not a string");
        }
        if !response.field("first_run").is_some_and(Value::is_boolean) {
            anyhow::bail!("program status 'first_run' is not a bool");
        }
        Ok(())
    }

    /// First-run setup does not auto-start the program, so the first stop is
    /// expected to be rejected.
    async fn check_stop_when_not_running_rejected(&self) -> Result<()> {
        let response = self.api.stop_program().await?;
        expect_status(&response, 406)
    }

    async fn check_start_program(&self) -> Result<()> {
        let response = self.api.start_program().await?;
        expect_status(&response, 200)
    }

    async fn check_stop_program(&self) -> Result<()> {
        let response = self.api.stop_program().await?;
        expect_status(&response, 200)
    }

    async fn check_stop_again_rejected(&self) -> Result<()> {
        let response = self.api.stop_program().await?;
        expect_status(&response, 406)
    }

    async fn check_restart_program(&self) -> Result<()> {
        let response = self.api.restart_program().await?;
        expect_status(&response, 200)
    }

    // ------------------------------------------------------------------
    // Phase 6: Downloader connectivity
    // ------------------------------------------------------------------

    pub(crate) async fn run_downloader(&mut self) {
        let result = self.check_backend_reports_downloader_healthy().await;
        self.record(
            PHASE_DOWNLOADER,
            "backend_reports_downloader_healthy",
            result,
        );
        let result = self.check_direct_login_with_extracted_password().await;
        self.record(
            PHASE_DOWNLOADER,
            "direct_login_with_extracted_password",
            result,
        );
    }

    async fn check_backend_reports_downloader_healthy(&self) -> Result<()> {
        let response = self.api.check_downloader().await?;
        expect_status(&response, 200)
    }

    /// Proves the log-extracted credential is live by logging in to the
    /// download client's own WebUI API with it.
    async fn check_direct_login_with_extracted_password(&self) -> Result<()> {
        let url = format!("{}/api/v2/auth/login", self.settings.downloader_url());
        let form = [
            ("username", self.settings.downloader.username.as_str()),
            ("password", self.downloader_password.as_str()),
        ];
        let response = self
            .raw
            .post(&url)
            .form(&form)
            .send()
            .await
            .with_context(|| format!("downloader login request failed: {url}"))?;
        let status = response.status().as_u16();
        if status != 200 {
            anyhow::bail!("expected status 200 from downloader login, got {status}");
        }
        let body = response.text().await.context("downloader login body unreadable")?;
        if !body.to_lowercase().contains("ok") {
            anyhow::bail!("downloader login was not accepted: {body}");
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Phase 7: Cleanup
    // ------------------------------------------------------------------

    pub(crate) async fn run_cleanup(&mut self) {
        let result = self.check_update_credentials().await;
        self.record(PHASE_CLEANUP, "update_credentials", result);
        let result = self.check_login_with_new_password().await;
        self.record(PHASE_CLEANUP, "login_with_new_password", result);
        let result = self.check_old_password_rejected().await;
        self.record(PHASE_CLEANUP, "old_password_rejected", result);
        let result = self.check_logout().await;
        self.record(PHASE_CLEANUP, "logout", result);
        let result = self.check_session_invalidated_matches_build_mode().await;
        self.record(
            PHASE_CLEANUP,
            "session_invalidated_matches_build_mode",
            result,
        );
    }

    /// Rotates the account password while the session is still live.
    async fn check_update_credentials(&self) -> Result<()> {
        let response = self.api.update_credentials(ROTATED_PASSWORD).await?;
        expect_status(&response, 200)?;
        if response.field("access_token").is_none() {
            anyhow::bail!(
                "credential update issued no new token (body: {})",
                response.body
            );
        }
        Ok(())
    }

    async fn check_login_with_new_password(&self) -> Result<()> {
        let response = self
            .api
            .login(&self.settings.credentials.username, ROTATED_PASSWORD)
            .await?;
        expect_status(&response, 200)
    }

    async fn check_old_password_rejected(&self) -> Result<()> {
        let response = self
            .api
            .login(
                &self.settings.credentials.username,
                &self.settings.credentials.password,
            )
            .await?;
        expect_status(&response, 401)
    }

    async fn check_logout(&self) -> Result<()> {
        let response = self.api.logout().await?;
        expect_status(&response, 200)
    }

    async fn check_session_invalidated_matches_build_mode(&self) -> Result<()> {
        let expected = self.expected_unauthenticated_status()?;
        let response = self.api.program_status().await?;
        expect_status(&response, expected)
    }
}
