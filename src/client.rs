use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Status and decoded body of one backend call. Non-2xx responses are not
/// errors; phases assert on the exact expected status themselves.
#[derive(Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl ApiResponse {
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    #[must_use]
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        self.body.pointer(pointer)
    }
}

/// Payload for the setup wizard completion call.
#[derive(Debug, Serialize)]
pub struct SetupRequest {
    pub username: String,
    pub password: String,
    pub downloader_type: String,
    pub downloader_host: String,
    pub downloader_username: String,
    pub downloader_password: String,
    pub downloader_path: String,
    pub downloader_ssl: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rss_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rss_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FeedRequest {
    pub url: String,
    pub name: String,
    pub aggregate: bool,
    pub parser: String,
}

/// HTTP client bound to the backend's base URL. The underlying cookie store
/// persists the session token set on login across every subsequent call, so
/// callers never re-attach credentials manually.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    client: Client,
}

impl ApiClient {
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build backend HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub async fn setup_status(&self) -> Result<ApiResponse> {
        self.get("setup/status").await
    }

    pub async fn complete_setup(&self, request: &SetupRequest) -> Result<ApiResponse> {
        self.post_json("setup/complete", request).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<ApiResponse> {
        let form = [("username", username), ("password", password)];
        let url = self.endpoint("auth/login");
        let response = self
            .client
            .post(url)
            .form(&form)
            .send()
            .await
            .context("Login request failed")?;
        Self::into_api_response(response).await
    }

    pub async fn refresh_token(&self) -> Result<ApiResponse> {
        self.get("auth/refresh_token").await
    }

    pub async fn logout(&self) -> Result<ApiResponse> {
        self.get("auth/logout").await
    }

    pub async fn get_config(&self) -> Result<ApiResponse> {
        self.get("config/get").await
    }

    pub async fn update_config(&self, config: &Value) -> Result<ApiResponse> {
        self.patch_json("config/update", config).await
    }

    pub async fn update_credentials(&self, password: &str) -> Result<ApiResponse> {
        self.post_json("auth/update", &serde_json::json!({"password": password}))
            .await
    }

    pub async fn list_feeds(&self) -> Result<ApiResponse> {
        self.get("rss").await
    }

    pub async fn add_feed(&self, request: &FeedRequest) -> Result<ApiResponse> {
        self.post_json("rss/add", request).await
    }

    pub async fn disable_feed(&self, feed_id: i64) -> Result<ApiResponse> {
        let url = self.endpoint(&format!("rss/disable/{feed_id}"));
        let response = self
            .client
            .patch(url)
            .send()
            .await
            .context("Feed disable request failed")?;
        Self::into_api_response(response).await
    }

    pub async fn enable_feeds(&self, feed_ids: &[i64]) -> Result<ApiResponse> {
        self.post_json("rss/enable/many", &feed_ids).await
    }

    pub async fn update_feed(&self, feed_id: i64, body: &Value) -> Result<ApiResponse> {
        self.patch_json(&format!("rss/update/{feed_id}"), body).await
    }

    pub async fn delete_feed(&self, feed_id: i64) -> Result<ApiResponse> {
        let url = self.endpoint(&format!("rss/delete/{feed_id}"));
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .context("Feed delete request failed")?;
        Self::into_api_response(response).await
    }

    pub async fn program_status(&self) -> Result<ApiResponse> {
        self.get("status").await
    }

    pub async fn start_program(&self) -> Result<ApiResponse> {
        self.get("start").await
    }

    pub async fn stop_program(&self) -> Result<ApiResponse> {
        self.get("stop").await
    }

    pub async fn restart_program(&self) -> Result<ApiResponse> {
        self.get("restart").await
    }

    pub async fn check_downloader(&self) -> Result<ApiResponse> {
        self.get("check/downloader").await
    }

    async fn get(&self, path: &str) -> Result<ApiResponse> {
        let url = self.endpoint(path);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Backend request failed: {path}"))?;
        Self::into_api_response(response).await
    }

    async fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<ApiResponse> {
        let url = self.endpoint(path);
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Backend request failed: {path}"))?;
        Self::into_api_response(response).await
    }

    async fn patch_json<T: Serialize>(&self, path: &str, body: &T) -> Result<ApiResponse> {
        let url = self.endpoint(path);
        let response = self
            .client
            .patch(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Backend request failed: {path}"))?;
        Self::into_api_response(response).await
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v1/{path}", self.base_url)
    }

    async fn into_api_response(response: reqwest::Response) -> Result<ApiResponse> {
        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to read backend response body")?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(ApiResponse { status, body })
    }
}
