//! Shared HTTP request helpers for CLI commands.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{CONTENT_TYPE, COOKIE};
use serde::Deserialize;

pub const DEFAULT_SERVER: &str = "http://127.0.0.1:9000";
pub const DEFAULT_COOKIE: &str = "auth=true";

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Form-posting client for the registry (or a peer bridge).
#[derive(Clone)]
pub struct Server {
    http: reqwest::Client,
    base_url: String,
    cookie: String,
}

impl Server {
    pub fn new(base_url: &str, cookie: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            cookie: cookie.to_string(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST a urlencoded form and decode the JSON reply. Non-2xx replies
    /// become errors carrying the server's `error` text.
    pub async fn post_form<R>(&self, path: &str, form: &[(&str, &str)]) -> Result<R>
    where
        R: for<'de> Deserialize<'de>,
    {
        let url = self.url(path);
        let body = serde_urlencoded::to_string(form).context("failed to encode form")?;
        let resp = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(COOKIE, &self.cookie)
            .body(body)
            .send()
            .await
            .with_context(|| format!("failed to connect to {url}, is the registry running?"))?;

        let status = resp.status();
        let bytes = resp.bytes().await.context("failed to read response")?;
        if !status.is_success() {
            let error = serde_json::from_slice::<ErrorBody>(&bytes)
                .map(|b| b.error)
                .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
            anyhow::bail!("{path} failed ({status}): {error}");
        }
        serde_json::from_slice(&bytes).context("failed to parse response")
    }

    /// POST without a body; returns the reply's `Set-Cookie`, if any.
    pub async fn post_login(&self) -> Result<Option<String>> {
        let url = self.url("/login");
        let resp = self
            .http
            .post(&url)
            .send()
            .await
            .with_context(|| format!("failed to connect to {url}, is the registry running?"))?
            .error_for_status()?;
        Ok(resp
            .headers()
            .get(reqwest::header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string))
    }
}
