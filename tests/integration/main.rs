//! meshchat integration test harness.
//!
//! Each test starts its own registry in-process on an ephemeral loopback
//! port and talks to it over real HTTP with form-encoded bodies, exactly as
//! peers and the CLI do.
//!
//!   cargo test --test integration

use std::net::SocketAddr;

use anyhow::{Context, Result};
use reqwest::header::{CONTENT_TYPE, COOKIE};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use meshchat_api::{AuthToken, RegistryState};
use meshchat_services::Registry;

mod channels;
mod directory;

pub const COOKIE_TOKEN: &str = "auth=true";

// ── Harness ───────────────────────────────────────────────────────────────────

/// A registry served on 127.0.0.1:0 for the lifetime of the value.
pub struct TestRegistry {
    pub addr: SocketAddr,
    pub registry: Registry,
    http: reqwest::Client,
    shutdown: broadcast::Sender<()>,
}

impl TestRegistry {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let registry = Registry::new();
        let state = RegistryState {
            registry: registry.clone(),
            token: AuthToken::new(COOKIE_TOKEN),
        };
        let (shutdown, rx) = broadcast::channel(1);
        tokio::spawn(meshchat_api::serve_registry(listener, state, rx));

        Ok(Self {
            addr,
            registry,
            http: reqwest::Client::new(),
            shutdown,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// POST a form, optionally with the auth cookie. Returns status and JSON body.
    pub async fn post_as(
        &self,
        path: &str,
        form: &[(&str, &str)],
        cookie: Option<&str>,
    ) -> Result<(StatusCode, Value)> {
        let body = serde_urlencoded::to_string(form)?;
        let mut req = self
            .http
            .post(self.url(path))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body);
        if let Some(c) = cookie {
            req = req.header(COOKIE, c);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("POST {path} failed"))?;
        let status = resp.status();
        let json = resp.json::<Value>().await.context("response was not JSON")?;
        Ok((status, json))
    }

    /// POST a form with the auth cookie.
    pub async fn post(&self, path: &str, form: &[(&str, &str)]) -> Result<(StatusCode, Value)> {
        self.post_as(path, form, Some(COOKIE_TOKEN)).await
    }

    /// POST a raw body with the auth cookie and no `Content-Type` header.
    pub async fn post_untyped(&self, path: &str, body: &str) -> Result<(StatusCode, Value)> {
        let resp = self
            .http
            .post(self.url(path))
            .header(COOKIE, COOKIE_TOKEN)
            .body(body.to_string())
            .send()
            .await
            .with_context(|| format!("POST {path} failed"))?;
        let status = resp.status();
        Ok((status, resp.json::<Value>().await?))
    }

    pub async fn get(&self, path_and_query: &str) -> Result<(StatusCode, Value)> {
        let resp = self
            .http
            .get(self.url(path_and_query))
            .header(COOKIE, COOKIE_TOKEN)
            .send()
            .await?;
        let status = resp.status();
        Ok((status, resp.json::<Value>().await?))
    }

    pub async fn login(&self) -> Result<(StatusCode, Option<String>, Value)> {
        let resp = self.http.post(self.url("/login")).send().await?;
        let status = resp.status();
        let cookie = resp
            .headers()
            .get(reqwest::header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok((status, cookie, resp.json::<Value>().await?))
    }

    pub async fn register(&self, peer_id: &str, port: &str) -> Result<Value> {
        let (status, body) = self
            .post(
                "/peer/register",
                &[("peer_id", peer_id), ("ip", "127.0.0.1"), ("port", port)],
            )
            .await?;
        anyhow::ensure!(status.is_success(), "register failed: {body}");
        Ok(body)
    }

    pub async fn join(&self, channel: &str, peer_id: &str) -> Result<Value> {
        let (status, body) = self
            .post("/channel/join", &[("name", channel), ("peer_id", peer_id)])
            .await?;
        anyhow::ensure!(status.is_success(), "join failed: {body}");
        Ok(body)
    }

    pub async fn send(&self, channel: &str, peer_id: &str, text: &str) -> Result<u64> {
        let (status, body) = self
            .post(
                "/message",
                &[("name", channel), ("peer_id", peer_id), ("text", text)],
            )
            .await?;
        anyhow::ensure!(status.is_success(), "post failed: {body}");
        body["seq"].as_u64().context("missing seq")
    }

    pub async fn sync(&self, channel: &str, after: u64) -> Result<Vec<Value>> {
        let after = after.to_string();
        let (status, body) = self
            .post("/sync", &[("name", channel), ("after", after.as_str())])
            .await?;
        anyhow::ensure!(status.is_success(), "sync failed: {body}");
        Ok(body["messages"].as_array().cloned().unwrap_or_default())
    }
}

impl Drop for TestRegistry {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

/// Sequence numbers of a sync reply, in order.
pub fn seqs(messages: &[Value]) -> Vec<u64> {
    messages.iter().filter_map(|m| m["seq"].as_u64()).collect()
}
