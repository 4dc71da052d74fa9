//! Registry client, bootstrap, and the periodic discovery loop.
//!
//! Discovery is pull-only: every round re-joins the channel and dials any
//! member this node is responsible for dialing that is not yet linked.
//! Registry or dial failures are logged here and retried next round.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, COOKIE};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;

use meshchat_api::handlers::registry::{JoinResponse, RegisterResponse};
use meshchat_api::handlers::{ErrorBody, OkResponse};
use meshchat_services::{PeerEndpoint, PeerNode};

use crate::mesh::{ConnectionManager, DialOutcome};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("registry rejected request ({status}): {error}")]
    Rejected { status: u16, error: String },
    #[error("unexpected registry response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("form encode failed: {0}")]
    Encode(#[from] serde_urlencoded::ser::Error),
}

/// Form-encoded, cookie-authenticated client for the rendezvous registry.
#[derive(Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
    cookie: String,
}

impl RegistryClient {
    pub fn new(base_url: &str, cookie: &str, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            cookie: cookie.to_string(),
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<T, ClientError> {
        let body = serde_urlencoded::to_string(form)?;
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(COOKIE, &self.cookie)
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            let error = serde_json::from_slice::<ErrorBody>(&bytes)
                .map(|b| b.error)
                .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                error,
            });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn register(
        &self,
        peer_id: &str,
        ip: &str,
        port: u16,
    ) -> Result<BTreeMap<String, PeerEndpoint>, ClientError> {
        let port = port.to_string();
        let resp: RegisterResponse = self
            .post(
                "/peer/register",
                &[("peer_id", peer_id), ("ip", ip), ("port", port.as_str())],
            )
            .await?;
        Ok(resp.peers)
    }

    pub async fn create_channel(&self, name: &str) -> Result<(), ClientError> {
        let _: OkResponse = self.post("/channel/create", &[("name", name)]).await?;
        Ok(())
    }

    pub async fn join_channel(&self, name: &str, peer_id: &str) -> Result<JoinResponse, ClientError> {
        self.post("/channel/join", &[("name", name), ("peer_id", peer_id)])
            .await
    }
}

pub struct Discovery {
    client: RegistryClient,
    manager: ConnectionManager,
    node: Arc<PeerNode>,
    advertise_ip: String,
    advertise_port: u16,
    interval: Duration,
    registered: bool,
    shutdown: broadcast::Receiver<()>,
}

impl Discovery {
    pub fn new(
        client: RegistryClient,
        manager: ConnectionManager,
        advertise_ip: &str,
        advertise_port: u16,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            node: manager.node().clone(),
            client,
            manager,
            advertise_ip: advertise_ip.to_string(),
            advertise_port,
            interval,
            registered: false,
            shutdown,
        }
    }

    /// register → create → join → dial. Each step is attempted even if an
    /// earlier one failed; returns the number of links opened.
    pub async fn bootstrap(&mut self) -> usize {
        self.ensure_registered().await;

        let channel = self.node.channel().to_string();
        if let Err(e) = self.client.create_channel(&channel).await {
            tracing::warn!(channel = %channel, error = %e, "channel create failed");
        }

        match self.client.join_channel(&channel, self.node.peer_id()).await {
            Ok(view) => {
                tracing::info!(
                    channel = %channel,
                    members = view.members.len(),
                    "joined channel"
                );
                self.dial_members(&view.peers).await
            }
            Err(e) => {
                tracing::warn!(channel = %channel, error = %e, "channel join failed");
                0
            }
        }
    }

    pub async fn run(mut self) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut interval = tokio::time::interval_at(start, self.interval);

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("discovery shutting down");
                    return;
                }

                _ = interval.tick() => {
                    self.round().await;
                }
            }
        }
    }

    async fn round(&mut self) {
        self.ensure_registered().await;

        let channel = self.node.channel().to_string();
        match self.client.join_channel(&channel, self.node.peer_id()).await {
            Ok(view) => {
                let opened = self.dial_members(&view.peers).await;
                if opened > 0 {
                    tracing::info!(opened, "discovery opened new links");
                }
            }
            Err(e) => tracing::debug!(error = %e, "discovery round failed"),
        }

        let links = self.node.links();
        tracing::debug!(
            links = links.len(),
            pending = links.pending_count(),
            "link table snapshot"
        );
        for link in links.snapshot() {
            tracing::debug!(
                peer = %link.peer_id,
                addr = %link.remote_addr,
                direction = ?link.direction,
                secs = link.established_secs,
                "  link"
            );
        }
    }

    async fn ensure_registered(&mut self) {
        if self.registered {
            return;
        }
        match self
            .client
            .register(self.node.peer_id(), &self.advertise_ip, self.advertise_port)
            .await
        {
            Ok(peers) => {
                self.registered = true;
                tracing::info!(
                    ip = %self.advertise_ip,
                    port = self.advertise_port,
                    known = peers.len(),
                    "registered with registry"
                );
            }
            Err(e) => tracing::warn!(error = %e, "register failed"),
        }
    }

    async fn dial_members(&self, peers: &BTreeMap<String, PeerEndpoint>) -> usize {
        let mut opened = 0;
        for (peer_id, endpoint) in peers {
            if endpoint.port == 0 || !self.node.should_dial(peer_id) {
                continue;
            }
            if self.node.links().contains(peer_id) {
                continue;
            }
            match self
                .manager
                .dial(peer_id, &endpoint.ip, endpoint.port)
                .await
            {
                Ok(DialOutcome::Linked) => opened += 1,
                Ok(DialOutcome::AlreadyLinked) => {}
                Err(e) => tracing::debug!(peer = %peer_id, error = %e, "dial failed"),
            }
        }
        opened
    }
}
