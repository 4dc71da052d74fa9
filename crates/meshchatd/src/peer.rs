//! Peer mode: mesh, discovery, UI bridge, and the interactive console.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use meshchat_api::{AuthToken, BridgeState};
use meshchat_core::config::MeshchatConfig;
use meshchat_services::PeerNode;

use crate::discovery::{Discovery, RegistryClient};
use crate::mesh::{ConnectionManager, MeshSettings};

#[derive(Debug, Clone)]
pub struct PeerOptions {
    pub peer_id: String,
    pub channel: String,
    pub registry_url: String,
    pub cookie: String,
    pub listen_ip: String,
    pub listen_port: u16,
    /// Address other peers should dial; the listen address when empty.
    pub advertise_ip: String,
    pub bridge_host: String,
    /// `None` disables the bridge.
    pub bridge_port: Option<u16>,
    pub ui_root: PathBuf,
    pub mesh: MeshSettings,
    pub discovery_interval: Duration,
    pub http_timeout: Duration,
}

impl PeerOptions {
    pub fn from_config(config: &MeshchatConfig) -> Self {
        Self {
            peer_id: config.identity.peer_id.clone(),
            channel: config.identity.channel.clone(),
            registry_url: config.registry.url.clone(),
            cookie: config.registry.cookie.clone(),
            listen_ip: config.peer.listen_ip.clone(),
            listen_port: config.peer.listen_port,
            advertise_ip: config.peer.advertised_ip().to_string(),
            bridge_host: config.peer.bridge_host.clone(),
            bridge_port: Some(config.peer.bridge_port).filter(|p| *p != 0),
            ui_root: config.peer.ui_root.clone(),
            mesh: MeshSettings {
                connect_timeout: config.timing.connect_timeout(),
                hello_timeout: config.timing.hello_timeout(),
            },
            discovery_interval: config.timing.discovery_interval(),
            http_timeout: config.timing.http_timeout(),
        }
    }
}

/// A running peer. Dropping it shuts every task down.
pub struct PeerHandle {
    pub node: Arc<PeerNode>,
    pub mesh_addr: SocketAddr,
    pub bridge_addr: Option<SocketAddr>,
    shutdown: broadcast::Sender<()>,
}

impl PeerHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}

impl Drop for PeerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Bind the mesh, bootstrap against the registry, then leave discovery and
/// the bridge running in the background.
pub async fn start(opts: PeerOptions) -> Result<PeerHandle> {
    if opts.peer_id.trim().is_empty() {
        anyhow::bail!("peer id is required");
    }

    let node = Arc::new(PeerNode::new(&opts.peer_id, &opts.channel));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let manager = ConnectionManager::new(node.clone(), opts.mesh, shutdown_tx.clone());
    let mesh_addr = manager
        .listen(&opts.listen_ip, opts.listen_port)
        .with_context(|| format!("failed to bind mesh port {}:{}", opts.listen_ip, opts.listen_port))?;

    let advertise_ip = if opts.advertise_ip.is_empty() {
        opts.listen_ip.clone()
    } else {
        opts.advertise_ip.clone()
    };
    let client = RegistryClient::new(&opts.registry_url, &opts.cookie, opts.http_timeout)
        .context("failed to build registry client")?;
    let mut discovery = Discovery::new(
        client,
        manager,
        &advertise_ip,
        mesh_addr.port(),
        opts.discovery_interval,
        shutdown_tx.subscribe(),
    );
    let opened = discovery.bootstrap().await;
    tracing::info!(peer = %opts.peer_id, channel = %opts.channel, opened, "bootstrap complete");
    tokio::spawn(discovery.run());

    let bridge_addr = match opts.bridge_port {
        Some(port) => {
            let listener = TcpListener::bind((opts.bridge_host.as_str(), port))
                .await
                .with_context(|| format!("failed to bind bridge {}:{}", opts.bridge_host, port))?;
            let addr = listener.local_addr()?;
            let state = BridgeState {
                node: node.clone(),
                token: AuthToken::new(opts.cookie.clone()),
            };
            let ui_root = opts.ui_root.clone();
            let shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move {
                if let Err(e) = meshchat_api::serve_bridge(listener, state, &ui_root, shutdown).await {
                    tracing::error!(error = %e, "bridge failed");
                }
            });
            Some(addr)
        }
        None => None,
    };

    Ok(PeerHandle {
        node,
        mesh_addr,
        bridge_addr,
        shutdown: shutdown_tx,
    })
}

/// Start the peer and chat on stdin until `/quit` or ctrl-c.
pub async fn run(opts: PeerOptions) -> Result<()> {
    let peer = start(opts).await?;
    let node = peer.node.clone();

    let mut feed = node.subscribe();
    tokio::spawn(async move {
        loop {
            match feed.recv().await {
                Ok(m) => println!("[{}] {}", m.message.sender, m.message.text),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "console fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    println!(
        "[{}] joined #{}. Type to chat, /quit to exit.",
        node.peer_id(),
        node.channel()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }

            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        let text = line.trim_end_matches(['\r', '\n']);
                        if text == "/quit" {
                            break;
                        }
                        if text.trim().is_empty() {
                            continue;
                        }
                        if let Err(e) = node.send_all(text) {
                            eprintln!("could not send: {e}");
                        }
                    }
                    Ok(None) => {
                        tracing::info!("stdin closed, running until interrupted");
                        stdin_open = false;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed");
                        stdin_open = false;
                    }
                }
            }
        }
    }

    peer.shutdown();
    println!("bye.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshchat_api::RegistryState;
    use meshchat_services::{Direction, Registry};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    async fn start_registry() -> (String, broadcast::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = broadcast::channel(1);
        let state = RegistryState {
            registry: Registry::new(),
            token: AuthToken::new("auth=true"),
        };
        tokio::spawn(meshchat_api::serve_registry(listener, state, rx));
        (format!("http://{addr}"), tx)
    }

    fn options(peer_id: &str, registry_url: &str) -> PeerOptions {
        PeerOptions {
            peer_id: peer_id.to_string(),
            channel: "room".to_string(),
            registry_url: registry_url.to_string(),
            cookie: "auth=true".to_string(),
            listen_ip: "127.0.0.1".to_string(),
            listen_port: 0,
            advertise_ip: String::new(),
            bridge_host: "127.0.0.1".to_string(),
            bridge_port: None,
            ui_root: std::env::temp_dir(),
            mesh: MeshSettings {
                connect_timeout: Duration::from_secs(1),
                hello_timeout: Duration::from_secs(10),
            },
            discovery_interval: Duration::from_millis(100),
            http_timeout: Duration::from_secs(2),
        }
    }

    async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !cond() {
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for {what}");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn linked_pair(url: &str) -> (PeerHandle, PeerHandle) {
        let a = start(options("a", url)).await.unwrap();
        let b = start(options("b", url)).await.unwrap();
        wait_for("a -> b link", || {
            a.node.links().contains("b") && b.node.links().contains("a")
        })
        .await;
        (a, b)
    }

    #[tokio::test]
    async fn message_reaches_both_mirrors() {
        let (url, _registry) = start_registry().await;
        let (a, b) = linked_pair(&url).await;

        a.node.send_all("hi").unwrap();
        wait_for("b to mirror hi", || !b.node.local_sync("room", 0).is_empty()).await;

        let on_b = b.node.local_sync("room", 0);
        assert_eq!(on_b.len(), 1);
        assert_eq!(on_b[0].sender, "a");
        assert_eq!(on_b[0].text, "hi");

        let on_a = a.node.local_sync("room", 0);
        assert_eq!(on_a.len(), 1);
        assert_eq!(on_a[0].sender, "a");
    }

    #[tokio::test]
    async fn lower_id_dials_and_pair_keeps_one_link() {
        let (url, _registry) = start_registry().await;
        let (a, b) = linked_pair(&url).await;

        // let several discovery rounds pass
        tokio::time::sleep(Duration::from_millis(500)).await;

        let on_a = a.node.links().snapshot();
        let on_b = b.node.links().snapshot();
        assert_eq!(on_a.len(), 1);
        assert_eq!(on_b.len(), 1);
        assert_eq!(on_a[0].direction, Direction::Outbound);
        assert_eq!(on_b[0].direction, Direction::Inbound);
        assert_eq!(b.node.links().pending_count(), 0);
    }

    #[tokio::test]
    async fn reply_travels_back_over_the_same_link() {
        let (url, _registry) = start_registry().await;
        let (a, b) = linked_pair(&url).await;

        b.node.send_all("pong").unwrap();
        wait_for("a to mirror pong", || !a.node.local_sync("room", 0).is_empty()).await;
        assert_eq!(a.node.local_sync("room", 0)[0].sender, "b");
    }

    #[tokio::test]
    async fn departed_peer_is_removed() {
        let (url, _registry) = start_registry().await;
        let (a, b) = linked_pair(&url).await;

        drop(b);
        wait_for("a to drop b", || !a.node.links().contains("b")).await;
        assert!(a.node.links().is_empty());
    }

    #[tokio::test]
    async fn silent_inbound_link_is_closed_after_hello_timeout() {
        let (url, _registry) = start_registry().await;
        let mut opts = options("b", &url);
        opts.mesh.hello_timeout = Duration::from_millis(200);
        let b = start(opts).await.unwrap();

        let mut silent = TcpStream::connect(b.mesh_addr).await.unwrap();
        wait_for("pending link", || b.node.links().pending_count() == 1).await;

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(3), silent.read(&mut buf))
            .await
            .expect("socket should be closed")
            .unwrap_or(0);
        assert_eq!(n, 0);
        wait_for("pending cleared", || b.node.links().pending_count() == 0).await;
        assert!(b.node.links().is_empty());
    }

    #[tokio::test]
    async fn unreachable_registry_does_not_stop_the_peer() {
        let a = start(options("a", "http://127.0.0.1:1")).await.unwrap();
        let report = a.node.send_all("still here").unwrap();
        assert_eq!(report.seq, 1);
        assert_eq!(report.queued, 0);
    }

    #[tokio::test]
    async fn bridge_drives_the_local_mirror() {
        let (url, _registry) = start_registry().await;
        let mut opts = options("a", &url);
        opts.bridge_port = Some(0);
        let a = start(opts).await.unwrap();
        let base = format!("http://{}", a.bridge_addr.unwrap());
        let http = reqwest::Client::new();

        let post = |path: &str, form: &[(&str, &str)], cookie: bool| {
            let mut req = http
                .post(format!("{base}{path}"))
                .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(serde_urlencoded::to_string(form).unwrap());
            if cookie {
                req = req.header(reqwest::header::COOKIE, "auth=true");
            }
            req.send()
        };

        let resp = post("/message", &[("text", "hello")], false).await.unwrap();
        assert_eq!(resp.status(), 401);

        let resp = post("/message", &[("text", "   ")], true).await.unwrap();
        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "empty");

        let resp = post("/message", &[("name", ""), ("text", "hello")], true).await.unwrap();
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["ok"], true);
        assert_eq!(body["seq"], 1);

        let resp = post("/sync", &[("after", "bogus")], true).await.unwrap();
        let body: serde_json::Value = resp.json().await.unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["from"], "a");
        assert_eq!(messages[0]["text"], "hello");

        let resp = post("/channel/join", &[], true).await.unwrap();
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["channel"], "room");
        assert_eq!(body["peer_id"], "a");
        assert!(body["peers"].as_object().unwrap().is_empty());

        let resp = http
            .get(format!("{base}/status"))
            .header(reqwest::header::COOKIE, "auth=true")
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["peer_id"], "a");
        assert_eq!(body["channels"]["room"], 1);

        let resp = post("/login", &[], false).await.unwrap();
        let cookie = resp.headers().get(reqwest::header::SET_COOKIE).unwrap();
        assert_eq!(cookie.to_str().unwrap(), "auth=true; Path=/");
    }
}
