//! meshchatd — rendezvous registry and chat peer daemon.
//!
//! ```text
//! meshchatd registry [--ip IP] [--port PORT]
//! meshchatd peer --peer ID [--channel NAME] [--server URL] [--cookie C]
//!                [--ip IP] [--port PORT] [--advertise-ip IP]
//!                [--bridge-host HOST] [--bridge-port PORT] [--ui-root DIR]
//! ```

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use meshchat_api::{AuthToken, RegistryState};
use meshchat_core::config::MeshchatConfig;
use meshchat_services::Registry;

mod discovery;
mod mesh;
mod peer;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = MeshchatConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = MeshchatConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MeshchatConfig::default()
    });

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(mode) = args.first() else {
        print_usage();
        std::process::exit(2);
    };

    match mode.as_str() {
        "registry" => {
            apply_registry_flags(&mut config, &args[1..])?;
            run_registry(&config).await
        }
        "peer" => {
            apply_peer_flags(&mut config, &args[1..])?;
            tracing::info!(
                peer = %config.identity.peer_id,
                channel = %config.identity.channel,
                registry = %config.registry.url,
                "meshchatd peer starting"
            );
            peer::run(peer::PeerOptions::from_config(&config)).await
        }
        "-h" | "--help" | "help" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown mode: {other}");
            print_usage();
            std::process::exit(2);
        }
    }
}

async fn run_registry(config: &MeshchatConfig) -> Result<()> {
    let addr = (config.registry.listen_ip.as_str(), config.registry.port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind registry on {}:{}", addr.0, addr.1))?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let state = RegistryState {
        registry: Registry::new(),
        token: AuthToken::new(config.registry.cookie.clone()),
    };
    meshchat_api::serve_registry(listener, state, shutdown_rx).await
}

/// Iterate `--flag value` pairs.
fn flag_pairs(args: &[String]) -> Result<Vec<(&str, &str)>> {
    let mut pairs = Vec::new();
    let mut it = args.iter();
    while let Some(flag) = it.next() {
        let value = it
            .next()
            .with_context(|| format!("{flag} requires a value"))?;
        pairs.push((flag.as_str(), value.as_str()));
    }
    Ok(pairs)
}

fn parse_port(flag: &str, value: &str) -> Result<u16> {
    value
        .parse()
        .with_context(|| format!("{flag} must be a port number, got {value:?}"))
}

fn apply_registry_flags(config: &mut MeshchatConfig, args: &[String]) -> Result<()> {
    for (flag, value) in flag_pairs(args)? {
        match flag {
            "--ip" => config.registry.listen_ip = value.to_string(),
            "--port" => config.registry.port = parse_port(flag, value)?,
            "--cookie" => config.registry.cookie = value.to_string(),
            _ => anyhow::bail!("unknown registry flag: {flag}"),
        }
    }
    Ok(())
}

fn apply_peer_flags(config: &mut MeshchatConfig, args: &[String]) -> Result<()> {
    for (flag, value) in flag_pairs(args)? {
        match flag {
            "--peer" => config.identity.peer_id = value.to_string(),
            "--channel" => config.identity.channel = value.to_string(),
            "--server" => config.registry.url = value.to_string(),
            "--cookie" => config.registry.cookie = value.to_string(),
            "--ip" => config.peer.listen_ip = value.to_string(),
            "--port" => config.peer.listen_port = parse_port(flag, value)?,
            "--advertise-ip" => config.peer.advertise_ip = value.to_string(),
            "--bridge-host" => config.peer.bridge_host = value.to_string(),
            "--bridge-port" => config.peer.bridge_port = parse_port(flag, value)?,
            "--ui-root" => config.peer.ui_root = value.into(),
            _ => anyhow::bail!("unknown peer flag: {flag}"),
        }
    }
    if config.identity.peer_id.trim().is_empty() {
        anyhow::bail!("--peer is required (or set identity.peer_id in the config)");
    }
    Ok(())
}

fn print_usage() {
    println!("Usage: meshchatd <mode> [flags]");
    println!();
    println!("Modes:");
    println!("  registry   Serve the rendezvous registry");
    println!("             --ip IP  --port PORT  --cookie C");
    println!("  peer       Run a chat peer with its UI bridge");
    println!("             --peer ID  --channel NAME  --server URL  --cookie C");
    println!("             --ip IP  --port PORT  --advertise-ip IP");
    println!("             --bridge-host HOST  --bridge-port PORT (0 disables)  --ui-root DIR");
    println!();
    println!("Config: $MESHCHAT_CONFIG or ~/.config/meshchat/config.toml");
}
