//! One-shot registry commands: login, register, create, join, send, sync.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Deserialize;

use super::http::Server;

#[derive(Deserialize)]
pub struct Endpoint {
    pub ip: String,
    pub port: u16,
}

#[derive(Deserialize)]
pub struct RegisterResponse {
    pub peers: BTreeMap<String, Endpoint>,
}

#[derive(Deserialize)]
pub struct Ack {
    pub ok: bool,
}

#[derive(Deserialize)]
pub struct JoinResponse {
    pub peers: BTreeMap<String, Endpoint>,
    pub members: Vec<String>,
}

#[derive(Deserialize)]
pub struct PostResponse {
    pub seq: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub seq: u64,
    pub from: String,
    pub text: String,
}

#[derive(Deserialize)]
pub struct SyncResponse {
    pub messages: Vec<Message>,
}

pub async fn register(server: &Server, peer_id: &str, ip: &str, port: &str) -> Result<RegisterResponse> {
    server
        .post_form(
            "/peer/register",
            &[("peer_id", peer_id), ("ip", ip), ("port", port)],
        )
        .await
}

pub async fn create(server: &Server, channel: &str) -> Result<Ack> {
    server.post_form("/channel/create", &[("name", channel)]).await
}

pub async fn join(server: &Server, channel: &str, peer_id: &str) -> Result<JoinResponse> {
    server
        .post_form("/channel/join", &[("name", channel), ("peer_id", peer_id)])
        .await
}

pub async fn send(server: &Server, channel: &str, peer_id: &str, text: &str) -> Result<PostResponse> {
    server
        .post_form(
            "/message",
            &[("name", channel), ("peer_id", peer_id), ("text", text)],
        )
        .await
}

pub async fn sync(server: &Server, channel: &str, after: u64) -> Result<SyncResponse> {
    let after = after.to_string();
    server
        .post_form("/sync", &[("name", channel), ("after", after.as_str())])
        .await
}

fn print_endpoints(peers: &BTreeMap<String, Endpoint>) {
    if peers.is_empty() {
        println!("  (no registered peers)");
    }
    for (id, ep) in peers {
        println!("  {id:<16} {}:{}", ep.ip, ep.port);
    }
}

pub async fn cmd_login(server: &Server) -> Result<()> {
    match server.post_login().await? {
        Some(cookie) => println!("Logged in. Cookie: {cookie}"),
        None => println!("Logged in."),
    }
    Ok(())
}

pub async fn cmd_register(server: &Server, peer_id: &str, ip: &str, port: &str) -> Result<()> {
    let resp = register(server, peer_id, ip, port).await?;
    println!("Registered {peer_id} at {ip}:{port}. Directory:");
    print_endpoints(&resp.peers);
    Ok(())
}

pub async fn cmd_create(server: &Server, channel: &str) -> Result<()> {
    let resp = create(server, channel).await?;
    if resp.ok {
        println!("Channel #{channel} ready.");
    }
    Ok(())
}

pub async fn cmd_join(server: &Server, channel: &str, peer_id: &str) -> Result<()> {
    let resp = join(server, channel, peer_id).await?;
    println!("#{channel} members: {}", resp.members.join(", "));
    print_endpoints(&resp.peers);
    Ok(())
}

pub async fn cmd_send(server: &Server, channel: &str, peer_id: &str, text: &str) -> Result<()> {
    let resp = send(server, channel, peer_id, text).await?;
    println!("Posted to #{channel} as seq {}.", resp.seq);
    Ok(())
}

pub async fn cmd_sync(server: &Server, channel: &str, after: u64) -> Result<()> {
    let resp = sync(server, channel, after).await?;
    if resp.messages.is_empty() {
        println!("No messages in #{channel} after seq {after}.");
    }
    for m in &resp.messages {
        println!("{:>6}  [{}] {}", m.seq, m.from, m.text);
    }
    Ok(())
}
