//! Rendezvous registry — peer directory, channel membership, channel logs.
//!
//! The peer directory is keyed by peer id and upserted on every register;
//! entries are never reaped. All channels live in one book behind a single
//! lock together with the registry-wide seq counter, so "take next seq" and
//! "append to log" can never interleave between two posters.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use meshchat_core::{now_secs, ChatMessage};

use crate::channel_log::ChannelLog;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
}

/// A registered peer endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord {
    pub peer_id: String,
    pub ip: String,
    pub port: u16,
    /// Unix seconds of the latest register call.
    pub last_seen: f64,
}

/// Where to dial a peer, as handed out in discovery responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerEndpoint {
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub last_seen: f64,
}

impl PeerRecord {
    pub fn endpoint(&self) -> PeerEndpoint {
        PeerEndpoint {
            ip: self.ip.clone(),
            port: self.port,
            last_seen: self.last_seen,
        }
    }
}

/// Discovery payload returned by `join_channel`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinView {
    /// Members that have a known endpoint.
    pub peers: BTreeMap<String, PeerEndpoint>,
    /// Every member id, registered or not.
    pub members: Vec<String>,
}

#[derive(Debug, Default)]
struct Channel {
    members: BTreeSet<String>,
    log: ChannelLog,
}

#[derive(Debug, Default)]
struct ChannelBook {
    /// Last seq handed out, across all channels.
    seq: u64,
    channels: HashMap<String, Channel>,
}

#[derive(Clone, Default)]
pub struct Registry {
    peers: Arc<DashMap<String, PeerRecord>>,
    book: Arc<Mutex<ChannelBook>>,
}

fn required<'a>(value: &'a str, what: &str) -> Result<&'a str, RegistryError> {
    if value.trim().is_empty() {
        Err(RegistryError::BadRequest(format!("Missing {what}")))
    } else {
        Ok(value)
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a peer endpoint. Returns the whole directory afterwards.
    pub fn register(
        &self,
        peer_id: &str,
        ip: &str,
        port: &str,
    ) -> Result<BTreeMap<String, PeerEndpoint>, RegistryError> {
        if peer_id.is_empty() || ip.is_empty() || port.is_empty() {
            return Err(RegistryError::BadRequest("Missing peer_id/ip/port".into()));
        }
        let port: u16 = port
            .trim()
            .parse()
            .map_err(|_| RegistryError::BadRequest("port must be int".into()))?;

        let record = PeerRecord {
            peer_id: peer_id.to_string(),
            ip: ip.to_string(),
            port,
            last_seen: now_secs(),
        };
        tracing::info!(peer = peer_id, ip, port, "peer registered");
        self.peers.insert(peer_id.to_string(), record);

        Ok(self.directory())
    }

    /// Snapshot of every known peer endpoint.
    pub fn directory(&self) -> BTreeMap<String, PeerEndpoint> {
        self.peers
            .iter()
            .map(|e| (e.key().clone(), e.value().endpoint()))
            .collect()
    }

    pub fn peer(&self, peer_id: &str) -> Option<PeerRecord> {
        self.peers.get(peer_id).map(|r| r.value().clone())
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub async fn create_channel(&self, name: &str) -> Result<(), RegistryError> {
        let name = required(name, "name")?;
        let mut book = self.book.lock().await;
        if !book.channels.contains_key(name) {
            book.channels.insert(name.to_string(), Channel::default());
            tracing::info!(channel = name, "channel created");
        }
        Ok(())
    }

    /// Add `peer_id` to the channel (creating it if needed) and return the
    /// membership plus the endpoints of every member that has registered.
    pub async fn join_channel(&self, name: &str, peer_id: &str) -> Result<JoinView, RegistryError> {
        if name.trim().is_empty() || peer_id.trim().is_empty() {
            return Err(RegistryError::BadRequest("Missing name/peer_id".into()));
        }

        let members: Vec<String> = {
            let mut book = self.book.lock().await;
            let channel = book.channels.entry(name.to_string()).or_default();
            if channel.members.insert(peer_id.to_string()) {
                tracing::info!(channel = name, peer = peer_id, "peer joined channel");
            }
            channel.members.iter().cloned().collect()
        };

        let peers = members
            .iter()
            .filter_map(|m| self.peers.get(m).map(|r| (m.clone(), r.endpoint())))
            .collect();

        Ok(JoinView { peers, members })
    }

    /// Append to a channel log using the registry-wide counter.
    pub async fn post_message(
        &self,
        name: &str,
        peer_id: &str,
        text: &str,
    ) -> Result<u64, RegistryError> {
        let name = required(name, "name")?;
        let peer_id = required(peer_id, "peer_id")?;

        let mut book = self.book.lock().await;
        if !book.channels.contains_key(name) {
            return Err(RegistryError::NotFound("Channel not found".into()));
        }
        book.seq += 1;
        let seq = book.seq;
        if let Some(channel) = book.channels.get_mut(name) {
            channel.log.append_with_seq(seq, peer_id, text, now_secs());
        }
        tracing::debug!(channel = name, peer = peer_id, seq, "message posted");
        Ok(seq)
    }

    /// Messages of `name` with `seq > after_seq`. Unknown channels are empty.
    pub async fn sync(&self, name: &str, after_seq: u64) -> Vec<ChatMessage> {
        let book = self.book.lock().await;
        book.channels
            .get(name)
            .map(|c| c.log.after(after_seq))
            .unwrap_or_default()
    }

    #[cfg(test)]
    async fn members(&self, name: &str) -> Option<Vec<String>> {
        let book = self.book.lock().await;
        book.channels
            .get(name)
            .map(|c| c.members.iter().cloned().collect())
    }

    #[cfg(test)]
    async fn channel_names(&self) -> Vec<String> {
        let book = self.book.lock().await;
        let mut names: Vec<String> = book.channels.keys().cloned().collect();
        names.sort();
        names
    }
}
