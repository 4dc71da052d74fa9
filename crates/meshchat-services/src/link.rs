//! Connection table — the live mesh links of one peer, keyed by remote peer id.
//!
//! A link is identified by its `LinkId` for the lifetime of its socket. An
//! inbound link sits in `pending` (keyed by that id) until the remote's hello
//! binds it to a peer id; a dialed link is bound right away. Rebinding a peer
//! id overwrites the previous entry. Teardown removes an entry only if it
//! still belongs to the dying link, so a stale socket cannot evict its
//! replacement.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;

pub type LinkId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Cloneable handle onto a link's outbound frame queue.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    pub id: LinkId,
    pub remote_addr: SocketAddr,
    pub direction: Direction,
    tx: mpsc::UnboundedSender<Bytes>,
}

impl LinkHandle {
    pub fn new(
        id: LinkId,
        remote_addr: SocketAddr,
        direction: Direction,
        tx: mpsc::UnboundedSender<Bytes>,
    ) -> Self {
        Self {
            id,
            remote_addr,
            direction,
            tx,
        }
    }

    /// Queue an encoded frame. False if the link's writer is gone.
    pub fn send(&self, frame: Bytes) -> bool {
        self.tx.send(frame).is_ok()
    }
}

#[derive(Debug)]
struct PeerLink {
    handle: LinkHandle,
    established_at: Instant,
}

/// Point-in-time view of one bound link.
#[derive(Debug, Clone, Serialize)]
pub struct LinkSummary {
    pub peer_id: String,
    pub remote_addr: String,
    pub direction: Direction,
    pub established_secs: u64,
}

#[derive(Clone, Default)]
pub struct ConnectionTable {
    links: Arc<DashMap<String, PeerLink>>,
    pending: Arc<DashMap<LinkId, SocketAddr>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_link_id(&self) -> LinkId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Track an accepted link that has not identified itself yet.
    pub fn add_pending(&self, handle: &LinkHandle) {
        self.pending.insert(handle.id, handle.remote_addr);
    }

    /// Bind `peer_id` to a link. Returns the link it displaced, if any.
    pub fn bind(&self, peer_id: &str, handle: LinkHandle) -> Option<LinkHandle> {
        self.pending.remove(&handle.id);
        let id = handle.id;
        let previous = self.links.insert(
            peer_id.to_string(),
            PeerLink {
                handle,
                established_at: Instant::now(),
            },
        );
        previous
            .map(|p| p.handle)
            .filter(|displaced| displaced.id != id)
    }

    /// Drop whatever the table holds for a closed link.
    /// Returns the peer id it had been bound to.
    pub fn remove_link(&self, id: LinkId) -> Option<String> {
        self.pending.remove(&id);
        let peer_id = self
            .links
            .iter()
            .find(|e| e.value().handle.id == id)
            .map(|e| e.key().clone())?;
        self.links
            .remove_if(&peer_id, |_, link| link.handle.id == id)
            .map(|(k, _)| k)
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.links.contains_key(peer_id)
    }

    pub fn targets(&self) -> Vec<(String, LinkHandle)> {
        self.links
            .iter()
            .map(|e| (e.key().clone(), e.value().handle.clone()))
            .collect()
    }

    pub fn snapshot(&self) -> Vec<LinkSummary> {
        let mut out: Vec<LinkSummary> = self
            .links
            .iter()
            .map(|e| LinkSummary {
                peer_id: e.key().clone(),
                remote_addr: e.value().handle.remote_addr.to_string(),
                direction: e.value().handle.direction,
                established_secs: e.value().established_at.elapsed().as_secs(),
            })
            .collect();
        out.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        out
    }

    pub fn peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.links.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
