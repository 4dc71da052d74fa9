//! Peer node — frame handling, broadcast, and the local mirror.
//!
//! The network loops (listener, dialer, discovery) live in the daemon; this
//! type is the state they share and the rules they apply.

use tokio::sync::broadcast;

use meshchat_core::{now_secs, ChatMessage, Frame, ProtocolError};

use crate::channel_log::ChannelStore;
use crate::link::{ConnectionTable, LinkHandle};

/// Capacity of the mirrored-message feed.
const FEED_CAPACITY: usize = 256;

/// Single-sided dialing rule: only the lexicographically smaller id initiates.
pub fn initiates(local: &str, remote: &str) -> bool {
    local < remote
}

/// A message that just entered the local mirror.
#[derive(Debug, Clone)]
pub struct MirroredMessage {
    pub channel: String,
    pub message: ChatMessage,
}

/// What handling one frame did to node state.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEffect {
    /// The link is now bound to this peer id.
    Identified(String),
    /// A message was appended to the local mirror.
    Mirrored { channel: String, seq: u64 },
    Ignored,
}

/// Outcome of a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    /// Seq assigned in the local mirror.
    pub seq: u64,
    /// Links the frame was queued on.
    pub queued: usize,
    /// Links whose writer had already gone away.
    pub dropped: usize,
}

pub struct PeerNode {
    peer_id: String,
    channel: String,
    links: ConnectionTable,
    mirror: ChannelStore,
    feed: broadcast::Sender<MirroredMessage>,
}

impl PeerNode {
    pub fn new(peer_id: &str, channel: &str) -> Self {
        let mirror = ChannelStore::new();
        mirror.ensure(channel);
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            peer_id: peer_id.to_string(),
            channel: channel.to_string(),
            links: ConnectionTable::new(),
            mirror,
            feed,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn links(&self) -> &ConnectionTable {
        &self.links
    }

    pub fn mirror(&self) -> &ChannelStore {
        &self.mirror
    }

    /// Whether this node is the side that dials `remote`.
    pub fn should_dial(&self, remote: &str) -> bool {
        remote != self.peer_id && initiates(&self.peer_id, remote)
    }

    pub fn hello_frame(&self) -> Frame {
        Frame::hello(&self.peer_id, &self.channel)
    }

    /// Subscribe to messages as they enter the local mirror.
    pub fn subscribe(&self) -> broadcast::Receiver<MirroredMessage> {
        self.feed.subscribe()
    }

    /// Decode and handle one delimited line received on `link`.
    pub fn on_line(&self, line: &[u8], link: &LinkHandle) -> Result<FrameEffect, ProtocolError> {
        let frame = Frame::decode(line)?;
        Ok(self.on_frame(frame, link))
    }

    pub fn on_frame(&self, frame: Frame, link: &LinkHandle) -> FrameEffect {
        match frame {
            Frame::Hello { from, .. } => {
                if from.is_empty() {
                    return FrameEffect::Ignored;
                }
                if self.links.bind(&from, link.clone()).is_some() {
                    tracing::debug!(peer = %from, "hello replaced an existing link");
                }
                tracing::info!(
                    peer = %from,
                    addr = %link.remote_addr,
                    direction = ?link.direction,
                    "peer identified"
                );
                FrameEffect::Identified(from)
            }
            Frame::Msg {
                chan,
                from,
                text,
                ts,
            } => {
                let channel = chan
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| self.channel.clone());
                let ts = ts.unwrap_or_else(now_secs);
                let seq = self.mirror_message(&channel, &from, &text, ts);
                FrameEffect::Mirrored { channel, seq }
            }
        }
    }

    /// Broadcast on the node's own channel.
    pub fn send_all(&self, text: &str) -> Result<SendReport, ProtocolError> {
        let channel = self.channel.clone();
        self.send_to_channel(&channel, text)
    }

    /// Append locally, then queue a `msg` frame on every bound link.
    /// Delivery is fire-and-forget.
    pub fn send_to_channel(&self, channel: &str, text: &str) -> Result<SendReport, ProtocolError> {
        let ts = now_secs();
        let raw = Frame::msg(channel, &self.peer_id, text, ts).encode()?;
        let seq = self.mirror_message(channel, &self.peer_id, text, ts);

        let mut queued = 0;
        let mut dropped = 0;
        for (peer, link) in self.links.targets() {
            if link.send(raw.clone()) {
                queued += 1;
            } else {
                dropped += 1;
                tracing::debug!(peer = %peer, "link writer gone, frame dropped");
            }
        }

        tracing::debug!(channel, seq, queued, dropped, "message broadcast");
        Ok(SendReport {
            seq,
            queued,
            dropped,
        })
    }

    /// Locally mirrored messages with `seq > after_seq`.
    pub fn local_sync(&self, channel: &str, after_seq: u64) -> Vec<ChatMessage> {
        self.mirror.after(channel, after_seq)
    }

    fn mirror_message(&self, channel: &str, from: &str, text: &str, ts: f64) -> u64 {
        let message = self.mirror.append(channel, from, text, ts);
        let seq = message.seq;
        let _ = self.feed.send(MirroredMessage {
            channel: channel.to_string(),
            message,
        });
        seq
    }
}
