//! Append-only per-channel message logs.
//!
//! `ChannelLog` is the sequence itself. Who assigns `seq` depends on the
//! owner: the registry draws from one counter shared by every channel it
//! hosts (`append_with_seq`), while a peer's local mirror numbers each
//! channel independently (`append`). Both are gap-free within their scope.

use std::sync::Arc;

use dashmap::DashMap;
use meshchat_core::ChatMessage;

#[derive(Debug, Clone, Default)]
pub struct ChannelLog {
    messages: Vec<ChatMessage>,
}

impl ChannelLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append with the next seq from this log's own counter.
    pub fn append(&mut self, sender: &str, text: &str, ts: f64) -> ChatMessage {
        let seq = self.last_seq() + 1;
        self.append_with_seq(seq, sender, text, ts)
    }

    /// Append with a seq assigned by an outer counter.
    pub fn append_with_seq(&mut self, seq: u64, sender: &str, text: &str, ts: f64) -> ChatMessage {
        debug_assert!(seq > self.last_seq(), "channel log seq must increase");
        let message = ChatMessage {
            seq,
            sender: sender.to_string(),
            text: text.to_string(),
            ts,
        };
        self.messages.push(message.clone());
        message
    }

    /// Every message with `seq > after_seq`, ascending.
    pub fn after(&self, after_seq: u64) -> Vec<ChatMessage> {
        let start = self.messages.partition_point(|m| m.seq <= after_seq);
        self.messages[start..].to_vec()
    }

    pub fn last_seq(&self) -> u64 {
        self.messages.last().map(|m| m.seq).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// A peer's local mirror: one independently numbered log per channel.
#[derive(Clone, Default)]
pub struct ChannelStore {
    channels: Arc<DashMap<String, ChannelLog>>,
}

impl ChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the channel if absent.
    pub fn ensure(&self, channel: &str) {
        self.channels.entry(channel.to_string()).or_default();
    }

    /// Append under the channel's entry lock so seq assignment and push are one step.
    pub fn append(&self, channel: &str, sender: &str, text: &str, ts: f64) -> ChatMessage {
        self.channels
            .entry(channel.to_string())
            .or_default()
            .append(sender, text, ts)
    }

    pub fn after(&self, channel: &str, after_seq: u64) -> Vec<ChatMessage> {
        self.channels
            .get(channel)
            .map(|log| log.after(after_seq))
            .unwrap_or_default()
    }

    pub fn count(&self, channel: &str) -> usize {
        self.channels.get(channel).map(|log| log.len()).unwrap_or(0)
    }

    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
