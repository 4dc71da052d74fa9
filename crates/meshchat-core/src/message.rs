//! Chat message record shared by the registry log and the peer mirror.

use serde::{Deserialize, Serialize};

/// One entry of a channel log.
///
/// `seq` is assigned by whoever owns the log and is only comparable with
/// other `seq` values from that same log owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub seq: u64,
    #[serde(rename = "from")]
    pub sender: String,
    pub text: String,
    /// Unix timestamp in seconds.
    pub ts: f64,
}

/// Current wall-clock time as fractional Unix seconds.
pub fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
