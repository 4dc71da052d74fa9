//! Local UI bridge: lets a browser or script drive one peer node over HTTP.
//!
//! Reads come from the node's local mirror, never from the registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{FromRef, State};
use axum::response::Html;
use axum::Json;
use serde::{Deserialize, Serialize};

use meshchat_core::ChatMessage;
use meshchat_services::{LinkSummary, PeerNode};

use super::registry::{ChannelForm, JoinForm, MessageForm, PostResponse, SyncForm, SyncResponse};
use super::{field, ApiError, ApiForm, AuthToken, Authorized};

#[derive(Clone)]
pub struct BridgeState {
    pub node: Arc<PeerNode>,
    pub token: AuthToken,
}

impl FromRef<BridgeState> for AuthToken {
    fn from_ref(state: &BridgeState) -> Self {
        state.token.clone()
    }
}

impl BridgeState {
    fn channel_or_default<'a>(&'a self, name: &'a Option<String>) -> &'a str {
        match field(name) {
            "" => self.node.channel(),
            name => name,
        }
    }
}

// ── /channel/create ───────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct ChannelResponse {
    pub ok: bool,
    pub channel: String,
}

pub async fn handle_create(
    _auth: Authorized,
    State(state): State<BridgeState>,
    ApiForm(form): ApiForm<ChannelForm>,
) -> Json<ChannelResponse> {
    let channel = state.channel_or_default(&form.name).to_string();
    state.node.mirror().ensure(&channel);
    Json(ChannelResponse { ok: true, channel })
}

// ── /channel/join ─────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct LinkedPeer {
    pub connected: bool,
}

#[derive(Serialize, Deserialize)]
pub struct BridgeJoinResponse {
    pub ok: bool,
    pub channel: String,
    pub peer_id: String,
    pub peers: BTreeMap<String, LinkedPeer>,
}

pub async fn handle_join(
    _auth: Authorized,
    State(state): State<BridgeState>,
    ApiForm(form): ApiForm<JoinForm>,
) -> Json<BridgeJoinResponse> {
    let channel = state.channel_or_default(&form.name).to_string();
    let peer_id = match field(&form.peer_id) {
        "" => state.node.peer_id().to_string(),
        id => id.to_string(),
    };
    state.node.mirror().ensure(&channel);

    let peers = state
        .node
        .links()
        .peer_ids()
        .into_iter()
        .map(|id| (id, LinkedPeer { connected: true }))
        .collect();

    Json(BridgeJoinResponse {
        ok: true,
        channel,
        peer_id,
        peers,
    })
}

// ── /message ──────────────────────────────────────────────────────────────────

pub async fn handle_message(
    _auth: Authorized,
    State(state): State<BridgeState>,
    ApiForm(form): ApiForm<MessageForm>,
) -> Result<Json<PostResponse>, ApiError> {
    let text = field(&form.text);
    if text.is_empty() {
        return Err(ApiError::BadRequest("empty".into()));
    }
    let channel = state.channel_or_default(&form.name);
    let report = state
        .node
        .send_to_channel(channel, text)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    tracing::info!(
        channel,
        seq = report.seq,
        links = report.queued,
        "message sent from bridge"
    );
    Ok(Json(PostResponse {
        ok: true,
        seq: report.seq,
    }))
}

// ── /sync ─────────────────────────────────────────────────────────────────────

pub async fn handle_sync(
    _auth: Authorized,
    State(state): State<BridgeState>,
    ApiForm(form): ApiForm<SyncForm>,
) -> Json<SyncResponse> {
    let after = field(&form.after).parse::<u64>().unwrap_or(0);
    let messages: Vec<ChatMessage> = state
        .node
        .local_sync(state.channel_or_default(&form.name), after);
    Json(SyncResponse { ok: true, messages })
}

// ── /status ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub peer_id: String,
    pub channel: String,
    pub links: Vec<LinkSummary>,
    pub pending: usize,
    /// Mirrored message count per channel.
    pub channels: BTreeMap<String, usize>,
}

pub async fn handle_status(
    _auth: Authorized,
    State(state): State<BridgeState>,
) -> Json<StatusResponse> {
    let links = state.node.links();
    let mirror = state.node.mirror();
    Json(StatusResponse {
        peer_id: state.node.peer_id().to_string(),
        channel: state.node.channel().to_string(),
        links: links.snapshot(),
        pending: links.pending_count(),
        channels: mirror
            .channel_names()
            .into_iter()
            .map(|name| {
                let count = mirror.count(&name);
                (name, count)
            })
            .collect(),
    })
}

// ── static fallback ───────────────────────────────────────────────────────────

/// Served for any GET that matches no file under the UI root.
pub async fn handle_placeholder(State(state): State<BridgeState>) -> Html<String> {
    Html(format!(
        "<html><body><h3>meshchat bridge for {}</h3>\
         <p>Try <a href='/chat.html'>/chat.html</a>.</p></body></html>",
        state.node.peer_id()
    ))
}
