//! Rendezvous registry endpoints: /peer/register, /channel/*, /message, /sync.

use std::collections::BTreeMap;

use axum::extract::{FromRef, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use meshchat_core::ChatMessage;
use meshchat_services::{PeerEndpoint, Registry};

use super::{field, ApiError, ApiForm, AuthToken, Authorized, OkResponse};

#[derive(Clone)]
pub struct RegistryState {
    pub registry: Registry,
    pub token: AuthToken,
}

impl FromRef<RegistryState> for AuthToken {
    fn from_ref(state: &RegistryState) -> Self {
        state.token.clone()
    }
}

// ── /peer/register ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RegisterForm {
    pub peer_id: Option<String>,
    pub ip: Option<String>,
    pub port: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct RegisterResponse {
    pub ok: bool,
    pub peers: BTreeMap<String, PeerEndpoint>,
}

pub async fn handle_register(
    _auth: Authorized,
    State(state): State<RegistryState>,
    ApiForm(form): ApiForm<RegisterForm>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let peers = state
        .registry
        .register(field(&form.peer_id), field(&form.ip), field(&form.port))?;
    Ok(Json(RegisterResponse { ok: true, peers }))
}

// ── /channel/create ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ChannelForm {
    pub name: Option<String>,
}

pub async fn handle_create(
    _auth: Authorized,
    State(state): State<RegistryState>,
    ApiForm(form): ApiForm<ChannelForm>,
) -> Result<Json<OkResponse>, ApiError> {
    state.registry.create_channel(field(&form.name)).await?;
    Ok(Json(OkResponse { ok: true }))
}

// ── /channel/join ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct JoinForm {
    pub name: Option<String>,
    pub peer_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct JoinResponse {
    pub ok: bool,
    pub peers: BTreeMap<String, PeerEndpoint>,
    pub members: Vec<String>,
}

pub async fn handle_join(
    _auth: Authorized,
    State(state): State<RegistryState>,
    ApiForm(form): ApiForm<JoinForm>,
) -> Result<Json<JoinResponse>, ApiError> {
    let view = state
        .registry
        .join_channel(field(&form.name), field(&form.peer_id))
        .await?;
    Ok(Json(JoinResponse {
        ok: true,
        peers: view.peers,
        members: view.members,
    }))
}

// ── /message ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct MessageForm {
    pub name: Option<String>,
    pub peer_id: Option<String>,
    pub text: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct PostResponse {
    pub ok: bool,
    pub seq: u64,
}

pub async fn handle_message(
    _auth: Authorized,
    State(state): State<RegistryState>,
    ApiForm(form): ApiForm<MessageForm>,
) -> Result<Json<PostResponse>, ApiError> {
    let text = form.text.as_deref().unwrap_or("");
    let seq = state
        .registry
        .post_message(field(&form.name), field(&form.peer_id), text)
        .await?;
    Ok(Json(PostResponse { ok: true, seq }))
}

// ── /sync ─────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SyncForm {
    pub name: Option<String>,
    pub after: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct SyncResponse {
    pub ok: bool,
    pub messages: Vec<ChatMessage>,
}

pub async fn handle_sync(
    _auth: Authorized,
    State(state): State<RegistryState>,
    ApiForm(form): ApiForm<SyncForm>,
) -> Result<Json<SyncResponse>, ApiError> {
    let after = parse_after(field(&form.after))?;
    let messages = state.registry.sync(field(&form.name), after).await;
    Ok(Json(SyncResponse { ok: true, messages }))
}

/// Negative cursors mean "from the start"; seqs begin at 1.
fn parse_after(raw: &str) -> Result<u64, ApiError> {
    if raw.is_empty() {
        return Ok(0);
    }
    let after = raw
        .parse::<i64>()
        .map_err(|_| ApiError::BadRequest("after must be int".into()))?;
    Ok(u64::try_from(after).unwrap_or(0))
}
