pub mod handlers;

use std::path::Path;

use axum::http::header::SET_COOKIE;
use axum::http::HeaderValue;
use axum::response::Redirect;
use axum::routing::{get, post, MethodRouter};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeader;

pub use handlers::{ApiError, AuthToken, BridgeState, RegistryState};

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Routes of the rendezvous registry.
pub fn registry_router(state: RegistryState) -> Router {
    use handlers::registry::*;

    Router::new()
        .route("/login", post(handlers::handle_login::<RegistryState>))
        .route("/peer/register", post(handle_register))
        .route("/channel/create", post(handle_create))
        .route("/channel/join", post(handle_join))
        .route("/message", post(handle_message))
        .route("/sync", post(handle_sync).get(handle_sync))
        .with_state(state)
        .layer(cors())
}

/// Routes of a peer's UI bridge. Unmatched GETs are served from `ui_root`.
pub fn bridge_router(state: BridgeState, ui_root: &Path) -> Router {
    use handlers::bridge::*;

    let placeholder: MethodRouter = get(handle_placeholder).with_state(state.clone());
    let cookie = HeaderValue::from_str(&format!("{}; Path=/", state.token.0))
        .unwrap_or_else(|_| HeaderValue::from_static("auth=true; Path=/"));
    let static_files = SetResponseHeader::overriding(
        ServeDir::new(ui_root).fallback(placeholder),
        SET_COOKIE,
        cookie,
    );

    Router::new()
        .route("/", get(|| async { Redirect::temporary("/chat.html") }))
        .route("/login", post(handlers::handle_login::<BridgeState>))
        .route("/channel/create", post(handle_create))
        .route("/channel/join", post(handle_join))
        .route("/message", post(handle_message))
        .route("/sync", post(handle_sync).get(handle_sync))
        .route("/status", get(handle_status))
        .fallback_service(static_files)
        .with_state(state)
        .layer(cors())
}

async fn serve(
    listener: TcpListener,
    app: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}

pub async fn serve_registry(
    listener: TcpListener,
    state: RegistryState,
    shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "registry listening");
    serve(listener, registry_router(state), shutdown).await
}

pub async fn serve_bridge(
    listener: TcpListener,
    state: BridgeState,
    ui_root: &Path,
    shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    tracing::info!(
        addr = %listener.local_addr()?,
        ui_root = %ui_root.display(),
        "bridge listening"
    );
    serve(listener, bridge_router(state, ui_root), shutdown).await
}
