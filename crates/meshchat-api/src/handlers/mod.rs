//! HTTP handlers shared by the registry and the peer UI bridge.
//!
//! Both surfaces take form-encoded bodies, answer with `{"ok": ...}` JSON, and
//! gate every route except `/login` on a static cookie token.

pub mod bridge;
pub mod registry;

use axum::body::Bytes;
use axum::extract::{FromRef, FromRequest, FromRequestParts, Request, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use meshchat_services::RegistryError;

pub use bridge::BridgeState;
pub use registry::RegistryState;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
}

#[derive(Serialize, Deserialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        let body = ErrorBody {
            ok: false,
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::BadRequest(msg) => ApiError::BadRequest(msg),
            RegistryError::NotFound(msg) => ApiError::NotFound(msg),
        }
    }
}

// ── Cookie token ──────────────────────────────────────────────────────────────

/// The shared capability token, e.g. `auth=true`. Anyone holding it is
/// authorized for every peer identity.
#[derive(Debug, Clone)]
pub struct AuthToken(pub String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Whether any `Cookie` header carries the token as one of its pairs.
    pub fn admits(&self, parts: &Parts) -> bool {
        parts
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .any(|pair| pair.trim() == self.0)
    }

    fn set_cookie(&self) -> String {
        format!("{}; Path=/", self.0)
    }
}

/// Extractor that rejects the request unless it carries the cookie token.
/// List it before any body extractor so auth is decided first.
pub struct Authorized;

impl<S> FromRequestParts<S> for Authorized
where
    AuthToken: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = AuthToken::from_ref(state);
        if token.admits(parts) {
            Ok(Authorized)
        } else {
            tracing::debug!(path = %parts.uri.path(), "request without auth cookie");
            Err(ApiError::Unauthorized)
        }
    }
}

// ── Form bodies ───────────────────────────────────────────────────────────────

/// Urlencoded form fields with rejections rendered as a `BadRequest` body.
/// Reads the query string on GET and HEAD. Any other method has its body
/// parsed whatever the `Content-Type`; an empty body yields no fields.
pub struct ApiForm<T>(pub T);

impl<S, T> FromRequest<S> for ApiForm<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if req.method() == Method::GET || req.method() == Method::HEAD {
            let query = req.uri().query().unwrap_or("");
            let value = serde_urlencoded::from_str(query)
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            return Ok(ApiForm(value));
        }
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        let value = serde_urlencoded::from_bytes(&body)
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        Ok(ApiForm(value))
    }
}

/// Trimmed form field, empty when absent.
pub(crate) fn field(value: &Option<String>) -> &str {
    value.as_deref().map(str::trim).unwrap_or("")
}

// ── /login ────────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// Always succeeds and hands the token back as a cookie.
pub async fn handle_login<S>(State(state): State<S>) -> Response
where
    AuthToken: FromRef<S>,
    S: Clone + Send + Sync + 'static,
{
    let token = AuthToken::from_ref(&state);
    (
        [(SET_COOKIE, token.set_cookie())],
        Json(OkResponse { ok: true }),
    )
        .into_response()
}
