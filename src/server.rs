//! HTTP surface.
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | `POST` | `/api/chat` | Generate a PDF from `{ "message": … }` |
//! | `GET`  | `/api/auth/callback` | Finish an OAuth login, set the session cookie |
//! | `GET`  | `/api/generations` | The caller's generation history |
//! | `GET`  | `/healthz` | Liveness |
//!
//! Checks on `/api/chat` run in a fixed order: session (401), quota (429),
//! body (400). The model is never called for a request that fails any of
//! them.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::auth::{IdentityProvider, Session};
use crate::error::GenerateError;
use crate::generate::Generator;
use crate::rate_limit::{RateLimitDecision, RateLimiter};
use crate::store::{GenerationRecord, GenerationStore};

/// Cookie carrying the session token.
pub const SESSION_COOKIE: &str = "sb-access-token";
/// Cookie carrying the PKCE verifier set when the login was started.
pub const VERIFIER_COOKIE: &str = "sb-code-verifier";

const DEFAULT_REDIRECT: &str = "/dashboard";
const LOGIN_FAILED_REDIRECT: &str = "/login?error=auth";
const GENERIC_FAILURE: &str = "Failed to generate PDF";

/// Shared, cheaply cloneable handles for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<Generator>,
    pub identity: Arc<dyn IdentityProvider>,
    /// None disables quotas.
    pub rate_limiter: Option<Arc<dyn RateLimiter>>,
    pub records: Arc<dyn GenerationStore>,
    pub history_page_size: u64,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/chat", post(chat))
        .route("/api/auth/callback", get(auth_callback))
        .route("/api/generations", get(list_generations))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

// ── Session ──────────────────────────────────────────────────────────────

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
        .filter(|v| !v.is_empty())
}

/// The session token from `Authorization: Bearer …` or the session cookie.
fn session_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    bearer.or_else(|| cookie_value(headers, SESSION_COOKIE))
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response()
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Session, Response> {
    let Some(token) = session_token(headers) else {
        return Err(unauthorized());
    };
    match state.identity.current_session(token).await {
        Ok(Some(session)) => Ok(session),
        Ok(None) => Err(unauthorized()),
        Err(e) => {
            warn!("Session lookup failed: {e}");
            Err(unauthorized())
        }
    }
}

// ── Quota ────────────────────────────────────────────────────────────────

fn too_many_requests(decision: &RateLimitDecision) -> Response {
    let reset = DateTime::from_timestamp(decision.reset as i64, 0)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default();
    let body = json!({
        "error": "Too many requests",
        "limit": decision.limit,
        "remaining": decision.remaining,
        "reset": reset,
    });
    let headers = [
        (HeaderName::from_static("x-ratelimit-limit"), decision.limit),
        (HeaderName::from_static("x-ratelimit-remaining"), decision.remaining),
        (HeaderName::from_static("x-ratelimit-reset"), decision.reset),
    ]
    .map(|(name, value)| (name, HeaderValue::from(value)));
    (StatusCode::TOO_MANY_REQUESTS, headers, Json(body)).into_response()
}

/// `Err` carries the 429 response. An unreachable quota store admits the
/// request.
async fn enforce_quota(state: &AppState, session: &Session) -> Result<(), Response> {
    let Some(limiter) = &state.rate_limiter else {
        return Ok(());
    };
    match limiter.check(&session.user_id).await {
        Ok(decision) if decision.success => Ok(()),
        Ok(decision) => Err(too_many_requests(&decision)),
        Err(e) => {
            warn!("Rate limiter unavailable, admitting request: {e}");
            Ok(())
        }
    }
}

// ── POST /api/chat ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatSuccess {
    pdf_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatFailure {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    latex_log: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generated_tex: Option<String>,
}

impl ChatFailure {
    fn from_error(err: GenerateError) -> Self {
        match err {
            GenerateError::Compilation {
                error,
                generated_tex,
            } => Self {
                latex_log: Some(error.log_text().to_string()),
                error: error.message,
                details: error.detail,
                generated_tex: Some(generated_tex),
            },
            e @ GenerateError::ModelFailed { .. } => Self {
                error: GENERIC_FAILURE.to_string(),
                details: Some(e.to_string()),
                latex_log: None,
                generated_tex: None,
            },
            GenerateError::Storage(_) | GenerateError::Database(_) => Self {
                error: GENERIC_FAILURE.to_string(),
                details: None,
                latex_log: None,
                generated_tex: None,
            },
        }
    }
}

fn bad_request() -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": "Message is required" }))).into_response()
}

async fn chat(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let session = match authenticate(&state, &headers).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    if let Err(resp) = enforce_quota(&state, &session).await {
        return resp;
    }

    let message = match serde_json::from_slice::<ChatRequest>(&body) {
        Ok(ChatRequest {
            message: Some(message),
        }) if !message.trim().is_empty() => message,
        _ => return bad_request(),
    };

    match state.generator.generate(&session, &message).await {
        Ok(pdf) => Json(ChatSuccess { pdf_url: pdf.pdf_url }).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(ChatFailure::from_error(e))).into_response(),
    }
}

// ── GET /api/auth/callback ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    redirect: Option<String>,
}

/// Only same-site absolute paths are followed.
fn safe_redirect(target: Option<&str>) -> &str {
    match target {
        Some(t) if t.starts_with('/') && !t.starts_with("//") && !t.contains('\\') => t,
        _ => DEFAULT_REDIRECT,
    }
}

fn session_cookie(token: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; Secure; SameSite=Lax"
    ))
    .ok()
}

async fn auth_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Response {
    let target = safe_redirect(params.redirect.as_deref());
    // Without a code there is nothing to exchange; continue to the target.
    let Some(code) = params.code.as_deref().filter(|c| !c.is_empty()) else {
        return Redirect::temporary(target).into_response();
    };
    let verifier = cookie_value(&headers, VERIFIER_COOKIE);

    match state.identity.exchange_code(code, verifier).await {
        Ok(session) => match session_cookie(&session.access_token) {
            Some(cookie) => ([(SET_COOKIE, cookie)], Redirect::temporary(target)).into_response(),
            None => {
                warn!("Identity provider returned an unusable session token");
                Redirect::temporary(LOGIN_FAILED_REDIRECT).into_response()
            }
        },
        Err(e) => {
            warn!("OAuth code exchange failed: {e}");
            Redirect::temporary(LOGIN_FAILED_REDIRECT).into_response()
        }
    }
}

// ── GET /api/generations ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct HistoryParams {
    page: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryPage {
    page: u64,
    page_size: u64,
    generations: Vec<GenerationRecord>,
}

async fn list_generations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HistoryParams>,
) -> Response {
    let session = match authenticate(&state, &headers).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    let page = params.page.unwrap_or(1).max(1);

    match state
        .records
        .list_for_user(&session.user_id, page, state.history_page_size)
        .await
    {
        Ok(generations) => Json(HistoryPage {
            page,
            page_size: state.history_page_size,
            generations,
        })
        .into_response(),
        Err(e) => {
            error!("Could not list generations for user {}: {e}", session.user_id);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to load generations" })),
            )
                .into_response()
        }
    }
}
