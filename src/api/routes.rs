//! API route handlers for the Twitch link service.
//!
//! All handlers receive `SharedState` via Axum state extraction. The caller
//! is identified by the session cookie the account backend issues.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth;
use crate::error::LinkError;
use crate::SharedState;

// =============================================================================
// Router
// =============================================================================

pub fn integration_router(state: SharedState, callback_path: &str) -> Router {
    Router::new()
        // ── Health ───────────────────────────────────────────────────────
        .route("/status", get(status))
        // ── Twitch ───────────────────────────────────────────────────────
        .route("/integration/twitch/login", get(twitch_login))
        .route(callback_path, get(twitch_callback))
        .route("/integration/twitch/disconnect", get(twitch_disconnect))
        .route("/integration/twitch/bot", get(twitch_bot))
        .with_state(state)
}

/// `{"code": 200, "data": ...}`
fn success(data: impl Serialize) -> Json<Value> {
    Json(json!({
        "code": StatusCode::OK.as_u16(),
        "data": data,
    }))
}

fn session(state: &SharedState, headers: &HeaderMap) -> Result<Option<Uuid>, LinkError> {
    auth::session_user(headers, &state.crypto, &state.config.session_cookie)
}

// =============================================================================
// Health
// =============================================================================

async fn status(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "twitch-link",
        "version": env!("CARGO_PKG_VERSION"),
        "bots": state.bots.len(),
    }))
}

// =============================================================================
// Twitch Integration
// =============================================================================

/// GET /integration/twitch/login: Redirect to Twitch with a fresh state token.
async fn twitch_login(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Response, LinkError> {
    let user = session(&state, &headers)?;
    let url = state.flow.initiate_login(user)?;
    Ok(Redirect::temporary(&url).into_response())
}

#[derive(Deserialize)]
struct CallbackQuery {
    #[serde(default)]
    state: String,
    #[serde(default)]
    code: String,
}

/// GET <callback path>: Twitch redirects here after the user authorizes.
async fn twitch_callback(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(q): Query<CallbackQuery>,
) -> Result<Json<Value>, LinkError> {
    let user = session(&state, &headers)?;
    let linked = state.flow.handle_callback(user, &q.state, &q.code).await?;
    Ok(success(linked))
}

/// GET /integration/twitch/disconnect: Stop the caller's bot and unlink.
async fn twitch_disconnect(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<Value>, LinkError> {
    let user = session(&state, &headers)?;
    let done = state.flow.disconnect(user).await?;
    Ok(success(done))
}

/// GET /integration/twitch/bot: The caller's linked channel and bot state.
async fn twitch_bot(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<Value>, LinkError> {
    let user = session(&state, &headers)?;
    let status = state.flow.bot_status(user).await?;

    Ok(success(json!({
        "twitch_id": status.identity.broadcaster_id,
        "twitch_login": status.identity.broadcaster_login,
        "linked_at": status.identity.linked_at,
        "bot": status.bot.map_or(json!("none"), |s| json!(s)),
    })))
}
