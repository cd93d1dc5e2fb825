//! HTTP surface of the Twitch link service.
//!
//! - /status                        Health check
//! - /integration/twitch/login      Start linking (redirect to Twitch)
//! - <redirect URL path>            OAuth callback
//! - /integration/twitch/disconnect Stop the bot and unlink
//! - /integration/twitch/bot        Linked channel and bot state

pub mod routes;

use crate::SharedState;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: SharedState) -> anyhow::Result<Router> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let callback_path = state.config.callback_path()?;

    Ok(Router::new()
        .merge(routes::integration_router(state, &callback_path))
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}
