use axum::http::{header, HeaderMap};
use uuid::Uuid;

use crate::crypto::CryptoEngine;
use crate::error::LinkError;

/// Resolve the logged-in user from the session cookie.
///
/// - `Ok(None)`: no cookie, or a cookie whose signature does not verify.
/// - `Err(InvalidRequest)`: a correctly signed session that does not carry a user UUID.
pub fn session_user(
    headers: &HeaderMap,
    crypto: &CryptoEngine,
    cookie_name: &str,
) -> Result<Option<Uuid>, LinkError> {
    let Some(raw) = find_cookie(headers, cookie_name) else {
        return Ok(None);
    };

    let Some(payload) = crypto.open_session(raw) else {
        tracing::debug!("session cookie failed signature check");
        return Ok(None);
    };

    Uuid::parse_str(payload)
        .map(Some)
        .map_err(|_| LinkError::InvalidRequest("Could not parse uuid.".into()))
}

/// Cookie value the account backend issues for `user_id`.
pub fn session_cookie_value(crypto: &CryptoEngine, user_id: Uuid) -> String {
    crypto.sign_session(&user_id.to_string())
}

fn find_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
}
