use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::traits::{BroadcasterProfile, IdentityProvider, TokenSet};
use crate::error::LinkError;

pub const AUTHORIZE_URL: &str = "https://id.twitch.tv/oauth2/authorize";
pub const TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";
pub const USERS_URL: &str = "https://api.twitch.tv/helix/users";

/// Scopes requested for the broadcaster; the chat scopes let the bot speak with the token.
pub const SCOPES: &[&str] = &["user:read:email", "chat:read", "chat:edit"];

/// Twitch OAuth 2.0 provider.
///
/// Quirks:
/// - Token endpoint takes form-encoded credentials, returns `scope` as an array.
/// - Refresh tokens rotate: every refresh returns a new one.
/// - Helix requires both `Authorization: Bearer` and `Client-Id`.
pub struct TwitchProvider {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TwitchTokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: Option<u64>,
    #[serde(default)]
    scope: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TwitchUsersResponse {
    data: Vec<TwitchUser>,
}

#[derive(Debug, Deserialize)]
struct TwitchUser {
    id: String,
    login: String,
    display_name: String,
    created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl TwitchProvider {
    pub fn new(
        client_id: String,
        client_secret: String,
        redirect_uri: String,
        timeout: Duration,
    ) -> Result<Self, LinkError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| LinkError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client_id,
            client_secret,
            redirect_uri,
            http,
        })
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet, String> {
        let resp = self
            .http
            .post(TOKEN_URL)
            .form(form)
            .send()
            .await
            .map_err(|e| format!("token request failed: {e}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("unwanted Twitch response: {status} {body}"));
        }

        let token_resp: TwitchTokenResponse = resp
            .json()
            .await
            .map_err(|e| format!("failed to parse token response: {e}"))?;

        Ok(token_resp.into())
    }
}

impl From<TwitchTokenResponse> for TokenSet {
    fn from(t: TwitchTokenResponse) -> Self {
        TokenSet {
            access_token: t.access_token,
            refresh_token: t.refresh_token,
            expires_in: t.expires_in,
            scope: t.scope,
        }
    }
}

#[async_trait]
impl IdentityProvider for TwitchProvider {
    fn authorize_url(&self, state: &str) -> String {
        format!(
            "{AUTHORIZE_URL}?\
             client_id={client_id}\
             &redirect_uri={redirect_uri}\
             &response_type=code\
             &scope={scope}\
             &state={state}",
            client_id = urlencoding(&self.client_id),
            redirect_uri = urlencoding(&self.redirect_uri),
            scope = urlencoding(&SCOPES.join(" ")),
            state = urlencoding(state),
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, LinkError> {
        self.token_request(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.redirect_uri.as_str()),
        ])
        .await
        .map_err(LinkError::TokenExchange)
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, LinkError> {
        self.token_request(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
        .map_err(LinkError::Upstream)
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<BroadcasterProfile, LinkError> {
        let resp = self
            .http
            .get(USERS_URL)
            .bearer_auth(access_token)
            .header("Client-Id", &self.client_id)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(LinkError::Upstream(format!(
                "Twitch users endpoint returned {}",
                resp.status()
            )));
        }

        let users: TwitchUsersResponse = resp.json().await?;
        parse_profile(users)
    }
}

fn parse_profile(users: TwitchUsersResponse) -> Result<BroadcasterProfile, LinkError> {
    let user = users
        .data
        .into_iter()
        .next()
        .ok_or_else(|| LinkError::Upstream("Twitch returned no user for token".into()))?;

    Ok(BroadcasterProfile {
        id: user.id,
        login: user.login.to_lowercase(),
        display_name: user.display_name,
        created_at: user.created_at,
    })
}

fn urlencoding(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
