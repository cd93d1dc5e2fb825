use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LinkError;

/// A set of tokens returned from the provider after code exchange or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub scope: Vec<String>,
}

impl TokenSet {
    /// Absolute access-token expiry, measured from `acquired_at`.
    pub fn expiry_from(&self, acquired_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_in
            .map(|secs| acquired_at + chrono::Duration::seconds(secs as i64))
    }
}

/// The broadcaster an access token belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcasterProfile {
    pub id: String,
    pub login: String,
    pub display_name: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// OAuth2 identity provider the link flow and the reconciler talk to.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Authorization URL carrying `state`.
    fn authorize_url(&self, state: &str) -> String;

    /// Authorization-code grant.
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, LinkError>;

    /// Refresh-token grant.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, LinkError>;

    /// Profile of the user `access_token` was issued to.
    async fn fetch_profile(&self, access_token: &str) -> Result<BroadcasterProfile, LinkError>;
}
