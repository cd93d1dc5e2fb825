//! Token store: token records, linked identities, saved items and the bot audit log.
//!
//! `PgStore` is the production backend (PostgreSQL, shared with the account
//! backend). `MemoryStore` backs tests and local runs.

pub mod db;
pub mod memory;
pub mod refresh;

pub use db::PgStore;
pub use memory::MemoryStore;
pub use refresh::{refresh_daemon, refresh_identity};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::LinkError;

/// A platform user linked to a Twitch broadcaster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkedIdentity {
    pub user_id: Uuid,
    pub broadcaster_id: String,
    pub broadcaster_login: String,
    pub linked_at: DateTime<Utc>,
}

/// One token pair for a broadcaster. Never updated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub broadcaster_id: String,
    pub broadcaster_login: String,
    pub refresh_token: String,
    pub access_token: String,
    pub access_token_expiry: Option<DateTime<Utc>>,
    pub refresh_acquired_at: DateTime<Utc>,
}

/// An item a user saved through the account backend (a crosshair code).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedItem {
    pub code: String,
    pub created_at: DateTime<Utc>,
}

/// Write-only record of a bot control action.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub issuer: String,
    pub message: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Persistence operations the core calls.
///
/// Replacing a login's records is two calls (`write_token_record`, then
/// `delete_token_records_before`); readers resolve any transient duplicate by
/// taking the most recent `refresh_acquired_at`.
#[async_trait]
pub trait LinkStore: Send + Sync {
    async fn latest_token_record(&self, login: &str) -> Result<Option<TokenRecord>, LinkError>;

    async fn write_token_record(&self, record: &TokenRecord) -> Result<(), LinkError>;

    async fn delete_all_token_records(&self, login: &str) -> Result<(), LinkError>;

    /// Delete records for `login` acquired strictly before `cutoff`.
    async fn delete_token_records_before(
        &self,
        login: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<(), LinkError>;

    async fn write_linked_identity(&self, identity: &LinkedIdentity) -> Result<(), LinkError>;

    /// Reset the user's Twitch fields to empty.
    async fn clear_linked_identity(&self, user_id: Uuid) -> Result<(), LinkError>;

    async fn linked_identity(&self, user_id: Uuid) -> Result<Option<LinkedIdentity>, LinkError>;

    async fn all_linked_identities(&self) -> Result<Vec<LinkedIdentity>, LinkError>;

    /// The platform user that linked `login`, if any.
    async fn owner_of_channel(&self, login: &str) -> Result<Option<Uuid>, LinkError>;

    async fn latest_saved_item(&self, user_id: Uuid) -> Result<Option<SavedItem>, LinkError>;

    async fn write_audit_entry(&self, entry: &AuditEntry) -> Result<(), LinkError>;
}
