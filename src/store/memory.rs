//! In-process store for tests and local runs without PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::{AuditEntry, LinkStore, LinkedIdentity, SavedItem, TokenRecord};
use crate::error::LinkError;

#[derive(Default)]
struct Tables {
    tokens: Vec<TokenRecord>,
    identities: HashMap<Uuid, LinkedIdentity>,
    items: HashMap<Uuid, Vec<SavedItem>>,
    audit: Vec<AuditEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_identity_listing: Mutex<bool>,
    fail_token_writes: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `all_linked_identities` fail until reset.
    pub fn fail_identity_listing(&self, fail: bool) {
        *self
            .fail_identity_listing
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = fail;
    }

    /// Make `write_token_record` fail for `login`.
    pub fn fail_token_writes_for(&self, login: &str) {
        self.fail_token_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(login.to_string());
    }

    pub fn add_saved_item(&self, user_id: Uuid, code: &str, created_at: DateTime<Utc>) {
        self.tables()
            .items
            .entry(user_id)
            .or_default()
            .push(SavedItem {
                code: code.to_string(),
                created_at,
            });
    }

    /// All token records for `login`, in insertion order.
    pub fn token_records(&self, login: &str) -> Vec<TokenRecord> {
        self.tables()
            .tokens
            .iter()
            .filter(|r| r.broadcaster_login == login)
            .cloned()
            .collect()
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.tables().audit.clone()
    }

    pub fn audit_entries_by(&self, issuer: &str) -> Vec<AuditEntry> {
        self.tables()
            .audit
            .iter()
            .filter(|e| e.issuer == issuer)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LinkStore for MemoryStore {
    async fn latest_token_record(&self, login: &str) -> Result<Option<TokenRecord>, LinkError> {
        Ok(self
            .tables()
            .tokens
            .iter()
            .filter(|r| r.broadcaster_login == login)
            .max_by_key(|r| r.refresh_acquired_at)
            .cloned())
    }

    async fn write_token_record(&self, record: &TokenRecord) -> Result<(), LinkError> {
        let failing = self
            .fail_token_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&record.broadcaster_login);
        if failing {
            return Err(LinkError::Persistence("token write rejected".into()));
        }

        self.tables().tokens.push(record.clone());
        Ok(())
    }

    async fn delete_all_token_records(&self, login: &str) -> Result<(), LinkError> {
        self.tables().tokens.retain(|r| r.broadcaster_login != login);
        Ok(())
    }

    async fn delete_token_records_before(
        &self,
        login: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<(), LinkError> {
        self.tables()
            .tokens
            .retain(|r| r.broadcaster_login != login || r.refresh_acquired_at >= cutoff);
        Ok(())
    }

    async fn write_linked_identity(&self, identity: &LinkedIdentity) -> Result<(), LinkError> {
        self.tables()
            .identities
            .insert(identity.user_id, identity.clone());
        Ok(())
    }

    async fn clear_linked_identity(&self, user_id: Uuid) -> Result<(), LinkError> {
        self.tables().identities.remove(&user_id);
        Ok(())
    }

    async fn linked_identity(&self, user_id: Uuid) -> Result<Option<LinkedIdentity>, LinkError> {
        Ok(self.tables().identities.get(&user_id).cloned())
    }

    async fn all_linked_identities(&self) -> Result<Vec<LinkedIdentity>, LinkError> {
        if *self
            .fail_identity_listing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
        {
            return Err(LinkError::Persistence("identity listing unavailable".into()));
        }

        let mut identities: Vec<_> = self.tables().identities.values().cloned().collect();
        identities.sort_by_key(|i| i.linked_at);
        Ok(identities)
    }

    async fn owner_of_channel(&self, login: &str) -> Result<Option<Uuid>, LinkError> {
        Ok(self
            .tables()
            .identities
            .values()
            .find(|i| i.broadcaster_login == login)
            .map(|i| i.user_id))
    }

    async fn latest_saved_item(&self, user_id: Uuid) -> Result<Option<SavedItem>, LinkError> {
        Ok(self
            .tables()
            .items
            .get(&user_id)
            .and_then(|items| items.iter().max_by_key(|i| i.created_at))
            .cloned())
    }

    async fn write_audit_entry(&self, entry: &AuditEntry) -> Result<(), LinkError> {
        self.tables().audit.push(entry.clone());
        Ok(())
    }
}
