//! PostgreSQL-backed store for Twitch token records, linked identities and bot audit logs.
//!
//! Tables:
//! - `twitch_token_records`: encrypted token pairs, append-and-supersede per login
//! - `twitch_bot_logs`: audit log for bot control actions
//! - `user_accounts` / `crosshairs`: owned by the account backend; only the
//!   Twitch columns are written here

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use uuid::Uuid;

use super::{AuditEntry, LinkStore, LinkedIdentity, SavedItem, TokenRecord};
use crate::crypto::CryptoEngine;
use crate::error::LinkError;

/// Link store backed by PostgreSQL.
pub struct PgStore {
    pool: PgPool,
    crypto: Arc<CryptoEngine>,
}

impl PgStore {
    pub async fn new(db_url: &str, crypto: Arc<CryptoEngine>) -> Result<Self, LinkError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(db_url)
            .await
            .map_err(|e| LinkError::Persistence(format!("Failed to connect to PostgreSQL: {e}")))?;

        Ok(Self { pool, crypto })
    }

    /// Run schema migrations.
    pub async fn migrate(&self) -> Result<(), LinkError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS twitch_token_records (
                id                      UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                created_at              TIMESTAMPTZ DEFAULT NOW(),
                twitch_id               TEXT NOT NULL DEFAULT '',
                twitch_login            TEXT NOT NULL,
                refresh_token           TEXT NOT NULL,
                access_token            TEXT NOT NULL,
                access_token_expiry     TIMESTAMPTZ,
                refresh_token_acquired  TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS twitch_bot_logs (
                id          UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                created_at  TIMESTAMPTZ DEFAULT NOW(),
                message     JSONB NOT NULL DEFAULT '{}',
                issuer      TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // The account backend owns these tables. CREATE TABLE IF NOT EXISTS leaves
        // an existing table untouched; it only bootstraps a fresh database.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_accounts (
                id          UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                created_at  TIMESTAMPTZ DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS crosshairs (
                id              UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                created_at      TIMESTAMPTZ DEFAULT NOW(),
                registrant_id   UUID NOT NULL,
                code            TEXT NOT NULL,
                note            TEXT DEFAULT ''
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for column in [
            "ALTER TABLE user_accounts ADD COLUMN IF NOT EXISTS twitch_id TEXT NOT NULL DEFAULT ''",
            "ALTER TABLE user_accounts ADD COLUMN IF NOT EXISTS twitch_login TEXT NOT NULL DEFAULT ''",
            "ALTER TABLE user_accounts ADD COLUMN IF NOT EXISTS twitch_linked_at TIMESTAMPTZ",
        ] {
            sqlx::query(column).execute(&self.pool).await?;
        }

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_twitch_token_records_login ON twitch_token_records(twitch_login, refresh_token_acquired DESC)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_twitch_bot_logs_issuer ON twitch_bot_logs(issuer, created_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_crosshairs_registrant ON crosshairs(registrant_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn identity_from_row(row: &PgRow) -> LinkedIdentity {
    let linked_at: Option<DateTime<Utc>> = row.try_get(3).ok().flatten();
    LinkedIdentity {
        user_id: row.get(0),
        broadcaster_id: row.get(1),
        broadcaster_login: row.get(2),
        linked_at: linked_at.unwrap_or_default(),
    }
}

#[async_trait]
impl LinkStore for PgStore {
    async fn latest_token_record(&self, login: &str) -> Result<Option<TokenRecord>, LinkError> {
        let row = sqlx::query(
            r#"
            SELECT twitch_id, twitch_login, refresh_token, access_token,
                   access_token_expiry, refresh_token_acquired
            FROM twitch_token_records
            WHERE twitch_login = $1
            ORDER BY refresh_token_acquired DESC
            LIMIT 1
            "#,
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let enc_refresh: String = row.get(2);
        let enc_access: String = row.get(3);

        Ok(Some(TokenRecord {
            broadcaster_id: row.get(0),
            broadcaster_login: row.get(1),
            refresh_token: self.crypto.decrypt(&enc_refresh)?,
            access_token: self.crypto.decrypt(&enc_access)?,
            access_token_expiry: row.try_get(4).ok().flatten(),
            refresh_acquired_at: row.get(5),
        }))
    }

    async fn write_token_record(&self, record: &TokenRecord) -> Result<(), LinkError> {
        let enc_refresh = self.crypto.encrypt(&record.refresh_token)?;
        let enc_access = self.crypto.encrypt(&record.access_token)?;

        sqlx::query(
            r#"
            INSERT INTO twitch_token_records
                (twitch_id, twitch_login, refresh_token, access_token,
                 access_token_expiry, refresh_token_acquired)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&record.broadcaster_id)
        .bind(&record.broadcaster_login)
        .bind(&enc_refresh)
        .bind(&enc_access)
        .bind(record.access_token_expiry)
        .bind(record.refresh_acquired_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_all_token_records(&self, login: &str) -> Result<(), LinkError> {
        sqlx::query("DELETE FROM twitch_token_records WHERE twitch_login = $1")
            .bind(login)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_token_records_before(
        &self,
        login: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<(), LinkError> {
        sqlx::query(
            "DELETE FROM twitch_token_records WHERE twitch_login = $1 AND refresh_token_acquired < $2",
        )
        .bind(login)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn write_linked_identity(&self, identity: &LinkedIdentity) -> Result<(), LinkError> {
        let affected = sqlx::query(
            r#"
            UPDATE user_accounts
            SET twitch_id = $2, twitch_login = $3, twitch_linked_at = $4
            WHERE id = $1
            "#,
        )
        .bind(identity.user_id)
        .bind(&identity.broadcaster_id)
        .bind(&identity.broadcaster_login)
        .bind(identity.linked_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(LinkError::Persistence(format!(
                "user {} does not exist",
                identity.user_id
            )));
        }

        Ok(())
    }

    async fn clear_linked_identity(&self, user_id: Uuid) -> Result<(), LinkError> {
        sqlx::query(
            r#"
            UPDATE user_accounts
            SET twitch_id = '', twitch_login = '', twitch_linked_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn linked_identity(&self, user_id: Uuid) -> Result<Option<LinkedIdentity>, LinkError> {
        let row = sqlx::query(
            r#"
            SELECT id, twitch_id, twitch_login, twitch_linked_at
            FROM user_accounts
            WHERE id = $1 AND twitch_login <> ''
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(identity_from_row))
    }

    async fn all_linked_identities(&self) -> Result<Vec<LinkedIdentity>, LinkError> {
        let rows = sqlx::query(
            r#"
            SELECT id, twitch_id, twitch_login, twitch_linked_at
            FROM user_accounts
            WHERE twitch_login <> ''
            ORDER BY twitch_linked_at NULLS FIRST
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(identity_from_row).collect())
    }

    async fn owner_of_channel(&self, login: &str) -> Result<Option<Uuid>, LinkError> {
        let row = sqlx::query("SELECT id FROM user_accounts WHERE twitch_login = $1 LIMIT 1")
            .bind(login)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.try_get(0)).transpose().map_err(LinkError::from)
    }

    async fn latest_saved_item(&self, user_id: Uuid) -> Result<Option<SavedItem>, LinkError> {
        let row = sqlx::query(
            r#"
            SELECT code, created_at
            FROM crosshairs
            WHERE registrant_id = $1
              AND code IS NOT NULL
              AND created_at IS NOT NULL
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(r) = row else {
            return Ok(None);
        };
        Ok(Some(SavedItem {
            code: r.try_get(0)?,
            created_at: r.try_get(1)?,
        }))
    }

    async fn write_audit_entry(&self, entry: &AuditEntry) -> Result<(), LinkError> {
        sqlx::query(
            r#"
            INSERT INTO twitch_bot_logs (issuer, message, created_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&entry.issuer)
        .bind(&entry.message)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
