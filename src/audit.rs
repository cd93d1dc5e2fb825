//! Bot audit log: one entry per control action, written through the store.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

use crate::store::{AuditEntry, LinkStore};

/// Who issued an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditIssuer {
    BotInit,
    JoinChannel,
    HandleLatest,
    HandleStatus,
    Disconnect,
    ConnectionLost,
    ReconcileFailed,
}

impl AuditIssuer {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditIssuer::BotInit => "bot_init",
            AuditIssuer::JoinChannel => "join_channel",
            AuditIssuer::HandleLatest => "handle_latest",
            AuditIssuer::HandleStatus => "handle_status",
            AuditIssuer::Disconnect => "disconnect",
            AuditIssuer::ConnectionLost => "connection_lost",
            AuditIssuer::ReconcileFailed => "reconcile_failed",
        }
    }
}

#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn LinkStore>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn LinkStore>) -> Self {
        Self { store }
    }

    /// Write one entry. A failed write is logged and otherwise ignored.
    pub async fn record(&self, issuer: AuditIssuer, message: Value) {
        let entry = AuditEntry {
            issuer: issuer.as_str().to_string(),
            message,
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.write_audit_entry(&entry).await {
            tracing::warn!(issuer = entry.issuer, error = %e, "failed to write bot audit entry");
        }
    }
}
