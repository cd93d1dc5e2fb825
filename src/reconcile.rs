//! Startup reconciliation: refresh every linked identity and bring its bot back.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::audit::{AuditIssuer, AuditLog};
use crate::bot::BotManager;
use crate::error::LinkError;
use crate::providers::IdentityProvider;
use crate::store::{refresh_identity, LinkStore, LinkedIdentity};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub spawned: Vec<String>,
    /// `(channel, error)` for every identity that was skipped.
    pub failed: Vec<(String, String)>,
}

pub struct Reconciler {
    store: Arc<dyn LinkStore>,
    provider: Arc<dyn IdentityProvider>,
    bots: BotManager,
    audit: AuditLog,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn LinkStore>,
        provider: Arc<dyn IdentityProvider>,
        bots: BotManager,
    ) -> Self {
        Self {
            audit: AuditLog::new(store.clone()),
            store,
            provider,
            bots,
        }
    }

    /// Refresh and respawn every linked identity.
    ///
    /// Only a failure to list identities fails the pass; a failing identity is
    /// logged, recorded in the report and skipped.
    pub async fn reconcile_all(&self) -> Result<ReconcileReport, LinkError> {
        let identities = self.store.all_linked_identities().await?;
        tracing::info!(count = identities.len(), "reconciling linked Twitch identities");

        let mut report = ReconcileReport::default();
        for identity in identities {
            let channel = identity.broadcaster_login.clone();
            match self.reconcile_one(&identity).await {
                Ok(()) => report.spawned.push(channel),
                Err(e) => {
                    tracing::error!(channel = %channel, error = %e, "skipping identity during reconciliation");
                    self.audit
                        .record(
                            AuditIssuer::ReconcileFailed,
                            json!({ "user": channel, "action": "reconcile", "error": e.to_string() }),
                        )
                        .await;
                    report.failed.push((channel, e.to_string()));
                }
            }
        }

        tracing::info!(
            spawned = report.spawned.len(),
            failed = report.failed.len(),
            "reconciliation finished"
        );
        Ok(report)
    }

    async fn reconcile_one(&self, identity: &LinkedIdentity) -> Result<(), LinkError> {
        let record =
            refresh_identity(self.store.as_ref(), self.provider.as_ref(), identity).await?;
        self.bots
            .spawn(&identity.broadcaster_login, &record.access_token)?;
        Ok(())
    }
}
