use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::state::StateStore;
use crate::audit::{AuditIssuer, AuditLog};
use crate::bot::{BotManager, BotState, AVAILABLE_COMMANDS};
use crate::error::LinkError;
use crate::providers::IdentityProvider;
use crate::store::{LinkStore, LinkedIdentity, TokenRecord};

#[derive(Debug, Clone, Serialize)]
pub struct LinkSuccess {
    pub message: String,
    pub available_commands: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisconnectSuccess {
    pub message: String,
    pub note: String,
}

/// The caller's linked channel and its bot, if one is registered.
#[derive(Debug, Clone, Serialize)]
pub struct BotStatus {
    pub identity: LinkedIdentity,
    pub bot: Option<BotState>,
}

/// Links a platform user to a Twitch broadcaster and starts or stops its bot.
pub struct LinkFlow {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn LinkStore>,
    bots: BotManager,
    states: StateStore,
    audit: AuditLog,
}

fn require_user(user: Option<Uuid>) -> Result<Uuid, LinkError> {
    user.ok_or(LinkError::Unauthenticated)
}

impl LinkFlow {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn LinkStore>,
        bots: BotManager,
        state_ttl: Duration,
    ) -> Self {
        Self {
            provider,
            audit: AuditLog::new(store.clone()),
            store,
            bots,
            states: StateStore::new(state_ttl),
        }
    }

    /// Authorization URL for a new login attempt by `user`.
    pub fn initiate_login(&self, user: Option<Uuid>) -> Result<String, LinkError> {
        let user_id = require_user(user)?;
        let state = self.states.issue(user_id);
        Ok(self.provider.authorize_url(&state))
    }

    /// Finish a login attempt: exchange the code, persist the link, start the bot.
    pub async fn handle_callback(
        &self,
        user: Option<Uuid>,
        state: &str,
        code: &str,
    ) -> Result<LinkSuccess, LinkError> {
        let user_id = require_user(user)?;
        self.states.take(state, user_id)?;
        if code.is_empty() {
            return Err(LinkError::TokenExchange("missing authorization code".into()));
        }

        let tokens = self.provider.exchange_code(code).await?;
        let profile = self.provider.fetch_profile(&tokens.access_token).await?;
        let acquired_at = Utc::now();

        match self.store.owner_of_channel(&profile.login).await? {
            Some(owner) if owner != user_id => {
                tracing::warn!(%user_id, channel = %profile.login, "channel already linked to another user");
                return Err(LinkError::InvalidRequest(
                    "Twitch account already linked to another user.".into(),
                ));
            }
            _ => {}
        }

        if let Some(previous) = self.store.linked_identity(user_id).await? {
            if previous.broadcaster_login != profile.login {
                self.release_channel(&previous.broadcaster_login).await?;
            }
        }

        self.store
            .write_linked_identity(&LinkedIdentity {
                user_id,
                broadcaster_id: profile.id.clone(),
                broadcaster_login: profile.login.clone(),
                linked_at: acquired_at,
            })
            .await?;

        let record = TokenRecord {
            broadcaster_id: profile.id,
            broadcaster_login: profile.login.clone(),
            refresh_token: tokens.refresh_token.clone(),
            access_token: tokens.access_token.clone(),
            access_token_expiry: tokens.expiry_from(acquired_at),
            refresh_acquired_at: acquired_at,
        };
        self.store.write_token_record(&record).await?;
        self.store
            .delete_token_records_before(&profile.login, acquired_at)
            .await?;

        match self.bots.spawn(&profile.login, &tokens.access_token) {
            Ok(_) => {}
            Err(LinkError::AlreadyRunning(_)) => {
                tracing::info!(channel = %profile.login, "bot already running, keeping it");
            }
            Err(e) => return Err(e),
        }

        tracing::info!(%user_id, channel = %profile.login, "Twitch account linked");
        self.audit
            .record(
                AuditIssuer::BotInit,
                json!({ "user": profile.login, "action": "bot_init" }),
            )
            .await;

        Ok(LinkSuccess {
            message: "Successfully connected your Twitch account.".into(),
            available_commands: AVAILABLE_COMMANDS.into(),
        })
    }

    /// Stop the caller's bot and forget the link.
    pub async fn disconnect(&self, user: Option<Uuid>) -> Result<DisconnectSuccess, LinkError> {
        let user_id = require_user(user)?;
        let identity = self
            .store
            .linked_identity(user_id)
            .await?
            .ok_or_else(|| LinkError::InvalidRequest("No Twitch account linked.".into()))?;
        let channel = identity.broadcaster_login;

        match self.bots.teardown(&channel).await {
            Ok(()) => {}
            Err(LinkError::NotFound(_)) => {
                tracing::error!(%user_id, channel = %channel, "linked channel has no registered bot");
                return Err(LinkError::Inconsistency(format!(
                    "no bot registered for linked channel {channel}"
                )));
            }
            Err(e) => return Err(e),
        }

        self.store.clear_linked_identity(user_id).await?;
        self.store.delete_all_token_records(&channel).await?;

        tracing::info!(%user_id, channel = %channel, "Twitch account disconnected");
        self.audit
            .record(
                AuditIssuer::Disconnect,
                json!({ "user": channel, "action": "bot_disconnect" }),
            )
            .await;

        Ok(DisconnectSuccess {
            message: "Successfully disconnected Twitch bot".into(),
            note: "Also removed Twitch details from database".into(),
        })
    }

    pub async fn bot_status(&self, user: Option<Uuid>) -> Result<BotStatus, LinkError> {
        let user_id = require_user(user)?;
        let identity = self
            .store
            .linked_identity(user_id)
            .await?
            .ok_or_else(|| LinkError::InvalidRequest("No Twitch account linked.".into()))?;

        let bot = self.bots.state(&identity.broadcaster_login);
        Ok(BotStatus { identity, bot })
    }

    /// Relinking to a different broadcaster: stop the old channel's bot and drop its tokens.
    async fn release_channel(&self, channel: &str) -> Result<(), LinkError> {
        match self.bots.teardown(channel).await {
            Ok(()) | Err(LinkError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.store.delete_all_token_records(channel).await
    }
}
