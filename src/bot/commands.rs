//! The two chat commands a bot answers.

use serde_json::json;
use std::sync::Arc;

use super::chat::ChatMessage;
use crate::audit::{AuditIssuer, AuditLog};
use crate::error::LinkError;
use crate::store::LinkStore;

pub const STATUS_REPLY: &str = "Crosshairs bot is up and running!";
pub const AVAILABLE_COMMANDS: &str = "!latestCH ; !status";
const NO_ITEMS_REPLY: &str = "No crosshairs saved yet.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Latest,
    Status,
}

impl Command {
    /// Exact-match a chat line. `!statusCH` is kept as an alias for older overlays.
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "!latestCH" => Some(Command::Latest),
            "!status" | "!statusCH" => Some(Command::Status),
            _ => None,
        }
    }

    fn action(&self) -> &'static str {
        match self {
            Command::Latest => "!latestCH",
            Command::Status => "!status",
        }
    }

    fn issuer(&self) -> AuditIssuer {
        match self {
            Command::Latest => AuditIssuer::HandleLatest,
            Command::Status => AuditIssuer::HandleStatus,
        }
    }
}

/// Answers commands against store data. Holds no connection state.
#[derive(Clone)]
pub struct CommandDispatcher {
    store: Arc<dyn LinkStore>,
    audit: AuditLog,
}

impl CommandDispatcher {
    pub fn new(store: Arc<dyn LinkStore>, audit: AuditLog) -> Self {
        Self { store, audit }
    }

    /// Reply text for `message`, or `None` if it is not a command.
    ///
    /// Lookup failures become a short reply; they never reach the caller.
    pub async fn dispatch(&self, channel: &str, message: &ChatMessage) -> Option<String> {
        let command = Command::parse(&message.text)?;

        let outcome = match command {
            Command::Latest => self.latest_item(channel).await,
            Command::Status => Ok(STATUS_REPLY.to_string()),
        };

        let (body, result) = match outcome {
            Ok(body) => (body, "ok".to_string()),
            Err(e) => {
                tracing::warn!(channel, user = %message.sender, error = %e, "chat command failed");
                (reply_for_error(&e), e.to_string())
            }
        };

        self.audit
            .record(
                command.issuer(),
                json!({
                    "user": message.sender,
                    "channel": channel,
                    "action": command.action(),
                    "result": result,
                }),
            )
            .await;

        Some(format!("@{} -> {body}", message.sender))
    }

    async fn latest_item(&self, channel: &str) -> Result<String, LinkError> {
        let owner = self
            .store
            .owner_of_channel(channel)
            .await?
            .ok_or_else(|| LinkError::NotFound(channel.to_string()))?;

        Ok(match self.store.latest_saved_item(owner).await? {
            Some(item) => format!("Latest crosshair on database: {}", item.code),
            None => NO_ITEMS_REPLY.to_string(),
        })
    }
}

fn reply_for_error(err: &LinkError) -> String {
    match err {
        LinkError::NotFound(_) => "Could not fetch user.".to_string(),
        _ => "Could not fetch crosshairs, try again later.".to_string(),
    }
}
