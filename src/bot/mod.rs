//! Bot lifecycle: one chat connection per linked channel, each on its own task.
//!
//! `BotManager` owns the registry. `spawn` registers a handle and starts the
//! task in one critical section, so the caller never waits on the chat
//! handshake. The task reports how it ended on the event channel; an
//! unrequested exit also removes its own registry entry.

pub mod chat;
pub mod commands;
pub mod irc;
pub mod registry;

pub use chat::{ChatConnection, ChatConnector, ChatCredentials, ChatMessage};
pub use commands::{Command, CommandDispatcher, AVAILABLE_COMMANDS};
pub use irc::{IrcConnector, IrcMessage};
pub use registry::{BotRegistry, BotState};

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::{JoinHandle, JoinSet};

use crate::audit::{AuditIssuer, AuditLog};
use crate::error::LinkError;
use crate::store::LinkStore;
use registry::BotHandle;

/// How long teardown waits for a bot task before aborting it.
const TEARDOWN_GRACE: Duration = Duration::from_secs(5);

/// Why a bot task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotExit {
    /// `teardown` or process shutdown.
    Requested,
    ConnectFailed(String),
    /// The connection broke or the server closed it after joining.
    Dropped(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotEvent {
    Joined { channel: String },
    Exited { channel: String, reason: BotExit },
}

#[derive(Clone)]
pub struct BotManager {
    inner: Arc<Inner>,
}

struct Inner {
    registry: BotRegistry,
    connector: Arc<dyn ChatConnector>,
    dispatcher: CommandDispatcher,
    audit: AuditLog,
    events: broadcast::Sender<BotEvent>,
    bot_username: String,
}

impl BotManager {
    pub fn new(
        connector: Arc<dyn ChatConnector>,
        store: Arc<dyn LinkStore>,
        bot_username: impl Into<String>,
    ) -> Self {
        let audit = AuditLog::new(store.clone());
        let (events, _) = broadcast::channel(64);

        Self {
            inner: Arc::new(Inner {
                registry: BotRegistry::new(),
                connector,
                dispatcher: CommandDispatcher::new(store, audit.clone()),
                audit,
                events,
                bot_username: bot_username.into(),
            }),
        }
    }

    /// Register a bot for `channel` and start connecting it in the background.
    ///
    /// Fails with `AlreadyRunning` if the channel already has a handle.
    /// Returns the generation id of the new handle.
    pub fn spawn(&self, channel: &str, access_token: &str) -> Result<u64, LinkError> {
        let channel = channel.to_lowercase();
        let credentials = ChatCredentials {
            username: self.inner.bot_username.clone(),
            access_token: access_token.to_string(),
        };

        let inner = self.inner.clone();
        let generation = self.inner.registry.try_insert_with(&channel, |generation| {
            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            let task = tokio::spawn(supervise(
                inner,
                channel.clone(),
                generation,
                credentials,
                shutdown_rx,
            ));
            (shutdown_tx, task)
        })?;

        tracing::debug!(channel = %channel, generation, "bot registered");
        Ok(generation)
    }

    /// Stop the bot for `channel` and remove it from the registry.
    pub async fn teardown(&self, channel: &str) -> Result<(), LinkError> {
        let channel = channel.to_lowercase();
        let handle = self
            .inner
            .registry
            .remove(&channel)
            .ok_or_else(|| LinkError::NotFound(channel.clone()))?;

        stop(channel, handle).await;
        Ok(())
    }

    /// Tear down every registered bot. Used on process exit.
    pub async fn shutdown_all(&self) {
        let handles = self.inner.registry.drain();
        if handles.is_empty() {
            return;
        }

        tracing::info!(count = handles.len(), "shutting down bots");
        let mut stopping = JoinSet::new();
        for (channel, handle) in handles {
            stopping.spawn(stop(channel, handle));
        }
        while stopping.join_next().await.is_some() {}
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self, channel: &str) -> Option<BotState> {
        self.inner.registry.state(&channel.to_lowercase())
    }

    pub fn channels(&self) -> Vec<(String, BotState)> {
        self.inner.registry.snapshot()
    }

    pub fn len(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.registry.is_empty()
    }
}

async fn stop(channel: String, handle: BotHandle) {
    let _ = handle.shutdown.send(());

    let mut task = handle.task;
    if tokio::time::timeout(TEARDOWN_GRACE, &mut task).await.is_err() {
        tracing::warn!(channel = %channel, "bot task did not stop in time, aborting");
        task.abort();
    }
}

/// Aborts the bot task when the supervisor itself is aborted.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run the bot on its own task so a panic still ends in `finish`.
async fn supervise(
    inner: Arc<Inner>,
    channel: String,
    generation: u64,
    credentials: ChatCredentials,
    shutdown: oneshot::Receiver<()>,
) {
    let mut bot = AbortOnDrop(tokio::spawn(run_bot(
        inner.clone(),
        channel.clone(),
        generation,
        credentials,
        shutdown,
    )));

    if let Err(e) = (&mut bot.0).await {
        if e.is_panic() {
            tracing::error!(channel = %channel, generation, "bot task panicked");
            inner
                .finish(&channel, generation, BotExit::Dropped("bot task panicked".into()))
                .await;
        }
    }
}

async fn run_bot(
    inner: Arc<Inner>,
    channel: String,
    generation: u64,
    credentials: ChatCredentials,
    mut shutdown: oneshot::Receiver<()>,
) {
    inner
        .registry
        .set_state(&channel, generation, BotState::Connecting);

    let connected = tokio::select! {
        res = inner.connector.connect(&credentials, &channel) => res,
        _ = &mut shutdown => {
            inner.finish(&channel, generation, BotExit::Requested).await;
            return;
        }
    };

    let mut conn = match connected {
        Ok(conn) => conn,
        Err(e) => {
            inner
                .finish(&channel, generation, BotExit::ConnectFailed(e.to_string()))
                .await;
            return;
        }
    };

    // Torn down while the handshake was in flight.
    if !inner.registry.set_state(&channel, generation, BotState::Joined) {
        conn.close().await;
        inner.finish(&channel, generation, BotExit::Requested).await;
        return;
    }

    tracing::info!(channel = %channel, "bot joined channel");
    inner
        .audit
        .record(
            AuditIssuer::JoinChannel,
            json!({ "user": channel, "action": "bot_join_channel" }),
        )
        .await;
    let _ = inner.events.send(BotEvent::Joined {
        channel: channel.clone(),
    });

    let reason = loop {
        tokio::select! {
            _ = &mut shutdown => break BotExit::Requested,
            next = conn.next_message() => match next {
                Ok(Some(message)) => {
                    let Some(reply) = inner.dispatcher.dispatch(&channel, &message).await else {
                        continue;
                    };
                    if let Err(e) = conn.say(&channel, &reply).await {
                        break BotExit::Dropped(e.to_string());
                    }
                }
                Ok(None) => break BotExit::Dropped("connection closed by server".into()),
                Err(e) => break BotExit::Dropped(e.to_string()),
            }
        }
    };

    inner
        .registry
        .set_state(&channel, generation, BotState::Disconnected);
    conn.close().await;
    inner.finish(&channel, generation, reason).await;
}

impl Inner {
    async fn finish(&self, channel: &str, generation: u64, reason: BotExit) {
        match &reason {
            BotExit::Requested => {
                tracing::info!(channel, "bot stopped");
            }
            BotExit::ConnectFailed(msg) | BotExit::Dropped(msg) => {
                let removed = self.registry.remove_if(channel, generation);
                tracing::warn!(channel, removed, error = %msg, "bot connection ended unexpectedly");
                self.audit
                    .record(
                        AuditIssuer::ConnectionLost,
                        json!({
                            "user": channel,
                            "action": "bot_connection_lost",
                            "reason": msg,
                        }),
                    )
                    .await;
            }
        }

        let _ = self.events.send(BotEvent::Exited {
            channel: channel.to_string(),
            reason,
        });
    }
}
