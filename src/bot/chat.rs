use async_trait::async_trait;

use crate::error::LinkError;

/// Login the bot authenticates with on the chat server.
#[derive(Debug, Clone)]
pub struct ChatCredentials {
    pub username: String,
    pub access_token: String,
}

/// An inbound chat line addressed to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub channel: String,
    pub sender: String,
    pub text: String,
}

/// Opens chat connections. One connection serves exactly one channel.
#[async_trait]
pub trait ChatConnector: Send + Sync {
    /// Connect, authenticate and join `channel`. Returns once the join is confirmed.
    async fn connect(
        &self,
        credentials: &ChatCredentials,
        channel: &str,
    ) -> Result<Box<dyn ChatConnection>, LinkError>;
}

/// A joined chat session.
#[async_trait]
pub trait ChatConnection: Send {
    /// Next message for the joined channel.
    ///
    /// `Ok(None)` means the server closed the session; `Err` means the
    /// connection broke. Both are terminal. Must be cancel-safe.
    async fn next_message(&mut self) -> Result<Option<ChatMessage>, LinkError>;

    async fn say(&mut self, channel: &str, text: &str) -> Result<(), LinkError>;

    /// Leave the channel and close the transport.
    async fn close(&mut self);
}
