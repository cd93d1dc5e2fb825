//! Twitch chat over IRC: a minimal message parser and a line-based client.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::chat::{ChatConnection, ChatConnector, ChatCredentials, ChatMessage};
use crate::error::LinkError;

const LOGIN_FAILURES: &[&str] = &[
    "Login authentication failed",
    "Improperly formatted auth",
    "Invalid NICK",
];

/// One parsed IRC line, with IRCv3 tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    pub tags: HashMap<String, String>,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcMessage {
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);

        let mut tags = HashMap::new();
        if let Some(tagged) = rest.strip_prefix('@') {
            let (raw_tags, remainder) = tagged.split_once(' ')?;
            for tag in raw_tags.split(';') {
                let (key, value) = tag.split_once('=').unwrap_or((tag, ""));
                tags.insert(key.to_string(), unescape_tag(value));
            }
            rest = remainder.trim_start();
        }

        let mut prefix = None;
        if let Some(prefixed) = rest.strip_prefix(':') {
            let (p, remainder) = prefixed.split_once(' ')?;
            prefix = Some(p.to_string());
            rest = remainder.trim_start();
        }

        let (command, mut rest) = match rest.split_once(' ') {
            Some((c, r)) => (c, r),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((param, remainder)) => {
                    params.push(param.to_string());
                    rest = remainder;
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Some(Self {
            tags,
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Nickname part of the prefix (`nick!user@host`).
    pub fn nick(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .map(|p| p.split_once('!').map_or(p, |(nick, _)| nick))
    }

    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }
}

fn unescape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// Connects to the Twitch IRC edge (`irc.chat.twitch.tv:6667`).
pub struct IrcConnector {
    addr: String,
    connect_timeout: Duration,
    join_timeout: Duration,
}

impl IrcConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: Duration::from_secs(10),
            join_timeout: Duration::from_secs(10),
        }
    }
}

#[async_trait]
impl ChatConnector for IrcConnector {
    async fn connect(
        &self,
        credentials: &ChatCredentials,
        channel: &str,
    ) -> Result<Box<dyn ChatConnection>, LinkError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| LinkError::Upstream(format!("timed out connecting to {}", self.addr)))?
            .map_err(|e| LinkError::Upstream(format!("connect to {} failed: {e}", self.addr)))?;

        let (reader, writer) = stream.into_split();
        let mut conn = IrcConnection {
            lines: BufReader::new(reader).lines(),
            writer,
            channel: channel.to_lowercase(),
        };

        let token = credentials
            .access_token
            .strip_prefix("oauth:")
            .unwrap_or(&credentials.access_token);
        let nick = credentials.username.to_lowercase();

        conn.send_raw(&format!("PASS oauth:{token}")).await?;
        conn.send_raw(&format!("NICK {nick}")).await?;
        conn.send_raw("CAP REQ :twitch.tv/tags").await?;
        let join = format!("JOIN #{}", conn.channel);
        conn.send_raw(&join).await?;

        let joined = tokio::time::timeout(self.join_timeout, conn.await_join(&nick)).await;
        match joined {
            Ok(result) => result?,
            Err(_) => {
                return Err(LinkError::Upstream(format!(
                    "timed out joining #{}",
                    conn.channel
                )))
            }
        }

        tracing::debug!(channel = %conn.channel, "joined chat channel");
        Ok(Box::new(conn))
    }
}

pub struct IrcConnection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    channel: String,
}

impl IrcConnection {
    async fn send_raw(&mut self, line: &str) -> Result<(), LinkError> {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .map_err(|e| LinkError::Upstream(format!("chat write failed: {e}")))
    }

    async fn read_message(&mut self) -> Result<Option<IrcMessage>, LinkError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| LinkError::Upstream(format!("chat read failed: {e}")))?;

            let Some(line) = line else {
                return Ok(None);
            };

            if let Some(msg) = IrcMessage::parse(&line) {
                return Ok(Some(msg));
            }
        }
    }

    async fn pong(&mut self, msg: &IrcMessage) -> Result<(), LinkError> {
        let target = msg.trailing().unwrap_or("tmi.twitch.tv").to_string();
        self.send_raw(&format!("PONG :{target}")).await
    }

    async fn await_join(&mut self, nick: &str) -> Result<(), LinkError> {
        let joined_channel = format!("#{}", self.channel);
        loop {
            let Some(msg) = self.read_message().await? else {
                return Err(LinkError::Upstream("chat server closed before join".into()));
            };

            match msg.command.as_str() {
                "PING" => self.pong(&msg).await?,
                "NOTICE" => {
                    let text = msg.trailing().unwrap_or_default();
                    if LOGIN_FAILURES.iter().any(|f| text.contains(f)) {
                        return Err(LinkError::Upstream(format!("chat login rejected: {text}")));
                    }
                }
                "JOIN" => {
                    let is_us = msg.nick().is_some_and(|n| n.eq_ignore_ascii_case(nick));
                    let is_channel = msg.params.first().is_some_and(|c| *c == joined_channel);
                    if is_us && is_channel {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
    }
}

#[async_trait]
impl ChatConnection for IrcConnection {
    async fn next_message(&mut self) -> Result<Option<ChatMessage>, LinkError> {
        let joined_channel = format!("#{}", self.channel);
        loop {
            let Some(msg) = self.read_message().await? else {
                return Ok(None);
            };

            match msg.command.as_str() {
                "PING" => self.pong(&msg).await?,
                "RECONNECT" => {
                    return Err(LinkError::Upstream("chat server requested reconnect".into()))
                }
                "PRIVMSG" if msg.params.first() == Some(&joined_channel) => {
                    let sender = msg
                        .tags
                        .get("display-name")
                        .filter(|n| !n.is_empty())
                        .map(String::as_str)
                        .or_else(|| msg.nick())
                        .unwrap_or("unknown")
                        .to_string();

                    return Ok(Some(ChatMessage {
                        channel: self.channel.clone(),
                        sender,
                        text: msg.trailing().unwrap_or_default().to_string(),
                    }));
                }
                _ => {}
            }
        }
    }

    async fn say(&mut self, channel: &str, text: &str) -> Result<(), LinkError> {
        let text = text.replace(['\r', '\n'], " ");
        self.send_raw(&format!("PRIVMSG #{} :{text}", channel.to_lowercase()))
            .await
    }

    async fn close(&mut self) {
        let part = format!("PART #{}", self.channel);
        if let Err(e) = self.send_raw(&part).await {
            tracing::debug!(channel = %self.channel, error = %e, "PART failed during close");
        }
        let _ = self.writer.shutdown().await;
    }
}
