//! Shared fakes for the integration tests under tests/.
//!
//! `FakeProvider` stands in for Twitch OAuth, `ScriptedConnector` for Twitch
//! chat. Each test drives a bot's inbound lines through a `SessionHandle`.
#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine as _;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use twitch_link::auth::session_cookie_value;
use twitch_link::bot::{BotEvent, ChatConnection, ChatConnector, ChatCredentials, ChatMessage};
use twitch_link::crypto::CryptoEngine;
use twitch_link::providers::{BroadcasterProfile, IdentityProvider, TokenSet};
use twitch_link::store::MemoryStore;
use twitch_link::{AppState, Config, LinkError, SharedState};

pub const CALLBACK_PATH: &str = "/integration/twitch/callback";
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(3);

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        database_url: String::new(),
        master_key: String::new(),
        session_secret: String::new(),
        session_cookie: "session".into(),
        twitch_client_id: "client123".into(),
        twitch_client_secret: "secret".into(),
        twitch_redirect_url: format!("http://localhost:8080{CALLBACK_PATH}"),
        twitch_bot_username: "crosshairsbot".into(),
        twitch_irc_addr: "127.0.0.1:6667".into(),
        http_timeout: Duration::from_secs(1),
        oauth_state_ttl: Duration::from_secs(600),
        token_refresh_interval: Duration::from_secs(300),
        disable_integrations: false,
    }
}

pub fn test_crypto() -> CryptoEngine {
    let key = base64::engine::general_purpose::STANDARD.encode([0x42u8; 32]);
    let hmac = base64::engine::general_purpose::STANDARD.encode([0x24u8; 32]);
    CryptoEngine::new(&key, &hmac).unwrap()
}

// =============================================================================
// Identity provider
// =============================================================================

/// Authorization codes are broadcaster logins: code `shroud` links `shroud`.
///
/// Special codes: `bad-code` fails the exchange, `no-profile` fails the
/// profile fetch. Refresh tokens listed with `fail_refresh_for` are rejected.
#[derive(Default)]
pub struct FakeProvider {
    failing_refresh: Mutex<HashSet<String>>,
    exchanges: AtomicUsize,
    refreshes: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_refresh_for(&self, refresh_token: &str) {
        self.failing_refresh
            .lock()
            .unwrap()
            .insert(refresh_token.to_string());
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    fn authorize_url(&self, state: &str) -> String {
        format!("https://id.twitch.tv/oauth2/authorize?client_id=client123&state={state}")
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, LinkError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if code == "bad-code" {
            return Err(LinkError::TokenExchange("400 invalid authorization code".into()));
        }
        Ok(TokenSet {
            access_token: format!("access-{code}"),
            refresh_token: format!("refresh-{code}"),
            expires_in: Some(14_400),
            scope: vec!["chat:read".into(), "chat:edit".into()],
        })
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, LinkError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.failing_refresh.lock().unwrap().contains(refresh_token) {
            return Err(LinkError::Upstream("400 Invalid refresh token".into()));
        }
        Ok(TokenSet {
            access_token: format!("{refresh_token}-access"),
            refresh_token: format!("{refresh_token}-next"),
            expires_in: Some(14_400),
            scope: vec![],
        })
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<BroadcasterProfile, LinkError> {
        let login = access_token.strip_prefix("access-").unwrap_or(access_token);
        if login == "no-profile" {
            return Err(LinkError::Upstream("Twitch users endpoint returned 503".into()));
        }
        Ok(BroadcasterProfile {
            id: format!("id-{login}"),
            login: login.to_lowercase(),
            display_name: login.to_string(),
            created_at: None,
        })
    }
}

// =============================================================================
// Chat connector
// =============================================================================

pub enum Inbound {
    Message(ChatMessage),
    /// Break the connection as a network error would.
    Drop,
    /// Close the connection as the server would.
    Eof,
}

/// Test-side end of one scripted chat session.
#[derive(Clone)]
pub struct SessionHandle {
    pub access_token: String,
    inbound: mpsc::UnboundedSender<Inbound>,
    sent: Arc<Mutex<Vec<(String, String)>>>,
    closed: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn say_as(&self, sender: &str, channel: &str, text: &str) {
        let _ = self.inbound.send(Inbound::Message(ChatMessage {
            channel: channel.to_string(),
            sender: sender.to_string(),
            text: text.to_string(),
        }));
    }

    pub fn drop_connection(&self) {
        let _ = self.inbound.send(Inbound::Drop);
    }

    pub fn close_from_server(&self) {
        let _ = self.inbound.send(Inbound::Eof);
    }

    /// `(channel, text)` lines the bot sent.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    /// Wait until the bot has sent at least `n` lines.
    pub async fn wait_for_replies(&self, n: usize) -> Vec<(String, String)> {
        tokio::time::timeout(EVENT_TIMEOUT, async {
            loop {
                let sent = self.sent();
                if sent.len() >= n {
                    return sent;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("bot did not reply in time")
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct ScriptedConnector {
    sessions: Mutex<HashMap<String, SessionHandle>>,
    refuse: Mutex<HashSet<String>>,
    connect_delay: Mutex<Duration>,
    connects: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every connect to `channel`.
    pub fn refuse(&self, channel: &str) {
        self.refuse.lock().unwrap().insert(channel.to_string());
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = delay;
    }

    /// Most recent session opened for `channel`.
    pub fn session(&self, channel: &str) -> Option<SessionHandle> {
        self.sessions.lock().unwrap().get(channel).cloned()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatConnector for ScriptedConnector {
    async fn connect(
        &self,
        credentials: &ChatCredentials,
        channel: &str,
    ) -> Result<Box<dyn ChatConnection>, LinkError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let delay = *self.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.refuse.lock().unwrap().contains(channel) {
            return Err(LinkError::Upstream("chat login rejected: Login authentication failed".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            access_token: credentials.access_token.clone(),
            inbound: tx,
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        };
        self.sessions
            .lock()
            .unwrap()
            .insert(channel.to_string(), handle.clone());

        Ok(Box::new(MockConnection {
            inbound: rx,
            sent: handle.sent,
            closed: handle.closed,
        }))
    }
}

struct MockConnection {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    sent: Arc<Mutex<Vec<(String, String)>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl ChatConnection for MockConnection {
    async fn next_message(&mut self) -> Result<Option<ChatMessage>, LinkError> {
        match self.inbound.recv().await {
            Some(Inbound::Message(msg)) => Ok(Some(msg)),
            Some(Inbound::Drop) => Err(LinkError::Upstream("connection reset by peer".into())),
            Some(Inbound::Eof) | None => Ok(None),
        }
    }

    async fn say(&mut self, channel: &str, text: &str) -> Result<(), LinkError> {
        self.sent
            .lock()
            .unwrap()
            .push((channel.to_string(), text.to_string()));
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub state: SharedState,
    pub store: Arc<MemoryStore>,
    pub provider: Arc<FakeProvider>,
    pub connector: Arc<ScriptedConnector>,
}

pub fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(FakeProvider::new());
    let connector = Arc::new(ScriptedConnector::new());

    let state = AppState::new(
        test_config(),
        Arc::new(test_crypto()),
        store.clone(),
        provider.clone(),
        connector.clone(),
    );

    Harness {
        state,
        store,
        provider,
        connector,
    }
}

impl Harness {
    /// `Cookie` header value for a logged-in `user`.
    pub fn cookie(&self, user: Uuid) -> String {
        let value = session_cookie_value(&self.state.crypto, user);
        format!("session={value}")
    }

    /// Run a full login for `user` and wait until the bot for `login` joined.
    pub async fn link(&self, user: Uuid, login: &str) {
        let mut events = self.state.bots.subscribe();
        let url = self.state.flow.initiate_login(Some(user)).unwrap();
        self.state
            .flow
            .handle_callback(Some(user), &state_param(&url), login)
            .await
            .unwrap();
        wait_for_joined(&mut events, login).await;
    }
}

pub fn state_param(authorize_url: &str) -> String {
    url::Url::parse(authorize_url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .expect("authorize URL carries state")
}

/// Next event matching `pred`, skipping others.
pub async fn wait_for_event<F>(events: &mut broadcast::Receiver<BotEvent>, pred: F) -> BotEvent
where
    F: Fn(&BotEvent) -> bool,
{
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for bot event")
}

pub async fn wait_for_joined(events: &mut broadcast::Receiver<BotEvent>, channel: &str) {
    wait_for_event(events, |e| matches!(e, BotEvent::Joined { channel: c } if c == channel)).await;
}
