pub mod api;
pub mod audit;
pub mod auth;
pub mod bot;
pub mod config;
pub mod crypto;
pub mod error;
pub mod oauth;
pub mod providers;
pub mod reconcile;
pub mod store;

pub use config::Config;
pub use error::LinkError;

use std::sync::Arc;

use bot::{BotManager, ChatConnector};
use crypto::CryptoEngine;
use oauth::LinkFlow;
use providers::IdentityProvider;
use reconcile::Reconciler;
use store::LinkStore;

/// Shared application state passed to all API handlers.
pub struct AppState {
    pub config: Config,
    pub crypto: Arc<CryptoEngine>,
    pub store: Arc<dyn LinkStore>,
    pub provider: Arc<dyn IdentityProvider>,
    pub flow: LinkFlow,
    pub bots: BotManager,
    pub reconciler: Reconciler,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the core components around a store, a provider and a chat connector.
    pub fn new(
        config: Config,
        crypto: Arc<CryptoEngine>,
        store: Arc<dyn LinkStore>,
        provider: Arc<dyn IdentityProvider>,
        connector: Arc<dyn ChatConnector>,
    ) -> SharedState {
        let bots = BotManager::new(connector, store.clone(), config.twitch_bot_username.clone());
        let flow = LinkFlow::new(
            provider.clone(),
            store.clone(),
            bots.clone(),
            config.oauth_state_ttl,
        );
        let reconciler = Reconciler::new(store.clone(), provider.clone(), bots.clone());

        Arc::new(AppState {
            config,
            crypto,
            store,
            provider,
            flow,
            bots,
            reconciler,
        })
    }
}
