use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use twitch_link::bot::IrcConnector;
use twitch_link::crypto::CryptoEngine;
use twitch_link::providers::TwitchProvider;
use twitch_link::store::{self, PgStore};
use twitch_link::{api, AppState, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "twitch_link=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!("twitch-link v{}", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}:{}", config.host, config.port);

    let crypto = Arc::new(CryptoEngine::new(&config.master_key, &config.session_secret)?);
    let store = PgStore::new(&config.database_url, crypto.clone()).await?;
    store.migrate().await?;
    info!("Database connected and migrated");

    let provider = TwitchProvider::new(
        config.twitch_client_id.clone(),
        config.twitch_client_secret.clone(),
        config.twitch_redirect_url.clone(),
        config.http_timeout,
    )?;
    let connector = IrcConnector::new(config.twitch_irc_addr.clone());

    let state = AppState::new(
        config.clone(),
        crypto,
        Arc::new(store),
        Arc::new(provider),
        Arc::new(connector),
    );

    if config.disable_integrations {
        tracing::warn!("Integrations disabled: skipping reconciliation and token refresh");
    } else {
        let report = state.reconciler.reconcile_all().await?;
        info!(
            "Reconciled {} bots ({} skipped)",
            report.spawned.len(),
            report.failed.len()
        );

        tokio::spawn(store::refresh_daemon(
            state.store.clone(),
            state.provider.clone(),
            config.token_refresh_interval,
        ));
    }

    let app = api::router(state.clone())?;

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server ready");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    state.bots.shutdown_all().await;
    Ok(())
}
