//! Token refresh for linked broadcasters.
//!
//! `refresh_identity` is the one refresh routine; the reconciler calls it for
//! every identity at startup, the daemon for those whose access token is about
//! to expire.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::{LinkStore, LinkedIdentity, TokenRecord};
use crate::error::LinkError;
use crate::providers::IdentityProvider;

/// Refresh tokens that expire within this window.
const EXPIRY_WINDOW_MINUTES: i64 = 10;

/// Run a refresh grant for `identity` and replace its token records.
///
/// The new record is written before older ones are deleted, so a failure in
/// between leaves a duplicate that readers resolve by timestamp.
pub async fn refresh_identity(
    store: &dyn LinkStore,
    provider: &dyn IdentityProvider,
    identity: &LinkedIdentity,
) -> Result<TokenRecord, LinkError> {
    let login = &identity.broadcaster_login;
    let current = store
        .latest_token_record(login)
        .await?
        .ok_or_else(|| LinkError::NotFound(format!("token record for {login}")))?;

    let tokens = provider.refresh_token(&current.refresh_token).await?;
    let acquired_at = Utc::now();

    let record = TokenRecord {
        broadcaster_id: identity.broadcaster_id.clone(),
        broadcaster_login: login.clone(),
        refresh_token: tokens.refresh_token.clone(),
        access_token: tokens.access_token.clone(),
        access_token_expiry: tokens.expiry_from(acquired_at),
        refresh_acquired_at: acquired_at,
    };

    store.write_token_record(&record).await?;
    store.delete_token_records_before(login, acquired_at).await?;

    Ok(record)
}

/// Start the refresh daemon loop.
pub async fn refresh_daemon(
    store: Arc<dyn LinkStore>,
    provider: Arc<dyn IdentityProvider>,
    interval: Duration,
) {
    info!("Token refresh daemon started (interval: {}s)", interval.as_secs());

    loop {
        tokio::time::sleep(interval).await;
        if let Err(e) = refresh_cycle(store.as_ref(), provider.as_ref()).await {
            error!("Refresh cycle error: {e}");
        }
    }
}

/// One daemon pass. Returns how many identities were refreshed.
pub async fn refresh_cycle(
    store: &dyn LinkStore,
    provider: &dyn IdentityProvider,
) -> Result<usize, LinkError> {
    let deadline = Utc::now() + ChronoDuration::minutes(EXPIRY_WINDOW_MINUTES);
    let mut refreshed = 0;

    for identity in store.all_linked_identities().await? {
        let login = &identity.broadcaster_login;
        let due = match store.latest_token_record(login).await {
            Ok(Some(record)) => record.access_token_expiry.map_or(true, |exp| exp <= deadline),
            Ok(None) => false,
            Err(e) => {
                error!(channel = %login, "Failed to read token record: {e}");
                continue;
            }
        };
        if !due {
            continue;
        }

        match refresh_identity(store, provider, &identity).await {
            Ok(_) => {
                refreshed += 1;
                info!(channel = %login, "Refreshed Twitch token");
            }
            Err(e) => error!(channel = %login, "Failed to refresh Twitch token: {e}"),
        }
    }

    Ok(refreshed)
}
