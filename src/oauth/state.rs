//! Pending OAuth login attempts, keyed by the `state` token sent to Twitch.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::crypto::random_token;
use crate::error::LinkError;

#[derive(Debug, Clone, Copy)]
struct PendingLogin {
    user_id: Uuid,
    issued_at: Instant,
}

/// Single-use, expiring state tokens, each bound to the user who started the attempt.
pub struct StateStore {
    ttl: Duration,
    pending: Mutex<HashMap<String, PendingLogin>>,
}

impl StateStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, PendingLogin>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issue a fresh state token for `user_id`.
    pub fn issue(&self, user_id: Uuid) -> String {
        let token = random_token();
        let now = Instant::now();

        let mut pending = self.pending();
        pending.retain(|_, p| now.duration_since(p.issued_at) < self.ttl);
        pending.insert(
            token.clone(),
            PendingLogin {
                user_id,
                issued_at: now,
            },
        );
        token
    }

    /// Consume `state` if it was issued to `user_id` and has not expired.
    pub fn take(&self, state: &str, user_id: Uuid) -> Result<(), LinkError> {
        let mut pending = self.pending();

        let login = *pending.get(state).ok_or(LinkError::InvalidState)?;
        if login.user_id != user_id {
            tracing::warn!(%user_id, "OAuth state presented by a different user");
            return Err(LinkError::InvalidState);
        }

        pending.remove(state);
        if login.issued_at.elapsed() >= self.ttl {
            return Err(LinkError::InvalidState);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
