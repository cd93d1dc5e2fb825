//! Channel login → live bot handle. The only shared mutable structure of the
//! bot subsystem; every mutation goes through the one mutex below.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::LinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BotState {
    Created,
    Connecting,
    Joined,
    Disconnected,
}

/// A registered bot: its lifecycle state plus the means to stop its task.
pub struct BotHandle {
    pub(super) generation: u64,
    pub(super) state: BotState,
    pub(super) shutdown: oneshot::Sender<()>,
    pub(super) task: JoinHandle<()>,
}

#[derive(Default)]
pub struct BotRegistry {
    entries: Mutex<HashMap<String, BotHandle>>,
    next_generation: AtomicU64,
}

impl BotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, BotHandle>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new handle for `channel`, starting its task under the lock.
    ///
    /// `start` receives the generation id and returns the shutdown sender and
    /// task. It is only called when the channel is free, so two concurrent
    /// calls for one channel can never both start a task.
    pub fn try_insert_with<F>(&self, channel: &str, start: F) -> Result<u64, LinkError>
    where
        F: FnOnce(u64) -> (oneshot::Sender<()>, JoinHandle<()>),
    {
        let mut entries = self.entries();
        if entries.contains_key(channel) {
            return Err(LinkError::AlreadyRunning(channel.to_string()));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (shutdown, task) = start(generation);
        entries.insert(
            channel.to_string(),
            BotHandle {
                generation,
                state: BotState::Created,
                shutdown,
                task,
            },
        );
        Ok(generation)
    }

    /// Update the state of `channel` if it still belongs to `generation`.
    pub fn set_state(&self, channel: &str, generation: u64, state: BotState) -> bool {
        match self.entries().get_mut(channel) {
            Some(handle) if handle.generation == generation => {
                handle.state = state;
                true
            }
            _ => false,
        }
    }

    /// Remove `channel` unconditionally (requested teardown).
    pub fn remove(&self, channel: &str) -> Option<BotHandle> {
        self.entries().remove(channel)
    }

    /// Remove `channel` only if it still belongs to `generation` (task exit).
    pub fn remove_if(&self, channel: &str, generation: u64) -> bool {
        let mut entries = self.entries();
        match entries.get(channel) {
            Some(handle) if handle.generation == generation => {
                entries.remove(channel);
                true
            }
            _ => false,
        }
    }

    pub fn state(&self, channel: &str) -> Option<BotState> {
        self.entries().get(channel).map(|h| h.state)
    }

    pub fn snapshot(&self) -> Vec<(String, BotState)> {
        let mut channels: Vec<_> = self
            .entries()
            .iter()
            .map(|(channel, handle)| (channel.clone(), handle.state))
            .collect();
        channels.sort_by(|a, b| a.0.cmp(&b.0));
        channels
    }

    /// Take every handle out of the registry.
    pub fn drain(&self) -> Vec<(String, BotHandle)> {
        self.entries().drain().collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
