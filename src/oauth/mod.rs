//! OAuth authorization-code flow linking a platform user to a Twitch broadcaster.

mod flow;
mod state;

pub use flow::{BotStatus, DisconnectSuccess, LinkFlow, LinkSuccess};
pub use state::StateStore;
