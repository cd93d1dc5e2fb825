mod traits;
mod twitch;

pub use traits::{BroadcasterProfile, IdentityProvider, TokenSet};
pub use twitch::TwitchProvider;
