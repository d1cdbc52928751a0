//! Source code for the pixiv proxy bot: reposts pixiv illustrations
//! linked in Discord through a signed image proxy.

/// Configuration from the environment.
pub mod config;

/// Signed image proxy URLs.
pub mod proxy;

/// Talking to pixiv.
pub mod pixiv;

/// Which channel has which webhook.
pub mod webhook_cache;

/// Functions that handle events from Discord.
pub mod handlers;

/// Entry function that starts the bot.
mod entry;
pub use entry::*;
