use std::{sync::Arc, time::Duration};

use serenity::{all::GatewayIntents, Client};

use crate::{
    config::Config,
    handlers::{discord::Handler, BotState},
    pixiv::PixivClient,
    webhook_cache::WebhookCache,
};

/// # Panics
///
/// Panics if the config is incomplete, the webhook database can't be opened,
/// or the bot can't connect to Discord.
pub async fn entry() {
    log::info!("ASYNC WOOOO");
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => panic!("Bad configuration: {e}"),
    };

    let cache = WebhookCache::open(&config.webhook_db)
        .await
        .expect("Failed to open the webhook database!");

    let illustrations = PixivClient::new().expect("Failed to create the pixiv client!");
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .expect("Failed to create the HTTP client!");

    let state = Arc::new(BotState {
        cache,
        signer: config.signer,
        illustrations,
    });

    let intents =
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT;

    log::info!("Creating the client...");

    let mut client = Client::builder(&config.bot_token, intents)
        .event_handler(Handler::new(state.clone(), http))
        .await
        .expect("Failed to create the Discord client!");

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Got Ctrl-C, shutting down...");
                shard_manager.shutdown_all().await;
            }
            Err(e) => log::error!("Can't listen for Ctrl-C: {e}"),
        }
    });

    log::info!("Connecting to Discord!");

    if let Err(e) = client.start().await {
        panic!("Discord client died: {e}");
    }

    state.cache.close().await;

    log::info!("it appears we have been bonked.");
}
