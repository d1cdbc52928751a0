use std::{future::Future, sync::Arc, time::Duration};

use serenity::{
    all::{
        ActivityData, ChannelId, Context, CreateAttachment, CreateMessage, CreateWebhook,
        EditMessage, EventHandler, ExecuteWebhook, Guild, GuildId, Message, MessageId,
        OnlineStatus, Ready, Webhook, WebhookId,
    },
    async_trait,
};

use super::{handle_message, BotState, ChatActions, ChatError, IncomingMessage, WebhookPost};

/// Webhooks the bot makes are called this.
const WEBHOOK_NAME: &str = "Pixiv Webhook";
/// And have this picture.
const WEBHOOK_AVATAR_URL: &str = "https://i.imgur.com/aBpeQki.jpg";
/// Shown as "Playing ..." on the bot's profile.
const PRESENCE_ACTIVITY: &str = "with pixiv links";
/// No Discord request gets to take longer than this.
const CHAT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Run a Discord request, giving up after [`CHAT_REQUEST_TIMEOUT`].
async fn bounded<T>(request: impl Future<Output = serenity::Result<T>>) -> Result<T, ChatError> {
    match tokio::time::timeout(CHAT_REQUEST_TIMEOUT, request).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(ChatError::TimedOut),
    }
}

/// [`ChatActions`] on Discord, in the context of one message.
pub struct DiscordActions<'a> {
    ctx: &'a Context,
    guild_id: Option<GuildId>,
    /// For downloading the webhook avatar.
    http: &'a reqwest::Client,
}

impl<'a> DiscordActions<'a> {
    async fn download_webhook_avatar(&self) -> Result<CreateAttachment, reqwest::Error> {
        let bytes = self
            .http
            .get(WEBHOOK_AVATAR_URL)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(CreateAttachment::bytes(bytes.to_vec(), "avatar.jpg"))
    }
}

#[async_trait]
impl<'a> ChatActions for DiscordActions<'a> {
    type Webhook = Webhook;

    fn current_user_id(&self) -> u64 {
        self.ctx.cache.current_user().id.get()
    }

    fn can_manage_webhooks(&self, channel: u64) -> bool {
        // Webhooks only exist in guilds.
        let Some(guild_id) = self.guild_id else {
            return false;
        };
        let Some(guild) = self.ctx.cache.guild(guild_id) else {
            return false;
        };
        let Some(channel) = guild.channels.get(&ChannelId::new(channel)) else {
            // Threads land here too. Those can't have webhooks of their own anyway.
            return false;
        };
        let me = self.ctx.cache.current_user().id;
        let Some(member) = guild.members.get(&me) else {
            return false;
        };
        guild.user_permissions_in(channel, member).manage_webhooks()
    }

    fn webhook_id(webhook: &Webhook) -> u64 {
        webhook.id.get()
    }

    async fn create_webhook(&self, channel: u64) -> Result<Webhook, ChatError> {
        let avatar = match self.download_webhook_avatar().await {
            Ok(avatar) => Some(avatar),
            Err(e) => {
                log::warn!("Couldn't get the webhook avatar, making it without one: {e}");
                None
            }
        };

        let mut builder = CreateWebhook::new(WEBHOOK_NAME);
        if let Some(avatar) = &avatar {
            builder = builder.avatar(avatar);
        }
        bounded(ChannelId::new(channel).create_webhook(self.ctx, builder)).await
    }

    async fn fetch_webhook(&self, webhook: u64) -> Result<Webhook, ChatError> {
        bounded(self.ctx.http.get_webhook(WebhookId::new(webhook))).await
    }

    async fn execute_webhook(&self, webhook: &Webhook, post: &WebhookPost) -> Result<(), ChatError> {
        let builder = ExecuteWebhook::new()
            .content(&post.content)
            .username(&post.username)
            .avatar_url(&post.avatar_url);
        bounded(webhook.execute(self.ctx, false, builder)).await?;
        Ok(())
    }

    async fn reply(&self, message: &IncomingMessage, content: &str) -> Result<(), ChatError> {
        let channel = ChannelId::new(message.channel_id);
        let builder = CreateMessage::new()
            .content(content)
            .reference_message((channel, MessageId::new(message.id)));
        bounded(channel.send_message(self.ctx, builder)).await?;
        Ok(())
    }

    async fn suppress_embeds(&self, message: &IncomingMessage) -> Result<(), ChatError> {
        let builder = EditMessage::new().suppress_embeds(true);
        bounded(ChannelId::new(message.channel_id).edit_message(
            self.ctx,
            MessageId::new(message.id),
            builder,
        ))
        .await?;
        Ok(())
    }
}

impl From<&Message> for IncomingMessage {
    fn from(msg: &Message) -> Self {
        // Guild nickname, then global display name, then username.
        let author_name = msg
            .member
            .as_ref()
            .and_then(|member| member.nick.clone())
            .or_else(|| msg.author.global_name.clone())
            .unwrap_or_else(|| msg.author.name.clone());

        IncomingMessage {
            id: msg.id.get(),
            channel_id: msg.channel_id.get(),
            author_id: msg.author.id.get(),
            author_name,
            author_is_bot: msg.author.bot,
            content: msg.content.clone(),
        }
    }
}

/// What to say about a guild showing up. `is_new` is `Some(false)` for guilds
/// the cache already knew, which is a guild coming back after an outage.
fn guild_create_log(name: &str, is_new: Option<bool>, guild_count: usize) -> String {
    match is_new {
        Some(false) => format!("Guild {name} has just came back from being unavailable"),
        Some(true) | None => {
            format!("Joined guild {name}, bringing us up to {guild_count} guilds.")
        }
    }
}

/// Handles events from the Discord gateway.
pub struct Handler {
    state: Arc<BotState>,
    http: reqwest::Client,
}

impl Handler {
    pub fn new(state: Arc<BotState>, http: reqwest::Client) -> Handler {
        Handler { state, http }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        log::info!("Successfully connected to Discord as {}!", ready.user.name);
        ctx.set_presence(
            Some(ActivityData::playing(PRESENCE_ACTIVITY)),
            OnlineStatus::DoNotDisturb,
        );
    }

    async fn guild_create(&self, ctx: Context, guild: Guild, is_new: Option<bool>) {
        log::info!(
            "{}",
            guild_create_log(&guild.name, is_new, ctx.cache.guild_count())
        );
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let message = IncomingMessage::from(&msg);
        let chat = DiscordActions {
            ctx: &ctx,
            guild_id: msg.guild_id,
            http: &self.http,
        };

        match handle_message(self.state.as_ref(), &chat, &message).await {
            Ok(outcome) => log::trace!("Message {} handled: {:?}", message.id, outcome),
            Err(e) => log::error!(
                "Failed to handle message {} in channel {}: {e}",
                message.id,
                message.channel_id
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::guild_create_log;

    #[test]
    fn guild_create_messages() {
        assert_eq!(
            guild_create_log("Art Club", Some(false), 7),
            "Guild Art Club has just came back from being unavailable"
        );
        assert_eq!(
            guild_create_log("Art Club", Some(true), 7),
            "Joined guild Art Club, bringing us up to 7 guilds."
        );
        // No cache to tell, so it counts as a join.
        assert_eq!(
            guild_create_log("Art Club", None, 1),
            "Joined guild Art Club, bringing us up to 1 guilds."
        );
    }
}
