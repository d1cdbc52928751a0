use std::{fmt::Display, sync::LazyLock};

use regex::Regex;
use serenity::async_trait;

use crate::{
    pixiv::{FetchError, Illustration, IllustrationSource, PixivClient},
    proxy::ProxySigner,
    webhook_cache::WebhookCache,
};

pub mod discord;

/// Webhook posts use an avatar from here, keyed by the author's user ID.
pub const AVATAR_URL_BASE: &str = "https://d.lu.je/avatar/";

/// Post types that are illustrations. Other pixiv pages (users, novels...)
/// have numeric IDs too, but those aren't illustration IDs.
const ILLUSTRATION_KINDS: &[&str] = &["artworks", "illust"];

static PIXIV_LINK: LazyLock<Regex> = LazyLock::new(|| {
    // Optional language segment, then post type and numeric ID, like
    // `pixiv.net/en/artworks/12345`.
    Regex::new(r"pixiv\.net/(?:\w+/)?(\w+)/(\d+)").expect("Regex will always be valid")
});

/// What the bot needs to know about a chat message.
#[derive(Clone, Debug)]
pub struct IncomingMessage {
    pub id: u64,
    pub channel_id: u64,
    pub author_id: u64,
    /// Name to post under when impersonating the author.
    pub author_name: String,
    pub author_is_bot: bool,
    pub content: String,
}

/// Content of a webhook post made on behalf of someone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookPost {
    pub content: String,
    pub username: String,
    pub avatar_url: String,
}

impl WebhookPost {
    /// A post of `content` that looks like it came from the author of `message`.
    pub fn impersonating(message: &IncomingMessage, content: String) -> WebhookPost {
        WebhookPost {
            content,
            username: message.author_name.clone(),
            avatar_url: format!("{AVATAR_URL_BASE}{}", message.author_id),
        }
    }
}

#[derive(Debug)]
pub enum ChatError {
    Discord(serenity::Error),
    /// The chat platform didn't answer in time.
    TimedOut,
}

impl Display for ChatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discord(e) => write!(f, "Discord request failed: {e}"),
            Self::TimedOut => write!(f, "Discord request timed out"),
        }
    }
}

impl std::error::Error for ChatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Discord(e) => Some(e),
            Self::TimedOut => None,
        }
    }
}

impl From<serenity::Error> for ChatError {
    fn from(e: serenity::Error) -> Self {
        Self::Discord(e)
    }
}

/// Everything the message handler does on the chat platform.
///
/// One of these is made per handled message.
#[async_trait]
pub trait ChatActions: Send + Sync {
    type Webhook: Send + Sync;

    /// User ID of the bot itself.
    fn current_user_id(&self) -> u64;
    /// Whether the bot may create webhooks in this channel.
    fn can_manage_webhooks(&self, channel: u64) -> bool;
    fn webhook_id(webhook: &Self::Webhook) -> u64;

    async fn create_webhook(&self, channel: u64) -> Result<Self::Webhook, ChatError>;
    async fn fetch_webhook(&self, webhook: u64) -> Result<Self::Webhook, ChatError>;
    async fn execute_webhook(
        &self,
        webhook: &Self::Webhook,
        post: &WebhookPost,
    ) -> Result<(), ChatError>;
    async fn reply(&self, message: &IncomingMessage, content: &str) -> Result<(), ChatError>;
    /// Hide the link previews of a message.
    async fn suppress_embeds(&self, message: &IncomingMessage) -> Result<(), ChatError>;
}

/// Things every message handler shares.
pub struct BotState<S = PixivClient> {
    pub cache: WebhookCache,
    pub signer: ProxySigner,
    pub illustrations: S,
}

/// A link to a pixiv post.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixivLink {
    /// Post type, like `artworks`.
    pub kind: String,
    pub id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkMatch {
    Matched(PixivLink),
    NoMatch,
}

#[derive(Debug)]
pub enum FetchOutcome {
    Fetched {
        illustration: Illustration,
        /// The first page.
        image: String,
    },
    /// pixiv doesn't have it, or it has no pages we can link to.
    Empty,
    Failed(FetchError),
}

/// Why a message was left alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    FromBot,
    NoLink,
    NothingToPost,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleOutcome {
    Ignored(IgnoreReason),
    PostedViaWebhook,
    Replied,
}

/// Why handling a message was abandoned.
#[derive(Debug)]
pub enum HandleError {
    Fetch(FetchError),
    Post(ChatError),
}

impl Display for HandleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch(e) => write!(f, "could not fetch the illustration: {e}"),
            Self::Post(e) => write!(f, "could not post the image: {e}"),
        }
    }
}

impl std::error::Error for HandleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Fetch(e) => Some(e),
            Self::Post(e) => Some(e),
        }
    }
}

/// Find the first pixiv illustration link in some text.
pub fn match_link(text: &str) -> LinkMatch {
    PIXIV_LINK
        .captures_iter(text)
        .find(|captures| ILLUSTRATION_KINDS.contains(&&captures[1]))
        .map_or(LinkMatch::NoMatch, |captures| {
            LinkMatch::Matched(PixivLink {
                kind: captures[1].to_string(),
                id: captures[2].to_string(),
            })
        })
}

/// Look up the illustration and pick out its first page.
pub async fn fetch_first_image(source: &impl IllustrationSource, id: &str) -> FetchOutcome {
    let illustration = match source.fetch_illustration(id).await {
        Ok(Some(illustration)) => illustration,
        Ok(None) => return FetchOutcome::Empty,
        Err(e) => return FetchOutcome::Failed(e),
    };

    match illustration.first_image() {
        Some(image) => FetchOutcome::Fetched {
            image: image.to_string(),
            illustration,
        },
        None => {
            log::debug!("Illustration {id} has no images.");
            FetchOutcome::Empty
        }
    }
}

/// Find the webhook of this channel, making one if there's none yet or
/// if the one we had got deleted. `None` if neither worked out.
pub async fn resolve_webhook<C: ChatActions>(
    chat: &C,
    cache: &WebhookCache,
    channel: u64,
) -> Option<C::Webhook> {
    let Some(webhook_id) = cache.get(channel) else {
        return create_webhook(chat, cache, channel).await;
    };

    match chat.fetch_webhook(webhook_id).await {
        Ok(webhook) => Some(webhook),
        Err(e) => {
            log::info!("Webhook {webhook_id} of channel {channel} is unusable ({e}), replacing it.");
            create_webhook(chat, cache, channel).await
        }
    }
}

/// Make a webhook in this channel and remember it, if we're allowed to.
async fn create_webhook<C: ChatActions>(
    chat: &C,
    cache: &WebhookCache,
    channel: u64,
) -> Option<C::Webhook> {
    if !chat.can_manage_webhooks(channel) {
        log::debug!("Can't manage webhooks in channel {channel}.");
        return None;
    }

    let webhook = match chat.create_webhook(channel).await {
        Ok(webhook) => webhook,
        Err(e) => {
            log::warn!("Failed to create a webhook in channel {channel}: {e}");
            return None;
        }
    };

    let webhook_id = C::webhook_id(&webhook);
    log::info!("Created webhook {webhook_id} in channel {channel}.");
    if let Err(e) = cache.set(channel, webhook_id).await {
        // Still usable this time, we'll just make another one next time.
        log::error!("Failed to save webhook {webhook_id} of channel {channel}: {e}");
    }
    Some(webhook)
}

/// Handle a new message: if it links a pixiv illustration, post its first
/// page through the image proxy, as the author if possible.
pub async fn handle_message<S, C>(
    state: &BotState<S>,
    chat: &C,
    message: &IncomingMessage,
) -> Result<HandleOutcome, HandleError>
where
    S: IllustrationSource,
    C: ChatActions,
{
    if message.author_is_bot || message.author_id == chat.current_user_id() {
        return Ok(HandleOutcome::Ignored(IgnoreReason::FromBot));
    }

    let link = match match_link(&message.content) {
        LinkMatch::Matched(link) => link,
        LinkMatch::NoMatch => return Ok(HandleOutcome::Ignored(IgnoreReason::NoLink)),
    };
    log::debug!("Spotted pixiv {} {}", link.kind, link.id);

    let (illustration, image) = match fetch_first_image(&state.illustrations, &link.id).await {
        FetchOutcome::Fetched {
            illustration,
            image,
        } => (illustration, image),
        FetchOutcome::Empty => return Ok(HandleOutcome::Ignored(IgnoreReason::NothingToPost)),
        FetchOutcome::Failed(e) => return Err(HandleError::Fetch(e)),
    };

    let url = state.signer.sign(&image);
    log::debug!(
        "Posting \"{}\" by {} ({} pages)",
        illustration.title,
        illustration.artists.join(", "),
        illustration.images.len()
    );

    let webhook = resolve_webhook(chat, &state.cache, message.channel_id).await;

    // Purely cosmetic.
    let _ = chat.suppress_embeds(message).await;

    match webhook {
        None => {
            chat.reply(message, &url).await.map_err(HandleError::Post)?;
            Ok(HandleOutcome::Replied)
        }
        Some(webhook) => {
            let post = WebhookPost::impersonating(message, url);
            chat.execute_webhook(&webhook, &post)
                .await
                .map_err(HandleError::Post)?;
            Ok(HandleOutcome::PostedViaWebhook)
        }
    }
}
