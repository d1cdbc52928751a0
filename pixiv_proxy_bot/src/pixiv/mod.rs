mod types;

use std::{collections::BTreeSet, fmt::Display, time::Duration};

use serenity::async_trait;

pub use types::Illustration;
use types::{ApiResponse, IllustBody};

const API_BASE: &str = "https://www.pixiv.net/ajax/illust/";
const USER_AGENT: &str = concat!("pixiv_proxy_bot/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// The page index token in original image URLs, like `12345_p0.png`.
const PAGE_TOKEN: &str = "_p0";

/// Fetching an illustration went wrong before we could even tell
/// whether pixiv has it.
#[derive(Debug)]
pub enum FetchError {
    /// Couldn't talk to the API.
    Request(reqwest::Error),
    /// Got something that isn't the JSON we expect.
    Parse(serde_json::Error),
}

impl Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request(e) => write!(f, "pixiv request failed: {e}"),
            Self::Parse(e) => write!(f, "pixiv response is not what we expected: {e}"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Request(e) => Some(e),
            Self::Parse(e) => Some(e),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        Self::Request(e)
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}

/// Something that can look up illustrations by their ID.
#[async_trait]
pub trait IllustrationSource: Send + Sync {
    /// Returns `Ok(None)` if the API says there's no such illustration
    /// (or won't show it), and an error if the API couldn't be asked at all.
    async fn fetch_illustration(&self, id: &str) -> Result<Option<Illustration>, FetchError>;
}

/// Client for pixiv's `/ajax/illust/` API.
#[derive(Clone, Debug)]
pub struct PixivClient {
    client: reqwest::Client,
}

impl PixivClient {
    pub fn new() -> Result<PixivClient, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(PixivClient { client })
    }
}

#[async_trait]
impl IllustrationSource for PixivClient {
    async fn fetch_illustration(&self, id: &str) -> Result<Option<Illustration>, FetchError> {
        // Not checking the status: missing works come back as 404 with
        // an error body, which is handled like any other API error.
        let body = self
            .client
            .get(format!("{API_BASE}{id}"))
            .send()
            .await?
            .text()
            .await?;
        parse_illustration(id, &body)
    }
}

/// Turn an `/ajax/illust/{id}` response body into an [`Illustration`].
///
/// API level errors are logged and give `Ok(None)`.
pub fn parse_illustration(id: &str, body: &str) -> Result<Option<Illustration>, FetchError> {
    let response: ApiResponse = serde_json::from_str(body)?;
    if response.error {
        log::warn!("pixiv refused illustration {id}: {}", response.message);
        return Ok(None);
    }

    let body: IllustBody = serde_json::from_value(response.body)?;

    let images = match &body.urls.original {
        Some(original) => page_urls(original, body.page_count),
        None => Vec::new(),
    };

    let tags = body.tags.tags.into_iter().map(|t| t.tag).collect::<BTreeSet<_>>();

    Ok(Some(Illustration {
        id: id.to_string(),
        title: body.title,
        description: body.description,
        artists: vec![body.user_name],
        tags,
        url: body.extra_data.meta.canonical,
        images,
    }))
}

/// Build URLs of all pages out of the first page's URL.
/// Empty if the first page URL has no page index in it.
fn page_urls(first_page: &str, page_count: u32) -> Vec<String> {
    if !first_page.contains(PAGE_TOKEN) {
        return Vec::new();
    }
    (0..page_count)
        .map(|i| first_page.replacen(PAGE_TOKEN, &format!("_p{i}"), 1))
        .collect()
}
