use std::collections::BTreeSet;

use serde::Deserialize;

/// One pixiv submission, boiled down to what the bot cares about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Illustration {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Display names of the artists, without duplicates.
    pub artists: Vec<String>,
    pub tags: BTreeSet<String>,
    /// Canonical page URL of the submission.
    pub url: String,
    /// Original image URLs, in page order.
    pub images: Vec<String>,
}

impl Illustration {
    /// URL of the first page, if there are any pages at all.
    #[must_use]
    pub fn first_image(&self) -> Option<&str> {
        self.images.first().map(String::as_str)
    }
}

// Raw API payload below.

/// Envelope of every `/ajax/` response.
#[derive(Debug, Deserialize)]
pub(super) struct ApiResponse {
    pub error: bool,
    #[serde(default)]
    pub message: String,
    /// An [`IllustBody`] on success. On errors this is an empty array, so
    /// it only gets parsed after `error` is checked.
    #[serde(default)]
    pub body: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct IllustBody {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub user_name: String,
    pub tags: TagList,
    pub page_count: u32,
    pub urls: IllustUrls,
    pub extra_data: ExtraData,
}

#[derive(Debug, Deserialize)]
pub(super) struct TagList {
    pub tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Tag {
    pub tag: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct IllustUrls {
    /// Null for works the API won't show without logging in.
    pub original: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ExtraData {
    pub meta: Meta,
}

#[derive(Debug, Deserialize)]
pub(super) struct Meta {
    pub canonical: String,
}
