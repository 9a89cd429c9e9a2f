//! External-API video source backed by a channel/playlist listing
//! endpoint. Paginates lazily: one HTTP call per exhausted page, never
//! ahead of what the caller actually consumes.

use crate::VideoSource;
use chaffee_common::{IngestError, Result, SourceType, VideoDescriptor};
use serde::Deserialize;
use std::collections::VecDeque;

#[derive(Debug, Deserialize)]
struct ListingPage {
    items: Vec<ListingItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListingItem {
    id: String,
    title: String,
    #[serde(default)]
    description: String,
    url: String,
    duration_s: f64,
    published_at: chrono::DateTime<chrono::Utc>,
}

impl From<ListingItem> for VideoDescriptor {
    fn from(item: ListingItem) -> Self {
        VideoDescriptor {
            source_id: item.id,
            title: item.title,
            description: item.description,
            url: item.url,
            source_type: SourceType::Youtube,
            duration_s: item.duration_s,
            published_at: item.published_at,
        }
    }
}

/// Lists the uploads of a channel, newest-first or oldest-first per
/// `newest_first`, through a paginated JSON API.
pub struct YoutubeChannelSource {
    client: reqwest::blocking::Client,
    endpoint: String,
    channel_id: String,
    newest_first: bool,
    buffer: VecDeque<VideoDescriptor>,
    next_page_token: Option<String>,
    started: bool,
    exhausted: bool,
}

impl YoutubeChannelSource {
    pub fn new(endpoint: impl Into<String>, channel_id: impl Into<String>, newest_first: bool) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            endpoint: endpoint.into(),
            channel_id: channel_id.into(),
            newest_first,
            buffer: VecDeque::new(),
            next_page_token: None,
            started: false,
            exhausted: false,
        }
    }

    fn fetch_next_page(&mut self) -> Result<()> {
        let mut req = self
            .client
            .get(&self.endpoint)
            .query(&[("channel_id", self.channel_id.as_str())])
            .query(&[("order", if self.newest_first { "newest" } else { "oldest" })]);
        if let Some(token) = &self.next_page_token {
            req = req.query(&[("page_token", token.as_str())]);
        }

        let resp = req
            .send()
            .map_err(|e| IngestError::SourceUnavailable(format!("listing request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(IngestError::SourceUnavailable(format!(
                "listing endpoint returned {}",
                resp.status()
            )));
        }

        let page: ListingPage = resp
            .json()
            .map_err(|e| IngestError::SourceUnavailable(format!("malformed listing page: {e}")))?;

        self.next_page_token = page.next_page_token;
        self.buffer.extend(page.items.into_iter().map(VideoDescriptor::from));
        if self.next_page_token.is_none() {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl VideoSource for YoutubeChannelSource {
    fn next_descriptor(&mut self) -> Option<Result<VideoDescriptor>> {
        if let Some(d) = self.buffer.pop_front() {
            return Some(Ok(d));
        }
        if self.exhausted && self.started {
            return None;
        }
        self.started = true;
        if let Err(e) = self.fetch_next_page() {
            self.exhausted = true;
            return Some(Err(e));
        }
        self.buffer.pop_front().map(Ok)
    }
}
