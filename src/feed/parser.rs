use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Link};
use feed_rs::parser;

/// One item of a fetched feed, before deduplication.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedItem {
    pub title: String,
    /// Canonical link (the `alternate` link when the feed marks one)
    pub link: String,
    /// First link exactly as listed by the feed
    pub raw_link: String,
    /// Item GUID; empty when the feed does not provide one
    pub guid: String,
    /// Full HTML body, empty when the feed only carries a summary
    pub body: String,
    /// Summary text, falling back to the body
    pub description: String,
}

/// A parsed feed document.
#[derive(Debug, Clone, Default)]
pub struct FetchedFeed {
    pub title: String,
    /// Feed-level update time, falling back to its publication time
    pub published_at: Option<DateTime<Utc>>,
    pub items: Vec<FeedItem>,
}

/// Parse RSS/Atom/JSON Feed bytes into a [`FetchedFeed`].
pub fn parse_feed(bytes: &[u8]) -> Result<FetchedFeed, parser::ParseFeedError> {
    let feed = parser::parse(bytes)?;

    let title = feed.title.map(|t| t.content).unwrap_or_default();
    let published_at = feed.updated.or(feed.published);
    let items = feed.entries.into_iter().map(parse_entry).collect();

    Ok(FetchedFeed {
        title,
        published_at,
        items,
    })
}

fn parse_entry(entry: Entry) -> FeedItem {
    let raw_link = entry
        .links
        .first()
        .map(|l| l.href.clone())
        .unwrap_or_default();
    let link = canonical_link(&entry.links).unwrap_or_else(|| raw_link.clone());

    let title = entry
        .title
        .map(|t| t.content)
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| "Untitled".to_string());
    let body = entry.content.and_then(|c| c.body).unwrap_or_default();
    let description = entry
        .summary
        .map(|s| s.content)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| body.clone());

    FeedItem {
        title,
        link,
        raw_link,
        guid: entry.id.trim().to_string(),
        body,
        description,
    }
}

fn canonical_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| l.rel.as_deref() == Some("alternate"))
        .map(|l| l.href.clone())
}
