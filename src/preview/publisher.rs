use async_trait::async_trait;
use quick_xml::escape::{resolve_predefined_entity, unescape_with};
use secrecy::SecretString;
use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::unrender::UnrenderClient;
use crate::config::RetryPolicy;

/// Errors from a preview page host.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The page body exceeds what the host accepts. Never retried.
    #[error("page content too big")]
    ContentTooBig,
    /// Host-side rate limit; wait this many seconds.
    #[error("flood wait of {0}s")]
    FloodWait(u64),
    #[error("API error: {0}")]
    Api(String),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out")]
    Timeout,
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
}

/// One page to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub title: String,
    pub author_name: String,
    pub author_url: String,
    /// HTML body, entities already unescaped.
    pub html: String,
}

/// Something that can host a preview page and return its URL.
#[async_trait]
pub trait PagePublisher: Send + Sync {
    async fn create_page(
        &self,
        token: &SecretString,
        page: &PageRequest,
    ) -> Result<String, PublishError>;
}

/// Publishes item bodies as preview pages over a pool of accounts.
///
/// Failures never propagate: the caller just gets `None` and delivers the
/// item without a preview link.
pub struct EnrichmentPublisher {
    publisher: Arc<dyn PagePublisher>,
    tokens: Vec<SecretString>,
    next_token: AtomicUsize,
    policy: RetryPolicy,
    unrender: Option<UnrenderClient>,
    author_name: String,
    author_url: String,
}

impl EnrichmentPublisher {
    pub fn new(
        publisher: Arc<dyn PagePublisher>,
        tokens: Vec<SecretString>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            publisher,
            tokens,
            next_token: AtomicUsize::new(0),
            policy,
            unrender: None,
            author_name: String::new(),
            author_url: String::new(),
        }
    }

    /// Page author used when the source has no title or the item no link.
    pub fn with_author(mut self, name: &str, url: &str) -> Self {
        self.author_name = name.trim().to_string();
        self.author_url = url.trim().to_string();
        self
    }

    /// Fetch full articles through `client` when an item has no body.
    pub fn with_unrender(mut self, client: UnrenderClient) -> Self {
        self.unrender = Some(client);
        self
    }

    /// True when there is at least one account to publish with.
    pub fn is_configured(&self) -> bool {
        !self.tokens.is_empty()
    }

    /// Round-robin over the account pool.
    fn next_token(&self) -> Option<&SecretString> {
        if self.tokens.is_empty() {
            return None;
        }
        let idx = self.next_token.fetch_add(1, Ordering::Relaxed) % self.tokens.len();
        self.tokens.get(idx)
    }

    /// Creates a preview page for one item and returns its URL.
    pub async fn publish(
        &self,
        source_title: &str,
        item_title: &str,
        raw_link: &str,
        html_body: &str,
    ) -> Option<String> {
        if !self.is_configured() {
            return None;
        }

        let html = match self.body_for(raw_link, html_body).await {
            Some(html) => html,
            None => {
                tracing::debug!(link = %raw_link, "No body to publish");
                return None;
            }
        };

        let page = PageRequest {
            title: format!("{item_title} - {source_title}"),
            author_name: non_empty_or(source_title, &self.author_name),
            author_url: non_empty_or(raw_link, &self.author_url),
            html,
        };

        let max_attempts = self.policy.max_attempts.max(1);
        for attempt in 0..max_attempts {
            let token = self.next_token()?;
            match self.publisher.create_page(token, &page).await {
                Ok(url) => return Some(url),
                Err(PublishError::ContentTooBig) => {
                    tracing::warn!(link = %raw_link, "Preview body too big, skipping page");
                    return None;
                }
                Err(PublishError::FloodWait(secs)) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts,
                        wait_secs = secs,
                        "Preview host flood wait"
                    );
                    if attempt + 1 < max_attempts {
                        tokio::time::sleep(Duration::from_secs(secs)).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        attempt = attempt + 1,
                        max_attempts,
                        "Preview page creation failed"
                    );
                    if attempt + 1 < max_attempts {
                        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                        tokio::time::sleep(self.policy.base_backoff.saturating_mul(factor)).await;
                    }
                }
            }
        }

        tracing::warn!(link = %raw_link, "Giving up on preview page");
        None
    }

    async fn body_for(&self, raw_link: &str, html_body: &str) -> Option<String> {
        if !html_body.trim().is_empty() {
            return Some(unescape_html(html_body).into_owned());
        }
        let unrender = self.unrender.as_ref()?;
        match unrender.fetch_html(raw_link).await {
            Ok(html) if !html.trim().is_empty() => Some(html),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(link = %raw_link, error = %e, "Unrender fetch failed");
                None
            }
        }
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    let value = value.trim();
    if value.is_empty() { fallback } else { value }.to_string()
}

/// Resolves character references in feed HTML.
///
/// Bodies that do not unescape cleanly (stray `&`, unknown entities) are
/// returned unchanged.
pub fn unescape_html(html: &str) -> Cow<'_, str> {
    unescape_with(html, |entity| {
        resolve_predefined_entity(entity).or(match entity {
            "nbsp" => Some("\u{a0}"),
            "mdash" => Some("\u{2014}"),
            "ndash" => Some("\u{2013}"),
            "hellip" => Some("\u{2026}"),
            "laquo" => Some("\u{ab}"),
            "raquo" => Some("\u{bb}"),
            "copy" => Some("\u{a9}"),
            _ => None,
        })
    })
    .unwrap_or(Cow::Borrowed(html))
}
