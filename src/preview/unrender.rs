//! Full-article fetch through an "unrender" service.
//!
//! The service takes `GET {base}/{article-url}` and answers with the article
//! as Markdown, which is converted to HTML for the preview page.

use futures::StreamExt;
use pulldown_cmark::{html, Options, Parser};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;

use crate::util::validate_url;

const MAX_CONTENT_SIZE: usize = 5 * 1024 * 1024; // 5MB
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum UnrenderError {
    #[error("Request timed out after 120s")]
    Timeout,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    #[error("Invalid UTF-8 in response")]
    InvalidUtf8,
    #[error("Invalid article URL")]
    InvalidUrl,
    #[error("Insecure base URL: HTTPS required (except localhost for testing)")]
    InsecureBaseUrl,
}

/// Client for the unrender service.
#[derive(Clone)]
pub struct UnrenderClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
}

impl UnrenderClient {
    /// Fails when `base_url` is plain HTTP on anything but localhost, since
    /// the bearer token would travel in clear text.
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        token: Option<SecretString>,
    ) -> Result<Self, UnrenderError> {
        let base_url = base_url.trim_end_matches('/');
        if !base_url.starts_with("https://") {
            let is_localhost = base_url.starts_with("http://127.0.0.1")
                || base_url.starts_with("http://localhost");
            if !is_localhost {
                return Err(UnrenderError::InsecureBaseUrl);
            }
            tracing::warn!(base_url = %base_url, "Using non-HTTPS unrender base URL (localhost only)");
        }
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            token,
        })
    }

    /// Fetches the article behind `link` as Markdown.
    pub async fn fetch_markdown(&self, link: &str) -> Result<String, UnrenderError> {
        let article = validate_url(link).map_err(|_| UnrenderError::InvalidUrl)?;

        let mut request = self
            .client
            .get(format!("{}/{}", self.base_url, article.as_str()));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = tokio::time::timeout(REQUEST_TIMEOUT, request.send())
            .await
            .map_err(|_| UnrenderError::Timeout)??;

        if !response.status().is_success() {
            return Err(UnrenderError::HttpStatus(response.status().as_u16()));
        }

        read_limited_text(response, MAX_CONTENT_SIZE).await
    }

    /// Fetches the article behind `link` and renders it to HTML.
    pub async fn fetch_html(&self, link: &str) -> Result<String, UnrenderError> {
        let markdown = self.fetch_markdown(link).await?;
        Ok(markdown_to_html(&markdown))
    }
}

pub fn markdown_to_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);

    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, Parser::new_ext(markdown, options));
    out
}

async fn read_limited_text(
    response: reqwest::Response,
    limit: usize,
) -> Result<String, UnrenderError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(UnrenderError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(UnrenderError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    String::from_utf8(bytes).map_err(|_| UnrenderError::InvalidUtf8)
}
