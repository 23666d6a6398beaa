//! Minimal Telegraph client: `createPage` plus the HTML to node conversion it
//! needs.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Node};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::publisher::{PagePublisher, PageRequest, PublishError};

const DEFAULT_API_URL: &str = "https://api.telegra.ph";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Tags Telegraph accepts inside page content.
const ALLOWED_TAGS: &[&str] = &[
    "a", "aside", "b", "blockquote", "br", "code", "em", "figcaption", "figure", "h3", "h4", "hr",
    "i", "iframe", "img", "li", "ol", "p", "pre", "s", "strong", "u", "ul", "video",
];

/// A Telegraph content node: plain text or an element.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PageNode {
    Text(String),
    Element(NodeElement),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeElement {
    pub tag: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PageNode>,
}

/// Converts an HTML fragment into Telegraph nodes.
///
/// Headings are folded into `h3`/`h4`, unsupported wrappers (`div`, `span`,
/// ...) are replaced by their children, and only `href`/`src` attributes
/// survive. Scripts and styles are dropped with their content.
pub fn html_to_nodes(html: &str) -> Vec<PageNode> {
    let fragment = Html::parse_fragment(html);
    convert_children(fragment.root_element())
}

fn convert_children(parent: ElementRef<'_>) -> Vec<PageNode> {
    let mut nodes = Vec::new();
    for child in parent.children() {
        match child.value() {
            Node::Text(text) => {
                if !text.is_empty() {
                    nodes.push(PageNode::Text(String::from(&**text)));
                }
            }
            Node::Element(_) => {
                if let Some(element) = ElementRef::wrap(child) {
                    nodes.extend(convert_element(element));
                }
            }
            _ => {}
        }
    }
    nodes
}

fn convert_element(element: ElementRef<'_>) -> Vec<PageNode> {
    let name = element.value().name();
    let tag = match name {
        "script" | "style" | "noscript" | "head" => return Vec::new(),
        "h1" | "h2" => "h3",
        "h5" | "h6" => "h4",
        "strike" | "del" => "s",
        "ins" => "u",
        other if ALLOWED_TAGS.contains(&other) => other,
        _ => return convert_children(element),
    };

    let mut attrs = BTreeMap::new();
    for key in ["href", "src"] {
        if let Some(value) = element.value().attr(key) {
            attrs.insert(key.to_string(), value.to_string());
        }
    }

    vec![PageNode::Element(NodeElement {
        tag: tag.to_string(),
        attrs,
        children: convert_children(element),
    })]
}

#[derive(Serialize)]
struct CreatePageBody<'a> {
    access_token: &'a str,
    title: &'a str,
    author_name: &'a str,
    author_url: &'a str,
    content: Vec<PageNode>,
    return_content: bool,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    result: Option<PageResult>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct PageResult {
    url: String,
}

/// Maps a Telegraph API error string onto [`PublishError`].
pub fn classify_api_error(error: &str) -> PublishError {
    if error == "CONTENT_TOO_BIG" {
        return PublishError::ContentTooBig;
    }
    if let Some(secs) = error
        .strip_prefix("FLOOD_WAIT_")
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|&secs| secs > 0)
    {
        return PublishError::FloodWait(secs);
    }
    PublishError::Api(error.to_string())
}

/// [`PagePublisher`] backed by the Telegraph HTTP API.
#[derive(Clone)]
pub struct TelegraphClient {
    client: reqwest::Client,
    api_url: String,
}

impl TelegraphClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_api_url(client, DEFAULT_API_URL)
    }

    /// Point the client at another API root (used by tests).
    pub fn with_api_url(client: reqwest::Client, api_url: &str) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PagePublisher for TelegraphClient {
    async fn create_page(
        &self,
        token: &SecretString,
        page: &PageRequest,
    ) -> Result<String, PublishError> {
        let body = CreatePageBody {
            access_token: token.expose_secret(),
            title: &page.title,
            author_name: &page.author_name,
            author_url: &page.author_url,
            content: html_to_nodes(&page.html),
            return_content: false,
        };

        let response = tokio::time::timeout(
            REQUEST_TIMEOUT,
            self.client
                .post(format!("{}/createPage", self.api_url))
                .json(&body)
                .send(),
        )
        .await
        .map_err(|_| PublishError::Timeout)??;

        if !response.status().is_success() {
            return Err(PublishError::HttpStatus(response.status().as_u16()));
        }

        let parsed: ApiResponse = response.json().await?;
        match (parsed.ok, parsed.result, parsed.error) {
            (true, Some(result), _) => Ok(result.url),
            (_, _, Some(error)) => Err(classify_api_error(&error)),
            _ => Err(PublishError::Api("malformed createPage response".into())),
        }
    }
}
