//! Preview pages for new items, hosted on Telegraph.

mod publisher;
mod telegraph;
mod unrender;

pub use publisher::{unescape_html, EnrichmentPublisher, PagePublisher, PageRequest, PublishError};
pub use telegraph::{html_to_nodes, NodeElement, PageNode, TelegraphClient};
pub use unrender::{markdown_to_html, UnrenderClient, UnrenderError};
