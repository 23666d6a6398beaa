//! Feed retrieval and OPML import parsing.
//!
//! - `parser`: RSS/Atom parsing using the `feed-rs` crate
//! - `fetcher`: the [`FeedFetcher`] collaborator and its HTTP implementation
//! - `opml`: OPML outline extraction for bulk import

mod fetcher;
mod opml;
mod parser;

pub use fetcher::{FeedFetcher, FetchError, HttpFeedFetcher};
pub use opml::{parse_opml, read_opml, OpmlError, Outline};
pub use parser::{parse_feed, FeedItem, FetchedFeed};
