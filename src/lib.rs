//! feedrelay polls RSS/Atom feeds on behalf of many subscribers and relays
//! every new item to each of them exactly once.
//!
//! The pieces, in the order an item flows through them:
//!
//! - [`poller::SourcePoller`] fetches due sources and keeps their health
//! - [`identity::identify`] decides whether an item was seen before
//! - [`preview::EnrichmentPublisher`] optionally hosts a preview page
//! - [`fanout::BroadcastFanout`] renders and delivers per subscriber
//! - [`delivery::DeliveryRetrier`] retries rate-limited sends
//!
//! [`import::BulkImportCoordinator`] and [`service::SubscriptionService`]
//! manage subscriptions. Storage sits behind the traits in [`storage`].

pub mod config;
pub mod delivery;
pub mod fanout;
pub mod feed;
pub mod identity;
pub mod import;
pub mod poller;
pub mod preview;
pub mod render;
pub mod service;
pub mod storage;
pub mod util;
