//! Delivery of new items to every subscriber of a source.

use futures::stream::{self, StreamExt};
use std::ops::AddAssign;
use std::sync::Arc;

use crate::config::{FanoutConfig, MessageMode};
use crate::delivery::{DeliveryError, DeliveryRetrier, SendOptions};
use crate::render::{trim_description, MessageRenderer, RenderContext};
use crate::storage::{
    Content, Source, StorageError, SubscriberId, Subscription, SubscriptionRepository,
    UserRepository,
};

/// Tally of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
    pub render_failed: usize,
    /// Subscriptions removed because the recipient rejected delivery.
    pub unsubscribed: usize,
}

impl AddAssign for BroadcastReport {
    fn add_assign(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.failed += other.failed;
        self.render_failed += other.render_failed;
        self.unsubscribed += other.unsubscribed;
    }
}

/// Renders and delivers messages for (item, subscriber) pairs.
#[derive(Clone)]
pub struct BroadcastFanout {
    users: Arc<dyn UserRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    retrier: DeliveryRetrier,
    renderer: MessageRenderer,
    config: FanoutConfig,
}

impl BroadcastFanout {
    pub fn new(
        users: Arc<dyn UserRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        retrier: DeliveryRetrier,
        renderer: MessageRenderer,
        config: FanoutConfig,
    ) -> Self {
        Self {
            users,
            subscriptions,
            retrier,
            renderer,
            config,
        }
    }

    /// Sends every item to every subscription.
    ///
    /// Items reach each subscriber in order. Subscribers are served
    /// concurrently, at most `concurrency` at a time. A subscriber that
    /// rejects delivery loses its subscription to `source` and receives
    /// nothing further from this batch.
    pub async fn broadcast(
        &self,
        source: &Source,
        items: &[Content],
        subscriptions: &[Subscription],
    ) -> BroadcastReport {
        if items.is_empty() || subscriptions.is_empty() {
            return BroadcastReport::default();
        }

        tracing::info!(
            source_id = source.id,
            title = %source.title,
            subscribers = subscriptions.len(),
            items = items.len(),
            "Broadcasting new items"
        );

        let previews: Vec<Option<String>> = items
            .iter()
            .map(|c| trim_description(&c.description, self.config.preview_text))
            .collect();

        let previews = previews.as_slice();
        let reports: Vec<BroadcastReport> = stream::iter(subscriptions.iter().cloned())
            .map(|sub: Subscription| async move {
                self.deliver_items(source, items, previews, &sub).await
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut total = BroadcastReport::default();
        for report in reports {
            total += report;
        }
        tracing::debug!(source_id = source.id, ?total, "Broadcast finished");
        total
    }

    async fn deliver_items(
        &self,
        source: &Source,
        items: &[Content],
        previews: &[Option<String>],
        sub: &Subscription,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let language = self.language_of(sub.subscriber_id).await;
        let options = SendOptions {
            silent: !sub.settings.enable_notification,
            parse_mode: self.renderer.mode(),
            disable_web_page_preview: self.config.disable_web_page_preview,
        };

        for (content, preview) in items.iter().zip(previews) {
            let ctx = RenderContext {
                source_title: source.title.clone(),
                content_title: content.title.clone(),
                raw_link: content.raw_link.clone(),
                preview_text: preview.clone(),
                telegraph_url: content
                    .telegraph_url
                    .clone()
                    .filter(|url| sub.settings.enable_telegraph && !url.is_empty()),
                tags: sub.settings.tag.clone(),
                language: language.clone(),
            };

            let message = match self.renderer.render(&ctx) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(
                        subscriber_id = sub.subscriber_id,
                        content_id = content.id,
                        error = %e,
                        "Failed to render message"
                    );
                    report.render_failed += 1;
                    continue;
                }
            };

            match self.retrier.send(sub.subscriber_id, &message, &options).await {
                Ok(()) => report.delivered += 1,
                Err(e) if e.is_permanent() => {
                    self.drop_subscription(sub, &e).await;
                    report.unsubscribed += 1;
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        subscriber_id = sub.subscriber_id,
                        content_id = content.id,
                        error = %e,
                        "Failed to deliver item"
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Tells every subscriber that `source` was disabled after `threshold`
    /// consecutive failures.
    pub async fn notify_source_disabled(
        &self,
        source: &Source,
        subscriptions: &[Subscription],
        threshold: u32,
    ) -> BroadcastReport {
        let reports: Vec<BroadcastReport> = stream::iter(subscriptions.iter().cloned())
            .map(|sub: Subscription| async move { self.notify_one(source, &sub, threshold).await })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut total = BroadcastReport::default();
        for report in reports {
            total += report;
        }
        total
    }

    async fn notify_one(&self, source: &Source, sub: &Subscription, threshold: u32) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let language = self.language_of(sub.subscriber_id).await;

        let message = match self
            .renderer
            .render_source_disabled(&language, &source.title, &source.link, threshold)
        {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(subscriber_id = sub.subscriber_id, error = %e, "Failed to render notice");
                report.render_failed += 1;
                return report;
            }
        };

        let options = SendOptions {
            silent: false,
            parse_mode: MessageMode::Markdown,
            disable_web_page_preview: true,
        };
        match self.retrier.send(sub.subscriber_id, &message, &options).await {
            Ok(()) => report.delivered += 1,
            Err(e) if e.is_permanent() => {
                self.drop_subscription(sub, &e).await;
                report.unsubscribed += 1;
            }
            Err(e) => {
                tracing::warn!(subscriber_id = sub.subscriber_id, error = %e, "Failed to deliver notice");
                report.failed += 1;
            }
        }
        report
    }

    async fn language_of(&self, subscriber_id: SubscriberId) -> String {
        match self.users.get_user(subscriber_id).await {
            Ok(user) if !user.language_code.is_empty() => user.language_code,
            Ok(_) | Err(StorageError::NotFound) => self.config.default_language.clone(),
            Err(e) => {
                tracing::warn!(subscriber_id, error = %e, "Failed to load subscriber language");
                self.config.default_language.clone()
            }
        }
    }

    async fn drop_subscription(&self, sub: &Subscription, cause: &DeliveryError) {
        tracing::warn!(
            subscriber_id = sub.subscriber_id,
            source_id = sub.source_id,
            error = %cause,
            "Recipient rejected delivery, removing subscription"
        );
        match self
            .subscriptions
            .delete_subscription(sub.subscriber_id, sub.source_id)
            .await
        {
            Ok(()) | Err(StorageError::NotFound) => {}
            Err(e) => {
                tracing::warn!(
                    subscriber_id = sub.subscriber_id,
                    source_id = sub.source_id,
                    error = %e,
                    "Failed to remove subscription"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::delivery::RecordingTransport;
    use crate::render::{JsonLocalizer, Localizer};
    use crate::storage::memory::MemoryStore;
    use crate::storage::{NewSource, SourceRepository, SubscriptionSettings};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    struct Fixture {
        store: MemoryStore,
        transport: RecordingTransport,
        fanout: BroadcastFanout,
    }

    fn fixture(config: FanoutConfig) -> Fixture {
        fixture_with(config, Arc::new(JsonLocalizer::builtin("en")))
    }

    fn fixture_with(config: FanoutConfig, localizer: Arc<dyn Localizer>) -> Fixture {
        let store = MemoryStore::new();
        let transport = RecordingTransport::new();
        let fanout = BroadcastFanout::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            DeliveryRetrier::new(Arc::new(transport.clone()), RetryPolicy::default()),
            MessageRenderer::new(localizer, MessageMode::Html),
            config,
        );
        Fixture {
            store,
            transport,
            fanout,
        }
    }

    fn content(id: i64, source_id: i64, title: &str) -> Content {
        Content {
            id,
            source_id,
            hash: format!("hash-{id}"),
            title: title.into(),
            raw_link: format!("https://example.com/{id}"),
            description: "<p>Body text</p>".into(),
            telegraph_url: Some("https://telegra.ph/page".into()),
            created_at: Utc::now(),
        }
    }

    async fn subscribe(
        store: &MemoryStore,
        subscriber: SubscriberId,
        source: &Source,
        settings: SubscriptionSettings,
    ) -> Subscription {
        store
            .create_subscription(subscriber, source.id, settings)
            .await
            .unwrap()
    }

    async fn source(store: &MemoryStore) -> Source {
        store
            .create_source(NewSource {
                link: "https://example.com/feed".into(),
                title: "Example".into(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_every_pair_delivered_in_order() {
        let f = fixture(FanoutConfig::default());
        let source = source(&f.store).await;
        let subs = vec![
            subscribe(&f.store, 1, &source, SubscriptionSettings::default()).await,
            subscribe(&f.store, 2, &source, SubscriptionSettings::default()).await,
        ];
        let items = vec![content(10, source.id, "First"), content(11, source.id, "Second")];

        let report = f.fanout.broadcast(&source, &items, &subs).await;

        assert_eq!(
            report,
            BroadcastReport {
                delivered: 4,
                ..Default::default()
            }
        );
        for subscriber in [1, 2] {
            let sent = f.transport.sent_to(subscriber);
            assert_eq!(sent.len(), 2);
            assert!(sent[0].text.contains("First"));
            assert!(sent[1].text.contains("Second"));
        }
    }

    #[tokio::test]
    async fn test_subscription_settings_shape_message() {
        let f = fixture(FanoutConfig {
            preview_text: 4,
            ..FanoutConfig::default()
        });
        let source = source(&f.store).await;
        let quiet = SubscriptionSettings {
            tag: "#tag".into(),
            enable_notification: false,
            enable_telegraph: false,
            ..SubscriptionSettings::default()
        };
        let subs = vec![subscribe(&f.store, 1, &source, quiet).await];

        f.fanout
            .broadcast(&source, &[content(10, source.id, "First")], &subs)
            .await;

        let sent = f.transport.sent_to(1);
        assert!(sent[0].options.silent);
        assert!(!sent[0].text.contains("telegra.ph"));
        assert!(sent[0].text.contains("Body..."));
        assert!(sent[0].text.ends_with("#tag\n"));
    }

    #[tokio::test]
    async fn test_rejection_unsubscribes_only_that_pair() {
        let f = fixture(FanoutConfig::default());
        let source = source(&f.store).await;
        let other = f
            .store
            .create_source(NewSource {
                link: "https://other.example.com/feed".into(),
                title: "Other".into(),
            })
            .await
            .unwrap();
        let subs = vec![
            subscribe(&f.store, 1, &source, SubscriptionSettings::default()).await,
            subscribe(&f.store, 2, &source, SubscriptionSettings::default()).await,
        ];
        subscribe(&f.store, 1, &other, SubscriptionSettings::default()).await;
        f.transport.reject(1);

        let items = vec![content(10, source.id, "First"), content(11, source.id, "Second")];
        let report = f.fanout.broadcast(&source, &items, &subs).await;

        assert_eq!(report.unsubscribed, 1);
        assert_eq!(report.delivered, 2);
        assert!(matches!(
            f.store.get_subscription(1, source.id).await,
            Err(StorageError::NotFound)
        ));
        assert!(f.store.get_subscription(1, other.id).await.is_ok());
        assert!(f.store.get_subscription(2, source.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_subscriber_language_used() {
        let f = fixture(FanoutConfig::default());
        let source = source(&f.store).await;
        f.store.set_language(1, "xx").await.unwrap();
        let subs = vec![subscribe(&f.store, 1, &source, SubscriptionSettings::default()).await];

        let report = f
            .fanout
            .broadcast(&source, &[content(10, source.id, "First")], &subs)
            .await;

        // unknown language falls back key by key to English
        assert_eq!(report.delivered, 1);
        assert!(f.transport.sent_to(1)[0].text.contains("Original"));
    }

    /// English strings without the Telegraph link label.
    struct NoTelegraphLabel(JsonLocalizer);

    impl Localizer for NoTelegraphLabel {
        fn try_localize(&self, lang: &str, key: &str, args: &[&str]) -> Option<String> {
            if key == "feed_update_telegraph_link_text" {
                return None;
            }
            self.0.try_localize(lang, key, args)
        }
    }

    #[tokio::test]
    async fn test_render_failure_skips_only_that_pair() {
        let f = fixture_with(
            FanoutConfig::default(),
            Arc::new(NoTelegraphLabel(JsonLocalizer::builtin("en"))),
        );
        let source = source(&f.store).await;
        let with_preview = SubscriptionSettings {
            enable_telegraph: true,
            ..SubscriptionSettings::default()
        };
        let without_preview = SubscriptionSettings {
            enable_telegraph: false,
            ..SubscriptionSettings::default()
        };
        let subs = vec![
            subscribe(&f.store, 1, &source, with_preview).await,
            subscribe(&f.store, 2, &source, without_preview).await,
        ];

        let report = f
            .fanout
            .broadcast(&source, &[content(10, source.id, "First")], &subs)
            .await;

        assert_eq!(
            report,
            BroadcastReport {
                delivered: 1,
                render_failed: 1,
                ..Default::default()
            }
        );
        assert!(f.transport.sent_to(1).is_empty());
        assert_eq!(f.transport.sent_to(2).len(), 1);
        assert!(f.store.get_subscription(1, source.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_notify_source_disabled() {
        let f = fixture(FanoutConfig::default());
        let source = source(&f.store).await;
        let subs = vec![
            subscribe(&f.store, 1, &source, SubscriptionSettings::default()).await,
            subscribe(&f.store, 2, &source, SubscriptionSettings::default()).await,
        ];

        let report = f.fanout.notify_source_disabled(&source, &subs, 3).await;

        assert_eq!(report.delivered, 2);
        let notice = &f.transport.sent_to(2)[0];
        assert_eq!(notice.options.parse_mode, MessageMode::Markdown);
        assert!(notice.text.contains("https://example.com/feed"));
        assert!(notice.text.contains("3 times"));
    }
}
