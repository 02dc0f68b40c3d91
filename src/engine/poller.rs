//! One firing of a subscription job.

use std::sync::Arc;

use url::Url;

use super::EngineError;
use crate::feed::{select_new, FeedDocument, FeedItem, Fetcher, ItemError, Normalizer, Selection, WatermarkUpdate};
use crate::scheduler::{CancelToken, JobKey};
use crate::sink::{render_item_failure, render_update, MessageSink};
use crate::storage::{Settings, SubscriberState, SubscriptionStore};
use crate::util::validate_feed_url;

/// Channel title shown for feeds that have no cached channel info.
pub const UNKNOWN_CHANNEL: &str = "Unknown channel";

/// What one scheduled poll did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Items delivered and committed.
    pub delivered: usize,
    /// The item failure that cut the scan short, if any.
    pub item_failure: Option<ItemError>,
}

/// Runs the fetch → normalize → select → deliver → commit pipeline.
pub struct Poller {
    store: Arc<SubscriptionStore>,
    fetcher: Fetcher,
    sink: Arc<dyn MessageSink>,
}

impl Poller {
    pub fn new(store: Arc<SubscriptionStore>, fetcher: Fetcher, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            store,
            fetcher,
            sink,
        }
    }

    pub fn store(&self) -> &Arc<SubscriptionStore> {
        &self.store
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Entry point for the scheduler. Never fails; every outcome is logged.
    pub async fn fire(&self, key: &JobKey, cancel: &CancelToken) {
        tracing::info!(url = %key.url, subscriber = %key.subscriber, "Feed job fired");

        match self.poll(key, cancel).await {
            Ok(report) => tracing::debug!(
                url = %key.url,
                subscriber = %key.subscriber,
                delivered = report.delivered,
                "Feed job finished"
            ),
            Err(EngineError::Fetch(e)) => tracing::warn!(
                url = %key.url,
                subscriber = %key.subscriber,
                error = %e,
                "Failed to fetch feed, skipping until next run"
            ),
            Err(e) => tracing::error!(
                url = %key.url,
                subscriber = %key.subscriber,
                error = %e,
                "Feed job failed"
            ),
        }
    }

    /// Delivers every unseen item, oldest first, committing the watermark
    /// after each successful delivery.
    ///
    /// Stops without error at the first failed delivery, when the job is
    /// cancelled, or when the subscription disappears mid-firing.
    pub async fn poll(&self, key: &JobKey, cancel: &CancelToken) -> Result<PollReport, EngineError> {
        let mut report = PollReport::default();

        let Some(state) = self.store.subscriber_state(&key.url, &key.subscriber) else {
            tracing::debug!(url = %key.url, subscriber = %key.subscriber, "Subscription gone, nothing to poll");
            return Ok(report);
        };
        let settings = self.store.settings();

        let feed_url = validate_feed_url(&key.url)?;
        let doc = self.fetcher.fetch_document(feed_url.as_str()).await?;
        let chan_title = self.channel_title(&key.url);
        let selection = select_items(&doc, &feed_url, &chan_title, &settings, &state, settings.batch_limit());

        if cancel.is_cancelled() {
            return Ok(report);
        }

        if let Some(error) = &selection.failure {
            tracing::error!(url = %key.url, subscriber = %key.subscriber, error = %error, "Failed to parse feed item");
            let notice = render_item_failure(&key.url, error);
            if let Err(e) = self.sink.deliver(&key.subscriber, &notice, false).await {
                tracing::warn!(subscriber = %key.subscriber, error = %e, "Failed to send parse failure notice");
            }
            report.item_failure = selection.failure.clone();
        }

        let mut last_update = state.last_update;
        for item in selection.items.iter().rev() {
            if cancel.is_cancelled() {
                tracing::debug!(url = %key.url, subscriber = %key.subscriber, "Job cancelled mid-firing");
                break;
            }

            if let Err(e) = self
                .sink
                .deliver(&key.subscriber, &render_update(item), settings.t2i)
                .await
            {
                tracing::warn!(
                    url = %key.url,
                    subscriber = %key.subscriber,
                    link = %item.link,
                    error = %e,
                    "Delivery failed, watermark stays before this item"
                );
                break;
            }

            let update = WatermarkUpdate::after(item, last_update);
            if cancel.is_cancelled()
                || !self.store.commit_watermark(&key.url, &key.subscriber, &update)?
            {
                break;
            }
            last_update = update.last_update;
            report.delivered += 1;
        }

        if report.delivered > 0 {
            tracing::info!(
                url = %key.url,
                subscriber = %key.subscriber,
                delivered = report.delivered,
                "Delivered new items"
            );
        }
        Ok(report)
    }

    /// The newest item of a feed, ignoring any watermark.
    ///
    /// A feed with no items yields `None`; an unreadable newest item is an
    /// error.
    pub async fn latest_item(&self, url: &str) -> Result<Option<FeedItem>, EngineError> {
        let feed_url = validate_feed_url(url)?;
        let doc = self.fetcher.fetch_document(feed_url.as_str()).await?;
        newest_item(&doc, &feed_url, &self.channel_title(url), &self.store.settings())
    }

    fn channel_title(&self, url: &str) -> String {
        self.store
            .get(url)
            .map(|feed| feed.info.title)
            .unwrap_or_else(|_| UNKNOWN_CHANNEL.to_string())
    }
}

/// Normalizes items lazily and runs the novelty scan over them.
fn select_items(
    doc: &FeedDocument,
    feed_url: &Url,
    chan_title: &str,
    settings: &Settings,
    state: &SubscriberState,
    limit: Option<usize>,
) -> Selection {
    let normalizer = Normalizer::new(feed_url, chan_title, settings);
    select_new(
        doc.items.iter().map(|raw| normalizer.normalize(raw)),
        state,
        limit,
    )
}

/// The first item of the document as a blank watermark would see it.
pub(super) fn newest_item(
    doc: &FeedDocument,
    feed_url: &Url,
    chan_title: &str,
    settings: &Settings,
) -> Result<Option<FeedItem>, EngineError> {
    let selection = select_items(doc, feed_url, chan_title, settings, &SubscriberState::default(), Some(1));
    match (selection.items.into_iter().next(), selection.failure) {
        (Some(item), _) => Ok(Some(item)),
        (None, Some(error)) => Err(error.into()),
        (None, None) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::parse_document;
    use pretty_assertions::assert_eq;

    fn doc(xml: &str) -> FeedDocument {
        parse_document(xml.as_bytes()).unwrap()
    }

    #[test]
    fn test_newest_item_ignores_watermark() {
        let feed = doc(r#"<rss><channel><title>C</title>
            <item><title>New</title><link>/2</link><description>d</description><pubDate>Tue, 02 Jan 2024 00:00:00 GMT</pubDate></item>
            <item><title>Old</title><link>/1</link><description>d</description><pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate></item>
        </channel></rss>"#);
        let url = Url::parse("https://a.com/feed").unwrap();

        let item = newest_item(&feed, &url, "C", &Settings::default()).unwrap().unwrap();
        assert_eq!(item.title, "New");
        assert_eq!(item.link, "https://a.com/2");
        assert_eq!(item.published, Some(1_704_153_600));
    }

    #[test]
    fn test_newest_item_of_empty_feed() {
        let feed = doc("<rss><channel><title>C</title></channel></rss>");
        let url = Url::parse("https://a.com/feed").unwrap();
        assert_eq!(newest_item(&feed, &url, "C", &Settings::default()).unwrap(), None);
    }

    #[test]
    fn test_newest_item_unreadable() {
        let feed = doc(r#"<rss><channel><title>C</title>
            <item><title>No link</title><description>d</description></item>
        </channel></rss>"#);
        let url = Url::parse("https://a.com/feed").unwrap();

        let result = newest_item(&feed, &url, "C", &Settings::default());
        assert!(matches!(result, Err(EngineError::Item(_))));
    }
}
