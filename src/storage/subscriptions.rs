use super::store::SubscriptionStore;
use super::types::{
    ChannelInfo, FeedSubscription, StoreError, SubscriberState, SubscriptionSummary,
};
use crate::feed::WatermarkUpdate;

impl SubscriptionStore {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Get a feed and all of its subscribers
    pub fn get(&self, url: &str) -> Result<FeedSubscription, StoreError> {
        self.read(|doc| doc.feeds.get(url).cloned())
            .ok_or_else(|| StoreError::NotFound(url.to_string()))
    }

    /// Whether the feed has ever been subscribed
    pub fn contains(&self, url: &str) -> bool {
        self.read(|doc| doc.feeds.contains_key(url))
    }

    /// Insert or replace a feed
    pub fn put(&self, url: &str, subscription: FeedSubscription) -> Result<(), StoreError> {
        self.mutate(|doc| {
            doc.feeds.insert(url.to_string(), subscription);
            Ok(())
        })
    }

    /// Remove a feed together with all of its subscribers
    pub fn remove(&self, url: &str) -> Result<FeedSubscription, StoreError> {
        self.mutate(|doc| {
            doc.feeds
                .remove(url)
                .ok_or_else(|| StoreError::NotFound(url.to_string()))
        })
    }

    /// Feeds the subscriber is subscribed to, ordered by URL.
    ///
    /// Positions in this list are the indices accepted by
    /// [`subscription_url_at`](Self::subscription_url_at).
    pub fn list_subscriptions_for(&self, subscriber: &str) -> Vec<SubscriptionSummary> {
        self.read(|doc| {
            doc.feeds
                .iter()
                .filter(|(_, feed)| feed.subscribers.contains_key(subscriber))
                .map(|(url, feed)| SubscriptionSummary {
                    url: url.clone(),
                    title: feed.info.title.clone(),
                    description: feed.info.description.clone(),
                })
                .collect()
        })
    }

    /// URL of the subscriber's `index`-th subscription
    pub fn subscription_url_at(&self, subscriber: &str, index: usize) -> Result<String, StoreError> {
        let subscriptions = self.list_subscriptions_for(subscriber);
        let len = subscriptions.len();
        subscriptions
            .into_iter()
            .nth(index)
            .map(|s| s.url)
            .ok_or(StoreError::IndexOutOfRange { index, len })
    }

    // ========================================================================
    // Subscriber Operations
    // ========================================================================

    /// Add or replace one subscriber's state.
    ///
    /// The feed entry is created with `info` on first use; an existing entry
    /// keeps its cached channel info.
    pub fn upsert_subscriber(
        &self,
        url: &str,
        info: ChannelInfo,
        subscriber: &str,
        state: SubscriberState,
    ) -> Result<(), StoreError> {
        self.mutate(|doc| {
            doc.feeds
                .entry(url.to_string())
                .or_insert_with(|| FeedSubscription {
                    info,
                    ..FeedSubscription::default()
                })
                .subscribers
                .insert(subscriber.to_string(), state);
            Ok(())
        })
    }

    /// Remove exactly one subscriber from a feed.
    ///
    /// The feed entry itself stays, even when this was its last subscriber.
    pub fn remove_subscriber(&self, url: &str, subscriber: &str) -> Result<SubscriberState, StoreError> {
        self.mutate(|doc| {
            doc.feeds
                .get_mut(url)
                .and_then(|feed| feed.subscribers.remove(subscriber))
                .ok_or_else(|| StoreError::NotFound(format!("{subscriber} on {url}")))
        })
    }

    pub fn subscriber_state(&self, url: &str, subscriber: &str) -> Option<SubscriberState> {
        self.read(|doc| {
            doc.feeds
                .get(url)
                .and_then(|feed| feed.subscribers.get(subscriber))
                .cloned()
        })
    }

    /// Every (feed URL, subscriber, state) triple, for rebuilding schedules.
    pub fn all_subscriber_states(&self) -> Vec<(String, String, SubscriberState)> {
        self.read(|doc| {
            doc.feeds
                .iter()
                .flat_map(|(url, feed)| {
                    feed.subscribers
                        .iter()
                        .map(move |(id, state)| (url.clone(), id.clone(), state.clone()))
                })
                .collect()
        })
    }

    /// Persist a watermark after a delivery.
    ///
    /// Returns `Ok(false)` without writing anything when the subscriber is no
    /// longer subscribed. The stored timestamp never moves backwards.
    pub fn commit_watermark(
        &self,
        url: &str,
        subscriber: &str,
        update: &WatermarkUpdate,
    ) -> Result<bool, StoreError> {
        let mut guard = self.lock();
        let subscribed = guard
            .feeds
            .get(url)
            .is_some_and(|feed| feed.subscribers.contains_key(subscriber));
        if !subscribed {
            tracing::debug!(url, subscriber, "Dropping watermark for removed subscription");
            return Ok(false);
        }

        let mut next = guard.clone();
        if let Some(state) = next
            .feeds
            .get_mut(url)
            .and_then(|feed| feed.subscribers.get_mut(subscriber))
        {
            state.last_update = state.last_update.max(update.last_update);
            state.latest_link.clone_from(&update.latest_link);
        }
        self.commit(&mut guard, next)?;
        Ok(true)
    }
}
