//! Subscription engine: the operations behind every user-facing command.
//!
//! [`Engine`] ties the [`SubscriptionStore`], the feed [`Fetcher`], a
//! [`MessageSink`] and a [`JobScheduler`] together. Every (feed, subscriber)
//! pair in the store has exactly one scheduled job, whose firings run through
//! [`Poller`].

mod poller;

pub use poller::{PollReport, Poller, UNKNOWN_CHANNEL};

use std::sync::Arc;

use futures::FutureExt;
use thiserror::Error;

use crate::feed::{FeedItem, FetchError, Fetcher, ItemError, ParseError};
use crate::scheduler::{CancelToken, CronError, CronExpr, FireFn, JobKey, JobScheduler};
use crate::sink::MessageSink;
use crate::storage::{ChannelInfo, StoreError, SubscriberState, SubscriptionStore, SubscriptionSummary};
use crate::util::{canonical_feed_url, validate_feed_url, UrlValidationError};

/// Errors that reject a single engine operation.
///
/// None of them are fatal to the engine or to other subscriptions.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Failed to read channel info: {0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Item(#[from] ItemError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cron(#[from] CronError),

    #[error("Route must start with '/': {0:?}")]
    InvalidRoute(String),

    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
}

/// Command surface over subscriptions, endpoints and scheduled jobs.
pub struct Engine {
    poller: Arc<Poller>,
    scheduler: Arc<dyn JobScheduler>,
}

impl Engine {
    pub fn new(
        store: Arc<SubscriptionStore>,
        fetcher: Fetcher,
        sink: Arc<dyn MessageSink>,
        scheduler: Arc<dyn JobScheduler>,
    ) -> Self {
        Self {
            poller: Arc::new(Poller::new(store, fetcher, sink)),
            scheduler,
        }
    }

    pub fn store(&self) -> &SubscriptionStore {
        self.poller.store()
    }

    pub fn poller(&self) -> &Arc<Poller> {
        &self.poller
    }

    /// Register one job per subscriber state found in the store.
    ///
    /// Entries with an unparseable cron expression are logged and skipped.
    /// Returns the number of jobs scheduled.
    pub fn start(&self) -> usize {
        let mut scheduled = 0;
        for (url, subscriber, state) in self.store().all_subscriber_states() {
            match state.cron_expr.parse::<CronExpr>() {
                Ok(cron) => {
                    self.scheduler
                        .schedule(JobKey::new(url, subscriber), cron, self.job());
                    scheduled += 1;
                }
                Err(e) => tracing::warn!(
                    url = %url,
                    subscriber = %subscriber,
                    error = %e,
                    "Not scheduling subscription with invalid cron expression"
                ),
            }
        }
        tracing::info!(jobs = scheduled, "Scheduler rebuilt from store");
        scheduled
    }

    // ========================================================================
    // RSSHub Endpoints
    // ========================================================================

    pub fn add_endpoint(&self, url: &str) -> Result<(), EngineError> {
        let url = canonical_feed_url(url);
        validate_feed_url(url)?;
        self.store().add_endpoint(url)?;
        Ok(())
    }

    pub fn list_endpoints(&self) -> Vec<String> {
        self.store().list_endpoints()
    }

    pub fn remove_endpoint(&self, index: usize) -> Result<String, EngineError> {
        Ok(self.store().remove_endpoint(index)?)
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Subscribe to `<endpoint><route>` for the endpoint at `endpoint_index`.
    pub async fn subscribe_via_route(
        &self,
        subscriber: &str,
        endpoint_index: usize,
        route: &str,
        cron_expr: &str,
    ) -> Result<ChannelInfo, EngineError> {
        let endpoint = self.store().endpoint(endpoint_index)?;
        if !route.starts_with('/') {
            return Err(EngineError::InvalidRoute(route.to_string()));
        }
        self.subscribe_via_url(subscriber, &format!("{endpoint}{route}"), cron_expr)
            .await
    }

    /// Subscribe to a feed URL and schedule its job.
    ///
    /// The watermark is seeded from the feed's current newest item so no
    /// backlog is delivered. Subscribing again replaces the previous schedule
    /// and watermark. Returns the channel info shown to the subscriber.
    pub async fn subscribe_via_url(
        &self,
        subscriber: &str,
        url: &str,
        cron_expr: &str,
    ) -> Result<ChannelInfo, EngineError> {
        let cron: CronExpr = cron_expr.parse()?;
        let url = canonical_feed_url(url);
        let feed_url = validate_feed_url(url)?;

        let doc = self.poller.fetcher().fetch_document(feed_url.as_str()).await?;
        let info = match self.store().get(url) {
            Ok(feed) => feed.info,
            Err(_) => ChannelInfo {
                title: doc.channel_title()?.to_string(),
                description: doc.channel_description().to_string(),
            },
        };

        let settings = self.store().settings();
        let seed = poller::newest_item(&doc, &feed_url, &info.title, &settings)?;
        let state = SubscriberState {
            cron_expr: cron.to_string(),
            last_update: seed.as_ref().and_then(|item| item.published).unwrap_or(0),
            latest_link: seed.map(|item| item.link).unwrap_or_default(),
        };

        self.store()
            .upsert_subscriber(url, info.clone(), subscriber, state)?;
        self.scheduler
            .schedule(JobKey::new(url, subscriber), cron, self.job());

        tracing::info!(url, subscriber, title = %info.title, "Subscribed");
        Ok(info)
    }

    /// The subscriber's feeds; list positions are the indices taken by
    /// [`unsubscribe`](Self::unsubscribe) and [`poll_on_demand`](Self::poll_on_demand).
    pub fn list_subscriptions(&self, subscriber: &str) -> Vec<SubscriptionSummary> {
        self.store().list_subscriptions_for(subscriber)
    }

    /// Remove the subscriber's `index`-th subscription and cancel its job.
    ///
    /// Other subscribers of the same feed are untouched; the feed entry is
    /// kept even when no subscriber is left. Returns the feed URL.
    pub fn unsubscribe(&self, subscriber: &str, index: usize) -> Result<String, EngineError> {
        let url = self.store().subscription_url_at(subscriber, index)?;

        // Cancel first so an in-flight firing cannot commit afterwards
        self.scheduler.cancel(&JobKey::new(url.as_str(), subscriber));
        self.store().remove_subscriber(&url, subscriber)?;

        tracing::info!(url = %url, subscriber, "Unsubscribed");
        Ok(url)
    }

    /// Fetch the newest item of the subscriber's `index`-th feed.
    ///
    /// Never touches the stored watermark.
    pub async fn poll_on_demand(
        &self,
        subscriber: &str,
        index: usize,
    ) -> Result<Option<FeedItem>, EngineError> {
        let url = self.store().subscription_url_at(subscriber, index)?;
        self.poller.latest_item(&url).await
    }

    fn job(&self) -> FireFn {
        let poller = Arc::clone(&self.poller);
        Arc::new(move |key: JobKey, cancel: CancelToken| {
            let poller = Arc::clone(&poller);
            async move { poller.fire(&key, &cancel).await }.boxed()
        })
    }
}
