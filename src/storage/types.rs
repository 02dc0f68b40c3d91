use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors from the persistence provider.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Failed to access state file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid state document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by [`SubscriptionStore`](super::SubscriptionStore) operations.
///
/// None of these are fatal: they reject a single operation and leave the
/// store unchanged.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unknown feed URL or subscriber.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Positional index past the end of an endpoint or subscription list.
    #[error("Index {index} out of range (have {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// The mutated document could not be written; the mutation was discarded.
    #[error("Failed to persist state: {0}")]
    Persist(#[from] PersistError),
}

// ============================================================================
// Data Structures
// ============================================================================

/// Channel metadata fetched once when the feed is first subscribed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub title: String,
    pub description: String,
}

/// Per-(feed, subscriber) schedule and watermark.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberState {
    /// 5-field cron expression driving this subscriber's polls.
    pub cron_expr: String,
    /// Publish timestamp (epoch seconds) of the newest delivered item.
    #[serde(deserialize_with = "epoch_seconds")]
    pub last_update: i64,
    /// Link of the newest delivered item; used when the feed has no dates.
    pub latest_link: String,
}

/// A feed and everyone subscribed to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSubscription {
    pub info: ChannelInfo,
    #[serde(default)]
    pub subscribers: BTreeMap<String, SubscriberState>,
}

/// Settings applied uniformly to every subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Titles longer than this many code points are truncated.
    pub title_max_length: usize,
    /// Cleaned descriptions longer than this many code points are truncated.
    pub description_max_length: usize,
    /// Ask the message sink to render deliveries as images.
    pub t2i: bool,
    /// Upper bound on items delivered per scheduled firing (0 = no bound).
    pub max_items_per_poll: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            title_max_length: 30,
            description_max_length: 300,
            t2i: false,
            max_items_per_poll: 3,
        }
    }
}

impl Settings {
    /// Batch cap for scheduled polls, `None` when unbounded.
    pub fn batch_limit(&self) -> Option<usize> {
        (self.max_items_per_poll > 0).then_some(self.max_items_per_poll)
    }
}

/// The whole persisted state.
///
/// Serialized as one JSON object: the two reserved keys `rsshub_endpoints`
/// and `settings`, and one key per feed URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDocument {
    #[serde(default)]
    pub rsshub_endpoints: Vec<String>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(flatten)]
    pub feeds: BTreeMap<String, FeedSubscription>,
}

/// Summary row for listing a subscriber's feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSummary {
    pub url: String,
    pub title: String,
    pub description: String,
}

/// Older state files may hold float timestamps; keep the whole seconds.
fn epoch_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Int(i64),
        Float(f64),
    }

    Ok(match Seconds::deserialize(deserializer)? {
        Seconds::Int(secs) => secs,
        Seconds::Float(secs) => secs as i64,
    })
}
