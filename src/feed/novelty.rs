//! New-item detection against a subscriber's watermark.
//!
//! Items are scanned newest first. A feed whose items carry publish dates is
//! compared by timestamp; a feed without dates is compared by link. The mode
//! is fixed by the first item of the scan and never mixed within one poll.
//! Scanning stops at the first item that is not new, at the first item that
//! failed to normalize, or once the requested number of items is collected.

use super::normalize::{FeedItem, ItemError};
use crate::storage::SubscriberState;

/// What "already seen" means for one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Watermark {
    /// Items published strictly after this epoch second are new.
    Timestamp(i64),
    /// Items are new until this link is reached.
    LinkOnly(String),
}

impl Watermark {
    /// Picks the comparison mode from the newest item of the feed.
    fn for_feed(newest: &FeedItem, last_update: i64, latest_link: &str) -> Self {
        match newest.published {
            Some(_) => Self::Timestamp(last_update),
            None => Self::LinkOnly(latest_link.to_string()),
        }
    }

    fn admits(&self, item: &FeedItem) -> bool {
        match (self, item.published) {
            (Self::Timestamp(seen), Some(published)) => published > *seen,
            (Self::LinkOnly(seen), None) => item.link != *seen,
            // An item of the other kind ends the scan
            _ => false,
        }
    }
}

/// Watermark values to persist after delivering items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatermarkUpdate {
    pub last_update: i64,
    pub latest_link: String,
}

impl WatermarkUpdate {
    /// Watermark after delivering `item` on top of a stored `last_update`.
    pub fn after(item: &FeedItem, last_update: i64) -> Self {
        Self {
            last_update: item.published.map_or(last_update, |p| p.max(last_update)),
            latest_link: item.link.clone(),
        }
    }
}

/// Outcome of one novelty scan.
#[derive(Debug, Default)]
pub struct Selection {
    /// New items, newest first.
    pub items: Vec<FeedItem>,
    /// The item failure that ended the scan early, if any.
    pub failure: Option<ItemError>,
}

#[cfg(test)]
impl Selection {
    /// Watermark covering every selected item: the largest timestamp among
    /// them (never below the current one) and the link of the newest.
    fn watermark_update(&self, last_update: i64) -> Option<WatermarkUpdate> {
        let newest = self.items.first()?;
        let max_published = self
            .items
            .iter()
            .filter_map(|item| item.published)
            .fold(last_update, i64::max);

        Some(WatermarkUpdate {
            last_update: max_published,
            latest_link: newest.link.clone(),
        })
    }
}

/// Selects the unseen prefix of `items` relative to a subscriber's watermark.
///
/// `limit` caps the number of selected items; `None` selects every new item.
pub fn select_new<I>(items: I, state: &SubscriberState, limit: Option<usize>) -> Selection
where
    I: IntoIterator<Item = Result<FeedItem, ItemError>>,
{
    let mut selection = Selection::default();
    if limit == Some(0) {
        return selection;
    }

    let mut watermark: Option<Watermark> = None;

    for result in items {
        let item = match result {
            Ok(item) => item,
            Err(e) => {
                selection.failure = Some(e);
                break;
            }
        };

        let watermark = watermark
            .get_or_insert_with(|| Watermark::for_feed(&item, state.last_update, &state.latest_link));
        if !watermark.admits(&item) {
            break;
        }

        selection.items.push(item);
        if limit.is_some_and(|max| selection.items.len() >= max) {
            break;
        }
    }

    selection
}
