//! Delivery of rendered messages to subscribers.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::feed::{FeedItem, ItemError};
use crate::util::strip_control_chars;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to write message: {0}")]
    Io(#[from] std::io::Error),

    #[error("Message rejected: {0}")]
    Rejected(String),
}

/// Where rendered messages go.
///
/// A failed delivery is never retried by the engine; the watermark simply
/// does not advance past the undelivered item.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn deliver(
        &self,
        subscriber: &str,
        text: &str,
        render_as_image: bool,
    ) -> Result<(), SinkError>;
}

/// Message for an item found by a scheduled poll.
pub fn render_update(item: &FeedItem) -> String {
    format!(
        "Channel {} has updates!\n---\nTitle: {}\nLink: {}\n---\n{}\n",
        item.chan_title, item.title, item.link, item.description
    )
}

/// Reply to an on-demand request for a feed's newest item.
pub fn render_latest(item: &FeedItem) -> String {
    format!(
        "Channel {} latest feed\n---\nTitle: {}\nLink: {}\n---\n{}\n",
        item.chan_title, item.title, item.link, item.description
    )
}

/// Out-of-band notice sent when an item of a feed cannot be read.
pub fn render_item_failure(url: &str, error: &ItemError) -> String {
    format!("feed task: failed to parse {url}: {error}")
}

/// Prints each message to stdout under a header naming the subscriber.
pub struct StdoutSink {
    out: Mutex<tokio::io::Stdout>,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageSink for StdoutSink {
    async fn deliver(
        &self,
        subscriber: &str,
        text: &str,
        render_as_image: bool,
    ) -> Result<(), SinkError> {
        let mut message = format!(
            "==> {}{}\n",
            strip_control_chars(subscriber),
            if render_as_image { " [image]" } else { "" }
        );
        message.push_str(&strip_control_chars(text));
        if !message.ends_with('\n') {
            message.push('\n');
        }

        // One write per message so concurrent firings never interleave
        let mut out = self.out.lock().await;
        out.write_all(message.as_bytes()).await?;
        out.flush().await?;
        Ok(())
    }
}
