//! Cron-scheduled RSS/Atom polling with per-subscriber incremental delivery.
//!
//! Each (feed, subscriber) pair keeps a watermark: the publish time of the
//! newest delivered item, or its link when the feed carries no dates. A
//! scheduled poll delivers only what lies beyond the watermark and commits
//! the new watermark after every delivered item, so nothing is delivered
//! twice and nothing is lost across restarts.

pub mod config;
pub mod engine;
pub mod feed;
pub mod scheduler;
pub mod sink;
pub mod storage;
pub mod util;
