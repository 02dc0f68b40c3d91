//! Shared fixtures: a recording sink, a manually driven scheduler and an
//! engine wired to a mock HTTP server.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feedwatch::engine::Engine;
use feedwatch::feed::Fetcher;
use feedwatch::scheduler::{CancelToken, CronExpr, FireFn, JobKey, JobScheduler};
use feedwatch::sink::{MessageSink, SinkError};
use feedwatch::storage::{MemoryPersistence, SubscriptionStore};

/// 2024-01-01T00:00:00Z
pub const T0: i64 = 1_704_067_200;
pub const HOUR: i64 = 3600;
pub const EVERY_FIVE_MINUTES: &str = "*/5 * * * *";

// ============================================================================
// Recording Sink
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub subscriber: String,
    pub text: String,
    pub render_as_image: bool,
}

/// Records every message; deliveries numbered `fail_from` and later fail.
pub struct RecordingSink {
    messages: Mutex<Vec<Delivered>>,
    attempts: AtomicUsize,
    fail_from: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            fail_from: AtomicUsize::new(usize::MAX),
        }
    }

    /// Let `ok` more deliveries through, then reject the rest.
    pub fn fail_after(&self, ok: usize) {
        let attempts = self.attempts.load(Ordering::SeqCst);
        self.fail_from.store(attempts + ok, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.fail_from.store(usize::MAX, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<Delivered> {
        self.messages.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.text).collect()
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn deliver(
        &self,
        subscriber: &str,
        text: &str,
        render_as_image: bool,
    ) -> Result<(), SinkError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt >= self.fail_from.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected("sink offline".to_string()));
        }
        self.messages.lock().unwrap().push(Delivered {
            subscriber: subscriber.to_string(),
            text: text.to_string(),
            render_as_image,
        });
        Ok(())
    }
}

// ============================================================================
// Manual Scheduler
// ============================================================================

/// Stores jobs without timers; tests trigger firings explicitly.
#[derive(Default)]
pub struct ManualScheduler {
    jobs: Mutex<BTreeMap<JobKey, (CronExpr, FireFn)>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cron_of(&self, key: &JobKey) -> Option<String> {
        self.jobs
            .lock()
            .unwrap()
            .get(key)
            .map(|(cron, _)| cron.to_string())
    }

    /// Run one firing of the job registered under `key` to completion.
    pub async fn fire(&self, key: &JobKey) {
        let job = self
            .jobs
            .lock()
            .unwrap()
            .get(key)
            .map(|(_, job)| Arc::clone(job))
            .expect("job is scheduled");
        job(key.clone(), CancelToken::new()).await;
    }
}

impl JobScheduler for ManualScheduler {
    fn schedule(&self, key: JobKey, cron: CronExpr, job: FireFn) {
        self.jobs.lock().unwrap().insert(key, (cron, job));
    }

    fn cancel(&self, key: &JobKey) -> bool {
        self.jobs.lock().unwrap().remove(key).is_some()
    }

    fn scheduled(&self) -> Vec<JobKey> {
        self.jobs.lock().unwrap().keys().cloned().collect()
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub server: MockServer,
    pub store: Arc<SubscriptionStore>,
    pub sink: Arc<RecordingSink>,
    pub scheduler: Arc<ManualScheduler>,
    pub engine: Engine,
}

impl Harness {
    pub async fn new() -> Self {
        let store = SubscriptionStore::open(MemoryPersistence::new()).unwrap();
        Self::with_store(Arc::new(store)).await
    }

    pub async fn with_store(store: Arc<SubscriptionStore>) -> Self {
        let server = MockServer::start().await;
        let sink = Arc::new(RecordingSink::new());
        let scheduler = Arc::new(ManualScheduler::new());
        let engine = Engine::new(
            Arc::clone(&store),
            test_fetcher(),
            sink.clone(),
            scheduler.clone(),
        );
        Self {
            server,
            store,
            sink,
            scheduler,
            engine,
        }
    }

    pub fn url(&self, route: &str) -> String {
        format!("{}{}", self.server.uri(), route)
    }

    /// Replace whatever the server returns for `route` with `body`.
    pub async fn serve(&self, route: &str, body: String) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(body)
                    .insert_header("content-type", "application/rss+xml"),
            )
            .mount(&self.server)
            .await;
    }

    pub async fn serve_status(&self, route: &str, status: u16) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }
}

pub fn test_fetcher() -> Fetcher {
    Fetcher::new(reqwest::Client::new(), Duration::from_secs(5), 1024 * 1024)
}

// ============================================================================
// Feed Builders
// ============================================================================

/// One `<item>`. `n` picks the title, link, body and (when dated) an
/// hourly publish time after [`T0`].
pub fn item(n: i64, dated: bool) -> String {
    let date = if dated {
        format!("<pubDate>{}</pubDate>", rss_date(T0 + n * HOUR))
    } else {
        String::new()
    };
    format!(
        "<item><title>Post {n}</title><link>https://example.com/posts/{n}</link>\
         <description>&lt;p&gt;Body {n}&lt;/p&gt;</description>{date}</item>"
    )
}

/// RSS 2.0 document titled "Example" holding `items` in the given order.
pub fn rss(items: &[String]) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel>
<title>Example</title><link>https://example.com</link><description>An example feed</description>
{}
</channel></rss>"#,
        items.join("\n")
    )
}

/// Dated items in the given order, e.g. `dated_feed(&[3, 2, 1])`.
pub fn dated_feed(ns: &[i64]) -> String {
    rss(&ns.iter().map(|&n| item(n, true)).collect::<Vec<_>>())
}

pub fn rss_date(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .unwrap()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// The message a scheduled poll sends for item `n` of the "Example" feed.
pub fn update_message(n: i64) -> String {
    format!(
        "Channel Example has updates!\n---\nTitle: Post {n}\nLink: https://example.com/posts/{n}\n---\nBody {n}\n"
    )
}
