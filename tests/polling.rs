//! Integration tests for scheduled polling and on-demand reads.
//!
//! Firings are triggered by hand through the manual scheduler, so each test
//! controls exactly when the feed is fetched and what it contains.

mod common;

use common::*;
use pretty_assertions::assert_eq;

use feedwatch::engine::EngineError;
use feedwatch::scheduler::{CancelToken, JobKey};
use feedwatch::storage::{Settings, SubscriberState};

/// Harness with "alice" subscribed to `/feed` while it holds `initial`.
async fn subscribed(initial: String) -> (Harness, JobKey) {
    let h = Harness::new().await;
    h.serve("/feed", initial).await;
    let url = h.url("/feed");
    h.engine
        .subscribe_via_url("alice", &url, EVERY_FIVE_MINUTES)
        .await
        .unwrap();
    (h, JobKey::new(url, "alice"))
}

fn state_of(h: &Harness, key: &JobKey) -> SubscriberState {
    h.store.subscriber_state(&key.url, &key.subscriber).unwrap()
}

// ============================================================================
// Scheduled Poll Tests
// ============================================================================

#[tokio::test]
async fn test_poll_delivers_new_items_oldest_first() {
    let (h, key) = subscribed(dated_feed(&[2, 1])).await;
    h.serve("/feed", dated_feed(&[4, 3, 2, 1])).await;

    h.scheduler.fire(&key).await;

    assert_eq!(h.sink.texts(), vec![update_message(3), update_message(4)]);
    assert!(h.sink.messages().iter().all(|m| m.subscriber == "alice"));
    assert_eq!(
        state_of(&h, &key),
        SubscriberState {
            cron_expr: EVERY_FIVE_MINUTES.to_string(),
            last_update: T0 + 4 * HOUR,
            latest_link: "https://example.com/posts/4".to_string(),
        }
    );
}

#[tokio::test]
async fn test_poll_twice_delivers_once() {
    let (h, key) = subscribed(dated_feed(&[1])).await;
    h.serve("/feed", dated_feed(&[2, 1])).await;

    h.scheduler.fire(&key).await;
    h.scheduler.fire(&key).await;

    assert_eq!(h.sink.texts(), vec![update_message(2)]);
}

#[tokio::test]
async fn test_poll_without_new_items_is_quiet() {
    let (h, key) = subscribed(dated_feed(&[2, 1])).await;
    let before = state_of(&h, &key);

    h.scheduler.fire(&key).await;

    assert!(h.sink.messages().is_empty());
    assert_eq!(state_of(&h, &key), before);
}

#[tokio::test]
async fn test_poll_caps_batch_at_newest_items() {
    let (h, key) = subscribed(dated_feed(&[1])).await;
    h.serve("/feed", dated_feed(&[6, 5, 4, 3, 2, 1])).await;

    h.scheduler.fire(&key).await;

    // Default cap is 3; older unseen items are skipped for good
    assert_eq!(
        h.sink.texts(),
        vec![update_message(4), update_message(5), update_message(6)]
    );
    assert_eq!(state_of(&h, &key).last_update, T0 + 6 * HOUR);

    h.scheduler.fire(&key).await;
    assert_eq!(h.sink.messages().len(), 3);
}

#[tokio::test]
async fn test_poll_unbounded_batch() {
    let (h, key) = subscribed(dated_feed(&[1])).await;
    h.store
        .update_settings(Settings {
            max_items_per_poll: 0,
            ..Settings::default()
        })
        .unwrap();
    h.serve("/feed", dated_feed(&[6, 5, 4, 3, 2, 1])).await;

    h.scheduler.fire(&key).await;

    assert_eq!(h.sink.messages().len(), 5);
}

#[tokio::test]
async fn test_delivery_failure_holds_watermark() {
    let (h, key) = subscribed(dated_feed(&[1])).await;
    h.serve("/feed", dated_feed(&[4, 3, 2, 1])).await;
    h.sink.fail_after(1);

    h.scheduler.fire(&key).await;

    assert_eq!(h.sink.texts(), vec![update_message(2)]);
    assert_eq!(state_of(&h, &key).last_update, T0 + 2 * HOUR);
    assert_eq!(state_of(&h, &key).latest_link, "https://example.com/posts/2");

    // Undelivered items go out on the next firing
    h.sink.heal();
    h.scheduler.fire(&key).await;

    assert_eq!(
        h.sink.texts(),
        vec![update_message(2), update_message(3), update_message(4)]
    );
    assert_eq!(state_of(&h, &key).last_update, T0 + 4 * HOUR);
}

#[tokio::test]
async fn test_item_failure_notifies_and_delivers_prefix() {
    let (h, key) = subscribed(dated_feed(&[1])).await;
    let broken = "<item><title>Broken</title><link>https://example.com/broken</link>\
                  <description>x</description><pubDate>yesterday-ish</pubDate></item>"
        .to_string();
    h.serve("/feed", rss(&[item(3, true), broken, item(2, true), item(1, true)]))
        .await;

    h.scheduler.fire(&key).await;

    let texts = h.sink.texts();
    assert_eq!(texts.len(), 2);
    assert!(
        texts[0].starts_with(&format!("feed task: failed to parse {}: ", key.url)),
        "unexpected notice: {}",
        texts[0]
    );
    assert!(texts[0].contains("yesterday-ish"));
    assert_eq!(texts[1], update_message(3));
    assert_eq!(state_of(&h, &key).last_update, T0 + 3 * HOUR);
}

#[tokio::test]
async fn test_fetch_failure_leaves_state_untouched() {
    let (h, key) = subscribed(dated_feed(&[1])).await;
    let before = state_of(&h, &key);
    h.serve_status("/feed", 503).await;

    let result = h.engine.poller().poll(&key, &CancelToken::new()).await;

    assert!(matches!(result, Err(EngineError::Fetch(_))));
    assert!(h.sink.messages().is_empty());
    assert_eq!(state_of(&h, &key), before);

    // The job survives and picks up once the feed recovers
    h.serve("/feed", dated_feed(&[2, 1])).await;
    h.scheduler.fire(&key).await;
    assert_eq!(h.sink.texts(), vec![update_message(2)]);
}

#[tokio::test]
async fn test_poll_undated_feed_uses_links() {
    let (h, key) = subscribed(rss(&[item(2, false), item(1, false)])).await;
    assert_eq!(state_of(&h, &key).last_update, 0);
    assert_eq!(state_of(&h, &key).latest_link, "https://example.com/posts/2");

    h.serve("/feed", rss(&[item(4, false), item(3, false), item(2, false)]))
        .await;
    h.scheduler.fire(&key).await;

    assert_eq!(h.sink.texts(), vec![update_message(3), update_message(4)]);
    assert_eq!(state_of(&h, &key).latest_link, "https://example.com/posts/4");
    assert_eq!(state_of(&h, &key).last_update, 0);
}

#[tokio::test]
async fn test_poll_passes_image_setting_to_sink() {
    let (h, key) = subscribed(dated_feed(&[1])).await;
    h.store
        .update_settings(Settings {
            t2i: true,
            ..Settings::default()
        })
        .unwrap();
    h.serve("/feed", dated_feed(&[2, 1])).await;

    h.scheduler.fire(&key).await;

    let messages = h.sink.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].render_as_image);
}

#[tokio::test]
async fn test_cancelled_poll_delivers_nothing() {
    let (h, key) = subscribed(dated_feed(&[1])).await;
    h.serve("/feed", dated_feed(&[2, 1])).await;
    let cancel = CancelToken::new();
    cancel.cancel();

    let report = h.engine.poller().poll(&key, &cancel).await.unwrap();

    assert_eq!(report.delivered, 0);
    assert!(h.sink.messages().is_empty());
    assert_eq!(state_of(&h, &key).last_update, T0 + HOUR);
}

#[tokio::test]
async fn test_poll_after_unsubscribe_is_noop() {
    let (h, key) = subscribed(dated_feed(&[1])).await;
    h.serve("/feed", dated_feed(&[2, 1])).await;
    h.engine.unsubscribe("alice", 0).unwrap();

    let report = h.engine.poller().poll(&key, &CancelToken::new()).await.unwrap();

    assert_eq!(report.delivered, 0);
    assert!(h.sink.messages().is_empty());
    assert!(h.store.subscriber_state(&key.url, "alice").is_none());
}

#[tokio::test]
async fn test_subscribers_keep_separate_watermarks() {
    let (h, alice) = subscribed(dated_feed(&[1])).await;
    h.serve("/feed", dated_feed(&[2, 1])).await;
    h.engine
        .subscribe_via_url("bob", &alice.url, EVERY_FIVE_MINUTES)
        .await
        .unwrap();
    let bob = JobKey::new(alice.url.as_str(), "bob");

    h.serve("/feed", dated_feed(&[3, 2, 1])).await;
    h.scheduler.fire(&alice).await;
    h.scheduler.fire(&bob).await;

    let for_alice: Vec<_> = h
        .sink
        .messages()
        .into_iter()
        .filter(|m| m.subscriber == "alice")
        .map(|m| m.text)
        .collect();
    let for_bob: Vec<_> = h
        .sink
        .messages()
        .into_iter()
        .filter(|m| m.subscriber == "bob")
        .map(|m| m.text)
        .collect();
    assert_eq!(for_alice, vec![update_message(2), update_message(3)]);
    assert_eq!(for_bob, vec![update_message(3)]);
}

// ============================================================================
// On-Demand Tests
// ============================================================================

#[tokio::test]
async fn test_on_demand_returns_newest_without_touching_state() {
    let (h, key) = subscribed(dated_feed(&[1])).await;
    h.serve("/feed", dated_feed(&[3, 2, 1])).await;
    let before = state_of(&h, &key);

    let item = h.engine.poll_on_demand("alice", 0).await.unwrap().unwrap();

    assert_eq!(item.title, "Post 3");
    assert_eq!(item.link, "https://example.com/posts/3");
    assert_eq!(item.chan_title, "Example");
    assert_eq!(item.published, Some(T0 + 3 * HOUR));
    assert_eq!(state_of(&h, &key), before);
    assert!(h.sink.messages().is_empty());

    // The scheduled poll still sees both unseen items
    h.scheduler.fire(&key).await;
    assert_eq!(h.sink.texts(), vec![update_message(2), update_message(3)]);
}

#[tokio::test]
async fn test_on_demand_empty_feed() {
    let (h, _key) = subscribed(dated_feed(&[1])).await;
    h.serve("/feed", rss(&[])).await;

    assert_eq!(h.engine.poll_on_demand("alice", 0).await.unwrap(), None);
}

#[tokio::test]
async fn test_on_demand_unknown_index() {
    let (h, _key) = subscribed(dated_feed(&[1])).await;

    let result = h.engine.poll_on_demand("alice", 5).await;

    assert!(matches!(result, Err(EngineError::Store(_))));
}
