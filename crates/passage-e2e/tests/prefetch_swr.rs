//! Prefetch cache behavior: TTL boundaries, stale-while-revalidate,
//! in-flight dedup, serve-once entries, and manual flushes.

use passage::{CacheFor, PrefetchMode, TickSpan, VisitIntent};
use passage_e2e::harness::{self, Driver};
use serde_json::json;

fn home() -> passage::Page {
    harness::page("Home", "/", json!({}))
}

fn feed_intent(bounds: CacheFor) -> VisitIntent {
    let mut intent = VisitIntent::get("/feed");
    intent.prefetch = Some(PrefetchMode::Hover);
    intent.cache_for = Some(bounds);
    intent
}

#[test]
fn ttl_boundary_stale_hit_then_expiry() {
    let mut driver = Driver::new(home());
    let bounds = CacheFor::pair(TickSpan::from_secs(1), TickSpan::from_secs(3)).expect("bounds");

    let prefetch_token = driver
        .engine
        .prefetch(feed_intent(bounds))
        .expect("prefetch")
        .expect("token");
    driver
        .respond(prefetch_token, &harness::page("Feed", "/feed", json!({ "n": 1 })))
        .expect("respond");
    assert_eq!(driver.transport.dispatched_count(), 1);
    assert_eq!(driver.engine.page().component, "Home", "prefetch never applies");

    // t = 1.5s: between stale and expiry. The visit is served immediately
    // from cache and exactly one revalidation goes out.
    driver.advance_to(1_500).expect("clock");
    driver
        .engine
        .submit(feed_intent(bounds))
        .expect("submit")
        .expect("token");
    assert_eq!(driver.engine.page().component, "Feed");
    assert_eq!(driver.engine.page().props.get("n"), Some(&json!(1)));
    assert_eq!(driver.transport.dispatched_count(), 2);

    // A second stale consumer shares the in-flight revalidation.
    let shared = driver.engine.submit(feed_intent(bounds)).expect("submit");
    assert!(shared.is_some());
    assert_eq!(driver.transport.dispatched_count(), 2);

    // t = 3.5s: past expiry. The entry is unusable; the visit goes to the
    // network.
    driver.advance_to(3_500).expect("clock");
    driver
        .engine
        .submit(feed_intent(bounds))
        .expect("submit")
        .expect("token");
    assert_eq!(driver.transport.dispatched_count(), 3);
}

#[test]
fn revalidation_result_refreshes_the_applied_page() {
    let mut driver = Driver::new(home());
    let bounds = CacheFor::pair(TickSpan::from_secs(1), TickSpan::from_secs(60)).expect("bounds");

    let prefetch_token = driver
        .engine
        .prefetch(feed_intent(bounds))
        .expect("prefetch")
        .expect("token");
    driver
        .respond(prefetch_token, &harness::page("Feed", "/feed", json!({ "n": 1 })))
        .expect("respond");

    driver.advance_to(2_000).expect("clock");
    driver
        .engine
        .submit(feed_intent(bounds))
        .expect("submit")
        .expect("token");
    assert_eq!(driver.engine.page().props.get("n"), Some(&json!(1)));

    // The background revalidation resolves with fresh data, which lands
    // in both the cache and the live page.
    let (revalidation_token, request) = driver.transport.pop_pending().expect("revalidation");
    assert_eq!(request.url, "/feed");
    driver
        .respond(
            revalidation_token,
            &harness::page("Feed", "/feed", json!({ "n": 2 })),
        )
        .expect("respond");
    assert_eq!(driver.engine.page().props.get("n"), Some(&json!(2)));
}

#[test]
fn zero_duration_entry_serves_exactly_once() {
    let mut driver = Driver::new(home());
    let bounds = CacheFor::single(TickSpan::ZERO);

    let prefetch_token = driver
        .engine
        .prefetch(feed_intent(bounds))
        .expect("prefetch")
        .expect("token");
    driver
        .respond(prefetch_token, &harness::page("Feed", "/feed", json!({})))
        .expect("respond");
    assert_eq!(driver.transport.dispatched_count(), 1);

    // First consumer: served from cache (plus its revalidation).
    driver
        .engine
        .submit(feed_intent(bounds))
        .expect("submit")
        .expect("token");
    assert_eq!(driver.engine.page().component, "Feed");
    assert_eq!(driver.transport.dispatched_count(), 2);

    // Second consumer: the one-shot entry is gone; straight to network.
    let network = driver.engine.submit(feed_intent(bounds)).expect("submit");
    assert!(network.is_some());
    assert_eq!(driver.transport.dispatched_count(), 3);
}

#[test]
fn visits_without_the_prefetch_flag_bypass_the_cache() {
    let mut driver = Driver::new(home());
    let bounds = CacheFor::single(TickSpan::from_secs(60));

    let prefetch_token = driver
        .engine
        .prefetch(feed_intent(bounds))
        .expect("prefetch")
        .expect("token");
    driver
        .respond(prefetch_token, &harness::page("Feed", "/feed", json!({ "n": 1 })))
        .expect("respond");

    // A plain visit to the same URL ignores the fresh entry entirely.
    driver
        .engine
        .submit(VisitIntent::get("/feed"))
        .expect("submit")
        .expect("token");
    assert_eq!(driver.engine.page().component, "Home");
    assert_eq!(driver.transport.dispatched_count(), 2);
}

#[test]
fn duplicate_prefetches_share_one_fetch() {
    let mut driver = Driver::new(home());
    let bounds = CacheFor::single(TickSpan::from_secs(60));

    let first = driver.engine.prefetch(feed_intent(bounds)).expect("prefetch");
    assert!(first.is_some());
    // Same key, fetch still in flight: no duplicate request.
    let second = driver.engine.prefetch(feed_intent(bounds)).expect("prefetch");
    assert!(second.is_none());
    assert_eq!(driver.transport.dispatched_count(), 1);

    // Fresh entry present: still a no-op.
    let (token, _) = driver.transport.pop_pending().expect("pending");
    driver
        .respond(token, &harness::page("Feed", "/feed", json!({})))
        .expect("respond");
    let third = driver.engine.prefetch(feed_intent(bounds)).expect("prefetch");
    assert!(third.is_none());
    assert_eq!(driver.transport.dispatched_count(), 1);
}

#[test]
fn flush_drops_entries_by_url() {
    let mut driver = Driver::new(home());
    let bounds = CacheFor::single(TickSpan::from_secs(60));

    let token = driver
        .engine
        .prefetch(feed_intent(bounds))
        .expect("prefetch")
        .expect("token");
    driver
        .respond(token, &harness::page("Feed", "/feed", json!({})))
        .expect("respond");

    assert_eq!(driver.engine.flush_prefetch("/feed"), 1);
    // The entry is gone: the next prefetchable visit hits the network.
    driver
        .engine
        .submit(feed_intent(bounds))
        .expect("submit")
        .expect("token");
    assert_eq!(driver.transport.dispatched_count(), 2);
}

#[test]
fn distinct_query_data_uses_distinct_entries() {
    let mut driver = Driver::new(home());
    let bounds = CacheFor::single(TickSpan::from_secs(60));

    let mut page_one = feed_intent(bounds);
    page_one.data = Some(json!({ "page": 1 }));
    let mut page_two = feed_intent(bounds);
    page_two.data = Some(json!({ "page": 2 }));

    let first = driver
        .engine
        .prefetch(page_one)
        .expect("prefetch")
        .expect("token");
    driver
        .respond(first, &harness::page("Feed", "/feed?page=1", json!({ "p": 1 })))
        .expect("respond");

    // Different request data must not collide with the cached entry.
    let second = driver.engine.prefetch(page_two).expect("prefetch");
    assert!(second.is_some());
    assert_eq!(driver.transport.dispatched_count(), 2);
}
