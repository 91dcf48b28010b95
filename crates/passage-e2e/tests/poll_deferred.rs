//! Poll scheduling and deferred prop groups.

use passage::{
    EventKind, GroupState, PollControl, PropPath, ReloadOptions, TickSpan, VisibilityState,
    VisitIntent, headers,
};
use passage_e2e::harness::{self, Driver, EventRecorder};
use serde_json::json;

fn dash() -> passage::Page {
    harness::page("Dash", "/dash", json!({ "stats": 0 }))
}

fn stats_options() -> ReloadOptions {
    ReloadOptions {
        only: vec![PropPath::parse("stats").expect("path")],
        ..ReloadOptions::default()
    }
}

#[test]
fn poll_never_overlaps_in_flight_reloads() {
    let mut driver = Driver::new(dash());
    driver.engine.poll(
        TickSpan::from_millis(600),
        stats_options(),
        PollControl::default(),
    );

    driver.advance_to(600).expect("clock");
    assert_eq!(driver.transport.dispatched_count(), 1);

    // The reload is slower than the interval: later ticks must not fire
    // while it is in flight.
    driver.advance_to(1_200).expect("clock");
    driver.advance_to(1_800).expect("clock");
    assert_eq!(driver.transport.dispatched_count(), 1);

    // Resolving the reload arms the next tick, one interval later.
    let (token, _) = driver.transport.pop_pending().expect("pending");
    driver
        .respond(token, &harness::page("Dash", "/dash", json!({ "stats": 1 })))
        .expect("respond");
    assert_eq!(driver.transport.dispatched_count(), 1);
    driver.advance_to(2_400).expect("clock");
    assert_eq!(driver.transport.dispatched_count(), 2);
    assert_eq!(driver.engine.page().props.get("stats"), Some(&json!(1)));
}

#[test]
fn hidden_page_pauses_polls_unless_keep_alive() {
    let mut driver = Driver::new(dash());
    driver.engine.poll(
        TickSpan::from_millis(600),
        stats_options(),
        PollControl::default(),
    );
    driver.engine.poll(
        TickSpan::from_millis(600),
        stats_options(),
        PollControl {
            auto_start: true,
            keep_alive: true,
        },
    );

    driver.engine.set_visibility(VisibilityState::Hidden);
    driver.advance_to(600).expect("clock");
    // Only the keep-alive poll ticked.
    assert_eq!(driver.transport.dispatched_count(), 1);

    driver.engine.set_visibility(VisibilityState::Visible);
    driver.advance_to(1_300).expect("clock");
    // The paused poll resumed on foreground.
    assert_eq!(driver.transport.dispatched_count(), 2);
}

#[test]
fn stopping_a_poll_cancels_only_its_own_reload() {
    let mut driver = Driver::new(dash());
    let stats_poll = driver.engine.poll(
        TickSpan::from_millis(600),
        stats_options(),
        PollControl::default(),
    );
    let feed_poll = driver.engine.poll(
        TickSpan::from_millis(600),
        ReloadOptions {
            only: vec![PropPath::parse("feed").expect("path")],
            ..ReloadOptions::default()
        },
        PollControl::default(),
    );

    driver.advance_to(600).expect("clock");
    assert_eq!(driver.transport.dispatched_count(), 2);
    let pending = driver.transport.drain_pending();
    let stats_token = pending
        .iter()
        .find(|(_, request)| request.header(headers::PARTIAL_ONLY) == Some("stats"))
        .map(|(token, _)| *token)
        .expect("stats reload");
    let feed_token = pending
        .iter()
        .find(|(_, request)| request.header(headers::PARTIAL_ONLY) == Some("feed"))
        .map(|(token, _)| *token)
        .expect("feed reload");

    driver.engine.poll_stop(stats_poll);
    assert!(!driver.engine.poll_is_polling(stats_poll));
    assert_eq!(driver.transport.aborted(), vec![stats_token]);

    // The other poll's reload still applies.
    driver
        .respond(feed_token, &harness::page("Dash", "/dash", json!({ "feed": [1] })))
        .expect("respond");
    assert_eq!(driver.engine.page().props.get("feed"), Some(&json!([1])));

    // Stopped polls never re-arm.
    driver.engine.poll_stop(feed_poll);
    driver.advance_to(5_000).expect("clock");
    assert_eq!(driver.transport.dispatched_count(), 2);
}

#[test]
fn deferred_groups_load_independently() {
    let mut driver = Driver::new(harness::page("Home", "/", json!({})));
    let recorder = EventRecorder::attach(&mut driver.engine);

    let token = driver
        .engine
        .submit(VisitIntent::get("/dash"))
        .expect("submit")
        .expect("token");
    let mut page = harness::page("Dash", "/dash", json!({ "title": "Ops" }));
    page.deferred_groups
        .insert("stats".to_owned(), vec!["visits".to_owned()]);
    page.deferred_groups
        .insert("feed".to_owned(), vec!["items".to_owned()]);
    driver.respond(token, &page).expect("respond");

    // One independent partial reload per group.
    let pending = driver.transport.drain_pending();
    assert_eq!(pending.len(), 2);
    assert_eq!(driver.engine.deferred_state("stats"), Some(GroupState::Loading));
    assert_eq!(driver.engine.deferred_state("feed"), Some(GroupState::Loading));

    let (stats_token, stats_request) = pending
        .iter()
        .find(|(_, request)| request.header(headers::PARTIAL_ONLY) == Some("visits"))
        .cloned()
        .expect("stats reload");
    assert_eq!(stats_request.header(headers::PARTIAL_COMPONENT), Some("Dash"));

    // The fast group resolves without waiting for the slow one.
    driver
        .respond(
            stats_token,
            &harness::page("Dash", "/dash", json!({ "visits": 41 })),
        )
        .expect("respond");
    assert_eq!(driver.engine.deferred_state("stats"), Some(GroupState::Resolved));
    assert_eq!(driver.engine.deferred_state("feed"), Some(GroupState::Loading));
    assert_eq!(recorder.count(EventKind::Deferred), 1);
    assert_eq!(driver.engine.page().props.get("visits"), Some(&json!(41)));

    let (feed_token, _) = pending
        .iter()
        .find(|(_, request)| request.header(headers::PARTIAL_ONLY) == Some("items"))
        .cloned()
        .expect("feed reload");
    driver
        .respond(
            feed_token,
            &harness::page("Dash", "/dash", json!({ "items": [1, 2] })),
        )
        .expect("respond");
    assert_eq!(driver.engine.deferred_state("feed"), Some(GroupState::Resolved));
    assert_eq!(recorder.count(EventKind::Deferred), 2);
}

#[test]
fn deferred_result_after_a_new_navigation_is_discarded() {
    let mut driver = Driver::new(harness::page("Home", "/", json!({})));

    let token = driver
        .engine
        .submit(VisitIntent::get("/dash"))
        .expect("submit")
        .expect("token");
    let mut page = harness::page("Dash", "/dash", json!({}));
    page.deferred_groups
        .insert("feed".to_owned(), vec!["items".to_owned()]);
    driver.respond(token, &page).expect("respond");
    let (deferred_token, _) = driver.transport.pop_pending().expect("deferred reload");

    // The user navigates away before the deferred reload resolves.
    let token = driver
        .engine
        .submit(VisitIntent::get("/other"))
        .expect("submit")
        .expect("token");
    driver
        .respond(token, &harness::page("Other", "/other", json!({})))
        .expect("respond");

    // The late deferred result belongs to the superseded page.
    driver
        .respond(
            deferred_token,
            &harness::page("Dash", "/dash", json!({ "items": [1] })),
        )
        .expect("respond");
    assert_eq!(driver.engine.page().component, "Other");
    assert!(driver.engine.page().props.get("items").is_none());
    assert_eq!(driver.engine.deferred_state("feed"), None);
}
