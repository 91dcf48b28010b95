//! Visit race correctness: token order beats arrival order.

use passage::{EventKind, Flow, HandlerError, PropPath, ReloadOptions, VisitIntent};
use passage_e2e::harness::{self, Driver, EventRecorder};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::json;

fn home() -> passage::Page {
    harness::page("Home", "/", json!({}))
}

#[test]
fn newer_primary_visit_always_wins() {
    let mut driver = Driver::new(home());
    let older = driver
        .engine
        .submit(VisitIntent::get("/a"))
        .expect("submit")
        .expect("token");
    let newer = driver
        .engine
        .submit(VisitIntent::get("/b"))
        .expect("submit")
        .expect("token");
    assert!(older < newer);
    // Accepting the newer primary aborted the older one's request.
    assert_eq!(driver.transport.aborted(), vec![older]);

    let page_b = harness::page("B", "/b", json!({ "n": 2 }));
    driver.respond(newer, &page_b).expect("respond");
    assert_eq!(driver.engine.page().component, "B");

    // The older response arrives after the newer one was applied: the
    // store must still reflect the newer result, unmodified.
    let page_a = harness::page("A", "/a", json!({ "n": 1 }));
    driver.respond(older, &page_a).expect("respond");
    assert_eq!(driver.engine.page().component, "B");
    assert_eq!(driver.engine.page().props.get("n"), Some(&json!(2)));
}

#[test]
fn overlapping_partial_reloads_apply_in_token_order() {
    let mut driver = Driver::new(harness::page("Feed", "/feed", json!({ "items": [0] })));
    let older = driver
        .engine
        .reload(ReloadOptions {
            only: vec![PropPath::parse("items").expect("path")],
            ..ReloadOptions::default()
        })
        .expect("reload")
        .expect("token");
    let newer = driver
        .engine
        .reload(ReloadOptions {
            only: vec![PropPath::parse("items").expect("path")],
            ..ReloadOptions::default()
        })
        .expect("reload")
        .expect("token");

    // The newer reload's response lands first.
    driver
        .respond(newer, &harness::page("Feed", "/feed", json!({ "items": [2] })))
        .expect("respond");
    assert_eq!(driver.engine.page().props.get("items"), Some(&json!([2])));

    // The older one arrives late: its "items" is discarded, its
    // non-overlapping prop still applies.
    driver
        .respond(
            older,
            &harness::page("Feed", "/feed", json!({ "items": [1], "ts": 111 })),
        )
        .expect("respond");
    assert_eq!(driver.engine.page().props.get("items"), Some(&json!([2])));
    assert_eq!(driver.engine.page().props.get("ts"), Some(&json!(111)));
}

#[test]
fn before_subscriber_vetoes_the_visit() {
    let mut driver = Driver::new(home());
    let recorder = EventRecorder::attach(&mut driver.engine);
    driver.engine.on(EventKind::Before, |_| Ok(Flow::Stop));

    let token = driver
        .engine
        .submit(VisitIntent::get("/blocked"))
        .expect("submit");
    assert!(token.is_none());
    assert_eq!(driver.transport.dispatched_count(), 0);
    assert_eq!(recorder.count(EventKind::Start), 0);
    assert_eq!(driver.engine.page().component, "Home");
}

#[test]
fn cancelled_visit_reports_cancel_not_error() {
    let mut driver = Driver::new(home());
    let recorder = EventRecorder::attach(&mut driver.engine);
    let token = driver
        .engine
        .submit(VisitIntent::get("/slow"))
        .expect("submit")
        .expect("token");

    driver.engine.cancel(token);
    assert_eq!(driver.transport.aborted(), vec![token]);
    assert_eq!(recorder.count(EventKind::Cancel), 1);
    assert_eq!(recorder.count(EventKind::Error), 0);
    assert_eq!(recorder.count(EventKind::Finish), 1);

    // A late response for the cancelled token is discarded.
    driver
        .respond(token, &harness::page("Slow", "/slow", json!({})))
        .expect("respond");
    assert_eq!(driver.engine.page().component, "Home");
}

#[test]
fn consumer_callback_failure_becomes_exception_event() {
    let mut driver = Driver::new(home());
    let recorder = EventRecorder::attach(&mut driver.engine);
    driver
        .engine
        .on(EventKind::Success, |_| Err(HandlerError::new("boom")));

    let token = driver
        .engine
        .submit(VisitIntent::get("/a"))
        .expect("submit")
        .expect("token");
    driver
        .respond(token, &harness::page("A", "/a", json!({})))
        .expect("respond");

    assert_eq!(recorder.count(EventKind::Exception), 1);
    assert_eq!(driver.engine.page().component, "A");

    // Token bookkeeping survived: the next visit completes normally.
    let next = driver
        .engine
        .submit(VisitIntent::get("/b"))
        .expect("submit")
        .expect("token");
    driver
        .respond(next, &harness::page("B", "/b", json!({})))
        .expect("respond");
    assert_eq!(driver.engine.page().component, "B");
}

#[test]
fn randomized_delivery_order_never_resurrects_superseded_visits() {
    let mut rng = StdRng::seed_from_u64(0x9e3779b9);
    for round in 0..20 {
        let mut driver = Driver::new(home());
        let count = rng.gen_range(2..8);
        let mut tokens = Vec::new();
        for i in 0..count {
            let token = driver
                .engine
                .submit(VisitIntent::get(format!("/p{i}")))
                .expect("submit")
                .expect("token");
            tokens.push((token, i));
        }
        let winner = tokens.last().expect("at least two visits").1;

        let mut shuffled = tokens.clone();
        shuffled.shuffle(&mut rng);
        for (token, i) in shuffled {
            driver
                .respond(token, &harness::page(&format!("P{i}"), &format!("/p{i}"), json!({})))
                .expect("respond");
        }
        assert_eq!(
            driver.engine.page().component,
            format!("P{winner}"),
            "round {round}: only the newest accepted primary may win"
        );
    }
}
