// tests/subscribers.rs
//
// Observer dispatch: once per install, isolated from errors and panics.
// Runs on the real clock because callbacks use the blocking pool.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use myriad_box::feeds::transport::ScriptedTransport;
use myriad_box::{Coordinator, CoordinatorError, FieldValue, SubscriptionId};

use common::*;

const LIMIT: Duration = Duration::from_secs(5);

async fn refresh_when_idle(c: &Coordinator, id: &str) {
    assert!(
        wait_until(LIMIT, || c.refresh_now(id).unwrap_or(false)).await,
        "source `{id}` never went idle"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscribers_see_each_install_once() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_ok(r#"{"content":"first"}"#);
    transport.push_ok(r#"{"content":"second"}"#);
    let c = Coordinator::new(transport.clone());
    c.register_source_with(quote_config("https://quotes.test/"), Arc::new(JsonFieldsAdapter))
        .unwrap();

    let seen: Arc<Mutex<Vec<(u64, String)>>> = Arc::default();
    let sink = Arc::clone(&seen);
    c.subscribe("quote", move |u| {
        let text = u
            .fields
            .get("content")
            .and_then(FieldValue::as_text)
            .unwrap_or_default()
            .to_string();
        sink.lock().unwrap().push((u.generation, text));
        Ok(())
    })
    .unwrap();

    // registration may already have installed "first" before subscribing
    assert!(wait_until(LIMIT, || c.get_fields("quote").is_ok()).await);
    refresh_when_idle(&c, "quote").await;
    assert!(wait_until(LIMIT, || seen.lock().unwrap().iter().any(|(_, t)| t == "second")).await);

    let seen = seen.lock().unwrap().clone();
    let mut generations: Vec<u64> = seen.iter().map(|(g, _)| *g).collect();
    generations.dedup();
    assert_eq!(generations.len(), seen.len(), "no install delivered twice");

    c.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_and_panicking_observers_do_not_stop_the_loop() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_ok(r#"{"content":"a"}"#);
    let c = Coordinator::new(transport.clone());
    c.register_source_with(quote_config("https://quotes.test/"), Arc::new(JsonFieldsAdapter))
        .unwrap();

    c.subscribe("quote", |_| anyhow::bail!("downstream rejected update"))
        .unwrap();
    c.subscribe("quote", |_| panic!("observer blew up")).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    c.subscribe("quote", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .unwrap();

    assert!(wait_until(LIMIT, || c.get_fields("quote").is_ok()).await);
    let base = calls.load(Ordering::SeqCst);
    refresh_when_idle(&c, "quote").await;
    assert!(wait_until(LIMIT, || calls.load(Ordering::SeqCst) > base).await);

    refresh_when_idle(&c, "quote").await;
    assert!(wait_until(LIMIT, || calls.load(Ordering::SeqCst) > base + 1).await);
    assert_eq!(c.status("quote").unwrap().subscribers, 3);

    c.shutdown().await;
}

#[tokio::test]
async fn unsubscribe_and_unknown_sources() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_ok(r#"{"content":"a"}"#);
    let c = Coordinator::new(transport);
    c.register_source_with(quote_config("https://quotes.test/"), Arc::new(JsonFieldsAdapter))
        .unwrap();

    let id = c.subscribe("quote", |_| Ok(())).unwrap();
    assert_eq!(c.status("quote").unwrap().subscribers, 1);
    assert!(c.unsubscribe(id));
    assert!(!c.unsubscribe(id));
    assert!(!c.unsubscribe(SubscriptionId(9_999)));
    assert_eq!(c.status("quote").unwrap().subscribers, 0);

    assert!(matches!(
        c.subscribe("nope", |_| Ok(())),
        Err(CoordinatorError::UnknownSource(_))
    ));
    c.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn observer_registered_with_the_source_sees_the_first_install() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_ok(HITOKOTO_JSON);
    let c = Coordinator::new(transport);

    let seen: Arc<Mutex<Vec<u64>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let sub = c
        .register_source_observed(quote_config("https://v1.hitokoto.cn/"), move |u| {
            sink.lock().unwrap().push(u.generation);
            Ok(())
        })
        .unwrap();
    assert!(sub.is_some());

    assert!(wait_until(LIMIT, || !seen.lock().unwrap().is_empty()).await);
    assert_eq!(seen.lock().unwrap()[0], 1);
    assert_eq!(c.status("quote").unwrap().subscribers, 1);

    let disabled = c
        .register_source_observed(weather_config().disabled(), |_| Ok(()))
        .unwrap();
    assert!(disabled.is_none());
    c.shutdown().await;
}
