//! The assembled service reacting to commands from the broker.

use std::time::Duration;

use allocation::{Allocate, Allocated, ChangeBatchQuantity, CreateBatch};
use chrono::NaiveDate;
use common::{Command, Event, Message};
use message_bus::PubSubClient;
use serde_json::{Value, json};
use service::{Application, Config};

fn config(allow_external_event: bool) -> Config {
    Config {
        allow_external_event,
        retry_initial_backoff: Duration::ZERO,
        ..Config::default()
    }
}

async fn handle<C: Command>(app: &Application, command: C) -> Vec<Value> {
    app.bus().handle(Message::command(command)).await.unwrap()
}

/// Waits until `count` messages have been published on `channel`.
async fn published(app: &Application, channel: &str, count: usize) -> Vec<Value> {
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let payloads = app.pubsub().published_on(channel);
            if payloads.len() >= count {
                return payloads;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("nothing published in time")
}

#[tokio::test]
async fn change_batch_quantity_from_the_broker_reallocates() {
    let mut app = Application::build(config(true)).unwrap();
    app.start().await.unwrap();
    assert_eq!(app.listener_count(), 1);

    let tomorrow = NaiveDate::from_ymd_opt(2021, 4, 27);
    handle(&app, CreateBatch::new("b1", "ASYMMETRICAL-DRESSER", 10, None)).await;
    handle(&app, CreateBatch::new("b2", "ASYMMETRICAL-DRESSER", 10, tomorrow)).await;
    let results = handle(&app, Allocate::new("o1", "ASYMMETRICAL-DRESSER", 10)).await;
    assert_eq!(results, vec![json!("b1")]);
    assert_eq!(published(&app, Allocated::NAME, 1).await[0]["batchref"], "b1");

    app.pubsub()
        .publish_message(ChangeBatchQuantity::NAME, json!({ "batchref": "b1", "qty": 5 }))
        .await
        .unwrap();

    let allocated = published(&app, Allocated::NAME, 2).await;
    assert_eq!(allocated[1]["orderid"], "o1");
    assert_eq!(allocated[1]["batchref"], "b2");

    app.shutdown().await;
}

#[tokio::test]
async fn external_events_disabled_starts_no_listeners() {
    let mut app = Application::build(config(false)).unwrap();
    app.start().await.unwrap();

    assert_eq!(app.listener_count(), 0);
    assert_eq!(app.pubsub().subscriber_count(ChangeBatchQuantity::NAME), 0);
}

#[tokio::test]
async fn start_twice_keeps_one_listener_per_channel() {
    let mut app = Application::build(config(true)).unwrap();
    app.start().await.unwrap();
    app.start().await.unwrap();

    assert_eq!(app.listener_count(), 1);
    assert_eq!(app.pubsub().subscriber_count(ChangeBatchQuantity::NAME), 1);
}

#[tokio::test]
async fn shutdown_closes_the_pubsub_client() {
    let mut app = Application::build(config(true)).unwrap();
    app.start().await.unwrap();
    let pubsub = app.pubsub().clone();

    app.shutdown().await;

    assert!(pubsub.is_closed());
    assert!(
        pubsub
            .publish_message(ChangeBatchQuantity::NAME, json!({ "batchref": "b1", "qty": 1 }))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn app_context_is_bound_to_the_bus() {
    let app = Application::build(config(true)).unwrap();
    let bindings = app.bus().bindings();
    let context = bindings.app.as_ref().unwrap();

    assert_eq!(context.name, "allocation");
    assert!(context.allow_external_event);
}
