//! Live subscriptions: batching, duplicates, cancellation and resubscription

use super::*;
use forum::{EntityChange, KIND_TEXT_ENTRY};
use forum_client::{ConnectionState, Filter, TransportError};
use parking_lot::Mutex;
use std::time::Duration;

type Batches = Arc<Mutex<Vec<Vec<EntityChange>>>>;

fn batches() -> (Batches, impl Fn(Vec<EntityChange>) + Send + Sync + 'static) {
    let seen: Batches = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |batch: Vec<EntityChange>| sink.lock().push(batch))
}

fn posts_in(batches: &Batches) -> usize {
    batches
        .lock()
        .iter()
        .flatten()
        .filter(|c| matches!(c, EntityChange::Post(_)))
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_burst_is_delivered_as_one_batch() {
    let (client, transport) = test_client(&[RELAY_A]);
    let (seen, on_batch) = batches();
    let _handle = client
        .subscribe(vec![Filter::new().kinds(vec![KIND_TEXT_ENTRY])], on_batch)
        .await
        .unwrap();

    let alice = TestSigner::new('a');
    for n in 0..3 {
        transport.inject(RELAY_A, post(&alice, &format!("Burst {}", n), 10 + n));
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(seen.lock().is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(seen.lock().len(), 1);
    assert_eq!(posts_in(&seen), 3);
}

#[tokio::test(start_paused = true)]
async fn test_duplicates_across_relays_delivered_once() {
    let (client, transport) = test_client(&[RELAY_A, RELAY_B]);
    let (seen, on_batch) = batches();
    let _handle = client
        .subscribe(vec![Filter::new().kinds(vec![KIND_TEXT_ENTRY])], on_batch)
        .await
        .unwrap();

    let event = post(&TestSigner::new('a'), "Everywhere", 10);
    transport.inject(RELAY_A, event.clone());
    transport.inject(RELAY_B, event);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(posts_in(&seen), 1);
}

#[tokio::test(start_paused = true)]
async fn test_initial_results_flush_at_end_of_stored_events() {
    let (client, transport) = test_client(&[RELAY_A]);
    transport.inject(RELAY_A, post(&TestSigner::new('a'), "Stored", 10));

    let (seen, on_batch) = batches();
    let _handle = client
        .subscribe(vec![Filter::new().kinds(vec![KIND_TEXT_ENTRY])], on_batch)
        .await
        .unwrap();
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(posts_in(&seen), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_cancels() {
    let (client, transport) = test_client(&[RELAY_A]);
    let (seen, on_batch) = batches();
    let handle = client
        .subscribe(vec![Filter::new().kinds(vec![KIND_TEXT_ENTRY])], on_batch)
        .await
        .unwrap();
    assert_eq!(transport.subscription_count(RELAY_A), 1);

    drop(handle);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(transport.subscription_count(RELAY_A), 0);

    transport.inject(RELAY_A, post(&TestSigner::new('a'), "Unseen", 10));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(seen.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_resubscribes_when_relay_returns() {
    let (client, transport) = test_client(&[RELAY_A, RELAY_B]);
    transport.set_failure(RELAY_B, Some(TransportError::Refused("down".to_string())));
    client.init().await.unwrap();

    let (seen, on_batch) = batches();
    let _handle = client
        .subscribe(vec![Filter::new().kinds(vec![KIND_TEXT_ENTRY])], on_batch)
        .await
        .unwrap();
    assert_eq!(transport.subscription_count(RELAY_B), 0);

    transport.set_failure(RELAY_B, None);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(transport.subscription_count(RELAY_B), 1);

    transport.inject(RELAY_B, post(&TestSigner::new('a'), "From B", 10));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(posts_in(&seen), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_connection_reconnects_and_resubscribes() {
    let (client, transport) = test_client(&[RELAY_A]);
    client.init().await.unwrap();
    let (seen, on_batch) = batches();
    let _handle = client
        .subscribe(vec![Filter::new().kinds(vec![KIND_TEXT_ENTRY])], on_batch)
        .await
        .unwrap();
    assert_eq!(transport.subscription_count(RELAY_A), 1);

    // The relay hangs up under a live subscription
    transport.set_failure(RELAY_A, Some(TransportError::Closed("reset".to_string())));
    tokio::time::sleep(Duration::from_millis(10)).await;
    let state = client.relay_manager().state(RELAY_A).unwrap();
    assert_eq!(state.state, ConnectionState::Connecting);
    assert!(client.relay_manager().retry_pending(RELAY_A));
    assert_eq!(transport.subscription_count(RELAY_A), 0);

    transport.set_failure(RELAY_A, None);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(client.relay_manager().is_connected(RELAY_A));
    assert_eq!(transport.subscription_count(RELAY_A), 1);

    transport.inject(RELAY_A, post(&TestSigner::new('a'), "After reconnect", 10));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(posts_in(&seen), 1);
}
