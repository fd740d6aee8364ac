//! Publishing across partially reachable relays

use super::*;
use forum_client::{ClientError, TransportError};
use std::time::Duration;

fn refused() -> Option<TransportError> {
    Some(TransportError::Refused("connection refused".to_string()))
}

#[tokio::test(start_paused = true)]
async fn test_publish_with_two_of_three_relays_down() {
    let (client, transport) = test_client(&[RELAY_A, RELAY_B, RELAY_C]);
    transport.set_failure(RELAY_B, refused());
    transport.set_failure(RELAY_C, refused());
    client.init().await.unwrap();

    let alice = TestSigner::new('a');
    let event = post(&alice, "Hello", 100);
    let outcome = client.publish(&event).await.unwrap();

    assert_eq!(outcome.accepted, vec![RELAY_A.to_string()]);
    assert_eq!(outcome.queued.len(), 2);
    assert_eq!(client.queued_count(), 2);
    assert_eq!(client.queued_events(), 1);

    transport.set_failure(RELAY_B, None);
    client.retry_relay(RELAY_B).await.unwrap();

    assert_eq!(client.queued_count(), 1);
    assert!(transport.has_event(RELAY_B, &event.id));
    assert!(!transport.has_event(RELAY_C, &event.id));
    assert!(client.relay_manager().is_connected(RELAY_B));
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_reconnect_flushes_outbox() {
    let (client, transport) = test_client(&[RELAY_A, RELAY_B]);
    transport.set_failure(RELAY_B, refused());
    client.init().await.unwrap();

    let event = post(&TestSigner::new('a'), "Queued", 100);
    client.publish(&event).await.unwrap();
    assert_eq!(client.queued_count(), 1);

    transport.set_failure(RELAY_B, None);
    // The failed publish scheduled a reconnect; let it fire
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert!(transport.has_event(RELAY_B, &event.id));
    assert_eq!(client.queued_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_total_failure_is_retryable_and_queued() {
    let (client, transport) = test_client(&[RELAY_A, RELAY_B]);
    transport.set_failure(RELAY_A, refused());
    transport.set_failure(RELAY_B, refused());

    let event = post(&TestSigner::new('a'), "Offline", 100);
    let err = client.publish(&event).await.unwrap_err();
    assert!(matches!(err, ClientError::PublishQueued { queued: 2, .. }));
    assert!(err.is_retryable());

    transport.set_failure(RELAY_A, None);
    transport.set_failure(RELAY_B, None);
    client.retry_all().await.unwrap();
    assert_eq!(client.queued_count(), 0);
    assert!(transport.has_event(RELAY_A, &event.id));
    assert!(transport.has_event(RELAY_B, &event.id));
}

#[tokio::test(start_paused = true)]
async fn test_permanently_failed_relay_is_skipped() {
    let (client, transport) = test_client(&[RELAY_A, RELAY_B]);
    transport.set_failure(
        RELAY_B,
        Some(TransportError::Resolution("no such host".to_string())),
    );
    client.init().await.unwrap();

    let status = client.relay_status();
    let b = status.iter().find(|s| s.endpoint == RELAY_B).unwrap();
    assert!(b.permanently_failed);
    assert!(!client.relay_manager().retry_pending(RELAY_B));

    let event = post(&TestSigner::new('a'), "Hello", 100);
    let outcome = client.publish(&event).await.unwrap();
    assert_eq!(outcome.accepted, vec![RELAY_A.to_string()]);
    assert!(outcome.queued.is_empty());
    assert_eq!(transport.publish_count(RELAY_B), 0);
}

#[tokio::test(start_paused = true)]
async fn test_publish_template_signs_and_delivers() {
    let (client, transport) = test_client(&[RELAY_A]);
    let alice = TestSigner::new('a');
    let template = forum::build_post(&forum::NewPost::new(board(), "Signed", "body"), 100);

    let event = client.publish_template(&alice, template).await.unwrap();
    assert_eq!(event.pubkey, alice.pubkey());
    assert!(transport.has_event(RELAY_A, &event.id));
}
