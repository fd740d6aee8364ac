//! Init, persistence and shutdown

use super::*;
use forum_client::{
    ClientError, KeyValueStore, MemoryStore, RelayEntry, TransportError,
};
use forum_client::ConnectionState;

#[tokio::test(start_paused = true)]
async fn test_preferences_and_profiles_survive_restart() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let transport = Arc::new(MemoryTransport::new());
    let carol = TestSigner::new('c');
    let metadata = forum::ProfileMetadata {
        display_name: Some("Carol".to_string()),
        ..Default::default()
    };
    transport.inject(
        RELAY_A,
        carol.sign_now(forum::build_profile(&metadata, 10).unwrap()),
    );

    let first = ForumClient::new(test_config(&[RELAY_A]), transport.clone(), Some(store.clone()))
        .unwrap();
    first.init().await.unwrap();
    first
        .set_relays(vec![RelayEntry {
            url: RELAY_B.to_string(),
            read: false,
            write: true,
        }])
        .await
        .unwrap();
    first.profiles(&[carol.pubkey().to_string()]).await.unwrap();
    first.shutdown().await;

    let second =
        ForumClient::new(test_config(&[RELAY_A]), transport.clone(), Some(store)).unwrap();
    second.init().await.unwrap();

    let relays = second.relays();
    assert_eq!(relays.len(), 2);
    assert_eq!(relays[0].url, RELAY_B);
    assert!(!relays[0].read);
    assert_eq!(second.display_name(carol.pubkey()), "Carol");
    assert_eq!(second.connected_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_everything() {
    let (client, transport) = test_client(&[RELAY_A, RELAY_B]);
    transport.set_failure(RELAY_B, Some(TransportError::Refused("down".to_string())));
    client.init().await.unwrap();
    assert!(client.relay_manager().retry_pending(RELAY_B));

    client.shutdown().await;
    assert!(!client.relay_manager().retry_pending(RELAY_B));
    for state in client.relay_status() {
        assert_eq!(state.state, ConnectionState::Disconnected);
        assert_eq!(state.reconnect_attempts, 0);
    }

    let event = post(&TestSigner::new('a'), "Too late", 10);
    assert!(matches!(client.publish(&event).await, Err(ClientError::ShutDown)));
    assert!(matches!(client.fetch(vec![]).await, Err(ClientError::ShutDown)));

    // Healing the relay after shutdown must not trigger a reconnect
    transport.set_failure(RELAY_B, None);
    tokio::time::sleep(std::time::Duration::from_secs(120)).await;
    assert_eq!(client.connected_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_init_after_shutdown_resumes() {
    let (client, transport) = test_client(&[RELAY_A]);
    client.init().await.unwrap();
    client.shutdown().await;
    client.init().await.unwrap();

    let event = post(&TestSigner::new('a'), "Back", 10);
    client.publish(&event).await.unwrap();
    assert!(transport.has_event(RELAY_A, &event.id));
}

#[tokio::test(start_paused = true)]
async fn test_read_only_relays_are_not_written() {
    let (client, transport) = test_client(&[RELAY_A]);
    client.add_relay(RELAY_B, true, false).await.unwrap();

    let event = post(&TestSigner::new('a'), "Write", 10);
    let outcome = client.publish(&event).await.unwrap();
    assert_eq!(outcome.accepted, vec![RELAY_A.to_string()]);
    assert_eq!(transport.publish_count(RELAY_B), 0);
}
