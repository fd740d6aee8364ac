//! Profile lookups through relays and the cache

use super::*;
use forum::{KIND_METADATA, ProfileMetadata, build_profile};
use forum_client::{Filter, TransportError, short_key};

fn profile_event(signer: &TestSigner, name: &str, created_at: u64) -> Event {
    let metadata = ProfileMetadata {
        name: Some(name.to_string()),
        ..Default::default()
    };
    signer.sign_now(build_profile(&metadata, created_at).unwrap())
}

#[tokio::test(start_paused = true)]
async fn test_profiles_fetched_then_served_from_cache() {
    let (client, transport) = test_client(&[RELAY_A, RELAY_B]);
    let alice = TestSigner::new('a');
    transport.inject(RELAY_A, profile_event(&alice, "old alice", 10));
    transport.inject(RELAY_B, profile_event(&alice, "alice", 20));

    assert_eq!(client.display_name(alice.pubkey()), short_key(alice.pubkey()));

    let found = client.profiles(&[alice.pubkey().to_string()]).await.unwrap();
    assert_eq!(found[alice.pubkey()].display_name(), "alice");
    assert_eq!(client.display_name(alice.pubkey()), "alice");

    // Fresh entries do not touch the relays
    transport.set_failure(RELAY_A, Some(TransportError::Refused("down".to_string())));
    transport.set_failure(RELAY_B, Some(TransportError::Refused("down".to_string())));
    let cached = client.profiles(&[alice.pubkey().to_string()]).await.unwrap();
    assert_eq!(cached[alice.pubkey()].display_name(), "alice");
    assert_eq!(client.relay_manager().state(RELAY_A).unwrap().reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_profile_is_absent() {
    let (client, _transport) = test_client(&[RELAY_A]);
    let found = client.profiles(&["9".repeat(64)]).await.unwrap();
    assert!(found.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_profiles_seen_in_fetch_update_cache() {
    let (client, transport) = test_client(&[RELAY_A]);
    let bob = TestSigner::new('b');
    transport.inject(RELAY_A, profile_event(&bob, "bob", 10));

    let entities = client
        .fetch(vec![Filter::new().kinds(vec![KIND_METADATA])])
        .await
        .unwrap();
    assert!(entities.is_empty());
    assert_eq!(client.display_name(bob.pubkey()), "bob");
}
