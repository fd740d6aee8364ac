//! Queries against slow and failing relays

use super::*;
use forum::{Direction, Entity, KIND_VOTE, VoteTally, build_vote};
use forum_client::{Filter, TransportError};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_slow_relay_times_out_without_side_effects() {
    let (client, transport) = test_client(&[RELAY_A]);
    let late = post(&TestSigner::new('a'), "Late", 100);
    transport.inject(RELAY_A, late.clone());
    transport.set_latency(RELAY_A, Duration::from_secs(6));

    let start = Instant::now();
    let entities = client
        .fetch(vec![Filter::board_posts(&board())])
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert!(entities.is_empty());
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(6));

    // The abandoned query must not land afterwards
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(client.with_engine(|e| e.post(&late.id).is_none()));
    let state = client.relay_manager().state(RELAY_A).unwrap();
    assert_eq!(state.reconnect_attempts, 0);
    assert!(state.last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_fetch_merges_relays_and_survives_failures() {
    let (client, transport) = test_client(&[RELAY_A, RELAY_B, RELAY_C]);
    let alice = TestSigner::new('a');
    let first = post(&alice, "First", 100);
    let second = post(&alice, "Second", 200);
    transport.inject(RELAY_A, first.clone());
    transport.inject(RELAY_B, first.clone());
    transport.inject(RELAY_B, second.clone());
    transport.set_failure(RELAY_C, Some(TransportError::Refused("down".to_string())));

    let entities = client
        .fetch(vec![Filter::board_posts(&board())])
        .await
        .unwrap();

    let titles: Vec<String> = entities
        .iter()
        .filter_map(|e| match e {
            Entity::Post(post) => Some(post.title.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(titles, vec!["Second".to_string(), "First".to_string()]);
    assert_eq!(client.with_engine(|e| e.posts_in_board(&board()).len()), 2);
    assert!(!client.relay_manager().is_connected(RELAY_C));
    assert_eq!(client.relay_manager().state(RELAY_C).unwrap().reconnect_attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_votes_resolve_to_latest_per_voter() {
    let (client, transport) = test_client(&[RELAY_A]);
    let alice = TestSigner::new('a');
    let bob = TestSigner::new('b');
    let target = post(&alice, "Vote on me", 100);
    transport.inject(RELAY_A, target.clone());

    let vote = |signer: &TestSigner, direction, at| {
        signer.sign_now(build_vote(&target.id, alice.pubkey(), direction, at))
    };
    transport.inject(RELAY_A, vote(&alice, Direction::Up, 110));
    transport.inject(RELAY_A, vote(&bob, Direction::Down, 120));
    transport.inject(RELAY_A, vote(&alice, Direction::Down, 130));

    let entities = client
        .fetch(vec![
            Filter::new().ids(vec![target.id.clone()]),
            Filter::new()
                .kinds(vec![KIND_VOTE])
                .event_refs(vec![target.id.clone()]),
        ])
        .await
        .unwrap();

    assert_eq!(entities.len(), 1);
    let tally = client.with_engine(|e| e.tally(&target.id));
    // A's later vote replaces A's earlier one; B's stands
    assert_eq!(tally, VoteTally { up: 0, down: 2 });
    assert!(matches!(&entities[0], Entity::Post(p) if p.votes == tally));
}
