//! Companions arriving out of order over live subscriptions

use super::*;
use forum::{
    Body, EntityChange, KIND_TEXT_ENTRY, NewComment, build_comment, build_comment_delete,
    build_comment_edit,
};
use forum_client::Filter;
use parking_lot::Mutex;
use std::time::Duration;

fn collector() -> (Arc<Mutex<Vec<EntityChange>>>, impl Fn(Vec<EntityChange>) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |batch: Vec<EntityChange>| sink.lock().extend(batch))
}

#[tokio::test(start_paused = true)]
async fn test_out_of_order_comment_edits_converge() {
    let (client, transport) = test_client(&[RELAY_A]);
    let alice = TestSigner::new('a');
    let bob = TestSigner::new('b');
    let (seen, on_batch) = collector();
    let _handle = client
        .subscribe(vec![Filter::new().kinds(vec![KIND_TEXT_ENTRY])], on_batch)
        .await
        .unwrap();

    let root = post(&alice, "Thread", 1);
    let comment = bob.sign_now(build_comment(&NewComment::new(&root.id, "original"), 2));
    let edit5 = bob.sign_now(build_comment_edit(&comment.id, &Body::plain("five"), 5));
    let edit3 = bob.sign_now(build_comment_edit(&comment.id, &Body::plain("three"), 3));
    for event in [&root, &comment, &edit5, &edit3] {
        transport.inject(RELAY_A, event.clone());
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let current = client.with_engine(|e| e.comment(&comment.id).cloned()).unwrap();
    assert_eq!(current.body, Body::plain("five"));
    assert_eq!(current.edited_at, Some(5));
    assert_eq!(current.id, comment.id);

    let last_comment = seen
        .lock()
        .iter()
        .rev()
        .find_map(|c| match c {
            EntityChange::Comment(c) => Some(c.body.clone()),
            _ => None,
        });
    assert_eq!(last_comment, Some(Body::plain("five")));
    assert_eq!(client.with_engine(|e| e.post(&root.id).map(|p| p.comment_count)), Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_tombstone_survives_later_edit() {
    let (client, transport) = test_client(&[RELAY_A]);
    let alice = TestSigner::new('a');
    let bob = TestSigner::new('b');
    let (_seen, on_batch) = collector();
    let _handle = client
        .subscribe(vec![Filter::new().kinds(vec![KIND_TEXT_ENTRY])], on_batch)
        .await
        .unwrap();

    let root = post(&alice, "Thread", 1);
    let comment = bob.sign_now(build_comment(&NewComment::new(&root.id, "regret"), 2));
    let delete = bob.sign_now(build_comment_delete(&comment.id, "oops", 6));
    let edit = bob.sign_now(build_comment_edit(&comment.id, &Body::plain("back"), 7));
    for event in [&root, &comment, &delete, &edit] {
        transport.inject(RELAY_A, event.clone());
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let current = client.with_engine(|e| e.comment(&comment.id).cloned()).unwrap();
    assert!(current.deleted);
    assert_eq!(current.body, Body::Removed);
    assert_eq!(client.with_engine(|e| e.post(&root.id).map(|p| p.comment_count)), Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_edit_by_other_author_is_ignored() {
    let (client, transport) = test_client(&[RELAY_A]);
    let alice = TestSigner::new('a');
    let mallory = TestSigner::new('c');
    let (_seen, on_batch) = collector();
    let _handle = client
        .subscribe(vec![Filter::new().kinds(vec![KIND_TEXT_ENTRY])], on_batch)
        .await
        .unwrap();

    let root = post(&alice, "Mine", 1);
    let hijack = mallory.sign_now(forum::build_post_edit(
        &root.id,
        &forum::NewPost::new(board(), "Hijacked", "nope"),
        5,
    ));
    transport.inject(RELAY_A, root.clone());
    transport.inject(RELAY_A, hijack);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let title = client.with_engine(|e| e.post(&root.id).map(|p| p.title.clone()));
    assert_eq!(title, Some("Mine".to_string()));
}
