//! Reconciliation of immutable log entries into a mutable forum model.
//!
//! The log never changes an entry in place. Edits and deletions arrive as
//! later companion entries pointing at the canonical entry through an
//! `original` tag (or an `e` tag for kind 5 deletions). The engine merges
//! them onto the canonical entity:
//!
//! - identity, vote tally and comment count are never touched by an edit
//! - the accepted edit with the greatest `(created_at, id)` wins
//! - a delete is a tombstone: content is scrubbed and nothing resurrects it
//! - companions arriving before their canonical entry are held until it lands,
//!   up to a bound after which the longest-waiting targets are forgotten
//! - only the canonical author's companions are accepted
//!
//! Every entry passes through the [`Deduplicator`] first, so replaying the
//! same id is a no-op.

use crate::board::{BoardDefinition, BoardEntry};
use crate::classify::{Entry, parse_entry};
use crate::codec::{BoardRef, Body, DeleteEntry, EditEntry, Presentation};
use crate::comment::CommentEntry;
use crate::dedupe::{DEFAULT_DEDUPE_CAPACITY, Deduplicator};
use crate::event::Event;
use crate::post::PostEntry;
use crate::profile::{ContactList, ProfileEntry};
use crate::report::ReportEntry;
use crate::vote::{Direction, VoteEntry};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Default number of companions held for canonical entries not yet seen.
pub const DEFAULT_PENDING_CAPACITY: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VoteTally {
    pub up: u32,
    pub down: u32,
}

impl VoteTally {
    pub fn score(&self) -> i64 {
        i64::from(self.up) - i64::from(self.down)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    /// Canonical id: the id of the original entry
    pub id: String,
    pub author: String,
    pub created_at: u64,
    pub board: Option<BoardRef>,
    pub title: String,
    pub body: Body,
    pub topics: Vec<String>,
    pub url: Option<String>,
    pub image: Option<String>,
    /// Timestamp of the accepted edit, if any
    pub edited_at: Option<u64>,
    pub deleted: bool,
    pub votes: VoteTally,
    pub comment_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: String,
    pub author: String,
    pub created_at: u64,
    pub post_id: String,
    pub parent_id: String,
    pub board: Option<BoardRef>,
    pub body: Body,
    pub edited_at: Option<u64>,
    pub deleted: bool,
    pub votes: VoteTally,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    pub coordinate: BoardRef,
    /// Id of the definition currently in effect
    pub id: String,
    pub author: String,
    pub created_at: u64,
    pub definition: BoardDefinition,
}

/// A canonical entity, as returned by lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Post(Post),
    Comment(Comment),
    Board(Board),
}

impl Entity {
    /// Stable key: the canonical id, or the coordinate for boards.
    pub fn key(&self) -> String {
        match self {
            Entity::Post(post) => post.id.clone(),
            Entity::Comment(comment) => comment.id.clone(),
            Entity::Board(board) => board.coordinate.to_string(),
        }
    }
}

/// Observable result of ingesting one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityChange {
    Post(Post),
    Comment(Comment),
    Board(Board),
    Votes { target: String, tally: VoteTally },
    Profile(ProfileEntry),
    Contacts(ContactList),
    Report(ReportEntry),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Post,
    Comment,
    /// Kind 5 deletions may target either
    Any,
}

#[derive(Debug, Clone)]
enum Companion {
    Edit(Scope, EditEntry),
    Delete(Scope, DeleteEntry),
}

impl Companion {
    fn stamp(&self) -> (u64, &str) {
        match self {
            Companion::Edit(_, edit) => (edit.created_at, edit.id.as_str()),
            Companion::Delete(_, delete) => (delete.created_at, delete.id.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
struct Ballot {
    id: String,
    created_at: u64,
    direction: Direction,
}

/// Merges entries into boards, posts, comments and vote tallies.
#[derive(Debug)]
pub struct ReconciliationEngine {
    seen: Deduplicator,
    posts: HashMap<String, Post>,
    comments: HashMap<String, Comment>,
    boards: HashMap<BoardRef, Board>,
    /// target -> voter -> latest ballot
    ballots: HashMap<String, HashMap<String, Ballot>>,
    /// canonical id -> (created_at, id) of the accepted edit
    edit_stamps: HashMap<String, (u64, String)>,
    /// canonical id -> companions waiting for it
    pending: HashMap<String, Vec<Companion>>,
    /// Targets in `pending`, longest waiting first
    pending_order: VecDeque<String>,
    pending_len: usize,
    pending_capacity: usize,
    contacts: HashMap<String, ContactList>,
    reports: HashMap<String, Vec<ReportEntry>>,
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_DEDUPE_CAPACITY)
    }

    /// Create an engine that remembers up to `dedupe_capacity` ingested ids.
    pub fn with_capacity(dedupe_capacity: usize) -> Self {
        Self::with_limits(dedupe_capacity, DEFAULT_PENDING_CAPACITY)
    }

    /// Like [`with_capacity`](Self::with_capacity), also holding at most
    /// `pending_capacity` companions for unseen canonical entries.
    pub fn with_limits(dedupe_capacity: usize, pending_capacity: usize) -> Self {
        Self {
            seen: Deduplicator::new(dedupe_capacity),
            posts: HashMap::new(),
            comments: HashMap::new(),
            boards: HashMap::new(),
            ballots: HashMap::new(),
            edit_stamps: HashMap::new(),
            pending: HashMap::new(),
            pending_order: VecDeque::new(),
            pending_len: 0,
            pending_capacity: pending_capacity.max(1),
            contacts: HashMap::new(),
            reports: HashMap::new(),
        }
    }

    /// Whether an entry id has already been ingested.
    pub fn is_processed(&self, id: &str) -> bool {
        self.seen.is_duplicate(id)
    }

    /// Record an id as processed without ingesting it, e.g. for our own
    /// writes echoed back by relays after local application.
    pub fn mark_processed(&mut self, id: &str) -> bool {
        self.seen.mark_processed(id)
    }

    /// Ingest one entry and return what changed.
    ///
    /// Duplicates, malformed entries and non-forum entries change nothing.
    pub fn ingest(&mut self, event: &Event) -> Vec<EntityChange> {
        if !self.seen.mark_processed(&event.id) {
            debug!("Skipping duplicate entry {}", event.id);
            return Vec::new();
        }

        let entry = match parse_entry(event) {
            Ok(Some(entry)) => entry,
            Ok(None) => return Vec::new(),
            Err(e) => {
                debug!("Dropping malformed entry {}: {}", event.id, e);
                return Vec::new();
            }
        };

        self.apply(entry)
    }

    /// Ingest entries oldest first and collect every change.
    pub fn ingest_all<'a>(&mut self, events: impl IntoIterator<Item = &'a Event>) -> Vec<EntityChange> {
        let mut events: Vec<&Event> = events.into_iter().collect();
        events.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        events.into_iter().flat_map(|e| self.ingest(e)).collect()
    }

    fn apply(&mut self, entry: Entry) -> Vec<EntityChange> {
        match entry {
            Entry::Post(post) => self.insert_post(post),
            Entry::Comment(comment) => self.insert_comment(comment),
            Entry::PostEdit(edit) => self.apply_edit(Scope::Post, edit),
            Entry::CommentEdit(edit) => self.apply_edit(Scope::Comment, edit),
            Entry::CommentDelete(delete) => self.apply_delete(Scope::Comment, delete),
            Entry::PostDelete(delete) => self.apply_delete(Scope::Any, delete),
            Entry::Vote(vote) => self.apply_vote(vote),
            Entry::Board(board) => self.apply_board(board),
            Entry::Profile(profile) => vec![EntityChange::Profile(profile)],
            Entry::Contacts(list) => self.apply_contacts(list),
            Entry::Report(report) => {
                let reports = self.reports.entry(report.target_id().to_string()).or_default();
                // Ids forgotten by the deduplicator can come around again
                if reports.iter().any(|r| r.id == report.id) {
                    return Vec::new();
                }
                reports.push(report.clone());
                vec![EntityChange::Report(report)]
            }
        }
    }

    fn insert_post(&mut self, entry: PostEntry) -> Vec<EntityChange> {
        if self.posts.contains_key(&entry.id) || self.comments.contains_key(&entry.id) {
            return Vec::new();
        }
        let id = entry.id.clone();
        let post = Post {
            votes: self.tally(&id),
            comment_count: self.count_comments(&id),
            id: entry.id,
            author: entry.author,
            created_at: entry.created_at,
            board: entry.board,
            title: entry.title,
            body: entry.body,
            topics: entry.topics,
            url: entry.url,
            image: entry.image,
            edited_at: None,
            deleted: false,
        };
        self.posts.insert(id.clone(), post);
        self.resolve_pending(&id);

        self.posts
            .get(&id)
            .map(|p| vec![EntityChange::Post(p.clone())])
            .unwrap_or_default()
    }

    fn insert_comment(&mut self, entry: CommentEntry) -> Vec<EntityChange> {
        if self.posts.contains_key(&entry.id) || self.comments.contains_key(&entry.id) {
            return Vec::new();
        }
        let id = entry.id.clone();
        let post_id = entry.post_id.clone();
        let comment = Comment {
            votes: self.tally(&id),
            id: entry.id,
            author: entry.author,
            created_at: entry.created_at,
            post_id: entry.post_id,
            parent_id: entry.parent_id,
            board: entry.board,
            body: entry.body,
            edited_at: None,
            deleted: false,
        };
        self.comments.insert(id.clone(), comment);
        self.resolve_pending(&id);

        let mut changes: Vec<EntityChange> = self
            .comments
            .get(&id)
            .map(|c| EntityChange::Comment(c.clone()))
            .into_iter()
            .collect();
        changes.extend(self.refresh_comment_count(&post_id));
        changes
    }

    /// Apply companions that arrived before `id`, oldest first.
    fn resolve_pending(&mut self, id: &str) {
        let Some(mut companions) = self.pending.remove(id) else {
            return;
        };
        self.pending_len -= companions.len();
        self.pending_order.retain(|target| target != id);
        companions.sort_by(|a, b| a.stamp().cmp(&b.stamp()));
        debug!("Applying {} held companions to {}", companions.len(), id);

        for companion in companions {
            match companion {
                Companion::Edit(scope, edit) => {
                    self.apply_edit(scope, edit);
                }
                Companion::Delete(scope, delete) => {
                    self.delete_one(scope, id, &delete);
                }
            }
        }
    }

    fn hold(&mut self, id: &str, companion: Companion) {
        while self.pending_len >= self.pending_capacity {
            let Some(oldest) = self.pending_order.pop_front() else {
                break;
            };
            if let Some(dropped) = self.pending.remove(&oldest) {
                debug!("Forgetting {} held companions for {}", dropped.len(), oldest);
                self.pending_len -= dropped.len();
            }
        }

        debug!("Holding companion for unseen entry {}", id);
        if !self.pending.contains_key(id) {
            self.pending_order.push_back(id.to_string());
        }
        self.pending.entry(id.to_string()).or_default().push(companion);
        self.pending_len += 1;
    }

    fn apply_edit(&mut self, scope: Scope, edit: EditEntry) -> Vec<EntityChange> {
        let id = edit.original.clone();
        let known_post = self.posts.contains_key(&id);
        let known_comment = self.comments.contains_key(&id);

        if !known_post && !known_comment {
            self.hold(&id, Companion::Edit(scope, edit));
            return Vec::new();
        }
        if (scope == Scope::Post && !known_post) || (scope == Scope::Comment && !known_comment) {
            debug!("Dropping edit {}: target {} has a different type", edit.id, id);
            return Vec::new();
        }

        let stamp = (edit.created_at, edit.id.clone());
        if self.edit_stamps.get(&id).is_some_and(|current| *current >= stamp) {
            return Vec::new();
        }

        let change = if let Some(post) = self.posts.get_mut(&id) {
            if post.author != edit.author || post.deleted {
                return Vec::new();
            }
            apply_presentation_to_post(post, edit.presentation);
            post.edited_at = Some(edit.created_at);
            EntityChange::Post(post.clone())
        } else if let Some(comment) = self.comments.get_mut(&id) {
            if comment.author != edit.author || comment.deleted {
                return Vec::new();
            }
            if let Some(body) = edit.presentation.body {
                comment.body = body;
            }
            comment.edited_at = Some(edit.created_at);
            EntityChange::Comment(comment.clone())
        } else {
            return Vec::new();
        };

        self.edit_stamps.insert(id, stamp);
        vec![change]
    }

    fn apply_delete(&mut self, scope: Scope, delete: DeleteEntry) -> Vec<EntityChange> {
        let mut changes = Vec::new();
        for target in &delete.targets {
            changes.extend(self.delete_one(scope, target, &delete));
        }
        changes
    }

    fn delete_one(&mut self, scope: Scope, target: &str, delete: &DeleteEntry) -> Vec<EntityChange> {
        if scope != Scope::Comment {
            if let Some(post) = self.posts.get_mut(target) {
                if post.author != delete.author || post.deleted {
                    return Vec::new();
                }
                tombstone_post(post);
                return vec![EntityChange::Post(post.clone())];
            }
        }

        if scope != Scope::Post {
            if let Some(comment) = self.comments.get_mut(target) {
                if comment.author != delete.author || comment.deleted {
                    return Vec::new();
                }
                comment.deleted = true;
                comment.body = Body::Removed;
                let snapshot = comment.clone();
                let mut changes = vec![EntityChange::Comment(snapshot.clone())];
                changes.extend(self.refresh_comment_count(&snapshot.post_id));
                return changes;
            }
        }

        if self.posts.contains_key(target) || self.comments.contains_key(target) {
            debug!("Dropping delete {}: target {} has a different type", delete.id, target);
            return Vec::new();
        }

        let held = DeleteEntry {
            targets: vec![target.to_string()],
            ..delete.clone()
        };
        self.hold(target, Companion::Delete(scope, held));
        Vec::new()
    }

    fn apply_vote(&mut self, vote: VoteEntry) -> Vec<EntityChange> {
        let ballots = self.ballots.entry(vote.target.clone()).or_default();
        let newer = ballots.get(&vote.voter).is_none_or(|current| {
            (vote.created_at, vote.id.as_str()) > (current.created_at, current.id.as_str())
        });
        if !newer {
            return Vec::new();
        }
        ballots.insert(
            vote.voter.clone(),
            Ballot {
                id: vote.id.clone(),
                created_at: vote.created_at,
                direction: vote.direction,
            },
        );

        let tally = self.tally(&vote.target);
        if let Some(post) = self.posts.get_mut(&vote.target) {
            post.votes = tally;
        } else if let Some(comment) = self.comments.get_mut(&vote.target) {
            comment.votes = tally;
        }

        vec![EntityChange::Votes {
            target: vote.target,
            tally,
        }]
    }

    fn apply_board(&mut self, entry: BoardEntry) -> Vec<EntityChange> {
        let coordinate = entry.coordinate();
        if let Some(current) = self.boards.get(&coordinate) {
            if (current.created_at, current.id.as_str()) >= (entry.created_at, entry.id.as_str()) {
                return Vec::new();
            }
        }
        let board = Board {
            coordinate: coordinate.clone(),
            id: entry.id,
            author: entry.author,
            created_at: entry.created_at,
            definition: entry.definition,
        };
        self.boards.insert(coordinate, board.clone());
        vec![EntityChange::Board(board)]
    }

    fn apply_contacts(&mut self, list: ContactList) -> Vec<EntityChange> {
        if let Some(current) = self.contacts.get(&list.author) {
            if (current.created_at, current.id.as_str()) >= (list.created_at, list.id.as_str()) {
                return Vec::new();
            }
        }
        self.contacts.insert(list.author.clone(), list.clone());
        vec![EntityChange::Contacts(list)]
    }

    fn count_comments(&self, post_id: &str) -> usize {
        self.comments
            .values()
            .filter(|c| c.post_id == post_id && !c.deleted)
            .count()
    }

    fn refresh_comment_count(&mut self, post_id: &str) -> Option<EntityChange> {
        let count = self.count_comments(post_id);
        let post = self.posts.get_mut(post_id)?;
        if post.comment_count == count {
            return None;
        }
        post.comment_count = count;
        Some(EntityChange::Post(post.clone()))
    }

    pub fn post(&self, id: &str) -> Option<&Post> {
        self.posts.get(id)
    }

    pub fn comment(&self, id: &str) -> Option<&Comment> {
        self.comments.get(id)
    }

    pub fn board(&self, coordinate: &BoardRef) -> Option<&Board> {
        self.boards.get(coordinate)
    }

    /// All known boards, ordered by name.
    pub fn boards(&self) -> Vec<&Board> {
        let mut boards: Vec<&Board> = self.boards.values().collect();
        boards.sort_by(|a, b| a.definition.name.cmp(&b.definition.name));
        boards
    }

    /// Posts of a board, newest first.
    pub fn posts_in_board(&self, board: &BoardRef) -> Vec<&Post> {
        let mut posts: Vec<&Post> = self
            .posts
            .values()
            .filter(|p| p.board.as_ref() == Some(board))
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        posts
    }

    /// Comments of a post, oldest first.
    pub fn comments_for_post(&self, post_id: &str) -> Vec<&Comment> {
        let mut comments: Vec<&Comment> = self
            .comments
            .values()
            .filter(|c| c.post_id == post_id)
            .collect();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        comments
    }

    /// Tally of the latest vote per voter on `target`.
    pub fn tally(&self, target: &str) -> VoteTally {
        let mut tally = VoteTally::default();
        for ballot in self.ballots.get(target).into_iter().flat_map(|b| b.values()) {
            match ballot.direction {
                Direction::Up => tally.up += 1,
                Direction::Down => tally.down += 1,
            }
        }
        tally
    }

    /// The effective vote of `voter` on `target`.
    pub fn vote_of(&self, target: &str, voter: &str) -> Option<Direction> {
        self.ballots.get(target)?.get(voter).map(|b| b.direction)
    }

    pub fn contacts(&self, author: &str) -> Option<&ContactList> {
        self.contacts.get(author)
    }

    pub fn reports_for(&self, target: &str) -> &[ReportEntry] {
        self.reports.get(target).map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of companions waiting for their canonical entry.
    pub fn pending_count(&self) -> usize {
        self.pending_len
    }

    /// Post or comment by canonical id.
    pub fn entity(&self, id: &str) -> Option<Entity> {
        if let Some(post) = self.posts.get(id) {
            return Some(Entity::Post(post.clone()));
        }
        self.comments.get(id).map(|c| Entity::Comment(c.clone()))
    }

    /// The canonical entity an entry contributes to, if it is known.
    ///
    /// Companions and votes resolve to their target; board definitions to
    /// the board currently in effect.
    pub fn resolve(&self, event: &Event) -> Option<Entity> {
        match parse_entry(event).ok()?? {
            Entry::Post(post) => self.entity(&post.id),
            Entry::Comment(comment) => self.entity(&comment.id),
            Entry::PostEdit(edit) | Entry::CommentEdit(edit) => self.entity(&edit.original),
            Entry::CommentDelete(delete) | Entry::PostDelete(delete) => {
                delete.targets.iter().find_map(|t| self.entity(t))
            }
            Entry::Vote(vote) => self.entity(&vote.target),
            Entry::Board(board) => self
                .boards
                .get(&board.coordinate())
                .map(|b| Entity::Board(b.clone())),
            Entry::Profile(_) | Entry::Contacts(_) | Entry::Report(_) => None,
        }
    }
}

fn apply_presentation_to_post(post: &mut Post, presentation: Presentation) {
    if let Some(title) = presentation.title {
        post.title = title;
    }
    if let Some(body) = presentation.body {
        post.body = body;
    }
    post.topics = presentation.topics;
    post.url = presentation.url;
    post.image = presentation.image;
}

fn tombstone_post(post: &mut Post) {
    post.deleted = true;
    post.title.clear();
    post.body = Body::Removed;
    post.topics.clear();
    post.url = None;
    post.image = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::build_board;
    use crate::codec::build_deletion;
    use crate::comment::{NewComment, build_comment, build_comment_delete, build_comment_edit};
    use crate::event::{EventTemplate, KIND_TEXT_ENTRY};
    use crate::post::{NewPost, build_post, build_post_edit};
    use crate::report::{ReportTarget, ReportType, build_report};
    use crate::vote::build_vote;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const ALICE: &str = "alice";
    const BOB: &str = "bob";

    fn sign(template: EventTemplate, id: &str, author: &str) -> Event {
        Event {
            id: id.to_string(),
            pubkey: author.to_string(),
            created_at: template.created_at,
            kind: template.kind,
            tags: template.tags,
            content: template.content,
            sig: String::new(),
        }
    }

    fn board() -> BoardRef {
        BoardRef::new("mod", "rust")
    }

    fn post(id: &str, created_at: u64) -> Event {
        let new = NewPost::new(board(), "Original title", "original body").with_topic("rust");
        sign(build_post(&new, created_at), id, ALICE)
    }

    fn post_edit(id: &str, original: &str, title: &str, created_at: u64, author: &str) -> Event {
        let new = NewPost::new(board(), title, format!("{} body", title));
        sign(build_post_edit(original, &new, created_at), id, author)
    }

    fn comment(id: &str, post_id: &str, created_at: u64) -> Event {
        sign(build_comment(&NewComment::new(post_id, "first!"), created_at), id, BOB)
    }

    fn comment_edit(id: &str, original: &str, body: &str, created_at: u64) -> Event {
        sign(build_comment_edit(original, &Body::plain(body), created_at), id, BOB)
    }

    fn vote(id: &str, voter: &str, target: &str, direction: Direction, created_at: u64) -> Event {
        sign(build_vote(target, ALICE, direction, created_at), id, voter)
    }

    #[test]
    fn test_post_and_comment_count() {
        let mut engine = ReconciliationEngine::new();
        let changes = engine.ingest(&post("p1", 1));
        assert!(matches!(&changes[..], [EntityChange::Post(p)] if p.id == "p1"));

        let changes = engine.ingest(&comment("c1", "p1", 2));
        assert_eq!(changes.len(), 2);
        assert_eq!(engine.post("p1").unwrap().comment_count, 1);
        assert_eq!(engine.comments_for_post("p1").len(), 1);
        assert_eq!(engine.posts_in_board(&board()).len(), 1);
    }

    #[test]
    fn test_comment_before_post_is_counted() {
        let mut engine = ReconciliationEngine::new();
        engine.ingest(&comment("c1", "p1", 2));
        engine.ingest(&post("p1", 1));
        assert_eq!(engine.post("p1").unwrap().comment_count, 1);
    }

    #[test]
    fn test_duplicate_ingest_is_noop() {
        let mut engine = ReconciliationEngine::new();
        engine.ingest(&post("p1", 1));
        engine.ingest(&post_edit("e1", "p1", "Edited", 5, ALICE));
        let before = engine.post("p1").cloned();

        assert!(engine.ingest(&post("p1", 1)).is_empty());
        assert!(engine.ingest(&post_edit("e1", "p1", "Edited", 5, ALICE)).is_empty());
        assert_eq!(engine.post("p1").cloned(), before);
        assert!(engine.is_processed("e1"));
    }

    #[test]
    fn test_edit_replaces_presentation_only() {
        let mut engine = ReconciliationEngine::new();
        engine.ingest(&post("p1", 1));
        engine.ingest(&comment("c1", "p1", 2));
        engine.ingest(&vote("v1", BOB, "p1", Direction::Up, 2));

        engine.ingest(&post_edit("e1", "p1", "Edited", 5, ALICE));
        let post = engine.post("p1").unwrap();
        assert_eq!(post.id, "p1");
        assert_eq!(post.title, "Edited");
        assert_eq!(post.body, Body::plain("Edited body"));
        assert!(post.topics.is_empty());
        assert_eq!(post.edited_at, Some(5));
        assert_eq!(post.votes, VoteTally { up: 1, down: 0 });
        assert_eq!(post.comment_count, 1);
        assert_eq!(post.created_at, 1);
    }

    #[test]
    fn test_out_of_order_comment_edits() {
        let mut engine = ReconciliationEngine::new();
        engine.ingest(&comment("c1", "p1", 1));
        engine.ingest(&comment_edit("e5", "c1", "five", 5));
        engine.ingest(&comment_edit("e3", "c1", "three", 3));
        assert_eq!(engine.comment("c1").unwrap().body, Body::plain("five"));
        assert_eq!(engine.comment("c1").unwrap().edited_at, Some(5));
    }

    #[test]
    fn test_equal_timestamp_edits_break_ties_by_id() {
        let mut engine = ReconciliationEngine::new();
        engine.ingest(&comment("c1", "p1", 1));
        engine.ingest(&comment_edit("eb", "c1", "b", 5));
        engine.ingest(&comment_edit("ea", "c1", "a", 5));
        assert_eq!(engine.comment("c1").unwrap().body, Body::plain("b"));
    }

    #[test]
    fn test_edit_from_other_author_is_ignored() {
        let mut engine = ReconciliationEngine::new();
        engine.ingest(&post("p1", 1));
        assert!(engine.ingest(&post_edit("e1", "p1", "Hijacked", 5, BOB)).is_empty());
        assert_eq!(engine.post("p1").unwrap().title, "Original title");
    }

    #[test]
    fn test_companions_before_canonical_are_held() {
        let mut engine = ReconciliationEngine::new();
        engine.ingest(&post_edit("e1", "p1", "Edited", 5, ALICE));
        engine.ingest(&post_edit("e0", "p1", "Hijacked", 9, BOB));
        assert_eq!(engine.pending_count(), 2);

        engine.ingest(&post("p1", 1));
        assert_eq!(engine.pending_count(), 0);
        assert_eq!(engine.post("p1").unwrap().title, "Edited");
    }

    #[test]
    fn test_held_companions_are_bounded() {
        let mut engine = ReconciliationEngine::with_limits(100, 3);
        engine.ingest(&post_edit("e1", "p1", "First", 5, ALICE));
        engine.ingest(&post_edit("e2", "p2", "Second", 5, ALICE));
        engine.ingest(&post_edit("e3", "p2", "Second again", 6, ALICE));
        assert_eq!(engine.pending_count(), 3);

        // p1 has waited longest and is forgotten to make room
        engine.ingest(&post_edit("e4", "p3", "Third", 5, ALICE));
        assert_eq!(engine.pending_count(), 3);

        engine.ingest(&post("p1", 1));
        assert_eq!(engine.post("p1").unwrap().title, "Original title");
        engine.ingest(&post("p2", 1));
        assert_eq!(engine.post("p2").unwrap().title, "Second again");
        assert_eq!(engine.pending_count(), 1);

        // Resolved targets free their room
        engine.ingest(&post_edit("e5", "p4", "Fourth", 5, ALICE));
        engine.ingest(&post_edit("e6", "p5", "Fifth", 5, ALICE));
        assert_eq!(engine.pending_count(), 3);
        engine.ingest(&post("p3", 1));
        assert_eq!(engine.post("p3").unwrap().title, "Third");
    }

    #[test]
    fn test_report_seen_again_is_not_duplicated() {
        let mut engine = ReconciliationEngine::with_capacity(1);
        let target = ReportTarget::Entry {
            id: "p1".to_string(),
            author: ALICE.to_string(),
        };
        let report = sign(build_report(&target, ReportType::Spam, "ads", 3), "r1", BOB);

        assert_eq!(engine.ingest(&report).len(), 1);
        // Evict r1 from the deduplicator, then deliver it again
        engine.ingest(&post("p1", 1));
        assert!(!engine.is_processed("r1"));
        assert!(engine.ingest(&report).is_empty());
        assert_eq!(engine.reports_for("p1").len(), 1);
    }

    #[test]
    fn test_delete_is_a_monotonic_tombstone() {
        let mut engine = ReconciliationEngine::new();
        engine.ingest(&post("p1", 1));
        engine.ingest(&post_edit("e5", "p1", "Edit", 5, ALICE));
        engine.ingest(&sign(build_deletion(&["p1".to_string()], "", 6), "d1", ALICE));

        let post = engine.post("p1").unwrap();
        assert!(post.deleted);
        assert_eq!(post.body, Body::Removed);
        assert!(post.title.is_empty());

        // A later edit does not resurrect it
        engine.ingest(&post_edit("e9", "p1", "Back", 9, ALICE));
        assert!(engine.post("p1").unwrap().deleted);
        assert_eq!(engine.post("p1").unwrap().body, Body::Removed);
    }

    #[test]
    fn test_delete_before_edit_and_canonical() {
        let mut engine = ReconciliationEngine::new();
        engine.ingest(&sign(build_comment_delete("c1", "", 6), "d1", BOB));
        engine.ingest(&comment_edit("e4", "c1", "four", 4));
        engine.ingest(&comment("c1", "p1", 1));
        let comment = engine.comment("c1").unwrap();
        assert!(comment.deleted);
        assert_eq!(comment.body, Body::Removed);
    }

    #[test]
    fn test_comment_delete_updates_count() {
        let mut engine = ReconciliationEngine::new();
        engine.ingest(&post("p1", 1));
        engine.ingest(&comment("c1", "p1", 2));
        engine.ingest(&comment("c2", "p1", 3));
        assert_eq!(engine.post("p1").unwrap().comment_count, 2);

        engine.ingest(&sign(build_comment_delete("c1", "", 4), "d1", BOB));
        assert_eq!(engine.post("p1").unwrap().comment_count, 1);
    }

    #[test]
    fn test_comment_delete_cannot_target_post() {
        let mut engine = ReconciliationEngine::new();
        engine.ingest(&post("p1", 1));
        engine.ingest(&sign(build_comment_delete("p1", "", 4), "d1", ALICE));
        assert!(!engine.post("p1").unwrap().deleted);
    }

    #[test]
    fn test_vote_tally_latest_per_voter() {
        let mut engine = ReconciliationEngine::new();
        engine.ingest(&post("p1", 1));
        engine.ingest(&vote("v1", "A", "p1", Direction::Up, 10));
        engine.ingest(&vote("v2", "B", "p1", Direction::Down, 11));
        engine.ingest(&vote("v3", "A", "p1", Direction::Down, 12));

        // A's later vote replaces A's earlier one; B's stands
        assert_eq!(engine.tally("p1"), VoteTally { up: 0, down: 2 });
        assert_eq!(engine.post("p1").unwrap().votes, VoteTally { up: 0, down: 2 });
        assert_eq!(engine.vote_of("p1", "A"), Some(Direction::Down));

        // An older vote arriving late does not win
        assert!(engine.ingest(&vote("v0", "B", "p1", Direction::Up, 1)).is_empty());
        assert_eq!(engine.tally("p1").score(), -2);
    }

    #[test]
    fn test_invalid_vote_is_discarded() {
        let mut engine = ReconciliationEngine::new();
        let mut bad = vote("v1", "A", "p1", Direction::Up, 10);
        bad.content = "🔥".to_string();
        assert!(engine.ingest(&bad).is_empty());
        assert_eq!(engine.tally("p1"), VoteTally::default());
    }

    #[test]
    fn test_newest_board_definition_wins() {
        let mut engine = ReconciliationEngine::new();
        let def = |name: &str| BoardDefinition {
            slug: "rust".to_string(),
            name: name.to_string(),
            ..Default::default()
        };
        engine.ingest(&sign(build_board(&def("New"), 5), "b2", "mod"));
        engine.ingest(&sign(build_board(&def("Old"), 1), "b1", "mod"));
        assert_eq!(engine.board(&board()).unwrap().definition.name, "New");
        assert_eq!(engine.boards().len(), 1);
    }

    #[test]
    fn test_unknown_and_malformed_entries_are_dropped() {
        let mut engine = ReconciliationEngine::new();
        let note = sign(
            EventTemplate {
                created_at: 1,
                kind: KIND_TEXT_ENTRY,
                tags: vec![],
                content: "just a note".to_string(),
            },
            "n1",
            ALICE,
        );
        assert!(engine.ingest(&note).is_empty());

        let mut edit = post_edit("e1", "p1", "x", 2, ALICE);
        edit.tags.retain(|t| t[0] != "original");
        assert!(engine.ingest(&edit).is_empty());
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn test_resolve_companion_to_canonical() {
        let mut engine = ReconciliationEngine::new();
        let edit = post_edit("e1", "p1", "Edited", 5, ALICE);
        engine.ingest(&post("p1", 1));
        engine.ingest(&edit);
        match engine.resolve(&edit) {
            Some(Entity::Post(post)) => assert_eq!(post.title, "Edited"),
            other => panic!("unexpected resolution: {:?}", other),
        }
    }

    fn edits_strategy() -> impl Strategy<Value = Vec<Event>> {
        prop::collection::vec((1u64..20, "[a-f]{4}"), 1..8).prop_map(|specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (ts, suffix))| {
                    comment_edit(&format!("{}{}", suffix, i), "c1", &format!("v{}", i), ts)
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_edit_order_does_not_matter(
            (edits, shuffled) in edits_strategy()
                .prop_flat_map(|edits| (Just(edits.clone()), Just(edits).prop_shuffle()))
        ) {
            let expected = edits
                .iter()
                .max_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)))
                .map(|e| e.content.clone())
                .unwrap();

            let mut engine = ReconciliationEngine::new();
            engine.ingest(&comment("c1", "p1", 0));
            for edit in &shuffled {
                engine.ingest(edit);
            }
            prop_assert_eq!(engine.comment("c1").unwrap().body.text(), Some(expected.as_str()));
        }

        #[test]
        fn prop_replay_is_idempotent(edits in edits_strategy(), canonical_at in 0usize..8) {
            let mut events = edits;
            let at = canonical_at.min(events.len());
            events.insert(at, comment("c1", "p1", 0));

            let mut once = ReconciliationEngine::new();
            for event in &events {
                once.ingest(event);
            }
            let mut twice = ReconciliationEngine::new();
            for event in events.iter().chain(events.iter()) {
                twice.ingest(event);
            }
            prop_assert_eq!(once.comment("c1"), twice.comment("c1"));
        }

        #[test]
        fn prop_delete_wins_in_any_order(
            events in edits_strategy().prop_flat_map(|mut edits| {
                edits.push(comment("c1", "p1", 0));
                edits.push(sign(build_comment_delete("c1", "", 30), "del", BOB));
                Just(edits).prop_shuffle()
            })
        ) {
            let mut engine = ReconciliationEngine::new();
            for event in &events {
                engine.ingest(event);
            }
            let comment = engine.comment("c1").unwrap();
            prop_assert!(comment.deleted);
            prop_assert_eq!(&comment.body, &Body::Removed);
        }
    }
}
