//! Forum model over an append-only event log.
//!
//! This crate provides:
//! - Event: the signed log entry, its id hash and tag accessors
//! - Codec: builders and parsers for posts, comments, edits, deletions,
//!   votes, board definitions, profiles, contact lists and reports
//! - Thread references (root/reply markers with positional fallback)
//! - Classification of raw entries (discriminant tag, then legacy shape)
//! - Deduplicator: bounded record of ingested ids
//! - ReconciliationEngine: merges edit/delete companions onto canonical entities
//!
//! Nothing here performs I/O. Relay connectivity lives in `forum-client`.

mod board;
mod classify;
mod codec;
mod comment;
mod dedupe;
mod event;
mod post;
mod profile;
mod reconcile;
mod report;
mod thread;
mod vote;

// Event record
pub use event::{
    Event, EventError, EventTemplate, KIND_BOARD_DEFINITION, KIND_CONTACTS, KIND_DELETION,
    KIND_METADATA, KIND_REPORT, KIND_TEXT_ENTRY, KIND_VOTE, UnsignedEvent, event_id, is_hex_key,
    serialize_event, sort_events, unix_now,
};

// Shared tag vocabulary
pub use codec::{
    BoardRef, Body, CodecError, DeleteEntry, EditEntry, EntryType, Presentation, TAG_BOARD,
    TAG_ENCRYPTED, TAG_IMAGE, TAG_ORIGINAL, TAG_TITLE, TAG_TOPIC, TAG_TYPE, TAG_URL,
    build_deletion, parse_comment_delete, parse_deletion, parse_edit, tag,
};

// Entries
pub use board::{BoardDefinition, BoardEntry, build_board, parse_board};
pub use comment::{
    CommentEntry, NewComment, build_comment, build_comment_delete, build_comment_edit,
    parse_comment,
};
pub use post::{NewPost, PostEntry, build_post, build_post_delete, build_post_edit, parse_post};
pub use profile::{
    Contact, ContactList, ProfileEntry, ProfileMetadata, build_contact_list, build_profile,
    parse_contact_list, parse_profile,
};
pub use report::{ReportEntry, ReportTarget, ReportType, build_report, parse_report};
pub use thread::{EventReference, Marker, ThreadRefs};
pub use vote::{Direction, VoteEntry, build_vote, parse_vote};

// Classification and reconciliation
pub use classify::{Classification, Entry, EntryKind, Origin, classify, parse_entry};
pub use dedupe::{DEFAULT_DEDUPE_CAPACITY, Deduplicator};
pub use reconcile::{
    Board, Comment, DEFAULT_PENDING_CAPACITY, Entity, EntityChange, Post, ReconciliationEngine,
    VoteTally,
};
