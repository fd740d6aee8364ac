//! Classification of raw entries into logical forum actions.
//!
//! Precedence for kind 1 text entries:
//! 1. An explicit `type` tag is authoritative, even when the payload also
//!    matches another legacy shape. An unrecognized value is `Unknown`.
//! 2. Without one, the legacy shape decides: title + board reference and no
//!    thread references is a post; any thread reference makes a comment.
//!
//! An entry matching both legacy shapes (title, board and thread references)
//! is a comment. Other kinds classify by kind number alone.

use crate::board::{BoardEntry, parse_board};
use crate::codec::{
    BoardRef, CodecError, DeleteEntry, EditEntry, EntryType, TAG_TITLE, TAG_TYPE,
    parse_comment_delete, parse_deletion, parse_edit,
};
use crate::comment::{CommentEntry, parse_comment};
use crate::event::{
    Event, KIND_BOARD_DEFINITION, KIND_CONTACTS, KIND_DELETION, KIND_METADATA, KIND_REPORT,
    KIND_TEXT_ENTRY, KIND_VOTE,
};
use crate::post::{PostEntry, parse_post};
use crate::profile::{ContactList, ProfileEntry, parse_contact_list, parse_profile};
use crate::report::{ReportEntry, parse_report};
use crate::thread::ThreadRefs;
use crate::vote::{VoteEntry, parse_vote};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Post,
    Comment,
    PostEdit,
    CommentEdit,
    CommentDelete,
    /// Kind 5 deletion request
    PostDelete,
    Vote,
    Board,
    Profile,
    Contacts,
    Report,
    Unknown,
}

/// What decided the classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    KindNumber,
    Discriminant,
    LegacyShape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: EntryKind,
    pub origin: Origin,
}

impl From<EntryType> for EntryKind {
    fn from(value: EntryType) -> Self {
        match value {
            EntryType::Post => EntryKind::Post,
            EntryType::Comment => EntryKind::Comment,
            EntryType::PostEdit => EntryKind::PostEdit,
            EntryType::CommentEdit => EntryKind::CommentEdit,
            EntryType::CommentDelete => EntryKind::CommentDelete,
        }
    }
}

/// Classify an entry without parsing its payload.
pub fn classify(event: &Event) -> Classification {
    let by_kind = |kind| Classification {
        kind,
        origin: Origin::KindNumber,
    };

    match event.kind {
        KIND_TEXT_ENTRY => classify_text_entry(event),
        KIND_METADATA => by_kind(EntryKind::Profile),
        KIND_CONTACTS => by_kind(EntryKind::Contacts),
        KIND_DELETION => by_kind(EntryKind::PostDelete),
        KIND_VOTE => by_kind(EntryKind::Vote),
        KIND_REPORT => by_kind(EntryKind::Report),
        KIND_BOARD_DEFINITION => by_kind(EntryKind::Board),
        _ => by_kind(EntryKind::Unknown),
    }
}

fn classify_text_entry(event: &Event) -> Classification {
    if let Some(value) = event.tag_value(TAG_TYPE) {
        let kind = value
            .parse::<EntryType>()
            .map(EntryKind::from)
            .unwrap_or(EntryKind::Unknown);
        return Classification {
            kind,
            origin: Origin::Discriminant,
        };
    }

    let threaded = ThreadRefs::from_tags(&event.tags).is_threaded();
    let kind = if threaded {
        EntryKind::Comment
    } else if event.has_tag(TAG_TITLE) && BoardRef::from_event(event).is_some() {
        EntryKind::Post
    } else {
        EntryKind::Unknown
    };
    Classification {
        kind,
        origin: Origin::LegacyShape,
    }
}

/// A classified and parsed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Post(PostEntry),
    Comment(CommentEntry),
    PostEdit(EditEntry),
    CommentEdit(EditEntry),
    CommentDelete(DeleteEntry),
    PostDelete(DeleteEntry),
    Vote(VoteEntry),
    Board(BoardEntry),
    Profile(ProfileEntry),
    Contacts(ContactList),
    Report(ReportEntry),
}

/// Classify and parse an entry. `Ok(None)` means the entry is not a forum
/// action; `Err` means it claims to be one but is malformed.
pub fn parse_entry(event: &Event) -> Result<Option<Entry>, CodecError> {
    let entry = match classify(event).kind {
        EntryKind::Post => Entry::Post(parse_post(event)?),
        EntryKind::Comment => Entry::Comment(parse_comment(event)?),
        EntryKind::PostEdit => Entry::PostEdit(parse_edit(event)?),
        EntryKind::CommentEdit => Entry::CommentEdit(parse_edit(event)?),
        EntryKind::CommentDelete => Entry::CommentDelete(parse_comment_delete(event)?),
        EntryKind::PostDelete => Entry::PostDelete(parse_deletion(event)?),
        EntryKind::Vote => Entry::Vote(parse_vote(event)?),
        EntryKind::Board => Entry::Board(parse_board(event)?),
        EntryKind::Profile => Entry::Profile(parse_profile(event)?),
        EntryKind::Contacts => Entry::Contacts(parse_contact_list(event)?),
        EntryKind::Report => Entry::Report(parse_report(event)?),
        EntryKind::Unknown => return Ok(None),
    };
    Ok(Some(entry))
}
