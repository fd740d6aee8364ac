//! Comments: threaded replies to a post or to another comment.

use crate::codec::{
    BoardRef, Body, CodecError, EntryType, Presentation, TAG_ORIGINAL, build_edit, expect_kind,
    tag,
};
use crate::event::{Event, EventTemplate, KIND_TEXT_ENTRY};
use crate::thread::ThreadRefs;

/// Input for a new comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComment {
    /// The post this comment belongs to
    pub post_id: String,
    /// Direct parent; `None` for a top-level comment
    pub parent_id: Option<String>,
    /// Author of the direct parent, tagged so they see the reply
    pub parent_author: Option<String>,
    pub board: Option<BoardRef>,
    pub body: Body,
}

impl NewComment {
    pub fn new(post_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            post_id: post_id.into(),
            parent_id: None,
            parent_author: None,
            board: None,
            body: Body::plain(content),
        }
    }

    pub fn reply_to(mut self, parent_id: impl Into<String>, parent_author: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self.parent_author = Some(parent_author.into());
        self
    }

    pub fn in_board(mut self, board: BoardRef) -> Self {
        self.board = Some(board);
        self
    }
}

/// A parsed comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentEntry {
    pub id: String,
    pub author: String,
    pub created_at: u64,
    pub post_id: String,
    pub parent_id: String,
    pub board: Option<BoardRef>,
    pub body: Body,
}

fn body_presentation(body: &Body) -> Presentation {
    Presentation {
        body: Some(body.clone()),
        ..Default::default()
    }
}

/// Build a new comment.
pub fn build_comment(comment: &NewComment, created_at: u64) -> EventTemplate {
    let mut tags = vec![EntryType::Comment.to_tag()];
    tags.extend(ThreadRefs::tags_for(
        &comment.post_id,
        comment.parent_id.as_deref(),
    ));
    if let Some(author) = &comment.parent_author {
        tags.push(tag("p", author.clone()));
    }
    if let Some(board) = &comment.board {
        tags.push(board.to_tag());
    }
    let content = body_presentation(&comment.body).encode_into(&mut tags);
    EventTemplate {
        created_at,
        kind: KIND_TEXT_ENTRY,
        tags,
        content,
    }
}

/// Build an edit companion replacing the body of comment `original`.
pub fn build_comment_edit(original: &str, body: &Body, created_at: u64) -> EventTemplate {
    build_edit(
        EntryType::CommentEdit,
        original,
        &body_presentation(body),
        vec![],
        created_at,
    )
}

/// Build the delete companion for a comment.
pub fn build_comment_delete(original: &str, reason: &str, created_at: u64) -> EventTemplate {
    EventTemplate {
        created_at,
        kind: KIND_TEXT_ENTRY,
        tags: vec![
            EntryType::CommentDelete.to_tag(),
            tag(TAG_ORIGINAL, original),
        ],
        content: reason.to_string(),
    }
}

/// Parse a comment. Requires at least one thread reference.
pub fn parse_comment(event: &Event) -> Result<CommentEntry, CodecError> {
    expect_kind(event, KIND_TEXT_ENTRY)?;
    let refs = ThreadRefs::from_tags(&event.tags);
    let (Some(post_id), Some(parent_id)) = (refs.root_id(), refs.parent_id()) else {
        return Err(CodecError::MissingTag("e"));
    };

    Ok(CommentEntry {
        id: event.id.clone(),
        author: event.pubkey.clone(),
        created_at: event.created_at,
        post_id: post_id.to_string(),
        parent_id: parent_id.to_string(),
        board: BoardRef::from_event(event),
        body: Body::from_event(event),
    })
}
