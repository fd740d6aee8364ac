//! Posts: top-level entries of a board, plus their edit and delete companions.

use crate::codec::{
    BoardRef, Body, CodecError, EntryType, Presentation, build_deletion, build_edit, expect_kind,
};
use crate::event::{Event, EventTemplate, KIND_TEXT_ENTRY};

/// Input for a new post or a post edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub board: BoardRef,
    pub title: String,
    pub body: Body,
    pub topics: Vec<String>,
    pub url: Option<String>,
    pub image: Option<String>,
}

impl NewPost {
    pub fn new(board: BoardRef, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            board,
            title: title.into(),
            body: Body::plain(content),
            topics: Vec::new(),
            url: None,
            image: None,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.push(topic.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Mark the body as ciphertext produced by an external encryption capability.
    pub fn encrypted(mut self, scheme: impl Into<String>, ciphertext: impl Into<String>) -> Self {
        self.body = Body::Encrypted {
            scheme: scheme.into(),
            ciphertext: ciphertext.into(),
        };
        self
    }

    fn presentation(&self) -> Presentation {
        Presentation {
            title: Some(self.title.clone()),
            body: Some(self.body.clone()),
            topics: self.topics.clone(),
            url: self.url.clone(),
            image: self.image.clone(),
        }
    }
}

/// A parsed post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostEntry {
    pub id: String,
    pub author: String,
    pub created_at: u64,
    pub board: Option<BoardRef>,
    pub title: String,
    pub body: Body,
    pub topics: Vec<String>,
    pub url: Option<String>,
    pub image: Option<String>,
}

/// Build a new post.
pub fn build_post(post: &NewPost, created_at: u64) -> EventTemplate {
    let mut tags = vec![EntryType::Post.to_tag(), post.board.to_tag()];
    let content = post.presentation().encode_into(&mut tags);
    EventTemplate {
        created_at,
        kind: KIND_TEXT_ENTRY,
        tags,
        content,
    }
}

/// Build an edit companion replacing the presentation of post `original`.
pub fn build_post_edit(original: &str, post: &NewPost, created_at: u64) -> EventTemplate {
    build_edit(
        EntryType::PostEdit,
        original,
        &post.presentation(),
        vec![post.board.to_tag()],
        created_at,
    )
}

/// Build the delete companion for a post.
pub fn build_post_delete(original: &str, reason: &str, created_at: u64) -> EventTemplate {
    build_deletion(&[original.to_string()], reason, created_at)
}

/// Parse a post. The caller decides whether the entry is a post; this only
/// extracts the fields.
pub fn parse_post(event: &Event) -> Result<PostEntry, CodecError> {
    expect_kind(event, KIND_TEXT_ENTRY)?;
    let presentation = Presentation::from_event(event);

    Ok(PostEntry {
        id: event.id.clone(),
        author: event.pubkey.clone(),
        created_at: event.created_at,
        board: BoardRef::from_event(event),
        title: presentation.title.unwrap_or_default(),
        body: presentation.body.unwrap_or(Body::plain(String::new())),
        topics: presentation.topics,
        url: presentation.url,
        image: presentation.image,
    })
}
