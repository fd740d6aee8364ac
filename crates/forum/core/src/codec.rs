//! Shared tag vocabulary and the pieces every entry parser uses.
//!
//! Forum entries are ordinary signed events. What makes them posts, comments
//! or companions is the tag list:
//! - `type`: explicit discriminant (`post`, `comment`, `post-edit`, ...)
//! - `original`: back-reference from an edit/delete companion to its canonical entry
//! - `a`: board reference (`34550:<author>:<slug>`)
//! - `title`, `t`, `r`, `image`: presentation fields
//! - `encrypted`: content is ciphertext for an external decryption capability

use crate::event::{Event, EventTemplate, KIND_BOARD_DEFINITION, KIND_DELETION, KIND_TEXT_ENTRY};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const TAG_TYPE: &str = "type";
pub const TAG_ORIGINAL: &str = "original";
pub const TAG_BOARD: &str = "a";
pub const TAG_TITLE: &str = "title";
pub const TAG_TOPIC: &str = "t";
pub const TAG_URL: &str = "r";
pub const TAG_IMAGE: &str = "image";
pub const TAG_ENCRYPTED: &str = "encrypted";

/// Errors produced while building or parsing entries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected kind: expected {expected}, got {actual}")]
    WrongKind { expected: u16, actual: u16 },

    #[error("missing tag: {0}")]
    MissingTag(&'static str),

    #[error("invalid {tag} tag: {reason}")]
    InvalidTag { tag: &'static str, reason: String },

    #[error("invalid content: {0}")]
    InvalidContent(String),
}

pub(crate) fn expect_kind(event: &Event, expected: u16) -> Result<(), CodecError> {
    if event.kind != expected {
        return Err(CodecError::WrongKind {
            expected,
            actual: event.kind,
        });
    }
    Ok(())
}

/// Build a two-element tag.
pub fn tag(name: &str, value: impl Into<String>) -> Vec<String> {
    vec![name.to_string(), value.into()]
}

/// Explicit type discriminant carried in the `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryType {
    Post,
    Comment,
    PostEdit,
    CommentEdit,
    CommentDelete,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Post => "post",
            EntryType::Comment => "comment",
            EntryType::PostEdit => "post-edit",
            EntryType::CommentEdit => "comment-edit",
            EntryType::CommentDelete => "comment-delete",
        }
    }

    pub fn to_tag(self) -> Vec<String> {
        tag(TAG_TYPE, self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(EntryType::Post),
            "comment" => Ok(EntryType::Comment),
            "post-edit" => Ok(EntryType::PostEdit),
            "comment-edit" => Ok(EntryType::CommentEdit),
            "comment-delete" => Ok(EntryType::CommentDelete),
            _ => Err(()),
        }
    }
}

/// Entry content as this layer sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Body {
    Plain { text: String },
    /// Never decrypted here; resolved by an external decryption capability.
    Encrypted { scheme: String, ciphertext: String },
    /// Scrubbed by a delete companion.
    Removed,
}

impl Body {
    pub fn plain(text: impl Into<String>) -> Self {
        Body::Plain { text: text.into() }
    }

    pub fn from_event(event: &Event) -> Self {
        if event.has_tag(TAG_ENCRYPTED) {
            return Body::Encrypted {
                scheme: event.tag_value(TAG_ENCRYPTED).unwrap_or("unknown").to_string(),
                ciphertext: event.content.clone(),
            };
        }
        Body::plain(event.content.clone())
    }

    /// Plain text, if this body is readable by this layer.
    pub fn text(&self) -> Option<&str> {
        match self {
            Body::Plain { text } => Some(text),
            _ => None,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, Body::Encrypted { .. })
    }

    /// Tags and content that encode this body.
    pub(crate) fn encode(&self) -> (Option<Vec<String>>, String) {
        match self {
            Body::Plain { text } => (None, text.clone()),
            Body::Encrypted { scheme, ciphertext } => {
                (Some(tag(TAG_ENCRYPTED, scheme.clone())), ciphertext.clone())
            }
            Body::Removed => (None, String::new()),
        }
    }
}

/// Address of a board definition: `34550:<author>:<slug>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BoardRef {
    pub author: String,
    pub slug: String,
}

impl BoardRef {
    pub fn new(author: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            slug: slug.into(),
        }
    }

    pub fn to_tag(&self) -> Vec<String> {
        tag(TAG_BOARD, self.to_string())
    }

    /// The first board reference in an event's tags, if any parses.
    pub fn from_event(event: &Event) -> Option<Self> {
        event.tag_values(TAG_BOARD).find_map(|v| v.parse().ok())
    }
}

impl fmt::Display for BoardRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", KIND_BOARD_DEFINITION, self.author, self.slug)
    }
}

impl FromStr for BoardRef {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| CodecError::InvalidTag {
            tag: TAG_BOARD,
            reason: reason.to_string(),
        };

        let mut parts = s.splitn(3, ':');
        let kind = parts.next().ok_or_else(|| invalid("empty coordinate"))?;
        if kind != KIND_BOARD_DEFINITION.to_string() {
            return Err(invalid("not a board coordinate"));
        }
        let author = parts.next().filter(|a| !a.is_empty());
        let slug = parts.next().filter(|s| !s.is_empty());
        match (author, slug) {
            (Some(author), Some(slug)) => Ok(BoardRef::new(author, slug)),
            _ => Err(invalid("coordinate needs author and slug")),
        }
    }
}

/// The fields an edit replaces.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Presentation {
    pub title: Option<String>,
    pub body: Option<Body>,
    pub topics: Vec<String>,
    pub url: Option<String>,
    pub image: Option<String>,
}

impl Presentation {
    pub fn from_event(event: &Event) -> Self {
        Self {
            title: event.tag_value(TAG_TITLE).map(str::to_string),
            body: Some(Body::from_event(event)),
            topics: event.tag_values(TAG_TOPIC).map(str::to_string).collect(),
            url: event.tag_value(TAG_URL).map(str::to_string),
            image: event.tag_value(TAG_IMAGE).map(str::to_string),
        }
    }

    /// Append presentation tags and return the content to publish.
    pub(crate) fn encode_into(&self, tags: &mut Vec<Vec<String>>) -> String {
        if let Some(title) = &self.title {
            tags.push(tag(TAG_TITLE, title.clone()));
        }
        for topic in &self.topics {
            tags.push(tag(TAG_TOPIC, topic.to_lowercase()));
        }
        if let Some(url) = &self.url {
            tags.push(tag(TAG_URL, url.clone()));
        }
        if let Some(image) = &self.image {
            tags.push(tag(TAG_IMAGE, image.clone()));
        }
        let (encrypted, content) = self
            .body
            .as_ref()
            .map(Body::encode)
            .unwrap_or((None, String::new()));
        if let Some(encrypted) = encrypted {
            tags.push(encrypted);
        }
        content
    }
}

/// An edit companion for a post or a comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditEntry {
    pub id: String,
    pub author: String,
    pub created_at: u64,
    /// Canonical id of the entry being edited
    pub original: String,
    pub presentation: Presentation,
}

/// A delete companion: a `comment-delete` entry or a kind 5 deletion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteEntry {
    pub id: String,
    pub author: String,
    pub created_at: u64,
    pub targets: Vec<String>,
    pub reason: String,
}

fn original_ref(event: &Event) -> Result<String, CodecError> {
    event
        .tag_value(TAG_ORIGINAL)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(CodecError::MissingTag(TAG_ORIGINAL))
}

/// Build an edit companion for `original` with the given entry type.
pub(crate) fn build_edit(
    entry_type: EntryType,
    original: &str,
    presentation: &Presentation,
    extra_tags: Vec<Vec<String>>,
    created_at: u64,
) -> EventTemplate {
    let mut tags = vec![entry_type.to_tag(), tag(TAG_ORIGINAL, original)];
    tags.extend(extra_tags);
    let content = presentation.encode_into(&mut tags);
    EventTemplate {
        created_at,
        kind: KIND_TEXT_ENTRY,
        tags,
        content,
    }
}

/// Parse a post-edit or comment-edit companion.
pub fn parse_edit(event: &Event) -> Result<EditEntry, CodecError> {
    expect_kind(event, KIND_TEXT_ENTRY)?;
    Ok(EditEntry {
        id: event.id.clone(),
        author: event.pubkey.clone(),
        created_at: event.created_at,
        original: original_ref(event)?,
        presentation: Presentation::from_event(event),
    })
}

/// Parse a `comment-delete` companion.
pub fn parse_comment_delete(event: &Event) -> Result<DeleteEntry, CodecError> {
    expect_kind(event, KIND_TEXT_ENTRY)?;
    Ok(DeleteEntry {
        id: event.id.clone(),
        author: event.pubkey.clone(),
        created_at: event.created_at,
        targets: vec![original_ref(event)?],
        reason: event.content.clone(),
    })
}

/// Build a deletion request (kind 5) for one or more entries.
pub fn build_deletion(targets: &[String], reason: &str, created_at: u64) -> EventTemplate {
    let mut tags: Vec<Vec<String>> = targets.iter().map(|id| tag("e", id.clone())).collect();
    tags.push(tag("k", KIND_TEXT_ENTRY.to_string()));
    EventTemplate {
        created_at,
        kind: KIND_DELETION,
        tags,
        content: reason.to_string(),
    }
}

/// Parse a deletion request (kind 5).
pub fn parse_deletion(event: &Event) -> Result<DeleteEntry, CodecError> {
    expect_kind(event, KIND_DELETION)?;
    let targets: Vec<String> = event
        .tag_values("e")
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect();
    if targets.is_empty() {
        return Err(CodecError::MissingTag("e"));
    }
    Ok(DeleteEntry {
        id: event.id.clone(),
        author: event.pubkey.clone(),
        created_at: event.created_at,
        targets,
        reason: event.content.clone(),
    })
}
