//! Board definitions (addressable kind 34550 entries).

use crate::codec::{BoardRef, CodecError, expect_kind, tag};
use crate::event::{Event, EventTemplate, KIND_BOARD_DEFINITION};

/// A board definition, as built or parsed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BoardDefinition {
    pub slug: String,
    pub name: String,
    pub description: String,
    pub image: Option<String>,
    pub rules: Option<String>,
    pub moderators: Vec<String>,
}

/// A parsed board definition with its author and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardEntry {
    pub id: String,
    pub author: String,
    pub created_at: u64,
    pub definition: BoardDefinition,
}

impl BoardEntry {
    pub fn coordinate(&self) -> BoardRef {
        BoardRef::new(self.author.clone(), self.definition.slug.clone())
    }
}

pub fn build_board(board: &BoardDefinition, created_at: u64) -> EventTemplate {
    let mut tags = vec![tag("d", board.slug.clone()), tag("name", board.name.clone())];
    if !board.description.is_empty() {
        tags.push(tag("description", board.description.clone()));
    }
    if let Some(image) = &board.image {
        tags.push(tag("image", image.clone()));
    }
    if let Some(rules) = &board.rules {
        tags.push(tag("rules", rules.clone()));
    }
    for moderator in &board.moderators {
        tags.push(vec![
            "p".to_string(),
            moderator.clone(),
            String::new(),
            "moderator".to_string(),
        ]);
    }

    EventTemplate {
        created_at,
        kind: KIND_BOARD_DEFINITION,
        tags,
        content: String::new(),
    }
}

pub fn parse_board(event: &Event) -> Result<BoardEntry, CodecError> {
    expect_kind(event, KIND_BOARD_DEFINITION)?;
    let slug = event.tag_value("d").ok_or(CodecError::MissingTag("d"))?;
    if slug.is_empty() {
        return Err(CodecError::InvalidTag {
            tag: "d",
            reason: "empty board slug".to_string(),
        });
    }

    let moderators = event
        .tags
        .iter()
        .filter(|t| t.len() >= 4 && t[0] == "p" && t[3] == "moderator")
        .map(|t| t[1].clone())
        .collect();

    Ok(BoardEntry {
        id: event.id.clone(),
        author: event.pubkey.clone(),
        created_at: event.created_at,
        definition: BoardDefinition {
            slug: slug.to_string(),
            name: event.tag_value("name").unwrap_or(slug).to_string(),
            description: event.tag_value("description").unwrap_or_default().to_string(),
            image: event.tag_value("image").map(str::to_string),
            rules: event.tag_value("rules").map(str::to_string),
            moderators,
        },
    })
}
