//! Votes (kind 7 reactions) on posts and comments.

use crate::codec::{CodecError, expect_kind, tag};
use crate::event::{Event, EventTemplate, KIND_TEXT_ENTRY, KIND_VOTE};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_content(&self) -> &'static str {
        match self {
            Direction::Up => "+",
            Direction::Down => "-",
        }
    }

    /// `+` and empty content are upvotes, `-` is a downvote.
    pub fn from_content(content: &str) -> Option<Self> {
        match content.trim() {
            "+" | "" => Some(Direction::Up),
            "-" => Some(Direction::Down),
            _ => None,
        }
    }
}

/// A parsed vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteEntry {
    pub id: String,
    pub voter: String,
    pub created_at: u64,
    /// The post or comment voted on (the last `e` tag)
    pub target: String,
    pub target_author: Option<String>,
    pub direction: Direction,
}

/// Build a vote on `target`, authored by `target_author`.
pub fn build_vote(
    target: &str,
    target_author: &str,
    direction: Direction,
    created_at: u64,
) -> EventTemplate {
    EventTemplate {
        created_at,
        kind: KIND_VOTE,
        tags: vec![
            tag("e", target),
            tag("p", target_author),
            tag("k", KIND_TEXT_ENTRY.to_string()),
        ],
        content: direction.as_content().to_string(),
    }
}

/// Parse a vote. Unknown reaction content is an invalid vote.
pub fn parse_vote(event: &Event) -> Result<VoteEntry, CodecError> {
    expect_kind(event, KIND_VOTE)?;
    let target = event
        .tag_values("e")
        .filter(|v| !v.is_empty())
        .last()
        .ok_or(CodecError::MissingTag("e"))?;
    let direction = Direction::from_content(&event.content).ok_or_else(|| {
        CodecError::InvalidContent(format!("not a vote: {:?}", event.content))
    })?;

    Ok(VoteEntry {
        id: event.id.clone(),
        voter: event.pubkey.clone(),
        created_at: event.created_at,
        target: target.to_string(),
        target_author: event.tag_values("p").last().map(str::to_string),
        direction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote_event(content: &str, tags: Vec<Vec<String>>) -> Event {
        Event {
            id: "v1".to_string(),
            pubkey: "voter".to_string(),
            created_at: 5,
            kind: KIND_VOTE,
            tags,
            content: content.to_string(),
            sig: String::new(),
        }
    }

    #[test]
    fn test_build_and_parse_vote() {
        let template = build_vote("post1", "alice", Direction::Down, 5);
        assert_eq!(template.content, "-");
        let event = vote_event(&template.content, template.tags);
        let vote = parse_vote(&event).unwrap();
        assert_eq!(vote.target, "post1");
        assert_eq!(vote.target_author.as_deref(), Some("alice"));
        assert_eq!(vote.direction, Direction::Down);
        assert_eq!(vote.voter, "voter");
    }

    #[test]
    fn test_direction_from_content() {
        assert_eq!(Direction::from_content("+"), Some(Direction::Up));
        assert_eq!(Direction::from_content(""), Some(Direction::Up));
        assert_eq!(Direction::from_content("-"), Some(Direction::Down));
        assert_eq!(Direction::from_content("🤙"), None);
    }

    #[test]
    fn test_invalid_vote_payload() {
        let event = vote_event("🔥", vec![tag("e", "post1")]);
        assert!(matches!(parse_vote(&event), Err(CodecError::InvalidContent(_))));
    }

    #[test]
    fn test_vote_without_target() {
        let event = vote_event("+", vec![tag("p", "alice")]);
        assert_eq!(parse_vote(&event), Err(CodecError::MissingTag("e")));
    }

    #[test]
    fn test_last_e_tag_is_target() {
        let event = vote_event("+", vec![tag("e", "root"), tag("e", "comment")]);
        assert_eq!(parse_vote(&event).unwrap().target, "comment");
    }
}
