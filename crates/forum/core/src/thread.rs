//! Thread references carried by comments.
//!
//! Comments point at their thread with `e` tags using `root`/`reply` markers.
//! Unmarked tags fall back to the positional convention: the first `e` tag is
//! the root and the last one is the parent.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// E-tag marker types for thread structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Marker {
    /// The root entry of a thread (the post)
    Root,
    /// The immediate parent being replied to
    Reply,
    /// A mentioned entry (not part of the reply chain)
    Mention,
}

impl Marker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Marker::Root => "root",
            Marker::Reply => "reply",
            Marker::Mention => "mention",
        }
    }
}

impl FromStr for Marker {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root" => Ok(Marker::Root),
            "reply" => Ok(Marker::Reply),
            "mention" => Ok(Marker::Mention),
            _ => Err(()),
        }
    }
}

/// An e-tag reference to another entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventReference {
    pub event_id: String,
    pub relay_url: Option<String>,
    pub marker: Option<Marker>,
}

impl EventReference {
    pub fn new(event_id: impl Into<String>, marker: Option<Marker>) -> Self {
        Self {
            event_id: event_id.into(),
            relay_url: None,
            marker,
        }
    }

    /// Parse from an `e` tag. Returns `None` for anything that is not one.
    pub fn from_tag(tag: &[String]) -> Option<Self> {
        if tag.len() < 2 || tag[0] != "e" || tag[1].is_empty() {
            return None;
        }

        let relay_url = tag.get(2).filter(|s| !s.is_empty()).cloned();
        let marker = tag.get(3).and_then(|s| Marker::from_str(s).ok());

        Some(Self {
            event_id: tag[1].clone(),
            relay_url,
            marker,
        })
    }

    /// Convert to an e-tag array
    pub fn to_tag(&self) -> Vec<String> {
        let mut tag = vec![
            "e".to_string(),
            self.event_id.clone(),
            self.relay_url.clone().unwrap_or_default(),
        ];
        if let Some(marker) = self.marker {
            tag.push(marker.as_str().to_string());
        }
        tag
    }
}

/// Root and parent of a comment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ThreadRefs {
    pub root: Option<EventReference>,
    pub reply: Option<EventReference>,
}

impl ThreadRefs {
    /// Extract thread references from a tag list, ignoring mentions.
    pub fn from_tags(tags: &[Vec<String>]) -> Self {
        let refs: Vec<EventReference> = tags
            .iter()
            .filter_map(|tag| EventReference::from_tag(tag))
            .filter(|r| r.marker != Some(Marker::Mention))
            .collect();

        let marked_root = refs.iter().find(|r| r.marker == Some(Marker::Root));
        let marked_reply = refs.iter().find(|r| r.marker == Some(Marker::Reply));

        if marked_root.is_some() || marked_reply.is_some() {
            return Self {
                root: marked_root.or(marked_reply).cloned(),
                reply: marked_reply.or(marked_root).cloned(),
            };
        }

        // Positional: first is root, last is the parent.
        Self {
            root: refs.first().cloned(),
            reply: refs.last().cloned(),
        }
    }

    /// Whether any thread reference was found.
    pub fn is_threaded(&self) -> bool {
        self.root.is_some()
    }

    pub fn root_id(&self) -> Option<&str> {
        self.root.as_ref().map(|r| r.event_id.as_str())
    }

    /// The direct parent; equals the root for top-level comments.
    pub fn parent_id(&self) -> Option<&str> {
        self.reply.as_ref().map(|r| r.event_id.as_str())
    }

    /// Build the tags for a comment on `root`, optionally nested under `parent`.
    pub fn tags_for(root: &str, parent: Option<&str>) -> Vec<Vec<String>> {
        let mut tags = vec![EventReference::new(root, Some(Marker::Root)).to_tag()];
        if let Some(parent) = parent.filter(|p| *p != root) {
            tags.push(EventReference::new(parent, Some(Marker::Reply)).to_tag());
        }
        tags
    }
}
