//! Profile metadata (kind 0) and contact lists (kind 3).

use crate::codec::{CodecError, expect_kind};
use crate::event::{Event, EventTemplate, KIND_CONTACTS, KIND_METADATA, is_hex_key};
use serde::{Deserialize, Serialize};

/// Display metadata published by an author.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProfileMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nip05: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lud16: Option<String>,
}

impl ProfileMetadata {
    /// Preferred human-readable name, ignoring blank values.
    pub fn best_name(&self) -> Option<&str> {
        [&self.display_name, &self.name]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
    }
}

/// A parsed kind 0 entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileEntry {
    pub pubkey: String,
    pub created_at: u64,
    pub metadata: ProfileMetadata,
}

pub fn build_profile(metadata: &ProfileMetadata, created_at: u64) -> Result<EventTemplate, CodecError> {
    let content = serde_json::to_string(metadata)
        .map_err(|e| CodecError::InvalidContent(e.to_string()))?;
    Ok(EventTemplate {
        created_at,
        kind: KIND_METADATA,
        tags: vec![],
        content,
    })
}

pub fn parse_profile(event: &Event) -> Result<ProfileEntry, CodecError> {
    expect_kind(event, KIND_METADATA)?;
    let metadata: ProfileMetadata = serde_json::from_str(&event.content)
        .map_err(|e| CodecError::InvalidContent(e.to_string()))?;
    Ok(ProfileEntry {
        pubkey: event.pubkey.clone(),
        created_at: event.created_at,
        metadata,
    })
}

/// A single followed author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub pubkey: String,
    pub relay_url: Option<String>,
    pub petname: Option<String>,
}

impl Contact {
    pub fn new(pubkey: impl Into<String>) -> Self {
        Self {
            pubkey: pubkey.into(),
            relay_url: None,
            petname: None,
        }
    }

    pub fn to_tag(&self) -> Vec<String> {
        let mut tag = vec![
            "p".to_string(),
            self.pubkey.clone(),
            self.relay_url.clone().unwrap_or_default(),
        ];
        if let Some(petname) = &self.petname {
            tag.push(petname.clone());
        }
        tag
    }

    /// Parse a `p` tag. Tags with a malformed pubkey yield `None`.
    pub fn from_tag(tag: &[String]) -> Option<Self> {
        if tag.len() < 2 || tag[0] != "p" || !is_hex_key(&tag[1]) {
            return None;
        }
        let non_empty = |i: usize| tag.get(i).filter(|s| !s.is_empty()).cloned();
        Some(Self {
            pubkey: tag[1].clone(),
            relay_url: non_empty(2),
            petname: non_empty(3),
        })
    }
}

/// A parsed kind 3 entry. Newer lists replace older ones wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactList {
    pub id: String,
    pub author: String,
    pub created_at: u64,
    pub contacts: Vec<Contact>,
}

impl ContactList {
    pub fn contains(&self, pubkey: &str) -> bool {
        self.contacts.iter().any(|c| c.pubkey == pubkey)
    }

    pub fn pubkeys(&self) -> Vec<String> {
        self.contacts.iter().map(|c| c.pubkey.clone()).collect()
    }
}

pub fn build_contact_list(contacts: &[Contact], created_at: u64) -> EventTemplate {
    EventTemplate {
        created_at,
        kind: KIND_CONTACTS,
        tags: contacts.iter().map(Contact::to_tag).collect(),
        content: String::new(),
    }
}

pub fn parse_contact_list(event: &Event) -> Result<ContactList, CodecError> {
    expect_kind(event, KIND_CONTACTS)?;
    Ok(ContactList {
        id: event.id.clone(),
        author: event.pubkey.clone(),
        created_at: event.created_at,
        contacts: event
            .tags
            .iter()
            .filter_map(|tag| Contact::from_tag(tag))
            .collect(),
    })
}
