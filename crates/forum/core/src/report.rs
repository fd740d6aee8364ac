//! Moderation reports (kind 1984).

use crate::codec::{CodecError, expect_kind};
use crate::event::{Event, EventTemplate, KIND_REPORT};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Nudity,
    Malware,
    Profanity,
    Illegal,
    Spam,
    Impersonation,
    Other,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Nudity => "nudity",
            ReportType::Malware => "malware",
            ReportType::Profanity => "profanity",
            ReportType::Illegal => "illegal",
            ReportType::Spam => "spam",
            ReportType::Impersonation => "impersonation",
            ReportType::Other => "other",
        }
    }
}

impl FromStr for ReportType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nudity" => Ok(ReportType::Nudity),
            "malware" => Ok(ReportType::Malware),
            "profanity" => Ok(ReportType::Profanity),
            "illegal" => Ok(ReportType::Illegal),
            "spam" => Ok(ReportType::Spam),
            "impersonation" => Ok(ReportType::Impersonation),
            "other" => Ok(ReportType::Other),
            _ => Err(CodecError::InvalidTag {
                tag: "report",
                reason: format!("unknown report type: {}", s),
            }),
        }
    }
}

/// What a report points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportTarget {
    /// An entry, with its author
    Entry { id: String, author: String },
    Author(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub id: String,
    pub reporter: String,
    pub created_at: u64,
    pub target: ReportTarget,
    pub report_type: ReportType,
    pub reason: String,
}

impl ReportEntry {
    /// Id of the reported entry, or the reported author's key.
    pub fn target_id(&self) -> &str {
        match &self.target {
            ReportTarget::Entry { id, .. } => id,
            ReportTarget::Author(pubkey) => pubkey,
        }
    }
}

pub fn build_report(
    target: &ReportTarget,
    report_type: ReportType,
    reason: &str,
    created_at: u64,
) -> EventTemplate {
    let typed = |name: &str, value: &str| {
        vec![
            name.to_string(),
            value.to_string(),
            report_type.as_str().to_string(),
        ]
    };
    let tags = match target {
        ReportTarget::Entry { id, author } => {
            vec![typed("e", id), vec!["p".to_string(), author.clone()]]
        }
        ReportTarget::Author(pubkey) => vec![typed("p", pubkey)],
    };

    EventTemplate {
        created_at,
        kind: KIND_REPORT,
        tags,
        content: reason.to_string(),
    }
}

pub fn parse_report(event: &Event) -> Result<ReportEntry, CodecError> {
    expect_kind(event, KIND_REPORT)?;
    let find = |name: &str| event.tags.iter().find(|t| t.len() >= 2 && t[0] == name);

    let (target, type_tag) = match (find("e"), find("p")) {
        (Some(e), p) => (
            ReportTarget::Entry {
                id: e[1].clone(),
                author: p.map(|p| p[1].clone()).unwrap_or_default(),
            },
            e,
        ),
        (None, Some(p)) => (ReportTarget::Author(p[1].clone()), p),
        (None, None) => return Err(CodecError::MissingTag("p")),
    };

    let report_type = match type_tag.get(2) {
        Some(value) => value.parse()?,
        None => ReportType::Other,
    };

    Ok(ReportEntry {
        id: event.id.clone(),
        reporter: event.pubkey.clone(),
        created_at: event.created_at,
        target,
        report_type,
        reason: event.content.clone(),
    })
}
