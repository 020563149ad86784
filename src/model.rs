use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Home of the shared room.
pub const ROOM: &str = "room";
/// Watermark-only pseudo home tracking messages that mention an agent.
pub const MENTIONS: &str = "mentions";
/// Author of synthetic messages written by the retention engine.
pub const SYSTEM_AUTHOR: &str = "system";
/// Visible body of a soft-deleted message.
pub const DELETED_BODY: &str = "[deleted]";
/// Archive marker set by a soft delete.
pub const DELETED_MARKER: &str = "deleted";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    User,
    Agent,
    Event,
    Tombstone,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum ThreadStatus {
    #[default]
    Open,
    Archived,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Agent => write!(f, "agent"),
            Self::Event => write!(f, "event"),
            Self::Tombstone => write!(f, "tombstone"),
        }
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            "event" => Ok(Self::Event),
            "tombstone" => Ok(Self::Tombstone),
            other => Err(format!("unknown message kind '{other}'")),
        }
    }
}

impl std::fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for ThreadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown thread status '{other}'")),
        }
    }
}

/// One entry of a message's edit history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EditEntry {
    pub at: DateTime<Utc>,
    pub by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// One agent's reaction under a label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionEntry {
    pub agent: String,
    pub at: DateTime<Utc>,
}

/// Summary carried by a tombstone message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TombstoneInfo {
    pub scope: String,
    pub count: usize,
    #[serde(default)]
    pub participants: Vec<String>,
    pub first_id: String,
    pub last_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_sha: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    /// Position of the creation record in the global log order.
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub home: String,
    pub author: String,
    pub body: String,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub edit_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edit_history: Vec<EditEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_marker: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reactions: BTreeMap<String, Vec<ReactionEntry>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tombstone: Option<TombstoneInfo>,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.archived_at.is_some()
    }

    pub fn has_reactions(&self) -> bool {
        self.reactions.values().any(|entries| !entries.is_empty())
    }

    /// True when at least one reaction exists under a label other than `label`.
    pub fn has_reactions_besides(&self, label: &str) -> bool {
        self.reactions
            .iter()
            .any(|(l, entries)| l != label && !entries.is_empty())
    }

    pub fn has_reaction(&self, label: &str) -> bool {
        self.reactions
            .get(label)
            .is_some_and(|entries| !entries.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Thread {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub status: ThreadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// Per-agent, per-home read cursor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Watermark {
    pub agent: String,
    pub home: String,
    pub message_id: String,
    pub at: DateTime<Utc>,
}

/// A pinned message. Listed under the message's current home.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pin {
    pub message_id: String,
    pub by: String,
    pub at: DateTime<Utc>,
}

/// Extract `@name` mentions from a body: deduplicated and sorted.
pub fn extract_mentions(body: &str) -> Vec<String> {
    let mut mentions: Vec<String> = body
        .split(|c: char| c.is_whitespace())
        .filter_map(|token| token.strip_prefix('@'))
        .map(|rest| {
            rest.chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
                .collect::<String>()
        })
        .filter(|name| !name.is_empty())
        .collect();
    mentions.sort();
    mentions.dedup();
    mentions
}
