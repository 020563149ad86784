use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{MessageKind, ThreadStatus, TombstoneInfo};

/// One line of the event log: global sequence number, wall time, and the
/// kind-tagged record payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entry {
    #[serde(default)]
    pub seq: u64,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub record: Record,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Message(MessageRecord),
    MessageEdit(EditRecord),
    MessageDelete(DeleteRecord),
    MessageMove(MoveRecord),
    Reaction(ReactionRecord),
    Thread(ThreadRecord),
    ThreadUpdate(ThreadUpdateRecord),
    Subscription(SubscriptionRecord),
    Favorite(FavoriteRecord),
    Pin(PinRecord),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRecord {
    pub id: String,
    pub home: String,
    pub author: String,
    pub body: String,
    #[serde(rename = "message_kind", default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tombstone: Option<TombstoneInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EditRecord {
    pub id: String,
    pub body: String,
    pub editor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeleteRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MoveRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReactionRecord {
    pub id: String,
    pub agent: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub removed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThreadRecord {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    pub created_by: String,
}

/// Sparse thread patch: only fields present in the line are applied.
///
/// `parent` and `anchor` distinguish "absent" (`None`) from "cleared"
/// (`Some(None)`, serialized as `null`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ThreadUpdateRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ThreadStatus>,
    #[serde(
        default,
        deserialize_with = "patch::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "patch::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub anchor: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionRecord {
    pub thread: String,
    pub agent: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FavoriteRecord {
    pub id: String,
    pub agent: String,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PinRecord {
    pub id: String,
    pub agent: String,
    pub active: bool,
}

mod patch {
    use serde::{Deserialize, Deserializer};

    /// A present field (even `null`) becomes `Some(..)`; absence is handled by `default`.
    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

/// One file family of the live log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Family {
    Messages,
    MessageEdits,
    MessageDeletes,
    MessageMoves,
    Reactions,
    Threads,
    Subscriptions,
    Favorites,
    Pins,
}

impl Family {
    /// Every family, in tie-break replay order.
    pub const ALL: [Family; 9] = [
        Family::Threads,
        Family::Messages,
        Family::MessageEdits,
        Family::MessageDeletes,
        Family::MessageMoves,
        Family::Reactions,
        Family::Subscriptions,
        Family::Favorites,
        Family::Pins,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            Self::Messages => "messages.jsonl",
            Self::MessageEdits => "message_edits.jsonl",
            Self::MessageDeletes => "message_deletes.jsonl",
            Self::MessageMoves => "message_moves.jsonl",
            Self::Reactions => "reactions.jsonl",
            Self::Threads => "threads.jsonl",
            Self::Subscriptions => "subscriptions.jsonl",
            Self::Favorites => "favorites.jsonl",
            Self::Pins => "pins.jsonl",
        }
    }

    pub fn of(record: &Record) -> Self {
        match record {
            Record::Message(_) => Self::Messages,
            Record::MessageEdit(_) => Self::MessageEdits,
            Record::MessageDelete(_) => Self::MessageDeletes,
            Record::MessageMove(_) => Self::MessageMoves,
            Record::Reaction(_) => Self::Reactions,
            Record::Thread(_) | Record::ThreadUpdate(_) => Self::Threads,
            Record::Subscription(_) => Self::Subscriptions,
            Record::Favorite(_) => Self::Favorites,
            Record::Pin(_) => Self::Pins,
        }
    }
}

impl Record {
    /// The message this record creates or mutates, if any.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::Message(r) => Some(&r.id),
            Self::MessageEdit(r) => Some(&r.id),
            Self::MessageDelete(r) => Some(&r.id),
            Self::MessageMove(r) => Some(&r.id),
            Self::Reaction(r) => Some(&r.id),
            Self::Favorite(r) => Some(&r.id),
            Self::Pin(r) => Some(&r.id),
            Self::Thread(_) | Self::ThreadUpdate(_) | Self::Subscription(_) => None,
        }
    }

    pub fn family(&self) -> Family {
        Family::of(self)
    }
}
