//! In-memory projection of the event log and the per-record merge rule.
//!
//! `Projection::apply` is the single definition of how a record changes
//! state: last value wins per field, reactions are list-appended (one entry
//! per agent and label). Rebuild folds the whole log through it; the
//! mutation path folds one record through it over the affected entities.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::model::{
    DELETED_BODY, DELETED_MARKER, EditEntry, Message, Pin, ReactionEntry, Thread, ThreadStatus,
    extract_mentions,
};
use crate::store::record::{Entry, Record};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Projection {
    pub messages: BTreeMap<String, Message>,
    pub threads: BTreeMap<String, Thread>,
    /// (thread, agent)
    pub subscriptions: BTreeSet<(String, String)>,
    /// (agent, message)
    pub favorites: BTreeSet<(String, String)>,
    /// message -> pin
    pub pins: BTreeMap<String, Pin>,
}

/// Outcome of folding one record into a projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Changed,
    Unchanged,
    Skipped(String),
}

impl Projection {
    /// Replay entries from an empty state, in the order given.
    pub fn replay<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = &'a Entry>,
    {
        let mut projection = Self::default();
        for entry in entries {
            if let Applied::Skipped(reason) = projection.apply(entry) {
                warn!(seq = entry.seq, %reason, "skipping log record during replay");
            }
        }
        projection
    }

    pub fn apply(&mut self, entry: &Entry) -> Applied {
        let ts = entry.ts;
        match &entry.record {
            Record::Message(r) => {
                if self.messages.contains_key(&r.id) {
                    return Applied::Skipped(format!("duplicate message {}", r.id));
                }
                self.messages.insert(
                    r.id.clone(),
                    Message {
                        id: r.id.clone(),
                        seq: entry.seq,
                        ts,
                        home: r.home.clone(),
                        author: r.author.clone(),
                        body: r.body.clone(),
                        kind: r.kind,
                        reply_to: r.reply_to.clone(),
                        edited_at: None,
                        edit_count: 0,
                        edit_history: vec![],
                        archived_at: None,
                        archive_marker: None,
                        reactions: BTreeMap::new(),
                        mentions: extract_mentions(&r.body),
                        tombstone: r.tombstone.clone(),
                    },
                );
                self.touch_thread(&r.home, ts);
                Applied::Changed
            }
            Record::MessageEdit(r) => {
                let Some(msg) = self.messages.get_mut(&r.id) else {
                    return missing("message", &r.id);
                };
                msg.body = r.body.clone();
                msg.mentions = extract_mentions(&r.body);
                msg.edited_at = Some(ts);
                msg.edit_count += 1;
                msg.edit_history.push(EditEntry {
                    at: ts,
                    by: r.editor.clone(),
                    reason: r.reason.clone(),
                });
                Applied::Changed
            }
            Record::MessageDelete(r) => {
                let Some(msg) = self.messages.get_mut(&r.id) else {
                    return missing("message", &r.id);
                };
                msg.archived_at = Some(ts);
                msg.archive_marker = Some(DELETED_MARKER.to_string());
                msg.body = DELETED_BODY.to_string();
                msg.mentions.clear();
                Applied::Changed
            }
            Record::MessageMove(r) => {
                let Some(msg) = self.messages.get_mut(&r.id) else {
                    return missing("message", &r.id);
                };
                if msg.home == r.to {
                    return Applied::Unchanged;
                }
                msg.home = r.to.clone();
                self.touch_thread(&r.to, ts);
                Applied::Changed
            }
            Record::Reaction(r) => {
                let Some(msg) = self.messages.get_mut(&r.id) else {
                    return missing("message", &r.id);
                };
                if r.removed {
                    let Some(entries) = msg.reactions.get_mut(&r.label) else {
                        return Applied::Unchanged;
                    };
                    let before = entries.len();
                    entries.retain(|e| e.agent != r.agent);
                    let changed = entries.len() != before;
                    if entries.is_empty() {
                        msg.reactions.remove(&r.label);
                    }
                    return if changed {
                        Applied::Changed
                    } else {
                        Applied::Unchanged
                    };
                }
                let entries = msg.reactions.entry(r.label.clone()).or_default();
                match entries.iter_mut().find(|e| e.agent == r.agent) {
                    Some(existing) => existing.at = ts,
                    None => entries.push(ReactionEntry {
                        agent: r.agent.clone(),
                        at: ts,
                    }),
                }
                Applied::Changed
            }
            Record::Thread(r) => {
                if self.threads.contains_key(&r.id) {
                    return Applied::Skipped(format!("duplicate thread {}", r.id));
                }
                self.threads.insert(
                    r.id.clone(),
                    Thread {
                        id: r.id.clone(),
                        name: r.name.clone(),
                        parent: r.parent.clone(),
                        status: ThreadStatus::Open,
                        anchor: r.anchor.clone(),
                        created_by: r.created_by.clone(),
                        created_at: ts,
                        last_activity_at: ts,
                    },
                );
                Applied::Changed
            }
            Record::ThreadUpdate(r) => {
                let Some(thread) = self.threads.get_mut(&r.id) else {
                    return missing("thread", &r.id);
                };
                if let Some(name) = &r.name {
                    thread.name = name.clone();
                }
                if let Some(status) = r.status {
                    thread.status = status;
                }
                if let Some(parent) = &r.parent {
                    thread.parent = parent.clone();
                }
                if let Some(anchor) = &r.anchor {
                    thread.anchor = anchor.clone();
                }
                Applied::Changed
            }
            Record::Subscription(r) => {
                if !self.threads.contains_key(&r.thread) {
                    return missing("thread", &r.thread);
                }
                let key = (r.thread.clone(), r.agent.clone());
                set_membership(&mut self.subscriptions, key, r.active)
            }
            Record::Favorite(r) => {
                if !self.messages.contains_key(&r.id) {
                    return missing("message", &r.id);
                }
                let key = (r.agent.clone(), r.id.clone());
                set_membership(&mut self.favorites, key, r.active)
            }
            Record::Pin(r) => {
                if !self.messages.contains_key(&r.id) {
                    return missing("message", &r.id);
                }
                if r.active {
                    self.pins.insert(
                        r.id.clone(),
                        Pin {
                            message_id: r.id.clone(),
                            by: r.agent.clone(),
                            at: ts,
                        },
                    );
                    Applied::Changed
                } else if self.pins.remove(&r.id).is_some() {
                    Applied::Changed
                } else {
                    Applied::Unchanged
                }
            }
        }
    }

    fn touch_thread(&mut self, home: &str, ts: DateTime<Utc>) {
        if let Some(thread) = self.threads.get_mut(home)
            && ts > thread.last_activity_at
        {
            thread.last_activity_at = ts;
        }
    }

    /// Messages in arrival (seq) order.
    pub fn messages_in_order(&self) -> Vec<&Message> {
        let mut messages: Vec<&Message> = self.messages.values().collect();
        messages.sort_by(|a, b| a.seq.cmp(&b.seq).then_with(|| a.id.cmp(&b.id)));
        messages
    }

    pub fn favorited_ids(&self) -> BTreeSet<&str> {
        self.favorites.iter().map(|(_, id)| id.as_str()).collect()
    }

    pub fn anchor_ids(&self) -> BTreeSet<&str> {
        self.threads
            .values()
            .filter_map(|t| t.anchor.as_deref())
            .collect()
    }

    /// IDs that differ between two projections, for consistency reports.
    pub fn diff_ids(&self, other: &Projection) -> Vec<String> {
        let mut diffs = Vec::new();
        let message_ids: BTreeSet<&String> =
            self.messages.keys().chain(other.messages.keys()).collect();
        for id in message_ids {
            if self.messages.get(id) != other.messages.get(id) {
                diffs.push(id.clone());
            }
        }
        let thread_ids: BTreeSet<&String> =
            self.threads.keys().chain(other.threads.keys()).collect();
        for id in thread_ids {
            if self.threads.get(id) != other.threads.get(id) {
                diffs.push(id.clone());
            }
        }
        for (thread, agent) in self.subscriptions.symmetric_difference(&other.subscriptions) {
            diffs.push(format!("subscription:{thread}:{agent}"));
        }
        for (agent, id) in self.favorites.symmetric_difference(&other.favorites) {
            diffs.push(format!("favorite:{agent}:{id}"));
        }
        let pin_ids: BTreeSet<&String> = self.pins.keys().chain(other.pins.keys()).collect();
        for id in pin_ids {
            if self.pins.get(id) != other.pins.get(id) {
                diffs.push(format!("pin:{id}"));
            }
        }
        diffs
    }
}

fn missing(what: &str, id: &str) -> Applied {
    Applied::Skipped(format!("{what} {id} does not exist"))
}

fn set_membership(
    set: &mut BTreeSet<(String, String)>,
    key: (String, String),
    active: bool,
) -> Applied {
    let changed = if active {
        set.insert(key)
    } else {
        set.remove(&key)
    };
    if changed {
        Applied::Changed
    } else {
        Applied::Unchanged
    }
}
