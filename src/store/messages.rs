//! Message mutations and read cursors.

use chrono::Utc;
use tracing::debug;

use crate::error::{HuddleError, Result};
use crate::ids;
use crate::model::{MENTIONS, Message, MessageKind, ROOM, Thread, Watermark};
use crate::store::record::{
    DeleteRecord, EditRecord, Entry, FavoriteRecord, MessageRecord, MoveRecord, PinRecord,
    ReactionRecord, Record,
};
use crate::store::repo::{Repo, scratch};

/// Fields for `Repo::create_message`. `id` is only set when retrying a
/// create whose durable write failed.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub id: Option<String>,
    pub home: String,
    pub author: String,
    pub body: String,
    pub kind: MessageKind,
    pub reply_to: Option<String>,
}

impl NewMessage {
    pub fn new(home: impl Into<String>, author: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            home: home.into(),
            author: author.into(),
            body: body.into(),
            ..Default::default()
        }
    }
}

const ID_ATTEMPTS: usize = 8;

impl Repo {
    /// Persist a new message, assigning its ID and timestamp.
    pub fn create_message(&self, new: NewMessage) -> Result<Message> {
        let lock = self.begin()?;

        if new.body.trim().is_empty() {
            return Err(HuddleError::InvalidArgument(
                "message body cannot be empty".into(),
            ));
        }
        let author = new.author.trim();
        if author.is_empty() {
            return Err(HuddleError::InvalidArgument("author cannot be empty".into()));
        }
        if new.kind == MessageKind::Tombstone {
            return Err(HuddleError::InvalidArgument(
                "tombstones are only written by prune".into(),
            ));
        }
        let home_thread = self.home_thread(&new.home)?;
        if let Some(parent) = &new.reply_to {
            self.index.get_message(parent)?;
        }

        let id = match new.id {
            Some(id) => {
                if !id.starts_with(ids::MESSAGE_PREFIX) {
                    return Err(HuddleError::InvalidArgument(format!(
                        "message id '{id}' must start with '{}'",
                        ids::MESSAGE_PREFIX
                    )));
                }
                if let Some(existing) = self.index.find_message(&id)? {
                    return self.retry_create(existing, author, &new.home, &new.body);
                }
                id
            }
            None => self.fresh_message_id()?,
        };

        let mut scratch = scratch([], home_thread.as_ref());
        let record = Record::Message(MessageRecord {
            id: id.clone(),
            home: new.home,
            author: author.to_string(),
            body: new.body,
            kind: new.kind,
            reply_to: new.reply_to,
            tombstone: None,
        });
        self.commit(&lock, &mut scratch, record)?;
        take_message(scratch.messages.remove(&id), &id)
    }

    /// Re-append the creation record of an identical message so a retried
    /// create after a failed write is idempotent.
    fn retry_create(&self, existing: Message, author: &str, home: &str, body: &str) -> Result<Message> {
        if existing.author != author || existing.home != home || existing.body != body {
            return Err(HuddleError::Conflict(format!(
                "message {} already exists with different content",
                existing.id
            )));
        }
        debug!(id = %existing.id, "re-appending creation record for retried create");
        let entry = Entry {
            seq: existing.seq,
            ts: existing.ts,
            record: Record::Message(MessageRecord {
                id: existing.id.clone(),
                home: existing.home.clone(),
                author: existing.author.clone(),
                body: existing.body.clone(),
                kind: existing.kind,
                reply_to: existing.reply_to.clone(),
                tombstone: existing.tombstone.clone(),
            }),
        };
        self.append(&entry)?;
        Ok(existing)
    }

    pub(crate) fn fresh_message_id(&self) -> Result<String> {
        for _ in 0..ID_ATTEMPTS {
            let id = ids::new_message_id()?;
            if self.index.find_message(&id)?.is_none() {
                return Ok(id);
            }
        }
        Err(HuddleError::Conflict(
            "could not allocate an unused message id".into(),
        ))
    }

    /// Validate a message home: the room or an existing thread. Returns the
    /// thread when the home is one.
    pub(crate) fn home_thread(&self, home: &str) -> Result<Option<Thread>> {
        match home {
            ROOM => Ok(None),
            MENTIONS => Err(HuddleError::InvalidArgument(
                "'mentions' is a read-cursor home and cannot hold messages".into(),
            )),
            thread => Ok(Some(self.index.get_thread(thread)?)),
        }
    }

    pub fn edit_message(
        &self,
        id: &str,
        body: &str,
        editor: &str,
        reason: Option<String>,
    ) -> Result<Message> {
        let lock = self.begin()?;
        if body.trim().is_empty() {
            return Err(HuddleError::InvalidArgument(
                "message body cannot be empty".into(),
            ));
        }
        let message = self.index.get_message(id)?;
        if message.is_deleted() {
            return Err(HuddleError::Conflict(format!("message {id} is deleted")));
        }
        let mut scratch = scratch([&message], []);
        let record = Record::MessageEdit(EditRecord {
            id: id.to_string(),
            body: body.to_string(),
            editor: editor.to_string(),
            reason: reason.filter(|r| !r.trim().is_empty()),
        });
        self.commit(&lock, &mut scratch, record)?;
        take_message(scratch.messages.remove(id), id)
    }

    /// Soft delete. Deleting twice is a no-op.
    pub fn delete_message(&self, id: &str, by: Option<&str>) -> Result<Message> {
        let lock = self.begin()?;
        let message = self.index.get_message(id)?;
        if message.is_deleted() {
            return Ok(message);
        }
        let mut scratch = scratch([&message], []);
        let record = Record::MessageDelete(DeleteRecord {
            id: id.to_string(),
            by: by.map(String::from),
        });
        self.commit(&lock, &mut scratch, record)?;
        take_message(scratch.messages.remove(id), id)
    }

    pub fn move_message(&self, id: &str, to: &str) -> Result<Message> {
        let lock = self.begin()?;
        let message = self.index.get_message(id)?;
        let destination = self.home_thread(to)?;
        if message.home == to {
            return Err(HuddleError::Conflict(format!(
                "message {id} is already in {to}"
            )));
        }
        let mut scratch = scratch([&message], destination.as_ref());
        let record = Record::MessageMove(MoveRecord {
            id: id.to_string(),
            from: Some(message.home.clone()),
            to: to.to_string(),
        });
        self.commit(&lock, &mut scratch, record)?;
        take_message(scratch.messages.remove(id), id)
    }

    /// Idempotent per (agent, label): a repeat only refreshes the timestamp.
    pub fn add_reaction(&self, id: &str, agent: &str, label: &str) -> Result<Message> {
        self.react(id, agent, label, false)
    }

    pub fn remove_reaction(&self, id: &str, agent: &str, label: &str) -> Result<Message> {
        self.react(id, agent, label, true)
    }

    fn react(&self, id: &str, agent: &str, label: &str, removed: bool) -> Result<Message> {
        let lock = self.begin()?;
        let label = validate_label(label)?;
        let message = self.index.get_message(id)?;
        let present = message
            .reactions
            .get(&label)
            .is_some_and(|entries| entries.iter().any(|e| e.agent == agent));
        if removed && !present {
            return Ok(message);
        }
        let mut scratch = scratch([&message], []);
        let record = Record::Reaction(ReactionRecord {
            id: id.to_string(),
            agent: agent.to_string(),
            label,
            removed,
        });
        self.commit(&lock, &mut scratch, record)?;
        take_message(scratch.messages.remove(id), id)
    }

    /// Fave or unfave. Returns whether anything changed.
    pub fn set_favorite(&self, id: &str, agent: &str, active: bool) -> Result<bool> {
        let lock = self.begin()?;
        let message = self.index.get_message(id)?;
        let current = self.index.is_favorite(agent, id)?;
        if current == active {
            return Ok(false);
        }
        let mut scratch = scratch([&message], []);
        if current {
            scratch.favorites.insert((agent.to_string(), id.to_string()));
        }
        let record = Record::Favorite(FavoriteRecord {
            id: id.to_string(),
            agent: agent.to_string(),
            active,
        });
        Ok(self.commit(&lock, &mut scratch, record)?.is_some())
    }

    /// Pin or unpin within the message's current home. Returns whether anything changed.
    pub fn set_pin(&self, id: &str, agent: &str, active: bool) -> Result<bool> {
        let lock = self.begin()?;
        let message = self.index.get_message(id)?;
        let current = self.index.find_pin(id)?;
        if current.is_some() == active {
            return Ok(false);
        }
        let mut scratch = scratch([&message], []);
        if let Some(pin) = current {
            scratch.pins.insert(id.to_string(), pin);
        }
        let record = Record::Pin(PinRecord {
            id: id.to_string(),
            agent: agent.to_string(),
            active,
        });
        Ok(self.commit(&lock, &mut scratch, record)?.is_some())
    }

    /// Resolve a full ID or unique prefix. Never guesses between candidates.
    pub fn get_message_by_prefix(&self, prefix: &str) -> Result<Message> {
        self.index.resolve_message(prefix)
    }

    /// Record that `agent` has read `home` up to `message_id`.
    pub fn mark_read(&self, agent: &str, home: &str, message_id: &str) -> Result<Watermark> {
        let _lock = self.begin()?;
        let message = self.index.get_message(message_id)?;
        if home != MENTIONS {
            self.home_thread(home)?;
            if message.home != home {
                return Err(HuddleError::InvalidArgument(format!(
                    "message {message_id} is in {}, not {home}",
                    message.home
                )));
            }
        }
        let mark = Watermark {
            agent: agent.to_string(),
            home: home.to_string(),
            message_id: message.id,
            at: Utc::now(),
        };
        self.watermarks.set(mark.clone())?;
        Ok(mark)
    }

    /// Messages in `home` after the agent's watermark, excluding its own.
    /// For `mentions`, unread messages mentioning the agent.
    pub fn unread(&self, agent: &str, home: &str) -> Result<usize> {
        let after_seq = match self.watermarks.get(agent, home)? {
            Some(mark) => self
                .index
                .find_message(&mark.message_id)?
                .map(|m| m.seq)
                .unwrap_or(0),
            None => 0,
        };
        if home == MENTIONS {
            return self.index.count_unread_mentions(agent, after_seq);
        }
        self.home_thread(home)?;
        self.index.count_unread_in(home, after_seq, agent)
    }
}

fn validate_label(label: &str) -> Result<String> {
    let label = label.trim();
    if label.is_empty() {
        return Err(HuddleError::InvalidArgument(
            "reaction label cannot be empty".into(),
        ));
    }
    Ok(label.to_string())
}

fn take_message(message: Option<Message>, id: &str) -> Result<Message> {
    message.ok_or_else(|| HuddleError::Inconsistent(format!("message {id} missing after apply")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DELETED_BODY;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, Repo) {
        let dir = tempdir().unwrap();
        let repo = Repo::init(dir.path()).unwrap();
        (dir, repo)
    }

    fn post(repo: &Repo, body: &str) -> Message {
        repo.create_message(NewMessage::new(ROOM, "alice", body)).unwrap()
    }

    #[test]
    fn create_assigns_id_seq_and_mentions() {
        let (_dir, repo) = setup();
        let first = post(&repo, "hello @bob");
        let second = post(&repo, "again");
        assert!(first.id.starts_with("msg-"));
        assert!(second.seq > first.seq);
        assert_eq!(first.mentions, vec!["bob"]);
        assert_eq!(repo.index.get_message(&first.id).unwrap(), first);
    }

    #[test]
    fn create_validates_body_home_and_reply() {
        let (_dir, repo) = setup();
        let empty = repo.create_message(NewMessage::new(ROOM, "alice", "  "));
        assert!(matches!(empty, Err(HuddleError::InvalidArgument(_))));

        let ghost_home = repo.create_message(NewMessage::new("thr-00000000", "alice", "x"));
        assert!(matches!(ghost_home, Err(HuddleError::NotFound { .. })));

        let mentions = repo.create_message(NewMessage::new(MENTIONS, "alice", "x"));
        assert!(matches!(mentions, Err(HuddleError::InvalidArgument(_))));

        let ghost_reply = repo.create_message(NewMessage {
            reply_to: Some("msg-deadbeef".into()),
            ..NewMessage::new(ROOM, "alice", "x")
        });
        assert!(matches!(ghost_reply, Err(HuddleError::NotFound { .. })));
    }

    #[test]
    fn retried_create_with_same_id_is_idempotent() {
        let (_dir, repo) = setup();
        let new = NewMessage {
            id: Some("msg-0000abcd".into()),
            ..NewMessage::new(ROOM, "alice", "once")
        };
        let first = repo.create_message(new.clone()).unwrap();
        let again = repo.create_message(new.clone()).unwrap();
        assert_eq!(first, again);
        assert_eq!(repo.index.messages_in(ROOM).unwrap().len(), 1);
        assert!(repo.verify().unwrap().is_empty());

        let clash = repo.create_message(NewMessage {
            body: "different".into(),
            ..new
        });
        assert!(matches!(clash, Err(HuddleError::Conflict(_))));
    }

    #[test]
    fn edit_records_history_and_missing_id_is_not_found() {
        let (_dir, repo) = setup();
        let msg = post(&repo, "draft");
        let edited = repo
            .edit_message(&msg.id, "final", "alice", Some("typo".into()))
            .unwrap();
        assert_eq!(edited.body, "final");
        assert_eq!(edited.edit_count, 1);
        assert_eq!(edited.edit_history[0].reason.as_deref(), Some("typo"));

        let err = repo.edit_message("msg-ffffffff", "x", "alice", None).unwrap_err();
        assert!(matches!(err, HuddleError::NotFound { .. }));
    }

    #[test]
    fn delete_masks_body_but_original_stays_recoverable() {
        let (_dir, repo) = setup();
        let msg = post(&repo, "oops secret");
        let deleted = repo.delete_message(&msg.id, Some("alice")).unwrap();
        assert_eq!(deleted.body, DELETED_BODY);
        assert!(deleted.is_deleted());

        let original = repo.original_message(&msg.id).unwrap();
        match original.record {
            Record::Message(r) => assert_eq!(r.body, "oops secret"),
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn move_to_current_home_conflicts() {
        let (_dir, repo) = setup();
        let msg = post(&repo, "where am i");
        let err = repo.move_message(&msg.id, ROOM).unwrap_err();
        assert!(matches!(err, HuddleError::Conflict(_)));

        let thread = repo.create_thread("ops", None, None, "alice").unwrap();
        let moved = repo.move_message(&msg.id, &thread.id).unwrap();
        assert_eq!(moved.home, thread.id);
        assert_eq!(repo.index.messages_in(&thread.id).unwrap().len(), 1);
        let thread = repo.index.get_thread(&thread.id).unwrap();
        assert!(thread.last_activity_at >= moved.ts);
    }

    #[test]
    fn double_reaction_never_duplicates() {
        let (_dir, repo) = setup();
        let msg = post(&repo, "ship it?");
        repo.add_reaction(&msg.id, "bob", "+1").unwrap();
        let after = repo.add_reaction(&msg.id, "bob", "+1").unwrap();
        assert_eq!(after.reactions["+1"].len(), 1);

        let removed = repo.remove_reaction(&msg.id, "bob", "+1").unwrap();
        assert!(removed.reactions.is_empty());
        let noop = repo.remove_reaction(&msg.id, "bob", "+1").unwrap();
        assert!(noop.reactions.is_empty());
        assert!(repo.verify().unwrap().is_empty());
    }

    #[test]
    fn favorites_and_pins_are_idempotent() {
        let (_dir, repo) = setup();
        let msg = post(&repo, "keep me");
        assert!(repo.set_favorite(&msg.id, "bob", true).unwrap());
        assert!(!repo.set_favorite(&msg.id, "bob", true).unwrap());
        assert_eq!(repo.index.favorites_of("bob").unwrap().len(), 1);
        assert!(repo.set_favorite(&msg.id, "bob", false).unwrap());
        assert!(repo.index.favorites_of("bob").unwrap().is_empty());

        assert!(repo.set_pin(&msg.id, "alice", true).unwrap());
        assert!(!repo.set_pin(&msg.id, "alice", true).unwrap());
        assert_eq!(repo.index.pins_in(ROOM).unwrap().len(), 1);
        assert!(repo.set_pin(&msg.id, "alice", false).unwrap());
        assert!(repo.index.pins_in(ROOM).unwrap().is_empty());
        assert!(repo.verify().unwrap().is_empty());
    }

    #[test]
    fn unread_counts_follow_watermark() {
        let (_dir, repo) = setup();
        let a = post(&repo, "one");
        post(&repo, "two @bob");
        repo.create_message(NewMessage::new(ROOM, "bob", "mine")).unwrap();

        assert_eq!(repo.unread("bob", ROOM).unwrap(), 2);
        assert_eq!(repo.unread("bob", MENTIONS).unwrap(), 1);

        repo.mark_read("bob", ROOM, &a.id).unwrap();
        assert_eq!(repo.unread("bob", ROOM).unwrap(), 1);

        let err = repo.mark_read("bob", "mentions", "msg-ffffffff").unwrap_err();
        assert!(matches!(err, HuddleError::NotFound { .. }));
    }

    #[test]
    fn mark_read_rejects_message_from_another_home() {
        let (_dir, repo) = setup();
        let thread = repo.create_thread("ops", None, None, "alice").unwrap();
        let msg = post(&repo, "in room");
        let err = repo.mark_read("bob", &thread.id, &msg.id).unwrap_err();
        assert!(matches!(err, HuddleError::InvalidArgument(_)));
    }

    #[test]
    fn mutation_fails_fast_while_lock_is_held() {
        let (_dir, repo) = setup();
        let _held = repo.lock().unwrap();
        let err = repo
            .create_message(NewMessage::new(ROOM, "alice", "blocked"))
            .unwrap_err();
        assert!(matches!(err, HuddleError::Locked(_)));
    }
}
