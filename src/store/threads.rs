//! Thread mutations and hierarchy queries.

use crate::error::{HuddleError, Result};
use crate::ids;
use crate::model::{MENTIONS, ROOM, Thread, ThreadStatus};
use crate::store::hierarchy::{self, Forest, TreeNode};
use crate::store::record::{Record, SubscriptionRecord, ThreadRecord, ThreadUpdateRecord};
use crate::store::repo::{Repo, scratch};

/// Sparse change set for `Repo::update_thread`.
#[derive(Debug, Clone, Default)]
pub struct ThreadPatch {
    pub name: Option<String>,
    pub status: Option<ThreadStatus>,
    /// `Some(None)` clears the anchor.
    pub anchor: Option<Option<String>>,
}

impl Repo {
    pub fn create_thread(
        &self,
        name: &str,
        parent: Option<&str>,
        anchor: Option<&str>,
        created_by: &str,
    ) -> Result<Thread> {
        let lock = self.begin()?;
        let name = hierarchy::validate_name(name)?;
        let forest = Forest::load(&self.index)?;
        forest.check_placement(&name, parent, None)?;
        if let Some(anchor) = anchor {
            self.index.get_message(anchor)?;
        }

        let id = self.fresh_thread_id(&forest)?;
        let mut scratch = scratch([], []);
        let record = Record::Thread(ThreadRecord {
            id: id.clone(),
            name,
            parent: parent.map(String::from),
            anchor: anchor.map(String::from),
            created_by: created_by.to_string(),
        });
        self.commit(&lock, &mut scratch, record)?;
        take_thread(scratch.threads.remove(&id), &id)
    }

    /// Start a thread anchored on a message. The new thread sits under the
    /// anchor's home when that home is itself a thread.
    pub fn create_subthread(&self, anchor: &str, name: &str, created_by: &str) -> Result<Thread> {
        let message = self.index.get_message(anchor)?;
        let parent = (message.home != ROOM).then_some(message.home.as_str());
        self.create_thread(name, parent, Some(message.id.as_str()), created_by)
    }

    fn fresh_thread_id(&self, forest: &Forest) -> Result<String> {
        for _ in 0..8 {
            let id = ids::new_thread_id()?;
            if forest.get(&id).is_none() {
                return Ok(id);
            }
        }
        Err(HuddleError::Conflict(
            "could not allocate an unused thread id".into(),
        ))
    }

    /// Apply a sparse patch. Renames re-check the sibling and mirror rules.
    /// A patch that changes nothing writes nothing.
    pub fn update_thread(&self, id: &str, patch: ThreadPatch) -> Result<Thread> {
        let lock = self.begin()?;
        let forest = Forest::load(&self.index)?;
        let thread = forest
            .get(id)
            .cloned()
            .ok_or_else(|| HuddleError::not_found("thread", id))?;

        let name = match patch.name {
            Some(name) => {
                let name = hierarchy::validate_name(&name)?;
                if name != thread.name {
                    forest.check_placement(&name, thread.parent.as_deref(), Some(id))?;
                    Some(name)
                } else {
                    None
                }
            }
            None => None,
        };
        let status = patch.status.filter(|s| *s != thread.status);
        let anchor = match patch.anchor {
            Some(Some(anchor)) => {
                self.index.get_message(&anchor)?;
                if thread.anchor.as_deref() == Some(anchor.as_str()) {
                    None
                } else {
                    Some(Some(anchor))
                }
            }
            Some(None) => thread.anchor.is_some().then_some(None),
            None => None,
        };
        if name.is_none() && status.is_none() && anchor.is_none() {
            return Ok(thread);
        }

        let mut scratch = scratch([], [&thread]);
        let record = Record::ThreadUpdate(ThreadUpdateRecord {
            id: id.to_string(),
            name,
            status,
            parent: None,
            anchor,
        });
        self.commit(&lock, &mut scratch, record)?;
        take_thread(scratch.threads.remove(id), id)
    }

    pub fn rename_thread(&self, id: &str, name: &str) -> Result<Thread> {
        self.update_thread(
            id,
            ThreadPatch {
                name: Some(name.to_string()),
                ..Default::default()
            },
        )
    }

    pub fn archive_thread(&self, id: &str) -> Result<Thread> {
        self.set_thread_status(id, ThreadStatus::Archived)
    }

    pub fn reopen_thread(&self, id: &str) -> Result<Thread> {
        self.set_thread_status(id, ThreadStatus::Open)
    }

    fn set_thread_status(&self, id: &str, status: ThreadStatus) -> Result<Thread> {
        self.update_thread(
            id,
            ThreadPatch {
                status: Some(status),
                ..Default::default()
            },
        )
    }

    /// Move a thread under `new_parent` (or to the root). Fails
    /// `CycleDetected` when the new parent is the thread or one of its
    /// descendants, leaving the tree unchanged.
    pub fn reparent_thread(&self, id: &str, new_parent: Option<&str>) -> Result<Thread> {
        let lock = self.begin()?;
        let forest = Forest::load(&self.index)?;
        let thread = forest
            .get(id)
            .cloned()
            .ok_or_else(|| HuddleError::not_found("thread", id))?;
        forest.check_reparent(id, new_parent)?;
        if thread.parent.as_deref() == new_parent {
            return Ok(thread);
        }
        forest.check_placement(&thread.name, new_parent, Some(id))?;

        let mut scratch = scratch([], [&thread]);
        let record = Record::ThreadUpdate(ThreadUpdateRecord {
            id: id.to_string(),
            parent: Some(new_parent.map(String::from)),
            ..Default::default()
        });
        self.commit(&lock, &mut scratch, record)?;
        take_thread(scratch.threads.remove(id), id)
    }

    /// Subscribe or unsubscribe. Returns whether anything changed.
    pub fn set_subscription(&self, thread: &str, agent: &str, active: bool) -> Result<bool> {
        let lock = self.begin()?;
        let current_thread = self.index.get_thread(thread)?;
        let current = self.index.is_subscribed(thread, agent)?;
        if current == active {
            return Ok(false);
        }
        let mut scratch = scratch([], [&current_thread]);
        if current {
            scratch
                .subscriptions
                .insert((thread.to_string(), agent.to_string()));
        }
        let record = Record::Subscription(SubscriptionRecord {
            thread: thread.to_string(),
            agent: agent.to_string(),
            active,
        });
        Ok(self.commit(&lock, &mut scratch, record)?.is_some())
    }

    /// Resolve a thread by ID, ID prefix, name, or `/`-separated path.
    pub fn resolve_thread(&self, reference: &str) -> Result<Thread> {
        Forest::load(&self.index)?.resolve(reference).cloned()
    }

    /// Resolve a home reference: `room`, `mentions`, or a thread reference.
    pub fn resolve_home(&self, reference: &str) -> Result<String> {
        match reference.trim() {
            ROOM => Ok(ROOM.to_string()),
            MENTIONS => Ok(MENTIONS.to_string()),
            other => Ok(self.resolve_thread(other)?.id),
        }
    }

    pub fn thread_path(&self, id: &str) -> Result<String> {
        Forest::load(&self.index)?.path(id)
    }

    pub fn thread_tree(&self) -> Result<Vec<TreeNode>> {
        Forest::load(&self.index)?.tree()
    }
}

fn take_thread(thread: Option<Thread>, id: &str) -> Result<Thread> {
    thread.ok_or_else(|| HuddleError::Inconsistent(format!("thread {id} missing after apply")))
}
