//! Delta polling over the projection index.

use std::collections::HashSet;
use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::error::Result;
use crate::model::Message;
use crate::store::index::MessageFilter;
use crate::store::repo::Repo;

const UNREAD_TTL: Duration = Duration::from_secs(30);
const UNREAD_CAPACITY: usize = 256;

/// Consumer-owned view of new arrivals.
///
/// Remembers every message ID it has reported and, on each poll, returns
/// only IDs it has not seen, in arrival order. Messages present when the
/// feed opens count as seen.
pub struct Feed {
    repo: Repo,
    home: Option<String>,
    seen: HashSet<String>,
    unread: TtlCache<(String, String), usize>,
}

impl Feed {
    /// Watch one home, or every home when `home` is `None`.
    pub fn open(project_root: &Path, home: Option<&str>) -> Result<Self> {
        let repo = Repo::open(project_root)?;
        let mut feed = Self {
            repo,
            home: home.map(String::from),
            seen: HashSet::new(),
            unread: TtlCache::new(UNREAD_TTL, UNREAD_CAPACITY),
        };
        let existing = feed.current()?;
        feed.seen = existing.into_iter().map(|m| m.id).collect();
        Ok(feed)
    }

    pub fn repo(&self) -> &Repo {
        &self.repo
    }

    fn current(&self) -> Result<Vec<Message>> {
        self.repo.index.list_messages(&MessageFilter {
            home: self.home.clone(),
            ..Default::default()
        })
    }

    /// Messages that arrived (or moved in) since the last poll.
    pub fn poll(&mut self) -> Result<Vec<Message>> {
        if self.repo.is_stale()? {
            debug!("log changed on disk; reopening index");
            self.repo = Repo::open(self.repo.project_root())?;
        }
        let current = self.current()?;
        let live: HashSet<&str> = current.iter().map(|m| m.id.as_str()).collect();
        self.seen.retain(|id| live.contains(id.as_str()));
        let fresh: Vec<Message> = current
            .into_iter()
            .filter(|m| !self.seen.contains(&m.id))
            .collect();
        if !fresh.is_empty() {
            self.seen.extend(fresh.iter().map(|m| m.id.clone()));
            self.unread.clear();
        }
        Ok(fresh)
    }

    /// Unread count for `agent` in `home`, cached until the next poll
    /// surfaces new messages.
    pub fn unread(&mut self, agent: &str, home: &str) -> Result<usize> {
        let key = (agent.to_string(), home.to_string());
        if let Some(count) = self.unread.get(&key) {
            return Ok(count);
        }
        let count = self.repo.unread(agent, home)?;
        self.unread.insert(key, count);
        Ok(count)
    }

    /// Drop a cached count, e.g. after the agent marks a home read.
    pub fn invalidate_unread(&mut self, agent: &str, home: &str) {
        self.unread.invalidate(&(agent.to_string(), home.to_string()));
    }
}

/// Run a `Feed` on a background thread, sending each non-empty batch.
/// The thread exits at the first send after the receiver is dropped.
pub fn spawn_poller(
    project_root: &Path,
    home: Option<&str>,
    interval: Duration,
) -> Result<(Receiver<Vec<Message>>, JoinHandle<()>)> {
    let mut feed = Feed::open(project_root, home)?;
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        loop {
            thread::sleep(interval);
            match feed.poll() {
                Ok(batch) if batch.is_empty() => {}
                Ok(batch) => {
                    if tx.send(batch).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "poll failed"),
            }
        }
    });
    Ok((rx, handle))
}
