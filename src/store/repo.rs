use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{HuddleError, Result};
use crate::model::{Message, Thread};
use crate::store::index::Index;
use crate::store::lock::WriterLock;
use crate::store::log::EventLog;
use crate::store::projection::{Applied, Projection};
use crate::store::record::{Entry, Record};
use crate::store::watermarks::WatermarkStore;

pub const DATA_DIR: &str = ".huddle";
const INDEX_FILE: &str = "index.db";
const LOCK_FILE: &str = "write.lock";
const GITIGNORE: &str = "index.db*\n*.lock\n*.tmp\n*.bak\n";

/// Counts reported after replaying the log into the index.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RebuildReport {
    pub records: usize,
    pub messages: usize,
    pub threads: usize,
}

/// An open huddle project: the event log, its derived index, and the
/// side files that live next to them.
pub struct Repo {
    project_root: PathBuf,
    data_dir: PathBuf,
    pub log: EventLog,
    pub index: Index,
    pub watermarks: WatermarkStore,
    pub config: Config,
}

impl Repo {
    /// Initialize `.huddle/` under `project_root`.
    pub fn init(project_root: &Path) -> Result<Self> {
        let data_dir = project_root.join(DATA_DIR);
        if data_dir.join(crate::config::CONFIG_FILE).exists() {
            return Err(HuddleError::AlreadyInitialized);
        }
        fs::create_dir_all(&data_dir)?;
        EventLog::open(&data_dir).ensure_files()?;
        fs::write(data_dir.join(".gitignore"), GITIGNORE)?;
        Config::default().save(&data_dir)?;
        info!(path = %data_dir.display(), "initialized huddle project");
        Self::open(project_root)
    }

    /// Open an existing project, rebuilding the index if it is missing or
    /// its fingerprint no longer matches the log.
    pub fn open(project_root: &Path) -> Result<Self> {
        let data_dir = project_root.join(DATA_DIR);
        let config = Config::load(&data_dir)?;
        let log = EventLog::open(&data_dir);
        log.ensure_files()?;

        let index_path = data_dir.join(INDEX_FILE);
        let needs_rebuild = !index_path.exists();
        let index = Index::open(&index_path)?;

        let current_fp = log.fingerprint()?;
        let stored_fp = index.get_fingerprint()?;
        if needs_rebuild || stored_fp.as_deref() != Some(current_fp.as_str()) {
            debug!(stored = ?stored_fp, "index fingerprint mismatch");
            // A writer mid-commit would have its row replaced by our older
            // replay. Leave the index stale for its next `begin()` instead.
            match WriterLock::acquire(&data_dir.join(LOCK_FILE)) {
                Ok(_lock) => {
                    if index.get_fingerprint()?.as_deref() != Some(log.fingerprint()?.as_str()) {
                        rebuild_index(&log, &index)?;
                    }
                }
                Err(HuddleError::Locked(_)) => {
                    debug!("writer lock held; deferring index rebuild");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Self {
            project_root: project_root.to_path_buf(),
            watermarks: WatermarkStore::open(&data_dir),
            data_dir,
            log,
            index,
            config,
        })
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Take the exclusive writer lock, failing fast with `Locked`.
    pub fn lock(&self) -> Result<WriterLock> {
        WriterLock::acquire(&self.data_dir.join(LOCK_FILE))
    }

    /// Take the writer lock and catch the index up with external appends.
    pub(crate) fn begin(&self) -> Result<WriterLock> {
        let lock = self.lock()?;
        if self.is_stale()? {
            self.rebuild_locked()?;
        }
        Ok(lock)
    }

    /// True when the log changed since the index was last synchronized.
    pub fn is_stale(&self) -> Result<bool> {
        let stored = self.index.get_fingerprint()?;
        Ok(stored.as_deref() != Some(self.log.fingerprint()?.as_str()))
    }

    /// Drop and replay the whole index from the log, under the writer lock.
    pub fn rebuild(&self) -> Result<RebuildReport> {
        let _lock = self.lock()?;
        self.rebuild_locked()
    }

    pub(crate) fn rebuild_locked(&self) -> Result<RebuildReport> {
        rebuild_index(&self.log, &self.index).map(|(report, _)| report)
    }

    /// Replay the log in memory and list every ID where it disagrees with the index.
    pub fn verify(&self) -> Result<Vec<String>> {
        let entries = self.log.read_all()?;
        let replayed = Projection::replay(&entries);
        Ok(replayed.diff_ids(&self.index.snapshot()?))
    }

    /// The creation record of a message as originally written.
    pub fn original_message(&self, id: &str) -> Result<Entry> {
        self.log
            .original_message(id)?
            .ok_or_else(|| HuddleError::not_found("message", id))
    }

    /// Fold one record into `scratch` (the entities it touches, loaded from
    /// the index), write the result to the index, then append to the log.
    ///
    /// An unchanged outcome writes nothing. A failed append leaves the index
    /// marked stale so the next open replays the log.
    pub(crate) fn commit(
        &self,
        _lock: &WriterLock,
        scratch: &mut Projection,
        record: Record,
    ) -> Result<Option<Entry>> {
        let entry = Entry {
            seq: self.log.next_seq()?,
            ts: Utc::now(),
            record,
        };
        match scratch.apply(&entry) {
            Applied::Changed => {}
            Applied::Unchanged => return Ok(None),
            Applied::Skipped(reason) => return Err(HuddleError::Inconsistent(reason)),
        }
        self.write_through(scratch, &entry.record)?;
        self.append(&entry)?;
        Ok(Some(entry))
    }

    /// Durably append an already-applied entry and resync the fingerprint.
    pub(crate) fn append(&self, entry: &Entry) -> Result<()> {
        if let Err(e) = self.log.append(entry) {
            self.index.mark_stale()?;
            return Err(e);
        }
        self.index.set_fingerprint(&self.log.fingerprint()?)?;
        Ok(())
    }

    fn write_through(&self, scratch: &Projection, record: &Record) -> Result<()> {
        match record {
            Record::Message(r) => {
                self.write_message(scratch, &r.id)?;
                self.write_thread_if_present(scratch, &r.home)?;
            }
            Record::MessageMove(r) => {
                self.write_message(scratch, &r.id)?;
                self.write_thread_if_present(scratch, &r.to)?;
            }
            Record::MessageEdit(r) => self.write_message(scratch, &r.id)?,
            Record::MessageDelete(r) => self.write_message(scratch, &r.id)?,
            Record::Reaction(r) => self.write_message(scratch, &r.id)?,
            Record::Thread(r) => self.write_thread_if_present(scratch, &r.id)?,
            Record::ThreadUpdate(r) => self.write_thread_if_present(scratch, &r.id)?,
            Record::Subscription(r) => {
                self.index.set_subscription(&r.thread, &r.agent, r.active)?;
            }
            Record::Favorite(r) => self.index.set_favorite(&r.agent, &r.id, r.active)?,
            Record::Pin(r) => match scratch.pins.get(&r.id) {
                Some(pin) if r.active => self.index.upsert_pin(pin)?,
                _ => self.index.remove_pin(&r.id)?,
            },
        }
        Ok(())
    }

    fn write_message(&self, scratch: &Projection, id: &str) -> Result<()> {
        let message = scratch
            .messages
            .get(id)
            .ok_or_else(|| HuddleError::Inconsistent(format!("message {id} vanished")))?;
        self.index.upsert_message(message)
    }

    fn write_thread_if_present(&self, scratch: &Projection, id: &str) -> Result<()> {
        if let Some(thread) = scratch.threads.get(id) {
            self.index.upsert_thread(thread)?;
        }
        Ok(())
    }
}

/// Start a scratch projection holding the given entities.
pub(crate) fn scratch<'a>(
    messages: impl IntoIterator<Item = &'a Message>,
    threads: impl IntoIterator<Item = &'a Thread>,
) -> Projection {
    let mut projection = Projection::default();
    for m in messages {
        projection.messages.insert(m.id.clone(), m.clone());
    }
    for t in threads {
        projection.threads.insert(t.id.clone(), t.clone());
    }
    projection
}

/// Replay the log into the index. Returns the replayed projection too.
pub(crate) fn rebuild_index(log: &EventLog, index: &Index) -> Result<(RebuildReport, Projection)> {
    // Fingerprint first: an append racing the read makes the next open rebuild again.
    let fingerprint = log.fingerprint()?;
    let entries = log.read_all()?;
    let projection = Projection::replay(&entries);
    index.rebuild(&projection)?;
    index.set_fingerprint(&fingerprint)?;

    let max_seq = entries.iter().map(|e| e.seq).max().unwrap_or(0);
    log.ensure_counter_above(max_seq)?;

    let report = RebuildReport {
        records: entries.len(),
        messages: projection.messages.len(),
        threads: projection.threads.len(),
    };
    info!(
        records = report.records,
        messages = report.messages,
        threads = report.threads,
        "rebuilt index from log"
    );
    Ok((report, projection))
}

/// Walk up from the current directory to find the project root.
pub fn find_repo_root() -> Result<PathBuf> {
    let dir = std::env::current_dir().map_err(HuddleError::Io)?;
    find_repo_root_from(&dir)
}

pub fn find_repo_root_from(start: &Path) -> Result<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join(DATA_DIR).join(crate::config::CONFIG_FILE).exists() {
            return Ok(dir);
        }
        if !dir.pop() {
            return Err(HuddleError::NotInitialized);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageKind;
    use crate::store::record::{Family, MessageRecord};
    use tempfile::tempdir;

    fn message_entry(seq: u64, id: &str, body: &str) -> Entry {
        Entry {
            seq,
            ts: Utc::now(),
            record: Record::Message(MessageRecord {
                id: id.into(),
                home: "room".into(),
                author: "alice".into(),
                body: body.into(),
                kind: MessageKind::User,
                reply_to: None,
                tombstone: None,
            }),
        }
    }

    #[test]
    fn init_twice_fails() {
        let dir = tempdir().unwrap();
        Repo::init(dir.path()).unwrap();
        assert!(matches!(
            Repo::init(dir.path()),
            Err(HuddleError::AlreadyInitialized)
        ));
    }

    #[test]
    fn open_without_init_is_not_initialized() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Repo::open(dir.path()),
            Err(HuddleError::NotInitialized)
        ));
    }

    #[test]
    fn init_writes_gitignore_for_derived_files() {
        let dir = tempdir().unwrap();
        Repo::init(dir.path()).unwrap();
        let ignore = fs::read_to_string(dir.path().join(DATA_DIR).join(".gitignore")).unwrap();
        assert!(ignore.contains("index.db*"));
        assert!(ignore.contains("*.lock"));
    }

    #[test]
    fn open_rebuilds_after_external_append() {
        let dir = tempdir().unwrap();
        Repo::init(dir.path()).unwrap();
        {
            let repo = Repo::open(dir.path()).unwrap();
            repo.log.append(&message_entry(1, "msg-00000001", "hello")).unwrap();
        }
        let repo = Repo::open(dir.path()).unwrap();
        assert_eq!(repo.index.get_message("msg-00000001").unwrap().body, "hello");
        assert!(!repo.is_stale().unwrap());
    }

    #[test]
    fn open_defers_rebuild_while_a_writer_holds_the_lock() {
        let dir = tempdir().unwrap();
        let writer = Repo::init(dir.path()).unwrap();
        writer
            .log
            .append(&message_entry(1, "msg-00000001", "in flight"))
            .unwrap();
        let lock = writer.lock().unwrap();

        let reader = Repo::open(dir.path()).unwrap();
        assert!(reader.index.find_message("msg-00000001").unwrap().is_none());
        assert!(reader.is_stale().unwrap());

        drop(lock);
        reader
            .create_message(crate::store::messages::NewMessage::new(
                crate::model::ROOM,
                "bob",
                "after",
            ))
            .unwrap();
        assert!(reader.index.find_message("msg-00000001").unwrap().is_some());
    }

    #[test]
    fn rebuild_bumps_counter_past_hand_written_seq() {
        let dir = tempdir().unwrap();
        let repo = Repo::init(dir.path()).unwrap();
        repo.log.append(&message_entry(41, "msg-00000001", "hi")).unwrap();
        let report = repo.rebuild().unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(repo.log.next_seq().unwrap(), 42);
    }

    #[test]
    fn deleting_index_db_is_recoverable() {
        let dir = tempdir().unwrap();
        {
            let repo = Repo::init(dir.path()).unwrap();
            repo.log.append(&message_entry(1, "msg-00000001", "kept")).unwrap();
        }
        fs::remove_file(dir.path().join(DATA_DIR).join(INDEX_FILE)).unwrap();
        let repo = Repo::open(dir.path()).unwrap();
        assert_eq!(repo.index.messages_in("room").unwrap().len(), 1);
        assert!(repo.verify().unwrap().is_empty());
    }

    #[test]
    fn verify_reports_divergent_ids() {
        let dir = tempdir().unwrap();
        let repo = Repo::init(dir.path()).unwrap();
        let path = repo.log.family_path(Family::Messages);
        let line = serde_json::to_string(&message_entry(1, "msg-0000000a", "x")).unwrap();
        fs::write(&path, format!("{line}\n")).unwrap();
        assert_eq!(repo.verify().unwrap(), vec!["msg-0000000a".to_string()]);
    }

    #[test]
    fn find_root_walks_up_from_nested_dir() {
        let dir = tempdir().unwrap();
        Repo::init(dir.path()).unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_repo_root_from(&nested).unwrap(), dir.path());
    }
}
