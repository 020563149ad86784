use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{HuddleError, Result};
use crate::store::record::{Entry, Family, Record};

/// A parsed log line together with its raw text, so rewrites can carry
/// records forward verbatim (including fields this version does not know).
#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub raw: String,
    pub entry: Entry,
}

/// The append-only event log under `.huddle/log/` plus the archive log.
pub struct EventLog {
    root: PathBuf,
}

impl EventLog {
    /// Open the log rooted at a project data directory (`.huddle/`).
    pub fn open(data_dir: &Path) -> Self {
        Self {
            root: data_dir.to_path_buf(),
        }
    }

    /// Create the log and archive directories and seed every family file.
    pub fn ensure_files(&self) -> Result<()> {
        fs::create_dir_all(self.log_dir())?;
        fs::create_dir_all(self.archive_dir())?;
        for family in Family::ALL {
            let path = self.family_path(family);
            if !path.exists() {
                fs::write(path, "")?;
            }
        }
        let archive = self.archive_path();
        if !archive.exists() {
            fs::write(archive, "")?;
        }
        let counter = self.counter_path();
        if !counter.exists() {
            fs::write(counter, r#"{"next_seq":1}"#)?;
        }
        Ok(())
    }

    fn log_dir(&self) -> PathBuf {
        self.root.join("log")
    }

    fn archive_dir(&self) -> PathBuf {
        self.root.join("archive")
    }

    fn counter_path(&self) -> PathBuf {
        self.root.join("counter.json")
    }

    pub fn family_path(&self, family: Family) -> PathBuf {
        self.log_dir().join(family.file_name())
    }

    pub fn archive_path(&self) -> PathBuf {
        self.archive_dir().join("messages.jsonl")
    }

    /// Durably append one entry to its family file.
    pub fn append(&self, entry: &Entry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(self.family_path(Family::of(&entry.record)))?;
        // Start a fresh line after a torn append.
        if ends_mid_line(&mut file)? {
            line.insert(0, '\n');
        }
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    pub fn read_family(&self, family: Family) -> Result<Vec<LogLine>> {
        read_lines(&self.family_path(family))
    }

    pub fn read_archive(&self) -> Result<Vec<LogLine>> {
        read_lines(&self.archive_path())
    }

    /// Every entry of every family in replay order: ascending `seq`, ties
    /// broken by family order and then by line order.
    pub fn read_all(&self) -> Result<Vec<Entry>> {
        let mut keyed = Vec::new();
        for (family_rank, family) in Family::ALL.into_iter().enumerate() {
            for (line_rank, line) in self.read_family(family)?.into_iter().enumerate() {
                keyed.push((line.entry.seq, family_rank, line_rank, line.entry));
            }
        }
        keyed.sort_by(|a, b| (a.0, a.1, a.2).cmp(&(b.0, b.1, b.2)));
        Ok(keyed.into_iter().map(|(_, _, _, entry)| entry).collect())
    }

    /// The raw creation record of a message, even after a soft delete.
    pub fn original_message(&self, id: &str) -> Result<Option<Entry>> {
        Ok(self
            .read_family(Family::Messages)?
            .into_iter()
            .map(|line| line.entry)
            .find(|entry| matches!(&entry.record, Record::Message(m) if m.id == id)))
    }

    /// Highest `seq` present in the live log.
    pub fn max_seq(&self) -> Result<u64> {
        let mut max = 0;
        for family in Family::ALL {
            for line in self.read_family(family)? {
                max = max.max(line.entry.seq);
            }
        }
        Ok(max)
    }

    /// Compute a fingerprint from log file metadata (family, size, mtime).
    /// Cheap (stat calls, no file reads) and detects appends, rewrites and
    /// external edits. Uses nanosecond mtime to catch rapid same-size edits.
    pub fn fingerprint(&self) -> Result<String> {
        let mut parts = Vec::new();
        for family in Family::ALL {
            let path = self.family_path(family);
            let (size, mtime) = match fs::metadata(&path) {
                Ok(meta) => {
                    let mtime = meta
                        .modified()?
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_nanos();
                    (meta.len(), mtime)
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => (0, 0),
                Err(e) => return Err(e.into()),
            };
            parts.push(format!("{}:{size}:{mtime}", family.file_name()));
        }
        Ok(parts.join(","))
    }

    /// Allocate the next global sequence number. Callers hold the writer lock.
    pub fn next_seq(&self) -> Result<u64> {
        let path = self.counter_path();
        let mut counter = self.read_counter()?;
        let seq = counter.next_seq;
        counter.next_seq += 1;
        fs::write(&path, serde_json::to_string(&counter)?)?;
        Ok(seq)
    }

    /// Make sure the counter is ahead of every `seq` already in the log.
    pub fn ensure_counter_above(&self, max_seq: u64) -> Result<()> {
        let mut counter = self.read_counter()?;
        if counter.next_seq <= max_seq {
            counter.next_seq = max_seq + 1;
            fs::write(self.counter_path(), serde_json::to_string(&counter)?)?;
        }
        Ok(())
    }

    fn read_counter(&self) -> Result<Counter> {
        let path = self.counter_path();
        if !path.exists() {
            return Ok(Counter { next_seq: 1 });
        }
        let data = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Counter {
    next_seq: u64,
}

fn ends_mid_line(file: &mut fs::File) -> Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

fn read_lines(path: &Path) -> Result<Vec<LogLine>> {
    if !path.exists() {
        return Ok(vec![]);
    }
    let content = fs::read_to_string(path)?;
    Ok(parse_lines(&content, &path.display().to_string()))
}

/// Parse a family file's contents.
///
/// An unparseable final line is a torn append: reading stops there. Any
/// other unparseable line, or a JSON object that is not a valid record, is
/// skipped with a warning.
pub fn parse_lines(content: &str, origin: &str) -> Vec<LogLine> {
    let lines: Vec<(usize, &str)> = content
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .collect();
    let last = lines.len().saturating_sub(1);

    let mut parsed = Vec::with_capacity(lines.len());
    for (pos, (lineno, line)) in lines.into_iter().enumerate() {
        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) if pos == last => {
                warn!(file = origin, line = lineno + 1, error = %e, "truncated trailing record; replay stops here");
                break;
            }
            Err(e) => {
                warn!(file = origin, line = lineno + 1, error = %e, "skipping malformed record");
                continue;
            }
        };
        match serde_json::from_value::<Entry>(value) {
            Ok(entry) => parsed.push(LogLine {
                raw: line.to_string(),
                entry,
            }),
            Err(e) => {
                warn!(file = origin, line = lineno + 1, error = %e, "skipping record with missing or invalid fields");
            }
        }
    }
    parsed
}

/// A set of whole-file replacements written to temp files first and moved
/// into place only once every temp file is durable.
#[derive(Default)]
pub struct Rewrite {
    staged: Vec<(PathBuf, PathBuf)>,
}

impl Rewrite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `contents` beside `dest`; nothing live changes yet.
    pub fn stage(&mut self, dest: &Path, contents: &str) -> Result<()> {
        let tmp = dest.with_extension("jsonl.tmp");
        let result = (|| -> Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
            Ok(())
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            self.abort();
            return Err(e);
        }
        self.staged.push((tmp, dest.to_path_buf()));
        Ok(())
    }

    /// Move every staged file into place, in staging order.
    ///
    /// Each live file is first renamed to a backup. If any swap fails,
    /// every file already swapped is restored from its backup, so either
    /// all staged files land or none do.
    pub fn commit(mut self) -> Result<()> {
        let staged = std::mem::take(&mut self.staged);
        let mut swapped: Vec<(PathBuf, Option<PathBuf>)> = Vec::with_capacity(staged.len());
        let mut failure = None;

        for (tmp, dest) in &staged {
            let backup = if dest.exists() {
                let backup = dest.with_extension("jsonl.bak");
                if let Err(e) = fs::rename(dest, &backup) {
                    failure = Some(e);
                    break;
                }
                Some(backup)
            } else {
                None
            };
            if let Err(e) = fs::rename(tmp, dest) {
                if let Some(backup) = &backup {
                    let _ = fs::rename(backup, dest);
                }
                failure = Some(e);
                break;
            }
            swapped.push((dest.clone(), backup));
        }

        let Some(err) = failure else {
            for (_, backup) in swapped {
                if let Some(backup) = backup {
                    let _ = fs::remove_file(backup);
                }
            }
            return Ok(());
        };

        for (tmp, _) in &staged {
            let _ = fs::remove_file(tmp);
        }
        let mut stranded = Vec::new();
        for (dest, backup) in swapped.into_iter().rev() {
            let restored = match &backup {
                Some(backup) => fs::rename(backup, &dest),
                None => fs::remove_file(&dest),
            };
            if let Err(rollback_err) = restored {
                warn!(file = %dest.display(), error = %rollback_err, "rewrite rollback failed");
                stranded.push(dest.display().to_string());
            }
        }
        if !stranded.is_empty() {
            return Err(HuddleError::Inconsistent(format!(
                "rewrite failed ({err}) and rollback failed for {}; backups left beside them",
                stranded.join(", ")
            )));
        }
        Err(err.into())
    }

    /// Drop every staged temp file, leaving live files untouched.
    pub fn abort(&mut self) {
        for (tmp, _) in self.staged.drain(..) {
            let _ = fs::remove_file(tmp);
        }
    }
}

impl Drop for Rewrite {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Join raw lines back into file contents with a trailing newline.
pub fn join_lines<'a, I>(lines: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out = String::new();
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageKind;
    use crate::store::record::{MessageRecord, ReactionRecord};
    use chrono::Utc;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, EventLog) {
        let dir = tempdir().unwrap();
        let log = EventLog::open(dir.path());
        log.ensure_files().unwrap();
        (dir, log)
    }

    fn message(seq: u64, id: &str) -> Entry {
        Entry {
            seq,
            ts: Utc::now(),
            record: Record::Message(MessageRecord {
                id: id.into(),
                home: "room".into(),
                author: "alice".into(),
                body: format!("body of {id}"),
                kind: MessageKind::User,
                reply_to: None,
                tombstone: None,
            }),
        }
    }

    #[test]
    fn ensure_files_seeds_every_family() {
        let (_dir, log) = setup();
        for family in Family::ALL {
            assert!(log.family_path(family).exists());
        }
        assert!(log.archive_path().exists());
    }

    #[test]
    fn append_routes_by_family_and_reads_back_in_seq_order() {
        let (_dir, log) = setup();
        log.append(&message(1, "m1")).unwrap();
        log.append(&Entry {
            seq: 2,
            ts: Utc::now(),
            record: Record::Reaction(ReactionRecord {
                id: "m1".into(),
                agent: "bob".into(),
                label: "+1".into(),
                removed: false,
            }),
        })
        .unwrap();
        log.append(&message(3, "m2")).unwrap();

        assert_eq!(log.read_family(Family::Messages).unwrap().len(), 2);
        assert_eq!(log.read_family(Family::Reactions).unwrap().len(), 1);
        let seqs: Vec<u64> = log.read_all().unwrap().iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(log.max_seq().unwrap(), 3);
    }

    #[test]
    fn truncated_tail_stops_replay_without_error() {
        let good = serde_json::to_string(&message(1, "m1")).unwrap();
        let content = format!("{good}\n{{\"seq\":2,\"ts\":\"2026-01-");
        let lines = parse_lines(&content, "test");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].raw, good);
    }

    #[test]
    fn malformed_middle_line_and_incomplete_record_are_skipped() {
        let first = serde_json::to_string(&message(1, "m1")).unwrap();
        let last = serde_json::to_string(&message(3, "m3")).unwrap();
        let incomplete = r#"{"seq":2,"ts":"2026-01-01T00:00:00Z","kind":"message","id":"m2"}"#;
        let content = format!("{first}\nnot json at all\n{incomplete}\n\n{last}\n");
        let seqs: Vec<u64> = parse_lines(&content, "test")
            .iter()
            .map(|l| l.entry.seq)
            .collect();
        assert_eq!(seqs, vec![1, 3]);
    }

    #[test]
    fn counter_allocates_and_can_be_bumped() {
        let (_dir, log) = setup();
        assert_eq!(log.next_seq().unwrap(), 1);
        assert_eq!(log.next_seq().unwrap(), 2);
        log.ensure_counter_above(10).unwrap();
        assert_eq!(log.next_seq().unwrap(), 11);
        log.ensure_counter_above(5).unwrap();
        assert_eq!(log.next_seq().unwrap(), 12);
    }

    #[test]
    fn append_after_torn_tail_starts_a_new_line() {
        let (_dir, log) = setup();
        log.append(&message(1, "m1")).unwrap();
        let path = log.family_path(Family::Messages);
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"seq\":2,\"ts\":").unwrap();
        drop(file);

        log.append(&message(3, "m3")).unwrap();
        let seqs: Vec<u64> = log
            .read_family(Family::Messages)
            .unwrap()
            .into_iter()
            .map(|l| l.entry.seq)
            .collect();
        assert_eq!(seqs, vec![1, 3]);
    }

    #[test]
    fn fingerprint_changes_after_append() {
        let (_dir, log) = setup();
        let before = log.fingerprint().unwrap();
        log.append(&message(1, "m1")).unwrap();
        assert_ne!(before, log.fingerprint().unwrap());
    }

    #[test]
    fn original_message_survives_later_records() {
        let (_dir, log) = setup();
        log.append(&message(1, "m1")).unwrap();
        log.append(&message(2, "m2")).unwrap();
        let original = log.original_message("m2").unwrap().unwrap();
        assert_eq!(original.seq, 2);
        assert!(log.original_message("m9").unwrap().is_none());
    }

    #[test]
    fn aborted_rewrite_leaves_live_file_untouched() {
        let (_dir, log) = setup();
        log.append(&message(1, "m1")).unwrap();
        let path = log.family_path(Family::Messages);
        let before = fs::read(&path).unwrap();
        {
            let mut rewrite = Rewrite::new();
            rewrite.stage(&path, "").unwrap();
        }
        assert_eq!(fs::read(&path).unwrap(), before);
        assert!(!path.with_extension("jsonl.tmp").exists());
    }

    #[test]
    fn committed_rewrite_replaces_contents() {
        let (_dir, log) = setup();
        log.append(&message(1, "m1")).unwrap();
        let path = log.family_path(Family::Messages);
        let mut rewrite = Rewrite::new();
        rewrite.stage(&path, &join_lines(["{}"])).unwrap();
        rewrite.commit().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}\n");
    }

    #[test]
    fn failed_swap_restores_every_file_already_moved() {
        let (dir, log) = setup();
        log.append(&message(1, "m1")).unwrap();
        let messages = log.family_path(Family::Messages);
        let reactions = log.family_path(Family::Reactions);
        fs::write(&reactions, "{\"old\":true}\n").unwrap();
        let fresh = dir.path().join("fresh.jsonl");
        let before_messages = fs::read(&messages).unwrap();
        let before_reactions = fs::read(&reactions).unwrap();

        let mut rewrite = Rewrite::new();
        rewrite.stage(&fresh, "{}\n").unwrap();
        rewrite.stage(&messages, "").unwrap();
        rewrite.stage(&reactions, "").unwrap();
        // The third swap has nothing to move into place.
        fs::remove_file(reactions.with_extension("jsonl.tmp")).unwrap();
        assert!(rewrite.commit().is_err());

        assert_eq!(fs::read(&messages).unwrap(), before_messages);
        assert_eq!(fs::read(&reactions).unwrap(), before_reactions);
        assert!(!fresh.exists());
        for path in [&messages, &reactions] {
            assert!(!path.with_extension("jsonl.bak").exists());
            assert!(!path.with_extension("jsonl.tmp").exists());
        }
    }
}
