use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, params};
use serde::de::DeserializeOwned;

use crate::error::{HuddleError, Result};
use crate::ids;
use crate::model::{Message, Pin, Thread};
use crate::store::projection::Projection;

const MESSAGE_COLUMNS: &str = "id, seq, ts, home, author, body, kind, reply_to, edited_at, \
     edit_count, edit_history, archived_at, archive_marker, reactions, mentions, tombstone";

const THREAD_COLUMNS: &str =
    "id, name, parent_id, status, anchor_id, created_by, created_at, last_activity_at";

/// Optional filters for message listings. Results are in arrival order.
#[derive(Debug, Default, Clone)]
pub struct MessageFilter {
    pub home: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub label: Option<String>,
    pub mentions: Option<String>,
    pub author: Option<String>,
    /// Keep only the newest N matches.
    pub limit: Option<usize>,
}

/// SQLite materialization of the projection. Derived state: safe to delete,
/// rebuilt from the event log on demand.
pub struct Index {
    conn: Connection,
}

impl Index {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        let idx = Self { conn };
        idx.create_tables()?;
        Ok(idx)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let idx = Self { conn };
        idx.create_tables()?;
        Ok(idx)
    }

    fn create_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                seq INTEGER NOT NULL,
                ts TEXT NOT NULL,
                home TEXT NOT NULL,
                author TEXT NOT NULL,
                body TEXT NOT NULL,
                kind TEXT NOT NULL,
                reply_to TEXT,
                edited_at TEXT,
                edit_count INTEGER NOT NULL DEFAULT 0,
                edit_history TEXT NOT NULL DEFAULT '[]',
                archived_at TEXT,
                archive_marker TEXT,
                reactions TEXT NOT NULL DEFAULT '{}',
                mentions TEXT NOT NULL DEFAULT '[]',
                tombstone TEXT
            );
            CREATE TABLE IF NOT EXISTS reactions (
                message_id TEXT NOT NULL,
                label TEXT NOT NULL,
                agent TEXT NOT NULL,
                PRIMARY KEY (message_id, label, agent)
            );
            CREATE TABLE IF NOT EXISTS mentions (
                message_id TEXT NOT NULL,
                agent TEXT NOT NULL,
                PRIMARY KEY (message_id, agent)
            );
            CREATE TABLE IF NOT EXISTS threads (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                parent_id TEXT,
                status TEXT NOT NULL DEFAULT 'open',
                anchor_id TEXT,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_activity_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS subscriptions (
                thread_id TEXT NOT NULL,
                agent TEXT NOT NULL,
                PRIMARY KEY (thread_id, agent)
            );
            CREATE TABLE IF NOT EXISTS favorites (
                agent TEXT NOT NULL,
                message_id TEXT NOT NULL,
                PRIMARY KEY (agent, message_id)
            );
            CREATE TABLE IF NOT EXISTS pins (
                message_id TEXT PRIMARY KEY,
                pinned_by TEXT NOT NULL,
                pinned_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_home_seq ON messages(home, seq);
            CREATE INDEX IF NOT EXISTS idx_messages_ts ON messages(ts);
            CREATE INDEX IF NOT EXISTS idx_messages_reply_to ON messages(reply_to);
            CREATE INDEX IF NOT EXISTS idx_reactions_label ON reactions(label);
            CREATE INDEX IF NOT EXISTS idx_mentions_agent ON mentions(agent);
            CREATE INDEX IF NOT EXISTS idx_threads_parent ON threads(parent_id);
            CREATE INDEX IF NOT EXISTS idx_subscriptions_agent ON subscriptions(agent);
            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Replace the whole index with the given projection in one transaction.
    pub fn rebuild(&self, projection: &Projection) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(
            "DELETE FROM reactions; DELETE FROM mentions; DELETE FROM messages;
             DELETE FROM threads; DELETE FROM subscriptions; DELETE FROM favorites;
             DELETE FROM pins;",
        )?;
        for message in projection.messages.values() {
            write_message(&tx, message)?;
        }
        for thread in projection.threads.values() {
            write_thread(&tx, thread)?;
        }
        for (thread, agent) in &projection.subscriptions {
            tx.execute(
                "INSERT OR IGNORE INTO subscriptions (thread_id, agent) VALUES (?1, ?2)",
                params![thread, agent],
            )?;
        }
        for (agent, id) in &projection.favorites {
            tx.execute(
                "INSERT OR IGNORE INTO favorites (agent, message_id) VALUES (?1, ?2)",
                params![agent, id],
            )?;
        }
        for pin in projection.pins.values() {
            write_pin(&tx, pin)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn upsert_message(&self, message: &Message) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        write_message(&tx, message)?;
        tx.commit()?;
        Ok(())
    }

    pub fn upsert_thread(&self, thread: &Thread) -> Result<()> {
        write_thread(&self.conn, thread)
    }

    pub fn set_subscription(&self, thread: &str, agent: &str, active: bool) -> Result<()> {
        if active {
            self.conn.execute(
                "INSERT OR IGNORE INTO subscriptions (thread_id, agent) VALUES (?1, ?2)",
                params![thread, agent],
            )?;
        } else {
            self.conn.execute(
                "DELETE FROM subscriptions WHERE thread_id = ?1 AND agent = ?2",
                params![thread, agent],
            )?;
        }
        Ok(())
    }

    pub fn set_favorite(&self, agent: &str, message_id: &str, active: bool) -> Result<()> {
        if active {
            self.conn.execute(
                "INSERT OR IGNORE INTO favorites (agent, message_id) VALUES (?1, ?2)",
                params![agent, message_id],
            )?;
        } else {
            self.conn.execute(
                "DELETE FROM favorites WHERE agent = ?1 AND message_id = ?2",
                params![agent, message_id],
            )?;
        }
        Ok(())
    }

    pub fn upsert_pin(&self, pin: &Pin) -> Result<()> {
        write_pin(&self.conn, pin)
    }

    pub fn remove_pin(&self, message_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM pins WHERE message_id = ?1", params![message_id])?;
        Ok(())
    }

    // -- messages -----------------------------------------------------------

    pub fn find_message(&self, id: &str) -> Result<Option<Message>> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
        let mut stmt = self.conn.prepare(&sql)?;
        match stmt.query_row(params![id], message_from_row) {
            Ok(message) => Ok(Some(message)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_message(&self, id: &str) -> Result<Message> {
        self.find_message(id)?
            .ok_or_else(|| HuddleError::not_found("message", id))
    }

    pub fn message_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM messages ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Resolve a full ID or a unique prefix to a message. Two or more
    /// candidates fail `Ambiguous` listing all of them.
    pub fn resolve_message(&self, prefix: &str) -> Result<Message> {
        let ids = self.message_ids()?;
        let id = ids::resolve_prefix("message", prefix, ids.iter().map(String::as_str))?;
        self.get_message(&id)
    }

    /// Messages whose current home is `home`, in arrival order.
    pub fn messages_in(&self, home: &str) -> Result<Vec<Message>> {
        self.list_messages(&MessageFilter {
            home: Some(home.to_string()),
            ..Default::default()
        })
    }

    /// Messages with `from <= ts <= to`, optionally limited to one home.
    pub fn messages_between(
        &self,
        home: Option<&str>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        self.list_messages(&MessageFilter {
            home: home.map(String::from),
            since: Some(from),
            until: Some(to),
            ..Default::default()
        })
    }

    pub fn messages_with_reaction(&self, label: &str) -> Result<Vec<Message>> {
        self.list_messages(&MessageFilter {
            label: Some(label.to_string()),
            ..Default::default()
        })
    }

    pub fn mentions_of(&self, agent: &str) -> Result<Vec<Message>> {
        self.list_messages(&MessageFilter {
            mentions: Some(agent.to_string()),
            ..Default::default()
        })
    }

    pub fn replies_to(&self, id: &str) -> Result<Vec<Message>> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE reply_to = ?1 ORDER BY seq");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![id], message_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_messages(&self, filter: &MessageFilter) -> Result<Vec<Message>> {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut param_idx = 1;
        let mut joins = String::new();

        if let Some(home) = &filter.home {
            conditions.push(format!("m.home = ?{param_idx}"));
            param_values.push(Box::new(home.clone()));
            param_idx += 1;
        }
        if let Some(since) = filter.since {
            conditions.push(format!("m.ts >= ?{param_idx}"));
            param_values.push(Box::new(fmt_ts(&since)));
            param_idx += 1;
        }
        if let Some(until) = filter.until {
            conditions.push(format!("m.ts <= ?{param_idx}"));
            param_values.push(Box::new(fmt_ts(&until)));
            param_idx += 1;
        }
        if let Some(author) = &filter.author {
            conditions.push(format!("m.author = ?{param_idx}"));
            param_values.push(Box::new(author.clone()));
            param_idx += 1;
        }
        if let Some(label) = &filter.label {
            joins.push_str(&format!(
                " JOIN (SELECT DISTINCT message_id FROM reactions WHERE label = ?{param_idx}) r \
                 ON r.message_id = m.id"
            ));
            param_values.push(Box::new(label.clone()));
            param_idx += 1;
        }
        if let Some(agent) = &filter.mentions {
            joins.push_str(&format!(
                " JOIN mentions mn ON mn.message_id = m.id AND mn.agent = ?{param_idx}"
            ));
            param_values.push(Box::new(agent.clone()));
            param_idx += 1;
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let limit_clause = if let Some(limit) = filter.limit {
            param_values.push(Box::new(limit as i64));
            format!(" LIMIT ?{param_idx}")
        } else {
            String::new()
        };

        let columns = prefixed_message_columns("m");
        let sql = format!(
            "SELECT {columns} FROM messages m{joins}{where_clause} ORDER BY m.seq DESC{limit_clause}"
        );

        let params_slice: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt
            .query_map(params_slice.as_slice(), message_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.reverse();
        Ok(rows)
    }

    /// Count messages in `home` that arrived after `after_seq`, not written by `reader`.
    pub fn count_unread_in(&self, home: &str, after_seq: u64, reader: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE home = ?1 AND seq > ?2 AND author != ?3",
            params![home, after_seq, reader],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Count messages mentioning `agent` that arrived after `after_seq`.
    pub fn count_unread_mentions(&self, agent: &str, after_seq: u64) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM messages m JOIN mentions mn ON mn.message_id = m.id
             WHERE mn.agent = ?1 AND m.seq > ?2 AND m.author != ?1",
            params![agent, after_seq],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // -- threads ------------------------------------------------------------

    pub fn find_thread(&self, id: &str) -> Result<Option<Thread>> {
        let sql = format!("SELECT {THREAD_COLUMNS} FROM threads WHERE id = ?1");
        let mut stmt = self.conn.prepare(&sql)?;
        match stmt.query_row(params![id], thread_from_row) {
            Ok(thread) => Ok(Some(thread)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_thread(&self, id: &str) -> Result<Thread> {
        self.find_thread(id)?
            .ok_or_else(|| HuddleError::not_found("thread", id))
    }

    pub fn list_threads(&self) -> Result<Vec<Thread>> {
        let sql = format!("SELECT {THREAD_COLUMNS} FROM threads ORDER BY created_at, id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], thread_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Direct children of `parent` (roots when `None`), ordered by name.
    pub fn children_of(&self, parent: Option<&str>) -> Result<Vec<Thread>> {
        let sql = match parent {
            Some(_) => format!(
                "SELECT {THREAD_COLUMNS} FROM threads WHERE parent_id = ?1 ORDER BY name, id"
            ),
            None => format!(
                "SELECT {THREAD_COLUMNS} FROM threads WHERE parent_id IS NULL ORDER BY name, id"
            ),
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = match parent {
            Some(parent) => stmt
                .query_map(params![parent], thread_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?,
            None => stmt
                .query_map([], thread_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }

    pub fn roots(&self) -> Result<Vec<Thread>> {
        self.children_of(None)
    }

    /// The parent edge of every thread, for explicit ancestor walks.
    pub fn thread_parents(&self) -> Result<HashMap<String, Option<String>>> {
        let mut stmt = self.conn.prepare("SELECT id, parent_id FROM threads")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<HashMap<String, Option<String>>, _>>()?;
        Ok(rows)
    }

    // -- subscriptions, favorites, pins --------------------------------------

    pub fn subscribers_of(&self, thread: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT agent FROM subscriptions WHERE thread_id = ?1 ORDER BY agent")?;
        let rows = stmt
            .query_map(params![thread], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(rows)
    }

    pub fn subscriptions_of(&self, agent: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT thread_id FROM subscriptions WHERE agent = ?1 ORDER BY thread_id")?;
        let rows = stmt
            .query_map(params![agent], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(rows)
    }

    pub fn is_subscribed(&self, thread: &str, agent: &str) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM subscriptions WHERE thread_id = ?1 AND agent = ?2)",
            params![thread, agent],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn favorites_of(&self, agent: &str) -> Result<Vec<Message>> {
        let columns = prefixed_message_columns("m");
        let sql = format!(
            "SELECT {columns} FROM messages m JOIN favorites f ON f.message_id = m.id
             WHERE f.agent = ?1 ORDER BY m.seq"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![agent], message_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn is_favorite(&self, agent: &str, message_id: &str) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM favorites WHERE agent = ?1 AND message_id = ?2)",
            params![agent, message_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn find_pin(&self, message_id: &str) -> Result<Option<Pin>> {
        let mut stmt = self
            .conn
            .prepare("SELECT message_id, pinned_by, pinned_at FROM pins WHERE message_id = ?1")?;
        match stmt.query_row(params![message_id], pin_from_row) {
            Ok(pin) => Ok(Some(pin)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Pinned messages whose current home is `home`, in arrival order.
    pub fn pins_in(&self, home: &str) -> Result<Vec<Message>> {
        let columns = prefixed_message_columns("m");
        let sql = format!(
            "SELECT {columns} FROM messages m JOIN pins p ON p.message_id = m.id
             WHERE m.home = ?1 ORDER BY m.seq"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![home], message_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Load the entire index back into a projection value.
    pub fn snapshot(&self) -> Result<Projection> {
        let mut projection = Projection::default();

        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages");
        let mut stmt = self.conn.prepare(&sql)?;
        let messages = stmt
            .query_map([], message_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        projection.messages = messages
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect::<BTreeMap<_, _>>();

        projection.threads = self
            .list_threads()?
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();

        let mut stmt = self.conn.prepare("SELECT thread_id, agent FROM subscriptions")?;
        projection.subscriptions = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<BTreeSet<(String, String)>, _>>()?;

        let mut stmt = self.conn.prepare("SELECT agent, message_id FROM favorites")?;
        projection.favorites = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<BTreeSet<(String, String)>, _>>()?;

        let mut stmt = self
            .conn
            .prepare("SELECT message_id, pinned_by, pinned_at FROM pins")?;
        projection.pins = stmt
            .query_map([], pin_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .map(|p| (p.message_id.clone(), p))
            .collect();

        Ok(projection)
    }

    pub fn get_fingerprint(&self) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM metadata WHERE key = 'fingerprint'")?;
        let result = stmt.query_row([], |row| row.get::<_, String>(0));
        match result {
            Ok(fp) => Ok(Some(fp)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_fingerprint(&self, fingerprint: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES ('fingerprint', ?1)",
            params![fingerprint],
        )?;
        Ok(())
    }

    /// Force the next open to rebuild from the log.
    pub fn mark_stale(&self) -> Result<()> {
        self.set_fingerprint("stale")
    }
}

/// Timestamps are stored with fixed nanosecond precision so that TEXT
/// comparison orders them chronologically.
pub fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn prefixed_message_columns(alias: &str) -> String {
    MESSAGE_COLUMNS
        .split(',')
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn write_message(conn: &Connection, m: &Message) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO messages (id, seq, ts, home, author, body, kind, reply_to, \
         edited_at, edit_count, edit_history, archived_at, archive_marker, reactions, mentions, tombstone)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            m.id,
            m.seq,
            fmt_ts(&m.ts),
            m.home,
            m.author,
            m.body,
            m.kind.to_string(),
            m.reply_to,
            m.edited_at.as_ref().map(fmt_ts),
            m.edit_count,
            serde_json::to_string(&m.edit_history)?,
            m.archived_at.as_ref().map(fmt_ts),
            m.archive_marker,
            serde_json::to_string(&m.reactions)?,
            serde_json::to_string(&m.mentions)?,
            m.tombstone.as_ref().map(serde_json::to_string).transpose()?,
        ],
    )?;
    conn.execute("DELETE FROM reactions WHERE message_id = ?1", params![m.id])?;
    for (label, entries) in &m.reactions {
        for entry in entries {
            conn.execute(
                "INSERT OR IGNORE INTO reactions (message_id, label, agent) VALUES (?1, ?2, ?3)",
                params![m.id, label, entry.agent],
            )?;
        }
    }
    conn.execute("DELETE FROM mentions WHERE message_id = ?1", params![m.id])?;
    for agent in &m.mentions {
        conn.execute(
            "INSERT OR IGNORE INTO mentions (message_id, agent) VALUES (?1, ?2)",
            params![m.id, agent],
        )?;
    }
    Ok(())
}

fn write_thread(conn: &Connection, t: &Thread) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO threads (id, name, parent_id, status, anchor_id, created_by, \
         created_at, last_activity_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            t.id,
            t.name,
            t.parent,
            t.status.to_string(),
            t.anchor,
            t.created_by,
            fmt_ts(&t.created_at),
            fmt_ts(&t.last_activity_at),
        ],
    )?;
    Ok(())
}

fn write_pin(conn: &Connection, pin: &Pin) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO pins (message_id, pinned_by, pinned_at) VALUES (?1, ?2, ?3)",
        params![pin.message_id, pin.by, fmt_ts(&pin.at)],
    )?;
    Ok(())
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn ts_opt_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| conversion_error(idx, e)),
        None => Ok(None),
    }
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn json_opt_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| conversion_error(idx, e)),
        None => Ok(None),
    }
}

fn enum_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| conversion_error(idx, std::io::Error::other(e)))
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        seq: row.get(1)?,
        ts: ts_col(row, 2)?,
        home: row.get(3)?,
        author: row.get(4)?,
        body: row.get(5)?,
        kind: enum_col(row, 6)?,
        reply_to: row.get(7)?,
        edited_at: ts_opt_col(row, 8)?,
        edit_count: row.get(9)?,
        edit_history: json_col(row, 10)?,
        archived_at: ts_opt_col(row, 11)?,
        archive_marker: row.get(12)?,
        reactions: json_col(row, 13)?,
        mentions: json_col(row, 14)?,
        tombstone: json_opt_col(row, 15)?,
    })
}

fn thread_from_row(row: &Row<'_>) -> rusqlite::Result<Thread> {
    Ok(Thread {
        id: row.get(0)?,
        name: row.get(1)?,
        parent: row.get(2)?,
        status: enum_col(row, 3)?,
        anchor: row.get(4)?,
        created_by: row.get(5)?,
        created_at: ts_col(row, 6)?,
        last_activity_at: ts_col(row, 7)?,
    })
}

fn pin_from_row(row: &Row<'_>) -> rusqlite::Result<Pin> {
    Ok(Pin {
        message_id: row.get(0)?,
        by: row.get(1)?,
        at: ts_col(row, 2)?,
    })
}
