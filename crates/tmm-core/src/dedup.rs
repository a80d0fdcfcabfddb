//! Dedup store: the persistent set of message ids that were already mirrored.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use crate::{
    domain::{MessageId, ProcessedMessage},
    errors::Error,
    Result,
};

/// Idempotency record keyed by message id.
///
/// Records are created once and never mutated; `mark` on a known id keeps the
/// original record.
pub trait DedupStore: Send {
    fn has(&self, id: MessageId) -> Result<bool>;
    fn mark(&mut self, id: MessageId) -> Result<()>;
    fn processed(&self, id: MessageId) -> Result<Option<ProcessedMessage>>;
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// SQLite-backed store (one table, one row per processed message).
pub struct SqliteDedupStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteDedupStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS processed_messages (
                message_id INTEGER PRIMARY KEY,
                processed_at TEXT NOT NULL
            )",
            [],
        )?;
        // Forces a read so a damaged file fails here rather than mid-run.
        conn.query_row("SELECT COUNT(*) FROM processed_messages", [], |row| {
            row.get::<_, i64>(0)
        })?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DedupStore for SqliteDedupStore {
    fn has(&self, id: MessageId) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM processed_messages WHERE message_id = ?1",
                params![id.0],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn mark(&mut self, id: MessageId) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO processed_messages (message_id, processed_at) VALUES (?1, ?2)",
            params![id.0, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn processed(&self, id: MessageId) -> Result<Option<ProcessedMessage>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT processed_at FROM processed_messages WHERE message_id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .optional()?;

        let Some(ts) = raw else {
            return Ok(None);
        };
        let processed_at = DateTime::parse_from_rfc3339(&ts)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| {
                Error::External(format!(
                    "dedup record for message {id} has invalid processed_at {ts:?}: {e}"
                ))
            })?;
        Ok(Some(ProcessedMessage {
            message_id: id,
            processed_at,
        }))
    }

    fn len(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM processed_messages", [], |row| row.get(0))?;
        Ok(n.max(0) as usize)
    }
}

/// In-memory store for tests and as the last-resort fallback.
#[derive(Debug, Default)]
pub struct MemoryDedupStore {
    records: BTreeMap<MessageId, DateTime<Utc>>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids(ids: impl IntoIterator<Item = MessageId>) -> Self {
        let now = Utc::now();
        Self {
            records: ids.into_iter().map(|id| (id, now)).collect(),
        }
    }

    pub fn ids(&self) -> Vec<MessageId> {
        self.records.keys().copied().collect()
    }
}

impl DedupStore for MemoryDedupStore {
    fn has(&self, id: MessageId) -> Result<bool> {
        Ok(self.records.contains_key(&id))
    }

    fn mark(&mut self, id: MessageId) -> Result<()> {
        self.records.entry(id).or_insert_with(Utc::now);
        Ok(())
    }

    fn processed(&self, id: MessageId) -> Result<Option<ProcessedMessage>> {
        Ok(self.records.get(&id).map(|at| ProcessedMessage {
            message_id: id,
            processed_at: *at,
        }))
    }

    fn len(&self) -> Result<usize> {
        Ok(self.records.len())
    }
}

/// Open the SQLite store, never failing the run.
///
/// A file that cannot be opened is moved aside to `<file>.corrupt` and a fresh
/// store is created in its place; if that fails too, an in-memory store is used.
/// Either way everything is reprocessed, which is safe because uploads overwrite
/// by key.
pub fn open_or_recover(path: &Path) -> Box<dyn DedupStore> {
    match SqliteDedupStore::open(path) {
        Ok(store) => {
            info!(path = %path.display(), "opened dedup store");
            return Box::new(store);
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "dedup store unreadable, starting empty");
        }
    }

    if path.exists() {
        let aside = corrupt_path(path);
        if let Err(e) = std::fs::rename(path, &aside) {
            warn!(path = %path.display(), error = %e, "could not move damaged dedup store aside");
        }
    }

    match SqliteDedupStore::open(path) {
        Ok(store) => Box::new(store),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "falling back to in-memory dedup store");
            Box::new(MemoryDedupStore::new())
        }
    }
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".corrupt");
    PathBuf::from(name)
}
