//! SQLite storage for chunk locations
//!
//! Rows are keyed by the same integer id the vector index assigned to the
//! chunk's embedding. Nothing enforces that correspondence here; the indexer
//! keeps the two in lock-step. Chunk text is not stored, it is re-read from
//! the source file on demand.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::{LgrepError, Result};

/// Location of one chunk inside one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Id shared with the vector index
    pub id: u64,
    /// Path relative to the repository root
    pub file: String,
    /// First line (1-indexed)
    pub ls: usize,
    /// Last line, inclusive
    pub le: usize,
    /// Start of the byte range, inclusive
    pub byte_start: u64,
    /// End of the byte range, exclusive
    pub byte_end: u64,
}

/// Durable id -> chunk mapping, plus per-file content hashes.
///
/// The connection sits behind a mutex so one store can serve several
/// concurrent queries.
pub struct MetadataStore {
    conn: Mutex<Connection>,
}

impl MetadataStore {
    /// Open or create the store at `path` and make sure the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| LgrepError::Store(format!("failed to open {}: {e}", path.display())))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| LgrepError::Store("connection lock poisoned".to_string()))
    }

    /// Create tables if they don't exist. Safe to call on every open.
    pub fn ensure_schema(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS chunks (
                    id INTEGER PRIMARY KEY,
                    file TEXT NOT NULL,
                    ls INTEGER NOT NULL,
                    le INTEGER NOT NULL,
                    byte_start INTEGER NOT NULL,
                    byte_end INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS chunks_file ON chunks(file);

                CREATE TABLE IF NOT EXISTS files (
                    path TEXT PRIMARY KEY,
                    hash TEXT NOT NULL
                );
                ",
            )
            .map_err(|e| LgrepError::Store(format!("failed to create schema: {e}")))?;
        Ok(())
    }

    /// Insert a chunk, overwriting every field if the id already exists.
    pub fn upsert(&self, chunk: &Chunk) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO chunks (id, file, ls, le, byte_start, byte_end)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 file = excluded.file,
                 ls = excluded.ls,
                 le = excluded.le,
                 byte_start = excluded.byte_start,
                 byte_end = excluded.byte_end",
            params![
                to_sql_int(chunk.id)?,
                chunk.file,
                chunk.ls as i64,
                chunk.le as i64,
                to_sql_int(chunk.byte_start)?,
                to_sql_int(chunk.byte_end)?,
            ],
        )?;
        Ok(())
    }

    /// Look up a chunk. A missing id is [`LgrepError::NotFound`].
    pub fn get(&self, id: u64) -> Result<Chunk> {
        self.conn()?
            .query_row(
                "SELECT file, ls, le, byte_start, byte_end FROM chunks WHERE id = ?1",
                params![to_sql_int(id)?],
                |row| {
                    Ok(Chunk {
                        id,
                        file: row.get(0)?,
                        ls: row.get::<_, i64>(1)? as usize,
                        le: row.get::<_, i64>(2)? as usize,
                        byte_start: row.get::<_, i64>(3)? as u64,
                        byte_end: row.get::<_, i64>(4)? as u64,
                    })
                },
            )
            .optional()?
            .ok_or(LgrepError::NotFound(id))
    }

    /// Number of chunk rows.
    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Highest chunk id, if any row exists.
    pub fn max_id(&self) -> Result<Option<u64>> {
        let max: Option<i64> = self
            .conn()?
            .query_row("SELECT MAX(id) FROM chunks", [], |row| row.get(0))?;
        Ok(max.map(|id| id as u64))
    }

    /// Number of rows whose id is at least `id`.
    pub fn count_from(&self, id: u64) -> Result<usize> {
        let n: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM chunks WHERE id >= ?1",
            params![to_sql_int(id)?],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Content hash recorded for a file at its last successful indexing.
    pub fn file_hash(&self, path: &str) -> Result<Option<String>> {
        Ok(self
            .conn()?
            .query_row(
                "SELECT hash FROM files WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Record the content hash of a fully indexed file.
    pub fn record_file(&self, path: &str, hash: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO files (path, hash) VALUES (?1, ?2)",
            params![path, hash],
        )?;
        Ok(())
    }

    /// Every path with a recorded hash or at least one chunk row, sorted.
    pub fn known_files(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT path FROM files UNION SELECT file FROM chunks ORDER BY 1")?;
        let paths = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(paths)
    }

    /// Drop a file's chunk rows and hash. Returns the number of chunks removed.
    ///
    /// The vectors for those ids stay in the index and become orphans.
    pub fn forget_file(&self, path: &str) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM chunks WHERE file = ?1", params![path])?;
        tx.execute("DELETE FROM files WHERE path = ?1", params![path])?;
        tx.commit()?;
        Ok(removed)
    }

    /// Number of files with a recorded hash.
    pub fn file_count(&self) -> Result<usize> {
        let n: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Remove every chunk and file row.
    pub fn clear(&self) -> Result<()> {
        self.conn()?
            .execute_batch("DELETE FROM chunks; DELETE FROM files;")?;
        Ok(())
    }
}

fn to_sql_int(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| LgrepError::Store(format!("{value} exceeds SQLite INTEGER")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chunk(id: u64, file: &str) -> Chunk {
        Chunk {
            id,
            file: file.to_string(),
            ls: 1,
            le: 4,
            byte_start: 0,
            byte_end: 42,
        }
    }

    #[test]
    fn upsert_then_get() {
        let store = MetadataStore::in_memory().unwrap();
        let chunk = sample_chunk(3, "src/main.rs");
        store.upsert(&chunk).unwrap();

        assert_eq!(store.get(3).unwrap(), chunk);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn upsert_overwrites_every_field() {
        let store = MetadataStore::in_memory().unwrap();
        store.upsert(&sample_chunk(0, "a.txt")).unwrap();

        let replacement = Chunk {
            id: 0,
            file: "b.txt".to_string(),
            ls: 10,
            le: 20,
            byte_start: 100,
            byte_end: 250,
        };
        store.upsert(&replacement).unwrap();

        assert_eq!(store.get(0).unwrap(), replacement);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn missing_id_is_not_found() {
        let store = MetadataStore::in_memory().unwrap();
        assert!(matches!(store.get(99), Err(LgrepError::NotFound(99))));
    }

    #[test]
    fn ensure_schema_is_idempotent() {
        let store = MetadataStore::in_memory().unwrap();
        store.upsert(&sample_chunk(1, "a.txt")).unwrap();
        store.ensure_schema().unwrap();
        store.ensure_schema().unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn reopen_keeps_rows() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nested").join("chunks.sqlite");
        {
            let store = MetadataStore::open(&path).unwrap();
            store.upsert(&sample_chunk(5, "notes.md")).unwrap();
        }
        let store = MetadataStore::open(&path).unwrap();
        assert_eq!(store.get(5).unwrap().file, "notes.md");
    }

    #[test]
    fn max_id_and_count_from() {
        let store = MetadataStore::in_memory().unwrap();
        assert_eq!(store.max_id().unwrap(), None);

        for id in [0, 1, 2, 7] {
            store.upsert(&sample_chunk(id, "a.txt")).unwrap();
        }
        assert_eq!(store.max_id().unwrap(), Some(7));
        assert_eq!(store.count_from(2).unwrap(), 2);
        assert_eq!(store.count_from(8).unwrap(), 0);
    }

    #[test]
    fn forget_file_removes_only_that_file() {
        let store = MetadataStore::in_memory().unwrap();
        store.upsert(&sample_chunk(0, "a.txt")).unwrap();
        store.upsert(&sample_chunk(1, "a.txt")).unwrap();
        store.upsert(&sample_chunk(2, "b.txt")).unwrap();
        store.record_file("a.txt", "h1").unwrap();
        store.record_file("b.txt", "h2").unwrap();

        assert_eq!(store.forget_file("a.txt").unwrap(), 2);
        assert!(matches!(store.get(0), Err(LgrepError::NotFound(0))));
        assert_eq!(store.get(2).unwrap().file, "b.txt");
        assert_eq!(store.file_hash("a.txt").unwrap(), None);
        assert_eq!(store.file_hash("b.txt").unwrap().as_deref(), Some("h2"));
    }

    #[test]
    fn clear_empties_both_tables() {
        let store = MetadataStore::in_memory().unwrap();
        store.upsert(&sample_chunk(0, "a.txt")).unwrap();
        store.record_file("a.txt", "h").unwrap();

        store.clear().unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.file_count().unwrap(), 0);
    }

    #[test]
    fn known_files_covers_hashes_and_rows() {
        let store = MetadataStore::in_memory().unwrap();
        store.upsert(&sample_chunk(0, "b.txt")).unwrap();
        store.record_file("b.txt", "h").unwrap();
        store.record_file("empty.txt", "h").unwrap();
        // A row whose hash was never recorded, as after a crash.
        store.upsert(&sample_chunk(1, "a.txt")).unwrap();

        assert_eq!(store.known_files().unwrap(), vec!["a.txt", "b.txt", "empty.txt"]);
    }

    #[test]
    fn store_can_be_shared_across_threads() {
        let store = MetadataStore::in_memory().unwrap();
        for id in 0..4 {
            store.upsert(&sample_chunk(id, "a.txt")).unwrap();
        }

        std::thread::scope(|scope| {
            for id in 0..4 {
                let store = &store;
                scope.spawn(move || assert_eq!(store.get(id).unwrap().id, id));
            }
        });
    }
}
