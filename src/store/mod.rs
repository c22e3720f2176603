//! Durable event store
//!
//! An append-only SQLite log of serialized events. Capacity is enforced on
//! every append: once the table exceeds [`EventStore::MAX_DB_SIZE`] bytes the
//! oldest rows are evicted one at a time until the total fits again, so
//! offline backlogs are bounded while the newest events survive.

pub mod schema;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};

use crate::error::Result;

/// A durably persisted event row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    /// Row id assigned by the store; monotonically increasing, never reused
    pub id: i64,
    /// Serialized event payload, immutable once stored
    pub event_json: String,
    /// Byte length of `event_json`, cached at insert time
    pub event_size: i64,
}

/// SQLite-backed event store with a single pooled connection
pub struct EventStore {
    conn: Mutex<Connection>,
}

impl EventStore {
    /// Storage ceiling: 50 MiB of event JSON
    pub const MAX_DB_SIZE: i64 = 50 * 1024 * 1024;

    /// Rows fetched per eviction page
    const EVICTION_PAGE: usize = 5;

    /// Open or create a store at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL mode keeps appends and deletes from blocking each other
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        schema::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append a serialized event, returning its assigned row id
    ///
    /// Runs capacity enforcement synchronously before returning, so a
    /// successful append always leaves the store at or under the ceiling.
    pub fn append(&self, event_json: &str, event_size: i64) -> Result<i64> {
        let id = {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO events (event_json, event_size) VALUES (?1, ?2)",
                params![event_json, event_size],
            )?;
            conn.last_insert_rowid()
        };
        self.enforce_capacity()?;
        Ok(id)
    }

    /// Return up to `limit` rows in insertion order (ascending id)
    pub fn oldest(&self, limit: usize) -> Result<Vec<StoredEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, event_json, event_size FROM events ORDER BY id ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(StoredEvent {
                id: row.get(0)?,
                event_json: row.get(1)?,
                event_size: row.get(2)?,
            })
        })?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Delete all rows with id <= cutoff; idempotent
    pub fn delete_up_to(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM events WHERE id <= ?1", [id])?;
        Ok(())
    }

    /// Delete a single row by id; absent ids are a no-op
    pub fn delete_one(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM events WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Delete every row
    pub fn delete_all(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM events", [])?;
        Ok(())
    }

    /// Total bytes of stored event JSON
    pub fn total_size(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let total: Option<i64> =
            conn.query_row("SELECT SUM(event_size) FROM events", [], |row| row.get(0))?;
        Ok(total.unwrap_or(0))
    }

    /// Number of stored rows
    pub fn count(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Greedy oldest-first eviction: delete one row at a time, re-checking
    /// the total after each, stopping as soon as the size fits
    fn enforce_capacity(&self) -> Result<()> {
        while self.total_size()? > Self::MAX_DB_SIZE {
            let page = self.oldest(Self::EVICTION_PAGE)?;
            if page.is_empty() {
                break;
            }
            for event in page {
                self.delete_one(event.id)?;
                tracing::warn!(event_id = event.id, "Evicted oldest event, store over capacity");
                if self.total_size()? <= Self::MAX_DB_SIZE {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(events: &[(&str, i64)]) -> EventStore {
        let store = EventStore::open_in_memory().unwrap();
        for (json, size) in events {
            store.append(json, *size).unwrap();
        }
        store
    }

    #[test]
    fn test_append_assigns_increasing_ids() {
        let store = EventStore::open_in_memory().unwrap();
        let first = store.append("{\"a\":1}", 7).unwrap();
        let second = store.append("{\"a\":2}", 7).unwrap();
        assert!(second > first);
        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(store.total_size().unwrap(), 14);
    }

    #[test]
    fn test_oldest_returns_insertion_order() {
        let store = store_with(&[("one", 3), ("two", 3), ("three", 5)]);
        let events = store.oldest(2).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_json, "one");
        assert_eq!(events[1].event_json, "two");
        assert!(events[0].id < events[1].id);
    }

    #[test]
    fn test_oldest_on_empty_store_is_empty_not_error() {
        let store = EventStore::open_in_memory().unwrap();
        assert!(store.oldest(100).unwrap().is_empty());
        assert_eq!(store.total_size().unwrap(), 0);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_delete_up_to_is_inclusive_and_idempotent() {
        let store = store_with(&[("a", 1), ("b", 1), ("c", 1)]);
        let ids: Vec<i64> = store.oldest(3).unwrap().iter().map(|e| e.id).collect();

        store.delete_up_to(ids[1]).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.oldest(1).unwrap()[0].id, ids[2]);

        // Deleting an already-deleted range is a no-op
        store.delete_up_to(ids[1]).unwrap();
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_delete_one_and_delete_all() {
        let store = store_with(&[("a", 1), ("b", 1)]);
        let ids: Vec<i64> = store.oldest(2).unwrap().iter().map(|e| e.id).collect();

        store.delete_one(ids[0]).unwrap();
        assert_eq!(store.count().unwrap(), 1);

        store.delete_all().unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.total_size().unwrap(), 0);
    }

    #[test]
    fn test_eviction_keeps_newest_rows_under_ceiling() {
        let store = EventStore::open_in_memory().unwrap();
        // Each row claims 10 MiB, so the sixth append must evict the oldest
        let size = 10 * 1024 * 1024;
        for i in 0..6 {
            store.append(&format!("event-{}", i), size).unwrap();
            assert!(store.total_size().unwrap() <= EventStore::MAX_DB_SIZE);
        }
        let survivors = store.oldest(10).unwrap();
        assert_eq!(survivors.len(), 5);
        // The oldest row was evicted, the newest survive
        assert_eq!(survivors[0].event_json, "event-1");
        assert_eq!(survivors[4].event_json, "event-5");
    }

    #[test]
    fn test_eviction_never_removes_more_than_necessary() {
        let store = EventStore::open_in_memory().unwrap();
        let size = EventStore::MAX_DB_SIZE / 2;
        store.append("old", size).unwrap();
        store.append("mid", size).unwrap();
        // Third append pushes the total over: exactly one eviction suffices
        store.append("new", size).unwrap();
        let survivors = store.oldest(10).unwrap();
        assert_eq!(survivors.len(), 2);
        assert_eq!(survivors[0].event_json, "mid");
        assert_eq!(survivors[1].event_json, "new");
    }
}
