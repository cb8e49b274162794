//! Local mappings index: SQLite-backed search-term -> key index, plus a
//! full-text companion table and a user's cart/favorites bookkeeping.
//!
//! Direct `rusqlite` SQL, no ORM, a single connection behind a `Mutex`, WAL
//! mode for concurrent reads. A row is `(search_term, key, content)`; one key
//! may appear under many search terms, uniqueness is on the full triple. This
//! index never cascades a delete into the content store.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::identity::ContentKey;
use crate::record::Mapping;

pub struct MappingsIndex {
    conn: Mutex<Connection>,
}

impl MappingsIndex {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(MappingsIndex {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(MappingsIndex {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(())).ok();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS mappings (
                search_term TEXT NOT NULL,
                key TEXT NOT NULL,
                content TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(search_term, key, content)
            )",
            [],
        )?;
        conn.execute(
            "CREATE VIRTUAL TABLE IF NOT EXISTS mappings_fts USING fts5(
                search_term, content, content='mappings', content_rowid='rowid'
            )",
            [],
        )?;
        conn.execute(
            "CREATE TRIGGER IF NOT EXISTS mappings_ai AFTER INSERT ON mappings BEGIN
                INSERT INTO mappings_fts(rowid, search_term, content)
                VALUES (new.rowid, new.search_term, new.content);
            END",
            [],
        )?;
        conn.execute(
            "CREATE TRIGGER IF NOT EXISTS mappings_ad AFTER DELETE ON mappings BEGIN
                INSERT INTO mappings_fts(mappings_fts, rowid, search_term, content)
                VALUES ('delete', old.rowid, old.search_term, old.content);
            END",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS cart_items (
                key TEXT PRIMARY KEY,
                quantity INTEGER NOT NULL DEFAULT 1,
                added_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS favorites (
                key TEXT PRIMARY KEY,
                added_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Inserts or, for an identical `(search_term, key, content)` triple,
    /// refreshes `updated_at`.
    pub fn put_mapping(&self, mapping: &Mapping) -> Result<()> {
        let conn = self.conn.lock().expect("mappings index lock poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO mappings (search_term, key, content, updated_at) VALUES (?, ?, ?, ?)",
            params![mapping.search_term, mapping.key.to_hex(), mapping.content, mapping.updated_at.timestamp()],
        )?;
        Ok(())
    }

    /// Record keys mapped under `search_term`, most recently updated first.
    pub fn search(&self, search_term: &str) -> Result<Vec<ContentKey>> {
        let conn = self.conn.lock().expect("mappings index lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT DISTINCT key FROM mappings WHERE search_term = ? ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map(params![search_term], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for row in rows {
            let key_hex = row?;
            if let Some(key) = ContentKey::from_hex(&key_hex) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    /// Full-text search over both `search_term` and `content`, returning
    /// matching record keys.
    pub fn search_fts(&self, query: &str) -> Result<Vec<ContentKey>> {
        let conn = self.conn.lock().expect("mappings index lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT m.key FROM mappings_fts f
             JOIN mappings m ON m.rowid = f.rowid
             WHERE mappings_fts MATCH ?",
        )?;
        let rows = stmt.query_map(params![query], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for row in rows {
            let key_hex = row?;
            if let Some(key) = ContentKey::from_hex(&key_hex) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    /// Removes every mapping row for `key`, across every search term. Never
    /// cascades into the content store: the underlying record, if any, is
    /// untouched.
    pub fn remove_mapping(&self, key: &ContentKey) -> Result<()> {
        let conn = self.conn.lock().expect("mappings index lock poisoned");
        conn.execute("DELETE FROM mappings WHERE key = ?", params![key.to_hex()])?;
        Ok(())
    }

    pub fn add_to_cart(&self, key: &ContentKey, quantity: i64) -> Result<()> {
        let conn = self.conn.lock().expect("mappings index lock poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO cart_items (key, quantity, added_at) VALUES (?, ?, ?)",
            params![key.to_hex(), quantity, chrono::Utc::now().timestamp()],
        )?;
        Ok(())
    }

    pub fn add_to_favorites(&self, key: &ContentKey) -> Result<()> {
        let conn = self.conn.lock().expect("mappings index lock poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO favorites (key, added_at) VALUES (?, ?)",
            params![key.to_hex(), chrono::Utc::now().timestamp()],
        )?;
        Ok(())
    }

    /// Total mapping rows across every search term (not distinct keys).
    pub fn mapping_count(&self) -> Result<usize> {
        let conn = self.conn.lock().expect("mappings index lock poisoned");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM mappings", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Drops every row from every table; used by the bridge's `clear` method.
    pub fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().expect("mappings index lock poisoned");
        conn.execute("DELETE FROM mappings", [])?;
        conn.execute("DELETE FROM cart_items", [])?;
        conn.execute("DELETE FROM favorites", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mapping() -> Mapping {
        let key = ContentKey::from_content(b"listing-1");
        Mapping::new("wownero".to_string(), key, "listing".to_string())
    }

    #[test]
    fn test_put_and_search_by_term() {
        let idx = MappingsIndex::open_in_memory().unwrap();
        let mapping = sample_mapping();
        idx.put_mapping(&mapping).unwrap();
        let keys = idx.search("wownero").unwrap();
        assert_eq!(keys, vec![mapping.key]);
    }

    #[test]
    fn test_search_for_unknown_term_is_empty() {
        let idx = MappingsIndex::open_in_memory().unwrap();
        assert!(idx.search("nonexistent").unwrap().is_empty());
    }

    #[test]
    fn test_one_key_under_many_search_terms() {
        let idx = MappingsIndex::open_in_memory().unwrap();
        let key = ContentKey::from_content(b"listing-2");
        idx.put_mapping(&Mapping::new("wownero".to_string(), key, "listing".to_string())).unwrap();
        idx.put_mapping(&Mapping::new("monero".to_string(), key, "listing".to_string())).unwrap();
        assert_eq!(idx.search("wownero").unwrap(), vec![key]);
        assert_eq!(idx.search("monero").unwrap(), vec![key]);
        assert_eq!(idx.mapping_count().unwrap(), 2);
    }

    #[test]
    fn test_remove_mapping_purges_row_and_does_not_error_when_absent() {
        let idx = MappingsIndex::open_in_memory().unwrap();
        let mapping = sample_mapping();
        idx.put_mapping(&mapping).unwrap();
        idx.remove_mapping(&mapping.key).unwrap();
        assert!(idx.search("wownero").unwrap().is_empty());

        let absent = ContentKey::from_content(b"absent");
        idx.remove_mapping(&absent).unwrap();
    }

    #[test]
    fn test_full_text_search_matches_content() {
        let idx = MappingsIndex::open_in_memory().unwrap();
        idx.put_mapping(&sample_mapping()).unwrap();
        let keys = idx.search_fts("listing").unwrap();
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn test_cart_and_favorites() {
        let idx = MappingsIndex::open_in_memory().unwrap();
        let mapping = sample_mapping();
        idx.put_mapping(&mapping).unwrap();
        idx.add_to_cart(&mapping.key, 2).unwrap();
        idx.add_to_favorites(&mapping.key).unwrap();
        assert_eq!(idx.mapping_count().unwrap(), 1);
    }

    #[test]
    fn test_clear_empties_all_tables() {
        let idx = MappingsIndex::open_in_memory().unwrap();
        let mapping = sample_mapping();
        idx.put_mapping(&mapping).unwrap();
        idx.add_to_cart(&mapping.key, 1).unwrap();
        idx.clear().unwrap();
        assert_eq!(idx.mapping_count().unwrap(), 0);
    }
}
