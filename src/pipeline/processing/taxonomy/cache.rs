use std::fs;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{MapperError, Result};
use crate::pipeline::processing::taxonomy::TaxonNode;

const CACHE_FILE: &str = "taxonomy_cache.db";

/// Parsed taxonomy stored in SQLite, keyed by a fingerprint of the dump files.
/// Only one tree is kept; storing a new one replaces the old.
pub struct TaxonomyCache {
    conn: Connection,
}

impl TaxonomyCache {
    pub fn open_in(cache_dir: &Path) -> Result<Self> {
        fs::create_dir_all(cache_dir).map_err(|e| MapperError::io(cache_dir, e))?;
        let conn = Connection::open(cache_dir.join(CACHE_FILE))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS taxonomy_cache (
                fingerprint  TEXT PRIMARY KEY,
                node_count   INTEGER NOT NULL,
                payload      TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    /// SHA-256 over the contents of every file, each prefixed by its length
    pub fn fingerprint(paths: &[&Path]) -> Result<String> {
        let mut hasher = Sha256::new();
        for path in paths {
            let bytes = fs::read(path).map_err(|e| MapperError::io(*path, e))?;
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(&bytes);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    /// Stored nodes for `fingerprint`. A payload that no longer deserializes
    /// counts as a miss.
    pub fn get(&self, fingerprint: &str) -> Result<Option<Vec<TaxonNode>>> {
        let payload: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM taxonomy_cache WHERE fingerprint = ?1",
                params![fingerprint],
                |row| row.get(0),
            )
            .optional()?;

        let Some(payload) = payload else {
            return Ok(None);
        };
        match serde_json::from_str(&payload) {
            Ok(nodes) => Ok(Some(nodes)),
            Err(e) => {
                warn!("Discarding unreadable taxonomy cache entry {}: {}", fingerprint, e);
                Ok(None)
            }
        }
    }

    pub fn put(&self, fingerprint: &str, nodes: &[TaxonNode]) -> Result<()> {
        let payload = serde_json::to_string(nodes).map_err(|e| MapperError::json(CACHE_FILE, e))?;
        self.conn.execute("DELETE FROM taxonomy_cache", [])?;
        self.conn.execute(
            "INSERT INTO taxonomy_cache (fingerprint, node_count, payload) VALUES (?1, ?2, ?3)",
            params![fingerprint, nodes.len() as i64, payload],
        )?;
        debug!("Stored {} taxonomy nodes under {}", nodes.len(), fingerprint);
        Ok(())
    }
}
