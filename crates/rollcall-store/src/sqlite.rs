//! SQLite-backed descriptor store.
//!
//! Embeddings are stored as little-endian f32 blobs so they round-trip
//! bit-for-bit. Timestamps are RFC 3339 text with nanosecond precision.

use crate::{check_identity, check_unique, DescriptorStore, StoreError};
use chrono::{DateTime, SecondsFormat, Utc};
use rollcall_core::{Embedding, EnrolledDescriptor, EMBEDDING_DIM};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS face_descriptors (
    identity_id TEXT PRIMARY KEY NOT NULL,
    display_name TEXT NOT NULL,
    embedding BLOB NOT NULL,
    enrolled_at TEXT NOT NULL,
    last_updated_at TEXT NOT NULL
);
";

const SELECT_COLUMNS: &str =
    "SELECT identity_id, display_name, embedding, enrolled_at, last_updated_at FROM face_descriptors";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create the store at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        tracing::info!(path = %path.display(), "opened descriptor store");
        Ok(Self { conn })
    }

    /// In-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }
}

impl DescriptorStore for SqliteStore {
    fn put(
        &mut self,
        identity_id: &str,
        display_name: &str,
        embedding: &Embedding,
    ) -> Result<EnrolledDescriptor, StoreError> {
        check_identity(identity_id)?;

        let now = Utc::now();
        let now_text = format_timestamp(&now);
        let blob = encode_embedding(embedding);

        let enrolled_text: String = self.conn.query_row(
            "INSERT INTO face_descriptors (
                identity_id, display_name, embedding, enrolled_at, last_updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(identity_id) DO UPDATE SET
                display_name = excluded.display_name,
                embedding = excluded.embedding,
                last_updated_at = excluded.last_updated_at
             RETURNING enrolled_at",
            params![identity_id, display_name, blob, now_text],
            |row| row.get(0),
        )?;

        tracing::debug!(identity_id, display_name, "descriptor saved");

        Ok(EnrolledDescriptor {
            identity_id: identity_id.to_string(),
            display_name: display_name.to_string(),
            embedding: embedding.clone(),
            enrolled_at: parse_timestamp(identity_id, &enrolled_text)?,
            last_updated_at: now,
        })
    }

    fn get(&self, identity_id: &str) -> Result<Option<EnrolledDescriptor>, StoreError> {
        let raw = self
            .conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE identity_id = ?1"),
                params![identity_id],
                RawRow::from_row,
            )
            .optional()?;
        raw.map(RawRow::decode).transpose()
    }

    fn remove(&mut self, identity_id: &str) -> Result<bool, StoreError> {
        let deleted = self.conn.execute(
            "DELETE FROM face_descriptors WHERE identity_id = ?1",
            params![identity_id],
        )?;
        tracing::debug!(identity_id, deleted, "descriptor removed");
        Ok(deleted > 0)
    }

    fn all(&self) -> Result<Vec<EnrolledDescriptor>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} ORDER BY rowid"))?;
        let rows = stmt
            .query_map([], RawRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawRow::decode).collect()
    }

    fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM face_descriptors", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    fn clear(&mut self) -> Result<usize, StoreError> {
        let deleted = self.conn.execute("DELETE FROM face_descriptors", [])?;
        tracing::info!(deleted, "descriptor store cleared");
        Ok(deleted)
    }

    fn replace_all(&mut self, descriptors: Vec<EnrolledDescriptor>) -> Result<(), StoreError> {
        check_unique(&descriptors)?;

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM face_descriptors", [])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO face_descriptors (
                    identity_id, display_name, embedding, enrolled_at, last_updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for d in &descriptors {
                insert.execute(params![
                    d.identity_id,
                    d.display_name,
                    encode_embedding(&d.embedding),
                    format_timestamp(&d.enrolled_at),
                    format_timestamp(&d.last_updated_at),
                ])?;
            }
        }
        tx.commit()?;

        tracing::info!(count = descriptors.len(), "descriptor store replaced");
        Ok(())
    }
}

/// Column values before blob and timestamp decoding.
struct RawRow {
    identity_id: String,
    display_name: String,
    embedding: Vec<u8>,
    enrolled_at: String,
    last_updated_at: String,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            identity_id: row.get(0)?,
            display_name: row.get(1)?,
            embedding: row.get(2)?,
            enrolled_at: row.get(3)?,
            last_updated_at: row.get(4)?,
        })
    }

    fn decode(self) -> Result<EnrolledDescriptor, StoreError> {
        let embedding = decode_embedding(&self.identity_id, &self.embedding)?;
        let enrolled_at = parse_timestamp(&self.identity_id, &self.enrolled_at)?;
        let last_updated_at = parse_timestamp(&self.identity_id, &self.last_updated_at)?;
        Ok(EnrolledDescriptor {
            identity_id: self.identity_id,
            display_name: self.display_name,
            embedding,
            enrolled_at,
            last_updated_at,
        })
    }
}

fn encode_embedding(embedding: &Embedding) -> Vec<u8> {
    let values = embedding.values();
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(values));
    for &value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_embedding(identity_id: &str, blob: &[u8]) -> Result<Embedding, StoreError> {
    let expected = EMBEDDING_DIM * std::mem::size_of::<f32>();
    if blob.len() != expected {
        return Err(StoreError::CorruptEmbedding {
            identity_id: identity_id.to_string(),
            reason: format!("expected {expected} bytes, got {}", blob.len()),
        });
    }

    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    Embedding::new(values).map_err(|e| StoreError::CorruptEmbedding {
        identity_id: identity_id.to_string(),
        reason: e.to_string(),
    })
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(identity_id: &str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidTimestamp {
            identity_id: identity_id.to_string(),
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding(seed: f32) -> Embedding {
        Embedding::new((0..EMBEDDING_DIM).map(|i| seed + i as f32 * 1e-3).collect()).unwrap()
    }

    #[test]
    fn test_blob_roundtrip_is_bit_exact() {
        let values: Vec<f32> = (0..EMBEDDING_DIM)
            .map(|i| (i as f32 * 0.731).cos() * 0.0123)
            .collect();
        let original = Embedding::new(values).unwrap();
        let blob = encode_embedding(&original);
        assert_eq!(blob.len(), EMBEDDING_DIM * 4);

        let decoded = decode_embedding("x", &blob).unwrap();
        for (a, b) in original.values().iter().zip(decoded.values()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_decode_rejects_truncated_blob() {
        let blob = vec![0u8; 100];
        assert!(matches!(
            decode_embedding("s1", &blob),
            Err(StoreError::CorruptEmbedding { .. })
        ));
    }

    #[test]
    fn test_put_then_get() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let saved = store.put("S1", "Ada Lovelace", &embedding(0.1)).unwrap();
        assert_eq!(saved.enrolled_at, saved.last_updated_at);

        let loaded = store.get("S1").unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert!(store.get("S2").unwrap().is_none());
    }

    #[test]
    fn test_put_replaces_and_keeps_enrolled_at() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let first = store.put("S1", "Ada", &embedding(0.1)).unwrap();
        assert_eq!(store.count().unwrap(), 1);

        let second = store.put("S1", "Ada L.", &embedding(0.2)).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(second.enrolled_at, first.enrolled_at);
        assert!(second.last_updated_at >= first.last_updated_at);

        let loaded = store.get("S1").unwrap().unwrap();
        assert_eq!(loaded.embedding, embedding(0.2));
        assert_eq!(loaded.display_name, "Ada L.");
    }

    #[test]
    fn test_put_rejects_blank_identity() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(
            store.put("  ", "Nobody", &embedding(0.0)),
            Err(StoreError::EmptyIdentity)
        ));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_remove_and_clear() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.put("S1", "One", &embedding(0.1)).unwrap();
        store.put("S2", "Two", &embedding(0.2)).unwrap();
        store.put("S3", "Three", &embedding(0.3)).unwrap();

        assert!(store.remove("S2").unwrap());
        assert!(!store.remove("S2").unwrap());
        assert!(!store.has("S2").unwrap());
        assert_eq!(store.count().unwrap(), 2);

        assert_eq!(store.clear().unwrap(), 2);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_all_keeps_upserted_rows_in_place() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.put("A", "A", &embedding(0.1)).unwrap();
        store.put("B", "B", &embedding(0.2)).unwrap();
        store.put("A", "A", &embedding(0.3)).unwrap();

        let ids: Vec<_> = store.all().unwrap().into_iter().map(|d| d.identity_id).collect();
        assert_eq!(ids, vec!["A", "B"]);
    }

    #[test]
    fn test_replace_all_rolls_back_on_duplicate() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let kept = store.put("keep", "Keep", &embedding(0.5)).unwrap();

        let mut dup = kept.clone();
        dup.identity_id = "X".into();
        let result = store.replace_all(vec![dup.clone(), dup]);
        assert!(matches!(result, Err(StoreError::DuplicateIdentity(id)) if id == "X"));

        assert_eq!(store.all().unwrap(), vec![kept]);
    }
}
