//! Persistent vector store with streaming bounded-heap top-k search
//! (spec §4.6).
//!
//! `VectorIndex` can own its SQLite connection (`open`) or borrow one the
//! caller already holds (`from_shared`) — `close()` only tears down a
//! connection this instance owns, so a borrowed handle survives a
//! `close()` call and a second `close()` is always a no-op.

use roux_core::error::RouxError;
use roux_core::heap::BoundedHeap;
use rusqlite::{params, Connection, OptionalExtension};
use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

enum Handle {
    Owned(Connection),
    Borrowed(Arc<Mutex<Connection>>),
}

pub struct VectorIndex {
    handle: Option<Handle>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub distance: f32,
}

impl VectorIndex {
    pub fn open(path: &str) -> Result<Self, RouxError> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RouxError::provider_error(format!("failed to create vector index directory: {e}")))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| RouxError::provider_error(format!("failed to open vector index: {e}")))?;
        let index = Self { handle: Some(Handle::Owned(conn)) };
        index.init_schema()?;
        Ok(index)
    }

    /// Wrap a connection this instance does not own; `close()` will not
    /// close it.
    pub fn from_shared(conn: Arc<Mutex<Connection>>) -> Result<Self, RouxError> {
        let index = Self { handle: Some(Handle::Borrowed(conn)) };
        index.init_schema()?;
        Ok(index)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T, RouxError> {
        match self.handle.as_ref() {
            Some(Handle::Owned(conn)) => f(conn).map_err(|e| RouxError::internal(format!("vector index error: {e}"))),
            Some(Handle::Borrowed(conn)) => {
                let guard = conn.lock().map_err(|_| RouxError::internal("vector index mutex poisoned"))?;
                f(&guard).map_err(|e| RouxError::internal(format!("vector index error: {e}")))
            }
            None => Err(RouxError::internal("vector index used after close")),
        }
    }

    fn init_schema(&self) -> Result<(), RouxError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS vectors (
                    id TEXT PRIMARY KEY,
                    model TEXT NOT NULL,
                    vector BLOB NOT NULL
                );",
            )
        })
    }

    /// Reject empty vectors. Enforce dimension consistency against any
    /// other row already present. Upsert atomically: both `model` and
    /// `vector` are replaced together, never partially.
    pub fn store(&self, id: &str, vector: &[f32], model: &str) -> Result<(), RouxError> {
        if vector.is_empty() {
            return Err(RouxError::invalid_input("vector must not be empty"));
        }

        let existing_dim: Option<usize> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT vector FROM vectors WHERE id != ?1 LIMIT 1",
                params![id],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
        })?
        .map(|blob| blob.len() / 4);

        if let Some(dim) = existing_dim {
            if dim != vector.len() {
                return Err(RouxError::dimension_mismatch(dim, vector.len()));
            }
        }

        let blob = encode_vector(vector);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO vectors (id, model, vector) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET model = excluded.model, vector = excluded.vector",
                params![id, model, blob],
            )
        })?;
        Ok(())
    }

    /// Ordered nearest-first results. `limit <= 0` yields `[]`. Streams the
    /// table rather than materialising all vectors, keeping only a bounded
    /// heap of the `limit` best candidates seen so far.
    pub fn search(&self, query_vector: &[f32], limit: i64) -> Result<Vec<SearchHit>, RouxError> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let limit = limit as usize;

        let rows: Vec<(String, Vec<u8>)> = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, vector FROM vectors")?;
            let mapped = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)))?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()
        })?;

        let mut heap: BoundedHeap<(String, f32)> = BoundedHeap::new(limit, |a: &(String, f32), b: &(String, f32)| {
            match a.1.partial_cmp(&b.1) {
                Some(Ordering::Equal) | None => b.0.cmp(&a.0),
                Some(ord) => ord.reverse(),
            }
        });

        for (id, blob) in rows {
            let Ok(vector) = decode_vector(&blob) else { continue };
            if vector.len() != query_vector.len() {
                continue;
            }
            let Ok(distance) = roux_core::math::cosine_distance(query_vector, &vector) else { continue };
            heap.push((id, distance));
        }

        let mut results: Vec<SearchHit> =
            heap.into_sorted_by_pop().into_iter().map(|(id, distance)| SearchHit { id, distance }).collect();
        results.reverse();
        Ok(results)
    }

    pub fn delete(&self, id: &str) -> Result<bool, RouxError> {
        let affected = self.with_conn(|conn| conn.execute("DELETE FROM vectors WHERE id = ?1", params![id]))?;
        Ok(affected > 0)
    }

    pub fn get_model(&self, id: &str) -> Result<Option<String>, RouxError> {
        self.with_conn(|conn| conn.query_row("SELECT model FROM vectors WHERE id = ?1", params![id], |row| row.get(0)).optional())
    }

    pub fn has_embedding(&self, id: &str) -> Result<bool, RouxError> {
        Ok(self.get_model(id)?.is_some())
    }

    pub fn count(&self) -> Result<usize, RouxError> {
        let n: i64 = self.with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM vectors", [], |row| row.get(0)))?;
        Ok(n as usize)
    }

    /// Idempotent. Closes the connection only if this instance owns it.
    pub fn close(&mut self) {
        self.handle = None;
    }
}

fn encode_vector(v: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(v.len() * 4);
    for x in v {
        buf.extend_from_slice(&x.to_le_bytes());
    }
    buf
}

fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>, RouxError> {
    if bytes.len() % 4 != 0 {
        return Err(RouxError::internal("corrupt vector blob: length not a multiple of 4"));
    }
    Ok(bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_index() -> (VectorIndex, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.sqlite3");
        (VectorIndex::open(path.to_str().unwrap()).unwrap(), dir)
    }

    #[test]
    fn empty_vector_rejected() {
        let (index, _dir) = temp_index();
        let err = index.store("a", &[], "m").unwrap_err();
        assert_eq!(err.kind, roux_core::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn dimension_mismatch_rejected_then_recovers_after_delete() {
        let (index, _dir) = temp_index();
        index.store("x", &[1.0, 2.0, 3.0], "m").unwrap();
        let err = index.store("y", &[1.0, 2.0], "m").unwrap_err();
        assert_eq!(err.kind, roux_core::error::ErrorKind::DimensionMismatch);
        index.delete("x").unwrap();
        index.store("y", &[1.0, 2.0], "m").unwrap();
    }

    #[test]
    fn search_nonpositive_limit_is_empty() {
        let (index, _dir) = temp_index();
        index.store("a", &[1.0, 0.0], "m").unwrap();
        assert!(index.search(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn search_top_k_ascending_by_distance() {
        let (index, _dir) = temp_index();
        index.store("v1", &[1.0, 0.0, 0.0], "m").unwrap();
        index.store("v2", &[0.9, 0.1, 0.0], "m").unwrap();
        index.store("v3", &[0.0, 1.0, 0.0], "m").unwrap();
        index.store("v4", &[0.0, 0.9, 0.1], "m").unwrap();
        index.store("v5", &[0.0, 0.0, 1.0], "m").unwrap();

        let hits = index.search(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "v1");
        assert!(hits[0].distance.abs() < 1e-6);
        assert_eq!(hits[1].id, "v2");
        assert!(hits[1].distance < hits.get(2).map(|h| h.distance).unwrap_or(f32::MAX));
    }

    #[test]
    fn upsert_replaces_model_and_vector_atomically() {
        let (index, _dir) = temp_index();
        index.store("a", &[1.0, 0.0], "model-1").unwrap();
        index.store("a", &[0.0, 1.0], "model-2").unwrap();
        assert_eq!(index.get_model("a").unwrap(), Some("model-2".to_string()));
        let hits = index.search(&[0.0, 1.0], 1).unwrap();
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[test]
    fn close_is_idempotent_and_owned_handle_drops() {
        let (mut index, _dir) = temp_index();
        index.close();
        index.close();
        assert!(index.count().is_err());
    }

    #[test]
    fn borrowed_handle_survives_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.sqlite3");
        let conn = Arc::new(Mutex::new(Connection::open(&path).unwrap()));
        let mut index = VectorIndex::from_shared(conn.clone()).unwrap();
        index.store("a", &[1.0], "m").unwrap();
        index.close();
        // The underlying connection is still usable directly.
        let count: i64 = conn.lock().unwrap().query_row("SELECT COUNT(*) FROM vectors", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }
}
