//! Persistent SQLite-backed node and centrality store (spec §4.5).
//!
//! Schema ownership is single-authored here; every other module reaches
//! the database only through this type. Foreign-key enforcement is turned
//! on at connection time so `centrality` rows cascade-delete with their
//! owning `nodes` row.

use roux_core::error::RouxError;
use roux_core::types::{Centrality, Node, NodeFilter, NodeSummary, SourceRef};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};

pub struct Cache {
    conn: Option<Connection>,
}

impl Cache {
    pub fn open(path: &str) -> Result<Self, RouxError> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RouxError::provider_error(format!("failed to create cache directory: {e}")))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| RouxError::provider_error(format!("failed to open cache: {e}")))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| RouxError::internal(format!("failed to enable foreign keys: {e}")))?;
        let cache = Self { conn: Some(conn) };
        cache.init_schema()?;
        Ok(cache)
    }

    fn conn(&self) -> Result<&Connection, RouxError> {
        self.conn.as_ref().ok_or_else(|| RouxError::internal("cache used after close"))
    }

    fn init_schema(&self) -> Result<(), RouxError> {
        self.conn()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS nodes (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    content TEXT,
                    tags TEXT NOT NULL,
                    outgoing_links TEXT NOT NULL,
                    properties TEXT NOT NULL,
                    is_ghost INTEGER NOT NULL,
                    source_kind TEXT,
                    source_path TEXT,
                    mtime REAL NOT NULL
                );
                CREATE TABLE IF NOT EXISTS centrality (
                    node_id TEXT PRIMARY KEY REFERENCES nodes(id) ON DELETE CASCADE,
                    in_degree INTEGER NOT NULL,
                    out_degree INTEGER NOT NULL,
                    pagerank_placeholder REAL NOT NULL DEFAULT 0,
                    computed_at REAL NOT NULL
                );",
            )
            .map_err(|e| RouxError::internal(format!("failed to initialise schema: {e}")))
    }

    pub fn upsert_node(&self, node: &Node) -> Result<(), RouxError> {
        let conn = self.conn()?;
        let (kind, path, mtime) = match &node.source_ref {
            Some(r) => (Some(r.kind.clone()), Some(r.path.clone()), r.last_modified),
            None => (None, None, 0.0),
        };
        conn.execute(
            "INSERT INTO nodes (id, title, content, tags, outgoing_links, properties, is_ghost, source_kind, source_path, mtime)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
               title = excluded.title,
               content = excluded.content,
               tags = excluded.tags,
               outgoing_links = excluded.outgoing_links,
               properties = excluded.properties,
               is_ghost = excluded.is_ghost,
               source_kind = excluded.source_kind,
               source_path = excluded.source_path,
               mtime = excluded.mtime",
            params![
                node.id,
                node.title,
                node.content,
                serde_json::to_string(&node.tags).unwrap_or_default(),
                serde_json::to_string(&node.outgoing_links).unwrap_or_default(),
                serde_json::to_string(&node.properties).unwrap_or_default(),
                node.is_ghost as i64,
                kind,
                path,
                mtime,
            ],
        )
        .map_err(|e| RouxError::internal(format!("upsert_node failed: {e}")))?;
        Ok(())
    }

    /// Wholesale replace: clears both tables and inserts `nodes`, inside a
    /// single transaction so no concurrent read observes a half-written
    /// state (spec §4.9 sync step 3).
    pub fn replace_all(&mut self, nodes: &[Node]) -> Result<(), RouxError> {
        let conn = self.conn.as_mut().ok_or_else(|| RouxError::internal("cache used after close"))?;
        let tx = conn.transaction().map_err(|e| RouxError::internal(format!("transaction failed: {e}")))?;
        tx.execute("DELETE FROM nodes", [])
            .map_err(|e| RouxError::internal(format!("replace_all clear failed: {e}")))?;
        for node in nodes {
            let (kind, path, mtime) = match &node.source_ref {
                Some(r) => (Some(r.kind.clone()), Some(r.path.clone()), r.last_modified),
                None => (None, None, 0.0),
            };
            tx.execute(
                "INSERT INTO nodes (id, title, content, tags, outgoing_links, properties, is_ghost, source_kind, source_path, mtime)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    node.id,
                    node.title,
                    node.content,
                    serde_json::to_string(&node.tags).unwrap_or_default(),
                    serde_json::to_string(&node.outgoing_links).unwrap_or_default(),
                    serde_json::to_string(&node.properties).unwrap_or_default(),
                    node.is_ghost as i64,
                    kind,
                    path,
                    mtime,
                ],
            )
            .map_err(|e| RouxError::internal(format!("replace_all insert failed: {e}")))?;
        }
        tx.commit().map_err(|e| RouxError::internal(format!("transaction commit failed: {e}")))
    }

    pub fn delete_node(&self, id: &str) -> Result<bool, RouxError> {
        let affected = self
            .conn()?
            .execute("DELETE FROM nodes WHERE id = ?1", params![id])
            .map_err(|e| RouxError::internal(format!("delete_node failed: {e}")))?;
        Ok(affected > 0)
    }

    pub fn get_node(&self, id: &str) -> Result<Option<Node>, RouxError> {
        let conn = self.conn()?;
        conn.query_row("SELECT * FROM nodes WHERE id = ?1", params![id], row_to_node)
            .optional()
            .map_err(|e| RouxError::internal(format!("get_node failed: {e}")))
    }

    pub fn get_nodes(&self, ids: &[String]) -> Result<Vec<Node>, RouxError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(node) = self.get_node(id)? {
                out.push(node);
            }
        }
        Ok(out)
    }

    pub fn get_all_nodes(&self) -> Result<Vec<Node>, RouxError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT * FROM nodes")
            .map_err(|e| RouxError::internal(format!("get_all_nodes prepare failed: {e}")))?;
        let rows = stmt
            .query_map([], row_to_node)
            .map_err(|e| RouxError::internal(format!("get_all_nodes query failed: {e}")))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| RouxError::internal(format!("get_all_nodes row failed: {e}")))?);
        }
        Ok(out)
    }

    /// All queried ids present as keys, each mapped to whether a node row
    /// currently exists for it (case-insensitive, since ids are already
    /// normalized to lowercase).
    pub fn nodes_exist(&self, ids: &[String]) -> Result<HashMap<String, bool>, RouxError> {
        let mut out = HashMap::with_capacity(ids.len());
        for id in ids {
            let normalized = roux_core::link::normalize_link(id);
            let exists = self.get_node(&normalized)?.is_some();
            out.insert(id.clone(), exists);
        }
        Ok(out)
    }

    pub fn resolve_titles(&self, ids: &[String]) -> Result<HashMap<String, String>, RouxError> {
        let mut out = HashMap::new();
        for id in ids {
            if let Some(node) = self.get_node(id)? {
                out.insert(id.clone(), node.title);
            }
        }
        Ok(out)
    }

    /// Default limit 100, clamped to `[1, 1000]`; offset clamped to `>= 0`.
    pub fn list_nodes(&self, filter: &NodeFilter, offset: i64, limit: i64) -> Result<(Vec<NodeSummary>, usize), RouxError> {
        let limit = limit.clamp(1, 1000) as usize;
        let offset = offset.max(0) as usize;

        let all = self.get_all_nodes()?;
        let matched: Vec<&Node> = all.iter().filter(|n| filter.matches(n)).collect();
        let total = matched.len();
        let page = matched.into_iter().skip(offset).take(limit).map(NodeSummary::from).collect();
        Ok((page, total))
    }

    pub fn store_centrality(&self, values: &HashMap<String, Centrality>) -> Result<(), RouxError> {
        let conn = self.conn()?;
        for (id, c) in values {
            conn.execute(
                "INSERT INTO centrality (node_id, in_degree, out_degree, pagerank_placeholder, computed_at)
                 VALUES (?1, ?2, ?3, 0, ?4)
                 ON CONFLICT(node_id) DO UPDATE SET
                   in_degree = excluded.in_degree,
                   out_degree = excluded.out_degree,
                   computed_at = excluded.computed_at",
                params![id, c.in_degree, c.out_degree, c.computed_at],
            )
            .map_err(|e| RouxError::internal(format!("store_centrality failed: {e}")))?;
        }
        Ok(())
    }

    pub fn get_centrality(&self, id: &str) -> Result<Option<Centrality>, RouxError> {
        self.conn()?
            .query_row(
                "SELECT in_degree, out_degree, computed_at FROM centrality WHERE node_id = ?1",
                params![id],
                |row| {
                    Ok(Centrality {
                        in_degree: row.get(0)?,
                        out_degree: row.get(1)?,
                        computed_at: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(|e| RouxError::internal(format!("get_centrality failed: {e}")))
    }

    /// Idempotent: a second call is a no-op.
    pub fn close(&mut self) {
        self.conn = None;
    }
}

fn row_to_node(row: &rusqlite::Row) -> rusqlite::Result<Node> {
    let tags_json: String = row.get("tags")?;
    let links_json: String = row.get("outgoing_links")?;
    let props_json: String = row.get("properties")?;
    let is_ghost: i64 = row.get("is_ghost")?;
    let source_kind: Option<String> = row.get("source_kind")?;
    let source_path: Option<String> = row.get("source_path")?;
    let mtime: f64 = row.get("mtime")?;

    let source_ref = match (source_kind, source_path) {
        (Some(kind), Some(path)) => Some(SourceRef { kind, path, last_modified: mtime }),
        _ => None,
    };

    Ok(Node {
        id: row.get("id")?,
        title: row.get("title")?,
        content: row.get("content")?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        outgoing_links: serde_json::from_str(&links_json).unwrap_or_default(),
        properties: serde_json::from_str::<BTreeMap<String, serde_json::Value>>(&props_json).unwrap_or_default(),
        source_ref,
        is_ghost: is_ghost != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            title: "Title".to_string(),
            content: Some("body".to_string()),
            tags: vec!["recipe".to_string()],
            outgoing_links: vec![],
            properties: BTreeMap::new(),
            source_ref: None,
            is_ghost: false,
        }
    }

    fn temp_cache() -> (Cache, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.sqlite3");
        let cache = Cache::open(path.to_str().unwrap()).unwrap();
        (cache, dir)
    }

    #[test]
    fn upsert_then_get_roundtrips() {
        let (cache, _dir) = temp_cache();
        cache.upsert_node(&sample_node("a.md")).unwrap();
        let fetched = cache.get_node("a.md").unwrap().unwrap();
        assert_eq!(fetched.title, "Title");
        assert_eq!(fetched.tags, vec!["recipe".to_string()]);
    }

    #[test]
    fn delete_missing_returns_false() {
        let (cache, _dir) = temp_cache();
        assert!(!cache.delete_node("missing.md").unwrap());
    }

    #[test]
    fn nodes_exist_is_case_insensitive() {
        let (cache, _dir) = temp_cache();
        cache.upsert_node(&sample_node("a/b.md")).unwrap();
        let result = cache.nodes_exist(&["A/B.md".to_string()]).unwrap();
        assert_eq!(result.get("A/B.md"), Some(&true));
    }

    #[test]
    fn list_nodes_filters_by_tag_case_insensitively() {
        let (cache, _dir) = temp_cache();
        cache.upsert_node(&sample_node("a.md")).unwrap();
        let filter = NodeFilter { tag: Some("RECIPE".to_string()), path: None };
        let (page, total) = cache.list_nodes(&filter, 0, 100).unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].id, "a.md");
    }

    #[test]
    fn list_nodes_total_is_filtered_count_not_page_size() {
        let (cache, _dir) = temp_cache();
        for i in 0..5 {
            cache.upsert_node(&sample_node(&format!("n{i}.md"))).unwrap();
        }
        let (page, total) = cache.list_nodes(&NodeFilter::default(), 0, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(total, 5);
    }

    #[test]
    fn replace_all_clears_prior_contents() {
        let (mut cache, _dir) = temp_cache();
        cache.upsert_node(&sample_node("old.md")).unwrap();
        cache.replace_all(&[sample_node("new.md")]).unwrap();
        assert!(cache.get_node("old.md").unwrap().is_none());
        assert!(cache.get_node("new.md").unwrap().is_some());
    }

    #[test]
    fn centrality_cascade_deletes_with_node() {
        let (cache, _dir) = temp_cache();
        cache.upsert_node(&sample_node("a.md")).unwrap();
        let mut values = HashMap::new();
        values.insert("a.md".to_string(), Centrality { in_degree: 1, out_degree: 2, computed_at: 0.0 });
        cache.store_centrality(&values).unwrap();
        assert!(cache.get_centrality("a.md").unwrap().is_some());
        cache.delete_node("a.md").unwrap();
        assert!(cache.get_centrality("a.md").unwrap().is_none());
    }

    #[test]
    fn close_is_idempotent() {
        let (mut cache, _dir) = temp_cache();
        cache.close();
        cache.close();
    }
}
