//! Shared data model (spec §3): nodes, ghosts, centrality, embeddings,
//! and the configuration document (spec §6).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A parsed note, or a ghost placeholder for a linked-to id with no
/// backing file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    /// Lowercased, forward-slash-separated path relative to the source
    /// root, extension preserved. `normalize(id) == id` always holds.
    pub id: String,
    pub title: String,
    /// `None` for ghost nodes.
    pub content: Option<String>,
    /// Unique, order-preserving; only string-typed frontmatter tag entries.
    pub tags: Vec<String>,
    /// Ordered, deduplicated, already-normalized link targets.
    pub outgoing_links: Vec<String>,
    /// Frontmatter keys other than `title`/`tags`, preserved verbatim.
    pub properties: BTreeMap<String, serde_json::Value>,
    pub source_ref: Option<SourceRef>,
    /// Ghosts are tagged explicitly rather than inferred from naming.
    #[serde(default)]
    pub is_ghost: bool,
}

impl Node {
    /// A ghost placeholder for `id`: no content, no tags, no properties, no
    /// outgoing links.
    pub fn ghost(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            title: default_title_from_id(&id),
            id,
            content: None,
            tags: Vec::new(),
            outgoing_links: Vec::new(),
            properties: BTreeMap::new(),
            source_ref: None,
            is_ghost: true,
        }
    }
}

/// Derive a title from an id's filename basename: extension stripped,
/// `-`/`_` separators replaced with spaces (spec §3 "Node").
pub fn default_title_from_id(id: &str) -> String {
    let filename = id.rsplit('/').next().unwrap_or(id);
    let stem = filename.rsplit_once('.').map(|(s, _)| s).unwrap_or(filename);
    stem.chars().map(|c| if c == '-' || c == '_' { ' ' } else { c }).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub kind: String,
    pub path: String,
    /// Unix millis. Must be finite (not NaN).
    pub last_modified: f64,
}

/// A compact `{id, title}` projection used by list/search/resolve responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSummary {
    pub id: String,
    pub title: String,
}

impl From<&Node> for NodeSummary {
    fn from(n: &Node) -> Self {
        Self { id: n.id.clone(), title: n.title.clone() }
    }
}

/// Per-node in/out degree, recomputed wholesale at the end of every sync.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Centrality {
    pub in_degree: u32,
    pub out_degree: u32,
    /// Unix millis of the `build` that produced this value.
    pub computed_at: f64,
}

/// A stored embedding: model id plus a fixed-dimension finite-real vector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingRecord {
    pub model_id: String,
    pub vector: Vec<f32>,
}

/// Direction of neighbour traversal (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
    Both,
}

/// Centrality metric to rank hubs by (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HubMetric {
    InDegree,
    OutDegree,
}

/// Node-resolution strategy (spec §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveStrategy {
    Exact,
    Fuzzy,
    Semantic,
}

/// Filter applied by `list_nodes` and by the candidate set for `resolve_nodes`
/// (spec §4.5/§4.9): optional tag (case-insensitive) and path prefix
/// (case-insensitive).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NodeFilter {
    pub tag: Option<String>,
    pub path: Option<String>,
}

impl NodeFilter {
    pub fn matches(&self, node: &Node) -> bool {
        if let Some(tag) = &self.tag {
            let tag_lower = tag.to_lowercase();
            if !node.tags.iter().any(|t| t.to_lowercase() == tag_lower) {
                return false;
            }
        }
        if let Some(path) = &self.path {
            let path_lower = path.to_lowercase();
            if !node.id.to_lowercase().starts_with(&path_lower) {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Configuration document (spec §6)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CacheConfig {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvidersConfig {
    pub embedding: EmbeddingProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self { embedding: EmbeddingProviderConfig { kind: "none".to_string(), model: None } }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingProviderConfig {
    pub kind: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatcherConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_excluded_dirs")]
    pub excluded_dirs: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self { debounce_ms: default_debounce_ms(), excluded_dirs: default_excluded_dirs() }
    }
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_excluded_dirs() -> Vec<String> {
    [".git", "node_modules", ".cache", ".roux"].iter().map(|s| s.to_string()).collect()
}

fn default_extensions() -> Vec<String> {
    vec![".md".to_string(), ".markdown".to_string()]
}

impl Config {
    /// Fill in derived defaults (cache path) the way the teacher's
    /// `ScanConfig::new` seeds skip-dir defaults from the root path.
    pub fn resolved_cache_path(&self) -> String {
        match &self.cache.path {
            Some(p) => p.clone(),
            None => format!("{}/.roux", self.source.path.trim_end_matches('/')),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ghost_node_has_empty_shape() {
        let g = Node::ghost("missing.md");
        assert!(g.is_ghost);
        assert_eq!(g.content, None);
        assert!(g.tags.is_empty());
        assert!(g.outgoing_links.is_empty());
    }

    #[test]
    fn default_title_strips_extension_and_separators() {
        assert_eq!(default_title_from_id("notes/my-cool_note.md"), "my cool note");
    }

    #[test]
    fn node_filter_tag_is_case_insensitive() {
        let node = Node {
            id: "a.md".into(),
            title: "A".into(),
            content: Some(String::new()),
            tags: vec!["Recipe".into()],
            outgoing_links: vec![],
            properties: BTreeMap::new(),
            source_ref: None,
            is_ghost: false,
        };
        let filter = NodeFilter { tag: Some("RECIPE".into()), path: None };
        assert!(filter.matches(&node));
    }

    #[test]
    fn resolved_cache_path_defaults_under_source() {
        let cfg = Config {
            source: SourceConfig { path: "/vault".into() },
            cache: CacheConfig::default(),
            providers: ProvidersConfig::default(),
            watcher: WatcherConfig::default(),
            extensions: default_extensions(),
        };
        assert_eq!(cfg.resolved_cache_path(), "/vault/.roux");
    }
}
