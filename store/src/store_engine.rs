//! The store engine (spec §4.9): composes the reader, cache, link
//! resolver, graph, vector index, embedding provider, and watcher into a
//! single coordinator.
//!
//! Writes to the cache and vector index are serialised through `Mutex`
//! guards (single-writer per spec §5); the graph is held behind a
//! `RwLock` since it is replaced wholesale rather than mutated in place.

use crate::cache::Cache;
use crate::config::default_for_source;
use crate::embedding::{build_provider, EmbeddingProvider};
use crate::graph::Graph;
use crate::reader::{self, FileContext};
use crate::vector_index::VectorIndex;
use crate::watch::{ChangeKind, WatchConfig, Watcher};
use roux_core::error::{ErrorKind, RouxError};
use roux_core::link::{build_basename_index, resolve_links};
use roux_core::types::{Centrality, Config, Direction, HubMetric, Node, NodeFilter, ResolveStrategy};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

pub struct UpdateFields {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub properties: Option<std::collections::BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone)]
pub struct ResolveResult {
    pub query: String,
    pub matched_id: Option<String>,
    pub score: f64,
}

pub struct Store {
    config: Config,
    root: PathBuf,
    cache: Mutex<Cache>,
    vector_index: Mutex<VectorIndex>,
    graph: RwLock<Graph>,
    embedding: Box<dyn EmbeddingProvider>,
    watcher: Mutex<Option<Watcher>>,
}

impl Store {
    pub fn open(config: Config) -> Result<Self, RouxError> {
        let root = PathBuf::from(&config.source.path);
        let cache_dir = config.resolved_cache_path();
        let cache = Cache::open(&format!("{cache_dir}/cache.sqlite3"))?;
        let vector_index = VectorIndex::open(&format!("{cache_dir}/vectors.sqlite3"))?;
        let embedding = build_provider(&config.providers.embedding.kind, config.providers.embedding.model.as_deref())?;

        let store = Self {
            config,
            root,
            cache: Mutex::new(cache),
            vector_index: Mutex::new(vector_index),
            graph: RwLock::new(Graph::build(&Vec::<Node>::new()).expect("empty graph build never fails")),
            embedding,
            watcher: Mutex::new(None),
        };
        store.sync()?;
        Ok(store)
    }

    pub fn open_default(source_path: &str) -> Result<Self, RouxError> {
        Self::open(default_for_source(source_path))
    }

    // -----------------------------------------------------------------
    // Sync
    // -----------------------------------------------------------------

    /// Rebuild authoritatively from disk (spec §4.9 "Sync").
    pub fn sync(&self) -> Result<(), RouxError> {
        let files = self.scan_files();
        let cache = self.cache.lock().map_err(poisoned)?;

        let mut surviving = Vec::with_capacity(files.len());
        for (absolute, relative) in &files {
            let id = roux_core::link::normalize_link(relative);
            let fs_mtime = file_mtime_millis(absolute);

            let cached = cache.get_node(&id).ok().flatten();
            if let Some(existing) = &cached {
                if !existing.is_ghost {
                    if let Some(source_ref) = &existing.source_ref {
                        if source_ref.last_modified >= fs_mtime {
                            surviving.push(existing.clone());
                            continue;
                        }
                    }
                }
            }

            match std::fs::read(absolute) {
                Ok(bytes) => {
                    let ctx = FileContext {
                        absolute_path: &absolute.to_string_lossy(),
                        relative_path: relative,
                        extension: absolute.extension().and_then(|e| e.to_str()).unwrap_or(""),
                        mtime: fs_mtime,
                    };
                    surviving.push(reader::parse_markdown(&bytes, &ctx));
                }
                Err(e) => {
                    warn!(path = %absolute.display(), error = %e, "skipping unreadable file during sync");
                }
            }
        }

        drop(cache);
        self.finalize(surviving)
    }

    /// Shared tail of `sync()` and `apply_batch()`: resolve links across
    /// the given real-node set, reconcile ghosts, rebuild the graph,
    /// recompute and persist centrality.
    fn finalize(&self, real_nodes: Vec<Node>) -> Result<(), RouxError> {
        let mut cache = self.cache.lock().map_err(poisoned)?;
        cache.replace_all(&real_nodes)?;

        let valid_ids: HashSet<String> = real_nodes.iter().map(|n| n.id.clone()).collect();
        let basename_index = build_basename_index(valid_ids.iter().map(|s| s.as_str()));

        let mut referenced_ghosts: HashSet<String> = HashSet::new();
        let mut resolved_nodes = real_nodes;
        for node in &mut resolved_nodes {
            let resolved = resolve_links(&node.outgoing_links, &basename_index, &valid_ids);
            let mut seen = HashSet::new();
            node.outgoing_links = resolved.into_iter().filter(|id| seen.insert(id.clone())).collect();
            for target in &node.outgoing_links {
                if !valid_ids.contains(target) {
                    referenced_ghosts.insert(target.clone());
                }
            }
            cache.upsert_node(node)?;
        }

        // `replace_all` above already wiped every row (real and ghost) from
        // the cache, so the only ghosts that can exist past this point are
        // the ones re-created below — an unreferenced ghost has nowhere
        // left to survive and needs no separate deletion pass.
        for ghost_id in &referenced_ghosts {
            if cache.get_node(ghost_id)?.is_none() {
                cache.upsert_node(&Node::ghost(ghost_id.clone()))?;
            }
        }

        let all_nodes = cache.get_all_nodes()?;
        let graph = Graph::build(&all_nodes)?;

        let now = now_millis();
        let mut centrality_map = HashMap::new();
        for node in &all_nodes {
            centrality_map.insert(
                node.id.clone(),
                Centrality { in_degree: graph.in_degree(&node.id), out_degree: graph.out_degree(&node.id), computed_at: now },
            );
        }
        cache.store_centrality(&centrality_map)?;

        drop(cache);
        *self.graph.write().map_err(poisoned)? = graph;
        info!(nodes = all_nodes.len(), "sync complete");
        Ok(())
    }

    fn scan_files(&self) -> Vec<(PathBuf, String)> {
        let excluded: HashSet<String> = self.config.watcher.excluded_dirs.iter().map(|s| s.to_lowercase()).collect();
        let extensions: Vec<String> = self.config.extensions.iter().map(|s| s.to_lowercase()).collect();

        let mut out = Vec::new();
        let walker = ignore::WalkBuilder::new(&self.root).hidden(false).git_ignore(false).git_exclude(false).build();
        for entry in walker.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Ok(relative) = path.strip_prefix(&self.root) else { continue };
            let relative_str = relative.to_string_lossy().replace('\\', "/");
            if relative_str.split('/').any(|seg| excluded.contains(&seg.to_lowercase())) {
                continue;
            }
            let lower = relative_str.to_lowercase();
            if !extensions.iter().any(|ext| lower.ends_with(ext.as_str())) {
                continue;
            }
            out.push((path.to_path_buf(), relative_str));
        }
        out
    }

    // -----------------------------------------------------------------
    // Watcher lifecycle
    // -----------------------------------------------------------------

    pub fn start_watching(self: &std::sync::Arc<Self>) -> Result<(), RouxError> {
        let store = std::sync::Arc::clone(self);
        let watch_config = WatchConfig {
            root: self.root.clone(),
            debounce_ms: self.config.watcher.debounce_ms,
            excluded_dirs: self.config.watcher.excluded_dirs.clone(),
            extensions: self.config.extensions.clone(),
        };
        let watcher = Watcher::start(watch_config, move |batch| {
            if let Err(e) = store.apply_batch(batch) {
                warn!(error = %e, "failed to apply watcher batch");
            }
        })
        .map_err(|e| RouxError::provider_error(format!("failed to start watcher: {e}")))?;

        *self.watcher.lock().map_err(poisoned)? = Some(watcher);
        Ok(())
    }

    pub fn flush_watcher(&self) {
        if let Some(watcher) = self.watcher.lock().unwrap().as_ref() {
            watcher.flush();
        }
    }

    /// Stop the watcher, close the cache, then close the vector index.
    /// Idempotent.
    pub fn close(&self) -> Result<(), RouxError> {
        if let Some(watcher) = self.watcher.lock().map_err(poisoned)?.take() {
            watcher.stop();
        }
        self.cache.lock().map_err(poisoned)?.close();
        self.vector_index.lock().map_err(poisoned)?.close();
        Ok(())
    }

    // -----------------------------------------------------------------
    // Incremental event apply
    // -----------------------------------------------------------------

    pub fn apply_batch(&self, batch: HashMap<String, ChangeKind>) -> Result<(), RouxError> {
        let cache = self.cache.lock().map_err(poisoned)?;

        for (id, kind) in &batch {
            match kind {
                ChangeKind::Add | ChangeKind::Change => {
                    let absolute = self.root.join(id);
                    match std::fs::read(&absolute) {
                        Ok(bytes) => {
                            let ctx = FileContext {
                                absolute_path: &absolute.to_string_lossy(),
                                relative_path: id,
                                extension: absolute.extension().and_then(|e| e.to_str()).unwrap_or(""),
                                mtime: file_mtime_millis(&absolute),
                            };
                            let node = reader::parse_markdown(&bytes, &ctx);
                            cache.upsert_node(&node)?;
                        }
                        Err(e) => {
                            warn!(id, error = %e, "watcher apply: read failed, keeping cached record");
                        }
                    }
                }
                ChangeKind::Unlink => {
                    if cache.delete_node(id)? {
                        self.vector_index.lock().map_err(poisoned)?.delete(id)?;
                    }
                }
            }
        }

        let all_real: Vec<Node> = cache.get_all_nodes()?.into_iter().filter(|n| !n.is_ghost).collect();
        drop(cache);
        self.finalize(all_real)
    }

    // -----------------------------------------------------------------
    // CRUD
    // -----------------------------------------------------------------

    pub fn create_node(&self, mut node: Node) -> Result<Node, RouxError> {
        node.id = roux_core::link::normalize_link(&node.id);
        {
            let cache = self.cache.lock().map_err(poisoned)?;
            if let Some(existing) = cache.get_node(&node.id)? {
                if !existing.is_ghost {
                    return Err(RouxError::node_exists(&node.id));
                }
            }
        }

        node.source_ref = Some(roux_core::types::SourceRef {
            kind: "file".to_string(),
            path: self.root.join(&node.id).to_string_lossy().to_string(),
            last_modified: now_millis(),
        });
        node.is_ghost = false;

        self.write_file(&node)?;
        {
            let cache = self.cache.lock().map_err(poisoned)?;
            cache.upsert_node(&node)?;
        }
        self.vector_index.lock().map_err(poisoned)?.delete(&node.id)?;
        self.sync()?;

        self.get_node(&node.id)?.ok_or_else(|| RouxError::internal("node vanished immediately after create"))
    }

    pub fn update_node(&self, id: &str, fields: UpdateFields) -> Result<Node, RouxError> {
        let id = roux_core::link::normalize_link(id);
        let mut node = {
            let cache = self.cache.lock().map_err(poisoned)?;
            cache.get_node(&id)?.ok_or_else(|| RouxError::node_not_found(&id))?
        };

        if let Some(new_title) = &fields.title {
            if *new_title != node.title {
                let in_degree = self.graph.read().map_err(poisoned)?.in_degree(&id);
                if in_degree > 0 {
                    return Err(RouxError::link_integrity(format!(
                        "cannot rename {id}: other nodes link to it"
                    )));
                }
            }
            node.title = new_title.clone();
        }
        if let Some(content) = fields.content {
            node.content = Some(content);
        }
        if let Some(tags) = fields.tags {
            node.tags = tags;
        }
        if let Some(properties) = fields.properties {
            node.properties = properties;
        }
        node.source_ref = node.source_ref.clone().map(|mut r| {
            r.last_modified = now_millis();
            r
        });

        self.write_file(&node)?;
        {
            let cache = self.cache.lock().map_err(poisoned)?;
            cache.upsert_node(&node)?;
        }
        self.vector_index.lock().map_err(poisoned)?.delete(&id)?;
        self.sync()?;

        self.get_node(&id)?.ok_or_else(|| RouxError::internal("node vanished immediately after update"))
    }

    pub fn delete_node(&self, id: &str) -> Result<bool, RouxError> {
        let id = roux_core::link::normalize_link(id);
        let existed = {
            let cache = self.cache.lock().map_err(poisoned)?;
            if cache.get_node(&id)?.is_none() {
                false
            } else {
                let absolute = self.root.join(&id);
                let _ = std::fs::remove_file(&absolute);
                cache.delete_node(&id)?
            }
        };
        if existed {
            self.vector_index.lock().map_err(poisoned)?.delete(&id)?;
            self.sync()?;
        }
        Ok(existed)
    }

    fn write_file(&self, node: &Node) -> Result<(), RouxError> {
        let absolute = self.root.join(&node.id);
        if let Some(parent) = absolute.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RouxError::provider_error(format!("failed to create directory: {e}")))?;
        }
        std::fs::write(&absolute, reader::render_markdown(node))
            .map_err(|e| RouxError::provider_error(format!("failed to write node file: {e}")))
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    pub fn get_node(&self, id: &str) -> Result<Option<Node>, RouxError> {
        let id = roux_core::link::normalize_link(id);
        self.cache.lock().map_err(poisoned)?.get_node(&id)
    }

    pub fn get_nodes(&self, ids: &[String]) -> Result<Vec<Node>, RouxError> {
        self.cache.lock().map_err(poisoned)?.get_nodes(ids)
    }

    pub fn nodes_exist(&self, ids: &[String]) -> Result<HashMap<String, bool>, RouxError> {
        self.cache.lock().map_err(poisoned)?.nodes_exist(ids)
    }

    /// Title-only projection for a batch of ids, used to resolve a node's
    /// outgoing links to display titles without loading full records.
    pub fn resolve_titles(&self, ids: &[String]) -> Result<HashMap<String, String>, RouxError> {
        self.cache.lock().map_err(poisoned)?.resolve_titles(ids)
    }

    pub fn list_nodes(&self, filter: &NodeFilter, offset: i64, limit: i64) -> Result<(Vec<Node>, usize), RouxError> {
        let cache = self.cache.lock().map_err(poisoned)?;
        let (summaries, total) = cache.list_nodes(filter, offset, limit)?;
        let ids: Vec<String> = summaries.into_iter().map(|s| s.id).collect();
        Ok((cache.get_nodes(&ids)?, total))
    }

    /// Neighbour ids via the graph, normalising `limit <= 0` and unknown
    /// direction-free defaults upstream in the tool layer.
    pub fn get_neighbors(&self, id: &str, direction: Direction, limit: i64) -> Result<Vec<Node>, RouxError> {
        let id = roux_core::link::normalize_link(id);
        let neighbor_ids = self.graph.read().map_err(poisoned)?.get_neighbor_ids(&id, direction, limit);
        self.get_nodes(&neighbor_ids)
    }

    pub fn find_path(&self, source: &str, target: &str) -> Result<Option<Vec<String>>, RouxError> {
        let source = roux_core::link::normalize_link(source);
        let target = roux_core::link::normalize_link(target);
        Ok(self.graph.read().map_err(poisoned)?.find_path(&source, &target))
    }

    pub fn get_hubs(&self, metric: HubMetric, limit: i64) -> Result<Vec<(Node, u32)>, RouxError> {
        let ranked = self.graph.read().map_err(poisoned)?.get_hubs(metric, limit);
        let ids: Vec<String> = ranked.iter().map(|(id, _)| id.clone()).collect();
        let nodes = self.get_nodes(&ids)?;
        let by_id: HashMap<&str, &Node> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        Ok(ranked.into_iter().filter_map(|(id, score)| by_id.get(id.as_str()).map(|n| ((*n).clone(), score))).collect())
    }

    pub fn search_by_tags(&self, tags: &[String], match_all: bool, limit: i64) -> Result<Vec<Node>, RouxError> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        let wanted: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();
        let all = self.cache.lock().map_err(poisoned)?.get_all_nodes()?;
        let matches = all.into_iter().filter(|n| {
            let node_tags: HashSet<String> = n.tags.iter().map(|t| t.to_lowercase()).collect();
            if match_all {
                wanted.iter().all(|t| node_tags.contains(t))
            } else {
                wanted.iter().any(|t| node_tags.contains(t))
            }
        });
        Ok(matches.take(limit as usize).collect())
    }

    pub fn random_node(&self, tags: Option<&[String]>) -> Result<Option<Node>, RouxError> {
        use rand::seq::SliceRandom;
        let all = self.cache.lock().map_err(poisoned)?.get_all_nodes()?;
        let candidates: Vec<Node> = match tags {
            Some(wanted) if !wanted.is_empty() => {
                let wanted_lower: Vec<String> = wanted.iter().map(|t| t.to_lowercase()).collect();
                all.into_iter()
                    .filter(|n| {
                        let node_tags: HashSet<String> = n.tags.iter().map(|t| t.to_lowercase()).collect();
                        wanted_lower.iter().any(|t| node_tags.contains(t))
                    })
                    .collect()
            }
            _ => all,
        };
        Ok(candidates.choose(&mut rand::thread_rng()).cloned())
    }

    /// Semantic search over stored embeddings. Fails with `ProviderError`
    /// if no embedding capability is configured.
    pub fn search(&self, query: &str, limit: i64) -> Result<Vec<(Node, f32)>, RouxError> {
        let query_vector = self.embedding.embed(query)?;
        let hits = self.vector_index.lock().map_err(poisoned)?.search(&query_vector, limit)?;
        let ids: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();
        let nodes = self.get_nodes(&ids)?;
        let by_id: HashMap<&str, &Node> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        Ok(hits
            .into_iter()
            .filter_map(|h| by_id.get(h.id.as_str()).map(|n| ((*n).clone(), 1.0 - h.distance)))
            .collect())
    }

    // -----------------------------------------------------------------
    // Resolve
    // -----------------------------------------------------------------

    pub fn resolve_nodes(
        &self,
        names: &[String],
        strategy: ResolveStrategy,
        threshold: f64,
        filter: &NodeFilter,
    ) -> Result<Vec<ResolveResult>, RouxError> {
        let candidates: Vec<Node> = self
            .cache
            .lock()
            .map_err(poisoned)?
            .get_all_nodes()?
            .into_iter()
            .filter(|n| filter.matches(n))
            .collect();

        let mut out = Vec::with_capacity(names.len());
        for name in names {
            out.push(self.resolve_one(name, &candidates, strategy, threshold)?);
        }
        Ok(out)
    }

    fn resolve_one(
        &self,
        name: &str,
        candidates: &[Node],
        strategy: ResolveStrategy,
        threshold: f64,
    ) -> Result<ResolveResult, RouxError> {
        match strategy {
            ResolveStrategy::Exact => {
                let lower = name.to_lowercase();
                let mut best: Option<&str> = None;
                for node in candidates {
                    if node.title.to_lowercase() == lower {
                        best = Some(pick_smaller_id(best, &node.id));
                    }
                }
                Ok(ResolveResult {
                    query: name.to_string(),
                    matched_id: best.map(|s| s.to_string()),
                    score: if best.is_some() { 1.0 } else { 0.0 },
                })
            }
            ResolveStrategy::Fuzzy => {
                let mut best_id: Option<&str> = None;
                let mut best_score = -1.0f64;
                for node in candidates {
                    let score = roux_core::fuzzy::dice_coefficient(&name.to_lowercase(), &node.title.to_lowercase());
                    if score > best_score || (score == best_score && best_id.map(|id| node.id.as_str() < id).unwrap_or(true)) {
                        best_score = score;
                        best_id = Some(&node.id);
                    }
                }
                if best_score >= threshold {
                    Ok(ResolveResult { query: name.to_string(), matched_id: best_id.map(|s| s.to_string()), score: best_score })
                } else {
                    Ok(ResolveResult { query: name.to_string(), matched_id: None, score: 0.0 })
                }
            }
            ResolveStrategy::Semantic => {
                let query_vector = match self.embedding.embed(name) {
                    Ok(v) => v,
                    Err(_) => return Ok(ResolveResult { query: name.to_string(), matched_id: None, score: 0.0 }),
                };
                let mut best_id: Option<&str> = None;
                let mut best_score = -1.0f64;
                for node in candidates {
                    let text = node.content.as_deref().unwrap_or(&node.title);
                    let Ok(node_vector) = self.embedding.embed(text) else { continue };
                    let Ok(sim) = roux_core::math::cosine_similarity(&query_vector, &node_vector) else { continue };
                    let sim = sim as f64;
                    if sim > best_score || (sim == best_score && best_id.map(|id| node.id.as_str() < id).unwrap_or(true)) {
                        best_score = sim;
                        best_id = Some(&node.id);
                    }
                }
                if best_score >= threshold {
                    Ok(ResolveResult { query: name.to_string(), matched_id: best_id.map(|s| s.to_string()), score: best_score })
                } else {
                    Ok(ResolveResult { query: name.to_string(), matched_id: None, score: 0.0 })
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Backfill embeddings
    // -----------------------------------------------------------------

    /// Post-sync pass: embed every node whose cached embedding is missing
    /// or stale against the configured model. Per-node failures are
    /// logged and the pass continues.
    pub fn backfill_embeddings(&self) -> Result<usize, RouxError> {
        let model_id = self.embedding.model_id();
        if model_id == "none" {
            return Ok(0);
        }

        let nodes = self.cache.lock().map_err(poisoned)?.get_all_nodes()?;
        let mut updated = 0usize;
        for node in nodes.iter().filter(|n| !n.is_ghost) {
            let needs_update = {
                let index = self.vector_index.lock().map_err(poisoned)?;
                match index.get_model(&node.id)? {
                    Some(existing) => existing != model_id,
                    None => true,
                }
            };
            if !needs_update {
                continue;
            }
            let text = node.content.as_deref().unwrap_or(&node.title);
            match self.embedding.embed(text) {
                Ok(vector) => {
                    if let Err(e) = self.vector_index.lock().map_err(poisoned)?.store(&node.id, &vector, model_id) {
                        warn!(id = %node.id, error = %e, "backfill: failed to store embedding");
                        continue;
                    }
                    updated += 1;
                }
                Err(e) => {
                    debug!(id = %node.id, error = %e, "backfill: embedding failed, skipping");
                }
            }
        }
        Ok(updated)
    }
}

fn pick_smaller_id<'a>(current: Option<&'a str>, candidate: &'a str) -> &'a str {
    match current {
        Some(c) if c < candidate => c,
        _ => candidate,
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> RouxError {
    RouxError::new(ErrorKind::Internal, "internal lock poisoned")
}

fn file_mtime_millis(path: &Path) -> f64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|t| t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

fn now_millis() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64() * 1000.0
}
