//! The tool surface (spec §6): input validation plus the twelve operations
//! wrapping `roux_store::Store`.

use crate::truncate::{self, LIST_LIMIT, MAX_LINKS, MAX_NEIGHBORS, NEIGHBOR_LIMIT, PRIMARY_LIMIT};
use roux_core::error::RouxError;
use roux_core::types::{Direction, HubMetric, Node, NodeFilter, ResolveStrategy};
use roux_store::{Store, UpdateFields};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Argument helpers — every malformed argument maps to InvalidInput.
// ---------------------------------------------------------------------------

fn require_str(args: &Value, key: &str) -> Result<String, RouxError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| RouxError::invalid_input(format!("missing required string field '{key}'")))
}

fn opt_str(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn opt_bool(args: &Value, key: &str, default: bool) -> bool {
    args.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

fn opt_string_array(args: &Value, key: &str) -> Result<Option<Vec<String>>, RouxError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(
                    item.as_str()
                        .ok_or_else(|| RouxError::invalid_input(format!("'{key}' must be an array of strings")))?
                        .to_string(),
                );
            }
            Ok(Some(out))
        }
        Some(_) => Err(RouxError::invalid_input(format!("'{key}' must be an array of strings"))),
    }
}

fn require_string_array(args: &Value, key: &str) -> Result<Vec<String>, RouxError> {
    let items = opt_string_array(args, key)?.ok_or_else(|| RouxError::invalid_input(format!("missing required field '{key}'")))?;
    if items.is_empty() {
        return Err(RouxError::invalid_input(format!("'{key}' must not be empty")));
    }
    Ok(items)
}

/// A limit argument that must be a positive integer when present.
fn positive_limit(args: &Value, key: &str, default: i64) -> Result<i64, RouxError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => {
            let n = v.as_i64().ok_or_else(|| RouxError::invalid_input(format!("'{key}' must be an integer")))?;
            if n < 1 {
                return Err(RouxError::invalid_input(format!("'{key}' must be >= 1, got {n}")));
            }
            Ok(n)
        }
    }
}

fn non_negative(args: &Value, key: &str, default: i64) -> Result<i64, RouxError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => {
            let n = v.as_i64().ok_or_else(|| RouxError::invalid_input(format!("'{key}' must be an integer")))?;
            if n < 0 {
                return Err(RouxError::invalid_input(format!("'{key}' must be >= 0, got {n}")));
            }
            Ok(n)
        }
    }
}

fn range_limit(args: &Value, key: &str, default: i64, min: i64, max: i64) -> Result<i64, RouxError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => {
            let n = v.as_i64().ok_or_else(|| RouxError::invalid_input(format!("'{key}' must be an integer")))?;
            if n < min || n > max {
                return Err(RouxError::invalid_input(format!("'{key}' must be in [{min}, {max}], got {n}")));
            }
            Ok(n)
        }
    }
}

fn parse_direction(args: &Value, default: Direction) -> Result<Direction, RouxError> {
    match opt_str(args, "direction").as_deref() {
        None => Ok(default),
        Some("in") => Ok(Direction::In),
        Some("out") => Ok(Direction::Out),
        Some("both") => Ok(Direction::Both),
        Some(other) => Err(RouxError::invalid_input(format!("unknown direction '{other}'"))),
    }
}

fn parse_metric(args: &Value, default: HubMetric) -> Result<HubMetric, RouxError> {
    match opt_str(args, "metric").as_deref() {
        None => Ok(default),
        Some("in_degree") => Ok(HubMetric::InDegree),
        Some("out_degree") => Ok(HubMetric::OutDegree),
        Some(other) => Err(RouxError::invalid_input(format!("unknown metric '{other}'"))),
    }
}

fn parse_strategy(args: &Value, default: ResolveStrategy) -> Result<ResolveStrategy, RouxError> {
    match opt_str(args, "strategy").as_deref() {
        None => Ok(default),
        Some("exact") => Ok(ResolveStrategy::Exact),
        Some("fuzzy") => Ok(ResolveStrategy::Fuzzy),
        Some("semantic") => Ok(ResolveStrategy::Semantic),
        Some(other) => Err(RouxError::invalid_input(format!("unknown strategy '{other}'"))),
    }
}

fn filter_from_args(args: &Value) -> NodeFilter {
    NodeFilter { tag: opt_str(args, "tag"), path: opt_str(args, "path") }
}

// ---------------------------------------------------------------------------
// Response shaping
// ---------------------------------------------------------------------------

/// Resolve up to [`MAX_LINKS`] outgoing link ids to their titles, in order.
/// A link target with no cache row (shouldn't happen post-sync, but the
/// tool layer never trusts internal invariants blindly) falls back to the id.
fn resolve_link_titles(store: &Store, ids: &[String]) -> Result<Vec<String>, RouxError> {
    let capped: Vec<String> = ids.iter().take(MAX_LINKS).cloned().collect();
    let titles = store.resolve_titles(&capped)?;
    Ok(capped.iter().map(|id| titles.get(id).cloned().unwrap_or_else(|| id.clone())).collect())
}

fn node_response(store: &Store, node: &Node, content_limit: usize) -> Result<Value, RouxError> {
    let links = resolve_link_titles(store, &node.outgoing_links)?;
    let content = node.content.as_deref().map(|c| truncate::truncate(c, content_limit));
    Ok(json!({
        "id": node.id,
        "title": node.title,
        "tags": node.tags,
        "links": links,
        "properties": node.properties,
        "is_ghost": node.is_ghost,
        "content": content,
    }))
}

fn node_response_with_score(store: &Store, node: &Node, content_limit: usize, score: f64) -> Result<Value, RouxError> {
    let mut v = node_response(store, node, content_limit)?;
    v.as_object_mut().unwrap().insert("score".to_string(), json!(score));
    Ok(v)
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

pub fn search(store: &Store, args: &Value) -> Result<Value, RouxError> {
    let query = require_str(args, "query")?;
    let limit = positive_limit(args, "limit", 10)?;
    let include_content = opt_bool(args, "include_content", false);
    let content_limit = if include_content { LIST_LIMIT } else { 0 };

    let hits = store.search(&query, limit)?;
    let results: Result<Vec<Value>, RouxError> = hits
        .iter()
        .map(|(node, score)| {
            let mut v = node_response_with_score(store, node, content_limit, *score as f64)?;
            if !include_content {
                v.as_object_mut().unwrap().remove("content");
            }
            Ok(v)
        })
        .collect();
    Ok(json!(results?))
}

pub fn get_node(store: &Store, args: &Value) -> Result<Value, RouxError> {
    let id = require_str(args, "id")?;
    let depth_raw = args.get("depth").and_then(|v| v.as_i64()).unwrap_or(0);
    // Decided: depth is clamped into {0, 1} rather than rejected — a
    // negative or oversized depth behaves like its nearest valid value.
    let depth = depth_raw.clamp(0, 1);

    let node = store.get_node(&id)?.ok_or_else(|| RouxError::node_not_found(&id))?;
    let mut response = node_response(store, &node, PRIMARY_LIMIT)?;

    if depth == 1 {
        let incoming = store.get_neighbors(&id, Direction::In, MAX_NEIGHBORS as i64)?;
        let outgoing = store.get_neighbors(&id, Direction::Out, MAX_NEIGHBORS as i64)?;
        let summarize = |nodes: &[Node]| -> Vec<Value> {
            nodes.iter().map(|n| json!({ "id": n.id, "title": n.title })).collect()
        };
        response.as_object_mut().unwrap().insert(
            "neighbors".to_string(),
            json!({ "in": summarize(&incoming), "out": summarize(&outgoing) }),
        );
    }

    Ok(response)
}

pub fn get_neighbors(store: &Store, args: &Value) -> Result<Value, RouxError> {
    let id = require_str(args, "id")?;
    let direction = parse_direction(args, Direction::Both)?;
    let limit = positive_limit(args, "limit", 20)?;
    let include_content = opt_bool(args, "include_content", false);
    let content_limit = if include_content { NEIGHBOR_LIMIT } else { 0 };

    let neighbors = store.get_neighbors(&id, direction, limit.min(MAX_NEIGHBORS as i64))?;
    let results: Result<Vec<Value>, RouxError> = neighbors
        .iter()
        .map(|n| {
            let mut v = node_response(store, n, content_limit)?;
            if !include_content {
                v.as_object_mut().unwrap().remove("content");
            }
            Ok(v)
        })
        .collect();
    Ok(json!(results?))
}

pub fn find_path(store: &Store, args: &Value) -> Result<Value, RouxError> {
    let source = require_str(args, "source")?;
    let target = require_str(args, "target")?;
    match store.find_path(&source, &target)? {
        Some(path) => Ok(json!({ "path": path, "length": path_len(&path) })),
        None => Ok(Value::Null),
    }
}

fn path_len(path: &[String]) -> usize {
    path.len().saturating_sub(1)
}

pub fn get_hubs(store: &Store, args: &Value) -> Result<Value, RouxError> {
    let metric = parse_metric(args, HubMetric::InDegree)?;
    let limit = positive_limit(args, "limit", 10)?;
    let ranked = store.get_hubs(metric, limit)?;
    let results: Vec<Value> = ranked.into_iter().map(|(node, score)| json!({ "id": node.id, "title": node.title, "score": score })).collect();
    Ok(json!(results))
}

pub fn search_by_tags(store: &Store, args: &Value) -> Result<Value, RouxError> {
    let tags = require_string_array(args, "tags")?;
    let mode = opt_str(args, "mode").unwrap_or_else(|| "any".to_string());
    let match_all = match mode.as_str() {
        "any" => false,
        "all" => true,
        other => return Err(RouxError::invalid_input(format!("unknown mode '{other}'"))),
    };
    let limit = positive_limit(args, "limit", 20)?;
    let include_content = opt_bool(args, "include_content", false);
    let content_limit = if include_content { LIST_LIMIT } else { 0 };

    let nodes = store.search_by_tags(&tags, match_all, limit)?;
    let results: Result<Vec<Value>, RouxError> = nodes
        .iter()
        .map(|n| {
            let mut v = node_response(store, n, content_limit)?;
            if !include_content {
                v.as_object_mut().unwrap().remove("content");
            }
            Ok(v)
        })
        .collect();
    Ok(json!(results?))
}

pub fn random_node(store: &Store, args: &Value) -> Result<Value, RouxError> {
    let tags = opt_string_array(args, "tags")?;
    match store.random_node(tags.as_deref())? {
        Some(node) => node_response(store, &node, PRIMARY_LIMIT),
        None => Ok(Value::Null),
    }
}

pub fn create_node(store: &Store, args: &Value) -> Result<Value, RouxError> {
    let id = require_str(args, "id")?;
    if !id.to_lowercase().ends_with(".md") {
        return Err(RouxError::invalid_input(format!("create_node id must end in .md: {id}")));
    }
    let content = require_str(args, "content")?;
    let title = opt_str(args, "title").unwrap_or_else(|| roux_core::types::default_title_from_id(&id));
    let tags = opt_string_array(args, "tags")?.unwrap_or_default();

    let node = Node {
        id,
        title,
        content: Some(content),
        tags,
        outgoing_links: Vec::new(),
        properties: Default::default(),
        source_ref: None,
        is_ghost: false,
    };
    let created = store.create_node(node)?;
    node_response(store, &created, PRIMARY_LIMIT)
}

pub fn update_node(store: &Store, args: &Value) -> Result<Value, RouxError> {
    let id = require_str(args, "id")?;
    let title = opt_str(args, "title");
    let content = opt_str(args, "content");
    let tags = opt_string_array(args, "tags")?;
    if title.is_none() && content.is_none() && tags.is_none() {
        return Err(RouxError::invalid_input("update_node requires at least one of title/content/tags"));
    }
    let updated = store.update_node(&id, UpdateFields { title, content, tags, properties: None })?;
    node_response(store, &updated, PRIMARY_LIMIT)
}

pub fn delete_node(store: &Store, args: &Value) -> Result<Value, RouxError> {
    let id = require_str(args, "id")?;
    let deleted = store.delete_node(&id)?;
    Ok(json!({ "deleted": deleted }))
}

pub fn list_nodes(store: &Store, args: &Value) -> Result<Value, RouxError> {
    let filter = filter_from_args(args);
    let limit = range_limit(args, "limit", 100, 1, 1000)?;
    let offset = non_negative(args, "offset", 0)?;
    let (nodes, total) = store.list_nodes(&filter, offset, limit)?;
    let results: Result<Vec<Value>, RouxError> = nodes.iter().map(|n| node_response(store, n, LIST_LIMIT)).collect();
    Ok(json!({ "nodes": results?, "total": total }))
}

pub fn resolve_nodes(store: &Store, args: &Value) -> Result<Value, RouxError> {
    let names = require_string_array(args, "names")?;
    let strategy = parse_strategy(args, ResolveStrategy::Exact)?;
    // spec.md §4.9: fuzzy's default threshold is 0.7; exact/semantic have no
    // mandated default, so they fall back to accepting the best candidate.
    let default_threshold = match strategy {
        ResolveStrategy::Fuzzy => 0.7,
        ResolveStrategy::Exact | ResolveStrategy::Semantic => 0.0,
    };
    let threshold = args.get("threshold").and_then(|v| v.as_f64()).unwrap_or(default_threshold);
    let filter = filter_from_args(args);

    let results = store.resolve_nodes(&names, strategy, threshold, &filter)?;
    let out: Vec<Value> = results
        .into_iter()
        .map(|r| json!({ "query": r.query, "match": r.matched_id, "score": r.score }))
        .collect();
    Ok(json!(out))
}

pub fn nodes_exist(store: &Store, args: &Value) -> Result<Value, RouxError> {
    let ids = require_string_array(args, "ids")?;
    let result = store.nodes_exist(&ids)?;
    Ok(json!(result))
}

// ---------------------------------------------------------------------------
// Dispatch table + schema
// ---------------------------------------------------------------------------

pub fn call(store: &Store, name: &str, args: &Value) -> Result<Value, RouxError> {
    match name {
        "search" => search(store, args),
        "get_node" => get_node(store, args),
        "get_neighbors" => get_neighbors(store, args),
        "find_path" => find_path(store, args),
        "get_hubs" => get_hubs(store, args),
        "search_by_tags" => search_by_tags(store, args),
        "random_node" => random_node(store, args),
        "create_node" => create_node(store, args),
        "update_node" => update_node(store, args),
        "delete_node" => delete_node(store, args),
        "list_nodes" => list_nodes(store, args),
        "resolve_nodes" => resolve_nodes(store, args),
        "nodes_exist" => nodes_exist(store, args),
        other => Err(RouxError::invalid_input(format!("unknown tool '{other}'"))),
    }
}

pub fn tool_definitions() -> Value {
    let ro = json!({ "readOnlyHint": true, "destructiveHint": false, "idempotentHint": true, "openWorldHint": false });
    let mutating = json!({ "readOnlyHint": false, "destructiveHint": false, "idempotentHint": true, "openWorldHint": false });
    let destructive = json!({ "readOnlyHint": false, "destructiveHint": true, "idempotentHint": true, "openWorldHint": false });

    json!([
        {
            "name": "search",
            "annotations": ro,
            "description": "Semantic search over note embeddings. Returns nodes ranked by similarity to the query.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Free-text query embedded and compared against stored note vectors." },
                    "limit": { "type": "integer", "description": "Max results (default 10)." },
                    "include_content": { "type": "boolean", "description": "Include truncated note content (default false)." }
                },
                "required": ["query"]
            }
        },
        {
            "name": "get_node",
            "annotations": ro,
            "description": "Fetch a single node by id, optionally with its immediate in/out neighbours (depth 1).",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "id": { "type": "string" },
                    "depth": { "type": "integer", "enum": [0, 1], "description": "0: node only. 1: include neighbour context (default 0)." }
                },
                "required": ["id"]
            }
        },
        {
            "name": "get_neighbors",
            "annotations": ro,
            "description": "List a node's neighbours in the link graph.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "id": { "type": "string" },
                    "direction": { "type": "string", "enum": ["in", "out", "both"], "description": "Default both." },
                    "limit": { "type": "integer", "description": "Default 20, capped at 20." },
                    "include_content": { "type": "boolean", "description": "Default false." }
                },
                "required": ["id"]
            }
        },
        {
            "name": "find_path",
            "annotations": ro,
            "description": "Shortest path between two nodes by hop count, or null if unreachable.",
            "inputSchema": {
                "type": "object",
                "properties": { "source": { "type": "string" }, "target": { "type": "string" } },
                "required": ["source", "target"]
            }
        },
        {
            "name": "get_hubs",
            "annotations": ro,
            "description": "Rank nodes by in-degree or out-degree centrality.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "metric": { "type": "string", "enum": ["in_degree", "out_degree"], "description": "Default in_degree." },
                    "limit": { "type": "integer", "description": "Default 10." }
                }
            }
        },
        {
            "name": "search_by_tags",
            "annotations": ro,
            "description": "Find nodes matching one or more tags.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tags": { "type": "array", "items": { "type": "string" } },
                    "mode": { "type": "string", "enum": ["any", "all"], "description": "Default any." },
                    "limit": { "type": "integer", "description": "Default 20." },
                    "include_content": { "type": "boolean", "description": "Default false." }
                },
                "required": ["tags"]
            }
        },
        {
            "name": "random_node",
            "annotations": ro,
            "description": "A uniformly random node, optionally restricted to a tag set.",
            "inputSchema": {
                "type": "object",
                "properties": { "tags": { "type": "array", "items": { "type": "string" } } }
            }
        },
        {
            "name": "create_node",
            "annotations": mutating,
            "description": "Create a new note. Fails with node_exists if a real node already occupies the id.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Must end in .md." },
                    "content": { "type": "string" },
                    "title": { "type": "string" },
                    "tags": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["id", "content"]
            }
        },
        {
            "name": "update_node",
            "annotations": mutating,
            "description": "Update an existing node's title, content, and/or tags. Renaming a node other nodes link to fails with link_integrity.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "id": { "type": "string" },
                    "title": { "type": "string" },
                    "content": { "type": "string" },
                    "tags": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["id"]
            }
        },
        {
            "name": "delete_node",
            "annotations": destructive,
            "description": "Delete a node and its backing file.",
            "inputSchema": {
                "type": "object",
                "properties": { "id": { "type": "string" } },
                "required": ["id"]
            }
        },
        {
            "name": "list_nodes",
            "annotations": ro,
            "description": "Paginated listing of nodes, optionally filtered by tag and/or id path prefix.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tag": { "type": "string" },
                    "path": { "type": "string" },
                    "limit": { "type": "integer", "description": "Default 100, max 1000." },
                    "offset": { "type": "integer", "description": "Default 0." }
                }
            }
        },
        {
            "name": "resolve_nodes",
            "annotations": ro,
            "description": "Resolve free-text names to node ids by exact title, fuzzy title, or semantic similarity.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "names": { "type": "array", "items": { "type": "string" } },
                    "strategy": { "type": "string", "enum": ["exact", "fuzzy", "semantic"], "description": "Default exact." },
                    "threshold": { "type": "number", "description": "Minimum score to accept a match (default 0.7 for fuzzy, 0 otherwise)." },
                    "tag": { "type": "string" },
                    "path": { "type": "string" }
                },
                "required": ["names"]
            }
        },
        {
            "name": "nodes_exist",
            "annotations": ro,
            "description": "Check existence (real or ghost) for a batch of ids.",
            "inputSchema": {
                "type": "object",
                "properties": { "ids": { "type": "array", "items": { "type": "string" } } },
                "required": ["ids"]
            }
        }
    ])
}
