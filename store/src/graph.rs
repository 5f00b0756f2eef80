//! In-memory directed graph over node ids (spec §4.7).
//!
//! Forward/reverse adjacency lists keyed by id, mirroring the teacher's
//! `by_source`/`by_target` index pattern but keyed directly by id rather
//! than by a separate edge-index table, since nodes here are identified by
//! string id rather than interned symbol.

use roux_core::error::RouxError;
use roux_core::heap::BoundedHeap;
use roux_core::types::{Direction, HubMetric, Node};
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Default)]
pub struct Graph {
    forward: HashMap<String, Vec<String>>,
    reverse: HashMap<String, Vec<String>>,
    node_ids: HashSet<String>,
}

impl Graph {
    /// Build a graph from the current node set. Every id becomes a vertex;
    /// an edge `u -> v` is added for each of `u`'s outgoing links that
    /// names another known id. Duplicate ids in `nodes` are rejected.
    pub fn build<'a, I: IntoIterator<Item = &'a Node>>(nodes: I) -> Result<Self, RouxError> {
        let mut node_ids = HashSet::new();
        let mut collected: Vec<&Node> = Vec::new();
        for node in nodes {
            if !node_ids.insert(node.id.clone()) {
                return Err(RouxError::internal(format!("duplicate node id in graph build: {}", node.id)));
            }
            collected.push(node);
        }

        let mut forward: HashMap<String, Vec<String>> = HashMap::new();
        let mut reverse: HashMap<String, Vec<String>> = HashMap::new();
        for id in &node_ids {
            forward.insert(id.clone(), Vec::new());
            reverse.insert(id.clone(), Vec::new());
        }

        for node in &collected {
            for target in &node.outgoing_links {
                if node_ids.contains(target) {
                    forward.get_mut(&node.id).unwrap().push(target.clone());
                    reverse.get_mut(target).unwrap().push(node.id.clone());
                }
            }
        }

        Ok(Self { forward, reverse, node_ids })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node_ids.contains(id)
    }

    pub fn in_degree(&self, id: &str) -> u32 {
        self.reverse.get(id).map(|v| v.len() as u32).unwrap_or(0)
    }

    pub fn out_degree(&self, id: &str) -> u32 {
        self.forward.get(id).map(|v| v.len() as u32).unwrap_or(0)
    }

    pub fn node_count(&self) -> usize {
        self.node_ids.len()
    }

    /// Neighbour ids in the given direction, early-terminating once `limit`
    /// ids have been accumulated: a node with 100 outgoing edges asked for
    /// 5 touches roughly 5 adjacency entries, not 100.
    pub fn get_neighbor_ids(&self, id: &str, direction: Direction, limit: i64) -> Vec<String> {
        if limit <= 0 || !self.node_ids.contains(id) {
            return Vec::new();
        }
        let limit = limit as usize;

        match direction {
            Direction::Out => self.forward.get(id).map(|v| v.iter().take(limit).cloned().collect()).unwrap_or_default(),
            Direction::In => self.reverse.get(id).map(|v| v.iter().take(limit).cloned().collect()).unwrap_or_default(),
            Direction::Both => {
                let mut seen = HashSet::new();
                let mut out = Vec::with_capacity(limit);
                let empty: Vec<String> = Vec::new();
                let fwd = self.forward.get(id).unwrap_or(&empty);
                let rev = self.reverse.get(id).unwrap_or(&empty);
                for candidate in fwd.iter().chain(rev.iter()) {
                    if out.len() >= limit {
                        break;
                    }
                    if seen.insert(candidate.clone()) {
                        out.push(candidate.clone());
                    }
                }
                out
            }
        }
    }

    /// BFS shortest path along forward edges. `source == target` always
    /// returns `[source]`, even when a self-loop edge exists — the
    /// zero-hop case is checked before any traversal.
    pub fn find_path(&self, source: &str, target: &str) -> Option<Vec<String>> {
        if !self.node_ids.contains(source) || !self.node_ids.contains(target) {
            return None;
        }
        if source == target {
            return Some(vec![source.to_string()]);
        }

        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(source);
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(source);
        let mut parent: HashMap<&str, &str> = HashMap::new();

        while let Some(current) = queue.pop_front() {
            let Some(edges) = self.forward.get(current) else { continue };
            for next in edges {
                let next = next.as_str();
                if visited.contains(next) {
                    continue;
                }
                visited.insert(next);
                parent.insert(next, current);
                if next == target {
                    return Some(reconstruct_path(&parent, source, target));
                }
                queue.push_back(next);
            }
        }
        None
    }

    /// Top `limit` nodes by `metric`, descending, ties broken by id
    /// ascending, via a bounded heap.
    pub fn get_hubs(&self, metric: HubMetric, limit: i64) -> Vec<(String, u32)> {
        if limit <= 0 {
            return Vec::new();
        }
        let limit = limit as usize;

        let mut heap: BoundedHeap<(String, u32)> = BoundedHeap::new(limit, |a: &(String, u32), b: &(String, u32)| {
            // "smaller" = worse-ranked = kept at the root for eviction:
            // lower metric first, then higher id (so the lexicographically
            // largest id among equal metrics sits at the root).
            match a.1.cmp(&b.1) {
                std::cmp::Ordering::Equal => b.0.cmp(&a.0),
                other => other,
            }
        });

        for id in &self.node_ids {
            let value = match metric {
                HubMetric::InDegree => self.in_degree(id),
                HubMetric::OutDegree => self.out_degree(id),
            };
            heap.push((id.clone(), value));
        }

        let mut result = heap.into_sorted_by_pop();
        result.reverse();
        result
    }
}

fn reconstruct_path<'a>(parent: &HashMap<&'a str, &'a str>, source: &'a str, target: &'a str) -> Vec<String> {
    let mut path = vec![target.to_string()];
    let mut current = target;
    while current != source {
        let prev = parent[current];
        path.push(prev.to_string());
        current = prev;
    }
    path.reverse();
    path
}
