//! End-to-end scenarios S1-S6 (spec §8) exercising `Store` against a real
//! temp-directory vault, in the teacher's integration-test style: build a
//! throwaway fixture on disk, drive the public surface, assert outcomes.

use roux_core::error::ErrorKind;
use roux_core::types::{CacheConfig, Config, Direction, HubMetric, ProvidersConfig, SourceConfig, WatcherConfig};
use roux_store::store_engine::UpdateFields;
use roux_store::vector_index::VectorIndex;
use roux_store::watch::{ChangeKind, WatchConfig, Watcher};
use roux_store::Store;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn config_for(dir: &std::path::Path) -> Config {
    Config {
        source: SourceConfig { path: dir.to_string_lossy().to_string() },
        cache: CacheConfig::default(),
        providers: ProvidersConfig::default(),
        watcher: WatcherConfig { debounce_ms: 50, excluded_dirs: WatcherConfig::default().excluded_dirs },
        extensions: vec![".md".to_string()],
    }
}

fn write(dir: &std::path::Path, rel: &str, body: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, body).unwrap();
}

// S1 — Sync a small vault.
#[test]
fn s1_sync_small_vault() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "notes/a.md", "Links to [[b]].");
    write(dir.path(), "notes/b.md", "Content.");

    let store = Store::open(config_for(dir.path())).unwrap();

    let neighbors = store.get_neighbors("notes/a.md", Direction::Out, 10).unwrap();
    assert_eq!(neighbors.len(), 1);
    assert_eq!(neighbors[0].id, "notes/b.md");

    let hubs = store.get_hubs(HubMetric::InDegree, 10).unwrap();
    assert_eq!(hubs[0].0.id, "notes/b.md");
    assert_eq!(hubs[0].1, 1);
}

// S2 — Ghost creation and GC.
#[test]
fn s2_ghost_creation_and_gc() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "notes/a.md", "Links to [[missing]].");

    let store = Arc::new(Store::open(config_for(dir.path())).unwrap());
    let exists = store.nodes_exist(&["missing.md".to_string()]).unwrap();
    assert_eq!(exists.get("missing.md"), Some(&true));

    store.start_watching().unwrap();
    write(dir.path(), "notes/a.md", "No links here.");
    std::thread::sleep(Duration::from_millis(250));
    store.flush_watcher();
    std::thread::sleep(Duration::from_millis(250));

    let exists = store.nodes_exist(&["missing.md".to_string()]).unwrap();
    assert_eq!(exists.get("missing.md"), Some(&false));
}

// S3 — Update with incoming edges.
#[test]
fn s3_update_with_incoming_edges() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.md", "Links to [[b]].");
    write(dir.path(), "b.md", "Body.");

    let store = Store::open(config_for(dir.path())).unwrap();

    let rename = store.update_node(
        "b.md",
        UpdateFields { title: Some("New".to_string()), content: None, tags: None, properties: None },
    );
    let err = rename.unwrap_err();
    assert_eq!(err.kind, ErrorKind::LinkIntegrity);

    let content_update = store.update_node(
        "b.md",
        UpdateFields { title: None, content: Some("New body.".to_string()), tags: None, properties: None },
    );
    assert!(content_update.is_ok());
    assert_eq!(content_update.unwrap().content.as_deref(), Some("New body."));
}

// S4 — Vector search top-k.
#[test]
fn s4_vector_search_top_k() {
    let dir = tempfile::tempdir().unwrap();
    let index = VectorIndex::open(dir.path().join("vectors.sqlite3").to_str().unwrap()).unwrap();

    let vectors: [(&str, [f32; 3]); 5] = [
        ("v1", [1.0, 0.0, 0.0]),
        ("v2", [0.9, 0.1, 0.0]),
        ("v3", [0.0, 1.0, 0.0]),
        ("v4", [0.0, 0.9, 0.1]),
        ("v5", [0.0, 0.0, 1.0]),
    ];
    for (id, v) in vectors {
        index.store(id, &v, "m").unwrap();
    }

    let hits = index.search(&[1.0, 0.0, 0.0], 2).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, "v1");
    assert!(hits[0].distance.abs() < 1e-6);
    assert_eq!(hits[1].id, "v2");
    assert!((hits[1].distance - 0.0101).abs() < 1e-3);
}

// S5 — Watcher batching and coalescing.
#[test]
fn s5_watcher_batching() {
    let received: Arc<Mutex<Vec<HashMap<String, ChangeKind>>>> = Arc::new(Mutex::new(Vec::new()));
    let received_clone = Arc::clone(&received);

    let dir = tempfile::tempdir().unwrap();
    let config = WatchConfig {
        root: dir.path().to_path_buf(),
        debounce_ms: 100,
        excluded_dirs: vec![],
        extensions: vec![".md".to_string()],
    };
    let watcher = Watcher::start(config, move |batch| {
        received_clone.lock().unwrap().push(batch);
    })
    .unwrap();

    write(dir.path(), "a.md", "one");
    write(dir.path(), "b.md", "one");
    std::thread::sleep(Duration::from_millis(20));
    write(dir.path(), "a.md", "two");
    std::fs::remove_file(dir.path().join("b.md")).unwrap();

    std::thread::sleep(Duration::from_millis(250));
    watcher.stop();

    let batches = received.lock().unwrap();
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.get("a.md"), Some(&ChangeKind::Add));
    assert!(!batch.contains_key("b.md"));
}

// S6 — Dimension rejection, then recovery after deletion.
#[test]
fn s6_dimension_rejection_then_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let index = VectorIndex::open(dir.path().join("vectors.sqlite3").to_str().unwrap()).unwrap();

    index.store("x", &[1.0, 2.0, 3.0], "m").unwrap();
    let err = index.store("y", &[1.0, 2.0], "m").unwrap_err();
    assert_eq!(err.kind, ErrorKind::DimensionMismatch);

    index.delete("x").unwrap();
    assert!(index.store("y", &[1.0, 2.0], "m").is_ok());
}
