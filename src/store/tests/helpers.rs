//! Shared helpers for quad store tests.

use std::collections::BTreeMap;
use std::path::Path;

use crate::model::QuadIds;
use crate::store::{Pattern, QuadStore, StoreConfig};

/// Opens a store with the default configuration.
pub fn open(dir: &Path) -> QuadStore {
    QuadStore::open(dir, StoreConfig::default()).expect("open store")
}

/// Opens a store that never checkpoints automatically.
pub fn open_no_auto_checkpoint(dir: &Path) -> QuadStore {
    QuadStore::open(
        dir,
        StoreConfig {
            checkpoint_wal_bytes: 0,
            ..StoreConfig::default()
        },
    )
    .expect("open store")
}

/// Canonical IRI bytes for a local name.
pub fn iri(name: &str) -> Vec<u8> {
    format!("<http://example.org/{name}>").into_bytes()
}

/// Canonical plain-literal bytes.
pub fn lit(text: &str) -> Vec<u8> {
    format!("\"{text}\"").into_bytes()
}

/// Collects the current quads matching a pattern as id tuples.
pub fn current_ids(store: &QuadStore, pattern: Pattern) -> Vec<QuadIds> {
    let guard = store.read().expect("read");
    guard.query_current(pattern).map(|q| q.ids).collect()
}

/// Byte-level fingerprint of every file under a directory, keyed by
/// relative path. Used to prove rollback leaves the store untouched.
pub fn dir_fingerprint(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut out = BTreeMap::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
        for entry in std::fs::read_dir(&d).expect("read_dir") {
            let entry = entry.expect("entry");
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let rel = path
                    .strip_prefix(dir)
                    .expect("strip prefix")
                    .to_string_lossy()
                    .into_owned();
                out.insert(rel, std::fs::read(&path).expect("read file"));
            }
        }
    }
    out
}
