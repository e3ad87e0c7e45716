//! Shared helpers for executor tests.

use std::sync::Arc;

use crate::codec::Format;
use crate::exec::{
    HttpServiceExecutor, QueryEngine, QueryOptions, QueryOutcome, RdfLoader, SelectResult,
};
use crate::store::{QuadStore, StoreConfig};

/// Opens a store and loads Turtle data into the default graph.
pub fn store_with(dir: &std::path::Path, turtle: &str) -> QuadStore {
    let store = QuadStore::open(dir, StoreConfig::default()).expect("open store");
    if !turtle.is_empty() {
        let engine = QueryEngine::new(&store);
        engine
            .load_bytes(turtle.as_bytes(), Format::Turtle, None)
            .expect("load fixture");
    }
    store
}

/// Runs a SELECT and returns the result.
pub fn select(store: &QuadStore, query: &str) -> SelectResult {
    let engine = QueryEngine::new(store);
    match engine.query(query, QueryOptions::default()) {
        Ok(QueryOutcome::Select(result)) => result,
        Ok(other) => panic!("expected SELECT outcome, got {other:?}"),
        Err(e) => panic!("query failed: {e}\n{query}"),
    }
}

/// Runs a SELECT and returns rows as sorted vectors of plain strings
/// (unbound cells become "" for compact assertions).
pub fn select_rows(store: &QuadStore, query: &str) -> Vec<Vec<String>> {
    let result = select(store, query);
    let mut rows: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|cell| cell.clone().unwrap_or_default())
                .collect()
        })
        .collect();
    rows.sort();
    rows
}

/// Runs an ASK.
pub fn ask(store: &QuadStore, query: &str) -> bool {
    let engine = QueryEngine::new(store);
    match engine.query(query, QueryOptions::default()) {
        Ok(QueryOutcome::Ask(answer)) => answer,
        Ok(other) => panic!("expected ASK outcome, got {other:?}"),
        Err(e) => panic!("query failed: {e}\n{query}"),
    }
}

/// Runs an update.
pub fn update(store: &QuadStore, text: &str) {
    let engine = QueryEngine::new(store);
    engine
        .update(text, QueryOptions::default())
        .unwrap_or_else(|e| panic!("update failed: {e}\n{text}"));
}

/// A scripted SERVICE transport: one canned JSON response, or a
/// simulated failure.
pub struct MockService {
    /// The results-JSON body to return, or `Err` to fail the call.
    pub response: Result<String, String>,
}

impl MockService {
    /// A transport answering every SELECT with `json`.
    pub fn answering(json: &str) -> Arc<Self> {
        Arc::new(Self {
            response: Ok(json.to_string()),
        })
    }

    /// A transport where every call fails.
    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            response: Err("connection refused".into()),
        })
    }

    /// Builds a results-JSON body from `(var, rows)` columns.
    pub fn results_json(vars: &[&str], rows: &[Vec<(&str, serde_json::Value)>]) -> String {
        let bindings: Vec<serde_json::Value> = rows
            .iter()
            .map(|row| {
                let mut map = serde_json::Map::new();
                for (var, cell) in row {
                    map.insert((*var).to_string(), cell.clone());
                }
                serde_json::Value::Object(map)
            })
            .collect();
        serde_json::json!({
            "head": { "vars": vars },
            "results": { "bindings": bindings },
        })
        .to_string()
    }
}

impl HttpServiceExecutor for MockService {
    fn execute_select(&self, _endpoint: &str, _query: &str) -> Result<String, String> {
        self.response.clone()
    }

    fn execute_ask(&self, _endpoint: &str, _query: &str) -> Result<bool, String> {
        self.response.as_ref().map(|_| true).map_err(Clone::clone)
    }
}

/// A scripted LOAD fetcher.
pub struct MockLoader {
    /// Body plus media type to serve for any URL.
    pub body: Vec<u8>,
    /// Media type reported with the body.
    pub media_type: Option<String>,
}

impl RdfLoader for MockLoader {
    fn fetch(&self, _url: &str) -> Result<(Vec<u8>, Option<String>), String> {
        Ok((self.body.clone(), self.media_type.clone()))
    }
}
