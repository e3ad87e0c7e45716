//! # Mercury
//!
//! An embeddable knowledge-graph engine: Mercury persists RDF quads
//! (subject, predicate, object, graph) under a **bitemporal** model,
//! indexes them for multi-directional access, and answers **SPARQL 1.1**
//! queries and updates. It is a library, not a server — consumers embed
//! it and decide for themselves how (and whether) to expose it.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                     SPARQL pipeline                       │
//! │  ┌──────────┐   ┌──────────┐   ┌───────────────────────┐  │
//! │  │ Lexer /  │   │ Span AST │   │ Executor (scans,      │  │
//! │  │ Parser   │──►│          │──►│ joins, filters, aggs) │  │
//! │  └──────────┘   └──────────┘   └──────────┬────────────┘  │
//! └────────────────────────────────────────────┼──────────────┘
//!                     cursors                  │
//! ┌────────────────────────────────────────────▼──────────────┐
//! │                      Quad store                           │
//! │  ┌──────────┐   ┌─────────────┐   ┌────────────────────┐  │
//! │  │ Atom     │   │ B+Tree      │   │ WAL + checkpoints  │  │
//! │  │ store    │   │ indexes     │   │ (crash recovery)   │  │
//! │  └──────────┘   └─────────────┘   └────────────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`store`] | Bitemporal quad store — add, retract, temporal queries, batches |
//! | [`atom`] | Interned RDF terms: content-addressed 64-bit ids over mmap segments |
//! | [`index`] | Multi-ordering B+Tree indexes and cursors |
//! | [`wal`] | CRC-protected write-ahead log, checkpointing, crash recovery |
//! | [`pool`] | Multi-store pool with atomic role swap, plus the pruner |
//! | [`codec`] | Streaming parsers/writers for six RDF syntaxes |
//! | [`sparql`] | SPARQL tokenizer, recursive-descent parser, and span AST |
//! | [`exec`] | Pull-based physical operators, update engine, result writers |
//! | [`diag`] | Span diagnostics, terminal and LSP formatters |
//! | [`encoding`] | Word-oriented wire format for the transaction log |
//! | [`model`] | Shared value types: atoms, quads, timestamps |
//!
//! ## Key features
//!
//! - **Bitemporal versioning** — every quad carries independent
//!   valid-time and transaction-time intervals; retraction closes an
//!   interval instead of deleting bytes, so `AS OF` and `DURING` queries
//!   see the past exactly as it was recorded.
//! - **Write-ahead logging** — every mutation is persisted to a framed,
//!   CRC32-protected WAL before acknowledgement; a torn tail is truncated
//!   on recovery, a corrupted prefix refuses to open.
//! - **Snapshot isolation** — readers pin the transaction id current at
//!   lock acquisition and are unaffected by later writers.
//! - **Five index orderings** — SPO, POS, OSP, GSPO, and TSPO B+Trees,
//!   kept in lock-step within each transaction; every SPARQL pattern scan
//!   compiles to a cursor seek over the best-matching ordering.
//! - **Streaming codecs** — Turtle, N-Triples, N-Quads, TriG, RDF/XML and
//!   JSON-LD parsers hand borrowed term spans to a callback without
//!   per-triple allocation; writers round-trip byte-exact documents.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use mercury::store::{QuadStore, StoreConfig};
//! use mercury::exec::{QueryEngine, QueryOptions};
//! use mercury::codec::Format;
//!
//! let store = QuadStore::open("/tmp/my_graph", StoreConfig::default()).unwrap();
//!
//! // Load a Turtle document into the default graph.
//! let ttl: &[u8] = br#"@prefix ex: <http://example.org/> . ex:a ex:name "Alice" ."#;
//! let engine = QueryEngine::new(&store);
//! engine.load_bytes(ttl, Format::Turtle, None).unwrap();
//!
//! // Query it.
//! let outcome = engine
//!     .query(
//!         "SELECT ?n WHERE { ?s <http://example.org/name> ?n }",
//!         QueryOptions::default(),
//!     )
//!     .unwrap();
//! ```

pub mod atom;
pub mod codec;
pub mod diag;
pub mod encoding;
pub mod exec;
pub mod index;
pub mod model;
pub mod pool;
pub mod sparql;
pub mod store;
pub mod wal;

pub use model::{AtomId, TIME_MAX, Timestamp};
pub use store::{QuadStore, StoreConfig, StoreError};
