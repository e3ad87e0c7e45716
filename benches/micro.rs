//! Micro-benchmarks for the hot paths: atom interning, quad writes,
//! pattern scans, SPARQL parse, and full query execution.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use tempfile::TempDir;

use mercury::codec::Format;
use mercury::diag::DiagnosticBag;
use mercury::exec::{QueryEngine, QueryOptions};
use mercury::sparql::parse_query;
use mercury::store::{Pattern, QuadStore, StoreConfig};

fn seeded_store(dir: &TempDir, quads: usize) -> QuadStore {
    let store = QuadStore::open(dir.path(), StoreConfig::default()).expect("open");
    let mut batch = store.begin_batch().expect("begin");
    for i in 0..quads {
        batch
            .add(
                format!("<http://bench/s{}>", i % 1_000).as_bytes(),
                format!("<http://bench/p{}>", i % 10).as_bytes(),
                format!("\"value {i}\"").as_bytes(),
                None,
            )
            .expect("buffer");
    }
    batch.commit().expect("commit");
    store
}

fn bench_writes(c: &mut Criterion) {
    c.bench_function("add_single_quad", |b| {
        let dir = TempDir::new().unwrap();
        let store = QuadStore::open(dir.path(), StoreConfig::default()).expect("open");
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            store
                .add(
                    format!("<http://bench/s{i}>").as_bytes(),
                    b"<http://bench/p>",
                    format!("\"{i}\"").as_bytes(),
                    None,
                )
                .expect("add");
        });
    });

    c.bench_function("batched_1000_quads", |b| {
        let dir = TempDir::new().unwrap();
        let store = QuadStore::open(dir.path(), StoreConfig::default()).expect("open");
        let mut round = 0u64;
        b.iter(|| {
            round += 1;
            let mut batch = store.begin_batch().expect("begin");
            for i in 0..1_000u64 {
                batch
                    .add(
                        format!("<http://bench/r{round}s{i}>").as_bytes(),
                        b"<http://bench/p>",
                        format!("\"{i}\"").as_bytes(),
                        None,
                    )
                    .expect("buffer");
            }
            batch.commit().expect("commit");
        });
    });
}

fn bench_scans(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir, 10_000);

    c.bench_function("scan_by_subject", |b| {
        let guard = store.read().expect("read");
        let s = guard.lookup(b"<http://bench/s42>").expect("interned");
        b.iter(|| {
            black_box(
                guard
                    .query_current(Pattern::triple(Some(s), None, None))
                    .count(),
            )
        });
    });

    c.bench_function("scan_by_predicate", |b| {
        let guard = store.read().expect("read");
        let p = guard.lookup(b"<http://bench/p3>").expect("interned");
        b.iter(|| {
            black_box(
                guard
                    .query_current(Pattern::triple(None, Some(p), None))
                    .count(),
            )
        });
    });
}

fn bench_sparql(c: &mut Criterion) {
    const QUERY: &str = "PREFIX ex: <http://bench/> \
        SELECT ?s ?o WHERE { ?s ex:p3 ?o FILTER (STRLEN(?o) > 3) } \
        ORDER BY ?s LIMIT 50";

    c.bench_function("parse_select", |b| {
        b.iter(|| {
            let mut bag = DiagnosticBag::new();
            black_box(parse_query(black_box(QUERY), false, &mut bag).expect("parse"));
        });
    });

    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir, 10_000);
    c.bench_function("execute_select", |b| {
        let engine = QueryEngine::new(&store);
        b.iter(|| black_box(engine.query(QUERY, QueryOptions::default()).expect("query")));
    });
}

fn bench_codecs(c: &mut Criterion) {
    let mut turtle = String::from("@prefix ex: <http://bench/> .\n");
    for i in 0..1_000 {
        turtle.push_str(&format!("ex:s{i} ex:p \"value {i}\" ; ex:n {i} .\n"));
    }

    c.bench_function("load_turtle_1000", |b| {
        b.iter(|| {
            let dir = TempDir::new().unwrap();
            let store = QuadStore::open(dir.path(), StoreConfig::default()).expect("open");
            let engine = QueryEngine::new(&store);
            black_box(
                engine
                    .load_bytes(turtle.as_bytes(), Format::Turtle, None)
                    .expect("load"),
            );
        });
    });
}

criterion_group!(benches, bench_writes, bench_scans, bench_sparql, bench_codecs);
criterion_main!(benches);
