//! SELECT executor tests: scans, filters, BIND (and its scope rule),
//! OPTIONAL, UNION, MINUS, VALUES, subqueries, and the boundary
//! behaviours.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::exec::tests::helpers::*;
    use tempfile::TempDir;

    const DATA: &str = r#"
@prefix ex: <http://e/> .
ex:a ex:name "A" ; ex:knows ex:b ; ex:age 30 .
ex:b ex:name "B" ; ex:age 25 .
ex:c ex:name "C" ; ex:knows ex:a ; ex:age 35 .
"#;

    #[test]
    fn select__round_trip_over_parsed_turtle() {
        // Parse → store → query returns exactly the parsed facts.
        let dir = TempDir::new().unwrap();
        let store = store_with(
            dir.path(),
            r#"@prefix ex: <http://e/> . ex:a ex:p "x" ; ex:q 1 ."#,
        );
        let rows = select_rows(
            &store,
            "SELECT ?p ?o WHERE { <http://e/a> ?p ?o }",
        );
        assert_eq!(
            rows,
            vec![
                vec![
                    "<http://e/p>".to_string(),
                    "\"x\"".to_string()
                ],
                vec![
                    "<http://e/q>".to_string(),
                    "\"1\"^^<http://www.w3.org/2001/XMLSchema#integer>".to_string()
                ],
            ]
        );
        store.close().expect("close");
    }

    #[test]
    fn select__ground_pattern_and_variables() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), DATA);

        let rows = select_rows(
            &store,
            "PREFIX ex: <http://e/> SELECT ?who WHERE { ?who ex:knows ex:b }",
        );
        assert_eq!(rows, vec![vec!["<http://e/a>".to_string()]]);

        // Unknown constant: empty, not an error.
        let rows = select_rows(
            &store,
            "PREFIX ex: <http://e/> SELECT ?x WHERE { ?x ex:knows ex:nobody }",
        );
        assert!(rows.is_empty());
        store.close().expect("close");
    }

    #[test]
    fn select__filter_comparisons() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), DATA);

        let rows = select_rows(
            &store,
            "PREFIX ex: <http://e/> SELECT ?n WHERE { ?s ex:age ?a ; ex:name ?n FILTER (?a > 26) }",
        );
        assert_eq!(rows, vec![vec!["\"A\"".to_string()], vec!["\"C\"".to_string()]]);

        let rows = select_rows(
            &store,
            "PREFIX ex: <http://e/> SELECT ?n WHERE { ?s ex:name ?n FILTER (STRLEN(?n) = 1 && ?n != \"B\") }",
        );
        assert_eq!(rows.len(), 2);
        store.close().expect("close");
    }

    #[test]
    fn select__optional_left_outer() {
        // S3: OPTIONAL emits the left row with unbound right side when
        // no match exists.
        let dir = TempDir::new().unwrap();
        let store = store_with(
            dir.path(),
            r#"@prefix ex: <http://e/> .
ex:a ex:name "A" ; ex:knows ex:b .
ex:b ex:name "B" ."#,
        );
        let rows = select_rows(
            &store,
            "PREFIX ex: <http://e/> SELECT ?x ?y WHERE { ?x ex:name ?n OPTIONAL { ?x ex:knows ?y } }",
        );
        assert_eq!(
            rows,
            vec![
                vec!["<http://e/a>".to_string(), "<http://e/b>".to_string()],
                vec!["<http://e/b>".to_string(), String::new()],
            ]
        );
        store.close().expect("close");
    }

    #[test]
    fn select__union_concatenates() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), DATA);
        let rows = select_rows(
            &store,
            "PREFIX ex: <http://e/> SELECT ?v WHERE { { ex:a ex:name ?v } UNION { ex:a ex:age ?v } }",
        );
        assert_eq!(rows.len(), 2);
        store.close().expect("close");
    }

    #[test]
    fn select__minus_with_nested_not_exists() {
        // S4: a has p and q; b has only p. MINUS keeps b because the
        // inner NOT EXISTS holds for a's q-row (no r anywhere), so a is
        // removed.
        let dir = TempDir::new().unwrap();
        let store = store_with(
            dir.path(),
            r#"@prefix ex: <http://e/> .
ex:a ex:p "1" ; ex:q "2" .
ex:b ex:p "3" ."#,
        );
        let rows = select_rows(
            &store,
            "PREFIX ex: <http://e/> SELECT ?x WHERE { ?x ex:p ?v1 . \
             MINUS { ?x ex:q ?v2 . FILTER NOT EXISTS { ?x ex:r ?v3 } } }",
        );
        assert_eq!(rows, vec![vec!["<http://e/b>".to_string()]]);
        store.close().expect("close");
    }

    #[test]
    fn select__bind_computes_values() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), DATA);
        let rows = select_rows(
            &store,
            "PREFIX ex: <http://e/> SELECT ?m WHERE { ex:a ex:age ?a BIND (?a + 5 AS ?m) }",
        );
        assert_eq!(
            rows,
            vec![vec![
                "\"35\"^^<http://www.w3.org/2001/XMLSchema#integer>".to_string()
            ]]
        );
        store.close().expect("close");
    }

    #[test]
    fn select__bind_scope_hides_from_deeper_filters() {
        // A filter in a group deeper than the BIND must not see the
        // BIND variable.
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), DATA);
        let rows = select_rows(
            &store,
            "PREFIX ex: <http://e/> SELECT ?n WHERE { \
             BIND (30 AS ?limit) \
             { ?s ex:age ?a ; ex:name ?n FILTER (BOUND(?limit)) } }",
        );
        assert!(
            rows.is_empty(),
            "the deeper filter must not see the outer BIND: {rows:?}"
        );

        // The same filter at the BIND's own depth does see it.
        let rows = select_rows(
            &store,
            "PREFIX ex: <http://e/> SELECT ?n WHERE { \
             BIND (30 AS ?limit) \
             ?s ex:age ?a ; ex:name ?n FILTER (BOUND(?limit)) }",
        );
        assert_eq!(rows.len(), 3);
        store.close().expect("close");
    }

    #[test]
    fn select__values_joins_like_a_scan() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), DATA);
        let rows = select_rows(
            &store,
            "PREFIX ex: <http://e/> SELECT ?s ?n WHERE { \
             VALUES ?s { ex:a ex:b } ?s ex:name ?n }",
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], "<http://e/a>");
        assert_eq!(rows[1][0], "<http://e/b>");
        store.close().expect("close");
    }

    #[test]
    fn select__subquery_exposes_only_projection() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), DATA);
        let rows = select_rows(
            &store,
            "PREFIX ex: <http://e/> SELECT ?s ?n WHERE { \
             { SELECT ?s WHERE { ?s ex:age ?a FILTER (?a > 26) } } \
             ?s ex:name ?n }",
        );
        assert_eq!(rows.len(), 2, "only a and c survive the subquery");
        // ?a must not leak out of the subquery.
        let result = select(
            &store,
            "PREFIX ex: <http://e/> SELECT ?a WHERE { { SELECT ?s WHERE { ?s ex:age ?a } } }",
        );
        assert!(result.rows.iter().all(|row| row[0].is_none()));
        store.close().expect("close");
    }

    #[test]
    fn select__distinct_order_limit_offset() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), DATA);

        let result = select(
            &store,
            "PREFIX ex: <http://e/> SELECT ?a WHERE { ?s ex:age ?a } ORDER BY DESC(?a) LIMIT 2",
        );
        let ages: Vec<String> = result
            .rows
            .iter()
            .map(|r| r[0].clone().unwrap_or_default())
            .collect();
        assert_eq!(ages.len(), 2);
        assert!(ages[0].starts_with("\"35\""), "{ages:?}");
        assert!(ages[1].starts_with("\"30\""), "{ages:?}");

        let rows = select_rows(
            &store,
            "PREFIX ex: <http://e/> SELECT DISTINCT ?p WHERE { ?s ?p ?o }",
        );
        assert_eq!(rows.len(), 3, "name, knows, age");
        store.close().expect("close");
    }

    #[test]
    fn select__boundary_behaviours() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), DATA);

        // SELECT * with zero patterns: one empty binding row.
        let result = select(&store, "SELECT * WHERE { }");
        assert_eq!(result.rows.len(), 1);
        assert!(result.vars.is_empty());

        // LIMIT 0: none.
        let rows = select_rows(&store, "SELECT ?s WHERE { ?s ?p ?o } LIMIT 0");
        assert!(rows.is_empty());

        // OFFSET past the result size: none.
        let rows = select_rows(&store, "SELECT ?s WHERE { ?s ?p ?o } OFFSET 100");
        assert!(rows.is_empty());
        store.close().expect("close");
    }

    #[test]
    fn select__ask_answers() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), DATA);
        assert!(ask(
            &store,
            "PREFIX ex: <http://e/> ASK { ex:a ex:knows ex:b }"
        ));
        assert!(!ask(
            &store,
            "PREFIX ex: <http://e/> ASK { ex:b ex:knows ex:a }"
        ));
        store.close().expect("close");
    }

    #[test]
    fn select__timeout_fires() {
        use crate::exec::{ExecError, QueryEngine, QueryOptions};
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), DATA);
        let engine = QueryEngine::new(&store);
        let result = engine.query(
            "SELECT * WHERE { ?a ?b ?c . ?d ?e ?f . ?g ?h ?i }",
            QueryOptions {
                timeout: Some(std::time::Duration::ZERO),
                ..QueryOptions::default()
            },
        );
        assert!(matches!(result, Err(ExecError::Timeout)));
        store.close().expect("close");
    }

    #[test]
    fn select__cancellation_fires() {
        use crate::exec::{ExecError, QueryEngine, QueryOptions};
        use std::sync::Arc;
        use std::sync::atomic::AtomicBool;
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), DATA);
        let engine = QueryEngine::new(&store);
        let cancel = Arc::new(AtomicBool::new(true));
        let result = engine.query(
            "SELECT * WHERE { ?s ?p ?o }",
            QueryOptions {
                cancel: Some(cancel),
                ..QueryOptions::default()
            },
        );
        assert!(matches!(result, Err(ExecError::Cancelled)));
        store.close().expect("close");
    }
}
