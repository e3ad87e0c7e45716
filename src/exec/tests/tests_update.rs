//! Update engine tests: data blocks, pattern-driven modify, graph
//! management, and LOAD.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use std::sync::Arc;

    use crate::exec::tests::helpers::*;
    use crate::exec::{ExecError, QueryEngine, QueryOptions};
    use tempfile::TempDir;

    #[test]
    fn update__insert_then_delete_data() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), "");

        update(
            &store,
            "PREFIX ex: <http://e/> INSERT DATA { ex:a ex:p \"x\" . ex:b ex:p \"y\" }",
        );
        assert_eq!(select_rows(&store, "SELECT ?s WHERE { ?s ?p ?o }").len(), 2);

        update(
            &store,
            "PREFIX ex: <http://e/> DELETE DATA { ex:a ex:p \"x\" }",
        );
        let rows = select_rows(&store, "SELECT ?s WHERE { ?s ?p ?o }");
        assert_eq!(rows, vec![vec!["<http://e/b>".to_string()]]);
        store.close().expect("close");
    }

    #[test]
    fn update__insert_data_into_named_graph() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), "");
        update(
            &store,
            "PREFIX ex: <http://e/> INSERT DATA { GRAPH ex:g { ex:a ex:p \"x\" } }",
        );
        assert!(select_rows(&store, "SELECT ?s WHERE { ?s ?p ?o }").is_empty());
        let rows = select_rows(
            &store,
            "SELECT ?s WHERE { GRAPH <http://e/g> { ?s ?p ?o } }",
        );
        assert_eq!(rows.len(), 1);
        store.close().expect("close");
    }

    #[test]
    fn update__delete_where() {
        let dir = TempDir::new().unwrap();
        let store = store_with(
            dir.path(),
            r#"@prefix ex: <http://e/> .
ex:a ex:status "old" . ex:b ex:status "old" . ex:c ex:status "new" ."#,
        );
        update(
            &store,
            "PREFIX ex: <http://e/> DELETE WHERE { ?s ex:status \"old\" }",
        );
        let rows = select_rows(&store, "SELECT ?s WHERE { ?s ?p ?o }");
        assert_eq!(rows, vec![vec!["<http://e/c>".to_string()]]);
        store.close().expect("close");
    }

    #[test]
    fn update__modify_rewrites_matching_rows() {
        let dir = TempDir::new().unwrap();
        let store = store_with(
            dir.path(),
            r#"@prefix ex: <http://e/> .
ex:a ex:age 30 . ex:b ex:age 25 ."#,
        );
        update(
            &store,
            "PREFIX ex: <http://e/> \
             DELETE { ?s ex:age ?a } INSERT { ?s ex:years ?a } WHERE { ?s ex:age ?a }",
        );
        assert!(
            select_rows(&store, "PREFIX ex: <http://e/> SELECT ?s WHERE { ?s ex:age ?a }")
                .is_empty()
        );
        assert_eq!(
            select_rows(
                &store,
                "PREFIX ex: <http://e/> SELECT ?s WHERE { ?s ex:years ?a }"
            )
            .len(),
            2
        );
        store.close().expect("close");
    }

    #[test]
    fn update__clear_and_drop_targets() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), "");
        update(
            &store,
            "PREFIX ex: <http://e/> INSERT DATA { \
             ex:a ex:p \"default\" . \
             GRAPH ex:g1 { ex:b ex:p \"one\" } \
             GRAPH ex:g2 { ex:c ex:p \"two\" } }",
        );

        update(&store, "PREFIX ex: <http://e/> CLEAR GRAPH ex:g1");
        assert!(
            select_rows(&store, "SELECT ?s WHERE { GRAPH <http://e/g1> { ?s ?p ?o } }")
                .is_empty()
        );
        assert_eq!(
            select_rows(&store, "SELECT ?g WHERE { GRAPH ?g { ?s ?p ?o } }").len(),
            1
        );

        update(&store, "DROP ALL");
        assert!(select_rows(&store, "SELECT ?s WHERE { ?s ?p ?o }").is_empty());
        assert!(
            select_rows(&store, "SELECT ?g WHERE { GRAPH ?g { ?s ?p ?o } }").is_empty()
        );
        store.close().expect("close");
    }

    #[test]
    fn update__copy_move_add() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), "");
        update(
            &store,
            "PREFIX ex: <http://e/> INSERT DATA { \
             ex:a ex:p \"default\" . GRAPH ex:g { ex:b ex:p \"named\" } }",
        );

        // COPY replaces the target with the source.
        update(&store, "PREFIX ex: <http://e/> COPY DEFAULT TO GRAPH ex:g");
        let rows = select_rows(
            &store,
            "SELECT ?o WHERE { GRAPH <http://e/g> { ?s ?p ?o } }",
        );
        assert_eq!(rows, vec![vec!["\"default\"".to_string()]]);

        // ADD merges without clearing.
        update(
            &store,
            "PREFIX ex: <http://e/> INSERT DATA { GRAPH ex:h { ex:c ex:p \"extra\" } }",
        );
        update(&store, "PREFIX ex: <http://e/> ADD GRAPH ex:h TO GRAPH ex:g");
        assert_eq!(
            select_rows(&store, "SELECT ?o WHERE { GRAPH <http://e/g> { ?s ?p ?o } }").len(),
            2
        );

        // MOVE clears the source.
        update(&store, "PREFIX ex: <http://e/> MOVE GRAPH ex:g TO GRAPH ex:dest");
        assert!(
            select_rows(&store, "SELECT ?o WHERE { GRAPH <http://e/g> { ?s ?p ?o } }")
                .is_empty()
        );
        assert_eq!(
            select_rows(
                &store,
                "SELECT ?o WHERE { GRAPH <http://e/dest> { ?s ?p ?o } }"
            )
            .len(),
            2
        );
        store.close().expect("close");
    }

    #[test]
    fn update__load_negotiates_format() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), "");
        let loader = Arc::new(MockLoader {
            body: br#"<http://e/a> <http://e/p> "loaded" ."#.to_vec(),
            media_type: Some("application/n-triples".into()),
        });
        let engine = QueryEngine::new(&store).with_loader(loader);
        engine
            .update(
                "LOAD <http://remote/data.nt> INTO GRAPH <http://e/g>",
                QueryOptions::default(),
            )
            .expect("load");

        let rows = select_rows(
            &store,
            "SELECT ?o WHERE { GRAPH <http://e/g> { ?s ?p ?o } }",
        );
        assert_eq!(rows, vec![vec!["\"loaded\"".to_string()]]);
        store.close().expect("close");
    }

    #[test]
    fn update__load_silent_swallows_failures() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), "");
        let engine = QueryEngine::new(&store);

        // No loader wired in: LOAD fails, LOAD SILENT does not.
        assert!(matches!(
            engine.update("LOAD <http://x/data.ttl>", QueryOptions::default()),
            Err(ExecError::Load(_))
        ));
        engine
            .update("LOAD SILENT <http://x/data.ttl>", QueryOptions::default())
            .expect("SILENT load");
        store.close().expect("close");
    }
}
