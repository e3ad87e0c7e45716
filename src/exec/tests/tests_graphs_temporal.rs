//! GRAPH scoping and the temporal query extension.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::exec::tests::helpers::*;
    use crate::exec::{ExecError, QueryEngine, QueryOptions};
    use crate::model::TIME_MAX;
    use tempfile::TempDir;

    fn iri(name: &str) -> Vec<u8> {
        format!("<http://e/{name}>").into_bytes()
    }

    #[test]
    fn graphs__fixed_graph_scopes_patterns() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), "");
        store.add(&iri("a"), &iri("p"), b"\"default\"", None).expect("add");
        store
            .add(&iri("a"), &iri("p"), b"\"one\"", Some(&iri("g1")))
            .expect("add");
        store
            .add(&iri("b"), &iri("p"), b"\"two\"", Some(&iri("g2")))
            .expect("add");

        // Default graph only.
        let rows = select_rows(&store, "SELECT ?o WHERE { ?s ?p ?o }");
        assert_eq!(rows, vec![vec!["\"default\"".to_string()]]);

        // A fixed named graph.
        let rows = select_rows(
            &store,
            "SELECT ?o WHERE { GRAPH <http://e/g1> { ?s ?p ?o } }",
        );
        assert_eq!(rows, vec![vec!["\"one\"".to_string()]]);
        store.close().expect("close");
    }

    #[test]
    fn graphs__variable_graph_enumerates() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), "");
        store
            .add(&iri("a"), &iri("p"), b"\"one\"", Some(&iri("g1")))
            .expect("add");
        store
            .add(&iri("b"), &iri("p"), b"\"two\"", Some(&iri("g2")))
            .expect("add");

        let rows = select_rows(&store, "SELECT ?g ?o WHERE { GRAPH ?g { ?s ?p ?o } }");
        assert_eq!(
            rows,
            vec![
                vec!["<http://e/g1>".to_string(), "\"one\"".to_string()],
                vec!["<http://e/g2>".to_string(), "\"two\"".to_string()],
            ]
        );
        store.close().expect("close");
    }

    #[test]
    fn graphs__from_named_restricts_enumeration() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), "");
        store
            .add(&iri("a"), &iri("p"), b"\"one\"", Some(&iri("g1")))
            .expect("add");
        store
            .add(&iri("b"), &iri("p"), b"\"two\"", Some(&iri("g2")))
            .expect("add");

        let rows = select_rows(
            &store,
            "SELECT ?g FROM NAMED <http://e/g2> WHERE { GRAPH ?g { ?s ?p ?o } }",
        );
        assert_eq!(rows, vec![vec!["<http://e/g2>".to_string()]]);
        store.close().expect("close");
    }

    #[test]
    fn graphs__from_merges_into_default() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), "");
        store.add(&iri("a"), &iri("p"), b"\"default\"", None).expect("add");
        store
            .add(&iri("b"), &iri("p"), b"\"one\"", Some(&iri("g1")))
            .expect("add");

        let rows = select_rows(
            &store,
            "SELECT ?o FROM <http://e/g1> WHERE { ?s ?p ?o }",
        );
        assert_eq!(
            rows,
            vec![vec!["\"one\"".to_string()]],
            "FROM replaces the queried default graph"
        );
        store.close().expect("close");
    }

    #[test]
    fn temporal__as_of_travels_valid_time() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), "");
        store
            .add_with_validity(&iri("job"), &iri("holder"), &iri("alice"), None, 100, 200)
            .expect("add");
        store
            .add_with_validity(&iri("job"), &iri("holder"), &iri("bob"), None, 200, TIME_MAX)
            .expect("add");

        let rows = select_rows(
            &store,
            "SELECT ?who WHERE { <http://e/job> <http://e/holder> ?who } AS OF 150",
        );
        assert_eq!(rows, vec![vec!["<http://e/alice>".to_string()]]);

        let rows = select_rows(
            &store,
            "SELECT ?who WHERE { <http://e/job> <http://e/holder> ?who } AS OF 250",
        );
        assert_eq!(rows, vec![vec!["<http://e/bob>".to_string()]]);

        // Current: only the open-ended interval.
        let rows = select_rows(
            &store,
            "SELECT ?who WHERE { <http://e/job> <http://e/holder> ?who }",
        );
        assert_eq!(rows, vec![vec!["<http://e/bob>".to_string()]]);
        store.close().expect("close");
    }

    #[test]
    fn temporal__during_and_all_versions() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), "");
        store
            .add_with_validity(&iri("job"), &iri("holder"), &iri("alice"), None, 100, 200)
            .expect("add");
        store
            .add_with_validity(&iri("job"), &iri("holder"), &iri("bob"), None, 200, TIME_MAX)
            .expect("add");

        let rows = select_rows(
            &store,
            "SELECT ?who WHERE { ?s ?p ?who } DURING 150 250",
        );
        assert_eq!(rows.len(), 2, "the handover straddles the window");

        let rows = select_rows(&store, "SELECT ?who WHERE { ?s ?p ?who } ALL VERSIONS");
        assert_eq!(rows.len(), 2);
        store.close().expect("close");
    }

    #[test]
    fn temporal__rejected_in_strict_mode() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), "");
        let engine = QueryEngine::new(&store);
        let result = engine.query(
            "SELECT * WHERE { ?s ?p ?o } AS OF 100",
            QueryOptions {
                strict: true,
                ..QueryOptions::default()
            },
        );
        assert!(matches!(result, Err(ExecError::Sparql(_))));
        store.close().expect("close");
    }
}
