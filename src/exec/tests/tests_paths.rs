//! Property path tests: inverse, sequence, alternative, closures, and
//! negated sets.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::exec::tests::helpers::*;
    use tempfile::TempDir;

    /// A little org chart: a→b→c→d reporting chain plus one label.
    const DATA: &str = r#"
@prefix ex: <http://e/> .
ex:a ex:reportsTo ex:b .
ex:b ex:reportsTo ex:c .
ex:c ex:reportsTo ex:d .
ex:a ex:label "leaf" .
ex:d ex:label "root" .
"#;

    #[test]
    fn paths__inverse() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), DATA);
        let rows = select_rows(
            &store,
            "PREFIX ex: <http://e/> SELECT ?boss WHERE { ?boss ^ex:reportsTo ex:c }",
        );
        // ^reportsTo from the object side: who does c manage? b.
        assert_eq!(rows, vec![vec!["<http://e/b>".to_string()]]);
        store.close().expect("close");
    }

    #[test]
    fn paths__sequence() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), DATA);
        let rows = select_rows(
            &store,
            "PREFIX ex: <http://e/> SELECT ?x WHERE { ex:a ex:reportsTo/ex:reportsTo ?x }",
        );
        assert_eq!(rows, vec![vec!["<http://e/c>".to_string()]]);
        store.close().expect("close");
    }

    #[test]
    fn paths__alternative() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), DATA);
        let rows = select_rows(
            &store,
            "PREFIX ex: <http://e/> SELECT ?o WHERE { ex:a ex:reportsTo|ex:label ?o }",
        );
        assert_eq!(rows.len(), 2);
        store.close().expect("close");
    }

    #[test]
    fn paths__one_or_more() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), DATA);
        let rows = select_rows(
            &store,
            "PREFIX ex: <http://e/> SELECT ?x WHERE { ex:a ex:reportsTo+ ?x }",
        );
        assert_eq!(
            rows,
            vec![
                vec!["<http://e/b>".to_string()],
                vec!["<http://e/c>".to_string()],
                vec!["<http://e/d>".to_string()],
            ]
        );
        store.close().expect("close");
    }

    #[test]
    fn paths__zero_or_more_includes_self() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), DATA);
        let rows = select_rows(
            &store,
            "PREFIX ex: <http://e/> SELECT ?x WHERE { ex:b ex:reportsTo* ?x }",
        );
        assert_eq!(
            rows,
            vec![
                vec!["<http://e/b>".to_string()],
                vec!["<http://e/c>".to_string()],
                vec!["<http://e/d>".to_string()],
            ]
        );
        store.close().expect("close");
    }

    #[test]
    fn paths__zero_or_one() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), DATA);
        let rows = select_rows(
            &store,
            "PREFIX ex: <http://e/> SELECT ?x WHERE { ex:a ex:reportsTo? ?x }",
        );
        assert_eq!(
            rows,
            vec![
                vec!["<http://e/a>".to_string()],
                vec!["<http://e/b>".to_string()],
            ]
        );
        store.close().expect("close");
    }

    #[test]
    fn paths__cycle_terminates() {
        let dir = TempDir::new().unwrap();
        let store = store_with(
            dir.path(),
            r#"@prefix ex: <http://e/> .
ex:x ex:next ex:y . ex:y ex:next ex:z . ex:z ex:next ex:x ."#,
        );
        let rows = select_rows(
            &store,
            "PREFIX ex: <http://e/> SELECT ?n WHERE { ex:x ex:next+ ?n }",
        );
        // The fixed point over a cycle reaches every node exactly once,
        // x itself included (x → y → z → x).
        assert_eq!(rows.len(), 3);
        store.close().expect("close");
    }

    #[test]
    fn paths__negated_property_set() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), DATA);
        let rows = select_rows(
            &store,
            "PREFIX ex: <http://e/> SELECT ?o WHERE { ex:a !(ex:reportsTo) ?o }",
        );
        assert_eq!(rows, vec![vec!["\"leaf\"".to_string()]]);
        store.close().expect("close");
    }

    #[test]
    fn paths__grouped_closure() {
        let dir = TempDir::new().unwrap();
        let store = store_with(dir.path(), DATA);
        let rows = select_rows(
            &store,
            "PREFIX ex: <http://e/> SELECT ?x WHERE { ex:a (ex:reportsTo/ex:reportsTo)+ ?x }",
        );
        // Two hops at a time: a → c (one application); c → … needs two
        // more hops but only one edge remains.
        assert_eq!(rows, vec![vec!["<http://e/c>".to_string()]]);
        store.close().expect("close");
    }
}
