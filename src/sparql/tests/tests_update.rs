//! Update grammar tests.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::diag::DiagnosticBag;
    use crate::sparql::ast::*;
    use crate::sparql::parse_update;

    fn parse(src: &str) -> Update {
        let mut bag = DiagnosticBag::new();
        parse_update(src, false, &mut bag)
            .unwrap_or_else(|e| panic!("parse failed: {e}\n{src}"))
    }

    #[test]
    fn update__insert_and_delete_data() {
        let u = parse(
            "PREFIX ex: <http://e/>\n\
             INSERT DATA { ex:a ex:p \"x\" . GRAPH ex:g { ex:b ex:q 5 } } ;\n\
             DELETE DATA { ex:a ex:p \"x\" }",
        );
        assert_eq!(u.operations.len(), 2);
        let UpdateOperation::InsertData(quads) = &u.operations[0] else {
            panic!("expected INSERT DATA");
        };
        assert_eq!(quads.len(), 2);
        assert_eq!(quads[0].g, None);
        assert_eq!(quads[1].g, Some(TermPat::Iri("http://e/g".into())));
        assert!(matches!(&u.operations[1], UpdateOperation::DeleteData(q) if q.len() == 1));
    }

    #[test]
    fn update__data_blocks_reject_variables() {
        let mut bag = DiagnosticBag::new();
        assert!(
            parse_update(
                "INSERT DATA { ?s <http://e/p> \"x\" }",
                false,
                &mut bag
            )
            .is_err()
        );
    }

    #[test]
    fn update__delete_where() {
        let u = parse("DELETE WHERE { ?s <http://e/old> ?o }");
        let UpdateOperation::DeleteWhere(quads) = &u.operations[0] else {
            panic!("expected DELETE WHERE");
        };
        assert_eq!(quads.len(), 1);
        assert!(matches!(quads[0].s, TermPat::Var(_)));
    }

    #[test]
    fn update__modify_with_where() {
        let u = parse(
            "PREFIX ex: <http://e/>\n\
             WITH ex:g DELETE { ?s ex:old ?o } INSERT { ?s ex:new ?o } WHERE { ?s ex:old ?o }",
        );
        let UpdateOperation::Modify {
            with,
            delete,
            insert,
            pattern,
        } = &u.operations[0]
        else {
            panic!("expected modify");
        };
        assert_eq!(with.as_deref(), Some("http://e/g"));
        assert_eq!(delete.len(), 1);
        assert_eq!(insert.len(), 1);
        assert!(!pattern.elements.is_empty());
    }

    #[test]
    fn update__insert_where_without_delete() {
        let u = parse("INSERT { ?s <http://e/copy> ?o } WHERE { ?s <http://e/p> ?o }");
        let UpdateOperation::Modify { delete, insert, .. } = &u.operations[0] else {
            panic!("expected modify");
        };
        assert!(delete.is_empty());
        assert_eq!(insert.len(), 1);
    }

    #[test]
    fn update__load_clear_create_drop() {
        let u = parse(
            "LOAD SILENT <http://remote/data.ttl> INTO GRAPH <http://e/g> ;\n\
             CLEAR DEFAULT ;\n\
             CLEAR SILENT GRAPH <http://e/g> ;\n\
             CREATE GRAPH <http://e/new> ;\n\
             DROP NAMED ;\n\
             DROP ALL",
        );
        assert_eq!(u.operations.len(), 6);
        assert!(matches!(
            &u.operations[0],
            UpdateOperation::Load {
                silent: true,
                graph: Some(_),
                ..
            }
        ));
        assert!(matches!(
            &u.operations[1],
            UpdateOperation::Clear {
                target: GraphTarget::Default,
                ..
            }
        ));
        assert!(matches!(
            &u.operations[2],
            UpdateOperation::Clear {
                silent: true,
                target: GraphTarget::Named(_),
            }
        ));
        assert!(matches!(&u.operations[3], UpdateOperation::Create { .. }));
        assert!(matches!(
            &u.operations[4],
            UpdateOperation::Drop {
                target: GraphTarget::AllNamed,
                ..
            }
        ));
        assert!(matches!(
            &u.operations[5],
            UpdateOperation::Drop {
                target: GraphTarget::All,
                ..
            }
        ));
    }

    #[test]
    fn update__copy_move_add() {
        let u = parse(
            "COPY DEFAULT TO GRAPH <http://e/g> ;\n\
             MOVE GRAPH <http://e/g> TO DEFAULT ;\n\
             ADD SILENT <http://e/a> TO <http://e/b>",
        );
        assert!(matches!(
            &u.operations[0],
            UpdateOperation::Copy {
                from: GraphRef::Default,
                to: GraphRef::Named(_),
                ..
            }
        ));
        assert!(matches!(
            &u.operations[1],
            UpdateOperation::Move {
                from: GraphRef::Named(_),
                to: GraphRef::Default,
                ..
            }
        ));
        assert!(matches!(
            &u.operations[2],
            UpdateOperation::Add { silent: true, .. }
        ));
    }
}
