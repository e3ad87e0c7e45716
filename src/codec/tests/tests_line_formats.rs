//! N-Triples / N-Quads tests: strict parsing, lenient skipping, and
//! writer output.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::codec::ntriples::{NTriplesParser, NTriplesWriter};
    use crate::codec::nquads::{NQuadsParser, NQuadsWriter};
    use crate::codec::tests::helpers::*;
    use crate::codec::{CodecError, Term};
    use crate::diag::DiagnosticBag;

    const NT: &str = r#"<http://e/a> <http://e/p> <http://e/b> .
<http://e/a> <http://e/p> "hello" .
# a comment

<http://e/a> <http://e/p> "bonjour"@fr .
<http://e/a> <http://e/n> "5"^^<http://www.w3.org/2001/XMLSchema#integer> .
_:b0 <http://e/p> "escaped \"x\"\n" .
"#;

    #[test]
    fn ntriples__parse_all_term_shapes() {
        let mut quads = Vec::new();
        let mut bag = DiagnosticBag::new();
        let stats = NTriplesParser::new()
            .parse(NT.as_bytes(), &mut bag, collect(&mut quads))
            .expect("parse");

        assert_eq!(stats.statements, 5);
        assert!(bag.is_empty());
        assert_eq!(quads[0].0, "<http://e/a>");
        assert_eq!(quads[1].2, "\"hello\"");
        assert_eq!(quads[2].2, "\"bonjour\"@fr");
        assert_eq!(
            quads[3].2,
            "\"5\"^^<http://www.w3.org/2001/XMLSchema#integer>"
        );
        assert_eq!(quads[4].0, "_:b0");
        assert_eq!(quads[4].2, "\"escaped \\\"x\\\"\\n\"");
        assert!(quads.iter().all(|q| q.3.is_none()));
    }

    #[test]
    fn ntriples__strict_mode_stops_at_first_error() {
        let input = "<http://e/a> <http://e/p> <http://e/b> .\nnot a triple\n";
        let mut quads = Vec::new();
        let mut bag = DiagnosticBag::new();
        let err = NTriplesParser::new()
            .parse(input.as_bytes(), &mut bag, collect(&mut quads))
            .unwrap_err();

        assert!(matches!(err, CodecError::Syntax { line: 2, .. }));
        assert_eq!(quads.len(), 1);
        assert_eq!(bag.len(), 1, "the error is also reported to the bag");
    }

    #[test]
    fn ntriples__lenient_mode_skips_bad_lines() {
        let input = "<http://e/a> <http://e/p> <http://e/b> .\nbroken line\n<http://e/c> <http://e/p> <http://e/d> .\n";
        let mut quads = Vec::new();
        let mut bag = DiagnosticBag::new();
        let stats = NTriplesParser::new()
            .lenient()
            .parse(input.as_bytes(), &mut bag, collect(&mut quads))
            .expect("lenient parse");

        assert_eq!(stats.statements, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(quads.len(), 2);
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn ntriples__relative_iri_rejected() {
        let input = "<relative> <http://e/p> <http://e/b> .\n";
        let mut quads = Vec::new();
        let mut bag = DiagnosticBag::new();
        assert!(
            NTriplesParser::new()
                .parse(input.as_bytes(), &mut bag, collect(&mut quads))
                .is_err()
        );
    }

    #[test]
    fn ntriples__literal_subject_rejected() {
        let input = "\"lit\" <http://e/p> <http://e/b> .\n";
        let mut quads = Vec::new();
        let mut bag = DiagnosticBag::new();
        assert!(
            NTriplesParser::new()
                .parse(input.as_bytes(), &mut bag, collect(&mut quads))
                .is_err()
        );
    }

    #[test]
    fn ntriples__writer_roundtrip() {
        let mut writer = NTriplesWriter::new(Vec::new());
        writer
            .write_triple(
                &Term::iri("http://e/a"),
                &Term::iri("http://e/p"),
                &Term::literal("multi\nline"),
            )
            .expect("write");
        writer
            .write_triple(
                &Term::blank("b0"),
                &Term::iri("http://e/p"),
                &Term::iri("http://e/b"),
            )
            .expect("write");
        let bytes = writer.finish().expect("finish");
        let text = String::from_utf8(bytes).expect("utf8");

        assert_eq!(
            text,
            "<http://e/a> <http://e/p> \"multi\\nline\" .\n_:b0 <http://e/p> <http://e/b> .\n"
        );

        // And it parses back to the same statements.
        let mut quads = Vec::new();
        let mut bag = DiagnosticBag::new();
        let stats = NTriplesParser::new()
            .parse(text.as_bytes(), &mut bag, collect(&mut quads))
            .expect("reparse");
        assert_eq!(stats.statements, 2);
        assert_eq!(quads[0].2, "\"multi\\nline\"");
    }

    #[test]
    fn nquads__graph_term_is_optional() {
        let input = "<http://e/a> <http://e/p> <http://e/b> <http://e/g> .\n<http://e/a> <http://e/p> \"x\" .\n";
        let mut quads = Vec::new();
        let mut bag = DiagnosticBag::new();
        let stats = NQuadsParser::new()
            .parse(input.as_bytes(), &mut bag, collect(&mut quads))
            .expect("parse");

        assert_eq!(stats.statements, 2);
        assert_eq!(quads[0].3.as_deref(), Some("<http://e/g>"));
        assert_eq!(quads[1].3, None);
    }

    #[test]
    fn nquads__literal_graph_rejected() {
        let input = "<http://e/a> <http://e/p> <http://e/b> \"g\" .\n";
        let mut quads = Vec::new();
        let mut bag = DiagnosticBag::new();
        assert!(
            NQuadsParser::new()
                .parse(input.as_bytes(), &mut bag, collect(&mut quads))
                .is_err()
        );
    }

    #[test]
    fn nquads__writer_roundtrip() {
        let mut writer = NQuadsWriter::new(Vec::new());
        writer
            .write_quad(
                &Term::iri("http://e/a"),
                &Term::iri("http://e/p"),
                &Term::lang_literal("x", "en"),
                Some(&Term::iri("http://e/g")),
            )
            .expect("write");
        writer
            .write_quad(
                &Term::iri("http://e/a"),
                &Term::iri("http://e/p"),
                &Term::literal("y"),
                None,
            )
            .expect("write");
        let text = String::from_utf8(writer.finish().expect("finish")).expect("utf8");

        let mut quads = Vec::new();
        let mut bag = DiagnosticBag::new();
        NQuadsParser::new()
            .parse(text.as_bytes(), &mut bag, collect(&mut quads))
            .expect("reparse");
        assert_eq!(quads.len(), 2);
        assert_eq!(quads[0].2, "\"x\"@en");
        assert_eq!(quads[0].3.as_deref(), Some("<http://e/g>"));
        assert_eq!(quads[1].3, None);
    }
}
