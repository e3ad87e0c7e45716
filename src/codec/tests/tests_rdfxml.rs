//! RDF/XML tests: striped parsing, typed nodes, attribute objects, and
//! the grouping writer.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::codec::rdfxml::{RdfXmlParser, RdfXmlWriter};
    use crate::codec::tests::helpers::*;
    use crate::codec::Term;
    use crate::diag::DiagnosticBag;

    fn parse(input: &str) -> Vec<CanonQuad> {
        let mut quads = Vec::new();
        let mut bag = DiagnosticBag::new();
        RdfXmlParser::new()
            .parse(input.as_bytes(), &mut bag, collect(&mut quads))
            .unwrap_or_else(|e| panic!("parse failed: {e}\n{input}"));
        quads
    }

    #[test]
    fn rdfxml__descriptions_and_resources() {
        let quads = parse(
            r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns:ex="http://e/">
  <rdf:Description rdf:about="http://e/a">
    <ex:name>Alice</ex:name>
    <ex:knows rdf:resource="http://e/b"/>
  </rdf:Description>
</rdf:RDF>"#,
        );
        assert_eq!(quads.len(), 2);
        assert_eq!(
            quads[0],
            (
                "<http://e/a>".into(),
                "<http://e/name>".into(),
                "\"Alice\"".into(),
                None
            )
        );
        assert_eq!(quads[1].1, "<http://e/knows>");
        assert_eq!(quads[1].2, "<http://e/b>");
    }

    #[test]
    fn rdfxml__typed_node_element() {
        let quads = parse(
            r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns:ex="http://e/">
  <ex:Person rdf:about="http://e/a"><ex:age rdf:datatype="http://www.w3.org/2001/XMLSchema#integer">30</ex:age></ex:Person>
</rdf:RDF>"#,
        );
        assert_eq!(quads.len(), 2);
        assert_eq!(
            quads[0].1,
            "<http://www.w3.org/1999/02/22-rdf-syntax-ns#type>"
        );
        assert_eq!(quads[0].2, "<http://e/Person>");
        assert_eq!(
            quads[1].2,
            "\"30\"^^<http://www.w3.org/2001/XMLSchema#integer>"
        );
    }

    #[test]
    fn rdfxml__lang_inheritance_and_escapes() {
        let quads = parse(
            r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns:ex="http://e/" xml:lang="en">
  <rdf:Description rdf:about="http://e/a"><ex:label>a &amp; b &lt;c&gt;</ex:label><ex:native xml:lang="fr">chat</ex:native></rdf:Description>
</rdf:RDF>"#,
        );
        assert_eq!(quads.len(), 2);
        assert_eq!(quads[0].2, "\"a & b <c>\"@en", "root xml:lang inherits");
        assert_eq!(quads[1].2, "\"chat\"@fr", "closer xml:lang wins");
    }

    #[test]
    fn rdfxml__node_id_and_nested_nodes() {
        let quads = parse(
            r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns:ex="http://e/">
  <rdf:Description rdf:nodeID="n1"><ex:knows><rdf:Description rdf:about="http://e/b"><ex:name>B</ex:name></rdf:Description></ex:knows></rdf:Description>
</rdf:RDF>"#,
        );
        assert_eq!(quads.len(), 2);
        assert_eq!(quads[0], (
            "_:n1".into(),
            "<http://e/knows>".into(),
            "<http://e/b>".into(),
            None
        ));
        assert_eq!(quads[1].0, "<http://e/b>");
        assert_eq!(quads[1].2, "\"B\"");
    }

    #[test]
    fn rdfxml__property_attributes() {
        let quads = parse(
            r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns:ex="http://e/">
  <rdf:Description rdf:about="http://e/a" ex:name="Alice"/>
</rdf:RDF>"#,
        );
        assert_eq!(quads.len(), 1);
        assert_eq!(quads[0].1, "<http://e/name>");
        assert_eq!(quads[0].2, "\"Alice\"");
    }

    #[test]
    fn rdfxml__malformed_xml_is_an_error() {
        let mut quads = Vec::new();
        let mut bag = DiagnosticBag::new();
        let result = RdfXmlParser::new().parse(
            "<rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\"><broken"
                .as_bytes(),
            &mut bag,
            collect(&mut quads),
        );
        assert!(result.is_err());
    }

    #[test]
    fn rdfxml__writer_roundtrip() {
        let mut writer = RdfXmlWriter::new(Vec::new());
        writer
            .write_triple(
                &Term::iri("http://e/a"),
                &Term::iri("http://e/name"),
                &Term::literal("A & <B>"),
            )
            .expect("write");
        writer
            .write_triple(
                &Term::iri("http://e/a"),
                &Term::iri("http://e/knows"),
                &Term::iri("http://e/b"),
            )
            .expect("write");
        writer
            .write_triple(
                &Term::blank("n1"),
                &Term::iri("http://e/age"),
                &Term::typed("30", "http://www.w3.org/2001/XMLSchema#integer"),
            )
            .expect("write");
        let text = String::from_utf8(writer.finish().expect("finish")).expect("utf8");

        assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"), "{text}");
        assert!(text.contains("<rdf:RDF"), "{text}");
        assert!(text.contains("rdf:about=\"http://e/a\""), "{text}");
        assert!(text.contains("A &amp; &lt;B&gt;"), "{text}");

        let quads = parse(&text);
        assert_eq!(sorted(quads.clone()).len(), 3);
        assert!(quads.iter().any(|q| q.2 == "\"A & <B>\""));
        assert!(
            quads
                .iter()
                .any(|q| q.0 == "_:n1"
                    && q.2 == "\"30\"^^<http://www.w3.org/2001/XMLSchema#integer>")
        );
    }
}
