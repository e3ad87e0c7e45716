//! Cross-format round-trips: for any two formats sharing a graph
//! model, write → parse preserves the triple set.
//!
//! Fixtures use IRIs and literals only — blank node labels are not
//! required to survive serialization, so set equality over them would
//! overconstrain the writers.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::codec::jsonld::{JsonLdParser, JsonLdWriter};
    use crate::codec::ntriples::{NTriplesParser, NTriplesWriter};
    use crate::codec::nquads::{NQuadsParser, NQuadsWriter};
    use crate::codec::rdfxml::{RdfXmlParser, RdfXmlWriter};
    use crate::codec::tests::helpers::*;
    use crate::codec::trig::{TriGParser, TriGWriter};
    use crate::codec::turtle::{TurtleParser, TurtleWriter};
    use crate::codec::{Format, PrefixTable, Term};
    use crate::diag::DiagnosticBag;

    /// The reference triple set, in canonical form.
    fn fixture() -> Vec<CanonQuad> {
        sorted(vec![
            (
                "<http://e/a>".into(),
                "<http://www.w3.org/1999/02/22-rdf-syntax-ns#type>".into(),
                "<http://e/Person>".into(),
                None,
            ),
            (
                "<http://e/a>".into(),
                "<http://e/name>".into(),
                "\"Alice \\\"A\\\"\\n\"".into(),
                None,
            ),
            (
                "<http://e/a>".into(),
                "<http://e/age>".into(),
                "\"30\"^^<http://www.w3.org/2001/XMLSchema#integer>".into(),
                None,
            ),
            (
                "<http://e/a>".into(),
                "<http://e/label>".into(),
                "\"chatte\"@fr".into(),
                None,
            ),
            (
                "<http://e/b>".into(),
                "<http://e/knows>".into(),
                "<http://e/a>".into(),
                None,
            ),
        ])
    }

    /// Writes the fixture in `format` and parses it back.
    fn roundtrip(format: Format) -> Vec<CanonQuad> {
        let fixture_quads = fixture();
        let terms: Vec<(Term<'_>, Term<'_>, Term<'_>)> = fixture_quads
            .iter()
            .map(|(s, p, o, _)| {
                (
                    Term::from_canonical(s).expect("s"),
                    Term::from_canonical(p).expect("p"),
                    Term::from_canonical(o).expect("o"),
                )
            })
            .collect();

        let bytes: Vec<u8> = match format {
            Format::NTriples => {
                let mut w = NTriplesWriter::new(Vec::new());
                for (s, p, o) in &terms {
                    w.write_triple(s, p, o).expect("write");
                }
                w.finish().expect("finish")
            }
            Format::NQuads => {
                let mut w = NQuadsWriter::new(Vec::new());
                for (s, p, o) in &terms {
                    w.write_quad(s, p, o, None).expect("write");
                }
                w.finish().expect("finish")
            }
            Format::Turtle => {
                let mut prefixes = PrefixTable::new();
                prefixes.declare("ex", "http://e/");
                prefixes.declare("xsd", "http://www.w3.org/2001/XMLSchema#");
                let mut w = TurtleWriter::new(Vec::new(), prefixes);
                for (s, p, o) in &terms {
                    w.write_triple(s, p, o).expect("write");
                }
                w.finish().expect("finish")
            }
            Format::TriG => {
                let mut prefixes = PrefixTable::new();
                prefixes.declare("ex", "http://e/");
                let mut w = TriGWriter::new(Vec::new(), prefixes);
                for (s, p, o) in &terms {
                    w.write_quad(s, p, o, None).expect("write");
                }
                w.finish().expect("finish")
            }
            Format::RdfXml => {
                let mut w = RdfXmlWriter::new(Vec::new());
                for (s, p, o) in &terms {
                    w.write_triple(s, p, o).expect("write");
                }
                w.finish().expect("finish")
            }
            Format::JsonLd => {
                let mut w = JsonLdWriter::new(Vec::new());
                for (s, p, o) in &terms {
                    w.write_quad(s, p, o, None).expect("write");
                }
                w.finish().expect("finish")
            }
        };

        let mut quads = Vec::new();
        let mut bag = DiagnosticBag::new();
        let text = String::from_utf8(bytes).expect("utf8 output");
        match format {
            Format::NTriples => {
                NTriplesParser::new()
                    .parse(text.as_bytes(), &mut bag, collect(&mut quads))
                    .expect("reparse");
            }
            Format::NQuads => {
                NQuadsParser::new()
                    .parse(text.as_bytes(), &mut bag, collect(&mut quads))
                    .expect("reparse");
            }
            Format::Turtle => {
                TurtleParser::new()
                    .parse(text.as_bytes(), &mut bag, collect(&mut quads))
                    .expect("reparse");
            }
            Format::TriG => {
                TriGParser::new()
                    .parse(text.as_bytes(), &mut bag, collect(&mut quads))
                    .expect("reparse");
            }
            Format::RdfXml => {
                RdfXmlParser::new()
                    .parse(text.as_bytes(), &mut bag, collect(&mut quads))
                    .expect("reparse");
            }
            Format::JsonLd => {
                JsonLdParser::new()
                    .parse(text.as_bytes(), &mut bag, collect(&mut quads))
                    .expect("reparse");
            }
        }
        sorted(quads)
    }

    #[test]
    fn roundtrip__every_format_preserves_the_triple_set() {
        let reference = fixture();
        for format in [
            Format::NTriples,
            Format::NQuads,
            Format::Turtle,
            Format::TriG,
            Format::RdfXml,
            Format::JsonLd,
        ] {
            assert_eq!(
                roundtrip(format),
                reference,
                "write→parse in {format} must preserve the set"
            );
        }
    }

    #[test]
    fn roundtrip__cross_format_chains() {
        // parse(A) → write(B) → parse(B): the set survives any chain.
        // Start from Turtle source text.
        let ttl = r#"@prefix ex: <http://e/> .
ex:a a ex:Person ; ex:name "Alice" ; ex:age 30 .
ex:b ex:knows ex:a ."#;
        let mut start = Vec::new();
        let mut bag = DiagnosticBag::new();
        TurtleParser::new()
            .parse(ttl.as_bytes(), &mut bag, collect(&mut start))
            .expect("parse turtle");
        let start = sorted(start);

        // Turtle → N-Triples → JSON-LD → back.
        let mut nt = NTriplesWriter::new(Vec::new());
        for (s, p, o, _) in &start {
            nt.write_triple(
                &Term::from_canonical(s).expect("s"),
                &Term::from_canonical(p).expect("p"),
                &Term::from_canonical(o).expect("o"),
            )
            .expect("write");
        }
        let nt_text = String::from_utf8(nt.finish().expect("finish")).expect("utf8");

        let mut mid = Vec::new();
        NTriplesParser::new()
            .parse(nt_text.as_bytes(), &mut bag, collect(&mut mid))
            .expect("parse nt");

        let mut jl = JsonLdWriter::new(Vec::new());
        for (s, p, o, _) in &mid {
            jl.write_quad(
                &Term::from_canonical(s).expect("s"),
                &Term::from_canonical(p).expect("p"),
                &Term::from_canonical(o).expect("o"),
                None,
            )
            .expect("write");
        }
        let jl_text = String::from_utf8(jl.finish().expect("finish")).expect("utf8");

        let mut end = Vec::new();
        JsonLdParser::new()
            .parse(jl_text.as_bytes(), &mut bag, collect(&mut end))
            .expect("parse jsonld");

        assert_eq!(sorted(end), start);
    }
}
