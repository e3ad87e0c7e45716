//! Result serialization — the W3C answer formats.
//!
//! SELECT results go out as SPARQL Results JSON (the default), CSV,
//! TSV, or XML; ASK as boolean JSON/XML or plain text;
//! CONSTRUCT/DESCRIBE triples through any codec writer.

use quick_xml::escape::escape;
use serde_json::{Map, Value, json};

use crate::codec::{
    self, CodecError, Format, PrefixTable, Term, XSD_STRING,
};

use super::{EmittedTriple, SelectResult};

// ------------------------------------------------------------------------------------------------
// SELECT
// ------------------------------------------------------------------------------------------------

/// One canonical term as a results-JSON cell object.
fn json_cell(canon: &str) -> Value {
    match Term::from_canonical(canon) {
        Ok(Term::Iri(iri)) => json!({ "type": "uri", "value": iri }),
        Ok(Term::Blank(label)) => json!({ "type": "bnode", "value": label }),
        Ok(Term::Literal {
            lexical,
            lang,
            datatype,
        }) => {
            let mut cell = Map::new();
            cell.insert("type".into(), Value::String("literal".into()));
            cell.insert("value".into(), Value::String(lexical.into_owned()));
            if let Some(lang) = lang {
                cell.insert("xml:lang".into(), Value::String(lang.into_owned()));
            } else if let Some(dt) = datatype
                && dt != XSD_STRING
            {
                cell.insert("datatype".into(), Value::String(dt.into_owned()));
            }
            Value::Object(cell)
        }
        Err(_) => json!({ "type": "literal", "value": canon }),
    }
}

/// SPARQL Results JSON.
pub fn select_to_json(result: &SelectResult) -> Value {
    let bindings: Vec<Value> = result
        .rows
        .iter()
        .map(|row| {
            let mut map = Map::new();
            for (var, cell) in result.vars.iter().zip(row) {
                if let Some(canon) = cell {
                    map.insert(var.clone(), json_cell(canon));
                }
            }
            Value::Object(map)
        })
        .collect();
    json!({
        "head": { "vars": result.vars },
        "results": { "bindings": bindings },
    })
}

/// SPARQL Results CSV: header row, plain values, RFC 4180 quoting.
pub fn select_to_csv(result: &SelectResult) -> String {
    let mut out = String::new();
    out.push_str(&result.vars.join(","));
    out.push_str("\r\n");
    for row in &result.rows {
        let cells: Vec<String> = row
            .iter()
            .map(|cell| match cell {
                None => String::new(),
                Some(canon) => csv_escape(&plain_value(canon)),
            })
            .collect();
        out.push_str(&cells.join(","));
        out.push_str("\r\n");
    }
    out
}

/// SPARQL Results TSV: header with `?`-prefixed names, terms in
/// their syntax form.
pub fn select_to_tsv(result: &SelectResult) -> String {
    let mut out = String::new();
    let header: Vec<String> = result.vars.iter().map(|v| format!("?{v}")).collect();
    out.push_str(&header.join("\t"));
    out.push('\n');
    for row in &result.rows {
        let cells: Vec<&str> = row
            .iter()
            .map(|cell| cell.as_deref().unwrap_or(""))
            .collect();
        out.push_str(&cells.join("\t"));
        out.push('\n');
    }
    out
}

/// SPARQL Results XML.
pub fn select_to_xml(result: &SelectResult) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\"?>\n");
    out.push_str("<sparql xmlns=\"http://www.w3.org/2005/sparql-results#\">\n");
    out.push_str("  <head>\n");
    for var in &result.vars {
        out.push_str(&format!("    <variable name=\"{}\"/>\n", escape(var.as_str())));
    }
    out.push_str("  </head>\n  <results>\n");
    for row in &result.rows {
        out.push_str("    <result>\n");
        for (var, cell) in result.vars.iter().zip(row) {
            let Some(canon) = cell else { continue };
            out.push_str(&format!(
                "      <binding name=\"{}\">",
                escape(var.as_str())
            ));
            match Term::from_canonical(canon) {
                Ok(Term::Iri(iri)) => {
                    out.push_str(&format!("<uri>{}</uri>", escape(iri.as_ref())));
                }
                Ok(Term::Blank(label)) => {
                    out.push_str(&format!("<bnode>{}</bnode>", escape(label.as_ref())));
                }
                Ok(Term::Literal {
                    lexical,
                    lang,
                    datatype,
                }) => {
                    let mut attrs = String::new();
                    if let Some(lang) = &lang {
                        attrs.push_str(&format!(" xml:lang=\"{}\"", escape(lang.as_ref())));
                    } else if let Some(dt) = &datatype
                        && dt != XSD_STRING
                    {
                        attrs.push_str(&format!(" datatype=\"{}\"", escape(dt.as_ref())));
                    }
                    out.push_str(&format!(
                        "<literal{attrs}>{}</literal>",
                        escape(lexical.as_ref())
                    ));
                }
                Err(_) => {
                    out.push_str(&format!("<literal>{}</literal>", escape(canon)));
                }
            }
            out.push_str("</binding>\n");
        }
        out.push_str("    </result>\n");
    }
    out.push_str("  </results>\n</sparql>\n");
    out
}

fn plain_value(canon: &str) -> String {
    match Term::from_canonical(canon) {
        Ok(Term::Iri(iri)) => iri.into_owned(),
        Ok(Term::Blank(label)) => format!("_:{label}"),
        Ok(Term::Literal { lexical, .. }) => lexical.into_owned(),
        Err(_) => canon.to_string(),
    }
}

fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

// ------------------------------------------------------------------------------------------------
// ASK
// ------------------------------------------------------------------------------------------------

/// ASK as boolean results JSON.
pub fn ask_to_json(answer: bool) -> Value {
    json!({ "head": {}, "boolean": answer })
}

/// ASK as boolean results XML.
pub fn ask_to_xml(answer: bool) -> String {
    format!(
        "<?xml version=\"1.0\"?>\n<sparql xmlns=\"http://www.w3.org/2005/sparql-results#\">\n  <head/>\n  <boolean>{answer}</boolean>\n</sparql>\n"
    )
}

/// ASK as plain `true` / `false`.
pub fn ask_to_plain(answer: bool) -> &'static str {
    if answer { "true" } else { "false" }
}

// ------------------------------------------------------------------------------------------------
// CONSTRUCT / DESCRIBE
// ------------------------------------------------------------------------------------------------

/// Serializes emitted triples through any codec writer.
pub fn graph_to_format(
    triples: &[EmittedTriple],
    format: Format,
    prefixes: PrefixTable,
) -> Result<Vec<u8>, CodecError> {
    let terms: Vec<(Term<'_>, Term<'_>, Term<'_>)> = triples
        .iter()
        .map(|[s, p, o]| {
            Ok((
                Term::from_canonical(s)?,
                Term::from_canonical(p)?,
                Term::from_canonical(o)?,
            ))
        })
        .collect::<Result<_, CodecError>>()?;

    match format {
        Format::NTriples => {
            let mut w = codec::ntriples::NTriplesWriter::new(Vec::new());
            for (s, p, o) in &terms {
                w.write_triple(s, p, o)?;
            }
            w.finish()
        }
        Format::NQuads => {
            let mut w = codec::nquads::NQuadsWriter::new(Vec::new());
            for (s, p, o) in &terms {
                w.write_quad(s, p, o, None)?;
            }
            w.finish()
        }
        Format::Turtle => {
            let mut w = codec::turtle::TurtleWriter::new(Vec::new(), prefixes);
            for (s, p, o) in &terms {
                w.write_triple(s, p, o)?;
            }
            w.finish()
        }
        Format::TriG => {
            let mut w = codec::trig::TriGWriter::new(Vec::new(), prefixes);
            for (s, p, o) in &terms {
                w.write_quad(s, p, o, None)?;
            }
            w.finish()
        }
        Format::RdfXml => {
            let mut w = codec::rdfxml::RdfXmlWriter::new(Vec::new());
            for (s, p, o) in &terms {
                w.write_triple(s, p, o)?;
            }
            w.finish()
        }
        Format::JsonLd => {
            let mut w = codec::jsonld::JsonLdWriter::compacted(Vec::new(), prefixes);
            for (s, p, o) in &terms {
                w.write_quad(s, p, o, None)?;
            }
            w.finish()
        }
    }
}
