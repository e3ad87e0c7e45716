//! JSON-LD — expanded and compacted document forms over `serde_json`.
//!
//! The parser accepts a node object, an array of node objects, or a
//! `@graph` wrapper (optionally inside a named-graph node). A
//! `@context` of prefix and term mappings drives key expansion; value
//! objects (`@value` + `@language` / `@type`), node references
//! (`@id`), nested node objects, and native JSON numbers / booleans
//! are all understood. Nested objects without `@id` become fresh blank
//! nodes.
//!
//! The writer buffers quads and serializes on `finish` in **expanded**
//! form by default, or **compacted** against a registered context:
//! predicate IRIs abbreviate to `prefix:local`, `rdf:type` becomes
//! `@type`, and literals of the XSD numeric / boolean types become
//! native JSON values.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::{Read, Write};

use serde_json::{Map, Number, Value, json};

use crate::diag::{DiagnosticBag, Span, codes};

use super::{
    CodecError, ParseStats, PrefixTable, RDF_TYPE, Term, XSD_BOOLEAN, XSD_DOUBLE, XSD_INTEGER,
    XSD_STRING,
};

// ------------------------------------------------------------------------------------------------
// Parser
// ------------------------------------------------------------------------------------------------

/// Streaming JSON-LD parser. One instance per document.
#[derive(Debug, Default)]
pub struct JsonLdParser {
    blank_counter: u32,
}

struct Context {
    terms: BTreeMap<String, String>,
}

impl Context {
    fn from_value(value: Option<&Value>) -> Self {
        let mut terms = BTreeMap::new();
        if let Some(Value::Object(map)) = value {
            for (key, val) in map {
                match val {
                    Value::String(iri) => {
                        terms.insert(key.clone(), iri.clone());
                    }
                    Value::Object(def) => {
                        if let Some(Value::String(iri)) = def.get("@id") {
                            terms.insert(key.clone(), iri.clone());
                        }
                    }
                    _ => {}
                }
            }
        }
        Self { terms }
    }

    /// Expands a key or reference: declared term, `prefix:suffix`, or
    /// an IRI passed through.
    fn expand(&self, key: &str) -> Option<String> {
        if let Some(iri) = self.terms.get(key) {
            return Some(iri.clone());
        }
        if let Some((prefix, suffix)) = key.split_once(':') {
            if let Some(ns) = self.terms.get(prefix) {
                return Some(format!("{ns}{suffix}"));
            }
            if !suffix.starts_with("//") && prefix == "_" {
                return Some(key.to_string()); // blank node kept verbatim
            }
            return Some(key.to_string()); // absolute IRI
        }
        None
    }
}

impl JsonLdParser {
    /// A parser; errors abort (JSON has no line-level recovery).
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the document, delivering each quad to `sink`.
    pub fn parse<R, F>(
        &mut self,
        mut reader: R,
        bag: &mut DiagnosticBag,
        mut sink: F,
    ) -> Result<ParseStats, CodecError>
    where
        R: Read,
        F: FnMut(&Term<'_>, &Term<'_>, &Term<'_>, Option<&Term<'_>>) -> Result<(), CodecError>,
    {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        let doc: Value = serde_json::from_str(&text).map_err(|e| {
            let err = CodecError::syntax(e.line() as u32, e.column() as u32, e.to_string());
            bag.report_with_args(
                codes::MALFORMED_DOCUMENT,
                Span::new(0, 1, e.line() as u32, e.column() as u32),
                &[&e.to_string()],
            );
            err
        })?;

        let mut stats = ParseStats::default();
        let context = Context::from_value(doc.get("@context"));
        match &doc {
            Value::Array(nodes) => {
                for node in nodes {
                    self.parse_node(node, &context, None, &mut sink, &mut stats)?;
                }
            }
            Value::Object(map) => {
                if let Some(Value::Array(nodes)) = map.get("@graph") {
                    // Top-level @graph: named if the wrapper has @id.
                    let graph = map
                        .get("@id")
                        .and_then(Value::as_str)
                        .map(|id| self.node_term(id));
                    for node in nodes {
                        self.parse_node(node, &context, graph.as_ref(), &mut sink, &mut stats)?;
                    }
                } else {
                    self.parse_node(&doc, &context, None, &mut sink, &mut stats)?;
                }
            }
            _ => {
                return Err(CodecError::Document(
                    "top level must be an object or array".into(),
                ));
            }
        }
        Ok(stats)
    }

    fn fresh_blank(&mut self) -> Term<'static> {
        self.blank_counter += 1;
        Term::Blank(Cow::Owned(format!("j{}", self.blank_counter)))
    }

    fn node_term(&self, id: &str) -> Term<'static> {
        match id.strip_prefix("_:") {
            Some(label) => Term::Blank(Cow::Owned(label.to_string())),
            None => Term::Iri(Cow::Owned(id.to_string())),
        }
    }

    /// Parses one node object, returning its subject term.
    fn parse_node<F>(
        &mut self,
        node: &Value,
        context: &Context,
        graph: Option<&Term<'_>>,
        sink: &mut F,
        stats: &mut ParseStats,
    ) -> Result<Term<'static>, CodecError>
    where
        F: FnMut(&Term<'_>, &Term<'_>, &Term<'_>, Option<&Term<'_>>) -> Result<(), CodecError>,
    {
        let Value::Object(map) = node else {
            return Err(CodecError::Document("node must be an object".into()));
        };
        let subject = match map.get("@id").and_then(Value::as_str) {
            Some(id) => self.node_term(id),
            None => self.fresh_blank(),
        };

        for (key, value) in map {
            match key.as_str() {
                "@id" | "@context" => {}
                "@type" => {
                    let types: Vec<&Value> = match value {
                        Value::Array(items) => items.iter().collect(),
                        other => vec![other],
                    };
                    for ty in types {
                        let Some(ty) = ty.as_str() else {
                            return Err(CodecError::Document("@type must be a string".into()));
                        };
                        let iri = context.expand(ty).unwrap_or_else(|| ty.to_string());
                        stats.statements += 1;
                        sink(
                            &subject,
                            &Term::iri(RDF_TYPE),
                            &Term::Iri(Cow::Owned(iri)),
                            graph,
                        )?;
                    }
                }
                "@graph" => {
                    // A named graph anchored at this node's @id.
                    let Value::Array(nodes) = value else {
                        return Err(CodecError::Document("@graph must be an array".into()));
                    };
                    for inner in nodes {
                        self.parse_node(inner, context, Some(&subject), sink, stats)?;
                    }
                }
                _ => {
                    let Some(predicate) = context.expand(key) else {
                        continue; // unmapped term, per JSON-LD expansion
                    };
                    if predicate.starts_with("_:") {
                        continue;
                    }
                    let values: Vec<&Value> = match value {
                        Value::Array(items) => items.iter().collect(),
                        other => vec![other],
                    };
                    for v in values {
                        let object =
                            self.parse_object_value(v, context, graph, sink, stats)?;
                        stats.statements += 1;
                        sink(&subject, &Term::iri(&predicate), &object, graph)?;
                    }
                }
            }
        }
        Ok(subject)
    }

    fn parse_object_value<F>(
        &mut self,
        value: &Value,
        context: &Context,
        graph: Option<&Term<'_>>,
        sink: &mut F,
        stats: &mut ParseStats,
    ) -> Result<Term<'static>, CodecError>
    where
        F: FnMut(&Term<'_>, &Term<'_>, &Term<'_>, Option<&Term<'_>>) -> Result<(), CodecError>,
    {
        match value {
            Value::String(s) => Ok(Term::Literal {
                lexical: Cow::Owned(s.clone()),
                lang: None,
                datatype: None,
            }),
            Value::Bool(b) => Ok(Term::Literal {
                lexical: Cow::Owned(b.to_string()),
                lang: None,
                datatype: Some(Cow::Borrowed(XSD_BOOLEAN)),
            }),
            Value::Number(n) => {
                let (lexical, datatype) = if n.is_i64() || n.is_u64() {
                    (n.to_string(), XSD_INTEGER)
                } else {
                    (n.to_string(), XSD_DOUBLE)
                };
                Ok(Term::Literal {
                    lexical: Cow::Owned(lexical),
                    lang: None,
                    datatype: Some(Cow::Borrowed(datatype)),
                })
            }
            Value::Object(map) => {
                if let Some(v) = map.get("@value") {
                    let lexical = match v {
                        Value::String(s) => s.clone(),
                        Value::Bool(b) => b.to_string(),
                        Value::Number(n) => n.to_string(),
                        _ => {
                            return Err(CodecError::Document(
                                "@value must be a scalar".into(),
                            ));
                        }
                    };
                    let lang = map
                        .get("@language")
                        .and_then(Value::as_str)
                        .map(|l| Cow::Owned(l.to_string()));
                    let datatype = map
                        .get("@type")
                        .and_then(Value::as_str)
                        .map(|t| context.expand(t).unwrap_or_else(|| t.to_string()))
                        .map(Cow::Owned)
                        .or_else(|| match v {
                            Value::Bool(_) => Some(Cow::Borrowed(XSD_BOOLEAN)),
                            Value::Number(n) if n.is_i64() || n.is_u64() => {
                                Some(Cow::Borrowed(XSD_INTEGER))
                            }
                            Value::Number(_) => Some(Cow::Borrowed(XSD_DOUBLE)),
                            _ => None,
                        });
                    return Ok(Term::Literal {
                        lexical: Cow::Owned(lexical),
                        lang,
                        datatype,
                    });
                }
                if map.len() == 1
                    && let Some(id) = map.get("@id").and_then(Value::as_str)
                {
                    return Ok(self.node_term(id));
                }
                // A nested node object: parse it, reference its subject.
                self.parse_node(value, context, graph, sink, stats)
            }
            _ => Err(CodecError::Document("unsupported object value".into())),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Writer
// ------------------------------------------------------------------------------------------------

/// An owned quad buffered by the writer.
struct OwnedQuad {
    s: String,
    p: String,
    o: OwnedObject,
    g: Option<String>,
}

enum OwnedObject {
    Node(String),
    Literal {
        lexical: String,
        lang: Option<String>,
        datatype: Option<String>,
    },
}

/// JSON-LD writer: buffers quads, serializes on `finish`.
pub struct JsonLdWriter<W: Write> {
    out: W,
    context: Option<PrefixTable>,
    quads: Vec<OwnedQuad>,
}

impl<W: Write> JsonLdWriter<W> {
    /// An expanded-form writer.
    pub fn new(out: W) -> Self {
        Self {
            out,
            context: None,
            quads: Vec::new(),
        }
    }

    /// A compacted-form writer: `context` prefixes abbreviate IRIs and
    /// are registered in the emitted `@context`.
    pub fn compacted(out: W, context: PrefixTable) -> Self {
        Self {
            out,
            context: Some(context),
            quads: Vec::new(),
        }
    }

    /// Buffers one quad; `None` is the default graph.
    pub fn write_quad(
        &mut self,
        s: &Term<'_>,
        p: &Term<'_>,
        o: &Term<'_>,
        g: Option<&Term<'_>>,
    ) -> Result<(), CodecError> {
        let node_id = |t: &Term<'_>| -> Result<String, CodecError> {
            match t {
                Term::Iri(iri) => Ok(iri.to_string()),
                Term::Blank(label) => Ok(format!("_:{label}")),
                Term::Literal { .. } => {
                    Err(CodecError::Document("literal in node position".into()))
                }
            }
        };
        let Term::Iri(pred) = p else {
            return Err(CodecError::Document("non-IRI predicate".into()));
        };
        let o = match o {
            Term::Literal {
                lexical,
                lang,
                datatype,
            } => OwnedObject::Literal {
                lexical: lexical.to_string(),
                lang: lang.as_ref().map(|l| l.to_string()),
                datatype: datatype.as_ref().map(|d| d.to_string()),
            },
            other => OwnedObject::Node(node_id(other)?),
        };
        self.quads.push(OwnedQuad {
            s: node_id(s)?,
            p: pred.to_string(),
            o,
            g: g.map(|g| node_id(g)).transpose()?,
        });
        Ok(())
    }

    /// Serializes everything buffered and returns the stream.
    pub fn finish(mut self) -> Result<W, CodecError> {
        // graph → subject → predicate → values, preserving insertion
        // order via index maps.
        let mut graph_order: Vec<Option<String>> = Vec::new();
        let mut by_graph: BTreeMap<Option<String>, Vec<OwnedQuad>> = BTreeMap::new();
        for quad in std::mem::take(&mut self.quads) {
            if !by_graph.contains_key(&quad.g) {
                graph_order.push(quad.g.clone());
            }
            by_graph.entry(quad.g.clone()).or_default().push(quad);
        }

        let mut top_nodes: Vec<Value> = Vec::new();
        for graph in graph_order {
            let Some(quads) = by_graph.remove(&graph) else {
                continue;
            };
            let nodes = self.nodes_for(quads);
            match graph {
                None => top_nodes.extend(nodes),
                Some(graph_id) => top_nodes.push(json!({
                    "@id": graph_id,
                    "@graph": nodes,
                })),
            }
        }

        let document = match &self.context {
            None => Value::Array(top_nodes),
            Some(table) => {
                let mut ctx = Map::new();
                for (prefix, ns) in table.iter() {
                    ctx.insert(prefix.to_string(), Value::String(ns.to_string()));
                }
                json!({
                    "@context": Value::Object(ctx),
                    "@graph": top_nodes,
                })
            }
        };

        serde_json::to_writer_pretty(&mut self.out, &document)
            .map_err(|e| CodecError::Document(e.to_string()))?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(self.out)
    }

    fn compact_iri(&self, iri: &str) -> String {
        if let Some(table) = &self.context
            && let Some((prefix, local)) = table.abbreviate(iri)
        {
            return format!("{prefix}:{local}");
        }
        iri.to_string()
    }

    fn nodes_for(&self, quads: Vec<OwnedQuad>) -> Vec<Value> {
        let mut subject_order: Vec<String> = Vec::new();
        let mut nodes: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
        for quad in quads {
            if !nodes.contains_key(&quad.s) {
                subject_order.push(quad.s.clone());
                let mut map = Map::new();
                map.insert("@id".into(), Value::String(quad.s.clone()));
                nodes.insert(quad.s.clone(), map);
            }
            let node = match nodes.get_mut(&quad.s) {
                Some(node) => node,
                None => continue,
            };

            // rdf:type compacts to @type.
            if quad.p == RDF_TYPE && self.context.is_some() {
                if let OwnedObject::Node(id) = &quad.o {
                    let compacted = self.compact_iri(id);
                    match node.get_mut("@type") {
                        Some(Value::Array(items)) => items.push(Value::String(compacted)),
                        _ => {
                            node.insert("@type".into(), json!([compacted]));
                        }
                    }
                    continue;
                }
            }

            let key = self.compact_iri(&quad.p);
            let value = self.object_value(&quad.o);
            match node.get_mut(&key) {
                Some(Value::Array(items)) => items.push(value),
                _ => {
                    node.insert(key, json!([value]));
                }
            }
        }
        subject_order
            .into_iter()
            .filter_map(|s| nodes.remove(&s).map(Value::Object))
            .collect()
    }

    fn object_value(&self, object: &OwnedObject) -> Value {
        match object {
            OwnedObject::Node(id) => json!({ "@id": self.compact_iri(id) }),
            OwnedObject::Literal {
                lexical,
                lang,
                datatype,
            } => {
                if let Some(lang) = lang {
                    return json!({ "@value": lexical, "@language": lang });
                }
                match datatype.as_deref() {
                    None => Value::String(lexical.clone()),
                    Some(XSD_STRING) => Value::String(lexical.clone()),
                    Some(XSD_BOOLEAN) => match lexical.as_str() {
                        "true" => Value::Bool(true),
                        "false" => Value::Bool(false),
                        _ => json!({ "@value": lexical, "@type": self.compact_iri(XSD_BOOLEAN) }),
                    },
                    Some(XSD_INTEGER) => match lexical.parse::<i64>() {
                        Ok(n) => Value::Number(n.into()),
                        Err(_) => {
                            json!({ "@value": lexical, "@type": self.compact_iri(XSD_INTEGER) })
                        }
                    },
                    Some(XSD_DOUBLE) => match lexical.parse::<f64>().ok().and_then(Number::from_f64)
                    {
                        Some(n) => Value::Number(n),
                        None => {
                            json!({ "@value": lexical, "@type": self.compact_iri(XSD_DOUBLE) })
                        }
                    },
                    Some(dt) => json!({ "@value": lexical, "@type": self.compact_iri(dt) }),
                }
            }
        }
    }
}
