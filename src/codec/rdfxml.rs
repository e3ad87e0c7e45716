//! RDF/XML — the striped XML syntax, read through `quick-xml`.
//!
//! The parser walks the event stream with an explicit frame stack that
//! alternates node and property layers: `rdf:Description` (or a typed
//! node element) opens a subject, each child element is a predicate,
//! and the object comes from `rdf:resource`, `rdf:nodeID`, nested node
//! elements, `rdf:parseType="Resource"`, or text content (with
//! `rdf:datatype` / inherited `xml:lang`). Property attributes on node
//! elements become literal triples. Namespace declarations are scoped
//! per element, as XML demands.
//!
//! The writer buffers incoming triples and serializes on `finish`:
//! subjects grouped into one `rdf:Description` each, predicates split
//! into namespace + local name, text content escaped by `quick-xml`.

use std::collections::BTreeMap;
use std::io::{BufRead, Write};

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;

use crate::diag::{DiagnosticBag, Span, codes};

use super::{CodecError, ParseStats, RDF_TYPE, Term};

/// The RDF namespace.
pub const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";

// ------------------------------------------------------------------------------------------------
// Parser
// ------------------------------------------------------------------------------------------------

/// Owned term used inside the parser's frames.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Iri(String),
    Blank(String),
}

impl Node {
    fn as_term(&self) -> Term<'_> {
        match self {
            Node::Iri(iri) => Term::iri(iri),
            Node::Blank(label) => Term::blank(label),
        }
    }
}

#[derive(Debug)]
enum Frame {
    /// Inside `rdf:RDF`; children are node elements.
    Root { lang: Option<String> },
    /// Inside a node element; children are property elements.
    Node { subject: Node, lang: Option<String> },
    /// Inside a property element; the object is still being decided.
    Property {
        subject: Node,
        predicate: String,
        lang: Option<String>,
        datatype: Option<String>,
        text: String,
        /// Set once a nested node or resource attribute supplied the
        /// object, so text whitespace is ignored.
        object_done: bool,
    },
}

/// Scoped namespace declarations.
#[derive(Debug, Default, Clone)]
struct NsScope {
    default_ns: Option<String>,
    prefixes: Vec<(String, String)>,
}

/// Streaming RDF/XML parser. One instance per document.
#[derive(Debug, Default)]
pub struct RdfXmlParser {
    blank_counter: u32,
}

impl RdfXmlParser {
    /// A parser (RDF/XML has no lenient line mode; errors abort).
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the document, delivering each triple to `sink`.
    pub fn parse<R, F>(
        &mut self,
        reader: R,
        bag: &mut DiagnosticBag,
        mut sink: F,
    ) -> Result<ParseStats, CodecError>
    where
        R: BufRead,
        F: FnMut(&Term<'_>, &Term<'_>, &Term<'_>, Option<&Term<'_>>) -> Result<(), CodecError>,
    {
        let mut xml = Reader::from_reader(reader);
        let mut stats = ParseStats::default();
        let mut buf = Vec::new();
        let mut frames: Vec<Frame> = Vec::new();
        let mut scopes: Vec<NsScope> = vec![NsScope::default()];
        let mut seen_root = false;

        loop {
            let event = xml.read_event_into(&mut buf).map_err(|e| {
                let pos = xml.buffer_position();
                let err = CodecError::syntax(1, pos as u32 + 1, format!("XML error: {e}"));
                if let CodecError::Syntax { line, col, message } = &err {
                    bag.report_with_args(
                        codes::MALFORMED_DOCUMENT,
                        Span::new(0, 1, *line, *col),
                        &[message],
                    );
                }
                err
            })?;
            match event {
                Event::Start(e) => {
                    let scope = Self::push_scope(&mut scopes, &e)?;
                    let name = Self::expand_name(&scopes, &e)?;
                    if !seen_root && name == format!("{RDF_NS}RDF") {
                        seen_root = true;
                        frames.push(Frame::Root { lang: scope });
                        continue;
                    }
                    self.open_element(&mut frames, &scopes, &e, name, scope, &mut sink, &mut stats)?;
                }
                Event::Empty(e) => {
                    let scope = Self::push_scope(&mut scopes, &e)?;
                    let name = Self::expand_name(&scopes, &e)?;
                    self.open_element(&mut frames, &scopes, &e, name, scope, &mut sink, &mut stats)?;
                    self.close_element(&mut frames, &mut sink, &mut stats)?;
                    scopes.pop();
                }
                Event::End(_) => {
                    self.close_element(&mut frames, &mut sink, &mut stats)?;
                    scopes.pop();
                }
                Event::Text(t) => {
                    let text = t
                        .unescape()
                        .map_err(|e| CodecError::Document(format!("bad text content: {e}")))?;
                    if let Some(Frame::Property {
                        text: pending,
                        object_done: false,
                        ..
                    }) = frames.last_mut()
                    {
                        pending.push_str(&text);
                    }
                }
                Event::CData(t) => {
                    if let Some(Frame::Property {
                        text: pending,
                        object_done: false,
                        ..
                    }) = frames.last_mut()
                    {
                        pending.push_str(&String::from_utf8_lossy(&t));
                    }
                }
                Event::Eof => return Ok(stats),
                _ => {}
            }
            buf.clear();
        }
    }

    /// Enters an element's namespace scope; returns its `xml:lang` (or
    /// the inherited one).
    fn push_scope(
        scopes: &mut Vec<NsScope>,
        e: &quick_xml::events::BytesStart<'_>,
    ) -> Result<Option<String>, CodecError> {
        let mut scope = scopes
            .last()
            .cloned()
            .unwrap_or_default();
        let mut lang = None;
        for attr in e.attributes() {
            let attr = attr.map_err(|e| CodecError::Document(format!("bad attribute: {e}")))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| CodecError::Document(format!("bad attribute value: {e}")))?
                .into_owned();
            if key == "xmlns" {
                scope.default_ns = Some(value);
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                scope.prefixes.retain(|(p, _)| p != prefix);
                scope.prefixes.push((prefix.to_string(), value));
            } else if key == "xml:lang" {
                lang = Some(value);
            }
        }
        scopes.push(scope);
        Ok(lang)
    }

    /// Expands an element's qualified name against the current scope.
    fn expand_name(
        scopes: &[NsScope],
        e: &quick_xml::events::BytesStart<'_>,
    ) -> Result<String, CodecError> {
        let raw = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let scope = scopes
            .last()
            .ok_or_else(|| CodecError::Document("namespace scope underflow".into()))?;
        match raw.split_once(':') {
            Some((prefix, local)) => {
                let ns = scope
                    .prefixes
                    .iter()
                    .rev()
                    .find(|(p, _)| p == prefix)
                    .map(|(_, ns)| ns.as_str())
                    .ok_or_else(|| {
                        CodecError::Document(format!("undeclared namespace prefix '{prefix}'"))
                    })?;
                Ok(format!("{ns}{local}"))
            }
            None => match &scope.default_ns {
                Some(ns) => Ok(format!("{ns}{raw}")),
                None => Ok(raw),
            },
        }
    }

    fn fresh_blank(&mut self) -> Node {
        self.blank_counter += 1;
        Node::Blank(format!("x{}", self.blank_counter))
    }

    #[allow(clippy::too_many_arguments)]
    fn open_element<F>(
        &mut self,
        frames: &mut Vec<Frame>,
        scopes: &[NsScope],
        e: &quick_xml::events::BytesStart<'_>,
        name: String,
        lang: Option<String>,
        sink: &mut F,
        stats: &mut ParseStats,
    ) -> Result<(), CodecError>
    where
        F: FnMut(&Term<'_>, &Term<'_>, &Term<'_>, Option<&Term<'_>>) -> Result<(), CodecError>,
    {
        let inherited_lang = frames.iter().rev().find_map(|f| match f {
            Frame::Root { lang }
            | Frame::Node { lang, .. }
            | Frame::Property { lang, .. } => lang.clone(),
        });
        let lang = lang.or(inherited_lang);

        let expecting_property = matches!(frames.last(), Some(Frame::Node { .. }));
        if expecting_property {
            // Property element.
            let Some(Frame::Node { subject, .. }) = frames.last() else {
                return Err(CodecError::Document("property outside a node".into()));
            };
            let subject = subject.clone();
            let mut datatype = None;
            let mut resource: Option<Node> = None;
            let mut parse_type_resource = false;
            for attr in e.attributes() {
                let attr =
                    attr.map_err(|e| CodecError::Document(format!("bad attribute: {e}")))?;
                let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                let value = attr
                    .unescape_value()
                    .map_err(|e| CodecError::Document(format!("bad attribute value: {e}")))?
                    .into_owned();
                match key.as_str() {
                    "rdf:resource" => resource = Some(Node::Iri(value)),
                    "rdf:nodeID" => resource = Some(Node::Blank(value)),
                    "rdf:datatype" => datatype = Some(value),
                    "rdf:parseType" if value == "Resource" => parse_type_resource = true,
                    _ => {}
                }
            }

            if parse_type_resource {
                // The property's object is an anonymous node whose
                // properties follow inline.
                let node = self.fresh_blank();
                stats.statements += 1;
                sink(
                    &subject.as_term(),
                    &Term::iri(&name),
                    &node.as_term(),
                    None,
                )?;
                frames.push(Frame::Node {
                    subject: node,
                    lang,
                });
                return Ok(());
            }

            if let Some(object) = resource {
                stats.statements += 1;
                sink(
                    &subject.as_term(),
                    &Term::iri(&name),
                    &object.as_term(),
                    None,
                )?;
                frames.push(Frame::Property {
                    subject,
                    predicate: name,
                    lang,
                    datatype,
                    text: String::new(),
                    object_done: true,
                });
                return Ok(());
            }

            frames.push(Frame::Property {
                subject,
                predicate: name,
                lang,
                datatype,
                text: String::new(),
                object_done: false,
            });
            return Ok(());
        }

        // Node element (document root content, or nested under a
        // property element).
        let mut subject = None;
        let mut property_attrs: Vec<(String, String)> = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|e| CodecError::Document(format!("bad attribute: {e}")))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| CodecError::Document(format!("bad attribute value: {e}")))?
                .into_owned();
            match key.as_str() {
                "rdf:about" => subject = Some(Node::Iri(value)),
                "rdf:ID" => subject = Some(Node::Iri(format!("#{value}"))),
                "rdf:nodeID" => subject = Some(Node::Blank(value)),
                k if k == "xmlns" || k.starts_with("xmlns:") || k.starts_with("xml:") => {}
                k if k.starts_with("rdf:") => {}
                _ => {
                    let scope = scopes
                        .last()
                        .ok_or_else(|| CodecError::Document("namespace scope underflow".into()))?;
                    let expanded = match key.split_once(':') {
                        Some((prefix, local)) => {
                            let ns = scope
                                .prefixes
                                .iter()
                                .rev()
                                .find(|(p, _)| p == prefix)
                                .map(|(_, ns)| ns.as_str())
                                .ok_or_else(|| {
                                    CodecError::Document(format!(
                                        "undeclared namespace prefix '{prefix}'"
                                    ))
                                })?;
                            format!("{ns}{local}")
                        }
                        None => continue, // unprefixed non-rdf attribute
                    };
                    property_attrs.push((expanded, value));
                }
            }
        }
        let subject = subject.unwrap_or_else(|| self.fresh_blank());

        // Parent property (if any) receives this node as its object.
        if let Some(Frame::Property {
            subject: parent_subject,
            predicate,
            object_done,
            ..
        }) = frames.last_mut()
        {
            stats.statements += 1;
            let parent = parent_subject.clone();
            let pred = predicate.clone();
            *object_done = true;
            sink(&parent.as_term(), &Term::iri(&pred), &subject.as_term(), None)?;
        }

        // A typed node element asserts rdf:type.
        if name != format!("{RDF_NS}Description") {
            stats.statements += 1;
            sink(
                &subject.as_term(),
                &Term::iri(RDF_TYPE),
                &Term::iri(&name),
                None,
            )?;
        }

        // Property attributes become literal triples.
        for (pred, value) in &property_attrs {
            stats.statements += 1;
            let object = match &lang {
                Some(lang) => Term::lang_literal(value, lang),
                None => Term::literal(value),
            };
            sink(&subject.as_term(), &Term::iri(pred), &object, None)?;
        }

        frames.push(Frame::Node { subject, lang });
        Ok(())
    }

    fn close_element<F>(
        &mut self,
        frames: &mut Vec<Frame>,
        sink: &mut F,
        stats: &mut ParseStats,
    ) -> Result<(), CodecError>
    where
        F: FnMut(&Term<'_>, &Term<'_>, &Term<'_>, Option<&Term<'_>>) -> Result<(), CodecError>,
    {
        match frames.pop() {
            Some(Frame::Property {
                subject,
                predicate,
                lang,
                datatype,
                text,
                object_done,
            }) => {
                if !object_done {
                    stats.statements += 1;
                    let object = match (&datatype, &lang) {
                        (Some(dt), _) => Term::typed(&text, dt),
                        (None, Some(lang)) => Term::lang_literal(&text, lang),
                        (None, None) => Term::literal(&text),
                    };
                    sink(&subject.as_term(), &Term::iri(&predicate), &object, None)?;
                }
                Ok(())
            }
            Some(Frame::Root { .. }) | Some(Frame::Node { .. }) | None => Ok(()),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Writer
// ------------------------------------------------------------------------------------------------

/// An owned triple buffered by the writer.
type OwnedTriple = (String, String, OwnedObject);

#[derive(Debug, Clone)]
enum OwnedObject {
    Iri(String),
    Blank(String),
    Literal {
        lexical: String,
        lang: Option<String>,
        datatype: Option<String>,
    },
}

/// RDF/XML writer: buffers triples, serializes grouped descriptions on
/// [`RdfXmlWriter::finish`].
pub struct RdfXmlWriter<W: Write> {
    out: W,
    triples: Vec<OwnedTriple>,
}

impl<W: Write> RdfXmlWriter<W> {
    /// Wraps an output stream.
    pub fn new(out: W) -> Self {
        Self {
            out,
            triples: Vec::new(),
        }
    }

    /// Buffers one triple. Subjects and blanks are rendered canonically
    /// at finish time.
    pub fn write_triple(
        &mut self,
        s: &Term<'_>,
        p: &Term<'_>,
        o: &Term<'_>,
    ) -> Result<(), CodecError> {
        let subject = match s {
            Term::Iri(iri) => format!("<{iri}>"),
            Term::Blank(label) => format!("_:{label}"),
            Term::Literal { .. } => {
                return Err(CodecError::Document("literal subject".into()));
            }
        };
        let Term::Iri(pred) = p else {
            return Err(CodecError::Document("non-IRI predicate".into()));
        };
        let object = match o {
            Term::Iri(iri) => OwnedObject::Iri(iri.to_string()),
            Term::Blank(label) => OwnedObject::Blank(label.to_string()),
            Term::Literal {
                lexical,
                lang,
                datatype,
            } => OwnedObject::Literal {
                lexical: lexical.to_string(),
                lang: lang.as_ref().map(|l| l.to_string()),
                datatype: datatype.as_ref().map(|d| d.to_string()),
            },
        };
        self.triples.push((subject, pred.to_string(), object));
        Ok(())
    }

    /// Serializes everything buffered and returns the stream.
    pub fn finish(mut self) -> Result<W, CodecError> {
        // Collect predicate namespaces so every property element has a
        // declared prefix.
        let mut namespaces: BTreeMap<String, String> = BTreeMap::new();
        for (_, pred, _) in &self.triples {
            let (ns, _) = split_iri(pred);
            if ns != RDF_NS && !namespaces.contains_key(ns) {
                let prefix = format!("ns{}", namespaces.len());
                namespaces.insert(ns.to_string(), prefix);
            }
        }

        let mut head = String::new();
        head.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        head.push_str("<rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\"");
        for (ns, prefix) in &namespaces {
            head.push_str(&format!("\n         xmlns:{prefix}=\"{}\"", escape(ns.as_str())));
        }
        head.push_str(">\n");
        self.out.write_all(head.as_bytes())?;

        // Group by subject, preserving first-appearance order.
        let mut order: Vec<String> = Vec::new();
        let mut groups: BTreeMap<String, Vec<(String, OwnedObject)>> = BTreeMap::new();
        for (subject, pred, object) in std::mem::take(&mut self.triples) {
            if !groups.contains_key(&subject) {
                order.push(subject.clone());
            }
            groups.entry(subject).or_default().push((pred, object));
        }

        for subject in order {
            let Some(props) = groups.remove(&subject) else {
                continue;
            };
            let about = if let Some(iri) = subject.strip_prefix('<') {
                format!(" rdf:about=\"{}\"", escape(iri.trim_end_matches('>')))
            } else {
                format!(" rdf:nodeID=\"{}\"", escape(subject.trim_start_matches("_:")))
            };
            self.out
                .write_all(format!("  <rdf:Description{about}>\n").as_bytes())?;

            for (pred, object) in props {
                let (ns, local) = split_iri(&pred);
                let qname = if ns == RDF_NS {
                    format!("rdf:{local}")
                } else {
                    let prefix = namespaces
                        .get(ns)
                        .ok_or_else(|| CodecError::Document("missing namespace".into()))?;
                    format!("{prefix}:{local}")
                };
                let element = match object {
                    OwnedObject::Iri(iri) => {
                        format!("    <{qname} rdf:resource=\"{}\"/>\n", escape(iri.as_str()))
                    }
                    OwnedObject::Blank(label) => {
                        format!("    <{qname} rdf:nodeID=\"{}\"/>\n", escape(label.as_str()))
                    }
                    OwnedObject::Literal {
                        lexical,
                        lang,
                        datatype,
                    } => {
                        let mut attrs = String::new();
                        if let Some(lang) = &lang {
                            attrs.push_str(&format!(" xml:lang=\"{}\"", escape(lang.as_str())));
                        }
                        if let Some(dt) = &datatype {
                            if dt != super::XSD_STRING {
                                attrs
                                    .push_str(&format!(" rdf:datatype=\"{}\"", escape(dt.as_str())));
                            }
                        }
                        format!(
                            "    <{qname}{attrs}>{}</{qname}>\n",
                            escape(lexical.as_str())
                        )
                    }
                };
                self.out.write_all(element.as_bytes())?;
            }
            self.out.write_all(b"  </rdf:Description>\n")?;
        }

        self.out.write_all(b"</rdf:RDF>\n")?;
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Splits an IRI into (namespace, local) at the last `#` or `/`.
fn split_iri(iri: &str) -> (&str, &str) {
    let split = iri
        .rfind('#')
        .or_else(|| iri.rfind('/'))
        .map(|i| i + 1)
        .unwrap_or(0);
    (&iri[..split], &iri[split..])
}
