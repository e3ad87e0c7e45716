//! RDF codecs — streaming parsers and writers for six syntaxes.
//!
//! | Format | Module | Graphs |
//! |--------|--------|--------|
//! | N-Triples | [`ntriples`] | no |
//! | N-Quads | [`nquads`] | yes |
//! | Turtle | [`turtle`] | no |
//! | TriG | [`trig`] | yes |
//! | RDF/XML | [`rdfxml`] | no |
//! | JSON-LD | [`jsonld`] | yes |
//!
//! Every parser hands each statement to a caller-supplied sink as
//! borrowed [`Term`]s — valid only for the duration of the callback.
//! Terms borrow from the parser's input buffer where the syntax allows
//! and fall back to reused scratch storage when unescaping forces a
//! copy (the `Cow` in the term type is exactly that distinction).
//! Parsers are single-stream by construction: one instance per
//! document, never shared across threads.
//!
//! Writers take terms and emit byte-exact documents, abbreviating via a
//! caller-supplied [`PrefixTable`] and grouping consecutive triples by
//! subject where the format allows it.
//!
//! Parse errors carry line/column and are collected in a
//! [`DiagnosticBag`](crate::diag::DiagnosticBag); a parser in lenient
//! mode records the diagnostic and skips past the bad statement, in
//! strict mode it stops at the first error.

pub mod jsonld;
pub mod ntriples;
pub mod nquads;
pub mod rdfxml;
pub mod trig;
pub mod turtle;

#[cfg(test)]
mod tests;

use std::borrow::Cow;
use std::fmt;

use thiserror::Error;

use crate::diag::Span;

/// `rdf:type`, the IRI behind Turtle's `a` shortcut.
pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

/// `xsd:string`, the implicit datatype of plain literals.
pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";

/// `xsd:integer`.
pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";

/// `xsd:decimal`.
pub const XSD_DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";

/// `xsd:double`.
pub const XSD_DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";

/// `xsd:boolean`.
pub const XSD_BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";

/// `rdf:first` (collections).
pub const RDF_FIRST: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#first";

/// `rdf:rest` (collections).
pub const RDF_REST: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#rest";

/// `rdf:nil` (collections).
pub const RDF_NIL: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#nil";

// ------------------------------------------------------------------------------------------------
// Errors
// ------------------------------------------------------------------------------------------------

/// Errors returned by codec operations.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The input violates the format's grammar.
    #[error("syntax error at {line}:{col}: {message}")]
    Syntax {
        /// 1-based line.
        line: u32,
        /// 1-based column.
        col: u32,
        /// What went wrong.
        message: String,
    },

    /// The sink refused a statement.
    #[error("sink error: {0}")]
    Sink(String),

    /// The input is not valid for this codec at the document level.
    #[error("malformed document: {0}")]
    Document(String),
}

impl CodecError {
    pub(crate) fn syntax(line: u32, col: u32, message: impl Into<String>) -> Self {
        CodecError::Syntax {
            line,
            col,
            message: message.into(),
        }
    }

    /// The source span of a syntax error, if this is one.
    pub fn span(&self) -> Option<Span> {
        match self {
            CodecError::Syntax { line, col, .. } => Some(Span::new(0, 1, *line, *col)),
            _ => None,
        }
    }
}

/// Statement counts returned by a successful parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    /// Statements delivered to the sink.
    pub statements: u64,
    /// Statements skipped in lenient mode.
    pub skipped: u64,
}

// ------------------------------------------------------------------------------------------------
// Formats
// ------------------------------------------------------------------------------------------------

/// The supported RDF serializations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// application/n-triples
    NTriples,
    /// application/n-quads
    NQuads,
    /// text/turtle
    Turtle,
    /// application/trig
    TriG,
    /// application/rdf+xml
    RdfXml,
    /// application/ld+json
    JsonLd,
}

impl Format {
    /// Negotiates a format from a file extension (`ttl`, `nt`, …).
    pub fn from_extension(ext: &str) -> Option<Format> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "nt" | "ntriples" => Some(Format::NTriples),
            "nq" | "nquads" => Some(Format::NQuads),
            "ttl" | "turtle" => Some(Format::Turtle),
            "trig" => Some(Format::TriG),
            "rdf" | "rdfxml" | "owl" => Some(Format::RdfXml),
            "jsonld" | "json" => Some(Format::JsonLd),
            _ => None,
        }
    }

    /// Negotiates a format from a media type, parameters ignored.
    pub fn from_media_type(media_type: &str) -> Option<Format> {
        let essence = media_type.split(';').next().unwrap_or("").trim();
        match essence.to_ascii_lowercase().as_str() {
            "application/n-triples" | "text/plain" => Some(Format::NTriples),
            "application/n-quads" => Some(Format::NQuads),
            "text/turtle" | "application/x-turtle" => Some(Format::Turtle),
            "application/trig" => Some(Format::TriG),
            "application/rdf+xml" => Some(Format::RdfXml),
            "application/ld+json" | "application/json" => Some(Format::JsonLd),
            _ => None,
        }
    }

    /// The canonical media type.
    pub fn media_type(self) -> &'static str {
        match self {
            Format::NTriples => "application/n-triples",
            Format::NQuads => "application/n-quads",
            Format::Turtle => "text/turtle",
            Format::TriG => "application/trig",
            Format::RdfXml => "application/rdf+xml",
            Format::JsonLd => "application/ld+json",
        }
    }

    /// The conventional file extension.
    pub fn extension(self) -> &'static str {
        match self {
            Format::NTriples => "nt",
            Format::NQuads => "nq",
            Format::Turtle => "ttl",
            Format::TriG => "trig",
            Format::RdfXml => "rdf",
            Format::JsonLd => "jsonld",
        }
    }

    /// Whether documents of this format can carry named graphs.
    pub fn supports_graphs(self) -> bool {
        matches!(self, Format::NQuads | Format::TriG | Format::JsonLd)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.media_type())
    }
}

// ------------------------------------------------------------------------------------------------
// Terms
// ------------------------------------------------------------------------------------------------

/// A borrowed RDF term, as handed to parser sinks.
///
/// Borrows from the parser's buffers where possible; unescaping forces
/// the owned variant. Either way the term is valid only for the
/// duration of the sink callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term<'a> {
    /// An absolute IRI, without angle brackets.
    Iri(Cow<'a, str>),
    /// A blank node label, without the `_:` prefix.
    Blank(Cow<'a, str>),
    /// A literal.
    Literal {
        /// The lexical form, unescaped.
        lexical: Cow<'a, str>,
        /// Language tag, lowercase, without `@`.
        lang: Option<Cow<'a, str>>,
        /// Datatype IRI; `None` means `xsd:string`.
        datatype: Option<Cow<'a, str>>,
    },
}

impl<'a> Term<'a> {
    /// An IRI term borrowing `iri`.
    pub fn iri(iri: &'a str) -> Self {
        Term::Iri(Cow::Borrowed(iri))
    }

    /// A blank node term borrowing `label`.
    pub fn blank(label: &'a str) -> Self {
        Term::Blank(Cow::Borrowed(label))
    }

    /// A plain string literal.
    pub fn literal(lexical: &'a str) -> Self {
        Term::Literal {
            lexical: Cow::Borrowed(lexical),
            lang: None,
            datatype: None,
        }
    }

    /// A typed literal.
    pub fn typed(lexical: &'a str, datatype: &'a str) -> Self {
        Term::Literal {
            lexical: Cow::Borrowed(lexical),
            lang: None,
            datatype: Some(Cow::Borrowed(datatype)),
        }
    }

    /// A language-tagged literal.
    pub fn lang_literal(lexical: &'a str, lang: &'a str) -> Self {
        Term::Literal {
            lexical: Cow::Borrowed(lexical),
            lang: Some(Cow::Borrowed(lang)),
            datatype: None,
        }
    }

    /// True for IRIs.
    pub fn is_iri(&self) -> bool {
        matches!(self, Term::Iri(_))
    }

    /// True for blank nodes.
    pub fn is_blank(&self) -> bool {
        matches!(self, Term::Blank(_))
    }

    /// True for literals.
    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal { .. })
    }

    /// Serializes to the store's canonical atom form: `<iri>`,
    /// `_:label`, or `"escaped"` with optional `@lang` / `^^<dt>`.
    pub fn to_canonical(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }

    /// Appends the canonical form to `out`.
    pub fn write_canonical(&self, out: &mut String) {
        match self {
            Term::Iri(iri) => {
                out.push('<');
                out.push_str(iri);
                out.push('>');
            }
            Term::Blank(label) => {
                out.push_str("_:");
                out.push_str(label);
            }
            Term::Literal {
                lexical,
                lang,
                datatype,
            } => {
                out.push('"');
                escape_literal_into(lexical, out);
                out.push('"');
                if let Some(lang) = lang {
                    out.push('@');
                    out.push_str(lang);
                } else if let Some(dt) = datatype {
                    if dt != XSD_STRING {
                        out.push_str("^^<");
                        out.push_str(dt);
                        out.push('>');
                    }
                }
            }
        }
    }

    /// Parses a canonical atom back into a term, borrowing where no
    /// unescaping is required.
    pub fn from_canonical(atom: &'a str) -> Result<Term<'a>, CodecError> {
        let bad = || CodecError::Document(format!("malformed canonical term: {atom}"));
        if let Some(rest) = atom.strip_prefix('<') {
            let iri = rest.strip_suffix('>').ok_or_else(bad)?;
            return Ok(Term::Iri(Cow::Borrowed(iri)));
        }
        if let Some(label) = atom.strip_prefix("_:") {
            return Ok(Term::Blank(Cow::Borrowed(label)));
        }
        if let Some(rest) = atom.strip_prefix('"') {
            // Find the closing quote, honouring escapes.
            let bytes = rest.as_bytes();
            let mut i = 0;
            let mut escaped = false;
            let mut close = None;
            while i < bytes.len() {
                match bytes[i] {
                    b'\\' if !escaped => escaped = true,
                    b'"' if !escaped => {
                        close = Some(i);
                        break;
                    }
                    _ => escaped = false,
                }
                i += 1;
            }
            let close = close.ok_or_else(bad)?;
            let raw = &rest[..close];
            let tail = &rest[close + 1..];
            let lexical = unescape_literal(raw).map_err(|_| bad())?;
            if tail.is_empty() {
                return Ok(Term::Literal {
                    lexical,
                    lang: None,
                    datatype: None,
                });
            }
            if let Some(lang) = tail.strip_prefix('@') {
                return Ok(Term::Literal {
                    lexical,
                    lang: Some(Cow::Borrowed(lang)),
                    datatype: None,
                });
            }
            if let Some(dt) = tail.strip_prefix("^^<") {
                let dt = dt.strip_suffix('>').ok_or_else(bad)?;
                return Ok(Term::Literal {
                    lexical,
                    lang: None,
                    datatype: Some(Cow::Borrowed(dt)),
                });
            }
            return Err(bad());
        }
        Err(bad())
    }

    /// The datatype IRI of a literal, with the `xsd:string` default
    /// applied. `None` for non-literals and language-tagged strings.
    pub fn literal_datatype(&self) -> Option<&str> {
        match self {
            Term::Literal {
                lang: Some(_), ..
            } => None,
            Term::Literal { datatype, .. } => {
                Some(datatype.as_deref().unwrap_or(XSD_STRING))
            }
            _ => None,
        }
    }
}

/// Escapes a literal's lexical form for canonical / N-Triples output.
pub(crate) fn escape_literal_into(lexical: &str, out: &mut String) {
    for c in lexical.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
}

/// Undoes [`escape_literal_into`]; borrows when no escape is present.
pub(crate) fn unescape_literal(raw: &str) -> Result<Cow<'_, str>, ()> {
    if !raw.contains('\\') {
        return Ok(Cow::Borrowed(raw));
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('b') => out.push('\u{8}'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{c}'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('\\') => out.push('\\'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                if hex.len() != 4 {
                    return Err(());
                }
                let cp = u32::from_str_radix(&hex, 16).map_err(|_| ())?;
                out.push(char::from_u32(cp).ok_or(())?);
            }
            Some('U') => {
                let hex: String = chars.by_ref().take(8).collect();
                if hex.len() != 8 {
                    return Err(());
                }
                let cp = u32::from_str_radix(&hex, 16).map_err(|_| ())?;
                out.push(char::from_u32(cp).ok_or(())?);
            }
            _ => return Err(()),
        }
    }
    Ok(Cow::Owned(out))
}

// ------------------------------------------------------------------------------------------------
// Prefix table
// ------------------------------------------------------------------------------------------------

/// BASE + prefix declarations, shared by parsers and writers.
///
/// Parsers fill it from `@prefix` / `PREFIX` declarations and use
/// [`PrefixTable::expand`]; writers are handed one by the caller and
/// use [`PrefixTable::abbreviate`].
#[derive(Debug, Clone, Default)]
pub struct PrefixTable {
    base: Option<String>,
    entries: Vec<(String, String)>,
}

impl PrefixTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base IRI used to resolve relative references.
    pub fn set_base(&mut self, base: impl Into<String>) {
        self.base = Some(base.into());
    }

    /// The base IRI, if declared.
    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    /// Declares (or redeclares) a prefix.
    pub fn declare(&mut self, prefix: impl Into<String>, namespace: impl Into<String>) {
        let prefix = prefix.into();
        let namespace = namespace.into();
        if let Some(entry) = self.entries.iter_mut().find(|(p, _)| *p == prefix) {
            entry.1 = namespace;
        } else {
            self.entries.push((prefix, namespace));
        }
    }

    /// The namespace of a declared prefix.
    pub fn namespace(&self, prefix: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(p, _)| p == prefix)
            .map(|(_, ns)| ns.as_str())
    }

    /// All declared prefixes.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(p, ns)| (p.as_str(), ns.as_str()))
    }

    /// Expands `prefix:local` to an absolute IRI.
    pub fn expand(&self, prefix: &str, local: &str) -> Option<String> {
        self.namespace(prefix).map(|ns| format!("{ns}{local}"))
    }

    /// Resolves an IRI reference against the base when it is relative.
    ///
    /// Resolution is deliberately simple: absolute references (with a
    /// scheme) pass through; everything else is appended to the base,
    /// honouring a leading `#` or `/`.
    pub fn resolve(&self, reference: &str) -> String {
        let has_scheme = reference
            .split_once(':')
            .is_some_and(|(scheme, _)| {
                !scheme.is_empty()
                    && scheme
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
                    && scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            });
        if has_scheme {
            return reference.to_string();
        }
        let Some(base) = &self.base else {
            return reference.to_string();
        };
        if let Some(fragment) = reference.strip_prefix('#') {
            let stem = base.split('#').next().unwrap_or(base);
            return format!("{stem}#{fragment}");
        }
        if reference.starts_with('/') {
            if let Some(scheme_end) = base.find("://") {
                let authority_end = base[scheme_end + 3..]
                    .find('/')
                    .map(|i| scheme_end + 3 + i)
                    .unwrap_or(base.len());
                return format!("{}{}", &base[..authority_end], reference);
            }
        }
        // Relative path: replace everything after the last slash.
        match base.rfind('/') {
            Some(i) => format!("{}{}", &base[..=i], reference),
            None => format!("{base}{reference}"),
        }
    }

    /// Abbreviates an absolute IRI to `prefix:local` using the longest
    /// matching namespace, if the remainder is a safe local name.
    pub fn abbreviate<'t>(&self, iri: &'t str) -> Option<(&str, &'t str)> {
        let mut best: Option<(&str, &str, usize)> = None;
        for (prefix, ns) in self.iter() {
            if let Some(local) = iri.strip_prefix(ns)
                && ns.len() > best.map(|(_, _, l)| l).unwrap_or(0)
                && is_safe_local(local)
            {
                best = Some((prefix, local, ns.len()));
            }
        }
        best.map(|(prefix, local, _)| (prefix, local))
    }
}

/// Conservative PN_LOCAL check: what we abbreviate must re-parse.
fn is_safe_local(local: &str) -> bool {
    !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
        && !local.starts_with('.')
        && !local.ends_with('.')
        && !local.starts_with('-')
}

/// The sink signature every parser drives: subject, predicate, object,
/// optional graph.
pub type QuadSink<'s> =
    dyn FnMut(&Term<'_>, &Term<'_>, &Term<'_>, Option<&Term<'_>>) -> Result<(), CodecError> + 's;
