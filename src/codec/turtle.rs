//! Turtle — and the document engine TriG shares.
//!
//! The parser buffers the whole document and walks it with a single
//! cursor, emitting triples as it goes; terms borrow from the document
//! where the syntax allows and own their bytes where prefix expansion
//! or unescaping forces it. Supported surface: `@prefix` / `@base` and
//! their SPARQL-style spellings, `a`, object and predicate-object
//! lists, collections `( … )`, blank-node property lists `[ … ]`,
//! numeric / boolean literal shorthand, and long strings. The TriG
//! extension (graph blocks) lives behind a flag and is re-exported by
//! [`super::trig`].
//!
//! The writer groups consecutive triples by subject with `;`
//! continuation lines, abbreviates IRIs through the caller's
//! [`PrefixTable`], prints `a` for `rdf:type`, and uses bare numeric /
//! boolean forms when the lexical form permits.

use std::borrow::Cow;
use std::io::{Read, Write};

use crate::diag::{DiagnosticBag, Span, codes};

use super::{
    CodecError, ParseStats, PrefixTable, RDF_FIRST, RDF_NIL, RDF_REST, RDF_TYPE, Term,
    XSD_BOOLEAN, XSD_DECIMAL, XSD_DOUBLE, XSD_INTEGER, escape_literal_into, unescape_literal,
};

// ------------------------------------------------------------------------------------------------
// Parser facade
// ------------------------------------------------------------------------------------------------

/// Streaming Turtle parser. One instance per document.
#[derive(Debug, Default)]
pub struct TurtleParser {
    lenient: bool,
}

impl TurtleParser {
    /// A strict parser (first error aborts).
    pub fn new() -> Self {
        Self::default()
    }

    /// Switches to lenient mode: a bad statement is reported and the
    /// parser resynchronises at the next `.`.
    pub fn lenient(mut self) -> Self {
        self.lenient = true;
        self
    }

    /// Parses the document, delivering each triple to `sink`.
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
        let mut src = String::new();
        reader.read_to_string(&mut src)?;
        let mut cx = Engine::new(&src, false, self.lenient);
        cx.run(bag, &mut sink)
    }
}

// ------------------------------------------------------------------------------------------------
// Engine
// ------------------------------------------------------------------------------------------------

pub(super) struct Engine<'a> {
    src: &'a str,
    pos: usize,
    line: u32,
    line_start: usize,
    prefixes: PrefixTable,
    gen_counter: u32,
    allow_graphs: bool,
    lenient: bool,
    stats: ParseStats,
}

type Sink<'s> =
    &'s mut dyn FnMut(&Term<'_>, &Term<'_>, &Term<'_>, Option<&Term<'_>>) -> Result<(), CodecError>;

impl<'a> Engine<'a> {
    pub(super) fn new(src: &'a str, allow_graphs: bool, lenient: bool) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            line_start: 0,
            prefixes: PrefixTable::new(),
            gen_counter: 0,
            allow_graphs,
            lenient,
            stats: ParseStats::default(),
        }
    }

    pub(super) fn run(
        &mut self,
        bag: &mut DiagnosticBag,
        sink: Sink<'_>,
    ) -> Result<ParseStats, CodecError> {
        loop {
            self.skip_trivia();
            if self.at_end() {
                return Ok(self.stats);
            }
            match self.parse_statement(sink) {
                Ok(()) => {}
                Err(e) => {
                    if let CodecError::Syntax { line, col, message } = &e {
                        bag.report_with_args(
                            codes::MALFORMED_DOCUMENT,
                            Span::new(self.pos as u32, 1, *line, *col),
                            &[message],
                        );
                    }
                    if !self.lenient {
                        return Err(e);
                    }
                    self.stats.skipped += 1;
                    self.resync();
                }
            }
        }
    }

    // --------------------------------------------------------------------------------------------
    // Cursor primitives
    // --------------------------------------------------------------------------------------------

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.src.as_bytes().get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.line_start = self.pos;
        }
        Some(c)
    }

    fn col(&self) -> u32 {
        (self.pos - self.line_start) as u32 + 1
    }

    fn error(&self, message: impl Into<String>) -> CodecError {
        CodecError::syntax(self.line, self.col(), message)
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.bump();
                }
                b'#' => {
                    while let Some(c) = self.bump() {
                        if c == b'\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    /// After an error: skip to the statement boundary (a top-level `.`
    /// or a closing `}`), so the next statement can parse.
    fn resync(&mut self) {
        let mut depth = 0i32;
        while let Some(c) = self.bump() {
            match c {
                b'[' | b'(' => depth += 1,
                b']' | b')' => depth -= 1,
                b'.' if depth <= 0 => return,
                b'}' => return,
                _ => {}
            }
        }
    }

    fn eat(&mut self, c: u8) -> bool {
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: u8) -> Result<(), CodecError> {
        if !self.eat(c) {
            return Err(self.error(format!(
                "expected '{}'{}",
                c as char,
                self.peek()
                    .map(|f| format!(", found '{}'", f as char))
                    .unwrap_or_else(|| ", found end of input".into())
            )));
        }
        Ok(())
    }

    fn keyword_ahead(&self, kw: &str) -> bool {
        let rest = &self.src[self.pos..];
        rest.len() >= kw.len()
            && rest[..kw.len()].eq_ignore_ascii_case(kw)
            && rest[kw.len()..]
                .chars()
                .next()
                .is_none_or(|c| !c.is_alphanumeric() && c != '_')
    }

    fn take_keyword(&mut self, kw: &str) -> bool {
        if self.keyword_ahead(kw) {
            for _ in 0..kw.len() {
                self.bump();
            }
            true
        } else {
            false
        }
    }

    fn fresh_blank(&mut self) -> Term<'static> {
        self.gen_counter += 1;
        Term::Blank(Cow::Owned(format!("gen{}", self.gen_counter)))
    }

    // --------------------------------------------------------------------------------------------
    // Statements
    // --------------------------------------------------------------------------------------------

    fn parse_statement(&mut self, sink: Sink<'_>) -> Result<(), CodecError> {
        // Directives.
        if self.eat(b'@') {
            if self.take_keyword("prefix") {
                self.parse_prefix_decl()?;
                self.skip_trivia();
                self.expect(b'.')?;
                return Ok(());
            }
            if self.take_keyword("base") {
                self.parse_base_decl()?;
                self.skip_trivia();
                self.expect(b'.')?;
                return Ok(());
            }
            return Err(self.error("unknown directive"));
        }
        if self.keyword_ahead("prefix") && !self.keyword_ahead("prefix:") {
            self.take_keyword("prefix");
            self.parse_prefix_decl()?;
            return Ok(());
        }
        if self.keyword_ahead("base") && !self.keyword_ahead("base:") {
            self.take_keyword("base");
            self.parse_base_decl()?;
            return Ok(());
        }

        // TriG graph blocks.
        if self.allow_graphs {
            if self.take_keyword("graph") {
                self.skip_trivia();
                let label = self.parse_term_simple()?;
                self.skip_trivia();
                self.expect(b'{')?;
                self.parse_graph_body(Some(&label), sink)?;
                return Ok(());
            }
            if self.peek() == Some(b'{') {
                self.bump();
                self.parse_graph_body(None, sink)?;
                return Ok(());
            }
            // `label { … }` — a term followed by an opening brace.
            let checkpoint = (self.pos, self.line, self.line_start);
            if let Ok(label) = self.parse_term_simple() {
                self.skip_trivia();
                if self.eat(b'{') {
                    self.parse_graph_body(Some(&label), sink)?;
                    return Ok(());
                }
            }
            (self.pos, self.line, self.line_start) = checkpoint;
        }

        self.parse_triples(None, sink)?;
        self.skip_trivia();
        self.expect(b'.')?;
        Ok(())
    }

    fn parse_graph_body(&mut self, graph: Option<&Term<'_>>, sink: Sink<'_>) -> Result<(), CodecError> {
        loop {
            self.skip_trivia();
            if self.eat(b'}') {
                return Ok(());
            }
            if self.at_end() {
                return Err(self.error("unterminated graph block"));
            }
            self.parse_triples(graph, sink)?;
            self.skip_trivia();
            // The final statement's dot is optional before '}'.
            if !self.eat(b'.') {
                self.skip_trivia();
                self.expect(b'}')?;
                return Ok(());
            }
        }
    }

    fn parse_prefix_decl(&mut self) -> Result<(), CodecError> {
        self.skip_trivia();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b':' {
                break;
            }
            if (c as char).is_whitespace() {
                break;
            }
            self.bump();
        }
        let prefix = self.src[start..self.pos].to_string();
        self.expect(b':')?;
        self.skip_trivia();
        let iri = self.parse_iri_ref()?;
        self.prefixes.declare(prefix, iri.into_owned());
        Ok(())
    }

    fn parse_base_decl(&mut self) -> Result<(), CodecError> {
        self.skip_trivia();
        let iri = self.parse_iri_ref()?;
        self.prefixes.set_base(iri.into_owned());
        Ok(())
    }

    fn parse_triples(&mut self, graph: Option<&Term<'_>>, sink: Sink<'_>) -> Result<(), CodecError> {
        self.skip_trivia();
        let subject = match self.peek() {
            Some(b'[') => {
                // Blank-node property list as subject.
                let node = self.parse_bnode_property_list(graph, sink)?;
                self.skip_trivia();
                // A bare `[ … ] .` statement is legal; predicates after
                // it are optional.
                if self.peek() == Some(b'.') || self.peek() == Some(b'}') {
                    return Ok(());
                }
                node
            }
            Some(b'(') => self.parse_collection(graph, sink)?,
            _ => self.parse_term_simple()?,
        };
        if subject.is_literal() {
            return Err(self.error("literal is not allowed as subject"));
        }
        self.parse_predicate_object_list(&subject, graph, sink)
    }

    fn parse_predicate_object_list(
        &mut self,
        subject: &Term<'_>,
        graph: Option<&Term<'_>>,
        sink: Sink<'_>,
    ) -> Result<(), CodecError> {
        loop {
            self.skip_trivia();
            let predicate = self.parse_verb()?;
            loop {
                self.skip_trivia();
                let object = self.parse_object(graph, sink)?;
                self.stats.statements += 1;
                sink(subject, &predicate, &object, graph)?;
                self.skip_trivia();
                if !self.eat(b',') {
                    break;
                }
            }
            self.skip_trivia();
            if !self.eat(b';') {
                return Ok(());
            }
            // A trailing ';' before '.', ']' or '}' is allowed.
            self.skip_trivia();
            while self.eat(b';') {
                self.skip_trivia();
            }
            if matches!(self.peek(), Some(b'.') | Some(b']') | Some(b'}')) {
                return Ok(());
            }
        }
    }

    fn parse_verb(&mut self) -> Result<Term<'a>, CodecError> {
        if self.keyword_ahead("a")
            && self
                .peek_at(1)
                .is_none_or(|c| c == b' ' || c == b'\t' || c == b'\n' || c == b'\r' || c == b'<')
            && self.peek() == Some(b'a')
        {
            self.bump();
            return Ok(Term::Iri(Cow::Borrowed(RDF_TYPE)));
        }
        let verb = self.parse_term_simple()?;
        if !verb.is_iri() {
            return Err(self.error("predicate must be an IRI"));
        }
        Ok(verb)
    }

    fn parse_object(
        &mut self,
        graph: Option<&Term<'_>>,
        sink: Sink<'_>,
    ) -> Result<Term<'a>, CodecError> {
        match self.peek() {
            Some(b'[') => self.parse_bnode_property_list(graph, sink),
            Some(b'(') => self.parse_collection(graph, sink),
            _ => self.parse_term_simple(),
        }
    }

    /// `[ p o ; … ]` — emits the inner triples, returns the node.
    fn parse_bnode_property_list(
        &mut self,
        graph: Option<&Term<'_>>,
        sink: Sink<'_>,
    ) -> Result<Term<'a>, CodecError> {
        self.expect(b'[')?;
        let node = self.fresh_blank();
        self.skip_trivia();
        if self.eat(b']') {
            return Ok(node);
        }
        self.parse_predicate_object_list(&node, graph, sink)?;
        self.skip_trivia();
        self.expect(b']')?;
        Ok(node)
    }

    /// `( o₁ o₂ … )` — emits the rdf:first/rdf:rest chain, returns the
    /// head (or rdf:nil when empty).
    fn parse_collection(
        &mut self,
        graph: Option<&Term<'_>>,
        sink: Sink<'_>,
    ) -> Result<Term<'a>, CodecError> {
        self.expect(b'(')?;
        let first_iri = Term::Iri(Cow::Borrowed(RDF_FIRST));
        let rest_iri = Term::Iri(Cow::Borrowed(RDF_REST));
        let nil = Term::Iri(Cow::Borrowed(RDF_NIL));

        let mut head: Option<Term<'a>> = None;
        let mut tail: Option<Term<'a>> = None;
        loop {
            self.skip_trivia();
            if self.eat(b')') {
                break;
            }
            if self.at_end() {
                return Err(self.error("unterminated collection"));
            }
            let item = self.parse_object(graph, sink)?;
            let node = self.fresh_blank();
            match &tail {
                None => head = Some(node.clone()),
                Some(prev) => {
                    self.stats.statements += 1;
                    sink(prev, &rest_iri, &node, graph)?;
                }
            }
            self.stats.statements += 1;
            sink(&node, &first_iri, &item, graph)?;
            tail = Some(node);
        }
        match (head, tail) {
            (Some(head), Some(tail)) => {
                self.stats.statements += 1;
                sink(&tail, &rest_iri, &nil, graph)?;
                Ok(head)
            }
            _ => Ok(nil),
        }
    }

    /// IRI ref, prefixed name, blank label, literal, number, boolean.
    fn parse_term_simple(&mut self) -> Result<Term<'a>, CodecError> {
        self.skip_trivia();
        match self.peek() {
            Some(b'<') => Ok(Term::Iri(self.parse_iri_ref()?)),
            Some(b'_') => self.parse_blank_label(),
            Some(b'"') | Some(b'\'') => self.parse_rdf_literal(),
            Some(c) if c.is_ascii_digit() || c == b'+' || c == b'-' => self.parse_numeric(),
            Some(b'.') if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => {
                self.parse_numeric()
            }
            Some(_) => {
                if self.take_keyword("true") {
                    return Ok(Term::Literal {
                        lexical: Cow::Borrowed("true"),
                        lang: None,
                        datatype: Some(Cow::Borrowed(XSD_BOOLEAN)),
                    });
                }
                if self.take_keyword("false") {
                    return Ok(Term::Literal {
                        lexical: Cow::Borrowed("false"),
                        lang: None,
                        datatype: Some(Cow::Borrowed(XSD_BOOLEAN)),
                    });
                }
                self.parse_prefixed_name()
            }
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn parse_iri_ref(&mut self) -> Result<Cow<'a, str>, CodecError> {
        self.expect(b'<')?;
        let start = self.pos;
        loop {
            match self.peek() {
                Some(b'>') => break,
                Some(b'\n') | None => return Err(self.error("unterminated IRI")),
                _ => {
                    self.bump();
                }
            }
        }
        let raw = &self.src[start..self.pos];
        self.bump(); // '>'
        let unescaped: Cow<'a, str> = if raw.contains('\\') {
            match unescape_literal(raw) {
                Ok(Cow::Owned(s)) => Cow::Owned(s),
                Ok(Cow::Borrowed(_)) => Cow::Borrowed(raw),
                Err(()) => return Err(self.error("invalid escape in IRI")),
            }
        } else {
            Cow::Borrowed(raw)
        };
        let resolved = self.prefixes.resolve(&unescaped);
        if resolved == unescaped.as_ref() {
            Ok(unescaped)
        } else {
            Ok(Cow::Owned(resolved))
        }
    }

    fn parse_blank_label(&mut self) -> Result<Term<'a>, CodecError> {
        let rest = &self.src[self.pos..];
        let Some(label) = rest.strip_prefix("_:") else {
            return Err(self.error("expected '_:'"));
        };
        let end = label
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-' || c == '.'))
            .unwrap_or(label.len());
        let mut label = &label[..end];
        while label.ends_with('.') {
            label = &label[..label.len() - 1];
        }
        if label.is_empty() {
            return Err(self.error("malformed blank node label"));
        }
        for _ in 0..2 + label.len() {
            self.bump();
        }
        Ok(Term::Blank(Cow::Borrowed(label)))
    }

    fn parse_prefixed_name(&mut self) -> Result<Term<'a>, CodecError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            let c = c as char;
            if c == ':' {
                break;
            }
            if c.is_alphanumeric() || c == '_' || c == '-' {
                self.bump();
            } else {
                break;
            }
        }
        if self.peek() != Some(b':') {
            return Err(self.error(format!(
                "unexpected character '{}'",
                self.peek().map(|c| c as char).unwrap_or('?')
            )));
        }
        let prefix = &self.src[start..self.pos];
        self.bump(); // ':'

        let local_start = self.pos;
        while let Some(c) = self.peek() {
            let c = c as char;
            if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' || c == '%' {
                self.bump();
            } else {
                break;
            }
        }
        let mut local = &self.src[local_start..self.pos];
        // A trailing dot belongs to the statement, not the name.
        while local.ends_with('.') {
            local = &local[..local.len() - 1];
            self.pos -= 1;
        }

        match self.prefixes.expand(prefix, local) {
            Some(iri) => Ok(Term::Iri(Cow::Owned(iri))),
            None => Err(self.error(format!("undefined prefix '{prefix}'"))),
        }
    }

    fn parse_rdf_literal(&mut self) -> Result<Term<'a>, CodecError> {
        let quote = self
            .peek()
            .ok_or_else(|| self.error("unexpected end of input"))?;
        let long = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        let raw = if long {
            for _ in 0..3 {
                self.bump();
            }
            let start = self.pos;
            loop {
                if self.pos + 3 > self.src.len() {
                    return Err(self.error("unterminated string literal"));
                }
                if self.src.as_bytes()[self.pos] == quote
                    && self.src.as_bytes()[self.pos + 1] == quote
                    && self.src.as_bytes()[self.pos + 2] == quote
                {
                    break;
                }
                if self.src.as_bytes()[self.pos] == b'\\' {
                    self.bump();
                }
                self.bump();
            }
            let raw = &self.src[start..self.pos];
            for _ in 0..3 {
                self.bump();
            }
            raw
        } else {
            self.bump();
            let start = self.pos;
            loop {
                match self.peek() {
                    Some(c) if c == quote => break,
                    Some(b'\\') => {
                        self.bump();
                        self.bump();
                    }
                    Some(b'\n') | None => {
                        return Err(self.error("unterminated string literal"));
                    }
                    _ => {
                        self.bump();
                    }
                }
            }
            let raw = &self.src[start..self.pos];
            self.bump();
            raw
        };

        let lexical =
            unescape_literal(raw).map_err(|_| self.error("invalid escape sequence"))?;

        // Suffix.
        if self.eat(b'@') {
            let start = self.pos;
            while let Some(c) = self.peek() {
                if (c as char).is_ascii_alphanumeric() || c == b'-' {
                    self.bump();
                } else {
                    break;
                }
            }
            let lang = &self.src[start..self.pos];
            if lang.is_empty() {
                return Err(self.error("malformed language tag"));
            }
            return Ok(Term::Literal {
                lexical,
                lang: Some(Cow::Borrowed(lang)),
                datatype: None,
            });
        }
        if self.peek() == Some(b'^') {
            self.bump();
            self.expect(b'^')?;
            self.skip_trivia();
            let dt = self.parse_term_simple()?;
            let Term::Iri(dt) = dt else {
                return Err(self.error("datatype must be an IRI"));
            };
            return Ok(Term::Literal {
                lexical,
                lang: None,
                datatype: Some(dt),
            });
        }
        Ok(Term::Literal {
            lexical,
            lang: None,
            datatype: None,
        })
    }

    fn parse_numeric(&mut self) -> Result<Term<'a>, CodecError> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'+') | Some(b'-')) {
            self.bump();
        }
        let mut has_dot = false;
        let mut has_exp = false;
        while let Some(c) = self.peek() {
            match c {
                b'0'..=b'9' => {
                    self.bump();
                }
                b'.' if !has_dot && !has_exp => {
                    // A dot not followed by a digit terminates the
                    // statement instead.
                    if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) {
                        has_dot = true;
                        self.bump();
                    } else {
                        break;
                    }
                }
                b'e' | b'E' if !has_exp => {
                    has_exp = true;
                    self.bump();
                    if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                        self.bump();
                    }
                }
                _ => break,
            }
        }
        let lexical = &self.src[start..self.pos];
        if lexical.is_empty() || lexical == "+" || lexical == "-" {
            return Err(self.error("malformed numeric literal"));
        }
        let datatype = if has_exp {
            XSD_DOUBLE
        } else if has_dot {
            XSD_DECIMAL
        } else {
            XSD_INTEGER
        };
        Ok(Term::Literal {
            lexical: Cow::Borrowed(lexical),
            lang: None,
            datatype: Some(Cow::Borrowed(datatype)),
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Writer
// ------------------------------------------------------------------------------------------------

/// Turtle writer with subject grouping and prefix abbreviation.
pub struct TurtleWriter<W: Write> {
    out: W,
    prefixes: PrefixTable,
    current_subject: Option<String>,
    header_written: bool,
}

impl<W: Write> TurtleWriter<W> {
    /// Wraps an output stream; `prefixes` drives abbreviation and is
    /// printed as `@prefix` directives before the first triple.
    pub fn new(out: W, prefixes: PrefixTable) -> Self {
        Self {
            out,
            prefixes,
            current_subject: None,
            header_written: false,
        }
    }

    /// Writes one triple, grouping consecutive same-subject triples
    /// with `;`.
    pub fn write_triple(
        &mut self,
        s: &Term<'_>,
        p: &Term<'_>,
        o: &Term<'_>,
    ) -> Result<(), CodecError> {
        self.write_header()?;
        let subject = render_term(s, &self.prefixes, true);
        let mut line = String::new();
        match &self.current_subject {
            Some(current) if *current == subject => {
                line.push_str(" ;\n    ");
            }
            Some(_) => {
                line.push_str(" .\n");
                line.push_str(&subject);
                line.push(' ');
            }
            None => {
                line.push_str(&subject);
                line.push(' ');
            }
        }
        line.push_str(&render_predicate(p, &self.prefixes));
        line.push(' ');
        line.push_str(&render_term(o, &self.prefixes, false));
        self.out.write_all(line.as_bytes())?;
        self.current_subject = Some(subject);
        Ok(())
    }

    /// Terminates the last statement, flushes, and returns the stream.
    pub fn finish(mut self) -> Result<W, CodecError> {
        if self.current_subject.is_some() {
            self.out.write_all(b" .\n")?;
        }
        self.out.flush()?;
        Ok(self.out)
    }

    fn write_header(&mut self) -> Result<(), CodecError> {
        if self.header_written {
            return Ok(());
        }
        self.header_written = true;
        write_prefix_header(&mut self.out, &self.prefixes)?;
        Ok(())
    }
}

pub(super) fn write_prefix_header<W: Write>(
    out: &mut W,
    prefixes: &PrefixTable,
) -> Result<(), CodecError> {
    let mut any = false;
    if let Some(base) = prefixes.base() {
        out.write_all(format!("@base <{base}> .\n").as_bytes())?;
        any = true;
    }
    for (prefix, ns) in prefixes.iter() {
        out.write_all(format!("@prefix {prefix}: <{ns}> .\n").as_bytes())?;
        any = true;
    }
    if any {
        out.write_all(b"\n")?;
    }
    Ok(())
}

/// Renders a term in Turtle surface syntax.
pub(super) fn render_term(term: &Term<'_>, prefixes: &PrefixTable, subject_position: bool) -> String {
    match term {
        Term::Iri(iri) => match prefixes.abbreviate(iri) {
            Some((prefix, local)) => format!("{prefix}:{local}"),
            None => format!("<{iri}>"),
        },
        Term::Blank(label) => format!("_:{label}"),
        Term::Literal {
            lexical,
            lang,
            datatype,
        } => {
            // Bare forms for the shorthand-able datatypes.
            if lang.is_none() && !subject_position {
                match datatype.as_deref() {
                    Some(XSD_INTEGER) if lexical.parse::<i64>().is_ok() => {
                        return lexical.to_string();
                    }
                    Some(XSD_BOOLEAN) if lexical.as_ref() == "true" || lexical.as_ref() == "false" => {
                        return lexical.to_string();
                    }
                    Some(XSD_DECIMAL)
                        if lexical.contains('.') && lexical.parse::<f64>().is_ok() =>
                    {
                        return lexical.to_string();
                    }
                    _ => {}
                }
            }
            let mut out = String::new();
            out.push('"');
            escape_literal_into(lexical, &mut out);
            out.push('"');
            if let Some(lang) = lang {
                out.push('@');
                out.push_str(lang);
            } else if let Some(dt) = datatype {
                if dt != super::XSD_STRING {
                    match prefixes.abbreviate(dt) {
                        Some((prefix, local)) => {
                            out.push_str("^^");
                            out.push_str(prefix);
                            out.push(':');
                            out.push_str(local);
                        }
                        None => {
                            out.push_str("^^<");
                            out.push_str(dt);
                            out.push('>');
                        }
                    }
                }
            }
            out
        }
    }
}

pub(super) fn render_predicate(p: &Term<'_>, prefixes: &PrefixTable) -> String {
    if let Term::Iri(iri) = p
        && iri == RDF_TYPE
    {
        return "a".to_string();
    }
    render_term(p, prefixes, true)
}
