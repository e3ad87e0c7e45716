//! SPARQL recursive-descent parser.
//!
//! Consumes the token stream from [`super::lexer`] and produces the
//! span-carrying AST in [`super::ast`]. Problems are reported to the
//! caller's [`DiagnosticBag`] — syntax errors abort with
//! [`SparqlError::Syntax`], semantic findings (undefined prefixes,
//! aggregate misuse, Cartesian products, unbound filter variables) are
//! reported as diagnostics and only halt when they are errors.

use smallvec::SmallVec;

use crate::diag::{DiagnosticBag, Span, WARNING_BASE, codes};
use crate::model::Timestamp;

use super::SparqlError;
use super::ast::*;
use super::lexer::{Punct, Tok, Token, tokenize};

/// RDF `type` IRI, for the `a` keyword.
const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

/// Parses a SPARQL query.
pub fn parse_query(
    src: &str,
    strict: bool,
    bag: &mut DiagnosticBag,
) -> Result<Query, SparqlError> {
    let tokens = tokenize(src).map_err(|e| {
        bag.report_with_args(codes::UNEXPECTED_CHAR, e.span, &[&e.message]);
        SparqlError::Syntax {
            span: e.span,
            message: e.message,
        }
    })?;
    let mut parser = Parser::new(src, tokens, strict, bag);
    let query = parser.query()?;
    parser.check_query_semantics(&query);
    if parser.bag.has_errors() {
        return Err(SparqlError::Invalid);
    }
    Ok(query)
}

/// Parses a SPARQL update request (operations separated by `;`).
pub fn parse_update(
    src: &str,
    strict: bool,
    bag: &mut DiagnosticBag,
) -> Result<Update, SparqlError> {
    let tokens = tokenize(src).map_err(|e| {
        bag.report_with_args(codes::UNEXPECTED_CHAR, e.span, &[&e.message]);
        SparqlError::Syntax {
            span: e.span,
            message: e.message,
        }
    })?;
    let mut parser = Parser::new(src, tokens, strict, bag);
    let update = parser.update()?;
    if parser.bag.has_errors() {
        return Err(SparqlError::Invalid);
    }
    Ok(update)
}

struct Parser<'a, 'b> {
    src: &'a str,
    tokens: Vec<Token<'a>>,
    pos: usize,
    strict: bool,
    bag: &'b mut DiagnosticBag,
    prefixes: crate::codec::PrefixTable,
    variables: Vec<String>,
    blank_counter: u32,
    /// True while parsing a query that groups or aggregates.
    in_aggregate_query: bool,
}

impl<'a, 'b> Parser<'a, 'b> {
    fn new(src: &'a str, tokens: Vec<Token<'a>>, strict: bool, bag: &'b mut DiagnosticBag) -> Self {
        Self {
            src,
            tokens,
            pos: 0,
            strict,
            bag,
            prefixes: crate::codec::PrefixTable::new(),
            variables: Vec::new(),
            blank_counter: 0,
            in_aggregate_query: false,
        }
    }

    // --------------------------------------------------------------------------------------------
    // Token utilities
    // --------------------------------------------------------------------------------------------

    fn tok(&self) -> &Tok<'a> {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].tok
    }

    fn span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    fn bump(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn error(&mut self, expected: &str) -> SparqlError {
        let span = self.span();
        let found = self.tok().describe();
        self.bag
            .report_with_args(codes::EXPECTED_FOUND, span, &[expected, &found]);
        SparqlError::Syntax {
            span,
            message: format!("expected {expected}, found {found}"),
        }
    }

    fn is_kw(&self, kw: &str) -> bool {
        matches!(self.tok(), Tok::Ident(name) if name.eq_ignore_ascii_case(kw))
    }

    fn take_kw(&mut self, kw: &str) -> bool {
        if self.is_kw(kw) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> Result<(), SparqlError> {
        if self.take_kw(kw) {
            Ok(())
        } else {
            Err(self.error(&format!("'{kw}'")))
        }
    }

    fn is_punct(&self, p: Punct) -> bool {
        matches!(self.tok(), Tok::Punct(q) if *q == p)
    }

    fn take_punct(&mut self, p: Punct) -> bool {
        if self.is_punct(p) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: Punct, what: &str) -> Result<(), SparqlError> {
        if self.take_punct(p) {
            Ok(())
        } else {
            Err(self.error(what))
        }
    }

    fn var_id(&mut self, name: &str) -> VarId {
        if let Some(idx) = self.variables.iter().position(|v| v == name) {
            return idx as VarId;
        }
        self.variables.push(name.to_string());
        (self.variables.len() - 1) as VarId
    }

    fn fresh_blank(&mut self) -> TermPat {
        self.blank_counter += 1;
        TermPat::Blank(format!("qb{}", self.blank_counter))
    }

    fn expand_pname(&mut self, prefix: &str, local: &str) -> Result<String, SparqlError> {
        match self.prefixes.expand(prefix, local) {
            Some(iri) => Ok(iri),
            None => {
                let span = self.span();
                self.bag
                    .report_with_args(codes::UNDEFINED_PREFIX, span, &[prefix]);
                Err(SparqlError::Syntax {
                    span,
                    message: format!("undefined prefix '{prefix}'"),
                })
            }
        }
    }

    // --------------------------------------------------------------------------------------------
    // Prologue
    // --------------------------------------------------------------------------------------------

    fn prologue(&mut self) -> Result<(), SparqlError> {
        loop {
            if self.take_kw("PREFIX") {
                let prefix = match self.tok().clone() {
                    Tok::PName { prefix, local } if local.is_empty() => prefix.to_string(),
                    _ => return Err(self.error("prefix declaration")),
                };
                self.bump();
                let iri = match self.tok().clone() {
                    Tok::Iri(iri) => iri.to_string(),
                    _ => return Err(self.error("IRI")),
                };
                self.bump();
                let resolved = self.prefixes.resolve(&iri);
                self.prefixes.declare(prefix, resolved);
            } else if self.take_kw("BASE") {
                let iri = match self.tok().clone() {
                    Tok::Iri(iri) => iri.to_string(),
                    _ => return Err(self.error("IRI")),
                };
                self.bump();
                self.prefixes.set_base(iri);
            } else {
                return Ok(());
            }
        }
    }

    // --------------------------------------------------------------------------------------------
    // Query
    // --------------------------------------------------------------------------------------------

    fn query(&mut self) -> Result<Query, SparqlError> {
        self.prologue()?;
        let prologue_text = self.src[..self.span().offset as usize].to_string();

        let kind = if self.is_kw("SELECT") {
            QueryKind::Select(self.select_clause()?)
        } else if self.take_kw("CONSTRUCT") {
            self.expect_punct(Punct::LBrace, "'{'")?;
            let template = self.triple_template_block()?;
            QueryKind::Construct(template)
        } else if self.take_kw("DESCRIBE") {
            let mut targets = Vec::new();
            if self.take_punct(Punct::Star) {
                // DESCRIBE * — every variable in the pattern.
            } else {
                loop {
                    match self.tok().clone() {
                        Tok::Var(name) => {
                            let id = self.var_id(name);
                            targets.push(TermPat::Var(id));
                            self.bump();
                        }
                        Tok::Iri(iri) => {
                            let iri = self.prefixes.resolve(iri);
                            targets.push(TermPat::Iri(iri));
                            self.bump();
                        }
                        Tok::PName { prefix, local } => {
                            let iri = self.expand_pname(prefix, local)?;
                            targets.push(TermPat::Iri(iri));
                            self.bump();
                        }
                        _ => break,
                    }
                }
                if targets.is_empty() {
                    return Err(self.error("describe target"));
                }
            }
            QueryKind::Describe(targets)
        } else if self.take_kw("ASK") {
            QueryKind::Ask
        } else {
            return Err(self.error("'SELECT', 'CONSTRUCT', 'DESCRIBE', or 'ASK'"));
        };

        let dataset = self.dataset_clauses()?;

        // WHERE is optional for DESCRIBE.
        let pattern = if self.take_kw("WHERE") {
            self.group_pattern(1)?
        } else if self.is_punct(Punct::LBrace) {
            self.group_pattern(1)?
        } else if matches!(kind, QueryKind::Describe(_)) {
            GroupPattern::default()
        } else {
            return Err(self.error("'WHERE'"));
        };

        let modifiers = self.solution_modifiers()?;
        let temporal = self.temporal_clause()?;

        if !matches!(self.tok(), Tok::Eof) {
            return Err(self.error("end of query"));
        }

        Ok(Query {
            kind,
            dataset,
            pattern,
            modifiers,
            temporal,
            variables: std::mem::take(&mut self.variables),
            prologue_text,
        })
    }

    fn select_clause(&mut self) -> Result<SelectClause, SparqlError> {
        self.expect_kw("SELECT")?;
        let distinct = self.take_kw("DISTINCT");
        let reduced = !distinct && self.take_kw("REDUCED");

        if self.take_punct(Punct::Star) {
            return Ok(SelectClause {
                distinct,
                reduced,
                projection: Projection::All,
            });
        }

        let mut items: SmallVec<[ProjItem; 8]> = SmallVec::new();
        loop {
            let span = self.span();
            match self.tok().clone() {
                Tok::Var(name) => {
                    let var = self.var_id(name);
                    self.bump();
                    items.push(ProjItem {
                        var,
                        expr: None,
                        span,
                    });
                }
                Tok::Punct(Punct::LParen) => {
                    self.bump();
                    let expr = self.expression()?;
                    self.expect_kw("AS")?;
                    let Tok::Var(name) = self.tok().clone() else {
                        return Err(self.error("variable"));
                    };
                    let var = self.var_id(name);
                    self.bump();
                    self.expect_punct(Punct::RParen, "')'")?;
                    items.push(ProjItem {
                        var,
                        expr: Some(expr),
                        span,
                    });
                }
                _ => break,
            }
        }
        if items.is_empty() {
            return Err(self.error("projection"));
        }
        Ok(SelectClause {
            distinct,
            reduced,
            projection: Projection::Items(items),
        })
    }

    fn dataset_clauses(&mut self) -> Result<Vec<DatasetClause>, SparqlError> {
        let mut clauses = Vec::new();
        while self.take_kw("FROM") {
            let named = self.take_kw("NAMED");
            let iri = self.iri_value()?;
            clauses.push(DatasetClause { named, iri });
        }
        Ok(clauses)
    }

    fn iri_value(&mut self) -> Result<String, SparqlError> {
        match self.tok().clone() {
            Tok::Iri(iri) => {
                let iri = self.prefixes.resolve(iri);
                self.bump();
                Ok(iri)
            }
            Tok::PName { prefix, local } => {
                let iri = self.expand_pname(prefix, local)?;
                self.bump();
                Ok(iri)
            }
            _ => Err(self.error("IRI")),
        }
    }

    // --------------------------------------------------------------------------------------------
    // Group graph patterns
    // --------------------------------------------------------------------------------------------

    fn group_pattern(&mut self, depth: u8) -> Result<GroupPattern, SparqlError> {
        let span = self.span();
        self.expect_punct(Punct::LBrace, "'{'")?;
        let mut group = GroupPattern {
            elements: Vec::new(),
            depth,
            span,
        };

        loop {
            if self.take_punct(Punct::RBrace) {
                return Ok(group);
            }
            if matches!(self.tok(), Tok::Eof) {
                return Err(self.error("'}'"));
            }

            if self.is_punct(Punct::LBrace) {
                // Subquery or nested group / UNION chain.
                let saved = self.pos;
                self.bump();
                let is_subselect = self.is_kw("SELECT");
                self.pos = saved;
                if is_subselect {
                    self.bump();
                    let sub = self.sub_select(depth + 1)?;
                    self.expect_punct(Punct::RBrace, "'}'")?;
                    group.elements.push(Element::SubSelect(Box::new(sub)));
                } else {
                    let first = self.group_pattern(depth + 1)?;
                    if self.is_kw("UNION") {
                        let mut branches = vec![first];
                        while self.take_kw("UNION") {
                            branches.push(self.group_pattern(depth + 1)?);
                        }
                        group.elements.push(Element::Union(branches));
                    } else {
                        group.elements.push(Element::Group(first));
                    }
                }
            } else if self.take_kw("OPTIONAL") {
                let inner = self.group_pattern(depth + 1)?;
                group.elements.push(Element::Optional(inner));
            } else if self.take_kw("MINUS") {
                let inner = self.group_pattern(depth + 1)?;
                group.elements.push(Element::Minus(inner));
            } else if self.take_kw("GRAPH") {
                let term = self.var_or_iri()?;
                let inner = self.group_pattern(depth + 1)?;
                group.elements.push(Element::Graph {
                    term,
                    pattern: inner,
                });
            } else if self.take_kw("SERVICE") {
                let silent = self.take_kw("SILENT");
                let endpoint = self.var_or_iri()?;
                let raw_start = self.span().offset as usize;
                let inner = self.group_pattern(depth + 1)?;
                let raw_end = self.tokens[self.pos - 1].span.offset as usize + 1;
                let raw = self
                    .src
                    .get(raw_start..raw_end)
                    .unwrap_or("")
                    .to_string();
                group.elements.push(Element::Service {
                    silent,
                    endpoint,
                    pattern: inner,
                    raw,
                });
            } else if self.take_kw("FILTER") {
                let expr = self.constraint()?;
                group.elements.push(Element::Filter { expr, depth });
            } else if self.take_kw("BIND") {
                self.expect_punct(Punct::LParen, "'('")?;
                let expr = self.expression()?;
                self.expect_kw("AS")?;
                let Tok::Var(name) = self.tok().clone() else {
                    return Err(self.error("variable"));
                };
                let var = self.var_id(name);
                self.bump();
                self.expect_punct(Punct::RParen, "')'")?;
                let after_element = group.elements.len();
                group.elements.push(Element::Bind {
                    expr,
                    var,
                    depth,
                    after_element,
                });
            } else if self.take_kw("VALUES") {
                let values = self.values_block()?;
                group.elements.push(values);
            } else {
                // A triples block.
                self.triples_block(&mut group)?;
            }

            // Optional dots between elements.
            while self.take_punct(Punct::Dot) {}
        }
    }

    fn sub_select(&mut self, depth: u8) -> Result<Query, SparqlError> {
        let select = self.select_clause()?;
        let _ = self.take_kw("WHERE");
        let pattern = self.group_pattern(depth)?;
        let modifiers = self.solution_modifiers()?;
        Ok(Query {
            kind: QueryKind::Select(select),
            dataset: Vec::new(),
            pattern,
            modifiers,
            temporal: None,
            variables: Vec::new(), // shares the outer table via ids
            prologue_text: String::new(),
        })
    }

    fn var_or_iri(&mut self) -> Result<TermPat, SparqlError> {
        match self.tok().clone() {
            Tok::Var(name) => {
                let id = self.var_id(name);
                self.bump();
                Ok(TermPat::Var(id))
            }
            _ => Ok(TermPat::Iri(self.iri_value()?)),
        }
    }

    fn values_block(&mut self) -> Result<Element, SparqlError> {
        let mut vars = Vec::new();
        let single = match self.tok().clone() {
            Tok::Var(name) => {
                vars.push(self.var_id(name));
                self.bump();
                true
            }
            Tok::Punct(Punct::LParen) => {
                self.bump();
                while let Tok::Var(name) = self.tok().clone() {
                    vars.push(self.var_id(name));
                    self.bump();
                }
                self.expect_punct(Punct::RParen, "')'")?;
                false
            }
            _ => return Err(self.error("variable or '('")),
        };

        self.expect_punct(Punct::LBrace, "'{'")?;
        let mut rows = Vec::new();
        loop {
            if self.take_punct(Punct::RBrace) {
                break;
            }
            if single {
                let value = self.data_value()?;
                rows.push(vec![value]);
            } else {
                self.expect_punct(Punct::LParen, "'('")?;
                let mut row = Vec::new();
                while !self.take_punct(Punct::RParen) {
                    row.push(self.data_value()?);
                }
                if row.len() != vars.len() {
                    return Err(self.error("a value for every VALUES variable"));
                }
                rows.push(row);
            }
        }
        Ok(Element::Values { vars, rows })
    }

    /// A VALUES cell: ground term or UNDEF.
    fn data_value(&mut self) -> Result<Option<TermPat>, SparqlError> {
        if self.take_kw("UNDEF") {
            return Ok(None);
        }
        let term = self.ground_term()?;
        Ok(Some(term))
    }

    // --------------------------------------------------------------------------------------------
    // Triples
    // --------------------------------------------------------------------------------------------

    fn triples_block(&mut self, group: &mut GroupPattern) -> Result<(), SparqlError> {
        let subject = self.term_or_bnode_list(group)?;
        self.predicate_object_list(&subject, group)?;
        Ok(())
    }

    fn predicate_object_list(
        &mut self,
        subject: &TermPat,
        group: &mut GroupPattern,
    ) -> Result<(), SparqlError> {
        loop {
            let span = self.span();
            let predicate = self.path_or_var()?;
            loop {
                let object = self.term_or_bnode_list(group)?;
                group.elements.push(Element::Triple(TriplePattern {
                    s: subject.clone(),
                    p: predicate.clone(),
                    o: object,
                    span,
                }));
                if !self.take_punct(Punct::Comma) {
                    break;
                }
            }
            if !self.take_punct(Punct::Semicolon) {
                return Ok(());
            }
            // Trailing semicolon before '.' or '}' is legal.
            if self.is_punct(Punct::Dot) || self.is_punct(Punct::RBrace) {
                return Ok(());
            }
        }
    }

    /// Subject/object position: term, `[ … ]`, or `( … )` collection.
    fn term_or_bnode_list(&mut self, group: &mut GroupPattern) -> Result<TermPat, SparqlError> {
        if self.is_punct(Punct::LBracket) {
            self.bump();
            let node = self.fresh_blank();
            if self.take_punct(Punct::RBracket) {
                return Ok(node);
            }
            self.predicate_object_list(&node, group)?;
            self.expect_punct(Punct::RBracket, "']'")?;
            return Ok(node);
        }
        if self.is_punct(Punct::LParen) {
            return self.collection(group);
        }
        self.graph_term()
    }

    fn collection(&mut self, group: &mut GroupPattern) -> Result<TermPat, SparqlError> {
        self.expect_punct(Punct::LParen, "'('")?;
        let first = TermPat::Iri(crate::codec::RDF_FIRST.to_string());
        let rest = TermPat::Iri(crate::codec::RDF_REST.to_string());
        let nil = TermPat::Iri(crate::codec::RDF_NIL.to_string());

        let mut head: Option<TermPat> = None;
        let mut tail: Option<TermPat> = None;
        loop {
            if self.take_punct(Punct::RParen) {
                break;
            }
            if matches!(self.tok(), Tok::Eof) {
                return Err(self.error("')'"));
            }
            let item = self.term_or_bnode_list(group)?;
            let node = self.fresh_blank();
            let span = self.span();
            if let Some(prev) = &tail {
                group.elements.push(Element::Triple(TriplePattern {
                    s: prev.clone(),
                    p: Predicate::Term(rest.clone()),
                    o: node.clone(),
                    span,
                }));
            } else {
                head = Some(node.clone());
            }
            group.elements.push(Element::Triple(TriplePattern {
                s: node.clone(),
                p: Predicate::Term(first.clone()),
                o: item,
                span,
            }));
            tail = Some(node);
        }
        match (head, tail) {
            (Some(head), Some(last)) => {
                let span = self.span();
                group.elements.push(Element::Triple(TriplePattern {
                    s: last,
                    p: Predicate::Term(rest),
                    o: nil,
                    span,
                }));
                Ok(head)
            }
            _ => Ok(nil),
        }
    }

    /// A ground or variable term in a pattern.
    fn graph_term(&mut self) -> Result<TermPat, SparqlError> {
        match self.tok().clone() {
            Tok::Var(name) => {
                let id = self.var_id(name);
                self.bump();
                Ok(TermPat::Var(id))
            }
            Tok::BlankLabel(label) => {
                self.bump();
                Ok(TermPat::Blank(label.to_string()))
            }
            _ => self.ground_term(),
        }
    }

    /// A ground term: IRI, literal, boolean, or number.
    fn ground_term(&mut self) -> Result<TermPat, SparqlError> {
        match self.tok().clone() {
            Tok::Iri(iri) => {
                let iri = self.prefixes.resolve(iri);
                self.bump();
                Ok(TermPat::Iri(iri))
            }
            Tok::PName { prefix, local } => {
                let iri = self.expand_pname(prefix, local)?;
                self.bump();
                Ok(TermPat::Iri(iri))
            }
            Tok::StringLit(lexical) => {
                let lexical = lexical.to_string();
                self.bump();
                match self.tok().clone() {
                    Tok::LangTag(tag) => {
                        let tag = tag.to_string();
                        self.bump();
                        Ok(TermPat::Literal {
                            lexical,
                            lang: Some(tag),
                            datatype: None,
                        })
                    }
                    Tok::Punct(Punct::CaretCaret) => {
                        self.bump();
                        let dt = self.iri_value()?;
                        Ok(TermPat::Literal {
                            lexical,
                            lang: None,
                            datatype: Some(dt),
                        })
                    }
                    _ => Ok(TermPat::Literal {
                        lexical,
                        lang: None,
                        datatype: None,
                    }),
                }
            }
            Tok::Integer(n) => {
                let n = n.to_string();
                self.bump();
                Ok(TermPat::Literal {
                    lexical: n,
                    lang: None,
                    datatype: Some(crate::codec::XSD_INTEGER.to_string()),
                })
            }
            Tok::Decimal(n) => {
                let n = n.to_string();
                self.bump();
                Ok(TermPat::Literal {
                    lexical: n,
                    lang: None,
                    datatype: Some(crate::codec::XSD_DECIMAL.to_string()),
                })
            }
            Tok::Double(n) => {
                let n = n.to_string();
                self.bump();
                Ok(TermPat::Literal {
                    lexical: n,
                    lang: None,
                    datatype: Some(crate::codec::XSD_DOUBLE.to_string()),
                })
            }
            Tok::Ident(name) if name.eq_ignore_ascii_case("true") => {
                self.bump();
                Ok(TermPat::Literal {
                    lexical: "true".into(),
                    lang: None,
                    datatype: Some(crate::codec::XSD_BOOLEAN.to_string()),
                })
            }
            Tok::Ident(name) if name.eq_ignore_ascii_case("false") => {
                self.bump();
                Ok(TermPat::Literal {
                    lexical: "false".into(),
                    lang: None,
                    datatype: Some(crate::codec::XSD_BOOLEAN.to_string()),
                })
            }
            Tok::Punct(Punct::Minus) => {
                // Negative numeric literal.
                self.bump();
                match self.tok().clone() {
                    Tok::Integer(n) => {
                        let n = format!("-{n}");
                        self.bump();
                        Ok(TermPat::Literal {
                            lexical: n,
                            lang: None,
                            datatype: Some(crate::codec::XSD_INTEGER.to_string()),
                        })
                    }
                    Tok::Decimal(n) => {
                        let n = format!("-{n}");
                        self.bump();
                        Ok(TermPat::Literal {
                            lexical: n,
                            lang: None,
                            datatype: Some(crate::codec::XSD_DECIMAL.to_string()),
                        })
                    }
                    Tok::Double(n) => {
                        let n = format!("-{n}");
                        self.bump();
                        Ok(TermPat::Literal {
                            lexical: n,
                            lang: None,
                            datatype: Some(crate::codec::XSD_DOUBLE.to_string()),
                        })
                    }
                    _ => Err(self.error("numeric literal")),
                }
            }
            _ => Err(self.error("term")),
        }
    }

    // --------------------------------------------------------------------------------------------
    // Property paths
    // --------------------------------------------------------------------------------------------

    /// Predicate position: `a`, a variable, an IRI, or a path.
    fn path_or_var(&mut self) -> Result<Predicate, SparqlError> {
        if let Tok::Var(name) = self.tok().clone() {
            let id = self.var_id(name);
            self.bump();
            return Ok(Predicate::Term(TermPat::Var(id)));
        }
        let path = self.path_alternative()?;
        // A bare IRI hop is an ordinary predicate.
        if let PropPath::Iri(iri) = &path {
            return Ok(Predicate::Term(TermPat::Iri(iri.clone())));
        }
        Ok(Predicate::Path(path))
    }

    fn path_alternative(&mut self) -> Result<PropPath, SparqlError> {
        let mut left = self.path_sequence()?;
        while self.take_punct(Punct::Pipe) {
            let right = self.path_sequence()?;
            left = PropPath::Alt(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn path_sequence(&mut self) -> Result<PropPath, SparqlError> {
        let mut left = self.path_elt_or_inverse()?;
        while self.take_punct(Punct::Slash) {
            let right = self.path_elt_or_inverse()?;
            left = PropPath::Seq(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn path_elt_or_inverse(&mut self) -> Result<PropPath, SparqlError> {
        if self.take_punct(Punct::Caret) {
            let inner = self.path_elt()?;
            return Ok(PropPath::Inverse(Box::new(inner)));
        }
        self.path_elt()
    }

    fn path_elt(&mut self) -> Result<PropPath, SparqlError> {
        let primary = self.path_primary()?;
        if self.take_punct(Punct::Star) {
            return Ok(PropPath::ZeroOrMore(Box::new(primary)));
        }
        if self.take_punct(Punct::Plus) {
            return Ok(PropPath::OneOrMore(Box::new(primary)));
        }
        if self.take_punct(Punct::Question) {
            return Ok(PropPath::ZeroOrOne(Box::new(primary)));
        }
        Ok(primary)
    }

    fn path_primary(&mut self) -> Result<PropPath, SparqlError> {
        if self.take_punct(Punct::Bang) {
            // Negated property set.
            let mut members = Vec::new();
            if self.take_punct(Punct::LParen) {
                loop {
                    // Inverse members are accepted syntactically and
                    // treated as forward for the scan.
                    let _ = self.take_punct(Punct::Caret);
                    members.push(self.path_iri()?);
                    if !self.take_punct(Punct::Pipe) {
                        break;
                    }
                }
                self.expect_punct(Punct::RParen, "')'")?;
            } else {
                let _ = self.take_punct(Punct::Caret);
                members.push(self.path_iri()?);
            }
            return Ok(PropPath::Negated(members));
        }
        if self.take_punct(Punct::LParen) {
            let inner = self.path_alternative()?;
            self.expect_punct(Punct::RParen, "')'")?;
            return Ok(inner);
        }
        Ok(PropPath::Iri(self.path_iri()?))
    }

    fn path_iri(&mut self) -> Result<String, SparqlError> {
        if let Tok::Ident(name) = self.tok() {
            if *name == "a" {
                self.bump();
                return Ok(RDF_TYPE.to_string());
            }
        }
        self.iri_value()
    }

    // --------------------------------------------------------------------------------------------
    // Expressions
    // --------------------------------------------------------------------------------------------

    fn constraint(&mut self) -> Result<Expr, SparqlError> {
        // FILTER ( expr ) | FILTER builtinCall | FILTER EXISTS { … }
        if self.is_punct(Punct::LParen) {
            self.bump();
            let expr = self.expression()?;
            self.expect_punct(Punct::RParen, "')'")?;
            return Ok(expr);
        }
        self.unary_primary()
    }

    fn expression(&mut self) -> Result<Expr, SparqlError> {
        self.or_expression()
    }

    fn or_expression(&mut self) -> Result<Expr, SparqlError> {
        let mut left = self.and_expression()?;
        while self.take_punct(Punct::PipePipe) {
            let right = self.and_expression()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expression(&mut self) -> Result<Expr, SparqlError> {
        let mut left = self.relational()?;
        while self.take_punct(Punct::AmpAmp) {
            let right = self.relational()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn relational(&mut self) -> Result<Expr, SparqlError> {
        let left = self.additive()?;
        let op = match self.tok() {
            Tok::Punct(Punct::Eq) => Some(CmpOp::Eq),
            Tok::Punct(Punct::BangEq) => Some(CmpOp::Ne),
            Tok::Punct(Punct::Lt) => Some(CmpOp::Lt),
            Tok::Punct(Punct::Le) => Some(CmpOp::Le),
            Tok::Punct(Punct::Gt) => Some(CmpOp::Gt),
            Tok::Punct(Punct::Ge) => Some(CmpOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let right = self.additive()?;
            return Ok(Expr::Compare(op, Box::new(left), Box::new(right)));
        }
        if self.is_kw("IN") || self.is_kw("NOT") {
            let negated = self.take_kw("NOT");
            if negated && !self.is_kw("IN") {
                return Err(self.error("'IN'"));
            }
            self.expect_kw("IN")?;
            self.expect_punct(Punct::LParen, "'('")?;
            let mut list = Vec::new();
            if !self.take_punct(Punct::RParen) {
                loop {
                    list.push(self.expression()?);
                    if !self.take_punct(Punct::Comma) {
                        break;
                    }
                }
                self.expect_punct(Punct::RParen, "')'")?;
            }
            return Ok(Expr::In {
                expr: Box::new(left),
                list,
                negated,
            });
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr, SparqlError> {
        let mut left = self.multiplicative()?;
        loop {
            if self.take_punct(Punct::Plus) {
                let right = self.multiplicative()?;
                left = Expr::Arith(ArithOp::Add, Box::new(left), Box::new(right));
            } else if self.take_punct(Punct::Minus) {
                let right = self.multiplicative()?;
                left = Expr::Arith(ArithOp::Sub, Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, SparqlError> {
        let mut left = self.unary()?;
        loop {
            if self.take_punct(Punct::Star) {
                let right = self.unary()?;
                left = Expr::Arith(ArithOp::Mul, Box::new(left), Box::new(right));
            } else if self.take_punct(Punct::Slash) {
                let right = self.unary()?;
                left = Expr::Arith(ArithOp::Div, Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn unary(&mut self) -> Result<Expr, SparqlError> {
        if self.take_punct(Punct::Bang) {
            let inner = self.unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        if self.take_punct(Punct::Minus) {
            let inner = self.unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        if self.take_punct(Punct::Plus) {
            return self.unary();
        }
        self.unary_primary()
    }

    fn unary_primary(&mut self) -> Result<Expr, SparqlError> {
        // EXISTS / NOT EXISTS.
        if self.is_kw("EXISTS") {
            self.bump();
            let pattern = self.group_pattern(1)?;
            return Ok(Expr::Exists {
                pattern: Box::new(pattern),
                negated: false,
            });
        }
        if self.is_kw("NOT") {
            let saved = self.pos;
            self.bump();
            if self.take_kw("EXISTS") {
                let pattern = self.group_pattern(1)?;
                return Ok(Expr::Exists {
                    pattern: Box::new(pattern),
                    negated: true,
                });
            }
            self.pos = saved;
        }

        if self.is_punct(Punct::LParen) {
            self.bump();
            let expr = self.expression()?;
            self.expect_punct(Punct::RParen, "')'")?;
            return Ok(expr);
        }

        // Aggregates.
        if let Some(agg) = self.try_aggregate()? {
            return Ok(Expr::Aggregate(agg));
        }

        // Built-in calls.
        if let Some(func) = self.peek_builtin() {
            self.bump();
            let args = self.call_args()?;
            return Ok(Expr::Call(func, args));
        }

        // Terms.
        if let Tok::Var(name) = self.tok().clone() {
            let id = self.var_id(name);
            self.bump();
            return Ok(Expr::Term(TermPat::Var(id)));
        }
        let term = self.ground_term()?;
        Ok(Expr::Term(term))
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, SparqlError> {
        self.expect_punct(Punct::LParen, "'('")?;
        let mut args = Vec::new();
        if self.take_punct(Punct::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if !self.take_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RParen, "')'")?;
        Ok(args)
    }

    fn peek_builtin(&mut self) -> Option<Func> {
        let Tok::Ident(name) = self.tok() else {
            return None;
        };
        let func = match name.to_ascii_uppercase().as_str() {
            "BOUND" => Func::Bound,
            "IF" => Func::If,
            "COALESCE" => Func::Coalesce,
            "STR" => Func::Str,
            "STRLEN" => Func::StrLen,
            "UCASE" => Func::UCase,
            "LCASE" => Func::LCase,
            "CONTAINS" => Func::Contains,
            "STRSTARTS" => Func::StrStarts,
            "STRENDS" => Func::StrEnds,
            "CONCAT" => Func::Concat,
            "REGEX" => Func::Regex,
            "REPLACE" => Func::Replace,
            "LANG" => Func::Lang,
            "DATATYPE" => Func::Datatype,
            "IRI" | "URI" => Func::Iri,
            "STRDT" => Func::StrDt,
            "STRLANG" => Func::StrLang,
            "ABS" => Func::Abs,
            "CEIL" => Func::Ceil,
            "FLOOR" => Func::Floor,
            "ROUND" => Func::Round,
            "SAMETERM" => Func::SameTerm,
            "ISIRI" | "ISURI" => Func::IsIri,
            "ISBLANK" => Func::IsBlank,
            "ISLITERAL" => Func::IsLiteral,
            "ISNUMERIC" => Func::IsNumeric,
            _ => return None,
        };
        Some(func)
    }

    fn try_aggregate(&mut self) -> Result<Option<AggExpr>, SparqlError> {
        let Tok::Ident(name) = self.tok() else {
            return Ok(None);
        };
        let func = match name.to_ascii_uppercase().as_str() {
            "COUNT" => AggFunc::Count,
            "SUM" => AggFunc::Sum,
            "AVG" => AggFunc::Avg,
            "MIN" => AggFunc::Min,
            "MAX" => AggFunc::Max,
            "GROUP_CONCAT" => AggFunc::GroupConcat,
            "SAMPLE" => AggFunc::Sample,
            _ => return Ok(None),
        };
        self.bump();
        self.expect_punct(Punct::LParen, "'('")?;
        let distinct = self.take_kw("DISTINCT");
        let (expr, mut separator) = if self.take_punct(Punct::Star) {
            (None, None)
        } else {
            (Some(Box::new(self.expression()?)), None)
        };
        if func == AggFunc::GroupConcat && self.take_punct(Punct::Semicolon) {
            self.expect_kw("SEPARATOR")?;
            self.expect_punct(Punct::Eq, "'='")?;
            let Tok::StringLit(sep) = self.tok().clone() else {
                return Err(self.error("string literal"));
            };
            separator = Some(sep.to_string());
            self.bump();
        }
        self.expect_punct(Punct::RParen, "')'")?;
        Ok(Some(AggExpr {
            func,
            distinct,
            expr,
            separator,
        }))
    }

    // --------------------------------------------------------------------------------------------
    // Solution modifiers & temporal clause
    // --------------------------------------------------------------------------------------------

    fn solution_modifiers(&mut self) -> Result<SolutionModifiers, SparqlError> {
        let mut modifiers = SolutionModifiers::default();

        if self.take_kw("GROUP") {
            self.expect_kw("BY")?;
            loop {
                if self.take_punct(Punct::LParen) {
                    let expr = self.expression()?;
                    let alias = if self.take_kw("AS") {
                        let Tok::Var(name) = self.tok().clone() else {
                            return Err(self.error("variable"));
                        };
                        let id = self.var_id(name);
                        self.bump();
                        Some(id)
                    } else {
                        None
                    };
                    self.expect_punct(Punct::RParen, "')'")?;
                    modifiers.group_by.push(GroupCond { expr, alias });
                } else if let Tok::Var(name) = self.tok().clone() {
                    let id = self.var_id(name);
                    self.bump();
                    modifiers.group_by.push(GroupCond {
                        expr: Expr::Term(TermPat::Var(id)),
                        alias: None,
                    });
                } else {
                    break;
                }
            }
            if modifiers.group_by.is_empty() {
                return Err(self.error("grouping condition"));
            }
        }

        if self.take_kw("HAVING") {
            loop {
                modifiers.having.push(self.constraint()?);
                if !self.is_punct(Punct::LParen) {
                    break;
                }
            }
        }

        if self.take_kw("ORDER") {
            self.expect_kw("BY")?;
            loop {
                if self.take_kw("ASC") {
                    self.expect_punct(Punct::LParen, "'('")?;
                    let expr = self.expression()?;
                    self.expect_punct(Punct::RParen, "')'")?;
                    modifiers.order_by.push(OrderKey {
                        expr,
                        ascending: true,
                    });
                } else if self.take_kw("DESC") {
                    self.expect_punct(Punct::LParen, "'('")?;
                    let expr = self.expression()?;
                    self.expect_punct(Punct::RParen, "')'")?;
                    modifiers.order_by.push(OrderKey {
                        expr,
                        ascending: false,
                    });
                } else if let Tok::Var(name) = self.tok().clone() {
                    let id = self.var_id(name);
                    self.bump();
                    modifiers.order_by.push(OrderKey {
                        expr: Expr::Term(TermPat::Var(id)),
                        ascending: true,
                    });
                } else if self.is_punct(Punct::LParen) {
                    self.bump();
                    let expr = self.expression()?;
                    self.expect_punct(Punct::RParen, "')'")?;
                    modifiers.order_by.push(OrderKey {
                        expr,
                        ascending: true,
                    });
                } else {
                    break;
                }
            }
            if modifiers.order_by.is_empty() {
                return Err(self.error("ordering key"));
            }
        }

        // LIMIT and OFFSET accept either order.
        loop {
            if self.take_kw("LIMIT") {
                let Tok::Integer(n) = self.tok().clone() else {
                    return Err(self.error("integer"));
                };
                modifiers.limit = n.parse().ok();
                self.bump();
            } else if self.take_kw("OFFSET") {
                let Tok::Integer(n) = self.tok().clone() else {
                    return Err(self.error("integer"));
                };
                modifiers.offset = n.parse().ok();
                self.bump();
            } else {
                return Ok(modifiers);
            }
        }
    }

    fn temporal_clause(&mut self) -> Result<Option<TemporalClause>, SparqlError> {
        let clause = if self.is_kw("AS") {
            let saved = self.pos;
            self.bump();
            if !self.take_kw("OF") {
                self.pos = saved;
                return Ok(None);
            }
            let t = self.timestamp_value()?;
            Some(TemporalClause::AsOf(t))
        } else if self.take_kw("DURING") {
            let from = self.timestamp_value()?;
            let until = self.timestamp_value()?;
            Some(TemporalClause::During(from, until))
        } else if self.is_kw("ALL") {
            let saved = self.pos;
            self.bump();
            if !self.take_kw("VERSIONS") {
                self.pos = saved;
                return Ok(None);
            }
            Some(TemporalClause::AllVersions)
        } else {
            None
        };

        if clause.is_some() && self.strict {
            let span = self.span();
            self.bag.report(codes::TEMPORAL_IN_STRICT, span);
            return Err(SparqlError::Syntax {
                span,
                message: "temporal clause is not allowed in strict mode".into(),
            });
        }
        Ok(clause)
    }

    /// A timestamp: integer microseconds or an ISO-8601 UTC string.
    fn timestamp_value(&mut self) -> Result<Timestamp, SparqlError> {
        match self.tok().clone() {
            Tok::Integer(n) => {
                let t = n.parse().unwrap_or(0);
                self.bump();
                Ok(t)
            }
            Tok::StringLit(text) => {
                let t = parse_iso_timestamp(&text).ok_or_else(|| {
                    let span = self.span();
                    self.bag.report_with_args(
                        codes::EXPECTED_FOUND,
                        span,
                        &["timestamp", "malformed dateTime"],
                    );
                    SparqlError::Syntax {
                        span,
                        message: "malformed dateTime".into(),
                    }
                })?;
                self.bump();
                Ok(t)
            }
            _ => Err(self.error("timestamp")),
        }
    }

    // --------------------------------------------------------------------------------------------
    // CONSTRUCT template
    // --------------------------------------------------------------------------------------------

    fn triple_template_block(&mut self) -> Result<Vec<TriplePattern>, SparqlError> {
        let mut group = GroupPattern::default();
        loop {
            if self.take_punct(Punct::RBrace) {
                break;
            }
            if matches!(self.tok(), Tok::Eof) {
                return Err(self.error("'}'"));
            }
            self.triples_block(&mut group)?;
            while self.take_punct(Punct::Dot) {}
        }
        let mut template = Vec::new();
        for element in group.elements {
            match element {
                Element::Triple(t) => template.push(t),
                _ => {
                    return Err(SparqlError::Syntax {
                        span: Span::none(),
                        message: "only triples are allowed in a template".into(),
                    });
                }
            }
        }
        Ok(template)
    }

    // --------------------------------------------------------------------------------------------
    // Updates
    // --------------------------------------------------------------------------------------------

    fn update(&mut self) -> Result<Update, SparqlError> {
        let mut operations = Vec::new();
        loop {
            self.prologue()?;
            if matches!(self.tok(), Tok::Eof) {
                break;
            }
            operations.push(self.update_operation()?);
            if !self.take_punct(Punct::Semicolon) {
                break;
            }
        }
        if !matches!(self.tok(), Tok::Eof) {
            return Err(self.error("end of update"));
        }
        Ok(Update {
            operations,
            variables: std::mem::take(&mut self.variables),
        })
    }

    fn update_operation(&mut self) -> Result<UpdateOperation, SparqlError> {
        if self.take_kw("INSERT") {
            if self.take_kw("DATA") {
                let quads = self.quad_block(true)?;
                return Ok(UpdateOperation::InsertData(quads));
            }
            // INSERT { … } WHERE { … }
            let insert = self.quad_block(false)?;
            self.expect_kw("WHERE")?;
            let pattern = self.group_pattern(1)?;
            return Ok(UpdateOperation::Modify {
                with: None,
                delete: Vec::new(),
                insert,
                pattern,
            });
        }
        if self.take_kw("DELETE") {
            if self.take_kw("DATA") {
                let quads = self.quad_block(true)?;
                return Ok(UpdateOperation::DeleteData(quads));
            }
            if self.take_kw("WHERE") {
                let quads = self.quad_block(false)?;
                return Ok(UpdateOperation::DeleteWhere(quads));
            }
            let delete = self.quad_block(false)?;
            let insert = if self.take_kw("INSERT") {
                self.quad_block(false)?
            } else {
                Vec::new()
            };
            self.expect_kw("WHERE")?;
            let pattern = self.group_pattern(1)?;
            return Ok(UpdateOperation::Modify {
                with: None,
                delete,
                insert,
                pattern,
            });
        }
        if self.take_kw("WITH") {
            let with = self.iri_value()?;
            self.expect_kw("DELETE")?;
            let delete = self.quad_block(false)?;
            let insert = if self.take_kw("INSERT") {
                self.quad_block(false)?
            } else {
                Vec::new()
            };
            self.expect_kw("WHERE")?;
            let pattern = self.group_pattern(1)?;
            return Ok(UpdateOperation::Modify {
                with: Some(with),
                delete,
                insert,
                pattern,
            });
        }
        if self.take_kw("LOAD") {
            let silent = self.take_kw("SILENT");
            let source = self.iri_value()?;
            let graph = if self.take_kw("INTO") {
                self.expect_kw("GRAPH")?;
                Some(self.iri_value()?)
            } else {
                None
            };
            return Ok(UpdateOperation::Load {
                silent,
                source,
                graph,
            });
        }
        if self.take_kw("CLEAR") {
            let silent = self.take_kw("SILENT");
            let target = self.graph_target()?;
            return Ok(UpdateOperation::Clear { silent, target });
        }
        if self.take_kw("CREATE") {
            let silent = self.take_kw("SILENT");
            self.expect_kw("GRAPH")?;
            let graph = self.iri_value()?;
            return Ok(UpdateOperation::Create { silent, graph });
        }
        if self.take_kw("DROP") {
            let silent = self.take_kw("SILENT");
            let target = self.graph_target()?;
            return Ok(UpdateOperation::Drop { silent, target });
        }
        for (kw, kind) in [("COPY", 0u8), ("MOVE", 1), ("ADD", 2)] {
            if self.take_kw(kw) {
                let silent = self.take_kw("SILENT");
                let from = self.graph_ref()?;
                self.expect_kw("TO")?;
                let to = self.graph_ref()?;
                return Ok(match kind {
                    0 => UpdateOperation::Copy { silent, from, to },
                    1 => UpdateOperation::Move { silent, from, to },
                    _ => UpdateOperation::Add { silent, from, to },
                });
            }
        }
        Err(self.error("update operation"))
    }

    fn graph_target(&mut self) -> Result<GraphTarget, SparqlError> {
        if self.take_kw("DEFAULT") {
            return Ok(GraphTarget::Default);
        }
        if self.take_kw("NAMED") {
            return Ok(GraphTarget::AllNamed);
        }
        if self.take_kw("ALL") {
            return Ok(GraphTarget::All);
        }
        self.expect_kw("GRAPH")?;
        Ok(GraphTarget::Named(self.iri_value()?))
    }

    fn graph_ref(&mut self) -> Result<GraphRef, SparqlError> {
        if self.take_kw("DEFAULT") {
            return Ok(GraphRef::Default);
        }
        let _ = self.take_kw("GRAPH");
        Ok(GraphRef::Named(self.iri_value()?))
    }

    /// `{ triples (GRAPH g { triples })* }` — quads for data blocks and
    /// modify templates.
    fn quad_block(&mut self, ground_only: bool) -> Result<Vec<QuadTemplate>, SparqlError> {
        self.expect_punct(Punct::LBrace, "'{'")?;
        let mut quads = Vec::new();
        loop {
            if self.take_punct(Punct::RBrace) {
                break;
            }
            if matches!(self.tok(), Tok::Eof) {
                return Err(self.error("'}'"));
            }
            if self.take_kw("GRAPH") {
                let graph = self.var_or_iri()?;
                self.expect_punct(Punct::LBrace, "'{'")?;
                let mut group = GroupPattern::default();
                loop {
                    if self.take_punct(Punct::RBrace) {
                        break;
                    }
                    self.triples_block(&mut group)?;
                    while self.take_punct(Punct::Dot) {}
                }
                self.drain_templates(group, Some(graph.clone()), ground_only, &mut quads)?;
            } else {
                let mut group = GroupPattern::default();
                self.triples_block(&mut group)?;
                self.drain_templates(group, None, ground_only, &mut quads)?;
            }
            while self.take_punct(Punct::Dot) {}
        }
        Ok(quads)
    }

    fn drain_templates(
        &mut self,
        group: GroupPattern,
        graph: Option<TermPat>,
        ground_only: bool,
        out: &mut Vec<QuadTemplate>,
    ) -> Result<(), SparqlError> {
        for element in group.elements {
            let Element::Triple(t) = element else {
                return Err(SparqlError::Syntax {
                    span: Span::none(),
                    message: "only triples are allowed here".into(),
                });
            };
            let Predicate::Term(p) = t.p else {
                return Err(SparqlError::Syntax {
                    span: t.span,
                    message: "property paths are not allowed here".into(),
                });
            };
            if ground_only {
                let has_var = matches!(t.s, TermPat::Var(_))
                    || matches!(p, TermPat::Var(_))
                    || matches!(t.o, TermPat::Var(_))
                    || matches!(graph, Some(TermPat::Var(_)));
                if has_var {
                    self.bag.report_with_args(
                        codes::EXPECTED_FOUND,
                        t.span,
                        &["ground term", "variable"],
                    );
                    return Err(SparqlError::Syntax {
                        span: t.span,
                        message: "variables are not allowed in DATA blocks".into(),
                    });
                }
            }
            out.push(QuadTemplate {
                s: t.s,
                p,
                o: t.o,
                g: graph.clone(),
            });
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Semantic checks
    // --------------------------------------------------------------------------------------------

    fn check_query_semantics(&mut self, query: &Query) {
        let has_aggregates = Self::projection_has_aggregates(query);
        let grouped = !query.modifiers.group_by.is_empty();
        self.in_aggregate_query = has_aggregates || grouped;

        // Aggregates inside WHERE filters are always out of place.
        for element in &query.pattern.elements {
            if let Element::Filter { expr, .. } = element
                && Self::expr_has_aggregate(expr)
            {
                self.bag
                    .report(codes::AGGREGATE_CONTEXT, query.pattern.span);
            }
        }

        // Non-grouped variable projected next to aggregates.
        if self.in_aggregate_query
            && let QueryKind::Select(select) = &query.kind
            && let Projection::Items(items) = &select.projection
        {
            let grouped_vars: Vec<VarId> = query
                .modifiers
                .group_by
                .iter()
                .filter_map(|g| match &g.expr {
                    Expr::Term(TermPat::Var(v)) => Some(*v),
                    _ => g.alias,
                })
                .collect();
            for item in items {
                let is_aggregate = item
                    .expr
                    .as_ref()
                    .is_some_and(Self::expr_has_aggregate);
                if !is_aggregate && item.expr.is_none() && !grouped_vars.contains(&item.var) {
                    let name = query.var_name(item.var).to_string();
                    self.bag
                        .report_with_args(codes::NOT_GROUPED, item.span, &[&name]);
                }
            }
        }

        // Duplicate (expr AS ?v) against a pattern-bound variable.
        if let QueryKind::Select(select) = &query.kind
            && let Projection::Items(items) = &select.projection
        {
            let mut pattern_vars = Vec::new();
            Self::pattern_variables(&query.pattern, &mut pattern_vars);
            for item in items {
                if item.expr.is_some() && pattern_vars.contains(&item.var) {
                    let name = query.var_name(item.var).to_string();
                    self.bag
                        .report_with_args(codes::DUPLICATE_BINDING, item.span, &[&name]);
                }
            }
        }

        // Cartesian product: adjacent triple patterns sharing no
        // variable.
        let mut seen_vars: Vec<VarId> = Vec::new();
        let mut warned = false;
        for element in &query.pattern.elements {
            if let Element::Triple(t) = element {
                let mut vars = Vec::new();
                Self::triple_variables(t, &mut vars);
                if !seen_vars.is_empty()
                    && !vars.is_empty()
                    && !vars.iter().any(|v| seen_vars.contains(v))
                    && !warned
                {
                    self.bag
                        .report(codes::CARTESIAN_PRODUCT + WARNING_BASE, t.span);
                    warned = true;
                }
                seen_vars.extend(vars);
            }
        }

        // Unbound FILTER variables.
        let mut pattern_vars = Vec::new();
        Self::pattern_variables(&query.pattern, &mut pattern_vars);
        for element in &query.pattern.elements {
            if let Element::Filter { expr, .. } = element {
                let mut filter_vars = Vec::new();
                Self::expr_variables(expr, &mut filter_vars);
                for v in filter_vars {
                    if !pattern_vars.contains(&v) {
                        let name = query.var_name(v).to_string();
                        self.bag.report_with_args(
                            codes::UNBOUND_FILTER_VAR + WARNING_BASE,
                            query.pattern.span,
                            &[&name],
                        );
                    }
                }
            }
        }
    }

    fn projection_has_aggregates(query: &Query) -> bool {
        if let QueryKind::Select(select) = &query.kind
            && let Projection::Items(items) = &select.projection
        {
            return items
                .iter()
                .any(|i| i.expr.as_ref().is_some_and(Self::expr_has_aggregate));
        }
        false
    }

    fn expr_has_aggregate(expr: &Expr) -> bool {
        match expr {
            Expr::Aggregate(_) => true,
            Expr::Or(a, b) | Expr::And(a, b) => {
                Self::expr_has_aggregate(a) || Self::expr_has_aggregate(b)
            }
            Expr::Compare(_, a, b) | Expr::Arith(_, a, b) => {
                Self::expr_has_aggregate(a) || Self::expr_has_aggregate(b)
            }
            Expr::Not(a) | Expr::Neg(a) => Self::expr_has_aggregate(a),
            Expr::In { expr, list, .. } => {
                Self::expr_has_aggregate(expr) || list.iter().any(Self::expr_has_aggregate)
            }
            Expr::Call(_, args) => args.iter().any(Self::expr_has_aggregate),
            _ => false,
        }
    }

    fn triple_variables(t: &TriplePattern, out: &mut Vec<VarId>) {
        for term in [&t.s, &t.o] {
            if let TermPat::Var(v) = term {
                out.push(*v);
            }
        }
        if let Predicate::Term(TermPat::Var(v)) = &t.p {
            out.push(*v);
        }
    }

    fn pattern_variables(group: &GroupPattern, out: &mut Vec<VarId>) {
        for element in &group.elements {
            match element {
                Element::Triple(t) => Self::triple_variables(t, out),
                Element::Optional(g) | Element::Minus(g) | Element::Group(g) => {
                    Self::pattern_variables(g, out);
                }
                Element::Union(branches) => {
                    for branch in branches {
                        Self::pattern_variables(branch, out);
                    }
                }
                Element::Graph { term, pattern } => {
                    if let TermPat::Var(v) = term {
                        out.push(*v);
                    }
                    Self::pattern_variables(pattern, out);
                }
                Element::Service {
                    endpoint, pattern, ..
                } => {
                    if let TermPat::Var(v) = endpoint {
                        out.push(*v);
                    }
                    Self::pattern_variables(pattern, out);
                }
                Element::Bind { var, .. } => out.push(*var),
                Element::Values { vars, .. } => out.extend(vars.iter().copied()),
                Element::SubSelect(q) => Self::pattern_variables(&q.pattern, out),
                Element::Filter { .. } => {}
            }
        }
    }

    fn expr_variables(expr: &Expr, out: &mut Vec<VarId>) {
        match expr {
            Expr::Term(TermPat::Var(v)) => out.push(*v),
            Expr::Term(_) => {}
            Expr::Or(a, b) | Expr::And(a, b) => {
                Self::expr_variables(a, out);
                Self::expr_variables(b, out);
            }
            Expr::Compare(_, a, b) | Expr::Arith(_, a, b) => {
                Self::expr_variables(a, out);
                Self::expr_variables(b, out);
            }
            Expr::Not(a) | Expr::Neg(a) => Self::expr_variables(a, out),
            Expr::In { expr, list, .. } => {
                Self::expr_variables(expr, out);
                for e in list {
                    Self::expr_variables(e, out);
                }
            }
            Expr::Call(_, args) => {
                for a in args {
                    Self::expr_variables(a, out);
                }
            }
            Expr::Exists { pattern, .. } => Self::pattern_variables(pattern, out),
            Expr::Aggregate(agg) => {
                if let Some(e) = &agg.expr {
                    Self::expr_variables(e, out);
                }
            }
        }
    }
}

/// Parses `YYYY-MM-DDTHH:MM:SS[.fff][Z]` into microseconds since the
/// epoch. Offsets other than `Z` are not accepted.
pub fn parse_iso_timestamp(text: &str) -> Option<Timestamp> {
    let text = text.strip_suffix('Z').unwrap_or(text);
    let (date, time) = text.split_once('T')?;

    let mut dates = date.split('-');
    let year: i64 = dates.next()?.parse().ok()?;
    let month: u32 = dates.next()?.parse().ok()?;
    let day: u32 = dates.next()?.parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }

    let mut times = time.split(':');
    let hour: u64 = times.next()?.parse().ok()?;
    let minute: u64 = times.next()?.parse().ok()?;
    let second_text = times.next()?;
    let (second, micros) = match second_text.split_once('.') {
        Some((s, frac)) => {
            let padded = format!("{frac:0<6}");
            (s.parse::<u64>().ok()?, padded[..6].parse::<u64>().ok()?)
        }
        None => (second_text.parse::<u64>().ok()?, 0),
    };
    if hour > 23 || minute > 59 || second > 60 {
        return None;
    }

    // Days since the epoch (civil-from-days inverse, Howard Hinnant's
    // algorithm).
    let y = year - i64::from(month <= 2);
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as u64;
    let mp = (u64::from(month) + 9) % 12;
    let doy = (153 * mp + 2) / 5 + u64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    let days = era * 146_097 + doe as i64 - 719_468;
    if days < 0 {
        return None;
    }

    Some(
        (days as u64) * 86_400_000_000
            + hour * 3_600_000_000
            + minute * 60_000_000
            + second * 1_000_000
            + micros,
    )
}
