//! SPARQL tokenizer.
//!
//! Tokenizes the whole query up front into a vector of spanned tokens;
//! the recursive-descent parser then works on token indices, which
//! keeps backtracking (needed in a few corners of the grammar) cheap
//! and allocation-free. Token payloads borrow from the query string;
//! only string literals with escape sequences cook into owned storage.

use std::borrow::Cow;

use crate::codec::unescape_literal;
use crate::diag::Span;

/// Punctuation and operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
    Semicolon,
    Star,
    Slash,
    Pipe,
    PipePipe,
    AmpAmp,
    Caret,
    CaretCaret,
    Bang,
    BangEq,
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Question,
}

/// One token.
#[derive(Debug, Clone, PartialEq)]
pub enum Tok<'a> {
    /// `<iri>` (contents only).
    Iri(&'a str),
    /// `prefix:local` (either part may be empty).
    PName {
        /// The prefix part.
        prefix: &'a str,
        /// The local part.
        local: &'a str,
    },
    /// `?name` / `$name` (name only).
    Var(&'a str),
    /// `_:label` (label only).
    BlankLabel(&'a str),
    /// A string literal, unescaped.
    StringLit(Cow<'a, str>),
    /// `@lang`.
    LangTag(&'a str),
    /// Unsigned integer literal.
    Integer(&'a str),
    /// Unsigned decimal literal.
    Decimal(&'a str),
    /// Unsigned double literal.
    Double(&'a str),
    /// A bare name: keywords, `a`, `true`, function names.
    Ident(&'a str),
    /// Punctuation.
    Punct(Punct),
    /// End of input.
    Eof,
}

impl Tok<'_> {
    /// Human-readable description for diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Tok::Iri(iri) => format!("<{iri}>"),
            Tok::PName { prefix, local } => format!("'{prefix}:{local}'"),
            Tok::Var(name) => format!("?{name}"),
            Tok::BlankLabel(label) => format!("_:{label}"),
            Tok::StringLit(_) => "string literal".into(),
            Tok::LangTag(tag) => format!("@{tag}"),
            Tok::Integer(n) | Tok::Decimal(n) | Tok::Double(n) => format!("'{n}'"),
            Tok::Ident(name) => format!("'{name}'"),
            Tok::Punct(p) => format!("'{}'", punct_text(*p)),
            Tok::Eof => "end of input".into(),
        }
    }
}

fn punct_text(p: Punct) -> &'static str {
    match p {
        Punct::LBrace => "{",
        Punct::RBrace => "}",
        Punct::LParen => "(",
        Punct::RParen => ")",
        Punct::LBracket => "[",
        Punct::RBracket => "]",
        Punct::Dot => ".",
        Punct::Comma => ",",
        Punct::Semicolon => ";",
        Punct::Star => "*",
        Punct::Slash => "/",
        Punct::Pipe => "|",
        Punct::PipePipe => "||",
        Punct::AmpAmp => "&&",
        Punct::Caret => "^",
        Punct::CaretCaret => "^^",
        Punct::Bang => "!",
        Punct::BangEq => "!=",
        Punct::Eq => "=",
        Punct::Lt => "<",
        Punct::Le => "<=",
        Punct::Gt => ">",
        Punct::Ge => ">=",
        Punct::Plus => "+",
        Punct::Minus => "-",
        Punct::Question => "?",
    }
}

/// A spanned token.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    /// The token.
    pub tok: Tok<'a>,
    /// Where it starts.
    pub span: Span,
}

/// A lexing failure, with its location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    /// Where.
    pub span: Span,
    /// What.
    pub message: String,
}

/// Tokenizes `src` completely.
pub fn tokenize(src: &str) -> Result<Vec<Token<'_>>, LexError> {
    let mut lx = Lexer {
        src,
        pos: 0,
        line: 1,
        line_start: 0,
    };
    let mut tokens = Vec::new();
    loop {
        lx.skip_trivia();
        let span = lx.span_here(1);
        if lx.at_end() {
            tokens.push(Token {
                tok: Tok::Eof,
                span,
            });
            return Ok(tokens);
        }
        let start = lx.pos;
        let tok = lx.next_token()?;
        let mut span = span;
        span.len = (lx.pos - start) as u32;
        tokens.push(Token { tok, span });
    }
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: u32,
    line_start: usize,
}

impl<'a> Lexer<'a> {
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

    fn span_here(&self, len: u32) -> Span {
        Span::new(
            self.pos as u32,
            len,
            self.line,
            (self.pos - self.line_start) as u32 + 1,
        )
    }

    fn error(&self, message: impl Into<String>) -> LexError {
        LexError {
            span: self.span_here(1),
            message: message.into(),
        }
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

    fn next_token(&mut self) -> Result<Tok<'a>, LexError> {
        let c = self
            .peek()
            .ok_or_else(|| self.error("unexpected end of input"))?;
        match c {
            b'{' => self.punct(Punct::LBrace),
            b'}' => self.punct(Punct::RBrace),
            b'(' => self.punct(Punct::LParen),
            b')' => self.punct(Punct::RParen),
            b'[' => self.punct(Punct::LBracket),
            b']' => self.punct(Punct::RBracket),
            b',' => self.punct(Punct::Comma),
            b';' => self.punct(Punct::Semicolon),
            b'*' => self.punct(Punct::Star),
            b'/' => self.punct(Punct::Slash),
            b'+' => self.punct(Punct::Plus),
            b'-' => self.punct(Punct::Minus),
            b'=' => self.punct(Punct::Eq),
            b'.' => {
                if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) {
                    self.lex_number()
                } else {
                    self.punct(Punct::Dot)
                }
            }
            b'|' => {
                self.bump();
                if self.peek() == Some(b'|') {
                    self.bump();
                    Ok(Tok::Punct(Punct::PipePipe))
                } else {
                    Ok(Tok::Punct(Punct::Pipe))
                }
            }
            b'&' => {
                self.bump();
                if self.peek() == Some(b'&') {
                    self.bump();
                    Ok(Tok::Punct(Punct::AmpAmp))
                } else {
                    Err(self.error("unexpected character '&'"))
                }
            }
            b'^' => {
                self.bump();
                if self.peek() == Some(b'^') {
                    self.bump();
                    Ok(Tok::Punct(Punct::CaretCaret))
                } else {
                    Ok(Tok::Punct(Punct::Caret))
                }
            }
            b'!' => {
                self.bump();
                if self.peek() == Some(b'=') {
                    self.bump();
                    Ok(Tok::Punct(Punct::BangEq))
                } else {
                    Ok(Tok::Punct(Punct::Bang))
                }
            }
            b'>' => {
                self.bump();
                if self.peek() == Some(b'=') {
                    self.bump();
                    Ok(Tok::Punct(Punct::Ge))
                } else {
                    Ok(Tok::Punct(Punct::Gt))
                }
            }
            b'<' => self.lex_lt_or_iri(),
            b'?' | b'$' => {
                self.bump();
                if self.peek().is_some_and(is_name_start) {
                    let name = self.take_name();
                    Ok(Tok::Var(name))
                } else {
                    Ok(Tok::Punct(Punct::Question))
                }
            }
            b'@' => {
                self.bump();
                let start = self.pos;
                while self
                    .peek()
                    .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'-')
                {
                    self.bump();
                }
                if self.pos == start {
                    return Err(self.error("malformed language tag"));
                }
                Ok(Tok::LangTag(&self.src[start..self.pos]))
            }
            b'"' | b'\'' => self.lex_string(),
            b'_' if self.peek_at(1) == Some(b':') => {
                self.bump();
                self.bump();
                let start = self.pos;
                while self
                    .peek()
                    .is_some_and(|c| (c as char).is_alphanumeric() || c == b'_' || c == b'-')
                {
                    self.bump();
                }
                if self.pos == start {
                    return Err(self.error("malformed blank node label"));
                }
                Ok(Tok::BlankLabel(&self.src[start..self.pos]))
            }
            b'0'..=b'9' => self.lex_number(),
            b':' => {
                // PName with an empty prefix.
                self.bump();
                let local = self.take_local();
                Ok(Tok::PName { prefix: "", local })
            }
            c if is_name_start(c) => {
                let name = self.take_name();
                if self.peek() == Some(b':') {
                    self.bump();
                    let local = self.take_local();
                    Ok(Tok::PName {
                        prefix: name,
                        local,
                    })
                } else {
                    Ok(Tok::Ident(name))
                }
            }
            other => Err(self.error(format!("unexpected character '{}'", other as char))),
        }
    }

    fn punct(&mut self, p: Punct) -> Result<Tok<'a>, LexError> {
        self.bump();
        Ok(Tok::Punct(p))
    }

    /// `<` begins either an IRI reference or a comparison operator.
    fn lex_lt_or_iri(&mut self) -> Result<Tok<'a>, LexError> {
        // Look ahead for a closing '>' with only IRI-legal bytes before
        // it.
        let rest = &self.src.as_bytes()[self.pos + 1..];
        let mut end = None;
        for (i, &c) in rest.iter().enumerate() {
            match c {
                b'>' => {
                    end = Some(i);
                    break;
                }
                b' ' | b'\t' | b'\r' | b'\n' | b'<' | b'"' | b'{' | b'}' | b'|' | b'`' => break,
                _ => {}
            }
        }
        match end {
            Some(len) => {
                let start = self.pos + 1;
                for _ in 0..len + 2 {
                    self.bump();
                }
                Ok(Tok::Iri(&self.src[start..start + len]))
            }
            None => {
                self.bump();
                if self.peek() == Some(b'=') {
                    self.bump();
                    Ok(Tok::Punct(Punct::Le))
                } else {
                    Ok(Tok::Punct(Punct::Lt))
                }
            }
        }
    }

    fn lex_string(&mut self) -> Result<Tok<'a>, LexError> {
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
                let b = self.src.as_bytes();
                if b[self.pos] == quote && b[self.pos + 1] == quote && b[self.pos + 2] == quote {
                    break;
                }
                if b[self.pos] == b'\\' {
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
        let cooked =
            unescape_literal(raw).map_err(|_| self.error("invalid escape sequence"))?;
        Ok(Tok::StringLit(cooked))
    }

    fn lex_number(&mut self) -> Result<Tok<'a>, LexError> {
        let start = self.pos;
        let mut has_dot = false;
        let mut has_exp = false;
        while let Some(c) = self.peek() {
            match c {
                b'0'..=b'9' => {
                    self.bump();
                }
                b'.' if !has_dot && !has_exp => {
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
        let text = &self.src[start..self.pos];
        if has_exp {
            Ok(Tok::Double(text))
        } else if has_dot {
            Ok(Tok::Decimal(text))
        } else {
            Ok(Tok::Integer(text))
        }
    }

    fn take_name(&mut self) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(is_name_continue) {
            self.bump();
        }
        &self.src[start..self.pos]
    }

    fn take_local(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if (c as char).is_alphanumeric()
                || c == b'_'
                || c == b'-'
                || c == b'.'
                || c == b'%'
            {
                self.bump();
            } else {
                break;
            }
        }
        let mut local = &self.src[start..self.pos];
        while local.ends_with('.') {
            local = &local[..local.len() - 1];
            self.pos -= 1;
        }
        local
    }
}

fn is_name_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c >= 0x80
}

fn is_name_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c >= 0x80
}
