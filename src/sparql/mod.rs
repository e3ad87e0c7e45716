//! SPARQL front end — tokenizer, recursive-descent parser, span AST.
//!
//! The pipeline is [`lexer`] → [`parser`] → [`ast`]: the lexer turns
//! the query string into spanned tokens, the parser builds the AST and
//! reports every problem it finds into the caller's
//! [`DiagnosticBag`](crate::diag::DiagnosticBag). Callers decide how to
//! surface the bag (terminal renderer, LSP, plain messages); the
//! `Result` only says whether an executable AST came out.
//!
//! Strict mode rejects the non-standard temporal clause
//! (`AS OF` / `DURING` / `ALL VERSIONS`); everything else is SPARQL
//! 1.1.

pub mod ast;
pub mod lexer;
pub mod parser;

#[cfg(test)]
mod tests;

pub use ast::{Query, Update};
pub use parser::{parse_iso_timestamp, parse_query, parse_update};

use thiserror::Error;

use crate::diag::Span;

/// Errors returned by the SPARQL front end.
#[derive(Debug, Error)]
pub enum SparqlError {
    /// A syntax error; the same finding is in the diagnostic bag.
    #[error("syntax error at {}:{}: {message}", span.line, span.col)]
    Syntax {
        /// Where.
        span: Span,
        /// What.
        message: String,
    },

    /// Semantic errors were reported to the bag; no AST is usable.
    #[error("query has errors (see diagnostics)")]
    Invalid,
}
