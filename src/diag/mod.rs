//! Diagnostics — span-addressed problem reports with pooled arguments.
//!
//! Every layer that can reject input (the SPARQL parser, the RDF
//! codecs, the executor, storage) reports problems as [`Diagnostic`]s
//! collected in a [`DiagnosticBag`]. A diagnostic is deliberately
//! small: a numeric code, a source [`Span`], and up to
//! [`MAX_ARGS`] message arguments stored as ranges into the bag's
//! shared byte pool — reporting a diagnostic never allocates per
//! argument.
//!
//! # Code ranges
//!
//! | Range | Area |
//! |-------|------|
//! | 1xxx  | lexing / parsing |
//! | 2xxx  | semantic analysis |
//! | 3xxx  | runtime |
//! | 4xxx  | storage |
//!
//! Adding `10_000` turns a code into its warning variant, `20_000` into
//! info, `30_000` into hint; [`format_code`] renders `E2001`, `W1003`,
//! `I1001`, `H1001` accordingly.
//!
//! Two formatters consume a bag: the terminal renderer
//! ([`render::render_terminal`]) prints rustc-style annotated source,
//! and the LSP formatter ([`lsp::to_lsp_diagnostics`]) emits
//! 0-based-range JSON for editors.

pub mod lsp;
pub mod render;


/// Maximum message arguments per diagnostic.
pub const MAX_ARGS: usize = 4;

/// Offset added to a base code for its warning variant.
pub const WARNING_BASE: u32 = 10_000;

/// Offset added to a base code for its info variant.
pub const INFO_BASE: u32 = 20_000;

/// Offset added to a base code for its hint variant.
pub const HINT_BASE: u32 = 30_000;

// ------------------------------------------------------------------------------------------------
// Codes
// ------------------------------------------------------------------------------------------------

/// Diagnostic codes. Lex/parse 1xxx, semantic 2xxx, runtime 3xxx,
/// storage 4xxx; see the module docs for severity offsets.
pub mod codes {
    /// Unexpected character `{0}`.
    pub const UNEXPECTED_CHAR: u32 = 1001;
    /// Unterminated string literal.
    pub const UNTERMINATED_STRING: u32 = 1002;
    /// Invalid IRI `{0}`.
    pub const INVALID_IRI: u32 = 1003;
    /// Expected `{0}`, found `{1}`.
    pub const EXPECTED_FOUND: u32 = 1004;
    /// Malformed numeric literal.
    pub const INVALID_NUMBER: u32 = 1005;
    /// Invalid escape sequence.
    pub const INVALID_ESCAPE: u32 = 1006;
    /// Unexpected end of input.
    pub const UNEXPECTED_EOF: u32 = 1007;
    /// Malformed prefixed name `{0}`.
    pub const INVALID_PREFIXED_NAME: u32 = 1008;
    /// Malformed language tag.
    pub const INVALID_LANG_TAG: u32 = 1009;
    /// Unsupported syntax: `{0}`.
    pub const UNSUPPORTED_SYNTAX: u32 = 1010;
    /// Malformed document structure: `{0}`.
    pub const MALFORMED_DOCUMENT: u32 = 1011;

    /// Undefined prefix `{0}`.
    pub const UNDEFINED_PREFIX: u32 = 2001;
    /// Aggregate used outside an aggregate query.
    pub const AGGREGATE_CONTEXT: u32 = 2002;
    /// Variable `{0}` is projected but not grouped.
    pub const NOT_GROUPED: u32 = 2003;
    /// Variable `{0}` is bound more than once.
    pub const DUPLICATE_BINDING: u32 = 2004;
    /// Unknown function `{0}`.
    pub const UNKNOWN_FUNCTION: u32 = 2005;
    /// Temporal clause rejected in strict mode.
    pub const TEMPORAL_IN_STRICT: u32 = 2006;
    /// Pattern groups share no variable (Cartesian product).
    pub const CARTESIAN_PRODUCT: u32 = 2007;
    /// Variable `{0}` in FILTER is never bound.
    pub const UNBOUND_FILTER_VAR: u32 = 2008;

    /// Query exceeded its deadline.
    pub const QUERY_TIMEOUT: u32 = 3001;
    /// Query exceeded its memory budget.
    pub const MEMORY_LIMIT: u32 = 3002;
    /// Division by zero in strict mode.
    pub const DIVISION_BY_ZERO: u32 = 3003;
    /// Invalid regular expression: `{0}`.
    pub const INVALID_REGEX: u32 = 3004;
    /// SERVICE call failed: `{0}`.
    pub const SERVICE_ERROR: u32 = 3005;
    /// LOAD failed: `{0}`.
    pub const LOAD_ERROR: u32 = 3006;
    /// Query cancelled by the caller.
    pub const CANCELLED: u32 = 3007;

    /// Store is locked by another writer.
    pub const STORE_LOCKED: u32 = 4001;
    /// Write-ahead log is corrupted.
    pub const WAL_CORRUPTED: u32 = 4002;
    /// Checkpoint failed.
    pub const CHECKPOINT_FAILED: u32 = 4003;
    /// Index image is corrupted.
    pub const INDEX_CORRUPTED: u32 = 4004;
    /// Store is read-only.
    pub const READ_ONLY: u32 = 4005;
}

/// The message template for a base code (`{0}`, `{1}` are argument
/// placeholders).
pub fn message_template(base_code: u32) -> &'static str {
    match base_code {
        codes::UNEXPECTED_CHAR => "unexpected character '{0}'",
        codes::UNTERMINATED_STRING => "unterminated string literal",
        codes::INVALID_IRI => "invalid IRI '{0}'",
        codes::EXPECTED_FOUND => "expected {0}, found {1}",
        codes::INVALID_NUMBER => "malformed numeric literal",
        codes::INVALID_ESCAPE => "invalid escape sequence",
        codes::UNEXPECTED_EOF => "unexpected end of input",
        codes::INVALID_PREFIXED_NAME => "malformed prefixed name '{0}'",
        codes::INVALID_LANG_TAG => "malformed language tag",
        codes::UNSUPPORTED_SYNTAX => "unsupported syntax: {0}",
        codes::MALFORMED_DOCUMENT => "malformed document: {0}",
        codes::UNDEFINED_PREFIX => "undefined prefix '{0}'",
        codes::AGGREGATE_CONTEXT => "aggregate expression outside an aggregate query",
        codes::NOT_GROUPED => "variable ?{0} is projected but not grouped",
        codes::DUPLICATE_BINDING => "variable ?{0} is already bound in this scope",
        codes::UNKNOWN_FUNCTION => "unknown function '{0}'",
        codes::TEMPORAL_IN_STRICT => "temporal clause is not allowed in strict mode",
        codes::CARTESIAN_PRODUCT => "pattern groups share no variable; result is a Cartesian product",
        codes::UNBOUND_FILTER_VAR => "variable ?{0} in FILTER is never bound by the pattern",
        codes::QUERY_TIMEOUT => "query exceeded its deadline",
        codes::MEMORY_LIMIT => "query exceeded its memory budget",
        codes::DIVISION_BY_ZERO => "division by zero",
        codes::INVALID_REGEX => "invalid regular expression: {0}",
        codes::SERVICE_ERROR => "SERVICE call failed: {0}",
        codes::LOAD_ERROR => "LOAD failed: {0}",
        codes::CANCELLED => "query was cancelled",
        codes::STORE_LOCKED => "store is locked by another writer",
        codes::WAL_CORRUPTED => "write-ahead log is corrupted",
        codes::CHECKPOINT_FAILED => "checkpoint failed",
        codes::INDEX_CORRUPTED => "index is corrupted; store is read-only",
        codes::READ_ONLY => "store is read-only",
        _ => "unknown diagnostic",
    }
}

// ------------------------------------------------------------------------------------------------
// Severity
// ------------------------------------------------------------------------------------------------

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Blocks execution.
    Error,
    /// Suspicious but not blocking.
    Warning,
    /// Neutral information.
    Info,
    /// A suggestion.
    Hint,
}

impl Severity {
    /// Severity encoded in a code's offset band.
    pub fn of_code(code: u32) -> Severity {
        match code / WARNING_BASE {
            0 => Severity::Error,
            1 => Severity::Warning,
            2 => Severity::Info,
            _ => Severity::Hint,
        }
    }

    /// Single-letter prefix used by [`format_code`].
    pub fn letter(self) -> char {
        match self {
            Severity::Error => 'E',
            Severity::Warning => 'W',
            Severity::Info => 'I',
            Severity::Hint => 'H',
        }
    }
}

/// Renders a code as `E2001` / `W1003` / `I1001` / `H1001`.
pub fn format_code(code: u32) -> String {
    format!("{}{}", Severity::of_code(code).letter(), code % WARNING_BASE)
}

// ------------------------------------------------------------------------------------------------
// Span
// ------------------------------------------------------------------------------------------------

/// A source location: byte offset + length, with 1-based line/column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// Byte offset into the source.
    pub offset: u32,
    /// Byte length of the marked region.
    pub len: u32,
    /// 1-based line of the region's start.
    pub line: u32,
    /// 1-based column of the region's start.
    pub col: u32,
}

impl Span {
    /// A span at a known position.
    pub fn new(offset: u32, len: u32, line: u32, col: u32) -> Self {
        Self {
            offset,
            len,
            line,
            col,
        }
    }

    /// The zero span (whole-input problems with no anchor).
    pub fn none() -> Self {
        Self::default()
    }
}

// ------------------------------------------------------------------------------------------------
// Diagnostic & bag
// ------------------------------------------------------------------------------------------------

/// One problem report. Argument bytes live in the owning bag's pool.
#[derive(Debug, Clone, Copy)]
pub struct Diagnostic {
    /// Numeric code; see [`codes`].
    pub code: u32,
    /// Where in the source.
    pub span: Span,
    /// A secondary related location, if any.
    pub related: Option<Span>,
    args: [(u32, u32); MAX_ARGS],
    arg_count: u8,
}

impl Diagnostic {
    /// The severity encoded in the code.
    pub fn severity(&self) -> Severity {
        Severity::of_code(self.code)
    }
}

/// Collects diagnostics and their argument bytes.
///
/// The bag is the unit of reporting: parse → inspect
/// [`DiagnosticBag::has_errors`] → format what accumulated.
#[derive(Debug, Default)]
pub struct DiagnosticBag {
    diags: Vec<Diagnostic>,
    arg_pool: Vec<u8>,
}

impl DiagnosticBag {
    /// An empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports a diagnostic with no arguments.
    pub fn report(&mut self, code: u32, span: Span) {
        self.report_with_args(code, span, &[]);
    }

    /// Reports a diagnostic with message arguments (at most
    /// [`MAX_ARGS`]; extras are dropped).
    pub fn report_with_args(&mut self, code: u32, span: Span, args: &[&str]) {
        let mut stored = [(0u32, 0u32); MAX_ARGS];
        let mut count = 0u8;
        for arg in args.iter().take(MAX_ARGS) {
            let start = self.arg_pool.len() as u32;
            self.arg_pool.extend_from_slice(arg.as_bytes());
            stored[count as usize] = (start, arg.len() as u32);
            count += 1;
        }
        self.diags.push(Diagnostic {
            code,
            span,
            related: None,
            args: stored,
            arg_count: count,
        });
    }

    /// Reports a diagnostic with a related secondary span.
    pub fn report_related(&mut self, code: u32, span: Span, related: Span, args: &[&str]) {
        self.report_with_args(code, span, args);
        if let Some(last) = self.diags.last_mut() {
            last.related = Some(related);
        }
    }

    /// The arguments of a diagnostic, resolved against the pool.
    pub fn args<'a>(&'a self, diag: &Diagnostic) -> impl Iterator<Item = &'a str> {
        diag.args[..diag.arg_count as usize]
            .iter()
            .map(|&(start, len)| {
                std::str::from_utf8(&self.arg_pool[start as usize..(start + len) as usize])
                    .unwrap_or("")
            })
    }

    /// Renders a diagnostic's message from its template and arguments.
    pub fn message(&self, diag: &Diagnostic) -> String {
        let mut msg = message_template(diag.code % WARNING_BASE).to_string();
        for (i, arg) in self.args(diag).enumerate() {
            msg = msg.replace(&format!("{{{i}}}"), arg);
        }
        msg
    }

    /// All diagnostics, in report order.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diags.iter()
    }

    /// Number of diagnostics.
    pub fn len(&self) -> usize {
        self.diags.len()
    }

    /// True if nothing was reported.
    pub fn is_empty(&self) -> bool {
        self.diags.is_empty()
    }

    /// True if any error-severity diagnostic was reported.
    pub fn has_errors(&self) -> bool {
        self.diags.iter().any(|d| d.severity() == Severity::Error)
    }

    /// Number of error-severity diagnostics.
    pub fn error_count(&self) -> usize {
        self.diags
            .iter()
            .filter(|d| d.severity() == Severity::Error)
            .count()
    }

    /// Drops all diagnostics, keeping pooled capacity for reuse.
    pub fn clear(&mut self) {
        self.diags.clear();
        self.arg_pool.clear();
    }
}
