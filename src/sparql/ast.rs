//! SPARQL abstract syntax tree.
//!
//! Every node carries the [`Span`] of the source it came from, so
//! diagnostics and error reporting can point back into the query text.
//! Variables are interned once per query into [`Query::variables`] and
//! referenced by [`VarId`] everywhere else — the executor's binding
//! rows are indexed by the same ids. Productions that are usually
//! short (patterns, filters, projections) use `SmallVec` so ordinary
//! queries stay off the heap.

use smallvec::SmallVec;

use crate::diag::Span;
use crate::model::Timestamp;

/// Index into [`Query::variables`] / [`Update::variables`].
pub type VarId = u16;

// ------------------------------------------------------------------------------------------------
// Terms and paths
// ------------------------------------------------------------------------------------------------

/// A term position in a pattern: a variable or a ground term.
#[derive(Debug, Clone, PartialEq)]
pub enum TermPat {
    /// A variable (`?x` / `$x`).
    Var(VarId),
    /// An IRI, already expanded against the prologue.
    Iri(String),
    /// A literal.
    Literal {
        /// Unescaped lexical form.
        lexical: String,
        /// Language tag.
        lang: Option<String>,
        /// Datatype IRI.
        datatype: Option<String>,
    },
    /// A blank node — scoped to the query, acts as a fresh variable.
    Blank(String),
}

impl TermPat {
    /// The variable id, if this is a variable.
    pub fn as_var(&self) -> Option<VarId> {
        match self {
            TermPat::Var(v) => Some(*v),
            _ => None,
        }
    }
}

/// A property path in predicate position.
#[derive(Debug, Clone, PartialEq)]
pub enum PropPath {
    /// A plain IRI hop.
    Iri(String),
    /// `^path` — inverse.
    Inverse(Box<PropPath>),
    /// `p₁ / p₂` — sequence.
    Seq(Box<PropPath>, Box<PropPath>),
    /// `p₁ | p₂` — alternative.
    Alt(Box<PropPath>, Box<PropPath>),
    /// `p*`.
    ZeroOrMore(Box<PropPath>),
    /// `p+`.
    OneOrMore(Box<PropPath>),
    /// `p?`.
    ZeroOrOne(Box<PropPath>),
    /// `!(iri₁ | …)` — negated property set (forward members only).
    Negated(Vec<String>),
}

/// The predicate position: a term (IRI or variable) or a path.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Variable or IRI.
    Term(TermPat),
    /// A non-trivial property path.
    Path(PropPath),
}

/// One triple pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct TriplePattern {
    /// Subject.
    pub s: TermPat,
    /// Predicate or path.
    pub p: Predicate,
    /// Object.
    pub o: TermPat,
    /// Source location.
    pub span: Span,
}

// ------------------------------------------------------------------------------------------------
// Expressions
// ------------------------------------------------------------------------------------------------

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Built-in scalar functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Bound,
    If,
    Coalesce,
    Str,
    StrLen,
    UCase,
    LCase,
    Contains,
    StrStarts,
    StrEnds,
    Concat,
    Regex,
    Replace,
    Lang,
    Datatype,
    Iri,
    StrDt,
    StrLang,
    Abs,
    Ceil,
    Floor,
    Round,
    SameTerm,
    IsIri,
    IsBlank,
    IsLiteral,
    IsNumeric,
}

/// Aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    GroupConcat,
    Sample,
}

/// An aggregate expression.
#[derive(Debug, Clone, PartialEq)]
pub struct AggExpr {
    /// Which fold.
    pub func: AggFunc,
    /// DISTINCT inside the aggregate.
    pub distinct: bool,
    /// The folded expression; `None` is `COUNT(*)`.
    pub expr: Option<Box<Expr>>,
    /// GROUP_CONCAT separator (default `" "`).
    pub separator: Option<String>,
}

/// A filter / projection / bind expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A term (variable or constant).
    Term(TermPat),
    /// `a || b`.
    Or(Box<Expr>, Box<Expr>),
    /// `a && b`.
    And(Box<Expr>, Box<Expr>),
    /// `!a`.
    Not(Box<Expr>),
    /// Comparison.
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    /// Arithmetic.
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    /// Unary minus.
    Neg(Box<Expr>),
    /// `expr IN (…)`; negated for `NOT IN`.
    In {
        /// The needle.
        expr: Box<Expr>,
        /// The haystack.
        list: Vec<Expr>,
        /// True for `NOT IN`.
        negated: bool,
    },
    /// A built-in function call.
    Call(Func, Vec<Expr>),
    /// `EXISTS { … }`; negated for `NOT EXISTS`.
    Exists {
        /// The probed pattern.
        pattern: Box<GroupPattern>,
        /// True for `NOT EXISTS`.
        negated: bool,
    },
    /// An aggregate reference (only valid in aggregate queries).
    Aggregate(AggExpr),
}

// ------------------------------------------------------------------------------------------------
// Patterns
// ------------------------------------------------------------------------------------------------

/// One element of a group graph pattern, in source order.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// A basic triple pattern.
    Triple(TriplePattern),
    /// `OPTIONAL { … }`.
    Optional(GroupPattern),
    /// `{ … } UNION { … } …`.
    Union(Vec<GroupPattern>),
    /// `MINUS { … }`.
    Minus(GroupPattern),
    /// `GRAPH term { … }`.
    Graph {
        /// The graph term (variable or IRI).
        term: TermPat,
        /// The scoped pattern.
        pattern: GroupPattern,
    },
    /// `SERVICE [SILENT] term { … }`.
    Service {
        /// Swallow failures.
        silent: bool,
        /// Endpoint (variable or IRI).
        endpoint: TermPat,
        /// The remote pattern (for local bookkeeping).
        pattern: GroupPattern,
        /// The raw source text of the braced group, sent to the
        /// endpoint verbatim.
        raw: String,
    },
    /// `FILTER expr`, with the nesting depth it was written at.
    Filter {
        /// The constraint.
        expr: Expr,
        /// Scope depth (groups are one deeper than their parent).
        depth: u8,
    },
    /// `BIND (expr AS ?v)`.
    Bind {
        /// The computed expression.
        expr: Expr,
        /// The target variable.
        var: VarId,
        /// Scope depth of the bind.
        depth: u8,
        /// Index of the pattern element after which the bind runs.
        after_element: usize,
    },
    /// An inline `VALUES` block.
    Values {
        /// The listed variables.
        vars: Vec<VarId>,
        /// Rows; `None` is `UNDEF`.
        rows: Vec<Vec<Option<TermPat>>>,
    },
    /// A `{ SELECT … }` subquery.
    SubSelect(Box<Query>),
    /// A nested plain group `{ … }`.
    Group(GroupPattern),
}

/// A group graph pattern: elements in source order plus its depth.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupPattern {
    /// The elements.
    pub elements: Vec<Element>,
    /// Nesting depth (outermost WHERE group is 1).
    pub depth: u8,
    /// Source location of the opening brace.
    pub span: Span,
}

// ------------------------------------------------------------------------------------------------
// Query
// ------------------------------------------------------------------------------------------------

/// One projected column: a plain variable or `(expr AS ?v)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjItem {
    /// The output variable.
    pub var: VarId,
    /// The computed expression, if any.
    pub expr: Option<Expr>,
    /// Source location.
    pub span: Span,
}

/// SELECT projection.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// `SELECT *`.
    All,
    /// Explicit columns.
    Items(SmallVec<[ProjItem; 8]>),
}

/// The SELECT clause.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectClause {
    /// `DISTINCT`.
    pub distinct: bool,
    /// `REDUCED`.
    pub reduced: bool,
    /// The projection.
    pub projection: Projection,
}

/// What kind of query this is.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryKind {
    /// `SELECT …`.
    Select(SelectClause),
    /// `CONSTRUCT { template } WHERE …`.
    Construct(Vec<TriplePattern>),
    /// `DESCRIBE term… [WHERE …]`.
    Describe(Vec<TermPat>),
    /// `ASK …`.
    Ask,
}

/// `FROM` / `FROM NAMED`.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetClause {
    /// True for `FROM NAMED`.
    pub named: bool,
    /// The graph IRI.
    pub iri: String,
}

/// One `GROUP BY` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupCond {
    /// The grouping expression.
    pub expr: Expr,
    /// `(expr AS ?v)` alias.
    pub alias: Option<VarId>,
}

/// One `ORDER BY` key.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    /// The sort expression.
    pub expr: Expr,
    /// False for `DESC(…)`.
    pub ascending: bool,
}

/// GROUP BY / HAVING / ORDER BY / LIMIT / OFFSET.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SolutionModifiers {
    /// Grouping conditions.
    pub group_by: Vec<GroupCond>,
    /// HAVING constraints.
    pub having: Vec<Expr>,
    /// Sort keys.
    pub order_by: Vec<OrderKey>,
    /// Row limit.
    pub limit: Option<u64>,
    /// Row offset.
    pub offset: Option<u64>,
}

/// The non-standard temporal clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalClause {
    /// `AS OF t`.
    AsOf(Timestamp),
    /// `DURING t₁ t₂`.
    During(Timestamp, Timestamp),
    /// `ALL VERSIONS`.
    AllVersions,
}

/// A parsed query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// SELECT / CONSTRUCT / DESCRIBE / ASK.
    pub kind: QueryKind,
    /// FROM / FROM NAMED clauses.
    pub dataset: Vec<DatasetClause>,
    /// The WHERE pattern.
    pub pattern: GroupPattern,
    /// Solution modifiers.
    pub modifiers: SolutionModifiers,
    /// Temporal clause, if present.
    pub temporal: Option<TemporalClause>,
    /// Variable table; [`VarId`]s index into it.
    pub variables: Vec<String>,
    /// The BASE/PREFIX source text, replayed verbatim to SERVICE
    /// endpoints.
    pub prologue_text: String,
}

impl Query {
    /// The name of a variable.
    pub fn var_name(&self, id: VarId) -> &str {
        self.variables
            .get(id as usize)
            .map(String::as_str)
            .unwrap_or("")
    }
}

// ------------------------------------------------------------------------------------------------
// Updates
// ------------------------------------------------------------------------------------------------

/// A quad template: ground in `…_DATA`, may hold variables elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadTemplate {
    /// Subject.
    pub s: TermPat,
    /// Predicate.
    pub p: TermPat,
    /// Object.
    pub o: TermPat,
    /// Graph (None = default graph).
    pub g: Option<TermPat>,
}

/// The target of CLEAR / DROP.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphTarget {
    /// `DEFAULT`.
    Default,
    /// `GRAPH <iri>`.
    Named(String),
    /// `NAMED` — every named graph.
    AllNamed,
    /// `ALL`.
    All,
}

/// A graph operand of COPY / MOVE / ADD.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphRef {
    /// `DEFAULT`.
    Default,
    /// `[GRAPH] <iri>`.
    Named(String),
}

/// One update operation.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOperation {
    /// `INSERT DATA { quads }`.
    InsertData(Vec<QuadTemplate>),
    /// `DELETE DATA { quads }`.
    DeleteData(Vec<QuadTemplate>),
    /// `DELETE WHERE { pattern }`.
    DeleteWhere(Vec<QuadTemplate>),
    /// `[WITH <g>] DELETE { … } INSERT { … } WHERE { … }`.
    Modify {
        /// `WITH` graph.
        with: Option<String>,
        /// Deletion templates.
        delete: Vec<QuadTemplate>,
        /// Insertion templates.
        insert: Vec<QuadTemplate>,
        /// The binding pattern.
        pattern: GroupPattern,
    },
    /// `LOAD [SILENT] <url> [INTO GRAPH <g>]`.
    Load {
        /// Swallow failures.
        silent: bool,
        /// Source URL.
        source: String,
        /// Target graph.
        graph: Option<String>,
    },
    /// `CLEAR [SILENT] target`.
    Clear {
        /// Swallow failures.
        silent: bool,
        /// What to clear.
        target: GraphTarget,
    },
    /// `CREATE [SILENT] GRAPH <g>`.
    Create {
        /// Swallow failures.
        silent: bool,
        /// The graph.
        graph: String,
    },
    /// `DROP [SILENT] target`.
    Drop {
        /// Swallow failures.
        silent: bool,
        /// What to drop.
        target: GraphTarget,
    },
    /// `COPY [SILENT] from TO to`.
    Copy {
        /// Swallow failures.
        silent: bool,
        /// Source.
        from: GraphRef,
        /// Destination.
        to: GraphRef,
    },
    /// `MOVE [SILENT] from TO to`.
    Move {
        /// Swallow failures.
        silent: bool,
        /// Source.
        from: GraphRef,
        /// Destination.
        to: GraphRef,
    },
    /// `ADD [SILENT] from TO to`.
    Add {
        /// Swallow failures.
        silent: bool,
        /// Source.
        from: GraphRef,
        /// Destination.
        to: GraphRef,
    },
}

/// A parsed update request: operations separated by `;`.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// The operations, in order.
    pub operations: Vec<UpdateOperation>,
    /// Variable table shared by all operations.
    pub variables: Vec<String>,
}
