//! SPARQL execution — the physical side of the pipeline.
//!
//! [`QueryEngine`] glues the front end to the store: parse → semantic
//! diagnostics → solve the WHERE pattern over index cursors → fold
//! aggregates → project / order / slice → serialize. The solver lives
//! in [`solve`], expression evaluation in [`eval`], property paths in
//! [`path`], aggregation in [`aggregate`], SERVICE federation in
//! [`service`], updates in [`update`], and result serialization in
//! [`results`].
//!
//! External collaborators are injected: [`HttpServiceExecutor`] carries
//! SERVICE calls, [`RdfLoader`] fetches documents for LOAD. Without
//! them the corresponding operations fail (or, under SILENT, yield the
//! empty result).

pub mod aggregate;
pub mod binding;
pub mod eval;
pub mod path;
pub mod results;
pub mod service;
pub mod solve;
pub mod update;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use tracing::debug;

use crate::codec::{CodecError, Format};
use crate::diag::DiagnosticBag;
use crate::model::AtomId;
use crate::pool::StorePool;
use crate::sparql::ast::*;
use crate::sparql::{SparqlError, parse_query};
use crate::store::{Pattern, QuadStore, StoreError};

use binding::{Bound, Row};
use eval::{EvalEnv, EvalValue, evaluate};
use solve::{SolveCx, Temporal, solve_group};

// ------------------------------------------------------------------------------------------------
// External collaborators
// ------------------------------------------------------------------------------------------------

/// Remote SPARQL transport for SERVICE.
pub trait HttpServiceExecutor: Send + Sync {
    /// Runs a SELECT at `endpoint`, returning SPARQL Results JSON.
    fn execute_select(&self, endpoint: &str, query: &str) -> Result<String, String>;

    /// Runs an ASK at `endpoint`.
    fn execute_ask(&self, endpoint: &str, query: &str) -> Result<bool, String>;
}

/// Document fetcher for LOAD.
pub trait RdfLoader: Send + Sync {
    /// Dereferences `url`, returning the body and its media type (if
    /// the transport knows it).
    fn fetch(&self, url: &str) -> Result<(Vec<u8>, Option<String>), String>;
}

// ------------------------------------------------------------------------------------------------
// Errors & options
// ------------------------------------------------------------------------------------------------

/// Errors returned by query and update execution.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The query text did not parse; details are in the bag.
    #[error("SPARQL error: {0}")]
    Sparql(#[from] SparqlError),

    /// Storage failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Codec failure (LOAD, CONSTRUCT serialization).
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The wall-clock deadline passed.
    #[error("query exceeded its deadline")]
    Timeout,

    /// The caller's cancellation flag was raised.
    #[error("query was cancelled")]
    Cancelled,

    /// Division by zero in strict mode.
    #[error("division by zero")]
    DivisionByZero,

    /// A REGEX/REPLACE pattern failed to compile.
    #[error("invalid regular expression: {0}")]
    InvalidRegex(String),

    /// A SERVICE call failed (and was not SILENT).
    #[error("SERVICE call failed: {0}")]
    Service(String),

    /// A LOAD failed (and was not SILENT).
    #[error("LOAD failed: {0}")]
    Load(String),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Per-query execution options.
#[derive(Clone, Default)]
pub struct QueryOptions {
    /// Reject the non-standard temporal clause; make division by zero
    /// a hard error.
    pub strict: bool,
    /// Wall-clock budget for the whole query.
    pub timeout: Option<Duration>,
    /// Cooperative cancellation flag, checked per consumed row.
    pub cancel: Option<Arc<AtomicBool>>,
    /// SERVICE result size at which rows are indexed into a pooled
    /// store instead of held in memory. `None` = 500.
    pub indexed_threshold: Option<usize>,
}

/// A SELECT result: column names and canonical-term rows.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectResult {
    /// Projected variable names, without `?`.
    pub vars: Vec<String>,
    /// One entry per solution; `None` is an unbound cell.
    pub rows: Vec<Vec<Option<String>>>,
}

/// One emitted triple of a CONSTRUCT/DESCRIBE, in canonical form.
pub type EmittedTriple = [String; 3];

/// What a query produced.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// SELECT bindings.
    Select(SelectResult),
    /// ASK verdict.
    Ask(bool),
    /// CONSTRUCT / DESCRIBE triples, deduplicated.
    Graph(Vec<EmittedTriple>),
}

// ------------------------------------------------------------------------------------------------
// Engine
// ------------------------------------------------------------------------------------------------

/// The query engine over one store.
pub struct QueryEngine<'s> {
    store: &'s QuadStore,
    service: Option<Arc<dyn HttpServiceExecutor>>,
    loader: Option<Arc<dyn RdfLoader>>,
    pool: Option<Arc<StorePool>>,
}

impl<'s> QueryEngine<'s> {
    /// An engine with no external collaborators.
    pub fn new(store: &'s QuadStore) -> Self {
        Self {
            store,
            service: None,
            loader: None,
            pool: None,
        }
    }

    /// Wires in a SERVICE transport.
    pub fn with_service(mut self, service: Arc<dyn HttpServiceExecutor>) -> Self {
        self.service = Some(service);
        self
    }

    /// Wires in a LOAD fetcher.
    pub fn with_loader(mut self, loader: Arc<dyn RdfLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Wires in a scratch-store pool (large SERVICE results).
    pub fn with_pool(mut self, pool: Arc<StorePool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Parses and executes a query, collecting diagnostics into `bag`.
    pub fn query_with_diagnostics(
        &self,
        text: &str,
        options: QueryOptions,
        bag: &mut DiagnosticBag,
    ) -> Result<QueryOutcome, ExecError> {
        let query = parse_query(text, options.strict, bag)?;
        self.execute(&query, &options)
    }

    /// Parses and executes a query.
    pub fn query(&self, text: &str, options: QueryOptions) -> Result<QueryOutcome, ExecError> {
        let mut bag = DiagnosticBag::new();
        self.query_with_diagnostics(text, options, &mut bag)
    }

    /// Parses and executes an update request.
    pub fn update(&self, text: &str, options: QueryOptions) -> Result<(), ExecError> {
        let mut bag = DiagnosticBag::new();
        update::execute_update(self, text, &options, &mut bag)
    }

    /// Parses an RDF document into the store (the LOAD path for bytes
    /// already in hand). Returns the number of statements added.
    pub fn load_bytes(
        &self,
        bytes: &[u8],
        format: Format,
        graph: Option<&[u8]>,
    ) -> Result<u64, ExecError> {
        update::load_document(self.store, bytes, format, graph)
    }

    pub(crate) fn store(&self) -> &QuadStore {
        self.store
    }

    pub(crate) fn loader(&self) -> Option<&Arc<dyn RdfLoader>> {
        self.loader.as_ref()
    }

    // --------------------------------------------------------------------------------------------
    // Execution
    // --------------------------------------------------------------------------------------------

    fn execute(&self, query: &Query, options: &QueryOptions) -> Result<QueryOutcome, ExecError> {
        let guard = self.store.read()?;
        let now = guard.snapshot_time();
        let temporal = match query.temporal {
            None => Temporal::Current(now),
            Some(TemporalClause::AsOf(t)) => Temporal::AsOf(t, now),
            Some(TemporalClause::During(a, b)) => Temporal::During(a, b, now),
            Some(TemporalClause::AllVersions) => Temporal::All,
        };

        // Variable space: named variables plus blank-node pseudo-vars.
        let mut blanks: FxHashMap<String, VarId> = FxHashMap::default();
        let mut next = query.variables.len() as VarId;
        collect_blanks(&query.pattern, &mut blanks, &mut next);
        if let QueryKind::Construct(template) = &query.kind {
            for t in template {
                for term in [&t.s, &t.o] {
                    if let TermPat::Blank(label) = term
                        && !blanks.contains_key(label)
                    {
                        blanks.insert(label.clone(), next);
                        next += 1;
                    }
                }
            }
        }

        let cx = SolveCx {
            guard: &guard,
            temporal,
            strict: options.strict,
            deadline: options.timeout.map(|t| Instant::now() + t),
            cancel: options.cancel.clone(),
            width: next as usize,
            blanks,
            var_names: query.variables.clone(),
            prologue_text: query.prologue_text.clone(),
            service: self.service.clone(),
            pool: self.pool.clone(),
            indexed_threshold: options.indexed_threshold.unwrap_or(500),
            named_graphs: solve::resolve_named_graphs(&guard, &query.dataset),
        };
        let graphs = solve::resolve_default_graphs(&guard, &query.dataset);

        match &query.kind {
            QueryKind::Select(_) => {
                let (rows, projected) = run_select(&cx, query, &graphs)?;
                let vars: Vec<String> = projected
                    .iter()
                    .map(|&v| query.var_name(v).to_string())
                    .collect();
                let data = rows
                    .iter()
                    .map(|row| {
                        projected
                            .iter()
                            .map(|&v| row.term(v).map(str::to_string))
                            .collect()
                    })
                    .collect();
                debug!(rows = rows.len(), "select complete");
                Ok(QueryOutcome::Select(SelectResult { vars, rows: data }))
            }
            QueryKind::Ask => {
                let rows = solve_group(&cx, &query.pattern, vec![cx.empty_row()], &graphs)?;
                Ok(QueryOutcome::Ask(!rows.is_empty()))
            }
            QueryKind::Construct(template) => {
                let (rows, _) = run_select(&cx, query, &graphs)?;
                Ok(QueryOutcome::Graph(construct(&cx, template, &rows)))
            }
            QueryKind::Describe(targets) => {
                let rows = if query.pattern.elements.is_empty() {
                    vec![cx.empty_row()]
                } else {
                    solve_group(&cx, &query.pattern, vec![cx.empty_row()], &graphs)?
                };
                describe(&cx, targets, &rows, &graphs)
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// SELECT pipeline
// ------------------------------------------------------------------------------------------------

/// Runs the full SELECT pipeline. Returns the final rows and the
/// projected variable ids.
fn run_select(
    cx: &SolveCx<'_>,
    query: &Query,
    graphs: &[AtomId],
) -> Result<(Vec<Row>, Vec<VarId>), ExecError> {
    let rows = solve_group(cx, &query.pattern, vec![cx.empty_row()], graphs)?;

    let aggregates = aggregate::collect_aggregates(query);
    let is_aggregate = !aggregates.is_empty() || !query.modifiers.group_by.is_empty();

    // Stage rows with their aggregate environments.
    let staged: Vec<(Row, Vec<(AggExpr, Option<EvalValue>)>)> = if is_aggregate {
        let grouped = aggregate::group_and_fold(cx, query, rows, &aggregates)?;
        let grouped = aggregate::apply_having(cx, query, grouped)?;
        grouped.into_iter().map(|g| (g.row, g.aggregates)).collect()
    } else {
        rows.into_iter().map(|r| (r, Vec::new())).collect()
    };

    // Projection extensions and ORDER BY keys, while aggregate values
    // are still in reach.
    let select = match &query.kind {
        QueryKind::Select(select) => Some(select),
        _ => None,
    };
    let mut out_rows = Vec::with_capacity(staged.len());
    let mut sort_keys = Vec::with_capacity(staged.len());
    for (mut row, aggs) in staged {
        cx.check()?;
        if let Some(select) = select
            && let Projection::Items(items) = &select.projection
        {
            for item in items {
                if let Some(expr) = &item.expr {
                    let mut env = agg_env(cx, &aggs);
                    if let Some(value) = evaluate(expr, &row, &mut env)? {
                        row.bind(item.var, Bound::bound(value.to_canonical(), 0));
                    }
                }
            }
        }
        let mut keys = Vec::with_capacity(query.modifiers.order_by.len());
        for key in &query.modifiers.order_by {
            let mut env = agg_env(cx, &aggs);
            let value = evaluate(&key.expr, &row, &mut env)?;
            keys.push(value.map(|v| v.to_canonical()));
        }
        out_rows.push(row);
        sort_keys.push(keys);
    }

    let mut rows = aggregate::order_and_slice(query, out_rows, sort_keys);

    // Projection set. Subqueries share the outer variable table and
    // carry an empty local one; `SELECT *` there means the full space.
    let projected: Vec<VarId> = match select.map(|s| &s.projection) {
        Some(Projection::Items(items)) => items.iter().map(|i| i.var).collect(),
        _ => {
            let n = if query.variables.is_empty() {
                cx.width
            } else {
                query.variables.len()
            };
            (0..n as VarId).collect()
        }
    };

    // DISTINCT / REDUCED over the projected columns.
    if let Some(select) = select
        && (select.distinct || select.reduced)
    {
        let mut seen = FxHashSet::default();
        rows.retain(|row| {
            let key: Vec<Option<String>> = projected
                .iter()
                .map(|&v| row.term(v).map(str::to_string))
                .collect();
            seen.insert(key)
        });
    }

    Ok((rows, projected))
}

fn agg_env<'e>(
    cx: &'e SolveCx<'_>,
    aggs: &'e [(AggExpr, Option<EvalValue>)],
) -> EvalEnv<'e> {
    EvalEnv {
        depth: 0,
        strict: cx.strict,
        exists: Box::new(|_, _| Ok(false)),
        aggregates: aggs,
    }
}

/// Runs a subquery and trims bindings to its projection.
pub(crate) fn run_subselect(
    cx: &SolveCx<'_>,
    query: &Query,
    graphs: &[AtomId],
) -> Result<Vec<Row>, ExecError> {
    let (mut rows, projected) = run_select(cx, query, graphs)?;
    let projected: FxHashSet<VarId> = projected.into_iter().collect();
    for row in &mut rows {
        for v in 0..cx.width as VarId {
            if !projected.contains(&v) {
                row.unbind(v);
            }
        }
    }
    Ok(rows)
}

// ------------------------------------------------------------------------------------------------
// CONSTRUCT / DESCRIBE
// ------------------------------------------------------------------------------------------------

fn construct(cx: &SolveCx<'_>, template: &[TriplePattern], rows: &[Row]) -> Vec<EmittedTriple> {
    let mut seen = FxHashSet::default();
    let mut out = Vec::new();
    for (row_idx, row) in rows.iter().enumerate() {
        for t in template {
            let s = instantiate(cx, &t.s, row, row_idx);
            let p = match &t.p {
                Predicate::Term(p) => instantiate(cx, p, row, row_idx),
                Predicate::Path(_) => None,
            };
            let o = instantiate(cx, &t.o, row, row_idx);
            let (Some(s), Some(p), Some(o)) = (s, p, o) else {
                continue;
            };
            // Position validity per RDF.
            if s.starts_with('"') || !p.starts_with('<') {
                continue;
            }
            let triple = [s, p, o];
            if seen.insert(triple.clone()) {
                out.push(triple);
            }
        }
    }
    out
}

/// A template position under one solution. Blank labels are scoped per
/// solution, as CONSTRUCT requires.
fn instantiate(cx: &SolveCx<'_>, term: &TermPat, row: &Row, row_idx: usize) -> Option<String> {
    match term {
        TermPat::Var(v) => row.term(*v).map(str::to_string),
        TermPat::Blank(label) => match cx.blanks.get(label).and_then(|v| row.term(*v)) {
            // A pattern-bound blank keeps its binding; a pure template
            // blank becomes one fresh node per solution.
            Some(bound) => Some(bound.to_string()),
            None => Some(format!("_:c{row_idx}_{label}")),
        },
        ground => Some(eval::term_value(ground).to_canonical()),
    }
}

fn describe(
    cx: &SolveCx<'_>,
    targets: &[TermPat],
    rows: &[Row],
    graphs: &[AtomId],
) -> Result<QueryOutcome, ExecError> {
    // Resolve the described terms: ground targets once, variable
    // targets per solution. DESCRIBE * describes every variable.
    let mut subjects: Vec<String> = Vec::new();
    let mut push = |term: String| {
        if !subjects.contains(&term) {
            subjects.push(term);
        }
    };
    if targets.is_empty() {
        for row in rows {
            for v in row.bound_vars() {
                if let Some(term) = row.term(v) {
                    push(term.to_string());
                }
            }
        }
    } else {
        for target in targets {
            match target {
                TermPat::Var(v) => {
                    for row in rows {
                        if let Some(term) = row.term(*v) {
                            push(term.to_string());
                        }
                    }
                }
                ground => push(eval::term_value(ground).to_canonical()),
            }
        }
    }

    // Subject-anchored concise bounded description: all quads with the
    // described term as subject, chasing blank objects transitively.
    let mut seen_subjects: FxHashSet<AtomId> = FxHashSet::default();
    let mut emitted = FxHashSet::default();
    let mut out = Vec::new();
    let mut frontier: Vec<AtomId> = subjects
        .iter()
        .filter_map(|term| cx.guard.lookup(term.as_bytes()))
        .collect();

    while let Some(subject) = frontier.pop() {
        cx.check()?;
        if !seen_subjects.insert(subject) {
            continue;
        }
        for &g in graphs {
            let pattern = Pattern::quad(Some(subject), None, None, Some(g));
            for quad in cx.guard.query_all_versions(pattern) {
                if !cx.temporal.admits(&quad) {
                    continue;
                }
                let s = cx.guard.resolve_str(quad.ids.s)?.to_string();
                let p = cx.guard.resolve_str(quad.ids.p)?.to_string();
                let o = cx.guard.resolve_str(quad.ids.o)?.to_string();
                if o.starts_with("_:") {
                    frontier.push(quad.ids.o);
                }
                let triple = [s, p, o];
                if emitted.insert(triple.clone()) {
                    out.push(triple);
                }
            }
        }
    }
    Ok(QueryOutcome::Graph(out))
}

// ------------------------------------------------------------------------------------------------
// Variable-space helpers
// ------------------------------------------------------------------------------------------------

/// Assigns pseudo-variable ids to every blank label in a pattern.
fn collect_blanks(group: &GroupPattern, blanks: &mut FxHashMap<String, VarId>, next: &mut VarId) {
    let mut visit_term = |term: &TermPat, blanks: &mut FxHashMap<String, VarId>, next: &mut VarId| {
        if let TermPat::Blank(label) = term
            && !blanks.contains_key(label)
        {
            blanks.insert(label.clone(), *next);
            *next += 1;
        }
    };
    for element in &group.elements {
        match element {
            Element::Triple(t) => {
                visit_term(&t.s, blanks, next);
                visit_term(&t.o, blanks, next);
            }
            Element::Optional(g)
            | Element::Minus(g)
            | Element::Group(g)
            | Element::Graph { pattern: g, .. }
            | Element::Service { pattern: g, .. } => collect_blanks(g, blanks, next),
            Element::Union(branches) => {
                for b in branches {
                    collect_blanks(b, blanks, next);
                }
            }
            Element::SubSelect(q) => collect_blanks(&q.pattern, blanks, next),
            Element::Filter { .. } | Element::Bind { .. } | Element::Values { .. } => {}
        }
    }
}
