//! The pattern solver — evaluation of group graph patterns.
//!
//! Execution is breadth-first over a batch of solution rows: every
//! pattern element transforms the current row set, so a triple pattern
//! is a nested-loop **index join** (each incoming row re-seeks the best
//! B+Tree cursor with its bindings substituted), OPTIONAL is a
//! correlated left-outer probe, MINUS removes rows compatible with an
//! independently-solved right side, and so on down the element list.
//! Large uncorrelated joins (subqueries, VALUES, SERVICE results) go
//! through [`join_rows`], which switches to a bloom-prefiltered hash
//! join when the sides are big enough to make nested loops hurt.
//!
//! Cancellation and the wall-clock deadline are checked once per
//! consumed row.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use bloomfilter::Bloom;
use rustc_hash::FxHashMap;

use crate::model::{AtomId, Timestamp, VersionedQuad};
use crate::pool::StorePool;
use crate::sparql::ast::*;
use crate::store::{Pattern, ReadGuard};

use super::binding::{Bound, Row};
use super::eval::{EvalEnv, evaluate};
use super::{ExecError, HttpServiceExecutor, path, service};

/// Which slice of time the query reads.
#[derive(Debug, Clone, Copy)]
pub enum Temporal {
    /// Both intervals contain the snapshot instant.
    Current(Timestamp),
    /// Valid time contains `t`, rows on the books at the snapshot.
    AsOf(Timestamp, Timestamp),
    /// Valid time overlaps `[from, until)`, rows on the books.
    During(Timestamp, Timestamp, Timestamp),
    /// Every version row.
    All,
}

impl Temporal {
    /// Does a version row participate in this query?
    pub fn admits(&self, q: &VersionedQuad) -> bool {
        match *self {
            Temporal::Current(now) => q.visible_at(now, now),
            Temporal::AsOf(t, now) => q.visible_at(t, now),
            Temporal::During(from, until, now) => {
                q.valid_overlaps(from, until) && q.tx_from <= now && now < q.tx_to
            }
            Temporal::All => true,
        }
    }
}

/// Everything the solver needs, shared across the recursion.
pub struct SolveCx<'g> {
    /// Pinned snapshot of the store.
    pub guard: &'g ReadGuard<'g>,
    /// Temporal slice.
    pub temporal: Temporal,
    /// Strict mode (affects division by zero).
    pub strict: bool,
    /// Wall-clock deadline.
    pub deadline: Option<Instant>,
    /// Cooperative cancellation flag.
    pub cancel: Option<Arc<AtomicBool>>,
    /// Width of the variable space (named variables + blank pseudo-vars).
    pub width: usize,
    /// Blank-node label → pseudo-variable id.
    pub blanks: FxHashMap<String, VarId>,
    /// Variable names (named variables only).
    pub var_names: Vec<String>,
    /// The query's prologue, replayed to SERVICE endpoints.
    pub prologue_text: String,
    /// Remote SPARQL transport, if the host wired one in.
    pub service: Option<Arc<dyn HttpServiceExecutor>>,
    /// Scratch-store pool for large SERVICE results.
    pub pool: Option<Arc<StorePool>>,
    /// SERVICE row count at which results are indexed instead of held
    /// in memory.
    pub indexed_threshold: usize,
    /// `FROM NAMED` restriction on GRAPH ?var enumeration.
    pub named_graphs: Option<Vec<AtomId>>,
}

impl SolveCx<'_> {
    /// Deadline / cancellation check; called once per consumed row.
    pub fn check(&self) -> Result<(), ExecError> {
        if let Some(cancel) = &self.cancel
            && cancel.load(Ordering::Relaxed)
        {
            return Err(ExecError::Cancelled);
        }
        if let Some(deadline) = self.deadline
            && Instant::now() > deadline
        {
            return Err(ExecError::Timeout);
        }
        Ok(())
    }

    /// An all-unbound row of the right width.
    pub fn empty_row(&self) -> Row {
        Row::empty(self.width)
    }

    fn var_id_of_name(&self, name: &str) -> Option<VarId> {
        self.var_names
            .iter()
            .position(|v| v == name)
            .map(|i| i as VarId)
    }
}

// ------------------------------------------------------------------------------------------------
// Group evaluation
// ------------------------------------------------------------------------------------------------

/// Solves a group pattern against the incoming rows.
pub fn solve_group(
    cx: &SolveCx<'_>,
    group: &GroupPattern,
    rows: Vec<Row>,
    graphs: &[AtomId],
) -> Result<Vec<Row>, ExecError> {
    let mut rows = rows;
    for element in &group.elements {
        rows = solve_element(cx, element, rows, graphs, group.depth)?;
        if rows.is_empty()
            && !matches!(element, Element::Optional(_) | Element::Bind { .. })
        {
            // Nothing downstream can resurrect an empty set except
            // UNION branches fed from the same empty input, which would
            // stay empty anyway.
            return Ok(rows);
        }
    }
    Ok(rows)
}

fn solve_element(
    cx: &SolveCx<'_>,
    element: &Element,
    rows: Vec<Row>,
    graphs: &[AtomId],
    depth: u8,
) -> Result<Vec<Row>, ExecError> {
    match element {
        Element::Triple(t) => scan_triple(cx, rows, t, graphs, depth),

        Element::Group(inner) => solve_group(cx, inner, rows, graphs),

        Element::Optional(inner) => {
            let mut out = Vec::new();
            for row in rows {
                cx.check()?;
                let matched = solve_group(cx, inner, vec![row.clone()], graphs)?;
                if matched.is_empty() {
                    out.push(row);
                } else {
                    out.extend(matched);
                }
            }
            Ok(out)
        }

        Element::Union(branches) => {
            let mut out = Vec::new();
            for branch in branches {
                out.extend(solve_group(cx, branch, rows.clone(), graphs)?);
            }
            Ok(out)
        }

        Element::Minus(inner) => {
            // The MINUS side is evaluated independently of the left.
            let minus_rows = solve_group(cx, inner, vec![cx.empty_row()], graphs)?;
            let mut out = Vec::new();
            for row in rows {
                cx.check()?;
                let removed = minus_rows
                    .iter()
                    .any(|m| row.shares_binding(m) && row.compatible(m));
                if !removed {
                    out.push(row);
                }
            }
            Ok(out)
        }

        Element::Graph { term, pattern } => match term {
            TermPat::Iri(iri) => {
                let canon = format!("<{iri}>");
                match cx.guard.lookup(canon.as_bytes()) {
                    Some(g) => solve_group(cx, pattern, rows, &[g]),
                    None => Ok(Vec::new()),
                }
            }
            TermPat::Var(v) => {
                let candidates: Vec<AtomId> = match &cx.named_graphs {
                    Some(list) => list.clone(),
                    None => cx.guard.named_graphs(),
                };
                let mut out = Vec::new();
                for g in candidates {
                    cx.check()?;
                    let canon = cx.guard.resolve_str(g)?.to_string();
                    // Seed the graph variable, dropping rows already
                    // bound to a different graph.
                    let mut seeded = Vec::new();
                    for row in &rows {
                        let mut row = row.clone();
                        if row.bind(*v, Bound::scanned(canon.clone(), depth)) {
                            seeded.push(row);
                        }
                    }
                    out.extend(solve_group(cx, pattern, seeded, &[g])?);
                }
                Ok(out)
            }
            _ => Ok(Vec::new()),
        },

        Element::Service {
            silent,
            endpoint,
            raw,
            ..
        } => service::solve_service(cx, rows, *silent, endpoint, raw),

        Element::Filter { expr, depth } => {
            let mut out = Vec::new();
            for row in rows {
                cx.check()?;
                if filter_passes(cx, expr, &row, *depth, graphs)? {
                    out.push(row);
                }
            }
            Ok(out)
        }

        Element::Bind {
            expr, var, depth, ..
        } => {
            let mut out = Vec::new();
            for row in rows {
                cx.check()?;
                let mut env = eval_env(cx, *depth, graphs);
                let value = evaluate(expr, &row, &mut env)?;
                let mut row = row;
                match value {
                    Some(value) => {
                        if row.bind(*var, Bound::bound(value.to_canonical(), *depth)) {
                            out.push(row);
                        }
                    }
                    None => out.push(row), // error leaves the var unbound
                }
            }
            Ok(out)
        }

        Element::Values { vars, rows: data } => {
            let mut value_rows = Vec::with_capacity(data.len());
            for data_row in data {
                let mut row = cx.empty_row();
                let mut ok = true;
                for (var, cell) in vars.iter().zip(data_row) {
                    if let Some(term) = cell {
                        let canon = super::eval::term_value(term).to_canonical();
                        ok &= row.bind(*var, Bound::scanned(canon, depth));
                    }
                }
                if ok {
                    value_rows.push(row);
                }
            }
            Ok(join_rows(rows, value_rows))
        }

        Element::SubSelect(query) => {
            let projected = super::run_subselect(cx, query, graphs)?;
            Ok(join_rows(rows, projected))
        }
    }
}

fn filter_passes(
    cx: &SolveCx<'_>,
    expr: &Expr,
    row: &Row,
    depth: u8,
    graphs: &[AtomId],
) -> Result<bool, ExecError> {
    let mut env = eval_env(cx, depth, graphs);
    let value = evaluate(expr, row, &mut env)?;
    Ok(value.and_then(|v| v.ebv()).unwrap_or(false))
}

fn eval_env<'e>(cx: &'e SolveCx<'_>, depth: u8, graphs: &'e [AtomId]) -> EvalEnv<'e> {
    EvalEnv {
        depth,
        strict: cx.strict,
        exists: Box::new(move |pattern: &GroupPattern, row: &Row| {
            let matched = solve_group(cx, pattern, vec![row.clone()], graphs)?;
            Ok(!matched.is_empty())
        }),
        aggregates: &[],
    }
}

// ------------------------------------------------------------------------------------------------
// Triple scans
// ------------------------------------------------------------------------------------------------

/// A resolved pattern position.
enum Pos {
    /// Ground term present in the store.
    Ground(AtomId),
    /// Ground term the store has never seen — no row can match.
    Absent,
    /// Unbound variable to bind from the scan.
    Free(VarId),
}

fn resolve_pos(cx: &SolveCx<'_>, row: &Row, term: &TermPat) -> Pos {
    let var = match term {
        TermPat::Var(v) => *v,
        TermPat::Blank(label) => match cx.blanks.get(label) {
            Some(v) => *v,
            None => return Pos::Absent,
        },
        ground => {
            let canon = super::eval::term_value(ground).to_canonical();
            return match cx.guard.lookup(canon.as_bytes()) {
                Some(id) => Pos::Ground(id),
                None => Pos::Absent,
            };
        }
    };
    match row.term(var) {
        Some(canon) => match cx.guard.lookup(canon.as_bytes()) {
            Some(id) => Pos::Ground(id),
            None => Pos::Absent,
        },
        None => Pos::Free(var),
    }
}

fn scan_triple(
    cx: &SolveCx<'_>,
    rows: Vec<Row>,
    t: &TriplePattern,
    graphs: &[AtomId],
    depth: u8,
) -> Result<Vec<Row>, ExecError> {
    let mut out = Vec::new();
    for row in rows {
        cx.check()?;
        match &t.p {
            Predicate::Term(p) => {
                scan_basic(cx, &row, &t.s, p, &t.o, graphs, depth, &mut out)?;
            }
            Predicate::Path(p) => {
                path::scan_path(cx, &row, &t.s, p, &t.o, graphs, depth, &mut out)?;
            }
        }
    }
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn scan_basic(
    cx: &SolveCx<'_>,
    row: &Row,
    s: &TermPat,
    p: &TermPat,
    o: &TermPat,
    graphs: &[AtomId],
    depth: u8,
    out: &mut Vec<Row>,
) -> Result<(), ExecError> {
    let (s_pos, p_pos, o_pos) = (
        resolve_pos(cx, row, s),
        resolve_pos(cx, row, p),
        resolve_pos(cx, row, o),
    );
    if matches!(s_pos, Pos::Absent) || matches!(p_pos, Pos::Absent) || matches!(o_pos, Pos::Absent)
    {
        return Ok(());
    }
    let ground = |pos: &Pos| match pos {
        Pos::Ground(id) => Some(*id),
        _ => None,
    };

    for &g in graphs {
        let pattern = Pattern::quad(ground(&s_pos), ground(&p_pos), ground(&o_pos), Some(g));
        for quad in cx.guard.query_all_versions(pattern) {
            if !cx.temporal.admits(&quad) {
                continue;
            }
            let mut new_row = row.clone();
            let mut ok = true;
            for (pos, atom) in [
                (&s_pos, quad.ids.s),
                (&p_pos, quad.ids.p),
                (&o_pos, quad.ids.o),
            ] {
                if let Pos::Free(v) = pos {
                    let canon = cx.guard.resolve_str(atom)?.to_string();
                    ok &= new_row.bind(*v, Bound::scanned(canon, depth));
                }
            }
            if ok {
                out.push(new_row);
            }
        }
    }
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Joins
// ------------------------------------------------------------------------------------------------

/// Size product above which the hash-join path kicks in.
const HASH_JOIN_THRESHOLD: usize = 4_096;

/// Joins two independently produced row sets on their shared variables.
pub fn join_rows(left: Vec<Row>, right: Vec<Row>) -> Vec<Row> {
    if left.is_empty() || right.is_empty() {
        return Vec::new();
    }

    // The variables both sides actually bind, from sampling one row of
    // each (row sets from one producer bind a stable variable set).
    let shared: Vec<VarId> = {
        let sample_l = &left[0];
        let sample_r = &right[0];
        sample_l
            .bound_vars()
            .filter(|v| sample_r.get(*v).is_some())
            .collect()
    };

    // The hash path keys rows on the shared variables, which is only
    // sound when every row on both sides binds all of them — an
    // unbound cell (VALUES UNDEF, partial SERVICE rows) is compatible
    // with anything and must go through the nested loop.
    let fully_bound = shared.iter().all(|&v| {
        left.iter().all(|r| r.get(v).is_some()) && right.iter().all(|r| r.get(v).is_some())
    });
    if shared.is_empty()
        || !fully_bound
        || left.len() * right.len() <= HASH_JOIN_THRESHOLD
    {
        // Nested loop.
        let mut out = Vec::new();
        for l in &left {
            for r in &right {
                if let Some(merged) = l.merged(r) {
                    out.push(merged);
                }
            }
        }
        return out;
    }

    // Hash join on the shared-variable key, with a bloom prefilter so
    // probe misses never touch the table.
    let key_of = |row: &Row| -> String {
        let mut key = String::new();
        for &v in &shared {
            key.push_str(row.term(v).unwrap_or(""));
            key.push('\u{1}');
        }
        key
    };

    let mut bloom: Option<Bloom<String>> =
        Bloom::new_for_fp_rate(right.len().max(8), 0.01).ok();
    let mut table: FxHashMap<String, Vec<&Row>> = FxHashMap::default();
    for r in &right {
        let key = key_of(r);
        if let Some(bloom) = &mut bloom {
            bloom.set(&key);
        }
        table.entry(key).or_default().push(r);
    }

    let mut out = Vec::new();
    for l in &left {
        let key = key_of(l);
        if let Some(bloom) = &bloom
            && !bloom.check(&key)
        {
            continue;
        }
        if let Some(bucket) = table.get(&key) {
            for r in bucket {
                if let Some(merged) = l.merged(r) {
                    out.push(merged);
                }
            }
        }
    }
    out
}

/// Collects the named graphs mentioned by FROM NAMED into atom ids.
pub fn resolve_named_graphs(guard: &ReadGuard<'_>, dataset: &[DatasetClause]) -> Option<Vec<AtomId>> {
    let named: Vec<&DatasetClause> = dataset.iter().filter(|d| d.named).collect();
    if named.is_empty() {
        return None;
    }
    Some(
        named
            .iter()
            .filter_map(|d| guard.lookup(format!("<{}>", d.iri).as_bytes()))
            .collect(),
    )
}

/// The default-graph scan set: FROM graphs, or just the default graph.
pub fn resolve_default_graphs(guard: &ReadGuard<'_>, dataset: &[DatasetClause]) -> Vec<AtomId> {
    let from: Vec<AtomId> = dataset
        .iter()
        .filter(|d| !d.named)
        .filter_map(|d| guard.lookup(format!("<{}>", d.iri).as_bytes()))
        .collect();
    if from.is_empty() { vec![0] } else { from }
}

impl SolveCx<'_> {
    /// Maps a SERVICE result variable name back into the query's space.
    pub fn service_var(&self, name: &str) -> Option<VarId> {
        self.var_id_of_name(name)
    }
}
