//! Property path evaluation.
//!
//! Paths expand per incoming row. Simple shapes reduce to cursor
//! seeks with positions swapped (inverse) or unioned (alternative);
//! the closure operators (`*`, `+`) run a breadth-first fixed point
//! with a visited set keyed by node id, which terminates as soon as
//! the frontier stops growing. A negated property set scans with the
//! predicate left free and drops the listed IRIs.

use rustc_hash::FxHashSet;

use crate::model::AtomId;
use crate::sparql::ast::{PropPath, TermPat, VarId};
use crate::store::Pattern;

use super::ExecError;
use super::binding::{Bound, Row};
use super::solve::SolveCx;

/// The endpoints a path step connects, as atom ids.
type Edge = (AtomId, AtomId);

/// Expands `s path o` under one row, appending the produced rows.
#[allow(clippy::too_many_arguments)]
pub fn scan_path(
    cx: &SolveCx<'_>,
    row: &Row,
    s: &TermPat,
    path: &PropPath,
    o: &TermPat,
    graphs: &[AtomId],
    depth: u8,
    out: &mut Vec<Row>,
) -> Result<(), ExecError> {
    // Resolve the endpoints under the current row.
    let s_node = resolve_endpoint(cx, row, s);
    let o_node = resolve_endpoint(cx, row, o);
    let (s_node, o_node) = match (s_node, o_node) {
        (Endpoint::Absent, _) | (_, Endpoint::Absent) => return Ok(()),
        (s, o) => (s, o),
    };

    let starts: Option<Vec<AtomId>> = match s_node {
        Endpoint::Ground(id) => Some(vec![id]),
        Endpoint::Free(_) => None,
        Endpoint::Absent => unreachable!("filtered out above"),
    };
    let pairs = walk(cx, path, starts.as_deref(), graphs)?;

    for (from, to) in pairs {
        // Zero-length path steps can produce nodes, not just stored
        // terms; both ids always resolve.
        if let Endpoint::Ground(want) = o_node
            && want != to
        {
            continue;
        }
        if let Endpoint::Ground(want) = s_node
            && want != from
        {
            continue;
        }
        let mut new_row = row.clone();
        let mut ok = true;
        if let Endpoint::Free(v) = s_node {
            let canon = cx.guard.resolve_str(from)?.to_string();
            ok &= new_row.bind(v, Bound::scanned(canon, depth));
        }
        if let Endpoint::Free(v) = o_node {
            let canon = cx.guard.resolve_str(to)?.to_string();
            ok &= new_row.bind(v, Bound::scanned(canon, depth));
        }
        if ok {
            out.push(new_row);
        }
    }
    Ok(())
}

enum Endpoint {
    Ground(AtomId),
    Absent,
    Free(VarId),
}

fn resolve_endpoint(cx: &SolveCx<'_>, row: &Row, term: &TermPat) -> Endpoint {
    let var = match term {
        TermPat::Var(v) => *v,
        TermPat::Blank(label) => match cx.blanks.get(label) {
            Some(v) => *v,
            None => return Endpoint::Absent,
        },
        ground => {
            let canon = super::eval::term_value(ground).to_canonical();
            return match cx.guard.lookup(canon.as_bytes()) {
                Some(id) => Endpoint::Ground(id),
                None => Endpoint::Absent,
            };
        }
    };
    match row.term(var) {
        Some(canon) => match cx.guard.lookup(canon.as_bytes()) {
            Some(id) => Endpoint::Ground(id),
            None => Endpoint::Absent,
        },
        None => Endpoint::Free(var),
    }
}

/// Produces the `(from, to)` pairs the path connects. `starts` limits
/// the origins when the subject is ground.
fn walk(
    cx: &SolveCx<'_>,
    path: &PropPath,
    starts: Option<&[AtomId]>,
    graphs: &[AtomId],
) -> Result<Vec<Edge>, ExecError> {
    match path {
        PropPath::Iri(iri) => hop(cx, iri, starts, graphs, false),

        PropPath::Inverse(inner) => match inner.as_ref() {
            // Single-cursor seek with the positions swapped.
            PropPath::Iri(iri) => hop(cx, iri, starts, graphs, true),
            other => {
                // Walk the inner path forward from anywhere, then flip.
                let inner_pairs = walk(cx, other, None, graphs)?;
                let mut flipped: Vec<Edge> =
                    inner_pairs.into_iter().map(|(a, b)| (b, a)).collect();
                if let Some(starts) = starts {
                    flipped.retain(|(from, _)| starts.contains(from));
                }
                Ok(flipped)
            }
        },

        PropPath::Seq(first, second) => {
            let first_pairs = walk(cx, first, starts, graphs)?;
            let mids: Vec<AtomId> = first_pairs.iter().map(|&(_, to)| to).collect();
            let second_pairs = walk(cx, second, Some(&mids), graphs)?;
            let mut out = Vec::new();
            for &(from, mid) in &first_pairs {
                for &(mid2, to) in &second_pairs {
                    if mid == mid2 {
                        out.push((from, to));
                    }
                }
            }
            Ok(out)
        }

        PropPath::Alt(left, right) => {
            let mut out = walk(cx, left, starts, graphs)?;
            out.extend(walk(cx, right, starts, graphs)?);
            out.sort_unstable();
            out.dedup();
            Ok(out)
        }

        PropPath::ZeroOrOne(inner) => {
            let mut out = walk(cx, inner, starts, graphs)?;
            // The zero-length component: every start reaches itself.
            match starts {
                Some(starts) => out.extend(starts.iter().map(|&s| (s, s))),
                None => {
                    for node in all_nodes(cx, graphs)? {
                        out.push((node, node));
                    }
                }
            }
            out.sort_unstable();
            out.dedup();
            Ok(out)
        }

        PropPath::OneOrMore(inner) => closure(cx, inner, starts, graphs, false),
        PropPath::ZeroOrMore(inner) => closure(cx, inner, starts, graphs, true),

        PropPath::Negated(members) => {
            let banned: FxHashSet<AtomId> = members
                .iter()
                .filter_map(|iri| cx.guard.lookup(format!("<{iri}>").as_bytes()))
                .collect();
            let mut out = Vec::new();
            let origins: Option<&[AtomId]> = starts;
            let scan_from = |s: Option<AtomId>, out: &mut Vec<Edge>| {
                for &g in graphs {
                    let pattern = Pattern::quad(s, None, None, Some(g));
                    for quad in cx.guard.query_all_versions(pattern) {
                        if !cx.temporal.admits(&quad) || banned.contains(&quad.ids.p) {
                            continue;
                        }
                        out.push((quad.ids.s, quad.ids.o));
                    }
                }
            };
            match origins {
                Some(starts) => {
                    for &s in starts {
                        scan_from(Some(s), &mut out);
                    }
                }
                None => scan_from(None, &mut out),
            }
            out.sort_unstable();
            out.dedup();
            Ok(out)
        }
    }
}

/// One predicate hop. `inverse` swaps scan positions.
fn hop(
    cx: &SolveCx<'_>,
    iri: &str,
    starts: Option<&[AtomId]>,
    graphs: &[AtomId],
    inverse: bool,
) -> Result<Vec<Edge>, ExecError> {
    let Some(p) = cx.guard.lookup(format!("<{iri}>").as_bytes()) else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    let mut scan = |s: Option<AtomId>| {
        for &g in graphs {
            let pattern = if inverse {
                Pattern::quad(None, Some(p), s, Some(g))
            } else {
                Pattern::quad(s, Some(p), None, Some(g))
            };
            for quad in cx.guard.query_all_versions(pattern) {
                if !cx.temporal.admits(&quad) {
                    continue;
                }
                if inverse {
                    out.push((quad.ids.o, quad.ids.s));
                } else {
                    out.push((quad.ids.s, quad.ids.o));
                }
            }
        }
    };
    match starts {
        Some(starts) => {
            for &s in starts {
                scan(Some(s));
            }
        }
        None => scan(None),
    }
    Ok(out)
}

/// Breadth-first fixed point for `+` and `*`.
fn closure(
    cx: &SolveCx<'_>,
    inner: &PropPath,
    starts: Option<&[AtomId]>,
    graphs: &[AtomId],
    include_zero: bool,
) -> Result<Vec<Edge>, ExecError> {
    // Origins: the pinned starts, or every subject the one-step walk
    // can leave from.
    let origins: Vec<AtomId> = match starts {
        Some(starts) => starts.to_vec(),
        None => {
            let mut set: FxHashSet<AtomId> = FxHashSet::default();
            for (from, _) in walk(cx, inner, None, graphs)? {
                set.insert(from);
            }
            set.into_iter().collect()
        }
    };

    let mut out: Vec<Edge> = Vec::new();
    for &origin in &origins {
        cx.check()?;
        let mut visited: FxHashSet<AtomId> = FxHashSet::default();
        let mut frontier = vec![origin];
        if include_zero {
            out.push((origin, origin));
        }
        visited.insert(origin);
        while !frontier.is_empty() {
            cx.check()?;
            let step = walk(cx, inner, Some(&frontier), graphs)?;
            let mut next = Vec::new();
            for (_, to) in step {
                if visited.insert(to) {
                    next.push(to);
                }
                // Reached nodes are results even when already visited
                // through another route; visited-dedup keeps the pair
                // set finite.
                out.push((origin, to));
            }
            next.sort_unstable();
            next.dedup();
            frontier = next;
        }
    }
    out.sort_unstable();
    out.dedup();
    Ok(out)
}

/// Every node (subject or object) in the scanned graphs — the domain
/// of a zero-length path with a free subject.
fn all_nodes(cx: &SolveCx<'_>, graphs: &[AtomId]) -> Result<Vec<AtomId>, ExecError> {
    let mut nodes: FxHashSet<AtomId> = FxHashSet::default();
    for &g in graphs {
        for quad in cx.guard.query_all_versions(Pattern::quad(None, None, None, Some(g))) {
            if !cx.temporal.admits(&quad) {
                continue;
            }
            nodes.insert(quad.ids.s);
            nodes.insert(quad.ids.o);
        }
    }
    Ok(nodes.into_iter().collect())
}
