//! Aggregation — GROUP BY folding and the tail modifiers.
//!
//! Two passes, as the classic engines do it: rows are first grouped by
//! the serialized group-key bytes (a hash map keyed by the concatenated
//! canonical terms), then each group is folded through every aggregate
//! expression the query mentions. HAVING, ORDER BY, LIMIT/OFFSET and
//! DISTINCT/REDUCED run after, over the grouped (or plain) rows.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::sparql::ast::*;

use super::ExecError;
use super::binding::{Bound, Row};
use super::eval::{EvalEnv, EvalValue, evaluate, order_compare};
use super::solve::SolveCx;

/// Collects every aggregate expression the query mentions, in a stable
/// order.
pub fn collect_aggregates(query: &Query) -> Vec<AggExpr> {
    let mut out: Vec<AggExpr> = Vec::new();
    let mut push = |agg: &AggExpr| {
        if !out.contains(agg) {
            out.push(agg.clone());
        }
    };
    let mut scan_expr = |expr: &Expr| {
        collect_in_expr(expr, &mut push);
    };
    if let QueryKind::Select(select) = &query.kind
        && let Projection::Items(items) = &select.projection
    {
        for item in items {
            if let Some(expr) = &item.expr {
                scan_expr(expr);
            }
        }
    }
    for having in &query.modifiers.having {
        scan_expr(having);
    }
    for key in &query.modifiers.order_by {
        scan_expr(&key.expr);
    }
    out
}

fn collect_in_expr(expr: &Expr, push: &mut impl FnMut(&AggExpr)) {
    match expr {
        Expr::Aggregate(agg) => push(agg),
        Expr::Or(a, b) | Expr::And(a, b) | Expr::Compare(_, a, b) | Expr::Arith(_, a, b) => {
            collect_in_expr(a, push);
            collect_in_expr(b, push);
        }
        Expr::Not(a) | Expr::Neg(a) => collect_in_expr(a, push),
        Expr::In { expr, list, .. } => {
            collect_in_expr(expr, push);
            for e in list {
                collect_in_expr(e, push);
            }
        }
        Expr::Call(_, args) => {
            for a in args {
                collect_in_expr(a, push);
            }
        }
        _ => {}
    }
}

/// One grouped solution: the representative row (carrying the grouped
/// variables) plus the folded aggregate values.
pub struct GroupedRow {
    /// Representative bindings for the group key.
    pub row: Row,
    /// `(expression, folded value)` pairs for [`EvalEnv::aggregates`].
    pub aggregates: Vec<(AggExpr, Option<EvalValue>)>,
}

/// Groups `rows` and folds every aggregate in `aggregates`.
///
/// With no GROUP BY, all rows form one implicit group — which, per
/// SPARQL, exists even when `rows` is empty, yielding one row of
/// aggregate defaults (COUNT 0, empty GROUP_CONCAT, unbound elsewhere).
pub fn group_and_fold(
    cx: &SolveCx<'_>,
    query: &Query,
    rows: Vec<Row>,
    aggregates: &[AggExpr],
) -> Result<Vec<GroupedRow>, ExecError> {
    let group_by = &query.modifiers.group_by;

    // Serialized group key → member rows.
    let mut order: Vec<String> = Vec::new();
    let mut groups: FxHashMap<String, Vec<Row>> = FxHashMap::default();
    for row in rows {
        cx.check()?;
        let mut key = String::new();
        for cond in group_by {
            let mut env = plain_env(cx);
            let value = evaluate(&cond.expr, &row, &mut env)?;
            key.push_str(&value.map(|v| v.to_canonical()).unwrap_or_default());
            key.push('\u{1}');
        }
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(row);
    }

    // The implicit single group over an empty input.
    if groups.is_empty() && group_by.is_empty() {
        order.push(String::new());
        groups.insert(String::new(), Vec::new());
    }

    let mut out = Vec::new();
    for key in order {
        let members = groups.remove(&key).unwrap_or_default();
        let mut representative = members.first().cloned().unwrap_or_else(|| cx.empty_row());

        // GROUP BY aliases bind on the representative.
        for cond in group_by {
            if let Some(alias) = cond.alias {
                let mut env = plain_env(cx);
                if let Some(value) = members
                    .first()
                    .map(|row| evaluate(&cond.expr, row, &mut env))
                    .transpose()?
                    .flatten()
                {
                    representative.bind(alias, Bound::bound(value.to_canonical(), 0));
                }
            }
        }

        let mut folded = Vec::with_capacity(aggregates.len());
        for agg in aggregates {
            folded.push((agg.clone(), fold(cx, agg, &members)?));
        }
        out.push(GroupedRow {
            row: representative,
            aggregates: folded,
        });
    }
    Ok(out)
}

fn plain_env<'e>(cx: &'e SolveCx<'_>) -> EvalEnv<'e> {
    EvalEnv {
        depth: 0,
        strict: cx.strict,
        exists: Box::new(|_, _| Ok(false)),
        aggregates: &[],
    }
}

/// Folds one aggregate over a group.
fn fold(
    cx: &SolveCx<'_>,
    agg: &AggExpr,
    members: &[Row],
) -> Result<Option<EvalValue>, ExecError> {
    // Gather the folded operand values, honouring DISTINCT.
    let mut values: Vec<EvalValue> = Vec::new();
    match &agg.expr {
        None => {
            // COUNT(*): every member counts.
            return Ok(Some(EvalValue::Integer(members.len() as i64)));
        }
        Some(expr) => {
            for row in members {
                let mut env = plain_env(cx);
                if let Some(value) = evaluate(expr, row, &mut env)? {
                    values.push(value);
                }
            }
        }
    }
    if agg.distinct {
        let mut seen = FxHashSet::default();
        values.retain(|v| seen.insert(v.to_canonical()));
    }

    let numeric = |values: &[EvalValue]| -> Option<Vec<f64>> {
        values
            .iter()
            .map(|v| match v {
                EvalValue::Integer(n) => Some(*n as f64),
                EvalValue::Double(d) => Some(*d),
                _ => None,
            })
            .collect()
    };
    let all_integers = values
        .iter()
        .all(|v| matches!(v, EvalValue::Integer(_)));

    Ok(match agg.func {
        AggFunc::Count => Some(EvalValue::Integer(values.len() as i64)),
        AggFunc::Sum => {
            if values.is_empty() {
                Some(EvalValue::Integer(0))
            } else if all_integers {
                let mut total: Option<i64> = Some(0);
                for v in &values {
                    if let EvalValue::Integer(n) = v {
                        total = total.and_then(|t| t.checked_add(*n));
                    }
                }
                total.map(EvalValue::Integer)
            } else {
                numeric(&values).map(|ns| EvalValue::Double(ns.iter().sum()))
            }
        }
        AggFunc::Avg => {
            if values.is_empty() {
                Some(EvalValue::Integer(0))
            } else {
                numeric(&values)
                    .map(|ns| EvalValue::Double(ns.iter().sum::<f64>() / ns.len() as f64))
            }
        }
        AggFunc::Min => {
            let mut best: Option<EvalValue> = None;
            for v in values {
                best = Some(match best {
                    None => v,
                    Some(b) => {
                        if order_compare(Some(&v.to_canonical()), Some(&b.to_canonical()))
                            == std::cmp::Ordering::Less
                        {
                            v
                        } else {
                            b
                        }
                    }
                });
            }
            best
        }
        AggFunc::Max => {
            let mut best: Option<EvalValue> = None;
            for v in values {
                best = Some(match best {
                    None => v,
                    Some(b) => {
                        if order_compare(Some(&v.to_canonical()), Some(&b.to_canonical()))
                            == std::cmp::Ordering::Greater
                        {
                            v
                        } else {
                            b
                        }
                    }
                });
            }
            best
        }
        AggFunc::GroupConcat => {
            let separator = agg.separator.as_deref().unwrap_or(" ");
            let parts: Vec<String> = values
                .iter()
                .filter_map(|v| v.as_str_value())
                .collect();
            Some(EvalValue::Str(parts.join(separator)))
        }
        AggFunc::Sample => values.into_iter().next(),
    })
}

// ------------------------------------------------------------------------------------------------
// Tail modifiers
// ------------------------------------------------------------------------------------------------

/// Applies HAVING over grouped rows.
pub fn apply_having(
    cx: &SolveCx<'_>,
    query: &Query,
    grouped: Vec<GroupedRow>,
) -> Result<Vec<GroupedRow>, ExecError> {
    if query.modifiers.having.is_empty() {
        return Ok(grouped);
    }
    let mut out = Vec::new();
    for group in grouped {
        let mut keep = true;
        for having in &query.modifiers.having {
            let mut env = EvalEnv {
                depth: 0,
                strict: cx.strict,
                exists: Box::new(|_, _| Ok(false)),
                aggregates: &group.aggregates,
            };
            let value = evaluate(having, &group.row, &mut env)?;
            keep &= value.and_then(|v| v.ebv()).unwrap_or(false);
        }
        if keep {
            out.push(group);
        }
    }
    Ok(out)
}

/// Applies ORDER BY / OFFSET / LIMIT to projected rows.
///
/// `sort_keys` holds the pre-evaluated ORDER BY key terms per row,
/// aligned with `rows`; they are only needed while sorting.
pub fn order_and_slice(
    query: &Query,
    mut rows: Vec<Row>,
    sort_keys: Vec<Vec<Option<String>>>,
) -> Vec<Row> {
    if !query.modifiers.order_by.is_empty() {
        let mut indexed: Vec<usize> = (0..rows.len()).collect();
        indexed.sort_by(|&a, &b| {
            for (k, key) in query.modifiers.order_by.iter().enumerate() {
                let ord = order_compare(
                    sort_keys[a][k].as_deref(),
                    sort_keys[b][k].as_deref(),
                );
                let ord = if key.ascending { ord } else { ord.reverse() };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
        rows = indexed.into_iter().map(|i| rows[i].clone()).collect();
    }

    let offset = query.modifiers.offset.unwrap_or(0) as usize;
    if offset > 0 {
        rows = if offset >= rows.len() {
            Vec::new()
        } else {
            rows.split_off(offset)
        };
    }
    if let Some(limit) = query.modifiers.limit {
        rows.truncate(limit as usize);
    }
    rows
}
