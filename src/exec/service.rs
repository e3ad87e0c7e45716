//! SERVICE materialization — federated sub-results, local joins.
//!
//! The remote endpoint answers with SPARQL Results JSON; the
//! materializer turns each result binding into a local [`Row`] and
//! routes by size:
//!
//! - below the indexed threshold, rows stay in memory and the join
//!   scans them linearly;
//! - at or above it, a pooled scratch store is rented and every result
//!   row is encoded as synthetic triples `_:rowN <_:var:name> value`,
//!   so the join reuses the ordinary B+Tree cursor machinery.
//!
//! `SERVICE SILENT` swallows transport and parse failures and
//! substitutes the empty result set; non-silent failures propagate.

use serde_json::Value;
use tracing::{debug, warn};

use crate::codec::Term;
use crate::sparql::ast::TermPat;
use crate::store::Pattern;

use super::ExecError;
use super::binding::{Bound, Row};
use super::solve::{SolveCx, join_rows};

/// Evaluates a SERVICE element against the incoming rows.
pub fn solve_service(
    cx: &SolveCx<'_>,
    rows: Vec<Row>,
    silent: bool,
    endpoint: &TermPat,
    raw_pattern: &str,
) -> Result<Vec<Row>, ExecError> {
    let Some(executor) = &cx.service else {
        if silent {
            return Ok(Vec::new());
        }
        return Err(ExecError::Service(
            "no HTTP service executor is configured".into(),
        ));
    };

    // Resolve the endpoint per row group: a ground IRI serves every
    // row, a variable endpoint comes from the bindings.
    let mut out = Vec::new();
    let mut groups: Vec<(String, Vec<Row>)> = Vec::new();
    match endpoint {
        TermPat::Iri(iri) => groups.push((iri.clone(), rows)),
        TermPat::Var(v) => {
            for row in rows {
                let Some(term) = row.term(*v) else { continue };
                let Ok(Term::Iri(iri)) = Term::from_canonical(term) else {
                    continue;
                };
                let iri = iri.to_string();
                match groups.iter_mut().find(|(e, _)| *e == iri) {
                    Some((_, bucket)) => bucket.push(row),
                    None => groups.push((iri, vec![row])),
                }
            }
        }
        _ => return Ok(Vec::new()),
    }

    let query = format!("{}SELECT * WHERE {}", cx.prologue_text, raw_pattern);
    for (endpoint, left_rows) in groups {
        cx.check()?;
        let service_rows = match executor.execute_select(&endpoint, &query) {
            Ok(json) => match parse_results_json(cx, &json) {
                Ok(rows) => rows,
                Err(e) => {
                    if silent {
                        warn!(endpoint, error = %e, "SERVICE SILENT swallowed a parse failure");
                        Vec::new()
                    } else {
                        return Err(e);
                    }
                }
            },
            Err(e) => {
                if silent {
                    warn!(endpoint, error = %e, "SERVICE SILENT swallowed a fetch failure");
                    Vec::new()
                } else {
                    return Err(ExecError::Service(e));
                }
            }
        };

        if service_rows.len() >= cx.indexed_threshold {
            out.extend(indexed_join(cx, left_rows, service_rows)?);
        } else {
            out.extend(join_rows(left_rows, service_rows));
        }
    }
    Ok(out)
}

/// Parses the W3C SPARQL Results JSON shape into rows.
fn parse_results_json(cx: &SolveCx<'_>, json: &str) -> Result<Vec<Row>, ExecError> {
    let doc: Value = serde_json::from_str(json)
        .map_err(|e| ExecError::Service(format!("malformed results JSON: {e}")))?;
    let bindings = doc
        .get("results")
        .and_then(|r| r.get("bindings"))
        .and_then(Value::as_array)
        .ok_or_else(|| ExecError::Service("results JSON has no bindings".into()))?;

    let mut rows = Vec::with_capacity(bindings.len());
    for binding in bindings {
        let Value::Object(map) = binding else {
            continue;
        };
        let mut row = cx.empty_row();
        for (name, cell) in map {
            // Variables the local query never mentions cannot join.
            let Some(var) = cx.service_var(name) else {
                continue;
            };
            let Some(canon) = json_term_to_canonical(cell) else {
                continue;
            };
            row.bind(var, Bound::scanned(canon, 0));
        }
        rows.push(row);
    }
    Ok(rows)
}

/// One results-JSON term object into canonical form.
fn json_term_to_canonical(cell: &Value) -> Option<String> {
    let ty = cell.get("type")?.as_str()?;
    let value = cell.get("value")?.as_str()?;
    match ty {
        "uri" => Some(format!("<{value}>")),
        "bnode" => Some(format!("_:{value}")),
        "literal" | "typed-literal" => {
            let lang = cell.get("xml:lang").and_then(Value::as_str);
            let datatype = cell.get("datatype").and_then(Value::as_str);
            let term = Term::Literal {
                lexical: value.into(),
                lang: lang.map(Into::into),
                datatype: datatype.map(Into::into),
            };
            Some(term.to_canonical())
        }
        _ => None,
    }
}

/// Indexes the service rows into a rented store as synthetic triples,
/// then drives the join through ordinary pattern scans.
fn indexed_join(
    cx: &SolveCx<'_>,
    left_rows: Vec<Row>,
    service_rows: Vec<Row>,
) -> Result<Vec<Row>, ExecError> {
    let Some(pool) = &cx.pool else {
        // No pool wired in: the in-memory path is always correct.
        return Ok(join_rows(left_rows, service_rows));
    };
    let rented = pool
        .rent()
        .map_err(|e| ExecError::Service(format!("scratch store: {e}")))?;

    debug!(rows = service_rows.len(), "indexing SERVICE result rows");
    let mut batch = rented.begin_batch()?;
    for (i, row) in service_rows.iter().enumerate() {
        let subject = format!("_:row{i}");
        for var in row.bound_vars() {
            let Some(term) = row.term(var) else { continue };
            let predicate = format!("<_:var:{}>", cx.var_names[var as usize]);
            batch.add(subject.as_bytes(), predicate.as_bytes(), term.as_bytes(), None)?;
        }
    }
    batch.commit()?;

    // Rebuild rows by scanning the synthetic triples, grouped by their
    // row subject, via the store's cursors.
    let guard = rented.read()?;
    let mut rebuilt: Vec<Row> = Vec::new();
    let mut current_subject: Option<String> = None;
    for quad in guard.query_current(Pattern::any()) {
        let subject = guard.resolve_str(quad.ids.s)?.to_string();
        let predicate = guard.resolve_str(quad.ids.p)?;
        let var_name = predicate
            .strip_prefix("<_:var:")
            .and_then(|p| p.strip_suffix('>'))
            .unwrap_or_default()
            .to_string();
        let object = guard.resolve_str(quad.ids.o)?.to_string();

        if current_subject.as_deref() != Some(subject.as_str()) {
            rebuilt.push(cx.empty_row());
            current_subject = Some(subject);
        }
        if let Some(var) = cx.service_var(&var_name)
            && let Some(row) = rebuilt.last_mut()
        {
            row.bind(var, Bound::scanned(object, 0));
        }
    }
    drop(guard);

    Ok(join_rows(left_rows, rebuilt))
}
