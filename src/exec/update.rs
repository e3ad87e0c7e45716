//! SPARQL Update execution.
//!
//! Every operation runs through the store's batch API, so each update
//! operation is one WAL transaction: `INSERT`/`DELETE DATA` buffer
//! their ground quads directly, the pattern-driven forms solve their
//! WHERE clause under a read guard first and instantiate templates
//! against the solutions, and the graph-management operations expand
//! to bulk adds/retracts. `LOAD` dereferences through the injected
//! [`RdfLoader`](super::RdfLoader), negotiates the format from the
//! media type and URL extension, and streams the document into a
//! batch.

use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::codec::{self, Format};
use crate::diag::DiagnosticBag;
use crate::model::AtomId;
use crate::sparql::ast::*;
use crate::sparql::parse_update;
use crate::store::{Pattern, QuadStore};

use super::binding::Row;
use super::eval::term_value;
use super::solve::{SolveCx, Temporal, solve_group};
use super::{ExecError, QueryEngine, QueryOptions};

/// A fully ground quad ready for the store, in canonical bytes.
type GroundQuad = (String, String, String, Option<String>);

/// Parses and executes an update request.
pub fn execute_update(
    engine: &QueryEngine<'_>,
    text: &str,
    options: &QueryOptions,
    bag: &mut DiagnosticBag,
) -> Result<(), ExecError> {
    let update = parse_update(text, options.strict, bag)?;
    for operation in &update.operations {
        apply_operation(engine, &update, operation, options)?;
    }
    Ok(())
}

fn apply_operation(
    engine: &QueryEngine<'_>,
    update: &Update,
    operation: &UpdateOperation,
    options: &QueryOptions,
) -> Result<(), ExecError> {
    let store = engine.store();
    match operation {
        UpdateOperation::InsertData(quads) => {
            // Blank labels are scoped to this operation; the fresh tag
            // keeps them from colliding with earlier inserts.
            let fresh = crate::model::now_micros() as usize;
            let mut batch = store.begin_batch()?;
            for quad in quads {
                let (s, p, o, g) = ground_template(quad, None, fresh)?;
                batch.add(
                    s.as_bytes(),
                    p.as_bytes(),
                    o.as_bytes(),
                    g.as_deref().map(str::as_bytes),
                )?;
            }
            batch.commit()?;
        }

        UpdateOperation::DeleteData(quads) => {
            let mut batch = store.begin_batch()?;
            for quad in quads {
                let (s, p, o, g) = ground_template(quad, None, 0)?;
                batch.retract(
                    s.as_bytes(),
                    p.as_bytes(),
                    o.as_bytes(),
                    g.as_deref().map(str::as_bytes),
                )?;
            }
            batch.commit()?;
        }

        UpdateOperation::DeleteWhere(quads) => {
            let pattern = templates_as_pattern(quads);
            let solutions = solve_pattern(engine, update, &pattern, None, options)?;
            let mut deletes = Vec::new();
            for (i, row) in solutions.iter().enumerate() {
                for quad in quads {
                    if let Some(ground) = instantiate_template(quad, row, None, i) {
                        deletes.push(ground);
                    }
                }
            }
            retract_all(store, &deletes)?;
        }

        UpdateOperation::Modify {
            with,
            delete,
            insert,
            pattern,
        } => {
            let solutions = solve_pattern(engine, update, pattern, with.as_deref(), options)?;
            let mut deletes = Vec::new();
            let mut inserts = Vec::new();
            for (i, row) in solutions.iter().enumerate() {
                for quad in delete {
                    if let Some(ground) = instantiate_template(quad, row, with.as_deref(), i) {
                        deletes.push(ground);
                    }
                }
                for quad in insert {
                    if let Some(ground) = instantiate_template(quad, row, with.as_deref(), i) {
                        inserts.push(ground);
                    }
                }
            }
            let mut batch = store.begin_batch()?;
            for (s, p, o, g) in &deletes {
                batch.retract(
                    s.as_bytes(),
                    p.as_bytes(),
                    o.as_bytes(),
                    g.as_deref().map(str::as_bytes),
                )?;
            }
            for (s, p, o, g) in &inserts {
                batch.add(
                    s.as_bytes(),
                    p.as_bytes(),
                    o.as_bytes(),
                    g.as_deref().map(str::as_bytes),
                )?;
            }
            debug!(
                deleted = deletes.len(),
                inserted = inserts.len(),
                "modify applied"
            );
            batch.commit()?;
        }

        UpdateOperation::Load {
            silent,
            source,
            graph,
        } => {
            let result = load_from(engine, source, graph.as_deref());
            match result {
                Ok(count) => info!(source, count, "load complete"),
                Err(e) => {
                    if !silent {
                        return Err(e);
                    }
                    info!(source, "LOAD SILENT swallowed a failure");
                }
            }
        }

        UpdateOperation::Clear { silent, target } | UpdateOperation::Drop { silent, target } => {
            let result = clear_graphs(store, target);
            if let Err(e) = result
                && !silent
            {
                return Err(e);
            }
        }

        UpdateOperation::Create { graph, .. } => {
            // Graphs exist implicitly; creation is a no-op on this
            // store model.
            debug!(graph, "create graph (implicit)");
        }

        UpdateOperation::Copy { silent, from, to } => {
            let result = copy_graph(store, from, to, true);
            if let Err(e) = result
                && !silent
            {
                return Err(e);
            }
        }
        UpdateOperation::Move { silent, from, to } => {
            let result = copy_graph(store, from, to, true).and_then(|_| {
                clear_graphs(
                    store,
                    &match from {
                        GraphRef::Default => GraphTarget::Default,
                        GraphRef::Named(iri) => GraphTarget::Named(iri.clone()),
                    },
                )
            });
            if let Err(e) = result
                && !silent
            {
                return Err(e);
            }
        }
        UpdateOperation::Add { silent, from, to } => {
            let result = copy_graph(store, from, to, false);
            if let Err(e) = result
                && !silent
            {
                return Err(e);
            }
        }
    }
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Pattern solving for updates
// ------------------------------------------------------------------------------------------------

fn solve_pattern(
    engine: &QueryEngine<'_>,
    update: &Update,
    pattern: &GroupPattern,
    with: Option<&str>,
    options: &QueryOptions,
) -> Result<Vec<Row>, ExecError> {
    let guard = engine.store().read()?;
    let now = guard.snapshot_time();

    let mut blanks: FxHashMap<String, VarId> = FxHashMap::default();
    let mut next = update.variables.len() as VarId;
    collect_pattern_blanks(pattern, &mut blanks, &mut next);

    let cx = SolveCx {
        guard: &guard,
        temporal: Temporal::Current(now),
        strict: options.strict,
        deadline: options.timeout.map(|t| std::time::Instant::now() + t),
        cancel: options.cancel.clone(),
        width: next as usize,
        blanks,
        var_names: update.variables.clone(),
        prologue_text: String::new(),
        service: None,
        pool: None,
        indexed_threshold: usize::MAX,
        named_graphs: None,
    };

    let graphs: Vec<AtomId> = match with {
        None => vec![0],
        Some(iri) => match guard.lookup(format!("<{iri}>").as_bytes()) {
            Some(g) => vec![g],
            None => return Ok(Vec::new()),
        },
    };
    solve_group(&cx, pattern, vec![cx.empty_row()], &graphs)
}

fn collect_pattern_blanks(
    group: &GroupPattern,
    blanks: &mut FxHashMap<String, VarId>,
    next: &mut VarId,
) {
    for element in &group.elements {
        match element {
            Element::Triple(t) => {
                for term in [&t.s, &t.o] {
                    if let TermPat::Blank(label) = term
                        && !blanks.contains_key(label)
                    {
                        blanks.insert(label.clone(), *next);
                        *next += 1;
                    }
                }
            }
            Element::Optional(g) | Element::Minus(g) | Element::Group(g) => {
                collect_pattern_blanks(g, blanks, next);
            }
            Element::Graph { pattern, .. } => collect_pattern_blanks(pattern, blanks, next),
            Element::Union(branches) => {
                for b in branches {
                    collect_pattern_blanks(b, blanks, next);
                }
            }
            _ => {}
        }
    }
}

/// Turns DELETE WHERE templates into the equivalent WHERE pattern.
fn templates_as_pattern(quads: &[QuadTemplate]) -> GroupPattern {
    let mut group = GroupPattern {
        elements: Vec::new(),
        depth: 1,
        span: crate::diag::Span::none(),
    };
    for quad in quads {
        let triple = TriplePattern {
            s: quad.s.clone(),
            p: Predicate::Term(quad.p.clone()),
            o: quad.o.clone(),
            span: crate::diag::Span::none(),
        };
        match &quad.g {
            None => group.elements.push(Element::Triple(triple)),
            Some(g) => group.elements.push(Element::Graph {
                term: g.clone(),
                pattern: GroupPattern {
                    elements: vec![Element::Triple(triple)],
                    depth: 2,
                    span: crate::diag::Span::none(),
                },
            }),
        }
    }
    group
}

/// Instantiates a ground-only template (DATA blocks).
fn ground_template(
    quad: &QuadTemplate,
    with: Option<&str>,
    fresh: usize,
) -> Result<GroundQuad, ExecError> {
    instantiate_template(quad, &Row::empty(0), with, fresh)
        .ok_or_else(|| ExecError::Internal("unbound variable in a DATA block".into()))
}

/// Instantiates a template against one solution. `None` if any
/// variable is unbound.
fn instantiate_template(
    quad: &QuadTemplate,
    row: &Row,
    with: Option<&str>,
    fresh: usize,
) -> Option<GroundQuad> {
    let term = |t: &TermPat| -> Option<String> {
        match t {
            TermPat::Var(v) => row.term(*v).map(str::to_string),
            TermPat::Blank(label) => Some(format!("_:i{fresh}_{label}")),
            ground => Some(term_value(ground).to_canonical()),
        }
    };
    let g = match &quad.g {
        Some(g) => Some(term(g)?),
        None => with.map(|iri| format!("<{iri}>")),
    };
    Some((term(&quad.s)?, term(&quad.p)?, term(&quad.o)?, g))
}

fn retract_all(store: &QuadStore, quads: &[GroundQuad]) -> Result<(), ExecError> {
    let mut batch = store.begin_batch()?;
    for (s, p, o, g) in quads {
        batch.retract(
            s.as_bytes(),
            p.as_bytes(),
            o.as_bytes(),
            g.as_deref().map(str::as_bytes),
        )?;
    }
    batch.commit()?;
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Graph management
// ------------------------------------------------------------------------------------------------

/// The current quads of a graph selection, as canonical strings.
fn current_quads(
    store: &QuadStore,
    selector: impl Fn(AtomId) -> bool,
) -> Result<Vec<GroundQuad>, ExecError> {
    let guard = store.read()?;
    let mut out = Vec::new();
    for quad in guard.query_current(Pattern::any()) {
        if !selector(quad.ids.g) {
            continue;
        }
        let g = if quad.ids.g == 0 {
            None
        } else {
            Some(guard.resolve_str(quad.ids.g)?.to_string())
        };
        out.push((
            guard.resolve_str(quad.ids.s)?.to_string(),
            guard.resolve_str(quad.ids.p)?.to_string(),
            guard.resolve_str(quad.ids.o)?.to_string(),
            g,
        ));
    }
    Ok(out)
}

fn clear_graphs(store: &QuadStore, target: &GraphTarget) -> Result<(), ExecError> {
    // Resolve the selector first so no guard is held across the scan.
    let named_id = match target {
        GraphTarget::Named(iri) => {
            let guard = store.read()?;
            match guard.lookup(format!("<{iri}>").as_bytes()) {
                Some(id) => Some(id),
                None => return Ok(()), // nothing stored under that graph
            }
        }
        _ => None,
    };
    let victims = match target {
        GraphTarget::Default => current_quads(store, |g| g == 0)?,
        GraphTarget::Named(_) => {
            let id = named_id.unwrap_or(0);
            current_quads(store, |g| g == id)?
        }
        GraphTarget::AllNamed => current_quads(store, |g| g != 0)?,
        GraphTarget::All => current_quads(store, |_| true)?,
    };
    info!(count = victims.len(), "clearing graphs");
    retract_all(store, &victims)
}

fn copy_graph(
    store: &QuadStore,
    from: &GraphRef,
    to: &GraphRef,
    clear_target_first: bool,
) -> Result<(), ExecError> {
    let source_quads = {
        let guard = store.read()?;
        match from {
            GraphRef::Default => {
                drop(guard);
                current_quads(store, |g| g == 0)?
            }
            GraphRef::Named(iri) => match guard.lookup(format!("<{iri}>").as_bytes()) {
                Some(id) => {
                    drop(guard);
                    current_quads(store, |g| g == id)?
                }
                None => Vec::new(),
            },
        }
    };

    if clear_target_first {
        clear_graphs(
            store,
            &match to {
                GraphRef::Default => GraphTarget::Default,
                GraphRef::Named(iri) => GraphTarget::Named(iri.clone()),
            },
        )?;
    }

    let target_graph = match to {
        GraphRef::Default => None,
        GraphRef::Named(iri) => Some(format!("<{iri}>")),
    };
    let mut batch = store.begin_batch()?;
    for (s, p, o, _) in &source_quads {
        batch.add(
            s.as_bytes(),
            p.as_bytes(),
            o.as_bytes(),
            target_graph.as_deref().map(str::as_bytes),
        )?;
    }
    batch.commit()?;
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// LOAD
// ------------------------------------------------------------------------------------------------

fn load_from(
    engine: &QueryEngine<'_>,
    source: &str,
    graph: Option<&str>,
) -> Result<u64, ExecError> {
    let Some(loader) = engine.loader() else {
        return Err(ExecError::Load("no RDF loader is configured".into()));
    };
    let (bytes, media_type) = loader.fetch(source).map_err(ExecError::Load)?;

    // Negotiate: media type first, then the URL extension.
    let format = media_type
        .as_deref()
        .and_then(Format::from_media_type)
        .or_else(|| {
            source
                .rsplit('.')
                .next()
                .and_then(Format::from_extension)
        })
        .ok_or_else(|| {
            ExecError::Load(format!("cannot determine RDF format of {source}"))
        })?;

    let graph_bytes = graph.map(|iri| format!("<{iri}>").into_bytes());
    load_document(engine.store(), &bytes, format, graph_bytes.as_deref())
}

/// Parses a document into the store through one batch. The LOAD path
/// and the engine's byte-loading helper share this.
pub fn load_document(
    store: &QuadStore,
    bytes: &[u8],
    format: Format,
    graph: Option<&[u8]>,
) -> Result<u64, ExecError> {
    let mut bag = DiagnosticBag::new();
    let mut batch = store.begin_batch()?;
    let mut count = 0u64;
    {
        let mut sink = |s: &codec::Term<'_>,
                        p: &codec::Term<'_>,
                        o: &codec::Term<'_>,
                        g: Option<&codec::Term<'_>>|
         -> Result<(), codec::CodecError> {
            let s = s.to_canonical();
            let p = p.to_canonical();
            let o = o.to_canonical();
            let g_owned = g.map(|g| g.to_canonical());
            // An explicit target graph overrides the document's graphs.
            let g_bytes: Option<Vec<u8>> = match (graph, g_owned) {
                (Some(target), _) => Some(target.to_vec()),
                (None, Some(doc_graph)) => Some(doc_graph.into_bytes()),
                (None, None) => None,
            };
            batch
                .add(s.as_bytes(), p.as_bytes(), o.as_bytes(), g_bytes.as_deref())
                .map_err(|e| codec::CodecError::Sink(e.to_string()))?;
            count += 1;
            Ok(())
        };
        match format {
            Format::NTriples => {
                codec::ntriples::NTriplesParser::new().parse(bytes, &mut bag, &mut sink)?;
            }
            Format::NQuads => {
                codec::nquads::NQuadsParser::new().parse(bytes, &mut bag, &mut sink)?;
            }
            Format::Turtle => {
                codec::turtle::TurtleParser::new().parse(bytes, &mut bag, &mut sink)?;
            }
            Format::TriG => {
                codec::trig::TriGParser::new().parse(bytes, &mut bag, &mut sink)?;
            }
            Format::RdfXml => {
                codec::rdfxml::RdfXmlParser::new().parse(bytes, &mut bag, &mut sink)?;
            }
            Format::JsonLd => {
                codec::jsonld::JsonLdParser::new().parse(bytes, &mut bag, &mut sink)?;
            }
        }
    }
    batch.commit()?;
    Ok(count)
}
