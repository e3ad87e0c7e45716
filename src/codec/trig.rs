//! TriG — Turtle with graph blocks.
//!
//! Shares the [`turtle`](super::turtle) engine with graph support
//! switched on: `GRAPH <g> { … }`, bare `<g> { … }`, and `{ … }` for
//! the default graph, alongside ordinary Turtle statements.
//!
//! The writer groups consecutive same-graph quads into one block and
//! keeps default-graph triples outside any block.

use std::io::{Read, Write};

use crate::diag::DiagnosticBag;

use super::turtle::{Engine, render_predicate, render_term, write_prefix_header};
use super::{CodecError, ParseStats, PrefixTable, Term};

// ------------------------------------------------------------------------------------------------
// Parser
// ------------------------------------------------------------------------------------------------

/// Streaming TriG parser. One instance per document.
#[derive(Debug, Default)]
pub struct TriGParser {
    lenient: bool,
}

impl TriGParser {
    /// A strict parser (first error aborts).
    pub fn new() -> Self {
        Self::default()
    }

    /// Switches to lenient mode: a bad statement is reported and the
    /// parser resynchronises.
    pub fn lenient(mut self) -> Self {
        self.lenient = true;
        self
    }

    /// Parses the document, delivering each quad to `sink`. Triples
    /// outside a graph block arrive with `None` as graph.
    pub fn parse<R, F>(
        &mut self,
        mut reader: R,
        bag: &mut DiagnosticBag,
        mut sink: F,
    ) -> Result<ParseStats, CodecError>
    where
        R: Read,
        F: FnMut(&Term<'_>, &Term<'_>, &Term<'_>, Option<&Term<'_>>) -> Result<(), CodecError>,
    {
        let mut src = String::new();
        reader.read_to_string(&mut src)?;
        let mut cx = Engine::new(&src, true, self.lenient);
        cx.run(bag, &mut sink)
    }
}

// ------------------------------------------------------------------------------------------------
// Writer
// ------------------------------------------------------------------------------------------------

/// TriG writer: graph blocks with Turtle grouping inside them.
pub struct TriGWriter<W: Write> {
    out: W,
    prefixes: PrefixTable,
    current_graph: Option<String>,
    current_subject: Option<String>,
    in_block: bool,
    header_written: bool,
}

impl<W: Write> TriGWriter<W> {
    /// Wraps an output stream; `prefixes` drives abbreviation.
    pub fn new(out: W, prefixes: PrefixTable) -> Self {
        Self {
            out,
            prefixes,
            current_graph: None,
            current_subject: None,
            in_block: false,
            header_written: false,
        }
    }

    /// Writes one quad; `None` is the default graph. Consecutive quads
    /// sharing a graph share a block, and within a block consecutive
    /// subjects share a `;` group.
    pub fn write_quad(
        &mut self,
        s: &Term<'_>,
        p: &Term<'_>,
        o: &Term<'_>,
        g: Option<&Term<'_>>,
    ) -> Result<(), CodecError> {
        if !self.header_written {
            self.header_written = true;
            write_prefix_header(&mut self.out, &self.prefixes)?;
        }

        let graph = g.map(|g| render_term(g, &self.prefixes, true));
        if graph != self.current_graph || (self.current_subject.is_none() && !self.in_block) {
            self.close_statement()?;
            self.close_block()?;
            if let Some(graph) = &graph {
                self.out.write_all(format!("{graph} {{\n").as_bytes())?;
                self.in_block = true;
            }
            self.current_graph = graph;
        }

        let indent = if self.in_block { "    " } else { "" };
        let subject = render_term(s, &self.prefixes, true);
        let mut line = String::new();
        match &self.current_subject {
            Some(current) if *current == subject => {
                line.push_str(" ;\n");
                line.push_str(indent);
                line.push_str("    ");
            }
            Some(_) => {
                line.push_str(" .\n");
                line.push_str(indent);
                line.push_str(&subject);
                line.push(' ');
            }
            None => {
                line.push_str(indent);
                line.push_str(&subject);
                line.push(' ');
            }
        }
        line.push_str(&render_predicate(p, &self.prefixes));
        line.push(' ');
        line.push_str(&render_term(o, &self.prefixes, false));
        self.out.write_all(line.as_bytes())?;
        self.current_subject = Some(subject);
        Ok(())
    }

    /// Closes any open block, flushes, and returns the stream.
    pub fn finish(mut self) -> Result<W, CodecError> {
        self.close_statement()?;
        self.close_block()?;
        self.out.flush()?;
        Ok(self.out)
    }

    fn close_statement(&mut self) -> Result<(), CodecError> {
        if self.current_subject.take().is_some() {
            self.out.write_all(b" .\n")?;
        }
        Ok(())
    }

    fn close_block(&mut self) -> Result<(), CodecError> {
        if self.in_block {
            self.out.write_all(b"}\n")?;
            self.in_block = false;
        }
        Ok(())
    }
}
