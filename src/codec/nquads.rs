//! N-Quads — N-Triples plus an optional graph term per line.

use std::io::{BufRead, Write};

use crate::diag::{DiagnosticBag, Span, codes};

use super::ntriples::{LineCursor, check_positions};
use super::{CodecError, ParseStats, Term};

// ------------------------------------------------------------------------------------------------
// Parser
// ------------------------------------------------------------------------------------------------

/// Streaming N-Quads parser. One instance per stream.
#[derive(Debug, Default)]
pub struct NQuadsParser {
    lenient: bool,
}

impl NQuadsParser {
    /// A strict parser (first error aborts).
    pub fn new() -> Self {
        Self::default()
    }

    /// Switches to lenient mode: bad lines are reported to the bag and
    /// skipped.
    pub fn lenient(mut self) -> Self {
        self.lenient = true;
        self
    }

    /// Parses the stream, delivering each quad to `sink`. Lines without
    /// a graph term land in the default graph (`None`).
    pub fn parse<R, F>(
        &mut self,
        mut reader: R,
        bag: &mut DiagnosticBag,
        mut sink: F,
    ) -> Result<ParseStats, CodecError>
    where
        R: BufRead,
        F: FnMut(&Term<'_>, &Term<'_>, &Term<'_>, Option<&Term<'_>>) -> Result<(), CodecError>,
    {
        let mut stats = ParseStats::default();
        let mut line = String::new();
        let mut line_no = 0u32;
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Ok(stats);
            }
            line_no += 1;
            let text = line.trim_end_matches(['\n', '\r']);
            let trimmed = text.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            match Self::parse_line(text, line_no) {
                Ok((s, p, o, g)) => {
                    sink(&s, &p, &o, g.as_ref())?;
                    stats.statements += 1;
                }
                Err(e) => {
                    if let CodecError::Syntax { line, col, message } = &e {
                        bag.report_with_args(
                            codes::MALFORMED_DOCUMENT,
                            Span::new(0, 1, *line, *col),
                            &[message],
                        );
                    }
                    if !self.lenient {
                        return Err(e);
                    }
                    stats.skipped += 1;
                }
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn parse_line(
        text: &str,
        line_no: u32,
    ) -> Result<(Term<'_>, Term<'_>, Term<'_>, Option<Term<'_>>), CodecError> {
        let mut cur = LineCursor::new(text, line_no);
        let s = cur.parse_term()?;
        let p = cur.parse_term()?;
        let o = cur.parse_term()?;
        check_positions(&cur, &s, &p)?;

        // Optional graph label before the dot.
        cur.skip_ws();
        let g = match cur.peek() {
            Some(b'.') | None => None,
            _ => {
                let g = cur.parse_term()?;
                if g.is_literal() {
                    return Err(cur.error("literal is not allowed as graph label"));
                }
                Some(g)
            }
        };
        cur.expect_dot()?;
        Ok((s, p, o, g))
    }
}

// ------------------------------------------------------------------------------------------------
// Writer
// ------------------------------------------------------------------------------------------------

/// N-Quads writer: canonical terms, one quad per line.
pub struct NQuadsWriter<W: Write> {
    out: W,
    scratch: String,
}

impl<W: Write> NQuadsWriter<W> {
    /// Wraps an output stream.
    pub fn new(out: W) -> Self {
        Self {
            out,
            scratch: String::new(),
        }
    }

    /// Writes one quad; `None` is the default graph.
    pub fn write_quad(
        &mut self,
        s: &Term<'_>,
        p: &Term<'_>,
        o: &Term<'_>,
        g: Option<&Term<'_>>,
    ) -> Result<(), CodecError> {
        self.scratch.clear();
        s.write_canonical(&mut self.scratch);
        self.scratch.push(' ');
        p.write_canonical(&mut self.scratch);
        self.scratch.push(' ');
        o.write_canonical(&mut self.scratch);
        if let Some(g) = g {
            self.scratch.push(' ');
            g.write_canonical(&mut self.scratch);
        }
        self.scratch.push_str(" .\n");
        self.out.write_all(self.scratch.as_bytes())?;
        Ok(())
    }

    /// Flushes and returns the output stream.
    pub fn finish(mut self) -> Result<W, CodecError> {
        self.out.flush()?;
        Ok(self.out)
    }
}
