//! Terminal diagnostic renderer — compiler-style annotated source.
//!
//! Output shape:
//!
//! ```text
//! error[E1004]: expected ')', found 'WHERE'
//!  --> query.rq:1:15
//!   |
//! 1 | SELECT ?x WHERE { ?s ?p ?o }
//!   |               ^^^^^
//!   |
//!   = note: related location at 1:8
//! ```
//!
//! Colors follow the `NO_COLOR` convention: any non-empty value in the
//! environment disables ANSI sequences.

use super::{Diagnostic, DiagnosticBag, Severity, format_code};

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BLUE: &str = "\x1b[34m";

struct Palette {
    severity: &'static str,
    bold: &'static str,
    gutter: &'static str,
    reset: &'static str,
}

fn palette(severity: Severity, color: bool) -> Palette {
    if !color {
        return Palette {
            severity: "",
            bold: "",
            gutter: "",
            reset: "",
        };
    }
    Palette {
        severity: match severity {
            Severity::Error => RED,
            Severity::Warning => YELLOW,
            Severity::Info => CYAN,
            Severity::Hint => BLUE,
        },
        bold: BOLD,
        gutter: BLUE,
        reset: RESET,
    }
}

fn severity_word(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
        Severity::Info => "info",
        Severity::Hint => "hint",
    }
}

/// Whether color should be used, honouring `NO_COLOR`.
pub fn color_enabled() -> bool {
    std::env::var_os("NO_COLOR").is_none_or(|v| v.is_empty())
}

/// Renders every diagnostic in the bag against its source text.
///
/// `source_name` appears in the `-->` location line (a file name, or
/// something like `<query>`).
pub fn render_terminal(bag: &DiagnosticBag, source: &str, source_name: &str) -> String {
    render_terminal_opts(bag, source, source_name, color_enabled())
}

/// As [`render_terminal`], with explicit color control (tests pin this
/// to `false`).
pub fn render_terminal_opts(
    bag: &DiagnosticBag,
    source: &str,
    source_name: &str,
    color: bool,
) -> String {
    let mut out = String::new();
    for diag in bag.iter() {
        render_one(bag, diag, source, source_name, color, &mut out);
        out.push('\n');
    }
    out
}

fn render_one(
    bag: &DiagnosticBag,
    diag: &Diagnostic,
    source: &str,
    source_name: &str,
    color: bool,
    out: &mut String,
) {
    let severity = diag.severity();
    let p = palette(severity, color);

    // Header: severity[CODE]: message
    out.push_str(&format!(
        "{}{}{}[{}]{}{}: {}{}\n",
        p.severity,
        p.bold,
        severity_word(severity),
        format_code(diag.code),
        p.reset,
        p.bold,
        bag.message(diag),
        p.reset,
    ));

    // Location line.
    let line_no = diag.span.line.max(1);
    let col_no = diag.span.col.max(1);
    let gutter_width = line_no.to_string().len();
    out.push_str(&format!(
        "{}{:>width$}-->{} {}:{}:{}\n",
        p.gutter,
        "",
        p.reset,
        source_name,
        line_no,
        col_no,
        width = gutter_width,
    ));

    // Source line with caret underline.
    if let Some(text) = source.lines().nth(line_no as usize - 1) {
        out.push_str(&format!(
            "{}{:>width$} |{}\n",
            p.gutter,
            "",
            p.reset,
            width = gutter_width
        ));
        out.push_str(&format!(
            "{}{} |{} {}\n",
            p.gutter, line_no, p.reset, text
        ));
        let caret_len = (diag.span.len.max(1) as usize).min(text.len().saturating_sub(col_no as usize - 1).max(1));
        out.push_str(&format!(
            "{}{:>width$} |{} {}{}{}{}\n",
            p.gutter,
            "",
            p.reset,
            " ".repeat(col_no as usize - 1),
            p.severity,
            "^".repeat(caret_len),
            p.reset,
            width = gutter_width,
        ));
    }

    // Related span note.
    if let Some(related) = diag.related {
        out.push_str(&format!(
            "{}{:>width$} ={} note: related location at {}:{}\n",
            p.gutter,
            "",
            p.reset,
            related.line,
            related.col,
            width = gutter_width,
        ));
    }
}
