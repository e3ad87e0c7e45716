//! LSP diagnostic formatter — 0-based ranges, numeric severities.
//!
//! Produces the `Diagnostic[]` JSON shape of the Language Server
//! Protocol: positions are 0-based line/character pairs, severity maps
//! Error=1, Warning=2, Info=3, Hint=4, and selected codes carry the
//! standard `unnecessary` / `deprecated` tags.

use serde_json::{Value, json};

use super::{Diagnostic, DiagnosticBag, Severity, Span, WARNING_BASE, codes, format_code};

/// LSP `DiagnosticTag.Unnecessary`.
const TAG_UNNECESSARY: u32 = 1;

/// LSP `DiagnosticTag.Deprecated`.
const TAG_DEPRECATED: u32 = 2;

fn lsp_severity(severity: Severity) -> u32 {
    match severity {
        Severity::Error => 1,
        Severity::Warning => 2,
        Severity::Info => 3,
        Severity::Hint => 4,
    }
}

fn lsp_range(span: Span) -> Value {
    // LSP is 0-based; spans are 1-based.
    let line = span.line.saturating_sub(1);
    let character = span.col.saturating_sub(1);
    json!({
        "start": { "line": line, "character": character },
        "end": { "line": line, "character": character + span.len.max(1) },
    })
}

fn tags(diag: &Diagnostic) -> Vec<u32> {
    match diag.code % WARNING_BASE {
        codes::UNBOUND_FILTER_VAR | codes::CARTESIAN_PRODUCT => vec![TAG_UNNECESSARY],
        codes::UNSUPPORTED_SYNTAX => vec![TAG_DEPRECATED],
        _ => Vec::new(),
    }
}

/// Converts a bag to the LSP `Diagnostic[]` JSON array.
///
/// `source_uri` fills `relatedInformation` locations.
pub fn to_lsp_diagnostics(bag: &DiagnosticBag, source_uri: &str) -> Value {
    let items: Vec<Value> = bag
        .iter()
        .map(|diag| {
            let mut item = json!({
                "range": lsp_range(diag.span),
                "severity": lsp_severity(diag.severity()),
                "code": format_code(diag.code),
                "source": "mercury",
                "message": bag.message(diag),
            });
            let tag_list = tags(diag);
            if !tag_list.is_empty() {
                item["tags"] = json!(tag_list);
            }
            if let Some(related) = diag.related {
                item["relatedInformation"] = json!([{
                    "location": {
                        "uri": source_uri,
                        "range": lsp_range(related),
                    },
                    "message": "related location",
                }]);
            }
            item
        })
        .collect();
    Value::Array(items)
}
