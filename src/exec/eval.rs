//! Expression evaluation over binding rows.
//!
//! SPARQL expression errors are **not** Rust errors: per SPARQL
//! semantics an erroring (sub)expression yields an unbound result, which filters
//! treat as false and BIND leaves unbound. Evaluation therefore
//! returns `Ok(None)` for "error" and reserves `Err` for true engine
//! failures (timeout, cancellation, storage). Division by zero follows
//! the same rule unless the query runs in strict mode.
//!
//! Values carry a typed fast path ([`EvalValue`]) on top of canonical
//! term strings; numeric coercion is integer-preserving when both
//! operands are integers.

use std::cmp::Ordering;

use regex::Regex;

use crate::codec::{Term, XSD_BOOLEAN, XSD_DECIMAL, XSD_DOUBLE, XSD_INTEGER, XSD_STRING};
use crate::sparql::ast::{AggExpr, ArithOp, CmpOp, Expr, Func, GroupPattern, TermPat};

use super::ExecError;
use super::binding::Row;

// ------------------------------------------------------------------------------------------------
// Values
// ------------------------------------------------------------------------------------------------

/// A typed expression value.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    /// Any term without a faster shape, in canonical form.
    Term(String),
    /// An integer-valued numeric literal.
    Integer(i64),
    /// A floating numeric literal (double or decimal).
    Double(f64),
    /// A boolean literal.
    Boolean(bool),
    /// A simple string literal (plain or `xsd:string`).
    Str(String),
}

impl EvalValue {
    /// Lifts a canonical term into the typed representation.
    pub fn from_canonical(canon: &str) -> EvalValue {
        let Ok(term) = Term::from_canonical(canon) else {
            return EvalValue::Term(canon.to_string());
        };
        match &term {
            Term::Literal {
                lexical,
                lang: None,
                datatype,
            } => match datatype.as_deref() {
                None => EvalValue::Str(lexical.to_string()),
                Some(XSD_STRING) => EvalValue::Str(lexical.to_string()),
                Some(XSD_INTEGER) => lexical
                    .parse::<i64>()
                    .map(EvalValue::Integer)
                    .unwrap_or_else(|_| EvalValue::Term(canon.to_string())),
                Some(XSD_DOUBLE) | Some(XSD_DECIMAL) => lexical
                    .parse::<f64>()
                    .map(EvalValue::Double)
                    .unwrap_or_else(|_| EvalValue::Term(canon.to_string())),
                Some(XSD_BOOLEAN) => match lexical.as_ref() {
                    "true" | "1" => EvalValue::Boolean(true),
                    "false" | "0" => EvalValue::Boolean(false),
                    _ => EvalValue::Term(canon.to_string()),
                },
                Some(_) => EvalValue::Term(canon.to_string()),
            },
            _ => EvalValue::Term(canon.to_string()),
        }
    }

    /// Serializes back to the canonical term form.
    pub fn to_canonical(&self) -> String {
        match self {
            EvalValue::Term(canon) => canon.clone(),
            EvalValue::Integer(n) => format!("\"{n}\"^^<{XSD_INTEGER}>"),
            EvalValue::Double(d) => format!("\"{d}\"^^<{XSD_DOUBLE}>"),
            EvalValue::Boolean(b) => format!("\"{b}\"^^<{XSD_BOOLEAN}>"),
            EvalValue::Str(s) => Term::literal(s).to_canonical(),
        }
    }

    /// The effective boolean value, per SPARQL. `None` is a type error.
    pub fn ebv(&self) -> Option<bool> {
        match self {
            EvalValue::Boolean(b) => Some(*b),
            EvalValue::Integer(n) => Some(*n != 0),
            EvalValue::Double(d) => Some(*d != 0.0 && !d.is_nan()),
            EvalValue::Str(s) => Some(!s.is_empty()),
            EvalValue::Term(canon) => {
                // A plain literal in canonical clothing still has an EBV.
                match Term::from_canonical(canon) {
                    Ok(Term::Literal { lexical, lang: Some(_), .. }) => {
                        Some(!lexical.is_empty())
                    }
                    _ => None,
                }
            }
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            EvalValue::Integer(n) => Some(*n as f64),
            EvalValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// The plain string content, if this is string-ish.
    pub fn as_str_value(&self) -> Option<String> {
        match self {
            EvalValue::Str(s) => Some(s.clone()),
            EvalValue::Term(canon) => match Term::from_canonical(canon) {
                Ok(Term::Literal { lexical, .. }) => Some(lexical.to_string()),
                _ => None,
            },
            EvalValue::Integer(n) => Some(n.to_string()),
            EvalValue::Double(d) => Some(d.to_string()),
            EvalValue::Boolean(b) => Some(b.to_string()),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Evaluation context
// ------------------------------------------------------------------------------------------------

/// The hooks evaluation needs from the solver.
pub struct EvalEnv<'e> {
    /// The scope depth of the evaluating construct (filter / bind).
    pub depth: u8,
    /// Strict mode: division by zero is a hard error.
    pub strict: bool,
    /// Correlated EXISTS probe: does the pattern match under this row?
    pub exists: Box<dyn FnMut(&GroupPattern, &Row) -> Result<bool, ExecError> + 'e>,
    /// Pre-computed aggregate values (post-grouping phases only).
    pub aggregates: &'e [(AggExpr, Option<EvalValue>)],
}

/// Evaluates `expr` under `row`. `Ok(None)` is the SPARQL error value.
pub fn evaluate(
    expr: &Expr,
    row: &Row,
    env: &mut EvalEnv<'_>,
) -> Result<Option<EvalValue>, ExecError> {
    match expr {
        Expr::Term(TermPat::Var(v)) => Ok(row
            .visible(*v, env.depth)
            .map(EvalValue::from_canonical)),
        Expr::Term(term) => Ok(Some(term_value(term))),

        Expr::Or(a, b) => {
            let left = evaluate(a, row, env)?.and_then(|v| v.ebv());
            let right = evaluate(b, row, env)?.and_then(|v| v.ebv());
            // SPARQL three-valued OR.
            Ok(match (left, right) {
                (Some(true), _) | (_, Some(true)) => Some(EvalValue::Boolean(true)),
                (Some(false), Some(false)) => Some(EvalValue::Boolean(false)),
                _ => None,
            })
        }
        Expr::And(a, b) => {
            let left = evaluate(a, row, env)?.and_then(|v| v.ebv());
            let right = evaluate(b, row, env)?.and_then(|v| v.ebv());
            Ok(match (left, right) {
                (Some(false), _) | (_, Some(false)) => Some(EvalValue::Boolean(false)),
                (Some(true), Some(true)) => Some(EvalValue::Boolean(true)),
                _ => None,
            })
        }
        Expr::Not(a) => Ok(evaluate(a, row, env)?
            .and_then(|v| v.ebv())
            .map(|b| EvalValue::Boolean(!b))),

        Expr::Compare(op, a, b) => {
            let (Some(left), Some(right)) = (evaluate(a, row, env)?, evaluate(b, row, env)?)
            else {
                return Ok(None);
            };
            Ok(compare(*op, &left, &right).map(EvalValue::Boolean))
        }

        Expr::Arith(op, a, b) => {
            let (Some(left), Some(right)) = (evaluate(a, row, env)?, evaluate(b, row, env)?)
            else {
                return Ok(None);
            };
            arithmetic(*op, &left, &right, env.strict)
        }
        Expr::Neg(a) => match evaluate(a, row, env)? {
            Some(EvalValue::Integer(n)) => Ok(Some(EvalValue::Integer(-n))),
            Some(EvalValue::Double(d)) => Ok(Some(EvalValue::Double(-d))),
            _ => Ok(None),
        },

        Expr::In {
            expr,
            list,
            negated,
        } => {
            let Some(needle) = evaluate(expr, row, env)? else {
                return Ok(None);
            };
            let mut found = false;
            for candidate in list {
                if let Some(value) = evaluate(candidate, row, env)?
                    && compare(CmpOp::Eq, &needle, &value) == Some(true)
                {
                    found = true;
                    break;
                }
            }
            Ok(Some(EvalValue::Boolean(found != *negated)))
        }

        Expr::Call(func, args) => call(*func, args, row, env),

        Expr::Exists { pattern, negated } => {
            let found = (env.exists)(pattern, row)?;
            Ok(Some(EvalValue::Boolean(found != *negated)))
        }

        Expr::Aggregate(agg) => {
            for (candidate, value) in env.aggregates {
                if candidate == agg {
                    return Ok(value.clone());
                }
            }
            Ok(None)
        }
    }
}

/// A ground term as a value.
pub fn term_value(term: &TermPat) -> EvalValue {
    match term {
        TermPat::Iri(iri) => EvalValue::Term(format!("<{iri}>")),
        TermPat::Blank(label) => EvalValue::Term(format!("_:{label}")),
        TermPat::Literal {
            lexical,
            lang,
            datatype,
        } => {
            let term = Term::Literal {
                lexical: lexical.as_str().into(),
                lang: lang.as_deref().map(Into::into),
                datatype: datatype.as_deref().map(Into::into),
            };
            EvalValue::from_canonical(&term.to_canonical())
        }
        TermPat::Var(_) => EvalValue::Term(String::new()),
    }
}

// ------------------------------------------------------------------------------------------------
// Comparison & arithmetic
// ------------------------------------------------------------------------------------------------

fn compare(op: CmpOp, left: &EvalValue, right: &EvalValue) -> Option<bool> {
    // Numeric comparison when both sides are numeric.
    if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
        let ord = a.partial_cmp(&b)?;
        return Some(apply_ordering(op, ord));
    }
    match (left, right) {
        (EvalValue::Str(a), EvalValue::Str(b)) => Some(apply_ordering(op, a.cmp(b))),
        (EvalValue::Boolean(a), EvalValue::Boolean(b)) => Some(apply_ordering(op, a.cmp(b))),
        _ => {
            // Term equality for the rest; ordering is undefined.
            let a = left.to_canonical();
            let b = right.to_canonical();
            match op {
                CmpOp::Eq => Some(a == b),
                CmpOp::Ne => Some(a != b),
                _ => None,
            }
        }
    }
}

fn apply_ordering(op: CmpOp, ord: Ordering) -> bool {
    match op {
        CmpOp::Eq => ord == Ordering::Equal,
        CmpOp::Ne => ord != Ordering::Equal,
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::Le => ord != Ordering::Greater,
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::Ge => ord != Ordering::Less,
    }
}

fn arithmetic(
    op: ArithOp,
    left: &EvalValue,
    right: &EvalValue,
    strict: bool,
) -> Result<Option<EvalValue>, ExecError> {
    // Integer-preserving when both operands are integers (except
    // division, which promotes).
    if let (EvalValue::Integer(a), EvalValue::Integer(b)) = (left, right) {
        return Ok(match op {
            ArithOp::Add => a.checked_add(*b).map(EvalValue::Integer),
            ArithOp::Sub => a.checked_sub(*b).map(EvalValue::Integer),
            ArithOp::Mul => a.checked_mul(*b).map(EvalValue::Integer),
            ArithOp::Div => {
                if *b == 0 {
                    if strict {
                        return Err(ExecError::DivisionByZero);
                    }
                    None
                } else if a % b == 0 {
                    Some(EvalValue::Integer(a / b))
                } else {
                    Some(EvalValue::Double(*a as f64 / *b as f64))
                }
            }
        });
    }
    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Ok(None);
    };
    let value = match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => {
            if b == 0.0 {
                if strict {
                    return Err(ExecError::DivisionByZero);
                }
                return Ok(None);
            }
            a / b
        }
    };
    if value.is_nan() {
        return Ok(None);
    }
    Ok(Some(EvalValue::Double(value)))
}

// ------------------------------------------------------------------------------------------------
// Built-in functions
// ------------------------------------------------------------------------------------------------

fn call(
    func: Func,
    args: &[Expr],
    row: &Row,
    env: &mut EvalEnv<'_>,
) -> Result<Option<EvalValue>, ExecError> {
    // BOUND and COALESCE look at bindings, not values.
    match func {
        Func::Bound => {
            let Some(Expr::Term(TermPat::Var(v))) = args.first() else {
                return Ok(None);
            };
            return Ok(Some(EvalValue::Boolean(
                row.visible(*v, env.depth).is_some(),
            )));
        }
        Func::Coalesce => {
            for arg in args {
                if let Some(value) = evaluate(arg, row, env)? {
                    return Ok(Some(value));
                }
            }
            return Ok(None);
        }
        Func::If => {
            let Some(cond) = args.first() else {
                return Ok(None);
            };
            let Some(test) = evaluate(cond, row, env)?.and_then(|v| v.ebv()) else {
                return Ok(None);
            };
            let branch = if test { args.get(1) } else { args.get(2) };
            return match branch {
                Some(expr) => evaluate(expr, row, env),
                None => Ok(None),
            };
        }
        _ => {}
    }

    // Everything else evaluates its arguments first.
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        match evaluate(arg, row, env)? {
            Some(v) => values.push(v),
            None => return Ok(None),
        }
    }

    let one = values.first();
    let result = match func {
        Func::Str => one.map(|v| match v {
            EvalValue::Term(canon) => match Term::from_canonical(canon) {
                Ok(Term::Iri(iri)) => EvalValue::Str(iri.to_string()),
                Ok(Term::Literal { lexical, .. }) => EvalValue::Str(lexical.to_string()),
                _ => EvalValue::Str(canon.clone()),
            },
            other => EvalValue::Str(other.as_str_value().unwrap_or_default()),
        }),
        Func::StrLen => one
            .and_then(EvalValue::as_str_value)
            .map(|s| EvalValue::Integer(s.chars().count() as i64)),
        Func::UCase => one
            .and_then(EvalValue::as_str_value)
            .map(|s| EvalValue::Str(s.to_uppercase())),
        Func::LCase => one
            .and_then(EvalValue::as_str_value)
            .map(|s| EvalValue::Str(s.to_lowercase())),
        Func::Contains => binary_str(&values, |a, b| a.contains(b)),
        Func::StrStarts => binary_str(&values, |a, b| a.starts_with(b)),
        Func::StrEnds => binary_str(&values, |a, b| a.ends_with(b)),
        Func::Concat => {
            let mut out = String::new();
            for v in &values {
                out.push_str(&v.as_str_value().unwrap_or_default());
            }
            Some(EvalValue::Str(out))
        }
        Func::Regex => {
            let text = values.first().and_then(EvalValue::as_str_value);
            let pattern = values.get(1).and_then(EvalValue::as_str_value);
            let flags = values.get(2).and_then(EvalValue::as_str_value);
            match (text, pattern) {
                (Some(text), Some(pattern)) => {
                    let re = build_regex(&pattern, flags.as_deref())
                        .map_err(|e| ExecError::InvalidRegex(e.to_string()))?;
                    Some(EvalValue::Boolean(re.is_match(&text)))
                }
                _ => None,
            }
        }
        Func::Replace => {
            let text = values.first().and_then(EvalValue::as_str_value);
            let pattern = values.get(1).and_then(EvalValue::as_str_value);
            let replacement = values.get(2).and_then(EvalValue::as_str_value);
            let flags = values.get(3).and_then(EvalValue::as_str_value);
            match (text, pattern, replacement) {
                (Some(text), Some(pattern), Some(replacement)) => {
                    let re = build_regex(&pattern, flags.as_deref())
                        .map_err(|e| ExecError::InvalidRegex(e.to_string()))?;
                    Some(EvalValue::Str(
                        re.replace_all(&text, replacement.as_str()).into_owned(),
                    ))
                }
                _ => None,
            }
        }
        Func::Lang => one.map(|v| match v {
            EvalValue::Term(canon) => match Term::from_canonical(canon) {
                Ok(Term::Literal {
                    lang: Some(lang), ..
                }) => EvalValue::Str(lang.to_string()),
                Ok(Term::Literal { .. }) => EvalValue::Str(String::new()),
                _ => EvalValue::Str(String::new()),
            },
            _ => EvalValue::Str(String::new()),
        }),
        Func::Datatype => one.map(|v| match v {
            EvalValue::Integer(_) => EvalValue::Term(format!("<{XSD_INTEGER}>")),
            EvalValue::Double(_) => EvalValue::Term(format!("<{XSD_DOUBLE}>")),
            EvalValue::Boolean(_) => EvalValue::Term(format!("<{XSD_BOOLEAN}>")),
            EvalValue::Str(_) => EvalValue::Term(format!("<{XSD_STRING}>")),
            EvalValue::Term(canon) => match Term::from_canonical(canon) {
                Ok(term @ Term::Literal { .. }) => match term.literal_datatype() {
                    Some(dt) => EvalValue::Term(format!("<{dt}>")),
                    None => EvalValue::Term(
                        "<http://www.w3.org/1999/02/22-rdf-syntax-ns#langString>".into(),
                    ),
                },
                _ => EvalValue::Term(canon.clone()),
            },
        }),
        Func::Iri => one.and_then(EvalValue::as_str_value).map(|s| {
            EvalValue::Term(format!("<{s}>"))
        }),
        Func::StrDt => {
            let lexical = values.first().and_then(EvalValue::as_str_value);
            let datatype = values.get(1).map(EvalValue::to_canonical);
            match (lexical, datatype) {
                (Some(lexical), Some(dt)) => {
                    let dt = dt.trim_start_matches('<').trim_end_matches('>');
                    Some(EvalValue::from_canonical(
                        &Term::typed(&lexical, dt).to_canonical(),
                    ))
                }
                _ => None,
            }
        }
        Func::StrLang => {
            let lexical = values.first().and_then(EvalValue::as_str_value);
            let lang = values.get(1).and_then(EvalValue::as_str_value);
            match (lexical, lang) {
                (Some(lexical), Some(lang)) => Some(EvalValue::Term(
                    Term::lang_literal(&lexical, &lang).to_canonical(),
                )),
                _ => None,
            }
        }
        Func::Abs => match one {
            Some(EvalValue::Integer(n)) => Some(EvalValue::Integer(n.abs())),
            Some(EvalValue::Double(d)) => Some(EvalValue::Double(d.abs())),
            _ => None,
        },
        Func::Ceil => one.and_then(EvalValue::as_f64).map(|d| EvalValue::Double(d.ceil())),
        Func::Floor => one.and_then(EvalValue::as_f64).map(|d| EvalValue::Double(d.floor())),
        Func::Round => one.and_then(EvalValue::as_f64).map(|d| EvalValue::Double(d.round())),
        Func::SameTerm => {
            let a = values.first().map(EvalValue::to_canonical);
            let b = values.get(1).map(EvalValue::to_canonical);
            match (a, b) {
                (Some(a), Some(b)) => Some(EvalValue::Boolean(a == b)),
                _ => None,
            }
        }
        Func::IsIri => one.map(|v| EvalValue::Boolean(is_kind(v, b'<'))),
        Func::IsBlank => one.map(|v| EvalValue::Boolean(is_kind(v, b'_'))),
        Func::IsLiteral => one.map(|v| {
            EvalValue::Boolean(matches!(
                v,
                EvalValue::Str(_)
                    | EvalValue::Integer(_)
                    | EvalValue::Double(_)
                    | EvalValue::Boolean(_)
            ) || is_kind(v, b'"'))
        }),
        Func::IsNumeric => one.map(|v| {
            EvalValue::Boolean(matches!(v, EvalValue::Integer(_) | EvalValue::Double(_)))
        }),
        Func::Bound | Func::If | Func::Coalesce => None, // handled above
    };
    Ok(result)
}

fn binary_str(values: &[EvalValue], f: impl Fn(&str, &str) -> bool) -> Option<EvalValue> {
    let a = values.first().and_then(EvalValue::as_str_value)?;
    let b = values.get(1).and_then(EvalValue::as_str_value)?;
    Some(EvalValue::Boolean(f(&a, &b)))
}

fn is_kind(value: &EvalValue, leading: u8) -> bool {
    match value {
        EvalValue::Term(canon) => canon.as_bytes().first() == Some(&leading),
        _ => false,
    }
}

fn build_regex(pattern: &str, flags: Option<&str>) -> Result<Regex, regex::Error> {
    let mut builder = regex::RegexBuilder::new(pattern);
    if let Some(flags) = flags {
        builder.case_insensitive(flags.contains('i'));
        builder.multi_line(flags.contains('m'));
        builder.dot_matches_new_line(flags.contains('s'));
    }
    builder.build()
}

// ------------------------------------------------------------------------------------------------
// ORDER BY comparator
// ------------------------------------------------------------------------------------------------

/// Total order over optional canonical terms, for ORDER BY:
/// unbound < blank < IRI < literal; numeric literals by value, strings
/// by code point, everything else by lexical form.
pub fn order_compare(a: Option<&str>, b: Option<&str>) -> Ordering {
    let rank = |t: Option<&str>| match t.and_then(|t| t.as_bytes().first()) {
        None => 0u8,
        Some(b'_') => 1,
        Some(b'<') => 2,
        _ => 3,
    };
    let (ra, rb) = (rank(a), rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    let (Some(a), Some(b)) = (a, b) else {
        return Ordering::Equal;
    };
    if ra == 3 {
        let va = EvalValue::from_canonical(a);
        let vb = EvalValue::from_canonical(b);
        if let (Some(na), Some(nb)) = (va.as_f64(), vb.as_f64()) {
            return na.partial_cmp(&nb).unwrap_or(Ordering::Equal);
        }
        if let (EvalValue::Str(sa), EvalValue::Str(sb)) = (&va, &vb) {
            return sa.cmp(sb);
        }
    }
    a.cmp(b)
}
