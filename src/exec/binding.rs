//! Binding rows — the executor's solution representation.
//!
//! A [`Row`] maps variable ids to bound values. Values are canonical
//! term strings (the same shape the atom store holds), so comparing a
//! binding with a stored atom is a byte comparison and handing results
//! to the codecs needs no conversion.
//!
//! Every binding carries the **scope depth** of the group that created
//! it and whether it came from a `BIND`. Filters evaluated in a group
//! deeper than a BIND do not see that BIND's variable — the depth tag
//! is what enforces it.

use crate::sparql::ast::VarId;

/// One bound value.
#[derive(Debug, Clone, PartialEq)]
pub struct Bound {
    /// The canonical term (`<iri>`, `_:label`, `"lex"…`).
    pub term: String,
    /// Depth of the group that bound it.
    pub scope: u8,
    /// True if a `BIND` produced it.
    pub from_bind: bool,
}

impl Bound {
    /// A pattern-produced binding.
    pub fn scanned(term: String, scope: u8) -> Self {
        Self {
            term,
            scope,
            from_bind: false,
        }
    }

    /// A `BIND`-produced binding.
    pub fn bound(term: String, scope: u8) -> Self {
        Self {
            term,
            scope,
            from_bind: true,
        }
    }
}

/// One solution: a slot per variable in the query's variable space.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    slots: Vec<Option<Bound>>,
}

impl Row {
    /// An all-unbound row over `width` variables.
    pub fn empty(width: usize) -> Self {
        Self {
            slots: vec![None; width],
        }
    }

    /// The binding of a variable, if any.
    pub fn get(&self, var: VarId) -> Option<&Bound> {
        self.slots.get(var as usize).and_then(|s| s.as_ref())
    }

    /// The canonical term of a variable **as visible to a filter at
    /// `depth`**: BIND values from shallower groups are hidden.
    pub fn visible(&self, var: VarId, depth: u8) -> Option<&str> {
        let bound = self.get(var)?;
        if bound.from_bind && depth > bound.scope {
            return None;
        }
        Some(&bound.term)
    }

    /// The canonical term of a variable regardless of scope.
    pub fn term(&self, var: VarId) -> Option<&str> {
        self.get(var).map(|b| b.term.as_str())
    }

    /// Binds a variable. Returns `false` (and leaves the row untouched)
    /// if the variable is already bound to a different term.
    pub fn bind(&mut self, var: VarId, value: Bound) -> bool {
        let slot = &mut self.slots[var as usize];
        match slot {
            Some(existing) => existing.term == value.term,
            None => {
                *slot = Some(value);
                true
            }
        }
    }

    /// Removes a binding (subquery projection trimming).
    pub fn unbind(&mut self, var: VarId) {
        if let Some(slot) = self.slots.get_mut(var as usize) {
            *slot = None;
        }
    }

    /// True if both rows agree on every variable bound in both —
    /// the compatibility test of MINUS and joins.
    pub fn compatible(&self, other: &Row) -> bool {
        self.slots
            .iter()
            .zip(&other.slots)
            .all(|(a, b)| match (a, b) {
                (Some(a), Some(b)) => a.term == b.term,
                _ => true,
            })
    }

    /// True if the rows share at least one mutually bound variable.
    pub fn shares_binding(&self, other: &Row) -> bool {
        self.slots
            .iter()
            .zip(&other.slots)
            .any(|(a, b)| a.is_some() && b.is_some())
    }

    /// Merges `other` into a copy of `self`. `None` if incompatible.
    pub fn merged(&self, other: &Row) -> Option<Row> {
        if !self.compatible(other) {
            return None;
        }
        let mut out = self.clone();
        for (slot, theirs) in out.slots.iter_mut().zip(&other.slots) {
            if slot.is_none() {
                slot.clone_from(theirs);
            }
        }
        Some(out)
    }

    /// The bound variable ids.
    pub fn bound_vars(&self) -> impl Iterator<Item = VarId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i as VarId))
    }

    /// Number of slots.
    pub fn width(&self) -> usize {
        self.slots.len()
    }

    /// Widens the row with unbound slots (blank-node pseudo-variables).
    pub fn widen(&mut self, width: usize) {
        if self.slots.len() < width {
            self.slots.resize(width, None);
        }
    }
}
