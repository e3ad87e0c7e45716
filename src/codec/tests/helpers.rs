//! Shared helpers for codec tests: canonical quad collection and
//! set-level comparison.

use crate::codec::{CodecError, Term};

/// A parsed statement in canonical text form, graph included.
pub type CanonQuad = (String, String, String, Option<String>);

/// Builds a sink that collects canonical quads into `out`.
pub fn collect(
    out: &mut Vec<CanonQuad>,
) -> impl FnMut(&Term<'_>, &Term<'_>, &Term<'_>, Option<&Term<'_>>) -> Result<(), CodecError> + '_
{
    |s, p, o, g| {
        out.push((
            s.to_canonical(),
            p.to_canonical(),
            o.to_canonical(),
            g.map(|g| g.to_canonical()),
        ));
        Ok(())
    }
}

/// Sorted copy, for set comparison.
pub fn sorted(mut quads: Vec<CanonQuad>) -> Vec<CanonQuad> {
    quads.sort();
    quads.dedup();
    quads
}
