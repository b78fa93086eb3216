//! Deterministic fragment ordering.
//!
//! Observation columns and action indices are both derived from the ordered
//! fragment list, so the encoder and the decoder must use the same ordering.
//! The order is a pure function of the identifier set: input iteration order
//! never matters. Consumers re-sort from the current registry state on every
//! rebuild instead of caching indices.

use std::cmp::Ordering;

use mdde_registry::FragmentId;

/// Total order over fragment identifiers.
pub trait FragmentOrdering: Send + Sync {
    fn compare(&self, a: &FragmentId, b: &FragmentId) -> Ordering;

    /// Sort a set of unique fragment identifiers.
    fn order(&self, fragments: &[FragmentId]) -> Vec<FragmentId> {
        let mut ordered = fragments.to_vec();
        ordered.sort_by(|a, b| self.compare(a, b));
        debug_assert!(
            ordered.windows(2).all(|w| w[0] != w[1]),
            "duplicate fragment identifiers"
        );
        ordered
    }
}

/// Numeric-aware ordering: `f2` sorts before `f10`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaturalOrdering;

impl FragmentOrdering for NaturalOrdering {
    fn compare(&self, a: &FragmentId, b: &FragmentId) -> Ordering {
        natural_cmp(a.as_str(), b.as_str())
    }
}

/// Compare two strings treating runs of ASCII digits as numbers.
///
/// Strings equal under numeric comparison (`f01` vs `f1`) fall back to plain
/// byte order so the result is still a total order.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (x, y) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0, 0);

    while i < x.len() && j < y.len() {
        if x[i].is_ascii_digit() && y[j].is_ascii_digit() {
            let (start_i, start_j) = (i, j);
            while i < x.len() && x[i].is_ascii_digit() {
                i += 1;
            }
            while j < y.len() && y[j].is_ascii_digit() {
                j += 1;
            }
            let da = trim_zeros(&x[start_i..i]);
            let db = trim_zeros(&y[start_j..j]);
            let ord = da.len().cmp(&db.len()).then_with(|| da.cmp(db));
            if ord != Ordering::Equal {
                return ord;
            }
        } else {
            if x[i] != y[j] {
                return x[i].cmp(&y[j]);
            }
            i += 1;
            j += 1;
        }
    }

    (x.len() - i).cmp(&(y.len() - j)).then_with(|| a.cmp(b))
}

fn trim_zeros(digits: &[u8]) -> &[u8] {
    let first = digits.iter().position(|d| *d != b'0').unwrap_or(digits.len());
    &digits[first..]
}
