//! Admission cap on contenders per resource

use super::ranking::Sibling;

/// Outcome of evaluating the admission cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected { ahead: usize, limit: usize },
}

/// Number of contenders with a sequence strictly below `own_sequence`.
pub fn admission_count(siblings: &[Sibling], own_sequence: u64) -> usize {
    siblings
        .iter()
        .filter(|s| s.sequence < own_sequence)
        .count()
}

/// Decide admission against a fresh sibling listing.
///
/// `None` or `Some(0)` means unlimited.
pub fn evaluate(siblings: &[Sibling], own_sequence: u64, limit: Option<usize>) -> Admission {
    let Some(limit) = limit.filter(|l| *l > 0) else {
        return Admission::Admitted;
    };

    let ahead = admission_count(siblings, own_sequence);
    if ahead >= limit {
        Admission::Rejected { ahead, limit }
    } else {
        Admission::Admitted
    }
}
