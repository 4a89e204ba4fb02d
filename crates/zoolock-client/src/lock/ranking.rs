//! Contender ordering
//!
//! Sibling names are `<prefix><sequence>` where the sequence is the store's
//! zero-padded suffix. Names are parsed to integers before comparison so that
//! foreign children sharing the parent never take part in the ordering.

use crate::store::SEQUENCE_WIDTH;

/// A contender node observed in a sibling listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sibling {
    pub name: String,
    pub sequence: u64,
}

/// Parse the sequence suffix of `name` if it belongs to `prefix`.
///
/// The suffix must be exactly [`SEQUENCE_WIDTH`] ASCII digits, otherwise
/// `hello2` contenders would be mistaken for `hello` ones.
pub fn parse_sequence(name: &str, prefix: &str) -> Option<u64> {
    let suffix = name.strip_prefix(prefix)?;
    if suffix.len() != SEQUENCE_WIDTH || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Keep the children that are contenders for `prefix`, ordered by sequence.
pub fn contenders<S: AsRef<str>>(children: &[S], prefix: &str) -> Vec<Sibling> {
    let mut siblings: Vec<Sibling> = children
        .iter()
        .filter_map(|child| {
            let name = child.as_ref();
            parse_sequence(name, prefix).map(|sequence| Sibling {
                name: name.to_string(),
                sequence,
            })
        })
        .collect();
    siblings.sort_by_key(|s| s.sequence);
    siblings
}

/// Position of one contender among its siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ranking {
    /// 0 means the lock is held
    pub rank: usize,
    /// Sibling with the greatest sequence strictly below ours
    pub predecessor: Option<Sibling>,
    /// Number of contenders in the listing, ours included
    pub contenders: usize,
}

impl Ranking {
    pub fn is_first(&self) -> bool {
        self.rank == 0
    }
}

/// Rank the contender with `own_sequence` within an ordered sibling list.
///
/// Returns `None` when the contender is not present in the listing.
pub fn rank(siblings: &[Sibling], own_sequence: u64) -> Option<Ranking> {
    let rank = siblings
        .binary_search_by_key(&own_sequence, |s| s.sequence)
        .ok()?;
    let predecessor = rank.checked_sub(1).map(|i| siblings[i].clone());
    Some(Ranking {
        rank,
        predecessor,
        contenders: siblings.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn name(prefix: &str, seq: u64) -> String {
        format!("{}{:010}", prefix, seq)
    }

    #[test]
    fn test_parse_sequence() {
        assert_eq!(parse_sequence("hello0000000042", "hello"), Some(42));
        assert_eq!(parse_sequence("hello0000000000", "hello"), Some(0));
        assert_eq!(parse_sequence("world0000000042", "hello"), None);
        assert_eq!(parse_sequence("hello", "hello"), None);
        assert_eq!(parse_sequence("hello00000000x1", "hello"), None);
        // Another resource whose name extends ours
        assert_eq!(parse_sequence("hello20000000003", "hello"), None);
    }

    #[test]
    fn test_contenders_filters_and_sorts_numerically() {
        let children = vec![
            name("hello", 7),
            name("other", 1),
            name("hello", 3),
            "hello-config".to_string(),
            name("hello", 5),
            name("hello2", 0),
        ];
        let siblings = contenders(&children, "hello");
        let sequences: Vec<u64> = siblings.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![3, 5, 7]);
    }

    #[test]
    fn test_rank_after_predecessor_removed() {
        let children = vec![name("hello", 3), name("hello", 5), name("hello", 7)];
        let siblings = contenders(&children, "hello");

        let r7 = rank(&siblings, 7).unwrap();
        assert_eq!(r7.rank, 2);
        assert_eq!(r7.predecessor.unwrap().sequence, 5);

        // 3 released: fresh listing
        let children = vec![name("hello", 5), name("hello", 7)];
        let siblings = contenders(&children, "hello");

        let r5 = rank(&siblings, 5).unwrap();
        assert!(r5.is_first());
        assert!(r5.predecessor.is_none());

        let r7 = rank(&siblings, 7).unwrap();
        assert_eq!(r7.rank, 1);
        assert_eq!(r7.predecessor.unwrap().name, name("hello", 5));
    }

    #[test]
    fn test_rank_missing_contender() {
        let siblings = contenders(&[name("hello", 1)], "hello");
        assert!(rank(&siblings, 2).is_none());
        assert!(rank(&[], 0).is_none());
    }

    proptest! {
        #[test]
        fn prop_rank_counts_smaller_sequences(
            seqs in proptest::collection::btree_set(0u64..1_000_000, 1..64),
            pick in any::<prop::sample::Index>(),
        ) {
            let seqs: Vec<u64> = seqs.into_iter().collect();
            let own = seqs[pick.index(seqs.len())];
            let children: Vec<String> = seqs.iter().rev().map(|s| name("res", *s)).collect();

            let siblings = contenders(&children, "res");
            let ranking = rank(&siblings, own).unwrap();

            let smaller = seqs.iter().filter(|s| **s < own).count();
            prop_assert_eq!(ranking.rank, smaller);
            prop_assert_eq!(
                ranking.predecessor.map(|p| p.sequence),
                seqs.iter().copied().filter(|s| *s < own).max()
            );
        }
    }
}
