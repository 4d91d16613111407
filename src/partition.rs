use std::ops::Range;

use crate::error::{PipelineError, Result};
use crate::tokenizer::Delimiters;

/// Byte range `[start, end)` of the input owned by one replica (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub replica: usize,
    pub start: usize,
    pub end: usize,
}

impl Partition {
    pub fn new(replica: usize, start: usize, end: usize) -> Self {
        Partition {
            replica,
            start,
            end,
        }
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Moves a nonzero bound forward onto the next delimiter (or the end of the
/// text) so it never falls inside a word.
///
/// The function is monotone, and both neighbours of a bound compute it from
/// the same raw offset, so adjacent ranges always meet exactly. A word
/// therefore belongs to the replica whose range holds its first byte.
pub fn adjust_bound(text: &[u8], bound: usize, delimiters: &Delimiters) -> usize {
    let mut bound = bound.min(text.len());
    if bound == 0 {
        return 0;
    }
    while bound < text.len() && !delimiters.contains(text[bound]) {
        bound += 1;
    }
    bound
}

/// Range for replica `replica` (1-based) out of `replicas`.
pub fn partition(
    text: &[u8],
    replica: usize,
    replicas: usize,
    delimiters: &Delimiters,
) -> Partition {
    let len = text.len();
    let raw_start = (replica - 1) * len / replicas;
    let raw_end = replica * len / replicas;
    Partition {
        replica,
        start: adjust_bound(text, raw_start, delimiters),
        end: adjust_bound(text, raw_end, delimiters),
    }
}

pub fn partition_all(text: &[u8], replicas: usize, delimiters: &Delimiters) -> Vec<Partition> {
    (1..=replicas)
        .map(|replica| partition(text, replica, replicas, delimiters))
        .collect()
}

/// Checks that `parts` tile `[0, len)` in replica order without gap or overlap.
pub fn validate_partitions(parts: &[Partition], len: usize) -> Result<()> {
    let mut expected = 0;
    for part in parts {
        if part.start != expected || part.end < part.start {
            return Err(PipelineError::PartitionBoundaryConflict {
                replica: part.replica,
                expected,
                found: part.start,
            });
        }
        expected = part.end;
    }
    if expected != len {
        return Err(PipelineError::PartitionBoundaryConflict {
            replica: parts.last().map(|p| p.replica + 1).unwrap_or(1),
            expected,
            found: len,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::words;
    use bytes::Bytes;

    #[test]
    fn single_replica_covers_everything() {
        let text = b"the cat sat on the mat";
        let parts = partition_all(text, 1, &Delimiters::default());
        assert_eq!(parts, vec![Partition::new(1, 0, text.len())]);
    }

    #[test]
    fn bound_moves_past_the_straddled_word() {
        // raw bound 4 falls inside "bb"
        let text = b"aa bb aa";
        let parts = partition_all(text, 2, &Delimiters::default());
        assert_eq!(parts[0], Partition::new(1, 0, 5));
        assert_eq!(parts[1], Partition::new(2, 5, 8));
    }

    #[test]
    fn bound_on_delimiter_stays() {
        let text = b"abc def";
        assert_eq!(adjust_bound(text, 3, &Delimiters::default()), 3);
        assert_eq!(adjust_bound(text, 0, &Delimiters::default()), 0);
        assert_eq!(adjust_bound(text, 5, &Delimiters::default()), 7);
    }

    #[test]
    fn long_word_swallows_replicas() {
        let text = b"abcdefghijklmnop q";
        let parts = partition_all(text, 4, &Delimiters::default());
        validate_partitions(&parts, text.len()).unwrap();
        assert_eq!(parts[0].end, 16);
        assert!(parts[1].is_empty());
        assert!(parts[2].is_empty());
        assert_eq!(parts[3].range(), 16..18);
    }

    #[test]
    fn more_replicas_than_bytes() {
        let text = b"a b";
        let parts = partition_all(text, 7, &Delimiters::default());
        assert_eq!(parts.len(), 7);
        validate_partitions(&parts, text.len()).unwrap();
    }

    #[test]
    fn every_word_is_claimed_once() {
        let text =
            Bytes::from_static(b"lorem ipsum, dolor sit amet.\nconsectetur adipiscing elit sed do");
        let d = Delimiters::default();
        let whole: Vec<Bytes> = words(&text, 0..text.len(), &d).collect();
        for n in 1..=12 {
            let parts = partition_all(&text, n, &d);
            validate_partitions(&parts, text.len()).unwrap();
            let split: Vec<Bytes> = parts
                .iter()
                .flat_map(|p| words(&text, p.range(), &d))
                .collect();
            assert_eq!(split, whole, "replicas: {}", n);
        }
    }

    #[test]
    fn gaps_and_overlaps_are_rejected() {
        let gap = [Partition::new(1, 0, 4), Partition::new(2, 5, 10)];
        match validate_partitions(&gap, 10) {
            Err(PipelineError::PartitionBoundaryConflict {
                replica,
                expected,
                found,
            }) => {
                assert_eq!((replica, expected, found), (2, 4, 5));
            }
            other => panic!("unexpected {:?}", other),
        }

        let overlap = [Partition::new(1, 0, 6), Partition::new(2, 5, 10)];
        assert!(validate_partitions(&overlap, 10).is_err());

        let short = [Partition::new(1, 0, 6)];
        assert!(validate_partitions(&short, 10).is_err());

        let inverted = [Partition::new(1, 0, 6), Partition::new(2, 6, 3)];
        assert!(validate_partitions(&inverted, 3).is_err());
    }
}
