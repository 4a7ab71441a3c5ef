//! Cross-sectional ranking of simultaneous z-scores.

use crate::types::{RankedRow, ZScoreRow, INSTRUMENTS};

/// Smallest, middle and largest of the instrument z-scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ranking {
    pub smallest: f64,
    pub middle: f64,
    pub largest: f64,
}

/// Full ordering of the z-scores.
///
/// The median is taken from a complete sort rather than derived from min and
/// max, so it stays correct when values tie.
pub fn rank(z: &[f64; INSTRUMENTS]) -> Ranking {
    let mut sorted = *z;
    sorted.sort_by(f64::total_cmp);
    Ranking {
        smallest: sorted[0],
        middle: sorted[INSTRUMENTS / 2],
        largest: sorted[INSTRUMENTS - 1],
    }
}

/// Attach the ordering to a z-score row.
pub fn rank_row(row: &ZScoreRow) -> RankedRow {
    let Ranking {
        smallest,
        middle,
        largest,
    } = rank(&row.z);
    RankedRow {
        timestamp: row.timestamp,
        z: row.z,
        smallest,
        middle,
        largest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_distinct() {
        let r = rank(&[0.4, -1.2, 2.5]);
        assert_eq!(r.smallest, -1.2);
        assert_eq!(r.middle, 0.4);
        assert_eq!(r.largest, 2.5);
    }

    #[test]
    fn test_rank_ties() {
        let r = rank(&[1.0, -0.3, 1.0]);
        assert_eq!(r.smallest, -0.3);
        assert_eq!(r.middle, 1.0);
        assert_eq!(r.largest, 1.0);
    }

    #[test]
    fn test_rank_row_and_membership() {
        let row = rank_row(&ZScoreRow {
            timestamp: 42,
            z: [-0.8, 1.7, -0.8],
        });
        assert_eq!(row.timestamp, 42);
        assert!(row.is_smallest(0) && row.is_smallest(2));
        assert!(row.is_largest(1));
        assert!(!row.is_largest(0) && !row.is_smallest(1));
        assert!((row.spread() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_rank_negative_zero() {
        // -0.0 and 0.0 compare equal for leg membership even though the sort
        // orders them.
        let row = rank_row(&ZScoreRow {
            timestamp: 0,
            z: [0.0, -0.0, 1.0],
        });
        assert!(row.is_smallest(0) && row.is_smallest(1));
    }
}
