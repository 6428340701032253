//! Replication Positions
//!
//! A position is a marker of replicated progress. Positions are totally
//! ordered within one lineage and incomparable across lineages.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::{NodeError, NodeResult};

/// Replication marker: a lineage identifier plus a monotonically advancing
/// sequence within that lineage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    lineage: String,
    sequence: u64,
}

impl Position {
    /// Create a position.
    pub fn new(lineage: impl Into<String>, sequence: u64) -> Self {
        Self {
            lineage: lineage.into(),
            sequence,
        }
    }

    pub fn lineage(&self) -> &str {
        &self.lineage
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Return a position `n` steps further along the same lineage.
    pub fn advanced_by(&self, n: u64) -> Self {
        Self {
            lineage: self.lineage.clone(),
            sequence: self.sequence.saturating_add(n),
        }
    }

    /// Compare `self` relative to `other`.
    ///
    /// `Less` means `self` is behind `other`, `Greater` means ahead.
    /// Positions of different lineages cannot be compared.
    pub fn compare(&self, other: &Position) -> NodeResult<Ordering> {
        if self.lineage != other.lineage {
            return Err(NodeError::IncomparablePosition {
                left: self.lineage.clone(),
                right: other.lineage.clone(),
            });
        }
        Ok(self.sequence.cmp(&other.sequence))
    }

    /// How many steps `self` trails `other` (zero when level or ahead).
    pub fn lag_behind(&self, other: &Position) -> NodeResult<u64> {
        self.compare(other)?;
        Ok(other.sequence.saturating_sub(self.sequence))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.lineage, self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_is_self_relative() {
        let behind = Position::new("L", 0);
        let ahead = Position::new("L", 1);

        assert_eq!(behind.compare(&ahead).unwrap(), Ordering::Less);
        assert_eq!(ahead.compare(&behind).unwrap(), Ordering::Greater);
        assert_eq!(ahead.compare(&ahead.clone()).unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_compare_across_lineages_fails() {
        let a = Position::new("L1", 5);
        let b = Position::new("L2", 5);

        match a.compare(&b) {
            Err(NodeError::IncomparablePosition { left, right }) => {
                assert_eq!(left, "L1");
                assert_eq!(right, "L2");
            }
            other => panic!("expected IncomparablePosition, got {:?}", other),
        }
    }

    #[test]
    fn test_lag_behind() {
        let primary = Position::new("L", 10);
        let replica = Position::new("L", 8);

        assert_eq!(replica.lag_behind(&primary).unwrap(), 2);
        assert_eq!(primary.lag_behind(&replica).unwrap(), 0);
        assert!(replica.lag_behind(&Position::new("X", 10)).is_err());
    }

    #[test]
    fn test_display_and_advance() {
        let pos = Position::new("binlog", 41).advanced_by(1);
        assert_eq!(pos.to_string(), "binlog:42");
    }
}
