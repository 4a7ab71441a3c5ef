//! Core data types for the backtest engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds since the Unix epoch.
pub type Timestamp = i64;

/// Number of instruments traded against each other.
pub const INSTRUMENTS: usize = 3;

/// One instrument's observation at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: Timestamp,
    pub open: f64,
}

impl PricePoint {
    pub fn new(timestamp: Timestamp, open: f64) -> Self {
        Self { timestamp, open }
    }

    /// Timestamp as a UTC datetime, if it is in the representable range.
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}

/// A timestamp where every instrument has a known open price.
///
/// Instrument indices are fixed for a whole run (0 = primary, 1 = secondary,
/// 2 = tertiary) and match the order the series were configured in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignedRow {
    pub timestamp: Timestamp,
    pub prices: [f64; INSTRUMENTS],
}

impl AlignedRow {
    pub fn new(timestamp: Timestamp, prices: [f64; INSTRUMENTS]) -> Self {
        Self { timestamp, prices }
    }
}

/// Rolling z-scores of all instruments at one timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZScoreRow {
    pub timestamp: Timestamp,
    pub z: [f64; INSTRUMENTS],
}

/// Z-scores together with their full ordering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankedRow {
    pub timestamp: Timestamp,
    pub z: [f64; INSTRUMENTS],
    pub smallest: f64,
    pub middle: f64,
    pub largest: f64,
}

impl RankedRow {
    /// Distance between the two extreme z-scores.
    pub fn spread(&self) -> f64 {
        self.largest - self.smallest
    }

    /// Whether instrument `i` sits at the largest z-score (ties included).
    pub fn is_largest(&self, i: usize) -> bool {
        self.z[i] == self.largest
    }

    /// Whether instrument `i` sits at the smallest z-score (ties included).
    pub fn is_smallest(&self, i: usize) -> bool {
        self.z[i] == self.smallest
    }
}

/// Direction held in a single instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum Position {
    Short,
    #[default]
    Flat,
    Long,
}

impl Position {
    /// Signed unit weight: -1, 0 or +1.
    pub fn weight(self) -> i8 {
        match self {
            Position::Short => -1,
            Position::Flat => 0,
            Position::Long => 1,
        }
    }

    pub fn is_flat(self) -> bool {
        self == Position::Flat
    }
}

impl From<Position> for i8 {
    fn from(position: Position) -> Self {
        position.weight()
    }
}

impl TryFrom<i8> for Position {
    type Error = String;

    fn try_from(value: i8) -> std::result::Result<Self, Self::Error> {
        match value {
            -1 => Ok(Position::Short),
            0 => Ok(Position::Flat),
            1 => Ok(Position::Long),
            other => Err(format!("position weight must be -1, 0 or 1, got {}", other)),
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Short => write!(f, "SHORT"),
            Position::Flat => write!(f, "FLAT"),
            Position::Long => write!(f, "LONG"),
        }
    }
}

/// Positions across all instruments, carried from row to row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PositionState {
    pub legs: [Position; INSTRUMENTS],
}

impl PositionState {
    /// All instruments flat.
    pub fn flat() -> Self {
        Self::default()
    }

    pub fn new(legs: [Position; INSTRUMENTS]) -> Self {
        Self { legs }
    }

    pub fn is_flat(&self) -> bool {
        self.legs.iter().all(|p| p.is_flat())
    }

    /// Sum of absolute leg weights.
    pub fn total_weight(&self) -> u32 {
        self.legs.iter().map(|p| p.weight().unsigned_abs() as u32).sum()
    }

    /// Signed weights as an array, in instrument order.
    pub fn weights(&self) -> [i8; INSTRUMENTS] {
        self.legs.map(Position::weight)
    }
}

impl fmt::Display for PositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let weights = self.weights();
        write!(f, "[")?;
        for (i, w) in weights.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:+}", w)?;
        }
        write!(f, "]")
    }
}

/// Per-row output of the backtest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReturnRow {
    pub timestamp: Timestamp,
    /// Weight-normalized hedge return.
    pub strategy_return: f64,
    /// Equal-weight return of all instruments.
    pub baseline_return: f64,
    pub strategy_log_return: f64,
    pub baseline_log_return: f64,
    /// Running sum of strategy log returns up to and including this row.
    pub cumulative_strategy: f64,
    /// Running sum of baseline log returns up to and including this row.
    pub cumulative_baseline: f64,
    /// Positions decided on this row.
    pub positions: PositionState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_weights() {
        assert_eq!(Position::Short.weight(), -1);
        assert_eq!(Position::Flat.weight(), 0);
        assert_eq!(Position::Long.weight(), 1);
        assert_eq!(Position::try_from(1i8), Ok(Position::Long));
        assert!(Position::try_from(2i8).is_err());
    }

    #[test]
    fn test_position_state_weight() {
        let state = PositionState::new([Position::Short, Position::Long, Position::Long]);
        assert_eq!(state.total_weight(), 3);
        assert!(!state.is_flat());
        assert_eq!(state.to_string(), "[-1, +1, +1]");

        assert_eq!(PositionState::flat().total_weight(), 0);
        assert!(PositionState::flat().is_flat());
    }

    #[test]
    fn test_position_json() {
        let state = PositionState::new([Position::Short, Position::Flat, Position::Long]);
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, r#"{"legs":[-1,0,1]}"#);
        let back: PositionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_ranked_row_ties() {
        let row = RankedRow {
            timestamp: 0,
            z: [1.5, -0.5, -0.5],
            smallest: -0.5,
            middle: -0.5,
            largest: 1.5,
        };
        assert!((row.spread() - 2.0).abs() < 1e-12);
        assert!(row.is_largest(0));
        assert!(row.is_smallest(1));
        assert!(row.is_smallest(2));
        assert!(!row.is_smallest(0));
    }

    #[test]
    fn test_price_point_datetime() {
        let p = PricePoint::new(1_725_148_800, 5600.25);
        let dt = p.datetime().unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-09-01T00:00:00+00:00");
    }
}
