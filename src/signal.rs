//! Position state machine.
//!
//! A [`PositionPolicy`] turns the previous [`PositionState`] and the current
//! [`RankedRow`] into the next state. Policies are pure: all state carried
//! across rows lives in the `PositionState` value threaded through
//! [`PositionPolicy::step`], which makes each transition testable on its own.
//!
//! Two policies are provided:
//!
//! - [`PersistentPolicy`] (default): enter a hedged position when the spread
//!   between the extreme z-scores exceeds the entry threshold, flatten when it
//!   falls below the exit threshold, and otherwise hold.
//! - [`StatelessPolicy`]: re-derive the position on every row from the gaps
//!   between each extreme and the median, with no memory.

use crate::types::{Position, PositionState, RankedRow, INSTRUMENTS};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a transition did to the positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalEvent {
    /// A new position set was opened (possibly replacing an old one).
    Enter,
    /// All positions were closed.
    Exit,
    /// Positions were carried forward unchanged.
    Hold,
}

impl fmt::Display for SignalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalEvent::Enter => write!(f, "ENTER"),
            SignalEvent::Exit => write!(f, "EXIT"),
            SignalEvent::Hold => write!(f, "HOLD"),
        }
    }
}

/// Result of one state-machine step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub state: PositionState,
    pub event: SignalEvent,
}

/// Trait implemented by every position policy.
pub trait PositionPolicy: Send + Sync {
    /// Returns the name of the policy.
    fn name(&self) -> &str;

    /// Compute the positions for `row` given the positions held before it.
    fn step(&self, prev: &PositionState, row: &RankedRow) -> Decision;

    /// Get policy parameters as key-value pairs for logging.
    fn parameters(&self) -> Vec<(String, String)> {
        vec![]
    }
}

/// Short every instrument at the largest z-score and long every instrument at
/// the smallest, leaving the rest flat.
fn hedged_entry(row: &RankedRow, short_largest: bool, long_smallest: bool) -> PositionState {
    // All scores equal: every instrument is both extremes.
    if row.largest == row.smallest {
        return PositionState::flat();
    }
    let mut legs = [Position::Flat; INSTRUMENTS];
    for (i, leg) in legs.iter_mut().enumerate() {
        if short_largest && row.is_largest(i) {
            *leg = Position::Short;
        }
        if long_smallest && row.is_smallest(i) {
            *leg = Position::Long;
        }
    }
    PositionState::new(legs)
}

// =============================================================================
// Persistent threshold entry/exit
// =============================================================================

/// Threshold entry with persistence until an exit.
///
/// # Parameters
/// - `entry_threshold`: spread above which a hedged position is opened
/// - `exit_threshold`: spread below which all positions are closed
///
/// When a misconfiguration lets both conditions hold on the same row, the
/// entry wins.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersistentPolicy {
    pub entry_threshold: f64,
    pub exit_threshold: f64,
}

impl PersistentPolicy {
    pub fn new(entry_threshold: f64, exit_threshold: f64) -> Self {
        Self {
            entry_threshold,
            exit_threshold,
        }
    }

    /// Whether the entry and exit conditions hold on `row`, in that order.
    pub fn triggers(&self, row: &RankedRow) -> (bool, bool) {
        let spread = row.spread();
        (spread > self.entry_threshold, spread < self.exit_threshold)
    }
}

impl PositionPolicy for PersistentPolicy {
    fn name(&self) -> &str {
        "persistent"
    }

    fn step(&self, prev: &PositionState, row: &RankedRow) -> Decision {
        match self.triggers(row) {
            (true, _) => Decision {
                state: hedged_entry(row, true, true),
                event: SignalEvent::Enter,
            },
            (false, true) => Decision {
                state: PositionState::flat(),
                event: SignalEvent::Exit,
            },
            (false, false) => Decision {
                state: *prev,
                event: SignalEvent::Hold,
            },
        }
    }

    fn parameters(&self) -> Vec<(String, String)> {
        vec![
            ("entry_threshold".to_string(), format!("{:.3}", self.entry_threshold)),
            ("exit_threshold".to_string(), format!("{:.3}", self.exit_threshold)),
        ]
    }
}

// =============================================================================
// Stateless dual threshold
// =============================================================================

/// Memoryless policy comparing each extreme against the median.
///
/// The largest instrument is shorted when `largest - middle > threshold`; the
/// smallest is bought when `middle - smallest > threshold`. The middle
/// instrument is always flat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatelessPolicy {
    pub threshold: f64,
}

impl StatelessPolicy {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl PositionPolicy for StatelessPolicy {
    fn name(&self) -> &str {
        "stateless"
    }

    fn step(&self, prev: &PositionState, row: &RankedRow) -> Decision {
        let short_largest = row.largest - row.middle > self.threshold;
        let long_smallest = row.middle - row.smallest > self.threshold;
        let state = hedged_entry(row, short_largest, long_smallest);

        let event = if state == *prev {
            SignalEvent::Hold
        } else if state.is_flat() {
            SignalEvent::Exit
        } else {
            SignalEvent::Enter
        };

        Decision { state, event }
    }

    fn parameters(&self) -> Vec<(String, String)> {
        vec![("threshold".to_string(), format!("{:.3}", self.threshold))]
    }
}

// =============================================================================
// Policy selection
// =============================================================================

/// Which position policy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    #[default]
    Persistent,
    Stateless,
}

impl PolicyKind {
    /// Build the policy. The stateless policy uses the entry threshold.
    pub fn build(self, entry_threshold: f64, exit_threshold: f64) -> Box<dyn PositionPolicy> {
        match self {
            PolicyKind::Persistent => Box::new(PersistentPolicy::new(entry_threshold, exit_threshold)),
            PolicyKind::Stateless => Box::new(StatelessPolicy::new(entry_threshold)),
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyKind::Persistent => write!(f, "persistent"),
            PolicyKind::Stateless => write!(f, "stateless"),
        }
    }
}

impl std::str::FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "persistent" => Ok(PolicyKind::Persistent),
            "stateless" => Ok(PolicyKind::Stateless),
            other => Err(format!("Unknown policy: {}", other)),
        }
    }
}

/// A policy together with the positions it currently holds.
pub struct SignalMachine {
    policy: Box<dyn PositionPolicy>,
    state: PositionState,
}

impl SignalMachine {
    /// Start flat.
    pub fn new(policy: Box<dyn PositionPolicy>) -> Self {
        Self {
            policy,
            state: PositionState::flat(),
        }
    }

    /// Advance by one row and persist the new state.
    pub fn step(&mut self, row: &RankedRow) -> Decision {
        let decision = self.peek(row);
        self.commit(decision.state);
        decision
    }

    /// Decide on a row without moving the held positions.
    pub fn peek(&self, row: &RankedRow) -> Decision {
        self.policy.step(&self.state, row)
    }

    /// Replace the held positions.
    pub fn commit(&mut self, state: PositionState) {
        self.state = state;
    }

    /// Positions currently held.
    pub fn state(&self) -> PositionState {
        self.state
    }

    pub fn policy(&self) -> &dyn PositionPolicy {
        self.policy.as_ref()
    }

    /// Go back to flat.
    pub fn reset(&mut self) {
        self.state = PositionState::flat();
    }
}

/// Positions for each ranked row, starting flat.
pub fn generate_positions(rows: &[RankedRow], policy: &dyn PositionPolicy) -> Vec<PositionState> {
    rows.iter()
        .scan(PositionState::flat(), |state, row| {
            *state = policy.step(state, row).state;
            Some(*state)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rank::rank_row;
    use crate::types::ZScoreRow;
    use Position::{Flat, Long, Short};

    fn row(z: [f64; INSTRUMENTS]) -> RankedRow {
        rank_row(&ZScoreRow { timestamp: 0, z })
    }

    #[test]
    fn test_persistent_entry() {
        let policy = PersistentPolicy::new(1.0, 0.2);
        let d = policy.step(&PositionState::flat(), &row([1.2, -0.1, -0.4]));
        assert_eq!(d.event, SignalEvent::Enter);
        assert_eq!(d.state.legs, [Short, Flat, Long]);
    }

    #[test]
    fn test_persistent_entry_ties_activate_all_legs() {
        let policy = PersistentPolicy::new(1.0, 0.0);
        let d = policy.step(&PositionState::flat(), &row([1.5, -0.5, -0.5]));
        assert_eq!(d.state.legs, [Short, Long, Long]);
        assert_eq!(d.state.total_weight(), 3);
    }

    #[test]
    fn test_persistent_entry_replaces_previous_position() {
        let policy = PersistentPolicy::new(1.0, 0.2);
        let prev = PositionState::new([Short, Flat, Long]);
        let d = policy.step(&prev, &row([-0.9, 0.6, 0.1]));
        assert_eq!(d.state.legs, [Long, Short, Flat]);
    }

    #[test]
    fn test_persistent_hold_carries_forward() {
        let policy = PersistentPolicy::new(1.0, 0.2);
        let prev = PositionState::new([Short, Flat, Long]);
        let d = policy.step(&prev, &row([0.3, 0.0, -0.3]));
        assert_eq!(d.event, SignalEvent::Hold);
        assert_eq!(d.state, prev);
    }

    #[test]
    fn test_persistent_exit_flattens() {
        let policy = PersistentPolicy::new(1.0, 0.2);
        let prev = PositionState::new([Short, Long, Long]);
        let d = policy.step(&prev, &row([0.05, 0.0, -0.1]));
        assert_eq!(d.event, SignalEvent::Exit);
        assert!(d.state.is_flat());
    }

    #[test]
    fn test_zero_exit_threshold_never_exits() {
        // The spread is never negative.
        let policy = PersistentPolicy::new(1.0, 0.0);
        let prev = PositionState::new([Short, Flat, Long]);
        let d = policy.step(&prev, &row([0.0, 0.0, 0.0]));
        assert_eq!(d.event, SignalEvent::Hold);
        assert_eq!(d.state, prev);
    }

    #[test]
    fn test_entry_wins_over_exit() {
        let policy = PersistentPolicy::new(0.5, 2.0);
        assert_eq!(policy.triggers(&row([1.0, 0.0, 0.0])), (true, true));
        let d = policy.step(&PositionState::flat(), &row([1.0, 0.0, 0.0]));
        assert_eq!(d.event, SignalEvent::Enter);
        assert_eq!(d.state.legs, [Short, Long, Long]);
    }

    #[test]
    fn test_stateless_both_sides() {
        let policy = StatelessPolicy::new(0.5);
        let d = policy.step(&PositionState::flat(), &row([1.0, 0.0, -1.0]));
        assert_eq!(d.state.legs, [Short, Flat, Long]);
        assert_eq!(d.event, SignalEvent::Enter);
    }

    #[test]
    fn test_stateless_one_side() {
        let policy = StatelessPolicy::new(0.5);
        // Only the largest is far from the median.
        let d = policy.step(&PositionState::flat(), &row([1.0, 0.2, 0.0]));
        assert_eq!(d.state.legs, [Short, Flat, Flat]);
    }

    #[test]
    fn test_stateless_has_no_memory() {
        let policy = StatelessPolicy::new(0.5);
        let prev = PositionState::new([Short, Flat, Long]);
        let d = policy.step(&prev, &row([0.1, 0.0, -0.1]));
        assert!(d.state.is_flat());
        assert_eq!(d.event, SignalEvent::Exit);
    }

    #[test]
    fn test_machine_persists_state() {
        let mut machine = SignalMachine::new(PolicyKind::Persistent.build(1.0, 0.1));
        machine.step(&row([1.2, 0.0, -0.3]));
        assert_eq!(machine.state().legs, [Short, Flat, Long]);
        machine.step(&row([0.5, 0.0, -0.2]));
        assert_eq!(machine.state().legs, [Short, Flat, Long]);
        machine.step(&row([0.02, 0.0, -0.02]));
        assert!(machine.state().is_flat());
        machine.reset();
        assert!(machine.state().is_flat());
    }

    #[test]
    fn test_generate_positions() {
        let rows = vec![
            row([0.3, 0.0, -0.3]),
            row([1.2, 0.0, -0.3]),
            row([0.5, 0.0, -0.2]),
            row([0.02, 0.0, -0.02]),
        ];
        let policy = PersistentPolicy::new(1.0, 0.1);
        let states = generate_positions(&rows, &policy);
        assert!(states[0].is_flat());
        assert_eq!(states[1].legs, [Short, Flat, Long]);
        assert_eq!(states[2], states[1]);
        assert!(states[3].is_flat());
    }

    #[test]
    fn test_no_dispersion_never_trades() {
        let policy = PersistentPolicy::new(-1.0, -2.0);
        let d = policy.step(&PositionState::flat(), &row([0.4, 0.4, 0.4]));
        assert!(d.state.is_flat());
    }

    #[test]
    fn test_policy_kind_parse() {
        assert_eq!("Stateless".parse::<PolicyKind>(), Ok(PolicyKind::Stateless));
        assert!("other".parse::<PolicyKind>().is_err());
        assert_eq!(PolicyKind::default(), PolicyKind::Persistent);
        assert_eq!(PolicyKind::Stateless.build(0.6, 0.0).name(), "stateless");
    }
}
