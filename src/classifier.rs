//! Interface classification and the close-and-recreate recovery machine.
//!
//! The target serves one of two mutually exclusive layouts per navigation: a
//! canonical searchable desktop layout, or a degraded app-prompt layout with
//! no real search input. In-place DOM patching cannot convert one into the
//! other, so recovery discards the page context, rotates the session
//! identity, and re-navigates. The state machine below makes that loop's
//! termination explicit: it reaches `Usable` or `RecoveryExhausted` within
//! the attempt budget, never looping indefinitely.

use std::time::Duration;

use crate::browser::{EngineError, PageHandle};

/// Marker proving the canonical searchable layout is present.
pub const USABLE_MARKER: &str = "input#searchboxinput";
/// Marker of the degraded mobile-style layout that must be discarded.
pub const DEGRADED_MARKER: &str = "div.JdG3E[role=\"button\"]";

/// How long to give each marker probe before concluding absence.
const MARKER_PROBE_TIMEOUT: Duration = Duration::from_secs(4);

/// Outcome of inspecting one loaded page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceVerdict {
    Unknown,
    Usable,
    Degraded,
}

/// What the session should do next after reporting a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Canonical layout confirmed; proceed to extraction.
    Proceed,
    /// Discard the page context, rotate identity, re-navigate.
    Recreate,
    /// Budget spent; surface `InterfaceUnrecoverable`.
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Unclassified,
    Usable,
    Recreating,
    RecoveryExhausted,
}

/// Per-session recovery machine. Local to one session; shares nothing with
/// concurrent sessions.
#[derive(Debug)]
pub struct InterfaceRecovery {
    state: RecoveryState,
    attempts: u32,
    budget: u32,
}

impl InterfaceRecovery {
    pub fn new(budget: u32) -> Self {
        Self {
            state: RecoveryState::Unclassified,
            attempts: 0,
            budget: budget.max(1),
        }
    }

    /// Feed one classification and get the next action. The budget counts
    /// recreations actually performed: a non-usable verdict triggers a
    /// recreation until `budget` of them have been spent, and only the next
    /// non-usable verdict after that exhausts the machine.
    pub fn observe(&mut self, verdict: InterfaceVerdict) -> RecoveryAction {
        match self.state {
            RecoveryState::Usable | RecoveryState::RecoveryExhausted => {
                // Terminal; repeated observations keep the terminal answer.
                if self.state == RecoveryState::Usable {
                    RecoveryAction::Proceed
                } else {
                    RecoveryAction::GiveUp
                }
            }
            RecoveryState::Unclassified | RecoveryState::Recreating => match verdict {
                InterfaceVerdict::Usable => {
                    self.state = RecoveryState::Usable;
                    RecoveryAction::Proceed
                }
                InterfaceVerdict::Degraded | InterfaceVerdict::Unknown => {
                    if self.attempts >= self.budget {
                        self.state = RecoveryState::RecoveryExhausted;
                        RecoveryAction::GiveUp
                    } else {
                        self.attempts += 1;
                        self.state = RecoveryState::Recreating;
                        RecoveryAction::Recreate
                    }
                }
            },
        }
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Inspect a loaded page and decide which layout was served.
///
/// The usable marker is probed first with a bounded wait; a page that shows
/// neither marker is reported `Unknown` and treated like a degraded serve by
/// the machine, since extraction cannot proceed on it either way.
pub async fn classify_page(page: &mut dyn PageHandle) -> Result<InterfaceVerdict, EngineError> {
    if page.wait_for(USABLE_MARKER, MARKER_PROBE_TIMEOUT).await? {
        return Ok(InterfaceVerdict::Usable);
    }
    if page.wait_for(DEGRADED_MARKER, Duration::from_secs(1)).await? {
        return Ok(InterfaceVerdict::Degraded);
    }
    Ok(InterfaceVerdict::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_first_try() {
        let mut machine = InterfaceRecovery::new(5);
        assert_eq!(machine.observe(InterfaceVerdict::Usable), RecoveryAction::Proceed);
        assert_eq!(machine.state(), RecoveryState::Usable);
        assert_eq!(machine.attempts(), 0);
    }

    #[test]
    fn test_degraded_then_usable() {
        let mut machine = InterfaceRecovery::new(5);
        assert_eq!(machine.observe(InterfaceVerdict::Degraded), RecoveryAction::Recreate);
        assert_eq!(machine.state(), RecoveryState::Recreating);
        assert_eq!(machine.observe(InterfaceVerdict::Usable), RecoveryAction::Proceed);
        assert_eq!(machine.attempts(), 1);
    }

    #[test]
    fn test_full_budget_of_recreations_before_exhaustion() {
        // Budget 5 means five actual recreations happen; only the next
        // degraded serve after the fifth exhausts the machine.
        let mut machine = InterfaceRecovery::new(5);
        for i in 1..=5 {
            assert_eq!(machine.observe(InterfaceVerdict::Degraded), RecoveryAction::Recreate);
            assert_eq!(machine.attempts(), i);
        }
        assert_eq!(machine.observe(InterfaceVerdict::Degraded), RecoveryAction::GiveUp);
        assert_eq!(machine.state(), RecoveryState::RecoveryExhausted);
        // A terminal machine never flips back, even on a late usable serve.
        assert_eq!(machine.observe(InterfaceVerdict::Usable), RecoveryAction::GiveUp);
        assert_eq!(machine.attempts(), 5);
    }

    #[test]
    fn test_unknown_counts_against_budget() {
        let mut machine = InterfaceRecovery::new(2);
        assert_eq!(machine.observe(InterfaceVerdict::Unknown), RecoveryAction::Recreate);
        assert_eq!(machine.observe(InterfaceVerdict::Unknown), RecoveryAction::Recreate);
        assert_eq!(machine.observe(InterfaceVerdict::Unknown), RecoveryAction::GiveUp);
    }

    #[test]
    fn test_terminates_within_budget_for_any_sequence() {
        // Exhaustively walk every degraded/unknown sequence: the machine
        // hands out exactly `budget` recreations, then terminates.
        for budget in 1..=5u32 {
            let mut machine = InterfaceRecovery::new(budget);
            let mut recreations = 0;
            let mut steps = 0;
            loop {
                steps += 1;
                let verdict = if steps % 2 == 0 {
                    InterfaceVerdict::Unknown
                } else {
                    InterfaceVerdict::Degraded
                };
                match machine.observe(verdict) {
                    RecoveryAction::Recreate => recreations += 1,
                    RecoveryAction::GiveUp => break,
                    RecoveryAction::Proceed => unreachable!(),
                }
            }
            assert_eq!(recreations, budget);
            assert_eq!(machine.attempts(), budget);
        }
    }

    #[test]
    fn test_zero_budget_clamps_to_one() {
        let mut machine = InterfaceRecovery::new(0);
        assert_eq!(machine.observe(InterfaceVerdict::Degraded), RecoveryAction::Recreate);
        assert_eq!(machine.observe(InterfaceVerdict::Degraded), RecoveryAction::GiveUp);
    }
}
