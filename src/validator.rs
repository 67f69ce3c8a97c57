//! Pairing validation against self-assignment and recent repeats
use std::fmt;

use serde::{Deserialize, Serialize};

use super::assignment::Assignment;
use super::history::History;
use super::participant::ParticipantId;

/// How many of a giver's most recent rounds are off limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lookback {
    /// The last `n` recorded rounds, or all of them when fewer exist.
    Years(usize),
    /// Every recorded round.
    All,
}

impl Default for Lookback {
    fn default() -> Self {
        Lookback::Years(2)
    }
}

impl Lookback {
    /// The tail of `receivers` that this window excludes.
    pub fn window<'a>(&self, receivers: &'a [ParticipantId]) -> &'a [ParticipantId] {
        match self {
            Lookback::All => receivers,
            Lookback::Years(n) => &receivers[receivers.len().saturating_sub(*n)..],
        }
    }

    /// Whether `giver` may be paired with `receiver` under this window.
    pub fn allows(&self, history: &History, giver: &ParticipantId, receiver: &ParticipantId) -> bool {
        giver != receiver && !self.window(history.receivers(giver)).contains(receiver)
    }
}

impl fmt::Display for Lookback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookback::Years(1) => write!(f, "1 year"),
            Lookback::Years(n) => write!(f, "{n} years"),
            Lookback::All => write!(f, "all recorded years"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    SelfAssigned {
        giver: ParticipantId,
    },
    RecentRepeat {
        giver: ParticipantId,
        receiver: ParticipantId,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::SelfAssigned { giver } => write!(f, "{giver} drew themselves"),
            Violation::RecentRepeat { giver, receiver } => {
                write!(f, "{giver} had {receiver} within the lookback window")
            }
        }
    }
}

/// First pair in `candidate` (by giver order) breaking a rule, if any.
pub fn first_violation(candidate: &Assignment, history: &History, lookback: Lookback) -> Option<Violation> {
    candidate.iter().find_map(|(giver, receiver)| {
        if giver == receiver {
            Some(Violation::SelfAssigned { giver })
        } else if lookback.window(history.receivers(&giver)).contains(&receiver) {
            Some(Violation::RecentRepeat { giver, receiver })
        } else {
            None
        }
    })
}

/// Checks a candidate against the no-self and no-recent-repeat rules.
///
/// The candidate is expected to be a bijection over its pool; the draw loop
/// guarantees that by shuffling, so it is only asserted in debug builds.
pub fn is_valid(candidate: &Assignment, history: &History, lookback: Lookback) -> bool {
    debug_assert!(candidate.is_bijection(), "candidate is not a bijection");
    first_violation(candidate, history, lookback).is_none()
}
