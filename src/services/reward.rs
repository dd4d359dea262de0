//! services/reward.rs
//! Maps a resolution outcome to the scalar reward fed back to the agent.

use serde::{Deserialize, Serialize};

use crate::events::ComplaintResolved;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    pub resolution_days: f64,
    pub was_overridden: bool,
    pub duplicate_detection_correct: bool,
}

impl ResolutionOutcome {
    pub fn from_event(ev: &ComplaintResolved) -> Self {
        Self {
            resolution_days: ev.resolution_days,
            was_overridden: ev.was_overridden,
            duplicate_detection_correct: ev.duplicate_detection_correct,
        }
    }
}

/// Scalar reward for one resolved complaint. Three additive terms, no
/// normalization:
///
/// - resolution speed: +10 under 2 days, +5 under 5 days, −5 otherwise;
/// - correctness: −20 if a human overrode the routing, +10 otherwise;
/// - duplicate accuracy: +5 when the duplicate call was correct.
///
/// The chosen action rides along for shaping experiments but does not
/// currently contribute a term.
pub fn resolution_reward(_action: usize, outcome: &ResolutionOutcome) -> f64 {
    let mut reward = 0.0;

    if outcome.resolution_days < 2.0 {
        reward += 10.0;
    } else if outcome.resolution_days < 5.0 {
        reward += 5.0;
    } else {
        reward -= 5.0;
    }

    if outcome.was_overridden {
        reward -= 20.0;
    } else {
        reward += 10.0;
    }

    if outcome.duplicate_detection_correct {
        reward += 5.0;
    }

    reward
}
