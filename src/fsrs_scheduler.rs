//! Memory model: FSRS-5 stability/difficulty updates and interval selection.
//!
//! Everything here is pure. Identical inputs always produce identical outputs,
//! which the cache rebuilder relies on to replay history.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SchedulerError};
use crate::models::Rating;

/// FSRS-5 default weights, used until a student has optimized parameters.
pub const DEFAULT_PARAMETERS: [f64; 19] = [
    0.40255, 1.18385, 3.173, 15.69105, // w0-w3: initial stability per rating
    7.1949, 0.5345, // w4-w5: initial difficulty
    1.4604, 0.0046, // w6-w7: difficulty delta and mean reversion
    1.54575, 0.1192, 1.01925, // w8-w10: recall stability growth
    1.9395, 0.11, 0.29605, 2.2698, // w11-w14: post-lapse stability
    0.2315, 2.9898, // w15-w16: hard penalty, easy bonus
    0.51655, 0.6621, // w17-w18: same-day reviews
];

pub const DEFAULT_DESIRED_RETENTION: f64 = 0.9;

pub const DECAY: f64 = -0.5;
pub const FACTOR: f64 = 19.0 / 81.0;

pub const MIN_STABILITY: f64 = 0.01;
pub const MAX_INTERVAL_DAYS: f64 = 36500.0;

/// Recall probability after `elapsed_days`, `exp(-t / S)`.
///
/// This is the figure used to rank and filter cards for sessions.
pub fn retrievability(stability: f64, elapsed_days: f64) -> f64 {
    if stability <= 0.0 {
        return 0.0;
    }
    (-(elapsed_days.max(0.0) / stability)).exp()
}

/// FSRS power forgetting curve, used inside the stability updates.
pub fn forgetting_curve(elapsed_days: f64, stability: f64) -> f64 {
    if stability <= 0.0 {
        return 0.0;
    }
    (1.0 + FACTOR * elapsed_days.max(0.0) / stability).powf(DECAY)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryState {
    pub stability: f64,
    pub difficulty: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ItemState {
    pub memory: MemoryState,
    /// Whole days until the next review.
    pub interval: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NextStates {
    pub again: ItemState,
    pub hard: ItemState,
    pub good: ItemState,
    pub easy: ItemState,
}

impl NextStates {
    pub fn select(&self, rating: Rating) -> &ItemState {
        match rating {
            Rating::Again => &self.again,
            Rating::Hard => &self.hard,
            Rating::Good => &self.good,
            Rating::Easy => &self.easy,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FSRSScheduler {
    w: [f64; 19],
}

impl Default for FSRSScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl FSRSScheduler {
    pub fn new() -> Self {
        Self {
            w: DEFAULT_PARAMETERS,
        }
    }

    pub fn with_weights(weights: &[f64]) -> Result<Self> {
        let w: [f64; 19] = weights.try_into().map_err(|_| {
            SchedulerError::InvalidParameters(format!(
                "expected {} weights, got {}",
                DEFAULT_PARAMETERS.len(),
                weights.len()
            ))
        })?;
        if w.iter().any(|v| !v.is_finite()) {
            return Err(SchedulerError::InvalidParameters(
                "weights must be finite".to_string(),
            ));
        }
        Ok(Self { w })
    }

    pub fn weights(&self) -> &[f64] {
        &self.w
    }

    /// Candidate next states for every rating.
    ///
    /// `days_elapsed` is ignored when there is no prior memory.
    pub fn next_states(
        &self,
        memory: Option<MemoryState>,
        desired_retention: f64,
        days_elapsed: u32,
    ) -> NextStates {
        let state_for = |rating: Rating| {
            let memory = self.step(memory, rating, days_elapsed);
            ItemState {
                memory,
                interval: self.next_interval(memory.stability, desired_retention),
            }
        };

        NextStates {
            again: state_for(Rating::Again),
            hard: state_for(Rating::Hard),
            good: state_for(Rating::Good),
            easy: state_for(Rating::Easy),
        }
    }

    /// Memory state after a single review.
    pub fn step(&self, memory: Option<MemoryState>, rating: Rating, days_elapsed: u32) -> MemoryState {
        let g = rating.as_i32() as f64;
        let Some(current) = memory else {
            return MemoryState {
                stability: self.init_stability(rating),
                difficulty: self.init_difficulty(g),
            };
        };

        let s = current.stability.max(MIN_STABILITY);
        let d = current.difficulty.clamp(1.0, 10.0);
        let stability = if days_elapsed == 0 {
            self.stability_short_term(s, g)
        } else {
            let r = forgetting_curve(days_elapsed as f64, s);
            if rating == Rating::Again {
                self.stability_after_failure(s, d, r)
            } else {
                self.stability_after_success(s, d, r, rating)
            }
        };

        MemoryState {
            stability: stability.clamp(MIN_STABILITY, MAX_INTERVAL_DAYS),
            difficulty: self.next_difficulty(d, g),
        }
    }

    /// Days until recall probability falls to `desired_retention`, rounded, at least one.
    pub fn next_interval(&self, stability: f64, desired_retention: f64) -> f64 {
        let interval = stability / FACTOR * (desired_retention.powf(1.0 / DECAY) - 1.0);
        interval.round().clamp(1.0, MAX_INTERVAL_DAYS)
    }

    fn init_stability(&self, rating: Rating) -> f64 {
        self.w[rating.as_i32() as usize - 1].max(MIN_STABILITY)
    }

    fn init_difficulty_raw(&self, g: f64) -> f64 {
        self.w[4] - (self.w[5] * (g - 1.0)).exp() + 1.0
    }

    fn init_difficulty(&self, g: f64) -> f64 {
        self.init_difficulty_raw(g).clamp(1.0, 10.0)
    }

    fn next_difficulty(&self, d: f64, g: f64) -> f64 {
        let delta = -self.w[6] * (g - 3.0);
        // Linear damping keeps difficulty from overshooting 10.
        let damped = d + delta * (10.0 - d) / 9.0;
        let reverted = self.w[7] * self.init_difficulty_raw(4.0) + (1.0 - self.w[7]) * damped;
        reverted.clamp(1.0, 10.0)
    }

    fn stability_after_success(&self, s: f64, d: f64, r: f64, rating: Rating) -> f64 {
        let hard_penalty = if rating == Rating::Hard { self.w[15] } else { 1.0 };
        let easy_bonus = if rating == Rating::Easy { self.w[16] } else { 1.0 };
        s * (1.0
            + self.w[8].exp()
                * (11.0 - d)
                * s.powf(-self.w[9])
                * (((1.0 - r) * self.w[10]).exp() - 1.0)
                * hard_penalty
                * easy_bonus)
    }

    fn stability_after_failure(&self, s: f64, d: f64, r: f64) -> f64 {
        let new_s = self.w[11]
            * d.powf(-self.w[12])
            * ((s + 1.0).powf(self.w[13]) - 1.0)
            * ((1.0 - r) * self.w[14]).exp();
        let ceiling = s / (self.w[17] * self.w[18]).exp();
        new_s.min(ceiling)
    }

    fn stability_short_term(&self, s: f64, g: f64) -> f64 {
        s * (self.w[17] * (g - 3.0 + self.w[18])).exp()
    }
}
