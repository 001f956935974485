use chrono::Duration;
use regex::Regex;
use std::sync::LazyLock;

use crate::errors::{Result, SchedulerError};
use crate::models::{CardStatus, Rating};

static STEP_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)([smhd])$").unwrap_or_else(|e| panic!("invalid step pattern: {e}"))
});

pub const DEFAULT_LEARNING_STEPS: [&str; 3] = ["3m", "15m", "30m"];

/// Parse a step such as `"15m"` into a duration. Anything else is rejected.
pub fn parse_step_duration(raw: &str) -> Result<Duration> {
    let captures = STEP_PATTERN
        .captures(raw)
        .ok_or_else(|| SchedulerError::InvalidStepDuration(raw.to_string()))?;

    let amount: i64 = captures[1]
        .parse()
        .map_err(|_| SchedulerError::InvalidStepDuration(raw.to_string()))?;
    let unit_ms: i64 = match &captures[2] {
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => return Err(SchedulerError::InvalidStepDuration(raw.to_string())),
    };

    amount
        .checked_mul(unit_ms)
        .and_then(Duration::try_milliseconds)
        .ok_or_else(|| SchedulerError::InvalidStepDuration(raw.to_string()))
}

/// What the learning-step phase decides for one rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Remain in learning steps; the card is due again after `delay`.
    Stay { step_index: usize, delay: Duration },
    /// Hand the same review over to the memory model.
    Graduate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearningSteps {
    steps: Vec<Duration>,
}

impl Default for LearningSteps {
    fn default() -> Self {
        Self {
            steps: vec![
                Duration::minutes(3),
                Duration::minutes(15),
                Duration::minutes(30),
            ],
        }
    }
}

impl LearningSteps {
    pub fn parse<S: AsRef<str>>(raw_steps: &[S]) -> Result<Self> {
        let steps = raw_steps
            .iter()
            .map(|s| parse_step_duration(s.as_ref().trim()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Duration> {
        self.steps.get(index).copied()
    }

    /// A card is in learning steps while it has not graduated to `REVIEW` and has fewer
    /// recorded learning-step reviews than there are steps. `LEARNING` is the state a new
    /// card holds between its steps, so it counts as new here.
    pub fn is_in_learning_steps(&self, status: CardStatus, learning_step_count: usize) -> bool {
        matches!(
            status,
            CardStatus::New | CardStatus::Learning | CardStatus::Relearning
        ) && learning_step_count < self.steps.len()
    }

    pub fn transition(&self, rating: Rating, learning_step_count: usize) -> StepOutcome {
        let step_index = match rating {
            Rating::Easy => return StepOutcome::Graduate,
            Rating::Again => 0,
            Rating::Hard | Rating::Good => learning_step_count + 1,
        };

        match self.steps.get(step_index) {
            Some(delay) => StepOutcome::Stay {
                step_index,
                delay: *delay,
            },
            None => StepOutcome::Graduate,
        }
    }

    /// Delay for a learning-step review already on record.
    ///
    /// Falls back to the last configured step when the step list has since shrunk.
    pub fn replay_delay(&self, rating: Rating, prior_learning_steps: usize) -> Option<Duration> {
        match self.transition(rating, prior_learning_steps) {
            StepOutcome::Stay { delay, .. } => Some(delay),
            StepOutcome::Graduate => self.steps.last().copied(),
        }
    }
}

/// Status a card takes while it sits in learning steps.
pub fn learning_status(previous: CardStatus) -> CardStatus {
    match previous {
        CardStatus::Review | CardStatus::Relearning => CardStatus::Relearning,
        CardStatus::New | CardStatus::Learning => CardStatus::Learning,
    }
}
