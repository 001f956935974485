use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::database::{Database, truncate_to_millis};
use crate::errors::{Result, SchedulerError};
use crate::fsrs_scheduler::FSRSScheduler;
use crate::learning_steps::{LearningSteps, StepOutcome, learning_status};
use crate::models::{CardState, CardStatus, Context, Rating, ReviewHistoryEntry, fractional_days};
use crate::log_review;

/// New card state produced by one rating, and whether it was a learning-step review.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewTransition {
    pub state: CardState,
    pub is_learning_step: bool,
    /// Interval picked by the memory model, absent for learning-step reviews.
    pub interval_days: Option<f64>,
}

/// Whole days since the last review, or zero when the card has no memory yet.
pub fn days_since_last_review(state: &CardState, now: DateTime<Utc>) -> u32 {
    match (state.memory(), state.last_review) {
        (Some(_), Some(last)) => fractional_days(last, now).floor().min(u32::MAX as f64) as u32,
        _ => 0,
    }
}

/// Route one rating through the learning steps or the memory model.
pub fn apply_review(
    current: &CardState,
    rating: Rating,
    learning_step_count: usize,
    steps: &LearningSteps,
    scheduler: &FSRSScheduler,
    desired_retention: f64,
    now: DateTime<Utc>,
) -> ReviewTransition {
    if steps.is_in_learning_steps(current.state, learning_step_count) {
        if let StepOutcome::Stay { delay, .. } = steps.transition(rating, learning_step_count) {
            return ReviewTransition {
                state: apply_learning_step(current, delay, now),
                is_learning_step: true,
                interval_days: None,
            };
        }
    }

    let (state, interval) = apply_memory_review(current, rating, scheduler, desired_retention, now);
    ReviewTransition {
        state,
        is_learning_step: false,
        interval_days: Some(interval),
    }
}

/// Learning-step review: only the phase, due time and last review move.
pub fn apply_learning_step(current: &CardState, delay: Duration, now: DateTime<Utc>) -> CardState {
    CardState {
        state: learning_status(current.state),
        due: now + delay,
        last_review: Some(now),
        ..current.clone()
    }
}

/// Memory-model review. Returns the new state and the chosen interval in days.
pub fn apply_memory_review(
    current: &CardState,
    rating: Rating,
    scheduler: &FSRSScheduler,
    desired_retention: f64,
    now: DateTime<Utc>,
) -> (CardState, f64) {
    let days = days_since_last_review(current, now);
    let next = *scheduler
        .next_states(current.memory(), desired_retention, days)
        .select(rating);

    let lapsed = rating == Rating::Again;
    let state = CardState {
        state: if lapsed {
            CardStatus::Relearning
        } else {
            CardStatus::Review
        },
        stability: next.memory.stability,
        difficulty: next.memory.difficulty,
        due: now + Duration::days(next.interval as i64),
        reps: current.reps + 1,
        lapses: current.lapses + i32::from(lapsed),
        last_review: Some(now),
        ..current.clone()
    };

    (state, next.interval)
}

/// History entry for a review of `previous`.
pub fn history_entry(
    previous: &CardState,
    rating: Rating,
    is_learning_step: bool,
    session_id: Option<Uuid>,
    reviewed_at: DateTime<Utc>,
) -> ReviewHistoryEntry {
    ReviewHistoryEntry {
        id: Uuid::new_v4(),
        student_id: previous.student_id,
        card_id: previous.card_id,
        rating,
        reviewed_at,
        is_learning_step,
        session_id,
        previous_state: previous.state,
        previous_difficulty: previous.difficulty,
        previous_stability: previous.stability,
        previous_due: previous.due,
    }
}

/// Records ratings. Every call is one transaction: one state row updated, one history row
/// appended.
#[derive(Clone)]
pub struct ReviewService {
    db: Database,
    config: SchedulerConfig,
}

impl ReviewService {
    pub fn new(db: Database, config: SchedulerConfig) -> Self {
        Self { db, config }
    }

    pub async fn record_review(
        &self,
        student_id: Uuid,
        card_id: Uuid,
        rating: i32,
        context: Context,
        session_id: Option<Uuid>,
    ) -> Result<CardState> {
        self.record_review_at(student_id, card_id, rating, context, session_id, Utc::now())
            .await
    }

    pub async fn record_review_at(
        &self,
        student_id: Uuid,
        card_id: Uuid,
        rating: i32,
        context: Context,
        session_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<CardState> {
        let result = self
            .record_in_transaction(student_id, card_id, rating, context, session_id, now)
            .await;

        if let Err(error) = &result {
            log_review!(rejected, student_id, card_id, context, error = error);
        }
        result
    }

    async fn record_in_transaction(
        &self,
        student_id: Uuid,
        card_id: Uuid,
        rating: i32,
        context: Context,
        session_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<CardState> {
        let rating = Rating::try_from(rating)?;
        let now = truncate_to_millis(now);
        let store = self.db.context_store(context);

        let mut tx = self.db.begin_write().await?;

        let current = store
            .load_state(&mut *tx, student_id, card_id)
            .await?
            .ok_or(SchedulerError::MissingInitialState {
                student_id,
                card_id,
                context,
            })?;

        if current.last_review.is_some_and(|last| last > now) {
            return Err(SchedulerError::InvalidPayload(format!(
                "review at {} precedes the last review of card {}",
                now, card_id
            )));
        }

        let learning_step_count = store.count_learning_steps(&mut *tx, student_id, card_id).await?;
        let scheduler = match store.load_params(&mut *tx, student_id).await? {
            Some(params) => FSRSScheduler::with_weights(&params.weights)?,
            None => FSRSScheduler::new(),
        };

        let transition = apply_review(
            &current,
            rating,
            learning_step_count,
            &self.config.learning_steps,
            &scheduler,
            self.config.desired_retention,
            now,
        );

        store.save_state(&mut *tx, &transition.state).await?;
        store
            .append_history(
                &mut *tx,
                &history_entry(&current, rating, transition.is_learning_step, session_id, now),
            )
            .await?;

        tx.commit().await?;

        match transition.interval_days {
            Some(interval) => {
                log_review!(
                    memory_model,
                    student_id,
                    card_id,
                    context,
                    rating = rating.as_i32(),
                    interval_days = interval
                );
            }
            None => {
                log_review!(
                    learning_step,
                    student_id,
                    card_id,
                    context,
                    rating = rating.as_i32(),
                    step = learning_step_count
                );
            }
        }

        Ok(transition.state)
    }
}
