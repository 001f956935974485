use chrono::Duration;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::database::Database;
use crate::errors::Result;
use crate::fsrs_scheduler::FSRSScheduler;
use crate::learning_steps::LearningSteps;
use crate::log_performance;
use crate::models::{CardState, Context, RebuildResult, ReviewHistoryEntry};
use crate::review_service::{apply_learning_step, apply_memory_review};

/// Replay one card's history, oldest first, from its unseen state.
///
/// Uses the same transitions as the review recorder, so the result matches what the
/// recorded reviews produced as long as the parameters have not changed since.
pub fn replay_card(
    initial: CardState,
    entries: &[ReviewHistoryEntry],
    steps: &LearningSteps,
    scheduler: &FSRSScheduler,
    desired_retention: f64,
) -> CardState {
    let mut state = initial;
    let mut learning_steps_seen = 0;

    for entry in entries {
        state = if entry.is_learning_step {
            let delay = steps
                .replay_delay(entry.rating, learning_steps_seen)
                .unwrap_or_else(Duration::zero);
            learning_steps_seen += 1;
            apply_learning_step(&state, delay, entry.reviewed_at)
        } else {
            apply_memory_review(&state, entry.rating, scheduler, desired_retention, entry.reviewed_at).0
        };
    }

    state
}

/// Rebuilds a student's card states of one context from review history.
#[derive(Clone)]
pub struct CacheRebuilder {
    db: Database,
    config: SchedulerConfig,
}

impl CacheRebuilder {
    pub fn new(db: Database, config: SchedulerConfig) -> Self {
        Self { db, config }
    }

    /// Replace every state row of the student in one transaction.
    pub async fn rebuild_cache(&self, student_id: Uuid, context: Context) -> Result<RebuildResult> {
        let start = Instant::now();
        let store = self.db.context_store(context);
        let mut tx = self.db.begin_write().await?;

        let history = store.load_history(&mut *tx, student_id).await?;
        let assigned = store.assigned_cards(&mut *tx, student_id).await?;
        let scheduler = match store.load_params(&mut *tx, student_id).await? {
            Some(params) => FSRSScheduler::with_weights(&params.weights)?,
            None => FSRSScheduler::new(),
        };

        let mut by_card: BTreeMap<Uuid, Vec<ReviewHistoryEntry>> = BTreeMap::new();
        for entry in history {
            by_card.entry(entry.card_id).or_default().push(entry);
        }

        let mut states: BTreeMap<Uuid, CardState> = BTreeMap::new();
        for (card_id, created_at) in assigned {
            states.insert(card_id, CardState::new_card(student_id, card_id, created_at));
        }

        for (card_id, entries) in &by_card {
            let Some(first) = entries.first() else {
                continue;
            };
            // The first review saw the card unseen, with its original due time.
            let initial = CardState::new_card(student_id, *card_id, first.previous_due);
            let rebuilt = replay_card(
                initial,
                entries,
                &self.config.learning_steps,
                &scheduler,
                self.config.desired_retention,
            );
            states.insert(*card_id, rebuilt);
        }

        let states: Vec<CardState> = states.into_values().collect();
        store.replace_states(&mut *tx, student_id, &states).await?;
        tx.commit().await?;

        info!(
            student_id = %student_id,
            context = %context,
            cards_rebuilt = states.len(),
            cards_with_history = by_card.len(),
            "Card state cache rebuilt"
        );
        log_performance!(
            "rebuild_cache",
            duration_ms = start.elapsed().as_millis() as u64,
            count = states.len()
        );

        Ok(RebuildResult {
            context,
            cards_rebuilt: states.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CardStatus, Rating};
    use crate::review_service::{apply_review, history_entry};
    use chrono::{DateTime, Utc};

    /// Feed ratings through the recorder's transition and collect the history it writes.
    fn record(
        initial: &CardState,
        ratings: &[(Rating, Duration)],
        start: DateTime<Utc>,
    ) -> (CardState, Vec<ReviewHistoryEntry>) {
        let steps = LearningSteps::default();
        let scheduler = FSRSScheduler::new();
        let mut state = initial.clone();
        let mut history = Vec::new();
        let mut now = start;
        let mut learning = 0;

        for (rating, gap) in ratings {
            now += *gap;
            let transition = apply_review(&state, *rating, learning, &steps, &scheduler, 0.9, now);
            history.push(history_entry(&state, *rating, transition.is_learning_step, None, now));
            if transition.is_learning_step {
                learning += 1;
            }
            state = transition.state;
        }
        (state, history)
    }

    #[test]
    fn test_replay_matches_incremental_updates() {
        let start = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let initial = CardState::new_card(Uuid::new_v4(), Uuid::new_v4(), start);
        let ratings = [
            (Rating::Again, Duration::zero()),
            (Rating::Good, Duration::minutes(3)),
            (Rating::Good, Duration::minutes(15)),
            (Rating::Good, Duration::minutes(30)),
            (Rating::Good, Duration::days(3)),
            (Rating::Again, Duration::days(9)),
            (Rating::Hard, Duration::minutes(10)),
            (Rating::Easy, Duration::days(2)),
        ];

        let (incremental, history) = record(&initial, &ratings, start);
        let replayed = replay_card(
            initial,
            &history,
            &LearningSteps::default(),
            &FSRSScheduler::new(),
            0.9,
        );

        assert_eq!(replayed, incremental);
        assert_eq!(history.iter().filter(|e| e.is_learning_step).count(), 2);
    }

    #[test]
    fn test_replay_of_card_still_in_steps() {
        let start = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let initial = CardState::new_card(Uuid::new_v4(), Uuid::new_v4(), start);
        let ratings = [
            (Rating::Good, Duration::zero()),
            (Rating::Again, Duration::minutes(15)),
        ];

        let (incremental, history) = record(&initial, &ratings, start);
        let replayed = replay_card(
            initial,
            &history,
            &LearningSteps::default(),
            &FSRSScheduler::new(),
            0.9,
        );

        assert_eq!(replayed, incremental);
        assert_eq!(replayed.state, CardStatus::Learning);
        assert_eq!(replayed.reps, 0);
    }

    #[test]
    fn test_replay_without_history_keeps_new_state() {
        let start = Utc::now();
        let initial = CardState::new_card(Uuid::new_v4(), Uuid::new_v4(), start);
        let replayed = replay_card(
            initial.clone(),
            &[],
            &LearningSteps::default(),
            &FSRSScheduler::new(),
            0.9,
        );
        assert_eq!(replayed, initial);
    }
}
