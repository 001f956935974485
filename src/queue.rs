use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::{Database, truncate_to_millis};
use crate::errors::Result;
use crate::log_performance;
use crate::models::{
    Candidate, CandidateConfig, CandidateSelection, CandidateWarnings, CardState, Context,
    QueueConfig, ReviewQueue,
};

/// First instant of the UTC day after `now`.
pub fn end_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .succ_opt()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now + Duration::days(1))
}

/// Rank eligible cards and attach the advisory warnings.
///
/// `eligible` holds every card that passed the vocabulary threshold; ordering is by
/// vocabulary retrievability, highest first.
pub fn select_candidates(mut eligible: Vec<Candidate>, count: usize) -> CandidateSelection {
    eligible.sort_by(|a, b| {
        b.vocabulary_retrievability
            .partial_cmp(&a.vocabulary_retrievability)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.card_id.cmp(&b.card_id))
    });

    let recommended_max_cards = eligible.iter().filter(|c| c.listening_ready).count();
    eligible.truncate(count);
    let suboptimal_candidates = eligible.iter().filter(|c| !c.listening_ready).count();

    let warnings = (suboptimal_candidates > 0).then_some(CandidateWarnings {
        suboptimal_candidates,
        recommended_max_cards,
    });

    CandidateSelection {
        candidates: eligible,
        warnings,
    }
}

/// Builds session queues and cross-context candidate lists. Reads only, outside any
/// transaction.
#[derive(Clone)]
pub struct QueueService {
    db: Database,
}

impl QueueService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get_initial_review_queue(
        &self,
        student_id: Uuid,
        context: Context,
        config: QueueConfig,
        now: DateTime<Utc>,
    ) -> Result<ReviewQueue> {
        let start = Instant::now();
        let now = truncate_to_millis(now);
        let store = self.db.context_store(context);
        let mut conn = self.db.pool().acquire().await?;

        let mut due_items = store
            .due_states(&mut conn, student_id, now, config.max_due)
            .await?;

        if due_items.len() < config.min_due {
            // Only cards due after `now` qualify, so nothing already selected comes back.
            let backfill = store
                .upcoming_states(
                    &mut conn,
                    student_id,
                    now,
                    end_of_day(now),
                    config.min_due - due_items.len(),
                )
                .await?;
            due_items.extend(backfill);
        }

        let new_items = store
            .new_states(&mut conn, student_id, config.new_cards)
            .await?;

        let queue = ReviewQueue {
            due_items,
            new_items,
        };

        info!(
            student_id = %student_id,
            context = %context,
            due = queue.due_items.len(),
            new = queue.new_items.len(),
            "Review queue assembled"
        );
        log_performance!(
            "get_initial_review_queue",
            duration_ms = start.elapsed().as_millis() as u64,
            count = queue.len()
        );

        Ok(queue)
    }

    /// Vocabulary cards of a deck that are well enough known to be drilled by ear.
    pub async fn get_listening_candidates_from_vocabulary(
        &self,
        student_id: Uuid,
        deck_id: Uuid,
        config: CandidateConfig,
        now: DateTime<Utc>,
    ) -> Result<CandidateSelection> {
        let start = Instant::now();
        let vocabulary = self.db.context_store(Context::Vocabulary);
        let listening = self.db.context_store(Context::Listening);
        let mut conn = self.db.pool().acquire().await?;

        let vocabulary_states = vocabulary.states_in_deck(&mut conn, student_id, deck_id).await?;
        // Only cards with audio have a listening row.
        let listening_states: HashMap<Uuid, CardState> = listening
            .states_in_deck(&mut conn, student_id, deck_id)
            .await?
            .into_iter()
            .map(|state| (state.card_id, state))
            .collect();

        let eligible: Vec<Candidate> = vocabulary_states
            .iter()
            .filter_map(|state| {
                let vocabulary_retrievability = state.retrievability_at(now)?;
                if vocabulary_retrievability < config.vocabulary_confidence_threshold {
                    return None;
                }
                let listening_state = listening_states.get(&state.card_id)?;
                let listening_retrievability = listening_state.retrievability_at(now);

                Some(Candidate {
                    card_id: state.card_id,
                    vocabulary_retrievability,
                    listening_retrievability,
                    listening_ready: listening_retrievability
                        .is_some_and(|r| r > config.listening_candidate_threshold),
                })
            })
            .collect();

        let selection = select_candidates(eligible, config.count);

        if let Some(warnings) = &selection.warnings {
            warn!(
                student_id = %student_id,
                deck_id = %deck_id,
                suboptimal_candidates = warnings.suboptimal_candidates,
                recommended_max_cards = warnings.recommended_max_cards,
                "Listening candidates include cards not yet ready for listening"
            );
        }
        log_performance!(
            "get_listening_candidates_from_vocabulary",
            duration_ms = start.elapsed().as_millis() as u64,
            count = selection.candidates.len()
        );

        Ok(selection)
    }

    /// Vocabulary cards with an example sentence that pass the vocabulary threshold.
    ///
    /// Fill-in-blank only depends on vocabulary mastery, so the listening fields stay
    /// empty and no warnings are produced.
    pub async fn get_fill_in_blank_candidates(
        &self,
        student_id: Uuid,
        deck_id: Uuid,
        config: CandidateConfig,
        now: DateTime<Utc>,
    ) -> Result<CandidateSelection> {
        let with_sentence: HashSet<Uuid> = self
            .db
            .cards_with_example_sentence(deck_id)
            .await?
            .into_iter()
            .collect();

        let vocabulary = self.db.context_store(Context::Vocabulary);
        let mut conn = self.db.pool().acquire().await?;
        let states = vocabulary.states_in_deck(&mut conn, student_id, deck_id).await?;

        let mut candidates: Vec<Candidate> = states
            .iter()
            .filter(|state| with_sentence.contains(&state.card_id))
            .filter_map(|state| {
                let r = state.retrievability_at(now)?;
                (r >= config.vocabulary_confidence_threshold).then_some(Candidate {
                    card_id: state.card_id,
                    vocabulary_retrievability: r,
                    listening_retrievability: None,
                    listening_ready: false,
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.vocabulary_retrievability
                .partial_cmp(&a.vocabulary_retrievability)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.card_id.cmp(&b.card_id))
        });
        candidates.truncate(config.count);

        info!(
            student_id = %student_id,
            deck_id = %deck_id,
            count = candidates.len(),
            "Fill-in-blank candidates selected"
        );

        Ok(CandidateSelection {
            candidates,
            warnings: None,
        })
    }
}
