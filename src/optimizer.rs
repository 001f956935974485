//! Per-student re-fit of the memory-model weights from review history.

use chrono::{DateTime, Utc};
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::database::{Database, truncate_to_millis};
use crate::errors::{Result, SchedulerError};
use crate::fsrs_scheduler::{DEFAULT_PARAMETERS, FSRSScheduler, MemoryState, forgetting_curve};
use crate::log_performance;
use crate::models::{Context, FsrsParameters, OptimizationResult, Rating, ReviewHistoryEntry};

/// Lower and upper bound of every weight during fitting.
const WEIGHT_BOUNDS: [(f64, f64); 19] = [
    (0.01, 100.0),
    (0.01, 100.0),
    (0.01, 100.0),
    (0.01, 100.0),
    (1.0, 10.0),
    (0.001, 4.0),
    (0.001, 4.0),
    (0.001, 0.75),
    (0.0, 4.5),
    (0.0, 0.8),
    (0.001, 3.5),
    (0.001, 5.0),
    (0.001, 0.25),
    (0.001, 0.9),
    (0.0, 4.0),
    (0.0, 1.0),
    (1.0, 6.0),
    (0.0, 2.0),
    (0.0, 2.0),
];

const EPOCHS: usize = 60;
const LEARNING_RATE: f64 = 0.04;
const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPSILON: f64 = 1e-8;
const GRADIENT_STEP: f64 = 1e-4;

/// One memory-model review inside a training sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingReview {
    pub rating: Rating,
    /// Whole days since the previous memory-model review of the card, 0 for the first.
    pub delta_t: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSequence {
    pub card_id: Uuid,
    pub reviews: Vec<TrainingReview>,
}

/// Group memory-model reviews per card, in time order, with rounded day gaps.
///
/// Learning-step entries are left out entirely.
pub fn build_training_set(history: &[ReviewHistoryEntry]) -> Vec<TrainingSequence> {
    let mut sorted: Vec<&ReviewHistoryEntry> =
        history.iter().filter(|entry| !entry.is_learning_step).collect();
    sorted.sort_by(|a, b| a.card_id.cmp(&b.card_id).then(a.reviewed_at.cmp(&b.reviewed_at)));

    let mut sequences: Vec<TrainingSequence> = Vec::new();
    let mut previous: Option<&ReviewHistoryEntry> = None;

    for entry in sorted {
        let delta_t = match previous {
            Some(prev) if prev.card_id == entry.card_id => {
                let days = (entry.reviewed_at - prev.reviewed_at).num_milliseconds() as f64
                    / 86_400_000.0;
                days.round().max(0.0) as u32
            }
            _ => {
                sequences.push(TrainingSequence {
                    card_id: entry.card_id,
                    reviews: Vec::new(),
                });
                0
            }
        };

        if let Some(sequence) = sequences.last_mut() {
            sequence.reviews.push(TrainingReview {
                rating: entry.rating,
                delta_t,
            });
        }
        previous = Some(entry);
    }

    sequences
}

pub fn training_data_size(sequences: &[TrainingSequence]) -> usize {
    sequences.iter().map(|s| s.reviews.len()).sum()
}

/// Mean log loss of predicting recall (any rating above "again") at every review that
/// has a predecessor.
pub fn log_loss(weights: &[f64], sequences: &[TrainingSequence]) -> f64 {
    let Ok(scheduler) = FSRSScheduler::with_weights(weights) else {
        return f64::INFINITY;
    };

    let mut total = 0.0;
    let mut samples = 0usize;

    for sequence in sequences {
        let mut memory: Option<MemoryState> = None;
        for review in &sequence.reviews {
            if let Some(current) = memory {
                let predicted =
                    forgetting_curve(review.delta_t as f64, current.stability).clamp(1e-6, 1.0 - 1e-6);
                let recalled = review.rating != Rating::Again;
                total -= if recalled {
                    predicted.ln()
                } else {
                    (1.0 - predicted).ln()
                };
                samples += 1;
            }
            memory = Some(scheduler.step(memory, review.rating, review.delta_t));
        }
    }

    if samples == 0 {
        0.0
    } else {
        total / samples as f64
    }
}

fn clip(weights: &mut [f64]) {
    for (w, (low, high)) in weights.iter_mut().zip(WEIGHT_BOUNDS) {
        *w = w.clamp(low, high);
    }
}

/// Fit weights with Adam on central-difference gradients, starting from the defaults.
///
/// Fully deterministic, so unchanged history always yields the same weights. The best
/// weights seen are returned, never worse than the defaults.
pub fn fit_parameters(sequences: &[TrainingSequence]) -> Vec<f64> {
    let mut weights = DEFAULT_PARAMETERS.to_vec();
    let mut best = weights.clone();
    let mut best_loss = log_loss(&weights, sequences);

    let mut m = vec![0.0; weights.len()];
    let mut v = vec![0.0; weights.len()];

    for epoch in 1..=EPOCHS {
        let mut gradient = vec![0.0; weights.len()];
        for i in 0..weights.len() {
            let mut up = weights.clone();
            let mut down = weights.clone();
            up[i] += GRADIENT_STEP;
            down[i] -= GRADIENT_STEP;
            gradient[i] =
                (log_loss(&up, sequences) - log_loss(&down, sequences)) / (2.0 * GRADIENT_STEP);
            if !gradient[i].is_finite() {
                gradient[i] = 0.0;
            }
        }

        for i in 0..weights.len() {
            m[i] = BETA1 * m[i] + (1.0 - BETA1) * gradient[i];
            v[i] = BETA2 * v[i] + (1.0 - BETA2) * gradient[i] * gradient[i];
            let m_hat = m[i] / (1.0 - BETA1.powi(epoch as i32));
            let v_hat = v[i] / (1.0 - BETA2.powi(epoch as i32));
            weights[i] -= LEARNING_RATE * m_hat / (v_hat.sqrt() + EPSILON);
        }
        clip(&mut weights);

        let loss = log_loss(&weights, sequences);
        if loss < best_loss {
            best_loss = loss;
            best.clone_from(&weights);
        }
    }

    best
}

#[derive(Clone)]
pub struct ParameterOptimizer {
    db: Database,
    config: SchedulerConfig,
}

impl ParameterOptimizer {
    pub fn new(db: Database, config: SchedulerConfig) -> Self {
        Self { db, config }
    }

    /// Re-fit and activate new weights, or skip when history is too thin.
    pub async fn optimize_parameters(
        &self,
        student_id: Uuid,
        context: Context,
        now: DateTime<Utc>,
    ) -> Result<OptimizationResult> {
        let store = self.db.context_store(context);

        let history = {
            let mut conn = self.db.pool().acquire().await?;
            store.load_history(&mut conn, student_id).await?
        };

        let sequences = build_training_set(&history);
        let size = training_data_size(&sequences);

        if size < self.config.optimizer_min_reviews {
            let message = format!(
                "insufficient review history: {} of {} memory-model reviews",
                size, self.config.optimizer_min_reviews
            );
            info!(student_id = %student_id, context = %context, "Optimization skipped: {}", message);
            return Ok(OptimizationResult {
                context,
                message,
                params: None,
                training_data_size: size,
            });
        }

        let start = Instant::now();
        let weights = tokio::task::spawn_blocking(move || fit_parameters(&sequences))
            .await
            .map_err(|e| SchedulerError::Task(e.to_string()))?;
        log_performance!(
            "fit_parameters",
            duration_ms = start.elapsed().as_millis() as u64,
            count = size
        );

        let params = FsrsParameters {
            id: Uuid::new_v4(),
            student_id,
            weights: weights.clone(),
            is_active: true,
            training_data_size: size as i64,
            last_optimized: truncate_to_millis(now),
        };

        let mut tx = self.db.begin_write().await?;
        store.save_params(&mut *tx, &params).await?;
        tx.commit().await?;

        info!(
            student_id = %student_id,
            context = %context,
            training_data_size = size,
            "Parameters optimized"
        );

        Ok(OptimizationResult {
            context,
            message: format!("optimized from {} memory-model reviews", size),
            params: Some(weights),
            training_data_size: size,
        })
    }
}
