mod common;

use chrono::{DateTime, Duration, TimeZone, Utc};
use common::{Fixture, fixture};
use serde_json::json;
use tutor_srs::jobs::{OptimizeJobResult, RebuildJobResult};
use tutor_srs::{
    CardStatus, Context, JobOutcome, JobRunner, ParameterOptimizer, Rating, ReviewHistoryEntry,
    SchedulerConfig, StudentStatus,
};
use uuid::Uuid;

fn history_entry(
    fx: &Fixture,
    card_id: Uuid,
    rating: Rating,
    at: DateTime<Utc>,
    is_learning_step: bool,
) -> ReviewHistoryEntry {
    ReviewHistoryEntry {
        id: Uuid::new_v4(),
        student_id: fx.student_id,
        card_id,
        rating,
        reviewed_at: at,
        is_learning_step,
        session_id: None,
        previous_state: if is_learning_step {
            CardStatus::Learning
        } else {
            CardStatus::Review
        },
        previous_difficulty: 5.0,
        previous_stability: 3.0,
        previous_due: at,
    }
}

/// Ten memory-model reviews per card, a few days apart, plus one learning-step entry
/// before each card's first review.
async fn seed_history(fx: &Fixture, context: Context, memory_reviews: usize) {
    let store = fx.db.context_store(context);
    let mut conn = fx.db.pool().acquire().await.unwrap();
    let start = Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap();

    for (i, card) in fx.vocabulary_cards.iter().enumerate() {
        let mut at = start + Duration::hours(i as i64);
        store
            .append_history(&mut conn, &history_entry(fx, *card, Rating::Again, at, true))
            .await
            .unwrap();

        for j in 0..10 {
            if i * 10 + j >= memory_reviews {
                return;
            }
            at += Duration::days(1 + (j as i64 % 4) * 2);
            let rating = match (i + j) % 7 {
                0 => Rating::Again,
                1 => Rating::Hard,
                6 => Rating::Easy,
                _ => Rating::Good,
            };
            store
                .append_history(&mut conn, &history_entry(fx, *card, rating, at, false))
                .await
                .unwrap();
        }
    }
}

async fn active_params(fx: &Fixture, context: Context) -> Option<tutor_srs::FsrsParameters> {
    let store = fx.db.context_store(context);
    let mut conn = fx.db.pool().acquire().await.unwrap();
    store.load_params(&mut conn, fx.student_id).await.unwrap()
}

fn assert_weights_close(stored: &[f64], fitted: &[f64]) {
    assert_eq!(stored.len(), 19);
    assert_eq!(stored.len(), fitted.len());
    for (a, b) in stored.iter().zip(fitted) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }
}

#[tokio::test]
async fn test_optimization_skipped_below_threshold() {
    let fx = fixture(5, 0).await;
    seed_history(&fx, Context::Vocabulary, 49).await;

    let optimizer = ParameterOptimizer::new(fx.db.clone(), SchedulerConfig::default());
    let result = optimizer
        .optimize_parameters(fx.student_id, Context::Vocabulary, Utc::now())
        .await
        .unwrap();

    assert!(result.was_skipped());
    assert_eq!(result.training_data_size, 49);
    assert!(result.message.contains("49 of 50"));
    assert!(active_params(&fx, Context::Vocabulary).await.is_none());
}

#[tokio::test]
async fn test_optimization_saves_active_parameters() {
    let fx = fixture(5, 0).await;
    seed_history(&fx, Context::Vocabulary, 50).await;
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

    let optimizer = ParameterOptimizer::new(fx.db.clone(), SchedulerConfig::default());
    let result = optimizer
        .optimize_parameters(fx.student_id, Context::Vocabulary, now)
        .await
        .unwrap();

    assert!(!result.was_skipped());
    assert_eq!(result.training_data_size, 50);

    let params = active_params(&fx, Context::Vocabulary).await.unwrap();
    assert!(params.is_active);
    assert_eq!(params.training_data_size, 50);
    assert_eq!(params.last_optimized, now);
    assert_weights_close(&params.weights, &result.params.unwrap());

    // Other contexts keep their defaults.
    assert!(active_params(&fx, Context::Listening).await.is_none());
}

#[tokio::test]
async fn test_reoptimizing_same_history_gives_same_weights() {
    let fx = fixture(5, 0).await;
    seed_history(&fx, Context::Generic, 50).await;

    let optimizer = ParameterOptimizer::new(fx.db.clone(), SchedulerConfig::default());
    let first = optimizer
        .optimize_parameters(fx.student_id, Context::Generic, Utc::now())
        .await
        .unwrap();
    let second = optimizer
        .optimize_parameters(fx.student_id, Context::Generic, Utc::now())
        .await
        .unwrap();

    assert_eq!(first.params, second.params);
    let params = active_params(&fx, Context::Generic).await.unwrap();
    assert_weights_close(&params.weights, &second.params.unwrap());
}

#[tokio::test]
async fn test_optimize_job_reports_each_context() {
    let fx = fixture(5, 0).await;
    seed_history(&fx, Context::Vocabulary, 50).await;

    let runner = JobRunner::new(fx.db.clone(), SchedulerConfig::default());
    let outcome = runner
        .run(
            "optimize_parameters",
            json!({ "student_id": fx.student_id }),
        )
        .await;

    let JobOutcome::Completed { result } = outcome else {
        panic!("expected completed job, got {:?}", outcome);
    };
    let result: OptimizeJobResult = serde_json::from_value(result).unwrap();
    assert_eq!(result.results.len(), 3);
    assert!(!result.results[0].was_skipped());
    assert!(result.results[1].was_skipped());
    assert!(result.message.starts_with("vocabulary: optimized from 50"));
}

#[tokio::test]
async fn test_rebuild_job_counts_cards() {
    let fx = fixture(4, 2).await;
    let runner = JobRunner::new(fx.db.clone(), SchedulerConfig::default());

    let outcome = runner
        .run(
            "rebuild_cache",
            json!({ "student_id": fx.student_id, "context": "generic" }),
        )
        .await;

    let JobOutcome::Completed { result } = outcome else {
        panic!("expected completed job, got {:?}", outcome);
    };
    let result: RebuildJobResult = serde_json::from_value(result).unwrap();
    assert_eq!(result.cards_rebuilt, 2);
    assert_eq!(result.results.len(), 1);
}

#[tokio::test]
async fn test_archived_student_is_skipped() {
    let fx = fixture(5, 0).await;
    seed_history(&fx, Context::Vocabulary, 50).await;
    fx.db
        .set_student_status(fx.student_id, StudentStatus::Archived)
        .await
        .unwrap();

    let runner = JobRunner::new(fx.db.clone(), SchedulerConfig::default());
    let outcome = runner
        .run(
            "optimize_parameters",
            json!({ "student_id": fx.student_id }),
        )
        .await;

    match outcome {
        JobOutcome::Skipped { reason } => assert!(reason.contains("archived")),
        other => panic!("expected skipped job, got {:?}", other),
    }
    assert!(active_params(&fx, Context::Vocabulary).await.is_none());
}

#[tokio::test]
async fn test_bad_payload_fails_job() {
    let fx = fixture(1, 0).await;
    let runner = JobRunner::new(fx.db.clone(), SchedulerConfig::default());

    let outcome = runner
        .run("rebuild_cache", json!({ "student": fx.student_id }))
        .await;

    assert!(matches!(outcome, JobOutcome::Failed { .. }));
}
