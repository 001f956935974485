mod common;

use chrono::{Duration, TimeZone, Utc};
use common::{fixture, fixture_at, reviewed};
use tempfile::TempDir;
use tutor_srs::{
    CardStatus, Context, FSRSScheduler, ReviewService, SchedulerConfig, SchedulerError,
    UNSEEN_STABILITY,
    fsrs_scheduler::MemoryState,
};
use uuid::Uuid;

fn service(fx: &common::Fixture) -> ReviewService {
    ReviewService::new(fx.db.clone(), SchedulerConfig::default())
}

#[tokio::test]
async fn test_again_on_new_card_enters_first_step() {
    let fx = fixture(1, 0).await;
    let card = fx.vocabulary_cards[0];
    let now = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();

    let state = service(&fx)
        .record_review_at(fx.student_id, card, 1, Context::Vocabulary, None, now)
        .await
        .unwrap();

    assert_eq!(state.state, CardStatus::Learning);
    assert_eq!(state.due, now + Duration::minutes(3));
    assert_eq!(state.reps, 0);
    assert_eq!(fx.learning_steps(Context::Vocabulary, card).await, 1);
    assert_eq!(fx.history_len(Context::Vocabulary).await, 1);
    assert_eq!(fx.state(Context::Vocabulary, card).await, Some(state));
}

#[tokio::test]
async fn test_easy_on_new_card_graduates_immediately() {
    let fx = fixture(1, 0).await;
    let card = fx.vocabulary_cards[0];
    let now = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();

    let state = service(&fx)
        .record_review_at(fx.student_id, card, 4, Context::Vocabulary, None, now)
        .await
        .unwrap();

    let expected = FSRSScheduler::new().next_states(None, 0.9, 0).easy;
    assert_eq!(state.state, CardStatus::Review);
    assert_eq!(state.reps, 1);
    assert!(state.stability > 0.0);
    assert_eq!(state.stability, expected.memory.stability);
    assert_eq!(state.due, now + Duration::days(expected.interval as i64));
    assert_eq!(fx.learning_steps(Context::Vocabulary, card).await, 0);
    assert_eq!(fx.history_len(Context::Vocabulary).await, 1);
}

#[tokio::test]
async fn test_hard_mid_steps_advances_to_last_step() {
    let fx = fixture(1, 0).await;
    let card = fx.vocabulary_cards[0];
    let service = service(&fx);
    let start = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();

    service
        .record_review_at(fx.student_id, card, 1, Context::Vocabulary, None, start)
        .await
        .unwrap();

    let now = start + Duration::minutes(3);
    let state = service
        .record_review_at(fx.student_id, card, 2, Context::Vocabulary, None, now)
        .await
        .unwrap();

    assert_eq!(state.state, CardStatus::Learning);
    assert_eq!(state.due, now + Duration::minutes(30));
    assert_eq!(fx.learning_steps(Context::Vocabulary, card).await, 2);
    // Still no memory: steps leave stability at the unseen marker.
    assert_eq!(state.stability, UNSEEN_STABILITY);
    assert!(state.memory().is_none());
}

#[tokio::test]
async fn test_good_on_review_card_uses_memory_model() {
    let fx = fixture(1, 0).await;
    let card = fx.vocabulary_cards[0];
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let before = reviewed(fx.student_id, card, 10.0, 10.0, now);
    fx.put_state(Context::Vocabulary, &before).await;

    let r = before.retrievability_at(now).unwrap();
    assert!((r - 0.37).abs() < 0.01);

    let state = service(&fx)
        .record_review_at(fx.student_id, card, 3, Context::Vocabulary, None, now)
        .await
        .unwrap();

    let expected = FSRSScheduler::new()
        .next_states(
            Some(MemoryState {
                stability: 10.0,
                difficulty: 5.0,
            }),
            0.9,
            10,
        )
        .good;
    assert_eq!(state.state, CardStatus::Review);
    assert_eq!(state.reps, before.reps + 1);
    assert_eq!(state.lapses, 0);
    assert_eq!(state.stability, expected.memory.stability);
    assert_eq!(state.due, now + Duration::days(expected.interval as i64));
}

#[tokio::test]
async fn test_lapse_counts_and_relearns() {
    let fx = fixture(1, 0).await;
    let card = fx.vocabulary_cards[0];
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    fx.put_state(Context::Vocabulary, &reviewed(fx.student_id, card, 10.0, 12.0, now))
        .await;

    let state = service(&fx)
        .record_review_at(fx.student_id, card, 1, Context::Vocabulary, None, now)
        .await
        .unwrap();

    assert_eq!(state.state, CardStatus::Relearning);
    assert_eq!(state.lapses, 1);
    assert_eq!(state.reps, 4);
}

#[tokio::test]
async fn test_learning_step_entries_are_bounded() {
    let fx = fixture(1, 0).await;
    let card = fx.vocabulary_cards[0];
    let service = service(&fx);
    let mut now = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();

    for _ in 0..10 {
        service
            .record_review_at(fx.student_id, card, 1, Context::Vocabulary, None, now)
            .await
            .unwrap();
        now += Duration::minutes(5);
    }

    assert_eq!(fx.learning_steps(Context::Vocabulary, card).await, 3);
    assert_eq!(fx.history_len(Context::Vocabulary).await, 10);
}

#[tokio::test]
async fn test_missing_state_is_an_integrity_error() {
    let fx = fixture(1, 0).await;

    let result = service(&fx)
        .record_review(fx.student_id, Uuid::new_v4(), 3, Context::Vocabulary, None)
        .await;

    match result {
        Err(err @ SchedulerError::MissingInitialState { .. }) => {
            assert!(err.to_string().contains("card has no initial state"));
        }
        other => panic!("expected integrity error, got {:?}", other),
    }
    assert_eq!(fx.history_len(Context::Vocabulary).await, 0);
}

#[tokio::test]
async fn test_invalid_rating_writes_nothing() {
    let fx = fixture(1, 0).await;
    let card = fx.vocabulary_cards[0];
    let before = fx.state(Context::Vocabulary, card).await;

    for rating in [0, 5, -1] {
        let result = service(&fx)
            .record_review(fx.student_id, card, rating, Context::Vocabulary, None)
            .await;
        assert!(matches!(result, Err(SchedulerError::InvalidRating(r)) if r == rating));
    }

    assert_eq!(fx.state(Context::Vocabulary, card).await, before);
    assert_eq!(fx.history_len(Context::Vocabulary).await, 0);
}

#[tokio::test]
async fn test_contexts_are_scheduled_independently() {
    let fx = fixture(1, 0).await;
    let card = fx.vocabulary_cards[0];
    let now = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();

    service(&fx)
        .record_review_at(fx.student_id, card, 4, Context::Vocabulary, None, now)
        .await
        .unwrap();

    let listening = fx.state(Context::Listening, card).await.unwrap();
    assert_eq!(listening.state, CardStatus::New);
    assert_eq!(fx.history_len(Context::Listening).await, 0);
}

#[tokio::test]
async fn test_generic_cards_follow_same_rules() {
    let fx = fixture(0, 1).await;
    let card = fx.generic_cards[0];
    let now = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();

    let state = service(&fx)
        .record_review_at(fx.student_id, card, 3, Context::Generic, None, now)
        .await
        .unwrap();

    assert_eq!(state.state, CardStatus::Learning);
    assert_eq!(state.due, now + Duration::minutes(15));
}

/// File-backed database, so several pooled connections write at once.
async fn file_fixture(dir: &TempDir, vocabulary: usize) -> common::Fixture {
    let url = format!("sqlite:{}", dir.path().join("tutor_srs.db").display());
    fixture_at(&url, vocabulary, 0).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ratings_on_different_cards_all_recorded() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let fx = file_fixture(&dir, 8).await;
    let service = service(&fx);
    let now = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();

    let handles: Vec<_> = fx
        .vocabulary_cards
        .iter()
        .map(|card| {
            let service = service.clone();
            let (student_id, card) = (fx.student_id, *card);
            tokio::spawn(async move {
                service
                    .record_review_at(student_id, card, 3, Context::Vocabulary, None, now)
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(fx.history_len(Context::Vocabulary).await, 8);
    for card in &fx.vocabulary_cards {
        let state = fx.state(Context::Vocabulary, *card).await.unwrap();
        assert_eq!(state.state, CardStatus::Learning);
        assert_eq!(fx.learning_steps(Context::Vocabulary, *card).await, 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ratings_on_one_card_are_serialized() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let fx = file_fixture(&dir, 1).await;
    let card = fx.vocabulary_cards[0];
    let service = service(&fx);
    let now = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            let student_id = fx.student_id;
            tokio::spawn(async move {
                service
                    .record_review_at(student_id, card, 3, Context::Vocabulary, None, now)
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Two learning steps, a graduation, then five more memory-model reviews: no rating
    // was applied to a stale state.
    assert_eq!(fx.history_len(Context::Vocabulary).await, 8);
    assert_eq!(fx.learning_steps(Context::Vocabulary, card).await, 2);
    let state = fx.state(Context::Vocabulary, card).await.unwrap();
    assert_eq!(state.state, CardStatus::Review);
    assert_eq!(state.reps, 6);
}
