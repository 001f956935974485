#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use tutor_srs::{
    CardState, CardStatus, Context, CreateGenericCardRequest, CreateVocabularyCardRequest,
    Database,
};
use uuid::Uuid;

/// Content creation time of the first card; later cards follow one minute apart.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub struct Fixture {
    pub db: Database,
    pub student_id: Uuid,
    pub deck_id: Uuid,
    pub vocabulary_cards: Vec<Uuid>,
    pub generic_cards: Vec<Uuid>,
}

/// One student with one assigned deck. Every vocabulary card has audio; the first half
/// also carries an example sentence.
pub async fn fixture(vocabulary: usize, generic: usize) -> Fixture {
    fixture_at("sqlite::memory:", vocabulary, generic).await
}

/// Same as [`fixture`], against the database at `url`.
pub async fn fixture_at(url: &str, vocabulary: usize, generic: usize) -> Fixture {
    let db = Database::new(url).await.unwrap();
    let student = db.create_student("Test Student").await.unwrap();
    let deck = db.create_deck("Test Deck").await.unwrap();

    let mut vocabulary_cards = Vec::new();
    for i in 0..vocabulary {
        let card = db
            .create_vocabulary_card(
                CreateVocabularyCardRequest {
                    deck_id: deck.id,
                    term: format!("word-{}", i),
                    audio_url: Some(format!("word-{}.mp3", i)),
                    example_sentence: (i < vocabulary / 2).then(|| format!("Use word-{} here.", i)),
                },
                base_time() + Duration::minutes(i as i64),
            )
            .await
            .unwrap();
        vocabulary_cards.push(card.id);
    }

    let mut generic_cards = Vec::new();
    for i in 0..generic {
        let card = db
            .create_generic_card(
                CreateGenericCardRequest {
                    deck_id: deck.id,
                    front: format!("front-{}", i),
                    back: format!("back-{}", i),
                },
                base_time() + Duration::minutes(i as i64),
            )
            .await
            .unwrap();
        generic_cards.push(card.id);
    }

    db.assign_deck(student.id, deck.id).await.unwrap();

    Fixture {
        db,
        student_id: student.id,
        deck_id: deck.id,
        vocabulary_cards,
        generic_cards,
    }
}

impl Fixture {
    pub async fn state(&self, context: Context, card_id: Uuid) -> Option<CardState> {
        let store = self.db.context_store(context);
        let mut conn = self.db.pool().acquire().await.unwrap();
        store
            .load_state(&mut conn, self.student_id, card_id)
            .await
            .unwrap()
    }

    pub async fn states(&self, context: Context) -> Vec<CardState> {
        let store = self.db.context_store(context);
        let mut conn = self.db.pool().acquire().await.unwrap();
        store.load_states(&mut conn, self.student_id).await.unwrap()
    }

    pub async fn put_state(&self, context: Context, state: &CardState) {
        let store = self.db.context_store(context);
        let mut conn = self.db.pool().acquire().await.unwrap();
        store.save_state(&mut conn, state).await.unwrap();
    }

    pub async fn learning_steps(&self, context: Context, card_id: Uuid) -> usize {
        let store = self.db.context_store(context);
        let mut conn = self.db.pool().acquire().await.unwrap();
        store
            .count_learning_steps(&mut conn, self.student_id, card_id)
            .await
            .unwrap()
    }

    pub async fn history_len(&self, context: Context) -> usize {
        let store = self.db.context_store(context);
        let mut conn = self.db.pool().acquire().await.unwrap();
        store
            .load_history(&mut conn, self.student_id)
            .await
            .unwrap()
            .len()
    }
}

/// A reviewed card with the given memory, last seen `days_ago` before `now`.
pub fn reviewed(
    student_id: Uuid,
    card_id: Uuid,
    stability: f64,
    days_ago: f64,
    now: DateTime<Utc>,
) -> CardState {
    let last = now - Duration::milliseconds((days_ago * 86_400_000.0) as i64);
    CardState {
        student_id,
        card_id,
        state: CardStatus::Review,
        stability,
        difficulty: 5.0,
        due: last + Duration::days(stability.round() as i64),
        reps: 3,
        lapses: 0,
        last_review: Some(last),
    }
}
