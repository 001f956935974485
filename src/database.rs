use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::context::{self, ContextStore, Generic, Listening, SqliteContextStore, Vocabulary};
use crate::errors::Result;
use crate::log_db_operation;
use crate::models::*;

/// Fixed-width UTC text so that string order equals time order in SQL.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

/// Drop sub-millisecond precision so in-memory values match what is stored.
pub fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // Every connection to `sqlite::memory:` opens a separate database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let db = Database { pool };
        db.migrate().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Transaction that takes SQLite's write lock up front.
    ///
    /// A deferred transaction that reads before writing cannot wait for a concurrent
    /// writer: its lock upgrade fails with SQLITE_BUSY at once. Starting with
    /// `BEGIN IMMEDIATE` makes concurrent writers queue on the busy timeout instead.
    pub async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    /// Store for the given context. The three stores never share rows.
    pub fn context_store(&self, context: Context) -> Arc<dyn ContextStore> {
        match context {
            Context::Vocabulary => Arc::new(SqliteContextStore::<Vocabulary>::new()),
            Context::Listening => Arc::new(SqliteContextStore::<Listening>::new()),
            Context::Generic => Arc::new(SqliteContextStore::<Generic>::new()),
        }
    }

    async fn migrate(&self) -> Result<()> {
        let start = Instant::now();

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS students (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'ACTIVE'
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS decks (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vocabulary_cards (
                id TEXT PRIMARY KEY,
                deck_id TEXT NOT NULL,
                term TEXT NOT NULL,
                audio_url TEXT,
                example_sentence TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (deck_id) REFERENCES decks(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS generic_cards (
                id TEXT PRIMARY KEY,
                deck_id TEXT NOT NULL,
                front TEXT NOT NULL,
                back TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (deck_id) REFERENCES decks(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS student_decks (
                student_id TEXT NOT NULL,
                deck_id TEXT NOT NULL,
                PRIMARY KEY (student_id, deck_id),
                FOREIGN KEY (student_id) REFERENCES students(id) ON DELETE CASCADE,
                FOREIGN KEY (deck_id) REFERENCES decks(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        context::create_tables::<Vocabulary>(&self.pool).await?;
        context::create_tables::<Listening>(&self.pool).await?;
        context::create_tables::<Generic>(&self.pool).await?;

        log_db_operation!(
            debug,
            "migrate",
            count = 5 + 3 * Context::ALL.len(),
            duration_ms = start.elapsed().as_millis() as u64
        );
        Ok(())
    }

    // Student operations

    pub async fn create_student(&self, name: &str) -> Result<Student> {
        let student = Student {
            id: Uuid::new_v4(),
            name: name.to_string(),
            status: StudentStatus::Active,
        };

        sqlx::query("INSERT INTO students (id, name, status) VALUES (?1, ?2, ?3)")
            .bind(student.id.to_string())
            .bind(&student.name)
            .bind(student.status.as_str())
            .execute(&self.pool)
            .await?;

        Ok(student)
    }

    pub async fn set_student_status(&self, student_id: Uuid, status: StudentStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE students SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(student_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_student_status(&self, student_id: Uuid) -> Result<Option<StudentStatus>> {
        let row = sqlx::query("SELECT status FROM students WHERE id = ?1")
            .bind(student_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get::<String, _>("status")?.parse()?)),
            None => Ok(None),
        }
    }

    // Content operations

    pub async fn create_deck(&self, name: &str) -> Result<Deck> {
        let deck = Deck {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };

        sqlx::query("INSERT INTO decks (id, name) VALUES (?1, ?2)")
            .bind(deck.id.to_string())
            .bind(&deck.name)
            .execute(&self.pool)
            .await?;

        Ok(deck)
    }

    pub async fn create_vocabulary_card(
        &self,
        request: CreateVocabularyCardRequest,
        created_at: DateTime<Utc>,
    ) -> Result<VocabularyCard> {
        let card = VocabularyCard {
            id: Uuid::new_v4(),
            deck_id: request.deck_id,
            term: request.term,
            audio_url: request.audio_url,
            example_sentence: request.example_sentence,
            created_at: truncate_to_millis(created_at),
        };

        sqlx::query(
            r#"
            INSERT INTO vocabulary_cards (id, deck_id, term, audio_url, example_sentence, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(card.id.to_string())
        .bind(card.deck_id.to_string())
        .bind(&card.term)
        .bind(&card.audio_url)
        .bind(&card.example_sentence)
        .bind(format_timestamp(card.created_at))
        .execute(&self.pool)
        .await?;

        Ok(card)
    }

    pub async fn create_generic_card(
        &self,
        request: CreateGenericCardRequest,
        created_at: DateTime<Utc>,
    ) -> Result<GenericCard> {
        let card = GenericCard {
            id: Uuid::new_v4(),
            deck_id: request.deck_id,
            front: request.front,
            back: request.back,
            created_at: truncate_to_millis(created_at),
        };

        sqlx::query(
            r#"
            INSERT INTO generic_cards (id, deck_id, front, back, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(card.id.to_string())
        .bind(card.deck_id.to_string())
        .bind(&card.front)
        .bind(&card.back)
        .bind(format_timestamp(card.created_at))
        .execute(&self.pool)
        .await?;

        Ok(card)
    }

    /// Vocabulary cards in a deck that carry an example sentence.
    pub async fn cards_with_example_sentence(&self, deck_id: Uuid) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT id FROM vocabulary_cards WHERE deck_id = ?1 AND example_sentence IS NOT NULL",
        )
        .bind(deck_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok(Uuid::parse_str(&row.try_get::<String, _>("id")?)?))
            .collect()
    }

    /// Assign a deck and create NEW states for every card the contexts accept.
    ///
    /// Existing states are left untouched, so assigning twice is harmless.
    pub async fn assign_deck(&self, student_id: Uuid, deck_id: Uuid) -> Result<usize> {
        let mut tx = self.begin_write().await?;

        sqlx::query("INSERT OR IGNORE INTO student_decks (student_id, deck_id) VALUES (?1, ?2)")
            .bind(student_id.to_string())
            .bind(deck_id.to_string())
            .execute(&mut *tx)
            .await?;

        let mut created = 0;
        for ctx in Context::ALL {
            let store = self.context_store(ctx);
            for (card_id, created_at) in store.assigned_cards(&mut *tx, student_id).await? {
                if store.load_state(&mut *tx, student_id, card_id).await?.is_none() {
                    store
                        .save_state(&mut *tx, &CardState::new_card(student_id, card_id, created_at))
                        .await?;
                    created += 1;
                }
            }
        }

        tx.commit().await?;
        log_db_operation!(info, "assign_deck", format!("created {} card states", created));
        Ok(created)
    }
}
