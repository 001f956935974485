//! Storage for the three scheduling contexts.
//!
//! Each context owns a state table, a history table and a parameter table. The SQL is
//! shared; the table set is chosen at compile time through [`ContextTables`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::marker::PhantomData;
use uuid::Uuid;

use crate::database::{format_timestamp, parse_timestamp};
use crate::errors::{Result, SchedulerError};
use crate::models::{CardState, Context, FsrsParameters, Rating, ReviewHistoryEntry};

/// Compile-time description of one context's tables.
pub trait ContextTables: Send + Sync + 'static {
    const CONTEXT: Context;
    const STATE_TABLE: &'static str;
    const HISTORY_TABLE: &'static str;
    const PARAMS_TABLE: &'static str;
    /// Content table whose rows can be scheduled in this context.
    const CONTENT_TABLE: &'static str;
    /// Extra predicate on content rows (`c`), empty when every row qualifies.
    const CONTENT_FILTER: &'static str;
}

pub struct Vocabulary;
pub struct Listening;
pub struct Generic;

impl ContextTables for Vocabulary {
    const CONTEXT: Context = Context::Vocabulary;
    const STATE_TABLE: &'static str = "vocabulary_card_states";
    const HISTORY_TABLE: &'static str = "vocabulary_review_history";
    const PARAMS_TABLE: &'static str = "vocabulary_fsrs_parameters";
    const CONTENT_TABLE: &'static str = "vocabulary_cards";
    const CONTENT_FILTER: &'static str = "";
}

impl ContextTables for Listening {
    const CONTEXT: Context = Context::Listening;
    const STATE_TABLE: &'static str = "listening_card_states";
    const HISTORY_TABLE: &'static str = "listening_review_history";
    const PARAMS_TABLE: &'static str = "listening_fsrs_parameters";
    const CONTENT_TABLE: &'static str = "vocabulary_cards";
    const CONTENT_FILTER: &'static str = "AND c.audio_url IS NOT NULL";
}

impl ContextTables for Generic {
    const CONTEXT: Context = Context::Generic;
    const STATE_TABLE: &'static str = "generic_card_states";
    const HISTORY_TABLE: &'static str = "generic_review_history";
    const PARAMS_TABLE: &'static str = "generic_fsrs_parameters";
    const CONTENT_TABLE: &'static str = "generic_cards";
    const CONTENT_FILTER: &'static str = "";
}

/// Repository the scheduling core runs against.
///
/// Every method takes the connection to use, so callers decide what shares a transaction.
#[async_trait]
pub trait ContextStore: Send + Sync {
    fn context(&self) -> Context;

    async fn load_state(
        &self,
        conn: &mut SqliteConnection,
        student_id: Uuid,
        card_id: Uuid,
    ) -> Result<Option<CardState>>;

    /// Insert or overwrite one state row.
    async fn save_state(&self, conn: &mut SqliteConnection, state: &CardState) -> Result<()>;

    async fn append_history(
        &self,
        conn: &mut SqliteConnection,
        entry: &ReviewHistoryEntry,
    ) -> Result<()>;

    async fn count_learning_steps(
        &self,
        conn: &mut SqliteConnection,
        student_id: Uuid,
        card_id: Uuid,
    ) -> Result<usize>;

    /// Full history of a student, ordered by card then review time.
    async fn load_history(
        &self,
        conn: &mut SqliteConnection,
        student_id: Uuid,
    ) -> Result<Vec<ReviewHistoryEntry>>;

    async fn load_params(
        &self,
        conn: &mut SqliteConnection,
        student_id: Uuid,
    ) -> Result<Option<FsrsParameters>>;

    /// Deactivate the current parameters and store `params` as the active row.
    async fn save_params(&self, conn: &mut SqliteConnection, params: &FsrsParameters)
    -> Result<()>;

    async fn load_states(
        &self,
        conn: &mut SqliteConnection,
        student_id: Uuid,
    ) -> Result<Vec<CardState>>;

    /// Delete every state row of the student and insert `states` in their place.
    async fn replace_states(
        &self,
        conn: &mut SqliteConnection,
        student_id: Uuid,
        states: &[CardState],
    ) -> Result<()>;

    /// Reviewed cards with `due <= due_before`, earliest first.
    async fn due_states(
        &self,
        conn: &mut SqliteConnection,
        student_id: Uuid,
        due_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CardState>>;

    /// Reviewed cards with `after < due < before`, earliest first.
    async fn upcoming_states(
        &self,
        conn: &mut SqliteConnection,
        student_id: Uuid,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CardState>>;

    /// Unseen cards in content creation order, oldest first.
    async fn new_states(
        &self,
        conn: &mut SqliteConnection,
        student_id: Uuid,
        limit: usize,
    ) -> Result<Vec<CardState>>;

    async fn states_in_deck(
        &self,
        conn: &mut SqliteConnection,
        student_id: Uuid,
        deck_id: Uuid,
    ) -> Result<Vec<CardState>>;

    /// Cards this context schedules from the student's assigned decks, with creation time.
    async fn assigned_cards(
        &self,
        conn: &mut SqliteConnection,
        student_id: Uuid,
    ) -> Result<Vec<(Uuid, DateTime<Utc>)>>;
}

pub struct SqliteContextStore<T: ContextTables> {
    _tables: PhantomData<T>,
}

impl<T: ContextTables> SqliteContextStore<T> {
    pub fn new() -> Self {
        Self {
            _tables: PhantomData,
        }
    }
}

impl<T: ContextTables> Default for SqliteContextStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

const STATE_COLUMNS: &str =
    "s.student_id, s.card_id, s.state, s.stability, s.difficulty, s.due, s.reps, s.lapses, s.last_review";

fn state_from_row(row: &SqliteRow) -> Result<CardState> {
    Ok(CardState {
        student_id: Uuid::parse_str(&row.try_get::<String, _>("student_id")?)?,
        card_id: Uuid::parse_str(&row.try_get::<String, _>("card_id")?)?,
        state: row.try_get::<String, _>("state")?.parse()?,
        stability: row.try_get("stability")?,
        difficulty: row.try_get("difficulty")?,
        due: parse_timestamp(&row.try_get::<String, _>("due")?)?,
        reps: row.try_get("reps")?,
        lapses: row.try_get("lapses")?,
        last_review: row
            .try_get::<Option<String>, _>("last_review")?
            .as_deref()
            .map(parse_timestamp)
            .transpose()?,
    })
}

fn history_from_row(row: &SqliteRow) -> Result<ReviewHistoryEntry> {
    Ok(ReviewHistoryEntry {
        id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
        student_id: Uuid::parse_str(&row.try_get::<String, _>("student_id")?)?,
        card_id: Uuid::parse_str(&row.try_get::<String, _>("card_id")?)?,
        rating: Rating::try_from(row.try_get::<i32, _>("rating")?)?,
        reviewed_at: parse_timestamp(&row.try_get::<String, _>("reviewed_at")?)?,
        is_learning_step: row.try_get("is_learning_step")?,
        session_id: row
            .try_get::<Option<String>, _>("session_id")?
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()?,
        previous_state: row.try_get::<String, _>("previous_state")?.parse()?,
        previous_difficulty: row.try_get("previous_difficulty")?,
        previous_stability: row.try_get("previous_stability")?,
        previous_due: parse_timestamp(&row.try_get::<String, _>("previous_due")?)?,
    })
}

fn params_from_row(row: &SqliteRow) -> Result<FsrsParameters> {
    Ok(FsrsParameters {
        id: Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
        student_id: Uuid::parse_str(&row.try_get::<String, _>("student_id")?)?,
        weights: serde_json::from_str(&row.try_get::<String, _>("weights")?)?,
        is_active: row.try_get("is_active")?,
        training_data_size: row.try_get("training_data_size")?,
        last_optimized: parse_timestamp(&row.try_get::<String, _>("last_optimized")?)?,
    })
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

async fn insert_state<T: ContextTables>(
    conn: &mut SqliteConnection,
    state: &CardState,
) -> Result<()> {
    let sql = format!(
        r#"
        INSERT INTO {} (student_id, card_id, state, stability, difficulty, due, reps, lapses, last_review)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT (student_id, card_id) DO UPDATE SET
            state = excluded.state,
            stability = excluded.stability,
            difficulty = excluded.difficulty,
            due = excluded.due,
            reps = excluded.reps,
            lapses = excluded.lapses,
            last_review = excluded.last_review
        "#,
        T::STATE_TABLE
    );

    sqlx::query(&sql)
        .bind(state.student_id.to_string())
        .bind(state.card_id.to_string())
        .bind(state.state.as_str())
        .bind(state.stability)
        .bind(state.difficulty)
        .bind(format_timestamp(state.due))
        .bind(state.reps)
        .bind(state.lapses)
        .bind(state.last_review.map(format_timestamp))
        .execute(&mut *conn)
        .await?;

    Ok(())
}

#[async_trait]
impl<T: ContextTables> ContextStore for SqliteContextStore<T> {
    fn context(&self) -> Context {
        T::CONTEXT
    }

    async fn load_state(
        &self,
        conn: &mut SqliteConnection,
        student_id: Uuid,
        card_id: Uuid,
    ) -> Result<Option<CardState>> {
        let sql = format!(
            "SELECT {} FROM {} s WHERE s.student_id = ?1 AND s.card_id = ?2",
            STATE_COLUMNS,
            T::STATE_TABLE
        );
        let row = sqlx::query(&sql)
            .bind(student_id.to_string())
            .bind(card_id.to_string())
            .fetch_optional(&mut *conn)
            .await?;

        row.as_ref().map(state_from_row).transpose()
    }

    async fn save_state(&self, conn: &mut SqliteConnection, state: &CardState) -> Result<()> {
        insert_state::<T>(conn, state).await
    }

    async fn append_history(
        &self,
        conn: &mut SqliteConnection,
        entry: &ReviewHistoryEntry,
    ) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO {} (id, student_id, card_id, rating, reviewed_at, is_learning_step, session_id,
                            previous_state, previous_difficulty, previous_stability, previous_due)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            T::HISTORY_TABLE
        );

        sqlx::query(&sql)
            .bind(entry.id.to_string())
            .bind(entry.student_id.to_string())
            .bind(entry.card_id.to_string())
            .bind(entry.rating.as_i32())
            .bind(format_timestamp(entry.reviewed_at))
            .bind(entry.is_learning_step)
            .bind(entry.session_id.map(|id| id.to_string()))
            .bind(entry.previous_state.as_str())
            .bind(entry.previous_difficulty)
            .bind(entry.previous_stability)
            .bind(format_timestamp(entry.previous_due))
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    async fn count_learning_steps(
        &self,
        conn: &mut SqliteConnection,
        student_id: Uuid,
        card_id: Uuid,
    ) -> Result<usize> {
        let sql = format!(
            "SELECT COUNT(*) AS n FROM {} WHERE student_id = ?1 AND card_id = ?2 AND is_learning_step = 1",
            T::HISTORY_TABLE
        );
        let count: i64 = sqlx::query(&sql)
            .bind(student_id.to_string())
            .bind(card_id.to_string())
            .fetch_one(&mut *conn)
            .await?
            .try_get("n")?;

        usize::try_from(count).map_err(|_| SchedulerError::CorruptRow(format!("count {}", count)))
    }

    async fn load_history(
        &self,
        conn: &mut SqliteConnection,
        student_id: Uuid,
    ) -> Result<Vec<ReviewHistoryEntry>> {
        let sql = format!(
            "SELECT * FROM {} WHERE student_id = ?1 ORDER BY card_id ASC, reviewed_at ASC, seq ASC",
            T::HISTORY_TABLE
        );
        let rows = sqlx::query(&sql)
            .bind(student_id.to_string())
            .fetch_all(&mut *conn)
            .await?;

        rows.iter().map(history_from_row).collect()
    }

    async fn load_params(
        &self,
        conn: &mut SqliteConnection,
        student_id: Uuid,
    ) -> Result<Option<FsrsParameters>> {
        let sql = format!(
            "SELECT * FROM {} WHERE student_id = ?1 AND is_active = 1",
            T::PARAMS_TABLE
        );
        let row = sqlx::query(&sql)
            .bind(student_id.to_string())
            .fetch_optional(&mut *conn)
            .await?;

        row.as_ref().map(params_from_row).transpose()
    }

    async fn save_params(
        &self,
        conn: &mut SqliteConnection,
        params: &FsrsParameters,
    ) -> Result<()> {
        let deactivate = format!(
            "UPDATE {} SET is_active = 0 WHERE student_id = ?1 AND is_active = 1",
            T::PARAMS_TABLE
        );
        sqlx::query(&deactivate)
            .bind(params.student_id.to_string())
            .execute(&mut *conn)
            .await?;

        let insert = format!(
            r#"
            INSERT INTO {} (id, student_id, weights, is_active, training_data_size, last_optimized)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            T::PARAMS_TABLE
        );
        sqlx::query(&insert)
            .bind(params.id.to_string())
            .bind(params.student_id.to_string())
            .bind(serde_json::to_string(&params.weights)?)
            .bind(params.is_active)
            .bind(params.training_data_size)
            .bind(format_timestamp(params.last_optimized))
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    async fn load_states(
        &self,
        conn: &mut SqliteConnection,
        student_id: Uuid,
    ) -> Result<Vec<CardState>> {
        let sql = format!(
            "SELECT {} FROM {} s WHERE s.student_id = ?1 ORDER BY s.card_id ASC",
            STATE_COLUMNS,
            T::STATE_TABLE
        );
        let rows = sqlx::query(&sql)
            .bind(student_id.to_string())
            .fetch_all(&mut *conn)
            .await?;

        rows.iter().map(state_from_row).collect()
    }

    async fn replace_states(
        &self,
        conn: &mut SqliteConnection,
        student_id: Uuid,
        states: &[CardState],
    ) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE student_id = ?1", T::STATE_TABLE);
        sqlx::query(&sql)
            .bind(student_id.to_string())
            .execute(&mut *conn)
            .await?;

        for state in states {
            insert_state::<T>(conn, state).await?;
        }

        Ok(())
    }

    async fn due_states(
        &self,
        conn: &mut SqliteConnection,
        student_id: Uuid,
        due_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CardState>> {
        let sql = format!(
            r#"
            SELECT {} FROM {} s
            WHERE s.student_id = ?1 AND s.state != 'NEW' AND s.due <= ?2
            ORDER BY s.due ASC, s.card_id ASC
            LIMIT ?3
            "#,
            STATE_COLUMNS,
            T::STATE_TABLE
        );
        let rows = sqlx::query(&sql)
            .bind(student_id.to_string())
            .bind(format_timestamp(due_before))
            .bind(sql_limit(limit))
            .fetch_all(&mut *conn)
            .await?;

        rows.iter().map(state_from_row).collect()
    }

    async fn upcoming_states(
        &self,
        conn: &mut SqliteConnection,
        student_id: Uuid,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CardState>> {
        let sql = format!(
            r#"
            SELECT {} FROM {} s
            WHERE s.student_id = ?1 AND s.state != 'NEW' AND s.due > ?2 AND s.due < ?3
            ORDER BY s.due ASC, s.card_id ASC
            LIMIT ?4
            "#,
            STATE_COLUMNS,
            T::STATE_TABLE
        );
        let rows = sqlx::query(&sql)
            .bind(student_id.to_string())
            .bind(format_timestamp(after))
            .bind(format_timestamp(before))
            .bind(sql_limit(limit))
            .fetch_all(&mut *conn)
            .await?;

        rows.iter().map(state_from_row).collect()
    }

    async fn new_states(
        &self,
        conn: &mut SqliteConnection,
        student_id: Uuid,
        limit: usize,
    ) -> Result<Vec<CardState>> {
        let sql = format!(
            r#"
            SELECT {} FROM {} s
            JOIN {} c ON c.id = s.card_id
            WHERE s.student_id = ?1 AND s.state = 'NEW'
            ORDER BY c.created_at ASC, c.id ASC
            LIMIT ?2
            "#,
            STATE_COLUMNS,
            T::STATE_TABLE,
            T::CONTENT_TABLE
        );
        let rows = sqlx::query(&sql)
            .bind(student_id.to_string())
            .bind(sql_limit(limit))
            .fetch_all(&mut *conn)
            .await?;

        rows.iter().map(state_from_row).collect()
    }

    async fn states_in_deck(
        &self,
        conn: &mut SqliteConnection,
        student_id: Uuid,
        deck_id: Uuid,
    ) -> Result<Vec<CardState>> {
        let sql = format!(
            r#"
            SELECT {} FROM {} s
            JOIN {} c ON c.id = s.card_id
            WHERE s.student_id = ?1 AND c.deck_id = ?2
            ORDER BY s.card_id ASC
            "#,
            STATE_COLUMNS,
            T::STATE_TABLE,
            T::CONTENT_TABLE
        );
        let rows = sqlx::query(&sql)
            .bind(student_id.to_string())
            .bind(deck_id.to_string())
            .fetch_all(&mut *conn)
            .await?;

        rows.iter().map(state_from_row).collect()
    }

    async fn assigned_cards(
        &self,
        conn: &mut SqliteConnection,
        student_id: Uuid,
    ) -> Result<Vec<(Uuid, DateTime<Utc>)>> {
        let sql = format!(
            r#"
            SELECT c.id, c.created_at FROM {} c
            JOIN student_decks sd ON sd.deck_id = c.deck_id
            WHERE sd.student_id = ?1 {}
            ORDER BY c.created_at ASC, c.id ASC
            "#,
            T::CONTENT_TABLE,
            T::CONTENT_FILTER
        );
        let rows = sqlx::query(&sql)
            .bind(student_id.to_string())
            .fetch_all(&mut *conn)
            .await?;

        rows.iter()
            .map(|row| {
                Ok((
                    Uuid::parse_str(&row.try_get::<String, _>("id")?)?,
                    parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
                ))
            })
            .collect()
    }
}

/// Create the state, history and parameter tables of one context.
pub(crate) async fn create_tables<T: ContextTables>(pool: &SqlitePool) -> Result<()> {
    let states = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            student_id TEXT NOT NULL,
            card_id TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'NEW',
            stability REAL NOT NULL DEFAULT 0.0,
            difficulty REAL NOT NULL DEFAULT 0.0,
            due TEXT NOT NULL,
            reps INTEGER NOT NULL DEFAULT 0,
            lapses INTEGER NOT NULL DEFAULT 0,
            last_review TEXT,
            PRIMARY KEY (student_id, card_id)
        );
        "#,
        T::STATE_TABLE
    );
    sqlx::query(&states).execute(pool).await?;

    let due_index = format!(
        "CREATE INDEX IF NOT EXISTS idx_{0}_due ON {0} (student_id, state, due);",
        T::STATE_TABLE
    );
    sqlx::query(&due_index).execute(pool).await?;

    // `seq` keeps insertion order for reviews sharing a timestamp.
    let history = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            student_id TEXT NOT NULL,
            card_id TEXT NOT NULL,
            rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 4),
            reviewed_at TEXT NOT NULL,
            is_learning_step BOOLEAN NOT NULL DEFAULT 0,
            session_id TEXT,
            previous_state TEXT NOT NULL,
            previous_difficulty REAL NOT NULL,
            previous_stability REAL NOT NULL,
            previous_due TEXT NOT NULL
        );
        "#,
        T::HISTORY_TABLE
    );
    sqlx::query(&history).execute(pool).await?;

    let history_index = format!(
        "CREATE INDEX IF NOT EXISTS idx_{0}_card ON {0} (student_id, card_id, reviewed_at);",
        T::HISTORY_TABLE
    );
    sqlx::query(&history_index).execute(pool).await?;

    let params = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            weights TEXT NOT NULL,
            is_active BOOLEAN NOT NULL DEFAULT 1,
            training_data_size INTEGER NOT NULL,
            last_optimized TEXT NOT NULL
        );
        "#,
        T::PARAMS_TABLE
    );
    sqlx::query(&params).execute(pool).await?;

    // At most one active parameter row per student.
    let active_index = format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_{0}_active ON {0} (student_id) WHERE is_active = 1;",
        T::PARAMS_TABLE
    );
    sqlx::query(&active_index).execute(pool).await?;

    Ok(())
}
