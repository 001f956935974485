use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::SchedulerError;
use crate::fsrs_scheduler::{MemoryState, retrievability};

/// One of the three independent content domains that share the scheduling algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Context {
    Vocabulary,
    Listening,
    Generic,
}

impl Context {
    pub const ALL: [Context; 3] = [Context::Vocabulary, Context::Listening, Context::Generic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Context::Vocabulary => "vocabulary",
            Context::Listening => "listening",
            Context::Generic => "generic",
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Context {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vocabulary" => Ok(Context::Vocabulary),
            "listening" => Ok(Context::Listening),
            "generic" => Ok(Context::Generic),
            other => Err(SchedulerError::InvalidPayload(format!(
                "unknown context '{}'",
                other
            ))),
        }
    }
}

/// Scheduling phase of a card, stored as upper-case text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardStatus {
    New,
    Learning,
    Review,
    Relearning,
}

impl CardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardStatus::New => "NEW",
            CardStatus::Learning => "LEARNING",
            CardStatus::Review => "REVIEW",
            CardStatus::Relearning => "RELEARNING",
        }
    }
}

impl fmt::Display for CardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CardStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(CardStatus::New),
            "LEARNING" => Ok(CardStatus::Learning),
            "REVIEW" => Ok(CardStatus::Review),
            "RELEARNING" => Ok(CardStatus::Relearning),
            other => Err(SchedulerError::CorruptRow(format!(
                "unknown card state '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Rating {
    Again = 1,
    Hard = 2,
    Good = 3,
    Easy = 4,
}

impl Rating {
    pub fn from_i32(rating: i32) -> Option<Rating> {
        match rating {
            1 => Some(Rating::Again),
            2 => Some(Rating::Hard),
            3 => Some(Rating::Good),
            4 => Some(Rating::Easy),
            _ => None,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for Rating {
    type Error = SchedulerError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Rating::from_i32(value).ok_or(SchedulerError::InvalidRating(value))
    }
}

impl From<Rating> for i32 {
    fn from(rating: Rating) -> i32 {
        rating.as_i32()
    }
}

/// Cached schedule of one card for one student in one context.
///
/// A `NEW` row carries zero stability and difficulty; those values only become
/// meaningful after the first memory-model review (`reps > 0`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardState {
    pub student_id: Uuid,
    pub card_id: Uuid,
    pub state: CardStatus,
    pub stability: f64,
    pub difficulty: f64,
    pub due: DateTime<Utc>,
    pub reps: i32,
    pub lapses: i32,
    pub last_review: Option<DateTime<Utc>>,
}

/// Stored stability of a card with no memory-model review yet. Any reviewed card has a
/// positive stability; [`CardState::memory`] treats this value as "no memory".
pub const UNSEEN_STABILITY: f64 = 0.0;

impl CardState {
    pub fn new_card(student_id: Uuid, card_id: Uuid, available_at: DateTime<Utc>) -> Self {
        Self {
            student_id,
            card_id,
            state: CardStatus::New,
            stability: UNSEEN_STABILITY,
            difficulty: 0.0,
            due: available_at,
            reps: 0,
            lapses: 0,
            last_review: None,
        }
    }

    /// Memory-model state, absent until the card has had a memory-model review.
    pub fn memory(&self) -> Option<MemoryState> {
        if self.state == CardStatus::New || self.reps == 0 || self.stability <= 0.0 {
            return None;
        }
        Some(MemoryState {
            stability: self.stability,
            difficulty: self.difficulty,
        })
    }

    /// Recall probability at `now`, or `None` if the card was never reviewed.
    pub fn retrievability_at(&self, now: DateTime<Utc>) -> Option<f64> {
        let last = self.last_review?;
        if self.stability <= 0.0 {
            return None;
        }
        Some(retrievability(self.stability, fractional_days(last, now)))
    }
}

/// Elapsed time as fractional days, never negative.
pub fn fractional_days(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    ((to - from).num_milliseconds() as f64 / 86_400_000.0).max(0.0)
}

/// Append-only record of one rating, with a snapshot of the state it replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewHistoryEntry {
    pub id: Uuid,
    pub student_id: Uuid,
    pub card_id: Uuid,
    pub rating: Rating,
    pub reviewed_at: DateTime<Utc>,
    pub is_learning_step: bool,
    pub session_id: Option<Uuid>,
    pub previous_state: CardStatus,
    pub previous_difficulty: f64,
    pub previous_stability: f64,
    pub previous_due: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsrsParameters {
    pub id: Uuid,
    pub student_id: Uuid,
    pub weights: Vec<f64>,
    pub is_active: bool,
    pub training_data_size: i64,
    pub last_optimized: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub new_cards: usize,
    pub max_due: usize,
    pub min_due: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            new_cards: 10,
            max_due: 50,
            min_due: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewQueue {
    pub due_items: Vec<CardState>,
    pub new_items: Vec<CardState>,
}

impl ReviewQueue {
    pub fn len(&self) -> usize {
        self.due_items.len() + self.new_items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.due_items.is_empty() && self.new_items.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateConfig {
    pub count: usize,
    pub vocabulary_confidence_threshold: f64,
    pub listening_candidate_threshold: f64,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            count: 20,
            vocabulary_confidence_threshold: 0.8,
            listening_candidate_threshold: 0.36,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub card_id: Uuid,
    pub vocabulary_retrievability: f64,
    pub listening_retrievability: Option<f64>,
    pub listening_ready: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateWarnings {
    pub suboptimal_candidates: usize,
    pub recommended_max_cards: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSelection {
    pub candidates: Vec<Candidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<CandidateWarnings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub context: Context,
    pub message: String,
    pub params: Option<Vec<f64>>,
    pub training_data_size: usize,
}

impl OptimizationResult {
    pub fn was_skipped(&self) -> bool {
        self.params.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildResult {
    pub context: Context,
    pub cards_rebuilt: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StudentStatus {
    Active,
    Inactive,
    Archived,
}

impl StudentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StudentStatus::Active => "ACTIVE",
            StudentStatus::Inactive => "INACTIVE",
            StudentStatus::Archived => "ARCHIVED",
        }
    }
}

impl FromStr for StudentStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(StudentStatus::Active),
            "INACTIVE" => Ok(StudentStatus::Inactive),
            "ARCHIVED" => Ok(StudentStatus::Archived),
            other => Err(SchedulerError::CorruptRow(format!(
                "unknown student status '{}'",
                other
            ))),
        }
    }
}

// Collaborator-owned content. Only the fields the scheduler reads are modelled.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub name: String,
    pub status: StudentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deck {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabularyCard {
    pub id: Uuid,
    pub deck_id: Uuid,
    pub term: String,
    pub audio_url: Option<String>,
    pub example_sentence: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericCard {
    pub id: Uuid,
    pub deck_id: Uuid,
    pub front: String,
    pub back: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateVocabularyCardRequest {
    pub deck_id: Uuid,
    pub term: String,
    pub audio_url: Option<String>,
    pub example_sentence: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGenericCardRequest {
    pub deck_id: Uuid,
    pub front: String,
    pub back: String,
}
