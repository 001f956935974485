//! Progress of a live session, one variant per exercise type.
//!
//! The session UI owns the screen flow; this is the queue/state contract it keeps between
//! requests. Cards rated "again" go back to the end of their queue.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::errors::{Result, SchedulerError};
use crate::models::{CandidateSelection, CandidateWarnings, Context, Rating, ReviewQueue};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardQueue {
    pub pending: VecDeque<Uuid>,
    pub completed: Vec<Uuid>,
    pub requeued: usize,
}

impl CardQueue {
    pub fn from_ids(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            pending: ids.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn current(&self) -> Option<Uuid> {
        self.pending.front().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn answer(&mut self, card_id: Uuid, rating: Rating) -> Result<()> {
        match self.current() {
            Some(current) if current == card_id => {}
            Some(current) => {
                return Err(SchedulerError::InvalidPayload(format!(
                    "card {} answered but card {} is current",
                    card_id, current
                )));
            }
            None => {
                return Err(SchedulerError::InvalidPayload(
                    "no card left in this stage".to_string(),
                ));
            }
        }

        self.pending.pop_front();
        if rating == Rating::Again {
            self.pending.push_back(card_id);
            self.requeued += 1;
        } else {
            self.completed.push(card_id);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VocabularyStage {
    /// Due cards first.
    Review,
    /// Then unseen cards.
    Introduce,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyProgress {
    pub stage: VocabularyStage,
    pub due: CardQueue,
    pub new: CardQueue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListeningStage {
    Listen,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListeningProgress {
    pub stage: ListeningStage,
    pub cards: CardQueue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<CandidateWarnings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenericStage {
    Study,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericProgress {
    pub stage: GenericStage,
    pub cards: CardQueue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillInBlankStage {
    Answer,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillInBlankProgress {
    pub stage: FillInBlankStage,
    pub cards: CardQueue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionProgress {
    Vocabulary(VocabularyProgress),
    Listening(ListeningProgress),
    Generic(GenericProgress),
    FillInBlank(FillInBlankProgress),
}

impl SessionProgress {
    pub fn vocabulary(queue: &ReviewQueue) -> Self {
        let mut progress = VocabularyProgress {
            stage: VocabularyStage::Review,
            due: CardQueue::from_ids(queue.due_items.iter().map(|s| s.card_id)),
            new: CardQueue::from_ids(queue.new_items.iter().map(|s| s.card_id)),
        };
        progress.settle();
        SessionProgress::Vocabulary(progress)
    }

    /// Generic sessions study due and new cards as one queue, due cards first.
    pub fn generic(queue: &ReviewQueue) -> Self {
        let cards = CardQueue::from_ids(
            queue
                .due_items
                .iter()
                .chain(queue.new_items.iter())
                .map(|s| s.card_id),
        );
        let stage = if cards.is_empty() {
            GenericStage::Complete
        } else {
            GenericStage::Study
        };
        SessionProgress::Generic(GenericProgress { stage, cards })
    }

    pub fn listening(selection: &CandidateSelection) -> Self {
        let cards = CardQueue::from_ids(selection.candidates.iter().map(|c| c.card_id));
        let stage = if cards.is_empty() {
            ListeningStage::Complete
        } else {
            ListeningStage::Listen
        };
        SessionProgress::Listening(ListeningProgress {
            stage,
            cards,
            warnings: selection.warnings,
        })
    }

    pub fn fill_in_blank(selection: &CandidateSelection) -> Self {
        let cards = CardQueue::from_ids(selection.candidates.iter().map(|c| c.card_id));
        let stage = if cards.is_empty() {
            FillInBlankStage::Complete
        } else {
            FillInBlankStage::Answer
        };
        SessionProgress::FillInBlank(FillInBlankProgress { stage, cards })
    }

    /// Context the ratings of this session are recorded in.
    pub fn context(&self) -> Context {
        match self {
            SessionProgress::Vocabulary(_) | SessionProgress::FillInBlank(_) => Context::Vocabulary,
            SessionProgress::Listening(_) => Context::Listening,
            SessionProgress::Generic(_) => Context::Generic,
        }
    }

    pub fn current_card(&self) -> Option<Uuid> {
        match self {
            SessionProgress::Vocabulary(p) => match p.stage {
                VocabularyStage::Review => p.due.current(),
                VocabularyStage::Introduce => p.new.current(),
                VocabularyStage::Complete => None,
            },
            SessionProgress::Listening(p) => p.cards.current(),
            SessionProgress::Generic(p) => p.cards.current(),
            SessionProgress::FillInBlank(p) => p.cards.current(),
        }
    }

    pub fn is_complete(&self) -> bool {
        match self {
            SessionProgress::Vocabulary(p) => p.stage == VocabularyStage::Complete,
            SessionProgress::Listening(p) => p.stage == ListeningStage::Complete,
            SessionProgress::Generic(p) => p.stage == GenericStage::Complete,
            SessionProgress::FillInBlank(p) => p.stage == FillInBlankStage::Complete,
        }
    }

    /// Apply a recorded rating for the current card and move the stage forward.
    pub fn record(&mut self, card_id: Uuid, rating: Rating) -> Result<()> {
        match self {
            SessionProgress::Vocabulary(p) => {
                match p.stage {
                    VocabularyStage::Review => p.due.answer(card_id, rating)?,
                    VocabularyStage::Introduce => p.new.answer(card_id, rating)?,
                    VocabularyStage::Complete => return Err(session_complete()),
                }
                p.settle();
            }
            SessionProgress::Listening(p) => {
                if p.stage == ListeningStage::Complete {
                    return Err(session_complete());
                }
                p.cards.answer(card_id, rating)?;
                if p.cards.is_empty() {
                    p.stage = ListeningStage::Complete;
                }
            }
            SessionProgress::Generic(p) => {
                if p.stage == GenericStage::Complete {
                    return Err(session_complete());
                }
                p.cards.answer(card_id, rating)?;
                if p.cards.is_empty() {
                    p.stage = GenericStage::Complete;
                }
            }
            SessionProgress::FillInBlank(p) => {
                if p.stage == FillInBlankStage::Complete {
                    return Err(session_complete());
                }
                p.cards.answer(card_id, rating)?;
                if p.cards.is_empty() {
                    p.stage = FillInBlankStage::Complete;
                }
            }
        }
        Ok(())
    }
}

impl VocabularyProgress {
    /// Skip past stages with nothing left in them.
    fn settle(&mut self) {
        if self.stage == VocabularyStage::Review && self.due.is_empty() {
            self.stage = VocabularyStage::Introduce;
        }
        if self.stage == VocabularyStage::Introduce && self.new.is_empty() {
            self.stage = VocabularyStage::Complete;
        }
    }
}

fn session_complete() -> SchedulerError {
    SchedulerError::InvalidPayload("session is already complete".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Candidate, CardState};
    use chrono::Utc;

    fn queue(due: usize, new: usize) -> ReviewQueue {
        let student = Uuid::new_v4();
        let card = |_| CardState::new_card(student, Uuid::new_v4(), Utc::now());
        ReviewQueue {
            due_items: (0..due).map(card).collect(),
            new_items: (0..new).map(card).collect(),
        }
    }

    #[test]
    fn test_vocabulary_reviews_due_before_new() {
        let queue = queue(1, 1);
        let due_id = queue.due_items[0].card_id;
        let new_id = queue.new_items[0].card_id;
        let mut progress = SessionProgress::vocabulary(&queue);

        assert_eq!(progress.current_card(), Some(due_id));
        progress.record(due_id, Rating::Good).unwrap();
        assert_eq!(progress.current_card(), Some(new_id));
        progress.record(new_id, Rating::Easy).unwrap();
        assert!(progress.is_complete());
        assert!(progress.record(new_id, Rating::Good).is_err());
    }

    #[test]
    fn test_again_requeues_card() {
        let queue = queue(0, 2);
        let first = queue.new_items[0].card_id;
        let second = queue.new_items[1].card_id;
        let mut progress = SessionProgress::generic(&queue);

        progress.record(first, Rating::Again).unwrap();
        assert_eq!(progress.current_card(), Some(second));
        progress.record(second, Rating::Good).unwrap();
        assert_eq!(progress.current_card(), Some(first));
        progress.record(first, Rating::Good).unwrap();
        assert!(progress.is_complete());

        match progress {
            SessionProgress::Generic(p) => assert_eq!(p.cards.requeued, 1),
            other => panic!("unexpected variant {:?}", other),
        }
    }

    #[test]
    fn test_wrong_card_is_rejected() {
        let mut progress = SessionProgress::vocabulary(&queue(2, 0));
        assert!(progress.record(Uuid::new_v4(), Rating::Good).is_err());
    }

    #[test]
    fn test_empty_selection_is_complete() {
        let selection = CandidateSelection {
            candidates: Vec::new(),
            warnings: None,
        };
        assert!(SessionProgress::listening(&selection).is_complete());
        assert!(SessionProgress::vocabulary(&queue(0, 0)).is_complete());
    }

    #[test]
    fn test_listening_progress_serializes_with_tag() {
        let selection = CandidateSelection {
            candidates: vec![Candidate {
                card_id: Uuid::nil(),
                vocabulary_retrievability: 0.9,
                listening_retrievability: None,
                listening_ready: false,
            }],
            warnings: Some(CandidateWarnings {
                suboptimal_candidates: 1,
                recommended_max_cards: 0,
            }),
        };
        let progress = SessionProgress::listening(&selection);
        assert_eq!(progress.context(), Context::Listening);

        let json = serde_json::to_value(&progress).unwrap();
        assert_eq!(json["kind"], "listening");
        assert_eq!(json["stage"], "listen");
        assert_eq!(json["warnings"]["suboptimal_candidates"], 1);

        let back: SessionProgress = serde_json::from_value(json).unwrap();
        assert_eq!(back, progress);
    }
}
