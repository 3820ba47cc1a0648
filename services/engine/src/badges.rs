//! services/engine/src/badges.rs
//!
//! Decides which badges a reader unlocks after completing a bite.

use litura_core::domain::{BadgeDefinitions, BadgeRecord, BadgeType, ReadingProgress};
use litura_core::ports::{BadgeStore, Clock, ProgressStore};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use crate::error::EngineResult;

//=========================================================================================
// Hidden badge conditions
//=========================================================================================

/// A hidden-badge condition parsed into a predicate the evaluator understands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BadgeCondition {
    /// Book fully completed with an average competency of at least `threshold`.
    CompetencyThreshold { threshold: f64 },
    /// Anything outside the grammar; never satisfied.
    Unsupported,
}

fn threshold_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?:>=|≥)\s*(\d+(?:\.\d+)?)").ok())
        .as_ref()
}

impl BadgeCondition {
    /// Parses a free-text condition such as `"average competency >= 90"`.
    /// Unrecognised text yields [`BadgeCondition::Unsupported`].
    pub fn parse(condition: &str) -> Self {
        let lower = condition.to_lowercase();
        if !lower.contains("competency") {
            return Self::Unsupported;
        }
        threshold_pattern()
            .and_then(|re| re.captures(&lower))
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .map(|threshold| Self::CompetencyThreshold { threshold })
            .unwrap_or(Self::Unsupported)
    }

    /// `average_competency` is only consulted once the book is complete.
    pub fn is_satisfied(&self, book_completed: bool, average_competency: f64) -> bool {
        match self {
            Self::CompetencyThreshold { threshold } => {
                book_completed && average_competency >= *threshold
            }
            Self::Unsupported => false,
        }
    }
}

//=========================================================================================
// Evaluator
//=========================================================================================

pub struct BadgeRuleEvaluator {
    badges: Arc<dyn BadgeStore>,
    progress: Arc<dyn ProgressStore>,
    clock: Arc<dyn Clock>,
}

impl BadgeRuleEvaluator {
    pub fn new(
        badges: Arc<dyn BadgeStore>,
        progress: Arc<dyn ProgressStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            badges,
            progress,
            clock,
        }
    }

    /// Awards every badge the progress now qualifies for and returns only the
    /// ones inserted by this call.
    pub async fn evaluate(
        &self,
        user_id: &str,
        book_id: &str,
        progress: &ReadingProgress,
        definitions: &BadgeDefinitions,
    ) -> EngineResult<Vec<BadgeRecord>> {
        let mut awarded = Vec::new();
        let book_completed = progress.completed_bites >= progress.total_bites;

        if book_completed && !definitions.completion_badge.is_empty() {
            if let Some(badge) = self
                .award(user_id, &definitions.completion_badge, book_id, BadgeType::Completion)
                .await?
            {
                awarded.push(badge);
            }
        }

        for hidden in &definitions.hidden_badges {
            if self.badges.has_badge(user_id, &hidden.id).await? {
                continue;
            }
            let condition = BadgeCondition::parse(&hidden.condition);
            if condition == BadgeCondition::Unsupported {
                debug!(
                    badge_id = %hidden.id,
                    condition = %hidden.condition,
                    "Unsupported badge condition."
                );
                continue;
            }
            if !book_completed {
                continue;
            }
            let average = self
                .progress
                .average_competency(user_id, book_id)
                .await?
                .unwrap_or(0.0);
            if condition.is_satisfied(book_completed, average) {
                if let Some(badge) = self
                    .award(user_id, &hidden.id, book_id, BadgeType::Hidden)
                    .await?
                {
                    awarded.push(badge);
                }
            }
        }

        Ok(awarded)
    }

    async fn award(
        &self,
        user_id: &str,
        badge_id: &str,
        book_id: &str,
        badge_type: BadgeType,
    ) -> EngineResult<Option<BadgeRecord>> {
        if self.badges.has_badge(user_id, badge_id).await? {
            return Ok(None);
        }
        let badge = BadgeRecord {
            user_id: user_id.to_string(),
            badge_id: badge_id.to_string(),
            book_id: book_id.to_string(),
            badge_type,
            earned_at: self.clock.now(),
        };
        if !self.badges.insert_if_absent(badge.clone()).await? {
            return Ok(None);
        }
        info!(user_id, badge_id, badge_type = badge_type.as_str(), "Badge awarded.");
        Ok(Some(badge))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{ManualClock, MemoryBadgeStore, MemoryProgressStore};
    use chrono::{TimeZone, Utc};
    use litura_core::domain::{BiteCompletion, HiddenBadge, ReadingStatus};

    const USER: &str = "u_local_001";
    const BOOK: &str = "b_hatchet";

    fn definitions() -> BadgeDefinitions {
        BadgeDefinitions {
            completion_badge: "badge_hatchet_complete".to_string(),
            specialty_badges: vec!["badge_survivor".to_string()],
            hidden_badges: vec![
                HiddenBadge {
                    id: "badge_sharp_reader".to_string(),
                    condition: "Average competency >= 90".to_string(),
                },
                HiddenBadge {
                    id: "badge_night_owl".to_string(),
                    condition: "read after midnight".to_string(),
                },
            ],
        }
    }

    fn progress(completed_bites: u32, total_bites: u32) -> ReadingProgress {
        ReadingProgress {
            user_id: USER.to_string(),
            book_id: BOOK.to_string(),
            status: if completed_bites >= total_bites {
                ReadingStatus::Completed
            } else {
                ReadingStatus::InProgress
            },
            current_bite_id: None,
            completed_bites,
            total_bites,
            percent_complete: 0.0,
            average_competency: 0.0,
            average_attempts: 0.0,
            avg_time_per_question_ms: 0,
            total_xp_earned: 0,
            started_at: None,
            last_read_at: None,
            completed_at: None,
        }
    }

    async fn evaluator_with_history(
        competencies: &[f64],
    ) -> (BadgeRuleEvaluator, Arc<MemoryBadgeStore>) {
        let badges = Arc::new(MemoryBadgeStore::default());
        let progress = Arc::new(MemoryProgressStore::default());
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();
        for (i, competency) in competencies.iter().enumerate() {
            progress
                .append_bite_completion(BiteCompletion {
                    user_id: USER.to_string(),
                    bite_id: format!("bite_{}", i + 1),
                    book_id: BOOK.to_string(),
                    xp_earned: 10,
                    competency_percent: *competency,
                    time_spent_ms: 60_000,
                    completed_at: at,
                })
                .await
                .unwrap();
        }
        let clock = Arc::new(ManualClock::new(at));
        let evaluator = BadgeRuleEvaluator::new(badges.clone(), progress, clock);
        (evaluator, badges)
    }

    #[test]
    fn parses_the_competency_grammar() {
        assert_eq!(
            BadgeCondition::parse("average competency >= 90"),
            BadgeCondition::CompetencyThreshold { threshold: 90.0 }
        );
        assert_eq!(
            BadgeCondition::parse("COMPETENCY ≥ 72.5"),
            BadgeCondition::CompetencyThreshold { threshold: 72.5 }
        );
        assert_eq!(BadgeCondition::parse("competency > 90"), BadgeCondition::Unsupported);
        assert_eq!(BadgeCondition::parse("streak >= 7"), BadgeCondition::Unsupported);
        assert_eq!(BadgeCondition::parse(""), BadgeCondition::Unsupported);
    }

    #[test]
    fn threshold_needs_completion_and_average() {
        let condition = BadgeCondition::CompetencyThreshold { threshold: 90.0 };
        assert!(condition.is_satisfied(true, 90.0));
        assert!(!condition.is_satisfied(true, 89.9));
        assert!(!condition.is_satisfied(false, 100.0));
        assert!(!BadgeCondition::Unsupported.is_satisfied(true, 100.0));
    }

    #[tokio::test]
    async fn completion_badge_is_awarded_once() {
        let (evaluator, badges) = evaluator_with_history(&[50.0, 50.0]).await;
        let first = evaluator.evaluate(USER, BOOK, &progress(2, 2), &definitions()).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].badge_id, "badge_hatchet_complete");
        assert_eq!(first[0].badge_type, BadgeType::Completion);

        let second = evaluator.evaluate(USER, BOOK, &progress(2, 2), &definitions()).await.unwrap();
        assert!(second.is_empty());
        assert_eq!(badges.badges_for_user(USER).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn hidden_badge_requires_high_average_on_a_finished_book() {
        let (evaluator, _) = evaluator_with_history(&[100.0, 80.0]).await;
        let awarded = evaluator
            .evaluate(USER, BOOK, &progress(2, 2), &definitions())
            .await
            .unwrap();
        let ids: Vec<_> = awarded.iter().map(|b| b.badge_id.as_str()).collect();
        assert_eq!(ids, vec!["badge_hatchet_complete", "badge_sharp_reader"]);
        assert_eq!(awarded[1].badge_type, BadgeType::Hidden);
    }

    #[tokio::test]
    async fn hidden_badge_misses_just_below_threshold() {
        let (evaluator, _) = evaluator_with_history(&[89.9]).await;
        let awarded = evaluator
            .evaluate(USER, BOOK, &progress(1, 1), &definitions())
            .await
            .unwrap();
        assert!(awarded.iter().all(|b| b.badge_id != "badge_sharp_reader"));
    }

    #[tokio::test]
    async fn incomplete_book_earns_nothing_even_when_perfect() {
        let (evaluator, _) = evaluator_with_history(&[100.0, 100.0]).await;
        let awarded = evaluator
            .evaluate(USER, BOOK, &progress(2, 5), &definitions())
            .await
            .unwrap();
        assert!(awarded.is_empty());
    }
}
