//! services/engine/src/scoring.rs
//!
//! Pure scoring rules: experience points per attempt and bite-level aggregates.

use litura_core::domain::AttemptResult;

use crate::config::XpRules;

#[derive(Debug, Clone, Copy)]
pub struct ScoringEngine {
    rules: XpRules,
}

impl ScoringEngine {
    pub fn new(rules: XpRules) -> Self {
        Self { rules }
    }

    /// XP for a correct answer on `attempt_number`. Anything past the second
    /// attempt earns the `incorrect` value.
    pub fn compute_xp(&self, attempt_number: u8) -> u32 {
        match attempt_number {
            1 => self.rules.correct,
            2 => self.rules.half_credit,
            _ => self.rules.incorrect,
        }
    }
}

/// Percentage of correct results, `0.0` for an empty slice.
pub fn compute_competency(results: &[AttemptResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let correct = results.iter().filter(|r| r.is_correct).count();
    (correct as f64 / results.len() as f64) * 100.0
}

pub fn total_xp(results: &[AttemptResult]) -> u32 {
    results.iter().map(|r| r.xp_awarded).sum()
}

pub fn average_attempts(results: &[AttemptResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let sum: u32 = results.iter().map(|r| u32::from(r.attempt_number)).sum();
    f64::from(sum) / results.len() as f64
}

pub fn average_time_ms(results: &[AttemptResult]) -> i64 {
    if results.is_empty() {
        return 0;
    }
    let sum: i64 = results.iter().map(|r| r.time_to_answer_ms).sum();
    sum / results.len() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(is_correct: bool, attempt_number: u8, time_to_answer_ms: i64) -> AttemptResult {
        AttemptResult {
            question_id: "q".to_string(),
            bite_id: "b".to_string(),
            is_correct,
            attempt_number,
            time_to_answer_ms,
            xp_awarded: if is_correct { 10 } else { 0 },
        }
    }

    fn engine() -> ScoringEngine {
        ScoringEngine::new(XpRules {
            correct: 10,
            half_credit: 5,
            incorrect: 0,
        })
    }

    #[test]
    fn xp_follows_the_attempt_table() {
        let scoring = engine();
        assert_eq!(scoring.compute_xp(1), 10);
        assert_eq!(scoring.compute_xp(2), 5);
        assert_eq!(scoring.compute_xp(3), 0);
        assert_eq!(scoring.compute_xp(0), 0);
    }

    #[test]
    fn competency_of_nothing_is_zero() {
        assert_eq!(compute_competency(&[]), 0.0);
    }

    #[test]
    fn competency_is_share_of_correct_answers() {
        let results = vec![
            result(true, 1, 1_000),
            result(true, 2, 2_000),
            result(false, 2, 3_000),
            result(true, 1, 4_000),
        ];
        assert_eq!(compute_competency(&results), 75.0);
        assert_eq!(total_xp(&results), 30);
        assert_eq!(average_attempts(&results), 1.5);
        assert_eq!(average_time_ms(&results), 2_500);
    }

    #[test]
    fn aggregates_of_nothing_are_zero() {
        assert_eq!(average_attempts(&[]), 0.0);
        assert_eq!(average_time_ms(&[]), 0);
        assert_eq!(total_xp(&[]), 0);
    }
}
