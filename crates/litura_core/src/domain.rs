//! crates/litura_core/src/domain.rs
//!
//! Defines the pure, core data structures for the reading engine.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use uuid::Uuid;

//=========================================================================================
// Content (immutable once imported)
//=========================================================================================

/// A book as seen by the rules engine: identity, size and its badge set.
#[derive(Debug, Clone)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: String,
    pub total_bites: u32,
    pub badges: BadgeDefinitions,
}

/// The badges a book can award.
#[derive(Debug, Clone, Default)]
pub struct BadgeDefinitions {
    pub completion_badge: String,
    pub specialty_badges: Vec<String>,
    pub hidden_badges: Vec<HiddenBadge>,
}

/// A badge whose eligibility is decided by a free-text condition.
#[derive(Debug, Clone)]
pub struct HiddenBadge {
    pub id: String,
    pub condition: String,
}

/// The smallest unit of reading content. `order_index` is 1-based within a book.
#[derive(Debug, Clone, PartialEq)]
pub struct Bite {
    pub id: String,
    pub book_id: String,
    pub chapter_id: String,
    pub order_index: u32,
    pub text: String,
    pub estimated_seconds: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub id: String,
    pub text: String,
}

/// A multiple-choice comprehension check tied to a bite.
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub id: String,
    pub bite_id: String,
    pub book_id: String,
    pub kind: String,
    pub difficulty: String,
    pub prompt: String,
    pub choices: Vec<Choice>,
    pub correct_choice_id: String,
    pub explanation: String,
}

impl Question {
    pub fn is_correct(&self, choice_id: &str) -> bool {
        self.correct_choice_id == choice_id
    }
}

//=========================================================================================
// Progress
//=========================================================================================

/// The outcome of answering one question, created transiently during a session.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptResult {
    pub question_id: String,
    pub bite_id: String,
    pub is_correct: bool,
    /// 1 or 2.
    pub attempt_number: u8,
    pub time_to_answer_ms: i64,
    pub xp_awarded: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadingStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
}

impl ReadingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
        }
    }
}

/// Per (user, book) aggregate progress, rewritten at every bite boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingProgress {
    pub user_id: String,
    pub book_id: String,
    pub status: ReadingStatus,
    /// The bite to resume from; `None` once the last bite has been completed.
    pub current_bite_id: Option<String>,
    pub completed_bites: u32,
    pub total_bites: u32,
    pub percent_complete: f64,
    pub average_competency: f64,
    pub average_attempts: f64,
    pub avg_time_per_question_ms: i64,
    pub total_xp_earned: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One row of the append-only bite completion history.
#[derive(Debug, Clone, PartialEq)]
pub struct BiteCompletion {
    pub user_id: String,
    pub bite_id: String,
    pub book_id: String,
    pub xp_earned: u32,
    pub competency_percent: f64,
    pub time_spent_ms: i64,
    pub completed_at: DateTime<Utc>,
}

//=========================================================================================
// Achievements
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeType {
    Completion,
    Specialty,
    Hidden,
}

impl BadgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completion => "COMPLETION",
            Self::Specialty => "SPECIALTY",
            Self::Hidden => "HIDDEN",
        }
    }
}

/// An earned badge. Unique per `(user_id, badge_id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct BadgeRecord {
    pub user_id: String,
    pub badge_id: String,
    pub book_id: String,
    pub badge_type: BadgeType,
    pub earned_at: DateTime<Utc>,
}

//=========================================================================================
// Competitive simulation
//=========================================================================================

/// A synthetic peer whose progress is extrapolated from its seed rates.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord {
    pub id: String,
    pub display_name: String,
    pub avatar_id: String,
    pub total_xp: u32,
    pub total_bites_completed: u32,
    pub avg_competency: f64,
    pub current_streak_days: u32,
    pub daily_xp_rate: u32,
    pub daily_bite_rate: u32,
    pub seeded_at: DateTime<Utc>,
}

//=========================================================================================
// User state held in the preference store
//=========================================================================================

/// Health as persisted. Invariant: `segments <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthState {
    pub segments: u32,
    pub max: u32,
    pub last_recharge_at: DateTime<Utc>,
}

/// A snapshot of every user-level value kept in the key-value preference store.
///
/// Optional fields are absent until first written; readers substitute their defaults
/// (health falls back to the configured maximum, the recharge clock to "now").
#[derive(Debug, Clone, PartialEq)]
pub struct UserPreferences {
    pub user_id: String,
    pub display_name: String,
    pub current_health: Option<u32>,
    pub last_health_recharge_at: Option<DateTime<Utc>>,
    pub total_xp: u32,
    pub total_bites_completed: u32,
    pub books_completed: u32,
    pub current_streak_days: u32,
    pub longest_streak_days: u32,
    /// `YYYY-MM-DD` of the last day with a completed bite.
    pub last_active_date: Option<String>,
    pub review_text_used_today: u32,
    /// `YYYY-MM-DD` the review counter belongs to.
    pub review_text_date: Option<String>,
    pub is_first_launch: bool,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            user_id: "u_local_001".to_string(),
            display_name: "Reader".to_string(),
            current_health: None,
            last_health_recharge_at: None,
            total_xp: 0,
            total_bites_completed: 0,
            books_completed: 0,
            current_streak_days: 0,
            longest_streak_days: 0,
            last_active_date: None,
            review_text_used_today: 0,
            review_text_date: None,
            is_first_launch: true,
        }
    }
}

//=========================================================================================
// Telemetry
//=========================================================================================

/// Fire-and-forget analytics events emitted by a reading session.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    SessionStart {
        session_id: Uuid,
    },
    BiteStarted {
        book_id: String,
        bite_id: String,
    },
    QuestionAttempt {
        book_id: String,
        bite_id: String,
        question_id: String,
        attempt_number: u8,
        time_to_answer_ms: i64,
        xp_awarded: u32,
    },
    BiteCompleted {
        book_id: String,
        bite_id: String,
        competency_percent: f64,
    },
    HealthChanged {
        health_delta: i32,
    },
    ReviewTextOpened {
        book_id: String,
        bite_id: String,
    },
}

impl TelemetryEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionStart { .. } => "SESSION_START",
            Self::BiteStarted { .. } => "BITE_STARTED",
            Self::QuestionAttempt { .. } => "QUESTION_ATTEMPT",
            Self::BiteCompleted { .. } => "BITE_COMPLETED",
            Self::HealthChanged { .. } => "HEALTH_CHANGED",
            Self::ReviewTextOpened { .. } => "REVIEW_TEXT_OPENED",
        }
    }
}
