//! services/engine/src/session/state.rs
//!
//! Defines the engine's shared context and the per-session phase types.

use chrono::{DateTime, Utc};
use litura_core::domain::{AttemptResult, Bite, Question, ReadingProgress};
use litura_core::ports::{
    BadgeStore, Clock, ContentProvider, PeerStore, PreferenceStore, ProgressStore, TelemetrySink,
};
use std::collections::HashSet;
use std::sync::Arc;

use crate::badges::BadgeRuleEvaluator;
use crate::competitive::{CompetitiveSimulator, CompetitiveStandings};
use crate::config::RulesHandle;
use crate::health::HealthRegenerator;
use crate::preferences::PreferencesLedger;

//=========================================================================================
// EngineContext (Shared Across All Sessions)
//=========================================================================================

/// The external collaborators the engine is wired to.
#[derive(Clone)]
pub struct Ports {
    pub content: Arc<dyn ContentProvider>,
    pub progress: Arc<dyn ProgressStore>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub badges: Arc<dyn BadgeStore>,
    pub peers: Arc<dyn PeerStore>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub clock: Arc<dyn Clock>,
}

/// The shared engine state, created once at startup and handed to every session.
#[derive(Clone)]
pub struct EngineContext {
    pub content: Arc<dyn ContentProvider>,
    pub progress: Arc<dyn ProgressStore>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub clock: Arc<dyn Clock>,
    pub rules: Arc<RulesHandle>,
    pub ledger: Arc<PreferencesLedger>,
    pub health: Arc<HealthRegenerator>,
    pub badges: Arc<BadgeRuleEvaluator>,
    pub competition: Arc<CompetitiveSimulator>,
}

impl EngineContext {
    pub fn new(ports: Ports, rules: Arc<RulesHandle>) -> Self {
        let ledger = Arc::new(PreferencesLedger::new(ports.preferences));
        let health = Arc::new(HealthRegenerator::new(
            ledger.clone(),
            rules.clone(),
            ports.clock.clone(),
        ));
        let badges = Arc::new(BadgeRuleEvaluator::new(
            ports.badges,
            ports.progress.clone(),
            ports.clock.clone(),
        ));
        let competition = Arc::new(CompetitiveSimulator::new(
            ports.peers,
            ledger.clone(),
            ports.clock.clone(),
        ));
        Self {
            content: ports.content,
            progress: ports.progress,
            telemetry: ports.telemetry,
            clock: ports.clock,
            rules,
            ledger,
            health,
            badges,
            competition,
        }
    }
}

//=========================================================================================
// SessionPhase (Specific to One Reading Session)
//=========================================================================================

/// Where a reading session currently is.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionPhase {
    Loading,
    IntroSplash { fact: &'static str },
    BiteText,
    Question(QuestionView),
    Recap(BiteRecap),
    ExitSplash { fact: &'static str },
    /// Health is exhausted; only `start` leaves this phase.
    Blocked,
}

impl SessionPhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::IntroSplash { .. } => "intro_splash",
            Self::BiteText => "bite_text",
            Self::Question(_) => "question",
            Self::Recap(_) => "recap",
            Self::ExitSplash { .. } => "exit_splash",
            Self::Blocked => "blocked",
        }
    }
}

/// The comprehension checks of the current bite and the answer in progress.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionView {
    pub questions: Vec<Question>,
    pub index: usize,
    /// 1 or 2.
    pub attempt: u8,
    pub selected: Option<String>,
    pub eliminated: HashSet<String>,
    /// Set once the current question is resolved; the correct choice is shown.
    pub revealed: bool,
    pub started_at: DateTime<Utc>,
}

impl QuestionView {
    pub fn new(questions: Vec<Question>, started_at: DateTime<Utc>) -> Self {
        Self {
            questions,
            index: 0,
            attempt: 1,
            selected: None,
            eliminated: HashSet::new(),
            revealed: false,
            started_at,
        }
    }

    pub fn current(&self) -> Option<&Question> {
        self.questions.get(self.index)
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 >= self.questions.len()
    }

    /// Moves to the next question, clearing the per-question answer state.
    pub fn advance(&mut self, now: DateTime<Utc>) {
        self.index += 1;
        self.attempt = 1;
        self.selected = None;
        self.eliminated.clear();
        self.revealed = false;
        self.started_at = now;
    }
}

/// Summary shown after a bite is committed.
#[derive(Debug, Clone, PartialEq)]
pub struct BiteRecap {
    pub time_spent_ms: i64,
    pub xp_earned: u32,
    pub competency_percent: f64,
    pub new_badges: Vec<String>,
    /// Absent when competition is disabled.
    pub standings: Option<CompetitiveStandings>,
}

/// The bite being read and what has been answered in it so far.
#[derive(Debug, Clone)]
pub(crate) struct ActiveBite {
    pub bite: Bite,
    pub started_at: DateTime<Utc>,
    pub results: Vec<AttemptResult>,
    pub review_text_visible: bool,
    pub commit: CommitSteps,
}

impl ActiveBite {
    pub fn new(bite: Bite, started_at: DateTime<Utc>) -> Self {
        Self {
            bite,
            started_at,
            results: Vec::new(),
            review_text_visible: false,
            commit: CommitSteps::default(),
        }
    }
}

/// Durable writes already applied while committing the active bite. A commit
/// retried after a store failure resumes from the first step not yet recorded.
#[derive(Debug, Clone, Default)]
pub(crate) struct CommitSteps {
    /// When the completion record was appended.
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: Option<ReadingProgress>,
    pub newly_completed: bool,
    /// Streak length once the lifetime counters were bumped.
    pub streak: Option<u32>,
    pub book_counted: bool,
    pub announced: bool,
}
