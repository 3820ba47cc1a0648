//! services/engine/src/session/machine.rs
//!
//! Drives one reading session through its phases:
//! `Loading → IntroSplash → BiteText → Question → Recap → (BiteText | ExitSplash)`,
//! with `Blocked` entered whenever health runs out at a bite boundary.
//!
//! The machine is single-writer: every operation takes `&mut self`. An operation
//! called in a phase where it does not apply is ignored, and a lookup that finds
//! nothing aborts the operation without changing phase. Only bite completion
//! writes durable progress; dropping the machine mid-bite discards its answers.

use chrono::{DateTime, Utc};
use litura_core::domain::{
    AttemptResult, Bite, BiteCompletion, Book, ReadingProgress, ReadingStatus, TelemetryEvent,
};
use litura_core::ports::PortResult;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::facts::random_fact;
use super::state::{ActiveBite, BiteRecap, CommitSteps, EngineContext, QuestionView, SessionPhase};
use crate::config::MAX_ATTEMPTS_PER_QUESTION;
use crate::error::EngineResult;
use crate::preferences::{review_text_used_on, spend_review_text};
use crate::scoring::{self, ScoringEngine};

pub struct SessionStateMachine {
    ctx: Arc<EngineContext>,
    session_id: Uuid,
    phase: SessionPhase,
    user_id: String,
    book: Option<Book>,
    active: Option<ActiveBite>,
    health: u32,
    progress_percent: f64,
}

impl SessionStateMachine {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            session_id: Uuid::new_v4(),
            phase: SessionPhase::Loading,
            user_id: String::new(),
            book: None,
            active: None,
            health: 0,
            progress_percent: 0.0,
        }
    }

    //=====================================================================================
    // Accessors
    //=====================================================================================

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Health as of the last operation that read or changed it.
    pub fn health(&self) -> u32 {
        self.health
    }

    /// Share of the book completed, `0.0..=100.0`.
    pub fn progress_percent(&self) -> f64 {
        self.progress_percent
    }

    pub fn book(&self) -> Option<&Book> {
        self.book.as_ref()
    }

    pub fn current_bite(&self) -> Option<&Bite> {
        self.active.as_ref().map(|a| &a.bite)
    }

    /// Answers resolved in the current bite.
    pub fn results(&self) -> &[AttemptResult] {
        self.active.as_ref().map(|a| a.results.as_slice()).unwrap_or_default()
    }

    pub fn review_text_visible(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.review_text_visible)
    }

    pub async fn review_text_remaining(&self) -> EngineResult<u32> {
        let rules = self.ctx.rules.get()?;
        let today = self.ctx.clock.now().date_naive();
        let prefs = self.ctx.ledger.load().await?;
        Ok(rules
            .review_text
            .daily_limit
            .saturating_sub(review_text_used_on(&prefs, today)))
    }

    //=====================================================================================
    // Operations
    //=====================================================================================

    /// Opens `book_id` at `start_bite_id`, the saved bite, or the first bite, in that order.
    pub async fn start(&mut self, book_id: &str, start_bite_id: Option<&str>) -> EngineResult<()> {
        let rules = self.ctx.rules.get()?;
        self.session_id = Uuid::new_v4();

        let health = self.ctx.health.current_health().await?;
        self.health = health;
        if health == 0 {
            info!(session_id = %self.session_id, book_id, "No health left; session blocked.");
            self.enter(SessionPhase::Blocked);
            return Ok(());
        }

        let Some(book) = found(self.ctx.content.get_book(book_id).await, "book", book_id)? else {
            return Ok(());
        };
        let prefs = self.ctx.ledger.load().await?;
        let progress = self.ctx.progress.get_progress(&prefs.user_id, book_id).await?;

        let saved_bite = progress.as_ref().and_then(|p| p.current_bite_id.as_deref());
        let bite = match (start_bite_id, saved_bite) {
            (Some(id), _) | (None, Some(id)) => {
                found(self.ctx.content.get_bite(id).await, "bite", id)?
            }
            (None, None) => self.ctx.content.get_bite_by_index(book_id, 1).await?,
        };
        let Some(bite) = bite.filter(|b| b.book_id == book.id) else {
            warn!(book_id, "No bite to start from; ignoring start.");
            return Ok(());
        };

        if rules.competition.enabled {
            self.ctx.competition.seed_if_needed().await?;
        }

        let now = self.ctx.clock.now();
        self.ctx.health.reset_bite_loss_counter();
        self.user_id = prefs.user_id;
        self.progress_percent = progress.map(|p| p.percent_complete).unwrap_or(0.0);

        info!(
            session_id = %self.session_id,
            user_id = %self.user_id,
            book_id,
            bite_id = %bite.id,
            health,
            "Reading session started."
        );
        self.emit(TelemetryEvent::SessionStart {
            session_id: self.session_id,
        })
        .await;
        self.emit(TelemetryEvent::BiteStarted {
            book_id: book.id.clone(),
            bite_id: bite.id.clone(),
        })
        .await;

        self.book = Some(book);
        self.active = Some(ActiveBite::new(bite, now));
        self.enter(SessionPhase::IntroSplash {
            fact: random_fact(),
        });
        Ok(())
    }

    pub fn dismiss_splash(&mut self) {
        if matches!(self.phase, SessionPhase::IntroSplash { .. }) {
            self.enter(SessionPhase::BiteText);
        } else {
            self.ignored("dismiss_splash");
        }
    }

    /// Samples this bite's comprehension checks and moves to the first one.
    pub async fn finish_reading_bite(&mut self) -> EngineResult<()> {
        if !matches!(self.phase, SessionPhase::BiteText) {
            self.ignored("finish_reading_bite");
            return Ok(());
        }
        let rules = self.ctx.rules.get()?;
        let Some(bite_id) = self.active.as_ref().map(|a| a.bite.id.clone()) else {
            return Ok(());
        };

        let sampled = self
            .ctx
            .content
            .sample_questions(&bite_id, rules.question_rules.questions_per_bite)
            .await;
        let Some(questions) = found(sampled, "questions", &bite_id)? else {
            return Ok(());
        };

        if let Some(active) = self.active.as_mut() {
            active.results.clear();
        }
        let empty = questions.is_empty();
        self.enter(SessionPhase::Question(QuestionView::new(
            questions,
            self.ctx.clock.now(),
        )));
        if empty {
            warn!(bite_id = %bite_id, "Bite has no questions; completing it directly.");
            return self.complete_bite().await;
        }
        Ok(())
    }

    /// Marks `choice_id` as the pending answer. Eliminated or unknown choices are ignored.
    pub fn select_choice(&mut self, choice_id: &str) {
        match &mut self.phase {
            SessionPhase::Question(view) if !view.revealed => {
                let offered = view
                    .current()
                    .is_some_and(|q| q.choices.iter().any(|c| c.id == choice_id));
                if offered && !view.eliminated.contains(choice_id) {
                    view.selected = Some(choice_id.to_string());
                    return;
                }
                debug!(choice_id, "Choice is not selectable.");
            }
            _ => self.ignored("select_choice"),
        }
    }

    /// Resolves the pending selection against the current question.
    ///
    /// A wrong first attempt costs health, eliminates the choice and allows a
    /// second attempt. A correct answer or any second attempt is final: it is
    /// scored, recorded and the correct choice is revealed.
    pub async fn submit_answer(&mut self) -> EngineResult<()> {
        let (question, selected, attempt, started_at) = match &self.phase {
            SessionPhase::Question(view) if !view.revealed => {
                match (view.current(), view.selected.as_ref()) {
                    (Some(q), Some(s)) => (q.clone(), s.clone(), view.attempt, view.started_at),
                    _ => {
                        self.ignored("submit_answer");
                        return Ok(());
                    }
                }
            }
            _ => {
                self.ignored("submit_answer");
                return Ok(());
            }
        };
        let Some(book_id) = self.book.as_ref().map(|b| b.id.clone()) else {
            return Ok(());
        };
        let rules = self.ctx.rules.get()?;
        let now = self.ctx.clock.now();
        let time_to_answer_ms = (now - started_at).num_milliseconds().max(0);
        let is_correct = question.is_correct(&selected);

        if !is_correct && attempt < MAX_ATTEMPTS_PER_QUESTION {
            self.penalize().await?;
            if let SessionPhase::Question(view) = &mut self.phase {
                view.eliminated.insert(selected);
                view.selected = None;
                view.attempt = MAX_ATTEMPTS_PER_QUESTION;
                view.started_at = now;
            }
            return Ok(());
        }

        let xp = if is_correct {
            ScoringEngine::new(rules.xp_rules).compute_xp(attempt)
        } else {
            0
        };
        if let Some(active) = self.active.as_mut() {
            active.results.push(AttemptResult {
                question_id: question.id.clone(),
                bite_id: question.bite_id.clone(),
                is_correct,
                attempt_number: attempt,
                time_to_answer_ms,
                xp_awarded: xp,
            });
        }
        self.emit(TelemetryEvent::QuestionAttempt {
            book_id,
            bite_id: question.bite_id.clone(),
            question_id: question.id.clone(),
            attempt_number: attempt,
            time_to_answer_ms,
            xp_awarded: xp,
        })
        .await;
        debug!(question_id = %question.id, is_correct, attempt, xp, "Answer resolved.");

        if !is_correct {
            self.penalize().await?;
        }
        if let SessionPhase::Question(view) = &mut self.phase {
            if !is_correct {
                view.eliminated.insert(selected);
            }
            view.revealed = true;
        }
        if xp > 0 {
            self.ctx.ledger.add_xp(xp).await?;
        }
        Ok(())
    }

    /// Moves past a resolved question, completing the bite after the last one.
    pub async fn next_question(&mut self) -> EngineResult<()> {
        if !matches!(&self.phase, SessionPhase::Question(view) if view.revealed) {
            self.ignored("next_question");
            return Ok(());
        }
        let now = self.ctx.clock.now();
        if let SessionPhase::Question(view) = &mut self.phase {
            if !view.is_last() {
                view.advance(now);
                return Ok(());
            }
        }
        self.complete_bite().await
    }

    /// Commits the bite: completion history, book progress, lifetime counters,
    /// badges and peer standings. Only valid once every question is resolved.
    ///
    /// Each durable write is recorded on the active bite as it lands, so calling
    /// this again after a store failure applies only the writes still missing.
    pub async fn complete_bite(&mut self) -> EngineResult<()> {
        let ready = matches!(
            &self.phase,
            SessionPhase::Question(view)
                if view.questions.is_empty() || (view.is_last() && view.revealed)
        );
        if !ready {
            self.ignored("complete_bite");
            return Ok(());
        }
        let (Some(book), Some(active)) = (self.book.clone(), self.active.clone()) else {
            return Ok(());
        };
        let rules = self.ctx.rules.get()?;
        let user_id = self.user_id.clone();
        let results = &active.results;
        let mut steps = active.commit.clone();

        let competency = scoring::compute_competency(results);
        let xp_earned = scoring::total_xp(results);

        let now = match steps.completed_at {
            Some(at) => at,
            None => {
                let now = self.ctx.clock.now();
                self.ctx
                    .progress
                    .append_bite_completion(BiteCompletion {
                        user_id: user_id.clone(),
                        bite_id: active.bite.id.clone(),
                        book_id: book.id.clone(),
                        xp_earned,
                        competency_percent: competency,
                        time_spent_ms: (now - active.started_at).num_milliseconds().max(0),
                        completed_at: now,
                    })
                    .await?;
                steps.completed_at = Some(now);
                self.record_commit(&steps);
                now
            }
        };
        let time_spent_ms = (now - active.started_at).num_milliseconds().max(0);

        let progress = match steps.progress.clone() {
            Some(progress) => progress,
            None => {
                let (progress, newly_completed) = self
                    .build_progress(&user_id, &book, &active, xp_earned, now)
                    .await?;
                self.ctx.progress.upsert_progress(progress.clone()).await?;
                steps.progress = Some(progress.clone());
                steps.newly_completed = newly_completed;
                self.record_commit(&steps);
                progress
            }
        };

        let streak = match steps.streak {
            Some(streak) => streak,
            None => {
                self.ctx.ledger.increment_bites_completed().await?;
                let streak = self.ctx.ledger.record_activity(now.date_naive()).await?;
                steps.streak = Some(streak);
                self.record_commit(&steps);
                streak
            }
        };

        if steps.newly_completed && !steps.book_counted {
            let books = self.ctx.ledger.increment_books_completed().await?;
            steps.book_counted = true;
            self.record_commit(&steps);
            info!(
                user_id = %user_id,
                book_id = %book.id,
                books_completed = books,
                "Book completed."
            );
        }

        if !steps.announced {
            self.emit(TelemetryEvent::BiteCompleted {
                book_id: book.id.clone(),
                bite_id: active.bite.id.clone(),
                competency_percent: competency,
            })
            .await;
            steps.announced = true;
            self.record_commit(&steps);
        }

        let new_badges = self
            .ctx
            .badges
            .evaluate(&user_id, &book.id, &progress, &book.badges)
            .await?;

        let standings = if rules.competition.enabled {
            self.ctx.competition.advance().await?;
            let mut standings = self.ctx.competition.comparisons().await?;
            if !rules.competition.visibility.show_rank_delta {
                standings.rank_delta = None;
            }
            Some(standings)
        } else {
            None
        };

        info!(
            session_id = %self.session_id,
            bite_id = %active.bite.id,
            xp_earned,
            competency,
            completed_bites = progress.completed_bites,
            total_bites = book.total_bites,
            streak,
            "Bite completed."
        );

        self.progress_percent = progress.percent_complete;
        self.enter(SessionPhase::Recap(BiteRecap {
            time_spent_ms,
            xp_earned,
            competency_percent: competency,
            new_badges: new_badges.into_iter().map(|b| b.badge_id).collect(),
            standings,
        }));
        Ok(())
    }

    /// Leaves the recap for the next bite, the exit splash, or `Blocked`.
    pub async fn next_bite(&mut self) -> EngineResult<()> {
        if !matches!(self.phase, SessionPhase::Recap(_)) {
            self.ignored("next_bite");
            return Ok(());
        }
        let (Some(book_id), Some(order_index)) = (
            self.book.as_ref().map(|b| b.id.clone()),
            self.active.as_ref().map(|a| a.bite.order_index),
        ) else {
            return Ok(());
        };

        let Some(next) = self.ctx.content.get_next_bite(&book_id, order_index).await? else {
            info!(session_id = %self.session_id, book_id = %book_id, "End of book reached.");
            self.enter(SessionPhase::ExitSplash {
                fact: random_fact(),
            });
            return Ok(());
        };

        let health = self.ctx.health.current_health().await?;
        self.health = health;
        if health == 0 {
            info!(session_id = %self.session_id, "No health left; session blocked.");
            self.enter(SessionPhase::Blocked);
            return Ok(());
        }

        self.ctx.health.reset_bite_loss_counter();
        self.emit(TelemetryEvent::BiteStarted {
            book_id,
            bite_id: next.id.clone(),
        })
        .await;
        self.active = Some(ActiveBite::new(next, self.ctx.clock.now()));
        self.enter(SessionPhase::BiteText);
        Ok(())
    }

    /// Shows or hides the bite text while reading or answering. Showing it spends
    /// one use of the daily allowance; hiding it is free.
    pub async fn toggle_review_text(&mut self) -> EngineResult<()> {
        if !matches!(self.phase, SessionPhase::BiteText | SessionPhase::Question(_)) {
            self.ignored("toggle_review_text");
            return Ok(());
        }
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        if active.review_text_visible {
            active.review_text_visible = false;
            return Ok(());
        }

        let rules = self.ctx.rules.get()?;
        if !rules.review_text.enabled {
            debug!("Review text is disabled.");
            return Ok(());
        }
        let today = self.ctx.clock.now().date_naive();
        let daily_limit = rules.review_text.daily_limit;
        let spent = self
            .ctx
            .ledger
            .update(|prefs| spend_review_text(prefs, today, daily_limit))
            .await?;
        if !spent {
            info!(daily_limit, "Daily review-text allowance used up.");
            return Ok(());
        }

        let (Some(book_id), Some(bite_id)) = (
            self.book.as_ref().map(|b| b.id.clone()),
            self.active.as_mut().map(|a| {
                a.review_text_visible = true;
                a.bite.id.clone()
            }),
        ) else {
            return Ok(());
        };
        self.emit(TelemetryEvent::ReviewTextOpened { book_id, bite_id })
            .await;
        Ok(())
    }

    //=====================================================================================
    // Helpers
    //=====================================================================================

    fn enter(&mut self, phase: SessionPhase) {
        debug!(
            session_id = %self.session_id,
            from = self.phase.name(),
            to = phase.name(),
            "Session phase change."
        );
        self.phase = phase;
    }

    /// Book progress after `active` lands, and whether it finishes the book for the first time.
    async fn build_progress(
        &self,
        user_id: &str,
        book: &Book,
        active: &ActiveBite,
        xp_earned: u32,
        now: DateTime<Utc>,
    ) -> EngineResult<(ReadingProgress, bool)> {
        let previous = self.ctx.progress.get_progress(user_id, &book.id).await?;
        let completed_bites = self.ctx.progress.completed_bite_count(user_id, &book.id).await?;
        let average_competency = self
            .ctx
            .progress
            .average_competency(user_id, &book.id)
            .await?
            .unwrap_or(0.0);
        let next = self
            .ctx
            .content
            .get_next_bite(&book.id, active.bite.order_index)
            .await?;

        let status = if completed_bites >= book.total_bites {
            ReadingStatus::Completed
        } else {
            ReadingStatus::InProgress
        };
        let newly_completed = status == ReadingStatus::Completed
            && previous.as_ref().map(|p| p.status) != Some(ReadingStatus::Completed);

        let progress = ReadingProgress {
            user_id: user_id.to_string(),
            book_id: book.id.clone(),
            status,
            current_bite_id: next.map(|b| b.id),
            completed_bites,
            total_bites: book.total_bites,
            percent_complete: percent(completed_bites, book.total_bites),
            average_competency,
            average_attempts: scoring::average_attempts(&active.results),
            avg_time_per_question_ms: scoring::average_time_ms(&active.results),
            total_xp_earned: previous
                .as_ref()
                .map_or(0, |p| p.total_xp_earned)
                .saturating_add(xp_earned),
            started_at: previous
                .as_ref()
                .and_then(|p| p.started_at)
                .or(Some(active.started_at)),
            last_read_at: Some(now),
            completed_at: match status {
                ReadingStatus::Completed => previous
                    .as_ref()
                    .and_then(|p| p.completed_at)
                    .or(Some(now)),
                _ => None,
            },
        };
        Ok((progress, newly_completed))
    }

    fn record_commit(&mut self, steps: &CommitSteps) {
        if let Some(active) = self.active.as_mut() {
            active.commit = steps.clone();
        }
    }

    fn ignored(&self, operation: &str) {
        debug!(operation, phase = self.phase.name(), "Operation does not apply; ignoring.");
    }

    async fn penalize(&mut self) -> EngineResult<()> {
        let penalty = self.ctx.health.apply_penalty().await?;
        self.health = penalty.health;
        if penalty.delta != 0 {
            self.emit(TelemetryEvent::HealthChanged {
                health_delta: penalty.delta,
            })
            .await;
        }
        Ok(())
    }

    /// Records a telemetry event. Failures are logged and never returned.
    async fn emit(&self, event: TelemetryEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.ctx.telemetry.record(event, self.ctx.clock.now()).await {
            warn!(
                session_id = %self.session_id,
                event_type,
                error = %e,
                "Failed to record telemetry."
            );
        }
    }
}

/// Turns a not-found lookup into `None` so the caller can abort quietly.
fn found<T>(result: PortResult<T>, what: &str, id: &str) -> EngineResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => {
            warn!(what, id, error = %e, "Lookup found nothing; ignoring operation.");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn percent(completed: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (100.0 * f64::from(completed) / f64::from(total)).min(100.0)
}
