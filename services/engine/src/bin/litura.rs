//! services/engine/src/bin/litura.rs
//!
//! Runs one scripted reading session against in-memory stores and logs what the
//! engine decides along the way.

use engine_lib::{
    adapters::{
        MemoryBadgeStore, MemoryContent, MemoryPeerStore, MemoryPreferenceStore,
        MemoryProgressStore, TracingTelemetry,
    },
    config::{Config, RulesHandle},
    error::EngineError,
    session::{EngineContext, Ports, SessionPhase, SessionStateMachine},
};
use futures::StreamExt;
use litura_core::domain::{BadgeDefinitions, Bite, Book, Choice, HiddenBadge, Question};
use litura_core::ports::SystemClock;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEMO_BOOK: &str = "b_lighthouse";

#[tokio::main]
async fn main() -> Result<(), EngineError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!(rules = %config.rules_path.display(), "Configuration loaded.");

    // --- 2. Load the Game Rules ---
    let rules = Arc::new(RulesHandle::new());
    rules.initialize_from_path(&config.rules_path)?;

    // --- 3. Build the Engine Context ---
    let ports = Ports {
        content: Arc::new(demo_content()),
        progress: Arc::new(MemoryProgressStore::default()),
        preferences: Arc::new(MemoryPreferenceStore::default()),
        badges: Arc::new(MemoryBadgeStore::default()),
        peers: Arc::new(MemoryPeerStore::default()),
        telemetry: Arc::new(TracingTelemetry),
        clock: Arc::new(SystemClock),
    };
    let ctx = Arc::new(EngineContext::new(ports, rules));

    if let Some(user_id) = config.user_id.clone() {
        ctx.ledger.update(move |prefs| prefs.user_id = user_id).await?;
    }
    if ctx.ledger.load().await?.is_first_launch {
        ctx.competition.seed_if_needed().await?;
        ctx.ledger.set_first_launch_complete().await?;
    }

    // --- 4. Watch Health in the Background ---
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let health = ctx.health.clone();
        let cancel = cancel.clone();
        let period = config.health_poll_interval;
        async move {
            let readings = health.observe_health(period, cancel);
            tokio::pin!(readings);
            while let Some(reading) = readings.next().await {
                match reading {
                    Ok(segments) => info!(segments, "Health observed."),
                    Err(e) => warn!(error = %e, "Health observation failed."),
                }
            }
        }
    });

    // --- 5. Run the Scripted Session ---
    let result = run_session(ctx.clone()).await;

    cancel.cancel();
    if let Err(e) = watcher.await {
        warn!(error = %e, "Health watcher ended abnormally.");
    }
    result?;

    let prefs = ctx.ledger.load().await?;
    info!(
        user_id = %prefs.user_id,
        total_xp = prefs.total_xp,
        bites = prefs.total_bites_completed,
        books = prefs.books_completed,
        streak = prefs.current_streak_days,
        "Session finished."
    );
    Ok(())
}

/// Reads the demo book to the end, missing the first question of every bite once.
async fn run_session(ctx: Arc<EngineContext>) -> Result<(), EngineError> {
    let mut session = SessionStateMachine::new(ctx);
    session.start(DEMO_BOOK, None).await?;

    loop {
        match session.phase().clone() {
            SessionPhase::IntroSplash { fact } => {
                info!(fact, "Splash.");
                session.dismiss_splash();
            }
            SessionPhase::BiteText => {
                if let Some(bite) = session.current_bite() {
                    info!(bite_id = %bite.id, text = %bite.text, "Reading bite.");
                }
                session.finish_reading_bite().await?;
            }
            SessionPhase::Question(view) => {
                let Some(question) = view.current() else {
                    break;
                };
                if view.revealed {
                    session.next_question().await?;
                    continue;
                }
                let miss_once = view.index == 0 && view.attempt == 1;
                let choice = question
                    .choices
                    .iter()
                    .map(|c| c.id.as_str())
                    .find(|id| (*id == question.correct_choice_id) != miss_once)
                    .unwrap_or(question.correct_choice_id.as_str());
                session.select_choice(choice);
                session.submit_answer().await?;
            }
            SessionPhase::Recap(recap) => {
                info!(
                    xp = recap.xp_earned,
                    competency = recap.competency_percent,
                    badges = ?recap.new_badges,
                    progress = session.progress_percent(),
                    "Bite recap."
                );
                if let Some(standings) = &recap.standings {
                    info!(
                        ahead = standings.friends_ahead,
                        behind = standings.friends_behind,
                        rank_delta = ?standings.rank_delta,
                        "Standings."
                    );
                    for highlight in &standings.highlights {
                        info!(friend = %highlight.friend_name, "{}", highlight.message);
                    }
                }
                session.next_bite().await?;
            }
            SessionPhase::ExitSplash { fact } => {
                info!(fact, "Book finished.");
                break;
            }
            SessionPhase::Blocked => {
                warn!("Out of health; come back later.");
                break;
            }
            SessionPhase::Loading => {
                warn!(book_id = DEMO_BOOK, "Session did not start.");
                break;
            }
        }
    }
    Ok(())
}

fn demo_content() -> MemoryContent {
    let mut content = MemoryContent::new();
    let passages = [
        "The lamp at the top of the tower had not failed in forty years.",
        "Mara climbed the hundred and twelve steps every evening at dusk.",
        "On the night of the storm, a ship's bell rang out beyond the rocks.",
    ];
    content.insert_book(Book {
        id: DEMO_BOOK.to_string(),
        title: "The Lighthouse Keeper".to_string(),
        author: "Litura Editions".to_string(),
        total_bites: passages.len() as u32,
        badges: BadgeDefinitions {
            completion_badge: "badge_lighthouse_complete".to_string(),
            specialty_badges: vec!["badge_storm_watcher".to_string()],
            hidden_badges: vec![HiddenBadge {
                id: "badge_keen_eye".to_string(),
                condition: "average competency >= 60".to_string(),
            }],
        },
    });

    for (i, text) in passages.iter().enumerate() {
        let order_index = i as u32 + 1;
        let bite_id = format!("lh_bite_{}", order_index);
        content.insert_bite(Bite {
            id: bite_id.clone(),
            book_id: DEMO_BOOK.to_string(),
            chapter_id: "lh_ch_1".to_string(),
            order_index,
            text: text.to_string(),
            estimated_seconds: 40,
        });
        for n in 1..=3 {
            content.insert_question(Question {
                id: format!("{}_q{}", bite_id, n),
                bite_id: bite_id.clone(),
                book_id: DEMO_BOOK.to_string(),
                kind: "literal".to_string(),
                difficulty: "easy".to_string(),
                prompt: format!("Question {} about passage {}?", n, order_index),
                choices: ["a", "b", "c", "d"]
                    .iter()
                    .map(|id| Choice {
                        id: id.to_string(),
                        text: format!("Option {}", id.to_uppercase()),
                    })
                    .collect(),
                correct_choice_id: "c".to_string(),
                explanation: "Stated directly in the passage.".to_string(),
            });
        }
    }
    content
}
