//! services/engine/src/health.rs
//!
//! Health segments: lazy time-based regeneration, wrong-answer penalties with a
//! per-bite loss ceiling, and a polling observation stream.
//!
//! Health is never advanced by a timer. Every read recomputes it from the stored
//! segments and recharge timestamp, so the result stays correct however long the
//! host process was suspended.

use async_stream::stream;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::Stream;
use litura_core::domain::{HealthState, UserPreferences};
use litura_core::ports::Clock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{GameEngineConfig, RulesHandle};
use crate::error::EngineResult;
use crate::preferences::PreferencesLedger;

/// Result of regenerating a stored health state up to `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Regeneration {
    pub state: HealthState,
    /// Segments gained; zero means nothing needs to be written back.
    pub gained: u32,
}

/// Pure regeneration arithmetic.
///
/// Gains `floor(elapsed / interval)` segments, capped at `max`. The recharge
/// timestamp advances by exactly the intervals consumed; when the cap swallows
/// part of the gain the timestamp moves to `now` so a full bar banks no time.
pub fn regenerate(
    stored: HealthState,
    now: DateTime<Utc>,
    interval: Option<ChronoDuration>,
) -> Regeneration {
    let unchanged = Regeneration {
        state: HealthState {
            segments: stored.segments.min(stored.max),
            ..stored
        },
        gained: 0,
    };
    let Some(interval) = interval else {
        return unchanged;
    };
    let interval_ms = interval.num_milliseconds();
    let elapsed_ms = (now - stored.last_recharge_at).num_milliseconds();
    if interval_ms <= 0 || elapsed_ms <= 0 {
        return unchanged;
    }

    let intervals = elapsed_ms / interval_ms;
    let room = stored.max.saturating_sub(stored.segments);
    let gained = u32::try_from(intervals).unwrap_or(u32::MAX).min(room);
    if gained == 0 {
        return unchanged;
    }

    let last_recharge_at = if i64::from(gained) < intervals {
        now
    } else {
        stored.last_recharge_at + ChronoDuration::milliseconds(interval_ms * i64::from(gained))
    };

    Regeneration {
        state: HealthState {
            segments: stored.segments + gained,
            max: stored.max,
            last_recharge_at,
        },
        gained,
    }
}

/// Outcome of a wrong-answer penalty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Penalty {
    pub health: u32,
    /// Change actually applied; zero when the per-bite cap was already reached.
    pub delta: i32,
}

pub struct HealthRegenerator {
    ledger: Arc<PreferencesLedger>,
    rules: Arc<RulesHandle>,
    clock: Arc<dyn Clock>,
    lost_this_bite: AtomicU32,
}

impl HealthRegenerator {
    pub fn new(
        ledger: Arc<PreferencesLedger>,
        rules: Arc<RulesHandle>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            rules,
            clock,
            lost_this_bite: AtomicU32::new(0),
        }
    }

    /// Current health, writing back any regeneration that occurred.
    pub async fn current_health(&self) -> EngineResult<u32> {
        let rules = self.rules.get()?;
        if !rules.health_system.enabled {
            return Ok(rules.health_system.max_segments);
        }
        let now = self.clock.now();
        self.ledger
            .update(|prefs| {
                let regen = regenerate(
                    stored_health(prefs, &rules, now),
                    now,
                    rules.recharge_interval(),
                );
                if regen.gained > 0 {
                    debug!(
                        gained = regen.gained,
                        health = regen.state.segments,
                        "Health regenerated."
                    );
                    store_health(prefs, regen.state);
                }
                regen.state.segments
            })
            .await
    }

    /// Current health without persisting regeneration.
    pub async fn peek_health(&self) -> EngineResult<u32> {
        let rules = self.rules.get()?;
        if !rules.health_system.enabled {
            return Ok(rules.health_system.max_segments);
        }
        let now = self.clock.now();
        let prefs = self.ledger.load().await?;
        let regen = regenerate(stored_health(&prefs, &rules, now), now, rules.recharge_interval());
        Ok(regen.state.segments)
    }

    pub async fn can_read(&self) -> EngineResult<bool> {
        Ok(self.current_health().await? > 0)
    }

    /// Subtracts the wrong-answer cost unless this bite already hit its loss ceiling.
    pub async fn apply_penalty(&self) -> EngineResult<Penalty> {
        let rules = self.rules.get()?;
        if !rules.health_system.enabled {
            return Ok(Penalty {
                health: rules.health_system.max_segments,
                delta: 0,
            });
        }
        let now = self.clock.now();
        let cap = rules.health_system.penalties.max_loss_per_bite;
        let cost = rules.health_system.penalties.wrong_answer_cost();

        let penalty = self
            .ledger
            .update(|prefs| {
                let mut state = regenerate(
                    stored_health(prefs, &rules, now),
                    now,
                    rules.recharge_interval(),
                )
                .state;
                let before = state.segments;

                if self.lost_this_bite.load(Ordering::SeqCst) < cap {
                    // The recharge clock starts when the bar drops below full.
                    if state.segments == state.max {
                        state.last_recharge_at = now;
                    }
                    state.segments = state.segments.saturating_sub(cost);
                    self.lost_this_bite.fetch_add(1, Ordering::SeqCst);
                }

                store_health(prefs, state);
                Penalty {
                    health: state.segments,
                    delta: state.segments as i32 - before as i32,
                }
            })
            .await?;

        info!(health = penalty.health, delta = penalty.delta, "Wrong-answer penalty applied.");
        Ok(penalty)
    }

    /// Called once when a bite begins.
    pub fn reset_bite_loss_counter(&self) {
        self.lost_this_bite.store(0, Ordering::SeqCst);
    }

    pub fn lost_this_bite(&self) -> u32 {
        self.lost_this_bite.load(Ordering::SeqCst)
    }

    /// Emits current health every `period` until `cancel` fires.
    ///
    /// The stream only reads; dropping it or cancelling the token has no side
    /// effects, and calling this again starts a fresh poll.
    pub fn observe_health(
        self: Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> impl Stream<Item = EngineResult<u32>> + Send {
        stream! {
            let mut ticker = tokio::time::interval(period);
            loop {
                let ticked = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => false,
                    _ = ticker.tick() => true,
                };
                if !ticked {
                    break;
                }
                yield self.peek_health().await;
            }
        }
    }
}

fn stored_health(
    prefs: &UserPreferences,
    rules: &GameEngineConfig,
    now: DateTime<Utc>,
) -> HealthState {
    let max = rules.health_system.max_segments;
    HealthState {
        segments: prefs.current_health.unwrap_or(max).min(max),
        max,
        last_recharge_at: prefs.last_health_recharge_at.unwrap_or(now),
    }
}

fn store_health(prefs: &mut UserPreferences, state: HealthState) {
    prefs.current_health = Some(state.segments);
    prefs.last_health_recharge_at = Some(state.last_recharge_at);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{ManualClock, MemoryPreferenceStore};
    use crate::config::tests::test_rules;
    use crate::error::EngineError;
    use chrono::TimeZone;
    use futures::StreamExt;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap()
    }

    fn setup(
        rules: GameEngineConfig,
    ) -> (Arc<HealthRegenerator>, Arc<PreferencesLedger>, Arc<ManualClock>) {
        let ledger = Arc::new(PreferencesLedger::new(Arc::new(MemoryPreferenceStore::default())));
        let clock = Arc::new(ManualClock::new(t0()));
        let rules = Arc::new(RulesHandle::with_config(rules).unwrap());
        let health = Arc::new(HealthRegenerator::new(ledger.clone(), rules, clock.clone()));
        (health, ledger, clock)
    }

    async fn seed(ledger: &PreferencesLedger, segments: u32, at: DateTime<Utc>) {
        ledger
            .update(|prefs| {
                prefs.current_health = Some(segments);
                prefs.last_health_recharge_at = Some(at);
            })
            .await
            .unwrap();
    }

    #[test]
    fn regeneration_consumes_only_whole_intervals() {
        let stored = HealthState {
            segments: 7,
            max: 10,
            last_recharge_at: t0(),
        };
        let now = t0() + ChronoDuration::minutes(17);
        let regen = regenerate(stored, now, Some(ChronoDuration::minutes(5)));
        assert_eq!(regen.gained, 3);
        assert_eq!(regen.state.segments, 10);
        assert_eq!(regen.state.last_recharge_at, t0() + ChronoDuration::minutes(15));
    }

    #[test]
    fn capped_regeneration_restarts_the_clock() {
        let stored = HealthState {
            segments: 9,
            max: 10,
            last_recharge_at: t0(),
        };
        let now = t0() + ChronoDuration::minutes(17);
        let regen = regenerate(stored, now, Some(ChronoDuration::minutes(5)));
        assert_eq!(regen.gained, 1);
        assert_eq!(regen.state.segments, 10);
        assert_eq!(regen.state.last_recharge_at, now);
    }

    #[test]
    fn no_interval_means_no_regeneration() {
        let stored = HealthState {
            segments: 2,
            max: 10,
            last_recharge_at: t0(),
        };
        let regen = regenerate(stored, t0() + ChronoDuration::days(3), None);
        assert_eq!(regen.gained, 0);
        assert_eq!(regen.state, stored);
    }

    #[test]
    fn partial_interval_gains_nothing() {
        let stored = HealthState {
            segments: 2,
            max: 10,
            last_recharge_at: t0(),
        };
        let regen = regenerate(
            stored,
            t0() + ChronoDuration::minutes(4),
            Some(ChronoDuration::minutes(5)),
        );
        assert_eq!(regen.gained, 0);
        assert_eq!(regen.state.last_recharge_at, t0());
    }

    #[tokio::test]
    async fn reads_write_back_only_when_segments_increase() {
        let (health, ledger, clock) = setup(test_rules());
        seed(&ledger, 7, t0()).await;

        clock.advance(ChronoDuration::minutes(3));
        assert_eq!(health.current_health().await.unwrap(), 7);
        assert_eq!(ledger.load().await.unwrap().last_health_recharge_at, Some(t0()));

        clock.advance(ChronoDuration::minutes(14));
        assert_eq!(health.current_health().await.unwrap(), 10);
        let prefs = ledger.load().await.unwrap();
        assert_eq!(prefs.current_health, Some(10));
        assert_eq!(prefs.last_health_recharge_at, Some(t0() + ChronoDuration::minutes(15)));
    }

    #[tokio::test]
    async fn missing_health_defaults_to_max() {
        let (health, _, _) = setup(test_rules());
        assert_eq!(health.current_health().await.unwrap(), 10);
        assert!(health.can_read().await.unwrap());
    }

    #[tokio::test]
    async fn penalties_stop_at_the_per_bite_cap() {
        let (health, _, _) = setup(test_rules());
        health.reset_bite_loss_counter();

        assert_eq!(health.apply_penalty().await.unwrap().health, 9);
        assert_eq!(health.apply_penalty().await.unwrap().health, 8);
        assert_eq!(health.apply_penalty().await.unwrap().health, 7);
        let fourth = health.apply_penalty().await.unwrap();
        assert_eq!(fourth, Penalty { health: 7, delta: 0 });

        health.reset_bite_loss_counter();
        assert_eq!(health.apply_penalty().await.unwrap().health, 6);
    }

    #[tokio::test]
    async fn health_never_goes_negative() {
        let (health, ledger, _) = setup(test_rules());
        seed(&ledger, 1, t0()).await;
        assert_eq!(health.apply_penalty().await.unwrap().health, 0);
        assert_eq!(health.apply_penalty().await.unwrap().health, 0);
        assert!(!health.can_read().await.unwrap());
    }

    #[tokio::test]
    async fn penalty_from_full_starts_the_recharge_clock() {
        let (health, ledger, clock) = setup(test_rules());
        seed(&ledger, 10, t0()).await;
        clock.advance(ChronoDuration::hours(2));

        health.apply_penalty().await.unwrap();
        assert_eq!(health.current_health().await.unwrap(), 9);

        clock.advance(ChronoDuration::minutes(5));
        assert_eq!(health.current_health().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn disabled_health_never_blocks() {
        let mut rules = test_rules();
        rules.health_system.enabled = false;
        let (health, ledger, _) = setup(rules);
        seed(&ledger, 0, t0()).await;

        assert_eq!(health.current_health().await.unwrap(), 10);
        assert_eq!(health.apply_penalty().await.unwrap().delta, 0);
    }

    #[tokio::test]
    async fn unloaded_rules_are_a_hard_error() {
        let ledger = Arc::new(PreferencesLedger::new(Arc::new(MemoryPreferenceStore::default())));
        let health = HealthRegenerator::new(
            ledger,
            Arc::new(RulesHandle::new()),
            Arc::new(ManualClock::new(t0())),
        );
        assert!(matches!(health.current_health().await, Err(EngineError::ConfigNotLoaded)));
    }

    #[tokio::test]
    async fn observation_polls_without_writing() {
        let (health, ledger, clock) = setup(test_rules());
        seed(&ledger, 3, t0()).await;
        clock.advance(ChronoDuration::minutes(10));

        let cancel = CancellationToken::new();
        let readings: Vec<u32> = health
            .clone()
            .observe_health(Duration::from_millis(5), cancel.clone())
            .take(3)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(readings, vec![5, 5, 5]);
        assert_eq!(ledger.load().await.unwrap().current_health, Some(3));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn penalties_race_cleanly_with_observers_and_readers() {
        let (health, ledger, _) = setup(test_rules());
        seed(&ledger, 10, t0()).await;

        let cancel = CancellationToken::new();
        let observer = tokio::spawn({
            let readings = health.clone().observe_health(Duration::from_millis(1), cancel.clone());
            async move {
                tokio::pin!(readings);
                let mut seen = Vec::new();
                while let Some(reading) = readings.next().await {
                    seen.push(reading.unwrap());
                }
                seen
            }
        });

        let mut tasks = Vec::new();
        for i in 0..20 {
            let health = health.clone();
            tasks.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    health.apply_penalty().await.unwrap();
                } else {
                    health.current_health().await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        cancel.cancel();
        let seen = observer.await.unwrap();

        // Ten penalties against a cap of three.
        assert_eq!(health.lost_this_bite(), 3);
        assert_eq!(health.current_health().await.unwrap(), 7);
        assert_eq!(ledger.load().await.unwrap().current_health, Some(7));
        assert!(seen.iter().all(|segments| (7..=10).contains(segments)));
    }

    #[tokio::test]
    async fn cancelled_observation_ends() {
        let (health, _, _) = setup(test_rules());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let readings: Vec<_> = health
            .observe_health(Duration::from_millis(5), cancel)
            .collect()
            .await;
        assert!(readings.is_empty());
    }
}
