//! services/engine/src/competitive.rs
//!
//! A small synthetic peer population the reader is compared against.
//!
//! Peers are seeded once and then drift upward at fixed daily rates. Their
//! progress is never ticked by a timer: each advance recomputes where a peer
//! should be from the seed time alone.

use chrono::{DateTime, Utc};
use litura_core::domain::PeerRecord;
use litura_core::ports::{Clock, PeerStore};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::EngineResult;
use crate::preferences::PreferencesLedger;

struct PeerSeed {
    id: &'static str,
    name: &'static str,
    avatar_id: &'static str,
    base_xp: u32,
    base_bites: u32,
    daily_xp: u32,
    daily_bites: u32,
    competency: f64,
    streak: u32,
}

const PEER_SEEDS: [PeerSeed; 5] = [
    PeerSeed {
        id: "f_alex",
        name: "Alex",
        avatar_id: "avatar_02",
        base_xp: 200,
        base_bites: 20,
        daily_xp: 30,
        daily_bites: 3,
        competency: 78.0,
        streak: 2,
    },
    PeerSeed {
        id: "f_sam",
        name: "Sam",
        avatar_id: "avatar_03",
        base_xp: 350,
        base_bites: 35,
        daily_xp: 45,
        daily_bites: 5,
        competency: 82.0,
        streak: 5,
    },
    PeerSeed {
        id: "f_jordan",
        name: "Jordan",
        avatar_id: "avatar_04",
        base_xp: 100,
        base_bites: 10,
        daily_xp: 20,
        daily_bites: 2,
        competency: 71.0,
        streak: 1,
    },
    PeerSeed {
        id: "f_casey",
        name: "Casey",
        avatar_id: "avatar_05",
        base_xp: 500,
        base_bites: 50,
        daily_xp: 55,
        daily_bites: 6,
        competency: 88.0,
        streak: 7,
    },
    PeerSeed {
        id: "f_riley",
        name: "Riley",
        avatar_id: "avatar_06",
        base_xp: 280,
        base_bites: 28,
        daily_xp: 35,
        daily_bites: 4,
        competency: 75.0,
        streak: 3,
    },
];

/// The seeded peer population stamped with `seeded_at`.
pub fn seed_peers(seeded_at: DateTime<Utc>) -> Vec<PeerRecord> {
    PEER_SEEDS
        .iter()
        .map(|s| PeerRecord {
            id: s.id.to_string(),
            display_name: s.name.to_string(),
            avatar_id: s.avatar_id.to_string(),
            total_xp: s.base_xp,
            total_bites_completed: s.base_bites,
            avg_competency: s.competency,
            current_streak_days: s.streak,
            daily_xp_rate: s.daily_xp,
            daily_bite_rate: s.daily_bites,
            seeded_at,
        })
        .collect()
}

/// How far `peer` is behind its expected totals at `now`, as `(xp, bites)`.
///
/// The expected total after `d` whole days is `rate + rate × d`. Returns `None`
/// when the peer is already at or past both targets.
pub fn peer_progress_delta(peer: &PeerRecord, now: DateTime<Utc>) -> Option<(u32, u32)> {
    let days = u32::try_from((now - peer.seeded_at).num_days().max(0)).unwrap_or(u32::MAX);
    let target = |rate: u32| rate.saturating_add(rate.saturating_mul(days));
    let xp = target(peer.daily_xp_rate).saturating_sub(peer.total_xp);
    let bites = target(peer.daily_bite_rate).saturating_sub(peer.total_bites_completed);
    (xp > 0 || bites > 0).then_some((xp, bites))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompetitiveHighlight {
    pub friend_name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompetitiveStandings {
    pub friends_ahead: u32,
    pub friends_behind: u32,
    /// `"+n"` when more peers are behind, `"-n"` when more are ahead, `"0"` otherwise.
    /// Absent when the rules hide it.
    pub rank_delta: Option<String>,
    pub highlights: Vec<CompetitiveHighlight>,
}

/// Compares `user_xp` against every peer. Ties count as behind.
pub fn standings(user_xp: u32, peers: &[PeerRecord]) -> CompetitiveStandings {
    let mut ahead = 0u32;
    let mut behind = 0u32;
    let mut highlights = Vec::new();

    for peer in peers {
        if peer.total_xp > user_xp {
            ahead += 1;
            continue;
        }
        behind += 1;
        if user_xp - peer.total_xp < peer.daily_xp_rate.saturating_mul(2) {
            highlights.push(CompetitiveHighlight {
                friend_name: peer.display_name.clone(),
                message: format!("You passed {} recently!", peer.display_name),
            });
        }
    }

    let rank_delta = if behind > ahead {
        format!("+{}", behind - ahead)
    } else if ahead > behind {
        format!("-{}", ahead - behind)
    } else {
        "0".to_string()
    };

    CompetitiveStandings {
        friends_ahead: ahead,
        friends_behind: behind,
        rank_delta: Some(rank_delta),
        highlights,
    }
}

pub struct CompetitiveSimulator {
    peers: Arc<dyn PeerStore>,
    ledger: Arc<PreferencesLedger>,
    clock: Arc<dyn Clock>,
}

impl CompetitiveSimulator {
    pub fn new(
        peers: Arc<dyn PeerStore>,
        ledger: Arc<PreferencesLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            peers,
            ledger,
            clock,
        }
    }

    /// Seeds the population unless peers already exist. Returns whether it seeded.
    pub async fn seed_if_needed(&self) -> EngineResult<bool> {
        if self.peers.count().await? > 0 {
            return Ok(false);
        }
        let seeded = self
            .peers
            .insert_all_if_empty(seed_peers(self.clock.now()))
            .await?;
        if seeded {
            info!(count = PEER_SEEDS.len(), "Peer population seeded.");
        }
        Ok(seeded)
    }

    /// Brings every peer up to its expected totals for the current time.
    pub async fn advance(&self) -> EngineResult<()> {
        let now = self.clock.now();
        for peer in self.peers.all_peers().await? {
            if let Some((xp, bites)) = peer_progress_delta(&peer, now) {
                debug!(peer_id = %peer.id, xp, bites, "Advancing peer.");
                self.peers.apply_progress(&peer.id, xp, bites).await?;
            }
        }
        Ok(())
    }

    /// Standings of the reader's lifetime xp against the current population.
    pub async fn comparisons(&self) -> EngineResult<CompetitiveStandings> {
        let user_xp = self.ledger.load().await?.total_xp;
        let peers = self.peers.all_peers().await?;
        Ok(standings(user_xp, &peers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{ManualClock, MemoryPeerStore, MemoryPreferenceStore};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 12, 0, 0).unwrap()
    }

    fn peer(name: &str, total_xp: u32, daily_xp_rate: u32) -> PeerRecord {
        PeerRecord {
            id: format!("f_{}", name.to_lowercase()),
            display_name: name.to_string(),
            avatar_id: "avatar_01".to_string(),
            total_xp,
            total_bites_completed: 0,
            avg_competency: 80.0,
            current_streak_days: 0,
            daily_xp_rate,
            daily_bite_rate: 0,
            seeded_at: t0(),
        }
    }

    #[test]
    fn standings_split_ahead_and_behind() {
        let peers = vec![peer("Lee", 250, 30), peer("Max", 400, 55)];
        let result = standings(300, &peers);
        assert_eq!(result.friends_ahead, 1);
        assert_eq!(result.friends_behind, 1);
        assert_eq!(result.rank_delta.as_deref(), Some("0"));
        assert_eq!(
            result.highlights,
            vec![CompetitiveHighlight {
                friend_name: "Lee".to_string(),
                message: "You passed Lee recently!".to_string(),
            }]
        );
    }

    #[test]
    fn rank_delta_is_signed() {
        let peers = vec![peer("A", 10, 1), peer("B", 20, 1), peer("C", 900, 1)];
        assert_eq!(standings(100, &peers).rank_delta.as_deref(), Some("+1"));
        assert_eq!(standings(5, &peers).rank_delta.as_deref(), Some("-3"));
        assert!(standings(5, &peers).highlights.is_empty());
    }

    #[test]
    fn delta_follows_whole_days_since_seeding() {
        let mut p = peer("Alex", 30, 30);
        p.daily_bite_rate = 3;
        p.total_bites_completed = 3;
        assert_eq!(peer_progress_delta(&p, t0()), None);
        assert_eq!(peer_progress_delta(&p, t0() + Duration::hours(23)), None);
        assert_eq!(peer_progress_delta(&p, t0() + Duration::days(2)), Some((60, 6)));
    }

    #[test]
    fn peers_ahead_of_schedule_never_decrease() {
        let p = peer("Casey", 500, 55);
        assert_eq!(peer_progress_delta(&p, t0() + Duration::days(3)), None);
        assert_eq!(peer_progress_delta(&p, t0() + Duration::days(9)), Some((50, 0)));
    }

    #[tokio::test]
    async fn seeding_happens_once_and_advancing_is_idempotent() {
        let store = Arc::new(MemoryPeerStore::default());
        let clock = Arc::new(ManualClock::new(t0()));
        let ledger = Arc::new(PreferencesLedger::new(Arc::new(MemoryPreferenceStore::default())));
        let simulator = CompetitiveSimulator::new(store.clone(), ledger, clock.clone());

        assert!(simulator.seed_if_needed().await.unwrap());
        assert!(!simulator.seed_if_needed().await.unwrap());
        assert_eq!(store.count().await.unwrap(), 5);

        clock.advance(Duration::days(10));
        simulator.advance().await.unwrap();
        let once = store.all_peers().await.unwrap();
        simulator.advance().await.unwrap();
        let twice = store.all_peers().await.unwrap();
        assert_eq!(once, twice);

        let jordan = once.iter().find(|p| p.id == "f_jordan").unwrap();
        assert_eq!(jordan.total_xp, 220);
        assert_eq!(jordan.total_bites_completed, 22);
    }

    #[tokio::test]
    async fn comparisons_use_lifetime_xp() {
        let store = Arc::new(MemoryPeerStore::default());
        let clock = Arc::new(ManualClock::new(t0()));
        let ledger = Arc::new(PreferencesLedger::new(Arc::new(MemoryPreferenceStore::default())));
        let simulator = CompetitiveSimulator::new(store, ledger.clone(), clock);
        simulator.seed_if_needed().await.unwrap();

        ledger.add_xp(300).await.unwrap();
        let result = simulator.comparisons().await.unwrap();
        assert_eq!(result.friends_ahead, 2);
        assert_eq!(result.friends_behind, 3);
        assert_eq!(result.rank_delta.as_deref(), Some("+1"));
        let names: Vec<_> = result.highlights.iter().map(|h| h.friend_name.as_str()).collect();
        assert_eq!(names, vec!["Riley"]);
    }
}
