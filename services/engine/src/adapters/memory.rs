//! services/engine/src/adapters/memory.rs
//!
//! In-process implementations of every port from the `core` crate.
//! The surrounding application supplies durable stores; these adapters back the
//! demo binary and the test suites.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use litura_core::domain::{
    BadgeRecord, Bite, BiteCompletion, Book, PeerRecord, Question, ReadingProgress,
    TelemetryEvent,
};
use litura_core::ports::{
    BadgeStore, Clock, ContentProvider, PeerStore, PortError, PortResult, PrefValue,
    PreferenceStore, ProgressStore, TelemetrySink,
};
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

//=========================================================================================
// Clock
//=========================================================================================

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = at;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

//=========================================================================================
// Content
//=========================================================================================

#[derive(Debug, Default)]
pub struct MemoryContent {
    books: HashMap<String, Book>,
    bites: HashMap<String, Bite>,
    questions: HashMap<String, Vec<Question>>,
}

impl MemoryContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_book(&mut self, book: Book) {
        self.books.insert(book.id.clone(), book);
    }

    pub fn insert_bite(&mut self, bite: Bite) {
        self.bites.insert(bite.id.clone(), bite);
    }

    pub fn insert_question(&mut self, question: Question) {
        self.questions
            .entry(question.bite_id.clone())
            .or_default()
            .push(question);
    }

    fn bites_of<'a>(&'a self, book_id: &'a str) -> impl Iterator<Item = &'a Bite> + 'a {
        self.bites.values().filter(move |b| b.book_id == book_id)
    }
}

#[async_trait]
impl ContentProvider for MemoryContent {
    async fn get_book(&self, book_id: &str) -> PortResult<Book> {
        self.books
            .get(book_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Book {} not found", book_id)))
    }

    async fn get_bite(&self, bite_id: &str) -> PortResult<Bite> {
        self.bites
            .get(bite_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Bite {} not found", bite_id)))
    }

    async fn get_bite_by_index(&self, book_id: &str, order_index: u32) -> PortResult<Option<Bite>> {
        Ok(self
            .bites_of(book_id)
            .find(|b| b.order_index == order_index)
            .cloned())
    }

    async fn get_next_bite(&self, book_id: &str, order_index: u32) -> PortResult<Option<Bite>> {
        Ok(self
            .bites_of(book_id)
            .filter(|b| b.order_index > order_index)
            .min_by_key(|b| b.order_index)
            .cloned())
    }

    async fn sample_questions(&self, bite_id: &str, count: usize) -> PortResult<Vec<Question>> {
        let Some(pool) = self.questions.get(bite_id) else {
            return Ok(Vec::new());
        };
        let mut rng = rand::thread_rng();
        Ok(pool.choose_multiple(&mut rng, count).cloned().collect())
    }
}

//=========================================================================================
// Progress
//=========================================================================================

#[derive(Debug, Default)]
struct ProgressTables {
    progress: HashMap<(String, String), ReadingProgress>,
    completions: Vec<BiteCompletion>,
}

#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    tables: Mutex<ProgressTables>,
}

impl MemoryProgressStore {
    pub async fn completions(&self) -> Vec<BiteCompletion> {
        self.tables.lock().await.completions.clone()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn get_progress(
        &self,
        user_id: &str,
        book_id: &str,
    ) -> PortResult<Option<ReadingProgress>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .progress
            .get(&(user_id.to_string(), book_id.to_string()))
            .cloned())
    }

    async fn upsert_progress(&self, progress: ReadingProgress) -> PortResult<()> {
        let mut tables = self.tables.lock().await;
        let key = (progress.user_id.clone(), progress.book_id.clone());
        tables.progress.insert(key, progress);
        Ok(())
    }

    async fn append_bite_completion(&self, completion: BiteCompletion) -> PortResult<()> {
        self.tables.lock().await.completions.push(completion);
        Ok(())
    }

    async fn completed_bite_count(&self, user_id: &str, book_id: &str) -> PortResult<u32> {
        let tables = self.tables.lock().await;
        let distinct: HashSet<&str> = tables
            .completions
            .iter()
            .filter(|c| c.user_id == user_id && c.book_id == book_id)
            .map(|c| c.bite_id.as_str())
            .collect();
        Ok(u32::try_from(distinct.len()).unwrap_or(u32::MAX))
    }

    async fn average_competency(&self, user_id: &str, book_id: &str) -> PortResult<Option<f64>> {
        let tables = self.tables.lock().await;
        let mut latest: HashMap<&str, f64> = HashMap::new();
        for c in tables
            .completions
            .iter()
            .filter(|c| c.user_id == user_id && c.book_id == book_id)
        {
            latest.insert(c.bite_id.as_str(), c.competency_percent);
        }
        if latest.is_empty() {
            return Ok(None);
        }
        Ok(Some(latest.values().sum::<f64>() / latest.len() as f64))
    }
}

//=========================================================================================
// Preferences
//=========================================================================================

#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    entries: Mutex<HashMap<String, PrefValue>>,
    writes: Mutex<usize>,
}

impl MemoryPreferenceStore {
    pub async fn snapshot(&self) -> HashMap<String, PrefValue> {
        self.entries.lock().await.clone()
    }

    pub async fn write_count(&self) -> usize {
        *self.writes.lock().await
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferenceStore {
    async fn load(&self) -> PortResult<HashMap<String, PrefValue>> {
        Ok(self.entries.lock().await.clone())
    }

    async fn write(&self, entries: Vec<(String, PrefValue)>) -> PortResult<()> {
        let mut stored = self.entries.lock().await;
        stored.extend(entries);
        *self.writes.lock().await += 1;
        Ok(())
    }
}

//=========================================================================================
// Badges
//=========================================================================================

#[derive(Debug, Default)]
pub struct MemoryBadgeStore {
    badges: Mutex<Vec<BadgeRecord>>,
}

#[async_trait]
impl BadgeStore for MemoryBadgeStore {
    async fn has_badge(&self, user_id: &str, badge_id: &str) -> PortResult<bool> {
        let badges = self.badges.lock().await;
        Ok(badges
            .iter()
            .any(|b| b.user_id == user_id && b.badge_id == badge_id))
    }

    async fn insert_if_absent(&self, badge: BadgeRecord) -> PortResult<bool> {
        let mut badges = self.badges.lock().await;
        if badges
            .iter()
            .any(|b| b.user_id == badge.user_id && b.badge_id == badge.badge_id)
        {
            return Ok(false);
        }
        badges.push(badge);
        Ok(true)
    }

    async fn badges_for_user(&self, user_id: &str) -> PortResult<Vec<BadgeRecord>> {
        let badges = self.badges.lock().await;
        Ok(badges.iter().filter(|b| b.user_id == user_id).cloned().collect())
    }
}

//=========================================================================================
// Peers
//=========================================================================================

#[derive(Debug, Default)]
pub struct MemoryPeerStore {
    peers: Mutex<Vec<PeerRecord>>,
}

#[async_trait]
impl PeerStore for MemoryPeerStore {
    async fn count(&self) -> PortResult<usize> {
        Ok(self.peers.lock().await.len())
    }

    async fn all_peers(&self) -> PortResult<Vec<PeerRecord>> {
        let mut peers = self.peers.lock().await.clone();
        peers.sort_by(|a, b| b.total_xp.cmp(&a.total_xp));
        Ok(peers)
    }

    async fn insert_all_if_empty(&self, peers: Vec<PeerRecord>) -> PortResult<bool> {
        let mut stored = self.peers.lock().await;
        if !stored.is_empty() {
            return Ok(false);
        }
        stored.extend(peers);
        Ok(true)
    }

    async fn apply_progress(
        &self,
        peer_id: &str,
        xp_delta: u32,
        bite_delta: u32,
    ) -> PortResult<()> {
        let mut peers = self.peers.lock().await;
        let peer = peers
            .iter_mut()
            .find(|p| p.id == peer_id)
            .ok_or_else(|| PortError::NotFound(format!("Peer {} not found", peer_id)))?;
        peer.total_xp = peer.total_xp.saturating_add(xp_delta);
        peer.total_bites_completed = peer.total_bites_completed.saturating_add(bite_delta);
        Ok(())
    }
}

//=========================================================================================
// Telemetry
//=========================================================================================

/// Keeps every event in order so callers can inspect what a session emitted.
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    events: Mutex<Vec<(TelemetryEvent, DateTime<Utc>)>>,
}

impl MemoryTelemetry {
    pub async fn events(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .await
            .iter()
            .map(|(event, _)| event.clone())
            .collect()
    }

    pub async fn count_of(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|(event, _)| event.event_type() == event_type)
            .count()
    }
}

#[async_trait]
impl TelemetrySink for MemoryTelemetry {
    async fn record(&self, event: TelemetryEvent, at: DateTime<Utc>) -> PortResult<()> {
        self.events.lock().await.push((event, at));
        Ok(())
    }
}
