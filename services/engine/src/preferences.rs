//! services/engine/src/preferences.rs
//!
//! The single owner of the user-level values kept in the key-value preference store.
//!
//! Every mutation is a load → modify → flush sequence executed under one async
//! mutex, so a background health poll and an active session never interleave
//! their read-modify-write cycles. Nothing is cached between calls.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use litura_core::domain::UserPreferences;
use litura_core::ports::{PrefValue, PreferenceStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::EngineResult;

/// Keys used in the preference store.
pub mod keys {
    pub const USER_ID: &str = "user_id";
    pub const DISPLAY_NAME: &str = "display_name";
    pub const CURRENT_HEALTH: &str = "current_health";
    pub const LAST_HEALTH_RECHARGE: &str = "last_health_recharge";
    pub const TOTAL_XP: &str = "total_xp";
    pub const TOTAL_BITES_COMPLETED: &str = "total_bites_completed";
    pub const BOOKS_COMPLETED: &str = "books_completed";
    pub const CURRENT_STREAK_DAYS: &str = "current_streak_days";
    pub const LONGEST_STREAK_DAYS: &str = "longest_streak_days";
    pub const LAST_ACTIVE_DATE: &str = "last_active_date";
    pub const REVIEW_TEXT_USED_TODAY: &str = "review_text_used_today";
    pub const REVIEW_TEXT_DATE: &str = "review_text_date";
    pub const IS_FIRST_LAUNCH: &str = "is_first_launch";
}

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct PreferencesLedger {
    store: Arc<dyn PreferenceStore>,
    lock: Mutex<()>,
}

impl PreferencesLedger {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Reads a fresh snapshot, substituting defaults for absent keys.
    pub async fn load(&self) -> EngineResult<UserPreferences> {
        let _guard = self.lock.lock().await;
        let entries = self.store.load().await?;
        Ok(decode(&entries))
    }

    /// Applies `f` to a fresh snapshot and flushes whatever it changed as one write.
    pub async fn update<F, T>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&mut UserPreferences) -> T + Send,
    {
        let _guard = self.lock.lock().await;
        let before = decode(&self.store.load().await?);
        let mut after = before.clone();
        let output = f(&mut after);

        let changes = changed_entries(&before, &after);
        if !changes.is_empty() {
            let keys: Vec<&str> = changes.iter().map(|(k, _)| k.as_str()).collect();
            debug!(?keys, "Flushing preferences.");
            self.store.write(changes).await?;
        }
        Ok(output)
    }

    pub async fn add_xp(&self, xp: u32) -> EngineResult<u32> {
        self.update(|prefs| {
            prefs.total_xp = prefs.total_xp.saturating_add(xp);
            prefs.total_xp
        })
        .await
    }

    pub async fn increment_bites_completed(&self) -> EngineResult<u32> {
        self.update(|prefs| {
            prefs.total_bites_completed += 1;
            prefs.total_bites_completed
        })
        .await
    }

    pub async fn increment_books_completed(&self) -> EngineResult<u32> {
        self.update(|prefs| {
            prefs.books_completed += 1;
            prefs.books_completed
        })
        .await
    }

    pub async fn set_first_launch_complete(&self) -> EngineResult<()> {
        self.update(|prefs| prefs.is_first_launch = false).await
    }

    /// Records reading activity on `today` and returns the current streak.
    pub async fn record_activity(&self, today: NaiveDate) -> EngineResult<u32> {
        self.update(|prefs| apply_activity(prefs, today)).await
    }
}

//=========================================================================================
// Streaks and the daily review allowance
//=========================================================================================

/// Extends, keeps or restarts the daily reading streak.
pub fn apply_activity(prefs: &mut UserPreferences, today: NaiveDate) -> u32 {
    let last = prefs.last_active_date.as_deref().and_then(parse_date);
    let current = match last {
        Some(day) if day == today => prefs.current_streak_days.max(1),
        Some(day) if (today - day).num_days() == 1 => prefs.current_streak_days + 1,
        _ => 1,
    };
    prefs.current_streak_days = current;
    prefs.longest_streak_days = prefs.longest_streak_days.max(current);
    prefs.last_active_date = Some(format_date(today));
    current
}

/// Review texts used on `today`; a counter from an earlier day counts as zero.
pub fn review_text_used_on(prefs: &UserPreferences, today: NaiveDate) -> u32 {
    match prefs.review_text_date.as_deref().and_then(parse_date) {
        Some(day) if day == today => prefs.review_text_used_today,
        _ => 0,
    }
}

/// Spends one review text if the daily allowance permits. Returns whether one was spent.
pub fn spend_review_text(prefs: &mut UserPreferences, today: NaiveDate, daily_limit: u32) -> bool {
    let used = review_text_used_on(prefs, today);
    prefs.review_text_date = Some(format_date(today));
    prefs.review_text_used_today = used;
    if used >= daily_limit {
        return false;
    }
    prefs.review_text_used_today = used + 1;
    true
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).ok()
}

fn format_date(day: NaiveDate) -> String {
    day.format(DATE_FORMAT).to_string()
}

//=========================================================================================
// Encoding to and from the key-value store
//=========================================================================================

fn decode(entries: &HashMap<String, PrefValue>) -> UserPreferences {
    let defaults = UserPreferences::default();
    UserPreferences {
        user_id: text(entries, keys::USER_ID).unwrap_or(defaults.user_id),
        display_name: text(entries, keys::DISPLAY_NAME).unwrap_or(defaults.display_name),
        current_health: int(entries, keys::CURRENT_HEALTH).map(to_u32),
        last_health_recharge_at: int(entries, keys::LAST_HEALTH_RECHARGE)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        total_xp: int(entries, keys::TOTAL_XP).map(to_u32).unwrap_or(defaults.total_xp),
        total_bites_completed: int(entries, keys::TOTAL_BITES_COMPLETED)
            .map(to_u32)
            .unwrap_or(defaults.total_bites_completed),
        books_completed: int(entries, keys::BOOKS_COMPLETED)
            .map(to_u32)
            .unwrap_or(defaults.books_completed),
        current_streak_days: int(entries, keys::CURRENT_STREAK_DAYS)
            .map(to_u32)
            .unwrap_or(defaults.current_streak_days),
        longest_streak_days: int(entries, keys::LONGEST_STREAK_DAYS)
            .map(to_u32)
            .unwrap_or(defaults.longest_streak_days),
        last_active_date: text(entries, keys::LAST_ACTIVE_DATE),
        review_text_used_today: int(entries, keys::REVIEW_TEXT_USED_TODAY)
            .map(to_u32)
            .unwrap_or(defaults.review_text_used_today),
        review_text_date: text(entries, keys::REVIEW_TEXT_DATE),
        is_first_launch: flag(entries, keys::IS_FIRST_LAUNCH).unwrap_or(defaults.is_first_launch),
    }
}

fn encode(prefs: &UserPreferences) -> Vec<(&'static str, PrefValue)> {
    let mut entries = vec![
        (keys::USER_ID, PrefValue::Text(prefs.user_id.clone())),
        (keys::DISPLAY_NAME, PrefValue::Text(prefs.display_name.clone())),
        (keys::TOTAL_XP, PrefValue::Int(prefs.total_xp.into())),
        (keys::TOTAL_BITES_COMPLETED, PrefValue::Int(prefs.total_bites_completed.into())),
        (keys::BOOKS_COMPLETED, PrefValue::Int(prefs.books_completed.into())),
        (keys::CURRENT_STREAK_DAYS, PrefValue::Int(prefs.current_streak_days.into())),
        (keys::LONGEST_STREAK_DAYS, PrefValue::Int(prefs.longest_streak_days.into())),
        (keys::REVIEW_TEXT_USED_TODAY, PrefValue::Int(prefs.review_text_used_today.into())),
        (keys::IS_FIRST_LAUNCH, PrefValue::Bool(prefs.is_first_launch)),
    ];
    if let Some(health) = prefs.current_health {
        entries.push((keys::CURRENT_HEALTH, PrefValue::Int(health.into())));
    }
    if let Some(at) = prefs.last_health_recharge_at {
        entries.push((keys::LAST_HEALTH_RECHARGE, timestamp(at)));
    }
    if let Some(day) = &prefs.last_active_date {
        entries.push((keys::LAST_ACTIVE_DATE, PrefValue::Text(day.clone())));
    }
    if let Some(day) = &prefs.review_text_date {
        entries.push((keys::REVIEW_TEXT_DATE, PrefValue::Text(day.clone())));
    }
    entries
}

fn changed_entries(before: &UserPreferences, after: &UserPreferences) -> Vec<(String, PrefValue)> {
    let previous: HashMap<&str, PrefValue> = encode(before).into_iter().collect();
    encode(after)
        .into_iter()
        .filter(|(key, value)| previous.get(key) != Some(value))
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

fn timestamp(at: DateTime<Utc>) -> PrefValue {
    PrefValue::Int(at.timestamp_millis())
}

fn to_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn int(entries: &HashMap<String, PrefValue>, key: &str) -> Option<i64> {
    match entries.get(key) {
        Some(PrefValue::Int(v)) => Some(*v),
        _ => None,
    }
}

fn text(entries: &HashMap<String, PrefValue>, key: &str) -> Option<String> {
    match entries.get(key) {
        Some(PrefValue::Text(v)) => Some(v.clone()),
        _ => None,
    }
}

fn flag(entries: &HashMap<String, PrefValue>, key: &str) -> Option<bool> {
    match entries.get(key) {
        Some(PrefValue::Bool(v)) => Some(*v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryPreferenceStore;

    fn day(raw: &str) -> NaiveDate {
        NaiveDate::parse_from_str(raw, DATE_FORMAT).unwrap()
    }

    #[tokio::test]
    async fn absent_keys_read_as_defaults() {
        let ledger = PreferencesLedger::new(Arc::new(MemoryPreferenceStore::default()));
        let prefs = ledger.load().await.unwrap();
        assert_eq!(prefs, UserPreferences::default());
        assert!(prefs.is_first_launch);
        assert_eq!(prefs.current_health, None);
    }

    #[tokio::test]
    async fn updates_flush_only_changed_keys() {
        let store = Arc::new(MemoryPreferenceStore::default());
        let ledger = PreferencesLedger::new(store.clone());

        assert_eq!(ledger.add_xp(10).await.unwrap(), 10);
        assert_eq!(ledger.add_xp(5).await.unwrap(), 15);

        let raw = store.snapshot().await;
        assert_eq!(raw.get(keys::TOTAL_XP), Some(&PrefValue::Int(15)));
        assert!(!raw.contains_key(keys::CURRENT_HEALTH));
        assert_eq!(store.write_count().await, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_never_lose_increments() {
        let ledger = Arc::new(PreferencesLedger::new(Arc::new(MemoryPreferenceStore::default())));
        let mut tasks = Vec::new();
        for i in 0..200 {
            let ledger = ledger.clone();
            tasks.push(tokio::spawn(async move {
                ledger.add_xp(1).await.unwrap();
                if i % 4 == 0 {
                    ledger.increment_bites_completed().await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let prefs = ledger.load().await.unwrap();
        assert_eq!(prefs.total_xp, 200);
        assert_eq!(prefs.total_bites_completed, 50);
    }

    #[tokio::test]
    async fn no_op_updates_do_not_write() {
        let store = Arc::new(MemoryPreferenceStore::default());
        let ledger = PreferencesLedger::new(store.clone());
        ledger.update(|_| ()).await.unwrap();
        assert_eq!(store.write_count().await, 0);
    }

    #[tokio::test]
    async fn health_fields_round_trip_through_the_store() {
        let ledger = PreferencesLedger::new(Arc::new(MemoryPreferenceStore::default()));
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        ledger
            .update(|prefs| {
                prefs.current_health = Some(4);
                prefs.last_health_recharge_at = Some(at);
            })
            .await
            .unwrap();

        let prefs = ledger.load().await.unwrap();
        assert_eq!(prefs.current_health, Some(4));
        assert_eq!(prefs.last_health_recharge_at, Some(at));
    }

    #[test]
    fn streak_extends_on_consecutive_days_and_resets_after_a_gap() {
        let mut prefs = UserPreferences::default();
        assert_eq!(apply_activity(&mut prefs, day("2024-05-01")), 1);
        assert_eq!(apply_activity(&mut prefs, day("2024-05-01")), 1);
        assert_eq!(apply_activity(&mut prefs, day("2024-05-02")), 2);
        assert_eq!(apply_activity(&mut prefs, day("2024-05-03")), 3);
        assert_eq!(apply_activity(&mut prefs, day("2024-05-06")), 1);
        assert_eq!(prefs.longest_streak_days, 3);
        assert_eq!(prefs.last_active_date.as_deref(), Some("2024-05-06"));
    }

    #[test]
    fn review_allowance_resets_each_day() {
        let mut prefs = UserPreferences::default();
        let monday = day("2024-05-06");
        assert!(spend_review_text(&mut prefs, monday, 2));
        assert!(spend_review_text(&mut prefs, monday, 2));
        assert!(!spend_review_text(&mut prefs, monday, 2));
        assert_eq!(review_text_used_on(&prefs, monday), 2);

        let tuesday = day("2024-05-07");
        assert_eq!(review_text_used_on(&prefs, tuesday), 0);
        assert!(spend_review_text(&mut prefs, tuesday, 2));
        assert_eq!(prefs.review_text_used_today, 1);
    }
}
