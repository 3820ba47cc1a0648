pub mod domain;
pub mod ports;

pub use domain::{
    AttemptResult, BadgeDefinitions, BadgeRecord, BadgeType, Bite, BiteCompletion, Book, Choice,
    HealthState, HiddenBadge, PeerRecord, Question, ReadingProgress, ReadingStatus,
    TelemetryEvent, UserPreferences,
};
pub use ports::{
    BadgeStore, Clock, ContentProvider, PeerStore, PortError, PortResult, PrefValue,
    PreferenceStore, ProgressStore, SystemClock, TelemetrySink,
};
