pub mod memory;
pub mod telemetry;

pub use memory::{
    ManualClock, MemoryBadgeStore, MemoryContent, MemoryPeerStore, MemoryPreferenceStore,
    MemoryProgressStore, MemoryTelemetry,
};
pub use telemetry::TracingTelemetry;
