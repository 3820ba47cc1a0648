//! services/engine/src/adapters/telemetry.rs
//!
//! A telemetry sink that writes events to the structured log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use litura_core::domain::TelemetryEvent;
use litura_core::ports::{PortResult, TelemetrySink};
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

#[async_trait]
impl TelemetrySink for TracingTelemetry {
    async fn record(&self, event: TelemetryEvent, at: DateTime<Utc>) -> PortResult<()> {
        info!(
            target: "litura::telemetry",
            event_type = event.event_type(),
            timestamp = %at,
            payload = ?event,
            "Telemetry event."
        );
        Ok(())
    }
}
