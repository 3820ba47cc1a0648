//! services/engine/src/error.rs
//!
//! Defines the primary error type for the rules engine.

use crate::config::ConfigError;
use litura_core::ports::PortError;

/// The primary error type for the `engine` service.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The engine was used before its rules were loaded.
    #[error("Game rules have not been loaded")]
    ConfigNotLoaded,

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents a standard Input/Output error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Lookup failures the session absorbs as no-ops.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Port(e) if e.is_not_found())
    }
}

/// A convenience type alias for `Result<T, EngineError>`.
pub type EngineResult<T> = Result<T, EngineError>;
