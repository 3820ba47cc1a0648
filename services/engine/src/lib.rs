//! services/engine/src/lib.rs
//!
//! The Litura rules engine: scoring, health, badges, the peer simulation and the
//! reading-session state machine, wired to the ports defined in `litura_core`.

pub mod adapters;
pub mod badges;
pub mod competitive;
pub mod config;
pub mod error;
pub mod health;
pub mod preferences;
pub mod scoring;
pub mod session;
