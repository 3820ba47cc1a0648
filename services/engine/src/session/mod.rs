//! services/engine/src/session/mod.rs
//!
//! The reading session: one reader moving through the bites of one book.

pub mod facts;
pub mod machine;
pub mod state;

pub use machine::SessionStateMachine;
pub use state::{BiteRecap, EngineContext, Ports, QuestionView, SessionPhase};
