//! Client-side frame reception and world reconciliation

mod apply;
pub mod engine;
mod sound;

pub use engine::{EngineConfig, FrameDisposition, FrameReport, ReceiveError, ReconciliationEngine};
