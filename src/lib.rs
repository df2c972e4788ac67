//! Frame Sync Client Library
//!
//! Client-side reception of server world frames: delta decoding, duplicate
//! and resend detection, acknowledgments, and reconciliation of a shadow
//! world of client mobjs, players, sectors, sides and polyobjects.
//!
//! # Features
//!
//! - `metrics_server` - HTTP endpoint serving client metrics (enabled by default)

pub mod client;
pub mod config;
pub mod game;
pub mod metrics;
pub mod net;
pub mod util;
