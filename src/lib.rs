//! Operator console for tape drives and background tasks of a backup server.
//!
//! The library holds the orchestration core used by the drive status panel:
//! shared device polling, flag derivation, command dispatch with task
//! tracking, and the panel state machine. The `tapewatch` binary wraps it in
//! a CLI and a terminal panel.

pub mod api;
pub mod cli;
pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod logging;
pub mod sim;
