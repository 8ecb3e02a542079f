//! Command line front ends: one-shot commands and the interactive panel.

pub mod commands;
pub mod tui;
