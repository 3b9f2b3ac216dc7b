//! Therapy keeper CLI library.
//!
//! This crate provides the CLI interface over the schedule editor and the
//! treatment record coordinator.

mod cli;
pub mod commands;
mod config;
pub mod engine;

pub use cli::{Cli, Commands, NewRecord, ProfileAction, RecordsAction};
pub use config::Config;
