//! tracelens CLI library.
//!
//! Replays JSONL telemetry captures into a session store and exposes the
//! query and analysis passes as subcommands.

mod cli;
pub mod commands;
mod config;
pub mod feed;

pub use cli::{AnalysisArgs, Cli, Commands, InputArgs, SearchTarget};
pub use config::Config;
