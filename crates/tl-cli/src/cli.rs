//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tl_core::{ConsoleLevel, Severity};

/// Browser telemetry inspector.
///
/// Replays a JSONL capture of console and network events into an in-memory
/// session and runs one query or analysis pass over it.
#[derive(Debug, Parser)]
#[command(name = "tl", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Where the telemetry comes from and how to print results.
#[derive(Debug, Clone, Args)]
pub struct InputArgs {
    /// JSONL telemetry capture; `-` reads stdin.
    #[arg(short, long, default_value = "-")]
    pub input: PathBuf,

    /// Session id to replay the capture into.
    #[arg(long, default_value = "capture")]
    pub session: String,

    /// Print JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

/// Floors and overrides for analysis passes.
#[derive(Debug, Clone, Default, Args)]
pub struct AnalysisArgs {
    /// Drop findings less severe than this (critical, high, medium, low).
    #[arg(long)]
    pub min_severity: Option<Severity>,

    /// Drop findings below this confidence (0.0 to 1.0).
    #[arg(long)]
    pub min_confidence: Option<f32>,

    /// Override the correlation window in milliseconds.
    #[arg(long)]
    pub window_ms: Option<i64>,
}

/// Which records a search runs over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum SearchTarget {
    #[default]
    Console,
    Network,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Filter console messages.
    Console {
        #[command(flatten)]
        input: InputArgs,

        /// Levels to keep (comma separated).
        #[arg(long, value_delimiter = ',')]
        level: Vec<ConsoleLevel>,

        /// Text to look for in the message.
        #[arg(long)]
        pattern: Option<String>,

        /// Treat the pattern as a regular expression.
        #[arg(long)]
        regex: bool,

        /// Match the pattern case-sensitively.
        #[arg(long)]
        case_sensitive: bool,

        /// Earliest timestamp (ms, inclusive).
        #[arg(long)]
        start: Option<i64>,

        /// Latest timestamp (ms, inclusive).
        #[arg(long)]
        end: Option<i64>,

        /// Keep only the last N matches.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Filter network requests.
    Network {
        #[command(flatten)]
        input: InputArgs,

        /// Regular expression over the request URL.
        #[arg(long)]
        url: Option<String>,

        /// Methods to keep (comma separated).
        #[arg(long, value_delimiter = ',')]
        method: Vec<String>,

        /// Status codes to keep (comma separated). Wins over --status-min/--status-max.
        #[arg(long, value_delimiter = ',')]
        status: Vec<u16>,

        /// Lowest status to keep (inclusive).
        #[arg(long)]
        status_min: Option<u16>,

        /// Highest status to keep (inclusive).
        #[arg(long)]
        status_max: Option<u16>,

        /// Resource types to keep (comma separated).
        #[arg(long, value_delimiter = ',')]
        resource_type: Vec<String>,

        /// Minimum duration in ms (inclusive).
        #[arg(long)]
        min_duration: Option<f64>,

        /// Maximum duration in ms (inclusive).
        #[arg(long)]
        max_duration: Option<f64>,

        /// Keep only the last N matches.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Summarize network performance.
    Perf {
        #[command(flatten)]
        input: InputArgs,
    },

    /// Scored multi-pattern search.
    Search {
        #[command(flatten)]
        input: InputArgs,

        /// Records to search.
        #[arg(long, value_enum, default_value_t)]
        target: SearchTarget,

        /// Include pattern (repeatable).
        #[arg(long = "include")]
        include: Vec<String>,

        /// Require every include pattern instead of any.
        #[arg(long)]
        all: bool,

        /// Exclude pattern (repeatable).
        #[arg(long = "exclude")]
        exclude: Vec<String>,

        /// Named pattern as NAME=REGEX (repeatable).
        #[arg(long = "named")]
        named: Vec<String>,

        /// Field predicate as PATH:OP:VALUE, OP one of equals, contains,
        /// startsWith, endsWith, regex (repeatable).
        #[arg(long = "field")]
        field: Vec<String>,

        /// Match case-sensitively.
        #[arg(long)]
        case_sensitive: bool,

        /// Maximum matches to print.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Correlate failed requests and errors.
    Correlate {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },

    /// Scan for leaked secrets and missing protections.
    Security {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },

    /// Profile resource loading.
    Profile {
        #[command(flatten)]
        input: InputArgs,
    },

    /// Detect rates, spikes and drifts in the session.
    Insights {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },

    /// Run several analyzers and merge their findings.
    Report {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        analysis: AnalysisArgs,

        /// Analyzers to run (comma separated); all when omitted.
        #[arg(long, value_delimiter = ',')]
        analyzers: Vec<String>,
    },

    /// Show ingestion statistics for the capture.
    Stats {
        #[command(flatten)]
        input: InputArgs,
    },
}

impl Commands {
    /// The input arguments shared by every subcommand.
    pub const fn input(&self) -> &InputArgs {
        match self {
            Self::Console { input, .. }
            | Self::Network { input, .. }
            | Self::Perf { input }
            | Self::Search { input, .. }
            | Self::Correlate { input, .. }
            | Self::Security { input, .. }
            | Self::Profile { input }
            | Self::Insights { input, .. }
            | Self::Report { input, .. }
            | Self::Stats { input } => input,
        }
    }
}
