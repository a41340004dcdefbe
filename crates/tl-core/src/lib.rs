//! Core domain logic for tracelens.
//!
//! This crate contains the telemetry model and the passes that run over it:
//! - Event model: console records, requests, responses and snapshots
//! - Queries: filtered console/network views and performance statistics
//! - Pattern matching: scored multi-pattern search
//! - Correlation: failed requests, error cascades and repeated errors
//! - Analyzers: security, performance and log-intelligence heuristics
//! - Reports: several analyzers over one snapshot, with failure isolation

pub mod analyze;
pub mod correlate;
pub mod event;
pub mod finding;
pub mod pattern;
pub mod query;
pub mod report;
pub mod snapshot;
pub mod types;

#[cfg(test)]
mod fixtures;

pub use correlate::{CorrelationConfig, correlate};
pub use event::{
    ConsoleLevel, ConsoleRecord, Headers, NetworkEntry, RequestRecord, ResponseRecord,
    TelemetryEvent,
};
pub use finding::{Evidence, Finding, FindingDetails, FindingKind};
pub use pattern::{MatcherConfig, PatternMatcher};
pub use query::{ConsoleQuery, NetworkQuery, QueryError};
pub use report::{AnalysisError, AnalysisOptions, Analyzer, Report, run_report};
pub use snapshot::{IngestStats, Snapshot};
pub use types::{Confidence, FindingId, RequestId, SessionId, Severity, ValidationError};
