//! Heuristic analyzers. Each is a pure function over a snapshot.

pub mod insights;
pub mod performance;
pub mod security;

pub use insights::log_insights;
pub use performance::{
    PerformanceProfile, ResourceBucket, WaterfallEntry, performance_findings, profile_performance,
};
pub use security::scan_security;

/// Most records attached as evidence to one analyzer finding.
pub(crate) const MAX_EVIDENCE: usize = 5;

/// True for hosts that only resolve to the local machine.
pub fn is_loopback(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host == "localhost"
        || host.ends_with(".localhost")
        || host.starts_with("127.")
        || host == "::1"
        || host == "0.0.0.0"
}
