//! Composite analysis: run several analyzers over one snapshot in parallel.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analyze;
use crate::correlate::{CorrelationConfig, correlate};
use crate::finding::{Finding, FindingKind, counts_by_kind};
use crate::snapshot::Snapshot;
use crate::types::{Confidence, SessionId, Severity};

/// Errors raised by analyzers.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Returned by [`Analyzer`] implementations outside this crate that can
    /// fail; the built-in analyzers are infallible. `run_report` records it
    /// as an [`AnalyzerFailure`] instead of aborting the report.
    #[error("analyzer {analyzer} failed: {message}")]
    Failed {
        analyzer: &'static str,
        message: String,
    },

    #[error("analyzer {analyzer} panicked: {message}")]
    Panicked {
        analyzer: &'static str,
        message: String,
    },

    #[error("unknown analyzer: {name} (expected one of {})", ANALYZER_NAMES.join(", "))]
    UnknownAnalyzer { name: String },
}

/// Caller-supplied floors and overrides shared by every analyzer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisOptions {
    pub min_severity: Option<Severity>,
    pub min_confidence: Option<Confidence>,
    /// Overrides the correlation window.
    pub window_ms: Option<i64>,
}

/// A named analysis pass over a snapshot.
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &'static str;

    fn analyze(
        &self,
        snapshot: &Snapshot,
        options: &AnalysisOptions,
    ) -> Result<Vec<Finding>, AnalysisError>;
}

/// Names accepted by [`analyzer_by_name`].
pub const ANALYZER_NAMES: &[&str] = &["correlation", "security", "performance", "insights"];

pub struct CorrelationAnalyzer {
    pub config: CorrelationConfig,
}

impl Analyzer for CorrelationAnalyzer {
    fn name(&self) -> &'static str {
        "correlation"
    }

    fn analyze(
        &self,
        snapshot: &Snapshot,
        options: &AnalysisOptions,
    ) -> Result<Vec<Finding>, AnalysisError> {
        Ok(correlate(snapshot, &self.config.with_window(options.window_ms)))
    }
}

pub struct SecurityAnalyzer;

impl Analyzer for SecurityAnalyzer {
    fn name(&self) -> &'static str {
        "security"
    }

    fn analyze(
        &self,
        snapshot: &Snapshot,
        _: &AnalysisOptions,
    ) -> Result<Vec<Finding>, AnalysisError> {
        Ok(analyze::scan_security(snapshot))
    }
}

pub struct PerformanceAnalyzer;

impl Analyzer for PerformanceAnalyzer {
    fn name(&self) -> &'static str {
        "performance"
    }

    fn analyze(
        &self,
        snapshot: &Snapshot,
        _: &AnalysisOptions,
    ) -> Result<Vec<Finding>, AnalysisError> {
        Ok(analyze::performance_findings(snapshot))
    }
}

pub struct InsightsAnalyzer;

impl Analyzer for InsightsAnalyzer {
    fn name(&self) -> &'static str {
        "insights"
    }

    fn analyze(
        &self,
        snapshot: &Snapshot,
        _: &AnalysisOptions,
    ) -> Result<Vec<Finding>, AnalysisError> {
        Ok(analyze::log_insights(snapshot))
    }
}

/// Looks up a built-in analyzer by name.
pub fn analyzer_by_name(
    name: &str,
    config: &CorrelationConfig,
) -> Result<Box<dyn Analyzer>, AnalysisError> {
    match name.to_ascii_lowercase().as_str() {
        "correlation" | "correlate" => Ok(Box::new(CorrelationAnalyzer { config: *config })),
        "security" => Ok(Box::new(SecurityAnalyzer)),
        "performance" | "perf" => Ok(Box::new(PerformanceAnalyzer)),
        "insights" => Ok(Box::new(InsightsAnalyzer)),
        _ => Err(AnalysisError::UnknownAnalyzer {
            name: name.to_string(),
        }),
    }
}

/// Every built-in analyzer, in report order.
pub fn default_analyzers(config: &CorrelationConfig) -> Vec<Box<dyn Analyzer>> {
    vec![
        Box::new(CorrelationAnalyzer { config: *config }),
        Box::new(SecurityAnalyzer),
        Box::new(PerformanceAnalyzer),
        Box::new(InsightsAnalyzer),
    ]
}

/// An analyzer that produced no findings because it failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalyzerFailure {
    pub analyzer: &'static str,
    pub error: String,
}

/// Combined output of a report run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub session_id: SessionId,
    pub findings: Vec<Finding>,
    pub counts_by_kind: BTreeMap<FindingKind, usize>,
    /// Analyzers whose results are missing; the report is partial when non-empty.
    pub failures: Vec<AnalyzerFailure>,
}

impl Report {
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn run_isolated(
    analyzer: &dyn Analyzer,
    snapshot: &Snapshot,
    options: &AnalysisOptions,
) -> Result<Vec<Finding>, AnalysisError> {
    panic::catch_unwind(AssertUnwindSafe(|| analyzer.analyze(snapshot, options))).unwrap_or_else(
        |payload| {
            Err(AnalysisError::Panicked {
                analyzer: analyzer.name(),
                message: panic_message(payload.as_ref()),
            })
        },
    )
}

/// Runs `analyzers` in parallel and merges their findings.
///
/// Findings keep analyzer order and are then ordered critical first. A
/// failing or panicking analyzer is recorded in `failures` and does not
/// affect the others.
pub fn run_report(
    snapshot: &Snapshot,
    analyzers: &[Box<dyn Analyzer>],
    options: &AnalysisOptions,
) -> Report {
    let results: Vec<(&'static str, Result<Vec<Finding>, AnalysisError>)> = analyzers
        .par_iter()
        .map(|analyzer| (analyzer.name(), run_isolated(analyzer.as_ref(), snapshot, options)))
        .collect();

    let mut findings = Vec::new();
    let mut failures = Vec::new();
    for (name, result) in results {
        match result {
            Ok(found) => findings.extend(
                found
                    .into_iter()
                    .filter(|f| f.passes(options.min_severity, options.min_confidence)),
            ),
            Err(e) => {
                tracing::warn!(analyzer = name, error = %e, "analyzer failed");
                failures.push(AnalyzerFailure {
                    analyzer: name,
                    error: e.to_string(),
                });
            }
        }
    }
    findings.sort_by_key(|f| f.severity);

    Report {
        session_id: snapshot.session_id.clone(),
        counts_by_kind: counts_by_kind(&findings),
        findings,
        failures,
    }
}
