//! Filtered views over a session snapshot.
//!
//! Every function here is pure: it reads a [`Snapshot`] and returns owned
//! results. Results are tail-truncated, so callers see the most recent
//! matches when more than `limit` records qualify.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::{ConsoleLevel, ConsoleRecord, NetworkEntry};
use crate::snapshot::Snapshot;
use crate::types::RequestId;

/// Default number of records returned by a query.
pub const DEFAULT_LIMIT: usize = 100;

/// Number of entries in the slowest/largest rankings.
pub const TOP_N: usize = 10;

/// Query errors visible to callers.
#[derive(Debug, Error)]
pub enum QueryError {
    /// A supplied regular expression failed to compile.
    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A single text test: literal substring or regular expression.
#[derive(Debug, Clone)]
pub enum TextPattern {
    Substring { needle: String, case_sensitive: bool },
    Regex(Regex),
}

impl TextPattern {
    pub fn compile(pattern: &str, regex: bool, case_sensitive: bool) -> Result<Self, QueryError> {
        if regex {
            let compiled = RegexBuilder::new(pattern)
                .case_insensitive(!case_sensitive)
                .build()
                .map_err(|source| QueryError::InvalidPattern {
                    pattern: pattern.to_string(),
                    source,
                })?;
            return Ok(Self::Regex(compiled));
        }
        let needle = if case_sensitive {
            pattern.to_string()
        } else {
            pattern.to_lowercase()
        };
        Ok(Self::Substring {
            needle,
            case_sensitive,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        match self {
            Self::Substring {
                needle,
                case_sensitive: true,
            } => text.contains(needle.as_str()),
            Self::Substring {
                needle,
                case_sensitive: false,
            } => text.to_lowercase().contains(needle.as_str()),
            Self::Regex(regex) => regex.is_match(text),
        }
    }
}

/// Console query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsoleQuery {
    pub level: Option<Vec<ConsoleLevel>>,
    pub pattern: Option<String>,
    pub regex: bool,
    pub case_sensitive: bool,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub limit: Option<usize>,
}

/// Console query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsoleQueryResult {
    pub messages: Vec<Arc<ConsoleRecord>>,
    /// Records in the session.
    pub total: usize,
    /// Records that matched before truncation.
    pub filtered: usize,
}

/// Filters console records by level, time range and text.
pub fn query_console(
    snapshot: &Snapshot,
    query: &ConsoleQuery,
) -> Result<ConsoleQueryResult, QueryError> {
    let pattern = query
        .pattern
        .as_deref()
        .map(|p| TextPattern::compile(p, query.regex, query.case_sensitive))
        .transpose()?;

    let matched: Vec<Arc<ConsoleRecord>> = snapshot
        .console
        .iter()
        .filter(|record| {
            query
                .level
                .as_ref()
                .is_none_or(|levels| levels.contains(&record.level))
        })
        .filter(|record| query.start_time.is_none_or(|start| record.timestamp >= start))
        .filter(|record| query.end_time.is_none_or(|end| record.timestamp <= end))
        .filter(|record| pattern.as_ref().is_none_or(|p| p.is_match(&record.text)))
        .cloned()
        .collect();

    let filtered = matched.len();
    Ok(ConsoleQueryResult {
        messages: tail(matched, query.limit.unwrap_or(DEFAULT_LIMIT)),
        total: snapshot.console.len(),
        filtered,
    })
}

/// Inclusive status range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct StatusRange {
    pub min: u16,
    pub max: u16,
}

/// Network query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkQuery {
    pub url_pattern: Option<String>,
    pub method: Option<Vec<String>>,
    pub status_code: Option<Vec<u16>>,
    pub status_range: Option<StatusRange>,
    pub resource_type: Option<Vec<String>>,
    pub min_duration: Option<f64>,
    pub max_duration: Option<f64>,
    pub limit: Option<usize>,
}

impl NetworkQuery {
    /// Whether any predicate needs the response to be present.
    fn needs_response(&self) -> bool {
        self.status_code.is_some()
            || self.status_range.is_some()
            || self.min_duration.is_some()
            || self.max_duration.is_some()
    }

    fn matches_status(&self, status: u16) -> bool {
        if let Some(codes) = &self.status_code {
            return codes.contains(&status);
        }
        self.status_range
            .is_none_or(|range| (range.min..=range.max).contains(&status))
    }
}

/// Aggregate numbers over a network query's matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSummary {
    pub total: usize,
    pub failed: usize,
    /// Mean over entries with a measured duration.
    pub avg_duration: Option<f64>,
    pub total_size: u64,
}

/// Network query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkQueryResult {
    pub requests: Vec<NetworkEntry>,
    pub summary: NetworkSummary,
}

/// Filters requests (joined with responses) by URL, method, status,
/// resource type and duration.
pub fn query_network(
    snapshot: &Snapshot,
    query: &NetworkQuery,
) -> Result<NetworkQueryResult, QueryError> {
    let url_pattern = query
        .url_pattern
        .as_deref()
        .map(|p| {
            Regex::new(p).map_err(|source| QueryError::InvalidPattern {
                pattern: p.to_string(),
                source,
            })
        })
        .transpose()?;
    let needs_response = query.needs_response();

    let matched: Vec<NetworkEntry> = snapshot
        .network_entries()
        .into_iter()
        .filter(|entry| {
            url_pattern
                .as_ref()
                .is_none_or(|re| re.is_match(&entry.request.url))
        })
        .filter(|entry| {
            query.method.as_ref().is_none_or(|methods| {
                methods
                    .iter()
                    .any(|m| m.eq_ignore_ascii_case(&entry.request.method))
            })
        })
        .filter(|entry| {
            query.resource_type.as_ref().is_none_or(|types| {
                entry
                    .request
                    .resource_type
                    .as_deref()
                    .is_some_and(|rt| types.iter().any(|t| t.eq_ignore_ascii_case(rt)))
            })
        })
        .filter(|entry| {
            if !needs_response {
                return true;
            }
            let Some(status) = entry.status() else {
                return false;
            };
            if !query.matches_status(status) {
                return false;
            }
            if query.min_duration.is_none() && query.max_duration.is_none() {
                return true;
            }
            entry.duration_ms().is_some_and(|d| {
                query.min_duration.is_none_or(|min| d >= min)
                    && query.max_duration.is_none_or(|max| d <= max)
            })
        })
        .collect();

    let summary = summarize(&matched);
    Ok(NetworkQueryResult {
        requests: tail(matched, query.limit.unwrap_or(DEFAULT_LIMIT)),
        summary,
    })
}

#[expect(
    clippy::cast_precision_loss,
    reason = "entry counts are far below f64 precision limits"
)]
fn summarize(entries: &[NetworkEntry]) -> NetworkSummary {
    let durations: Vec<f64> = entries.iter().filter_map(NetworkEntry::duration_ms).collect();
    let avg_duration = if durations.is_empty() {
        None
    } else {
        Some(durations.iter().sum::<f64>() / durations.len() as f64)
    };
    NetworkSummary {
        total: entries.len(),
        failed: entries.iter().filter(|e| e.is_failure()).count(),
        avg_duration,
        total_size: entries.iter().filter_map(NetworkEntry::encoded_size).sum(),
    }
}

/// A ranked request in the performance stats.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedRequest {
    pub request_id: RequestId,
    pub method: String,
    pub url: String,
    pub status: Option<u16>,
    pub duration_ms: Option<f64>,
    pub size: Option<u64>,
}

impl From<&NetworkEntry> for RankedRequest {
    fn from(entry: &NetworkEntry) -> Self {
        Self {
            request_id: entry.request.id.clone(),
            method: entry.request.method.clone(),
            url: entry.request.url.clone(),
            status: entry.status(),
            duration_ms: entry.duration_ms(),
            size: entry.encoded_size(),
        }
    }
}

/// Aggregate performance statistics for a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    pub total_requests: usize,
    pub failed_requests: usize,
    pub pending_requests: usize,
    pub avg_response_time: Option<f64>,
    /// Keyed by coarse class, e.g. `"2xx"`.
    pub by_status_class: BTreeMap<String, usize>,
    pub by_resource_type: BTreeMap<String, usize>,
    pub slowest_requests: Vec<RankedRequest>,
    pub largest_requests: Vec<RankedRequest>,
}

/// Computes counts, mean response time and the slowest/largest requests.
pub fn network_performance(snapshot: &Snapshot) -> PerformanceStats {
    let entries = snapshot.network_entries();
    let summary = summarize(&entries);

    let mut by_status_class = BTreeMap::new();
    let mut by_resource_type = BTreeMap::new();
    for entry in &entries {
        if let Some(status) = entry.status() {
            *by_status_class
                .entry(format!("{}xx", status / 100))
                .or_insert(0) += 1;
        }
        let resource_type = entry.resource_type().unwrap_or_else(|| "other".to_string());
        *by_resource_type.entry(resource_type).or_insert(0) += 1;
    }

    let mut timed: Vec<(&NetworkEntry, f64)> = entries
        .iter()
        .filter_map(|e| e.duration_ms().map(|d| (e, d)))
        .collect();
    timed.sort_by(|a, b| b.1.total_cmp(&a.1));
    let slowest_requests = timed
        .iter()
        .take(TOP_N)
        .map(|(e, _)| RankedRequest::from(*e))
        .collect();

    let mut sized: Vec<(&NetworkEntry, u64)> = entries
        .iter()
        .filter_map(|e| e.encoded_size().map(|s| (e, s)))
        .collect();
    sized.sort_by(|a, b| b.1.cmp(&a.1));
    let largest_requests = sized
        .iter()
        .take(TOP_N)
        .map(|(e, _)| RankedRequest::from(*e))
        .collect();

    PerformanceStats {
        total_requests: entries.len(),
        failed_requests: summary.failed,
        pending_requests: entries.iter().filter(|e| e.response.is_none()).count(),
        avg_response_time: summary.avg_duration,
        by_status_class,
        by_resource_type,
        slowest_requests,
        largest_requests,
    }
}

/// Keeps the last `limit` items.
fn tail<T>(mut items: Vec<T>, limit: usize) -> Vec<T> {
    if items.len() > limit {
        items.drain(..items.len() - limit);
    }
    items
}
