//! Cross-signal correlation over a snapshot.
//!
//! Three detectors run in order and their findings are concatenated:
//! failed responses linked to nearby console errors, cascades of related
//! errors, and clusters of repeated errors.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::event::{ConsoleRecord, NetworkEntry, excerpt};
use crate::finding::{EXCERPT_CHARS, ErrorType, Evidence, Finding, FindingDetails, FindingKind};
use crate::snapshot::Snapshot;
use crate::types::{Confidence, Severity};

/// Default correlation window in milliseconds.
pub const DEFAULT_WINDOW_MS: i64 = 5_000;

/// Most console records attached as evidence to one finding.
const MAX_EVIDENCE: usize = 5;

/// Tunables for the correlation detectors.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CorrelationConfig {
    /// Half-width of the network-error window, and the cascade window.
    pub window_ms: i64,
    pub min_cascade_len: usize,
    pub min_repeat_count: usize,
    /// Keyword overlap (intersection over the smaller set) needed to cluster.
    pub overlap_threshold: f64,
    /// Repeated errors faster than this are `high`.
    pub high_rate_per_sec: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            min_cascade_len: 3,
            min_repeat_count: 3,
            overlap_threshold: 0.8,
            high_rate_per_sec: 1.0,
        }
    }
}

impl CorrelationConfig {
    /// Applies a per-call window override.
    #[must_use]
    pub fn with_window(mut self, window_ms: Option<i64>) -> Self {
        if let Some(window_ms) = window_ms {
            self.window_ms = window_ms.max(0);
        }
        self
    }
}

/// Runs every detector and concatenates their findings.
pub fn correlate(snapshot: &Snapshot, config: &CorrelationConfig) -> Vec<Finding> {
    let mut findings = correlate_network_errors(snapshot, config);
    findings.extend(detect_cascades(snapshot, config));
    findings.extend(cluster_repeated_errors(snapshot, config));
    tracing::debug!(
        session = %snapshot.session_id,
        findings = findings.len(),
        "correlation pass complete"
    );
    findings
}

// Lower-cased phrases browsers and HTTP clients use for transport failures.
const NETWORK_PHRASES: &[&str] = &[
    "failed to fetch",
    "networkerror",
    "network error",
    "net::err_",
    "load failed",
    "connection refused",
    "connection reset",
    "econnrefused",
    "timed out",
    "timeout",
    "cors",
];

fn mentions_network_failure(lowered: &str) -> bool {
    NETWORK_PHRASES.iter().any(|phrase| lowered.contains(phrase))
}

fn mentions_token(text: &str, token: &str) -> bool {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|part| part == token)
}

/// How strongly a console error points at a failed request.
fn link_strength(entry: &NetworkEntry, status: u16, record: &ConsoleRecord) -> Option<f32> {
    let text = record.full_text();
    let url = entry.request.url.as_str();
    if text.contains(url) {
        return Some(0.9);
    }
    let path = url::Url::parse(url)
        .ok()
        .map(|u| u.path().to_string())
        .filter(|p| p.len() > 1);
    if path.is_some_and(|p| text.contains(&p)) {
        return Some(0.85);
    }
    if mentions_token(&text, &status.to_string()) {
        return Some(0.7);
    }
    mentions_network_failure(&text.to_lowercase()).then_some(0.5)
}

/// Links each failed response to console errors near it in time.
pub fn correlate_network_errors(snapshot: &Snapshot, config: &CorrelationConfig) -> Vec<Finding> {
    let errors = snapshot.errors_by_time();
    if errors.is_empty() {
        return Vec::new();
    }

    snapshot
        .network_entries()
        .into_iter()
        .filter_map(|entry| {
            let response = entry.response.as_ref().filter(|r| r.is_failure())?;
            let status = response.status;
            let links: Vec<(&ConsoleRecord, f32)> = errors
                .iter()
                .copied()
                .filter(|record| {
                    u64::try_from(config.window_ms)
                        .is_ok_and(|window| record.timestamp.abs_diff(response.timestamp) <= window)
                })
                .filter_map(|record| link_strength(&entry, status, record).map(|s| (record, s)))
                .collect();
            if links.is_empty() {
                return None;
            }
            let strongest = links.iter().map(|(_, s)| *s).fold(0.0_f32, f32::max);
            let matched: Vec<&ConsoleRecord> = links.into_iter().map(|(record, _)| record).collect();

            let severity = if status >= 500 {
                Severity::High
            } else {
                Severity::Medium
            };
            let mut evidence = vec![Evidence::request(&entry.request), Evidence::response(response)];
            evidence.extend(matched.iter().take(MAX_EVIDENCE).map(|r| Evidence::console(r)));

            Some(
                Finding::new(
                    FindingKind::Correlation,
                    "network-error",
                    severity,
                    format!(
                        "{} {} returned {status} alongside {} console error(s)",
                        entry.request.method,
                        excerpt(&entry.request.url, 80),
                        matched.len()
                    ),
                )
                .with_confidence(Confidence::clamped(strongest))
                .with_details(FindingDetails::NetworkError {
                    request_id: entry.request.id.clone(),
                    url: entry.request.url.clone(),
                    status,
                    matched_errors: matched.len(),
                })
                .with_evidence(evidence)
                .with_recommendations(if status >= 500 {
                    vec![
                        "Inspect server logs for this endpoint around the failure time",
                        "Check whether the client retries and surfaces the failure",
                    ]
                } else {
                    vec![
                        "Verify the request URL, parameters and credentials",
                        "Handle the error response explicitly in the client",
                    ]
                }),
            )
        })
        .collect()
}

static STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "that", "this", "was", "are", "not", "but", "has",
    "have", "had", "been", "were", "will", "can", "could", "into", "its", "you", "your", "our",
    "all", "any", "when", "then", "than", "there", "their", "what", "which", "while", "error",
    "uncaught",
];

/// Lower-cased tokens longer than two characters, minus stopwords and numbers.
pub fn keywords(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|token| token.chars().count() > 2)
        .filter(|token| !token.chars().all(|c| c.is_ascii_digit()))
        .filter(|token| !STOPWORDS.contains(token))
        .map(str::to_string)
        .collect()
}

/// Maps an error message to its family.
pub fn classify_error(text: &str) -> ErrorType {
    const NAMED: &[(&str, ErrorType)] = &[
        ("TypeError", ErrorType::TypeError),
        ("ReferenceError", ErrorType::ReferenceError),
        ("SyntaxError", ErrorType::SyntaxError),
        ("RangeError", ErrorType::RangeError),
        ("URIError", ErrorType::URIError),
        ("SecurityError", ErrorType::SecurityError),
    ];
    if let Some((_, kind)) = NAMED.iter().find(|(name, _)| text.contains(name)) {
        return *kind;
    }
    if mentions_network_failure(&text.to_lowercase()) {
        return ErrorType::Network;
    }
    ErrorType::Unknown
}

/// Finds bursts of related errors that follow a seed error.
pub fn detect_cascades(snapshot: &Snapshot, config: &CorrelationConfig) -> Vec<Finding> {
    let errors = snapshot.errors_by_time();
    let keyword_sets: Vec<BTreeSet<String>> = errors.iter().map(|e| keywords(&e.text)).collect();
    let mut visited = vec![false; errors.len()];
    let mut findings = Vec::new();

    for seed in 0..errors.len() {
        if visited[seed] {
            continue;
        }
        let root = errors[seed];
        let mut members = vec![seed];
        for candidate in seed + 1..errors.len() {
            if errors[candidate].timestamp.saturating_sub(root.timestamp) > config.window_ms {
                break;
            }
            if visited[candidate] {
                continue;
            }
            let same_source = root.source_url.is_some() && root.source_url == errors[candidate].source_url;
            let shares_keyword = !keyword_sets[seed].is_disjoint(&keyword_sets[candidate]);
            if same_source || shares_keyword {
                members.push(candidate);
            }
        }
        if members.len() < config.min_cascade_len.max(2) {
            continue;
        }
        for &member in &members {
            visited[member] = true;
        }

        let last = errors[members[members.len() - 1]];
        let root_cause = classify_error(&root.text);
        let extra = members.len() - config.min_cascade_len.max(2);
        #[expect(
            clippy::cast_precision_loss,
            reason = "cascade lengths are small"
        )]
        let confidence = Confidence::clamped(0.6 + 0.1 * extra as f32);

        findings.push(
            Finding::new(
                FindingKind::Correlation,
                "error-cascade",
                Severity::High,
                format!(
                    "{} related errors within {} ms, starting with {root_cause:?}",
                    members.len(),
                    last.timestamp.saturating_sub(root.timestamp)
                ),
            )
            .with_confidence(confidence)
            .with_details(FindingDetails::Cascade {
                root_cause,
                root_excerpt: excerpt(&root.text, EXCERPT_CHARS),
                length: members.len(),
                span_ms: last.timestamp.saturating_sub(root.timestamp),
            })
            .with_evidence(members.iter().take(MAX_EVIDENCE).map(|&i| Evidence::console(errors[i])))
            .with_recommendations([
                "Fix the first error in the cascade; later errors are likely consequences",
            ]),
        );
    }
    findings
}

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[a-zA-Z][a-zA-Z0-9+.-]*://[^\s'"<>)]+"#).expect("valid regex"));
static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .expect("valid regex")
});
static HEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:0x[0-9a-fA-F]+|[0-9a-fA-F]{12,})\b").expect("valid regex"));
static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

/// Collapses the variable parts of an error message.
pub fn normalize_error(text: &str) -> String {
    let text = URL_RE.replace_all(text, "<url>");
    let text = UUID_RE.replace_all(&text, "<id>");
    let text = HEX_RE.replace_all(&text, "<id>");
    DIGITS_RE.replace_all(&text, "<n>").trim().to_string()
}

/// Keyword overlap as intersection over the smaller set.
#[expect(
    clippy::cast_precision_loss,
    reason = "keyword sets are small"
)]
fn overlap(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let smaller = a.len().min(b.len());
    if smaller == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / smaller as f64
}

struct ErrorGroup<'a> {
    normalized: String,
    keywords: BTreeSet<String>,
    members: Vec<&'a ConsoleRecord>,
}

/// Groups errors that differ only in ids, numbers or URLs.
pub fn cluster_repeated_errors(snapshot: &Snapshot, config: &CorrelationConfig) -> Vec<Finding> {
    let mut groups: Vec<ErrorGroup<'_>> = Vec::new();
    for record in snapshot.errors_by_time() {
        let normalized = normalize_error(&record.text);
        let record_keywords = keywords(&normalized);
        let existing = groups.iter_mut().find(|group| {
            group.normalized == normalized
                || overlap(&group.keywords, &record_keywords) >= config.overlap_threshold
        });
        match existing {
            Some(group) => group.members.push(record),
            None => groups.push(ErrorGroup {
                normalized,
                keywords: record_keywords,
                members: vec![record],
            }),
        }
    }

    groups
        .into_iter()
        .filter(|group| group.members.len() >= config.min_repeat_count)
        .map(|group| repeated_error_finding(&group, config))
        .collect()
}

#[expect(
    clippy::cast_precision_loss,
    reason = "counts and millisecond spans fit comfortably in f64"
)]
fn repeated_error_finding(group: &ErrorGroup<'_>, config: &CorrelationConfig) -> Finding {
    let first_seen = group.members[0].timestamp;
    let last_seen = group.members[group.members.len() - 1].timestamp;
    let count = group.members.len();
    let span_secs = (last_seen.saturating_sub(first_seen) as f64 / 1000.0).max(1.0);
    let rate_per_sec = count as f64 / span_secs;
    let severity = if rate_per_sec > config.high_rate_per_sec {
        Severity::High
    } else {
        Severity::Medium
    };

    Finding::new(
        FindingKind::Pattern,
        "repeated-error",
        severity,
        format!(
            "Error repeated {count} times: {}",
            excerpt(&group.normalized, 80)
        ),
    )
    .with_confidence(Confidence::from_exceedance(
        count as f64,
        config.min_repeat_count as f64,
    ))
    .with_details(FindingDetails::RepeatedError {
        normalized: group.normalized.clone(),
        count,
        rate_per_sec,
        first_seen,
        last_seen,
    })
    .with_evidence(group.members.iter().take(MAX_EVIDENCE).map(|r| Evidence::console(r)))
    .with_recommendations([
        "Fix the underlying failure once instead of handling each occurrence",
        "Add backoff or deduplication if this error comes from a retry loop",
    ])
}
