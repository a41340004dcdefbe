//! Log intelligence: rates, vocabularies, spikes and drifts over a session.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use super::MAX_EVIDENCE;
use crate::event::{ConsoleRecord, NetworkEntry};
use crate::finding::{Evidence, Finding, FindingDetails, FindingKind};
use crate::snapshot::Snapshot;
use crate::types::{Confidence, Severity};

const MAX_MESSAGE_RATE: f64 = 10.0;
const MIN_MESSAGES_FOR_RATE: usize = 20;
const MEMORY_HITS: usize = 3;
const DEV_ARTIFACT_HITS: usize = 5;
const SPIKE_BUCKET_MS: i64 = 10_000;
const SPIKE_MIN_COUNT: usize = 3;
const SPIKE_FACTOR: f64 = 3.0;
const SPIKE_LOOKBACK: i64 = 5;
const MIN_MEASURED_RESPONSES: usize = 10;
const DRIFT_FACTOR: f64 = 1.5;
const MIN_MESSAGES_FOR_ERROR_DRIFT: usize = 50;
const ERROR_DRIFT_FACTOR: f64 = 2.0;
const ERROR_DRIFT_FLOOR: f64 = 0.1;
const DUPLICATE_CALLS: usize = 5;

static MEMORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:out of memory|memory leak|heap|allocation failed|oom|gc pressure|maximum call stack)\b",
    )
    .expect("valid regex")
});

static DEV_ARTIFACT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:todo|fixme|xxx|hack|debugger|console\.log|dev(?:elopment)? mode|\[hmr\]|\[vite\]|\[webpack)")
        .expect("valid regex")
});

static UNHANDLED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:unhandled|uncaught)\b").expect("valid regex"));

/// Runs every log-intelligence check.
pub fn log_insights(snapshot: &Snapshot) -> Vec<Finding> {
    let mut console: Vec<&ConsoleRecord> = snapshot.console.iter().map(AsRef::as_ref).collect();
    console.sort_by_key(|record| record.timestamp);
    let entries = snapshot.network_entries();

    let mut findings = Vec::new();
    findings.extend(message_rate(&console));
    findings.extend(vocabulary(
        &console,
        &MEMORY_RE,
        MEMORY_HITS,
        |hits| {
            Finding::new(
                FindingKind::Pattern,
                "memory-pressure",
                Severity::High,
                format!("{hits} messages mention memory problems"),
            )
            .with_recommendations([
                "Take a heap snapshot and look for detached nodes or growing caches",
            ])
        },
    ));
    findings.extend(vocabulary(
        &console,
        &DEV_ARTIFACT_RE,
        DEV_ARTIFACT_HITS,
        |hits| {
            Finding::new(
                FindingKind::Suggestion,
                "development-artifacts",
                Severity::Low,
                format!("{hits} messages look like leftover development logging"),
            )
            .with_recommendations(["Strip debug logging from production builds"])
        },
    ));
    findings.extend(vocabulary(&console, &UNHANDLED_RE, 1, |hits| {
        Finding::new(
            FindingKind::Pattern,
            "unhandled-errors",
            Severity::High,
            format!("{hits} unhandled or uncaught errors"),
        )
        .with_recommendations([
            "Add error handling or a global rejection handler for these code paths",
        ])
    }));
    findings.extend(error_spikes(&console));
    findings.extend(response_time_drift(&entries));
    findings.extend(error_rate_drift(&console));
    findings.extend(duplicate_calls(&entries));

    tracing::debug!(
        session = %snapshot.session_id,
        findings = findings.len(),
        "log insights complete"
    );
    findings
}

#[expect(
    clippy::cast_precision_loss,
    reason = "message counts and spans fit comfortably in f64"
)]
fn message_rate(console: &[&ConsoleRecord]) -> Option<Finding> {
    let (first, last) = (console.first()?, console.last()?);
    if console.len() < MIN_MESSAGES_FOR_RATE {
        return None;
    }
    let span_secs = (last.timestamp.saturating_sub(first.timestamp) as f64 / 1000.0).max(1.0);
    let rate = console.len() as f64 / span_secs;
    (rate > MAX_MESSAGE_RATE).then(|| {
        Finding::new(
            FindingKind::Anomaly,
            "high-message-rate",
            Severity::Medium,
            format!("{rate:.1} console messages per second"),
        )
        .with_confidence(Confidence::from_exceedance(rate, MAX_MESSAGE_RATE))
        .with_details(FindingDetails::Metric {
            value: rate,
            threshold: MAX_MESSAGE_RATE,
        })
        .with_recommendations(["Reduce logging volume or rate-limit noisy call sites"])
    })
}

#[expect(
    clippy::cast_precision_loss,
    reason = "hit counts fit comfortably in f64"
)]
fn vocabulary(
    console: &[&ConsoleRecord],
    regex: &Regex,
    min_hits: usize,
    make: impl FnOnce(usize) -> Finding,
) -> Option<Finding> {
    let hits: Vec<&ConsoleRecord> = console
        .iter()
        .copied()
        .filter(|record| regex.is_match(&record.text))
        .collect();
    if hits.len() < min_hits {
        return None;
    }
    Some(
        make(hits.len())
            .with_confidence(Confidence::from_exceedance(hits.len() as f64, min_hits as f64))
            .with_details(FindingDetails::Metric {
                value: hits.len() as f64,
                threshold: min_hits as f64,
            })
            .with_evidence(hits.iter().take(MAX_EVIDENCE).map(|r| Evidence::console(r))),
    )
}

#[expect(
    clippy::cast_precision_loss,
    reason = "bucket counts are small"
)]
fn error_spikes(console: &[&ConsoleRecord]) -> Vec<Finding> {
    let Some(origin) = console.first().map(|r| r.timestamp) else {
        return Vec::new();
    };

    // Sparse: only buckets holding at least one error exist.
    let mut buckets: BTreeMap<i64, Vec<&ConsoleRecord>> = BTreeMap::new();
    for &record in console.iter().filter(|r| r.is_error()) {
        let index = record.timestamp.saturating_sub(origin) / SPIKE_BUCKET_MS;
        buckets.entry(index).or_default().push(record);
    }

    let mut findings = Vec::new();
    for (&index, bucket) in &buckets {
        let count = bucket.len();
        if count < SPIKE_MIN_COUNT || index == 0 {
            continue;
        }
        let lookback = index.min(SPIKE_LOOKBACK);
        let prior: usize = buckets
            .range(index - lookback..index)
            .map(|(_, records)| records.len())
            .sum();
        let baseline = prior as f64 / lookback as f64;
        let threshold = SPIKE_FACTOR * baseline;
        if count as f64 <= threshold {
            continue;
        }
        let bucket_start = origin.saturating_add(index.saturating_mul(SPIKE_BUCKET_MS));
        findings.push(
            Finding::new(
                FindingKind::Anomaly,
                "error-spike",
                Severity::High,
                format!("{count} errors in 10 s against a baseline of {baseline:.1}"),
            )
            .with_confidence(Confidence::from_exceedance(
                count as f64,
                threshold.max(SPIKE_MIN_COUNT as f64),
            ))
            .with_details(FindingDetails::Spike {
                bucket_start,
                count,
                baseline,
            })
            .with_evidence(bucket.iter().take(MAX_EVIDENCE).map(|r| Evidence::console(r)))
            .with_recommendations(["Check what changed at the start of this window"]),
        );
    }
    findings
}

#[expect(
    clippy::cast_precision_loss,
    reason = "sample counts fit comfortably in f64"
)]
fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn response_time_drift(entries: &[NetworkEntry]) -> Option<Finding> {
    let mut measured: Vec<(i64, f64)> = entries
        .iter()
        .filter_map(|entry| entry.duration_ms().map(|d| (entry.request.timestamp, d)))
        .collect();
    if measured.len() < MIN_MEASURED_RESPONSES {
        return None;
    }
    measured.sort_by_key(|(timestamp, _)| *timestamp);
    let third = measured.len() / 3;
    let durations: Vec<f64> = measured.iter().map(|(_, d)| *d).collect();
    let before = mean(&durations[..third]);
    let after = mean(&durations[durations.len() - third..]);
    let threshold = DRIFT_FACTOR * before;
    if before <= 0.0 || after <= threshold {
        return None;
    }
    Some(
        Finding::new(
            FindingKind::Trend,
            "response-time-drift",
            Severity::Medium,
            format!("Response times rose from {before:.0} ms to {after:.0} ms"),
        )
        .with_confidence(Confidence::from_exceedance(after, threshold))
        .with_details(FindingDetails::Trend { before, after })
        .with_recommendations([
            "Look for resource exhaustion or growing queues on the backend",
        ]),
    )
}

#[expect(
    clippy::cast_precision_loss,
    reason = "message counts fit comfortably in f64"
)]
fn error_rate_drift(console: &[&ConsoleRecord]) -> Option<Finding> {
    if console.len() < MIN_MESSAGES_FOR_ERROR_DRIFT {
        return None;
    }
    let (first, second) = console.split_at(console.len() / 2);
    let ratio = |half: &[&ConsoleRecord]| {
        half.iter().filter(|r| r.is_error()).count() as f64 / half.len() as f64
    };
    let (before, after) = (ratio(first), ratio(second));
    let threshold = (ERROR_DRIFT_FACTOR * before).max(ERROR_DRIFT_FLOOR);
    if after <= threshold {
        return None;
    }
    Some(
        Finding::new(
            FindingKind::Trend,
            "error-rate-drift",
            Severity::High,
            format!(
                "Error ratio rose from {:.0}% to {:.0}%",
                before * 100.0,
                after * 100.0
            ),
        )
        .with_confidence(Confidence::from_exceedance(after, threshold))
        .with_details(FindingDetails::Trend { before, after })
        .with_recommendations(["Correlate the second half of the session with recent actions"]),
    )
}

#[expect(
    clippy::cast_precision_loss,
    reason = "call counts fit comfortably in f64"
)]
fn duplicate_calls(entries: &[NetworkEntry]) -> Vec<Finding> {
    let mut calls: BTreeMap<(String, &str), Vec<&NetworkEntry>> = BTreeMap::new();
    for entry in entries {
        let api_like = entry
            .resource_type()
            .is_none_or(|kind| kind == "fetch" || kind == "xhr");
        if api_like {
            calls
                .entry((entry.request.method.to_ascii_uppercase(), entry.request.url.as_str()))
                .or_default()
                .push(entry);
        }
    }

    calls
        .into_iter()
        .filter(|(_, hits)| hits.len() >= DUPLICATE_CALLS)
        .map(|((method, url), hits)| {
            Finding::new(
                FindingKind::Suggestion,
                "duplicate-requests",
                Severity::Low,
                format!(
                    "{method} {} called {} times",
                    crate::event::excerpt(url, 80),
                    hits.len()
                ),
            )
            .with_confidence(Confidence::from_exceedance(
                hits.len() as f64,
                DUPLICATE_CALLS as f64,
            ))
            .with_details(FindingDetails::Metric {
                value: hits.len() as f64,
                threshold: DUPLICATE_CALLS as f64,
            })
            .with_evidence(hits.iter().take(MAX_EVIDENCE).map(|e| Evidence::request(&e.request)))
            .with_recommendations(["Cache or deduplicate identical in-flight requests"])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ConsoleLevel::{Info, Log};
    use crate::fixtures::{RequestExt, ResponseExt, SnapshotBuilder, console, error, request, response};

    fn rules(findings: &[Finding]) -> Vec<&'static str> {
        findings.iter().map(|f| f.rule).collect()
    }

    #[test]
    fn quiet_session_has_no_insights() {
        let snapshot = SnapshotBuilder::new()
            .console(console(Info, "page loaded", 0))
            .console(console(Info, "user clicked", 5_000))
            .build();
        assert!(log_insights(&snapshot).is_empty());
    }

    #[test]
    fn chatty_session_triggers_message_rate() {
        let mut builder = SnapshotBuilder::new();
        for i in 0..40 {
            builder = builder.console(console(Log, &format!("tick {i}"), i * 50));
        }
        let findings = log_insights(&builder.build());
        assert_eq!(rules(&findings), vec!["high-message-rate"]);
        assert_eq!(findings[0].kind, FindingKind::Anomaly);
    }

    #[test]
    fn vocabularies_need_enough_hits() {
        let snapshot = SnapshotBuilder::new()
            .console(console(Log, "heap usage 80%", 0))
            .console(console(Log, "possible memory leak in list view", 2_000))
            .console(console(Log, "TODO remove", 4_000))
            .build();
        assert!(log_insights(&snapshot).is_empty());

        let snapshot = SnapshotBuilder::new()
            .console(console(Log, "heap usage 80%", 0))
            .console(console(Log, "heap usage 90%", 2_000))
            .console(console(Log, "out of memory", 4_000))
            .build();
        let findings = log_insights(&snapshot);
        assert_eq!(rules(&findings), vec!["memory-pressure"]);
        assert!((findings[0].confidence.value() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn uncaught_errors_are_reported() {
        let snapshot = SnapshotBuilder::new()
            .console(error("Uncaught (in promise) TypeError: x is null", 0))
            .build();
        assert_eq!(rules(&log_insights(&snapshot)), vec!["unhandled-errors"]);
    }

    #[test]
    fn error_spike_against_quiet_baseline() {
        let mut builder = SnapshotBuilder::new()
            .console(console(Info, "start", 0))
            .console(error("early failure", 12_000));
        for i in 0..4 {
            builder = builder.console(error("backend down", 40_000 + i * 100));
        }
        let findings = log_insights(&builder.build());
        let spikes: Vec<&Finding> = findings.iter().filter(|f| f.rule == "error-spike").collect();
        assert_eq!(spikes.len(), 1);
        let FindingDetails::Spike {
            bucket_start,
            count,
            ..
        } = spikes[0].details
        else {
            panic!("expected spike details");
        };
        assert_eq!(bucket_start, 40_000);
        assert_eq!(count, 4);
    }

    #[test]
    fn widely_spread_timestamps_stay_sparse() {
        let snapshot = SnapshotBuilder::new()
            .console(console(Info, "boot", i64::MIN / 2))
            .console(error("late", i64::MAX / 2))
            .build();
        assert!(!rules(&log_insights(&snapshot)).contains(&"error-spike"));

        let mut builder = SnapshotBuilder::new().console(console(Info, "relative clock", 0));
        for i in 0..3 {
            builder = builder.console(error("backend down", 1_700_000_000_000 + i));
        }
        let findings = log_insights(&builder.build());
        let spike = findings
            .iter()
            .find(|f| f.rule == "error-spike")
            .expect("spike after a long quiet gap");
        assert_eq!(
            spike.details,
            FindingDetails::Spike {
                bucket_start: 1_700_000_000_000,
                count: 3,
                baseline: 0.0,
            }
        );
    }

    #[test]
    fn response_time_drift_detected() {
        let mut builder = SnapshotBuilder::new();
        for i in 0..12_i64 {
            let id = format!("r{i}");
            let elapsed = if i < 6 { 100.0 } else { 400.0 };
            builder = builder
                .request(request(&id, "GET", &format!("https://a.test/page/{i}"), i * 1_000).resource("document"))
                .response(response(&id, 200, i * 1_000 + 10).elapsed(elapsed));
        }
        let findings = log_insights(&builder.build());
        assert_eq!(rules(&findings), vec!["response-time-drift"]);
        assert_eq!(
            findings[0].details,
            FindingDetails::Trend {
                before: 100.0,
                after: 400.0
            }
        );
    }

    #[test]
    fn error_rate_drift_detected() {
        let mut builder = SnapshotBuilder::new();
        for i in 0..60_i64 {
            let record = if i >= 30 && i % 2 == 0 {
                error(&format!("failure number {i}"), i * 1_000)
            } else {
                console(Info, "ok", i * 1_000)
            };
            builder = builder.console(record);
        }
        let findings = log_insights(&builder.build());
        assert!(rules(&findings).contains(&"error-rate-drift"));
    }

    #[test]
    fn duplicate_api_calls_ignore_static_assets() {
        let mut builder = SnapshotBuilder::new();
        for i in 0..5_i64 {
            builder = builder
                .request(request(&format!("api{i}"), "get", "https://a.test/api/me", i * 1_000).resource("XHR"))
                .request(request(&format!("img{i}"), "GET", "https://a.test/logo.png", i * 1_000).resource("image"));
        }
        let findings = log_insights(&builder.build());
        assert_eq!(rules(&findings), vec!["duplicate-requests"]);
        assert!(findings[0].title.starts_with("GET https://a.test/api/me"));
    }
}
