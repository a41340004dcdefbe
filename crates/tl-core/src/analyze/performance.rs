//! Performance profiler: resource buckets, a request waterfall, bottlenecks
//! and ranked suggestions.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::event::{NetworkEntry, header};
use crate::finding::{Evidence, Finding, FindingDetails, FindingKind};
use crate::snapshot::Snapshot;
use crate::types::{Confidence, RequestId, Severity};

const SLOW_MS: f64 = 2_000.0;
const VERY_SLOW_MS: f64 = 5_000.0;
const LARGE_BYTES: u64 = 1024 * 1024;
const BLOCKING_MS: f64 = 500.0;
const MAX_REQUESTS: usize = 50;
const MIN_CACHE_RATIO: f64 = 0.3;
const MIN_REQUESTS_FOR_CACHE: usize = 10;
const MAX_IMAGES: usize = 20;
const MAX_UNCOMPRESSED_SCRIPT_BYTES: u64 = 100 * 1024;

/// Aggregates for one resource type.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceBucket {
    pub resource_type: String,
    pub count: usize,
    pub total_size: u64,
    pub total_duration_ms: f64,
    pub cache_hits: usize,
}

/// One request on the timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaterfallEntry {
    pub request_id: RequestId,
    pub url: String,
    pub resource_type: String,
    pub start: i64,
    pub end: Option<i64>,
    pub duration_ms: Option<f64>,
    /// Number of other requests in flight at the same time.
    pub parallelism: usize,
}

/// Full profiler output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceProfile {
    pub total_requests: usize,
    pub total_size: u64,
    pub cache_hit_ratio: f64,
    pub buckets: Vec<ResourceBucket>,
    pub waterfall: Vec<WaterfallEntry>,
    pub bottlenecks: Vec<Finding>,
    pub suggestions: Vec<Finding>,
}

fn is_cache_hit(entry: &NetworkEntry) -> bool {
    let Some(response) = &entry.response else {
        return false;
    };
    response.status == 304
        || header(&response.headers, "x-cache").is_some_and(|v| v.to_ascii_lowercase().contains("hit"))
        || header(&response.headers, "cf-cache-status").is_some_and(|v| v.eq_ignore_ascii_case("hit"))
}

fn resource_kind(entry: &NetworkEntry) -> String {
    entry.resource_type().unwrap_or_else(|| {
        let mime = entry
            .response
            .as_ref()
            .map(|r| r.mime_type.to_ascii_lowercase())
            .unwrap_or_default();
        if mime.starts_with("image/") {
            "image".to_string()
        } else if mime.contains("javascript") {
            "script".to_string()
        } else if mime == "text/css" {
            "stylesheet".to_string()
        } else {
            "other".to_string()
        }
    })
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "float to int casts saturate and the sum saturates too"
)]
fn interval(entry: &NetworkEntry) -> Option<(i64, i64)> {
    let start = entry.request.timestamp;
    entry
        .duration_ms()
        .map(|duration| (start, start.saturating_add(duration.ceil() as i64)))
}

fn build_waterfall(entries: &[NetworkEntry]) -> Vec<WaterfallEntry> {
    let mut waterfall: Vec<WaterfallEntry> = entries
        .iter()
        .map(|entry| WaterfallEntry {
            request_id: entry.request.id.clone(),
            url: entry.request.url.clone(),
            resource_type: resource_kind(entry),
            start: entry.request.timestamp,
            end: interval(entry).map(|(_, end)| end),
            duration_ms: entry.duration_ms(),
            parallelism: 0,
        })
        .collect();
    waterfall.sort_by_key(|w| w.start);

    for i in 0..waterfall.len() {
        let Some(end_i) = waterfall[i].end else {
            continue;
        };
        let start_i = waterfall[i].start;
        for j in i + 1..waterfall.len() {
            if waterfall[j].start >= end_i {
                break;
            }
            let Some(end_j) = waterfall[j].end else {
                continue;
            };
            if start_i < end_j {
                waterfall[i].parallelism += 1;
                waterfall[j].parallelism += 1;
            }
        }
    }
    waterfall
}

/// Profiles the snapshot's network traffic.
#[expect(
    clippy::cast_precision_loss,
    reason = "request counts fit comfortably in f64"
)]
pub fn profile_performance(snapshot: &Snapshot) -> PerformanceProfile {
    let entries = snapshot.network_entries();

    let mut buckets: BTreeMap<String, ResourceBucket> = BTreeMap::new();
    let mut cache_hits = 0_u32;
    let mut completed = 0_u32;
    for entry in &entries {
        let kind = resource_kind(entry);
        let bucket = buckets.entry(kind.clone()).or_insert_with(|| ResourceBucket {
            resource_type: kind,
            ..ResourceBucket::default()
        });
        bucket.count += 1;
        bucket.total_size += entry.encoded_size().unwrap_or(0);
        bucket.total_duration_ms += entry.duration_ms().unwrap_or(0.0);
        if entry.response.is_some() {
            completed += 1;
        }
        if is_cache_hit(entry) {
            bucket.cache_hits += 1;
            cache_hits += 1;
        }
    }
    let cache_hit_ratio = if completed == 0 {
        0.0
    } else {
        f64::from(cache_hits) / f64::from(completed)
    };

    let waterfall = build_waterfall(&entries);
    let parallelism: BTreeMap<&RequestId, usize> = waterfall
        .iter()
        .map(|w| (&w.request_id, w.parallelism))
        .collect();

    let mut bottlenecks: Vec<Finding> = entries
        .iter()
        .flat_map(|entry| {
            let overlap = parallelism.get(&entry.request.id).copied().unwrap_or(0);
            bottlenecks_for(entry, overlap)
        })
        .collect();
    bottlenecks.sort_by_key(|f| f.severity);

    let total_requests = entries.len();
    let mut suggestions = Vec::new();
    if total_requests > MAX_REQUESTS {
        suggestions.push(
            metric_suggestion(
                "too-many-requests",
                Severity::Medium,
                format!("{total_requests} requests captured"),
                total_requests as f64,
                MAX_REQUESTS as f64,
            )
            .with_recommendations(["Bundle small assets", "Batch API calls where possible"]),
        );
    }
    if total_requests >= MIN_REQUESTS_FOR_CACHE && cache_hit_ratio < MIN_CACHE_RATIO {
        suggestions.push(
            Finding::new(
                FindingKind::Suggestion,
                "low-cache-ratio",
                Severity::Low,
                format!("Only {:.0}% of responses were served from cache", cache_hit_ratio * 100.0),
            )
            .with_confidence(Confidence::from_exceedance(
                MIN_CACHE_RATIO * 2.0 - cache_hit_ratio,
                MIN_CACHE_RATIO,
            ))
            .with_details(FindingDetails::Metric {
                value: cache_hit_ratio,
                threshold: MIN_CACHE_RATIO,
            })
            .with_recommendations(["Set Cache-Control and ETag headers on static assets"]),
        );
    }
    let images = buckets.get("image").map_or(0, |b| b.count);
    if images > MAX_IMAGES {
        suggestions.push(
            metric_suggestion(
                "too-many-images",
                Severity::Low,
                format!("{images} image requests"),
                images as f64,
                MAX_IMAGES as f64,
            )
            .with_recommendations(["Lazy-load offscreen images", "Use sprites or inline SVG for icons"]),
        );
    }
    let uncompressed: u64 = entries
        .iter()
        .filter(|entry| resource_kind(entry) == "script")
        .filter_map(|entry| entry.response.as_ref())
        .filter(|response| header(&response.headers, "content-encoding").is_none())
        .filter_map(|response| response.encoded_size)
        .sum();
    if uncompressed > MAX_UNCOMPRESSED_SCRIPT_BYTES {
        suggestions.push(
            metric_suggestion(
                "uncompressed-scripts",
                Severity::Medium,
                format!("{} KiB of scripts served without compression", uncompressed / 1024),
                uncompressed as f64,
                MAX_UNCOMPRESSED_SCRIPT_BYTES as f64,
            )
            .with_recommendations(["Enable gzip or brotli for JavaScript responses"]),
        );
    }
    suggestions.sort_by_key(|f| f.severity);

    PerformanceProfile {
        total_requests,
        total_size: buckets.values().map(|b| b.total_size).sum(),
        cache_hit_ratio,
        buckets: buckets.into_values().collect(),
        waterfall,
        bottlenecks,
        suggestions,
    }
}

/// Bottlenecks followed by suggestions.
pub fn performance_findings(snapshot: &Snapshot) -> Vec<Finding> {
    let profile = profile_performance(snapshot);
    let mut findings = profile.bottlenecks;
    findings.extend(profile.suggestions);
    findings
}

fn metric_suggestion(
    rule: &'static str,
    severity: Severity,
    title: String,
    value: f64,
    threshold: f64,
) -> Finding {
    Finding::new(FindingKind::Suggestion, rule, severity, title)
        .with_confidence(Confidence::from_exceedance(value, threshold))
        .with_details(FindingDetails::Metric { value, threshold })
}

fn bottlenecks_for(entry: &NetworkEntry, parallelism: usize) -> Vec<Finding> {
    let details = || FindingDetails::Resource {
        request_id: entry.request.id.clone(),
        url: entry.request.url.clone(),
        resource_type: entry.resource_type(),
        duration_ms: entry.duration_ms(),
        size: entry.encoded_size(),
        status: entry.status(),
        parallelism,
    };
    let anomaly = |rule, severity, title: String| {
        Finding::new(FindingKind::Anomaly, rule, severity, title)
            .with_details(details())
            .with_evidence([Evidence::request(&entry.request)])
    };

    let mut findings = Vec::new();
    let url = crate::event::excerpt(&entry.request.url, 80);
    if let Some(duration) = entry.duration_ms() {
        if duration > SLOW_MS {
            let severity = if duration > VERY_SLOW_MS {
                Severity::High
            } else {
                Severity::Medium
            };
            findings.push(
                anomaly("slow-resource", severity, format!("{url} took {duration:.0} ms"))
                    .with_confidence(Confidence::from_exceedance(duration, SLOW_MS))
                    .with_recommendations(["Profile the backend handler or move the asset to a CDN"]),
            );
        }
        let kind = resource_kind(entry);
        if (kind == "script" || kind == "stylesheet") && duration > BLOCKING_MS && parallelism < 2 {
            findings.push(
                anomaly(
                    "render-blocking",
                    Severity::Medium,
                    format!("{kind} {url} loaded serially in {duration:.0} ms"),
                )
                .with_confidence(Confidence::from_exceedance(duration, BLOCKING_MS))
                .with_recommendations(["Load with `defer`/`async` or preload the resource"]),
            );
        }
    }
    if let Some(status) = entry.status().filter(|s| *s >= 400) {
        findings.push(
            anomaly("failed-resource", Severity::High, format!("{url} returned {status}"))
                .with_recommendations(["Fix or remove the failing request"]),
        );
    }
    if let Some(size) = entry.encoded_size().filter(|s| *s > LARGE_BYTES) {
        #[expect(
            clippy::cast_precision_loss,
            reason = "byte sizes fit comfortably in f64"
        )]
        let confidence = Confidence::from_exceedance(size as f64, LARGE_BYTES as f64);
        findings.push(
            anomaly(
                "large-resource",
                Severity::Medium,
                format!("{url} is {} KiB", size / 1024),
            )
            .with_confidence(confidence)
            .with_recommendations(["Compress, resize or split the resource"]),
        );
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{RequestExt, ResponseExt, SnapshotBuilder, request, response};

    fn rules(findings: &[Finding]) -> Vec<&'static str> {
        findings.iter().map(|f| f.rule).collect()
    }

    #[test]
    fn buckets_count_cache_hits() {
        let snapshot = SnapshotBuilder::new()
            .request(request("a", "GET", "https://a.test/app.js", 0).resource("Script"))
            .response(response("a", 304, 10).size(100))
            .request(request("b", "GET", "https://a.test/lib.js", 0).resource("script"))
            .response(response("b", 200, 20).size(300).header("X-Cache", "Hit from cloudfront"))
            .request(request("c", "GET", "https://a.test/logo.png", 0))
            .response(response("c", 200, 30).header("CF-Cache-Status", "MISS"))
            .build();

        let profile = profile_performance(&snapshot);
        let script = profile.buckets.iter().find(|b| b.resource_type == "script").unwrap();
        assert_eq!(script.count, 2);
        assert_eq!(script.total_size, 400);
        assert_eq!(script.cache_hits, 2);
        assert!((profile.cache_hit_ratio - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn waterfall_counts_overlaps() {
        let snapshot = SnapshotBuilder::new()
            .request(request("a", "GET", "https://a.test/1", 0))
            .response(response("a", 200, 100))
            .request(request("b", "GET", "https://a.test/2", 50))
            .response(response("b", 200, 150))
            .request(request("c", "GET", "https://a.test/3", 200))
            .response(response("c", 200, 300))
            .request(request("d", "GET", "https://a.test/4", 90))
            .build();

        let profile = profile_performance(&snapshot);
        let by_id: BTreeMap<&str, usize> = profile
            .waterfall
            .iter()
            .map(|w| (w.request_id.as_str(), w.parallelism))
            .collect();
        assert_eq!(by_id["a"], 1);
        assert_eq!(by_id["b"], 1);
        assert_eq!(by_id["c"], 0);
        assert_eq!(by_id["d"], 0);
        let starts: Vec<i64> = profile.waterfall.iter().map(|w| w.start).collect();
        assert_eq!(starts, vec![0, 50, 90, 200]);
    }

    #[test]
    fn waterfall_end_saturates_on_huge_durations() {
        let snapshot = SnapshotBuilder::new()
            .request(request("a", "GET", "https://a.test/stuck", i64::MAX - 10))
            .response(response("a", 200, i64::MAX).elapsed(1e300))
            .request(request("b", "GET", "https://a.test/next", i64::MAX - 5))
            .response(response("b", 200, i64::MAX).elapsed(1.0))
            .build();

        let profile = profile_performance(&snapshot);
        assert_eq!(profile.waterfall[0].end, Some(i64::MAX));
        assert_eq!(profile.waterfall[0].parallelism, 1);
        assert_eq!(profile.waterfall[1].end, Some(i64::MAX - 4));
    }

    #[test]
    fn bottlenecks_flag_slow_failed_large_and_blocking() {
        let snapshot = SnapshotBuilder::new()
            .request(request("slow", "GET", "https://a.test/report", 0))
            .response(response("slow", 200, 0).elapsed(6_000.0))
            .request(request("fail", "GET", "https://a.test/missing", 10_000))
            .response(response("fail", 404, 10_050))
            .request(request("big", "GET", "https://a.test/video.mp4", 20_000))
            .response(response("big", 200, 20_100).size(2 * 1024 * 1024))
            .request(request("css", "GET", "https://a.test/site.css", 30_000).resource("stylesheet"))
            .response(response("css", 200, 30_800))
            .build();

        let profile = profile_performance(&snapshot);
        assert_eq!(
            rules(&profile.bottlenecks),
            vec!["slow-resource", "failed-resource", "large-resource", "render-blocking"]
        );
        assert_eq!(profile.bottlenecks[0].severity, Severity::High);
        assert!(profile.bottlenecks.iter().all(|f| f.kind == FindingKind::Anomaly));
    }

    #[test]
    fn suggestions_fire_on_volume() {
        let mut builder = SnapshotBuilder::new();
        for i in 0..60 {
            let id = format!("img{i}");
            builder = builder
                .request(request(&id, "GET", &format!("https://a.test/{i}.png"), i).resource("image"))
                .response(response(&id, 200, i + 5));
        }
        builder = builder
            .request(request("js", "GET", "https://a.test/bundle.js", 100).resource("script"))
            .response(response("js", 200, 150).size(200 * 1024));

        let findings = performance_findings(&builder.build());
        let suggestions: Vec<&str> = findings
            .iter()
            .filter(|f| f.kind == FindingKind::Suggestion)
            .map(|f| f.rule)
            .collect();
        assert_eq!(
            suggestions,
            vec!["too-many-requests", "uncompressed-scripts", "low-cache-ratio", "too-many-images"]
        );
    }

    #[test]
    fn small_sessions_skip_cache_suggestion() {
        let snapshot = SnapshotBuilder::new()
            .request(request("a", "GET", "https://a.test/x", 0))
            .response(response("a", 200, 10))
            .build();
        assert!(profile_performance(&snapshot).suggestions.is_empty());
    }
}
