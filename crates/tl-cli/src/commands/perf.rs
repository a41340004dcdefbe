//! Perf and profile commands.
//!
//! `tl perf` prints aggregate request statistics; `tl profile` prints the
//! resource profile with its bottlenecks and suggestions.

use std::fmt::Write as _;
use std::io::Write;

use anyhow::Result;
use tl_core::Snapshot;
use tl_core::analyze::{PerformanceProfile, profile_performance};
use tl_core::query::{PerformanceStats, RankedRequest, network_performance};

use super::analysis::format_findings;

// ========== Formatting Helpers ==========

/// Formats a duration in milliseconds; `-` when unknown.
/// Returns "Xms" below one second, "X.XXs" above.
pub fn format_ms(ms: Option<f64>) -> String {
    match ms {
        None => "-".to_string(),
        Some(ms) if ms >= 1000.0 => format!("{:.2}s", ms / 1000.0),
        Some(ms) => format!("{ms:.0}ms"),
    }
}

/// Formats a byte count with a binary unit.
#[expect(
    clippy::cast_precision_loss,
    reason = "display only, one decimal place"
)]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn write_ranked(output: &mut String, heading: &str, ranked: &[RankedRequest]) {
    if ranked.is_empty() {
        return;
    }
    writeln!(output).unwrap();
    writeln!(output, "{heading}").unwrap();
    writeln!(output, "{}", "─".repeat(heading.chars().count())).unwrap();
    for request in ranked {
        let status = request
            .status
            .map_or_else(|| "...".to_string(), |s| s.to_string());
        let size = request.size.map_or_else(|| "-".to_string(), format_bytes);
        writeln!(
            output,
            "{:>9} {size:>9} {status:>4}  {} {}",
            format_ms(request.duration_ms),
            request.method,
            request.url
        )
        .unwrap();
    }
}

// ========== Perf ==========

/// Formats aggregate network statistics.
pub fn format_performance(stats: &PerformanceStats) -> String {
    let mut output = String::new();

    writeln!(output, "NETWORK PERFORMANCE").unwrap();
    writeln!(output, "───────────────────").unwrap();

    if stats.total_requests == 0 {
        writeln!(output, "No requests captured.").unwrap();
        return output;
    }

    writeln!(output, "Requests:      {}", stats.total_requests).unwrap();
    writeln!(output, "Failed:        {}", stats.failed_requests).unwrap();
    writeln!(output, "Pending:       {}", stats.pending_requests).unwrap();
    writeln!(
        output,
        "Avg response:  {}",
        format_ms(stats.avg_response_time)
    )
    .unwrap();

    if !stats.by_status_class.is_empty() {
        writeln!(output).unwrap();
        writeln!(output, "BY STATUS").unwrap();
        writeln!(output, "─────────").unwrap();
        for (class, count) in &stats.by_status_class {
            writeln!(output, "{class:<12}{count:>5}").unwrap();
        }
    }

    writeln!(output).unwrap();
    writeln!(output, "BY TYPE").unwrap();
    writeln!(output, "───────").unwrap();
    for (resource_type, count) in &stats.by_resource_type {
        writeln!(output, "{resource_type:<12}{count:>5}").unwrap();
    }

    write_ranked(&mut output, "SLOWEST", &stats.slowest_requests);
    write_ranked(&mut output, "LARGEST", &stats.largest_requests);

    output
}

/// Runs the perf command.
pub fn run_stats<W: Write>(writer: &mut W, snapshot: &Snapshot, json: bool) -> Result<()> {
    let stats = network_performance(snapshot);

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&stats)?)?;
    } else {
        write!(writer, "{}", format_performance(&stats))?;
    }
    Ok(())
}

// ========== Profile ==========

/// Formats the resource profile.
pub fn format_profile(profile: &PerformanceProfile) -> String {
    let mut output = String::new();

    writeln!(output, "RESOURCE PROFILE").unwrap();
    writeln!(output, "────────────────").unwrap();

    if profile.total_requests == 0 {
        writeln!(output, "No requests captured.").unwrap();
        return output;
    }

    writeln!(output, "Requests:     {}", profile.total_requests).unwrap();
    writeln!(output, "Transferred:  {}", format_bytes(profile.total_size)).unwrap();
    writeln!(
        output,
        "Cache hits:   {:.0}%",
        profile.cache_hit_ratio * 100.0
    )
    .unwrap();

    writeln!(output).unwrap();
    writeln!(
        output,
        "{:<12}{:>6}{:>10}{:>10}{:>7}",
        "TYPE", "COUNT", "SIZE", "TIME", "CACHED"
    )
    .unwrap();
    writeln!(output, "{}", "─".repeat(45)).unwrap();
    for bucket in &profile.buckets {
        writeln!(
            output,
            "{:<12}{:>6}{:>10}{:>10}{:>7}",
            bucket.resource_type,
            bucket.count,
            format_bytes(bucket.total_size),
            format_ms(Some(bucket.total_duration_ms)),
            bucket.cache_hits
        )
        .unwrap();
    }

    writeln!(output).unwrap();
    writeln!(output, "WATERFALL").unwrap();
    writeln!(output, "─────────").unwrap();
    for entry in &profile.waterfall {
        writeln!(
            output,
            "{:>13} {:>9}  x{:<3} {:<11} {}",
            entry.start,
            format_ms(entry.duration_ms),
            entry.parallelism,
            entry.resource_type,
            entry.url
        )
        .unwrap();
    }

    for (heading, findings) in [
        ("BOTTLENECKS", &profile.bottlenecks),
        ("SUGGESTIONS", &profile.suggestions),
    ] {
        if findings.is_empty() {
            continue;
        }
        writeln!(output).unwrap();
        writeln!(output, "{heading}").unwrap();
        writeln!(output, "{}", "─".repeat(heading.len())).unwrap();
        output.push_str(&format_findings(findings));
    }

    output
}

/// Runs the profile command.
pub fn run_profile<W: Write>(writer: &mut W, snapshot: &Snapshot, json: bool) -> Result<()> {
    let profile = profile_performance(snapshot);
    tracing::debug!(
        bottlenecks = profile.bottlenecks.len(),
        suggestions = profile.suggestions.len(),
        "profile finished"
    );

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&profile)?)?;
    } else {
        write!(writer, "{}", format_profile(&profile))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::snapshot_from_jsonl;
    use insta::assert_snapshot;

    const CAPTURE: &str = r#"
{"type":"request","id":"r1","url":"https://a.test/","method":"GET","timestamp":0,"resourceType":"document"}
{"type":"response","requestId":"r1","status":200,"timestamp":200,"encodedSize":4096}
{"type":"request","id":"r2","url":"https://a.test/app.js","method":"GET","timestamp":100,"resourceType":"script"}
{"type":"response","requestId":"r2","status":304,"timestamp":150,"encodedSize":0}
{"type":"request","id":"r3","url":"https://a.test/api","method":"POST","timestamp":300,"resourceType":"xhr"}
{"type":"response","requestId":"r3","status":503,"timestamp":3800,"encodedSize":64}
{"type":"request","id":"r4","url":"https://a.test/late","method":"GET","timestamp":400,"resourceType":"xhr"}
"#;

    #[test]
    fn format_ms_switches_to_seconds() {
        assert_eq!(format_ms(None), "-");
        assert_eq!(format_ms(Some(12.4)), "12ms");
        assert_eq!(format_ms(Some(2500.0)), "2.50s");
    }

    #[test]
    fn format_bytes_picks_unit() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn performance_summary() {
        let snapshot = snapshot_from_jsonl(CAPTURE);
        let stats = network_performance(&snapshot);

        assert_snapshot!(format_performance(&stats), @r"
        NETWORK PERFORMANCE
        ───────────────────
        Requests:      4
        Failed:        1
        Pending:       1
        Avg response:  1.25s

        BY STATUS
        ─────────
        2xx             1
        3xx             1
        5xx             1

        BY TYPE
        ───────
        document        1
        script          1
        xhr             2

        SLOWEST
        ───────
            3.50s      64 B  503  POST https://a.test/api
            200ms    4.0 KB  200  GET https://a.test/
             50ms       0 B  304  GET https://a.test/app.js

        LARGEST
        ───────
            200ms    4.0 KB  200  GET https://a.test/
            3.50s      64 B  503  POST https://a.test/api
             50ms       0 B  304  GET https://a.test/app.js
        ");
    }

    #[test]
    fn empty_session_has_no_tables() {
        let snapshot = snapshot_from_jsonl("");
        assert_snapshot!(format_performance(&network_performance(&snapshot)), @r"
        NETWORK PERFORMANCE
        ───────────────────
        No requests captured.
        ");
        assert_snapshot!(format_profile(&profile_performance(&snapshot)), @r"
        RESOURCE PROFILE
        ────────────────
        No requests captured.
        ");
    }

    #[test]
    fn profile_lists_waterfall_and_bottlenecks() {
        let snapshot = snapshot_from_jsonl(CAPTURE);
        let output = format_profile(&profile_performance(&snapshot));

        assert!(output.contains("Requests:     4"));
        assert!(output.contains("WATERFALL"));
        assert!(output.contains("https://a.test/late"));
        assert!(output.contains("BOTTLENECKS"));
        assert!(output.contains("slow-resource"));
        assert!(output.contains("failed-resource"));
    }

    #[test]
    fn profile_json_is_camel_case() {
        let snapshot = snapshot_from_jsonl(CAPTURE);
        let mut output = Vec::new();
        run_profile(&mut output, &snapshot, true).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(value["totalRequests"], 4);
        assert_eq!(value["waterfall"].as_array().unwrap().len(), 4);
    }
}
