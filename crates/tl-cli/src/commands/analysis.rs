//! Analysis commands: correlate, security, insights and report.
//!
//! Every analysis command goes through [`run_report`], so the severity and
//! confidence floors and the failure isolation behave the same whether one
//! analyzer runs or all of them.

use std::fmt::Write as _;
use std::io::Write;

use anyhow::{Context, Result};
use tl_core::report::{analyzer_by_name, default_analyzers};
use tl_core::{
    AnalysisOptions, Analyzer, Confidence, CorrelationConfig, Evidence, Finding, Report, Snapshot,
    run_report,
};

use crate::AnalysisArgs;

/// Converts CLI floors into analysis options.
pub fn options(args: &AnalysisArgs) -> Result<AnalysisOptions> {
    let min_confidence = args
        .min_confidence
        .map(Confidence::new)
        .transpose()
        .context("invalid --min-confidence")?;
    if let Some(window) = args.window_ms {
        anyhow::ensure!(window > 0, "--window-ms must be positive, got {window}");
    }
    Ok(AnalysisOptions {
        min_severity: args.min_severity,
        min_confidence,
        window_ms: args.window_ms,
    })
}

/// Resolves analyzer names; an empty list selects every analyzer.
pub fn resolve_analyzers(
    names: &[String],
    config: &CorrelationConfig,
) -> Result<Vec<Box<dyn Analyzer>>> {
    if names.is_empty() {
        return Ok(default_analyzers(config));
    }
    names
        .iter()
        .map(|name| analyzer_by_name(name, config).map_err(Into::into))
        .collect()
}

fn format_evidence(evidence: &Evidence) -> String {
    match evidence {
        Evidence::Console {
            timestamp,
            level,
            excerpt,
            ..
        } => format!("console @{timestamp} [{level}] {excerpt}"),
        Evidence::Request {
            request_id,
            method,
            url,
        } => format!("request {request_id} {method} {url}"),
        Evidence::Response {
            request_id,
            status,
            timestamp,
        } => format!("response {request_id} {status} @{timestamp}"),
        Evidence::Field { name, value } => format!("{name} = {value}"),
    }
}

/// Formats findings one block each: header line, evidence, hints.
pub fn format_findings(findings: &[Finding]) -> String {
    let mut output = String::new();
    for finding in findings {
        writeln!(
            output,
            "{:<9}{}  {:<12} {:<24} {}",
            finding.severity.as_str().to_uppercase(),
            finding.confidence,
            finding.kind.as_str(),
            finding.rule,
            finding.title
        )
        .unwrap();
        for evidence in &finding.evidence {
            let line = format_evidence(evidence);
            let first = line.lines().next().unwrap_or_default();
            writeln!(output, "    - {first}").unwrap();
        }
        for hint in &finding.recommendations {
            writeln!(output, "    hint: {hint}").unwrap();
        }
    }
    output
}

/// Formats a merged report.
pub fn format_report(report: &Report) -> String {
    let mut output = String::new();

    writeln!(
        output,
        "ANALYSIS: {} ({} findings)",
        report.session_id,
        report.findings.len()
    )
    .unwrap();

    if report.findings.is_empty() {
        writeln!(output, "No findings.").unwrap();
    } else {
        writeln!(output).unwrap();
        writeln!(output, "BY KIND").unwrap();
        writeln!(output, "───────").unwrap();
        for (kind, count) in &report.counts_by_kind {
            writeln!(output, "{:<14}{count:>4}", kind.as_str()).unwrap();
        }

        writeln!(output).unwrap();
        writeln!(output, "FINDINGS").unwrap();
        writeln!(output, "────────").unwrap();
        output.push_str(&format_findings(&report.findings));
    }

    if report.is_partial() {
        writeln!(output).unwrap();
        writeln!(output, "FAILED ANALYZERS").unwrap();
        writeln!(output, "────────────────").unwrap();
        for failure in &report.failures {
            writeln!(output, "{}: {}", failure.analyzer, failure.error).unwrap();
        }
    }

    output
}

/// Runs `analyzers` over the snapshot and prints the merged report.
pub fn run<W: Write>(
    writer: &mut W,
    snapshot: &Snapshot,
    analyzers: &[Box<dyn Analyzer>],
    options: &AnalysisOptions,
    json: bool,
) -> Result<()> {
    let names: Vec<&str> = analyzers.iter().map(|a| a.name()).collect();
    tracing::debug!(analyzers = ?names, "running analysis");

    let report = run_report(snapshot, analyzers, options);
    if report.is_partial() {
        tracing::warn!(
            failed = report.failures.len(),
            "report is partial, some analyzers failed"
        );
    }

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&report)?)?;
    } else {
        write!(writer, "{}", format_report(&report))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::snapshot_from_jsonl;
    use insta::assert_snapshot;
    use tl_core::{FindingKind, RequestId, SessionId, Severity};

    const CAPTURE: &str = r#"
{"type":"request","id":"r1","url":"https://api.test/orders","method":"GET","timestamp":1000}
{"type":"response","requestId":"r1","status":502,"timestamp":1100}
{"type":"console","level":"error","text":"Failed to load https://api.test/orders: 502","timestamp":1150}
{"type":"console","level":"error","text":"Timeout waiting for socket 17","timestamp":2000}
{"type":"console","level":"error","text":"Timeout waiting for socket 18","timestamp":2100}
{"type":"console","level":"error","text":"Timeout waiting for socket 19","timestamp":2200}
{"type":"console","level":"log","text":"login with password=hunter2secret","timestamp":2300}
"#;

    #[test]
    fn findings_render_evidence_and_hints() {
        let finding = Finding::new(
            FindingKind::Correlation,
            "network-error",
            Severity::High,
            "GET https://api.test/orders failed with 502",
        )
        .with_confidence(Confidence::clamped(0.9))
        .with_evidence([
            Evidence::Request {
                request_id: RequestId::new("r1").unwrap(),
                method: "GET".to_string(),
                url: "https://api.test/orders".to_string(),
            },
            Evidence::Field {
                name: "status".to_string(),
                value: "502".to_string(),
            },
        ])
        .with_recommendations(["Check the upstream service"]);

        assert_snapshot!(format_findings(&[finding]), @r"
        HIGH     0.90  correlation  network-error            GET https://api.test/orders failed with 502
            - request r1 GET https://api.test/orders
            - status = 502
            hint: Check the upstream service
        ");
    }

    #[test]
    fn empty_report() {
        let snapshot = Snapshot::empty(SessionId::new("quiet").unwrap());
        let report = run_report(
            &snapshot,
            &default_analyzers(&CorrelationConfig::default()),
            &AnalysisOptions::default(),
        );

        assert_snapshot!(format_report(&report), @r"
        ANALYSIS: quiet (0 findings)
        No findings.
        ");
    }

    #[test]
    fn correlation_finds_network_error_and_repeats() {
        let snapshot = snapshot_from_jsonl(CAPTURE);
        let analyzers = resolve_analyzers(&["correlate".to_string()], &CorrelationConfig::default()).unwrap();
        let report = run_report(&snapshot, &analyzers, &AnalysisOptions::default());
        let rules: Vec<&str> = report.findings.iter().map(|f| f.rule).collect();

        assert!(rules.contains(&"network-error"), "rules: {rules:?}");
        assert!(rules.contains(&"repeated-error"), "rules: {rules:?}");
        let output = format_report(&report);
        assert!(output.contains("BY KIND"));
        assert!(output.contains("request r1 GET https://api.test/orders"));
    }

    #[test]
    fn severity_floor_drops_findings() {
        let snapshot = snapshot_from_jsonl(CAPTURE);
        let analyzers = default_analyzers(&CorrelationConfig::default());
        let options = options(&AnalysisArgs {
            min_severity: Some(Severity::Critical),
            ..AnalysisArgs::default()
        })
        .unwrap();
        let report = run_report(&snapshot, &analyzers, &options);

        assert!(report.findings.iter().all(|f| f.severity == Severity::Critical));
    }

    #[test]
    fn unknown_analyzer_is_an_error() {
        let err = resolve_analyzers(&["astrology".to_string()], &CorrelationConfig::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("unknown analyzer: astrology"));
    }

    #[test]
    fn options_reject_bad_floors() {
        let bad_confidence = AnalysisArgs {
            min_confidence: Some(1.5),
            ..AnalysisArgs::default()
        };
        assert!(options(&bad_confidence).is_err());

        let bad_window = AnalysisArgs {
            window_ms: Some(0),
            ..AnalysisArgs::default()
        };
        assert!(options(&bad_window).is_err());
    }

    #[test]
    fn json_report_lists_security_findings() {
        let snapshot = snapshot_from_jsonl(CAPTURE);
        let analyzers = resolve_analyzers(&["security".to_string()], &CorrelationConfig::default()).unwrap();
        let mut output = Vec::new();
        run(&mut output, &snapshot, &analyzers, &AnalysisOptions::default(), true).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(value["sessionId"], "test");
        let rules: Vec<&str> = value["findings"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|f| f["rule"].as_str())
            .collect();
        assert!(rules.contains(&"sensitive-data"), "rules: {rules:?}");
    }
}
