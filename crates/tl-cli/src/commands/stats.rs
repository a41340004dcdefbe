//! Stats command for showing what a capture replay ingested and evicted.

use std::fmt::Write as _;
use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;
use tl_core::{IngestStats, SessionId};
use tl_store::{SessionStore, SessionSummary, StoreConfig};

use crate::feed::FeedStats;

/// Everything `tl stats` reports.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub session: SessionSummary,
    pub capacity: StoreConfig,
    pub ingest: IngestStats,
    pub feed: FeedStats,
}

/// Collects the stats for one session.
pub fn collect(store: &SessionStore, session: &SessionId, feed: FeedStats) -> Result<StatsReport> {
    let summary = store
        .sessions()
        .into_iter()
        .find(|s| &s.id == session)
        .with_context(|| format!("session {session} is not open"))?;
    let ingest = store.stats(session)?;
    Ok(StatsReport {
        session: summary,
        capacity: *store.config(),
        ingest,
        feed,
    })
}

/// Formats the human-readable stats.
pub fn format_stats(report: &StatsReport) -> String {
    let mut output = String::new();
    let ingest = &report.ingest;

    writeln!(output, "Session: {}", report.session.id).unwrap();

    writeln!(output).unwrap();
    writeln!(output, "FEED").unwrap();
    writeln!(output, "────").unwrap();
    writeln!(output, "Lines:      {}", report.feed.lines).unwrap();
    writeln!(output, "Ingested:   {}", report.feed.ingested).unwrap();
    writeln!(output, "Malformed:  {}", report.feed.malformed).unwrap();

    writeln!(output).unwrap();
    writeln!(
        output,
        "{:<10}{:>8}{:>10}{:>9}{:>9}",
        "BUFFER", "HELD", "CAPACITY", "INGESTED", "EVICTED"
    )
    .unwrap();
    writeln!(output, "{}", "─".repeat(46)).unwrap();
    for (name, held, capacity, ingested, evicted) in [
        (
            "console",
            report.session.console_len,
            report.capacity.console_capacity,
            ingest.console_ingested,
            ingest.console_evicted,
        ),
        (
            "requests",
            report.session.request_len,
            report.capacity.request_capacity,
            ingest.requests_ingested,
            ingest.requests_evicted,
        ),
        (
            "responses",
            report.session.response_len,
            report.capacity.response_capacity,
            ingest.responses_ingested,
            ingest.responses_evicted,
        ),
    ] {
        writeln!(
            output,
            "{name:<10}{held:>8}{capacity:>10}{ingested:>9}{evicted:>9}"
        )
        .unwrap();
    }

    if ingest.responses_dropped > 0 {
        writeln!(output).unwrap();
        writeln!(
            output,
            "{} responses dropped (no matching request)",
            ingest.responses_dropped
        )
        .unwrap();
    }

    output
}

/// Runs the stats command.
pub fn run<W: Write>(
    writer: &mut W,
    store: &SessionStore,
    session: &SessionId,
    feed: FeedStats,
    json: bool,
) -> Result<()> {
    let report = collect(store, session, feed)?;

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&report)?)?;
    } else {
        write!(writer, "{}", format_stats(&report))?;
    }
    Ok(())
}
