//! Network command: filtered requests joined with their responses.

use std::fmt::Write as _;
use std::io::Write;

use anyhow::Result;
use tl_core::query::{NetworkQueryResult, query_network};
use tl_core::{NetworkQuery, Snapshot};

use super::perf::{format_bytes, format_ms};

/// Formats the human-readable request listing.
pub fn format_network(result: &NetworkQueryResult) -> String {
    let mut output = String::new();
    let summary = &result.summary;

    writeln!(
        output,
        "NETWORK: {} requests matched, {} failed",
        summary.total, summary.failed
    )
    .unwrap();
    writeln!(
        output,
        "Avg duration: {}  Transferred: {}",
        format_ms(summary.avg_duration),
        format_bytes(summary.total_size)
    )
    .unwrap();

    if result.requests.is_empty() {
        writeln!(output, "No matching requests.").unwrap();
        return output;
    }

    writeln!(output).unwrap();
    writeln!(
        output,
        "{:<7} {:>6} {:>9} {:>9}  URL",
        "METHOD", "STATUS", "TIME", "SIZE"
    )
    .unwrap();
    writeln!(output, "{}", "─".repeat(40)).unwrap();
    for entry in &result.requests {
        let status = entry
            .status()
            .map_or_else(|| "...".to_string(), |s| s.to_string());
        let size = entry
            .encoded_size()
            .map_or_else(|| "-".to_string(), format_bytes);
        writeln!(
            output,
            "{:<7} {status:>6} {:>9} {size:>9}  {}",
            entry.request.method,
            format_ms(entry.duration_ms()),
            entry.request.url
        )
        .unwrap();
    }

    output
}

/// Runs the network command.
pub fn run<W: Write>(
    writer: &mut W,
    snapshot: &Snapshot,
    query: &NetworkQuery,
    json: bool,
) -> Result<()> {
    let result = query_network(snapshot, query)?;
    tracing::debug!(matched = result.summary.total, "network query finished");

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&result)?)?;
    } else {
        write!(writer, "{}", format_network(&result))?;
    }
    Ok(())
}
