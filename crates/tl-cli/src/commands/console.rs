//! Console command: filtered console messages.

use std::fmt::Write as _;
use std::io::Write;

use anyhow::Result;
use tl_core::query::{ConsoleQueryResult, query_console};
use tl_core::{ConsoleQuery, ConsoleRecord, Snapshot};

/// Renders a console message's source location, if any.
fn location(record: &ConsoleRecord) -> Option<String> {
    let url = record.source_url.as_deref()?;
    Some(match (record.line, record.column) {
        (Some(line), Some(column)) => format!("{url}:{line}:{column}"),
        (Some(line), None) => format!("{url}:{line}"),
        _ => url.to_string(),
    })
}

/// Formats the human-readable console listing.
pub fn format_console(result: &ConsoleQueryResult) -> String {
    let mut output = String::new();

    writeln!(
        output,
        "CONSOLE: {} of {} messages matched",
        result.filtered, result.total
    )
    .unwrap();

    if result.messages.is_empty() {
        writeln!(output, "No matching messages.").unwrap();
        return output;
    }

    if result.messages.len() < result.filtered {
        writeln!(output, "(showing last {})", result.messages.len()).unwrap();
    }

    writeln!(output).unwrap();
    writeln!(output, "{:>13}  {:<5}  MESSAGE", "TIME", "LEVEL").unwrap();
    writeln!(output, "{}", "─".repeat(40)).unwrap();
    for record in &result.messages {
        let first_line = record.text.lines().next().unwrap_or_default();
        write!(
            output,
            "{:>13}  {:<5}  {first_line}",
            record.timestamp,
            record.level.as_str()
        )
        .unwrap();
        if let Some(location) = location(record) {
            write!(output, "  ({location})").unwrap();
        }
        writeln!(output).unwrap();
    }

    output
}

/// Runs the console command.
pub fn run<W: Write>(
    writer: &mut W,
    snapshot: &Snapshot,
    query: &ConsoleQuery,
    json: bool,
) -> Result<()> {
    let result = query_console(snapshot, query)?;
    tracing::debug!(matched = result.filtered, "console query finished");

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&result)?)?;
    } else {
        write!(writer, "{}", format_console(&result))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::snapshot_from_jsonl;
    use insta::assert_snapshot;
    use tl_core::ConsoleLevel;

    const CAPTURE: &str = r#"
{"type":"console","level":"log","text":"app booted","timestamp":1000}
{"type":"console","level":"error","text":"TypeError: x is undefined\n    at render (app.js:10:5)","timestamp":1200,"sourceUrl":"https://a.test/app.js","line":10,"column":5}
{"type":"console","level":"warning","text":"deprecated API","timestamp":1300}
{"type":"console","level":"error","text":"Failed to fetch","timestamp":1400,"sourceUrl":"https://a.test/api.js"}
"#;

    #[test]
    fn errors_only_listing() {
        let snapshot = snapshot_from_jsonl(CAPTURE);
        let query = ConsoleQuery {
            level: Some(vec![ConsoleLevel::Error]),
            ..ConsoleQuery::default()
        };
        let result = query_console(&snapshot, &query).unwrap();

        assert_snapshot!(format_console(&result), @r"
        CONSOLE: 2 of 4 messages matched

                 TIME  LEVEL  MESSAGE
        ────────────────────────────────────────
                 1200  error  TypeError: x is undefined  (https://a.test/app.js:10:5)
                 1400  error  Failed to fetch  (https://a.test/api.js)
        ");
    }

    #[test]
    fn truncated_listing_says_so() {
        let snapshot = snapshot_from_jsonl(CAPTURE);
        let query = ConsoleQuery {
            limit: Some(1),
            ..ConsoleQuery::default()
        };
        let result = query_console(&snapshot, &query).unwrap();
        let output = format_console(&result);

        assert!(output.contains("(showing last 1)"));
        assert!(output.contains("Failed to fetch"));
        assert!(!output.contains("app booted"));
    }

    #[test]
    fn empty_result_has_hint() {
        let snapshot = snapshot_from_jsonl(CAPTURE);
        let query = ConsoleQuery {
            pattern: Some("nothing like this".to_string()),
            ..ConsoleQuery::default()
        };
        let result = query_console(&snapshot, &query).unwrap();

        assert_snapshot!(format_console(&result), @r"
        CONSOLE: 0 of 4 messages matched
        No matching messages.
        ");
    }

    #[test]
    fn invalid_regex_is_reported() {
        let snapshot = snapshot_from_jsonl(CAPTURE);
        let query = ConsoleQuery {
            pattern: Some("(unclosed".to_string()),
            regex: true,
            ..ConsoleQuery::default()
        };
        let mut output = Vec::new();
        let err = run(&mut output, &snapshot, &query, false).unwrap_err();
        assert!(err.to_string().contains("invalid pattern"));
        assert!(output.is_empty());
    }

    #[test]
    fn json_output_lists_messages() {
        let snapshot = snapshot_from_jsonl(CAPTURE);
        let query = ConsoleQuery {
            pattern: Some("fetch".to_string()),
            ..ConsoleQuery::default()
        };
        let mut output = Vec::new();
        run(&mut output, &snapshot, &query, true).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(value["filtered"], 1);
        assert_eq!(value["messages"][0]["text"], "Failed to fetch");
    }
}
