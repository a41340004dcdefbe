//! Search command: scored multi-pattern matching over console or network records.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tl_core::pattern::{
    FieldOp, FieldPredicate, MatchMode, NamedPattern, PatternMatch, SearchResult, SkippedPattern,
    search_console, search_network,
};
use tl_core::{ConsoleRecord, MatcherConfig, NetworkEntry, PatternMatcher, Snapshot};

use crate::SearchTarget;

/// Search options as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct SearchArgs {
    pub target: SearchTarget,
    pub include: Vec<String>,
    pub all: bool,
    pub exclude: Vec<String>,
    pub named: Vec<String>,
    pub fields: Vec<String>,
    pub case_sensitive: bool,
    pub limit: usize,
}

/// Parses `NAME=REGEX`.
pub fn parse_named(arg: &str) -> Result<NamedPattern> {
    let (name, pattern) = arg
        .split_once('=')
        .with_context(|| format!("named pattern {arg:?} must look like NAME=REGEX"))?;
    anyhow::ensure!(!name.is_empty(), "named pattern {arg:?} has an empty name");
    Ok(NamedPattern {
        name: name.to_string(),
        pattern: pattern.to_string(),
    })
}

fn parse_op(op: &str) -> Result<FieldOp> {
    match op.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
        "equals" | "eq" => Ok(FieldOp::Equals),
        "contains" => Ok(FieldOp::Contains),
        "startswith" => Ok(FieldOp::StartsWith),
        "endswith" => Ok(FieldOp::EndsWith),
        "regex" => Ok(FieldOp::Regex),
        _ => anyhow::bail!(
            "unknown field operator {op:?} (expected equals, contains, startsWith, endsWith or regex)"
        ),
    }
}

/// Parses `PATH:OP:VALUE`. The value may itself contain colons.
pub fn parse_field(arg: &str, case_sensitive: bool) -> Result<FieldPredicate> {
    let mut parts = arg.splitn(3, ':');
    let (Some(path), Some(op), Some(value)) = (parts.next(), parts.next(), parts.next()) else {
        anyhow::bail!("field predicate {arg:?} must look like PATH:OP:VALUE");
    };
    anyhow::ensure!(!path.is_empty(), "field predicate {arg:?} has an empty path");
    Ok(FieldPredicate {
        path: path.to_string(),
        op: parse_op(op)?,
        value: value.to_string(),
        case_sensitive,
    })
}

/// Builds the matcher configuration from command-line arguments.
pub fn matcher_config(args: &SearchArgs) -> Result<MatcherConfig> {
    let named = args
        .named
        .iter()
        .map(|n| parse_named(n))
        .collect::<Result<Vec<_>>>()?;
    let fields = args
        .fields
        .iter()
        .map(|f| parse_field(f, args.case_sensitive))
        .collect::<Result<Vec<_>>>()?;
    Ok(MatcherConfig {
        include: args.include.clone(),
        mode: if args.all { MatchMode::All } else { MatchMode::Any },
        exclude: args.exclude.clone(),
        named,
        fields,
        case_sensitive: args.case_sensitive,
    })
}

/// One rendered hit: a label line plus the match details.
struct Row<'a> {
    label: String,
    matched: &'a PatternMatch,
}

fn write_captures(output: &mut String, captures: &BTreeMap<String, String>) {
    for (name, value) in captures {
        writeln!(output, "      {name} = {value}").unwrap();
    }
}

fn write_skipped(output: &mut String, skipped: &[SkippedPattern]) {
    if skipped.is_empty() {
        return;
    }
    writeln!(output).unwrap();
    writeln!(output, "SKIPPED PATTERNS").unwrap();
    writeln!(output, "────────────────").unwrap();
    for pattern in skipped {
        let reason = pattern
            .reason
            .lines()
            .find(|l| l.starts_with("error:"))
            .unwrap_or("invalid pattern");
        writeln!(output, "{:<8} {}  {reason}", pattern.slot, pattern.pattern).unwrap();
    }
}

fn format_rows<T>(result: &SearchResult<T>, rows: &[Row<'_>]) -> String {
    let mut output = String::new();

    writeln!(output, "SEARCH: {} matches", result.total_matched).unwrap();
    if rows.len() < result.total_matched {
        writeln!(output, "(showing top {})", rows.len()).unwrap();
    }

    if rows.is_empty() {
        writeln!(output, "No matching records.").unwrap();
    } else {
        writeln!(output).unwrap();
        writeln!(output, "{:>5}  RECORD", "SCORE").unwrap();
        writeln!(output, "{}", "─".repeat(40)).unwrap();
        for row in rows {
            writeln!(output, "{:>5}  {}", row.matched.score, row.label).unwrap();
            write_captures(&mut output, &row.matched.captures);
        }
    }

    write_skipped(&mut output, &result.skipped_patterns);
    output
}

/// Formats console search hits.
pub fn format_console_search(result: &SearchResult<Arc<ConsoleRecord>>) -> String {
    let rows: Vec<Row<'_>> = result
        .matches
        .iter()
        .map(|hit| Row {
            label: format!(
                "{} [{}] {}",
                hit.record.timestamp,
                hit.record.level,
                hit.record.text.lines().next().unwrap_or_default()
            ),
            matched: &hit.matched,
        })
        .collect();
    format_rows(result, &rows)
}

/// Formats network search hits.
pub fn format_network_search(result: &SearchResult<NetworkEntry>) -> String {
    let rows: Vec<Row<'_>> = result
        .matches
        .iter()
        .map(|hit| {
            let status = hit
                .record
                .status()
                .map_or_else(|| "...".to_string(), |s| s.to_string());
            Row {
                label: format!("{} {} {status}", hit.record.request.method, hit.record.request.url),
                matched: &hit.matched,
            }
        })
        .collect();
    format_rows(result, &rows)
}

/// Runs the search command.
pub fn run<W: Write>(
    writer: &mut W,
    snapshot: &Snapshot,
    args: &SearchArgs,
    json: bool,
) -> Result<()> {
    let config = matcher_config(args)?;
    let matcher = PatternMatcher::new(&config);

    let output = match args.target {
        SearchTarget::Console => {
            let result = search_console(snapshot, &matcher, args.limit);
            tracing::debug!(matched = result.total_matched, "console search finished");
            if json {
                serde_json::to_string_pretty(&result)? + "\n"
            } else {
                format_console_search(&result)
            }
        }
        SearchTarget::Network => {
            let result = search_network(snapshot, &matcher, args.limit);
            tracing::debug!(matched = result.total_matched, "network search finished");
            if json {
                serde_json::to_string_pretty(&result)? + "\n"
            } else {
                format_network_search(&result)
            }
        }
    };
    write!(writer, "{output}")?;
    Ok(())
}
