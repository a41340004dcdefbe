use std::io::Write;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tl_cli::commands::{analysis, console, network, perf, search, stats};
use tl_cli::{Cli, Commands, Config, feed};
use tl_core::query::StatusRange;
use tl_core::report::analyzer_by_name;
use tl_core::{ConsoleQuery, NetworkQuery, Snapshot};

/// Returns `Some(values)` unless the list is empty.
fn non_empty<T: Clone>(values: &[T]) -> Option<Vec<T>> {
    (!values.is_empty()).then(|| values.to_vec())
}

#[expect(
    clippy::too_many_lines,
    reason = "CLI command dispatch is inherently verbose"
)]
fn dispatch<W: Write>(
    out: &mut W,
    command: &Commands,
    config: &Config,
    capture: &feed::Capture,
    snapshot: &Snapshot,
) -> Result<()> {
    let json = command.input().json;
    let correlation = config.correlation_config();

    match command {
        Commands::Console {
            level,
            pattern,
            regex,
            case_sensitive,
            start,
            end,
            limit,
            ..
        } => {
            let query = ConsoleQuery {
                level: non_empty(level),
                pattern: pattern.clone(),
                regex: *regex,
                case_sensitive: *case_sensitive,
                start_time: *start,
                end_time: *end,
                limit: Some(limit.unwrap_or(config.default_limit)),
            };
            console::run(out, snapshot, &query, json)?;
        }
        Commands::Network {
            url,
            method,
            status,
            status_min,
            status_max,
            resource_type,
            min_duration,
            max_duration,
            limit,
            ..
        } => {
            let status_range = (status_min.is_some() || status_max.is_some()).then(|| StatusRange {
                min: status_min.unwrap_or(0),
                max: status_max.unwrap_or(u16::MAX),
            });
            let query = NetworkQuery {
                url_pattern: url.clone(),
                method: non_empty(method),
                status_code: non_empty(status),
                status_range,
                resource_type: non_empty(resource_type),
                min_duration: *min_duration,
                max_duration: *max_duration,
                limit: Some(limit.unwrap_or(config.default_limit)),
            };
            network::run(out, snapshot, &query, json)?;
        }
        Commands::Perf { .. } => perf::run_stats(out, snapshot, json)?,
        Commands::Profile { .. } => perf::run_profile(out, snapshot, json)?,
        Commands::Search {
            target,
            include,
            all,
            exclude,
            named,
            field,
            case_sensitive,
            limit,
            ..
        } => {
            let args = search::SearchArgs {
                target: *target,
                include: include.clone(),
                all: *all,
                exclude: exclude.clone(),
                named: named.clone(),
                fields: field.clone(),
                case_sensitive: *case_sensitive,
                limit: limit.unwrap_or(config.default_limit),
            };
            search::run(out, snapshot, &args, json)?;
        }
        Commands::Correlate { analysis: args, .. }
        | Commands::Security { analysis: args, .. }
        | Commands::Insights { analysis: args, .. } => {
            let name = match command {
                Commands::Correlate { .. } => "correlation",
                Commands::Security { .. } => "security",
                _ => "insights",
            };
            let analyzers = vec![analyzer_by_name(name, &correlation)?];
            let options = analysis::options(args)?;
            analysis::run(out, snapshot, &analyzers, &options, json)?;
        }
        Commands::Report {
            analysis: args,
            analyzers,
            ..
        } => {
            let analyzers = analysis::resolve_analyzers(analyzers, &correlation)?;
            let options = analysis::options(args)?;
            analysis::run(out, snapshot, &analyzers, &options, json)?;
        }
        Commands::Stats { .. } => {
            stats::run(out, &capture.store, &capture.session, capture.feed, json)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Logs go to stderr so JSON output on stdout stays parseable
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        // No subcommand, show help
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    let input = command.input();
    let capture = feed::load_capture(&config, &input.input, &input.session).await?;
    if capture.feed.malformed > 0 {
        tracing::warn!(
            malformed = capture.feed.malformed,
            "some capture lines were not valid telemetry events"
        );
    }
    let snapshot = capture
        .store
        .snapshot(&capture.session)
        .context("failed to snapshot session")?;

    let mut out = std::io::stdout().lock();
    dispatch(&mut out, command, &config, &capture, &snapshot)?;
    out.flush()?;

    capture.store.close(&capture.session)?;
    Ok(())
}
