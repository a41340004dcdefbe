//! Replays a JSONL telemetry capture into a store session.
//!
//! A reader task parses one event per line and pushes it through a bounded
//! channel; the caller's task drains the channel into the store. Malformed
//! lines are logged and counted, never fatal.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tl_core::{SessionId, TelemetryEvent};
use tl_store::SessionStore;

use crate::Config;

/// Events buffered between the reader task and the store.
const CHANNEL_CAPACITY: usize = 1024;

/// What the feed saw while replaying a capture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedStats {
    /// Non-blank lines read.
    pub lines: usize,
    pub ingested: usize,
    /// Lines that were not a valid telemetry event.
    pub malformed: usize,
}

/// A store holding one replayed session.
pub struct Capture {
    pub store: Arc<SessionStore>,
    pub session: SessionId,
    pub feed: FeedStats,
}

type LineReader = Box<dyn AsyncBufRead + Unpin + Send>;

async fn open_input(path: &Path) -> Result<LineReader> {
    if path == Path::new("-") {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Reads lines and forwards parsed events; returns `(lines, malformed)`.
async fn read_events(
    reader: LineReader,
    tx: mpsc::Sender<TelemetryEvent>,
) -> Result<(usize, usize)> {
    let mut lines = reader.lines();
    let mut line_no = 0;
    let mut read = 0;
    let mut malformed = 0;

    while let Some(line) = lines
        .next_line()
        .await
        .with_context(|| format!("failed to read line {}", line_no + 1))?
    {
        line_no += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        read += 1;
        match serde_json::from_str::<TelemetryEvent>(trimmed) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    tracing::debug!(line = line_no, "ingest side closed, stopping feed");
                    break;
                }
            }
            Err(e) => {
                malformed += 1;
                tracing::warn!(line = line_no, error = %e, "skipping malformed event");
            }
        }
    }
    Ok((read, malformed))
}

/// Pushes every event from `reader` into `session`.
pub async fn replay(
    reader: LineReader,
    store: &SessionStore,
    session: &SessionId,
) -> Result<FeedStats> {
    let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
    let producer = tokio::spawn(read_events(reader, tx));

    let mut ingested = 0;
    while let Some(event) = rx.recv().await {
        store
            .ingest(session, event)
            .with_context(|| format!("failed to ingest into session {session}"))?;
        ingested += 1;
    }

    let (lines, malformed) = producer.await.context("feed reader task panicked")??;
    tracing::debug!(lines, ingested, malformed, "capture replayed");
    Ok(FeedStats {
        lines,
        ingested,
        malformed,
    })
}

/// Opens a store sized by `config` and replays the capture at `input` into it.
pub async fn load_capture(config: &Config, input: &Path, session: &str) -> Result<Capture> {
    let store = Arc::new(
        SessionStore::new(config.store_config()).context("invalid store configuration")?,
    );
    let session = SessionId::new(session).context("invalid session id")?;
    store.open(&session);

    let reader = open_input(input).await?;
    let feed = replay(reader, &store, &session).await?;
    Ok(Capture {
        store,
        session,
        feed,
    })
}
