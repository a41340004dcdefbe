//! CLI subcommand implementations.

pub mod analysis;
pub mod console;
pub mod network;
pub mod perf;
pub mod search;
pub mod stats;

/// Builds a snapshot from JSONL telemetry for formatter tests.
#[cfg(test)]
pub(crate) fn snapshot_from_jsonl(text: &str) -> tl_core::Snapshot {
    use tl_core::{SessionId, TelemetryEvent};
    use tl_store::{SessionStore, StoreConfig};

    let store = SessionStore::new(StoreConfig::default()).unwrap();
    let session = SessionId::new("test").unwrap();
    store.open(&session);
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let event: TelemetryEvent = serde_json::from_str(line)
            .unwrap_or_else(|e| panic!("invalid fixture line {}: {e}", idx + 1));
        store.ingest(&session, event).unwrap();
    }
    store.snapshot(&session).unwrap()
}
