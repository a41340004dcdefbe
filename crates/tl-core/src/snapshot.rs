//! Point-in-time, read-only views of a session's telemetry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::event::{ConsoleRecord, NetworkEntry, RequestRecord, ResponseRecord};
use crate::types::{RequestId, SessionId};

/// Per-session ingestion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStats {
    pub console_ingested: u64,
    pub console_evicted: u64,
    pub requests_ingested: u64,
    pub requests_evicted: u64,
    pub responses_ingested: u64,
    pub responses_evicted: u64,
    /// Responses that referenced a request id the session never saw (or already evicted).
    pub responses_dropped: u64,
}

/// An immutable copy of a session's buffers.
///
/// Records are shared with the store through `Arc`, so taking a snapshot
/// copies pointers, not payloads. Mutations after the snapshot was taken are
/// never visible through it.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    /// Console records in insertion order.
    pub console: Vec<Arc<ConsoleRecord>>,
    /// Requests in insertion order.
    pub requests: Vec<Arc<RequestRecord>>,
    pub responses: HashMap<RequestId, Arc<ResponseRecord>>,
    pub stats: IngestStats,
}

impl Snapshot {
    /// Creates an empty snapshot. Mostly useful for tests and fixtures.
    pub fn empty(session_id: SessionId) -> Self {
        Self {
            session_id,
            created_at: Utc::now(),
            console: Vec::new(),
            requests: Vec::new(),
            responses: HashMap::new(),
            stats: IngestStats::default(),
        }
    }

    /// Requests joined with their responses, in request insertion order.
    pub fn network_entries(&self) -> Vec<NetworkEntry> {
        self.requests
            .iter()
            .map(|request| NetworkEntry {
                request: Arc::clone(request),
                response: self.responses.get(&request.id).cloned(),
            })
            .collect()
    }

    /// Requests that never received a response.
    pub fn pending_requests(&self) -> impl Iterator<Item = &Arc<RequestRecord>> {
        self.requests
            .iter()
            .filter(|request| !self.responses.contains_key(&request.id))
    }

    /// Console errors sorted by timestamp (stable for equal timestamps).
    pub fn errors_by_time(&self) -> Vec<&ConsoleRecord> {
        let mut errors: Vec<&ConsoleRecord> = self
            .console
            .iter()
            .map(AsRef::as_ref)
            .filter(|record| record.is_error())
            .collect();
        errors.sort_by_key(|record| record.timestamp);
        errors
    }

    pub fn is_empty(&self) -> bool {
        self.console.is_empty() && self.requests.is_empty()
    }
}
