//! In-memory telemetry store for tracelens.
//!
//! Holds one set of bounded buffers per debugging session: a console ring
//! and request/response indexes. Buffers evict strictly by insertion order.
//! Nothing is persisted; closing a session (or dropping the store) discards
//! its telemetry.
//!
//! # Thread Safety
//!
//! [`SessionStore`] is `Send + Sync` and is meant to be shared through an
//! `Arc`. The session map sits behind an `RwLock` and every session's buffers
//! behind their own `Mutex`, so ingesting into one session never blocks
//! another. Readers take a [`Snapshot`]: the containers are copied under the
//! session lock while the records themselves are shared `Arc`s, so analysis
//! runs without holding any lock.
//!
//! A poisoned lock is recovered rather than propagated. Every mutation is a
//! single append or replace, so a panic elsewhere cannot leave a buffer
//! half-written.

mod ring;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tl_core::{
    ConsoleRecord, IngestStats, RequestId, RequestRecord, ResponseRecord, SessionId, Snapshot,
    TelemetryEvent,
};

pub use ring::{BoundedIndex, BoundedRing};

/// Default console ring capacity.
pub const DEFAULT_CONSOLE_CAPACITY: usize = 10_000;
/// Default request index capacity.
pub const DEFAULT_REQUEST_CAPACITY: usize = 5_000;
/// Default response index capacity.
pub const DEFAULT_RESPONSE_CAPACITY: usize = 5_000;

/// Store errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The session was never opened, or has been closed.
    #[error("session not found: {id}")]
    SessionNotFound { id: SessionId },
    /// A buffer capacity of zero was configured.
    #[error("{buffer} capacity must be at least 1")]
    InvalidCapacity { buffer: &'static str },
}

/// Per-session buffer capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub console_capacity: usize,
    pub request_capacity: usize,
    pub response_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            console_capacity: DEFAULT_CONSOLE_CAPACITY,
            request_capacity: DEFAULT_REQUEST_CAPACITY,
            response_capacity: DEFAULT_RESPONSE_CAPACITY,
        }
    }
}

impl StoreConfig {
    fn validate(&self) -> Result<(), StoreError> {
        for (buffer, capacity) in [
            ("console", self.console_capacity),
            ("request", self.request_capacity),
            ("response", self.response_capacity),
        ] {
            if capacity == 0 {
                return Err(StoreError::InvalidCapacity { buffer });
            }
        }
        Ok(())
    }
}

/// Summary of an open session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub console_len: usize,
    pub request_len: usize,
    pub response_len: usize,
}

struct SessionBuffers {
    id: SessionId,
    created_at: DateTime<Utc>,
    console: BoundedRing<Arc<ConsoleRecord>>,
    requests: BoundedIndex<RequestId, Arc<RequestRecord>>,
    responses: BoundedIndex<RequestId, Arc<ResponseRecord>>,
    stats: IngestStats,
}

impl SessionBuffers {
    fn new(id: SessionId, config: &StoreConfig) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            console: BoundedRing::new(config.console_capacity),
            requests: BoundedIndex::new(config.request_capacity),
            responses: BoundedIndex::new(config.response_capacity),
            stats: IngestStats::default(),
        }
    }

    fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            created_at: self.created_at,
            console_len: self.console.len(),
            request_len: self.requests.len(),
            response_len: self.responses.len(),
        }
    }

    fn push_console(&mut self, record: ConsoleRecord) {
        tracing::trace!(session = %self.id, level = %record.level, "ingest console");
        self.stats.console_ingested += 1;
        if self.console.push(Arc::new(record)).is_some() {
            self.stats.console_evicted += 1;
            tracing::debug!(session = %self.id, "console ring full, evicted oldest record");
        }
    }

    fn push_request(&mut self, record: RequestRecord) {
        tracing::trace!(session = %self.id, request_id = %record.id, "ingest request");
        self.stats.requests_ingested += 1;
        if let Some((evicted, _)) = self.requests.insert(record.id.clone(), Arc::new(record)) {
            self.stats.requests_evicted += 1;
            tracing::debug!(session = %self.id, request_id = %evicted, "request index full, evicted oldest");
        }
    }

    fn push_response(&mut self, record: ResponseRecord) {
        if !self.requests.contains_key(&record.request_id) {
            self.stats.responses_dropped += 1;
            tracing::debug!(
                session = %self.id,
                request_id = %record.request_id,
                "dropping response for unknown request"
            );
            return;
        }
        tracing::trace!(session = %self.id, request_id = %record.request_id, status = record.status, "ingest response");
        self.stats.responses_ingested += 1;
        if let Some((evicted, _)) = self
            .responses
            .insert(record.request_id.clone(), Arc::new(record))
        {
            self.stats.responses_evicted += 1;
            tracing::debug!(session = %self.id, request_id = %evicted, "response index full, evicted oldest");
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            session_id: self.id.clone(),
            created_at: self.created_at,
            console: self.console.iter().cloned().collect(),
            requests: self.requests.iter().map(|(_, r)| Arc::clone(r)).collect(),
            responses: self
                .responses
                .iter()
                .map(|(id, r)| (id.clone(), Arc::clone(r)))
                .collect(),
            stats: self.stats,
        }
    }
}

type SharedBuffers = Arc<Mutex<SessionBuffers>>;

fn lock(buffers: &Mutex<SessionBuffers>) -> MutexGuard<'_, SessionBuffers> {
    buffers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The per-session telemetry store.
///
/// See the [module documentation](self) for the locking model.
pub struct SessionStore {
    config: StoreConfig,
    sessions: RwLock<HashMap<SessionId, SharedBuffers>>,
}

impl SessionStore {
    /// Creates an empty store. Rejects zero capacities.
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        Ok(Self {
            config,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Opens a session, or returns the existing one untouched.
    pub fn open(&self, id: &SessionId) -> SessionSummary {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let buffers = sessions.entry(id.clone()).or_insert_with(|| {
            tracing::info!(session = %id, "session opened");
            Arc::new(Mutex::new(SessionBuffers::new(id.clone(), &self.config)))
        });
        lock(buffers).summary()
    }

    /// Closes a session and discards its buffers.
    ///
    /// Snapshots taken earlier stay valid.
    pub fn close(&self, id: &SessionId) -> Result<(), StoreError> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        match removed {
            Some(_) => {
                tracing::info!(session = %id, "session closed");
                Ok(())
            }
            None => Err(StoreError::SessionNotFound { id: id.clone() }),
        }
    }

    fn session(&self, id: &SessionId) -> Result<SharedBuffers, StoreError> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::SessionNotFound { id: id.clone() })
    }

    pub fn ingest_console(&self, id: &SessionId, record: ConsoleRecord) -> Result<(), StoreError> {
        let buffers = self.session(id)?;
        lock(&buffers).push_console(record);
        Ok(())
    }

    /// Indexes a request. Re-ingesting a known id replaces the record in place.
    pub fn ingest_request(&self, id: &SessionId, record: RequestRecord) -> Result<(), StoreError> {
        let buffers = self.session(id)?;
        lock(&buffers).push_request(record);
        Ok(())
    }

    /// Indexes a response. Responses for requests the session does not hold
    /// are dropped and counted in [`IngestStats::responses_dropped`].
    pub fn ingest_response(&self, id: &SessionId, record: ResponseRecord) -> Result<(), StoreError> {
        let buffers = self.session(id)?;
        lock(&buffers).push_response(record);
        Ok(())
    }

    /// Dispatches a transport event to the matching ingest operation.
    pub fn ingest(&self, id: &SessionId, event: TelemetryEvent) -> Result<(), StoreError> {
        match event {
            TelemetryEvent::Console(record) => self.ingest_console(id, record),
            TelemetryEvent::Request(record) => self.ingest_request(id, record),
            TelemetryEvent::Response(record) => self.ingest_response(id, record),
        }
    }

    /// Takes a point-in-time view of a session.
    pub fn snapshot(&self, id: &SessionId) -> Result<Snapshot, StoreError> {
        let buffers = self.session(id)?;
        let snapshot = lock(&buffers).snapshot();
        Ok(snapshot)
    }

    pub fn stats(&self, id: &SessionId) -> Result<IngestStats, StoreError> {
        let buffers = self.session(id)?;
        let stats = lock(&buffers).stats;
        Ok(stats)
    }

    /// Open sessions, ordered by id.
    pub fn sessions(&self) -> Vec<SessionSummary> {
        let shared: Vec<SharedBuffers> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut summaries: Vec<SessionSummary> = shared.iter().map(|b| lock(b).summary()).collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tl_core::ConsoleLevel;

    fn sid(id: &str) -> SessionId {
        SessionId::new(id).unwrap()
    }

    fn rid(id: &str) -> RequestId {
        RequestId::new(id).unwrap()
    }

    fn small_store() -> SessionStore {
        SessionStore::new(StoreConfig {
            console_capacity: 3,
            request_capacity: 2,
            response_capacity: 2,
        })
        .unwrap()
    }

    fn log(text: &str, timestamp: i64) -> ConsoleRecord {
        ConsoleRecord::new(ConsoleLevel::Log, text, timestamp)
    }

    #[test]
    fn rejects_zero_capacity() {
        let result = SessionStore::new(StoreConfig {
            request_capacity: 0,
            ..StoreConfig::default()
        });
        assert!(matches!(
            result,
            Err(StoreError::InvalidCapacity { buffer: "request" })
        ));
    }

    #[test]
    fn console_ring_keeps_most_recent() {
        let store = small_store();
        let id = sid("tab-1");
        store.open(&id);
        for i in 0..5 {
            store.ingest_console(&id, log(&format!("m{i}"), i)).unwrap();
        }

        let snapshot = store.snapshot(&id).unwrap();
        let texts: Vec<&str> = snapshot.console.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
        assert_eq!(snapshot.stats.console_ingested, 5);
        assert_eq!(snapshot.stats.console_evicted, 2);
    }

    #[test]
    fn request_index_keeps_most_recent() {
        let store = small_store();
        let id = sid("tab-1");
        store.open(&id);
        for name in ["a", "b", "c"] {
            store
                .ingest_request(&id, RequestRecord::new(rid(name), format!("https://a.test/{name}"), 0))
                .unwrap();
        }
        let snapshot = store.snapshot(&id).unwrap();
        let ids: Vec<&str> = snapshot.requests.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(snapshot.stats.requests_evicted, 1);
    }

    #[test]
    fn response_index_keeps_most_recent() {
        let store = SessionStore::new(StoreConfig {
            console_capacity: 3,
            request_capacity: 10,
            response_capacity: 2,
        })
        .unwrap();
        let id = sid("tab-1");
        store.open(&id);
        for (i, name) in ["a", "b", "c"].into_iter().enumerate() {
            let ts = i64::try_from(i).unwrap();
            store
                .ingest_request(&id, RequestRecord::new(rid(name), format!("https://a.test/{name}"), ts))
                .unwrap();
            store
                .ingest_response(&id, ResponseRecord::new(rid(name), 200, ts + 10))
                .unwrap();
        }

        let snapshot = store.snapshot(&id).unwrap();
        let mut kept: Vec<&str> = snapshot.responses.keys().map(RequestId::as_str).collect();
        kept.sort_unstable();
        assert_eq!(kept, vec!["b", "c"]);
        let pending: Vec<&str> = snapshot.pending_requests().map(|r| r.id.as_str()).collect();
        assert_eq!(pending, vec!["a"]);
        assert_eq!(snapshot.stats.responses_ingested, 3);
        assert_eq!(snapshot.stats.responses_evicted, 1);
        assert_eq!(snapshot.stats.requests_evicted, 0);
    }

    #[test]
    fn orphan_response_is_dropped_and_counted() {
        let store = small_store();
        let id = sid("tab-1");
        store.open(&id);
        store
            .ingest_response(&id, ResponseRecord::new(rid("ghost"), 200, 1))
            .unwrap();

        let stats = store.stats(&id).unwrap();
        assert_eq!(stats.responses_dropped, 1);
        assert_eq!(stats.responses_ingested, 0);
        assert!(store.snapshot(&id).unwrap().responses.is_empty());
    }

    #[test]
    fn pending_request_stays_pending() {
        let store = small_store();
        let id = sid("tab-1");
        store.open(&id);
        store
            .ingest(&id, TelemetryEvent::Request(RequestRecord::new(rid("r1"), "https://a.test", 0)))
            .unwrap();
        store
            .ingest(&id, TelemetryEvent::Request(RequestRecord::new(rid("r2"), "https://a.test/2", 1)))
            .unwrap();
        store
            .ingest(&id, TelemetryEvent::Response(ResponseRecord::new(rid("r2"), 204, 2)))
            .unwrap();

        let snapshot = store.snapshot(&id).unwrap();
        let pending: Vec<&str> = snapshot.pending_requests().map(|r| r.id.as_str()).collect();
        assert_eq!(pending, vec!["r1"]);
    }

    #[test]
    fn open_is_idempotent() {
        let store = small_store();
        let id = sid("tab-1");
        let first = store.open(&id);
        store.ingest_console(&id, log("kept", 1)).unwrap();
        let second = store.open(&id);

        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.console_len, 1);
        assert_eq!(store.sessions().len(), 1);
    }

    #[test]
    fn closed_session_is_not_found() {
        let store = small_store();
        let id = sid("tab-1");
        store.open(&id);
        store.ingest_console(&id, log("before close", 1)).unwrap();
        let taken = store.snapshot(&id).unwrap();
        store.close(&id).unwrap();

        let expected = StoreError::SessionNotFound { id: id.clone() };
        assert_eq!(store.snapshot(&id).unwrap_err(), expected);
        assert_eq!(store.ingest_console(&id, log("late", 2)).unwrap_err(), expected);
        assert_eq!(store.close(&id).unwrap_err(), expected);
        assert_eq!(taken.console.len(), 1);
    }

    #[test]
    fn snapshot_is_isolated_from_later_ingest() {
        let store = small_store();
        let id = sid("tab-1");
        store.open(&id);
        store.ingest_console(&id, log("one", 1)).unwrap();
        let snapshot = store.snapshot(&id).unwrap();
        store.ingest_console(&id, log("two", 2)).unwrap();

        assert_eq!(snapshot.console.len(), 1);
        assert_eq!(store.snapshot(&id).unwrap().console.len(), 2);
    }

    #[test]
    fn sessions_are_independent_across_threads() {
        let store = Arc::new(SessionStore::new(StoreConfig::default()).unwrap());
        let ids: Vec<SessionId> = (0..4).map(|i| sid(&format!("tab-{i}"))).collect();
        for id in &ids {
            store.open(id);
        }

        std::thread::scope(|scope| {
            for id in &ids {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    for i in 0..250 {
                        store.ingest_console(id, log("tick", i)).unwrap();
                    }
                });
            }
        });

        for summary in store.sessions() {
            assert_eq!(summary.console_len, 250);
        }
    }
}
