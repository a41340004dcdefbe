//! Record and snapshot builders for unit tests.

use std::sync::Arc;

use crate::event::{ConsoleLevel, ConsoleRecord, RequestRecord, ResponseRecord};
use crate::snapshot::Snapshot;
use crate::types::{RequestId, SessionId};

pub fn console(level: ConsoleLevel, text: &str, timestamp: i64) -> ConsoleRecord {
    ConsoleRecord::new(level, text, timestamp)
}

pub fn error(text: &str, timestamp: i64) -> ConsoleRecord {
    ConsoleRecord::new(ConsoleLevel::Error, text, timestamp)
}

pub fn request(id: &str, method: &str, url: &str, timestamp: i64) -> RequestRecord {
    let mut record = RequestRecord::new(RequestId::new(id).unwrap(), url, timestamp);
    record.method = method.to_string();
    record
}

pub fn response(id: &str, status: u16, timestamp: i64) -> ResponseRecord {
    ResponseRecord::new(RequestId::new(id).unwrap(), status, timestamp)
}

pub trait ConsoleExt {
    fn source(self, url: &str) -> Self;
    fn stack(self, trace: &str) -> Self;
}

impl ConsoleExt for ConsoleRecord {
    fn source(mut self, url: &str) -> Self {
        self.source_url = Some(url.to_string());
        self
    }

    fn stack(mut self, trace: &str) -> Self {
        self.stack_trace = Some(serde_json::Value::String(trace.to_string()));
        self
    }
}

pub trait RequestExt {
    fn resource(self, resource_type: &str) -> Self;
}

impl RequestExt for RequestRecord {
    fn resource(mut self, resource_type: &str) -> Self {
        self.resource_type = Some(resource_type.to_string());
        self
    }
}

pub trait ResponseExt {
    fn elapsed(self, ms: f64) -> Self;
    fn size(self, bytes: u64) -> Self;
    fn raw(self, bytes: u64) -> Self;
    fn header(self, name: &str, value: &str) -> Self;
}

impl ResponseExt for ResponseRecord {
    fn elapsed(mut self, ms: f64) -> Self {
        self.elapsed_ms = Some(ms);
        self
    }

    fn size(mut self, bytes: u64) -> Self {
        self.encoded_size = Some(bytes);
        self
    }

    fn raw(mut self, bytes: u64) -> Self {
        self.raw_size = Some(bytes);
        self
    }

    fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }
}

/// Builds a snapshot directly, bypassing the store.
pub struct SnapshotBuilder {
    snapshot: Snapshot,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self {
            snapshot: Snapshot::empty(SessionId::new("test-session").unwrap()),
        }
    }

    pub fn console(mut self, record: ConsoleRecord) -> Self {
        self.snapshot.console.push(Arc::new(record));
        self
    }

    pub fn request(mut self, record: RequestRecord) -> Self {
        self.snapshot.requests.push(Arc::new(record));
        self
    }

    pub fn response(mut self, record: ResponseRecord) -> Self {
        self.snapshot
            .responses
            .insert(record.request_id.clone(), Arc::new(record));
        self
    }

    pub fn build(self) -> Snapshot {
        self.snapshot
    }
}
