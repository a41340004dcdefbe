//! Captured browser telemetry: console output and HTTP traffic.
//!
//! Records are produced by the instrumentation transport and are immutable
//! once ingested. Timestamps are milliseconds on the capture's monotonic clock.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::{RequestId, ValidationError};

/// Header map. Keys keep the casing the browser reported; use [`header`] for lookup.
pub type Headers = BTreeMap<String, String>;

/// Case-insensitive header lookup.
pub fn header<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Console message level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
    #[serde(alias = "verbose")]
    Debug,
}

impl ConsoleLevel {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Debug => "debug",
        }
    }
}

impl fmt::Display for ConsoleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConsoleLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "log" => Ok(Self::Log),
            "info" => Ok(Self::Info),
            // DevTools reports "warning"
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "debug" | "verbose" => Ok(Self::Debug),
            _ => Err(ValidationError::InvalidLevel {
                value: s.to_string(),
            }),
        }
    }
}

/// A console message emitted by the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleRecord {
    pub level: ConsoleLevel,
    pub text: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    /// Stack trace as delivered by the transport; never interpreted structurally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<serde_json::Value>,
}

impl ConsoleRecord {
    /// Creates a record with no source location.
    pub fn new(level: ConsoleLevel, text: impl Into<String>, timestamp: i64) -> Self {
        Self {
            level,
            text: text.into(),
            timestamp,
            source_url: None,
            line: None,
            column: None,
            stack_trace: None,
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.level == ConsoleLevel::Error
    }

    /// Text plus any stack trace rendered as a string.
    pub fn full_text(&self) -> String {
        match &self.stack_trace {
            Some(serde_json::Value::String(trace)) => format!("{}\n{trace}", self.text),
            Some(other) => format!("{}\n{other}", self.text),
            None => self.text.clone(),
        }
    }
}

/// An outgoing HTTP request observed by the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub id: RequestId,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: Headers,
    pub timestamp: i64,
    #[serde(default)]
    pub body_present: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Browser resource classification (e.g. "script", "xhr", "image").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
}

impl RequestRecord {
    /// Creates a GET request with no headers or body.
    pub fn new(id: RequestId, url: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id,
            url: url.into(),
            method: "GET".to_string(),
            headers: Headers::new(),
            timestamp,
            body_present: false,
            body: None,
            resource_type: None,
        }
    }

    /// Host portion of the URL, if it parses.
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
    }
}

/// The response to a [`RequestRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub request_id: RequestId,
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub mime_type: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_size: Option<u64>,
}

impl ResponseRecord {
    /// Creates a response with only the required fields set.
    pub fn new(request_id: RequestId, status: u16, timestamp: i64) -> Self {
        Self {
            request_id,
            status,
            status_text: String::new(),
            headers: Headers::new(),
            mime_type: String::new(),
            timestamp,
            elapsed_ms: None,
            encoded_size: None,
            raw_size: None,
        }
    }

    #[must_use]
    pub const fn is_failure(&self) -> bool {
        self.status >= 400
    }
}

/// One event pushed by the instrumentation transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TelemetryEvent {
    Console(ConsoleRecord),
    Request(RequestRecord),
    Response(ResponseRecord),
}

impl TelemetryEvent {
    pub const fn timestamp(&self) -> i64 {
        match self {
            Self::Console(record) => record.timestamp,
            Self::Request(record) => record.timestamp,
            Self::Response(record) => record.timestamp,
        }
    }
}

/// A request joined with its response, if one arrived.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkEntry {
    pub request: Arc<RequestRecord>,
    pub response: Option<Arc<ResponseRecord>>,
}

impl NetworkEntry {
    /// Measured duration: the transport's timing when present, otherwise
    /// the gap between request and response timestamps.
    #[expect(
        clippy::cast_precision_loss,
        reason = "millisecond timestamps fit comfortably in f64"
    )]
    pub fn duration_ms(&self) -> Option<f64> {
        let response = self.response.as_ref()?;
        Some(
            response
                .elapsed_ms
                .unwrap_or_else(|| response.timestamp.saturating_sub(self.request.timestamp).max(0) as f64),
        )
    }

    pub fn status(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }

    pub fn encoded_size(&self) -> Option<u64> {
        self.response.as_ref().and_then(|r| r.encoded_size)
    }

    /// Lower-cased resource type, if the transport supplied one.
    pub fn resource_type(&self) -> Option<String> {
        self.request
            .resource_type
            .as_deref()
            .map(str::to_ascii_lowercase)
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.response.as_ref().is_some_and(|r| r.is_failure())
    }
}

/// Shortens `text` to at most `max_chars` characters for evidence excerpts.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_event_parses_wire_format() {
        let line = r#"{"type":"console","level":"warning","text":"slow","timestamp":5,"sourceUrl":"app.js"}"#;
        let event: TelemetryEvent = serde_json::from_str(line).unwrap();
        let TelemetryEvent::Console(record) = event else {
            panic!("expected console event");
        };
        assert_eq!(record.level, ConsoleLevel::Warn);
        assert_eq!(record.source_url.as_deref(), Some("app.js"));
    }

    #[test]
    fn response_parses_camel_case_fields() {
        let line = r#"{"type":"response","requestId":"r1","status":404,"timestamp":10,"elapsedMs":12.5,"encodedSize":100}"#;
        let event: TelemetryEvent = serde_json::from_str(line).unwrap();
        let TelemetryEvent::Response(record) = event else {
            panic!("expected response event");
        };
        assert_eq!(record.request_id.as_str(), "r1");
        assert!(record.is_failure());
        assert_eq!(record.elapsed_ms, Some(12.5));
        assert_eq!(record.encoded_size, Some(100));
    }

    #[test]
    fn request_rejects_empty_id() {
        let line = r#"{"type":"request","id":"","url":"https://a.test","method":"GET","timestamp":1}"#;
        assert!(serde_json::from_str::<TelemetryEvent>(line).is_err());
    }

    #[test]
    fn level_from_str_accepts_devtools_aliases() {
        assert_eq!("warning".parse::<ConsoleLevel>().unwrap(), ConsoleLevel::Warn);
        assert_eq!("ERROR".parse::<ConsoleLevel>().unwrap(), ConsoleLevel::Error);
        assert!("fatal".parse::<ConsoleLevel>().is_err());
    }

    #[test]
    fn header_lookup_ignores_case() {
        let mut headers = Headers::new();
        headers.insert("Content-Type".to_string(), "text/html".to_string());
        assert_eq!(header(&headers, "content-type"), Some("text/html"));
        assert_eq!(header(&headers, "x-missing"), None);
    }

    #[test]
    fn duration_falls_back_to_timestamps() {
        let request = RequestRecord::new(RequestId::new("r1").unwrap(), "https://a.test/x", 100);
        let response = ResponseRecord::new(RequestId::new("r1").unwrap(), 200, 350);
        let entry = NetworkEntry {
            request: Arc::new(request),
            response: Some(Arc::new(response)),
        };
        assert_eq!(entry.duration_ms(), Some(250.0));

        let pending = NetworkEntry {
            request: Arc::clone(&entry.request),
            response: None,
        };
        assert_eq!(pending.duration_ms(), None);
    }

    #[test]
    fn request_host_is_lowercased() {
        let request = RequestRecord::new(RequestId::new("r1").unwrap(), "https://API.Example.com/v1", 0);
        assert_eq!(request.host().as_deref(), Some("api.example.com"));
    }

    #[test]
    fn excerpt_truncates_on_char_boundary() {
        assert_eq!(excerpt("héllo", 10), "héllo");
        assert_eq!(excerpt("héllo wörld", 5), "héllo…");
    }
}
