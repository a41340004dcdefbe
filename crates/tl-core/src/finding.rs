//! Derived observations produced by the correlation engine and analyzers.
//!
//! Findings are recomputed on every analysis call and never stored. Evidence
//! points back at records by id or timestamp and carries short excerpts only.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::event::{ConsoleLevel, ConsoleRecord, RequestRecord, ResponseRecord, excerpt};
use crate::types::{Confidence, FindingId, RequestId, Severity};

/// Maximum characters of record text copied into evidence.
pub const EXCERPT_CHARS: usize = 160;

/// The broad category of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingKind {
    Pattern,
    Anomaly,
    Trend,
    Suggestion,
    Correlation,
    Vulnerability,
}

impl FindingKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::Anomaly => "anomaly",
            Self::Trend => "trend",
            Self::Suggestion => "suggestion",
            Self::Correlation => "correlation",
            Self::Vulnerability => "vulnerability",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pointer back into the session's telemetry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "source",
    rename_all = "lowercase",
    rename_all_fields = "camelCase"
)]
pub enum Evidence {
    Console {
        timestamp: i64,
        level: ConsoleLevel,
        excerpt: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        source_url: Option<String>,
    },
    Request {
        request_id: RequestId,
        method: String,
        url: String,
    },
    Response {
        request_id: RequestId,
        status: u16,
        timestamp: i64,
    },
    /// A named value extracted by a pattern (e.g. a capture group).
    Field { name: String, value: String },
}

impl Evidence {
    pub fn console(record: &ConsoleRecord) -> Self {
        Self::Console {
            timestamp: record.timestamp,
            level: record.level,
            excerpt: excerpt(&record.text, EXCERPT_CHARS),
            source_url: record.source_url.clone(),
        }
    }

    /// Console evidence with caller-supplied (e.g. redacted) text.
    pub fn console_with_text(record: &ConsoleRecord, text: &str) -> Self {
        Self::Console {
            timestamp: record.timestamp,
            level: record.level,
            excerpt: excerpt(text, EXCERPT_CHARS),
            source_url: record.source_url.clone(),
        }
    }

    pub fn request(record: &RequestRecord) -> Self {
        Self::Request {
            request_id: record.id.clone(),
            method: record.method.clone(),
            url: excerpt(&record.url, EXCERPT_CHARS),
        }
    }

    pub fn response(record: &ResponseRecord) -> Self {
        Self::Response {
            request_id: record.request_id.clone(),
            status: record.status,
            timestamp: record.timestamp,
        }
    }
}

/// Error families used for root-cause attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorType {
    TypeError,
    ReferenceError,
    SyntaxError,
    RangeError,
    URIError,
    SecurityError,
    Network,
    Unknown,
}

/// Kind of secret or personal data matched by the security scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretKind {
    Password,
    ApiKey,
    BearerToken,
    Jwt,
    AwsAccessKey,
    PrivateKey,
    CreditCard,
    Ssn,
    Email,
}

impl SecretKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::ApiKey => "api-key",
            Self::BearerToken => "bearer-token",
            Self::Jwt => "jwt",
            Self::AwsAccessKey => "aws-access-key",
            Self::PrivateKey => "private-key",
            Self::CreditCard => "credit-card",
            Self::Ssn => "ssn",
            Self::Email => "email",
        }
    }
}

/// Where scanned data was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataLocation {
    Console,
    Url,
}

/// Typed payload for a finding, one variant per rule family.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum FindingDetails {
    None,
    NetworkError {
        request_id: RequestId,
        url: String,
        status: u16,
        matched_errors: usize,
    },
    Cascade {
        root_cause: ErrorType,
        root_excerpt: String,
        length: usize,
        span_ms: i64,
    },
    RepeatedError {
        normalized: String,
        count: usize,
        rate_per_sec: f64,
        first_seen: i64,
        last_seen: i64,
    },
    SensitiveData {
        data_type: SecretKind,
        location: DataLocation,
    },
    MissingHeaders {
        host: String,
        missing: Vec<String>,
    },
    Host {
        host: String,
    },
    Resource {
        request_id: RequestId,
        url: String,
        resource_type: Option<String>,
        duration_ms: Option<f64>,
        size: Option<u64>,
        status: Option<u16>,
        parallelism: usize,
    },
    Metric {
        value: f64,
        threshold: f64,
    },
    Spike {
        bucket_start: i64,
        count: usize,
        baseline: f64,
    },
    Trend {
        before: f64,
        after: f64,
    },
}

/// A typed, derived observation about the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub id: FindingId,
    pub kind: FindingKind,
    /// Stable rule name (e.g. `"repeated-error"`, `"missing-headers"`).
    pub rule: &'static str,
    pub severity: Severity,
    pub confidence: Confidence,
    pub title: String,
    pub details: FindingDetails,
    pub evidence: Vec<Evidence>,
    pub recommendations: Vec<String>,
}

impl Finding {
    /// Creates a finding with full confidence and no evidence.
    pub fn new(
        kind: FindingKind,
        rule: &'static str,
        severity: Severity,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: FindingId::generate(),
            kind,
            rule,
            severity,
            confidence: Confidence::MAX,
            title: title.into(),
            details: FindingDetails::None,
            evidence: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    #[must_use]
    pub const fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: FindingDetails) -> Self {
        self.details = details;
        self
    }

    #[must_use]
    pub fn with_evidence(mut self, evidence: impl IntoIterator<Item = Evidence>) -> Self {
        self.evidence.extend(evidence);
        self
    }

    #[must_use]
    pub fn with_recommendations<S: Into<String>>(
        mut self,
        recommendations: impl IntoIterator<Item = S>,
    ) -> Self {
        self.recommendations
            .extend(recommendations.into_iter().map(Into::into));
        self
    }

    /// Returns true if the finding clears both optional floors.
    #[must_use]
    pub fn passes(&self, min_severity: Option<Severity>, min_confidence: Option<Confidence>) -> bool {
        min_severity.is_none_or(|floor| self.severity.meets(floor))
            && min_confidence.is_none_or(|floor| self.confidence >= floor)
    }
}

/// Number of findings per kind.
pub fn counts_by_kind(findings: &[Finding]) -> BTreeMap<FindingKind, usize> {
    let mut counts = BTreeMap::new();
    for finding in findings {
        *counts.entry(finding.kind).or_insert(0) += 1;
    }
    counts
}
