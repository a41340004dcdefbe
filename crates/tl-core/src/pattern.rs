//! Scored multi-pattern matching over telemetry records.
//!
//! Inclusion is boolean: exclude patterns reject first, then include patterns
//! must hit (any or all, per [`MatchMode`]). Everything else only adds to the
//! score, which orders results.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::{ConsoleRecord, NetworkEntry};
use crate::snapshot::Snapshot;

// Ranking aid only. These are hand-tuned weights, not probabilities, and a
// score must never be read as a confidence.
/// Score added per include-pattern hit.
pub const INCLUDE_WEIGHT: u32 = 10;
/// Score added per named-pattern hit.
pub const NAMED_WEIGHT: u32 = 5;
/// Score added per field-predicate hit.
pub const FIELD_WEIGHT: u32 = 3;

/// How include patterns combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    #[default]
    Any,
    All,
}

/// A regex whose capture groups become named evidence fields.
#[derive(Debug, Clone, Deserialize)]
pub struct NamedPattern {
    pub name: String,
    pub pattern: String,
}

/// Comparison applied by a [`FieldPredicate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldOp {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
}

/// A predicate over a dotted path into the record's JSON form,
/// e.g. `response.status` or `request.headers.content-type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPredicate {
    pub path: String,
    pub op: FieldOp,
    pub value: String,
    #[serde(default)]
    pub case_sensitive: bool,
}

/// Matcher configuration as supplied by the caller.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MatcherConfig {
    pub include: Vec<String>,
    pub mode: MatchMode,
    pub exclude: Vec<String>,
    pub named: Vec<NamedPattern>,
    pub fields: Vec<FieldPredicate>,
    pub case_sensitive: bool,
}

/// A pattern that failed to compile and was left out of the matcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPattern {
    pub slot: &'static str,
    pub pattern: String,
    pub reason: String,
}

/// The non-regex field operators.
#[derive(Debug, Clone, Copy)]
enum TextOp {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone)]
enum FieldTest {
    Text {
        op: TextOp,
        value: String,
        case_sensitive: bool,
    },
    Regex(Regex),
}

impl FieldTest {
    fn is_match(&self, actual: &str) -> bool {
        match self {
            Self::Regex(regex) => regex.is_match(actual),
            Self::Text {
                op,
                value,
                case_sensitive,
            } => {
                let actual = if *case_sensitive {
                    actual.to_string()
                } else {
                    actual.to_lowercase()
                };
                match op {
                    TextOp::Equals => actual == *value,
                    TextOp::Contains => actual.contains(value.as_str()),
                    TextOp::StartsWith => actual.starts_with(value.as_str()),
                    TextOp::EndsWith => actual.ends_with(value.as_str()),
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledField {
    path: Vec<String>,
    test: FieldTest,
}

/// Outcome of a successful match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatternMatch {
    pub score: u32,
    pub include_hits: usize,
    pub named_hits: usize,
    pub field_hits: usize,
    /// Named capture groups (or whole matches of named patterns without groups).
    pub captures: BTreeMap<String, String>,
}

/// A compiled matcher. Construction never fails; bad patterns are skipped.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    include: Vec<Regex>,
    /// Include patterns as configured, before invalid ones were dropped.
    configured_includes: usize,
    mode: MatchMode,
    exclude: Vec<Regex>,
    named: Vec<(String, Regex)>,
    fields: Vec<CompiledField>,
    skipped: Vec<SkippedPattern>,
}

impl PatternMatcher {
    pub fn new(config: &MatcherConfig) -> Self {
        let mut skipped = Vec::new();
        let mut compile = |slot: &'static str, pattern: &str, case_sensitive: bool| {
            match RegexBuilder::new(pattern)
                .case_insensitive(!case_sensitive)
                .build()
            {
                Ok(regex) => Some(regex),
                Err(err) => {
                    tracing::warn!(slot, pattern, error = %err, "skipping invalid pattern");
                    skipped.push(SkippedPattern {
                        slot,
                        pattern: pattern.to_string(),
                        reason: err.to_string(),
                    });
                    None
                }
            }
        };

        let include = config
            .include
            .iter()
            .filter_map(|p| compile("include", p, config.case_sensitive))
            .collect();
        let exclude = config
            .exclude
            .iter()
            .filter_map(|p| compile("exclude", p, config.case_sensitive))
            .collect();
        let named = config
            .named
            .iter()
            .filter_map(|n| {
                compile("named", &n.pattern, config.case_sensitive).map(|re| (n.name.clone(), re))
            })
            .collect();
        let fields = config
            .fields
            .iter()
            .filter_map(|f| {
                let op = match f.op {
                    FieldOp::Regex => {
                        let regex = compile("field", &f.value, f.case_sensitive)?;
                        return Some(CompiledField {
                            path: split_path(&f.path),
                            test: FieldTest::Regex(regex),
                        });
                    }
                    FieldOp::Equals => TextOp::Equals,
                    FieldOp::Contains => TextOp::Contains,
                    FieldOp::StartsWith => TextOp::StartsWith,
                    FieldOp::EndsWith => TextOp::EndsWith,
                };
                let test = FieldTest::Text {
                    op,
                    value: if f.case_sensitive {
                        f.value.clone()
                    } else {
                        f.value.to_lowercase()
                    },
                    case_sensitive: f.case_sensitive,
                };
                Some(CompiledField {
                    path: split_path(&f.path),
                    test,
                })
            })
            .collect();

        Self {
            include,
            configured_includes: config.include.len(),
            mode: config.mode,
            exclude,
            named,
            fields,
            skipped,
        }
    }

    /// Patterns that failed to compile.
    pub fn skipped(&self) -> &[SkippedPattern] {
        &self.skipped
    }

    /// Matches `text` (and `record` for field predicates).
    ///
    /// Returns `None` on an exclude hit, or when includes are not satisfied.
    /// Only an empty include list is vacuous: includes that all failed to
    /// compile match nothing.
    pub fn evaluate(&self, text: &str, record: &Value) -> Option<PatternMatch> {
        if self.exclude.iter().any(|re| re.is_match(text)) {
            return None;
        }

        let include_hits = self.include.iter().filter(|re| re.is_match(text)).count();
        let included = match self.mode {
            _ if self.configured_includes == 0 => true,
            MatchMode::Any => include_hits > 0,
            MatchMode::All => !self.include.is_empty() && include_hits == self.include.len(),
        };
        if !included {
            return None;
        }

        let mut captures = BTreeMap::new();
        let mut named_hits = 0;
        for (name, regex) in &self.named {
            let Some(caps) = regex.captures(text) else {
                continue;
            };
            named_hits += 1;
            let mut any_group = false;
            for group in regex.capture_names().flatten() {
                if let Some(value) = caps.name(group) {
                    captures.insert(group.to_string(), value.as_str().to_string());
                    any_group = true;
                }
            }
            if !any_group {
                captures.insert(name.clone(), caps[0].to_string());
            }
        }

        let field_hits = self
            .fields
            .iter()
            .filter(|field| {
                lookup(record, &field.path)
                    .and_then(scalar_text)
                    .is_some_and(|actual| field.test.is_match(&actual))
            })
            .count();

        let score = weight(include_hits, INCLUDE_WEIGHT)
            + weight(named_hits, NAMED_WEIGHT)
            + weight(field_hits, FIELD_WEIGHT);

        Some(PatternMatch {
            score,
            include_hits,
            named_hits,
            field_hits,
            captures,
        })
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('.').map(str::to_string).collect()
}

fn weight(hits: usize, per_hit: u32) -> u32 {
    u32::try_from(hits).unwrap_or(u32::MAX).saturating_mul(per_hit)
}

/// Walks a dotted path through objects and arrays.
fn lookup<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment).or_else(|| {
            map.iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(segment))
                .map(|(_, v)| v)
        }),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A record that matched, with its score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit<T> {
    pub record: T,
    #[serde(flatten)]
    pub matched: PatternMatch,
}

/// Search result, ordered by descending score.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult<T> {
    pub matches: Vec<SearchHit<T>>,
    /// Matches before truncation.
    pub total_matched: usize,
    pub skipped_patterns: Vec<SkippedPattern>,
}

/// Runs the matcher over console records. Record text is the message.
pub fn search_console(
    snapshot: &Snapshot,
    matcher: &PatternMatcher,
    limit: usize,
) -> SearchResult<Arc<ConsoleRecord>> {
    let hits = snapshot
        .console
        .iter()
        .filter_map(|record| {
            let json = serde_json::to_value(record.as_ref()).unwrap_or(Value::Null);
            matcher
                .evaluate(&record.text, &json)
                .map(|matched| (record.timestamp, SearchHit {
                    record: Arc::clone(record),
                    matched,
                }))
        })
        .collect();
    rank(hits, matcher, limit)
}

/// Runs the matcher over network entries. Record text is `METHOD url`.
pub fn search_network(
    snapshot: &Snapshot,
    matcher: &PatternMatcher,
    limit: usize,
) -> SearchResult<NetworkEntry> {
    let hits = snapshot
        .network_entries()
        .into_iter()
        .filter_map(|entry| {
            let text = format!("{} {}", entry.request.method, entry.request.url);
            let json = serde_json::to_value(&entry).unwrap_or(Value::Null);
            let timestamp = entry.request.timestamp;
            matcher
                .evaluate(&text, &json)
                .map(|matched| (timestamp, SearchHit { record: entry, matched }))
        })
        .collect();
    rank(hits, matcher, limit)
}

fn rank<T>(
    mut hits: Vec<(i64, SearchHit<T>)>,
    matcher: &PatternMatcher,
    limit: usize,
) -> SearchResult<T> {
    hits.sort_by(|(ta, a), (tb, b)| b.matched.score.cmp(&a.matched.score).then(ta.cmp(tb)));
    let total_matched = hits.len();
    SearchResult {
        matches: hits.into_iter().take(limit).map(|(_, hit)| hit).collect(),
        total_matched,
        skipped_patterns: matcher.skipped().to_vec(),
    }
}
