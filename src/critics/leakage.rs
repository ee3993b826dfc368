//! Leakage Detector: future information contaminating a decision.
//!
//! Walks every PRE_STATE payload (nested runner records and market
//! snapshots included) looking for:
//!
//! | Check | Severity |
//! |---|---|
//! | outcome-shaped field, even when null | CRITICAL `FUTURE_OUTCOME` |
//! | market snapshot stamped after `decision_time` | CRITICAL `FUTURE_MARKET` |
//! | any other timestamp after `decision_time` | WARNING `TIMESTAMP_VIOLATION` |
//! | field name matching a lookahead pattern | WARNING `LOOKAHEAD_NAME` |
//!
//! The critique is clean only when nothing at all was found.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use super::proposals_by_kind;
use crate::doctrine::{Critic, EpisodeView};
use crate::schema::vocab::{is_outcome_field, is_timestamp_key, lookahead_pattern};
use crate::schema::{Critique, CriticKind, Evidence, Finding, FindingKind, PatchProposal, Severity};

#[derive(Debug, Clone, Copy, Default)]
pub struct LeakageDetector;

impl LeakageDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Critic for LeakageDetector {
    fn kind(&self) -> CriticKind {
        CriticKind::Leakage
    }

    fn critique(&self, view: &EpisodeView<'_>) -> Critique {
        let mut findings = Vec::new();
        for (artifact, pre) in view.pre_states() {
            let Ok(payload) = serde_json::to_value(pre) else {
                continue;
            };
            let mut scan = Scan {
                artifact_id: &artifact.id,
                decision_time: view.decision_time(),
                findings: &mut findings,
            };
            scan.walk(&payload, "");
        }
        Critique::new(view.episode_id(), CriticKind::Leakage, findings)
    }

    fn propose_patches(&self, critique: &Critique) -> Vec<PatchProposal> {
        proposals_by_kind(critique, |kind| match kind {
            FindingKind::FutureOutcome => Some(
                "Strip result-shaped fields from the PRE_STATE generator and reject payloads that carry them at ingestion.",
            ),
            FindingKind::FutureMarket => Some(
                "Bound market snapshot queries by decision_time; never select prices stamped after the decision.",
            ),
            FindingKind::TimestampViolation => Some(
                "Filter every upstream fetch by as-of <= decision_time and record the as-of time on each source.",
            ),
            FindingKind::LookaheadName => Some(
                "Rename or drop features whose names imply post-race knowledge, even if currently unpopulated.",
            ),
            _ => None,
        })
    }
}

struct Scan<'s> {
    artifact_id: &'s str,
    decision_time: DateTime<Utc>,
    findings: &'s mut Vec<Finding>,
}

impl Scan<'_> {
    fn walk(&mut self, value: &Value, path: &str) {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                for key in keys {
                    let child = join(path, key);
                    let v = &map[key.as_str()];
                    if is_outcome_field(key) {
                        let message = if v.is_null() {
                            format!("outcome field '{}' present before the race", child)
                        } else {
                            format!("outcome field '{}' present before the race: {}", child, preview(v))
                        };
                        self.push(FindingKind::FutureOutcome, Severity::Critical, message, &child);
                        continue;
                    }
                    if let Some(pattern) = lookahead_pattern(key) {
                        self.push(
                            FindingKind::LookaheadName,
                            Severity::Warning,
                            format!("field '{}' matches lookahead pattern '{}'", child, pattern),
                            &child,
                        );
                    }
                    if is_timestamp_key(key) {
                        self.check_timestamp(&child, v);
                    }
                    self.walk(v, &child);
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.walk(item, &format!("{}[{}]", path, i));
                }
            }
            _ => {}
        }
    }

    fn check_timestamp(&mut self, path: &str, value: &Value) {
        let Some(ts) = parse_time(value) else {
            return;
        };
        if ts <= self.decision_time {
            return;
        }
        let ahead = ts - self.decision_time;
        if path.to_ascii_lowercase().contains("market") {
            self.push(
                FindingKind::FutureMarket,
                Severity::Critical,
                format!(
                    "market snapshot '{}' at {} is {}s after decision_time {}",
                    path,
                    ts,
                    ahead.num_seconds(),
                    self.decision_time
                ),
                path,
            );
        } else {
            self.push(
                FindingKind::TimestampViolation,
                Severity::Warning,
                format!(
                    "timestamp '{}' at {} is {}s after decision_time {}",
                    path,
                    ts,
                    ahead.num_seconds(),
                    self.decision_time
                ),
                path,
            );
        }
    }

    fn push(&mut self, kind: FindingKind, severity: Severity, message: String, field: &str) {
        self.findings.push(Finding::new(
            kind,
            severity,
            message,
            Evidence::cite(self.artifact_id, field),
        ));
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn preview(v: &Value) -> String {
    let s = v.to_string();
    if s.chars().count() > 60 {
        format!("{}...", s.chars().take(60).collect::<String>())
    } else {
        s
    }
}

/// RFC 3339 strings, naive ISO strings (read as UTC), or epoch seconds/millis.
pub(crate) fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|n| Utc.from_utc_datetime(&n))
            }),
        Value::Number(n) => {
            // Epoch seconds or millis, integral or not.
            let raw = n.as_f64().filter(|r| r.is_finite())?;
            let millis = if raw > 100_000_000_000.0 { raw } else { raw * 1000.0 };
            Utc.timestamp_millis_opt(millis.round() as i64).single()
        }
        _ => None,
    }
}
