//! Typed artifact payloads, validated when they cross the ingestion boundary.
//!
//! Upstream race-intelligence generators are free to attach fields this core
//! does not model; those land in the flattened `extra`/`fields` maps so the
//! leakage detector still sees them and the checksum still covers them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// =============================================================================
// Features
// =============================================================================

/// A single feature value. Non-finite numbers serialize as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Number(f64),
    Flag(bool),
    Text(String),
    Null,
}

impl FeatureValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FeatureValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        FeatureValue::Number(v)
    }
}

impl From<bool> for FeatureValue {
    fn from(v: bool) -> Self {
        FeatureValue::Flag(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        FeatureValue::Text(v.to_string())
    }
}

/// Declared valid range for a numeric feature (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureRange {
    pub min: f64,
    pub max: f64,
}

impl FeatureRange {
    pub const UNIT: FeatureRange = FeatureRange { min: 0.0, max: 1.0 };

    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }
}

// =============================================================================
// PRE_STATE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerRecord {
    pub name: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

/// Everything known before the decision. Nothing in here may postdate
/// the episode's `decision_time`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreState {
    pub race_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub features: BTreeMap<String, FeatureValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub feature_ranges: BTreeMap<String, FeatureRange>,
    #[serde(default)]
    pub runners: Vec<RunnerRecord>,
    #[serde(default)]
    pub market_snapshots: Vec<MarketSnapshot>,
    /// Earliest quoted favourite ("morning line")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub morning_favorite: Option<String>,
    /// Market consensus favourite at decision time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_favorite: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl PreState {
    pub fn new(race_id: &str) -> Self {
        Self {
            race_id: race_id.to_string(),
            ..Default::default()
        }
    }

    pub fn with_feature(mut self, name: &str, value: impl Into<FeatureValue>) -> Self {
        self.features.insert(name.to_string(), value.into());
        self
    }

    /// Parse an untyped generator payload.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn numeric_feature(&self, name: &str) -> Option<f64> {
        self.features.get(name).and_then(FeatureValue::as_number)
    }
}

// =============================================================================
// INFERENCE
// =============================================================================

/// Trade directive produced by the decision engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Act: place the trade
    Strike,
    /// Keep monitoring, no trade yet
    Watch,
    #[default]
    Pass,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Strike => "STRIKE",
            Verdict::Watch => "WATCH",
            Verdict::Pass => "PASS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub runner: String,
    pub score: f64,
}

/// Internal flags raised by the decision engine itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceSignals {
    #[serde(default)]
    pub chaos_flag: bool,
    #[serde(default)]
    pub leakage_flag: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chaos_level: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inference {
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_prediction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub signals: InferenceSignals,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Inference {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Non-blank rationale text.
    pub fn rationale_text(&self) -> Option<&str> {
        self.rationale
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Stated confidence; NaN and infinities count as not stated.
    pub fn finite_confidence(&self) -> Option<f64> {
        self.confidence.filter(|c| c.is_finite())
    }

    pub fn finite_signal_strength(&self) -> Option<f64> {
        self.signal_strength.filter(|s| s.is_finite())
    }

    /// Gap between the two best candidate scores.
    pub fn score_gap(&self) -> Option<f64> {
        let mut scores: Vec<f64> = self
            .candidates
            .iter()
            .map(|c| c.score)
            .filter(|s| s.is_finite())
            .collect();
        if scores.len() < 2 {
            return None;
        }
        scores.sort_by(|a, b| b.total_cmp(a));
        Some(scores[0] - scores[1])
    }
}

// =============================================================================
// OUTCOME
// =============================================================================

/// Real-world result, written after the race settles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
    #[serde(default)]
    pub placings: Vec<String>,
    #[serde(default)]
    pub final_prices: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pnl: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

pub(crate) fn same_runner(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
