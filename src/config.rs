use serde::{Deserialize, Serialize};

/// Policy thresholds shared by the critics and the audit runner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// STRIKE above this chaos level is a hard rule violation
    pub chaos_strike_max: f64,
    /// STRIKE below this confidence is a hard rule violation
    pub min_strike_confidence: f64,
    /// Confidence above this is overreach on its own
    pub overreach_confidence: f64,
    /// "High confidence" for pairing checks
    pub high_confidence: f64,
    /// Signal strength below this is "low"
    pub low_signal_strength: f64,
    /// Top-two candidate gap below this is "small"
    pub min_score_gap: f64,
    pub critical_features: Vec<String>,
    pub audit_threads: usize,
}

pub const DEFAULT_CRITICAL_FEATURES: [&str; 4] =
    ["chaos_level", "field_size", "favorite_odds", "market_overround"];

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            chaos_strike_max: 0.7,
            min_strike_confidence: 0.5,
            overreach_confidence: 0.95,
            high_confidence: 0.75,
            low_signal_strength: 0.4,
            min_score_gap: 0.05,
            critical_features: DEFAULT_CRITICAL_FEATURES.iter().map(|s| s.to_string()).collect(),
            audit_threads: num_cpus::get().clamp(1, 8),
        }
    }
}

impl AuditConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            chaos_strike_max: std::env::var("CHAOS_STRIKE_MAX").ok().and_then(|v| v.parse().ok()).unwrap_or(d.chaos_strike_max),
            min_strike_confidence: std::env::var("MIN_STRIKE_CONFIDENCE").ok().and_then(|v| v.parse().ok()).unwrap_or(d.min_strike_confidence),
            overreach_confidence: std::env::var("OVERREACH_CONFIDENCE").ok().and_then(|v| v.parse().ok()).unwrap_or(d.overreach_confidence),
            high_confidence: std::env::var("HIGH_CONFIDENCE").ok().and_then(|v| v.parse().ok()).unwrap_or(d.high_confidence),
            low_signal_strength: std::env::var("LOW_SIGNAL_STRENGTH").ok().and_then(|v| v.parse().ok()).unwrap_or(d.low_signal_strength),
            min_score_gap: std::env::var("MIN_SCORE_GAP").ok().and_then(|v| v.parse().ok()).unwrap_or(d.min_score_gap),
            critical_features: std::env::var("CRITICAL_FEATURES")
                .ok()
                .map(|v| parse_list(&v))
                .filter(|l| !l.is_empty())
                .unwrap_or(d.critical_features),
            audit_threads: std::env::var("AUDIT_THREADS").ok().and_then(|v| v.parse().ok()).filter(|n: &usize| *n > 0).unwrap_or(d.audit_threads),
        }
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
