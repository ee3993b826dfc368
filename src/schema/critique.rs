//! Critic output types: findings, critiques and patch proposals.
//!
//! A [`Finding`] cannot exist without [`Evidence`], and evidence cannot be
//! empty: the only constructors take a citation, and deserialization rejects
//! an empty citation list.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Worth knowing, never blocking
    Info,
    /// Suspicious, needs a human look
    Warning,
    /// The decision or its data cannot be trusted
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticKind {
    Leakage,
    CognitiveBias,
    FeatureQuality,
    Decision,
}

impl CriticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CriticKind::Leakage => "leakage",
            CriticKind::CognitiveBias => "cognitive_bias",
            CriticKind::FeatureQuality => "feature_quality",
            CriticKind::Decision => "decision",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingKind {
    // leakage
    FutureOutcome,
    FutureMarket,
    TimestampViolation,
    LookaheadName,
    // cognitive bias
    Anchoring,
    Confirmation,
    Recency,
    Overconfidence,
    HerdMentality,
    GamblersFallacy,
    // feature quality
    Missing,
    Redundant,
    Leaked,
    Invalid,
    // decision
    Incoherence,
    NarrativeDrift,
    RuleViolation,
    Overreach,
    MissingRationale,
    ConfidenceMismatch,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::FutureOutcome => "FUTURE_OUTCOME",
            FindingKind::FutureMarket => "FUTURE_MARKET",
            FindingKind::TimestampViolation => "TIMESTAMP_VIOLATION",
            FindingKind::LookaheadName => "LOOKAHEAD_NAME",
            FindingKind::Anchoring => "ANCHORING",
            FindingKind::Confirmation => "CONFIRMATION",
            FindingKind::Recency => "RECENCY",
            FindingKind::Overconfidence => "OVERCONFIDENCE",
            FindingKind::HerdMentality => "HERD_MENTALITY",
            FindingKind::GamblersFallacy => "GAMBLERS_FALLACY",
            FindingKind::Missing => "MISSING",
            FindingKind::Redundant => "REDUNDANT",
            FindingKind::Leaked => "LEAKED",
            FindingKind::Invalid => "INVALID",
            FindingKind::Incoherence => "INCOHERENCE",
            FindingKind::NarrativeDrift => "NARRATIVE_DRIFT",
            FindingKind::RuleViolation => "RULE_VIOLATION",
            FindingKind::Overreach => "OVERREACH",
            FindingKind::MissingRationale => "MISSING_RATIONALE",
            FindingKind::ConfidenceMismatch => "CONFIDENCE_MISMATCH",
        }
    }
}

// =============================================================================
// Evidence
// =============================================================================

/// Pointer to the artifact (and field within it) a finding was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    pub artifact_id: String,
    pub field: String,
}

/// Non-empty list of citations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Citation>", into = "Vec<Citation>")]
pub struct Evidence {
    citations: Vec<Citation>,
}

impl Evidence {
    pub fn cite(artifact_id: &str, field: &str) -> Self {
        Self {
            citations: vec![Citation {
                artifact_id: artifact_id.to_string(),
                field: field.to_string(),
            }],
        }
    }

    pub fn and(mut self, artifact_id: &str, field: &str) -> Self {
        let c = Citation {
            artifact_id: artifact_id.to_string(),
            field: field.to_string(),
        };
        if !self.citations.contains(&c) {
            self.citations.push(c);
        }
        self
    }

    pub fn merge(mut self, other: &Evidence) -> Self {
        for c in &other.citations {
            if !self.citations.contains(c) {
                self.citations.push(c.clone());
            }
        }
        self
    }

    pub fn citations(&self) -> &[Citation] {
        &self.citations
    }

    pub fn primary(&self) -> &Citation {
        // Never empty: every constructor pushes at least one citation.
        &self.citations[0]
    }

    pub fn cites_field(&self, field: &str) -> bool {
        self.citations.iter().any(|c| c.field == field)
    }
}

impl TryFrom<Vec<Citation>> for Evidence {
    type Error = String;

    fn try_from(citations: Vec<Citation>) -> Result<Self, Self::Error> {
        if citations.is_empty() {
            return Err("evidence must cite at least one artifact".to_string());
        }
        Ok(Self { citations })
    }
}

impl From<Evidence> for Vec<Citation> {
    fn from(e: Evidence) -> Self {
        e.citations
    }
}

// =============================================================================
// Findings and critiques
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub severity: Severity,
    pub message: String,
    pub evidence: Evidence,
}

impl Finding {
    pub fn new(kind: FindingKind, severity: Severity, message: impl Into<String>, evidence: Evidence) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            evidence,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub warning: usize,
    pub info: usize,
}

impl SeverityCounts {
    pub fn of(findings: &[Finding]) -> Self {
        let mut counts = Self::default();
        for f in findings {
            match f.severity {
                Severity::Critical => counts.critical += 1,
                Severity::Warning => counts.warning += 1,
                Severity::Info => counts.info += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.critical + self.warning + self.info
    }
}

/// Full, untruncated output of one critic over one episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    pub episode_id: String,
    pub critic: CriticKind,
    pub findings: Vec<Finding>,
    pub counts: SeverityCounts,
    /// No findings at all
    pub is_clean: bool,
    /// No CRITICAL findings
    pub is_coherent: bool,
}

impl Critique {
    pub fn new(episode_id: &str, critic: CriticKind, findings: Vec<Finding>) -> Self {
        let counts = SeverityCounts::of(&findings);
        Self {
            episode_id: episode_id.to_string(),
            critic,
            is_clean: findings.is_empty(),
            is_coherent: counts.critical == 0,
            findings,
            counts,
        }
    }

    pub fn empty(episode_id: &str, critic: CriticKind) -> Self {
        Self::new(episode_id, critic, Vec::new())
    }

    pub fn has_critical(&self) -> bool {
        self.counts.critical > 0
    }

    pub fn of_kind(&self, kind: FindingKind) -> impl Iterator<Item = &Finding> + '_ {
        self.findings.iter().filter(move |f| f.kind == kind)
    }

    pub fn count_kind(&self, kind: FindingKind) -> usize {
        self.of_kind(kind).count()
    }
}

// =============================================================================
// Patch proposals
// =============================================================================

/// Proposals are terminal outputs. There is no `Applied` state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatchStatus {
    #[default]
    Proposed,
}

/// Non-binding remediation suggestion for human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchProposal {
    pub id: String,
    pub episode_id: String,
    #[serde(rename = "type")]
    pub patch_type: FindingKind,
    pub source: CriticKind,
    pub proposed_fix: String,
    pub rationale: String,
    pub evidence: Evidence,
    #[serde(default)]
    pub status: PatchStatus,
}

impl PatchProposal {
    pub fn new(
        episode_id: &str,
        source: CriticKind,
        patch_type: FindingKind,
        proposed_fix: &str,
        rationale: String,
        evidence: Evidence,
    ) -> Self {
        Self {
            id: format!("P-{}-{}", episode_id, patch_type.as_str()),
            episode_id: episode_id.to_string(),
            patch_type,
            source,
            proposed_fix: proposed_fix.to_string(),
            rationale,
            evidence,
            status: PatchStatus::Proposed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_evidence_rejected_on_deserialize() {
        let raw = r#"{"kind":"MISSING","severity":"CRITICAL","message":"x","evidence":[]}"#;
        assert!(serde_json::from_str::<Finding>(raw).is_err());
    }

    #[test]
    fn test_evidence_round_trip() {
        let e = Evidence::cite("A-1", "features.chaos_level").and("A-2", "verdict");
        let json = serde_json::to_string(&e).unwrap();
        let back: Evidence = serde_json::from_str(&json).unwrap();
        assert_eq!(back.citations().len(), 2);
        assert_eq!(back.primary().artifact_id, "A-1");
    }

    #[test]
    fn test_duplicate_citation_collapsed() {
        let e = Evidence::cite("A-1", "x").and("A-1", "x");
        assert_eq!(e.citations().len(), 1);
    }

    #[test]
    fn test_critique_counts_and_coherence() {
        let ev = Evidence::cite("A-1", "x");
        let c = Critique::new(
            "E",
            CriticKind::Decision,
            vec![
                Finding::new(FindingKind::Overreach, Severity::Warning, "w", ev.clone()),
                Finding::new(FindingKind::NarrativeDrift, Severity::Info, "i", ev),
            ],
        );
        assert!(!c.is_clean);
        assert!(c.is_coherent);
        assert_eq!(c.counts.total(), 2);
        assert_eq!(c.count_kind(FindingKind::Overreach), 1);
    }

    #[test]
    fn test_patch_serializes_type_field() {
        let p = PatchProposal::new(
            "E",
            CriticKind::CognitiveBias,
            FindingKind::Anchoring,
            "fix",
            "why".into(),
            Evidence::cite("A-2", "top_prediction"),
        );
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["type"], "ANCHORING");
        assert_eq!(v["status"], "PROPOSED");
    }
}
