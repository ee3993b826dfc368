//! Ledger entities: episodes, their immutable artifacts, and the typed
//! payloads those artifacts carry.
//!
//! An [`Episode`] is one automated decision (race analysis -> trade
//! directive). Its facts are [`EpisodeArtifact`]s, append-only and
//! checksummed over the canonical JSON of their payload.

pub mod critique;
pub mod payload;
pub mod vocab;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use critique::{
    Citation, Critique, CriticKind, Evidence, Finding, FindingKind, PatchProposal, PatchStatus,
    Severity, SeverityCounts,
};
pub use payload::{
    Candidate, FeatureRange, FeatureValue, Inference, InferenceSignals, MarketSnapshot, Outcome,
    PreState, RunnerRecord, Verdict,
};

/// Lifecycle of an episode. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpisodeStatus {
    /// Created at decision time, outcome not yet known
    Pending,
    /// Outcome recorded
    Complete,
    /// Integrity and replay checks passed
    Validated,
}

impl EpisodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeStatus::Pending => "PENDING",
            EpisodeStatus::Complete => "COMPLETE",
            EpisodeStatus::Validated => "VALIDATED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(EpisodeStatus::Pending),
            "COMPLETE" => Some(EpisodeStatus::Complete),
            "VALIDATED" => Some(EpisodeStatus::Validated),
            _ => None,
        }
    }
}

/// One recorded decision instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// `SHA256(race_id:engine_version:hour_bucket)`
    pub id: String,
    pub race_id: String,
    pub engine_version: String,
    /// Hash of the full input context, kept for replay comparison
    pub context_hash: String,
    /// Epistemic time: when the decision was made
    pub decision_time: DateTime<Utc>,
    /// Execution time: when the episode record was written
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub replay_hash: Option<String>,
    pub status: EpisodeStatus,
    #[serde(default)]
    pub regime: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactType {
    PreState,
    Inference,
    Outcome,
    Critique,
    Patch,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::PreState => "PRE_STATE",
            ArtifactType::Inference => "INFERENCE",
            ArtifactType::Outcome => "OUTCOME",
            ArtifactType::Critique => "CRITIQUE",
            ArtifactType::Patch => "PATCH",
        }
    }
}

/// Artifact body. The artifact type is the variant, so a PRE_STATE artifact
/// can only ever hold a [`PreState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "artifact_type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactPayload {
    PreState(PreState),
    Inference(Inference),
    Outcome(Outcome),
    Critique(Critique),
    Patch(PatchProposal),
}

impl ArtifactPayload {
    pub fn artifact_type(&self) -> ArtifactType {
        match self {
            ArtifactPayload::PreState(_) => ArtifactType::PreState,
            ArtifactPayload::Inference(_) => ArtifactType::Inference,
            ArtifactPayload::Outcome(_) => ArtifactType::Outcome,
            ArtifactPayload::Critique(_) => ArtifactType::Critique,
            ArtifactPayload::Patch(_) => ArtifactType::Patch,
        }
    }

    /// The payload alone as JSON, the form that is checksummed.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            ArtifactPayload::PreState(p) => serde_json::to_value(p),
            ArtifactPayload::Inference(p) => serde_json::to_value(p),
            ArtifactPayload::Outcome(p) => serde_json::to_value(p),
            ArtifactPayload::Critique(p) => serde_json::to_value(p),
            ArtifactPayload::Patch(p) => serde_json::to_value(p),
        }
    }

    /// `SHA256(canonical_json(payload))`
    pub fn checksum(&self) -> Result<String, serde_json::Error> {
        Ok(crate::canonical::checksum(&self.to_value()?))
    }
}

/// One immutable, checksummed fact about an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeArtifact {
    pub id: String,
    pub episode_id: String,
    /// Strict replay order within the episode
    pub sequence: u32,
    pub content: ArtifactPayload,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

impl EpisodeArtifact {
    pub fn artifact_type(&self) -> ArtifactType {
        self.content.artifact_type()
    }

    pub fn pre_state(&self) -> Option<&PreState> {
        match &self.content {
            ArtifactPayload::PreState(p) => Some(p),
            _ => None,
        }
    }

    pub fn inference(&self) -> Option<&Inference> {
        match &self.content {
            ArtifactPayload::Inference(p) => Some(p),
            _ => None,
        }
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        match &self.content {
            ArtifactPayload::Outcome(p) => Some(p),
            _ => None,
        }
    }
}

/// An episode together with its artifacts, the unit exchanged with stores
/// and review tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeBundle {
    pub episode: Episode,
    pub artifacts: Vec<EpisodeArtifact>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ordering_is_lifecycle_order() {
        assert!(EpisodeStatus::Pending < EpisodeStatus::Complete);
        assert!(EpisodeStatus::Complete < EpisodeStatus::Validated);
        for s in [EpisodeStatus::Pending, EpisodeStatus::Complete, EpisodeStatus::Validated] {
            assert_eq!(EpisodeStatus::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_payload_tag_round_trip() {
        let payload = ArtifactPayload::Outcome(Outcome {
            winner: Some("Castanea Breeze".into()),
            ..Default::default()
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["artifact_type"], "OUTCOME");
        assert_eq!(json["payload"]["winner"], "Castanea Breeze");
        let back: ArtifactPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back.artifact_type(), ArtifactType::Outcome);
    }

    #[test]
    fn test_checksum_covers_payload_only() {
        let payload = ArtifactPayload::Outcome(Outcome {
            winner: Some("A".into()),
            ..Default::default()
        });
        let direct = crate::canonical::checksum(&payload.to_value().unwrap());
        assert_eq!(payload.checksum().unwrap(), direct);
    }
}
