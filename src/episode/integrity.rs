//! Integrity validation for recorded episodes.
//!
//! Three independent checks, every failure collected, nothing raised:
//! 1. Epistemic-time separation (nothing recorded before it was decided)
//! 2. Deterministic id recomputation
//! 3. Per-artifact checksum and replay-hash recomputation
//!
//! A failed report means the episode must not be trusted for learning.
//! Nothing here repairs anything.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::constructor::{episode_id, replay_episode};
use crate::schema::{Episode, EpisodeArtifact, EpisodeStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    EpistemicTime,
    NonDeterministicId,
    ChecksumMismatch,
    ReplayHashMismatch,
    ReplayHashMissing,
    ForeignArtifact,
    DuplicateSequence,
    StatusNotComplete,
    Unserializable,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::EpistemicTime => "epistemic_time",
            ViolationKind::NonDeterministicId => "non_deterministic_id",
            ViolationKind::ChecksumMismatch => "checksum_mismatch",
            ViolationKind::ReplayHashMismatch => "replay_hash_mismatch",
            ViolationKind::ReplayHashMissing => "replay_hash_missing",
            ViolationKind::ForeignArtifact => "foreign_artifact",
            ViolationKind::DuplicateSequence => "duplicate_sequence",
            ViolationKind::StatusNotComplete => "status_not_complete",
            ViolationKind::Unserializable => "unserializable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityViolation {
    pub kind: ViolationKind,
    pub artifact_id: Option<String>,
    pub detail: String,
}

impl IntegrityViolation {
    fn episode(kind: ViolationKind, detail: String) -> Self {
        Self { kind, artifact_id: None, detail }
    }

    fn artifact(kind: ViolationKind, artifact: &EpisodeArtifact, detail: String) -> Self {
        Self {
            kind,
            artifact_id: Some(artifact.id.clone()),
            detail,
        }
    }

    /// Stable name, e.g. `checksum_mismatch:A-<id>-2`
    pub fn name(&self) -> String {
        match &self.artifact_id {
            Some(id) => format!("{}:{}", self.kind.as_str(), id),
            None => self.kind.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub episode_id: String,
    pub violations: Vec<IntegrityViolation>,
}

impl IntegrityReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn has(&self, kind: ViolationKind) -> bool {
        self.violations.iter().any(|v| v.kind == kind)
    }

    pub fn violation_names(&self) -> Vec<String> {
        self.violations.iter().map(IntegrityViolation::name).collect()
    }

    /// `(passed, [violation])`
    pub fn into_parts(self) -> (bool, Vec<String>) {
        (self.is_valid(), self.violation_names())
    }

    pub fn report(&self) -> String {
        let mut out = String::new();
        out.push_str("=== EPISODE INTEGRITY REPORT ===\n\n");
        out.push_str(&format!("Episode: {}\n", self.episode_id));
        out.push_str(&format!("Violations: {}\n", self.violations.len()));
        out.push_str(&format!(
            "Trustworthy: {}\n\n",
            if self.is_valid() { "YES" } else { "NO" }
        ));
        for v in &self.violations {
            out.push_str(&format!("[{}] {}\n", v.name(), v.detail));
        }
        out
    }
}

pub fn validate_episode_integrity(episode: &Episode, artifacts: &[EpisodeArtifact]) -> IntegrityReport {
    let mut violations = Vec::new();
    check_epistemic_time(episode, artifacts, &mut violations);
    check_identity(episode, &mut violations);
    check_hashes(episode, artifacts, &mut violations);
    IntegrityReport {
        episode_id: episode.id.clone(),
        violations,
    }
}

/// COMPLETE -> VALIDATED, only with a clean integrity report.
pub fn promote_episode(episode: &Episode, artifacts: &[EpisodeArtifact]) -> Result<Episode, IntegrityReport> {
    let mut report = validate_episode_integrity(episode, artifacts);
    if episode.status != EpisodeStatus::Complete {
        report.violations.push(IntegrityViolation::episode(
            ViolationKind::StatusNotComplete,
            format!("status is {}, expected COMPLETE", episode.status.as_str()),
        ));
    }
    if !report.is_valid() {
        return Err(report);
    }
    let mut promoted = episode.clone();
    promoted.status = EpisodeStatus::Validated;
    Ok(promoted)
}

fn check_epistemic_time(episode: &Episode, artifacts: &[EpisodeArtifact], out: &mut Vec<IntegrityViolation>) {
    if episode.created_at < episode.decision_time {
        out.push(IntegrityViolation::episode(
            ViolationKind::EpistemicTime,
            format!(
                "episode created_at {} precedes decision_time {}",
                episode.created_at, episode.decision_time
            ),
        ));
    }
    for a in artifacts {
        if a.created_at < episode.decision_time {
            out.push(IntegrityViolation::artifact(
                ViolationKind::EpistemicTime,
                a,
                format!(
                    "{} written at {} before decision_time {}",
                    a.artifact_type().as_str(),
                    a.created_at,
                    episode.decision_time
                ),
            ));
        }
        if let Some(captured) = a.pre_state().and_then(|p| p.captured_at) {
            if captured > episode.decision_time {
                out.push(IntegrityViolation::artifact(
                    ViolationKind::EpistemicTime,
                    a,
                    format!(
                        "PRE_STATE captured at {} after decision_time {}",
                        captured, episode.decision_time
                    ),
                ));
            }
        }
    }
}

fn check_identity(episode: &Episode, out: &mut Vec<IntegrityViolation>) {
    match episode_id(&episode.race_id, &episode.engine_version, episode.decision_time) {
        Ok(expected) if expected == episode.id => {}
        Ok(expected) => out.push(IntegrityViolation::episode(
            ViolationKind::NonDeterministicId,
            format!("stored id {} != recomputed {}", episode.id, expected),
        )),
        Err(err) => out.push(IntegrityViolation::episode(
            ViolationKind::NonDeterministicId,
            format!("id cannot be recomputed: {}", err),
        )),
    }
}

fn check_hashes(episode: &Episode, artifacts: &[EpisodeArtifact], out: &mut Vec<IntegrityViolation>) {
    let mut seen: HashMap<u32, &str> = HashMap::new();
    for a in artifacts {
        if a.episode_id != episode.id {
            out.push(IntegrityViolation::artifact(
                ViolationKind::ForeignArtifact,
                a,
                format!("artifact belongs to episode {}", a.episode_id),
            ));
        }
        if let Some(first) = seen.insert(a.sequence, a.id.as_str()) {
            out.push(IntegrityViolation::artifact(
                ViolationKind::DuplicateSequence,
                a,
                format!("sequence {} already used by {}", a.sequence, first),
            ));
        }
        match a.content.checksum() {
            Ok(actual) if actual == a.checksum => {}
            Ok(actual) => out.push(IntegrityViolation::artifact(
                ViolationKind::ChecksumMismatch,
                a,
                format!("stored {} != recomputed {}", a.checksum, actual),
            )),
            Err(err) => out.push(IntegrityViolation::artifact(
                ViolationKind::Unserializable,
                a,
                err.to_string(),
            )),
        }
    }

    match &episode.replay_hash {
        Some(stored) => {
            let actual = replay_episode(artifacts);
            if &actual != stored {
                out.push(IntegrityViolation::episode(
                    ViolationKind::ReplayHashMismatch,
                    format!("stored {} != recomputed {}", stored, actual),
                ));
            }
        }
        None if episode.status != EpisodeStatus::Pending => {
            out.push(IntegrityViolation::episode(
                ViolationKind::ReplayHashMissing,
                format!("{} episode has no replay hash", episode.status.as_str()),
            ));
        }
        None => {}
    }
}
