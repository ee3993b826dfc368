//! Constitutional rules every critic obeys.
//!
//! - **Read-only**: critics see an [`EpisodeView`] of shared references and
//!   are run under a before/after [`Fingerprint`] guard. Stores refuse to
//!   persist an artifact whose content differs from what is already stored.
//! - **Episode-bound**: a finding cannot be built without [`Evidence`], and
//!   [`run_critic`] rejects citations of artifacts outside the audited episode.
//! - **No auto-apply**: critics return [`PatchProposal`]s. Nothing in this
//!   crate applies one. There is no operation that takes a proposal and
//!   changes an episode or an artifact.
//! - **Epistemic time**: `decision_time` bounds PRE_STATE; see
//!   [`crate::critics::leakage`] and [`crate::episode::integrity`].
//!
//! [`Evidence`]: crate::schema::Evidence

use chrono::{DateTime, Utc};

use crate::canonical::{canonical_json_of, sha256_hex};
use crate::schema::{
    Critique, CriticKind, Episode, EpisodeArtifact, Inference, Outcome, PatchProposal, PreState,
};

#[derive(Debug, thiserror::Error)]
pub enum DoctrineViolation {
    #[error("critic {critic} mutated its input for episode {episode_id}")]
    MutatedInput { critic: &'static str, episode_id: String },

    #[error("critic {critic} cited artifact {artifact_id} which is not part of episode {episode_id}")]
    ForeignCitation {
        critic: &'static str,
        episode_id: String,
        artifact_id: String,
    },

    #[error("critic {critic} returned a critique for episode {found} while auditing {expected}")]
    WrongEpisode {
        critic: &'static str,
        expected: String,
        found: String,
    },

    #[error("artifact {artifact_id} is already stored with a different checksum")]
    MutatedArtifact { artifact_id: String },

    #[error("critic {critic} panicked while auditing episode {episode_id}")]
    CriticPanicked { critic: &'static str, episode_id: String },
}

/// Immutable view of one episode and its artifacts.
#[derive(Debug, Clone, Copy)]
pub struct EpisodeView<'a> {
    episode: &'a Episode,
    artifacts: &'a [EpisodeArtifact],
}

impl<'a> EpisodeView<'a> {
    pub fn new(episode: &'a Episode, artifacts: &'a [EpisodeArtifact]) -> Self {
        Self { episode, artifacts }
    }

    pub fn episode(&self) -> &'a Episode {
        self.episode
    }

    pub fn episode_id(&self) -> &'a str {
        &self.episode.id
    }

    pub fn decision_time(&self) -> DateTime<Utc> {
        self.episode.decision_time
    }

    pub fn artifacts(&self) -> &'a [EpisodeArtifact] {
        self.artifacts
    }

    pub fn pre_states(self) -> impl Iterator<Item = (&'a EpisodeArtifact, &'a PreState)> + 'a {
        self.artifacts.iter().filter_map(|a| a.pre_state().map(|p| (a, p)))
    }

    /// Earliest PRE_STATE by sequence.
    pub fn pre_state(&self) -> Option<(&'a EpisodeArtifact, &'a PreState)> {
        self.pre_states().min_by_key(|(a, _)| a.sequence)
    }

    /// Earliest INFERENCE by sequence.
    pub fn inference(&self) -> Option<(&'a EpisodeArtifact, &'a Inference)> {
        self.artifacts
            .iter()
            .filter_map(|a| a.inference().map(|p| (a, p)))
            .min_by_key(|(a, _)| a.sequence)
    }

    pub fn outcome(&self) -> Option<(&'a EpisodeArtifact, &'a Outcome)> {
        self.artifacts
            .iter()
            .filter_map(|a| a.outcome().map(|p| (a, p)))
            .min_by_key(|(a, _)| a.sequence)
    }

    pub fn contains_artifact(&self, artifact_id: &str) -> bool {
        self.artifacts.iter().any(|a| a.id == artifact_id)
    }
}

/// Read-only auditor of a single episode.
///
/// Implementations must be pure: no I/O, no shared mutable state. That is
/// what lets the audit runner execute them concurrently.
pub trait Critic: Send + Sync {
    fn kind(&self) -> CriticKind;

    fn critique(&self, view: &EpisodeView<'_>) -> Critique;

    /// Non-binding remediation suggestions for a critique this critic produced.
    fn propose_patches(&self, _critique: &Critique) -> Vec<PatchProposal> {
        Vec::new()
    }
}

/// Content fingerprint of an episode and all its artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(view: &EpisodeView<'_>) -> Self {
        let mut parts = Vec::with_capacity(view.artifacts.len() + 1);
        parts.push(canonical_json_of(view.episode).unwrap_or_default());
        for a in view.artifacts {
            parts.push(canonical_json_of(a).unwrap_or_default());
        }
        Fingerprint(sha256_hex(parts.join("\n").as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Run one critic under the doctrine guard.
pub fn run_critic(critic: &dyn Critic, view: &EpisodeView<'_>) -> Result<Critique, DoctrineViolation> {
    let name = critic.kind().as_str();
    let before = Fingerprint::of(view);
    let critique = critic.critique(view);
    if Fingerprint::of(view) != before {
        return Err(DoctrineViolation::MutatedInput {
            critic: name,
            episode_id: view.episode_id().to_string(),
        });
    }
    check_bound(name, view, &critique)?;
    Ok(critique)
}

/// Every finding must cite artifacts of the audited episode.
pub fn check_bound(critic: &'static str, view: &EpisodeView<'_>, critique: &Critique) -> Result<(), DoctrineViolation> {
    if critique.episode_id != view.episode_id() {
        return Err(DoctrineViolation::WrongEpisode {
            critic,
            expected: view.episode_id().to_string(),
            found: critique.episode_id.clone(),
        });
    }
    for finding in &critique.findings {
        for c in finding.evidence.citations() {
            if !view.contains_artifact(&c.artifact_id) {
                return Err(DoctrineViolation::ForeignCitation {
                    critic,
                    episode_id: view.episode_id().to_string(),
                    artifact_id: c.artifact_id.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Append-only guard used by stores: re-persisting an artifact is allowed
/// only if it is the same fact. Content is compared by canonical hash, so a
/// NaN that came back from storage as null still counts as unchanged.
pub fn ensure_unmodified(stored: &EpisodeArtifact, candidate: &EpisodeArtifact) -> Result<(), DoctrineViolation> {
    let same_content = matches!(
        (stored.content.checksum(), candidate.content.checksum()),
        (Ok(a), Ok(b)) if a == b
    );
    if stored.checksum != candidate.checksum || !same_content {
        return Err(DoctrineViolation::MutatedArtifact {
            artifact_id: candidate.id.clone(),
        });
    }
    Ok(())
}
