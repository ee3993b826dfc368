//! Episode persistence.
//!
//! A commit is the only transactional boundary in the system: the episode
//! row and its new artifacts become visible together or not at all, so a
//! concurrent reader never sees a COMPLETE episode with half its artifacts.
//!
//! Both backends enforce the same rules before writing anything:
//! - artifacts are append-only; re-committing an identical artifact is a
//!   no-op, a different payload under a stored sequence is refused
//! - identity fields of a stored episode never change
//! - status never moves backwards

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use std::collections::HashMap;

use crate::doctrine::{ensure_unmodified, DoctrineViolation};
use crate::schema::{Episode, EpisodeArtifact, EpisodeBundle, EpisodeStatus};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub trait EpisodeStore: Send + Sync {
    /// Atomically upsert the episode and append `new_artifacts`.
    fn commit(&self, episode: &Episode, new_artifacts: &[EpisodeArtifact]) -> Result<()>;

    /// Episode plus all its artifacts ordered by sequence.
    fn load(&self, episode_id: &str) -> Result<Option<EpisodeBundle>>;

    /// All stored episode ids, sorted.
    fn episode_ids(&self) -> Result<Vec<String>>;

    fn load_all(&self) -> Result<Vec<EpisodeBundle>> {
        let mut out = Vec::new();
        for id in self.episode_ids()? {
            if let Some(b) = self.load(&id)? {
                out.push(b);
            }
        }
        Ok(out)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("artifact {artifact_id} belongs to episode {found}, not {expected}")]
    ForeignArtifact {
        artifact_id: String,
        expected: String,
        found: String,
    },

    #[error("episode {episode_id}: sequence {sequence} appears twice with different content")]
    ConflictingSequence { episode_id: String, sequence: u32 },

    #[error("episode {episode_id}: field {field} cannot change once stored")]
    IdentityChanged { episode_id: String, field: &'static str },

    #[error("episode {episode_id}: status cannot move from {from:?} to {to:?}")]
    StatusRegression {
        episode_id: String,
        from: EpisodeStatus,
        to: EpisodeStatus,
    },

    #[error(transparent)]
    Doctrine(#[from] DoctrineViolation),
}

/// Validate a commit against what is already stored and return the
/// artifacts that are genuinely new.
pub(crate) fn check_commit<'a>(
    stored: Option<&EpisodeBundle>,
    episode: &Episode,
    new_artifacts: &'a [EpisodeArtifact],
) -> Result<Vec<&'a EpisodeArtifact>, StoreError> {
    let mut batch: HashMap<u32, &EpisodeArtifact> = HashMap::new();
    for a in new_artifacts {
        if a.episode_id != episode.id {
            return Err(StoreError::ForeignArtifact {
                artifact_id: a.id.clone(),
                expected: episode.id.clone(),
                found: a.episode_id.clone(),
            });
        }
        if let Some(prev) = batch.insert(a.sequence, a) {
            if ensure_unmodified(prev, a).is_err() || prev.id != a.id {
                return Err(StoreError::ConflictingSequence {
                    episode_id: episode.id.clone(),
                    sequence: a.sequence,
                });
            }
        }
    }

    let Some(stored) = stored else {
        let mut fresh: Vec<&EpisodeArtifact> = batch.into_values().collect();
        fresh.sort_by_key(|a| a.sequence);
        return Ok(fresh);
    };

    check_identity(&stored.episode, episode)?;
    if episode.status < stored.episode.status {
        return Err(StoreError::StatusRegression {
            episode_id: episode.id.clone(),
            from: stored.episode.status,
            to: episode.status,
        });
    }

    let existing: HashMap<u32, &EpisodeArtifact> = stored.artifacts.iter().map(|a| (a.sequence, a)).collect();
    let mut fresh = Vec::new();
    for a in batch.into_values() {
        match existing.get(&a.sequence) {
            Some(prev) => {
                if prev.id != a.id {
                    return Err(DoctrineViolation::MutatedArtifact {
                        artifact_id: a.id.clone(),
                    }
                    .into());
                }
                ensure_unmodified(prev, a)?;
            }
            None => fresh.push(a),
        }
    }
    fresh.sort_by_key(|a| a.sequence);
    Ok(fresh)
}

fn check_identity(stored: &Episode, candidate: &Episode) -> Result<(), StoreError> {
    let changed = if stored.race_id != candidate.race_id {
        Some("race_id")
    } else if stored.engine_version != candidate.engine_version {
        Some("engine_version")
    } else if stored.context_hash != candidate.context_hash {
        Some("context_hash")
    } else if stored.decision_time != candidate.decision_time {
        Some("decision_time")
    } else if stored.created_at != candidate.created_at {
        Some("created_at")
    } else if stored.regime != candidate.regime {
        Some("regime")
    } else {
        None
    };
    match changed {
        Some(field) => Err(StoreError::IdentityChanged {
            episode_id: stored.id.clone(),
            field,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::{build_episode_at, write_episode_artifacts_at};
    use crate::schema::{ArtifactPayload, Inference, PreState};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn sample() -> EpisodeBundle {
        let t = Utc.with_ymd_and_hms(2025, 12, 3, 19, 40, 0).unwrap();
        let episode = build_episode_at("R1", "v1", t, &json!({}), t).unwrap();
        let artifacts = write_episode_artifacts_at(&episode.id, PreState::new("R1"), Inference::default(), None, t).unwrap();
        EpisodeBundle { episode, artifacts }
    }

    #[test]
    fn test_recommit_identical_is_noop() {
        let b = sample();
        let fresh = check_commit(Some(&b), &b.episode, &b.artifacts).unwrap();
        assert!(fresh.is_empty());
    }

    #[test]
    fn test_rewrite_refused() {
        let b = sample();
        let mut changed = b.artifacts.clone();
        changed[0].content = ArtifactPayload::PreState(PreState::new("R1").with_feature("chaos_level", 0.1));
        changed[0].checksum = changed[0].content.checksum().unwrap();
        let err = check_commit(Some(&b), &b.episode, &changed).unwrap_err();
        assert!(matches!(err, StoreError::Doctrine(DoctrineViolation::MutatedArtifact { .. })));
    }

    #[test]
    fn test_status_regression_refused() {
        let mut b = sample();
        b.episode.status = EpisodeStatus::Complete;
        let mut older = b.episode.clone();
        older.status = EpisodeStatus::Pending;
        assert!(matches!(
            check_commit(Some(&b), &older, &[]),
            Err(StoreError::StatusRegression { .. })
        ));
    }

    #[test]
    fn test_identity_change_refused() {
        let b = sample();
        let mut moved = b.episode.clone();
        moved.engine_version = "v2".into();
        assert!(matches!(
            check_commit(Some(&b), &moved, &[]),
            Err(StoreError::IdentityChanged { field: "engine_version", .. })
        ));
    }
}
