//! Episode Constructor: deterministic episode identity, checksummed
//! artifacts, replay hashing and integrity validation.
//!
//! ```text
//! build_episode ──► write_episode_artifacts ──► seal_episode      (PENDING)
//!                                                   │
//!            finalize_episode(outcome) ──► seal_episode         (COMPLETE)
//!                                                   │
//!            validate_episode_integrity ──► promote_episode     (VALIDATED)
//! ```
//!
//! Everything here is pure computation. Persisting the results is the
//! caller's job (see [`crate::store`]).

pub mod constructor;
pub mod integrity;

use chrono::{DateTime, Utc};

use crate::schema::EpisodeStatus;

pub use constructor::{
    append_artifact, artifact_id, build_episode, build_episode_at, context_hash, context_matches,
    episode_id, finalize_episode, finalize_episode_at, hour_bucket, make_artifact, replay_episode,
    seal_episode, write_episode_artifacts, write_episode_artifacts_at, INFERENCE_SEQUENCE,
    OUTCOME_SEQUENCE, PRE_STATE_SEQUENCE,
};
pub use integrity::{
    promote_episode, validate_episode_integrity, IntegrityReport, IntegrityViolation, ViolationKind,
};

/// Usage errors from the constructor. Data problems in already-written
/// episodes are reported by [`validate_episode_integrity`] instead.
#[derive(Debug, thiserror::Error)]
pub enum EpisodeError {
    #[error("race_id is missing")]
    MissingRaceId,

    #[error("engine_version is missing")]
    MissingEngineVersion,

    #[error("context must be a JSON object")]
    MalformedContext,

    #[error("decision_time {0} cannot be bucketed")]
    InvalidDecisionTime(DateTime<Utc>),

    #[error("decision_time {decision_time} is after created_at {created_at}")]
    DecisionTimeInFuture {
        decision_time: DateTime<Utc>,
        created_at: DateTime<Utc>,
    },

    #[error("episode {episode_id} already finalized (status {status:?})")]
    AlreadyFinalized {
        episode_id: String,
        status: EpisodeStatus,
    },

    #[error("artifact {artifact_id} belongs to episode {found}, not {expected}")]
    ForeignArtifact {
        artifact_id: String,
        expected: String,
        found: String,
    },

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
