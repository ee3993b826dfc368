use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use serde_json::Value;

use super::EpisodeError;
use crate::canonical::{checksum, sha256_hex};
use crate::schema::{
    ArtifactPayload, Episode, EpisodeArtifact, EpisodeStatus, Inference, Outcome, PreState,
};

pub const PRE_STATE_SEQUENCE: u32 = 1;
pub const INFERENCE_SEQUENCE: u32 = 2;
pub const OUTCOME_SEQUENCE: u32 = 3;

// =============================================================================
// Identity
// =============================================================================

/// `decision_time` truncated to the hour, e.g. `2025-12-03T19:00:00+00:00`.
pub fn hour_bucket(decision_time: DateTime<Utc>) -> Result<String, EpisodeError> {
    let truncated = decision_time
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .ok_or(EpisodeError::InvalidDecisionTime(decision_time))?;
    Ok(truncated.to_rfc3339_opts(SecondsFormat::Secs, false))
}

/// `hex(SHA256(race_id + ":" + engine_version + ":" + hour_bucket))`
pub fn episode_id(
    race_id: &str,
    engine_version: &str,
    decision_time: DateTime<Utc>,
) -> Result<String, EpisodeError> {
    let bucket = hour_bucket(decision_time)?;
    Ok(sha256_hex(
        format!("{}:{}:{}", race_id, engine_version, bucket).as_bytes(),
    ))
}

pub fn context_hash(context: &Value) -> String {
    checksum(context)
}

/// Opt-in context drift check. Not part of integrity validation: the
/// context itself is never stored, only its hash.
pub fn context_matches(episode: &Episode, context: &Value) -> bool {
    episode.context_hash == context_hash(context)
}

pub fn artifact_id(episode_id: &str, sequence: u32) -> String {
    format!("A-{}-{}", episode_id, sequence)
}

// =============================================================================
// Construction
// =============================================================================

pub fn build_episode(
    race_id: &str,
    engine_version: &str,
    decision_time: DateTime<Utc>,
    context: &Value,
) -> Result<Episode, EpisodeError> {
    build_episode_at(race_id, engine_version, decision_time, context, Utc::now())
}

/// [`build_episode`] with an explicit construction instant.
pub fn build_episode_at(
    race_id: &str,
    engine_version: &str,
    decision_time: DateTime<Utc>,
    context: &Value,
    now: DateTime<Utc>,
) -> Result<Episode, EpisodeError> {
    let race_id = race_id.trim();
    let engine_version = engine_version.trim();
    if race_id.is_empty() {
        return Err(EpisodeError::MissingRaceId);
    }
    if engine_version.is_empty() {
        return Err(EpisodeError::MissingEngineVersion);
    }
    if !context.is_object() {
        return Err(EpisodeError::MalformedContext);
    }
    if decision_time > now {
        return Err(EpisodeError::DecisionTimeInFuture {
            decision_time,
            created_at: now,
        });
    }

    Ok(Episode {
        id: episode_id(race_id, engine_version, decision_time)?,
        race_id: race_id.to_string(),
        engine_version: engine_version.to_string(),
        context_hash: context_hash(context),
        decision_time,
        created_at: now,
        replay_hash: None,
        status: EpisodeStatus::Pending,
        regime: context
            .get("regime")
            .and_then(Value::as_str)
            .map(|s| s.to_string()),
    })
}

/// Build one artifact, computing its checksum from the payload.
pub fn make_artifact(
    episode_id: &str,
    sequence: u32,
    content: ArtifactPayload,
    now: DateTime<Utc>,
) -> Result<EpisodeArtifact, EpisodeError> {
    let checksum = content.checksum()?;
    Ok(EpisodeArtifact {
        id: artifact_id(episode_id, sequence),
        episode_id: episode_id.to_string(),
        sequence,
        content,
        checksum,
        created_at: now,
    })
}

pub fn write_episode_artifacts(
    episode_id: &str,
    pre_state: PreState,
    inference: Inference,
    outcome: Option<Outcome>,
) -> Result<Vec<EpisodeArtifact>, EpisodeError> {
    write_episode_artifacts_at(episode_id, pre_state, inference, outcome, Utc::now())
}

/// PRE_STATE=1, INFERENCE=2, OUTCOME=3 when present.
pub fn write_episode_artifacts_at(
    episode_id: &str,
    pre_state: PreState,
    inference: Inference,
    outcome: Option<Outcome>,
    now: DateTime<Utc>,
) -> Result<Vec<EpisodeArtifact>, EpisodeError> {
    let mut artifacts = vec![
        make_artifact(episode_id, PRE_STATE_SEQUENCE, ArtifactPayload::PreState(pre_state), now)?,
        make_artifact(episode_id, INFERENCE_SEQUENCE, ArtifactPayload::Inference(inference), now)?,
    ];
    if let Some(outcome) = outcome {
        artifacts.push(make_artifact(
            episode_id,
            OUTCOME_SEQUENCE,
            ArtifactPayload::Outcome(outcome),
            now,
        )?);
    }
    Ok(artifacts)
}

pub fn finalize_episode(
    episode: Episode,
    outcome: Outcome,
) -> Result<(Episode, EpisodeArtifact), EpisodeError> {
    finalize_episode_at(episode, outcome, Utc::now())
}

/// Record the OUTCOME and move PENDING -> COMPLETE. Outcomes are facts:
/// a second call is an error, not a no-op.
pub fn finalize_episode_at(
    mut episode: Episode,
    outcome: Outcome,
    now: DateTime<Utc>,
) -> Result<(Episode, EpisodeArtifact), EpisodeError> {
    if episode.status != EpisodeStatus::Pending {
        return Err(EpisodeError::AlreadyFinalized {
            episode_id: episode.id,
            status: episode.status,
        });
    }
    let artifact = make_artifact(&episode.id, OUTCOME_SEQUENCE, ArtifactPayload::Outcome(outcome), now)?;
    episode.status = EpisodeStatus::Complete;
    Ok((episode, artifact))
}

/// Additive artifact (CRITIQUE, PATCH, correction) at the next free sequence.
///
/// Sequences up to [`OUTCOME_SEQUENCE`] are reserved, so appending to a
/// PENDING episode never takes the slot [`finalize_episode_at`] writes to.
pub fn append_artifact(
    episode: &Episode,
    content: ArtifactPayload,
    existing: &[EpisodeArtifact],
    now: DateTime<Utc>,
) -> Result<EpisodeArtifact, EpisodeError> {
    if let Some(foreign) = existing.iter().find(|a| a.episode_id != episode.id) {
        return Err(EpisodeError::ForeignArtifact {
            artifact_id: foreign.id.clone(),
            expected: episode.id.clone(),
            found: foreign.episode_id.clone(),
        });
    }
    let last = existing.iter().map(|a| a.sequence).max().unwrap_or(0);
    make_artifact(&episode.id, last.max(OUTCOME_SEQUENCE) + 1, content, now)
}

// =============================================================================
// Replay
// =============================================================================

/// `hex(SHA256(join(":", checksums ordered by sequence)))`
///
/// Pure function of the artifact set: input order does not matter.
pub fn replay_episode(artifacts: &[EpisodeArtifact]) -> String {
    let mut ordered: Vec<&EpisodeArtifact> = artifacts.iter().collect();
    ordered.sort_by(|a, b| a.sequence.cmp(&b.sequence).then_with(|| a.id.cmp(&b.id)));
    let joined = ordered
        .iter()
        .map(|a| a.checksum.as_str())
        .collect::<Vec<_>>()
        .join(":");
    sha256_hex(joined.as_bytes())
}

/// Stamp the current replay hash onto the episode.
pub fn seal_episode(mut episode: Episode, artifacts: &[EpisodeArtifact]) -> Episode {
    episode.replay_hash = Some(replay_episode(artifacts));
    episode
}
