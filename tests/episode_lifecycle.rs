//! Episode Constructor lifecycle tests.
//!
//! Test categories:
//!   1. Deterministic identity  -- hour buckets decide the id
//!   2. Checksums               -- canonical, key-order independent, sensitive to edits
//!   3. Replay stability        -- input order never matters
//!   4. Lifecycle               -- PENDING -> COMPLETE -> VALIDATED, finalize once
//!   5. Integrity idempotence   -- repeated validation of a clean episode

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use raceledger::canonical::{canonical_json, checksum, sha256_hex};
use raceledger::episode::{
    build_episode, build_episode_at, context_matches, finalize_episode_at, promote_episode, replay_episode,
    seal_episode, validate_episode_integrity, write_episode_artifacts_at, EpisodeError, ViolationKind,
};
use raceledger::schema::{
    ArtifactPayload, Candidate, Episode, EpisodeArtifact, EpisodeBundle, EpisodeStatus, Inference, Outcome,
    PreState, Verdict,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 12, 3, h, m, 0).unwrap()
}

fn pre_state() -> PreState {
    let mut pre = PreState::new("KEMPTON-2025-12-03-R7")
        .with_feature("chaos_level", 0.32)
        .with_feature("field_size", 11.0)
        .with_feature("favorite_odds", 3.1)
        .with_feature("market_overround", 1.14);
    pre.captured_at = Some(at(19, 39));
    pre.morning_favorite = Some("Silver Quay".into());
    pre
}

fn inference() -> Inference {
    Inference {
        verdict: Verdict::Strike,
        top_prediction: Some("Castanea Breeze".into()),
        confidence: Some(0.68),
        signal_strength: Some(0.61),
        rationale: Some("Low chaos level, field size manageable, but the overround is high.".into()),
        candidates: vec![
            Candidate { runner: "Castanea Breeze".into(), score: 0.41 },
            Candidate { runner: "Silver Quay".into(), score: 0.29 },
        ],
        ..Default::default()
    }
}

/// PENDING episode with PRE_STATE and INFERENCE, sealed.
fn pending() -> (Episode, Vec<EpisodeArtifact>) {
    let now = at(19, 40) + Duration::seconds(1);
    let ep = build_episode_at("KEMPTON-2025-12-03-R7", "engine-4.2.0", at(19, 40), &json!({"regime": "CALM"}), now)
        .unwrap();
    let arts = write_episode_artifacts_at(&ep.id, pre_state(), inference(), None, now).unwrap();
    (seal_episode(ep, &arts), arts)
}

fn complete() -> (Episode, Vec<EpisodeArtifact>) {
    let (ep, mut arts) = pending();
    let outcome = Outcome {
        winner: Some("Castanea Breeze".into()),
        placings: vec!["Castanea Breeze".into(), "Silver Quay".into()],
        settled_at: Some(at(20, 2)),
        pnl: Some(14.5),
        ..Default::default()
    };
    let (ep, out) = finalize_episode_at(ep, outcome, at(20, 5)).unwrap();
    arts.push(out);
    (seal_episode(ep, &arts), arts)
}

// ---------------------------------------------------------------------------
// 1. Deterministic identity
// ---------------------------------------------------------------------------

#[test]
fn same_hour_bucket_same_id() {
    let now = at(21, 0);
    let a = build_episode_at("R7", "v1", at(19, 40), &json!({}), now).unwrap();
    let b = build_episode_at("R7", "v1", at(19, 5), &json!({"x": 1}), now).unwrap();
    let c = build_episode_at("R7", "v1", at(20, 5), &json!({}), now).unwrap();
    assert_eq!(a.id, b.id);
    assert_ne!(a.id, c.id);
    assert_ne!(a.context_hash, b.context_hash);
}

#[test]
fn id_matches_interop_formula() {
    let ep = build_episode_at("R7", "v1", at(19, 40), &json!({}), at(19, 41)).unwrap();
    assert_eq!(ep.id, sha256_hex(b"R7:v1:2025-12-03T19:00:00+00:00"));
    assert_eq!(ep.id.len(), 64);
}

#[test]
fn engine_version_changes_id() {
    let a = build_episode_at("R7", "v1", at(19, 40), &json!({}), at(19, 41)).unwrap();
    let b = build_episode_at("R7", "v2", at(19, 40), &json!({}), at(19, 41)).unwrap();
    assert_ne!(a.id, b.id);
}

#[test]
fn malformed_inputs_rejected() {
    assert!(matches!(
        build_episode_at(" ", "v1", at(19, 40), &json!({}), at(19, 41)),
        Err(EpisodeError::MissingRaceId)
    ));
    assert!(matches!(
        build_episode_at("R7", "", at(19, 40), &json!({}), at(19, 41)),
        Err(EpisodeError::MissingEngineVersion)
    ));
    assert!(matches!(
        build_episode_at("R7", "v1", at(19, 40), &json!([1, 2]), at(19, 41)),
        Err(EpisodeError::MalformedContext)
    ));
    assert!(matches!(
        build_episode_at("R7", "v1", at(19, 40), &json!({}), at(19, 30)),
        Err(EpisodeError::DecisionTimeInFuture { .. })
    ));
}

#[test]
fn build_episode_uses_wall_clock() {
    let decided = Utc::now() - Duration::minutes(1);
    let ep = build_episode("R7", "v1", decided, &json!({})).unwrap();
    assert!(ep.created_at >= ep.decision_time);
    assert_eq!(ep.status, EpisodeStatus::Pending);
    assert!(ep.replay_hash.is_none());
}

#[test]
fn context_hash_is_opt_in_drift_check() {
    let (ep, _) = pending();
    assert!(context_matches(&ep, &json!({"regime": "CALM"})));
    assert!(!context_matches(&ep, &json!({"regime": "CHAOS"})));
    assert_eq!(ep.regime.as_deref(), Some("CALM"));
}

// ---------------------------------------------------------------------------
// 2. Checksums
// ---------------------------------------------------------------------------

#[test]
fn checksum_independent_of_key_order() {
    let a: serde_json::Value = serde_json::from_str(r#"{"b": 1, "a": {"y": 2.5, "x": [1, "z"]}}"#).unwrap();
    let b: serde_json::Value = serde_json::from_str(r#"{"a": {"x": [1, "z"], "y": 2.5}, "b": 1}"#).unwrap();
    assert_eq!(canonical_json(&a), r#"{"a":{"x":[1,"z"],"y":2.5},"b":1}"#);
    assert_eq!(checksum(&a), checksum(&b));
}

#[test]
fn artifact_checksum_recomputes_and_detects_edits() {
    let (_, arts) = pending();
    for a in &arts {
        assert_eq!(a.content.checksum().unwrap(), a.checksum);
        assert_eq!(checksum(&a.content.to_value().unwrap()), a.checksum);
    }
    let edited = ArtifactPayload::PreState(pre_state().with_feature("chaos_level", 0.33));
    assert_ne!(edited.checksum().unwrap(), arts[0].checksum);
}

#[test]
fn checksum_covers_typed_form_not_raw_bytes() {
    let raw = json!({"race_id": "R7", "features": {"field_size": 9}});
    let typed = ArtifactPayload::PreState(PreState::from_value(raw.clone()).unwrap());
    let normalised = typed.to_value().unwrap();

    assert_eq!(normalised["features"]["field_size"], json!(9.0));
    assert_eq!(normalised["runners"], json!([]));
    assert_eq!(typed.checksum().unwrap(), checksum(&normalised));
    assert_ne!(typed.checksum().unwrap(), checksum(&raw));
}

#[test]
fn sequences_are_strict() {
    let (_, arts) = complete();
    let seqs: Vec<u32> = arts.iter().map(|a| a.sequence).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
    assert!(arts.iter().all(|a| a.id.ends_with(&format!("-{}", a.sequence))));
}

// ---------------------------------------------------------------------------
// 3. Replay stability
// ---------------------------------------------------------------------------

#[test]
fn replay_stable_under_reordering() {
    let (ep, arts) = complete();
    let mut reversed = arts.clone();
    reversed.reverse();
    assert_eq!(replay_episode(&arts), replay_episode(&arts));
    assert_eq!(replay_episode(&arts), replay_episode(&reversed));
    assert_eq!(ep.replay_hash.as_deref(), Some(replay_episode(&reversed).as_str()));
}

#[test]
fn replay_hash_matches_formula() {
    let (_, arts) = complete();
    let joined = format!("{}:{}:{}", arts[0].checksum, arts[1].checksum, arts[2].checksum);
    assert_eq!(replay_episode(&arts), sha256_hex(joined.as_bytes()));
}

// ---------------------------------------------------------------------------
// 4. Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn full_lifecycle_reaches_validated() {
    let (ep, arts) = complete();
    assert_eq!(ep.status, EpisodeStatus::Complete);
    let validated = promote_episode(&ep, &arts).unwrap();
    assert_eq!(validated.status, EpisodeStatus::Validated);
    assert_eq!(validated.id, ep.id);
}

#[test]
fn finalize_twice_is_usage_error() {
    let (ep, _) = complete();
    let err = finalize_episode_at(ep, Outcome::default(), at(21, 0)).unwrap_err();
    assert!(matches!(err, EpisodeError::AlreadyFinalized { status: EpisodeStatus::Complete, .. }));
}

#[test]
fn pending_cannot_be_promoted() {
    let (ep, arts) = pending();
    let report = promote_episode(&ep, &arts).unwrap_err();
    assert!(report.has(ViolationKind::StatusNotComplete));
}

#[test]
fn bundle_json_round_trip_keeps_integrity() {
    let (episode, artifacts) = complete();
    let bundle = EpisodeBundle { episode, artifacts };
    let raw = serde_json::to_string(&bundle).unwrap();
    let back: EpisodeBundle = serde_json::from_str(&raw).unwrap();
    assert_eq!(back, bundle);
    assert!(validate_episode_integrity(&back.episode, &back.artifacts).is_valid());
}

// ---------------------------------------------------------------------------
// 5. Integrity idempotence
// ---------------------------------------------------------------------------

#[test]
fn validation_is_idempotent() {
    let (ep, arts) = complete();
    for _ in 0..5 {
        assert_eq!(validate_episode_integrity(&ep, &arts).into_parts(), (true, Vec::new()));
    }
}

#[test]
fn tampering_collects_every_violation() {
    let (mut ep, mut arts) = complete();
    ep.race_id = "SOMEWHERE-ELSE".into();
    arts[1].content = ArtifactPayload::Inference(Inference {
        confidence: Some(0.99),
        ..inference()
    });
    let (ok, violations) = validate_episode_integrity(&ep, &arts).into_parts();
    assert!(!ok);
    assert!(violations.iter().any(|v| v == "non_deterministic_id"));
    assert!(violations.iter().any(|v| v.starts_with("checksum_mismatch:")));
}
