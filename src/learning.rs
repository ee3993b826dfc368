//! Learning boundary.
//!
//! Downstream learning consumes critiques after the fact. This module decides
//! which episodes are admissible and turns critique findings plus the real
//! outcome into [`LearningEvent`]s. Nothing here writes back into an episode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::doctrine::EpisodeView;
use crate::episode::IntegrityReport;
use crate::logging::{self, Domain, Level};
use crate::schema::payload::same_runner;
use crate::schema::{
    Critique, CriticKind, Episode, EpisodeArtifact, EpisodeStatus, Evidence, FindingKind, Severity, Verdict,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LearningEventType {
    /// Anchored on the morning favourite, and it lost
    FalseAnchor,
    /// Held back (WATCH/PASS) on a pick that won
    MissedRelease,
    /// Overconfident or overreaching STRIKE that lost
    OverconfidentLoss,
    /// Followed the market favourite, and it lost
    HerdLoss,
    /// STRIKE in breach of a hard rule, and it lost
    RuleBreachLoss,
}

impl LearningEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LearningEventType::FalseAnchor => "FALSE_ANCHOR",
            LearningEventType::MissedRelease => "MISSED_RELEASE",
            LearningEventType::OverconfidentLoss => "OVERCONFIDENT_LOSS",
            LearningEventType::HerdLoss => "HERD_LOSS",
            LearningEventType::RuleBreachLoss => "RULE_BREACH_LOSS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningEvent {
    pub id: String,
    pub episode_id: String,
    pub event_type: LearningEventType,
    pub evidence: Evidence,
    pub severity: Severity,
    pub recorded_at: DateTime<Utc>,
}

/// Why an episode may not feed learning.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Exclusion {
    #[error("episode {episode_id} is {status:?}, not VALIDATED")]
    NotValidated { episode_id: String, status: EpisodeStatus },

    #[error("episode {episode_id} failed integrity: {violations:?}")]
    IntegrityFailed { episode_id: String, violations: Vec<String> },

    #[error("episode {episode_id} has {critical} CRITICAL leakage finding(s)")]
    Leaked { episode_id: String, critical: usize },

    #[error("report for {found} supplied while admitting {expected}")]
    Mismatched { expected: String, found: String },

    #[error("{found} critique supplied where a leakage critique was expected")]
    NotALeakageCritique { found: &'static str },
}

/// Gate for downstream learning: VALIDATED, integrity-clean and free of
/// CRITICAL leakage.
pub fn admit_for_learning(episode: &Episode, integrity: &IntegrityReport, leakage: &Critique) -> Result<(), Exclusion> {
    let result = check_admission(episode, integrity, leakage);
    if let Err(ref exclusion) = result {
        logging::log(
            Level::Info,
            Domain::Learning,
            "excluded",
            logging::obj(&[
                ("episode_id", logging::v_str(&episode.id)),
                ("reason", logging::v_str(&exclusion.to_string())),
            ]),
        );
    }
    result
}

fn check_admission(episode: &Episode, integrity: &IntegrityReport, leakage: &Critique) -> Result<(), Exclusion> {
    for found in [&integrity.episode_id, &leakage.episode_id] {
        if *found != episode.id {
            return Err(Exclusion::Mismatched {
                expected: episode.id.clone(),
                found: found.clone(),
            });
        }
    }
    if leakage.critic != CriticKind::Leakage {
        return Err(Exclusion::NotALeakageCritique {
            found: leakage.critic.as_str(),
        });
    }
    if episode.status != EpisodeStatus::Validated {
        return Err(Exclusion::NotValidated {
            episode_id: episode.id.clone(),
            status: episode.status,
        });
    }
    if !integrity.is_valid() {
        return Err(Exclusion::IntegrityFailed {
            episode_id: episode.id.clone(),
            violations: integrity.violation_names(),
        });
    }
    if leakage.has_critical() {
        return Err(Exclusion::Leaked {
            episode_id: episode.id.clone(),
            critical: leakage.counts.critical,
        });
    }
    Ok(())
}

/// Combine critique findings with the recorded OUTCOME.
///
/// Without an OUTCOME, or without a pick, there is nothing to learn.
pub fn derive_learning_events(
    episode: &Episode,
    artifacts: &[EpisodeArtifact],
    critiques: &[Critique],
    now: DateTime<Utc>,
) -> Vec<LearningEvent> {
    let view = EpisodeView::new(episode, artifacts);
    let (Some((inf_art, inf)), Some((out_art, outcome))) = (view.inference(), view.outcome()) else {
        return Vec::new();
    };
    let Some(pick) = inf.top_prediction.as_deref() else {
        return Vec::new();
    };
    let won = match (outcome.pnl, outcome.winner.as_deref()) {
        (_, Some(winner)) => same_runner(pick, winner),
        (Some(pnl), None) => pnl > 0.0,
        (None, None) => return Vec::new(),
    };
    let lost = !won;
    let strike = inf.verdict == Verdict::Strike;
    let outcome_evidence = |e: Evidence| e.and(&out_art.id, if outcome.winner.is_some() { "winner" } else { "pnl" });

    let find = |kind: FindingKind| {
        critiques
            .iter()
            .filter(|c| c.episode_id == episode.id)
            .flat_map(|c| c.of_kind(kind))
            .fold(None, |acc: Option<Evidence>, f| {
                Some(match acc {
                    Some(e) => e.merge(&f.evidence),
                    None => f.evidence.clone(),
                })
            })
    };

    let mut events = Vec::new();
    let mut push = |event_type: LearningEventType, severity: Severity, evidence: Evidence| {
        events.push(LearningEvent {
            id: format!("L-{}-{}", episode.id, event_type.as_str()),
            episode_id: episode.id.clone(),
            event_type,
            evidence: outcome_evidence(evidence),
            severity,
            recorded_at: now,
        });
    };

    if lost {
        if let Some(e) = find(FindingKind::Anchoring) {
            push(LearningEventType::FalseAnchor, Severity::Warning, e);
        }
        if let Some(e) = find(FindingKind::HerdMentality) {
            push(LearningEventType::HerdLoss, Severity::Info, e);
        }
    }
    if lost && strike {
        let overconfident = match (find(FindingKind::Overconfidence), find(FindingKind::Overreach)) {
            (Some(a), Some(b)) => Some(a.merge(&b)),
            (a, b) => a.or(b),
        };
        if let Some(e) = overconfident {
            push(LearningEventType::OverconfidentLoss, Severity::Warning, e);
        }
        if let Some(e) = find(FindingKind::RuleViolation) {
            push(LearningEventType::RuleBreachLoss, Severity::Critical, e);
        }
    }
    if won && !strike {
        push(
            LearningEventType::MissedRelease,
            Severity::Info,
            Evidence::cite(&inf_art.id, "verdict").and(&inf_art.id, "top_prediction"),
        );
    }

    for e in &events {
        logging::log(
            Level::Info,
            Domain::Learning,
            "learning_event",
            logging::obj(&[
                ("episode_id", logging::v_str(&e.episode_id)),
                ("event_type", logging::v_str(e.event_type.as_str())),
                ("severity", logging::v_str(e.severity.as_str())),
            ]),
        );
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::{
        build_episode_at, finalize_episode_at, promote_episode, seal_episode, validate_episode_integrity,
        write_episode_artifacts_at,
    };
    use crate::schema::{Finding, Inference, Outcome, PreState};
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn decision() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 3, 19, 40, 0).unwrap()
    }

    fn settled(verdict: Verdict, winner: &str) -> (Episode, Vec<EpisodeArtifact>) {
        let ep = build_episode_at("R1", "v1", decision(), &json!({}), decision()).unwrap();
        let inf = Inference {
            verdict,
            top_prediction: Some("Castanea Breeze".into()),
            confidence: Some(0.8),
            rationale: Some("pace".into()),
            ..Default::default()
        };
        let mut arts = write_episode_artifacts_at(&ep.id, PreState::new("R1"), inf, None, decision()).unwrap();
        let outcome = Outcome {
            winner: Some(winner.into()),
            ..Default::default()
        };
        let (ep, out) = finalize_episode_at(ep, outcome, decision() + Duration::hours(1)).unwrap();
        arts.push(out);
        (seal_episode(ep, &arts), arts)
    }

    fn critique_with(ep: &Episode, critic: CriticKind, kind: FindingKind, severity: Severity) -> Critique {
        let cite = format!("A-{}-2", ep.id);
        Critique::new(
            &ep.id,
            critic,
            vec![Finding::new(kind, severity, "x", Evidence::cite(&cite, "top_prediction"))],
        )
    }

    #[test]
    fn test_admission_requires_validated_and_clean() {
        let (ep, arts) = settled(Verdict::Strike, "Other");
        let integrity = validate_episode_integrity(&ep, &arts);
        let clean = Critique::empty(&ep.id, CriticKind::Leakage);
        assert!(matches!(
            admit_for_learning(&ep, &integrity, &clean),
            Err(Exclusion::NotValidated { .. })
        ));

        let validated = promote_episode(&ep, &arts).unwrap();
        assert!(admit_for_learning(&validated, &integrity, &clean).is_ok());

        let leaked = critique_with(&ep, CriticKind::Leakage, FindingKind::FutureOutcome, Severity::Critical);
        assert!(matches!(
            admit_for_learning(&validated, &integrity, &leaked),
            Err(Exclusion::Leaked { critical: 1, .. })
        ));

        let wrong = Critique::empty(&ep.id, CriticKind::Decision);
        assert!(matches!(
            admit_for_learning(&validated, &integrity, &wrong),
            Err(Exclusion::NotALeakageCritique { .. })
        ));
    }

    #[test]
    fn test_false_anchor_and_rule_breach_on_loss() {
        let (ep, arts) = settled(Verdict::Strike, "Other Horse");
        let critiques = vec![
            critique_with(&ep, CriticKind::CognitiveBias, FindingKind::Anchoring, Severity::Warning),
            critique_with(&ep, CriticKind::Decision, FindingKind::RuleViolation, Severity::Critical),
        ];
        let events = derive_learning_events(&ep, &arts, &critiques, decision() + Duration::hours(2));
        let types: Vec<LearningEventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![LearningEventType::FalseAnchor, LearningEventType::RuleBreachLoss]);
        assert!(events.iter().all(|e| e.evidence.cites_field("winner")));
    }

    #[test]
    fn test_no_loss_events_on_win() {
        let (ep, arts) = settled(Verdict::Strike, "castanea breeze");
        let critiques = vec![critique_with(&ep, CriticKind::CognitiveBias, FindingKind::Anchoring, Severity::Warning)];
        assert!(derive_learning_events(&ep, &arts, &critiques, decision()).is_empty());
    }

    #[test]
    fn test_missed_release() {
        let (ep, arts) = settled(Verdict::Watch, "Castanea Breeze");
        let events = derive_learning_events(&ep, &arts, &[], decision());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, LearningEventType::MissedRelease);
    }

    #[test]
    fn test_pending_episode_yields_nothing() {
        let ep = build_episode_at("R1", "v1", decision(), &json!({}), decision()).unwrap();
        let arts = write_episode_artifacts_at(&ep.id, PreState::new("R1"), Inference::default(), None, decision()).unwrap();
        assert!(derive_learning_events(&ep, &arts, &[], decision()).is_empty());
    }
}
