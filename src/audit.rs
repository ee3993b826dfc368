//! Audit runner: integrity validation plus the full critic panel.
//!
//! Critics are independent and read-only, so one episode's critics run on
//! scoped threads, and a batch of episodes is chunked across
//! `AuditConfig::audit_threads` workers. Output order never depends on
//! scheduling.

use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Instant;

use crate::config::AuditConfig;
use crate::critics::all_critics;
use crate::doctrine::{run_critic, Critic, DoctrineViolation, EpisodeView};
use crate::episode::{validate_episode_integrity, IntegrityReport};
use crate::logging::{self, ProfileScope};
use crate::schema::{Critique, CriticKind, Episode, EpisodeArtifact, EpisodeBundle, PatchProposal, Severity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub episode_id: String,
    pub integrity: IntegrityReport,
    /// One per critic, in panel order
    pub critiques: Vec<Critique>,
    pub proposals: Vec<PatchProposal>,
}

impl AuditReport {
    /// Integrity passed and no critic raised anything CRITICAL.
    pub fn is_trustworthy(&self) -> bool {
        self.integrity.is_valid() && self.critiques.iter().all(|c| c.is_coherent)
    }

    pub fn critical_count(&self) -> usize {
        self.critiques.iter().map(|c| c.counts.critical).sum()
    }

    pub fn critique(&self, critic: CriticKind) -> Option<&Critique> {
        self.critiques.iter().find(|c| c.critic == critic)
    }

    pub fn report(&self) -> String {
        let mut out = self.integrity.report();
        out.push_str("\n=== CRITIQUES ===\n");
        for c in &self.critiques {
            out.push_str(&format!(
                "\n[{}] critical={} warning={} info={}{}\n",
                c.critic.as_str(),
                c.counts.critical,
                c.counts.warning,
                c.counts.info,
                if c.is_clean { " (clean)" } else { "" }
            ));
            for f in &c.findings {
                let cite = f.evidence.primary();
                out.push_str(&format!(
                    "  {:8} {:20} {} <{}:{}>\n",
                    f.severity.as_str(),
                    f.kind.as_str(),
                    f.message,
                    cite.artifact_id,
                    cite.field
                ));
            }
        }
        if !self.proposals.is_empty() {
            out.push_str("\n=== PATCH PROPOSALS (not applied) ===\n");
            for p in &self.proposals {
                out.push_str(&format!("  {} {}\n", p.id, p.proposed_fix));
            }
        }
        out
    }
}

/// Validate and critique one episode with the standard panel.
pub fn audit_episode(
    cfg: &AuditConfig,
    episode: &Episode,
    artifacts: &[EpisodeArtifact],
) -> Result<AuditReport, DoctrineViolation> {
    let critics = all_critics(cfg);
    audit_with(&critics, episode, artifacts)
}

/// Validate and critique one episode with a caller-supplied panel.
pub fn audit_with(
    critics: &[Box<dyn Critic>],
    episode: &Episode,
    artifacts: &[EpisodeArtifact],
) -> Result<AuditReport, DoctrineViolation> {
    let _scope = ProfileScope::with_context("audit_episode", &[("episode_id", logging::v_str(&episode.id))]);
    let integrity = validate_episode_integrity(episode, artifacts);
    logging::log_integrity(&integrity);

    let view = EpisodeView::new(episode, artifacts);
    for (present, missing) in [
        (view.pre_state().is_some(), "PRE_STATE"),
        (view.inference().is_some(), "INFERENCE"),
    ] {
        if !present {
            logging::log(
                logging::Level::Warn,
                logging::Domain::Audit,
                "artifact_missing",
                logging::obj(&[
                    ("episode_id", logging::v_str(&episode.id)),
                    ("artifact_type", logging::v_str(missing)),
                ]),
            );
        }
    }
    let results: Vec<Result<Critique, DoctrineViolation>> = thread::scope(|s| {
        let handles: Vec<_> = critics
            .iter()
            .map(|critic| s.spawn(move || run_critic(critic.as_ref(), &view)))
            .collect();
        handles
            .into_iter()
            .zip(critics)
            .map(|(h, critic)| {
                h.join().unwrap_or_else(|_| {
                    Err(DoctrineViolation::CriticPanicked {
                        critic: critic.kind().as_str(),
                        episode_id: episode.id.clone(),
                    })
                })
            })
            .collect()
    });

    let mut critiques = Vec::with_capacity(critics.len());
    let mut proposals = Vec::new();
    for (critic, result) in critics.iter().zip(results) {
        let critique = match result {
            Ok(c) => c,
            Err(err) => {
                logging::log_doctrine_violation(&episode.id, critic.kind().as_str(), &err.to_string());
                return Err(err);
            }
        };
        logging::log_critique(&critique);
        for p in critic.propose_patches(&critique) {
            logging::log_patch_proposal(&p);
            proposals.push(p);
        }
        critiques.push(critique);
    }

    Ok(AuditReport {
        episode_id: episode.id.clone(),
        integrity,
        critiques,
        proposals,
    })
}

/// Audit many episodes in parallel. Results line up with `bundles`.
pub fn audit_batch(cfg: &AuditConfig, bundles: &[EpisodeBundle]) -> Vec<Result<AuditReport, DoctrineViolation>> {
    let started = Instant::now();
    let n_threads = cfg.audit_threads.max(1);
    let chunk = bundles.len().div_ceil(n_threads).max(1);

    let results: Vec<Result<AuditReport, DoctrineViolation>> = thread::scope(|s| {
        let handles: Vec<_> = bundles
            .chunks(chunk)
            .map(|part| {
                s.spawn(move || {
                    let critics = all_critics(cfg);
                    part.iter()
                        .map(|b| audit_with(&critics, &b.episode, &b.artifacts))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .zip(bundles.chunks(chunk))
            .flat_map(|(h, part)| {
                h.join().unwrap_or_else(|_| {
                    part.iter()
                        .map(|b| {
                            Err(DoctrineViolation::CriticPanicked {
                                critic: "panel",
                                episode_id: b.episode.id.clone(),
                            })
                        })
                        .collect()
                })
            })
            .collect()
    });

    let ok: Vec<&AuditReport> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    logging::log_batch_summary(
        bundles.len(),
        ok.iter().filter(|r| r.is_trustworthy()).count(),
        ok.iter().map(|r| r.critical_count()).sum(),
        ok.iter().map(|r| r.proposals.len()).sum(),
        started.elapsed().as_secs_f64() * 1000.0,
    );
    results
}

/// Highest severity across every critique, if any finding exists.
pub fn worst_severity(report: &AuditReport) -> Option<Severity> {
    report
        .critiques
        .iter()
        .flat_map(|c| c.findings.iter().map(|f| f.severity))
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::{build_episode_at, seal_episode, write_episode_artifacts_at};
    use crate::schema::{Inference, PreState, Verdict};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn bundle(race: &str, chaos: f64) -> EpisodeBundle {
        let t = Utc.with_ymd_and_hms(2025, 12, 3, 19, 40, 0).unwrap();
        let ep = build_episode_at(race, "v1", t, &json!({}), t).unwrap();
        let pre = PreState::new(race)
            .with_feature("chaos_level", chaos)
            .with_feature("field_size", 9.0)
            .with_feature("favorite_odds", 2.5)
            .with_feature("market_overround", 1.12);
        let inf = Inference {
            verdict: Verdict::Strike,
            confidence: Some(0.7),
            signal_strength: Some(0.6),
            rationale: Some("chaos level and field size both favourable, though the draw is a concern".into()),
            ..Default::default()
        };
        let artifacts = write_episode_artifacts_at(&ep.id, pre, inf, None, t).unwrap();
        EpisodeBundle {
            episode: seal_episode(ep, &artifacts),
            artifacts,
        }
    }

    #[test]
    fn test_clean_episode_is_trustworthy() {
        let b = bundle("R1", 0.3);
        let report = audit_episode(&AuditConfig::default(), &b.episode, &b.artifacts).unwrap();
        assert!(report.integrity.is_valid());
        assert_eq!(report.critiques.len(), 4);
        assert!(report.is_trustworthy(), "{}", report.report());
        assert!(report.proposals.is_empty());
    }

    #[test]
    fn test_chaotic_strike_flagged() {
        let b = bundle("R1", 0.85);
        let report = audit_episode(&AuditConfig::default(), &b.episode, &b.artifacts).unwrap();
        assert!(!report.is_trustworthy());
        assert!(!report.critique(CriticKind::Decision).unwrap().is_coherent);
        assert_eq!(worst_severity(&report), Some(Severity::Critical));
        assert!(report.proposals.iter().any(|p| p.source == CriticKind::Decision));
    }

    #[test]
    fn test_batch_preserves_order() {
        let bundles: Vec<EpisodeBundle> = (0..10).map(|i| bundle(&format!("R{}", i), 0.3)).collect();
        let cfg = AuditConfig {
            audit_threads: 3,
            ..Default::default()
        };
        let results = audit_batch(&cfg, &bundles);
        assert_eq!(results.len(), 10);
        for (b, r) in bundles.iter().zip(&results) {
            assert_eq!(r.as_ref().unwrap().episode_id, b.episode.id);
        }
    }

    #[test]
    fn test_audit_does_not_touch_artifacts() {
        let b = bundle("R1", 0.85);
        let before = b.clone();
        let _ = audit_episode(&AuditConfig::default(), &b.episode, &b.artifacts).unwrap();
        assert_eq!(before, b);
    }
}
