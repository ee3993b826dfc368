//! Read-only episode critics.
//!
//! | Critic | Looks at | Finding kinds |
//! |---|---|---|
//! | [`LeakageDetector`] | PRE_STATE vs `decision_time` | FUTURE_OUTCOME, FUTURE_MARKET, TIMESTAMP_VIOLATION, LOOKAHEAD_NAME |
//! | [`CognitiveBiasCritic`] | INFERENCE vs PRE_STATE | ANCHORING, CONFIRMATION, RECENCY, OVERCONFIDENCE, HERD_MENTALITY, GAMBLERS_FALLACY |
//! | [`FeatureCritic`] | PRE_STATE features | MISSING, REDUNDANT, LEAKED, INVALID |
//! | [`DecisionCritic`] | INFERENCE vs PRE_STATE | INCOHERENCE, NARRATIVE_DRIFT, RULE_VIOLATION, OVERREACH, MISSING_RATIONALE, CONFIDENCE_MISMATCH |
//!
//! Critics never log, never write and never see anything outside the
//! [`EpisodeView`](crate::doctrine::EpisodeView) they are handed.

pub mod bias;
pub mod decision;
pub mod features;
pub mod leakage;
mod text;

pub use bias::CognitiveBiasCritic;
pub use decision::DecisionCritic;
pub use features::FeatureCritic;
pub use leakage::LeakageDetector;

use crate::config::AuditConfig;
use crate::doctrine::Critic;
use crate::schema::{Critique, Evidence, FindingKind, PatchProposal};

/// The standard critic panel, in report order.
pub fn all_critics(cfg: &AuditConfig) -> Vec<Box<dyn Critic>> {
    vec![
        Box::new(LeakageDetector::new()),
        Box::new(CognitiveBiasCritic::new(cfg)),
        Box::new(FeatureCritic::new(cfg)),
        Box::new(DecisionCritic::new(cfg)),
    ]
}

/// One proposal per distinct finding kind that has a known remediation.
/// Evidence from every finding of that kind is merged.
pub(crate) fn proposals_by_kind<F>(critique: &Critique, fix_for: F) -> Vec<PatchProposal>
where
    F: Fn(FindingKind) -> Option<&'static str>,
{
    let mut grouped: Vec<(FindingKind, Evidence, Vec<&str>)> = Vec::new();
    for f in &critique.findings {
        match grouped.iter_mut().find(|(k, _, _)| *k == f.kind) {
            Some((_, evidence, messages)) => {
                *evidence = evidence.clone().merge(&f.evidence);
                messages.push(&f.message);
            }
            None => grouped.push((f.kind, f.evidence.clone(), vec![&f.message])),
        }
    }

    grouped
        .into_iter()
        .filter_map(|(kind, evidence, messages)| {
            let fix = fix_for(kind)?;
            Some(PatchProposal::new(
                &critique.episode_id,
                critique.critic,
                kind,
                fix,
                messages.join("; "),
                evidence,
            ))
        })
        .collect()
}
