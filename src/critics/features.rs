//! Feature Extractor critic: quality of the feature vector inside PRE_STATE.

use std::collections::BTreeMap;

use super::proposals_by_kind;
use crate::config::AuditConfig;
use crate::doctrine::{Critic, EpisodeView};
use crate::schema::vocab::{implies_unit_range, is_outcome_field, lookahead_pattern};
use crate::schema::{
    Critique, CriticKind, EpisodeArtifact, Evidence, FeatureRange, FeatureValue, Finding, FindingKind,
    PatchProposal, PreState, Severity,
};

#[derive(Debug, Clone)]
pub struct FeatureCritic {
    critical_features: Vec<String>,
}

impl FeatureCritic {
    pub fn new(cfg: &AuditConfig) -> Self {
        Self {
            critical_features: cfg.critical_features.clone(),
        }
    }

    fn missing(&self, art: &EpisodeArtifact, pre: &PreState, out: &mut Vec<Finding>) {
        for name in &self.critical_features {
            if !pre.features.contains_key(name) {
                out.push(Finding::new(
                    FindingKind::Missing,
                    Severity::Critical,
                    format!("critical feature '{}' is absent", name),
                    Evidence::cite(&art.id, &feature_path(name)),
                ));
            }
        }
    }
}

impl Critic for FeatureCritic {
    fn kind(&self) -> CriticKind {
        CriticKind::FeatureQuality
    }

    fn critique(&self, view: &EpisodeView<'_>) -> Critique {
        let mut findings = Vec::new();
        for (art, pre) in view.pre_states() {
            self.missing(art, pre, &mut findings);
            redundant(art, pre, &mut findings);
            leaked(art, pre, &mut findings);
            invalid(art, pre, &mut findings);
        }
        Critique::new(view.episode_id(), CriticKind::FeatureQuality, findings)
    }

    fn propose_patches(&self, critique: &Critique) -> Vec<PatchProposal> {
        proposals_by_kind(critique, |kind| match kind {
            FindingKind::Missing => Some(
                "Make the extractor fail loudly when a critical feature cannot be computed instead of omitting it.",
            ),
            FindingKind::Redundant => Some(
                "Drop or merge features that carry identical values; they double-count one signal.",
            ),
            FindingKind::Leaked => Some(
                "Remove outcome-derived features from the extractor and rebuild affected training sets.",
            ),
            FindingKind::Invalid => Some(
                "Validate feature values against their declared ranges at extraction time; never emit NaN or infinity.",
            ),
            _ => None,
        })
    }
}

fn feature_path(name: &str) -> String {
    format!("features.{}", name)
}

fn redundant(art: &EpisodeArtifact, pre: &PreState, out: &mut Vec<Finding>) {
    let mut by_value: BTreeMap<u64, Vec<&str>> = BTreeMap::new();
    for (name, value) in &pre.features {
        if let Some(v) = value.as_number().filter(|v| v.is_finite()) {
            // -0.0 and 0.0 are the same value
            let v = if v == 0.0 { 0.0 } else { v };
            by_value.entry(v.to_bits()).or_default().push(name);
        }
    }
    for (bits, names) in by_value {
        if names.len() < 2 {
            continue;
        }
        let mut evidence = Evidence::cite(&art.id, &feature_path(names[0]));
        for n in &names[1..] {
            evidence = evidence.and(&art.id, &feature_path(n));
        }
        out.push(Finding::new(
            FindingKind::Redundant,
            Severity::Warning,
            format!("features {} all equal {}", names.join(", "), f64::from_bits(bits)),
            evidence,
        ));
    }
}

fn leaked(art: &EpisodeArtifact, pre: &PreState, out: &mut Vec<Finding>) {
    for name in pre.features.keys() {
        if is_outcome_field(name) {
            out.push(Finding::new(
                FindingKind::Leaked,
                Severity::Critical,
                format!("feature '{}' is an outcome field", name),
                Evidence::cite(&art.id, &feature_path(name)),
            ));
        } else if let Some(pattern) = lookahead_pattern(name) {
            out.push(Finding::new(
                FindingKind::Leaked,
                Severity::Warning,
                format!("feature '{}' is named like post-race data ('{}')", name, pattern),
                Evidence::cite(&art.id, &feature_path(name)),
            ));
        }
    }
}

fn invalid(art: &EpisodeArtifact, pre: &PreState, out: &mut Vec<Finding>) {
    for (name, value) in &pre.features {
        let path = feature_path(name);
        let v = match value {
            // Non-finite numbers arrive as null once serialized.
            FeatureValue::Null => {
                out.push(Finding::new(
                    FindingKind::Invalid,
                    Severity::Critical,
                    format!("feature '{}' is null or non-finite", name),
                    Evidence::cite(&art.id, &path),
                ));
                continue;
            }
            FeatureValue::Number(v) => *v,
            FeatureValue::Flag(_) | FeatureValue::Text(_) => continue,
        };
        if !v.is_finite() {
            out.push(Finding::new(
                FindingKind::Invalid,
                Severity::Critical,
                format!("feature '{}' is {}", name, v),
                Evidence::cite(&art.id, &path),
            ));
            continue;
        }
        let declared = pre.feature_ranges.get(name).copied();
        let range = match declared {
            Some(r) => r,
            None if implies_unit_range(name) => FeatureRange::UNIT,
            None => continue,
        };
        if !range.contains(v) {
            let mut evidence = Evidence::cite(&art.id, &path);
            if declared.is_some() {
                evidence = evidence.and(&art.id, &format!("feature_ranges.{}", name));
            }
            out.push(Finding::new(
                FindingKind::Invalid,
                Severity::Warning,
                format!("feature '{}' = {} outside [{}, {}]", name, v, range.min, range.max),
                evidence,
            ));
        }
    }
}
