//! Decision critic: is the verdict consistent with its own inputs, its
//! stated rationale and the fixed strike rules?

use regex::Regex;
use std::sync::OnceLock;

use super::proposals_by_kind;
use super::text::{distinct, matches, mentions_identifier, phrase_regex};
use crate::config::AuditConfig;
use crate::doctrine::{Critic, EpisodeView};
use crate::schema::vocab::OUTCOME_WORDS;
use crate::schema::{
    Critique, CriticKind, EpisodeArtifact, Evidence, Finding, FindingKind, Inference, PatchProposal, PreState,
    Severity, Verdict,
};

fn outcome_words_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| phrase_regex(OUTCOME_WORDS))
}

#[derive(Debug, Clone)]
pub struct DecisionCritic {
    chaos_strike_max: f64,
    min_strike_confidence: f64,
    overreach_confidence: f64,
    high_confidence: f64,
    low_signal_strength: f64,
    min_score_gap: f64,
}

impl DecisionCritic {
    pub fn new(cfg: &AuditConfig) -> Self {
        Self {
            chaos_strike_max: cfg.chaos_strike_max,
            min_strike_confidence: cfg.min_strike_confidence,
            overreach_confidence: cfg.overreach_confidence,
            high_confidence: cfg.high_confidence,
            low_signal_strength: cfg.low_signal_strength,
            min_score_gap: cfg.min_score_gap,
        }
    }
}

impl Critic for DecisionCritic {
    fn kind(&self) -> CriticKind {
        CriticKind::Decision
    }

    fn critique(&self, view: &EpisodeView<'_>) -> Critique {
        let Some((art, inf)) = view.inference() else {
            return Critique::empty(view.episode_id(), CriticKind::Decision);
        };
        let pre = view.pre_state();

        let mut out = Vec::new();
        missing_rationale(art, inf, &mut out);
        incoherence(art, inf, &mut out);
        narrative_drift(art, inf, pre, &mut out);
        self.rule_violations(art, inf, pre, &mut out);
        self.overreach(art, inf, &mut out);
        self.confidence_mismatch(art, inf, &mut out);

        Critique::new(view.episode_id(), CriticKind::Decision, out)
    }

    fn propose_patches(&self, critique: &Critique) -> Vec<PatchProposal> {
        proposals_by_kind(critique, |kind| match kind {
            FindingKind::MissingRationale => Some(
                "Reject inferences without a rationale at the engine boundary.",
            ),
            FindingKind::Incoherence => Some(
                "Gate STRIKE on the engine's own chaos and leakage flags; downgrade to WATCH when either is raised.",
            ),
            FindingKind::NarrativeDrift => Some(
                "Generate the rationale from the features actually used, not from free-form narrative.",
            ),
            FindingKind::RuleViolation => Some(
                "Enforce the chaos and minimum-confidence strike rules inside the engine before a verdict is emitted.",
            ),
            FindingKind::Overreach => Some(
                "Cap reported confidence and tie it to measured signal strength.",
            ),
            FindingKind::ConfidenceMismatch => Some(
                "Derive confidence from the separation between the top candidates.",
            ),
            _ => None,
        })
    }
}

fn missing_rationale(art: &EpisodeArtifact, inf: &Inference, out: &mut Vec<Finding>) {
    if inf.rationale_text().is_none() {
        out.push(Finding::new(
            FindingKind::MissingRationale,
            Severity::Critical,
            format!("{} verdict has no rationale", inf.verdict.as_str()),
            Evidence::cite(&art.id, "rationale"),
        ));
    }
}

fn incoherence(art: &EpisodeArtifact, inf: &Inference, out: &mut Vec<Finding>) {
    if inf.verdict != Verdict::Strike {
        return;
    }
    if inf.signals.leakage_flag {
        out.push(Finding::new(
            FindingKind::Incoherence,
            Severity::Critical,
            "STRIKE issued while the engine's own leakage flag is raised",
            Evidence::cite(&art.id, "verdict").and(&art.id, "signals.leakage_flag"),
        ));
    }
    if inf.signals.chaos_flag {
        out.push(Finding::new(
            FindingKind::Incoherence,
            Severity::Warning,
            "STRIKE issued while the engine's own chaos flag is raised",
            Evidence::cite(&art.id, "verdict").and(&art.id, "signals.chaos_flag"),
        ));
    }
}

fn narrative_drift(
    art: &EpisodeArtifact,
    inf: &Inference,
    pre: Option<(&EpisodeArtifact, &PreState)>,
    out: &mut Vec<Finding>,
) {
    let Some(text) = inf.rationale_text() else {
        return;
    };
    let words = distinct(&matches(outcome_words_re(), text));
    if !words.is_empty() {
        out.push(Finding::new(
            FindingKind::NarrativeDrift,
            Severity::Warning,
            format!("rationale uses post-race language ({})", words.join(", ")),
            Evidence::cite(&art.id, "rationale"),
        ));
    }
    if let Some((pre_art, pre)) = pre {
        if !pre.features.is_empty() && !pre.features.keys().any(|k| mentions_identifier(text, k)) {
            out.push(Finding::new(
                FindingKind::NarrativeDrift,
                Severity::Info,
                "rationale references none of the extracted features",
                Evidence::cite(&art.id, "rationale").and(&pre_art.id, "features"),
            ));
        }
    }
}

impl DecisionCritic {
    fn rule_violations(
        &self,
        art: &EpisodeArtifact,
        inf: &Inference,
        pre: Option<(&EpisodeArtifact, &PreState)>,
        out: &mut Vec<Finding>,
    ) {
        if inf.verdict != Verdict::Strike {
            return;
        }

        // Either reading above the bar is a breach; each one is cited.
        let mut readings = Vec::new();
        if let Some(level) = inf.signals.chaos_level.filter(|l| l.is_finite()) {
            readings.push((level, Evidence::cite(&art.id, "signals.chaos_level")));
        }
        if let Some((pre_art, p)) = pre {
            if let Some(level) = p.numeric_feature("chaos_level").filter(|l| l.is_finite()) {
                readings.push((level, Evidence::cite(&pre_art.id, "features.chaos_level")));
            }
        }
        let breached: Vec<_> = readings
            .into_iter()
            .filter(|(level, _)| *level > self.chaos_strike_max)
            .collect();
        let worst = breached.iter().map(|(level, _)| *level).reduce(f64::max);
        let evidence = breached.into_iter().map(|(_, e)| e).reduce(|a, b| a.merge(&b));
        if let (Some(worst), Some(evidence)) = (worst, evidence) {
            out.push(Finding::new(
                FindingKind::RuleViolation,
                Severity::Critical,
                format!("STRIKE at chaos level {:.2} (max {:.2})", worst, self.chaos_strike_max),
                evidence.and(&art.id, "verdict"),
            ));
        }

        match inf.finite_confidence() {
            Some(c) if c < self.min_strike_confidence => out.push(Finding::new(
                FindingKind::RuleViolation,
                Severity::Critical,
                format!("STRIKE at confidence {:.2} (min {:.2})", c, self.min_strike_confidence),
                Evidence::cite(&art.id, "confidence").and(&art.id, "verdict"),
            )),
            Some(_) => {}
            None => out.push(Finding::new(
                FindingKind::RuleViolation,
                Severity::Critical,
                "STRIKE with no stated confidence",
                Evidence::cite(&art.id, "confidence").and(&art.id, "verdict"),
            )),
        }
    }

    fn overreach(&self, art: &EpisodeArtifact, inf: &Inference, out: &mut Vec<Finding>) {
        let Some(c) = inf.finite_confidence() else {
            return;
        };
        if c > self.overreach_confidence {
            out.push(Finding::new(
                FindingKind::Overreach,
                Severity::Warning,
                format!("confidence {:.2} above {:.2}", c, self.overreach_confidence),
                Evidence::cite(&art.id, "confidence"),
            ));
            return;
        }
        if let Some(signal) = inf.finite_signal_strength() {
            if c >= self.high_confidence && signal < self.low_signal_strength {
                out.push(Finding::new(
                    FindingKind::Overreach,
                    Severity::Warning,
                    format!("confidence {:.2} on signal strength {:.2}", c, signal),
                    Evidence::cite(&art.id, "confidence").and(&art.id, "signal_strength"),
                ));
            }
        }
    }

    fn confidence_mismatch(&self, art: &EpisodeArtifact, inf: &Inference, out: &mut Vec<Finding>) {
        let (Some(c), Some(gap)) = (inf.finite_confidence(), inf.score_gap()) else {
            return;
        };
        if c >= self.high_confidence && gap < self.min_score_gap {
            out.push(Finding::new(
                FindingKind::ConfidenceMismatch,
                Severity::Warning,
                format!(
                    "confidence {:.2} but top two candidates separated by only {:.3}",
                    c, gap
                ),
                Evidence::cite(&art.id, "confidence").and(&art.id, "candidates"),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::{build_episode_at, write_episode_artifacts_at};
    use crate::schema::{Candidate, InferenceSignals};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn run(pre: PreState, inf: Inference) -> Critique {
        let t = Utc.with_ymd_and_hms(2025, 12, 3, 19, 40, 0).unwrap();
        let ep = build_episode_at("R1", "v1", t, &json!({}), t).unwrap();
        let arts = write_episode_artifacts_at(&ep.id, pre, inf, None, t).unwrap();
        DecisionCritic::new(&AuditConfig::default()).critique(&EpisodeView::new(&ep, &arts))
    }

    fn strike(confidence: f64, rationale: &str) -> Inference {
        Inference {
            verdict: Verdict::Strike,
            top_prediction: Some("A".into()),
            confidence: Some(confidence),
            signal_strength: Some(0.7),
            rationale: Some(rationale.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_coherent_strike() {
        let pre = PreState::new("R1").with_feature("chaos_level", 0.3);
        let c = run(pre, strike(0.7, "Low chaos level and strong pace figures."));
        assert!(c.is_clean, "unexpected findings: {:?}", c.findings);
        assert!(c.is_coherent);
    }

    #[test]
    fn test_strike_in_chaos_is_rule_violation() {
        let pre = PreState::new("R1").with_feature("chaos_level", 0.85);
        let c = run(pre, strike(0.7, "chaos level acceptable"));
        let f: Vec<_> = c.of_kind(FindingKind::RuleViolation).collect();
        assert_eq!(f.len(), 1);
        assert_eq!(f[0].severity, Severity::Critical);
        assert!(f[0].evidence.cites_field("features.chaos_level"));
        assert!(!c.is_coherent);
    }

    #[test]
    fn test_engine_chaos_reading_breach() {
        let pre = PreState::new("R1").with_feature("chaos_level", 0.2);
        let mut inf = strike(0.7, "chaos level fine");
        inf.signals = InferenceSignals {
            chaos_level: Some(0.9),
            ..Default::default()
        };
        let c = run(pre, inf);
        let f = c.of_kind(FindingKind::RuleViolation).next().unwrap();
        assert!(f.evidence.cites_field("signals.chaos_level"));
    }

    #[test]
    fn test_feature_chaos_breach_not_masked_by_engine_reading() {
        let pre = PreState::new("R1").with_feature("chaos_level", 0.85);
        let mut inf = strike(0.7, "chaos level fine");
        inf.signals.chaos_level = Some(0.2);
        let c = run(pre, inf);
        let f: Vec<_> = c.of_kind(FindingKind::RuleViolation).collect();
        assert_eq!(f.len(), 1);
        assert_eq!(f[0].severity, Severity::Critical);
        assert!(f[0].evidence.cites_field("features.chaos_level"));
        assert!(!f[0].evidence.cites_field("signals.chaos_level"));
    }

    #[test]
    fn test_both_chaos_readings_breached_are_cited() {
        let pre = PreState::new("R1").with_feature("chaos_level", 0.8);
        let mut inf = strike(0.7, "chaos level fine");
        inf.signals.chaos_level = Some(0.9);
        let c = run(pre, inf);
        let f: Vec<_> = c.of_kind(FindingKind::RuleViolation).collect();
        assert_eq!(f.len(), 1);
        assert!(f[0].evidence.cites_field("features.chaos_level"));
        assert!(f[0].evidence.cites_field("signals.chaos_level"));
        assert!(f[0].message.contains("0.90"));
    }

    #[test]
    fn test_non_finite_engine_chaos_falls_back_to_feature() {
        let pre = PreState::new("R1").with_feature("chaos_level", 0.85);
        let mut inf = strike(0.7, "chaos level fine");
        inf.signals.chaos_level = Some(f64::NAN);
        let c = run(pre, inf);
        let f = c.of_kind(FindingKind::RuleViolation).next().unwrap();
        assert!(f.evidence.cites_field("features.chaos_level"));
    }

    #[test]
    fn test_nan_confidence_is_no_stated_confidence() {
        let pre = PreState::new("R1").with_feature("chaos_level", 0.3);
        let inf = strike(f64::NAN, "chaos level fine");
        let in_memory = run(pre.clone(), inf.clone());

        let raw = serde_json::to_string(&inf).unwrap();
        let reloaded: Inference = serde_json::from_str(&raw).unwrap();
        assert_eq!(reloaded.confidence, None);
        let after_json = run(pre, reloaded);

        for c in [&in_memory, &after_json] {
            let f: Vec<_> = c.of_kind(FindingKind::RuleViolation).collect();
            assert_eq!(f.len(), 1);
            assert_eq!(f[0].severity, Severity::Critical);
            assert!(f[0].message.contains("no stated confidence"));
            assert_eq!(c.count_kind(FindingKind::Overreach), 0);
        }
    }

    #[test]
    fn test_low_confidence_strike() {
        let pre = PreState::new("R1").with_feature("chaos_level", 0.3);
        let c = run(pre, strike(0.4, "chaos level fine"));
        assert_eq!(c.count_kind(FindingKind::RuleViolation), 1);
    }

    #[test]
    fn test_missing_rationale_is_critical() {
        let mut inf = strike(0.7, "");
        inf.rationale = None;
        let c = run(PreState::new("R1"), inf);
        assert_eq!(c.of_kind(FindingKind::MissingRationale).next().unwrap().severity, Severity::Critical);
    }

    #[test]
    fn test_flags_contradict_strike() {
        let mut inf = strike(0.7, "pace");
        inf.signals.chaos_flag = true;
        inf.signals.leakage_flag = true;
        let c = run(PreState::new("R1"), inf);
        let sev: Vec<Severity> = c.of_kind(FindingKind::Incoherence).map(|f| f.severity).collect();
        assert_eq!(sev, vec![Severity::Critical, Severity::Warning]);
    }

    #[test]
    fn test_narrative_drift() {
        let pre = PreState::new("R1").with_feature("field_size", 9.0);
        let inf = Inference {
            rationale: Some("Romped home last year, should have won again.".into()),
            ..Default::default()
        };
        let c = run(pre, inf);
        let sev: Vec<Severity> = c.of_kind(FindingKind::NarrativeDrift).map(|f| f.severity).collect();
        assert_eq!(sev, vec![Severity::Warning, Severity::Info]);
    }

    #[test]
    fn test_overreach_and_mismatch() {
        let pre = PreState::new("R1").with_feature("chaos_level", 0.3);
        let mut inf = strike(0.97, "chaos level low");
        inf.candidates = vec![
            Candidate { runner: "A".into(), score: 0.51 },
            Candidate { runner: "B".into(), score: 0.49 },
        ];
        let c = run(pre, inf);
        assert_eq!(c.count_kind(FindingKind::Overreach), 1);
        assert_eq!(c.count_kind(FindingKind::ConfidenceMismatch), 1);
        assert!(c.is_coherent);
    }

    #[test]
    fn test_pass_without_confidence_is_not_a_rule_violation() {
        let inf = Inference {
            rationale: Some("nothing stands out".into()),
            ..Default::default()
        };
        let c = run(PreState::new("R1"), inf);
        assert_eq!(c.count_kind(FindingKind::RuleViolation), 0);
    }
}
