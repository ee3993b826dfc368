//! Cognitive Bias critic.
//!
//! Each bias is detected independently and carries its own severity:
//! - anchoring: pick equals the morning-line favourite
//! - confirmation: rationale piles up confirming language with no counterpoint
//! - recency: rationale leans on the last run or two
//! - overconfidence: high stated confidence on a weak signal
//! - herd mentality: pick equals the current market favourite
//! - gambler's fallacy: "due", "overdue", "law of averages"

use regex::Regex;
use std::sync::OnceLock;

use super::proposals_by_kind;
use super::text::{distinct, matches, phrase_regex};
use crate::config::AuditConfig;
use crate::doctrine::{Critic, EpisodeView};
use crate::schema::payload::same_runner;
use crate::schema::{
    Critique, CriticKind, EpisodeArtifact, Evidence, Finding, FindingKind, Inference, PatchProposal, PreState,
    Severity,
};

const CONFIRMING: &[&str] = &[
    "clearly",
    "obviously",
    "confirms",
    "confirmed",
    "as expected",
    "supports",
    "proves",
    "certainly",
    "definitely",
    "no doubt",
    "undeniable",
    "validates",
];

const DISCONFIRMING: &[&str] = &[
    "however",
    "but",
    "although",
    "though",
    "despite",
    "risk",
    "concern",
    "against",
    "downside",
    "uncertain",
    "unless",
    "caveat",
];

const RECENCY: &[&str] = &[
    "recent",
    "recently",
    "most recent",
    "last race",
    "last run",
    "last start",
    "last time",
    "last outing",
    "latest",
    "yesterday",
    "this week",
];

const GAMBLER: &[&str] = &[
    "due",
    "overdue",
    "must happen",
    "bound to",
    "has to win",
    "law of averages",
    "luck must turn",
    "streak must end",
];

fn confirming_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| phrase_regex(CONFIRMING))
}

fn disconfirming_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| phrase_regex(DISCONFIRMING))
}

fn recency_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| phrase_regex(RECENCY))
}

fn gambler_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| phrase_regex(GAMBLER))
}

/// "due to" is causal, not a claim that a result is owed.
fn due_to_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bdue\s+to\b").expect("static pattern"))
}

#[derive(Debug, Clone)]
pub struct CognitiveBiasCritic {
    high_confidence: f64,
    low_signal_strength: f64,
}

impl CognitiveBiasCritic {
    pub fn new(cfg: &AuditConfig) -> Self {
        Self {
            high_confidence: cfg.high_confidence,
            low_signal_strength: cfg.low_signal_strength,
        }
    }
}

impl Critic for CognitiveBiasCritic {
    fn kind(&self) -> CriticKind {
        CriticKind::CognitiveBias
    }

    fn critique(&self, view: &EpisodeView<'_>) -> Critique {
        let Some((inf_art, inf)) = view.inference() else {
            return Critique::empty(view.episode_id(), CriticKind::CognitiveBias);
        };
        let pre = view.pre_state();

        let mut findings = Vec::new();
        findings.extend(detect_anchoring(inf_art, inf, pre));
        findings.extend(detect_confirmation(inf_art, inf));
        findings.extend(detect_recency(inf_art, inf));
        findings.extend(self.detect_overconfidence(inf_art, inf));
        findings.extend(self.detect_herd(inf_art, inf, pre));
        findings.extend(detect_gamblers_fallacy(inf_art, inf));

        Critique::new(view.episode_id(), CriticKind::CognitiveBias, findings)
    }

    fn propose_patches(&self, critique: &Critique) -> Vec<PatchProposal> {
        proposals_by_kind(critique, |kind| match kind {
            FindingKind::Anchoring => Some(
                "Blind the model to morning-line prices, or require an explicit reason whenever the pick matches the morning favourite.",
            ),
            FindingKind::Confirmation => Some(
                "Require at least one stated counter-argument in every rationale before a verdict is emitted.",
            ),
            FindingKind::Recency => Some(
                "Weight form over a longer window; cap the influence of the most recent run.",
            ),
            FindingKind::Overconfidence => Some(
                "Calibrate confidence against signal strength; clamp confidence when the signal is weak.",
            ),
            FindingKind::HerdMentality => Some(
                "Report edge relative to market-implied probability rather than echoing the market favourite.",
            ),
            FindingKind::GamblersFallacy => Some(
                "Remove 'due'/'overdue' reasoning; past losses carry no information about independent future results.",
            ),
            _ => None,
        })
    }
}

impl CognitiveBiasCritic {
    fn detect_overconfidence(&self, art: &EpisodeArtifact, inf: &Inference) -> Option<Finding> {
        let confidence = inf.finite_confidence()?;
        let signal = inf.finite_signal_strength()?;
        if confidence < self.high_confidence || signal >= self.low_signal_strength {
            return None;
        }
        // A weak signal at half the low bar is no signal at all.
        let severity = if signal < self.low_signal_strength / 2.0 {
            Severity::Critical
        } else {
            Severity::Warning
        };
        Some(Finding::new(
            FindingKind::Overconfidence,
            severity,
            format!(
                "confidence {:.2} on signal strength {:.2} (high >= {:.2}, low < {:.2})",
                confidence, signal, self.high_confidence, self.low_signal_strength
            ),
            Evidence::cite(&art.id, "confidence").and(&art.id, "signal_strength"),
        ))
    }

    fn detect_herd(
        &self,
        art: &EpisodeArtifact,
        inf: &Inference,
        pre: Option<(&EpisodeArtifact, &PreState)>,
    ) -> Option<Finding> {
        let top = inf.top_prediction.as_deref()?;
        let (pre_art, pre) = pre?;
        let favorite = pre.market_favorite.as_deref()?;
        if !same_runner(top, favorite) {
            return None;
        }
        let confident = inf.confidence.is_some_and(|c| c >= self.high_confidence);
        Some(Finding::new(
            FindingKind::HerdMentality,
            if confident { Severity::Warning } else { Severity::Info },
            format!("pick '{}' is the market favourite", top),
            Evidence::cite(&art.id, "top_prediction").and(&pre_art.id, "market_favorite"),
        ))
    }
}

fn detect_anchoring(
    art: &EpisodeArtifact,
    inf: &Inference,
    pre: Option<(&EpisodeArtifact, &PreState)>,
) -> Option<Finding> {
    let top = inf.top_prediction.as_deref()?;
    let (pre_art, pre) = pre?;
    let morning = pre.morning_favorite.as_deref()?;
    if !same_runner(top, morning) {
        return None;
    }
    Some(Finding::new(
        FindingKind::Anchoring,
        Severity::Warning,
        format!("pick '{}' is the morning-line favourite", top),
        Evidence::cite(&art.id, "top_prediction").and(&pre_art.id, "morning_favorite"),
    ))
}

fn detect_confirmation(art: &EpisodeArtifact, inf: &Inference) -> Option<Finding> {
    let text = inf.rationale_text()?;
    let confirming = distinct(&matches(confirming_re(), text));
    if confirming.is_empty() || disconfirming_re().is_match(text) {
        return None;
    }
    let severity = if confirming.len() >= 3 {
        Severity::Warning
    } else {
        Severity::Info
    };
    Some(Finding::new(
        FindingKind::Confirmation,
        severity,
        format!(
            "rationale uses confirming language ({}) with no counter-argument",
            confirming.join(", ")
        ),
        Evidence::cite(&art.id, "rationale"),
    ))
}

fn detect_recency(art: &EpisodeArtifact, inf: &Inference) -> Option<Finding> {
    let text = inf.rationale_text()?;
    let found = matches(recency_re(), text);
    if found.len() < 2 {
        return None;
    }
    let severity = if found.len() >= 3 {
        Severity::Warning
    } else {
        Severity::Info
    };
    Some(Finding::new(
        FindingKind::Recency,
        severity,
        format!(
            "rationale leans on recent form {} times ({})",
            found.len(),
            distinct(&found).join(", ")
        ),
        Evidence::cite(&art.id, "rationale"),
    ))
}

fn detect_gamblers_fallacy(art: &EpisodeArtifact, inf: &Inference) -> Option<Finding> {
    let text = inf.rationale_text()?;
    let causal = due_to_re().find_iter(text).count();
    let found = matches(gambler_re(), text);
    let dues = found.iter().filter(|f| *f == "due").count();
    let real: Vec<String> = found.into_iter().filter(|f| f != "due").collect();
    let owed = dues.saturating_sub(causal);
    if real.is_empty() && owed == 0 {
        return None;
    }
    let mut phrases = distinct(&real);
    if owed > 0 {
        phrases.insert(0, "due".to_string());
    }
    Some(Finding::new(
        FindingKind::GamblersFallacy,
        Severity::Warning,
        format!("rationale treats a result as owed ({})", phrases.join(", ")),
        Evidence::cite(&art.id, "rationale"),
    ))
}
