//! Derived context-key → artifact lookup.
//!
//! Purely additive and rebuildable from stored bundles at any time. Nothing
//! that decides trust (integrity, admission) ever reads it.

use std::collections::BTreeMap;

use crate::schema::{ArtifactType, EpisodeBundle};

pub fn race_key(race_id: &str) -> String {
    format!("race:{}", race_id)
}

pub fn regime_key(regime: &str) -> String {
    format!("regime:{}", regime)
}

pub fn type_key(artifact_type: ArtifactType) -> String {
    format!("type:{}", artifact_type.as_str())
}

pub fn engine_key(engine_version: &str) -> String {
    format!("engine:{}", engine_version)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryIndex {
    entries: BTreeMap<String, Vec<String>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rebuild(bundles: &[EpisodeBundle]) -> Self {
        let mut index = Self::new();
        for b in bundles {
            index.index_bundle(b);
        }
        index
    }

    pub fn index_bundle(&mut self, bundle: &EpisodeBundle) {
        let ep = &bundle.episode;
        let mut artifacts: Vec<_> = bundle.artifacts.iter().collect();
        artifacts.sort_by(|a, b| a.sequence.cmp(&b.sequence).then_with(|| a.id.cmp(&b.id)));
        for a in artifacts {
            self.insert(race_key(&ep.race_id), &a.id);
            self.insert(engine_key(&ep.engine_version), &a.id);
            self.insert(type_key(a.artifact_type()), &a.id);
            if let Some(regime) = ep.regime.as_deref() {
                self.insert(regime_key(regime), &a.id);
            }
        }
    }

    fn insert(&mut self, key: String, artifact_id: &str) {
        let ids = self.entries.entry(key).or_default();
        if !ids.iter().any(|id| id == artifact_id) {
            ids.push(artifact_id.to_string());
        }
    }

    /// Artifact ids under a key, in insertion order.
    pub fn lookup(&self, key: &str) -> &[String] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn by_race(&self, race_id: &str) -> &[String] {
        self.lookup(&race_key(race_id))
    }

    pub fn by_regime(&self, regime: &str) -> &[String] {
        self.lookup(&regime_key(regime))
    }

    pub fn by_type(&self, artifact_type: ArtifactType) -> &[String] {
        self.lookup(&type_key(artifact_type))
    }

    pub fn by_engine(&self, engine_version: &str) -> &[String] {
        self.lookup(&engine_key(engine_version))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::{build_episode_at, write_episode_artifacts_at};
    use crate::schema::{Inference, PreState};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn bundle(race: &str, regime: Option<&str>) -> EpisodeBundle {
        let t = Utc.with_ymd_and_hms(2025, 12, 3, 19, 40, 0).unwrap();
        let ctx = match regime {
            Some(r) => json!({ "regime": r }),
            None => json!({}),
        };
        let ep = build_episode_at(race, "v1", t, &ctx, t).unwrap();
        let artifacts = write_episode_artifacts_at(&ep.id, PreState::new(race), Inference::default(), None, t).unwrap();
        EpisodeBundle { episode: ep, artifacts }
    }

    #[test]
    fn test_keys_per_bundle() {
        let idx = MemoryIndex::rebuild(&[bundle("R1", Some("CHAOS")), bundle("R2", None)]);
        assert_eq!(idx.by_race("R1").len(), 2);
        assert_eq!(idx.by_regime("CHAOS").len(), 2);
        assert_eq!(idx.by_type(ArtifactType::PreState).len(), 2);
        assert_eq!(idx.by_engine("v1").len(), 4);
        assert!(idx.by_race("R9").is_empty());
    }

    #[test]
    fn test_reindex_is_idempotent() {
        let b = bundle("R1", None);
        let mut idx = MemoryIndex::new();
        idx.index_bundle(&b);
        let once = idx.clone();
        idx.index_bundle(&b);
        assert_eq!(idx, once);
    }

    #[test]
    fn test_rebuild_matches_incremental() {
        let bundles = vec![bundle("R1", Some("CHAOS")), bundle("R2", Some("CALM"))];
        let mut incremental = MemoryIndex::new();
        for b in &bundles {
            incremental.index_bundle(b);
        }
        assert_eq!(MemoryIndex::rebuild(&bundles), incremental);
        assert_eq!(incremental.by_race("R1")[0], bundles[0].artifacts[0].id);
    }
}
