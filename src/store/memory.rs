use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{check_commit, EpisodeStore};
use crate::logging;
use crate::schema::{Episode, EpisodeArtifact, EpisodeBundle};

/// In-process store. Validation and apply happen under one write lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<String, EpisodeBundle>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EpisodeStore for MemoryStore {
    fn commit(&self, episode: &Episode, new_artifacts: &[EpisodeArtifact]) -> Result<()> {
        let mut map = self.inner.write().map_err(|_| anyhow!("memory store lock poisoned"))?;
        let fresh = match check_commit(map.get(&episode.id), episode, new_artifacts) {
            Ok(fresh) => fresh,
            Err(err) => {
                logging::log_store_rejected("memory", &episode.id, &err.to_string());
                return Err(err.into());
            }
        };
        let added = fresh.len();
        let entry = map.entry(episode.id.clone()).or_insert_with(|| EpisodeBundle {
            episode: episode.clone(),
            artifacts: Vec::new(),
        });
        entry.episode = episode.clone();
        entry.artifacts.extend(fresh.into_iter().cloned());
        entry.artifacts.sort_by_key(|a| a.sequence);
        logging::log_store_commit("memory", &episode.id, episode.status.as_str(), added);
        Ok(())
    }

    fn load(&self, episode_id: &str) -> Result<Option<EpisodeBundle>> {
        let map = self.inner.read().map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(map.get(episode_id).cloned())
    }

    fn episode_ids(&self) -> Result<Vec<String>> {
        let map = self.inner.read().map_err(|_| anyhow!("memory store lock poisoned"))?;
        let mut ids: Vec<String> = map.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episode::{build_episode_at, finalize_episode_at, seal_episode, write_episode_artifacts_at};
    use crate::schema::{EpisodeStatus, Inference, Outcome, PreState};
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_commit_then_finalize() {
        let t = Utc.with_ymd_and_hms(2025, 12, 3, 19, 40, 0).unwrap();
        let store = MemoryStore::new();
        let ep = build_episode_at("R1", "v1", t, &json!({}), t).unwrap();
        let arts = write_episode_artifacts_at(&ep.id, PreState::new("R1"), Inference::default(), None, t).unwrap();
        let ep = seal_episode(ep, &arts);
        store.commit(&ep, &arts).unwrap();

        let (done, outcome) = finalize_episode_at(ep, Outcome::default(), t + Duration::hours(1)).unwrap();
        let mut all = arts.clone();
        all.push(outcome.clone());
        let done = seal_episode(done, &all);
        store.commit(&done, &[outcome]).unwrap();

        let loaded = store.load(&done.id).unwrap().unwrap();
        assert_eq!(loaded.episode.status, EpisodeStatus::Complete);
        assert_eq!(loaded.artifacts.len(), 3);
        assert_eq!(store.episode_ids().unwrap(), vec![done.id.clone()]);
    }

    #[test]
    fn test_concurrent_commits_of_distinct_episodes() {
        let t = Utc.with_ymd_and_hms(2025, 12, 3, 19, 40, 0).unwrap();
        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let race = format!("R{}", i);
                    let ep = build_episode_at(&race, "v1", t, &json!({}), t).unwrap();
                    let arts = write_episode_artifacts_at(&ep.id, PreState::new(&race), Inference::default(), None, t)
                        .unwrap();
                    store.commit(&seal_episode(ep, &arts), &arts).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.load_all().unwrap().len(), 8);
    }
}
