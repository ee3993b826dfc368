//! Audit every episode in a SQLite store and promote the ones that earn it.
//!
//! Usage: verify_store <episodes.sqlite>
//!
//! COMPLETE episodes with a clean integrity report are promoted to
//! VALIDATED. Nothing else is written; critic findings are reported only.
//! VALIDATED episodes that pass the learning gate are turned into learning
//! events on stdout, one JSON object per line. Progress and the summary go
//! to stderr, so stdout can be piped straight into a JSON consumer.

use anyhow::{Context, Result};
use chrono::Utc;
use std::process::ExitCode;

use raceledger::audit::audit_batch;
use raceledger::config::AuditConfig;
use raceledger::episode::promote_episode;
use raceledger::learning::{admit_for_learning, derive_learning_events};
use raceledger::logging::{self, ProfileScope};
use raceledger::memory_index::MemoryIndex;
use raceledger::schema::{CriticKind, EpisodeStatus};
use raceledger::store::{EpisodeStore, SqliteStore};

fn run() -> Result<ExitCode> {
    let path = std::env::args()
        .nth(1)
        .context("usage: verify_store <episodes.sqlite>")?;
    let cfg = AuditConfig::from_env();
    let store = SqliteStore::open(&path)?;
    let bundles = {
        let _scope = ProfileScope::new("load_all");
        store.load_all()?
    };
    eprintln!("Loaded {} episodes from {}", bundles.len(), path);

    let index = MemoryIndex::rebuild(&bundles);
    eprintln!("Indexed {} artifacts under {} keys", bundles.iter().map(|b| b.artifacts.len()).sum::<usize>(), index.len());

    let results = audit_batch(&cfg, &bundles);

    let mut promoted = 0usize;
    let mut learning = 0usize;
    let mut untrusted = 0usize;
    let mut violations = 0usize;
    for (bundle, result) in bundles.iter().zip(&results) {
        let report = match result {
            Ok(r) => r,
            Err(err) => {
                violations += 1;
                eprintln!("  {} DOCTRINE VIOLATION: {}", bundle.episode.id, err);
                continue;
            }
        };
        if !report.integrity.is_valid() {
            untrusted += 1;
            eprintln!(
                "  {} INTEGRITY FAILED: {}",
                bundle.episode.id,
                report.integrity.violation_names().join(", ")
            );
            continue;
        }
        let episode = if bundle.episode.status == EpisodeStatus::Complete {
            match promote_episode(&bundle.episode, &bundle.artifacts) {
                Ok(validated) => {
                    store
                        .commit(&validated, &[])
                        .with_context(|| format!("promoting {}", validated.id))?;
                    logging::log_episode("promoted", &validated);
                    promoted += 1;
                    validated
                }
                Err(report) => {
                    untrusted += 1;
                    eprintln!("  {} not promoted: {}", bundle.episode.id, report.violation_names().join(", "));
                    continue;
                }
            }
        } else {
            bundle.episode.clone()
        };

        let Some(leakage) = report.critique(CriticKind::Leakage) else {
            continue;
        };
        if admit_for_learning(&episode, &report.integrity, leakage).is_ok() {
            for event in derive_learning_events(&episode, &bundle.artifacts, &report.critiques, Utc::now()) {
                println!("{}", serde_json::to_string(&event)?);
                learning += 1;
            }
        }
    }

    eprintln!();
    eprintln!("Episodes:   {}", bundles.len());
    eprintln!("Promoted:   {}", promoted);
    eprintln!("Untrusted:  {}", untrusted);
    eprintln!("Doctrine:   {}", violations);
    eprintln!("Learning:   {}", learning);
    logging::flush_store_stats();

    Ok(if untrusted + violations == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn main() -> Result<ExitCode> {
    let code = run();
    logging::flush();
    code
}
