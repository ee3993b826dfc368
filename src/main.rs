//! raceledger: audit or replay a recorded episode bundle.
//!
//! Usage:
//!   raceledger audit  <bundle.json>   integrity + all critics, JSON report on stdout
//!   raceledger replay <bundle.json>   recomputed replay hash on stdout
//!
//! `audit` exits 1 when integrity fails and 2 on a doctrine violation.

use anyhow::{bail, Context, Result};
use serde_json::json;
use std::path::Path;
use std::process::ExitCode;

use raceledger::audit::audit_episode;
use raceledger::config::AuditConfig;
use raceledger::episode::replay_episode;
use raceledger::logging::{self, obj, v_str, Domain, Level};
use raceledger::schema::EpisodeBundle;

fn load_bundle(path: &Path) -> Result<EpisodeBundle> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing episode bundle {}", path.display()))
}

fn run() -> Result<ExitCode> {
    let mut args = std::env::args().skip(1);
    let (Some(cmd), Some(path)) = (args.next(), args.next()) else {
        bail!("usage: raceledger <audit|replay> <bundle.json>");
    };
    let bundle = load_bundle(Path::new(&path))?;

    match cmd.as_str() {
        "replay" => {
            let hash = replay_episode(&bundle.artifacts);
            let matches = bundle.episode.replay_hash.as_deref().map(|stored| stored == hash);
            println!(
                "{}",
                json!({
                    "episode_id": bundle.episode.id,
                    "replay_hash": hash,
                    "matches_stored": matches,
                })
            );
            Ok(ExitCode::SUCCESS)
        }
        "audit" => {
            let cfg = AuditConfig::from_env();
            logging::log(
                Level::Info,
                Domain::System,
                "audit_start",
                obj(&[("episode_id", v_str(&bundle.episode.id)), ("path", v_str(&path))]),
            );
            let report = match audit_episode(&cfg, &bundle.episode, &bundle.artifacts) {
                Ok(r) => r,
                Err(err) => {
                    eprintln!("doctrine violation: {}", err);
                    return Ok(ExitCode::from(2));
                }
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.integrity.is_valid() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::from(1))
            }
        }
        other => bail!("unknown command {:?}; expected audit or replay", other),
    }
}

fn main() -> Result<ExitCode> {
    let code = run();
    logging::flush();
    code
}
