use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::{check_commit, EpisodeStore};
use crate::logging;
use crate::schema::{ArtifactPayload, Episode, EpisodeArtifact, EpisodeBundle, EpisodeStatus};

const SCHEMA: &str = "BEGIN;
    CREATE TABLE IF NOT EXISTS episodes (
        id TEXT PRIMARY KEY,
        race_id TEXT NOT NULL,
        engine_version TEXT NOT NULL,
        context_hash TEXT NOT NULL,
        decision_time TEXT NOT NULL,
        created_at TEXT NOT NULL,
        replay_hash TEXT,
        status TEXT NOT NULL,
        regime TEXT
    );
    CREATE TABLE IF NOT EXISTS artifacts (
        episode_id TEXT NOT NULL REFERENCES episodes(id),
        sequence INTEGER NOT NULL,
        id TEXT NOT NULL UNIQUE,
        artifact_type TEXT NOT NULL,
        payload TEXT NOT NULL,
        checksum TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (episode_id, sequence)
    );
    CREATE TRIGGER IF NOT EXISTS artifacts_no_update BEFORE UPDATE ON artifacts
    BEGIN SELECT RAISE(ABORT, 'artifacts are append-only'); END;
    CREATE TRIGGER IF NOT EXISTS artifacts_no_delete BEFORE DELETE ON artifacts
    BEGIN SELECT RAISE(ABORT, 'artifacts are append-only'); END;
    COMMIT;";

/// SQLite-backed store. Each commit is a single transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).with_context(|| format!("opening {}", path.display()))?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).context("creating schema")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("sqlite connection lock poisoned"))
    }
}

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("bad timestamp {:?}", raw))?
        .with_timezone(&Utc))
}

fn load_in(conn: &Connection, episode_id: &str) -> Result<Option<EpisodeBundle>> {
    let row = conn
        .query_row(
            "SELECT id, race_id, engine_version, context_hash, decision_time, created_at, replay_hash, status, regime
             FROM episodes WHERE id = ?1",
            params![episode_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, Option<String>>(6)?,
                    r.get::<_, String>(7)?,
                    r.get::<_, Option<String>>(8)?,
                ))
            },
        )
        .optional()?;
    let Some((id, race_id, engine_version, context_hash, decision_time, created_at, replay_hash, status, regime)) = row
    else {
        return Ok(None);
    };
    let episode = Episode {
        status: EpisodeStatus::parse(&status).ok_or_else(|| anyhow!("episode {} has unknown status {:?}", id, status))?,
        decision_time: parse_ts(&decision_time)?,
        created_at: parse_ts(&created_at)?,
        id,
        race_id,
        engine_version,
        context_hash,
        replay_hash,
        regime,
    };

    let mut stmt = conn.prepare(
        "SELECT id, sequence, payload, checksum, created_at
         FROM artifacts WHERE episode_id = ?1 ORDER BY sequence",
    )?;
    let rows = stmt.query_map(params![episode_id], |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, i64>(1)?,
            r.get::<_, String>(2)?,
            r.get::<_, String>(3)?,
            r.get::<_, String>(4)?,
        ))
    })?;
    let mut artifacts = Vec::new();
    for row in rows {
        let (id, sequence, payload, checksum, created_at) = row?;
        let content: ArtifactPayload =
            serde_json::from_str(&payload).with_context(|| format!("decoding payload of {}", id))?;
        artifacts.push(EpisodeArtifact {
            episode_id: episode.id.clone(),
            sequence: u32::try_from(sequence).with_context(|| format!("sequence of {}", id))?,
            content,
            checksum,
            created_at: parse_ts(&created_at)?,
            id,
        });
    }
    Ok(Some(EpisodeBundle { episode, artifacts }))
}

impl EpisodeStore for SqliteStore {
    fn commit(&self, episode: &Episode, new_artifacts: &[EpisodeArtifact]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let stored = load_in(&tx, &episode.id)?;
        let fresh = match check_commit(stored.as_ref(), episode, new_artifacts) {
            Ok(fresh) => fresh,
            Err(err) => {
                logging::log_store_rejected("sqlite", &episode.id, &err.to_string());
                return Err(err.into());
            }
        };

        tx.execute(
            "INSERT INTO episodes
                (id, race_id, engine_version, context_hash, decision_time, created_at, replay_hash, status, regime)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET replay_hash = excluded.replay_hash, status = excluded.status",
            params![
                episode.id,
                episode.race_id,
                episode.engine_version,
                episode.context_hash,
                ts(episode.decision_time),
                ts(episode.created_at),
                episode.replay_hash,
                episode.status.as_str(),
                episode.regime,
            ],
        )?;
        for a in &fresh {
            tx.execute(
                "INSERT INTO artifacts (episode_id, sequence, id, artifact_type, payload, checksum, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    a.episode_id,
                    a.sequence as i64,
                    a.id,
                    a.artifact_type().as_str(),
                    serde_json::to_string(&a.content)?,
                    a.checksum,
                    ts(a.created_at),
                ],
            )?;
        }
        tx.commit()?;
        logging::log_store_commit("sqlite", &episode.id, episode.status.as_str(), fresh.len());
        Ok(())
    }

    fn load(&self, episode_id: &str) -> Result<Option<EpisodeBundle>> {
        let conn = self.lock()?;
        load_in(&conn, episode_id)
    }

    fn episode_ids(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM episodes ORDER BY id")?;
        let ids = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}
