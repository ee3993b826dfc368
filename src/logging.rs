//! Structured logging for the episode audit pipeline.
//!
//! Design goals:
//! 1. Multi-level granularity (TRACE → FATAL)
//! 2. Domain-specific categories for filtering (`LOG_DOMAINS`)
//! 3. JSONL run directories for replay of an audit session (`LOG_DIR`, `RUN_ID`)
//! 4. Summaries that aggregate well across batches
//!
//! Critics never call into this module. Logging happens around them: in the
//! audit runner, the stores and the binaries.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use crate::episode::IntegrityReport;
use crate::schema::{Critique, Episode, PatchProposal};

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Episode,   // Construction, finalization, sealing
    Integrity, // Validation reports
    Critic,    // Critique summaries (emitted by the runner)
    Audit,     // Audit runs, patch proposals
    Learning,  // Admission and derived learning events
    Store,     // Commits, loads, refusals
    System,    // Startup, shutdown, config
    Profile,   // Performance profiling
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Episode => "episode",
            Domain::Integrity => "integrity",
            Domain::Critic => "critic",
            Domain::Audit => "audit",
            Domain::Learning => "learning",
            Domain::Store => "store",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS: comma-separated list or "all"
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Sequence counter for ordering
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static PROFILE_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

type Sink = Mutex<BufWriter<File>>;

#[derive(Debug)]
struct RunContext {
    run_id: String,
    /// Present only when `LOG_DIR` is set
    events: Option<Sink>,
    trace: Option<Sink>,
}

fn open_sink(path: PathBuf) -> Option<Sink> {
    match File::create(&path) {
        Ok(f) => Some(Mutex::new(BufWriter::new(f))),
        Err(err) => {
            eprintln!("[log] failed to create {}: {}", path.display(), err);
            None
        }
    }
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let Ok(base) = std::env::var("LOG_DIR") else {
            return RunContext {
                run_id,
                events: None,
                trace: None,
            };
        };
        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);
        if let Err(err) = create_dir_all(&run_dir) {
            eprintln!("[log] failed to create run dir: {}", err);
        }
        let _ = std::fs::write(
            run_dir.join("manifest.json"),
            json!({
                "run_id": run_id,
                "ts": ts_now(),
                "pid": process::id(),
                "log_dir": run_dir.to_string_lossy(),
                "crate_version": env!("CARGO_PKG_VERSION"),
            })
            .to_string(),
        );
        RunContext {
            events: open_sink(run_dir.join("events.jsonl")),
            trace: open_sink(run_dir.join("trace.jsonl")),
            run_id,
        }
    })
}

/// Free text that may quote a rationale verbatim is truncated in logs.
fn truncate_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    for key in ["rationale", "detail", "message"] {
        if let Some(Value::String(s)) = fields.get(key) {
            if s.chars().count() > 200 {
                let short: String = s.chars().take(200).collect();
                fields.insert(key.to_string(), Value::String(format!("{}...", short)));
            }
        }
    }
    fields
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["episode_id", "race_id", "critic", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Option<Sink>, line: &str) {
    if let Some(Ok(mut w)) = writer.as_ref().map(|w| w.lock()) {
        let _ = writeln!(w, "{}", line);
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let min_level = Level::from_env();
    if level < min_level || !domain.is_enabled() {
        return;
    }
    emit_record(level, domain.as_str(), event, fields);
}

fn emit_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let fields = truncate_fields(fields);
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));

    let line = Value::Object(entry).to_string();
    match level {
        Level::Trace | Level::Debug => write_line(&ctx.trace, &line),
        _ => write_line(&ctx.events, &line),
    }
    // stdout carries command output; log lines go to stderr
    eprintln!("{}", line);
}

/// Flush the run-directory sinks. Call before process exit.
pub fn flush() {
    if let Some(ctx) = RUN_CONTEXT.get() {
        for sink in [&ctx.events, &ctx.trace].into_iter().flatten() {
            if let Ok(mut w) = sink.lock() {
                let _ = w.flush();
            }
        }
    }
}

// =============================================================================
// Episode lifecycle
// =============================================================================

pub fn log_episode(event: &str, episode: &Episode) {
    log(
        Level::Info,
        Domain::Episode,
        event,
        obj(&[
            ("episode_id", v_str(&episode.id)),
            ("race_id", v_str(&episode.race_id)),
            ("engine_version", v_str(&episode.engine_version)),
            ("status", v_str(episode.status.as_str())),
            ("decision_time", json!(episode.decision_time)),
            (
                "replay_hash",
                episode.replay_hash.as_deref().map(v_str).unwrap_or(Value::Null),
            ),
        ]),
    );
}

pub fn log_integrity(report: &IntegrityReport) {
    let level = if report.is_valid() { Level::Info } else { Level::Warn };
    log(
        level,
        Domain::Integrity,
        "integrity_report",
        obj(&[
            ("episode_id", v_str(&report.episode_id)),
            ("passed", json!(report.is_valid())),
            ("violations", json!(report.violation_names())),
        ]),
    );
}

// =============================================================================
// Critics and audit
// =============================================================================

/// Summary of one critique. Full findings stay in the critique itself.
pub fn log_critique(critique: &Critique) {
    let level = if critique.has_critical() {
        Level::Warn
    } else {
        Level::Info
    };
    let kinds: Vec<&str> = critique.findings.iter().map(|f| f.kind.as_str()).collect();
    log(
        level,
        Domain::Critic,
        "critique",
        obj(&[
            ("episode_id", v_str(&critique.episode_id)),
            ("critic", v_str(critique.critic.as_str())),
            ("critical", json!(critique.counts.critical)),
            ("warning", json!(critique.counts.warning)),
            ("info", json!(critique.counts.info)),
            ("is_clean", json!(critique.is_clean)),
            ("is_coherent", json!(critique.is_coherent)),
            ("kinds", json!(kinds)),
        ]),
    );
}

pub fn log_patch_proposal(proposal: &PatchProposal) {
    log(
        Level::Info,
        Domain::Audit,
        "patch_proposed",
        obj(&[
            ("episode_id", v_str(&proposal.episode_id)),
            ("critic", v_str(proposal.source.as_str())),
            ("patch_id", v_str(&proposal.id)),
            ("type", v_str(proposal.patch_type.as_str())),
        ]),
    );
}

pub fn log_doctrine_violation(episode_id: &str, critic: &str, detail: &str) {
    log(
        Level::Error,
        Domain::Audit,
        "doctrine_violation",
        obj(&[
            ("episode_id", v_str(episode_id)),
            ("critic", v_str(critic)),
            ("detail", v_str(detail)),
        ]),
    );
}

// =============================================================================
// Store
// =============================================================================

pub fn log_store_commit(backend: &str, episode_id: &str, status: &str, new_artifacts: usize) {
    log(
        Level::Info,
        Domain::Store,
        "commit",
        obj(&[
            ("episode_id", v_str(episode_id)),
            ("backend", v_str(backend)),
            ("status", v_str(status)),
            ("new_artifacts", json!(new_artifacts)),
        ]),
    );
    agg_increment("commit");
}

pub fn log_store_rejected(backend: &str, episode_id: &str, reason: &str) {
    log(
        Level::Warn,
        Domain::Store,
        "commit_rejected",
        obj(&[
            ("episode_id", v_str(episode_id)),
            ("backend", v_str(backend)),
            ("reason", v_str(reason)),
        ]),
    );
    agg_increment("rejected");
}

// =============================================================================
// Summaries
// =============================================================================

/// Batch audit summary
pub fn log_batch_summary(episodes: usize, trustworthy: usize, critical_findings: usize, proposals: usize, elapsed_ms: f64) {
    log(
        Level::Info,
        Domain::Audit,
        "batch_summary",
        obj(&[
            ("episodes", json!(episodes)),
            ("trustworthy", json!(trustworthy)),
            ("critical_findings", json!(critical_findings)),
            ("proposals", json!(proposals)),
            ("elapsed_ms", v_num(elapsed_ms)),
        ]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Profiling Scope
// =============================================================================

/// Profiling scope that emits structured timing on drop.
pub struct ProfileScope {
    label: &'static str,
    context: Option<Map<String, Value>>,
    started: Instant,
    enabled: bool,
}

impl ProfileScope {
    pub fn new(label: &'static str) -> Self {
        Self::with_context(label, &[])
    }

    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        let enabled = Self::should_sample();
        Self {
            label,
            context: if enabled { Some(obj(fields)) } else { None },
            started: Instant::now(),
            enabled,
        }
    }

    fn should_sample() -> bool {
        std::env::var("PROFILE_SAMPLE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .map(|p| {
                if p >= 1.0 {
                    true
                } else if p <= 0.0 {
                    false
                } else {
                    let seq = PROFILE_SEQ.fetch_add(1, Ordering::SeqCst);
                    let bucket = (seq % 10_000) as f64 / 10_000.0;
                    bucket < p
                }
            })
            .unwrap_or(true)
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut fields = self.context.take().unwrap_or_default();
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(elapsed_ms));
        log(Level::Trace, Domain::Profile, "profile", fields);
    }
}

// =============================================================================
// Store counters for periodic summaries
// =============================================================================

static AGGREGATOR: OnceLock<Mutex<LogAggregator>> = OnceLock::new();

fn get_aggregator() -> &'static Mutex<LogAggregator> {
    AGGREGATOR.get_or_init(|| Mutex::new(LogAggregator::new()))
}

#[derive(Debug, Default)]
struct LogAggregator {
    commits: u64,
    rejected: u64,
}

impl LogAggregator {
    fn new() -> Self {
        Self::default()
    }

    fn increment(&mut self, event: &str) {
        match event {
            "commit" => self.commits += 1,
            "rejected" => self.rejected += 1,
            _ => {}
        }
    }

    fn take(&mut self) -> (u64, u64) {
        let out = (self.commits, self.rejected);
        self.commits = 0;
        self.rejected = 0;
        out
    }
}

/// Emit and reset the store counters.
pub fn flush_store_stats() {
    if let Ok(mut agg) = get_aggregator().lock() {
        let (commits, rejected) = agg.take();
        log(
            Level::Info,
            Domain::System,
            "store_stats",
            obj(&[("commits", json!(commits)), ("rejected", json!(rejected))]),
        );
    }
}

fn agg_increment(event: &str) {
    if let Ok(mut agg) = get_aggregator().lock() {
        agg.increment(event);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Fatal);
    }

    #[test]
    fn test_obj_helper() {
        let m = obj(&[("key", v_str("value")), ("num", v_num(42.0))]);
        assert_eq!(m.get("key").unwrap(), "value");
        assert_eq!(m.get("num").unwrap(), 42.0);
    }

    #[test]
    fn test_seq_increments() {
        let s1 = next_seq();
        let s2 = next_seq();
        assert!(s2 > s1);
    }

    #[test]
    fn test_split_lifts_episode_id() {
        let (top, data) = split_fields(obj(&[("episode_id", v_str("e")), ("n", json!(1))]));
        assert_eq!(top.get("episode_id").unwrap(), "e");
        assert!(data.contains_key("n"));
        assert!(!data.contains_key("episode_id"));
    }

    #[test]
    fn test_long_rationale_truncated() {
        let long = "x".repeat(500);
        let m = truncate_fields(obj(&[("rationale", v_str(&long))]));
        assert_eq!(m["rationale"].as_str().unwrap().chars().count(), 203);
    }

    #[test]
    fn test_aggregator_resets() {
        let mut agg = LogAggregator::new();
        agg.increment("commit");
        agg.increment("commit");
        agg.increment("rejected");
        assert_eq!(agg.take(), (2, 1));
        assert_eq!(agg.take(), (0, 0));
    }
}
