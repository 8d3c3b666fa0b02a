//! Structured logging for sequential audits.
//!
//! Every record is one JSON line on stderr. When `LOG_DIR` is set the same
//! lines are appended under `<LOG_DIR>/<RUN_ID>/`, with trace/debug records
//! split into `trace.jsonl` and the rest into `events.jsonl`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

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
        std::env::var("LOG_LEVEL")
            .ok()
            .and_then(|v| Level::parse(&v))
            .unwrap_or(Level::Info)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "fatal" => Some(Level::Fatal),
            _ => None,
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
    Audit,    // Sequential test progress and outcomes
    Betting,  // Wager selection
    Sampling, // Sampler cursor, resets, exhaustion
    Estimate, // Error rate estimation
    Persist,  // Snapshots written or read
    System,   // Startup, configuration
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Audit => "audit",
            Domain::Betting => "betting",
            Domain::Sampling => "sampling",
            Domain::Estimate => "estimate",
            Domain::Persist => "persist",
            Domain::System => "system",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS: comma-separated list or "all"
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domain_listed(domains, self.as_str()),
        }
    }
}

fn domain_listed(list: &str, name: &str) -> bool {
    list.split(',').any(|d| d.trim() == name)
}

// =============================================================================
// Sequence counter and run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunFiles {
    events: Mutex<BufWriter<File>>,
    trace: Mutex<BufWriter<File>>,
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    files: Option<RunFiles>,
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let files = std::env::var("LOG_DIR")
            .ok()
            .and_then(|base| open_run_files(PathBuf::from(base).join(&run_id)));
        RunContext { run_id, files }
    })
}

fn open_run_files(run_dir: PathBuf) -> Option<RunFiles> {
    if let Err(err) = create_dir_all(&run_dir) {
        eprintln!("[log] failed to create run dir: {}", err);
        return None;
    }
    let open = |name: &str| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(run_dir.join(name))
            .map_err(|err| eprintln!("[log] failed to open {}: {}", name, err))
            .ok()
    };
    let events = open("events.jsonl")?;
    let trace = open("trace.jsonl")?;
    Some(RunFiles {
        events: Mutex::new(BufWriter::new(events)),
        trace: Mutex::new(BufWriter::new(trace)),
    })
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["contest_id", "round", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Mutex<BufWriter<File>>, line: &str) {
    if let Ok(mut w) = writer.lock() {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
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
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    emit_record(level, domain.as_str(), event, fields);
}

fn build_record(run_id: &str, level: Level, component: &str, event: &str, fields: Map<String, Value>) -> Value {
    let (mut top, data) = split_fields(fields);
    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));

    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(run_id));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));
    Value::Object(entry)
}

fn emit_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let line = build_record(&ctx.run_id, level, component, event, fields).to_string();

    if let Some(files) = &ctx.files {
        match level {
            Level::Trace | Level::Debug => write_line(&files.trace, &line),
            _ => write_line(&files.events, &line),
        }
    }
    eprintln!("{}", line);
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

/// The wager chosen for the next draw.
pub fn log_bet(kind: &str, sample_number: usize, bet: f64, mu: f64, extra: &[(&str, f64)]) {
    let mut fields = obj(&[
        ("kind", v_str(kind)),
        ("sample_number", json!(sample_number)),
        ("bet", v_num(bet)),
        ("mu", v_num(mu)),
    ]);
    for (k, v) in extra {
        fields.insert((*k).to_string(), v_num(*v));
    }
    log(Level::Debug, Domain::Betting, "bet", fields);
}

pub fn log_draw(sample_number: usize, x: f64, mu: f64, term: f64, statistic: f64, pvalue: f64) {
    log(
        Level::Trace,
        Domain::Audit,
        "draw",
        obj(&[
            ("sample_number", json!(sample_number)),
            ("x", v_num(x)),
            ("mu", v_num(mu)),
            ("term", v_num(term)),
            ("statistic", v_num(statistic)),
            ("pvalue", v_num(pvalue)),
        ]),
    );
}

/// A betting term collapsed to zero; the statistic can no longer grow.
pub fn log_stall(sample_number: usize, x: f64, bet: f64, mu: f64) {
    log(
        Level::Warn,
        Domain::Audit,
        "stall",
        obj(&[
            ("sample_number", json!(sample_number)),
            ("x", v_num(x)),
            ("bet", v_num(bet)),
            ("mu", v_num(mu)),
        ]),
    );
}

pub fn log_test_result(status: &str, sample_count: usize, pvalue_min: f64, pvalue_last: f64, errors: &str) {
    log(
        Level::Info,
        Domain::Audit,
        "test_result",
        obj(&[
            ("status", v_str(status)),
            ("sample_count", json!(sample_count)),
            ("pvalue_min", v_num(pvalue_min)),
            ("pvalue_last", v_num(pvalue_last)),
            ("errors", v_str(errors)),
        ]),
    );
}

pub fn log_sampler_exhausted(contest_id: u32, samples_used: usize, max_samples: usize) {
    log(
        Level::Error,
        Domain::Sampling,
        "sampler_exhausted",
        obj(&[
            ("contest_id", json!(contest_id)),
            ("samples_used", json!(samples_used)),
            ("max_samples", json!(max_samples)),
        ]),
    );
}

pub fn log_sampler_reset(contest_id: u32, max_samples: usize) {
    log(
        Level::Debug,
        Domain::Sampling,
        "sampler_reset",
        obj(&[
            ("contest_id", json!(contest_id)),
            ("max_samples", json!(max_samples)),
        ]),
    );
}

pub fn log_estimate(sample_number: usize, rates: &[(&str, f64)]) {
    let rates: Map<String, Value> = rates
        .iter()
        .map(|(k, v)| (k.to_string(), v_num(*v)))
        .collect();
    log(
        Level::Trace,
        Domain::Estimate,
        "estimate",
        obj(&[
            ("sample_number", json!(sample_number)),
            ("rates", Value::Object(rates)),
        ]),
    );
}

/// A snapshot was written or read.
pub fn log_snapshot(action: &str, path: &str, sha256: &str) {
    log(
        Level::Info,
        Domain::Persist,
        "snapshot",
        obj(&[
            ("action", v_str(action)),
            ("path", v_str(path)),
            ("sha256", v_str(sha256)),
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
    fn test_level_parse() {
        assert_eq!(Level::parse("warn"), Some(Level::Warn));
        assert_eq!(Level::parse("loud"), None);
    }

    #[test]
    fn test_domain_list() {
        assert!(domain_listed("audit, betting", "betting"));
        assert!(!domain_listed("audit,betting", "persist"));
    }

    #[test]
    fn test_obj_helper() {
        let m = obj(&[("key", v_str("value")), ("num", v_num(42.0))]);
        assert_eq!(m.get("key").unwrap(), "value");
        assert_eq!(m.get("num").unwrap(), 42.0);
    }

    #[test]
    fn test_record_shape() {
        let rec = build_record(
            "r-test",
            Level::Info,
            "audit",
            "test_result",
            obj(&[("contest_id", json!(7)), ("msg", v_str("done")), ("n", json!(3))]),
        );
        assert_eq!(rec["lvl"], "INFO");
        assert_eq!(rec["contest_id"], 7);
        assert_eq!(rec["msg"], "done");
        assert_eq!(rec["data"]["n"], 3);
        assert!(rec["data"].get("contest_id").is_none());
    }

    #[test]
    fn test_seq_increments() {
        let s1 = next_seq();
        let s2 = next_seq();
        assert!(s2 > s1);
    }
}
