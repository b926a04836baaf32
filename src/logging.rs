//! Structured logging for the forecasting engine.
//!
//! Design goals:
//! 1. Multi-level granularity (TRACE → FATAL)
//! 2. Pipeline-stage domains for filtering
//! 3. Replay/audit support via input, config and output hashes
//! 4. Logs never touch stdout, so binaries can emit JSON results there

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use crate::error::Diagnostic;

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
    Oscillator,  // ODE integration
    Ephemeris,   // Tidal and alignment modulation
    Indicator,   // External factor aggregation
    Calibration, // Resonance fit
    Anomaly,     // Filtering and triplet test
    Forecast,    // Synthesis, peaks, sensitivity
    System,      // Startup, config, shutdown
    Profile,     // Performance profiling
    Audit,       // Replay/audit trail entries
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Oscillator => "oscillator",
            Domain::Ephemeris => "ephemeris",
            Domain::Indicator => "indicator",
            Domain::Calibration => "calibration",
            Domain::Anomaly => "anomaly",
            Domain::Forecast => "forecast",
            Domain::System => "system",
            Domain::Profile => "profile",
            Domain::Audit => "audit",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS is a comma-separated list or "all"
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Sequence counter and run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static PROFILE_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct FileSinks {
    events: Mutex<BufWriter<File>>,
    trace: Mutex<BufWriter<File>>,
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    sinks: Option<FileSinks>,
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let sinks = std::env::var("LOG_DIR")
            .ok()
            .and_then(|base| open_sinks(PathBuf::from(base).join(&run_id), &run_id));
        RunContext { run_id, sinks }
    })
}

fn open_sinks(run_dir: PathBuf, run_id: &str) -> Option<FileSinks> {
    if let Err(err) = create_dir_all(&run_dir) {
        eprintln!("[log] failed to create run dir: {}", err);
        return None;
    }
    let _ = std::fs::write(
        run_dir.join("manifest.json"),
        json!({
            "run_id": run_id,
            "ts": ts_now(),
            "pid": process::id(),
            "log_dir": run_dir.to_string_lossy(),
        })
        .to_string(),
    );
    let open = |name: &str| match File::create(run_dir.join(name)) {
        Ok(f) => Some(Mutex::new(BufWriter::new(f))),
        Err(err) => {
            eprintln!("[log] failed to create {}: {}", name, err);
            None
        }
    };
    Some(FileSinks {
        events: open("events.jsonl")?,
        trace: open("trace.jsonl")?,
    })
}

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in ["authorization", "Authorization", "api_key", "token"] {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["kind", "source", "msg"] {
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
    let min_level = Level::from_env();
    if level < min_level || !domain.is_enabled() {
        return;
    }

    emit_record(level, domain.as_str(), event, fields);
}

fn emit_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let line = render_record(&ctx.run_id, next_seq(), level, component, event, fields);

    if let Some(sinks) = &ctx.sinks {
        match level {
            Level::Trace | Level::Debug => write_line(&sinks.trace, &line),
            _ => write_line(&sinks.events, &line),
        }
    }
    eprintln!("{}", line);
}

fn render_record(
    run_id: &str,
    seq: u64,
    level: Level,
    component: &str,
    event: &str,
    fields: Map<String, Value>,
) -> String {
    let fields = sanitize_fields(fields);
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(run_id));
    entry.insert("seq".to_string(), json!(seq));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));

    Value::Object(entry).to_string()
}

// =============================================================================
// Audit and pipeline helpers
// =============================================================================

/// Log an audit entry for replay verification
pub fn log_audit(event_type: &str, config_hash: &str, input_hash: &str, output_hash: &str) {
    log(
        Level::Info,
        Domain::Audit,
        event_type,
        obj(&[
            ("config_hash", v_str(config_hash)),
            ("input_hash", v_str(input_hash)),
            ("output_hash", v_str(output_hash)),
        ]),
    );
}

/// Log a non-fatal degradation recorded by a pipeline stage
fn degraded_fields(diag: &Diagnostic) -> Map<String, Value> {
    let mut fields = vec![("kind", v_str(diag.kind())), ("msg", v_str(&diag.to_string()))];
    if let Diagnostic::ExternalFetch { source, .. } = diag {
        fields.push(("source", v_str(source)));
    }
    obj(&fields)
}

/// Warn-level record for a non-fatal degradation.
pub fn log_degraded(domain: Domain, diag: &Diagnostic) {
    log(Level::Warn, domain, "degraded", degraded_fields(diag));
}

pub fn log_stage(domain: Domain, stage: &str, metrics: &[(&str, f64)]) {
    let mets: Map<String, Value> = metrics
        .iter()
        .map(|(k, v)| (k.to_string(), v_num(*v)))
        .collect();

    log(
        Level::Debug,
        domain,
        stage,
        obj(&[("metrics", Value::Object(mets))]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Hex SHA-256 of an arbitrary string, used for config and input hashes
pub fn params_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

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
    domain: Domain,
    label: &'static str,
    context: Option<Map<String, Value>>,
    started: Instant,
    enabled: bool,
}

impl ProfileScope {
    pub fn new(label: &'static str) -> Self {
        let enabled = Self::should_sample();
        Self {
            domain: Domain::Profile,
            label,
            context: None,
            started: Instant::now(),
            enabled,
        }
    }

    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        let enabled = Self::should_sample();
        Self {
            domain: Domain::Profile,
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
        log(Level::Trace, self.domain, "profile", fields);
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
    fn test_params_hash_deterministic() {
        let h1 = params_hash("test-input");
        let h2 = params_hash("test-input");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_params_hash_different_inputs() {
        assert_ne!(params_hash("input-a"), params_hash("input-b"));
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
    fn test_record_promotes_top_level_fields_and_redacts() {
        let line = render_record(
            "r-test",
            7,
            Level::Warn,
            "ephemeris",
            "degraded",
            obj(&[
                ("source", v_str("ephemeris:pluto")),
                ("msg", v_str("lookup failed")),
                ("token", v_str("secret")),
                ("samples", v_num(3.0)),
            ]),
        );
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["lvl"], "WARN");
        assert_eq!(parsed["seq"], 7);
        assert_eq!(parsed["source"], "ephemeris:pluto");
        assert_eq!(parsed["msg"], "lookup failed");
        assert_eq!(parsed["data"]["token"], "[REDACTED]");
        assert_eq!(parsed["data"]["samples"], 3.0);
    }

    #[test]
    fn test_degraded_record_carries_source_tag() {
        let diag = Diagnostic::external("indicator:flareClass", "timed out after 10 ms");
        let line = render_record(
            "r-test",
            1,
            Level::Warn,
            "indicator",
            "degraded",
            degraded_fields(&diag),
        );
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["kind"], "external_fetch");
        assert_eq!(parsed["source"], "indicator:flareClass");
        assert!(parsed["msg"].as_str().unwrap().contains("timed out"));

        let insufficient = Diagnostic::DataInsufficient { domain: None, available: 0 };
        let fields = degraded_fields(&insufficient);
        assert_eq!(fields["kind"], "data_insufficient");
        assert!(fields.get("source").is_none());
    }
}
