use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RuntimeConfig;

pub fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// Append-only JSONL event stream, one object per line.
///
/// Every record carries `ts_unix_ms`, `event`, `run_id`, `command` and
/// `profile`; the payload's fields are flattened next to them.
#[derive(Debug, Clone)]
pub struct TelemetrySink {
    path: Option<PathBuf>,
    run_id: String,
    command: String,
    profile: String,
}

#[derive(Serialize)]
struct EventRecord<'a> {
    ts_unix_ms: u64,
    event: &'a str,
    run_id: &'a str,
    command: &'a str,
    profile: &'a str,
    #[serde(flatten)]
    payload: &'a Value,
}

impl TelemetrySink {
    pub fn new(cfg: &RuntimeConfig, command: String) -> Self {
        Self {
            path: cfg
                .telemetry_enabled
                .then(|| PathBuf::from(&cfg.telemetry_path)),
            run_id: format!("run-{}-{}", unix_ms_now(), std::process::id()),
            command,
            profile: cfg.profile.clone(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            path: None,
            run_id: String::new(),
            command: String::new(),
            profile: String::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    /// Write failures are logged and never interrupt the command.
    pub fn emit(&self, event: &str, payload: Value) {
        let Some(path) = self.path.as_deref() else {
            return;
        };

        let record = EventRecord {
            ts_unix_ms: unix_ms_now(),
            event,
            run_id: &self.run_id,
            command: &self.command,
            profile: &self.profile,
            payload: &payload,
        };
        if let Err(err) = append_record(path, &record) {
            tracing::warn!(event, path = %path.display(), error = %err, "telemetry write failed");
        }
    }
}

fn append_record(path: &Path, record: &EventRecord<'_>) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create telemetry directory '{}'",
                parent.display()
            )
        })?;
    }

    let mut line = serde_json::to_vec(record)
        .with_context(|| format!("failed to serialize telemetry event '{}'", record.event))?;
    line.push(b'\n');

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(&line))
        .with_context(|| format!("failed to append to telemetry file '{}'", path.display()))
}

/// Outcome counters for one model (or all models together).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ModelTally {
    pub requested: usize,
    pub succeeded: usize,
    pub soft_failed: usize,
    pub rate_limited: usize,
    pub failed: usize,
}

impl ModelTally {
    fn record(&mut self, outcome: &str) {
        match outcome {
            "requested" => self.requested += 1,
            "succeeded" => self.succeeded += 1,
            "soft_failed" => self.soft_failed += 1,
            "rate_limited" => self.rate_limited += 1,
            "failed" => self.failed += 1,
            _ => {}
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CommandTally {
    pub events: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct TelemetrySummary {
    pub total_lines: usize,
    pub parsed_events: usize,
    pub parse_errors: usize,
    pub runs: BTreeSet<String>,
    pub commands: BTreeMap<String, CommandTally>,
    pub models: BTreeMap<String, ModelTally>,
    pub totals: ModelTally,
    pub last_event_ts_unix_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct EventLine {
    event: String,
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    ts_unix_ms: Option<u64>,
}

/// Summarize the most recent `limit` lines.
pub fn summarize_telemetry_lines(lines: Vec<String>, limit: usize) -> TelemetrySummary {
    let mut summary = TelemetrySummary {
        total_lines: lines.len(),
        ..TelemetrySummary::default()
    };

    for line in lines.iter().rev().take(limit.max(1)) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(parsed) = serde_json::from_str::<EventLine>(line) else {
            summary.parse_errors += 1;
            continue;
        };
        summary.parsed_events += 1;

        if let Some(run_id) = parsed.run_id.filter(|id| !id.is_empty()) {
            summary.runs.insert(run_id);
        }
        if let Some(ts) = parsed.ts_unix_ms {
            summary.last_event_ts_unix_ms = summary.last_event_ts_unix_ms.max(Some(ts));
        }

        if let Some(command) = parsed.command.filter(|command| !command.is_empty()) {
            let tally = summary.commands.entry(command).or_default();
            tally.events += 1;
            match parsed.event.as_str() {
                "command.completed" => tally.completed += 1,
                "command.failed" => tally.failed += 1,
                _ => {}
            }
        }

        if let Some(outcome) = parsed.event.strip_prefix("model.") {
            summary.totals.record(outcome);
            if let Some(model) = parsed.model {
                summary.models.entry(model).or_default().record(outcome);
            }
        }
    }

    summary
}

pub fn run_telemetry_report(
    cfg: &RuntimeConfig,
    path_override: Option<String>,
    limit: usize,
) -> Result<()> {
    let path = PathBuf::from(path_override.unwrap_or_else(|| cfg.telemetry_path.clone()));
    if !path.exists() {
        println!("No telemetry file found at '{}'.", path.display());
        return Ok(());
    }

    let file = std::fs::File::open(&path)
        .with_context(|| format!("failed to open telemetry file '{}'", path.display()))?;
    let lines = io::BufReader::new(file)
        .lines()
        .collect::<io::Result<Vec<String>>>()
        .with_context(|| format!("failed to read telemetry file '{}'", path.display()))?;

    let summary = summarize_telemetry_lines(lines, limit);

    println!("Telemetry report");
    println!("Path: {}", path.display());
    println!(
        "Events analyzed: {} of {} lines (parse_errors={})",
        summary.parsed_events, summary.total_lines, summary.parse_errors
    );
    println!("Unique runs: {}", summary.runs.len());

    println!("Commands:");
    for (command, tally) in &summary.commands {
        println!(
            "- {command}: events={} completed={} failed={}",
            tally.events, tally.completed, tally.failed
        );
    }

    println!("Model calls:");
    print_model_tally("(all)", &summary.totals);
    let mut models = summary.models.iter().collect::<Vec<_>>();
    models.sort_by_key(|(_, tally)| std::cmp::Reverse(tally.requested));
    for (model, tally) in models {
        print_model_tally(model, tally);
    }

    if let Some(last_ts) = summary.last_event_ts_unix_ms {
        println!("Last event ts_unix_ms: {last_ts}");
    }
    Ok(())
}

fn print_model_tally(name: &str, tally: &ModelTally) {
    println!(
        "- {name}: requested={} succeeded={} soft_failed={} rate_limited={} failed={}",
        tally.requested, tally.succeeded, tally.soft_failed, tally.rate_limited, tally.failed
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn summary_groups_model_outcomes_and_command_results() {
        let lines = vec![
            json!({"ts_unix_ms": 10, "event": "command.started", "run_id": "run-a", "command": "ask"}).to_string(),
            json!({"ts_unix_ms": 11, "event": "model.requested", "run_id": "run-a", "command": "ask", "model": "ref-a"}).to_string(),
            json!({"ts_unix_ms": 12, "event": "model.rate_limited", "run_id": "run-a", "command": "ask", "model": "ref-a"}).to_string(),
            json!({"ts_unix_ms": 13, "event": "model.requested", "run_id": "run-a", "command": "ask", "model": "ref-a"}).to_string(),
            json!({"ts_unix_ms": 14, "event": "model.soft_failed", "run_id": "run-a", "command": "ask", "model": "ref-a"}).to_string(),
            json!({"ts_unix_ms": 15, "event": "model.requested", "run_id": "run-a", "command": "ask", "model": "agg"}).to_string(),
            json!({"ts_unix_ms": 16, "event": "model.succeeded", "run_id": "run-a", "command": "ask", "model": "agg"}).to_string(),
            json!({"ts_unix_ms": 17, "event": "command.completed", "run_id": "run-a", "command": "ask"}).to_string(),
            json!({"ts_unix_ms": 30, "event": "command.failed", "run_id": "run-b", "command": "chat"}).to_string(),
            "not json".to_string(),
        ];

        let summary = summarize_telemetry_lines(lines, 100);

        assert_eq!(summary.total_lines, 10);
        assert_eq!(summary.parsed_events, 9);
        assert_eq!(summary.parse_errors, 1);
        assert_eq!(summary.runs.len(), 2);
        assert_eq!(
            summary.commands.get("ask"),
            Some(&CommandTally {
                events: 8,
                completed: 1,
                failed: 0
            })
        );
        assert_eq!(summary.commands.get("chat").map(|tally| tally.failed), Some(1));
        assert_eq!(
            summary.models.get("ref-a"),
            Some(&ModelTally {
                requested: 2,
                rate_limited: 1,
                soft_failed: 1,
                ..ModelTally::default()
            })
        );
        assert_eq!(summary.totals.requested, 3);
        assert_eq!(summary.totals.succeeded, 1);
        assert_eq!(summary.last_event_ts_unix_ms, Some(30));
    }

    #[test]
    fn summary_only_reads_the_most_recent_lines() {
        let lines = (0..5)
            .map(|index| json!({"event": "model.requested", "model": format!("m{index}")}).to_string())
            .collect::<Vec<_>>();

        let summary = summarize_telemetry_lines(lines, 2);

        assert_eq!(summary.parsed_events, 2);
        assert_eq!(
            summary.models.keys().cloned().collect::<Vec<_>>(),
            vec!["m3".to_string(), "m4".to_string()]
        );
    }

    #[test]
    fn sink_writes_flattened_records_only_when_enabled() {
        let dir = tempfile::tempdir().expect("temp directory should create");
        let path = dir.path().join("nested").join("events.jsonl");
        let sink = TelemetrySink {
            path: Some(path.clone()),
            run_id: "run-1".to_string(),
            command: "ask".to_string(),
            profile: "fast".to_string(),
        };

        sink.emit("model.requested", json!({"model": "agg", "attempt": 1}));
        TelemetrySink::disabled().emit("model.requested", json!({"model": "ignored"}));

        let content = std::fs::read_to_string(&path).expect("telemetry file should exist");
        let records = content
            .lines()
            .map(|line| serde_json::from_str::<Value>(line).expect("valid json line"))
            .collect::<Vec<_>>();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["event"], "model.requested");
        assert_eq!(records[0]["profile"], "fast");
        assert_eq!(records[0]["model"], "agg");
        assert_eq!(records[0]["attempt"], 1);
        assert!(!TelemetrySink::disabled().is_enabled());
    }
}
