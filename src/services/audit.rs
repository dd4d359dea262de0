//! services/audit.rs
//! Audit logbook: component actions and escalation-worthy alerts.
//!
//! - Writes JSONL files under the configured logbook directory.
//! - Constructed once from config and passed by reference; writers never
//!   crash the caller on I/O errors.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::LogbookConfig;

pub struct AuditLog {
    actions: PathBuf,
    alerts: PathBuf,
    enabled: bool,
    preview_len: usize,
}

impl AuditLog {
    pub fn from_config(cfg: &LogbookConfig) -> Self {
        Self {
            actions: cfg.actions.clone(),
            alerts: cfg.alerts.clone(),
            enabled: cfg.enabled,
            preview_len: cfg.preview_len,
        }
    }

    /// Disabled logbook for contexts that need the type but no files.
    pub fn disabled() -> Self {
        Self {
            actions: PathBuf::new(),
            alerts: PathBuf::new(),
            enabled: false,
            preview_len: 160,
        }
    }

    /// Record a generic action event (lightweight telemetry).
    ///
    /// `component` is the logical service name (e.g., `"pipeline"`,
    /// `"feedback"`), `action` a short verb label, `severity` one of
    /// `"low" | "medium" | "high"` for quick triage.
    pub fn record_action(&self, component: &str, action: &str, details: &Value, severity: &str) {
        if !self.enabled {
            return;
        }
        let entry = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": "action",
            "component": component,
            "action": action,
            "severity": severity,
            "details": details
        });
        append_jsonl(&self.actions, &entry);
    }

    /// Record an escalation-worthy alert in the dedicated alert log.
    pub fn record_alert(&self, kind: &str, details: &Value) {
        if !self.enabled {
            return;
        }
        let entry = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": "alert",
            "kind": kind,
            "details": details
        });
        append_jsonl(&self.alerts, &entry);
    }

    /// Produce a privacy-safe preview of an input string for logging.
    /// The length cap is in bytes but never splits a character.
    pub fn redact_preview(&self, s: &str) -> String {
        let mut t = s.replace('\n', " ");
        if t.len() > self.preview_len {
            let mut cut = self.preview_len;
            while !t.is_char_boundary(cut) {
                cut -= 1;
            }
            t.truncate(cut);
            t.push('…');
        }
        t
    }
}

/// Append a single JSON value as a line to a JSONL file.
///
/// Creates parent directories if missing; ignores write errors to avoid
/// crashing the caller.
fn append_jsonl<P: AsRef<Path>, S: Serialize>(path: P, val: &S) {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if let Ok(mut f) = fs::OpenOptions::new().create(true).append(true).open(path) {
        if let Ok(line) = serde_json::to_string(val) {
            let _ = writeln!(f, "{}", line);
        }
    }
}
