//! Event model for the governance engine.
//!
//! - Inbound events arrive as `{ "topic": ..., "data": ... }` envelopes from
//!   the broker bridge (at-least-once, topic-ordered) and deserialize into
//!   [`InboundEvent`]. Malformed envelopes are dropped by the consumer.
//! - Outbound events are emitted through the [`EventSink`] seam so the
//!   pipeline never knows which transport (broker bridge, logbook, test
//!   recorder) is listening.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

// ----------- Inbound -----------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "topic", content = "data", rename_all = "snake_case")]
pub enum InboundEvent {
    ComplaintSubmitted(ComplaintSubmitted),
    ComplaintResolved(ComplaintResolved),
    SensorTelemetry(SensorTelemetry),
    #[serde(rename = "vision_event")]
    VisionDetection(VisionDetection),
}

impl InboundEvent {
    /// Parse a raw broker envelope. The caller logs and drops on error.
    pub fn from_json(raw: serde_json::Value) -> Result<Self> {
        serde_json::from_value(raw).context("malformed event envelope")
    }

    /// Key used to pin an event to one ordered partition. Events for the
    /// same district must never interleave; everything else may.
    pub fn partition_key(&self) -> &str {
        match self {
            InboundEvent::ComplaintSubmitted(ev) => ev
                .district_id
                .as_deref()
                .unwrap_or(ev.ticket_id.as_str()),
            InboundEvent::ComplaintResolved(ev) => ev.ticket_id.as_str(),
            InboundEvent::SensorTelemetry(ev) => ev.sensor_id.as_str(),
            InboundEvent::VisionDetection(ev) => ev.location.as_str(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplaintSubmitted {
    pub complaint_id: String,
    pub ticket_id: String,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub state_id: Option<String>,
    #[serde(default)]
    pub district_id: Option<String>,
    #[serde(default)]
    pub city_id: Option<String>,
    #[serde(default)]
    pub ward_id: Option<String>,
}

/// The exact state the routing agent acted on, recorded at decision time and
/// echoed back on resolution so the feedback path can replay the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub category: String,
    pub severity: String,
    pub workload: f64,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplaintResolved {
    pub ticket_id: String,
    #[serde(default)]
    pub original_state: Option<StateSnapshot>,
    #[serde(default)]
    pub action_taken: Option<usize>,
    pub resolution_days: f64,
    #[serde(default)]
    pub was_overridden: bool,
    #[serde(default = "default_true")]
    pub duplicate_detection_correct: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorTelemetry {
    pub sensor_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub value: f64,
    pub unit: String,
    pub location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisionDetection {
    pub source_type: String,
    pub detection_type: String,
    pub severity: String,
    pub confidence: f64,
    pub location: String,
}

// ----------- Outbound -----------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplaintAnalysis {
    pub category: String,
    pub severity: String,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplaintProcessed {
    pub complaint_id: String,
    pub ticket_id: String,
    pub is_disaster_mode: bool,
    pub analysis: ComplaintAnalysis,
    pub is_duplicate: bool,
    /// IN_PROGRESS once an officer is assigned, PENDING otherwise.
    pub status: String,
    pub assigned_officer: Option<String>,
    pub department: String,
    pub priority: String,
    pub eta_days: f64,
    pub original_state: StateSnapshot,
    pub action_taken: usize,
    #[serde(default)]
    pub state_id: Option<String>,
    #[serde(default)]
    pub district_id: Option<String>,
    #[serde(default)]
    pub city_id: Option<String>,
    #[serde(default)]
    pub ward_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplaintRejected {
    pub complaint_id: String,
    pub ticket_id: String,
    pub reason: String,
    pub score: f64,
    #[serde(default)]
    pub district_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SystemAlert {
    #[serde(rename = "REGIONAL_SURGE", rename_all = "camelCase")]
    RegionalSurge {
        district_id: String,
        count: usize,
        window_seconds: f64,
        is_disaster_mode: bool,
    },
    #[serde(rename = "FLOOD_WARNING", rename_all = "camelCase")]
    FloodWarning { risk_score: f64, location: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutboundEvent {
    ComplaintProcessed(ComplaintProcessed),
    ComplaintRejected(ComplaintRejected),
    SystemAlert(SystemAlert),
}

impl OutboundEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            OutboundEvent::ComplaintProcessed(_) => "complaint_processed",
            OutboundEvent::ComplaintRejected(_) => "complaint_rejected",
            OutboundEvent::SystemAlert(_) => "system_alert",
        }
    }
}

// ----------- Sinks -----------

pub trait EventSink: Send + Sync {
    fn emit(&self, event: OutboundEvent) -> Result<()>;
}

/// Append-only JSONL sink; one envelope per line, newest last.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl EventSink for JsonlSink {
    fn emit(&self, event: OutboundEvent) -> Result<()> {
        let line = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "topic": event.topic(),
            "data": event,
        });
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(f, "{}", serde_json::to_string(&line)?)?;
        Ok(())
    }
}

/// Forwards every event to each attached sink. Later sinks still receive
/// the event when an earlier one fails; the first error is reported.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: OutboundEvent) -> Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(err) = sink.emit(event.clone()) {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Recording sink that keeps emitted events in memory, mostly for tests and
/// the in-process dashboard.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<OutboundEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<OutboundEvent> {
        self.events.lock().map(|ev| ev.clone()).unwrap_or_default()
    }

    pub fn take(&self) -> Vec<OutboundEvent> {
        self.events
            .lock()
            .map(|mut ev| std::mem::take(&mut *ev))
            .unwrap_or_default()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: OutboundEvent) -> Result<()> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
        Ok(())
    }
}
