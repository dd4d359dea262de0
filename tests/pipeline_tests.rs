use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use civic_engine::collaborators::{
    Category, Classification, Classifier, CollabError, DuplicateChecker, DuplicateVerdict,
    EtaEstimate, EtaPredictor, Severity, SpamChecker, SpamVerdict,
};
use civic_engine::config::{AgentConfig, PipelineConfig, SurgeConfig};
use civic_engine::events::{
    ComplaintProcessed, ComplaintSubmitted, InboundEvent, MemorySink, OutboundEvent, SensorTelemetry,
    StateSnapshot, SystemAlert,
};
use civic_engine::services::audit::AuditLog;
use civic_engine::services::pipeline::flood_risk;
use civic_engine::services::{
    Collaborators, Dispatcher, EventPipeline, FeedbackProcessor, OfficerDirectory, QLearningAgent,
    SurgeDetector,
};
use tempfile::TempDir;

// ----------- Scripted collaborators -----------

#[derive(Default)]
struct Calls {
    spam: AtomicUsize,
    classify: AtomicUsize,
    duplicate: AtomicUsize,
    eta: AtomicUsize,
}

struct ScriptedSpam {
    is_spam: bool,
    calls: Arc<Calls>,
}

impl SpamChecker for ScriptedSpam {
    fn check_spam(&self, _text: &str) -> Result<SpamVerdict, CollabError> {
        self.calls.spam.fetch_add(1, Ordering::SeqCst);
        Ok(SpamVerdict {
            is_spam: self.is_spam,
            score: if self.is_spam { 0.9 } else { 0.1 },
            reasoning: "scripted".to_string(),
        })
    }
}

struct ScriptedClassifier {
    category: Category,
    severity: Severity,
    fail: bool,
    delay_ms: u64,
    calls: Arc<Calls>,
}

impl Classifier for ScriptedClassifier {
    fn classify(&self, _text: &str) -> Result<Classification, CollabError> {
        self.calls.classify.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            std::thread::sleep(std::time::Duration::from_millis(self.delay_ms));
        }
        if self.fail {
            return Err(CollabError::Unavailable("scripted outage".to_string()));
        }
        Ok(Classification {
            category: self.category,
            severity: self.severity,
            confidence: 0.9,
            reasoning: "scripted".to_string(),
        })
    }
}

struct CountingDuplicates {
    calls: Arc<Calls>,
}

impl DuplicateChecker for CountingDuplicates {
    fn check_duplicate(
        &self,
        _text: &str,
        _lat: f64,
        _lon: f64,
    ) -> Result<DuplicateVerdict, CollabError> {
        self.calls.duplicate.fetch_add(1, Ordering::SeqCst);
        Ok(DuplicateVerdict::fallback())
    }
}

struct CountingEta {
    calls: Arc<Calls>,
}

impl EtaPredictor for CountingEta {
    fn predict_eta(
        &self,
        _category: Category,
        _severity: Severity,
        _density: f64,
    ) -> Result<EtaEstimate, CollabError> {
        self.calls.eta.fetch_add(1, Ordering::SeqCst);
        Ok(EtaEstimate::from_days(3.0))
    }
}

// ----------- Harness -----------

struct Harness {
    pipeline: Arc<EventPipeline>,
    sink: Arc<MemorySink>,
    agent: Arc<QLearningAgent>,
    calls: Arc<Calls>,
    _dir: TempDir,
}

fn harness_with(
    spam: bool,
    classifier_fails: bool,
    classifier_delay_ms: u64,
    cfg: PipelineConfig,
) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let calls = Arc::new(Calls::default());
    let sink = Arc::new(MemorySink::new());
    let audit = Arc::new(AuditLog::disabled());

    let agent_cfg = AgentConfig {
        epsilon: 0.0,
        policy_path: dir.path().join("policy.db"),
        ..AgentConfig::default()
    };
    let agent = Arc::new(QLearningAgent::with_seed(agent_cfg, 42));
    let surge = Arc::new(SurgeDetector::new(
        SurgeConfig::default(),
        sink.clone(),
        audit.clone(),
    ));
    let feedback = Arc::new(FeedbackProcessor::new(agent.clone(), audit.clone(), 100));
    let collaborators = Collaborators {
        classifier: Arc::new(ScriptedClassifier {
            category: Category::Water,
            severity: Severity::High,
            fail: classifier_fails,
            delay_ms: classifier_delay_ms,
            calls: calls.clone(),
        }),
        spam: Arc::new(ScriptedSpam {
            is_spam: spam,
            calls: calls.clone(),
        }),
        duplicates: Arc::new(CountingDuplicates {
            calls: calls.clone(),
        }),
        eta: Arc::new(CountingEta {
            calls: calls.clone(),
        }),
    };
    let pipeline = Arc::new(EventPipeline::new(
        cfg,
        collaborators,
        surge,
        agent.clone(),
        Arc::new(OfficerDirectory::default()),
        feedback,
        sink.clone(),
        audit,
    ));

    Harness {
        pipeline,
        sink,
        agent,
        calls,
        _dir: dir,
    }
}

fn harness(spam: bool) -> Harness {
    harness_with(spam, false, 0, PipelineConfig::default())
}

fn complaint(ticket: &str, district: Option<&str>) -> InboundEvent {
    InboundEvent::ComplaintSubmitted(ComplaintSubmitted {
        complaint_id: format!("c-{ticket}"),
        ticket_id: ticket.to_string(),
        description: "Water pipe burst flooding the street".to_string(),
        latitude: 12.9,
        longitude: 77.6,
        state_id: None,
        district_id: district.map(|d| d.to_string()),
        city_id: None,
        ward_id: None,
    })
}

fn processed_events(sink: &MemorySink) -> Vec<ComplaintProcessed> {
    sink.snapshot()
        .into_iter()
        .filter_map(|ev| match ev {
            OutboundEvent::ComplaintProcessed(p) => Some(p),
            _ => None,
        })
        .collect()
}

// ----------- Complaint workflow -----------

#[test]
fn spam_gate_short_circuits_the_workflow() {
    let h = harness(true);
    h.pipeline.handle(complaint("TKT-1", Some("D1")));

    let events = h.sink.snapshot();
    assert_eq!(events.len(), 1);
    match &events[0] {
        OutboundEvent::ComplaintRejected(rej) => {
            assert_eq!(rej.reason, "SPAM_DETECTED");
            assert_eq!(rej.ticket_id, "TKT-1");
            assert!((rej.score - 0.9).abs() < 1e-9);
        }
        other => panic!("expected rejection, got {other:?}"),
    }

    assert_eq!(h.calls.spam.load(Ordering::SeqCst), 1);
    assert_eq!(h.calls.classify.load(Ordering::SeqCst), 0);
    assert_eq!(h.calls.duplicate.load(Ordering::SeqCst), 0);
    assert_eq!(h.calls.eta.load(Ordering::SeqCst), 0);
}

#[test]
fn legitimate_complaint_runs_the_full_workflow() {
    let h = harness(false);
    h.pipeline.handle(complaint("TKT-2", Some("D1")));

    let events = processed_events(&h.sink);
    assert_eq!(events.len(), 1);
    let p = &events[0];
    assert_eq!(p.analysis.category, "Water");
    assert_eq!(p.analysis.severity, "High");
    assert_eq!(p.department, "Water");
    assert_eq!(p.priority, "High");
    assert!((p.eta_days - 3.0).abs() < 1e-9);
    assert!(!p.is_disaster_mode);
    assert_eq!(p.status, "IN_PROGRESS");
    assert!(p.assigned_officer.is_some());
    assert!(p.action_taken < 5);
    assert_eq!(p.district_id.as_deref(), Some("D1"));

    // The decision context rides on the event for the feedback path.
    assert_eq!(p.original_state.category, "Water");
    assert_eq!(p.original_state.severity, "High");

    assert_eq!(h.calls.classify.load(Ordering::SeqCst), 1);
    assert_eq!(h.calls.duplicate.load(Ordering::SeqCst), 1);
    assert_eq!(h.calls.eta.load(Ordering::SeqCst), 1);
}

#[test]
fn classifier_outage_degrades_to_the_fallback_analysis() {
    let h = harness_with(false, true, 0, PipelineConfig::default());
    h.pipeline.handle(complaint("TKT-3", None));

    let events = processed_events(&h.sink);
    assert_eq!(events.len(), 1, "pipeline must continue past the outage");
    let p = &events[0];
    assert_eq!(p.analysis.category, "Others");
    assert_eq!(p.analysis.severity, "Medium");
    assert!((p.analysis.confidence - 0.5).abs() < 1e-9);
}

#[test]
fn late_classifier_answers_are_distrusted() {
    // A correct answer that returns after the configured bound is treated
    // as a timeout and replaced by the fallback analysis.
    let cfg = PipelineConfig {
        collaborator_timeout_ms: 10,
        ..PipelineConfig::default()
    };
    let h = harness_with(false, false, 60, cfg);
    h.pipeline.handle(complaint("TKT-4", None));

    let events = processed_events(&h.sink);
    assert_eq!(events.len(), 1);
    let p = &events[0];
    assert_eq!(p.analysis.category, "Others");
    assert_eq!(p.analysis.severity, "Medium");
    assert_eq!(h.calls.classify.load(Ordering::SeqCst), 1);
}

#[test]
fn disaster_mode_overrides_severity_and_eta() {
    let h = harness(false);
    for i in 0..15 {
        h.pipeline.handle(complaint(&format!("TKT-{i}"), Some("D9")));
    }

    let events = processed_events(&h.sink);
    assert_eq!(events.len(), 15);
    let last = events.last().expect("15th complaint");
    assert!(last.is_disaster_mode);
    assert_eq!(last.analysis.severity, "Critical");
    assert_eq!(last.priority, "Urgent");
    assert!((last.eta_days - 1.0).abs() < 1e-9);

    // The first fourteen went through the ETA model; the disaster one skips it.
    assert_eq!(h.calls.eta.load(Ordering::SeqCst), 14);

    // Threshold crossings also raised surge alerts.
    let surge_alerts = h
        .sink
        .snapshot()
        .into_iter()
        .filter(|ev| matches!(ev, OutboundEvent::SystemAlert(SystemAlert::RegionalSurge { .. })))
        .count();
    assert!(surge_alerts >= 1);
}

#[test]
fn resolution_event_feeds_the_agent() {
    let h = harness(false);
    let resolved = serde_json::json!({
        "topic": "complaint_resolved",
        "data": {
            "ticketId": "TKT-5",
            "originalState": {
                "category": "Roads",
                "severity": "High",
                "workload": 0.4,
                "latitude": 12.9,
                "longitude": 77.6
            },
            "actionTaken": 2,
            "resolutionDays": 1.0
        }
    });
    let event = InboundEvent::from_json(resolved).expect("valid envelope");
    h.pipeline.handle(event);

    assert_eq!(h.agent.table_len(), 1);
    let snap = StateSnapshot {
        category: "Roads".to_string(),
        severity: "High".to_string(),
        workload: 0.4,
        latitude: 12.9,
        longitude: 77.6,
    };
    let values = h
        .agent
        .action_values(&civic_engine::services::StateVector::from_snapshot(&snap))
        .expect("updated row");
    assert!((values[2] - 2.5).abs() < 1e-9);
}

// ----------- Telemetry -----------

fn telemetry(kind: &str, value: f64) -> InboundEvent {
    InboundEvent::SensorTelemetry(SensorTelemetry {
        sensor_id: "WL-001".to_string(),
        kind: kind.to_string(),
        value,
        unit: "m".to_string(),
        location: "riverside".to_string(),
    })
}

#[test]
fn high_water_level_raises_a_flood_warning() {
    let cfg = PipelineConfig {
        assumed_rainfall_mm: 30.0,
        ..PipelineConfig::default()
    };
    let h = harness_with(false, false, 0, cfg);

    // risk = 0.6 * (4.0 / 5) + 0.4 * (30 / 50) = 0.72
    h.pipeline.handle(telemetry("water_level", 4.0));

    let events = h.sink.snapshot();
    assert_eq!(events.len(), 1);
    match &events[0] {
        OutboundEvent::SystemAlert(SystemAlert::FloodWarning {
            risk_score,
            location,
        }) => {
            assert!((risk_score - 0.72).abs() < 1e-9);
            assert_eq!(location.as_str(), "riverside");
        }
        other => panic!("expected flood warning, got {other:?}"),
    }
}

#[test]
fn low_water_and_other_sensor_kinds_stay_silent() {
    let h = harness(false);
    h.pipeline.handle(telemetry("water_level", 1.0));
    h.pipeline.handle(telemetry("temperature", 45.0));

    assert!(h.sink.snapshot().is_empty());
}

#[test]
fn flood_risk_is_weighted_and_capped() {
    assert!((flood_risk(2.5, 25.0) - 0.5).abs() < 1e-9);
    assert!((flood_risk(5.0, 50.0) - 1.0).abs() < 1e-9);
    // Readings past the ceilings clamp instead of overshooting.
    assert!((flood_risk(12.0, 400.0) - 1.0).abs() < 1e-9);
    assert!((flood_risk(0.0, 0.0)).abs() < 1e-9);
}

// ----------- Envelopes and dispatch -----------

#[test]
fn envelopes_parse_by_topic() {
    let raw = serde_json::json!({
        "topic": "vision_event",
        "data": {
            "sourceType": "cctv",
            "detectionType": "flooded_road",
            "severity": "HIGH",
            "confidence": 0.95,
            "location": "underpass 7"
        }
    });
    let event = InboundEvent::from_json(raw).expect("valid envelope");
    assert!(matches!(event, InboundEvent::VisionDetection(_)));
    assert_eq!(event.partition_key(), "underpass 7");

    let garbage = serde_json::json!({ "topic": "unknown_topic", "data": {} });
    assert!(InboundEvent::from_json(garbage).is_err());
}

#[test]
fn complaints_partition_by_district_when_present() {
    let with_district = complaint("TKT-1", Some("D1"));
    let without = complaint("TKT-1", None);
    assert_eq!(with_district.partition_key(), "D1");
    assert_eq!(without.partition_key(), "TKT-1");
}

#[test]
fn dispatcher_runs_events_to_completion_before_shutdown() {
    let h = harness(false);
    let dispatcher = Dispatcher::spawn(h.pipeline.clone(), 2);

    for i in 0..8 {
        dispatcher.dispatch(complaint(&format!("TKT-{i}"), Some("D1")));
    }
    // Malformed envelopes are dropped without killing a worker.
    dispatcher.dispatch_raw(serde_json::json!({ "topic": "nope" }));
    dispatcher.shutdown();

    assert_eq!(processed_events(&h.sink).len(), 8);
}
