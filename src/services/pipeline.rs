//! services/pipeline.rs
//! Ordered event pipeline: topic dispatch plus the per-complaint workflow.
//!
//! The complaint workflow is strictly sequential with early exit:
//! spam → classify → duplicate → disaster override → ETA → routing → emit.
//! Every collaborator call is resolved to a documented fallback on failure
//! at its single call site; the pipeline degrades and continues, it never
//! aborts a handler because a collaborator misbehaved.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::collaborators::{
    Classifier, CollabError, DuplicateChecker, EtaEstimate, EtaPredictor, SpamChecker,
};
use crate::config::PipelineConfig;
use crate::events::{
    ComplaintAnalysis, ComplaintProcessed, ComplaintRejected, ComplaintSubmitted, EventSink,
    InboundEvent, OutboundEvent, SensorTelemetry, SystemAlert, VisionDetection,
};
use crate::services::agent::{QLearningAgent, StateVector};
use crate::services::audit::AuditLog;
use crate::services::feedback::FeedbackProcessor;
use crate::services::routing::OfficerDirectory;
use crate::services::surge::SurgeDetector;

/// Flood-risk linear combination: weights and normalization ceilings for
/// the two inputs (5 m water level and 50 mm forecast rainfall are the
/// critical marks).
const WATER_LEVEL_WEIGHT: f64 = 0.6;
const RAINFALL_WEIGHT: f64 = 0.4;
const WATER_LEVEL_CEILING_M: f64 = 5.0;
const RAINFALL_CEILING_MM: f64 = 50.0;

/// Complaint density fed to the ETA regressor until the density feed is
/// wired in.
const DEFAULT_DENSITY: f64 = 0.5;

/// External inference calls the pipeline consults, bundled for wiring.
pub struct Collaborators {
    pub classifier: Arc<dyn Classifier>,
    pub spam: Arc<dyn SpamChecker>,
    pub duplicates: Arc<dyn DuplicateChecker>,
    pub eta: Arc<dyn EtaPredictor>,
}

pub struct EventPipeline {
    cfg: PipelineConfig,
    collaborators: Collaborators,
    surge: Arc<SurgeDetector>,
    agent: Arc<QLearningAgent>,
    directory: Arc<OfficerDirectory>,
    feedback: Arc<FeedbackProcessor>,
    sink: Arc<dyn EventSink>,
    audit: Arc<AuditLog>,
}

impl EventPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: PipelineConfig,
        collaborators: Collaborators,
        surge: Arc<SurgeDetector>,
        agent: Arc<QLearningAgent>,
        directory: Arc<OfficerDirectory>,
        feedback: Arc<FeedbackProcessor>,
        sink: Arc<dyn EventSink>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            cfg,
            collaborators,
            surge,
            agent,
            directory,
            feedback,
            sink,
            audit,
        }
    }

    /// Handle one inbound event to completion. Runs on a partition worker;
    /// must never panic or abort the loop.
    pub fn handle(&self, event: InboundEvent) {
        match event {
            InboundEvent::ComplaintSubmitted(ev) => self.process_complaint(ev),
            InboundEvent::ComplaintResolved(ev) => self.feedback.process(&ev),
            InboundEvent::SensorTelemetry(ev) => self.process_telemetry(ev),
            InboundEvent::VisionDetection(ev) => self.process_vision(ev),
        }
    }

    fn process_complaint(&self, ev: ComplaintSubmitted) {
        let now = now_seconds();
        let district_id = ev.district_id.clone().unwrap_or_default();

        // Surge accounting first: the arrival counts toward the window the
        // rest of this handler reads.
        let surge = if district_id.is_empty() {
            None
        } else {
            self.surge.record_arrival(&district_id, now);
            Some(self.surge.check_surge(&district_id, now))
        };
        let is_disaster = surge.map(|s| s.is_disaster).unwrap_or(false);

        // 1. Spam gate — terminal on a hit, nothing else runs.
        let spam = self.resolve(
            "spam_check",
            || self.collaborators.spam.check_spam(&ev.description),
            |err| crate::collaborators::SpamVerdict::fallback(&err.to_string()),
        );
        if spam.is_spam {
            tracing::info!(ticket_id = %ev.ticket_id, score = spam.score, "complaint rejected as spam");
            self.audit.record_action(
                "pipeline",
                "complaint_rejected",
                &json!({ "ticketId": ev.ticket_id, "score": spam.score }),
                "low",
            );
            self.emit(OutboundEvent::ComplaintRejected(ComplaintRejected {
                complaint_id: ev.complaint_id,
                ticket_id: ev.ticket_id,
                reason: "SPAM_DETECTED".to_string(),
                score: spam.score,
                district_id: ev.district_id,
            }));
            return;
        }

        // 2. Classification.
        let analysis = self.resolve(
            "classify",
            || self.collaborators.classifier.classify(&ev.description),
            |err| crate::collaborators::Classification::fallback(&err.to_string()),
        );
        let category = analysis.category;
        let mut severity = analysis.severity;

        // 3. Duplicate detection (geo + semantic).
        let duplicate = self.resolve(
            "duplicate_check",
            || {
                self.collaborators
                    .duplicates
                    .check_duplicate(&ev.description, ev.latitude, ev.longitude)
            },
            |_| crate::collaborators::DuplicateVerdict::fallback(),
        );

        // 4./5. Disaster override trumps the ETA model's natural output.
        if is_disaster {
            severity = crate::collaborators::Severity::Critical;
        }
        let eta = if is_disaster {
            EtaEstimate::from_days(1.0)
        } else {
            self.resolve(
                "eta_predict",
                || {
                    self.collaborators
                        .eta
                        .predict_eta(category, severity, DEFAULT_DENSITY)
                },
                |_| EtaEstimate::fallback(severity, DEFAULT_DENSITY),
            )
        };

        // 6. Routing: the agent picks, the directory maps to an officer.
        let workload = self.directory.workload_fraction(category);
        let state = StateVector::new(category, severity, workload, ev.latitude, ev.longitude);
        let action = self.agent.select_action(&state);
        let decision = self.directory.route(category, severity, action);

        let status = if decision.officer_id.is_some() {
            "IN_PROGRESS"
        } else {
            "PENDING"
        };

        tracing::info!(
            ticket_id = %ev.ticket_id,
            category = category.as_str(),
            severity = severity.as_str(),
            action,
            is_disaster,
            "complaint processed"
        );
        self.audit.record_action(
            "pipeline",
            "complaint_processed",
            &json!({
                "ticketId": ev.ticket_id,
                "category": category.as_str(),
                "severity": severity.as_str(),
                "action": action,
                "isDisasterMode": is_disaster,
                "preview": self.audit.redact_preview(&ev.description),
            }),
            "low",
        );

        self.emit(OutboundEvent::ComplaintProcessed(ComplaintProcessed {
            complaint_id: ev.complaint_id,
            ticket_id: ev.ticket_id,
            is_disaster_mode: is_disaster,
            analysis: ComplaintAnalysis {
                category: category.as_str().to_string(),
                severity: severity.as_str().to_string(),
                confidence: analysis.confidence,
                reasoning: analysis.reasoning,
            },
            is_duplicate: duplicate.is_duplicate,
            status: status.to_string(),
            assigned_officer: decision.officer_id,
            department: decision.department,
            priority: decision.priority.as_str().to_string(),
            eta_days: eta.days,
            original_state: state.to_snapshot(),
            action_taken: action,
            state_id: ev.state_id,
            district_id: ev.district_id,
            city_id: ev.city_id,
            ward_id: ev.ward_id,
        }));
    }

    /// Sensor telemetry takes the short path: water-level readings feed the
    /// flood-risk score; everything else is recorded and ignored here.
    fn process_telemetry(&self, ev: SensorTelemetry) {
        if ev.kind != "water_level" {
            tracing::debug!(sensor_id = %ev.sensor_id, kind = %ev.kind, "telemetry ignored");
            return;
        }
        let risk = flood_risk(ev.value, self.cfg.assumed_rainfall_mm);
        if risk > self.cfg.flood_risk_threshold {
            tracing::warn!(sensor_id = %ev.sensor_id, risk, "flood warning");
            self.audit.record_alert(
                "FLOOD_WARNING",
                &json!({ "sensorId": ev.sensor_id, "riskScore": risk, "location": ev.location }),
            );
            self.emit(OutboundEvent::SystemAlert(SystemAlert::FloodWarning {
                risk_score: risk,
                location: ev.location,
            }));
        }
    }

    /// High-severity vision detections are logged for auto-escalation; the
    /// synthetic complaint itself is constructed upstream.
    fn process_vision(&self, ev: VisionDetection) {
        if ev.severity == "HIGH" {
            tracing::info!(
                detection = %ev.detection_type,
                location = %ev.location,
                "auto-escalating high-severity vision detection"
            );
            self.audit.record_action(
                "pipeline",
                "vision_escalation",
                &json!({
                    "detectionType": ev.detection_type,
                    "sourceType": ev.source_type,
                    "confidence": ev.confidence,
                    "location": ev.location,
                }),
                "high",
            );
        }
    }

    /// Single fallback-resolution step per collaborator call site: run the
    /// call, and on failure log the failure kind, audit it, and continue
    /// with the stage's documented fallback value.
    ///
    /// The configured time bound governs whether a returned answer is
    /// trusted, not how long the call may block: an answer arriving after
    /// the bound is discarded as a timeout, but a collaborator that never
    /// returns still holds its partition. Bounding the block itself is the
    /// collaborator client's job.
    fn resolve<T>(
        &self,
        stage: &str,
        call: impl FnOnce() -> Result<T, CollabError>,
        fallback: impl FnOnce(&CollabError) -> T,
    ) -> T {
        let deadline = Duration::from_millis(self.cfg.collaborator_timeout_ms);
        let started = Instant::now();
        let result = call();
        let result = match result {
            Ok(_) if started.elapsed() > deadline => Err(CollabError::Timeout(deadline)),
            other => other,
        };
        match result {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(stage, %err, "collaborator failed; using fallback");
                self.audit.record_action(
                    "pipeline",
                    "collaborator_fallback",
                    &json!({ "stage": stage, "error": err.to_string() }),
                    "medium",
                );
                fallback(&err)
            }
        }
    }

    fn emit(&self, event: OutboundEvent) {
        if let Err(err) = self.sink.emit(event) {
            tracing::error!(%err, "event sink failed");
        }
    }
}

/// Flood risk in 0..=1 from a water-level reading (m) and forecast
/// rainfall (mm), rounded to two decimals.
pub fn flood_risk(water_level_m: f64, rainfall_mm: f64) -> f64 {
    let normalized_wl = (water_level_m / WATER_LEVEL_CEILING_M).min(1.0);
    let normalized_rain = (rainfall_mm / RAINFALL_CEILING_MM).min(1.0);
    let score = normalized_wl * WATER_LEVEL_WEIGHT + normalized_rain * RAINFALL_WEIGHT;
    (score * 100.0).round() / 100.0
}

fn now_seconds() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}
