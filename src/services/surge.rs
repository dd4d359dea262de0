//! services/surge.rs
//! Per-district sliding-window surge detection.
//!
//! - Owns the district → arrival-window map behind a single mutex; callers
//!   never see the map, only `record_arrival` / `check_surge`.
//! - Windows are pruned lazily on every check, so each check both prunes
//!   and re-measures. Callers check once per arrival to keep the window
//!   accurate.

use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::config::SurgeConfig;
use crate::events::{EventSink, OutboundEvent, SystemAlert};
use crate::services::audit::AuditLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurgeStatus {
    pub is_surge: bool,
    pub is_disaster: bool,
    pub count: usize,
}

impl SurgeStatus {
    fn quiet() -> Self {
        Self {
            is_surge: false,
            is_disaster: false,
            count: 0,
        }
    }
}

pub struct SurgeDetector {
    cfg: SurgeConfig,
    /// district id -> arrival timestamps (seconds), oldest first.
    windows: Mutex<HashMap<String, VecDeque<f64>>>,
    sink: Arc<dyn EventSink>,
    audit: Arc<AuditLog>,
}

impl SurgeDetector {
    pub fn new(cfg: SurgeConfig, sink: Arc<dyn EventSink>, audit: Arc<AuditLog>) -> Self {
        Self {
            cfg,
            windows: Mutex::new(HashMap::new()),
            sink,
            audit,
        }
    }

    /// Append one arrival timestamp for a district. Empty ids are ignored.
    pub fn record_arrival(&self, district_id: &str, ts: f64) {
        if district_id.is_empty() {
            return;
        }
        let mut windows = match self.windows.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        windows
            .entry(district_id.to_string())
            .or_default()
            .push_back(ts);
    }

    /// Prune the district's window to the last `window_seconds`, then
    /// measure it. Emits a `REGIONAL_SURGE` alert when the surge threshold
    /// is met. Unknown or empty district ids are a no-op.
    pub fn check_surge(&self, district_id: &str, now: f64) -> SurgeStatus {
        if district_id.is_empty() {
            return SurgeStatus::quiet();
        }

        let count = {
            let mut windows = match self.windows.lock() {
                Ok(w) => w,
                Err(poisoned) => poisoned.into_inner(),
            };
            let Some(window) = windows.get_mut(district_id) else {
                return SurgeStatus::quiet();
            };
            while let Some(&oldest) = window.front() {
                if now - oldest >= self.cfg.window_seconds {
                    window.pop_front();
                } else {
                    break;
                }
            }
            window.len()
        };

        let is_surge = count >= self.cfg.surge_threshold;
        let is_disaster = count >= self.cfg.disaster_threshold;

        if is_surge {
            tracing::warn!(district_id, count, "regional surge detected");
            self.audit.record_alert(
                "REGIONAL_SURGE",
                &json!({ "districtId": district_id, "count": count, "isDisasterMode": is_disaster }),
            );
            let alert = OutboundEvent::SystemAlert(SystemAlert::RegionalSurge {
                district_id: district_id.to_string(),
                count,
                window_seconds: self.cfg.window_seconds,
                is_disaster_mode: is_disaster,
            });
            // Alerting must never stall the consumer loop.
            if let Err(err) = self.sink.emit(alert) {
                tracing::error!(%err, "failed to emit surge alert");
            }
        }

        SurgeStatus {
            is_surge,
            is_disaster,
            count,
        }
    }
}
