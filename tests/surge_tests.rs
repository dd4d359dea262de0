use std::sync::Arc;

use civic_engine::config::SurgeConfig;
use civic_engine::events::{MemorySink, OutboundEvent, SystemAlert};
use civic_engine::services::audit::AuditLog;
use civic_engine::services::{SurgeDetector, SurgeStatus};

fn detector(sink: Arc<MemorySink>) -> SurgeDetector {
    SurgeDetector::new(SurgeConfig::default(), sink, Arc::new(AuditLog::disabled()))
}

fn surge_alerts(sink: &MemorySink) -> Vec<(String, usize, bool)> {
    sink.snapshot()
        .into_iter()
        .filter_map(|ev| match ev {
            OutboundEvent::SystemAlert(SystemAlert::RegionalSurge {
                district_id,
                count,
                is_disaster_mode,
                ..
            }) => Some((district_id, count, is_disaster_mode)),
            _ => None,
        })
        .collect()
}

#[test]
fn below_threshold_stays_quiet() {
    let sink = Arc::new(MemorySink::new());
    let det = detector(sink.clone());

    for _ in 0..4 {
        det.record_arrival("D1", 100.0);
    }
    let status = det.check_surge("D1", 100.0);

    assert_eq!(
        status,
        SurgeStatus {
            is_surge: false,
            is_disaster: false,
            count: 4
        }
    );
    assert!(surge_alerts(&sink).is_empty(), "no alert below threshold");
}

#[test]
fn fifth_arrival_in_window_is_a_surge() {
    let sink = Arc::new(MemorySink::new());
    let det = detector(sink.clone());

    for _ in 0..5 {
        det.record_arrival("D1", 100.0);
    }
    let status = det.check_surge("D1", 100.0);

    assert!(status.is_surge);
    assert!(!status.is_disaster);
    assert_eq!(status.count, 5);

    let alerts = surge_alerts(&sink);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0], ("D1".to_string(), 5, false));
}

#[test]
fn fifteen_arrivals_flip_disaster_mode() {
    let sink = Arc::new(MemorySink::new());
    let det = detector(sink.clone());

    for _ in 0..15 {
        det.record_arrival("D2", 50.0);
    }
    let status = det.check_surge("D2", 50.0);

    assert!(status.is_surge);
    assert!(status.is_disaster);
    assert_eq!(status.count, 15);

    let alerts = surge_alerts(&sink);
    assert_eq!(alerts.last(), Some(&("D2".to_string(), 15, true)));
}

#[test]
fn old_arrivals_age_out_of_the_window() {
    let sink = Arc::new(MemorySink::new());
    let det = detector(sink.clone());

    // Five arrivals at t=0 would surge; sixty seconds later they are all
    // outside the window.
    for _ in 0..5 {
        det.record_arrival("D3", 0.0);
    }
    det.record_arrival("D3", 30.0);

    let status = det.check_surge("D3", 60.0);
    assert!(!status.is_surge);
    assert_eq!(status.count, 1, "only the t=30 arrival survives");
}

#[test]
fn windows_are_isolated_per_district() {
    let sink = Arc::new(MemorySink::new());
    let det = detector(sink);

    for _ in 0..5 {
        det.record_arrival("D1", 10.0);
    }
    det.record_arrival("D2", 10.0);

    assert!(det.check_surge("D1", 10.0).is_surge);
    assert!(!det.check_surge("D2", 10.0).is_surge);
}

#[test]
fn unknown_and_empty_districts_are_noops() {
    let sink = Arc::new(MemorySink::new());
    let det = detector(sink.clone());

    det.record_arrival("", 10.0);
    let unknown = det.check_surge("NEVER_SEEN", 10.0);
    let empty = det.check_surge("", 10.0);

    assert_eq!(unknown.count, 0);
    assert!(!unknown.is_surge);
    assert_eq!(empty.count, 0);
    assert!(surge_alerts(&sink).is_empty());
}
