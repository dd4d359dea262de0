use std::sync::Arc;

use civic_engine::events::{
    ComplaintRejected, EventSink, FanoutSink, JsonlSink, MemorySink, OutboundEvent,
};

fn rejected(ticket: &str) -> OutboundEvent {
    OutboundEvent::ComplaintRejected(ComplaintRejected {
        complaint_id: format!("c-{ticket}"),
        ticket_id: ticket.to_string(),
        reason: "SPAM_DETECTED".to_string(),
        score: 0.9,
        district_id: None,
    })
}

#[test]
fn jsonl_sink_appends_one_envelope_per_line() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("logbook/events.jsonl");
    let sink = JsonlSink::new(path.clone());

    sink.emit(rejected("TKT-1")).expect("emit");
    sink.emit(rejected("TKT-2")).expect("emit");

    let text = std::fs::read_to_string(&path).expect("read");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);

    let first: serde_json::Value = serde_json::from_str(lines[0]).expect("valid json line");
    assert_eq!(first["topic"], "complaint_rejected");
    assert_eq!(first["data"]["ComplaintRejected"]["ticketId"], "TKT-1");
    assert!(first["timestamp"].is_string());
}

#[test]
fn fanout_delivers_to_every_sink() {
    let a = Arc::new(MemorySink::new());
    let b = Arc::new(MemorySink::new());
    let fanout = FanoutSink::new(vec![
        a.clone() as Arc<dyn EventSink>,
        b.clone() as Arc<dyn EventSink>,
    ]);

    fanout.emit(rejected("TKT-1")).expect("emit");

    assert_eq!(a.snapshot().len(), 1);
    assert_eq!(b.snapshot().len(), 1);
}

#[test]
fn fanout_failure_does_not_starve_later_sinks() {
    struct FailingSink;
    impl EventSink for FailingSink {
        fn emit(&self, _event: OutboundEvent) -> anyhow::Result<()> {
            anyhow::bail!("sink down")
        }
    }

    let survivor = Arc::new(MemorySink::new());
    let fanout = FanoutSink::new(vec![
        Arc::new(FailingSink) as Arc<dyn EventSink>,
        survivor.clone() as Arc<dyn EventSink>,
    ]);

    assert!(fanout.emit(rejected("TKT-1")).is_err());
    assert_eq!(survivor.snapshot().len(), 1);
}
