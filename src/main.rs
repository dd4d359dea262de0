use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::sync::Arc;

use rand::Rng;
use uuid::Uuid;

use civic_engine::EngineConfig;
use civic_engine::collaborators::{
    HeuristicEtaPredictor, KeywordClassifier, LengthSpamChecker, NoDuplicateChecker,
};
use civic_engine::events::{EventSink, FanoutSink, JsonlSink, MemorySink};
use civic_engine::services::federated::TrainingData;
use civic_engine::services::{
    AuditLog, Collaborators, Dispatcher, EventPipeline, FederatedCoordinator, FeedbackProcessor,
    OfficerDirectory, QLearningAgent, SurgeDetector,
};

const SAMPLE_COMPLAINTS: [&str; 6] = [
    "Huge pothole on the main road near the market, buses are swerving",
    "Water pipe burst flooding the street since last night",
    "Power outage across the whole block for three hours",
    "Garbage has not been collected for a week, smells terrible",
    "Traffic signal at the crossing is stuck on red",
    "Street light broken outside the school gate",
];

fn main() {
    eprintln!("Civic engine engaged...");

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Missing command. Try: civic-engine simulate | round | help");
        return;
    }

    let cfg = match EngineConfig::load(Path::new(".")) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("Config error: {err:#}. Using defaults.");
            EngineConfig::default()
        }
    };

    match args[1].as_str() {
        "simulate" => {
            let count = args
                .get(2)
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(10);
            simulate(&cfg, count);
        }

        "round" => {
            let districts = args
                .get(2)
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(2);
            run_round(&cfg, districts);
        }

        "help" => {
            println!("Available commands:");
            println!("  simulate <n>  - Push n synthetic complaints through the pipeline");
            println!("  round <d>     - Run one federated round across d simulated districts");
            println!("  help          - Show this help message");
        }
        unknown => {
            println!("Unknown command: {}", unknown);
        }
    }
}

fn simulate(cfg: &EngineConfig, count: usize) {
    let audit = Arc::new(AuditLog::from_config(&cfg.logbook));
    let memory = Arc::new(MemorySink::new());
    // Outbound events go to the JSONL event log and to the in-memory
    // recorder the summary below reads.
    let sink: Arc<dyn EventSink> = Arc::new(FanoutSink::new(vec![
        memory.clone() as Arc<dyn EventSink>,
        Arc::new(JsonlSink::new(cfg.logbook.events.clone())) as Arc<dyn EventSink>,
    ]));
    let surge = Arc::new(SurgeDetector::new(
        cfg.surge.clone(),
        sink.clone(),
        audit.clone(),
    ));
    let agent = Arc::new(QLearningAgent::new(cfg.agent.clone()));
    let directory = Arc::new(OfficerDirectory::default());
    let feedback = Arc::new(FeedbackProcessor::new(
        agent.clone(),
        audit.clone(),
        cfg.agent.save_every,
    ));
    let collaborators = Collaborators {
        classifier: Arc::new(KeywordClassifier),
        spam: Arc::new(LengthSpamChecker),
        duplicates: Arc::new(NoDuplicateChecker),
        eta: Arc::new(HeuristicEtaPredictor),
    };
    let pipeline = Arc::new(EventPipeline::new(
        cfg.pipeline.clone(),
        collaborators,
        surge,
        agent.clone(),
        directory,
        feedback,
        sink.clone(),
        audit,
    ));
    let dispatcher = Dispatcher::spawn(pipeline, cfg.pipeline.workers);

    let mut rng = rand::thread_rng();
    let districts = ["D-NORTH", "D-SOUTH", "D-EAST"];
    for i in 0..count {
        let district = districts[i % districts.len()];
        let text = SAMPLE_COMPLAINTS[rng.gen_range(0..SAMPLE_COMPLAINTS.len())];
        dispatcher.dispatch_raw(serde_json::json!({
            "topic": "complaint_submitted",
            "data": {
                "complaintId": Uuid::new_v4().to_string(),
                "ticketId": format!("TKT-{:04}", i),
                "description": text,
                "latitude": 12.9716 + rng.gen_range(-0.05..0.05),
                "longitude": 77.5946 + rng.gen_range(-0.05..0.05),
                "districtId": district,
            }
        }));
    }
    // One water-level reading for the telemetry path.
    dispatcher.dispatch_raw(serde_json::json!({
        "topic": "sensor_telemetry",
        "data": {
            "sensorId": "WL-007",
            "type": "water_level",
            "value": 4.6,
            "unit": "m",
            "location": "riverside pump station",
        }
    }));
    dispatcher.shutdown();

    let emitted = memory.take();
    println!("Simulated {} complaints.", count);
    for topic in ["complaint_processed", "complaint_rejected", "system_alert"] {
        let n = emitted.iter().filter(|e| e.topic() == topic).count();
        println!("  {topic}: {n}");
    }
    println!("Q-table states: {}", agent.table_len());
    if let Err(err) = agent.save_policy() {
        eprintln!("Policy save failed: {err:#}");
    }
}

fn run_round(cfg: &EngineConfig, districts: usize) {
    let audit = Arc::new(AuditLog::from_config(&cfg.logbook));
    let feature_dim = 8;
    let coordinator = FederatedCoordinator::new(cfg.federated.clone(), feature_dim, audit);

    let mut rng = rand::thread_rng();
    let mut data = BTreeMap::new();
    for d in 0..districts.max(1) {
        let samples: Vec<Vec<f64>> = (0..10)
            .map(|_| (0..feature_dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect();
        let labels: Vec<usize> = (0..10).map(|_| rng.gen_range(0..5)).collect();
        data.insert(format!("D{d}"), TrainingData { samples, labels });
    }

    match coordinator.run_round(&data) {
        Ok(summary) => {
            println!("Round {} complete.", summary.round);
            println!("  avg accuracy: {:.4}", summary.avg_accuracy);
            println!("  total samples: {}", summary.total_samples);
            for m in &summary.district_metrics {
                println!(
                    "  {}: accuracy {:.4} over {} samples",
                    m.district_id, m.accuracy, m.sample_size
                );
            }
        }
        Err(err) => eprintln!("Round failed: {err:#}"),
    }
}
