// src/services/mod.rs

pub mod agent;     // tabular Q-learning routing agent + policy persistence
pub mod audit;     // JSONL action/alert logbook
pub mod dispatch;  // partitioned consumer loop
pub mod federated; // secure aggregation, district nodes, round coordinator
pub mod feedback;  // resolution events -> reward-weighted agent updates
pub mod pipeline;  // topic dispatch + the per-complaint workflow
pub mod reward;    // outcome -> scalar reward
pub mod routing;   // officer directory, action -> officer/priority mapping
pub mod surge;     // per-district sliding-window surge detection

// Public API
pub use agent::{QLearningAgent, StateVector};
pub use audit::AuditLog;
pub use dispatch::Dispatcher;
pub use federated::{FederatedCoordinator, SecureAggregator};
pub use feedback::FeedbackProcessor;
pub use pipeline::{Collaborators, EventPipeline};
pub use routing::OfficerDirectory;
pub use surge::{SurgeDetector, SurgeStatus};
