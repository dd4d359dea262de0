//! services/federated.rs
//! Federated reconciliation of per-district model updates.
//!
//! - [`SecureAggregator`]: sample-size-weighted averaging with Laplace
//!   noise added after the average (the privacy step), plus an advisory
//!   drift score between global and local weights.
//! - [`DistrictNode`]: a simulated regional trainer — a tiny linear scorer
//!   trained for a bounded number of epochs against the supplied samples.
//! - [`FederatedCoordinator`]: owns the global weights, the node registry,
//!   and the append-only round history. Rounds are single-flight; history
//!   reads never block a round in progress.
//!
//! Weight tensors are opaque to the aggregation logic: only shape and
//! elementwise arithmetic matter, and global/district copies are
//! independent values, never aliased.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::config::FederatedConfig;
use crate::services::audit::AuditLog;

/// Ordered list of numeric tensors.
pub type ModelWeights = Vec<Vec<f64>>;

/// Distinct routing outcomes the simulated classifier scores.
pub const CLASS_COUNT: usize = 5;

/// Step size for the simulated local training.
const LOCAL_LR: f64 = 0.05;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingData {
    pub samples: Vec<Vec<f64>>,
    pub labels: Vec<usize>,
}

impl TrainingData {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistrictMetrics {
    pub district_id: String,
    pub accuracy: f64,
    pub sample_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FederatedRound {
    pub round: u64,
    pub avg_accuracy: f64,
    pub district_metrics: Vec<DistrictMetrics>,
    pub total_samples: usize,
    pub timestamp: DateTime<Utc>,
}

// ----------- Secure aggregation -----------

pub struct SecureAggregator {
    dp_epsilon: f64,
    dp_delta: f64,
    rng: Mutex<StdRng>,
}

impl SecureAggregator {
    pub fn new(dp_epsilon: f64, dp_delta: f64) -> Self {
        Self {
            dp_epsilon,
            dp_delta,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(dp_epsilon: f64, dp_delta: f64, seed: u64) -> Self {
        Self {
            dp_epsilon,
            dp_delta,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// The `(epsilon, delta)` pair this aggregator operates under, for
    /// audit records.
    pub fn privacy_params(&self) -> (f64, f64) {
        (self.dp_epsilon, self.dp_delta)
    }

    /// Sample-size-weighted mean of the district weights, with independent
    /// Laplace noise of scale `dp_epsilon` added to every element after
    /// averaging. Returns `None` for an empty or inconsistent collection.
    /// A zero noise scale yields the exact weighted mean.
    pub fn federated_average(
        &self,
        district_weights: &[ModelWeights],
        sample_sizes: &[usize],
    ) -> Option<ModelWeights> {
        if district_weights.is_empty() || district_weights.len() != sample_sizes.len() {
            return None;
        }
        let total: usize = sample_sizes.iter().sum();
        if total == 0 {
            return None;
        }

        let mut rng = match self.rng.lock() {
            Ok(r) => r,
            Err(poisoned) => poisoned.into_inner(),
        };

        let template = &district_weights[0];
        let mut averaged: ModelWeights = Vec::with_capacity(template.len());
        for tensor_idx in 0..template.len() {
            let mut tensor = vec![0.0; template[tensor_idx].len()];
            for (weights, &size) in district_weights.iter().zip(sample_sizes) {
                let share = size as f64 / total as f64;
                let layer = weights.get(tensor_idx)?;
                if layer.len() != tensor.len() {
                    tracing::warn!(tensor_idx, "district weight shapes disagree; aborting average");
                    return None;
                }
                for (acc, &w) in tensor.iter_mut().zip(layer) {
                    *acc += w * share;
                }
            }
            for value in tensor.iter_mut() {
                *value += sample_laplace(&mut rng, self.dp_epsilon);
            }
            averaged.push(tensor);
        }
        Some(averaged)
    }

    /// Average per-tensor Euclidean distance between global and local
    /// weights. Purely advisory: flags a district for review, never blocks
    /// aggregation.
    pub fn check_drift(
        &self,
        global: &ModelWeights,
        local: &ModelWeights,
        threshold: f64,
    ) -> (bool, f64) {
        if global.is_empty() || global.len() != local.len() {
            return (false, 0.0);
        }
        let mut total = 0.0;
        for (g, l) in global.iter().zip(local) {
            let sq: f64 = g
                .iter()
                .zip(l)
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            total += sq.sqrt();
        }
        let avg = total / global.len() as f64;
        (avg > threshold, avg)
    }
}

/// Laplace(0, scale) sample via inverse CDF. Scale zero disables noise.
fn sample_laplace(rng: &mut StdRng, scale: f64) -> f64 {
    if scale <= 0.0 {
        return 0.0;
    }
    let u: f64 = rng.gen_range(0.0..1.0) - 0.5;
    -scale * u.signum() * (1.0 - 2.0 * u.abs()).ln()
}

// ----------- District node -----------

/// Simulated per-district trainer holding a local copy of the model: a
/// dense score tensor (`class * feature`) plus a bias tensor.
pub struct DistrictNode {
    pub district_id: String,
    weights: ModelWeights,
    feature_dim: usize,
    pub last_sample_count: usize,
}

impl DistrictNode {
    pub fn new(district_id: &str, feature_dim: usize) -> Self {
        Self {
            district_id: district_id.to_string(),
            weights: zero_weights(feature_dim),
            feature_dim,
            last_sample_count: 0,
        }
    }

    /// Replace the local weights with the coordinator's global copy.
    pub fn sync_from_global(&mut self, global: &ModelWeights) {
        self.weights = global.clone();
    }

    pub fn weights(&self) -> &ModelWeights {
        &self.weights
    }

    /// Bounded-epoch perceptron pass over the district's samples. Returns
    /// the updated weights and the sample count used for weighting.
    pub fn train(&mut self, data: &TrainingData, epochs: usize) -> (ModelWeights, usize) {
        for _ in 0..epochs {
            for (sample, &label) in data.samples.iter().zip(&data.labels) {
                if label >= CLASS_COUNT {
                    continue;
                }
                let predicted = self.predict(sample);
                if predicted == label {
                    continue;
                }
                for f in 0..self.feature_dim.min(sample.len()) {
                    self.weights[0][label * self.feature_dim + f] += LOCAL_LR * sample[f];
                    self.weights[0][predicted * self.feature_dim + f] -= LOCAL_LR * sample[f];
                }
                self.weights[1][label] += LOCAL_LR;
                self.weights[1][predicted] -= LOCAL_LR;
            }
        }
        self.last_sample_count = data.len();
        (self.weights.clone(), data.len())
    }

    /// Fraction of samples whose argmax score matches the label.
    pub fn evaluate(&self, data: &TrainingData) -> DistrictMetrics {
        let mut correct = 0usize;
        for (sample, &label) in data.samples.iter().zip(&data.labels) {
            if self.predict(sample) == label {
                correct += 1;
            }
        }
        let accuracy = if data.is_empty() {
            0.0
        } else {
            correct as f64 / data.len() as f64
        };
        DistrictMetrics {
            district_id: self.district_id.clone(),
            accuracy,
            sample_size: data.len(),
        }
    }

    fn predict(&self, sample: &[f64]) -> usize {
        let mut best = 0;
        let mut best_score = f64::NEG_INFINITY;
        for class in 0..CLASS_COUNT {
            let mut score = self.weights[1][class];
            for f in 0..self.feature_dim.min(sample.len()) {
                score += self.weights[0][class * self.feature_dim + f] * sample[f];
            }
            if score > best_score {
                best_score = score;
                best = class;
            }
        }
        best
    }
}

pub fn zero_weights(feature_dim: usize) -> ModelWeights {
    vec![vec![0.0; CLASS_COUNT * feature_dim], vec![0.0; CLASS_COUNT]]
}

// ----------- Coordinator -----------

struct CoordinatorState {
    round: u64,
    global: ModelWeights,
    nodes: HashMap<String, DistrictNode>,
}

pub struct FederatedCoordinator {
    cfg: FederatedConfig,
    feature_dim: usize,
    aggregator: SecureAggregator,
    audit: Arc<AuditLog>,
    /// Round counter, global weights, and node registry move together;
    /// holding this mutex is what makes a round single-flight.
    state: Mutex<CoordinatorState>,
    /// Published summaries live apart from the round state so dashboard
    /// reads never block a round in progress.
    history: RwLock<Vec<FederatedRound>>,
}

impl FederatedCoordinator {
    pub fn new(cfg: FederatedConfig, feature_dim: usize, audit: Arc<AuditLog>) -> Self {
        let aggregator = SecureAggregator::new(cfg.dp_epsilon, cfg.dp_delta);
        Self::with_aggregator(cfg, feature_dim, aggregator, audit)
    }

    pub fn with_aggregator(
        cfg: FederatedConfig,
        feature_dim: usize,
        aggregator: SecureAggregator,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            cfg,
            feature_dim,
            aggregator,
            audit,
            state: Mutex::new(CoordinatorState {
                round: 0,
                global: zero_weights(feature_dim),
                nodes: HashMap::new(),
            }),
            history: RwLock::new(Vec::new()),
        }
    }

    /// Run one federated round over the supplied per-district data:
    /// sync → train → evaluate → aggregate → publish.
    ///
    /// A second caller queues on the state mutex, so round-counter
    /// increments and global-weight writes never interleave. A district
    /// whose local training exceeds the configured budget is excluded from
    /// this round's aggregation instead of stalling it. If aggregation
    /// yields nothing (zero districts), the global weights are left as-is
    /// and the round records zero samples.
    pub fn run_round(&self, data: &BTreeMap<String, TrainingData>) -> Result<FederatedRound> {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.round += 1;
        let round = state.round;
        tracing::info!(round, districts = data.len(), "starting federated round");

        let budget = Duration::from_millis(self.cfg.training_budget_ms);
        let mut district_weights: Vec<ModelWeights> = Vec::new();
        let mut sample_sizes: Vec<usize> = Vec::new();
        let mut metrics: Vec<DistrictMetrics> = Vec::new();

        let state_ref = &mut *state;
        for (district_id, district_data) in data {
            let global = state_ref.global.clone();
            let node = state_ref.nodes.entry(district_id.clone()).or_insert_with(|| {
                tracing::info!(district_id, "registered district node");
                DistrictNode::new(district_id, self.feature_dim)
            });
            node.sync_from_global(&global);

            let started = Instant::now();
            let (weights, size) = node.train(district_data, self.cfg.local_epochs);
            if started.elapsed() > budget {
                tracing::warn!(
                    district_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "district exceeded training budget; excluded from aggregation"
                );
                self.audit.record_action(
                    "federated",
                    "district_excluded",
                    &json!({ "districtId": district_id, "round": round }),
                    "medium",
                );
                continue;
            }

            let (drifting, drift) =
                self.aggregator
                    .check_drift(&global, &weights, self.cfg.drift_threshold);
            if drifting {
                tracing::warn!(district_id, drift, "district model drifting from global");
                self.audit.record_action(
                    "federated",
                    "drift_flagged",
                    &json!({ "districtId": district_id, "round": round, "drift": drift }),
                    "medium",
                );
            }

            metrics.push(node.evaluate(district_data));
            district_weights.push(weights);
            sample_sizes.push(size);
        }

        match self
            .aggregator
            .federated_average(&district_weights, &sample_sizes)
        {
            Some(aggregated) => {
                state.global = aggregated;
                let (dp_epsilon, dp_delta) = self.aggregator.privacy_params();
                self.audit.record_action(
                    "federated",
                    "round_aggregated",
                    &json!({
                        "round": round,
                        "districts": sample_sizes.len(),
                        "dpEpsilon": dp_epsilon,
                        "dpDelta": dp_delta,
                    }),
                    "low",
                );
            }
            None => {
                tracing::warn!(round, "empty aggregation input; keeping previous global weights")
            }
        }

        let total_samples: usize = sample_sizes.iter().sum();
        let avg_accuracy = if metrics.is_empty() {
            0.0
        } else {
            metrics.iter().map(|m| m.accuracy).sum::<f64>() / metrics.len() as f64
        };
        let summary = FederatedRound {
            round,
            avg_accuracy,
            district_metrics: metrics,
            total_samples,
            timestamp: Utc::now(),
        };

        drop(state);
        if let Ok(mut history) = self.history.write() {
            history.push(summary.clone());
        }
        tracing::info!(round, avg_accuracy, total_samples, "federated round complete");
        Ok(summary)
    }

    /// Most recent round summary, if any round has completed.
    pub fn latest(&self) -> Option<FederatedRound> {
        self.history
            .read()
            .ok()
            .and_then(|h| h.last().cloned())
    }

    /// Full append-only round history, newest last.
    pub fn history(&self) -> Vec<FederatedRound> {
        self.history
            .read()
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the current global weights.
    pub fn global_weights(&self) -> ModelWeights {
        match self.state.lock() {
            Ok(state) => state.global.clone(),
            Err(poisoned) => poisoned.into_inner().global.clone(),
        }
    }

    pub fn registered_districts(&self) -> usize {
        match self.state.lock() {
            Ok(state) => state.nodes.len(),
            Err(poisoned) => poisoned.into_inner().nodes.len(),
        }
    }
}
