//! services/agent.rs
//! Tabular Q-learning routing agent.
//!
//! - Sparse state→action-value table keyed by the discretized state vector
//!   (one-decimal buckets, same bucketing used for persistence).
//! - Read lock on the table for action selection, write lock for the
//!   TD update; exploration randomness comes from a mutex-guarded `StdRng`.
//! - Policy survives restarts: the whole table round-trips through the
//!   shared SQLite file in one transaction, so a concurrent load never sees
//!   a torn save. Load failures are non-fatal.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rusqlite::{Connection, params};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

use crate::collaborators::{Category, Severity};
use crate::config::AgentConfig;
use crate::events::StateSnapshot;

/// 5-tuple routing state derived from a complaint's classification and
/// routing context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateVector {
    pub category_idx: usize,
    pub severity_idx: usize,
    /// Normalized department workload, 0..=1.
    pub workload: f64,
    pub latitude: f64,
    pub longitude: f64,
}

impl StateVector {
    pub fn new(
        category: Category,
        severity: Severity,
        workload: f64,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        Self {
            category_idx: category.index(),
            severity_idx: severity.index(),
            workload: workload.clamp(0.0, 1.0),
            latitude,
            longitude,
        }
    }

    pub fn from_snapshot(snap: &StateSnapshot) -> Self {
        Self::new(
            Category::parse(&snap.category),
            Severity::parse(&snap.severity),
            snap.workload,
            snap.latitude,
            snap.longitude,
        )
    }

    pub fn to_snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            category: crate::collaborators::CATEGORIES
                [self.category_idx.min(crate::collaborators::CATEGORIES.len() - 1)]
            .to_string(),
            severity: crate::collaborators::SEVERITIES
                [self.severity_idx.min(crate::collaborators::SEVERITIES.len() - 1)]
            .to_string(),
            workload: self.workload,
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    /// Discretize to one-decimal precision. This is the bucketing function
    /// for the sparse table: distinct states that round to the same key
    /// share an entry.
    pub fn key(&self) -> String {
        format!(
            "{:.1}|{:.1}|{:.1}|{:.1}|{:.1}",
            self.category_idx as f64,
            self.severity_idx as f64,
            self.workload,
            self.latitude,
            self.longitude
        )
    }
}

pub struct QLearningAgent {
    cfg: AgentConfig,
    table: RwLock<HashMap<String, Vec<f64>>>,
    rng: Mutex<StdRng>,
    db_path: PathBuf,
}

impl QLearningAgent {
    /// Construct the agent and attempt to restore a previously saved
    /// policy. A missing or unreadable policy is logged and ignored; the
    /// agent starts with an empty table.
    pub fn new(cfg: AgentConfig) -> Self {
        let agent = Self {
            db_path: cfg.policy_path.clone(),
            cfg,
            table: RwLock::new(HashMap::new()),
            rng: Mutex::new(StdRng::from_entropy()),
        };
        if let Err(err) = agent.load_policy() {
            tracing::warn!(%err, "failed to load RL policy; starting fresh");
        }
        agent
    }

    /// Deterministic-exploration constructor (primarily for tests).
    pub fn with_seed(cfg: AgentConfig, seed: u64) -> Self {
        let agent = Self {
            db_path: cfg.policy_path.clone(),
            cfg,
            table: RwLock::new(HashMap::new()),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        };
        if let Err(err) = agent.load_policy() {
            tracing::warn!(%err, "failed to load RL policy; starting fresh");
        }
        agent
    }

    pub fn action_count(&self) -> usize {
        self.cfg.action_count
    }

    fn random_action(&self) -> usize {
        let mut rng = match self.rng.lock() {
            Ok(r) => r,
            Err(poisoned) => poisoned.into_inner(),
        };
        rng.gen_range(0..self.cfg.action_count)
    }

    fn explore(&self) -> bool {
        let mut rng = match self.rng.lock() {
            Ok(r) => r,
            Err(poisoned) => poisoned.into_inner(),
        };
        rng.gen_range(0.0..1.0) < self.cfg.epsilon
    }

    /// Epsilon-greedy action selection.
    ///
    /// Never-seen states return a uniformly random action without creating
    /// a table entry (cold start); greedy ties break to the lowest index.
    pub fn select_action(&self, state: &StateVector) -> usize {
        if self.explore() {
            return self.random_action();
        }

        let table = match self.table.read() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        };
        match table.get(&state.key()) {
            Some(values) => argmax(values),
            None => {
                drop(table);
                self.random_action()
            }
        }
    }

    /// Off-policy TD update: `Q(s,a) += lr * (r + gamma * max Q(s',·) - Q(s,a))`.
    /// Entries for both states are zero-initialized lazily.
    pub fn update(&self, state: &StateVector, action: usize, reward: f64, next_state: &StateVector) {
        if action >= self.cfg.action_count {
            tracing::warn!(action, "ignoring update with out-of-range action");
            return;
        }
        let state_key = state.key();
        let next_key = next_state.key();
        let zeros = vec![0.0; self.cfg.action_count];

        let mut table = match self.table.write() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.entry(next_key.clone()).or_insert_with(|| zeros.clone());
        table.entry(state_key.clone()).or_insert_with(|| zeros.clone());

        let best_next = table[&next_key][argmax(&table[&next_key])];
        let td_target = reward + self.cfg.discount_factor * best_next;
        let current = table[&state_key][action];
        let td_error = td_target - current;
        if let Some(values) = table.get_mut(&state_key) {
            values[action] = current + self.cfg.learning_rate * td_error;
        }
    }

    /// Current action values for a state, if the state has ever been
    /// updated. Snapshot copy; never blocks writers for long.
    pub fn action_values(&self, state: &StateVector) -> Option<Vec<f64>> {
        let table = match self.table.read() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.get(&state.key()).cloned()
    }

    pub fn table_len(&self) -> usize {
        match self.table.read() {
            Ok(t) => t.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn conn(&self) -> Result<Connection> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Connection::open(&self.db_path)?)
    }

    /// Persist the entire table. Runs in one transaction so a concurrent
    /// `load_policy` sees either the old table or the new one, never a mix.
    pub fn save_policy(&self) -> Result<()> {
        let snapshot: Vec<(String, String)> = {
            let table = match self.table.read() {
                Ok(t) => t,
                Err(poisoned) => poisoned.into_inner(),
            };
            table
                .iter()
                .map(|(k, v)| Ok((k.clone(), serde_json::to_string(v)?)))
                .collect::<Result<_>>()?
        };

        let mut conn = self.conn()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS q_values (
                state_key     TEXT PRIMARY KEY,
                action_values TEXT NOT NULL,
                updated_ms    INTEGER NOT NULL
             )",
            [],
        )?;
        let now_ms = chrono::Utc::now().timestamp_millis();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM q_values", [])?;
        for (key, values_json) in &snapshot {
            tx.execute(
                "INSERT INTO q_values (state_key, action_values, updated_ms) VALUES (?1, ?2, ?3)",
                params![key, values_json, now_ms],
            )?;
        }
        tx.commit()?;
        tracing::info!(states = snapshot.len(), "RL policy saved");
        Ok(())
    }

    /// Restore the table from disk. A missing file or missing table is
    /// benign (empty policy); rows with the wrong action count are skipped.
    pub fn load_policy(&self) -> Result<()> {
        if !self.db_path.exists() {
            return Ok(());
        }
        let conn = Connection::open(&self.db_path)?;
        let mut stmt = match conn.prepare("SELECT state_key, action_values FROM q_values") {
            Ok(s) => s,
            Err(e) => {
                // Only treat a missing table as benign; propagate other errors.
                if e.to_string().contains("no such table") {
                    return Ok(());
                }
                return Err(e.into());
            }
        };

        let mut loaded: HashMap<String, Vec<f64>> = HashMap::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            let values_json: String = row.get(1)?;
            match serde_json::from_str::<Vec<f64>>(&values_json) {
                Ok(values) if values.len() == self.cfg.action_count => {
                    loaded.insert(key, values);
                }
                Ok(_) => tracing::warn!(key, "skipping policy row with wrong action count"),
                Err(err) => tracing::warn!(key, %err, "skipping unreadable policy row"),
            }
        }

        let count = loaded.len();
        let mut table = match self.table.write() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        };
        *table = loaded;
        tracing::info!(states = count, "RL policy loaded");
        Ok(())
    }
}

/// Index of the maximum value; ties break to the lowest index.
fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (idx, &value) in values.iter().enumerate().skip(1) {
        if value > values[best] {
            best = idx;
        }
    }
    best
}
