use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub surge: SurgeConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub federated: FederatedConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logbook: LogbookConfig,
}

impl EngineConfig {
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join("config.toml");
        let mut cfg = if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str::<EngineConfig>(&text)
                .with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            tracing::info!(
                "No config file found at {}. Using EngineConfig::default().",
                path.display()
            );
            EngineConfig::default()
        };
        cfg.resolve_paths(root);
        Ok(cfg)
    }

    fn resolve_paths(&mut self, root: &Path) {
        self.agent.policy_path = absolutize(root, &self.agent.policy_path);
        self.logbook.actions = absolutize(root, &self.logbook.actions);
        self.logbook.alerts = absolutize(root, &self.logbook.alerts);
        self.logbook.events = absolutize(root, &self.logbook.events);
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            system: SystemConfig::default(),
            surge: SurgeConfig::default(),
            agent: AgentConfig::default(),
            federated: FederatedConfig::default(),
            pipeline: PipelineConfig::default(),
            logbook: LogbookConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "SystemConfig::default_name")]
    pub name: String,
    #[serde(default = "SystemConfig::default_version")]
    pub version: String,
}

impl SystemConfig {
    fn default_name() -> String {
        "civic-engine".to_string()
    }

    fn default_version() -> String {
        "0.1.0".to_string()
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            version: Self::default_version(),
        }
    }
}

/// Sliding-window thresholds for regional surge / disaster detection.
#[derive(Debug, Clone, Deserialize)]
pub struct SurgeConfig {
    #[serde(default = "SurgeConfig::default_window_seconds")]
    pub window_seconds: f64,
    #[serde(default = "SurgeConfig::default_surge_threshold")]
    pub surge_threshold: usize,
    #[serde(default = "SurgeConfig::default_disaster_threshold")]
    pub disaster_threshold: usize,
}

impl SurgeConfig {
    fn default_window_seconds() -> f64 {
        60.0
    }

    fn default_surge_threshold() -> usize {
        5
    }

    fn default_disaster_threshold() -> usize {
        15
    }
}

impl Default for SurgeConfig {
    fn default() -> Self {
        Self {
            window_seconds: Self::default_window_seconds(),
            surge_threshold: Self::default_surge_threshold(),
            disaster_threshold: Self::default_disaster_threshold(),
        }
    }
}

/// Tabular Q-learning hyperparameters and policy persistence.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "AgentConfig::default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "AgentConfig::default_discount_factor")]
    pub discount_factor: f64,
    #[serde(default = "AgentConfig::default_epsilon")]
    pub epsilon: f64,
    #[serde(default = "AgentConfig::default_action_count")]
    pub action_count: usize,
    #[serde(default = "AgentConfig::default_policy_path")]
    pub policy_path: PathBuf,
    /// Persist the policy after this many feedback updates.
    #[serde(default = "AgentConfig::default_save_every")]
    pub save_every: usize,
}

impl AgentConfig {
    fn default_learning_rate() -> f64 {
        0.1
    }

    fn default_discount_factor() -> f64 {
        0.9
    }

    fn default_epsilon() -> f64 {
        0.1
    }

    fn default_action_count() -> usize {
        5
    }

    fn default_policy_path() -> PathBuf {
        PathBuf::from("cache/rl_policy.db")
    }

    fn default_save_every() -> usize {
        20
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            learning_rate: Self::default_learning_rate(),
            discount_factor: Self::default_discount_factor(),
            epsilon: Self::default_epsilon(),
            action_count: Self::default_action_count(),
            policy_path: Self::default_policy_path(),
            save_every: Self::default_save_every(),
        }
    }
}

/// Federated aggregation, privacy noise, and round execution budgets.
#[derive(Debug, Clone, Deserialize)]
pub struct FederatedConfig {
    /// Scale of the Laplace noise added to every aggregated element.
    #[serde(default = "FederatedConfig::default_dp_epsilon")]
    pub dp_epsilon: f64,
    #[serde(default = "FederatedConfig::default_dp_delta")]
    pub dp_delta: f64,
    #[serde(default = "FederatedConfig::default_drift_threshold")]
    pub drift_threshold: f64,
    #[serde(default = "FederatedConfig::default_local_epochs")]
    pub local_epochs: usize,
    /// Wall-clock budget for one district's local training within a round.
    /// A district that exceeds it is excluded from that round's aggregation.
    #[serde(default = "FederatedConfig::default_training_budget_ms")]
    pub training_budget_ms: u64,
}

impl FederatedConfig {
    fn default_dp_epsilon() -> f64 {
        0.1
    }

    fn default_dp_delta() -> f64 {
        1e-5
    }

    fn default_drift_threshold() -> f64 {
        0.5
    }

    fn default_local_epochs() -> usize {
        5
    }

    fn default_training_budget_ms() -> u64 {
        2_000
    }
}

impl Default for FederatedConfig {
    fn default() -> Self {
        Self {
            dp_epsilon: Self::default_dp_epsilon(),
            dp_delta: Self::default_dp_delta(),
            drift_threshold: Self::default_drift_threshold(),
            local_epochs: Self::default_local_epochs(),
            training_budget_ms: Self::default_training_budget_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Upper bound for a single collaborator call; a slower collaborator is
    /// treated as failed and replaced by its fallback value.
    #[serde(default = "PipelineConfig::default_collaborator_timeout_ms")]
    pub collaborator_timeout_ms: u64,
    #[serde(default = "PipelineConfig::default_flood_risk_threshold")]
    pub flood_risk_threshold: f64,
    /// Forecast rainfall (mm) assumed when telemetry carries none.
    #[serde(default = "PipelineConfig::default_assumed_rainfall_mm")]
    pub assumed_rainfall_mm: f64,
    #[serde(default = "PipelineConfig::default_workers")]
    pub workers: usize,
}

impl PipelineConfig {
    fn default_collaborator_timeout_ms() -> u64 {
        2_000
    }

    fn default_flood_risk_threshold() -> f64 {
        0.7
    }

    fn default_assumed_rainfall_mm() -> f64 {
        10.0
    }

    fn default_workers() -> usize {
        4
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            collaborator_timeout_ms: Self::default_collaborator_timeout_ms(),
            flood_risk_threshold: Self::default_flood_risk_threshold(),
            assumed_rainfall_mm: Self::default_assumed_rainfall_mm(),
            workers: Self::default_workers(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogbookConfig {
    #[serde(default = "LogbookConfig::default_actions")]
    pub actions: PathBuf,
    #[serde(default = "LogbookConfig::default_alerts")]
    pub alerts: PathBuf,
    #[serde(default = "LogbookConfig::default_events")]
    pub events: PathBuf,
    #[serde(default = "LogbookConfig::default_enabled")]
    pub enabled: bool,
    #[serde(default = "LogbookConfig::default_preview_len")]
    pub preview_len: usize,
}

impl LogbookConfig {
    fn default_actions() -> PathBuf {
        PathBuf::from("logbook/actions.jsonl")
    }

    fn default_alerts() -> PathBuf {
        PathBuf::from("logbook/alerts.jsonl")
    }

    fn default_events() -> PathBuf {
        PathBuf::from("logbook/events.jsonl")
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_preview_len() -> usize {
        160
    }
}

impl Default for LogbookConfig {
    fn default() -> Self {
        Self {
            actions: Self::default_actions(),
            alerts: Self::default_alerts(),
            events: Self::default_events(),
            enabled: Self::default_enabled(),
            preview_len: Self::default_preview_len(),
        }
    }
}

fn absolutize(root: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        root.join(value)
    }
}
