//! Typed contracts for the external AI collaborators the pipeline consults.
//!
//! Each collaborator is a pure call `(input) -> typed result` that may fail.
//! Failures are enumerated in [`CollabError`] and resolved to a documented
//! fallback value at the single call site in the pipeline, so every failure
//! kind stays traceable and testable on its own. Heuristic reference
//! implementations live at the bottom; the real inference services sit
//! behind these traits in production.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollabError {
    #[error("collaborator timed out after {0:?}")]
    Timeout(Duration),
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("malformed collaborator response: {0}")]
    Malformed(String),
}

// ----------- Domain vocabulary -----------

pub const CATEGORIES: [&str; 6] = [
    "Roads",
    "Water",
    "Electricity",
    "Sanitation",
    "Traffic",
    "Others",
];

pub const SEVERITIES: [&str; 4] = ["Low", "Medium", "High", "Critical"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Roads,
    Water,
    Electricity,
    Sanitation,
    Traffic,
    Others,
}

impl Category {
    /// Stable index into the state vector. Unknown labels map to `Others`.
    pub fn index(self) -> usize {
        match self {
            Category::Roads => 0,
            Category::Water => 1,
            Category::Electricity => 2,
            Category::Sanitation => 3,
            Category::Traffic => 4,
            Category::Others => 5,
        }
    }

    pub fn parse(label: &str) -> Self {
        match label {
            "Roads" => Category::Roads,
            "Water" => Category::Water,
            "Electricity" => Category::Electricity,
            "Sanitation" => Category::Sanitation,
            "Traffic" => Category::Traffic,
            _ => Category::Others,
        }
    }

    pub fn as_str(self) -> &'static str {
        CATEGORIES[self.index()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Stable index into the state vector. Unknown labels map to `Medium`.
    pub fn index(self) -> usize {
        match self {
            Severity::Low => 0,
            Severity::Medium => 1,
            Severity::High => 2,
            Severity::Critical => 3,
        }
    }

    pub fn parse(label: &str) -> Self {
        match label {
            "Low" => Severity::Low,
            "Medium" => Severity::Medium,
            "High" => Severity::High,
            "Critical" => Severity::Critical,
            _ => Severity::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        SEVERITIES[self.index()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Urgent,
    High,
    Normal,
    Low,
}

impl Priority {
    /// Fixed severity-to-priority table used for non-escalation actions.
    pub fn from_severity(severity: Severity) -> Self {
        match severity {
            Severity::Critical => Priority::Urgent,
            Severity::High => Priority::High,
            Severity::Medium => Priority::Normal,
            Severity::Low => Priority::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Urgent => "Urgent",
            Priority::High => "High",
            Priority::Normal => "Normal",
            Priority::Low => "Low",
        }
    }
}

// ----------- Collaborator results -----------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub severity: Severity,
    pub confidence: f64,
    pub reasoning: String,
}

impl Classification {
    /// Degraded value used when the classifier is unreachable.
    pub fn fallback(reason: &str) -> Self {
        Self {
            category: Category::Others,
            severity: Severity::Medium,
            confidence: 0.5,
            reasoning: format!("classification fallback: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpamVerdict {
    pub is_spam: bool,
    pub score: f64,
    pub reasoning: String,
}

impl SpamVerdict {
    /// Degraded value: treat the complaint as legitimate with low confidence.
    pub fn fallback(reason: &str) -> Self {
        Self {
            is_spam: false,
            score: 0.1,
            reasoning: format!("spam-check fallback: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateVerdict {
    pub is_duplicate: bool,
    pub similarity: f64,
    pub cluster_id: Option<String>,
    pub nearby_count: usize,
}

impl DuplicateVerdict {
    pub fn fallback() -> Self {
        Self {
            is_duplicate: false,
            similarity: 0.0,
            cluster_id: None,
            nearby_count: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtaEstimate {
    pub days: f64,
    pub confidence_interval: (f64, f64),
}

impl EtaEstimate {
    pub fn from_days(days: f64) -> Self {
        let days = days.max(0.5);
        let days = (days * 10.0).round() / 10.0;
        Self {
            days,
            confidence_interval: (days - 0.5, days + 0.5),
        }
    }

    /// Severity-weight heuristic used when the regression model is absent.
    pub fn fallback(severity: Severity, density: f64) -> Self {
        let sev_weight = match severity {
            Severity::Low => 1.0,
            Severity::Medium => 2.0,
            Severity::High => 3.0,
            Severity::Critical => 5.0,
        };
        Self::from_days(sev_weight + density * 2.0)
    }
}

// ----------- Collaborator traits -----------

pub trait Classifier: Send + Sync {
    fn classify(&self, text: &str) -> Result<Classification, CollabError>;
}

pub trait SpamChecker: Send + Sync {
    fn check_spam(&self, text: &str) -> Result<SpamVerdict, CollabError>;
}

pub trait DuplicateChecker: Send + Sync {
    fn check_duplicate(
        &self,
        text: &str,
        lat: f64,
        lon: f64,
    ) -> Result<DuplicateVerdict, CollabError>;
}

pub trait EtaPredictor: Send + Sync {
    fn predict_eta(
        &self,
        category: Category,
        severity: Severity,
        density: f64,
    ) -> Result<EtaEstimate, CollabError>;
}

// ----------- Heuristic reference implementations -----------

/// Keyword classifier mirroring the categories the inference service uses.
pub struct KeywordClassifier;

impl Classifier for KeywordClassifier {
    fn classify(&self, text: &str) -> Result<Classification, CollabError> {
        let lower = text.to_lowercase();
        let category = if lower.contains("pothole") || lower.contains("road") {
            Category::Roads
        } else if lower.contains("water") || lower.contains("pipe") || lower.contains("leak") {
            Category::Water
        } else if lower.contains("power") || lower.contains("electric") || lower.contains("outage")
        {
            Category::Electricity
        } else if lower.contains("garbage") || lower.contains("sewage") || lower.contains("waste") {
            Category::Sanitation
        } else if lower.contains("traffic") || lower.contains("signal") || lower.contains("jam") {
            Category::Traffic
        } else {
            Category::Others
        };

        let severity = if lower.contains("danger")
            || lower.contains("urgent")
            || lower.contains("accident")
            || lower.contains("flood")
        {
            Severity::Critical
        } else if lower.contains("major") || lower.contains("burst") {
            Severity::High
        } else if lower.contains("minor") || lower.contains("small") {
            Severity::Low
        } else {
            Severity::Medium
        };

        Ok(Classification {
            category,
            severity,
            confidence: 0.7,
            reasoning: "keyword heuristic".to_string(),
        })
    }
}

/// Length/gibberish spam heuristic mirroring the inference prompt's criteria.
pub struct LengthSpamChecker;

impl SpamChecker for LengthSpamChecker {
    fn check_spam(&self, text: &str) -> Result<SpamVerdict, CollabError> {
        let trimmed = text.trim();
        let alpha = trimmed.chars().filter(|c| c.is_alphabetic()).count();
        let is_spam = trimmed.len() < 8 || alpha * 2 < trimmed.len();
        Ok(SpamVerdict {
            is_spam,
            score: if is_spam { 0.9 } else { 0.1 },
            reasoning: if is_spam {
                "too short or mostly non-alphabetic".to_string()
            } else {
                "looks like a civic complaint".to_string()
            },
        })
    }
}

/// Duplicate checker that never matches; the semantic/geo search is external.
pub struct NoDuplicateChecker;

impl DuplicateChecker for NoDuplicateChecker {
    fn check_duplicate(
        &self,
        _text: &str,
        _lat: f64,
        _lon: f64,
    ) -> Result<DuplicateVerdict, CollabError> {
        Ok(DuplicateVerdict::fallback())
    }
}

/// ETA predictor backed by the documented severity-weight heuristic.
pub struct HeuristicEtaPredictor;

impl EtaPredictor for HeuristicEtaPredictor {
    fn predict_eta(
        &self,
        _category: Category,
        severity: Severity,
        density: f64,
    ) -> Result<EtaEstimate, CollabError> {
        Ok(EtaEstimate::fallback(severity, density))
    }
}
