//! services/routing.rs
//! Officer directory and the action → routing-decision mapping.
//!
//! The department rosters and workload figures are the engine's seeded
//! directory; in production they are refreshed from the operational
//! database.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::collaborators::{Category, Priority, Severity};

static DEFAULT_DEPARTMENTS: Lazy<Vec<(Category, Vec<&'static str>)>> = Lazy::new(|| {
    vec![
        (Category::Roads, vec!["OFF_ROAD_001", "OFF_ROAD_002"]),
        (Category::Water, vec!["OFF_WATER_001", "OFF_WATER_002"]),
        (Category::Electricity, vec!["OFF_ELEC_001"]),
        (Category::Sanitation, vec!["OFF_SAN_001", "OFF_SAN_002"]),
        (Category::Traffic, vec!["OFF_TRAF_001"]),
        (Category::Others, vec!["OFF_GEN_001"]),
    ]
});

static DEFAULT_WORKLOAD: Lazy<Vec<(&'static str, u32)>> = Lazy::new(|| {
    vec![
        ("OFF_ROAD_001", 5),
        ("OFF_ROAD_002", 3),
        ("OFF_WATER_001", 7),
        ("OFF_WATER_002", 4),
        ("OFF_ELEC_001", 2),
        ("OFF_SAN_001", 6),
        ("OFF_SAN_002", 1),
        ("OFF_TRAF_001", 4),
        ("OFF_GEN_001", 3),
    ]
});

/// Ceiling used to squash raw per-officer ticket counts into the 0..=1
/// workload fraction the state vector carries.
const WORKLOAD_CEILING: f64 = 10.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub department: String,
    pub officer_id: Option<String>,
    pub priority: Priority,
    pub action: usize,
    pub escalated: bool,
    pub merged: bool,
}

pub struct OfficerDirectory {
    departments: HashMap<Category, Vec<String>>,
    workload: HashMap<String, u32>,
}

impl Default for OfficerDirectory {
    fn default() -> Self {
        let departments = DEFAULT_DEPARTMENTS
            .iter()
            .map(|(cat, officers)| {
                (*cat, officers.iter().map(|o| o.to_string()).collect())
            })
            .collect();
        let workload = DEFAULT_WORKLOAD
            .iter()
            .map(|(officer, load)| (officer.to_string(), *load))
            .collect();
        Self {
            departments,
            workload,
        }
    }
}

impl OfficerDirectory {
    pub fn new(
        departments: HashMap<Category, Vec<String>>,
        workload: HashMap<String, u32>,
    ) -> Self {
        Self {
            departments,
            workload,
        }
    }

    fn officers(&self, category: Category) -> &[String] {
        self.departments
            .get(&category)
            .or_else(|| self.departments.get(&Category::Others))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    fn least_loaded(&self, officers: &[String]) -> Option<String> {
        officers
            .iter()
            .min_by_key(|o| self.workload.get(*o).copied().unwrap_or(0))
            .cloned()
    }

    /// Mean workload of a department's officers, squashed to 0..=1 for the
    /// state vector.
    pub fn workload_fraction(&self, category: Category) -> f64 {
        let officers = self.officers(category);
        if officers.is_empty() {
            return 0.5;
        }
        let total: u32 = officers
            .iter()
            .map(|o| self.workload.get(o).copied().unwrap_or(0))
            .sum();
        let mean = total as f64 / officers.len() as f64;
        (mean / WORKLOAD_CEILING).clamp(0.0, 1.0)
    }

    /// Map the agent's chosen action to a concrete routing decision.
    ///
    /// Actions 0..=2 pick among the department's officers by `action mod
    /// officer count`; action 3 escalates (priority forced to Urgent);
    /// action 4 merges with an existing cluster, falling back to the
    /// least-loaded officer since an assignment is still required. Priority
    /// for non-escalation actions derives from severity.
    pub fn route(&self, category: Category, severity: Severity, action: usize) -> RoutingDecision {
        let officers = self.officers(category);
        let escalated = action == 3;
        let merged = action == 4;

        let officer_id = if action < 3 && !officers.is_empty() {
            Some(officers[action % officers.len()].clone())
        } else {
            self.least_loaded(officers)
        };

        let priority = if escalated {
            Priority::Urgent
        } else {
            Priority::from_severity(severity)
        };

        RoutingDecision {
            department: category.as_str().to_string(),
            officer_id,
            priority,
            action,
            escalated,
            merged,
        }
    }
}
