//! Disruption budgets.
//!
//! A disruption budget caps how many of the workloads it selects may be
//! voluntarily disrupted at once. The cache keeps an index of budget
//! records so preemption and eviction logic can ask "may this workload be
//! disrupted right now?" without a control-plane round trip.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::labels::LabelSelector;
use crate::types::Workload;

/// A disruption budget record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisruptionBudget {
    pub namespace: String,
    pub name: String,
    pub uid: String,

    /// The budget's own labels, used when listing budgets by selector.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Selects the workloads this budget protects.
    #[serde(default)]
    pub selector: LabelSelector,

    /// How many selected workloads may currently be disrupted.
    pub allowed_disruptions: i32,
}

/// Uid-keyed index of disruption budgets.
///
/// Queries iterate over all records: the selector space is open, so there
/// is no useful secondary index to maintain.
#[derive(Debug, Clone, Default)]
pub struct BudgetIndex {
    budgets: HashMap<String, DisruptionBudget>,
}

impl BudgetIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a budget record.
    pub fn add(&mut self, budget: DisruptionBudget) {
        debug!(budget = %budget.uid, allowed = budget.allowed_disruptions, "Adding disruption budget");
        self.budgets.insert(budget.uid.clone(), budget);
    }

    /// Apply an updated record. The new record's uid keys the entry, so an
    /// update that changes names or labels under a stable uid replaces in
    /// place.
    pub fn update(&mut self, _old: &DisruptionBudget, new: DisruptionBudget) {
        self.budgets.insert(new.uid.clone(), new);
    }

    /// Drop a budget record.
    pub fn remove(&mut self, budget: &DisruptionBudget) {
        if self.budgets.remove(&budget.uid).is_none() {
            warn!(budget = %budget.uid, "Removing unknown disruption budget");
        }
    }

    /// All budgets whose own labels match the selector.
    pub fn list(&self, selector: &LabelSelector) -> Vec<DisruptionBudget> {
        self.budgets
            .values()
            .filter(|b| selector.matches(&b.labels))
            .cloned()
            .collect()
    }

    /// True iff every budget selecting this workload still allows a
    /// disruption. Workloads no budget selects are unconstrained.
    pub fn allows(&self, workload: &Workload) -> bool {
        self.budgets
            .values()
            .filter(|b| b.selector.matches(&workload.labels))
            .all(|b| b.allowed_disruptions > 0)
    }

    pub fn len(&self) -> usize {
        self.budgets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.budgets.is_empty()
    }
}
