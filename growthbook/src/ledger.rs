use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::callbacks::SubscriptionCallback;
use crate::errors::EvalWarning;
use crate::models::{Experiment, ExperimentResult};

/// Upper bound on warnings held between two `take_warnings` calls.
pub const MAX_PENDING_WARNINGS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone)]
pub struct Assignment {
    pub experiment: Experiment,
    pub result: ExperimentResult,
}

/// Per-engine memory of what has already been reported.
///
/// The ledger is owned by one engine and mutated through `&mut`; sharing an engine across
/// threads means wrapping it in a lock. `reset` returns it to its freshly-built state.
#[derive(Default)]
pub struct AssignmentLedger {
    tracked_experiments: HashSet<String>,
    tracked_features: HashMap<String, String>,
    assigned: HashMap<String, Assignment>,
    subscriptions: Vec<(SubscriptionId, Arc<dyn SubscriptionCallback>)>,
    next_subscription_id: u64,
    warnings: Vec<EvalWarning>,
}

impl AssignmentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time a tracking key is seen.
    pub fn mark_experiment_tracked(&mut self, tracking_key: String) -> bool {
        self.tracked_experiments.insert(tracking_key)
    }

    /// Returns `true` when `serialized_value` differs from the last value reported for `key`.
    pub fn mark_feature_tracked(&mut self, key: &str, serialized_value: String) -> bool {
        if self.tracked_features.get(key) == Some(&serialized_value) {
            return false;
        }
        self.tracked_features
            .insert(key.to_string(), serialized_value);
        true
    }

    /// Stores the assignment and returns `true` when it differs from the previous one for
    /// the same experiment key in either membership or variation.
    pub fn record_assignment(&mut self, experiment: &Experiment, result: &ExperimentResult) -> bool {
        let changed = match self.assigned.get(&experiment.key) {
            Some(previous) => {
                previous.result.in_experiment != result.in_experiment
                    || previous.result.variation_id != result.variation_id
            }
            None => true,
        };
        if changed {
            self.assigned.insert(
                experiment.key.clone(),
                Assignment {
                    experiment: experiment.clone(),
                    result: result.clone(),
                },
            );
        }
        changed
    }

    pub fn assignments(&self) -> &HashMap<String, Assignment> {
        &self.assigned
    }

    pub fn subscribe(&mut self, callback: Arc<dyn SubscriptionCallback>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription_id);
        self.next_subscription_id += 1;
        self.subscriptions.push((id, callback));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|(existing, _)| *existing != id);
        self.subscriptions.len() != before
    }

    pub fn subscribers(&self) -> Vec<Arc<dyn SubscriptionCallback>> {
        self.subscriptions
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect()
    }

    /// Buffers a warning until the host drains it. A warning already pending is not stored
    /// or logged again, and once `MAX_PENDING_WARNINGS` are pending new ones are dropped.
    pub fn warn(&mut self, warning: EvalWarning) {
        if self.warnings.contains(&warning) {
            return;
        }
        if self.warnings.len() >= MAX_PENDING_WARNINGS {
            tracing::debug!(warning = %warning, "Warning buffer full, dropping warning");
            return;
        }
        tracing::warn!(warning = %warning, "Evaluation warning");
        self.warnings.push(warning);
    }

    pub fn extend_warnings(&mut self, warnings: Vec<EvalWarning>) {
        for warning in warnings {
            self.warn(warning);
        }
    }

    pub fn take_warnings(&mut self) -> Vec<EvalWarning> {
        std::mem::take(&mut self.warnings)
    }

    pub fn reset(&mut self) {
        self.tracked_experiments.clear();
        self.tracked_features.clear();
        self.assigned.clear();
        self.subscriptions.clear();
        self.warnings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(in_experiment: bool, variation_id: usize) -> ExperimentResult {
        ExperimentResult {
            key: variation_id.to_string(),
            feature_id: None,
            in_experiment,
            hash_used: in_experiment,
            variation_id,
            value: json!(variation_id),
            hash_attribute: "id".to_string(),
            hash_value: json!("1"),
            name: None,
            bucket: None,
            passthrough: None,
        }
    }

    #[test]
    fn test_tracks_experiments_once() {
        let mut ledger = AssignmentLedger::new();
        assert!(ledger.mark_experiment_tracked("id1exp0".to_string()));
        assert!(!ledger.mark_experiment_tracked("id1exp0".to_string()));
        assert!(ledger.mark_experiment_tracked("id1exp1".to_string()));
    }

    #[test]
    fn test_feature_tracking_rearms_on_value_change() {
        let mut ledger = AssignmentLedger::new();
        assert!(ledger.mark_feature_tracked("flag", "true".to_string()));
        assert!(!ledger.mark_feature_tracked("flag", "true".to_string()));
        assert!(ledger.mark_feature_tracked("flag", "false".to_string()));
        assert!(ledger.mark_feature_tracked("flag", "true".to_string()));
    }

    #[test]
    fn test_records_only_changed_assignments() {
        let mut ledger = AssignmentLedger::new();
        let experiment = Experiment::new("exp", vec![json!(0), json!(1)]);

        assert!(ledger.record_assignment(&experiment, &result(true, 1)));
        assert!(!ledger.record_assignment(&experiment, &result(true, 1)));
        assert!(ledger.record_assignment(&experiment, &result(true, 0)));
        assert!(ledger.record_assignment(&experiment, &result(false, 0)));
        assert_eq!(ledger.assignments()["exp"].result.variation_id, 0);
    }

    #[test]
    fn test_unsubscribe() {
        let mut ledger = AssignmentLedger::new();
        let callback: Arc<dyn SubscriptionCallback> =
            Arc::new(|_: &Experiment, _: &ExperimentResult| -> anyhow::Result<()> { Ok(()) });
        let first = ledger.subscribe(Arc::clone(&callback));
        let second = ledger.subscribe(callback);
        assert_ne!(first, second);
        assert_eq!(ledger.subscribers().len(), 2);

        assert!(ledger.unsubscribe(first));
        assert!(!ledger.unsubscribe(first));
        assert_eq!(ledger.subscribers().len(), 1);
    }

    #[test]
    fn test_pending_warnings_are_deduplicated() {
        let mut ledger = AssignmentLedger::new();
        for _ in 0..1_000 {
            ledger.warn(EvalWarning::InvalidRegex("(".to_string()));
        }
        ledger.extend_warnings(vec![
            EvalWarning::InvalidRegex("(".to_string()),
            EvalWarning::UnknownOperator("$nope".to_string()),
        ]);

        assert_eq!(
            ledger.take_warnings(),
            vec![
                EvalWarning::InvalidRegex("(".to_string()),
                EvalWarning::UnknownOperator("$nope".to_string()),
            ]
        );

        // draining re-arms the warning
        ledger.warn(EvalWarning::InvalidRegex("(".to_string()));
        assert_eq!(ledger.take_warnings().len(), 1);
    }

    #[test]
    fn test_pending_warnings_are_capped() {
        let mut ledger = AssignmentLedger::new();
        for i in 0..MAX_PENDING_WARNINGS * 3 {
            ledger.warn(EvalWarning::UnknownOperator(format!("$op{i}")));
        }

        let warnings = ledger.take_warnings();
        assert_eq!(warnings.len(), MAX_PENDING_WARNINGS);
        assert_eq!(warnings[0], EvalWarning::UnknownOperator("$op0".to_string()));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut ledger = AssignmentLedger::new();
        let experiment = Experiment::new("exp", vec![json!(0), json!(1)]);
        ledger.mark_experiment_tracked("k".to_string());
        ledger.mark_feature_tracked("flag", "1".to_string());
        ledger.record_assignment(&experiment, &result(true, 1));
        ledger.warn(EvalWarning::InvalidRegex("(".to_string()));

        ledger.reset();

        assert!(ledger.assignments().is_empty());
        assert!(ledger.take_warnings().is_empty());
        assert!(ledger.mark_experiment_tracked("k".to_string()));
        assert!(ledger.mark_feature_tracked("flag", "1".to_string()));
    }
}
