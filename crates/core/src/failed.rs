//! Registry of deployments that could not be applied.
//!
//! The synchronizer records here whenever a peer event cannot be fully
//! replayed. Entries are cleared by a later successful deployment of the
//! same entity, either a local fix re-submission or the next sync sweep;
//! there is no retry timer, so the retry cadence equals the sync interval.

use std::collections::HashMap;

use parking_lot::RwLock;

use depot_types::{DeploymentEvent, EntityId, FailedDeployment, FailureReason, Timestamp};

/// In-memory registry of failed deployments, keyed by entity id.
#[derive(Default)]
pub struct FailedDeploymentsManager {
    failures: RwLock<HashMap<EntityId, FailedDeployment>>,
}

impl FailedDeploymentsManager {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure, replacing any previous record for the entity.
    pub fn report(&self, event: DeploymentEvent, reason: FailureReason, moment: Timestamp) {
        tracing::warn!(
            entity_id = %event.entity_id,
            reason = reason.as_str(),
            source = %event.server_name,
            "deployment failed"
        );
        let failure = FailedDeployment { event, reason, moment };
        self.failures.write().insert(failure.event.entity_id.clone(), failure);
    }

    /// All current failures, most recent first.
    pub fn list(&self) -> Vec<FailedDeployment> {
        let mut all: Vec<FailedDeployment> = self.failures.read().values().cloned().collect();
        all.sort_by(|a, b| b.moment.cmp(&a.moment).then_with(|| a.event.cmp(&b.event)));
        all
    }

    /// The failure reason recorded for an entity, if any.
    pub fn status(&self, entity_id: &str) -> Option<FailureReason> {
        self.failures.read().get(entity_id).map(|f| f.reason)
    }

    /// Clears the record for an entity after a successful deployment.
    /// Returns whether a record existed.
    pub fn clear(&self, entity_id: &str) -> bool {
        self.failures.write().remove(entity_id).is_some()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use depot_types::EntityType;

    use super::*;

    fn event(id: &str) -> DeploymentEvent {
        DeploymentEvent {
            server_name: "node-a".to_string(),
            entity_type: EntityType::Scene,
            entity_id: id.to_string(),
            timestamp: 100,
        }
    }

    #[test]
    fn report_status_clear_cycle() {
        let failed = FailedDeploymentsManager::new();
        assert_eq!(failed.status("e1"), None);

        failed.report(event("e1"), FailureReason::FetchProblem, 10);
        assert_eq!(failed.status("e1"), Some(FailureReason::FetchProblem));
        assert_eq!(failed.list().len(), 1);

        assert!(failed.clear("e1"));
        assert_eq!(failed.status("e1"), None);
        assert!(!failed.clear("e1"));
    }

    #[test]
    fn newer_report_replaces_older() {
        let failed = FailedDeploymentsManager::new();
        failed.report(event("e1"), FailureReason::NoEntityOrAudit, 10);
        failed.report(event("e1"), FailureReason::DeploymentError, 20);

        assert_eq!(failed.status("e1"), Some(FailureReason::DeploymentError));
        assert_eq!(failed.list().len(), 1);
    }

    #[test]
    fn list_orders_most_recent_first() {
        let failed = FailedDeploymentsManager::new();
        failed.report(event("e1"), FailureReason::FetchProblem, 10);
        failed.report(event("e2"), FailureReason::FetchProblem, 30);
        failed.report(event("e3"), FailureReason::FetchProblem, 20);

        let moments: Vec<Timestamp> = failed.list().into_iter().map(|f| f.moment).collect();
        assert_eq!(moments, vec![30, 20, 10]);
    }
}
