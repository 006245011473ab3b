//! Deployment history events and failure records.
//!
//! The history ledger is a totally ordered sequence of [`DeploymentEvent`]s;
//! the ordering key is `(timestamp, entity_id)`, which every node agrees on
//! regardless of the order events arrived in.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::entity::EntityType;
use crate::{EntityId, ServerName, Timestamp};

/// One accepted deployment, as recorded in the history ledger and served to
/// peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentEvent {
    /// The node the deployment originated on.
    pub server_name: ServerName,
    /// Kind of the deployed entity.
    pub entity_type: EntityType,
    /// Id of the deployed entity.
    pub entity_id: EntityId,
    /// Entity timestamp; the ledger ordering key together with the id.
    pub timestamp: Timestamp,
}

impl PartialOrd for DeploymentEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DeploymentEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.timestamp, &self.entity_id).cmp(&(other.timestamp, &other.entity_id))
    }
}

/// A slice of the ledger plus the watermark below which it is final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialDeploymentHistory {
    /// Events in `(timestamp, entity_id)` order.
    pub events: Vec<DeploymentEvent>,
    /// Greatest event timestamp older than the immutability window.
    pub last_immutable_time: Timestamp,
}

/// A node's status summary, served at `/status` and probed by peers.
///
/// Timestamps travel as integer milliseconds (the wire format everything
/// else uses) plus an RFC 3339 rendering for operators reading the payload
/// directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    /// The node's announced name.
    pub name: ServerName,
    /// Software version.
    pub version: String,
    /// The node's clock, ms since epoch.
    pub current_time: Timestamp,
    /// Immutable-time watermark of the node's ledger.
    pub last_immutable_time: Timestamp,
    /// Human-readable UTC rendering of `current_time`.
    #[serde(default)]
    pub current_time_utc: String,
    /// Human-readable UTC rendering of `last_immutable_time`; empty while
    /// the ledger has no immutable history.
    #[serde(default)]
    pub last_immutable_time_utc: String,
}

impl ServerStatus {
    /// Builds a status payload, rendering the UTC fields from the
    /// millisecond timestamps.
    pub fn new(
        name: ServerName,
        version: impl Into<String>,
        current_time: Timestamp,
        last_immutable_time: Timestamp,
    ) -> Self {
        Self {
            name,
            version: version.into(),
            current_time,
            last_immutable_time,
            current_time_utc: utc_string(current_time),
            last_immutable_time_utc: if last_immutable_time == 0 {
                String::new()
            } else {
                utc_string(last_immutable_time)
            },
        }
    }
}

/// RFC 3339 UTC rendering of a millisecond timestamp. Out-of-range values
/// render empty rather than panicking.
pub fn utc_string(timestamp: Timestamp) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(timestamp as i64)
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
        .unwrap_or_default()
}

/// Why a synced deployment could not be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// The source server could not return the entity file or its audit info.
    NoEntityOrAudit,
    /// Referenced content blobs could not be fetched.
    FetchProblem,
    /// Local validation or storage failed while applying the event.
    DeploymentError,
}

impl FailureReason {
    /// Snake-case label for logs and metrics.
    pub const fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NoEntityOrAudit => "no_entity_or_audit",
            FailureReason::FetchProblem => "fetch_problem",
            FailureReason::DeploymentError => "deployment_error",
        }
    }
}

/// A deployment the synchronizer observed but could not apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedDeployment {
    /// The event that failed.
    pub event: DeploymentEvent,
    /// Why it failed.
    pub reason: FailureReason,
    /// When this node recorded the failure (ms since epoch).
    pub moment: Timestamp,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn event(id: &str, timestamp: Timestamp) -> DeploymentEvent {
        DeploymentEvent {
            server_name: "node-a".to_string(),
            entity_type: EntityType::Scene,
            entity_id: id.to_string(),
            timestamp,
        }
    }

    #[test]
    fn events_order_by_timestamp_then_id() {
        let mut events = vec![event("b", 20), event("z", 10), event("a", 20)];
        events.sort();
        let ids: Vec<&str> = events.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a", "b"]);
    }

    #[test]
    fn ordering_ignores_server_name() {
        let mut a = event("x", 5);
        let mut b = event("x", 5);
        a.server_name = "node-a".to_string();
        b.server_name = "node-b".to_string();
        assert_eq!(a.cmp(&b), Ordering::Equal);
    }

    #[test]
    fn event_serde_uses_camel_case() {
        let json = serde_json::to_string(&event("bafyid", 7)).unwrap();
        assert!(json.contains("\"serverName\""));
        assert!(json.contains("\"entityType\":\"scene\""));
        assert!(json.contains("\"entityId\""));
    }

    #[test]
    fn server_status_renders_utc_fields() {
        let status = ServerStatus::new("node-a".to_string(), "1.0.0", 1_700_000_000_000, 0);
        assert_eq!(status.current_time_utc, "2023-11-14T22:13:20.000Z");
        assert!(status.last_immutable_time_utc.is_empty());

        let status = ServerStatus::new("node-a".to_string(), "1.0.0", 0, 1_700_000_000_000);
        assert_eq!(status.last_immutable_time_utc, "2023-11-14T22:13:20.000Z");
    }

    #[test]
    fn server_status_tolerates_peers_without_utc_fields() {
        let json = r#"{
            "name": "node-a",
            "version": "1.0.0",
            "currentTime": 42,
            "lastImmutableTime": 0
        }"#;
        let status: ServerStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.current_time, 42);
        assert!(status.current_time_utc.is_empty());
    }

    #[test]
    fn failure_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&FailureReason::NoEntityOrAudit).unwrap(),
            "\"NO_ENTITY_OR_AUDIT\""
        );
        assert_eq!(
            serde_json::to_string(&FailureReason::FetchProblem).unwrap(),
            "\"FETCH_PROBLEM\""
        );
        assert_eq!(
            serde_json::to_string(&FailureReason::DeploymentError).unwrap(),
            "\"DEPLOYMENT_ERROR\""
        );
    }
}
