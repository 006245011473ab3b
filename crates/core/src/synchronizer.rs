//! Cluster synchronization loop.
//!
//! Every tick pulls each active peer's history from its watermark, merges
//! the events into one `(timestamp, entity_id)`-ordered stream, and replays
//! them through the deploy path with a `Synced` origin. Because every node
//! replays the same order and the pointer commit is deterministic, all
//! honest nodes converge on the same pointer state.
//!
//! A peer's watermark only advances past events that were fully processed,
//! so an interrupted or failed event is retried on the next tick; the retry
//! cadence is exactly the sync interval.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use depot_types::{DeploymentEvent, Entity, EntityId, FailureReason, Timestamp};

use crate::cluster::{ClusterClient, PeerClient};
use crate::deployment::{DeploymentFile, DeploymentOrigin, ENTITY_FILE_NAME};
use crate::service::{ContentService, DeploymentService};
use crate::time::now_ms;

/// The periodic sync task.
pub struct Synchronizer {
    service: Arc<DeploymentService>,
    cluster: Arc<ClusterClient>,
    interval: Duration,
}

impl Synchronizer {
    /// Builds a synchronizer ticking every `interval`.
    pub fn new(
        service: Arc<DeploymentService>,
        cluster: Arc<ClusterClient>,
        interval: Duration,
    ) -> Self {
        Self { service, cluster, interval }
    }

    /// Runs the loop until `token` is cancelled. The first tick runs
    /// immediately so a booting node catches up before serving.
    pub async fn run(&self, token: CancellationToken) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "synchronizer started");
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                () = self.tick() => {},
            }
            tokio::select! {
                () = token.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {},
            }
        }
        tracing::info!("synchronizer stopped");
    }

    /// One synchronization sweep.
    pub async fn tick(&self) {
        self.cluster.refresh().await;
        let peers: Vec<PeerClient> =
            self.cluster.peers().into_iter().filter(PeerClient::is_active).collect();
        if peers.is_empty() {
            return;
        }

        // Pull each active peer's history from its watermark.
        let mut pulls: Vec<(PeerClient, Vec<DeploymentEvent>)> = Vec::new();
        for peer in peers {
            let from = peer.last_known_timestamp();
            match peer.get_history(Some(from)).await {
                Ok(history) => pulls.push((peer, history.events)),
                Err(e) => {
                    tracing::warn!(peer = %peer.address(), error = %e, "history pull failed");
                },
            }
        }

        // Merge into one ordered stream, remembering which peer first
        // reported each entity so fetches go back to a server that has it.
        let mut merged: BTreeMap<(Timestamp, EntityId), DeploymentEvent> = BTreeMap::new();
        let mut source: HashMap<EntityId, usize> = HashMap::new();
        for (index, (_, events)) in pulls.iter().enumerate() {
            for event in events {
                source.entry(event.entity_id.clone()).or_insert(index);
                merged
                    .entry((event.timestamp, event.entity_id.clone()))
                    .or_insert_with(|| event.clone());
            }
        }

        let mut processed: HashSet<EntityId> = HashSet::new();
        let mut succeeded: HashSet<EntityId> = HashSet::new();
        for ((_, entity_id), event) in merged {
            if !processed.insert(entity_id.clone()) {
                continue;
            }

            let already_deployed = self.service.history().contains(&entity_id);
            let pending_failure = self.service.failed_deployments().status(&entity_id).is_some();
            if already_deployed && !pending_failure {
                succeeded.insert(entity_id);
                continue;
            }

            // History below the watermark is final; a backdated event can
            // no longer alter pointer state. Record it and move on so the
            // peer's watermark is not blocked forever.
            let immutable_time = self.service.history().immutable_time(now_ms());
            if !already_deployed && event.timestamp < immutable_time {
                self.service.failed_deployments().report(
                    event,
                    FailureReason::DeploymentError,
                    now_ms(),
                );
                succeeded.insert(entity_id);
                continue;
            }

            let peer = &pulls[source[&entity_id]].0;
            if self.process_event(peer, &event).await {
                succeeded.insert(entity_id);
            }
        }

        // Advance each peer's watermark up to its first unprocessed event.
        for (peer, events) in &pulls {
            let Some(name) = peer.name() else { continue };
            let mut advance_to = None;
            for event in events {
                if succeeded.contains(&event.entity_id) {
                    advance_to = Some(event.timestamp);
                } else {
                    break;
                }
            }
            if let Some(timestamp) = advance_to {
                self.cluster.update_timestamp(name, timestamp);
            }
        }
    }

    /// Replays one peer event through the deploy path. Returns whether the
    /// event was fully processed (content included).
    async fn process_event(&self, peer: &PeerClient, event: &DeploymentEvent) -> bool {
        let failed = self.service.failed_deployments();

        let entity_bytes = match peer.get_entity_file(&event.entity_id).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(entity_id = %event.entity_id, error = %e, "entity fetch failed");
                failed.report(event.clone(), FailureReason::NoEntityOrAudit, now_ms());
                return false;
            },
        };
        let audit_info = match peer.get_audit_info(event.entity_type, &event.entity_id).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(entity_id = %event.entity_id, error = %e, "audit fetch failed");
                failed.report(event.clone(), FailureReason::NoEntityOrAudit, now_ms());
                return false;
            },
        };

        let entity = match Entity::from_json_bytes(event.entity_id.clone(), &entity_bytes) {
            Ok(entity) => entity,
            Err(e) => {
                tracing::warn!(entity_id = %event.entity_id, error = %e, "unparsable synced entity");
                failed.report(event.clone(), FailureReason::NoEntityOrAudit, now_ms());
                return false;
            },
        };

        // Fetch whatever referenced content this node is missing. Failures
        // do not abort the deploy: the event must still be applied so the
        // pointers stay in sync, and the failure record drives a re-fetch
        // on the next tick.
        let referenced: Vec<String> =
            entity.referenced_hashes().into_iter().map(str::to_string).collect();
        let mut files = vec![DeploymentFile::new(ENTITY_FILE_NAME, entity_bytes)];
        let mut fetch_failed = false;
        match self.service.is_content_available(&referenced).await {
            Ok(availability) => {
                for entry in availability.into_iter().filter(|a| !a.available) {
                    match peer.get_content(&entry.cid).await {
                        Ok(bytes) => files.push(DeploymentFile::new(entry.cid, bytes)),
                        Err(e) => {
                            tracing::warn!(hash = %entry.cid, error = %e, "content fetch failed");
                            fetch_failed = true;
                        },
                    }
                }
            },
            Err(e) => {
                tracing::warn!(entity_id = %event.entity_id, error = %e, "availability check failed");
                fetch_failed = true;
            },
        }

        let origin = DeploymentOrigin::Synced {
            server_name: event.server_name.clone(),
            timestamp: event.timestamp,
        };
        let deployed = self
            .service
            .deploy(
                files,
                event.entity_id.clone(),
                audit_info.auth_chain,
                audit_info.migration_data,
                origin,
            )
            .await;

        match deployed {
            Ok(_) if fetch_failed => {
                failed.report(event.clone(), FailureReason::FetchProblem, now_ms());
                false
            },
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(entity_id = %event.entity_id, error = %e, "synced deploy failed");
                failed.report(event.clone(), FailureReason::DeploymentError, now_ms());
                false
            },
        }
    }
}
