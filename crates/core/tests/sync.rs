//! Synchronization integration tests.
//!
//! Runs real multi-node scenarios with an in-process peer transport: history
//! replication, missing-content handling, retry, convergence under event
//! reordering, and the immutable-time boundary.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    active_entity, build_service, build_service_with, deploy_local, deploy_synced, EntityBuilder,
    InProcessApi,
};
use depot_core::cluster::{ClusterClient, HardcodedDaoClient, ServerApi};
use depot_core::{ContentService, DeploymentService, Synchronizer};
use depot_types::{content_cid, EngineConfig, EntityType, FailureReason};

/// A node-b synchronizer pulling from node-a over the in-process transport.
async fn sync_pair() -> (Arc<DeploymentService>, Arc<DeploymentService>, Arc<InProcessApi>, Synchronizer)
{
    let node_a = build_service("node-a").await;
    let node_b = build_service("node-b").await;
    let api = Arc::new(InProcessApi::new(vec![
        ("http://node-a", node_a.clone()),
        ("http://node-b", node_b.clone()),
    ]));
    let dao = Arc::new(HardcodedDaoClient::new(vec![
        "http://node-a".to_string(),
        "http://node-b".to_string(),
    ]));
    let cluster = Arc::new(ClusterClient::new(
        dao,
        api.clone() as Arc<dyn ServerApi>,
        "node-b".to_string(),
    ));
    let synchronizer = Synchronizer::new(node_b.clone(), cluster, Duration::from_millis(50));
    (node_a, node_b, api, synchronizer)
}

#[tokio::test]
async fn replicates_a_deployment() {
    let (node_a, node_b, _api, synchronizer) = sync_pair().await;

    let built = EntityBuilder::scene().content("model.glb", b"geometry").build();
    let deployed_at = deploy_local(&node_a, &built).await.expect("deploy on a");

    synchronizer.tick().await;

    // Pointer state, content, audit, and history all replicated.
    assert_eq!(
        active_entity(&node_b, EntityType::Scene, "0,0").await,
        Some(built.entity_id.clone())
    );
    let model_hash = content_cid(b"geometry");
    assert_eq!(node_b.get_content(&model_hash).await.unwrap(), Some(b"geometry".to_vec()));

    let history = node_b.get_history(None, None, None).await.unwrap();
    assert_eq!(history.events.len(), 1);
    assert_eq!(history.events[0].server_name, "node-a");
    assert_eq!(history.events[0].timestamp, deployed_at);

    let audit = node_b
        .get_audit_info(EntityType::Scene, &built.entity_id)
        .await
        .unwrap()
        .expect("audit replicated");
    assert_eq!(audit.info.deployed_timestamp, deployed_at);
    assert!(node_b.failed_deployments().list().is_empty());
}

#[tokio::test]
async fn repeated_ticks_are_idempotent() {
    let (node_a, node_b, _api, synchronizer) = sync_pair().await;
    let built = EntityBuilder::scene().build();
    deploy_local(&node_a, &built).await.expect("deploy on a");

    synchronizer.tick().await;
    synchronizer.tick().await;
    synchronizer.tick().await;

    assert_eq!(node_b.get_history(None, None, None).await.unwrap().events.len(), 1);
}

// Scenario: the peer's history and entity are reachable but the content
// blob is not. The pointer must still move; the failure drives a re-fetch.
#[tokio::test]
async fn unreachable_content_is_recorded_and_retried() {
    let (node_a, node_b, api, synchronizer) = sync_pair().await;

    let built = EntityBuilder::scene().content("model.glb", b"geometry").build();
    deploy_local(&node_a, &built).await.expect("deploy on a");

    let model_hash = content_cid(b"geometry");
    api.block_content(&model_hash);

    synchronizer.tick().await;

    // Pointer is in sync even though the content is missing.
    assert_eq!(
        active_entity(&node_b, EntityType::Scene, "0,0").await,
        Some(built.entity_id.clone())
    );
    assert_eq!(
        node_b.failed_deployments().status(&built.entity_id),
        Some(FailureReason::FetchProblem)
    );
    assert_eq!(node_b.get_content(&model_hash).await.unwrap(), None);

    // Next sweep re-fetches the content and clears the failure.
    api.unblock_content(&model_hash);
    synchronizer.tick().await;

    assert_eq!(node_b.get_content(&model_hash).await.unwrap(), Some(b"geometry".to_vec()));
    assert_eq!(node_b.failed_deployments().status(&built.entity_id), None);
}

#[tokio::test]
async fn missing_entity_records_no_entity_or_audit() {
    let (node_a, node_b, api, synchronizer) = sync_pair().await;

    let built = EntityBuilder::scene().build();
    deploy_local(&node_a, &built).await.expect("deploy on a");

    // The entity descriptor itself is unfetchable.
    api.block_content(&built.entity_id);
    synchronizer.tick().await;

    assert_eq!(
        node_b.failed_deployments().status(&built.entity_id),
        Some(FailureReason::NoEntityOrAudit)
    );
    assert_eq!(active_entity(&node_b, EntityType::Scene, "0,0").await, None);

    // Watermark must not advance past the failed event, so recovery needs
    // no manual intervention.
    api.unblock_content(&built.entity_id);
    synchronizer.tick().await;
    assert_eq!(
        active_entity(&node_b, EntityType::Scene, "0,0").await,
        Some(built.entity_id.clone())
    );
    assert_eq!(node_b.failed_deployments().status(&built.entity_id), None);
}

#[tokio::test]
async fn converges_under_reordered_replay() {
    // The same four deployments applied in two different orders must yield
    // identical pointer state.
    let e1 = EntityBuilder::scene().pointers(&["0,0", "0,1"]).timestamp(1_000).build();
    let e2 = EntityBuilder::scene().pointers(&["0,1", "0,2"]).timestamp(2_000).build();
    let e3 = EntityBuilder::scene().pointers(&["0,0"]).timestamp(1_500).build();
    let e4 = EntityBuilder::scene().pointers(&["0,2", "0,3"]).timestamp(1_200).build();

    let node_x = build_service("node-x").await;
    for e in [&e1, &e2, &e3, &e4] {
        deploy_synced(&node_x, e, "origin", e.timestamp).await.expect("deploy on x");
    }

    let node_y = build_service("node-y").await;
    for e in [&e4, &e3, &e2, &e1] {
        deploy_synced(&node_y, e, "origin", e.timestamp).await.expect("deploy on y");
    }

    for pointer in ["0,0", "0,1", "0,2", "0,3"] {
        assert_eq!(
            active_entity(&node_x, EntityType::Scene, pointer).await,
            active_entity(&node_y, EntityType::Scene, pointer).await,
            "divergence on pointer {pointer}"
        );
    }
    assert_eq!(
        node_x.get_active_pointers(EntityType::Scene).await.unwrap(),
        node_y.get_active_pointers(EntityType::Scene).await.unwrap()
    );
}

#[tokio::test]
async fn equal_timestamps_converge_via_id_tie_break() {
    let e1 = EntityBuilder::scene().pointers(&["5,5"]).timestamp(1_000).content("a", b"x").build();
    let e2 = EntityBuilder::scene().pointers(&["5,5"]).timestamp(1_000).content("b", b"y").build();

    let node_x = build_service("node-x").await;
    deploy_synced(&node_x, &e1, "origin", 1_000).await.unwrap();
    deploy_synced(&node_x, &e2, "origin", 1_000).await.unwrap();

    let node_y = build_service("node-y").await;
    deploy_synced(&node_y, &e2, "origin", 1_000).await.unwrap();
    deploy_synced(&node_y, &e1, "origin", 1_000).await.unwrap();

    let winner = if e1.entity_id > e2.entity_id { &e1.entity_id } else { &e2.entity_id };
    assert_eq!(active_entity(&node_x, EntityType::Scene, "5,5").await.as_ref(), Some(winner));
    assert_eq!(active_entity(&node_y, EntityType::Scene, "5,5").await.as_ref(), Some(winner));
}

#[tokio::test]
async fn backdated_events_below_the_watermark_are_refused() {
    let node_a = build_service("node-a").await;
    // Node B declares history final immediately: any past event timestamp
    // is below the watermark once one event lands.
    let node_b = build_service_with(EngineConfig {
        server_name: "node-b".to_string(),
        immutable_window_ms: 0,
        ..EngineConfig::default()
    })
    .await;

    let anchor = EntityBuilder::scene().pointers(&["9,9"]).timestamp(5_000).build();
    deploy_synced(&node_b, &anchor, "origin", 5_000).await.expect("anchor event");

    let backdated = EntityBuilder::scene().pointers(&["9,8"]).timestamp(1_000).build();
    deploy_synced(&node_a, &backdated, "origin", 1_000).await.expect("deploy on a");

    let api = Arc::new(InProcessApi::new(vec![
        ("http://node-a", node_a.clone()),
        ("http://node-b", node_b.clone()),
    ]));
    let dao = Arc::new(HardcodedDaoClient::new(vec!["http://node-a".to_string()]));
    let cluster = Arc::new(ClusterClient::new(
        dao,
        api.clone() as Arc<dyn ServerApi>,
        "node-b".to_string(),
    ));
    let synchronizer = Synchronizer::new(node_b.clone(), cluster, Duration::from_millis(50));

    synchronizer.tick().await;

    assert_eq!(active_entity(&node_b, EntityType::Scene, "9,8").await, None);
    assert_eq!(
        node_b.failed_deployments().status(&backdated.entity_id),
        Some(FailureReason::DeploymentError)
    );
}

#[tokio::test]
async fn run_loop_stops_on_cancellation() {
    let (node_a, node_b, _api, synchronizer) = sync_pair().await;
    let built = EntityBuilder::scene().build();
    deploy_local(&node_a, &built).await.expect("deploy on a");

    let token = tokio_util::sync::CancellationToken::new();
    let run_token = token.clone();
    let handle = tokio::spawn(async move { synchronizer.run(run_token).await });

    // Give the loop a couple of ticks, then stop it.
    tokio::time::sleep(Duration::from_millis(200)).await;
    token.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("run loop must stop promptly")
        .expect("run task must not panic");

    assert_eq!(
        active_entity(&node_b, EntityType::Scene, "0,0").await,
        Some(built.entity_id)
    );
}
