//! Replica-set lifecycle against the in-memory cluster

use std::time::Duration;

use pretty_assertions::assert_eq;
use replkeeper::replkeeper_driver::{ConnectMode, DriverError};
use replkeeper::test_helpers::{FakeCluster, status_with_roles, three_member_topology};
use replkeeper::{
    ClusterClient, EngineError, Member, MemberRole, OperationContext, OperationKind,
    ReplicaSetState,
};
use tokio::time::Instant;

const SET_URI: &str = "mongodb://db0:27017,db1:27017,db2:27017/?replicaSet=rs0";

fn client_for(cluster: &FakeCluster) -> ClusterClient {
    ClusterClient::builder(SET_URI)
        .with_factory(cluster.clone())
        .with_retry_delay(Duration::from_millis(100))
        .build()
        .unwrap()
}

fn secondaries() -> Vec<MemberRole> {
    vec![MemberRole::Secondary, MemberRole::Secondary, MemberRole::Secondary]
}

fn one_primary() -> Vec<MemberRole> {
    vec![MemberRole::Primary, MemberRole::Secondary, MemberRole::Secondary]
}

fn two_primaries() -> Vec<MemberRole> {
    vec![MemberRole::Primary, MemberRole::Primary, MemberRole::Secondary]
}

#[tokio::test(start_paused = true)]
async fn test_create_waits_for_quorum() {
    let cluster = FakeCluster::new().with_status_script([
        status_with_roles("rs0", &secondaries()),
        status_with_roles("rs0", &one_primary()),
    ]);
    let client = client_for(&cluster);
    let ctx = client.context(OperationKind::Create);
    let started = Instant::now();

    client
        .replica_set()
        .create(&ctx, &three_member_topology("rs0"))
        .await
        .unwrap();

    assert_eq!(cluster.command_count("replSetInitiate"), 1);
    assert_eq!(cluster.command_count("replSetGetStatus"), 2);
    assert_eq!(cluster.command_count("buildInfo"), 1);
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(cluster.open_modes().iter().all(|m| *m == ConnectMode::Direct));
    assert_eq!(cluster.opened(), cluster.released());

    let stored = cluster.config().unwrap();
    assert_eq!(stored.version, Some(1));
    assert_eq!(stored.members.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_create_restarts_after_transient_failure() {
    let cluster = FakeCluster::new();
    cluster.fail_next(
        "replSetInitiate",
        DriverError::ConnectionLost("reset by peer".into()),
    );
    let client = client_for(&cluster);
    let ctx = client.context(OperationKind::Create);

    client
        .replica_set()
        .create(&ctx, &three_member_topology("rs0"))
        .await
        .unwrap();

    assert_eq!(cluster.command_count("replSetInitiate"), 2);
    assert_eq!(cluster.opened(), cluster.released());
    assert_eq!(cluster.config().unwrap().version, Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_create_adopts_same_named_set() {
    let cluster = FakeCluster::new().with_config(three_member_topology("rs0"));
    let client = client_for(&cluster);
    let ctx = OperationContext::new();

    client
        .replica_set()
        .create(&ctx, &three_member_topology("rs0"))
        .await
        .unwrap();
    assert_eq!(cluster.command_count("replSetInitiate"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_create_refuses_foreign_set() {
    let cluster = FakeCluster::new().with_config(three_member_topology("other"));
    let client = client_for(&cluster);
    let ctx = OperationContext::new();

    let err = client
        .replica_set()
        .create(&ctx, &three_member_topology("rs0"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "replica set 'other' already exists");
    assert_eq!(cluster.command_count("replSetInitiate"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_topology_sends_nothing() {
    let cluster = FakeCluster::new();
    let client = client_for(&cluster);
    let ctx = OperationContext::new();

    let mut desired = three_member_topology("rs0");
    desired.members.push(Member::new(0, "db9:27017"));
    let err = client.replica_set().create(&ctx, &desired).await.unwrap_err();

    assert!(matches!(err, EngineError::Validation { .. }), "{err}");
    assert_eq!(cluster.opened(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_version_fails_once() {
    let cluster = FakeCluster::new().with_version("5.0.3");
    let client = client_for(&cluster);
    let ctx = OperationContext::new();

    let err = client
        .replica_set()
        .create(&ctx, &three_member_topology("rs0"))
        .await
        .unwrap_err();

    match err {
        EngineError::UnsupportedVersion { observed, required } => {
            assert_eq!(observed, "5.0.3");
            assert_eq!(required, "6");
        }
        other => panic!("expected unsupported version, got {other:?}"),
    }
    assert_eq!(cluster.command_count("buildInfo"), 1);
    assert_eq!(cluster.command_count("replSetInitiate"), 0);
    assert_eq!(cluster.opened(), 1);
    assert_eq!(cluster.released(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_update_increments_version() {
    let cluster = FakeCluster::new().with_config(three_member_topology("rs0"));
    let client = client_for(&cluster);
    let ctx = client.context(OperationKind::Update);

    let desired = three_member_topology("rs0").with_member(Member::new(3, "db3:27017").hidden());
    client.replica_set().update(&ctx, &desired).await.unwrap();

    let stored = cluster.config().unwrap();
    assert_eq!(stored.version, Some(2));
    assert_eq!(stored.members.len(), 4);
    assert_eq!(stored.member(3).and_then(|m| m.hidden), Some(true));
    assert!(cluster.open_modes().iter().all(|m| *m == ConnectMode::SetAware));

    client.replica_set().update(&ctx, &desired).await.unwrap();
    assert_eq!(cluster.config().unwrap().version, Some(3));
}

#[tokio::test(start_paused = true)]
async fn test_update_refuses_unstable_set() {
    let cluster = FakeCluster::new()
        .with_config(three_member_topology("rs0"))
        .with_status_script([status_with_roles("rs0", &two_primaries())]);
    let client = client_for(&cluster);
    let ctx = OperationContext::new();

    let err = client
        .replica_set()
        .update(&ctx, &three_member_topology("rs0"))
        .await
        .unwrap_err();

    match err {
        EngineError::NotReady { name, detail } => {
            assert_eq!(name, "rs0");
            assert_eq!(detail, "2 primaries");
        }
        other => panic!("expected not ready, got {other:?}"),
    }
    assert_eq!(cluster.command_count("replSetReconfig"), 0);
    assert_eq!(cluster.command_count("replSetGetStatus"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_update_gate_waits_for_more_observations() {
    let cluster = FakeCluster::new()
        .with_config(three_member_topology("rs0"))
        .with_status_script([
            status_with_roles("rs0", &secondaries()),
            status_with_roles("rs0", &one_primary()),
        ]);
    let client = ClusterClient::builder(SET_URI)
        .with_factory(cluster.clone())
        .with_readiness_gate_observations(3)
        .build()
        .unwrap();
    let ctx = OperationContext::new();

    client
        .replica_set()
        .update(&ctx, &three_member_topology("rs0"))
        .await
        .unwrap();
    assert_eq!(cluster.command_count("replSetReconfig"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exists_distinguishes_bootstrap_states() {
    let cluster = FakeCluster::new();
    let client = client_for(&cluster);
    let ctx = OperationContext::new();
    assert!(!client.replica_set().exists(&ctx, "rs0").await.unwrap());

    let cluster = FakeCluster::new().with_config(three_member_topology("rs0"));
    let client_with_set = client_for(&cluster);
    assert!(client_with_set.replica_set().exists(&ctx, "rs0").await.unwrap());
    assert!(!client_with_set.replica_set().exists(&ctx, "rs1").await.unwrap());

    let cluster = FakeCluster::new().with_replication_disabled();
    let err = client_for(&cluster)
        .replica_set()
        .exists(&ctx, "rs0")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ReplicationDisabled));
    assert_eq!(cluster.command_count("replSetGetConfig"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_import_returns_normalized_topology() {
    let cluster = FakeCluster::new().with_config(three_member_topology("rs0"));
    let client = client_for(&cluster);
    let ctx = client.context(OperationKind::Read);

    let imported = client.replica_set().import_state(&ctx, "rs0").await.unwrap();
    assert_eq!(imported, three_member_topology("rs0"));

    let raw = client.replica_set().read(&ctx).await.unwrap();
    assert_eq!(raw.version, None);
    assert!(raw.settings.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_import_requires_matching_name_and_stability() {
    let cluster = FakeCluster::new().with_config(three_member_topology("rs0"));
    let client = client_for(&cluster);
    let ctx = OperationContext::new();

    let err = client
        .replica_set()
        .import_state(&ctx, "other")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "replica set 'other' does not exist");

    cluster.set_status_script([status_with_roles("rs0", &secondaries())]);
    let err = client
        .replica_set()
        .import_state(&ctx, "rs0")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotReady { .. }), "{err}");
}

#[tokio::test(start_paused = true)]
async fn test_ready_observes_cancellation_within_one_interval() {
    let cluster = FakeCluster::new()
        .with_config(three_member_topology("rs0"))
        .with_status_script([status_with_roles("rs0", &secondaries())]);
    let client = client_for(&cluster);
    let ctx = OperationContext::new();
    let started = Instant::now();

    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        canceller.cancel();
    });

    let err = client.replica_set().ready(&ctx, "rs0").await.unwrap_err();
    assert!(matches!(err, EngineError::Cancelled { .. }), "{err}");
    assert!(started.elapsed() < Duration::from_secs(12));
}

#[tokio::test(start_paused = true)]
async fn test_ready_timeout_carries_last_observation() {
    let cluster = FakeCluster::new()
        .with_config(three_member_topology("rs0"))
        .with_status_script([status_with_roles("rs0", &two_primaries())]);
    let client = client_for(&cluster);
    let ctx = OperationContext::with_timeout(Duration::from_secs(12));

    match client.replica_set().ready(&ctx, "rs0").await.unwrap_err() {
        EngineError::Timeout {
            operation,
            last_observation,
            ..
        } => {
            assert_eq!(operation, "ready");
            assert_eq!(last_observation.as_deref(), Some("2 primaries"));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(cluster.opened(), cluster.released());
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_respect_retry_bound() {
    let cluster = FakeCluster::new().with_config(three_member_topology("rs0"));
    let client = ClusterClient::builder(SET_URI)
        .with_factory(cluster.clone())
        .with_retry_attempts(3)
        .with_retry_delay(Duration::from_millis(100))
        .build()
        .unwrap();
    let ctx = OperationContext::new();

    for _ in 0..3 {
        cluster.fail_next_open(DriverError::ConnectionFailed("connection refused".into()));
    }
    let err = client.replica_set().exists(&ctx, "rs0").await.unwrap_err();
    assert!(matches!(err, EngineError::Connection { .. }), "{err}");
    assert_eq!(cluster.open_modes().len(), 3);
    assert_eq!(cluster.opened(), 0);

    for _ in 0..2 {
        cluster.fail_next_open(DriverError::ConnectionFailed("connection refused".into()));
    }
    assert!(client.replica_set().exists(&ctx, "rs0").await.unwrap());
    assert_eq!(cluster.open_modes().len(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_unrecoverable_command_failure_is_not_retried() {
    let cluster = FakeCluster::new().with_config(three_member_topology("rs0"));
    let client = client_for(&cluster);
    let ctx = OperationContext::new();

    cluster.fail_next(
        "replSetReconfig",
        DriverError::command_named(103, "NewReplicaSetConfigurationIncompatible", "stale"),
    );
    let err = client
        .replica_set()
        .update(&ctx, &three_member_topology("rs0"))
        .await
        .unwrap_err();
    assert!(err.is_unrecoverable());
    assert_eq!(err.server_code(), Some(103));
    assert_eq!(cluster.command_count("replSetReconfig"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_observe_classifies_lifecycle() {
    let cluster = FakeCluster::new();
    let client = client_for(&cluster);
    let ctx = OperationContext::new();
    assert_eq!(
        client.replica_set().observe(&ctx, "rs0").await.unwrap(),
        ReplicaSetState::Absent
    );

    client
        .replica_set()
        .create(&ctx, &three_member_topology("rs0"))
        .await
        .unwrap();
    assert_eq!(
        client.replica_set().observe(&ctx, "rs0").await.unwrap(),
        ReplicaSetState::Stable
    );

    cluster.set_status_script([status_with_roles("rs0", &two_primaries())]);
    assert_eq!(
        client.replica_set().observe(&ctx, "rs0").await.unwrap(),
        ReplicaSetState::Degraded
    );

    let status = client.replica_set().status(&ctx).await.unwrap();
    assert_eq!(status.primary_count(), 2);
}
