//! Database and user management through a configured client

use std::time::Duration;

use pretty_assertions::assert_eq;
use replkeeper::replkeeper_driver::DriverError;
use replkeeper::test_helpers::{FakeCluster, three_member_topology};
use replkeeper::{
    ClusterClient, Database, EngineConfig, EngineError, OperationKind, ResourceKind, Role, User,
};

fn configured_client(cluster: &FakeCluster) -> ClusterClient {
    let config = EngineConfig {
        connection_string: "mongodb://db0:27017,db1:27017/?replicaSet=rs0".to_string(),
        retry_attempts: 2,
        read_timeout_mins: Some(1),
        ..EngineConfig::default()
    };
    config.validate().unwrap();
    ClusterClient::from_config_with_factory(&config, cluster.clone()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_database_round_trip() {
    let cluster = FakeCluster::new().with_config(three_member_topology("rs0"));
    let client = configured_client(&cluster);
    let ctx = client.context(OperationKind::Create);

    client.databases().create(&ctx, "orders").await.unwrap();
    client.databases().create(&ctx, "billing").await.unwrap();

    let ctx = client.context(OperationKind::Read);
    assert_eq!(ctx.remaining(), Some(Duration::from_secs(60)));
    assert_eq!(
        client.databases().list(&ctx).await.unwrap(),
        vec![Database::new("billing"), Database::new("orders")]
    );

    let ctx = client.context(OperationKind::Delete);
    client.databases().delete(&ctx, "orders").await.unwrap();
    assert!(!client.databases().exists(&ctx, "orders").await.unwrap());
    assert_eq!(cluster.opened(), cluster.released());
}

#[tokio::test(start_paused = true)]
async fn test_database_retries_lost_link() {
    let cluster = FakeCluster::new();
    let client = configured_client(&cluster);
    let ctx = client.context(OperationKind::Create);

    cluster.fail_next("insert", DriverError::ConnectionLost("reset by peer".into()));
    client.databases().create(&ctx, "orders").await.unwrap();
    assert_eq!(cluster.command_count("insert"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_huge_budgets_run_without_deadline() {
    let cluster = FakeCluster::new();
    let config = EngineConfig {
        connection_string: "mongodb://db0:27017,db1:27017/?replicaSet=rs0".to_string(),
        default_timeout_mins: u64::MAX / 30,
        connect_timeout_secs: u64::MAX,
        ..EngineConfig::default()
    };
    config.validate().unwrap();
    let client = ClusterClient::from_config_with_factory(&config, cluster.clone()).unwrap();

    let ctx = client.context(OperationKind::Read);
    assert_eq!(ctx.remaining(), None);
    assert!(!client.databases().exists(&ctx, "orders").await.unwrap());

    let ctx = client.context(OperationKind::Create);
    client.databases().create(&ctx, "orders").await.unwrap();
    assert!(client.databases().exists(&ctx, "orders").await.unwrap());
    assert_eq!(cluster.opened(), cluster.released());
}

#[tokio::test(start_paused = true)]
async fn test_user_round_trip() {
    let cluster = FakeCluster::new();
    let client = configured_client(&cluster);
    let ctx = client.context(OperationKind::Create);

    let reporter = User::new("reporter", "pw").with_role("read", "orders");
    client.users().create(&ctx, &reporter).await.unwrap();

    let err = client.users().create(&ctx, &reporter).await.unwrap_err();
    match err {
        EngineError::AlreadyExists { kind, name } => {
            assert_eq!(kind, ResourceKind::User);
            assert_eq!(name, "reporter");
        }
        other => panic!("expected already exists, got {other:?}"),
    }

    let ctx = client.context(OperationKind::Read);
    let imported = client.users().import_state(&ctx, "reporter").await.unwrap();
    assert_eq!(imported.roles, vec![Role::new("read", "orders")]);
    assert_eq!(imported.password, None);

    let ctx = client.context(OperationKind::Delete);
    client.users().delete(&ctx, "reporter").await.unwrap();
    let err = client.users().import_state(&ctx, "reporter").await.unwrap_err();
    assert!(matches!(err, EngineError::DoesNotExist { .. }), "{err}");
}

#[tokio::test(start_paused = true)]
async fn test_user_without_password_is_rejected() {
    let cluster = FakeCluster::new();
    let client = configured_client(&cluster);
    let ctx = client.context(OperationKind::Create);

    let user = User::new("svc", "pw").without_password();
    let err = client.users().create(&ctx, &user).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation { .. }), "{err}");
    assert_eq!(cluster.opened(), 0);
}

#[test]
fn test_missing_driver_without_factory() {
    let config = EngineConfig {
        connection_string: "mongodb://db0:27017".to_string(),
        ..EngineConfig::default()
    };
    let result = ClusterClient::from_config(&config);
    if cfg!(feature = "mongodb") {
        assert!(result.is_ok());
    } else {
        assert!(matches!(result, Err(EngineError::Configuration { .. })));
    }
}
