//! In-tree DB integration tests for the daemon presence registry

use std::time::Duration;

use pgtemp::PgTempDB;
use topology::NodeId;
use uuid::Uuid;

use crate::{Connection, RepairDb, hosts};

async fn connect(temp_db: &PgTempDB) -> RepairDb {
    RepairDb::connect_with_retry(&temp_db.connection_uri(), RepairDb::default_pool_size())
        .await
        .expect("Failed to connect to repair state db")
}

#[tokio::test]
async fn register_is_idempotent_and_preserves_created_at() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;

    let host = NodeId::new(Uuid::new_v4());

    //* When
    hosts::register(&db, host)
        .await
        .expect("Failed to register host");
    let first = hosts::sql::get_by_id(&db, host.as_uuid())
        .await
        .expect("Failed to get host")
        .expect("Host not found");

    hosts::register(&db, host)
        .await
        .expect("Failed to re-register host");
    let second = hosts::sql::get_by_id(&db, host.as_uuid())
        .await
        .expect("Failed to get host")
        .expect("Host not found");

    //* Then
    assert_eq!(first.created_at, second.created_at);
    assert!(second.registered_at >= first.registered_at);
}

#[tokio::test]
async fn list_active_reflects_heartbeat_interval() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;

    let host = NodeId::new(Uuid::new_v4());
    hosts::register(&db, host)
        .await
        .expect("Failed to register host");
    hosts::update_heartbeat(&db, host)
        .await
        .expect("Failed to update heartbeat");

    //* When
    let active = hosts::list_active(&db, Duration::from_secs(3600))
        .await
        .expect("Failed to list active hosts");
    let none_active = hosts::list_active(&db, Duration::ZERO)
        .await
        .expect("Failed to list active hosts with zero interval");

    //* Then
    assert!(active.contains(&host));
    assert!(none_active.is_empty());
}

#[tokio::test]
async fn heartbeat_loop_refreshes_the_heartbeat_and_pins_the_host_id() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;

    let host = NodeId::new(Uuid::new_v4());
    hosts::register(&db, host)
        .await
        .expect("Failed to register host");
    let registered = hosts::sql::get_by_id(&db, host.as_uuid())
        .await
        .expect("Failed to get host")
        .expect("Host not found");

    //* When
    let heartbeat = hosts::heartbeat_loop(&db, host)
        .await
        .expect("Failed to set up heartbeat loop");
    let _heartbeat_task = tokio::spawn(heartbeat);

    // The loop's first tick fires immediately
    tokio::time::sleep(Duration::from_millis(300)).await;

    //* Then
    let refreshed = hosts::sql::get_by_id(&db, host.as_uuid())
        .await
        .expect("Failed to get host")
        .expect("Host not found");
    assert!(
        refreshed.heartbeat_at > registered.heartbeat_at,
        "heartbeat should have been refreshed by the loop"
    );

    // A second daemon claiming the same host id is refused
    let second = hosts::heartbeat_loop(&db, host).await;
    assert!(
        matches!(second, Err(crate::Error::HostIdInUse(id)) if id == host),
        "duplicate host id must be refused"
    );
}

#[tokio::test]
async fn host_id_advisory_lock_is_exclusive_across_connections() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;

    let host = NodeId::new(Uuid::new_v4());
    hosts::register(&db, host)
        .await
        .expect("Failed to register host");

    let mut first_conn = Connection::connect(&temp_db.connection_uri())
        .await
        .expect("Failed to open first connection");
    let mut second_conn = Connection::connect(&temp_db.connection_uri())
        .await
        .expect("Failed to open second connection");

    //* When
    let first = hosts::sql::lock_host_id(&mut first_conn, host.as_uuid())
        .await
        .expect("Failed to lock host id");
    let second = hosts::sql::lock_host_id(&mut second_conn, host.as_uuid())
        .await
        .expect("Failed to attempt second lock");

    //* Then
    assert!(first, "first daemon should win the host id lock");
    assert!(!second, "second daemon must be refused");

    // The lock dies with the owning connection; give the server a moment to
    // notice the closed session.
    drop(first_conn);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let retry = hosts::sql::lock_host_id(&mut second_conn, host.as_uuid())
        .await
        .expect("Failed to retry lock");
    assert!(retry, "lock should be free after the owner disconnects");
}
