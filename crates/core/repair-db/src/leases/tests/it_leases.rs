//! In-tree DB integration tests for the repair leases

use std::time::Duration;

use pgtemp::PgTempDB;
use topology::NodeId;
use uuid::Uuid;

use crate::{RepairDb, leases};

async fn connect(temp_db: &PgTempDB) -> RepairDb {
    RepairDb::connect_with_retry(&temp_db.connection_uri(), RepairDb::default_pool_size())
        .await
        .expect("Failed to connect to repair state db")
}

const LEASE: Duration = Duration::from_secs(60);

#[tokio::test]
async fn acquire_on_free_resource_succeeds() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;

    let holder = NodeId::new(Uuid::new_v4());

    //* When
    let lease = leases::try_acquire(&db, "repair/ks.tbl/(0, 10]", holder, LEASE)
        .await
        .expect("Failed to acquire lease");

    //* Then
    let lease = lease.expect("Lease should be granted");
    assert_eq!(lease.holder(), holder);
    assert!(lease.expires_at > lease.acquired_at);
}

#[tokio::test]
async fn acquire_on_held_resource_is_refused() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;

    let holder = NodeId::new(Uuid::new_v4());
    let contender = NodeId::new(Uuid::new_v4());

    leases::try_acquire(&db, "repair/ks.tbl/(0, 10]", holder, LEASE)
        .await
        .expect("Failed to acquire lease")
        .expect("Lease should be granted");

    //* When
    let refused = leases::try_acquire(&db, "repair/ks.tbl/(0, 10]", contender, LEASE)
        .await
        .expect("Failed to attempt acquisition");

    //* Then
    assert!(refused.is_none(), "contended lease must not be granted");

    let current = leases::get(&db, "repair/ks.tbl/(0, 10]")
        .await
        .expect("Failed to read lease")
        .expect("Lease row should exist");
    assert_eq!(current.holder(), holder);
}

#[tokio::test]
async fn reacquire_by_same_holder_refreshes() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;

    let holder = NodeId::new(Uuid::new_v4());

    let first = leases::try_acquire(&db, "repair/ks.tbl/(0, 10]", holder, LEASE)
        .await
        .expect("Failed to acquire lease")
        .expect("Lease should be granted");

    //* When
    let second = leases::try_acquire(&db, "repair/ks.tbl/(0, 10]", holder, LEASE)
        .await
        .expect("Failed to re-acquire lease")
        .expect("Own lease should be refreshed");

    //* Then
    assert_eq!(second.holder(), holder);
    assert!(second.expires_at >= first.expires_at);
}

#[tokio::test]
async fn expired_lease_is_stolen() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;

    let crashed = NodeId::new(Uuid::new_v4());
    let contender = NodeId::new(Uuid::new_v4());

    leases::try_acquire(&db, "repair/ks.tbl/(0, 10]", crashed, Duration::ZERO)
        .await
        .expect("Failed to acquire lease")
        .expect("Lease should be granted");

    //* When
    let stolen = leases::try_acquire(&db, "repair/ks.tbl/(0, 10]", contender, LEASE)
        .await
        .expect("Failed to attempt acquisition");

    //* Then
    let stolen = stolen.expect("Expired lease should be stolen");
    assert_eq!(stolen.holder(), contender);
}

#[tokio::test]
async fn renew_extends_only_for_the_holder() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;

    let holder = NodeId::new(Uuid::new_v4());
    let stranger = NodeId::new(Uuid::new_v4());

    leases::try_acquire(&db, "repair/ks.tbl/(0, 10]", holder, LEASE)
        .await
        .expect("Failed to acquire lease")
        .expect("Lease should be granted");

    //* When
    let renewed = leases::renew(&db, "repair/ks.tbl/(0, 10]", holder, LEASE)
        .await
        .expect("Failed to renew lease");
    let stranger_renewed = leases::renew(&db, "repair/ks.tbl/(0, 10]", stranger, LEASE)
        .await
        .expect("Failed to attempt renewal");

    //* Then
    assert!(renewed);
    assert!(!stranger_renewed);
}

#[tokio::test]
async fn release_frees_the_resource() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;

    let holder = NodeId::new(Uuid::new_v4());
    let next = NodeId::new(Uuid::new_v4());

    leases::try_acquire(&db, "repair/ks.tbl/(0, 10]", holder, LEASE)
        .await
        .expect("Failed to acquire lease")
        .expect("Lease should be granted");

    //* When
    let released = leases::release(&db, "repair/ks.tbl/(0, 10]", holder)
        .await
        .expect("Failed to release lease");
    let reacquired = leases::try_acquire(&db, "repair/ks.tbl/(0, 10]", next, LEASE)
        .await
        .expect("Failed to acquire released lease");

    //* Then
    assert!(released);
    assert!(reacquired.is_some(), "released lease should be free");
}
