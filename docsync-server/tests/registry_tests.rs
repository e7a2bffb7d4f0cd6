//! Connection registry tests: indexes, caps, teardown.

use docsync_server::connection::OutboundFrame;
use docsync_server::{Connection, ConnectionRegistry};
use docsync_types::{ClientId, UserId};
use pretty_assertions::assert_eq;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

fn localhost() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn connection() -> (Arc<Connection>, tokio::sync::mpsc::UnboundedReceiver<OutboundFrame>) {
    let (connection, rx) = Connection::new(localhost());
    (Arc::new(connection), rx)
}

#[tokio::test]
async fn add_get_remove_roundtrip() {
    let registry = ConnectionRegistry::new(16);
    let (conn, _rx) = connection();

    assert!(registry.add(Arc::clone(&conn)).await);
    assert!(registry.get(&conn.id()).await.is_some());

    registry.remove(&conn.id()).await;
    assert!(registry.get(&conn.id()).await.is_none());
}

#[tokio::test]
async fn global_cap_rejects_additions() {
    let registry = ConnectionRegistry::new(2);
    let (a, _ra) = connection();
    let (b, _rb) = connection();
    let (c, _rc) = connection();

    assert!(registry.add(a).await);
    assert!(registry.add(b).await);
    assert!(!registry.add(c).await);
    assert_eq!(registry.metrics().await.connections, 2);
}

#[tokio::test]
async fn user_and_client_indexes_follow_links() {
    let registry = ConnectionRegistry::new(16);
    let (a, _ra) = connection();
    let (b, _rb) = connection();
    registry.add(Arc::clone(&a)).await;
    registry.add(Arc::clone(&b)).await;

    let user = UserId::new("u1");
    registry.link_user(a.id(), user.clone()).await;
    registry.link_user(b.id(), user.clone()).await;
    registry.link_client(a.id(), ClientId::new("c1")).await;

    assert_eq!(registry.get_by_user(&user).await.len(), 2);
    assert_eq!(registry.get_by_client(&ClientId::new("c1")).await.len(), 1);

    let metrics = registry.metrics().await;
    assert_eq!(metrics.connections, 2);
    assert_eq!(metrics.users, 1);
    assert_eq!(metrics.clients, 1);
}

#[tokio::test]
async fn removal_clears_every_index() {
    let registry = ConnectionRegistry::new(16);
    let (conn, _rx) = connection();
    registry.add(Arc::clone(&conn)).await;
    registry.link_user(conn.id(), UserId::new("u1")).await;
    registry.link_client(conn.id(), ClientId::new("c1")).await;

    registry.remove(&conn.id()).await;

    assert!(registry.get_by_user(&UserId::new("u1")).await.is_empty());
    assert!(registry.get_by_client(&ClientId::new("c1")).await.is_empty());
    let metrics = registry.metrics().await;
    assert_eq!(metrics.connections, 0);
    assert_eq!(metrics.users, 0);
    assert_eq!(metrics.clients, 0);
}

#[tokio::test]
async fn linking_an_unknown_connection_is_a_no_op() {
    let registry = ConnectionRegistry::new(16);
    let (conn, _rx) = connection();
    // Never added.
    registry.link_user(conn.id(), UserId::new("u1")).await;
    assert_eq!(registry.metrics().await.users, 0);
}

#[tokio::test]
async fn get_many_skips_unknown_ids() {
    let registry = ConnectionRegistry::new(16);
    let (a, _ra) = connection();
    let (b, _rb) = connection();
    registry.add(Arc::clone(&a)).await;

    let found = registry.get_many(&[a.id(), b.id()]).await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), a.id());
}

#[tokio::test]
async fn close_all_sends_close_frames_and_clears() {
    let registry = ConnectionRegistry::new(16);
    let (a, mut ra) = connection();
    let (b, mut rb) = connection();
    registry.add(Arc::clone(&a)).await;
    registry.add(Arc::clone(&b)).await;

    registry.close_all(1001, "server shutting down").await;

    for rx in [&mut ra, &mut rb] {
        match rx.try_recv() {
            Ok(OutboundFrame::Close { code, reason }) => {
                assert_eq!(code, 1001);
                assert_eq!(reason, "server shutting down");
            }
            other => panic!("expected Close frame, got {other:?}"),
        }
    }
    assert_eq!(registry.metrics().await.connections, 0);
}
