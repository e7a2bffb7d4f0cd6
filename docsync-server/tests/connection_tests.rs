//! Connection bookkeeping tests: latch, chunks, heartbeat state.

use docsync_engine::codec::ProtocolMode;
use docsync_engine::protocol::DeltaBatchChunkPayload;
use docsync_server::connection::OutboundFrame;
use docsync_server::{Connection, ConnectionState};
use docsync_types::{ClientId, DocumentId};
use pretty_assertions::assert_eq;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::time::sleep;

fn connection() -> (Connection, tokio::sync::mpsc::UnboundedReceiver<OutboundFrame>) {
    Connection::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn chunk(id: &str, total: u32, index: u32, data: &str) -> DeltaBatchChunkPayload {
    DeltaBatchChunkPayload {
        chunk_id: id.to_string(),
        total_chunks: total,
        chunk_index: index,
        data: data.to_string(),
    }
}

// ── Protocol latch ───────────────────────────────────────────────

#[tokio::test]
async fn first_frame_latches_the_mode() {
    let (conn, _rx) = connection();
    assert_eq!(conn.protocol_mode().await, ProtocolMode::Json);

    conn.latch_protocol(ProtocolMode::Binary).await.unwrap();
    assert_eq!(conn.protocol_mode().await, ProtocolMode::Binary);

    // Same mode keeps passing, the other is rejected.
    assert!(conn.latch_protocol(ProtocolMode::Binary).await.is_ok());
    assert!(conn.latch_protocol(ProtocolMode::Json).await.is_err());
}

// ── Lifecycle ────────────────────────────────────────────────────

#[tokio::test]
async fn connections_start_connecting() {
    let (conn, _rx) = connection();
    assert_eq!(conn.state().await, ConnectionState::Connecting);
    assert!(!conn.is_authenticated().await);
}

#[tokio::test]
async fn effective_client_id_falls_back_to_the_connection() {
    let (conn, _rx) = connection();
    assert_eq!(
        conn.effective_client_id().await,
        ClientId::new(conn.id().to_string())
    );

    conn.set_client_id(ClientId::new("editor-7")).await;
    assert_eq!(conn.effective_client_id().await, ClientId::new("editor-7"));
}

#[tokio::test]
async fn release_clears_everything() {
    let (conn, _rx) = connection();
    conn.add_subscription(DocumentId::new("d1")).await;
    conn.add_chunk(&chunk("c1", 2, 0, "partial"), Duration::from_secs(30))
        .await;

    conn.release().await;

    assert_eq!(conn.state().await, ConnectionState::Disconnected);
    assert!(conn.subscriptions().await.is_empty());
    assert_eq!(conn.pending_chunk_streams().await, 0);
}

// ── Subscriptions ────────────────────────────────────────────────

#[tokio::test]
async fn subscriptions_are_a_set() {
    let (conn, _rx) = connection();
    assert!(conn.add_subscription(DocumentId::new("d1")).await);
    assert!(!conn.add_subscription(DocumentId::new("d1")).await);
    assert!(conn.remove_subscription(&DocumentId::new("d1")).await);
    assert!(conn.take_subscriptions().await.is_empty());
}

// ── Chunk reassembly ─────────────────────────────────────────────

#[tokio::test]
async fn chunks_reassemble_in_index_order() {
    let (conn, _rx) = connection();
    let ttl = Duration::from_secs(30);

    assert!(conn.add_chunk(&chunk("c1", 3, 2, "C"), ttl).await.is_none());
    assert!(conn.add_chunk(&chunk("c1", 3, 0, "A"), ttl).await.is_none());
    let assembled = conn.add_chunk(&chunk("c1", 3, 1, "B"), ttl).await;

    assert_eq!(assembled.as_deref(), Some("ABC"));
    assert_eq!(conn.pending_chunk_streams().await, 0);
}

#[tokio::test]
async fn duplicate_chunks_do_not_complete_early() {
    let (conn, _rx) = connection();
    let ttl = Duration::from_secs(30);

    assert!(conn.add_chunk(&chunk("c1", 2, 0, "A"), ttl).await.is_none());
    assert!(conn.add_chunk(&chunk("c1", 2, 0, "A"), ttl).await.is_none());
    assert_eq!(
        conn.add_chunk(&chunk("c1", 2, 1, "B"), ttl).await.as_deref(),
        Some("AB")
    );
}

#[tokio::test]
async fn independent_streams_do_not_mix() {
    let (conn, _rx) = connection();
    let ttl = Duration::from_secs(30);

    conn.add_chunk(&chunk("c1", 2, 0, "one-"), ttl).await;
    conn.add_chunk(&chunk("c2", 2, 0, "two-"), ttl).await;
    assert_eq!(conn.pending_chunk_streams().await, 2);

    assert_eq!(
        conn.add_chunk(&chunk("c2", 2, 1, "b"), ttl).await.as_deref(),
        Some("two-b")
    );
    assert_eq!(
        conn.add_chunk(&chunk("c1", 2, 1, "a"), ttl).await.as_deref(),
        Some("one-a")
    );
}

#[tokio::test(start_paused = true)]
async fn stale_partial_streams_expire() {
    let (conn, _rx) = connection();
    let ttl = Duration::from_secs(30);

    conn.add_chunk(&chunk("old", 2, 0, "gone"), ttl).await;
    sleep(Duration::from_secs(31)).await;

    // Touching the buffers prunes the stale stream; its completion
    // never fires.
    conn.add_chunk(&chunk("new", 2, 0, "x"), ttl).await;
    assert_eq!(conn.pending_chunk_streams().await, 1);
    assert!(conn.add_chunk(&chunk("old", 2, 1, "late"), ttl).await.is_none());
}

// ── Heartbeat bookkeeping ────────────────────────────────────────

#[tokio::test]
async fn heartbeat_detects_missed_replies() {
    let (conn, _rx) = connection();

    // First probe goes out clean.
    assert!(conn.begin_ping());
    // No reply yet: the next tick reports the miss.
    assert!(!conn.begin_ping());

    conn.pong_received();
    assert!(conn.begin_ping());
}

// ── Outbound queue ───────────────────────────────────────────────

#[tokio::test]
async fn sends_preserve_order() {
    let (conn, mut rx) = connection();
    conn.send(docsync_engine::Message::pong()).unwrap();
    conn.send_ping().unwrap();
    conn.close(1000, "done");

    assert!(matches!(rx.try_recv(), Ok(OutboundFrame::Message(_))));
    assert!(matches!(rx.try_recv(), Ok(OutboundFrame::Ping)));
    assert!(matches!(rx.try_recv(), Ok(OutboundFrame::Close { code: 1000, .. })));
}
