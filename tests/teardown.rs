//! Closing a connection fails everything still waiting on it.

use std::time::Duration;

use futures::future::join_all;
use serde_json::json;
use tandem_jsonrpc::prelude::*;
use tandem_jsonrpc_integration_tests::{connect, raw_client, server_dispatcher};

const PENDING: usize = 5;

#[tokio::test]
async fn test_peer_disconnect_fails_pending_requests() {
    let (connection, mut peer, _issues) = raw_client(Dispatcher::new());
    let remote = connection.remote();

    let mut pending = Vec::new();
    for i in 0..PENDING {
        let response = remote
            .request("echo", Some(Payload::Json(json!({ "value": i }))))
            .await
            .unwrap();
        pending.push(response);
    }
    for _ in 0..PENDING {
        peer.recv_json().await;
    }
    assert_eq!(connection.pending_requests(), PENDING);

    drop(peer);

    let outcomes = tokio::time::timeout(Duration::from_secs(2), join_all(pending))
        .await
        .expect("pending requests fail once the stream ends");
    assert_eq!(outcomes.len(), PENDING);
    for outcome in outcomes {
        assert!(matches!(outcome, Err(RpcError::ConnectionClosed)));
    }

    connection.closed().await;
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert_eq!(connection.pending_requests(), 0);

    // Nothing new is accepted afterwards
    let error = remote.request("ping", Some(Payload::empty_object())).await.unwrap_err();
    assert!(error.is_connection_closed());
    let error = remote.notify("exit", None).await.unwrap_err();
    assert!(error.is_connection_closed());
}

#[tokio::test]
async fn test_close_fails_pending_requests() {
    let (connection, mut peer, _issues) = raw_client(Dispatcher::new());
    let remote = connection.remote();

    let first = remote.request("slow", None).await.unwrap();
    let second = remote.request("slow", None).await.unwrap();
    peer.recv_json().await;
    peer.recv_json().await;

    connection.close();
    connection.close();

    assert!(matches!(first.await, Err(RpcError::ConnectionClosed)));
    assert!(matches!(second.await, Err(RpcError::ConnectionClosed)));
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert!(matches!(
        remote.request("slow", None).await,
        Err(RpcError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_close_cancels_running_handlers() {
    let peers = connect(server_dispatcher(), Dispatcher::new());

    let pending = peers.client.remote().request("slow", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The server stops; its handler is cancelled and the client sees the end of stream
    peers.server.close();
    peers.server.closed().await;

    let outcome = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .expect("client request settles after the server closes");
    assert!(outcome.is_err());
}

#[tokio::test]
async fn test_dropping_connection_closes_the_peer() {
    let peers = connect(server_dispatcher(), Dispatcher::new());
    let client = peers.client;
    let remote = client.remote();

    assert_eq!(
        remote
            .request("ping", Some(Payload::empty_object()))
            .await
            .unwrap()
            .await
            .unwrap()
            .to_value(),
        json!({})
    );

    drop(peers.server);
    tokio::time::timeout(Duration::from_secs(2), client.closed())
        .await
        .expect("client closes when the server goes away");
    assert!(remote.notify("exit", None).await.is_err());
}
