use std::time::Duration;

use super::*;
use crate::protocol::encode;
use warden_unix::socket::{TransportError, resolve_address};

const TIMEOUT: Duration = Duration::from_millis(200);

fn own_pid() -> u32 {
    std::process::id()
}

/// Dispatcher whose store authorizes the test process itself.
fn authorized_dispatcher(dir: &Path) -> Dispatcher {
    let socket = AuthSocket::bind(&dir.join("worker.sock"), TIMEOUT).unwrap();
    let mut access = AccessStore::new(5);
    access.authorize(own_pid()).unwrap();
    Dispatcher::new(socket, access)
}

/// Client socket already pointed at the dispatcher.
fn client_for(dir: &Path, dispatcher: &Dispatcher) -> AuthSocket {
    let client = AuthSocket::bind(&dir.join("client.sock"), TIMEOUT).unwrap();
    client
        .connect(&resolve_address(dispatcher.socket().path()).unwrap())
        .unwrap();
    client
}

fn metadata(pid: u32, payload: Vec<u8>) -> ClientMetadata {
    ClientMetadata {
        sender: None,
        credentials: PeerCredentials {
            pid,
            uid: 1000,
            gid: 1000,
        },
        payload,
    }
}

fn authorize_bytes(seq: u64, old_pid: u32, new_pid: u32) -> Vec<u8> {
    encode(seq, Payload::AuthorizeProcessRequest { old_pid, new_pid }).unwrap()
}

// ========================================================================
// Handler routing (no I/O)
// ========================================================================

#[tokio::test]
async fn heartbeat_echoes_sequence_number() {
    let tmp = tempfile::tempdir().unwrap();
    let mut dispatcher = authorized_dispatcher(tmp.path());

    let md = metadata(own_pid(), encode(7, Payload::HeartbeatRequest).unwrap());
    let response = dispatcher.handle(&md).unwrap();
    assert_eq!(response, Message::new(7, Payload::HeartbeatResponse));
}

#[tokio::test]
async fn unauthorized_sender_is_dropped() {
    let tmp = tempfile::tempdir().unwrap();
    let mut dispatcher = authorized_dispatcher(tmp.path());
    let before = dispatcher.access_store().clone();

    let md = metadata(own_pid() + 1, authorize_bytes(1, 0, 4242));
    assert_eq!(
        dispatcher.handle(&md),
        Err(Disposition::Unauthorized { pid: own_pid() + 1 })
    );
    assert_eq!(dispatcher.access_store(), &before);
}

#[tokio::test]
async fn malformed_payload_is_dropped() {
    let tmp = tempfile::tempdir().unwrap();
    let mut dispatcher = authorized_dispatcher(tmp.path());

    let md = metadata(own_pid(), vec![1, 2, 3]);
    assert_eq!(dispatcher.handle(&md), Err(Disposition::Malformed));
}

#[tokio::test]
async fn responses_are_not_handled() {
    let tmp = tempfile::tempdir().unwrap();
    let mut dispatcher = authorized_dispatcher(tmp.path());

    for payload in [Payload::HeartbeatResponse, Payload::AuthorizeProcessResponse] {
        let md = metadata(own_pid(), encode(1, payload).unwrap());
        assert_eq!(
            dispatcher.handle(&md),
            Err(Disposition::Unhandled { tag: payload.tag() })
        );
    }
}

#[tokio::test]
async fn authorize_new_process_once() {
    let tmp = tempfile::tempdir().unwrap();
    let mut dispatcher = authorized_dispatcher(tmp.path());

    let md = metadata(own_pid(), authorize_bytes(3, 0, 42));
    let response = dispatcher.handle(&md).unwrap();
    assert_eq!(response, Message::new(3, Payload::AuthorizeProcessResponse));
    assert!(dispatcher.access_store().is_authorized(42));

    assert_eq!(
        dispatcher.handle(&md),
        Err(Disposition::Rejected {
            error: AccessError::AlreadyAuthorized(42)
        })
    );
}

#[tokio::test]
async fn authorize_swaps_old_process() {
    let tmp = tempfile::tempdir().unwrap();
    let mut dispatcher = authorized_dispatcher(tmp.path());
    dispatcher.access_store_mut().authorize(500).unwrap();

    let md = metadata(own_pid(), authorize_bytes(4, 500, 501));
    dispatcher.handle(&md).unwrap();

    let store = dispatcher.access_store();
    assert!(store.is_authorized(501));
    assert!(!store.is_authorized(500));
    assert_eq!(store.entries(), &[own_pid(), 501]);
}

#[tokio::test]
async fn swap_of_unknown_process_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let mut dispatcher = authorized_dispatcher(tmp.path());

    let md = metadata(own_pid(), authorize_bytes(4, 600, 601));
    assert_eq!(
        dispatcher.handle(&md),
        Err(Disposition::Rejected {
            error: AccessError::NotFound(600)
        })
    );
    assert_eq!(dispatcher.access_store().entries(), &[own_pid()]);
}

#[tokio::test]
async fn authorize_at_capacity_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let socket = AuthSocket::bind(&tmp.path().join("worker.sock"), TIMEOUT).unwrap();
    let mut access = AccessStore::new(1);
    access.authorize(own_pid()).unwrap();
    let mut dispatcher = Dispatcher::new(socket, access);

    let md = metadata(own_pid(), authorize_bytes(1, 0, 77));
    assert_eq!(
        dispatcher.handle(&md),
        Err(Disposition::Rejected {
            error: AccessError::AtCapacity(1)
        })
    );
}

#[test]
fn handle_authorize_routes_on_old_pid() {
    let mut access = AccessStore::new(3);
    handle_authorize(&mut access, 0, 0, 10).unwrap();
    handle_authorize(&mut access, 1, 10, 11).unwrap();
    assert_eq!(access.entries(), &[11]);
    assert_eq!(
        handle_authorize(&mut access, 2, 10, 12),
        Err(AccessError::NotFound(10))
    );
}

#[test]
fn metadata_requires_credentials() {
    let datagram = Datagram {
        payload: vec![1],
        sender: None,
        credentials: None,
    };
    assert!(ClientMetadata::from_datagram(datagram).is_none());
}

// ========================================================================
// Over the socket
// ========================================================================

#[tokio::test]
async fn heartbeat_round_trip_over_socket() {
    let tmp = tempfile::tempdir().unwrap();
    let mut dispatcher = authorized_dispatcher(tmp.path());
    let client = client_for(tmp.path(), &dispatcher);

    client
        .send(&encode(7, Payload::HeartbeatRequest).unwrap())
        .await
        .unwrap();
    assert_eq!(
        dispatcher.serve_one().await,
        Disposition::Replied {
            tag: PayloadTag::HeartbeatResponse,
            sequence_number: 7
        }
    );

    let reply = client.receive().await.unwrap();
    assert_eq!(reply.credentials.unwrap().pid, own_pid());
    let message = decode_and_verify(&reply.payload).unwrap();
    assert_eq!(message, Message::new(7, Payload::HeartbeatResponse));
}

#[tokio::test]
async fn unauthorized_sender_gets_no_reply() {
    let tmp = tempfile::tempdir().unwrap();
    let socket = AuthSocket::bind(&tmp.path().join("worker.sock"), TIMEOUT).unwrap();
    let mut access = AccessStore::new(5);
    access.authorize(own_pid() + 1).unwrap();
    let mut dispatcher = Dispatcher::new(socket, access);
    let client = client_for(tmp.path(), &dispatcher);
    let before = dispatcher.access_store().clone();

    client.send(&authorize_bytes(1, 0, 99)).await.unwrap();
    assert_eq!(
        dispatcher.serve_one().await,
        Disposition::Unauthorized { pid: own_pid() }
    );

    assert!(matches!(
        client.receive().await,
        Err(TransportError::Timeout(_))
    ));
    assert_eq!(dispatcher.access_store(), &before);
}

#[tokio::test]
async fn repeated_authorization_gets_no_second_reply() {
    let tmp = tempfile::tempdir().unwrap();
    let mut dispatcher = authorized_dispatcher(tmp.path());
    let client = client_for(tmp.path(), &dispatcher);

    client.send(&authorize_bytes(1, 0, 42)).await.unwrap();
    dispatcher.serve_one().await;
    let reply = decode_and_verify(&client.receive().await.unwrap().payload).unwrap();
    assert_eq!(reply.payload, Payload::AuthorizeProcessResponse);

    client.send(&authorize_bytes(2, 0, 42)).await.unwrap();
    assert!(matches!(
        dispatcher.serve_one().await,
        Disposition::Rejected { .. }
    ));
    assert!(client.receive().await.is_err());
}

#[tokio::test]
async fn bad_message_does_not_stop_dispatching() {
    let tmp = tempfile::tempdir().unwrap();
    let mut dispatcher = authorized_dispatcher(tmp.path());
    let client = client_for(tmp.path(), &dispatcher);

    client.send(b"definitely not an envelope").await.unwrap();
    assert_eq!(dispatcher.serve_one().await, Disposition::Malformed);

    client
        .send(&encode(8, Payload::HeartbeatRequest).unwrap())
        .await
        .unwrap();
    assert!(matches!(
        dispatcher.serve_one().await,
        Disposition::Replied { .. }
    ));
    assert!(client.receive().await.is_ok());
}

#[tokio::test]
async fn serves_clients_on_different_addresses() {
    let tmp = tempfile::tempdir().unwrap();
    let mut dispatcher = authorized_dispatcher(tmp.path());
    let first = client_for(tmp.path(), &dispatcher);
    let second = AuthSocket::bind(&tmp.path().join("second.sock"), TIMEOUT).unwrap();
    second
        .connect(&resolve_address(dispatcher.socket().path()).unwrap())
        .unwrap();

    for (seq, client) in [(1, &first), (2, &second), (3, &first)] {
        client
            .send(&encode(seq, Payload::HeartbeatRequest).unwrap())
            .await
            .unwrap();
        dispatcher.serve_one().await;
        let reply = decode_and_verify(&client.receive().await.unwrap().payload).unwrap();
        assert_eq!(reply.sequence_number, seq);
    }
}

#[tokio::test]
async fn bind_authorizes_parent_process() {
    let tmp = tempfile::tempdir().unwrap();
    let dispatcher = Dispatcher::bind(&tmp.path().join("worker.sock"), 2).unwrap();
    assert_eq!(dispatcher.access_store().entries(), &[process::parent_pid()]);
    assert_eq!(dispatcher.access_store().capacity(), 2);
}

#[tokio::test]
async fn bind_rejects_zero_capacity() {
    let tmp = tempfile::tempdir().unwrap();
    let result = Dispatcher::bind(&tmp.path().join("worker.sock"), 0);
    assert!(matches!(result, Err(ServerError::ZeroCapacity)));
}

#[tokio::test]
async fn run_serves_until_shutdown() {
    let tmp = tempfile::tempdir().unwrap();
    let dispatcher = authorized_dispatcher(tmp.path());
    let client = client_for(tmp.path(), &dispatcher);
    let socket_path = dispatcher.socket().path().to_path_buf();

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(dispatcher.run(async {
        let _ = shutdown_rx.await;
    }));

    for seq in 10..13 {
        client
            .send(&encode(seq, Payload::HeartbeatRequest).unwrap())
            .await
            .unwrap();
        let reply = decode_and_verify(&client.receive().await.unwrap().payload).unwrap();
        assert_eq!(reply.sequence_number, seq);
    }

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
    assert!(!socket_path.exists());
}
