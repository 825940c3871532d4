//! End-to-end transport layer tests.
//!
//! These tests open real TCP connections on localhost rather than mocks.

use std::time::Duration;

use tokio::net::TcpListener;
use verse::command::{encode_frame, Command, FrameDecoder};
use verse::config::Config;
use verse::error::ConnectError;
use verse::negotiation::{negotiate, CredentialDescriptor, MethodId};
use verse::transport::{ConnectionRole, ConnectionState, StreamConnection};
use verse::VerseError;

/// Find a port nobody listens on
async fn find_closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_open_and_accept() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let accept = tokio::spawn(async move { StreamConnection::accept_as_host(&listener).await });
    let mut client = StreamConnection::open_as_client("127.0.0.1", port, Duration::from_secs(1))
        .await
        .unwrap();
    let mut host = accept.await.unwrap().unwrap();

    assert_eq!(client.role(), ConnectionRole::Client);
    assert_eq!(host.role(), ConnectionRole::Host);
    assert_eq!(client.peer_addr().unwrap().port(), port);
    assert!(host.peer_addr().is_some());

    let frame = encode_frame(&Command::taggroup_create(7, 3, 0)).unwrap();
    client.write_all(&frame).await.unwrap();

    let mut decoder = FrameDecoder::default();
    let received = loop {
        let data = host.read_available(Duration::from_millis(500)).await.unwrap();
        decoder.extend(&data);
        if let Some(decoded) = decoder.next_command() {
            break decoded.unwrap();
        }
    };
    assert_eq!(received, Command::taggroup_create(7, 3, 0));
}

#[tokio::test]
async fn test_read_times_out_empty() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let accept = tokio::spawn(async move { StreamConnection::accept_as_host(&listener).await });
    let mut client = StreamConnection::open_as_client("127.0.0.1", port, Duration::from_secs(1))
        .await
        .unwrap();
    let _host = accept.await.unwrap().unwrap();

    let data = client.read_available(Duration::from_millis(20)).await.unwrap();
    assert!(data.is_empty());
    assert!(client.is_open());
}

#[tokio::test]
async fn test_peer_close_is_connection_lost() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let accept = tokio::spawn(async move { StreamConnection::accept_as_host(&listener).await });
    let mut client = StreamConnection::open_as_client("127.0.0.1", port, Duration::from_secs(1))
        .await
        .unwrap();
    let mut host = accept.await.unwrap().unwrap();

    host.shutdown().await;
    assert_eq!(host.state(), ConnectionState::Closed);

    let err = client.read_available(Duration::from_secs(1)).await.unwrap_err();
    assert!(err.is_connection_lost());
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_close_handle_interrupts_read() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let accept = tokio::spawn(async move { StreamConnection::accept_as_host(&listener).await });
    let mut client = StreamConnection::open_as_client("127.0.0.1", port, Duration::from_secs(1))
        .await
        .unwrap();
    let _host = accept.await.unwrap().unwrap();

    let close = client.close_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        close.close();
    });

    let err = client.read_available(Duration::from_secs(5)).await.unwrap_err();
    assert!(err.is_connection_lost());
    assert!(!client.is_open());
}

#[tokio::test]
async fn test_refused_port() {
    let port = find_closed_port().await;

    let err = StreamConnection::open_as_client("127.0.0.1", port, Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            VerseError::Connect(ConnectError::AllCandidatesFailed { attempts: 1, .. })
        ),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn test_unresolvable_host() {
    let err = StreamConnection::open_as_client("nonexistent.invalid", 12345, Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(
        matches!(err, VerseError::Connect(ConnectError::Unresolvable { .. })),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn test_negotiate_connect_failure() {
    let port = find_closed_port().await;
    let creds = CredentialDescriptor::new("alice", "wonderland", [MethodId::PLAINTEXT]).unwrap();

    let err = negotiate(&format!("127.0.0.1:{port}"), creds, &Config::default())
        .await
        .unwrap_err();
    assert!(matches!(err, VerseError::Connect(_)));
}

#[tokio::test]
async fn test_negotiate_bad_address() {
    let creds = CredentialDescriptor::new("alice", "wonderland", [MethodId::PLAINTEXT]).unwrap();

    let err = negotiate("localhost:not-a-port", creds, &Config::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        VerseError::Connect(ConnectError::InvalidAddress(_))
    ));
}
