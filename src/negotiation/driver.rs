//! Async handshake driver.
//!
//! Runs a [`ClientHandshake`] or [`HostHandshake`] over a connection, bounds
//! every wait with the step timeout, and hands the connection (plus any
//! bytes already buffered past the handshake) to a [`Session`].

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{info, warn};

use super::credentials::{CredentialDescriptor, CredentialStore};
use super::method::AuthMethods;
use super::state::{ClientHandshake, FailureKind, HostHandshake};
use crate::command::{encode_frame, Command, FrameDecoder, TerminateReason};
use crate::config::Config;
use crate::error::{NegotiationError, Result, VerseError};
use crate::session::Session;
use crate::transport::{HostAddress, StreamConnection};

/// Classify a driver error for the handshake state.
fn failure_kind(err: &VerseError) -> FailureKind {
    match err {
        VerseError::Negotiation(e) => FailureKind::from(e),
        VerseError::Connect(_) => FailureKind::Connect,
        VerseError::ConnectionLost(_) | VerseError::Io(_) => FailureKind::ConnectionLost,
        _ => FailureKind::ProtocolViolation,
    }
}

/// Resolve `host`, connect, and negotiate as a client.
///
/// `host` is `name[:service]`. On failure the connection is closed before
/// the error is returned.
pub async fn negotiate(
    host: &str,
    credentials: CredentialDescriptor,
    config: &Config,
) -> Result<Session<TcpStream>> {
    let address: HostAddress = host.parse()?;
    let mut handshake = ClientHandshake::new(
        credentials,
        AuthMethods::default(),
        config.negotiation.max_auth_rounds,
    );
    handshake.on_resolving()?;

    let conn = match StreamConnection::open_as_client(
        &address.host,
        address.service,
        config.client.connect_timeout(),
    )
    .await
    {
        Ok(conn) => conn,
        Err(e) => {
            warn!("Cannot reach {}: {}", address, e);
            handshake.fail_with(FailureKind::Connect);
            handshake.close();
            return Err(e);
        },
    };

    drive_client(conn, handshake, address.to_string(), config).await
}

/// Negotiate as a client over an already-open connection.
pub async fn negotiate_client<S>(
    conn: StreamConnection<S>,
    credentials: CredentialDescriptor,
    methods: AuthMethods,
    config: &Config,
) -> Result<Session<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let peer = conn
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "host".to_string());
    let mut handshake =
        ClientHandshake::new(credentials, methods, config.negotiation.max_auth_rounds);
    handshake.on_resolving()?;
    drive_client(conn, handshake, peer, config).await
}

/// Negotiate as a host over an accepted connection.
pub async fn negotiate_host<S>(
    mut conn: StreamConnection<S>,
    methods: AuthMethods,
    store: Arc<dyn CredentialStore>,
    config: &Config,
) -> Result<Session<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut handshake = HostHandshake::new(methods, store, config.negotiation.max_auth_rounds);
    let mut inbound = FrameDecoder::new(config.session.max_frame_len);

    let result = async {
        while !handshake.is_established() {
            let command = recv(&mut conn, &mut inbound, handshake.state().name(), config).await?;
            let replies = handshake.on_command(&command)?;
            send(&mut conn, &replies).await?;
        }
        Ok::<_, VerseError>(())
    }
    .await;

    match result {
        Ok(()) => {
            let method = handshake
                .agreed_method()
                .ok_or(NegotiationError::InvalidState("Established"))?;
            let identity = handshake.peer_identity().unwrap_or_default().to_string();
            info!("Client '{}' authenticated via {}", identity, method);
            Ok(Session::new(conn, method, identity, inbound, config.session.clone()))
        },
        Err(e) => {
            warn!("Host negotiation failed: {}", e);
            let farewell = match &e {
                VerseError::Negotiation(err) => {
                    handshake.fail(err.clone());
                    HostHandshake::farewell(err)
                },
                VerseError::Decode(_) => {
                    handshake.fail_with(FailureKind::ProtocolViolation);
                    vec![Command::terminate(TerminateReason::ProtocolViolation)]
                },
                other => {
                    handshake.fail_with(failure_kind(other));
                    Vec::new()
                },
            };
            let _ = send(&mut conn, &farewell).await;
            conn.shutdown().await;
            handshake.close();
            Err(e)
        },
    }
}

async fn drive_client<S>(
    mut conn: StreamConnection<S>,
    mut handshake: ClientHandshake,
    peer: String,
    config: &Config,
) -> Result<Session<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut inbound = FrameDecoder::new(config.session.max_frame_len);

    let result = async {
        let offer = handshake.on_connected()?;
        send(&mut conn, &[offer]).await?;
        while !handshake.is_established() {
            let command = recv(&mut conn, &mut inbound, handshake.state().name(), config).await?;
            let replies = handshake.on_command(&command)?;
            send(&mut conn, &replies).await?;
        }
        Ok::<_, VerseError>(())
    }
    .await;

    match result {
        Ok(()) => {
            let method = handshake
                .agreed_method()
                .ok_or(NegotiationError::InvalidState("Established"))?;
            info!("Authenticated to {} as '{}' via {}", peer, handshake.identity(), method);
            Ok(Session::new(conn, method, peer, inbound, config.session.clone()))
        },
        Err(e) => {
            warn!("Negotiation with {} failed: {}", peer, e);
            match &e {
                VerseError::Negotiation(err) => {
                    handshake.fail(err.clone());
                },
                other => handshake.fail_with(failure_kind(other)),
            }
            conn.shutdown().await;
            handshake.close();
            Err(e)
        },
    }
}

/// Next command from the peer, waiting at most one step timeout.
async fn recv<S>(
    conn: &mut StreamConnection<S>,
    inbound: &mut FrameDecoder,
    state: &'static str,
    config: &Config,
) -> Result<Command>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let deadline = Instant::now() + config.negotiation.step_timeout();
    loop {
        if let Some(decoded) = inbound.next_command() {
            return Ok(decoded?);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(NegotiationError::Timeout(state).into());
        }
        let data = conn.read_available(deadline - now).await?;
        inbound.extend(&data);
    }
}

async fn send<S>(conn: &mut StreamConnection<S>, commands: &[Command]) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    for command in commands {
        let frame = encode_frame(command)?;
        conn.write_all(&frame).await?;
    }
    Ok(())
}
