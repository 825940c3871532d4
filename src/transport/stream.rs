//! Stream connection lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use super::{ConnectionRole, ConnectionState};
use crate::error::{ConnectError, Result, VerseError};

/// Bytes requested from the stream per read.
const READ_CHUNK: usize = 4096;

/// Closes a connection from outside its owner.
///
/// The owner's next (or pending) read or write fails with `ConnectionLost`.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CloseHandle {
    /// Request the close
    pub fn close(&self) {
        self.tx.send_replace(true);
    }

    /// Whether a close was requested
    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }
}

/// One transport endpoint.
#[derive(Debug)]
pub struct StreamConnection<S = TcpStream> {
    role: ConnectionRole,
    state: ConnectionState,
    stream: Option<S>,
    peer: Option<SocketAddr>,
    close_tx: Arc<watch::Sender<bool>>,
    close_rx: watch::Receiver<bool>,
}

impl StreamConnection<TcpStream> {
    /// Resolve `host:service` and connect to the first candidate that answers.
    ///
    /// Each candidate gets `connect_timeout`.
    pub async fn open_as_client(host: &str, service: u16, connect_timeout: Duration) -> Result<Self> {
        let candidates: Vec<SocketAddr> = tokio::net::lookup_host((host, service))
            .await
            .map_err(|e| ConnectError::Unresolvable {
                host: host.to_string(),
                service: service.to_string(),
                reason: e.to_string(),
            })?
            .collect();

        if candidates.is_empty() {
            return Err(ConnectError::Unresolvable {
                host: host.to_string(),
                service: service.to_string(),
                reason: "no addresses".to_string(),
            }
            .into());
        }

        let mut last_error = String::new();
        for addr in &candidates {
            tracing::debug!("Connecting to {} ({}:{})", addr, host, service);
            match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    let _ = stream.set_nodelay(true);
                    tracing::info!("Connected to {}", addr);
                    let mut conn = Self::from_stream(stream, ConnectionRole::Client);
                    conn.peer = Some(*addr);
                    return Ok(conn);
                },
                Ok(Err(e)) => last_error = format!("{}: {}", addr, e),
                Err(_) => last_error = format!("{}: timed out after {:?}", addr, connect_timeout),
            }
            tracing::debug!("Candidate failed: {}", last_error);
        }

        Err(ConnectError::AllCandidatesFailed {
            host: host.to_string(),
            service: service.to_string(),
            attempts: candidates.len(),
            last_error,
        }
        .into())
    }

    /// Accept one pending connection.
    pub async fn accept_as_host(listener: &TcpListener) -> Result<Self> {
        let (stream, addr) = listener.accept().await.map_err(VerseError::Accept)?;
        let _ = stream.set_nodelay(true);
        tracing::info!("Accepted connection from {}", addr);
        let mut conn = Self::from_stream(stream, ConnectionRole::Host);
        conn.peer = Some(addr);
        Ok(conn)
    }
}

impl<S> StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already-connected stream.
    pub fn from_stream(stream: S, role: ConnectionRole) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            role,
            state: ConnectionState::Open,
            stream: Some(stream),
            peer: None,
            close_tx: Arc::new(tx),
            close_rx: rx,
        }
    }

    /// Connection role
    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    /// Lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Remote address, when the stream has one
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Whether reads and writes may still succeed
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open && !*self.close_rx.borrow()
    }

    /// Handle that can close this connection from another task.
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            tx: Arc::clone(&self.close_tx),
        }
    }

    /// Read whatever arrives within `wait`.
    ///
    /// Returns empty bytes when nothing arrived in time; peer close,
    /// transport errors and external close are `ConnectionLost`.
    pub async fn read_available(&mut self, wait: Duration) -> Result<Bytes> {
        self.check_open()?;
        let Some(stream) = self.stream.as_mut() else {
            return Err(VerseError::lost("connection closed"));
        };

        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        let outcome = tokio::select! {
            _ = self.close_rx.changed() => None,
            res = tokio::time::timeout(wait, stream.read_buf(&mut buf)) => Some(res),
        };

        match outcome {
            None => self.lost("closed locally"),
            Some(Err(_elapsed)) => Ok(Bytes::new()),
            Some(Ok(Ok(0))) => self.lost("peer closed the connection"),
            Some(Ok(Ok(_))) => Ok(buf.freeze()),
            Some(Ok(Err(e))) => self.lost(e),
        }
    }

    /// Write some of `data`; returns the count accepted by the stream.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.check_open()?;
        if data.is_empty() {
            return Ok(0);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(VerseError::lost("connection closed"));
        };

        let outcome = tokio::select! {
            _ = self.close_rx.changed() => None,
            res = stream.write(data) => Some(res),
        };

        match outcome {
            None => self.lost("closed locally"),
            Some(Ok(0)) => self.lost("stream refused further writes"),
            Some(Ok(n)) => Ok(n),
            Some(Err(e)) => self.lost(e),
        }
    }

    /// Write all of `data` and flush.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < data.len() {
            written += self.write(&data[written..]).await?;
        }

        let Some(stream) = self.stream.as_mut() else {
            return Err(VerseError::lost("connection closed"));
        };
        if let Err(e) = stream.flush().await {
            return self.lost(e);
        }
        Ok(())
    }

    /// Graceful close: shut down the write half, then release.
    pub async fn shutdown(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            self.state = ConnectionState::Closing;
            if let Err(e) = stream.shutdown().await {
                tracing::debug!("Shutdown of {} connection failed: {}", self.role, e);
            }
        }
        self.state = ConnectionState::Closed;
    }

    /// Release the stream. Safe to call any number of times.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("Closed {} connection", self.role);
        }
        self.state = ConnectionState::Closed;
    }

    fn check_open(&mut self) -> Result<()> {
        if *self.close_rx.borrow() {
            self.close();
            return Err(VerseError::lost("closed locally"));
        }
        if self.state != ConnectionState::Open {
            return Err(VerseError::lost("connection closed"));
        }
        Ok(())
    }

    fn lost<T>(&mut self, reason: impl std::fmt::Display) -> Result<T> {
        self.close();
        Err(VerseError::lost(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn pair() -> (StreamConnection<tokio::io::DuplexStream>, tokio::io::DuplexStream) {
        let (a, b) = duplex(1024);
        (StreamConnection::from_stream(a, ConnectionRole::Client), b)
    }

    #[tokio::test]
    async fn test_read_and_write_with_mock() {
        let mock = tokio_test::io::Builder::new()
            .read(b"hello")
            .write(b"world")
            .build();
        let mut conn = StreamConnection::from_stream(mock, ConnectionRole::Host);

        let data = conn.read_available(Duration::from_millis(100)).await.unwrap();
        assert_eq!(&data[..], b"hello");
        conn.write_all(b"world").await.unwrap();
    }

    #[tokio::test]
    async fn test_read_times_out_empty() {
        let (mut conn, _peer) = pair();
        let data = conn.read_available(Duration::from_millis(10)).await.unwrap();
        assert!(data.is_empty());
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn test_peer_close_is_connection_lost() {
        let (mut conn, peer) = pair();
        drop(peer);
        let err = conn
            .read_available(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.is_connection_lost());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut conn, _peer) = pair();
        conn.close();
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(conn.write(b"x").await.unwrap_err().is_connection_lost());
    }

    #[tokio::test]
    async fn test_close_handle_interrupts_read() {
        let (mut conn, _peer) = pair();
        let handle = conn.close_handle();

        let reader = tokio::spawn(async move {
            let res = conn.read_available(Duration::from_secs(5)).await;
            (res, conn.state())
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.close();

        let (res, state) = reader.await.unwrap();
        assert!(res.unwrap_err().is_connection_lost());
        assert_eq!(state, ConnectionState::Closed);
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_shutdown_signals_eof() {
        let (mut conn, mut peer) = pair();
        conn.write_all(b"bye").await.unwrap();
        conn.shutdown().await;
        assert_eq!(conn.state(), ConnectionState::Closed);

        let mut received = Vec::new();
        peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"bye");
    }
}
