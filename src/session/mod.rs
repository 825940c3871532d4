//! Established sessions.
//!
//! A [`Session`] owns the connection handed over by negotiation and drives
//! the protocol until the connection goes away:
//!
//! ```text
//!      ┌──────────────────────────────────────────────────────┐
//!      │ 1. read available bytes ─▶ FrameDecoder ─▶ Command   │
//!      │ 2. dispatch ─▶ SessionHandler ─▶ Outbox              │
//!      │        ├─ send()       ─▶ pending_outbound           │
//!      │        └─ synthesize() ─▶ dispatched locally         │
//!      │ 3. flush pending_outbound (FIFO)                     │
//!      │ 4. keep-alive when idle                              │
//!      └──────────────────────────────────────────────────────┘
//! ```
//!
//! A `ConnectAccept` is synthesized before the first iteration, so the
//! handler learns about the new session through the same path as
//! everything else.

mod handler;
mod stats;

pub use handler::{AckingHandler, Outbox, SessionHandler};
pub use stats::SessionStats;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::command::{encode_frame, Command, FrameDecoder, TerminateReason};
use crate::config::SessionConfig;
use crate::error::{CommandError, Result, VerseError};
use crate::negotiation::MethodId;
use crate::transport::{CloseHandle, ConnectionRole, StreamConnection};

/// Synthetic commands one inbound command may fan out to.
const MAX_LOCAL_DISPATCH: usize = 256;

/// Why a session loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExit {
    /// Peer closed, transport failed, or the connection was closed externally
    ConnectionLost,
    /// Peer sent `Terminate`
    PeerTerminated(TerminateReason),
    /// Local shutdown via [`SessionHandle::shutdown`]
    Shutdown,
    /// Too many malformed frames
    ProtocolViolation {
        /// Malformed frames seen
        malformed: u32,
        /// Configured tolerance
        tolerance: u32,
    },
}

/// Cloneable handle for feeding a running session from other tasks.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: String,
    tx: mpsc::UnboundedSender<Command>,
    shutdown: Arc<watch::Sender<bool>>,
    stats: watch::Receiver<SessionStats>,
}

impl SessionHandle {
    /// Session this handle feeds
    pub fn session_id(&self) -> &str {
        &self.id
    }

    /// Queue a wire command; it is flushed on the next iteration.
    pub fn send(&self, command: Command) -> Result<()> {
        if command.is_synthetic() {
            return Err(CommandError::NotWireCapable(command.kind()).into());
        }
        if command.is_cleared() {
            return Err(CommandError::Cleared(command.kind()).into());
        }
        self.tx
            .send(command)
            .map_err(|_| VerseError::lost("session has ended"))
    }

    /// Ask the session to send `Terminate(Shutdown)` and close.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Whether the session loop has ended
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Latest statistics snapshot; final once the session has ended.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// An established session.
#[derive(Debug)]
pub struct Session<S = TcpStream> {
    id: String,
    connection: StreamConnection<S>,
    method: MethodId,
    peer_identity: String,
    pending_outbound: VecDeque<Command>,
    inbound: FrameDecoder,
    config: SessionConfig,
    malformed: u32,
    good_streak: u32,
    started: Instant,
    last_send: Instant,
    stats: SessionStats,
    handle_tx: mpsc::UnboundedSender<Command>,
    handle_rx: mpsc::UnboundedReceiver<Command>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    stats_tx: watch::Sender<SessionStats>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Take ownership of an established connection.
    ///
    /// `inbound` carries bytes that arrived during negotiation but belong to
    /// the session.
    pub fn new(
        connection: StreamConnection<S>,
        method: MethodId,
        peer_identity: impl Into<String>,
        inbound: FrameDecoder,
        config: SessionConfig,
    ) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let peer_identity = peer_identity.into();
        let (handle_tx, handle_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = SessionStats {
            session_id: id.clone(),
            peer_identity: peer_identity.clone(),
            method: method.to_string(),
            ..Default::default()
        };
        let (stats_tx, _) = watch::channel(stats.clone());

        Self {
            id,
            connection,
            method,
            peer_identity,
            pending_outbound: VecDeque::new(),
            inbound,
            config,
            malformed: 0,
            good_streak: 0,
            started: Instant::now(),
            last_send: Instant::now(),
            stats,
            handle_tx,
            handle_rx,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            stats_tx,
        }
    }

    /// Session ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Which end we are
    pub fn role(&self) -> ConnectionRole {
        self.connection.role()
    }

    /// Method agreed during negotiation
    pub fn negotiated_method(&self) -> MethodId {
        self.method
    }

    /// Identity of the other end
    pub fn peer_identity(&self) -> &str {
        &self.peer_identity
    }

    /// Commands waiting to be flushed
    pub fn pending(&self) -> usize {
        self.pending_outbound.len()
    }

    /// Statistics so far
    pub fn stats(&self) -> SessionStats {
        let mut stats = self.stats.clone();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }

    /// Queue a wire command for the next flush.
    pub fn enqueue(&mut self, command: Command) -> std::result::Result<(), CommandError> {
        if command.is_synthetic() {
            return Err(CommandError::NotWireCapable(command.kind()));
        }
        if command.is_cleared() {
            return Err(CommandError::Cleared(command.kind()));
        }
        self.pending_outbound.push_back(command);
        Ok(())
    }

    /// Handle for other tasks.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id.clone(),
            tx: self.handle_tx.clone(),
            shutdown: Arc::clone(&self.shutdown_tx),
            stats: self.stats_tx.subscribe(),
        }
    }

    /// Handle that closes the connection without a goodbye.
    pub fn close_handle(&self) -> CloseHandle {
        self.connection.close_handle()
    }

    /// Run until the connection is lost, the peer terminates, or a
    /// shutdown is requested.
    ///
    /// Connection loss is a normal exit. Exceeding the malformed-frame
    /// tolerance returns `VerseError::ProtocolViolation`.
    pub async fn run<H: SessionHandler>(mut self, mut handler: H) -> Result<SessionExit> {
        info!(
            "Session {} ({}) established with '{}' via {}",
            self.id,
            self.connection.role(),
            self.peer_identity,
            self.method
        );

        let accept = Command::connect_accept(self.method, &self.peer_identity);
        self.dispatch(accept, &mut handler);

        let outcome = loop {
            match self.iterate(&mut handler).await {
                Ok(Some(exit)) => break Ok(exit),
                Ok(None) => {},
                Err(e) if e.is_connection_lost() => {
                    debug!("Session {}: {}", self.id, e);
                    break Ok(SessionExit::ConnectionLost);
                },
                Err(e) => break Err(e),
            }
        };

        self.teardown(&outcome, &mut handler).await;

        match outcome {
            Ok(SessionExit::ProtocolViolation {
                malformed,
                tolerance,
            }) => Err(VerseError::ProtocolViolation {
                malformed,
                tolerance,
            }),
            other => other,
        }
    }

    async fn iterate<H: SessionHandler>(&mut self, handler: &mut H) -> Result<Option<SessionExit>> {
        while let Ok(command) = self.handle_rx.try_recv() {
            self.pending_outbound.push_back(command);
        }
        if *self.shutdown_rx.borrow() {
            self.pending_outbound
                .push_back(Command::terminate(TerminateReason::Shutdown));
            self.flush().await?;
            return Ok(Some(SessionExit::Shutdown));
        }

        let data = self.connection.read_available(self.config.read_wait()).await?;
        if !data.is_empty() {
            self.stats.bytes_in += data.len() as u64;
            self.inbound.extend(&data);
        }

        while let Some(decoded) = self.inbound.next_command() {
            match decoded {
                Ok(command) => {
                    debug!("Session {} <- {}", self.id, command);
                    match command {
                        Command::Terminate { reason } => {
                            self.stats.commands_received += 1;
                            info!("Session {}: peer terminated ({:?})", self.id, reason);
                            return Ok(Some(SessionExit::PeerTerminated(reason)));
                        },
                        ref other if other.kind().is_negotiation() => {
                            warn!(
                                "Session {}: {} after negotiation, discarded",
                                self.id,
                                other.kind()
                            );
                            if let Some(exit) = self.count_malformed().await {
                                return Ok(Some(exit));
                            }
                        },
                        other => {
                            self.stats.commands_received += 1;
                            self.count_good();
                            if other == Command::KeepAlive {
                                self.stats.keepalives_received += 1;
                            } else {
                                self.dispatch(other, handler);
                            }
                        },
                    }
                },
                Err(e) => {
                    warn!("Session {}: malformed frame discarded: {}", self.id, e);
                    if let Some(exit) = self.count_malformed().await {
                        return Ok(Some(exit));
                    }
                },
            }
        }

        let sent = self.flush().await?;
        if sent > 0 || !data.is_empty() {
            self.stats_tx.send_replace(self.stats());
        }

        if self.pending_outbound.is_empty() && self.last_send.elapsed() >= self.config.keepalive() {
            self.pending_outbound.push_back(Command::KeepAlive);
        }

        Ok(None)
    }

    /// Hand one command to the handler, then everything it synthesizes.
    fn dispatch<H: SessionHandler>(&mut self, command: Command, handler: &mut H) {
        let mut local = VecDeque::from([command]);
        let mut dispatched = 0;

        while let Some(command) = local.pop_front() {
            if dispatched == MAX_LOCAL_DISPATCH {
                warn!(
                    "Session {}: local dispatch limit reached, dropping {} command(s)",
                    self.id,
                    local.len() + 1
                );
                break;
            }
            dispatched += 1;

            if command.is_synthetic() {
                self.stats.synthesized += 1;
                debug!("Session {} synthesized {}", self.id, command);
            }
            let mut outbox = Outbox::default();
            handler.on_command(&command, &mut outbox);
            self.stats.commands_dispatched += 1;

            let (wire, synthetic) = outbox.into_parts();
            self.pending_outbound.extend(wire);
            local.extend(synthetic);
        }
    }

    /// Every `malformed_decay` good commands forgive one malformed frame.
    fn count_good(&mut self) {
        if self.malformed == 0 || self.config.malformed_decay == 0 {
            return;
        }
        self.good_streak += 1;
        if self.good_streak >= self.config.malformed_decay {
            self.good_streak = 0;
            self.malformed -= 1;
        }
    }

    async fn count_malformed(&mut self) -> Option<SessionExit> {
        self.good_streak = 0;
        self.malformed += 1;
        self.stats.malformed += 1;
        if self.malformed <= self.config.max_malformed {
            return None;
        }

        warn!(
            "Session {}: {} malformed frames exceed tolerance {}, terminating",
            self.id, self.malformed, self.config.max_malformed
        );
        self.pending_outbound.clear();
        self.pending_outbound
            .push_back(Command::terminate(TerminateReason::ProtocolViolation));
        if let Err(e) = self.flush().await {
            debug!("Session {}: terminate not delivered: {}", self.id, e);
        }
        Some(SessionExit::ProtocolViolation {
            malformed: self.malformed,
            tolerance: self.config.max_malformed,
        })
    }

    /// Write every pending command in FIFO order; returns how many went out.
    async fn flush(&mut self) -> Result<usize> {
        let mut sent = 0;
        while let Some(command) = self.pending_outbound.pop_front() {
            let frame = match encode_frame(&command) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Session {}: dropping unsendable {}: {}", self.id, command.kind(), e);
                    continue;
                },
            };
            self.connection.write_all(&frame).await?;
            debug!("Session {} -> {}", self.id, command);

            self.stats.commands_sent += 1;
            self.stats.bytes_out += frame.len() as u64;
            if command == Command::KeepAlive {
                self.stats.keepalives_sent += 1;
            }
            self.last_send = Instant::now();
            sent += 1;
        }
        Ok(sent)
    }

    async fn teardown<H: SessionHandler>(&mut self, outcome: &Result<SessionExit>, handler: &mut H) {
        self.pending_outbound.clear();
        self.handle_rx.close();
        self.connection.shutdown().await;

        let exit = match outcome {
            Ok(exit) => exit.clone(),
            Err(_) => SessionExit::ConnectionLost,
        };
        info!(
            "Session {} ended: {:?} ({} in, {} out, {} malformed)",
            self.id, exit, self.stats.commands_received, self.stats.commands_sent, self.malformed
        );
        self.stats_tx.send_replace(self.stats());
        handler.on_terminated(&exit);
    }
}
