//! Handshake state machines.
//!
//! Both ends are sans-io: they consume decoded [`Command`]s and return the
//! commands to send back. The async driver owns the connection and the
//! timers.
//!
//! ```text
//! Client:  Init -> ResolvingHost -> AwaitingMethodOffer -> MethodAgreed(m)
//!               -> Authenticating(m) -> Established
//!
//! Host:    AwaitingMethodOffer -> AwaitingSelection -> MethodAgreed(m)
//!               -> Authenticating(m) -> Established
//!
//! Any non-terminal state -> Failed(kind) -> Closed
//! ```

use std::sync::Arc;

use tracing::debug;

use super::credentials::{CredentialDescriptor, CredentialStore, MethodId};
use super::method::{AuthExchange, AuthMethods, AuthVerdict};
use crate::command::{AuthStatus, Command, TerminateReason};
use crate::error::NegotiationError;

/// Why a handshake failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Resolution or connection failed
    Connect,
    /// No method in common
    NoCommonMethod,
    /// Credentials refused
    AuthRejected,
    /// A waiting state timed out
    Timeout,
    /// Transport failed or the peer went away
    ConnectionLost,
    /// Peer broke the handshake rules
    ProtocolViolation,
}

impl From<&NegotiationError> for FailureKind {
    fn from(err: &NegotiationError) -> Self {
        match err {
            NegotiationError::NoCommonMethod | NegotiationError::UnsupportedMethod(_) => {
                FailureKind::NoCommonMethod
            },
            NegotiationError::AuthRejected | NegotiationError::TooManyRounds(_) => {
                FailureKind::AuthRejected
            },
            NegotiationError::Timeout(_) => FailureKind::Timeout,
            NegotiationError::PeerTerminated(_) => FailureKind::ConnectionLost,
            _ => FailureKind::ProtocolViolation,
        }
    }
}

/// Negotiation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Nothing happened yet
    Init,
    /// Resolving and connecting
    ResolvingHost,
    /// Waiting for the peer's method offer
    AwaitingMethodOffer,
    /// Host only: waiting for the client's pick
    AwaitingSelection,
    /// Method agreed, authentication not started
    MethodAgreed(MethodId),
    /// Authentication steps in flight
    Authenticating(MethodId),
    /// Handshake complete
    Established,
    /// Handshake failed
    Failed(FailureKind),
    /// Resources released
    Closed,
}

impl NegotiationState {
    /// State name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            NegotiationState::Init => "Init",
            NegotiationState::ResolvingHost => "ResolvingHost",
            NegotiationState::AwaitingMethodOffer => "AwaitingMethodOffer",
            NegotiationState::AwaitingSelection => "AwaitingSelection",
            NegotiationState::MethodAgreed(_) => "MethodAgreed",
            NegotiationState::Authenticating(_) => "Authenticating",
            NegotiationState::Established => "Established",
            NegotiationState::Failed(_) => "Failed",
            NegotiationState::Closed => "Closed",
        }
    }

    /// Whether no further transition is possible except to `Closed`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NegotiationState::Established | NegotiationState::Failed(_) | NegotiationState::Closed
        )
    }

    /// Agreed method, once there is one.
    pub fn method(&self) -> Option<MethodId> {
        match self {
            NegotiationState::MethodAgreed(m) | NegotiationState::Authenticating(m) => Some(*m),
            _ => None,
        }
    }
}

/// First method in client preference order that the host also supports.
pub fn select_method(client: &[MethodId], host: &[MethodId]) -> Option<MethodId> {
    client.iter().copied().find(|m| host.contains(m))
}

fn transition(side: &'static str, state: &mut NegotiationState, next: NegotiationState) {
    debug!("{} handshake: {:?} -> {:?}", side, state, next);
    *state = next;
}

/// Client end of the handshake.
#[derive(Debug)]
pub struct ClientHandshake {
    state: NegotiationState,
    credentials: CredentialDescriptor,
    methods: AuthMethods,
    rounds: u32,
    max_rounds: u32,
    agreed: Option<MethodId>,
}

impl ClientHandshake {
    /// Create a client handshake.
    pub fn new(credentials: CredentialDescriptor, methods: AuthMethods, max_rounds: u32) -> Self {
        Self {
            state: NegotiationState::Init,
            credentials,
            methods,
            rounds: 0,
            max_rounds,
            agreed: None,
        }
    }

    /// Current state
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Method agreed with the host
    pub fn agreed_method(&self) -> Option<MethodId> {
        self.agreed
    }

    /// Identity presented to the host
    pub fn identity(&self) -> &str {
        self.credentials.identity()
    }

    /// Whether the handshake succeeded
    pub fn is_established(&self) -> bool {
        self.state == NegotiationState::Established
    }

    /// `Init -> ResolvingHost`
    pub fn on_resolving(&mut self) -> Result<(), NegotiationError> {
        self.expect(NegotiationState::Init)?;
        transition("client", &mut self.state, NegotiationState::ResolvingHost);
        Ok(())
    }

    /// `ResolvingHost -> AwaitingMethodOffer`, producing the method offer.
    ///
    /// Only methods with a local implementation are offered.
    pub fn on_connected(&mut self) -> Result<Command, NegotiationError> {
        self.expect(NegotiationState::ResolvingHost)?;
        let offered: Vec<MethodId> = self
            .credentials
            .methods()
            .iter()
            .copied()
            .filter(|m| self.methods.get(*m).is_some())
            .collect();
        if offered.is_empty() {
            let first = self.credentials.methods()[0];
            return Err(self.fail(NegotiationError::UnsupportedMethod(first)));
        }
        transition("client", &mut self.state, NegotiationState::AwaitingMethodOffer);
        Ok(Command::method_offer(offered))
    }

    /// Feed one command from the host; returns the replies to send.
    pub fn on_command(&mut self, command: &Command) -> Result<Vec<Command>, NegotiationError> {
        match (self.state, command) {
            (_, Command::KeepAlive) if !self.state.is_terminal() => Ok(Vec::new()),
            (_, Command::Terminate { reason }) if !self.state.is_terminal() => {
                let err = match reason {
                    TerminateReason::NoCommonMethod => NegotiationError::NoCommonMethod,
                    TerminateReason::AuthFailed => NegotiationError::AuthRejected,
                    other => NegotiationError::PeerTerminated(*other),
                };
                Err(self.fail(err))
            },
            (NegotiationState::AwaitingMethodOffer, Command::MethodOffer { methods }) => {
                let Some(method) = select_method(self.credentials.methods(), methods) else {
                    return Err(self.fail(NegotiationError::NoCommonMethod));
                };
                transition("client", &mut self.state, NegotiationState::MethodAgreed(method));
                self.agreed = Some(method);

                let first = self.step(method, None)?;
                transition("client", &mut self.state, NegotiationState::Authenticating(method));
                Ok(vec![Command::method_selection(method), first])
            },
            (NegotiationState::Authenticating(method), Command::AuthResult { status, data }) => {
                match status {
                    AuthStatus::Accepted => {
                        transition("client", &mut self.state, NegotiationState::Established);
                        Ok(Vec::new())
                    },
                    AuthStatus::InProgress => Ok(vec![self.step(method, Some(data.as_slice()))?]),
                    AuthStatus::Rejected | AuthStatus::Invalid => {
                        Err(self.fail(NegotiationError::AuthRejected))
                    },
                }
            },
            (state, other) => Err(self.fail(NegotiationError::UnexpectedCommand {
                state: state.name(),
                kind: other.kind(),
            })),
        }
    }

    /// Record a failure detected outside the state machine (I/O, timers).
    pub fn fail(&mut self, err: NegotiationError) -> NegotiationError {
        self.fail_with(FailureKind::from(&err));
        err
    }

    /// Move to `Failed(kind)` unless already terminal.
    pub fn fail_with(&mut self, kind: FailureKind) {
        if !self.state.is_terminal() {
            transition("client", &mut self.state, NegotiationState::Failed(kind));
        }
    }

    /// Release: any state -> `Closed`.
    pub fn close(&mut self) {
        transition("client", &mut self.state, NegotiationState::Closed);
    }

    fn step(&mut self, method: MethodId, challenge: Option<&[u8]>) -> Result<Command, NegotiationError> {
        if self.rounds >= self.max_rounds {
            return Err(self.fail(NegotiationError::TooManyRounds(self.max_rounds)));
        }
        self.rounds += 1;

        let Some(implementation) = self.methods.get(method) else {
            return Err(self.fail(NegotiationError::UnsupportedMethod(method)));
        };
        let data = implementation.client_step(&self.credentials, challenge);
        Ok(Command::auth_step(method, self.credentials.identity(), data))
    }

    fn expect(&mut self, expected: NegotiationState) -> Result<(), NegotiationError> {
        if self.state != expected {
            return Err(NegotiationError::InvalidState(self.state.name()));
        }
        Ok(())
    }
}

/// Host end of the handshake.
pub struct HostHandshake {
    state: NegotiationState,
    methods: AuthMethods,
    store: Arc<dyn CredentialStore>,
    common: Vec<MethodId>,
    exchange: AuthExchange,
    identity: Option<String>,
    rounds: u32,
    max_rounds: u32,
    agreed: Option<MethodId>,
}

impl HostHandshake {
    /// Create a host handshake waiting for the client's offer.
    pub fn new(methods: AuthMethods, store: Arc<dyn CredentialStore>, max_rounds: u32) -> Self {
        Self {
            state: NegotiationState::AwaitingMethodOffer,
            methods,
            store,
            common: Vec::new(),
            exchange: AuthExchange::default(),
            identity: None,
            rounds: 0,
            max_rounds,
            agreed: None,
        }
    }

    /// Current state
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Method agreed with the client
    pub fn agreed_method(&self) -> Option<MethodId> {
        self.agreed
    }

    /// Identity the client authenticated as (set once established)
    pub fn peer_identity(&self) -> Option<&str> {
        if self.state == NegotiationState::Established {
            self.identity.as_deref()
        } else {
            None
        }
    }

    /// Whether the handshake succeeded
    pub fn is_established(&self) -> bool {
        self.state == NegotiationState::Established
    }

    /// Feed one command from the client; returns the replies to send.
    pub fn on_command(&mut self, command: &Command) -> Result<Vec<Command>, NegotiationError> {
        match (self.state, command) {
            (_, Command::KeepAlive) if !self.state.is_terminal() => Ok(Vec::new()),
            (_, Command::Terminate { reason }) if !self.state.is_terminal() => {
                Err(self.fail(NegotiationError::PeerTerminated(*reason)))
            },
            (NegotiationState::AwaitingMethodOffer, Command::MethodOffer { methods }) => {
                let host = self.methods.ids();
                self.common = host.into_iter().filter(|m| methods.contains(m)).collect();
                if self.common.is_empty() {
                    return Err(self.fail(NegotiationError::NoCommonMethod));
                }
                transition("host", &mut self.state, NegotiationState::AwaitingSelection);
                Ok(vec![Command::method_offer(self.common.clone())])
            },
            (NegotiationState::AwaitingSelection, Command::MethodSelection { method }) => {
                if !self.common.contains(method) {
                    return Err(self.fail(NegotiationError::UnsupportedMethod(*method)));
                }
                self.agreed = Some(*method);
                transition("host", &mut self.state, NegotiationState::MethodAgreed(*method));
                Ok(Vec::new())
            },
            (
                NegotiationState::MethodAgreed(agreed) | NegotiationState::Authenticating(agreed),
                Command::AuthStep {
                    method,
                    identity,
                    data,
                },
            ) => self.auth_step(agreed, *method, identity, data),
            (state, other) => Err(self.fail(NegotiationError::UnexpectedCommand {
                state: state.name(),
                kind: other.kind(),
            })),
        }
    }

    /// Commands to send the client after a failure, best effort.
    pub fn farewell(err: &NegotiationError) -> Vec<Command> {
        let mut out = Vec::new();
        if *err == NegotiationError::AuthRejected {
            out.push(Command::auth_result(AuthStatus::Rejected, Vec::new()));
        }
        if let Some(reason) = err.terminate_reason() {
            out.push(Command::terminate(reason));
        }
        out
    }

    /// Record a failure detected outside the state machine.
    pub fn fail(&mut self, err: NegotiationError) -> NegotiationError {
        self.fail_with(FailureKind::from(&err));
        err
    }

    /// Move to `Failed(kind)` unless already terminal.
    pub fn fail_with(&mut self, kind: FailureKind) {
        if !self.state.is_terminal() {
            transition("host", &mut self.state, NegotiationState::Failed(kind));
        }
    }

    /// Release: any state -> `Closed`.
    pub fn close(&mut self) {
        transition("host", &mut self.state, NegotiationState::Closed);
    }

    fn auth_step(
        &mut self,
        agreed: MethodId,
        method: MethodId,
        identity: &str,
        data: &[u8],
    ) -> Result<Vec<Command>, NegotiationError> {
        if method != agreed {
            return Err(self.fail(NegotiationError::UnsupportedMethod(method)));
        }
        // identity is fixed by the first step
        match &self.identity {
            Some(first) if first != identity => {
                return Err(self.fail(NegotiationError::AuthRejected));
            },
            Some(_) => {},
            None => self.identity = Some(identity.to_string()),
        }
        if self.rounds >= self.max_rounds {
            return Err(self.fail(NegotiationError::TooManyRounds(self.max_rounds)));
        }
        self.rounds += 1;

        let Some(implementation) = self.methods.get(method) else {
            return Err(self.fail(NegotiationError::UnsupportedMethod(method)));
        };
        let verdict =
            implementation.host_step(self.store.as_ref(), identity, data, &mut self.exchange);

        match verdict {
            AuthVerdict::Accepted => {
                transition("host", &mut self.state, NegotiationState::Established);
                Ok(vec![Command::auth_result(AuthStatus::Accepted, Vec::new())])
            },
            AuthVerdict::Rejected => Err(self.fail(NegotiationError::AuthRejected)),
            AuthVerdict::Continue(challenge) => {
                transition("host", &mut self.state, NegotiationState::Authenticating(agreed));
                Ok(vec![Command::auth_result(AuthStatus::InProgress, challenge)])
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiation::MemoryCredentialStore;

    const A: MethodId = MethodId::new(10);
    const B: MethodId = MethodId::new(11);
    const C: MethodId = MethodId::new(12);
    const D: MethodId = MethodId::new(13);

    fn host(methods: &[MethodId]) -> HostHandshake {
        let store = MemoryCredentialStore::new().with_user("alice", "wonderland");
        HostHandshake::new(AuthMethods::from_ids(methods).unwrap(), Arc::new(store), 4)
    }

    fn client(secret: &str, methods: &[MethodId]) -> ClientHandshake {
        let creds = CredentialDescriptor::new("alice", secret, methods.iter().copied()).unwrap();
        ClientHandshake::new(creds, AuthMethods::default(), 4)
    }

    /// Pump commands between both ends until neither has anything to say.
    fn run(client: &mut ClientHandshake, host: &mut HostHandshake) -> Result<(), NegotiationError> {
        client.on_resolving()?;
        let mut to_host = vec![client.on_connected()?];
        while !to_host.is_empty() {
            let mut to_client = Vec::new();
            for cmd in &to_host {
                match host.on_command(cmd) {
                    Ok(replies) => to_client.extend(replies),
                    Err(err) => {
                        to_client.extend(HostHandshake::farewell(&err));
                        break;
                    },
                }
            }
            to_host.clear();
            for cmd in &to_client {
                to_host.extend(client.on_command(cmd)?);
            }
        }
        Ok(())
    }

    #[test]
    fn test_select_method_client_preference() {
        assert_eq!(select_method(&[A, B, C], &[B, D]), Some(B));
        assert_eq!(select_method(&[C, B], &[B, C]), Some(C));
        assert_eq!(select_method(&[A, C], &[B, D]), None);
    }

    #[test]
    fn test_plaintext_handshake() {
        let mut c = client("wonderland", &[MethodId::PLAINTEXT]);
        let mut h = host(&[MethodId::PLAINTEXT]);
        run(&mut c, &mut h).unwrap();

        assert!(c.is_established());
        assert!(h.is_established());
        assert_eq!(c.agreed_method(), Some(MethodId::PLAINTEXT));
        assert_eq!(h.peer_identity(), Some("alice"));
    }

    #[cfg(feature = "crypto")]
    #[test]
    fn test_hmac_handshake_takes_two_rounds() {
        let mut c = client("wonderland", &[MethodId::HMAC_SHA256, MethodId::PLAINTEXT]);
        let mut h = host(&[MethodId::PLAINTEXT, MethodId::HMAC_SHA256]);
        run(&mut c, &mut h).unwrap();

        assert!(c.is_established());
        assert_eq!(c.agreed_method(), Some(MethodId::HMAC_SHA256));
        assert_eq!(h.agreed_method(), Some(MethodId::HMAC_SHA256));
    }

    #[test]
    fn test_no_common_method() {
        let mut c = client("wonderland", &[MethodId::PLAINTEXT]);
        let mut h = host(&[MethodId::NONE]);
        let err = run(&mut c, &mut h).unwrap_err();

        assert_eq!(err, NegotiationError::NoCommonMethod);
        assert_eq!(c.state(), NegotiationState::Failed(FailureKind::NoCommonMethod));
        assert_eq!(h.state(), NegotiationState::Failed(FailureKind::NoCommonMethod));
    }

    #[test]
    fn test_auth_rejected() {
        let mut c = client("guess", &[MethodId::PLAINTEXT]);
        let mut h = host(&[MethodId::PLAINTEXT]);
        let err = run(&mut c, &mut h).unwrap_err();

        assert_eq!(err, NegotiationError::AuthRejected);
        assert_eq!(c.state(), NegotiationState::Failed(FailureKind::AuthRejected));
        assert!(h.peer_identity().is_none());
    }

    #[test]
    fn test_host_rejects_unoffered_selection() {
        let mut h = host(&[MethodId::PLAINTEXT, MethodId::NONE]);
        h.on_command(&Command::method_offer(vec![MethodId::PLAINTEXT]))
            .unwrap();
        let err = h
            .on_command(&Command::method_selection(MethodId::NONE))
            .unwrap_err();
        assert_eq!(err, NegotiationError::UnsupportedMethod(MethodId::NONE));
    }

    #[test]
    fn test_host_rejects_auth_before_selection() {
        let mut h = host(&[MethodId::PLAINTEXT]);
        let err = h
            .on_command(&Command::auth_step(MethodId::PLAINTEXT, "alice", b"x".to_vec()))
            .unwrap_err();
        assert!(matches!(err, NegotiationError::UnexpectedCommand { .. }));
        assert_eq!(
            h.state(),
            NegotiationState::Failed(FailureKind::ProtocolViolation)
        );
    }

    #[test]
    fn test_client_rejects_unexpected_command() {
        let mut c = client("wonderland", &[MethodId::NONE]);
        c.on_resolving().unwrap();
        c.on_connected().unwrap();
        let err = c.on_command(&Command::node_destroy(1)).unwrap_err();
        assert_eq!(
            err,
            NegotiationError::UnexpectedCommand {
                state: "AwaitingMethodOffer",
                kind: crate::command::CommandKind::NodeDestroy,
            }
        );
    }

    #[test]
    fn test_client_ignores_keepalive() {
        let mut c = client("wonderland", &[MethodId::NONE]);
        c.on_resolving().unwrap();
        c.on_connected().unwrap();
        assert!(c.on_command(&Command::KeepAlive).unwrap().is_empty());
        assert_eq!(c.state(), NegotiationState::AwaitingMethodOffer);
    }

    #[test]
    fn test_client_round_limit() {
        let creds = CredentialDescriptor::new("alice", "pw", [MethodId::PLAINTEXT]).unwrap();
        let mut c = ClientHandshake::new(creds, AuthMethods::default(), 1);
        c.on_resolving().unwrap();
        c.on_connected().unwrap();
        c.on_command(&Command::method_offer(vec![MethodId::PLAINTEXT]))
            .unwrap();

        let err = c
            .on_command(&Command::auth_result(AuthStatus::InProgress, vec![1]))
            .unwrap_err();
        assert_eq!(err, NegotiationError::TooManyRounds(1));
    }

    #[test]
    fn test_out_of_order_transitions() {
        let mut c = client("wonderland", &[MethodId::NONE]);
        assert_eq!(
            c.on_connected().unwrap_err(),
            NegotiationError::InvalidState("Init")
        );
        c.on_resolving().unwrap();
        assert!(c.on_resolving().is_err());
    }

    #[test]
    fn test_farewell() {
        assert_eq!(
            HostHandshake::farewell(&NegotiationError::AuthRejected),
            vec![
                Command::auth_result(AuthStatus::Rejected, Vec::new()),
                Command::terminate(TerminateReason::AuthFailed),
            ]
        );
        assert_eq!(
            HostHandshake::farewell(&NegotiationError::NoCommonMethod),
            vec![Command::terminate(TerminateReason::NoCommonMethod)]
        );
    }
}
