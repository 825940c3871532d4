//! Authentication method ids, client credentials and host-side secrets.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use zeroize::Zeroizing;

use crate::command::MAX_IDENTITY_LEN;
use crate::error::{NegotiationError, VerseError};

/// One-byte authentication method identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(u8);

impl MethodId {
    /// Reserved; never valid on the wire. Also the cleared sentinel.
    pub const RESERVED: MethodId = MethodId(0);
    /// No authentication
    pub const NONE: MethodId = MethodId(1);
    /// Secret sent in the auth step
    pub const PLAINTEXT: MethodId = MethodId(2);
    /// HMAC-SHA256 challenge/response
    pub const HMAC_SHA256: MethodId = MethodId(3);

    /// Wrap a raw method byte.
    pub const fn new(raw: u8) -> Self {
        MethodId(raw)
    }

    /// Raw method byte.
    pub const fn as_byte(&self) -> u8 {
        self.0
    }

    /// Whether the id may appear on the wire.
    pub fn is_valid(&self) -> bool {
        *self != MethodId::RESERVED
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MethodId::RESERVED => f.write_str("RESERVED"),
            MethodId::NONE => f.write_str("NONE"),
            MethodId::PLAINTEXT => f.write_str("PLAINTEXT"),
            MethodId::HMAC_SHA256 => f.write_str("HMAC-SHA256"),
            MethodId(n) => write!(f, "METHOD({n})"),
        }
    }
}

impl FromStr for MethodId {
    type Err = VerseError;

    /// Accepts the display names (case-insensitive) or a decimal id.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let method = match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => MethodId::NONE,
            "PLAINTEXT" | "PASSWORD" => MethodId::PLAINTEXT,
            "HMAC-SHA256" | "HMAC" => MethodId::HMAC_SHA256,
            other => other
                .parse::<u8>()
                .map(MethodId)
                .map_err(|_| VerseError::Config(format!("Unknown authentication method '{s}'")))?,
        };
        if !method.is_valid() {
            return Err(VerseError::Config(format!(
                "Authentication method '{s}' is reserved"
            )));
        }
        Ok(method)
    }
}

/// Client credentials for one negotiation.
///
/// Methods are kept in preference order; the secret is wiped on drop and
/// never printed.
#[derive(Clone)]
pub struct CredentialDescriptor {
    identity: String,
    secret: Zeroizing<Vec<u8>>,
    methods: Vec<MethodId>,
}

impl CredentialDescriptor {
    /// Build a descriptor; the identity must fit an `Auth_Step` and at
    /// least one valid method must be offered.
    pub fn new(
        identity: impl Into<String>,
        secret: impl Into<Vec<u8>>,
        methods: impl IntoIterator<Item = MethodId>,
    ) -> Result<Self, NegotiationError> {
        let identity = identity.into();
        if identity.is_empty() || identity.len() > MAX_IDENTITY_LEN {
            return Err(NegotiationError::InvalidIdentity(identity.len()));
        }

        let mut offered: Vec<MethodId> = Vec::new();
        for method in methods {
            if !method.is_valid() {
                return Err(NegotiationError::InvalidMethod(method));
            }
            if !offered.contains(&method) {
                offered.push(method);
            }
        }
        if offered.is_empty() {
            return Err(NegotiationError::NoOfferedMethods);
        }

        Ok(Self {
            identity,
            secret: Zeroizing::new(secret.into()),
            methods: offered,
        })
    }

    /// Identity presented to the host.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Shared secret.
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// Offered methods, most preferred first.
    pub fn methods(&self) -> &[MethodId] {
        &self.methods
    }
}

impl fmt::Debug for CredentialDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialDescriptor")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .field("methods", &self.methods)
            .finish()
    }
}

/// Host-side lookup of identity secrets.
pub trait CredentialStore: Send + Sync {
    /// Secret registered for `identity`, if any.
    fn secret(&self, identity: &str) -> Option<Zeroizing<Vec<u8>>>;
}

/// In-memory credential store.
#[derive(Default, Clone)]
pub struct MemoryCredentialStore {
    users: HashMap<String, Zeroizing<Vec<u8>>>,
}

impl MemoryCredentialStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user (builder form)
    pub fn with_user(mut self, identity: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        self.insert(identity, secret);
        self
    }

    /// Add or replace a user
    pub fn insert(&mut self, identity: impl Into<String>, secret: impl Into<Vec<u8>>) {
        self.users
            .insert(identity.into(), Zeroizing::new(secret.into()));
    }

    /// Number of registered users
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether no users are registered
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl fmt::Debug for MemoryCredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCredentialStore")
            .field("users", &self.users.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn secret(&self, identity: &str) -> Option<Zeroizing<Vec<u8>>> {
        self.users.get(identity).cloned()
    }
}
