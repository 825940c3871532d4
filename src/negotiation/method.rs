//! Pluggable authentication methods.
//!
//! | Method        | Client step                  | Host verdict                         |
//! |---------------|------------------------------|--------------------------------------|
//! | `NONE`        | empty                        | accepted                             |
//! | `PLAINTEXT`   | the secret                   | constant-time compare with the store |
//! | `HMAC-SHA256` | empty, then `HMAC(secret, n)`| challenge `n`, then verify the tag   |

use std::fmt;
use std::sync::Arc;

use super::credentials::{CredentialDescriptor, CredentialStore, MethodId};
use crate::error::VerseError;

/// Host decision on one auth step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthVerdict {
    /// Credentials verified
    Accepted,
    /// Credentials refused
    Rejected,
    /// Another step is needed; the payload is sent back to the client
    Continue(Vec<u8>),
}

/// Host-side scratch state carried across the steps of one handshake.
#[derive(Debug, Default)]
pub struct AuthExchange {
    /// Challenge issued to the client, if the method uses one
    pub challenge: Option<Vec<u8>>,
}

/// One authentication method, usable from both ends.
pub trait AuthMethod: Send + Sync {
    /// Method identifier
    fn id(&self) -> MethodId;

    /// Produce the client's next step. `challenge` is `None` for the first
    /// step and the host's in-progress payload afterwards.
    fn client_step(&self, credentials: &CredentialDescriptor, challenge: Option<&[u8]>) -> Vec<u8>;

    /// Judge one client step on the host.
    fn host_step(
        &self,
        store: &dyn CredentialStore,
        identity: &str,
        data: &[u8],
        exchange: &mut AuthExchange,
    ) -> AuthVerdict;
}

/// No authentication; the identity is taken at face value.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneMethod;

impl AuthMethod for NoneMethod {
    fn id(&self) -> MethodId {
        MethodId::NONE
    }

    fn client_step(&self, _credentials: &CredentialDescriptor, _challenge: Option<&[u8]>) -> Vec<u8> {
        Vec::new()
    }

    fn host_step(
        &self,
        _store: &dyn CredentialStore,
        _identity: &str,
        _data: &[u8],
        _exchange: &mut AuthExchange,
    ) -> AuthVerdict {
        AuthVerdict::Accepted
    }
}

/// Secret sent as-is; only safe over a secure channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaintextMethod;

impl AuthMethod for PlaintextMethod {
    fn id(&self) -> MethodId {
        MethodId::PLAINTEXT
    }

    fn client_step(&self, credentials: &CredentialDescriptor, _challenge: Option<&[u8]>) -> Vec<u8> {
        credentials.secret().to_vec()
    }

    fn host_step(
        &self,
        store: &dyn CredentialStore,
        identity: &str,
        data: &[u8],
        _exchange: &mut AuthExchange,
    ) -> AuthVerdict {
        match store.secret(identity) {
            Some(secret) if constant_time_eq(&secret, data) => AuthVerdict::Accepted,
            _ => AuthVerdict::Rejected,
        }
    }
}

/// HMAC-SHA256 challenge/response. The secret never crosses the wire.
#[cfg(feature = "crypto")]
#[derive(Debug, Default, Clone, Copy)]
pub struct HmacChallengeMethod;

#[cfg(feature = "crypto")]
impl HmacChallengeMethod {
    /// Nonce length in bytes
    pub const NONCE_LEN: usize = 32;

    fn mac(secret: &[u8]) -> Option<hmac::Hmac<sha2::Sha256>> {
        use hmac::Mac;
        hmac::Hmac::<sha2::Sha256>::new_from_slice(secret).ok()
    }
}

#[cfg(feature = "crypto")]
impl AuthMethod for HmacChallengeMethod {
    fn id(&self) -> MethodId {
        MethodId::HMAC_SHA256
    }

    fn client_step(&self, credentials: &CredentialDescriptor, challenge: Option<&[u8]>) -> Vec<u8> {
        use hmac::Mac;

        let Some(nonce) = challenge else {
            return Vec::new();
        };
        match Self::mac(credentials.secret()) {
            Some(mut mac) => {
                mac.update(nonce);
                mac.finalize().into_bytes().to_vec()
            },
            None => Vec::new(),
        }
    }

    fn host_step(
        &self,
        store: &dyn CredentialStore,
        identity: &str,
        data: &[u8],
        exchange: &mut AuthExchange,
    ) -> AuthVerdict {
        use hmac::Mac;
        use rand::RngCore;

        let Some(nonce) = exchange.challenge.take() else {
            let mut nonce = vec![0u8; Self::NONCE_LEN];
            rand::thread_rng().fill_bytes(&mut nonce);
            exchange.challenge = Some(nonce.clone());
            return AuthVerdict::Continue(nonce);
        };

        let Some(secret) = store.secret(identity) else {
            return AuthVerdict::Rejected;
        };
        let Some(mut mac) = Self::mac(&secret) else {
            return AuthVerdict::Rejected;
        };
        mac.update(&nonce);
        match mac.verify_slice(data) {
            Ok(()) => AuthVerdict::Accepted,
            Err(_) => AuthVerdict::Rejected,
        }
    }
}

/// Ordered set of method implementations (first = most preferred).
#[derive(Clone)]
pub struct AuthMethods {
    methods: Vec<Arc<dyn AuthMethod>>,
}

impl Default for AuthMethods {
    /// Every built-in method, strongest first.
    fn default() -> Self {
        let methods = Self::empty();
        #[cfg(feature = "crypto")]
        let methods = methods.with(HmacChallengeMethod);
        methods.with(PlaintextMethod).with(NoneMethod)
    }
}

impl AuthMethods {
    /// Set with no methods
    pub fn empty() -> Self {
        Self {
            methods: Vec::new(),
        }
    }

    /// Add (or replace) a method implementation
    pub fn with(mut self, method: impl AuthMethod + 'static) -> Self {
        let id = method.id();
        self.methods.retain(|m| m.id() != id);
        self.methods.push(Arc::new(method));
        self
    }

    /// Built-in methods for the given ids, in the given order.
    pub fn from_ids(ids: &[MethodId]) -> Result<Self, VerseError> {
        let builtin = Self::default();
        let mut methods = Self::empty();
        for id in ids {
            let method = builtin.methods.iter().find(|m| m.id() == *id).ok_or_else(|| {
                VerseError::Config(format!("Authentication method {id} is not available"))
            })?;
            if methods.get(*id).is_none() {
                methods.methods.push(Arc::clone(method));
            }
        }
        Ok(methods)
    }

    /// Built-in methods from config names such as `"PLAINTEXT"`.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, VerseError> {
        let ids = names
            .iter()
            .map(|name| name.as_ref().parse())
            .collect::<Result<Vec<MethodId>, _>>()?;
        Self::from_ids(&ids)
    }

    /// Look up an implementation
    pub fn get(&self, id: MethodId) -> Option<&dyn AuthMethod> {
        self.methods
            .iter()
            .find(|m| m.id() == id)
            .map(|m| m.as_ref())
    }

    /// Ids in preference order
    pub fn ids(&self) -> Vec<MethodId> {
        self.methods.iter().map(|m| m.id()).collect()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl fmt::Debug for AuthMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}

/// Constant-time comparison so secret checks do not leak a prefix length.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiation::MemoryCredentialStore;

    fn store() -> MemoryCredentialStore {
        MemoryCredentialStore::new().with_user("alice", "wonderland")
    }

    fn alice(secret: &str) -> CredentialDescriptor {
        CredentialDescriptor::new(
            "alice",
            secret,
            [MethodId::HMAC_SHA256, MethodId::PLAINTEXT, MethodId::NONE],
        )
        .unwrap()
    }

    #[test]
    fn test_none_accepts() {
        let mut exchange = AuthExchange::default();
        let data = NoneMethod.client_step(&alice("x"), None);
        assert!(data.is_empty());
        assert_eq!(
            NoneMethod.host_step(&store(), "anyone", &data, &mut exchange),
            AuthVerdict::Accepted
        );
    }

    #[test]
    fn test_plaintext() {
        let mut exchange = AuthExchange::default();
        let good = PlaintextMethod.client_step(&alice("wonderland"), None);
        let bad = PlaintextMethod.client_step(&alice("looking-glass"), None);

        assert_eq!(
            PlaintextMethod.host_step(&store(), "alice", &good, &mut exchange),
            AuthVerdict::Accepted
        );
        assert_eq!(
            PlaintextMethod.host_step(&store(), "alice", &bad, &mut exchange),
            AuthVerdict::Rejected
        );
        assert_eq!(
            PlaintextMethod.host_step(&store(), "mallory", &good, &mut exchange),
            AuthVerdict::Rejected
        );
    }

    #[cfg(feature = "crypto")]
    #[test]
    fn test_hmac_challenge_response() {
        let method = HmacChallengeMethod;
        let creds = alice("wonderland");
        let mut exchange = AuthExchange::default();

        let first = method.client_step(&creds, None);
        let nonce = match method.host_step(&store(), "alice", &first, &mut exchange) {
            AuthVerdict::Continue(nonce) => nonce,
            other => panic!("expected challenge, got {other:?}"),
        };
        assert_eq!(nonce.len(), HmacChallengeMethod::NONCE_LEN);

        let answer = method.client_step(&creds, Some(&nonce));
        assert_eq!(answer.len(), 32);
        assert_eq!(
            method.host_step(&store(), "alice", &answer, &mut exchange),
            AuthVerdict::Accepted
        );
    }

    #[cfg(feature = "crypto")]
    #[test]
    fn test_hmac_wrong_secret() {
        let method = HmacChallengeMethod;
        let mut exchange = AuthExchange::default();

        let AuthVerdict::Continue(nonce) = method.host_step(&store(), "alice", &[], &mut exchange)
        else {
            panic!("expected challenge");
        };
        let answer = method.client_step(&alice("guess"), Some(&nonce));
        assert_eq!(
            method.host_step(&store(), "alice", &answer, &mut exchange),
            AuthVerdict::Rejected
        );
    }

    #[test]
    fn test_methods_from_names() {
        let methods = AuthMethods::from_names(&["plaintext", "none", "PLAINTEXT"]).unwrap();
        assert_eq!(methods.ids(), vec![MethodId::PLAINTEXT, MethodId::NONE]);
        assert!(methods.get(MethodId::PLAINTEXT).is_some());
        assert!(methods.get(MethodId::HMAC_SHA256).is_none());

        assert!(AuthMethods::from_names(&["kerberos"]).is_err());
        assert!(AuthMethods::from_ids(&[MethodId::new(99)]).is_err());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
