//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files (`~/.config/verse/config.toml` by default)
//! - Environment variables (`VERSE_*`), applied on top of the file
//! - CLI arguments (for the `verse` binary)

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::DEFAULT_MAX_FRAME_LEN;
use crate::error::{Result, VerseError};
use crate::negotiation::{AuthMethods, MemoryCredentialStore, MAX_AUTH_ROUNDS};
use crate::transport::{resolve_service, HostAddress, DEFAULT_SERVICE};

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Client connection settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Handshake settings
    #[serde(default)]
    pub negotiation: NegotiationConfig,

    /// Session loop settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Host (listener) settings
    #[serde(default)]
    pub host: HostConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            VerseError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        toml::from_str(&content)
            .map_err(|e| VerseError::Config(format!("Failed to parse config: {e}")))
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("verse").join("config.toml"))
    }

    /// Load the default file if it exists, then apply environment overrides
    pub fn load() -> Result<Self> {
        let config = match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(path)?,
            _ => Self::default(),
        };
        Ok(config.with_env_overrides())
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `VERSE_*` environment variables on top of this config
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(host) = std::env::var("VERSE_HOST") {
            self.client.host = host;
        }
        if let Ok(service) = std::env::var("VERSE_SERVICE") {
            if let Some(service) = resolve_service(&service) {
                self.client.service = service;
            }
        }
        if let Ok(val) = std::env::var("VERSE_KEEPALIVE_SECS") {
            if let Ok(val) = val.parse() {
                self.session.keepalive_secs = val;
            }
        }
        if let Ok(val) = std::env::var("VERSE_MAX_MALFORMED") {
            if let Ok(val) = val.parse() {
                self.session.max_malformed = val;
            }
        }
        if let Ok(val) = std::env::var("VERSE_STEP_TIMEOUT_MS") {
            if let Ok(val) = val.parse() {
                self.negotiation.step_timeout_ms = val;
            }
        }

        self
    }
}

/// Client connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Host name or address to connect to
    pub host: String,

    /// Service port
    pub service: u16,

    /// Per-candidate connect timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            service: DEFAULT_SERVICE,
            connect_timeout_ms: 5_000,
        }
    }
}

impl ClientConfig {
    /// Host address to dial
    pub fn address(&self) -> HostAddress {
        HostAddress::new(self.host.clone(), self.service)
    }

    /// Connect timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Handshake configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Bound on each waiting state, in milliseconds
    pub step_timeout_ms: u64,

    /// Methods the client offers, most preferred first
    pub methods: Vec<String>,

    /// Maximum authentication round trips
    pub max_auth_rounds: u32,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: 10_000,
            methods: vec!["HMAC-SHA256".to_string(), "PLAINTEXT".to_string()],
            max_auth_rounds: MAX_AUTH_ROUNDS,
        }
    }
}

impl NegotiationConfig {
    /// Step timeout as a duration
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }
}

/// Session loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle time before a keep-alive is sent, in seconds
    pub keepalive_secs: u64,

    /// How long one read waits for data, in milliseconds
    pub read_wait_ms: u64,

    /// Malformed frames tolerated before the session is terminated
    pub max_malformed: u32,

    /// Good commands that forgive one earlier malformed frame (0: never)
    pub malformed_decay: u32,

    /// Largest accepted frame (kind + body)
    pub max_frame_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_secs: 30,
            read_wait_ms: 50,
            max_malformed: 8,
            malformed_decay: 64,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl SessionConfig {
    /// Keep-alive interval as a duration
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    /// Read wait as a duration
    pub fn read_wait(&self) -> Duration {
        Duration::from_millis(self.read_wait_ms)
    }
}

/// Host (listener) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Address to listen on
    pub listen: String,

    /// Methods the host supports, most preferred first
    pub methods: Vec<String>,

    /// Known users
    pub users: Vec<UserEntry>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            listen: format!("127.0.0.1:{DEFAULT_SERVICE}"),
            methods: vec!["HMAC-SHA256".to_string(), "PLAINTEXT".to_string()],
            users: Vec::new(),
        }
    }
}

impl HostConfig {
    /// Build the method set from the configured names
    pub fn auth_methods(&self) -> Result<AuthMethods> {
        if self.methods.is_empty() {
            return Err(VerseError::Config("host.methods is empty".to_string()));
        }
        AuthMethods::from_names(&self.methods)
    }

    /// Build a credential store from the configured users
    pub fn credential_store(&self) -> MemoryCredentialStore {
        let mut store = MemoryCredentialStore::new();
        for user in &self.users {
            store.insert(user.identity.clone(), user.secret.as_bytes());
        }
        store
    }
}

/// One host-side user
#[derive(Clone, Serialize, Deserialize)]
pub struct UserEntry {
    /// Identity
    pub identity: String,
    /// Shared secret
    pub secret: String,
}

impl std::fmt::Debug for UserEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserEntry")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}
