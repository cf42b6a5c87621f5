/// Config schema types (server, auth, presence, typing, storage).
use {
    secrecy::Secret,
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MurmurConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub presence: PresenceConfig,
    pub typing: TypingConfig,
    pub storage: StorageConfig,
}

/// HTTP / WebSocket listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Browser origin allowed to make credentialed requests. When unset,
    /// CORS is permissive.
    pub client_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8000,
            client_url: None,
        }
    }
}

/// Session credential verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Name of the cookie carrying the session credential.
    pub cookie_name: String,
    /// HS256 signing secret. Never serialized back out.
    #[serde(skip_serializing)]
    pub jwt_secret: Option<Secret<String>>,
    pub verify_timeout_ms: u64,
    /// Close connections whose credential fails verification instead of
    /// keeping them open and inert.
    pub close_unauthenticated: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "token".into(),
            jwt_secret: None,
            verify_timeout_ms: 5_000,
            close_unauthenticated: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Delay before a disconnect is reflected in the broadcast snapshot.
    pub debounce_ms: u64,
    /// Collapse multi-device users into a single snapshot entry.
    pub dedupe_by_user: bool,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            dedupe_by_user: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TypingConfig {
    /// Send `typingEndedEvent` for any open typing signal when the typing
    /// connection goes away.
    pub clear_on_disconnect: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_url: String,
    /// Upper bound on a single storage call.
    pub timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            database_url: "sqlite://murmur.db?mode=rwc".into(),
            timeout_ms: 5_000,
        }
    }
}
