use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    axum::http::HeaderMap,
    axum_extra::extract::cookie::CookieJar,
    jsonwebtoken::{Algorithm, DecodingKey, Validation, decode},
    murmur_messages::MessageStore,
    murmur_protocol::Identity,
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
    tokio::time::timeout,
    tracing::{debug, warn},
};

// ── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("no session credential presented")]
    MissingCredential,
    #[error("invalid session credential: {0}")]
    Invalid(String),
    #[error("session verification timed out")]
    Timeout,
}

/// Turns an opaque session credential into a verified identity.
#[async_trait]
pub trait SessionVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<Identity, VerifyError>;
}

// ── JWT verifier ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionClaims {
    user_id: String,
    username: String,
}

/// Verifies HS256 session tokens carrying `userId` and `username` claims.
///
/// `exp` is enforced when present but not required.
pub struct JwtSessionVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtSessionVerifier {
    pub fn new(secret: &Secret<String>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_aud = false;
        Self {
            key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl SessionVerifier for JwtSessionVerifier {
    async fn verify(&self, credential: &str) -> Result<Identity, VerifyError> {
        let data = decode::<SessionClaims>(credential, &self.key, &self.validation)
            .map_err(|e| VerifyError::Invalid(e.to_string()))?;
        let claims = data.claims;
        if claims.user_id.trim().is_empty() {
            return Err(VerifyError::Invalid("empty userId claim".into()));
        }
        Ok(Identity::new(claims.user_id, claims.username))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Read the named cookie from request headers. Empty values count as absent.
pub fn credential_from_headers(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(cookie_name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

// ── Gatekeeper ───────────────────────────────────────────────────────────────

/// Decides which identity, if any, a new connection carries.
pub struct Gatekeeper {
    verifier: Arc<dyn SessionVerifier>,
    store: Arc<dyn MessageStore>,
    cookie_name: String,
    verify_timeout: Duration,
    storage_timeout: Duration,
}

impl Gatekeeper {
    pub fn new(
        verifier: Arc<dyn SessionVerifier>,
        store: Arc<dyn MessageStore>,
        cookie_name: String,
        verify_timeout: Duration,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            verifier,
            store,
            cookie_name,
            verify_timeout,
            storage_timeout,
        }
    }

    /// Extract the session credential from handshake headers.
    pub fn credential(&self, headers: &HeaderMap) -> Option<String> {
        credential_from_headers(headers, &self.cookie_name)
    }

    /// Verify a credential, bounded by the configured timeout.
    pub async fn verify(&self, credential: Option<&str>) -> Result<Identity, VerifyError> {
        let credential = credential.ok_or(VerifyError::MissingCredential)?;
        timeout(self.verify_timeout, self.verifier.verify(credential))
            .await
            .map_err(|_| VerifyError::Timeout)?
    }

    /// Verify a connecting client and record its display name for later
    /// message enrichment. The write is bounded by the storage timeout;
    /// recording failures are logged, not fatal.
    pub async fn admit(&self, credential: Option<&str>) -> Result<Identity, VerifyError> {
        let identity = self.verify(credential).await?;
        match timeout(self.storage_timeout, self.store.remember_user(&identity)).await {
            Ok(Ok(())) => debug!(user_id = %identity.user_id, "identity recorded"),
            Ok(Err(e)) => warn!(user_id = %identity.user_id, error = %e, "failed to record identity"),
            Err(_) => warn!(user_id = %identity.user_id, "recording identity timed out"),
        }
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        axum::http::{HeaderValue, header::COOKIE},
        jsonwebtoken::{EncodingKey, Header, encode},
        murmur_messages::InMemoryMessageStore,
        serde_json::json,
        std::time::{SystemTime, UNIX_EPOCH},
    };

    const SECRET: &str = "test-secret";

    fn token(claims: serde_json::Value, secret: &str) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn verifier() -> JwtSessionVerifier {
        JwtSessionVerifier::new(&Secret::new(SECRET.to_string()))
    }

    fn now() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
    }

    #[tokio::test]
    async fn accepts_token_without_expiry() {
        let t = token(json!({"userId": "u1", "username": "alice", "iat": now()}), SECRET);
        let identity = verifier().verify(&t).await.unwrap();
        assert_eq!(identity, Identity::new("u1", "alice"));
    }

    #[tokio::test]
    async fn rejects_wrong_secret_and_garbage() {
        let t = token(json!({"userId": "u1", "username": "alice"}), "other");
        assert!(matches!(
            verifier().verify(&t).await,
            Err(VerifyError::Invalid(_))
        ));
        assert!(matches!(
            verifier().verify("not-a-jwt").await,
            Err(VerifyError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn rejects_expired_token() {
        let t = token(
            json!({"userId": "u1", "username": "alice", "exp": now() - 3600}),
            SECRET,
        );
        assert!(verifier().verify(&t).await.is_err());
    }

    #[tokio::test]
    async fn rejects_token_without_user_id() {
        let t = token(json!({"userId": " ", "username": "alice"}), SECRET);
        assert!(verifier().verify(&t).await.is_err());
        let t = token(json!({"username": "alice"}), SECRET);
        assert!(verifier().verify(&t).await.is_err());
    }

    #[test]
    fn reads_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; token=abc.def.ghi; other=1"),
        );
        assert_eq!(
            credential_from_headers(&headers, "token").as_deref(),
            Some("abc.def.ghi")
        );
        assert_eq!(credential_from_headers(&headers, "sid"), None);

        let mut cleared = HeaderMap::new();
        cleared.insert(COOKIE, HeaderValue::from_static("token="));
        assert_eq!(credential_from_headers(&cleared, "token"), None);
        assert_eq!(credential_from_headers(&HeaderMap::new(), "token"), None);
    }

    fn gatekeeper(
        verifier: Arc<dyn SessionVerifier>,
        store: Arc<dyn MessageStore>,
    ) -> Gatekeeper {
        Gatekeeper::new(
            verifier,
            store,
            "token".into(),
            Duration::from_millis(100),
            Duration::from_millis(100),
        )
    }

    #[tokio::test]
    async fn admit_records_display_name() {
        let store = Arc::new(InMemoryMessageStore::new());
        let gk = gatekeeper(Arc::new(verifier()), store.clone());
        let t = token(json!({"userId": "u1", "username": "alice"}), SECRET);

        let identity = gk.admit(Some(&t)).await.unwrap();
        assert_eq!(identity.username, "alice");

        let msg = store.create("u1", "u2", "hi").await.unwrap();
        let view = store.enrich(&msg.id).await.unwrap().unwrap();
        assert_eq!(view.sender.username.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn admit_without_credential_fails() {
        let gk = gatekeeper(
            Arc::new(verifier()),
            Arc::new(InMemoryMessageStore::new()),
        );
        assert!(matches!(
            gk.admit(None).await,
            Err(VerifyError::MissingCredential)
        ));
    }

    struct StalledVerifier;

    #[async_trait]
    impl SessionVerifier for StalledVerifier {
        async fn verify(&self, _credential: &str) -> Result<Identity, VerifyError> {
            futures::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_verifier_times_out() {
        let gk = gatekeeper(
            Arc::new(StalledVerifier),
            Arc::new(InMemoryMessageStore::new()),
        );
        assert!(matches!(
            gk.admit(Some("whatever")).await,
            Err(VerifyError::Timeout)
        ));
    }

    struct StalledStore;

    #[async_trait]
    impl MessageStore for StalledStore {
        async fn remember_user(&self, _identity: &Identity) -> anyhow::Result<()> {
            futures::future::pending().await
        }

        async fn create(
            &self,
            _s: &str,
            _r: &str,
            _c: &str,
        ) -> anyhow::Result<murmur_messages::StoredMessage> {
            futures::future::pending().await
        }

        async fn enrich(&self, _id: &str) -> anyhow::Result<Option<murmur_protocol::MessageView>> {
            futures::future::pending().await
        }

        async fn history(
            &self,
            _a: &str,
            _b: &str,
        ) -> anyhow::Result<Vec<murmur_protocol::MessageView>> {
            futures::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_identity_write_is_bounded_by_storage_timeout() {
        let gk = Gatekeeper::new(
            Arc::new(verifier()),
            Arc::new(StalledStore),
            "token".into(),
            Duration::from_secs(3600),
            Duration::from_millis(200),
        );
        let t = token(json!({"userId": "u1", "username": "alice"}), SECRET);

        let started = tokio::time::Instant::now();
        let identity = gk.admit(Some(&t)).await.unwrap();
        assert_eq!(identity.user_id, "u1");
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(200) && waited < Duration::from_secs(1));
    }
}
