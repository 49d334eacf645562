use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use folio_contracts::canonical::{constant_time_eq, sha256_hex};
use http::HeaderMap;
use http::header;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use tokio::sync::RwLock;
use ulid::Ulid;

pub const SESSION_COOKIE: &str = "folio_session";

#[derive(Debug, Clone)]
pub struct AuthError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AuthError {}

pub const PASSWORD_HASH_SCHEME: &str = "pbkdf2-sha256";
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 200_000;
pub const MIN_PBKDF2_ITERATIONS: u32 = 10_000;
const MIN_SALT_BYTES: usize = 8;
const HASH_BYTES: usize = 32;

/// The one operator allowed into the dashboard.
///
/// The password is held as a salted PBKDF2-HMAC-SHA256 digest encoded as
/// `pbkdf2-sha256$<iterations>$<salt hex>$<digest hex>`. Both the username and
/// the digest are compared in constant time.
#[derive(Clone)]
pub struct AdminCredential {
    username: String,
    iterations: u32,
    salt: Vec<u8>,
    digest: [u8; HASH_BYTES],
}

impl std::fmt::Debug for AdminCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminCredential")
            .field("username", &self.username)
            .field("iterations", &self.iterations)
            .field("digest", &"<redacted>")
            .finish()
    }
}

impl AdminCredential {
    pub fn new(username: &str, password_hash: &str) -> Result<Self, AuthError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(invalid_config("admin username must be non-empty"));
        }

        let (iterations, salt, digest) = parse_password_hash(password_hash.trim())?;

        Ok(Self {
            username: username.to_string(),
            iterations,
            salt,
            digest,
        })
    }

    pub fn from_password(username: &str, password: &str) -> Result<Self, AuthError> {
        Self::new(username, &hash_password(password, MIN_PBKDF2_ITERATIONS))
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn verify(&self, username: &str, password: &str) -> bool {
        // Hash the usernames so the comparison length does not depend on input.
        let user_ok = constant_time_eq(
            sha256_hex(username.as_bytes()).as_bytes(),
            sha256_hex(self.username.as_bytes()).as_bytes(),
        );
        let candidate = derive_key(password, &self.salt, self.iterations);
        let password_ok = constant_time_eq(&candidate, &self.digest);
        user_ok & password_ok
    }
}

fn derive_key(password: &str, salt: &[u8], iterations: u32) -> [u8; HASH_BYTES] {
    let mut key = [0u8; HASH_BYTES];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
    key
}

/// Encodes `password` with a fresh random salt.
pub fn hash_password(password: &str, iterations: u32) -> String {
    let salt: [u8; 16] = rand::random();
    hash_password_with_salt(password, &salt, iterations)
}

pub fn hash_password_with_salt(password: &str, salt: &[u8], iterations: u32) -> String {
    let digest = derive_key(password, salt, iterations);
    format!(
        "{}${}${}${}",
        PASSWORD_HASH_SCHEME,
        iterations,
        hex::encode(salt),
        hex::encode(digest)
    )
}

fn parse_password_hash(encoded: &str) -> Result<(u32, Vec<u8>, [u8; HASH_BYTES]), AuthError> {
    let malformed = || {
        invalid_config(format!(
            "admin password hash must look like {}$<iterations>$<salt hex>$<digest hex>",
            PASSWORD_HASH_SCHEME
        ))
    };

    let mut parts = encoded.split('$');
    let (Some(scheme), Some(iterations), Some(salt), Some(digest), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return Err(malformed());
    };
    if scheme != PASSWORD_HASH_SCHEME {
        return Err(malformed());
    }

    let iterations = iterations.parse::<u32>().map_err(|_| malformed())?;
    if iterations < MIN_PBKDF2_ITERATIONS {
        return Err(invalid_config(format!(
            "admin password hash needs at least {} iterations",
            MIN_PBKDF2_ITERATIONS
        )));
    }

    let salt = hex::decode(salt).map_err(|_| malformed())?;
    if salt.len() < MIN_SALT_BYTES {
        return Err(invalid_config(format!(
            "admin password salt must be at least {} bytes",
            MIN_SALT_BYTES
        )));
    }

    let digest = hex::decode(digest)
        .ok()
        .and_then(|bytes| <[u8; HASH_BYTES]>::try_from(bytes).ok())
        .ok_or_else(malformed)?;

    Ok((iterations, salt, digest))
}

fn invalid_config(message: impl Into<String>) -> AuthError {
    AuthError {
        code: "ERR_INVALID_CONFIG",
        message: message.into(),
    }
}

/// Who the current request is acting as. Passed explicitly to handlers that
/// need an authenticated admin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminIdentity {
    pub username: String,
    /// Short, non-secret handle for logs (prefix of the token hash).
    pub session_id: String,
}

#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub identity: AdminIdentity,
    pub max_age: Duration,
}

#[derive(Debug, Clone)]
struct SessionEntry {
    identity: AdminIdentity,
    expires_at: Instant,
}

/// In-memory admin sessions keyed by the SHA-256 of the cookie token.
///
/// Restarting the process logs everyone out.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
    ttl: Duration,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(ttl: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            max_sessions: max_sessions.max(1),
        }
    }

    pub async fn issue(&self, username: &str) -> IssuedSession {
        let token = Ulid::new().to_string();
        let token_hash = sha256_hex(token.as_bytes());
        let identity = AdminIdentity {
            username: username.to_string(),
            session_id: token_hash[..12].to_string(),
        };

        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, entry| entry.expires_at > now);

        while sessions.len() >= self.max_sessions {
            let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(hash, _)| hash.clone())
            else {
                break;
            };
            if let Some(evicted) = sessions.remove(&oldest) {
                tracing::info!(
                    session_id = %evicted.identity.session_id,
                    max_sessions = self.max_sessions,
                    "session.evicted"
                );
            }
        }

        sessions.insert(
            token_hash,
            SessionEntry {
                identity: identity.clone(),
                expires_at: now + self.ttl,
            },
        );

        tracing::debug!(session_id = %identity.session_id, "session.issued");

        IssuedSession {
            token,
            identity,
            max_age: self.ttl,
        }
    }

    pub async fn resolve(&self, token: &str) -> Option<AdminIdentity> {
        let token_hash = sha256_hex(token.as_bytes());
        let now = Instant::now();

        {
            let sessions = self.sessions.read().await;
            match sessions.get(&token_hash) {
                None => return None,
                Some(entry) if entry.expires_at > now => return Some(entry.identity.clone()),
                Some(_) => {}
            }
        }

        if let Some(expired) = self.sessions.write().await.remove(&token_hash) {
            tracing::debug!(session_id = %expired.identity.session_id, "session.expired");
        }
        None
    }

    pub async fn revoke(&self, token: &str) -> bool {
        let token_hash = sha256_hex(token.as_bytes());
        match self.sessions.write().await.remove(&token_hash) {
            Some(entry) => {
                tracing::debug!(session_id = %entry.identity.session_id, "session.revoked");
                true
            }
            None => false,
        }
    }

    pub async fn active(&self) -> usize {
        let now = Instant::now();
        self.sessions
            .read()
            .await
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    /// Resolves the session cookie on a request into an identity.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AdminIdentity, AuthError> {
        let token = session_token(headers).ok_or_else(|| AuthError {
            code: "ERR_AUTH_REQUIRED",
            message: "missing admin session".to_string(),
        })?;

        self.resolve(&token).await.ok_or_else(|| AuthError {
            code: "ERR_AUTH_INVALID",
            message: "admin session is unknown or expired".to_string(),
        })
    }
}

/// Value of the session cookie, if the request carries a non-empty one.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().trim_matches('"'))
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}

pub fn session_cookie(token: &str, max_age: Duration, secure: bool) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
        SESSION_COOKIE,
        token,
        max_age.as_secs(),
        if secure { "; Secure" } else { "" }
    )
}

pub fn expired_session_cookie(secure: bool) -> String {
    session_cookie("", Duration::ZERO, secure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn credential_rejects_unsalted_or_weak_hashes() {
        let err = AdminCredential::new("admin", "admin123").unwrap_err();
        assert_eq!(err.code, "ERR_INVALID_CONFIG");

        let err = AdminCredential::new("admin", &sha256_hex(b"admin123")).unwrap_err();
        assert_eq!(err.code, "ERR_INVALID_CONFIG");

        let weak = hash_password_with_salt("pw", b"saltsalt", 1_000);
        let err = AdminCredential::new("admin", &weak).unwrap_err();
        assert!(err.message.contains("iterations"));

        let short_salt = hash_password_with_salt("pw", b"abc", MIN_PBKDF2_ITERATIONS);
        let err = AdminCredential::new("admin", &short_salt).unwrap_err();
        assert!(err.message.contains("salt"));

        let ok = hash_password("pw", MIN_PBKDF2_ITERATIONS);
        let err = AdminCredential::new("  ", &ok).unwrap_err();
        assert_eq!(err.code, "ERR_INVALID_CONFIG");
    }

    #[test]
    fn encoded_hash_carries_scheme_iterations_and_salt() {
        let encoded = hash_password_with_salt("pw", b"0123456789abcdef", MIN_PBKDF2_ITERATIONS);
        let parts = encoded.split('$').collect::<Vec<_>>();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], PASSWORD_HASH_SCHEME);
        assert_eq!(parts[1], MIN_PBKDF2_ITERATIONS.to_string());
        assert_eq!(parts[2], hex::encode(b"0123456789abcdef"));
        assert_eq!(parts[3].len(), 64);

        let credential = AdminCredential::new("admin", &encoded).unwrap();
        assert!(credential.verify("admin", "pw"));
    }

    #[test]
    fn same_password_gets_a_different_salt_each_time() {
        let a = hash_password("pw", MIN_PBKDF2_ITERATIONS);
        let b = hash_password("pw", MIN_PBKDF2_ITERATIONS);
        assert_ne!(a, b);
        assert!(AdminCredential::new("admin", &a).unwrap().verify("admin", "pw"));
        assert!(AdminCredential::new("admin", &b).unwrap().verify("admin", "pw"));
    }

    #[test]
    fn credential_verifies_exact_username_and_password() {
        let credential = AdminCredential::from_password("admin", "s3cret").unwrap();
        assert!(credential.verify("admin", "s3cret"));
        assert!(!credential.verify("admin", "s3cret "));
        assert!(!credential.verify("Admin", "s3cret"));
        assert!(!credential.verify("", ""));
    }

    #[test]
    fn credential_debug_hides_digest() {
        let encoded = hash_password_with_salt("s3cret", b"saltsalt", MIN_PBKDF2_ITERATIONS);
        let credential = AdminCredential::new("admin", &encoded).unwrap();
        let rendered = format!("{:?}", credential);
        assert!(rendered.contains("<redacted>"));
        let digest = encoded.rsplit('$').next().unwrap();
        assert!(!rendered.contains(digest));
    }

    #[test]
    fn session_token_reads_named_cookie_only() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; folio_session=abc123; other=1"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("abc123"));

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("folio_session="));
        assert_eq!(session_token(&headers), None);

        assert_eq!(session_token(&HeaderMap::new()), None);
    }

    #[test]
    fn cookie_attributes_follow_secure_flag() {
        let cookie = session_cookie("tok", Duration::from_secs(60), true);
        assert_eq!(
            cookie,
            "folio_session=tok; Path=/; HttpOnly; SameSite=Lax; Max-Age=60; Secure"
        );
        assert!(expired_session_cookie(false).contains("Max-Age=0"));
        assert!(!expired_session_cookie(false).contains("Secure"));
    }

    #[tokio::test]
    async fn issued_session_resolves_until_revoked() {
        let registry = SessionRegistry::new(Duration::from_secs(60), 4);
        let issued = registry.issue("admin").await;

        let identity = registry.resolve(&issued.token).await.expect("session should resolve");
        assert_eq!(identity, issued.identity);
        assert_eq!(identity.username, "admin");

        assert!(registry.revoke(&issued.token).await);
        assert!(registry.resolve(&issued.token).await.is_none());
        assert!(!registry.revoke(&issued.token).await);
    }

    #[tokio::test]
    async fn expired_session_is_rejected_and_pruned() {
        let registry = SessionRegistry::new(Duration::from_millis(5), 4);
        let issued = registry.issue("admin").await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(registry.resolve(&issued.token).await.is_none());
        assert_eq!(registry.active().await, 0);
    }

    #[tokio::test]
    async fn oldest_session_is_evicted_at_capacity() {
        let registry = SessionRegistry::new(Duration::from_secs(60), 2);
        let first = registry.issue("admin").await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second = registry.issue("admin").await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        let third = registry.issue("admin").await;

        assert!(registry.resolve(&first.token).await.is_none());
        assert!(registry.resolve(&second.token).await.is_some());
        assert!(registry.resolve(&third.token).await.is_some());
    }

    #[tokio::test]
    async fn authenticate_distinguishes_missing_and_unknown_sessions() {
        let registry = SessionRegistry::new(Duration::from_secs(60), 4);

        let err = registry.authenticate(&HeaderMap::new()).await.unwrap_err();
        assert_eq!(err.code, "ERR_AUTH_REQUIRED");

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("folio_session=nope"));
        let err = registry.authenticate(&headers).await.unwrap_err();
        assert_eq!(err.code, "ERR_AUTH_INVALID");
    }
}
