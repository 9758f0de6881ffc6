//! Authentication module

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use holdbox_core::ReleasePipeline;
use holdbox_storage::{DatabasePool, MessageRepository};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db_pool: DatabasePool,
    pub messages: MessageRepository,
    /// `None` when no relay is configured
    pub release: Option<Arc<ReleasePipeline>>,
    /// Accepted API key hashes; empty disables authentication
    pub api_keys: Vec<String>,
}

impl AppState {
    /// Create state over a database pool
    pub fn new(db_pool: DatabasePool) -> Self {
        Self {
            messages: MessageRepository::new(db_pool.clone()),
            db_pool,
            release: None,
            api_keys: Vec::new(),
        }
    }

    /// Enable message release
    pub fn with_release(mut self, release: Arc<ReleasePipeline>) -> Self {
        self.release = Some(release);
        self
    }

    /// Require one of these API key hashes on `/api` routes
    pub fn with_api_keys(mut self, api_keys: Vec<String>) -> Self {
        self.api_keys = api_keys;
        self
    }
}

/// Extract API key from request
pub fn extract_api_key(req: &Request) -> Option<&str> {
    // Check Authorization header
    if let Some(auth) = req.headers().get("authorization") {
        if let Some(key) = auth.to_str().ok().and_then(|s| s.strip_prefix("Bearer ")) {
            return Some(key);
        }
    }

    // Check X-API-Key header
    if let Some(key) = req.headers().get("x-api-key") {
        if let Ok(key_str) = key.to_str() {
            return Some(key_str);
        }
    }

    None
}

/// Hash an API key for comparison
pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify an API key against a configured hash.
///
/// Accepts Argon2 PHC strings (`$argon2...`) and SHA-256 hex digests.
fn verify_api_key(api_key: &str, stored_hash: &str) -> bool {
    if stored_hash.starts_with("$argon2") {
        return PasswordHash::new(stored_hash)
            .ok()
            .and_then(|parsed_hash| {
                Argon2::default()
                    .verify_password(api_key.as_bytes(), &parsed_hash)
                    .ok()
            })
            .is_some();
    }

    hash_api_key(api_key).eq_ignore_ascii_case(stored_hash)
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if state.api_keys.is_empty() {
        return Ok(next.run(request).await);
    }

    let api_key = extract_api_key(&request).ok_or_else(|| {
        warn!("Missing API key in request to {}", request.uri().path());
        StatusCode::UNAUTHORIZED
    })?;

    if !state.api_keys.iter().any(|hash| verify_api_key(api_key, hash)) {
        warn!("Rejected API key for {}", request.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }

    debug!("API key accepted for {}", request.uri().path());
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::password_hash::{PasswordHasher, SaltString};
    use axum::body::Body;

    #[test]
    fn verifies_sha256_hash() {
        let api_key = "hb_test_key";
        let hash = hash_api_key(api_key);

        assert!(verify_api_key(api_key, &hash));
        assert!(verify_api_key(api_key, &hash.to_uppercase()));
        assert!(!verify_api_key("wrong_key", &hash));
    }

    #[test]
    fn verifies_argon2_hash() {
        let api_key = "hb_test_argon2_key";
        let salt = SaltString::from_b64("YWJjZGVmZ2hpamtsbW5vcA").unwrap();
        let hash = Argon2::default()
            .hash_password(api_key.as_bytes(), &salt)
            .expect("argon2 hash generation should succeed")
            .to_string();

        assert!(verify_api_key(api_key, &hash));
        assert!(!verify_api_key("wrong_key", &hash));
    }

    #[test]
    fn extracts_bearer_and_header_keys() {
        let req = Request::builder()
            .header("authorization", "Bearer abc")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_api_key(&req), Some("abc"));

        let req = Request::builder()
            .header("x-api-key", "def")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_api_key(&req), Some("def"));

        let req = Request::builder()
            .header("authorization", "Basic xyz")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_api_key(&req), None);
    }
}
