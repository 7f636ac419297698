use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};

/// Opaque user identifier returned by the upstream auth service. Kept as a
/// plain string rather than a `Uuid` — the upstream is an external system
/// and its id format is not this service's to assume.
pub type UserId = String;

const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

struct CacheEntry {
    user_id: UserId,
    expires_at: Instant,
}

/// §4.1 Auth Verifier — exchanges an opaque token for a user id via the
/// upstream session-validating service, caching successes for 5 minutes.
///
/// Cloning is cheap: the cache lives behind an `Arc`.
#[derive(Clone)]
pub struct AuthVerifier {
    http: reqwest::Client,
    base_url: Arc<str>,
    cache: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl AuthVerifier {
    pub fn new(base_url: impl Into<Arc<str>>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Resolve `token` to a user id, consulting the cache first.
    ///
    /// A cache hit never touches the network. A miss (absent or expired
    /// entry) calls the upstream and, on success, refreshes the cache entry.
    pub async fn verify(&self, token: &str) -> AppResult<UserId> {
        if let Some(user_id) = self.cached(token).await {
            return Ok(user_id);
        }

        let user_id = self.verify_upstream(token).await?;

        self.cache.write().await.insert(
            token.to_owned(),
            CacheEntry {
                user_id: user_id.clone(),
                expires_at: Instant::now() + CACHE_TTL,
            },
        );

        Ok(user_id)
    }

    /// Lazy-eviction read: a hit only counts if the entry has not expired.
    /// Expired entries are not proactively swept — they are simply ignored
    /// and overwritten on the next successful verification of that token.
    async fn cached(&self, token: &str) -> Option<UserId> {
        let cache = self.cache.read().await;
        let entry = cache.get(token)?;
        if Instant::now() < entry.expires_at {
            Some(entry.user_id.clone())
        } else {
            None
        }
    }

    async fn verify_upstream(&self, token: &str) -> AppResult<UserId> {
        let url = format!("{}/auth/validate-token", self.base_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = ?e, "auth service request failed");
                AppError::UpstreamUnavailable("auth service unreachable".into())
            })?;

        if !response.status().is_success() {
            return Err(AppError::Unauthenticated("session invalid".into()));
        }

        #[derive(serde::Deserialize)]
        struct ValidateResponse {
            #[serde(rename = "userId")]
            user_id: String,
        }

        let body: ValidateResponse = response.json().await.map_err(|e| {
            tracing::warn!(error = ?e, "auth service returned an unparseable body");
            AppError::Unauthenticated("invalid auth response".into())
        })?;

        let user_id = body.user_id.trim().to_owned();
        if user_id.is_empty() {
            return Err(AppError::Unauthenticated("empty user id".into()));
        }

        Ok(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_miss_on_fresh_verifier() {
        let verifier = AuthVerifier::new("http://localhost:1");
        assert!(verifier.cached("never-seen").await.is_none());
    }

    #[tokio::test]
    async fn cache_hit_after_manual_insert() {
        let verifier = AuthVerifier::new("http://localhost:1");
        verifier.cache.write().await.insert(
            "tok".into(),
            CacheEntry {
                user_id: "alice".into(),
                expires_at: Instant::now() + Duration::from_secs(60),
            },
        );
        assert_eq!(verifier.cached("tok").await.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn expired_entry_is_not_a_cache_hit() {
        let verifier = AuthVerifier::new("http://localhost:1");
        verifier.cache.write().await.insert(
            "tok".into(),
            CacheEntry {
                user_id: "alice".into(),
                expires_at: Instant::now() - Duration::from_secs(1),
            },
        );
        assert!(verifier.cached("tok").await.is_none());
    }

    #[tokio::test]
    async fn verify_against_unreachable_upstream_fails_closed() {
        let verifier = AuthVerifier::new("http://127.0.0.1:1");
        let result = verifier.verify("some-token").await;
        assert!(result.is_err());
    }
}
