//! OAuth 2.0 token acquisition and caching (§4.4).
//!
//! A per-target cache with single-flight refresh: concurrent `acquire`
//! calls for the same target collapse into one upstream POST, mirroring
//! the per-target critical section called for in §5. The cache owns
//! tokens exclusively (§3 invariant); callers only ever see a cloned,
//! read-only [`OAuth2Token`] snapshot.

mod grant;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use secrecy::ExposeSecret;
use tokio::sync::Mutex;

use crate::config::OAuth2AuthData;
use crate::error::{RelayError, RelayResult};

pub use grant::build_token_request;

/// A cached OAuth 2.0 access token (§3 data model).
#[derive(Debug, Clone)]
pub struct OAuth2Token {
    pub access_token: String,
    pub token_type: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

impl OAuth2Token {
    fn expires_at(&self) -> DateTime<Utc> {
        self.acquired_at + chrono::Duration::seconds(self.expires_in as i64)
    }

    /// Whether the token is expired, using a 60-second safety buffer so
    /// in-flight requests don't race a just-expired token.
    pub fn is_expired(&self, buffer: Duration) -> bool {
        Utc::now() >= self.expires_at() - chrono::Duration::seconds(buffer.as_secs() as i64)
    }
}

const EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Per-target single-flight lock: while a `Mutex` guard is held for a
/// target, every other task acquiring the same target's slot blocks on
/// the same lock rather than issuing a duplicate upstream call.
struct TargetSlot {
    lock: Mutex<()>,
}

/// Acquisition/refresh/hit/miss counters (§4.4 Stats, feeding §0's
/// telemetry hooks).
#[derive(Debug, Default)]
pub struct CacheStats {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub token_acquisitions: AtomicU64,
    pub token_refreshes: AtomicU64,
    pub token_acquisition_failures: AtomicU64,
}

/// A point-in-time snapshot of [`CacheStats`] (§4.4).
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CacheStatsSnapshot {
    pub cached_token_count: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub token_acquisitions: u64,
    pub token_refreshes: u64,
    pub token_acquisition_failures: u64,
    pub cache_hit_rate: f64,
}

/// Per-target OAuth 2.0 token cache.
pub struct TokenCache {
    tokens: DashMap<String, OAuth2Token>,
    slots: DashMap<String, Arc<TargetSlot>>,
    stats: CacheStats,
    http: reqwest::Client,
}

impl TokenCache {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            tokens: DashMap::new(),
            slots: DashMap::new(),
            stats: CacheStats::default(),
            http,
        }
    }

    fn slot_for(&self, target: &str) -> Arc<TargetSlot> {
        self.slots
            .entry(target.to_string())
            .or_insert_with(|| {
                Arc::new(TargetSlot {
                    lock: Mutex::new(()),
                })
            })
            .clone()
    }

    /// Acquire a valid access token for `target`, reusing a cached one
    /// when possible and otherwise performing exactly one upstream
    /// acquisition shared by every concurrent waiter (§4.4, §5).
    ///
    /// `target_endpoint` is only consulted when `authData.token_endpoint`
    /// is absent, to build the implementation-defined default
    /// `{endpoint}/oauth/tokens` (§4.4).
    pub async fn acquire(
        &self,
        target_name: &str,
        target_endpoint: &url::Url,
        auth: &OAuth2AuthData,
    ) -> RelayResult<OAuth2Token> {
        if let Some(token) = self.tokens.get(target_name) {
            if !token.is_expired(EXPIRY_BUFFER) {
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(token.clone());
            }
        }

        let slot = self.slot_for(target_name);
        let _guard = slot.lock.lock().await;

        // Re-check after acquiring the lock: a waiter may have just
        // populated the cache while we queued for the slot.
        if let Some(token) = self.tokens.get(target_name) {
            if !token.is_expired(EXPIRY_BUFFER) {
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(token.clone());
            }
        }
        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);

        let stale_refresh_token = self
            .tokens
            .get(target_name)
            .and_then(|t| t.refresh_token.clone());

        // Either path counts as one acquisition (§4.4); refresh additionally
        // bumps its own counter.
        let result = match stale_refresh_token {
            Some(refresh_token) => {
                self.stats.token_refreshes.fetch_add(1, Ordering::Relaxed);
                self.stats.token_acquisitions.fetch_add(1, Ordering::Relaxed);
                self.request_token(target_endpoint, auth, Some(&refresh_token)).await
            }
            None => {
                self.stats.token_acquisitions.fetch_add(1, Ordering::Relaxed);
                self.request_token(target_endpoint, auth, None).await
            }
        };

        match result {
            Ok(token) => {
                self.tokens.insert(target_name.to_string(), token.clone());
                Ok(token)
            }
            Err(e) => {
                self.stats
                    .token_acquisition_failures
                    .fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    async fn request_token(
        &self,
        target_endpoint: &url::Url,
        auth: &OAuth2AuthData,
        refresh_override: Option<&str>,
    ) -> RelayResult<OAuth2Token> {
        let (url, req) = build_token_request(auth, target_endpoint, refresh_override)?;

        let mut builder = self.http.post(url).form(&req.form);
        if auth.auth_scheme_basic {
            builder = builder.basic_auth(&req.basic_user, Some(req.basic_pass.expose_secret()));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RelayError::from_reqwest(e, 0))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "oauth2 token endpoint returned an error");
            return Err(RelayError::credential(format!(
                "token endpoint returned {status}"
            )));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| RelayError::credential(format!("invalid token response: {e}")))?;

        Ok(OAuth2Token {
            access_token: parsed.access_token,
            token_type: parsed.token_type.unwrap_or_else(|| "Bearer".to_string()),
            acquired_at: Utc::now(),
            expires_in: parsed.expires_in.unwrap_or(3600),
            refresh_token: parsed.refresh_token,
            scope: parsed.scope,
        })
    }

    /// Revoke nothing upstream; just drop the cached entry for `target`.
    pub fn clear_token_cache(&self, target: &str) {
        self.tokens.remove(target);
    }

    /// Drop every cached entry.
    pub fn clear_all(&self) {
        self.tokens.clear();
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let hits = self.stats.cache_hits.load(Ordering::Relaxed);
        let misses = self.stats.cache_misses.load(Ordering::Relaxed);
        let denom = hits + misses;
        CacheStatsSnapshot {
            cached_token_count: self.tokens.len(),
            cache_hits: hits,
            cache_misses: misses,
            token_acquisitions: self.stats.token_acquisitions.load(Ordering::Relaxed),
            token_refreshes: self.stats.token_refreshes.load(Ordering::Relaxed),
            token_acquisition_failures: self
                .stats
                .token_acquisition_failures
                .load(Ordering::Relaxed),
            cache_hit_rate: if denom == 0 {
                0.0
            } else {
                hits as f64 / denom as f64
            },
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    token_type: Option<String>,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OAuth2Grant;
    use secrecy::SecretString;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn password_auth(token_endpoint: &str) -> OAuth2AuthData {
        OAuth2AuthData {
            token_endpoint: Some(url::Url::parse(token_endpoint).unwrap()),
            auth_scheme_basic: false,
            grant: OAuth2Grant::Password {
                username: "u".to_string(),
                password: SecretString::from("p".to_string()),
                client_id: "c1".to_string(),
                client_secret: SecretString::from("s1".to_string()),
                scope: None,
            },
        }
    }

    #[tokio::test]
    async fn caches_token_and_counts_hit_then_miss() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/tokens"))
            .and(body_string_contains("grant_type=password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "T",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cache = TokenCache::new(reqwest::Client::new());
        let auth = password_auth(&format!("{}/oauth/tokens", server.uri()));

        let t1 = cache.acquire("api", &auth.token_endpoint.clone().unwrap(), &auth).await.unwrap();
        assert_eq!(t1.access_token, "T");
        let t2 = cache.acquire("api", &auth.token_endpoint.clone().unwrap(), &auth).await.unwrap();
        assert_eq!(t2.access_token, "T");

        let stats = cache.stats();
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.token_acquisitions, 1);
    }

    #[tokio::test]
    async fn concurrent_acquisitions_single_flight() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/tokens"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "T",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cache = Arc::new(TokenCache::new(reqwest::Client::new()));
        let auth = Arc::new(password_auth(&format!("{}/oauth/tokens", server.uri())));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let auth = auth.clone();
            handles.push(tokio::spawn(async move {
                cache.acquire("api", &auth.token_endpoint.clone().unwrap(), &auth).await.unwrap()
            }));
        }
        for h in handles {
            let token = h.await.unwrap();
            assert_eq!(token.access_token, "T");
        }
        assert_eq!(cache.stats().token_acquisitions, 1);
    }

    #[tokio::test]
    async fn non_2xx_is_never_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/tokens"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let cache = TokenCache::new(reqwest::Client::new());
        let auth = password_auth(&format!("{}/oauth/tokens", server.uri()));
        assert!(cache.acquire("api", &auth.token_endpoint.clone().unwrap(), &auth).await.is_err());
        assert_eq!(cache.stats().cached_token_count, 0);
        assert_eq!(cache.stats().token_acquisition_failures, 1);
    }

    #[test]
    fn hit_rate_is_zero_with_no_traffic() {
        let cache = TokenCache::new(reqwest::Client::new());
        assert_eq!(cache.stats().cache_hit_rate, 0.0);
    }
}
