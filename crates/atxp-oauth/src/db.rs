//! The abstract OAuth persistence layer (spec §3, §6: "Persisted state layout").
//!
//! Three logical collections, each keyed as spec.md describes:
//! `client_credentials` by issuer URL, `pkce` by `(account_id, state)` with TTL,
//! `access_tokens` by `(account_id, resource_url)` with TTL. [`InMemoryOAuthDb`] is
//! the reference implementation used by tests and single-process deployments;
//! production backends (Redis, a SQL table) implement the same trait.

use async_trait::async_trait;
use atxp_types::{AccessToken, ClientCredentials, PkceValues, UnixTimestamp};
use dashmap::DashMap;
use std::time::{Duration, Instant};

#[async_trait]
pub trait OAuthDb: Send + Sync {
    async fn get_access_token(&self, account_id: &str, resource_url: &str) -> Option<AccessToken>;
    async fn set_access_token(&self, account_id: &str, token: AccessToken);
    async fn delete_access_token(&self, account_id: &str, resource_url: &str);

    async fn get_client_credentials(&self, issuer: &str) -> Option<ClientCredentials>;
    async fn set_client_credentials(&self, issuer: &str, credentials: ClientCredentials);
    async fn delete_client_credentials(&self, issuer: &str);

    async fn get_pkce(&self, account_id: &str, state: &str) -> Option<PkceValues>;
    async fn set_pkce(&self, account_id: &str, state: &str, values: PkceValues, ttl: Duration);
    async fn delete_pkce(&self, account_id: &str, state: &str);
}

/// Default TTL applied to an access token with no absolute `expires_at` (spec §4.2:
/// "for entries without an absolute expiry, a configured default TTL applies").
pub const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::from_secs(3600);
/// Upper bound on a PKCE record's lifetime (spec §3: "TTL ≤ 10 minutes").
pub const PKCE_TTL: Duration = Duration::from_secs(10 * 60);

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Entry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Entry {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// An in-memory [`OAuthDb`] backed by `dashmap`, the same single-process
/// concurrent-map idiom the payment-rail ecosystem uses for per-key caches.
#[derive(Default)]
pub struct InMemoryOAuthDb {
    access_tokens: DashMap<(String, String), Entry<AccessToken>>,
    client_credentials: DashMap<String, ClientCredentials>,
    pkce: DashMap<(String, String), Entry<PkceValues>>,
}

impl InMemoryOAuthDb {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OAuthDb for InMemoryOAuthDb {
    async fn get_access_token(&self, account_id: &str, resource_url: &str) -> Option<AccessToken> {
        let key = (account_id.to_string(), resource_url.to_string());
        let expired_by_ttl = self
            .access_tokens
            .get(&key)
            .map(|entry| entry.is_expired())
            .unwrap_or(false);
        if expired_by_ttl {
            self.access_tokens.remove(&key);
            return None;
        }
        let token = self.access_tokens.get(&key).map(|e| e.value.clone())?;
        if token.is_expired(UnixTimestamp::now()) {
            self.access_tokens.remove(&key);
            return None;
        }
        Some(token)
    }

    async fn set_access_token(&self, account_id: &str, token: AccessToken) {
        let key = (account_id.to_string(), token.resource_url.clone());
        let ttl = match token.expires_at {
            Some(exp) => {
                let remaining = exp - UnixTimestamp::now().as_secs();
                Duration::from_secs(remaining.max(0) as u64)
            }
            None => DEFAULT_ACCESS_TOKEN_TTL,
        };
        self.access_tokens.insert(key, Entry::new(token, ttl));
    }

    async fn delete_access_token(&self, account_id: &str, resource_url: &str) {
        self.access_tokens
            .remove(&(account_id.to_string(), resource_url.to_string()));
    }

    async fn get_client_credentials(&self, issuer: &str) -> Option<ClientCredentials> {
        self.client_credentials.get(issuer).map(|e| e.clone())
    }

    async fn set_client_credentials(&self, issuer: &str, credentials: ClientCredentials) {
        self.client_credentials.insert(issuer.to_string(), credentials);
    }

    async fn delete_client_credentials(&self, issuer: &str) {
        self.client_credentials.remove(issuer);
    }

    async fn get_pkce(&self, account_id: &str, state: &str) -> Option<PkceValues> {
        let key = (account_id.to_string(), state.to_string());
        let expired = self.pkce.get(&key).map(|e| e.is_expired()).unwrap_or(false);
        if expired {
            self.pkce.remove(&key);
            return None;
        }
        self.pkce.get(&key).map(|e| e.value.clone())
    }

    async fn set_pkce(&self, account_id: &str, state: &str, values: PkceValues, ttl: Duration) {
        let ttl = ttl.min(PKCE_TTL);
        let key = (account_id.to_string(), state.to_string());
        self.pkce.insert(key, Entry::new(values, ttl));
    }

    async fn delete_pkce(&self, account_id: &str, state: &str) {
        self.pkce.remove(&(account_id.to_string(), state.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn token(resource_url: &str, expires_at: Option<i64>) -> AccessToken {
        AccessToken {
            access_token: "tok".into(),
            resource_url: resource_url.into(),
            refresh_token: None,
            expires_at,
        }
    }

    #[tokio::test]
    async fn absent_token_returns_none() {
        let db = InMemoryOAuthDb::new();
        assert!(db.get_access_token("acct", "https://example.com/mcp").await.is_none());
    }

    #[tokio::test]
    async fn expired_token_returns_none_and_is_deleted() {
        let db = InMemoryOAuthDb::new();
        let past = UnixTimestamp::now().as_secs() - 10;
        db.set_access_token("acct", token("https://example.com/mcp", Some(past))).await;
        assert!(db.get_access_token("acct", "https://example.com/mcp").await.is_none());
        // Deleted: a manual re-insert-free lookup still returns None, not stale data.
        assert!(db.get_access_token("acct", "https://example.com/mcp").await.is_none());
    }

    #[tokio::test]
    async fn valid_token_round_trips() {
        let db = InMemoryOAuthDb::new();
        let future = UnixTimestamp::now().as_secs() + 3600;
        db.set_access_token("acct", token("https://example.com/mcp", Some(future))).await;
        let fetched = db.get_access_token("acct", "https://example.com/mcp").await.unwrap();
        assert_eq!(fetched.access_token, "tok");
    }

    #[tokio::test]
    async fn pkce_is_single_use_via_explicit_delete() {
        let db = InMemoryOAuthDb::new();
        let values = PkceValues {
            code_verifier: "verifier".into(),
            code_challenge: "challenge".into(),
            resource_url: Url::parse("https://example.com/mcp").unwrap(),
            authorization_url: Url::parse("https://auth.atxp.ai/authorize").unwrap(),
        };
        db.set_pkce("acct", "state123", values, PKCE_TTL).await;
        assert!(db.get_pkce("acct", "state123").await.is_some());
        db.delete_pkce("acct", "state123").await;
        assert!(db.get_pkce("acct", "state123").await.is_none());
    }
}
