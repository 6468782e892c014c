//! Dynamic client registration (RFC 7591), single-flighted per issuer (spec §4.2:
//! "an in-memory per-issuer lock serializes concurrent registrations for the same
//! issuer within a process; concurrent callers await the same promise").
//!
//! Grounded in the per-key async-mutex cache idiom the payment-rail stack uses for
//! provider lookups: a `DashMap<Url, Arc<Mutex<()>>>` handed out per key, so two
//! registrations for different issuers never block each other.

use crate::db::OAuthDb;
use crate::discovery::AuthorizationServer;
use crate::error::OAuthError;
use atxp_types::ClientCredentials;
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use url::Url;

#[derive(Debug, Serialize)]
struct RegistrationRequest<'a> {
    redirect_uris: &'a [String],
    grant_types: &'a [&'static str],
    token_endpoint_auth_method: &'static str,
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    client_id: String,
    #[serde(default)]
    client_secret: String,
}

const GRANT_TYPES: &[&str] = &["authorization_code", "client_credentials"];

/// Per-issuer single-flight lock for dynamic client registration.
#[derive(Default)]
pub struct RegistrationLocks {
    locks: DashMap<Url, Arc<Mutex<()>>>,
}

impl RegistrationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, issuer: &Url) -> Arc<Mutex<()>> {
        self.locks.entry(issuer.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Returns existing credentials for `issuer` or registers a new client, holding
    /// the per-issuer lock across the check-then-register window so concurrent
    /// callers converge on a single registration call.
    #[cfg_attr(feature = "telemetry", tracing::instrument(skip(self, http, db), fields(issuer = %server.issuer)))]
    pub async fn ensure_credentials(
        &self,
        http: &Client,
        db: &dyn OAuthDb,
        server: &AuthorizationServer,
        redirect_uri: &Url,
    ) -> Result<ClientCredentials, OAuthError> {
        let lock = self.lock_for(&server.issuer);
        let _guard = lock.lock().await;

        if let Some(existing) = db.get_client_credentials(server.issuer.as_str()).await {
            return Ok(existing);
        }

        let Some(registration_endpoint) = &server.registration_endpoint else {
            return Err(OAuthError::RegistrationFailed {
                issuer: server.issuer.clone(),
                reason: "authorization server did not advertise a registration_endpoint".into(),
            });
        };

        let redirect_uris = [redirect_uri.to_string()];
        let body = RegistrationRequest {
            redirect_uris: &redirect_uris,
            grant_types: GRANT_TYPES,
            token_endpoint_auth_method: "client_secret_basic",
        };

        #[cfg(feature = "telemetry")]
        tracing::info!("registering new OAuth client");
        let response = http
            .post(registration_endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(OAuthError::Http)?;
        if !response.status().is_success() {
            return Err(OAuthError::RegistrationFailed {
                issuer: server.issuer.clone(),
                reason: format!("registration endpoint returned {}", response.status()),
            });
        }
        let registered: RegistrationResponse = response.json().await.map_err(OAuthError::Http)?;

        let credentials = ClientCredentials {
            client_id: registered.client_id,
            client_secret: registered.client_secret,
            redirect_uri: redirect_uri.clone(),
        };
        db.set_client_credentials(server.issuer.as_str(), credentials.clone()).await;
        Ok(credentials)
    }

    /// Forces a fresh registration, discarding any stored credentials (spec §8:
    /// "exactly one re-registration is attempted" after a 401/403 on introspection).
    pub async fn reregister(
        &self,
        http: &Client,
        db: &dyn OAuthDb,
        server: &AuthorizationServer,
        redirect_uri: &Url,
    ) -> Result<ClientCredentials, OAuthError> {
        {
            let lock = self.lock_for(&server.issuer);
            let _guard = lock.lock().await;
            db.delete_client_credentials(server.issuer.as_str()).await;
        }
        self.ensure_credentials(http, db, server, redirect_uri).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryOAuthDb;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn server_with(registration_endpoint: Url) -> AuthorizationServer {
        AuthorizationServer {
            issuer: Url::parse("https://auth.atxp.ai").unwrap(),
            authorization_endpoint: Url::parse("https://auth.atxp.ai/authorize").unwrap(),
            token_endpoint: Url::parse("https://auth.atxp.ai/token").unwrap(),
            registration_endpoint: Some(registration_endpoint),
        }
    }

    #[tokio::test]
    async fn registers_once_and_caches_credentials() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/register"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "client_id": "client-1",
                "client_secret": "secret-1"
            })))
            .expect(1)
            .mount(&mock)
            .await;

        let http = Client::new();
        let db = InMemoryOAuthDb::new();
        let locks = RegistrationLocks::new();
        let server = server_with(Url::parse(&format!("{}/register", mock.uri())).unwrap());
        let redirect_uri = Url::parse("https://client.example/callback").unwrap();

        let first = locks.ensure_credentials(&http, &db, &server, &redirect_uri).await.unwrap();
        let second = locks.ensure_credentials(&http, &db, &server, &redirect_uri).await.unwrap();
        assert_eq!(first.client_id, "client-1");
        assert_eq!(second.client_id, "client-1");
    }

    #[tokio::test]
    async fn missing_registration_endpoint_is_a_hard_error() {
        let http = Client::new();
        let db = InMemoryOAuthDb::new();
        let locks = RegistrationLocks::new();
        let server = AuthorizationServer {
            issuer: Url::parse("https://auth.atxp.ai").unwrap(),
            authorization_endpoint: Url::parse("https://auth.atxp.ai/authorize").unwrap(),
            token_endpoint: Url::parse("https://auth.atxp.ai/token").unwrap(),
            registration_endpoint: None,
        };
        let redirect_uri = Url::parse("https://client.example/callback").unwrap();
        let error = locks.ensure_credentials(&http, &db, &server, &redirect_uri).await.unwrap_err();
        assert!(matches!(error, OAuthError::RegistrationFailed { .. }));
    }
}
