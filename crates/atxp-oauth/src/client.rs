//! The OAuthClient: discovery, registration, PKCE, and the `redirect=false`
//! authorize variant tied together into the operations spec §4.2 names
//! (`fetch`, `makeAuthorizationUrl`, `handleCallback`).

use crate::db::{OAuthDb, PKCE_TTL};
use crate::discovery::{self, AuthorizationServer};
use crate::error::OAuthError;
use crate::pkce;
use crate::registration::RegistrationLocks;
use atxp_types::jwt::{self, JwtClaims, JwtSigner};
use atxp_types::{AccessToken, AtxpConfig, PkceValues, UnixTimestamp};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

pub struct OAuthClientConfig {
    pub strict_discovery: bool,
    pub allowed_issuers: Vec<String>,
    pub redirect_uri: Url,
}

impl From<&AtxpConfig> for OAuthClientConfig {
    fn from(config: &AtxpConfig) -> Self {
        OAuthClientConfig {
            strict_discovery: config.strict_discovery,
            allowed_issuers: config.allowed_issuer_strings(),
            redirect_uri: config.redirect_uri().clone(),
        }
    }
}

/// Resolves the authorization server and JWT algorithm for `signer`'s key type,
/// then executes the discovery + registration + authorize + token-exchange flow.
pub struct OAuthClient {
    http: Client,
    db: Box<dyn OAuthDb>,
    registrations: RegistrationLocks,
    config: OAuthClientConfig,
}

/// The error returned by [`OAuthClient::fetch`] when the resource answers 401.
/// Carries the resource-server URL the caller should hand to [`OAuthClient::make_authorization_url`].
#[derive(Debug, Clone)]
pub struct AuthenticationRequired {
    pub resource_url: Url,
}

fn resource_url_from_www_authenticate(header: &str, fallback: &Url) -> Url {
    if let Some(start) = header.find("resource_metadata=\"") {
        let rest = &header[start + "resource_metadata=\"".len()..];
        if let Some(end) = rest.find('"') {
            let metadata_url = &rest[..end];
            // `resource_metadata` names the PRM document; its path suffix after
            // `/.well-known/oauth-protected-resource` is the resource path.
            if let Ok(parsed) = Url::parse(metadata_url) {
                const MARKER: &str = "/.well-known/oauth-protected-resource";
                if let Some(idx) = parsed.path().find(MARKER) {
                    let resource_path = &parsed.path()[idx + MARKER.len()..];
                    let mut resource = parsed.clone();
                    resource.set_path(resource_path);
                    return resource;
                }
            }
        }
    }
    fallback.clone()
}

impl OAuthClient {
    pub fn new(http: Client, db: Box<dyn OAuthDb>, config: OAuthClientConfig) -> Self {
        OAuthClient {
            http,
            db,
            registrations: RegistrationLocks::new(),
            config,
        }
    }

    /// Attaches a bearer token if one is stored for `(account_id, resource_url)`,
    /// performs the request, and on 401 returns a typed, recoverable error rather
    /// than the raw response.
    #[cfg_attr(feature = "telemetry", tracing::instrument(skip(self), fields(%resource_url)))]
    pub async fn fetch(
        &self,
        account_id: &str,
        resource_url: &Url,
        build: impl FnOnce(reqwest::RequestBuilder) -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, OAuthError> {
        let mut request = self.http.get(resource_url.clone());
        if let Some(token) = self.db.get_access_token(account_id, resource_url.as_str()).await {
            request = request.bearer_auth(token.access_token);
        }
        request = build(request);
        let response = request.send().await.map_err(OAuthError::Http)?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let www_authenticate = response
                .headers()
                .get(reqwest::header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            let target = resource_url_from_www_authenticate(www_authenticate, resource_url);
            return Err(OAuthError::AuthenticationRequired {
                resource_url: target.to_string(),
            });
        }
        Ok(response)
    }

    /// Attaches a bearer token to an already-built request if one is stored for
    /// `(account_id, resource_url)`. Used by callers (the interceptor) that
    /// dispatch arbitrary requests themselves rather than through [`fetch`](Self::fetch).
    pub async fn attach_bearer_token(&self, account_id: &str, resource_url: &Url, request: &mut reqwest::Request) {
        if let Some(token) = self.db.get_access_token(account_id, resource_url.as_str()).await {
            if let Ok(header_value) = format!("Bearer {}", token.access_token).parse() {
                request.headers_mut().insert(reqwest::header::AUTHORIZATION, header_value);
            }
        }
    }

    /// Inspects a response a caller dispatched itself and, if it is a 401,
    /// returns the typed recoverable error naming the resource-server URL.
    pub fn authentication_required_from_response(
        &self,
        response: &reqwest::Response,
        resource_url: &Url,
    ) -> Option<AuthenticationRequired> {
        if response.status() != StatusCode::UNAUTHORIZED {
            return None;
        }
        let www_authenticate = response
            .headers()
            .get(reqwest::header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        Some(AuthenticationRequired {
            resource_url: resource_url_from_www_authenticate(www_authenticate, resource_url),
        })
    }

    /// Runs discovery, ensures client credentials exist, generates a PKCE pair,
    /// and returns the `/authorize` URL to redirect the end user to.
    #[cfg_attr(feature = "telemetry", tracing::instrument(skip(self, signer), fields(%resource_url)))]
    pub async fn make_authorization_url(
        &self,
        account_id: &str,
        resource_url: &Url,
        signer: &dyn JwtSigner,
    ) -> Result<Url, OAuthError> {
        let server = discovery::discover(
            &self.http,
            resource_url,
            self.config.strict_discovery,
            &self.config.allowed_issuers,
        )
        .await?;

        let credentials = self
            .registrations
            .ensure_credentials(&self.http, self.db.as_ref(), &server, &self.config.redirect_uri)
            .await?;

        let pair = pkce::generate();
        let state = pkce::generate_state();
        self.db
            .set_pkce(
                account_id,
                &state,
                PkceValues {
                    code_verifier: pair.code_verifier,
                    code_challenge: pair.code_challenge.clone(),
                    resource_url: resource_url.clone(),
                    authorization_url: server.authorization_endpoint.clone(),
                },
                PKCE_TTL,
            )
            .await;

        match self
            .authorize_redirect_url(&server, &credentials.client_id, &state, &pair.code_challenge, resource_url, signer)
            .await
        {
            Err(OAuthError::StaleClientRegistration { .. }) => {
                // Spec §4.2/§8: exactly one re-registration is attempted after the
                // authorization server rejects a previously registered client_id.
                let fresh = self
                    .registrations
                    .reregister(&self.http, self.db.as_ref(), &server, &self.config.redirect_uri)
                    .await?;
                self.authorize_redirect_url(&server, &fresh.client_id, &state, &pair.code_challenge, resource_url, signer)
                    .await
            }
            other => other,
        }
    }

    /// Performs the non-standard `redirect=false` `/authorize` call authenticated
    /// by a JWT, accepting either the 3xx+Location or 2xx+body variant.
    async fn authorize_redirect_url(
        &self,
        server: &AuthorizationServer,
        client_id: &str,
        state: &str,
        code_challenge: &str,
        resource_url: &Url,
        signer: &dyn JwtSigner,
    ) -> Result<Url, OAuthError> {
        let now = UnixTimestamp::now().as_secs();
        let claims = JwtClaims::new(signer.account_id(), now, jwt::MAX_EXPIRY_SECONDS)
            .with_code_challenge(Some(code_challenge.to_string()));
        let jwt_token = signer
            .sign_jwt(claims)
            .await
            .map_err(|e| OAuthError::AuthorizeFailed { reason: e.to_string() })?;

        let mut url = server.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("code_challenge_method", "S256")
            .append_pair("code_challenge", code_challenge)
            .append_pair("client_id", client_id)
            .append_pair("state", state)
            .append_pair("redirect_uri", self.config.redirect_uri.as_str())
            .append_pair("resource", resource_url.as_str())
            .append_pair("redirect", "false");

        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(OAuthError::Http)?;
        let response = client
            .get(url)
            .bearer_auth(jwt_token)
            .send()
            .await
            .map_err(OAuthError::Http)?;

        if response.status().is_redirection() {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| OAuthError::AuthorizeFailed {
                    reason: "redirect response carried no Location header".into(),
                })?;
            return Url::parse(location).map_err(|e| OAuthError::AuthorizeFailed {
                reason: format!("invalid Location header: {e}"),
            });
        }
        if response.status().is_success() {
            #[derive(Deserialize)]
            struct RedirectBody {
                redirect: String,
            }
            let body: RedirectBody = response.json().await.map_err(OAuthError::Http)?;
            return Url::parse(&body.redirect).map_err(|e| OAuthError::AuthorizeFailed {
                reason: format!("invalid redirect URL in body: {e}"),
            });
        }
        if response.status() == StatusCode::UNAUTHORIZED || response.status() == StatusCode::FORBIDDEN {
            return Err(OAuthError::StaleClientRegistration { status: response.status().as_u16() });
        }
        Err(OAuthError::AuthorizeFailed {
            reason: format!("authorize endpoint returned {}", response.status()),
        })
    }

    /// Parses `state`/`code` from the callback URL, loads and consumes the
    /// matching PKCE record, exchanges the code for an access token, and
    /// persists it under `(account_id, resource_url)`.
    #[cfg_attr(feature = "telemetry", tracing::instrument(skip(self, callback_url), fields(account_id)))]
    pub async fn handle_callback(
        &self,
        account_id: &str,
        callback_url: &Url,
    ) -> Result<AccessToken, OAuthError> {
        let pairs: std::collections::HashMap<_, _> = callback_url.query_pairs().into_owned().collect();
        let state = pairs
            .get("state")
            .ok_or_else(|| OAuthError::TokenExchangeFailed { reason: "callback URL missing state".into() })?;
        let code = pairs
            .get("code")
            .ok_or_else(|| OAuthError::TokenExchangeFailed { reason: "callback URL missing code".into() })?;

        let pkce_record = self
            .db
            .get_pkce(account_id, state)
            .await
            .ok_or_else(|| OAuthError::PkceNotFound { state: state.clone() })?;
        self.db.delete_pkce(account_id, state).await;

        let server = discovery::discover(
            &self.http,
            &pkce_record.resource_url,
            self.config.strict_discovery,
            &self.config.allowed_issuers,
        )
        .await?;
        let credentials = self
            .db
            .get_client_credentials(server.issuer.as_str())
            .await
            .ok_or_else(|| OAuthError::TokenExchangeFailed {
                reason: "no registered client credentials for this issuer".into(),
            })?;

        #[derive(serde::Serialize)]
        struct TokenRequest<'a> {
            grant_type: &'static str,
            code: &'a str,
            redirect_uri: &'a str,
            client_id: &'a str,
            code_verifier: &'a str,
        }
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            #[serde(default)]
            refresh_token: Option<String>,
            #[serde(default)]
            expires_in: Option<i64>,
        }

        let response = self
            .http
            .post(server.token_endpoint.clone())
            .form(&TokenRequest {
                grant_type: "authorization_code",
                code,
                redirect_uri: self.config.redirect_uri.as_str(),
                client_id: &credentials.client_id,
                code_verifier: &pkce_record.code_verifier,
            })
            .send()
            .await
            .map_err(OAuthError::Http)?;
        if !response.status().is_success() {
            return Err(OAuthError::TokenExchangeFailed {
                reason: format!("token endpoint returned {}", response.status()),
            });
        }
        let token_response: TokenResponse = response.json().await.map_err(OAuthError::Http)?;

        let token = AccessToken {
            access_token: token_response.access_token,
            resource_url: pkce_record.resource_url.to_string(),
            refresh_token: token_response.refresh_token,
            expires_at: token_response.expires_in.map(|secs| UnixTimestamp::now().as_secs() + secs),
        };
        self.db.set_access_token(account_id, token.clone()).await;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryOAuthDb;
    use async_trait::async_trait;
    use atxp_types::jwt::JwtAlgorithm;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FakeSigner;

    #[async_trait]
    impl JwtSigner for FakeSigner {
        fn account_id(&self) -> String {
            "bdj".into()
        }

        async fn sign_jwt(
            &self,
            claims: JwtClaims,
        ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
            let input = jwt::signing_input(JwtAlgorithm::EdDSA, &claims)?;
            Ok(jwt::assemble(input, b"fake-signature"))
        }
    }

    #[tokio::test]
    async fn authorization_flow_resolves_redirect_url_from_3xx_location() {
        let server = MockServer::start().await;
        let issuer = server.uri();

        Mock::given(method("GET"))
            .and(path("/.well-known/oauth-protected-resource/mcp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "authorization_servers": [issuer]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/.well-known/oauth-authorization-server"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": issuer,
                "authorization_endpoint": format!("{issuer}/authorize"),
                "token_endpoint": format!("{issuer}/token"),
                "registration_endpoint": format!("{issuer}/register"),
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/register"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "client_id": "client-1",
                "client_secret": "secret-1"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/authorize"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("Location", "https://atxp.ai?state=abc&code=testCode"),
            )
            .mount(&server)
            .await;

        let client = OAuthClient::new(
            Client::new(),
            Box::new(InMemoryOAuthDb::new()),
            OAuthClientConfig {
                strict_discovery: false,
                allowed_issuers: vec![issuer.clone()],
                redirect_uri: Url::parse("https://client.example/callback").unwrap(),
            },
        );
        let resource_url = Url::parse(&format!("{issuer}/mcp")).unwrap();
        let url = client.make_authorization_url("bdj", &resource_url, &FakeSigner).await.unwrap();
        assert_eq!(url.as_str(), "https://atxp.ai/?state=abc&code=testCode");
    }

    #[tokio::test]
    async fn stale_client_triggers_exactly_one_reregistration_then_succeeds() {
        let server = MockServer::start().await;
        let issuer = server.uri();

        Mock::given(method("GET"))
            .and(path("/.well-known/oauth-protected-resource/mcp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "authorization_servers": [issuer]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/.well-known/oauth-authorization-server"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": issuer,
                "authorization_endpoint": format!("{issuer}/authorize"),
                "token_endpoint": format!("{issuer}/token"),
                "registration_endpoint": format!("{issuer}/register"),
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/register"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "client_id": "client-1",
                "client_secret": "secret-1"
            })))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/register"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "client_id": "client-2",
                "client_secret": "secret-2"
            })))
            .expect(1)
            .mount(&server)
            .await;
        // Rejects whichever client_id is attached to the first call, then accepts
        // any client_id on the second: exercises "exactly one" re-registration.
        Mock::given(method("GET"))
            .and(path("/authorize"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/authorize"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("Location", "https://atxp.ai?state=abc&code=testCode"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = OAuthClient::new(
            Client::new(),
            Box::new(InMemoryOAuthDb::new()),
            OAuthClientConfig {
                strict_discovery: false,
                allowed_issuers: vec![issuer.clone()],
                redirect_uri: Url::parse("https://client.example/callback").unwrap(),
            },
        );
        let resource_url = Url::parse(&format!("{issuer}/mcp")).unwrap();
        let url = client.make_authorization_url("bdj", &resource_url, &FakeSigner).await.unwrap();
        assert_eq!(url.as_str(), "https://atxp.ai/?state=abc&code=testCode");
    }

    #[test]
    fn www_authenticate_resource_metadata_is_parsed_into_resource_url() {
        let header = r#"Bearer resource_metadata="https://example.com/.well-known/oauth-protected-resource/mcp""#;
        let fallback = Url::parse("https://example.com/mcp").unwrap();
        let resolved = resource_url_from_www_authenticate(header, &fallback);
        assert_eq!(resolved.as_str(), "https://example.com/mcp");
    }
}
