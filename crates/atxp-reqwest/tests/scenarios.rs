//! End-to-end scenarios from spec §8, run against wiremock-backed resource,
//! authorization, and payment-request servers.

use async_trait::async_trait;
use atxp_oauth::{InMemoryOAuthDb, OAuthClient, OAuthClientConfig};
use atxp_payment::{IdentityMapper, PaymentMaker, PaymentMakerError, PaymentPipeline, SourceAddressQuery};
use atxp_reqwest::{Interceptor, InterceptorExt};
use atxp_types::jwt::{self, JwtAlgorithm, JwtClaims, JwtSigner};
use atxp_types::{Network, PaymentDestination, PaymentObject, SourceAddress};
use reqwest::Client;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Echoes the real `state` query parameter from the incoming `/authorize`
/// request back into the redirect `Location`, since the library generates a
/// random state per call and a static mock response can't predict it.
struct EchoStateRedirect;

impl wiremock::Respond for EchoStateRedirect {
    fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
        let state = request
            .url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();
        ResponseTemplate::new(301).insert_header("Location", format!("https://atxp.ai?state={state}&code=testCode"))
    }
}

/// A Solana-shaped fake maker: settles any destination on `network` with a
/// fixed transaction id, never rejecting on balance.
struct FakeMaker {
    network: Network,
    payments: Arc<AtomicUsize>,
}

#[async_trait]
impl JwtSigner for FakeMaker {
    fn account_id(&self) -> String {
        "SolRecvTest".into()
    }

    async fn sign_jwt(&self, claims: JwtClaims) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let input = jwt::signing_input(JwtAlgorithm::EdDSA, &claims)?;
        Ok(jwt::assemble(input, b"fake-signature"))
    }
}

#[async_trait]
impl PaymentMaker for FakeMaker {
    async fn get_source_addresses(&self, _query: &SourceAddressQuery) -> Result<Vec<SourceAddress>, PaymentMakerError> {
        Ok(vec![SourceAddress {
            network: self.network,
            address: "source-addr".into(),
        }])
    }

    async fn make_payment(
        &self,
        destinations: &[PaymentDestination],
        _memo: Option<&str>,
        _payment_request_id: Option<&str>,
    ) -> Result<Option<PaymentObject>, PaymentMakerError> {
        let Some(destination) = destinations.iter().find(|d| d.network == self.network) else {
            return Ok(None);
        };
        self.payments.fetch_add(1, Ordering::SeqCst);
        Ok(Some(PaymentObject {
            network: destination.network,
            address: destination.address.clone(),
            amount: destination.amount,
            currency: destination.currency.clone(),
            transaction_id: "testPaymentId".into(),
        }))
    }
}

fn oauth_client(db: InMemoryOAuthDb, allowed_issuers: Vec<String>) -> OAuthClient {
    OAuthClient::new(
        Client::new(),
        Box::new(db),
        OAuthClientConfig {
            strict_discovery: false,
            allowed_issuers,
            redirect_uri: Url::parse("https://client.example/callback").unwrap(),
        },
    )
}

#[tokio::test]
async fn happy_path_no_auth_no_payment() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": [{"type": "text", "text": "hello world"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let oauth = oauth_client(InMemoryOAuthDb::new(), vec![server.uri()]);
    let pipeline = PaymentPipeline::new(Client::new(), vec![], vec![Box::new(IdentityMapper)], |_| true);
    let interceptor = Interceptor::new("bdj", oauth, pipeline);
    let client = Client::new().with_atxp(interceptor).build();

    let response = client.post(format!("{}/mcp", server.uri())).json(&serde_json::json!({})).send().await.unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["content"][0]["text"], "hello world");
}

#[tokio::test]
async fn payment_required_then_settled_then_retried() {
    let server = MockServer::start().await;
    let payment_request_url = format!("{}/payment-request/foo", server.uri());

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "error": {
                "code": -32402,
                "message": format!("Payment via ATXP is required: {payment_request_url}")
            }
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": [{"type": "text", "text": "hello world"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/payment-request/foo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "network": "solana",
            "address": "SolRecv",
            "amount": "0.01",
            "currency": "USDC",
            "iss": "https://auth.atxp.ai"
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/payment-request/foo"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let payments = Arc::new(AtomicUsize::new(0));
    let maker = FakeMaker { network: Network::Solana, payments: payments.clone() };
    let oauth = oauth_client(InMemoryOAuthDb::new(), vec![server.uri()]);
    let pipeline = PaymentPipeline::new(Client::new(), vec![Box::new(maker)], vec![Box::new(IdentityMapper)], |_| true);
    let interceptor = Interceptor::new("bdj", oauth, pipeline);
    let client = Client::new().with_atxp(interceptor).build();

    let response = client.post(format!("{}/mcp", server.uri())).json(&serde_json::json!({})).send().await.unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["content"][0]["text"], "hello world");
    assert_eq!(payments.load(Ordering::SeqCst), 1);

    let mcp_requests = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == "/mcp")
        .count();
    assert_eq!(mcp_requests, 2);
}

#[tokio::test]
async fn unauthorized_then_oauth_then_retried() {
    let server = MockServer::start().await;
    let issuer = server.uri();

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(
            ResponseTemplate::new(401).insert_header(
                "WWW-Authenticate",
                format!(r#"Bearer resource_metadata="{issuer}/.well-known/oauth-protected-resource/mcp""#),
            ),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": [{"type": "text", "text": "hello world"}]
        })))
        .mount(&server)
        .await;
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
        .respond_with(EchoStateRedirect)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "testAccessToken"
        })))
        .mount(&server)
        .await;

    let db = InMemoryOAuthDb::new();
    let maker = FakeMaker { network: Network::Solana, payments: Arc::new(AtomicUsize::new(0)) };
    let oauth = oauth_client(db, vec![issuer.clone()]);
    let pipeline = PaymentPipeline::new(Client::new(), vec![Box::new(maker)], vec![Box::new(IdentityMapper)], |_| true);
    let interceptor = Interceptor::new("bdj", oauth, pipeline);
    let client = Client::new().with_atxp(interceptor).build();

    let response = client.post(format!("{}/mcp", server.uri())).json(&serde_json::json!({})).send().await.unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["content"][0]["text"], "hello world");
}

#[tokio::test]
async fn denied_approval_returns_original_response_without_payment() {
    let server = MockServer::start().await;
    let payment_request_url = format!("{}/payment-request/foo", server.uri());
    let error_body = serde_json::json!({
        "error": {
            "code": -32402,
            "message": format!("Payment via ATXP is required: {payment_request_url}")
        }
    });

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(error_body.clone()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/payment-request/foo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "network": "solana",
            "address": "SolRecv",
            "amount": "0.01",
            "currency": "USDC"
        })))
        .mount(&server)
        .await;

    let payments = Arc::new(AtomicUsize::new(0));
    let maker = FakeMaker { network: Network::Solana, payments: payments.clone() };
    let oauth = oauth_client(InMemoryOAuthDb::new(), vec![server.uri()]);
    let pipeline = PaymentPipeline::new(Client::new(), vec![Box::new(maker)], vec![Box::new(IdentityMapper)], |_| false);
    let interceptor = Interceptor::new("bdj", oauth, pipeline);
    let client = Client::new().with_atxp(interceptor).build();

    let response = client.post(format!("{}/mcp", server.uri())).json(&serde_json::json!({})).send().await.unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, error_body);
    assert_eq!(payments.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn multiple_payment_requests_is_a_hard_error() {
    let server = MockServer::start().await;
    let first = format!("{}/payment-request/foo", server.uri());
    let second = format!("{}/payment-request/bar", server.uri());

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "error": {
                "code": -32402,
                "message": format!("Payment via ATXP is required: {first} and {second}")
            }
        })))
        .mount(&server)
        .await;

    let maker = FakeMaker { network: Network::Solana, payments: Arc::new(AtomicUsize::new(0)) };
    let oauth = oauth_client(InMemoryOAuthDb::new(), vec![server.uri()]);
    let pipeline = PaymentPipeline::new(Client::new(), vec![Box::new(maker)], vec![Box::new(IdentityMapper)], |_| true);
    let interceptor = Interceptor::new("bdj", oauth, pipeline);
    let client = Client::new().with_atxp(interceptor).build();

    let error = client.post(format!("{}/mcp", server.uri())).json(&serde_json::json!({})).send().await.unwrap_err();
    assert!(error.to_string().contains("distinct payment-request URLs"));
}

#[tokio::test]
async fn unknown_authorization_server_is_a_hard_error_before_registration() {
    let resource_server = MockServer::start().await;
    let rogue_as = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(
            ResponseTemplate::new(401).insert_header(
                "WWW-Authenticate",
                format!(
                    r#"Bearer resource_metadata="{}/.well-known/oauth-protected-resource/mcp""#,
                    resource_server.uri()
                ),
            ),
        )
        .mount(&resource_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-protected-resource/mcp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "authorization_servers": [rogue_as.uri()]
        })))
        .mount(&resource_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "issuer": rogue_as.uri(),
            "authorization_endpoint": format!("{}/authorize", rogue_as.uri()),
            "token_endpoint": format!("{}/token", rogue_as.uri()),
        })))
        .mount(&rogue_as)
        .await;
    // No /register mock: registration must never be attempted.

    let maker = FakeMaker { network: Network::Solana, payments: Arc::new(AtomicUsize::new(0)) };
    let oauth = oauth_client(InMemoryOAuthDb::new(), vec!["https://auth.atxp.ai".to_string()]);
    let pipeline = PaymentPipeline::new(Client::new(), vec![Box::new(maker)], vec![Box::new(IdentityMapper)], |_| true);
    let interceptor = Interceptor::new("bdj", oauth, pipeline);
    let client = Client::new().with_atxp(interceptor).build();

    let error = client.post(format!("{}/mcp", resource_server.uri())).json(&serde_json::json!({})).send().await.unwrap_err();
    assert!(error.to_string().to_lowercase().contains("allow-list") || error.to_string().contains("UnknownAuthorizationServer"));
}
