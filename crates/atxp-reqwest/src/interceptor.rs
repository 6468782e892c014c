//! The `Interceptor` state machine (spec §4.1): `Dispatch` → `InspectBody` →
//! `NeedsAuth` / `NeedsPayment` → `Retry` → `Return` / `Fail`.
//!
//! Implemented as a [`reqwest_middleware::Middleware`], the same composition
//! point the reference payment-rail client's `X402Client` occupies, so it
//! layers with retry/logging middleware the same way.

use crate::error::InterceptError;
use async_trait::async_trait;
use atxp_mcp::{classify_body, McpClassification, PaymentSignal};
use atxp_oauth::OAuthClient;
use atxp_payment::{PaymentPipeline, PaymentPipelineError, PipelineOutcome};
use http::{Extensions, HeaderMap, StatusCode};
use reqwest::{Request, Response};
use reqwest_middleware as rqm;
use std::sync::Arc;
use url::Url;

pub type AuthorizeObserver = dyn Fn(&Url) + Send + Sync;
pub type AuthorizeFailureObserver = dyn Fn(&InterceptError) + Send + Sync;
pub type PaymentFailureObserver = dyn Fn(&InterceptError) + Send + Sync;

/// Retries an MCP request across OAuth challenges and ATXP payment-required
/// signals, presenting a single remediated retry to the caller.
pub struct Interceptor {
    account_id: String,
    oauth: OAuthClient,
    payment_pipeline: PaymentPipeline<'static>,
    on_authorize: Option<Arc<AuthorizeObserver>>,
    on_authorize_failure: Option<Arc<AuthorizeFailureObserver>>,
    on_payment_failure: Option<Arc<PaymentFailureObserver>>,
}

/// Outcome of one `Dispatch` transition: either a plain response or a typed,
/// recoverable 401 naming the resource-server URL to re-authorize against.
enum DispatchOutcome {
    Responded(Response),
    NeedsAuth(Url),
}

impl Interceptor {
    pub fn new(account_id: impl Into<String>, oauth: OAuthClient, payment_pipeline: PaymentPipeline<'static>) -> Self {
        Interceptor {
            account_id: account_id.into(),
            oauth,
            payment_pipeline,
            on_authorize: None,
            on_authorize_failure: None,
            on_payment_failure: None,
        }
    }

    pub fn on_authorize(mut self, observer: impl Fn(&Url) + Send + Sync + 'static) -> Self {
        self.on_authorize = Some(Arc::new(observer));
        self
    }

    pub fn on_authorize_failure(mut self, observer: impl Fn(&InterceptError) + Send + Sync + 'static) -> Self {
        self.on_authorize_failure = Some(Arc::new(observer));
        self
    }

    pub fn on_payment_failure(mut self, observer: impl Fn(&InterceptError) + Send + Sync + 'static) -> Self {
        self.on_payment_failure = Some(Arc::new(observer));
        self
    }

    fn report_authorize(&self, resource_url: &Url) {
        if let Some(observer) = &self.on_authorize {
            observer(resource_url);
        }
    }

    fn report_authorize_failure(&self, error: &InterceptError) {
        #[cfg(feature = "telemetry")]
        tracing::warn!(%error, "authorization failed");
        if let Some(observer) = &self.on_authorize_failure {
            observer(error);
        }
    }

    fn report_payment_failure(&self, error: &InterceptError) {
        #[cfg(feature = "telemetry")]
        tracing::warn!(%error, "payment failed");
        if let Some(observer) = &self.on_payment_failure {
            observer(error);
        }
    }

    /// `Dispatch`: attach a bearer token if one is stored, run the request
    /// through the rest of the middleware chain, and surface a 401 as a
    /// recoverable challenge rather than a plain response.
    async fn dispatch(
        &self,
        mut request: Request,
        extensions: &mut Extensions,
        next: rqm::Next<'_>,
    ) -> rqm::Result<DispatchOutcome> {
        let resource_url = Url::parse(request.url().as_str()).expect("reqwest::Url reparses as url::Url");
        self.oauth.attach_bearer_token(&self.account_id, &resource_url, &mut request).await;
        let response = next.run(request, extensions).await?;
        if let Some(challenge) = self.oauth.authentication_required_from_response(&response, &resource_url) {
            return Ok(DispatchOutcome::NeedsAuth(challenge.resource_url));
        }
        Ok(DispatchOutcome::Responded(response))
    }

    /// `NeedsAuth`: the `/authorize` call is JWT-authenticated and, per spec
    /// §4.2, returns the redirect URL directly rather than requiring an actual
    /// browser round trip, so authorize and token exchange complete in one shot.
    async fn authorize(&self, resource_url: &Url) -> Result<(), InterceptError> {
        let signer = self.payment_pipeline.primary_signer().ok_or_else(|| {
            InterceptError::OAuth(atxp_oauth::OAuthError::AuthorizeFailed {
                reason: "no payment maker configured to sign the authorize JWT".into(),
            })
        })?;
        let authorize_url = self.oauth.make_authorization_url(&self.account_id, resource_url, signer).await?;
        self.oauth.handle_callback(&self.account_id, &authorize_url).await?;
        Ok(())
    }

    /// `NeedsPayment`: run the payment pipeline against the parsed signal.
    async fn pay(&self, signal: &PaymentSignal) -> Result<PipelineOutcome, InterceptError> {
        let url = Url::parse(&signal.url).map_err(|e| {
            InterceptError::Payment(PaymentPipelineError::InvalidRecord {
                reason: format!("malformed payment-request URL {}: {e}", signal.url),
            })
        })?;
        Ok(self.payment_pipeline.run(&self.account_id, &url, &signal.id, None).await?)
    }

    fn clone_template(template: &Option<Request>) -> Result<Request, InterceptError> {
        template.as_ref().and_then(Request::try_clone).ok_or(InterceptError::RequestNotCloneable)
    }
}

async fn buffer_response(response: Response) -> Result<(StatusCode, HeaderMap, Vec<u8>), reqwest::Error> {
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?;
    Ok((status, headers, body.to_vec()))
}

/// Reconstructs a [`Response`] from buffered parts, preserving status, headers
/// (and with them any `Content-Type: text/event-stream` framing) and the exact
/// original body bytes (spec §9: "preserve SSE framing").
fn rebuild_response(status: StatusCode, headers: HeaderMap, body: Vec<u8>) -> Response {
    let mut http_response = http::Response::builder()
        .status(status)
        .body(reqwest::Body::from(body))
        .expect("status-only response builder never fails");
    *http_response.headers_mut() = headers;
    Response::from(http_response)
}

#[async_trait]
impl rqm::Middleware for Interceptor {
    #[cfg_attr(feature = "telemetry", tracing::instrument(name = "atxp.intercept", skip(self, req, extensions, next), fields(method = %req.method(), url = %req.url())))]
    async fn handle(&self, req: Request, extensions: &mut Extensions, next: rqm::Next<'_>) -> rqm::Result<Response> {
        let template = req.try_clone();

        // `retried` tracks whether the single permitted retry has been spent.
        // `auth_chained` marks the one exception spec §4.1 carves out: a
        // payment-required response immediately following a successful
        // authorization does not spend a second retry.
        let mut retried = false;
        let mut auth_chained = false;
        let mut current_request = req;

        loop {
            let dispatch_outcome = self.dispatch(current_request, extensions, next.clone()).await?;

            let response = match dispatch_outcome {
                DispatchOutcome::Responded(response) => response,
                DispatchOutcome::NeedsAuth(challenge_resource) => {
                    if retried {
                        let error = InterceptError::OAuth(atxp_oauth::OAuthError::AuthorizeFailed {
                            reason: "resource re-challenged after the single permitted retry".into(),
                        });
                        self.report_authorize_failure(&error);
                        return Err(error.into());
                    }
                    if let Err(error) = self.authorize(&challenge_resource).await {
                        self.report_authorize_failure(&error);
                        return Err(error.into());
                    }
                    self.report_authorize(&challenge_resource);
                    retried = true;
                    auth_chained = true;
                    current_request = Self::clone_template(&template).map_err(rqm::Error::from)?;
                    continue;
                }
            };

            let (status, headers, body) = buffer_response(response)
                .await
                .map_err(|e| InterceptError::ResponseReconstruction(e.to_string()))?;
            let body_text = String::from_utf8_lossy(&body);

            match classify_body(&body_text) {
                McpClassification::Ok => return Ok(rebuild_response(status, headers, body)),
                McpClassification::MultiplePaymentRequired(signals) => {
                    return Err(InterceptError::MultiplePaymentRequired(signals).into());
                }
                McpClassification::PaymentRequired(signal) => {
                    if retried && !auth_chained {
                        return Ok(rebuild_response(status, headers, body));
                    }
                    let retry_already_spent = retried;
                    match self.pay(&signal).await {
                        Ok(PipelineOutcome::Settled) => {
                            if !retry_already_spent {
                                retried = true;
                            }
                            auth_chained = false;
                            current_request = Self::clone_template(&template).map_err(rqm::Error::from)?;
                            continue;
                        }
                        Ok(PipelineOutcome::Declined) | Ok(PipelineOutcome::NoCompatibleMaker) => {
                            return Ok(rebuild_response(status, headers, body));
                        }
                        Err(error) => {
                            let error = InterceptError::from(error);
                            self.report_payment_failure(&error);
                            return Err(error.into());
                        }
                    }
                }
            }
        }
    }
}
