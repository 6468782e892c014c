//! Top-level error taxonomy for the interceptor (spec §7), wrapping the
//! OAuth and payment subflow errors behind one type callers can match on.

use atxp_mcp::PaymentSignal;

#[derive(Debug, thiserror::Error)]
pub enum InterceptError {
    /// The original request's body could not be cloned, so no remediation
    /// (auth or payment) can retry it. Streaming bodies are never retryable.
    #[error("request body is not cloneable and cannot be retried after remediation")]
    RequestNotCloneable,

    /// More than one payment-request URL was found in a single response
    /// (spec §4.1: "explicit, non-retryable").
    #[error("{} distinct payment-request URLs found in one response; refusing to pay any", .0.len())]
    MultiplePaymentRequired(Vec<PaymentSignal>),

    #[error("failed to reconstruct the buffered response for the caller: {0}")]
    ResponseReconstruction(String),

    #[error(transparent)]
    OAuth(#[from] atxp_oauth::OAuthError),

    #[error(transparent)]
    Payment(#[from] atxp_payment::PaymentPipelineError),
}

impl From<InterceptError> for reqwest_middleware::Error {
    fn from(error: InterceptError) -> Self {
        reqwest_middleware::Error::Middleware(error.into())
    }
}
