//! Pure, transport-agnostic parsing of MCP payment-required signals (spec §4.3).
//!
//! [`classify`] decides between SSE and plain JSON framing and returns an ordered
//! list of `{url, id}` payment-request signals. It never raises: malformed input
//! anywhere produces an empty list, which the caller (the ATXP interceptor)
//! treats as "not a payment-required condition".

mod classify;
mod sse;

pub use classify::{classify, PaymentSignal, ELICITATION_REQUIRED_CODE, PAYMENT_REQUIRED_CODE};
pub use sse::{extract_data_messages, is_sse, to_sse_stream};

/// The interceptor's closed set of outcomes for a response body, built on top of
/// the pure [`classify`] function and the transport-level 401 check (performed by
/// `atxp-oauth`, not here, since that requires the HTTP status code).
#[derive(Debug, Clone, PartialEq)]
pub enum McpClassification {
    Ok,
    PaymentRequired(PaymentSignal),
    MultiplePaymentRequired(Vec<PaymentSignal>),
}

/// Classifies a response body into the interceptor's closed outcome set.
pub fn classify_body(body: &str) -> McpClassification {
    let signals = classify(body);
    match signals.len() {
        0 => McpClassification::Ok,
        1 => McpClassification::PaymentRequired(signals.into_iter().next().unwrap()),
        _ => McpClassification::MultiplePaymentRequired(signals),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_signal_classifies_as_payment_required() {
        let body = r#"{"error":{"code":-32402,"message":"Payment via ATXP is required: https://auth.atxp.ai/payment-request/foo"}}"#;
        assert!(matches!(classify_body(body), McpClassification::PaymentRequired(_)));
    }

    #[test]
    fn two_signals_classify_as_multiple() {
        let body = r#"{"error":{"code":-32402,"message":"Payment via ATXP is required: https://auth.atxp.ai/payment-request/foo and https://auth.atxp.ai/payment-request/bar"}}"#;
        assert!(matches!(classify_body(body), McpClassification::MultiplePaymentRequired(_)));
    }

    #[test]
    fn ok_body_classifies_as_ok() {
        assert_eq!(classify_body(r#"{"content":[]}"#), McpClassification::Ok);
    }
}
