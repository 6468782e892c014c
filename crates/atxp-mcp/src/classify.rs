//! JSON-RPC payment-required classification (spec §4.3).

use crate::sse;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// JSON-RPC error code signaling "payment required".
pub const PAYMENT_REQUIRED_CODE: i64 = -32402;
/// JSON-RPC error code signaling "elicitation required".
pub const ELICITATION_REQUIRED_CODE: i64 = -32604;

/// Substring tool-result text must contain, alongside the numeric code, before the
/// payment-request regex is trusted against free-form text (spec §4.3 rule 3).
const PAYMENT_PREAMBLE: &str = "Payment via ATXP is required";

static PAYMENT_REQUEST_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^ ]+/payment-request/[^ ]+").unwrap());

/// One parsed `{url, id}` payment-required signal.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentSignal {
    pub url: String,
    pub id: String,
}

fn signal_from_url(url: &str) -> PaymentSignal {
    let id = url.rsplit('/').next().unwrap_or(url).to_string();
    PaymentSignal {
        url: url.to_string(),
        id,
    }
}

fn find_payment_request_urls(haystack: &str) -> Vec<PaymentSignal> {
    PAYMENT_REQUEST_URL_RE
        .find_iter(haystack)
        .map(|m| signal_from_url(m.as_str()))
        .collect()
}

/// Classifies a single decoded JSON-RPC message, per spec §4.3 rules 1-3.
fn classify_message(message: &Value) -> Vec<PaymentSignal> {
    if let Some(error) = message.get("error") {
        let code = error.get("code").and_then(Value::as_i64);
        match code {
            Some(PAYMENT_REQUIRED_CODE) => {
                if let Some(url) = error
                    .get("data")
                    .and_then(|d| d.get("paymentRequestUrl"))
                    .and_then(Value::as_str)
                {
                    return vec![signal_from_url(url)];
                }
                if let Some(msg) = error.get("message").and_then(Value::as_str) {
                    return find_payment_request_urls(msg);
                }
                return Vec::new();
            }
            Some(ELICITATION_REQUIRED_CODE) => {
                let elicitations = error
                    .get("data")
                    .and_then(|d| d.get("elicitations"))
                    .and_then(Value::as_array);
                let Some(elicitations) = elicitations else {
                    return Vec::new();
                };
                let mut signals = Vec::new();
                for elicitation in elicitations {
                    if elicitation.get("mode").and_then(Value::as_str) != Some("url") {
                        continue;
                    }
                    if let Some(url) = elicitation.get("url").and_then(Value::as_str) {
                        signals.extend(find_payment_request_urls(url));
                    }
                }
                return signals;
            }
            _ => return Vec::new(),
        }
    }

    // Rule 3: a JSON-RPC response whose tool result has isError === true.
    let result = message.get("result");
    let is_error = result
        .and_then(|r| r.get("isError"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !is_error {
        return Vec::new();
    }
    let Some(content) = result.and_then(|r| r.get("content")).and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut signals = Vec::new();
    for block in content {
        let Some(text) = block.get("text").and_then(Value::as_str) else {
            continue;
        };
        let has_preamble = text.contains(PAYMENT_PREAMBLE);
        let has_code = text.contains(&PAYMENT_REQUIRED_CODE.to_string());
        if has_preamble || has_code {
            signals.extend(find_payment_request_urls(text));
        }
    }
    signals
}

/// Parses a response body (SSE or plain JSON) into an ordered list of payment
/// signals. An empty list means "not a payment-required condition". Malformed
/// JSON anywhere produces an empty list (logged) rather than an error: this
/// function never fails.
pub fn classify(body: &str) -> Vec<PaymentSignal> {
    let messages: Vec<String> = if sse::is_sse(body) {
        sse::extract_data_messages(body)
    } else {
        vec![body.to_string()]
    };

    let mut signals = Vec::new();
    for raw in messages {
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => signals.extend(classify_message(&value)),
            Err(error) => {
                #[cfg(feature = "telemetry")]
                tracing::debug!(%error, "ignoring malformed JSON-RPC message while classifying MCP response");
                #[cfg(not(feature = "telemetry"))]
                let _ = error;
            }
        }
    }
    signals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_error_code_with_data_url() {
        let body = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32402,"message":"payment required","data":{"paymentRequestUrl":"https://auth.atxp.ai/payment-request/foo"}}}"#;
        let signals = classify(body);
        assert_eq!(signals, vec![PaymentSignal { url: "https://auth.atxp.ai/payment-request/foo".into(), id: "foo".into() }]);
    }

    #[test]
    fn classifies_error_code_by_scanning_message() {
        let body = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32402,"message":"Payment via ATXP is required: https://auth.atxp.ai/payment-request/foo"}}"#;
        let signals = classify(body);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].id, "foo");
    }

    #[test]
    fn classifies_elicitation_url_mode() {
        let body = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32604,"message":"elicitation required","data":{"elicitations":[{"mode":"url","url":"https://auth.atxp.ai/payment-request/foo"},{"mode":"form","url":"https://example.com/ignored"}]}}}"#;
        let signals = classify(body);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].id, "foo");
    }

    #[test]
    fn classifies_tool_result_with_is_error_and_preamble() {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":{"isError":true,"content":[{"type":"text","text":"Payment via ATXP is required before calling this tool: https://auth.atxp.ai/payment-request/foo"}]}}"#;
        let signals = classify(body);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].id, "foo");
    }

    #[test]
    fn tool_result_without_preamble_or_code_is_not_classified_even_with_url() {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":{"isError":true,"content":[{"type":"text","text":"see https://example.com/payment-request/foo for details"}]}}"#;
        assert!(classify(body).is_empty());
    }

    #[test]
    fn ok_response_yields_no_signals() {
        let body = r#"{"content":[{"type":"text","text":"hello world"}]}"#;
        assert!(classify(body).is_empty());
    }

    #[test]
    fn malformed_json_yields_empty_list_not_panic() {
        assert!(classify("not json at all").is_empty());
    }

    #[test]
    fn multiple_payment_requests_are_all_returned() {
        let body = r#"{"error":{"code":-32402,"message":"Payment via ATXP is required: https://auth.atxp.ai/payment-request/foo and also https://auth.atxp.ai/payment-request/bar"}}"#;
        let signals = classify(body);
        assert_eq!(signals.len(), 2);
    }

    #[test]
    fn classifies_over_sse_framing() {
        let body = "event: message\ndata: {\"error\":{\"code\":-32402,\"message\":\"Payment via ATXP is required: https://auth.atxp.ai/payment-request/foo\"}}\n\n";
        let signals = classify(body);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].id, "foo");
    }
}
