//! Payment subsystem error taxonomy (spec §4.5, §7).

use atxp_types::Network;
use rust_decimal::Decimal;

#[derive(Debug, thiserror::Error)]
pub enum PaymentMakerError {
    #[error("insufficient funds on {network}: required {required} {currency}, available {available} {currency}")]
    InsufficientFunds {
        currency: String,
        required: Decimal,
        available: Decimal,
        network: Network,
    },

    /// Wraps any other on-chain failure (RPC error, submission rejected, confirmation
    /// timed out) with the original error attached for diagnostics.
    #[error("payment failed on network: {message}")]
    PaymentNetwork {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl PaymentMakerError {
    pub fn network(message: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        PaymentMakerError::PaymentNetwork {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn network_message(message: impl Into<String>) -> Self {
        PaymentMakerError::PaymentNetwork {
            message: message.into(),
            source: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentPipelineError {
    #[error("failed to fetch payment-request record from {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    #[error("payment-request record is invalid: {reason}")]
    InvalidRecord { reason: String },

    #[error("more than one payment-required record was signaled in a single response")]
    MultiplePaymentRequests,

    #[error("address-discovery mapper returned an empty or malformed response")]
    MapperFailed { reason: String },

    #[error("settlement PUT to {url} returned {status}: {body}")]
    SettlementFailed {
        url: String,
        status: u16,
        body: String,
    },

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}
