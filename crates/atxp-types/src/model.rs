//! Core data model (spec §3): the entities that flow through the OAuth and
//! payment subsystems.

use crate::money::MoneyAmount;
use crate::network::Network;
use crate::timestamp::UnixTimestamp;
use serde::{Deserialize, Serialize};
use url::Url;

/// Bearer token persisted by [`OAuthDb`](crate placeholder), keyed by `(account_id, resource_url)`.
///
/// The special empty-string resource URL key (`""`) stores an incoming pass-through
/// token rather than one ATXP itself negotiated; see spec §3's invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub resource_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Absolute expiry, epoch seconds. `None` means "no known expiry" (a default TTL
    /// still applies at the storage layer).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl AccessToken {
    pub fn is_expired(&self, now: UnixTimestamp) -> bool {
        match self.expires_at {
            Some(exp) => UnixTimestamp(exp).is_past(now),
            None => false,
        }
    }
}

/// Dynamically-registered OAuth client credentials, keyed by authorization-server issuer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientCredentials {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    pub redirect_uri: Url,
}

/// A single-use PKCE record, keyed by `(account_id, state)`, TTL <= 10 minutes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PkceValues {
    pub code_verifier: String,
    pub code_challenge: String,
    pub resource_url: Url,
    pub authorization_url: Url,
}

/// One destination leg of a payment requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentDestinationWire {
    pub network: String,
    pub address: String,
    pub amount: String,
    pub currency: String,
}

/// The payment-request record fetched from the authorization server (spec §4.4 step 1).
///
/// The wire format is either a single legacy destination or a `destinations` list;
/// both normalize to the same in-memory shape via [`PaymentRequestRecord::destinations`].
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PaymentRequestRecordWire {
    Multi {
        destinations: Vec<PaymentDestinationWire>,
        #[serde(default)]
        resource: Option<String>,
        #[serde(default, rename = "resourceName")]
        resource_name: Option<String>,
        #[serde(default)]
        iss: Option<String>,
    },
    Legacy {
        network: String,
        address: String,
        amount: String,
        currency: String,
        #[serde(default)]
        resource: Option<String>,
        #[serde(default, rename = "resourceName")]
        resource_name: Option<String>,
        #[serde(default)]
        iss: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct PaymentRequestRecord {
    pub destinations: Vec<PaymentDestinationWire>,
    pub resource: Option<String>,
    pub resource_name: Option<String>,
    pub iss: Option<String>,
}

impl From<PaymentRequestRecordWire> for PaymentRequestRecord {
    fn from(wire: PaymentRequestRecordWire) -> Self {
        match wire {
            PaymentRequestRecordWire::Multi {
                destinations,
                resource,
                resource_name,
                iss,
            } => PaymentRequestRecord {
                destinations,
                resource,
                resource_name,
                iss,
            },
            PaymentRequestRecordWire::Legacy {
                network,
                address,
                amount,
                currency,
                resource,
                resource_name,
                iss,
            } => PaymentRequestRecord {
                destinations: vec![PaymentDestinationWire {
                    network,
                    address,
                    amount,
                    currency,
                }],
                resource,
                resource_name,
                iss,
            },
        }
    }
}

/// The caller-visible description of a pending payment, passed to the approval
/// callback and to observer callbacks. Mutated after dispatch to record the
/// network/currency/amount actually used.
#[derive(Debug, Clone)]
pub struct ProspectivePayment {
    pub account_id: String,
    pub resource_url: Option<String>,
    pub resource_name: Option<String>,
    pub network: Network,
    pub currency: String,
    pub amount: MoneyAmount,
    pub issuer: Option<String>,
}

/// A destination a payment pipeline is trying to pay: the input to and output of
/// destination mapping, and the input to payment makers.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentDestination {
    pub network: Network,
    pub address: String,
    pub amount: MoneyAmount,
    pub currency: String,
    pub payment_request_id: String,
    pub account_id: String,
}

/// A source address a [`PaymentMaker`](crate placeholder) can pay from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceAddress {
    pub network: Network,
    pub address: String,
}

/// The settlement record produced by a payment maker and consumed by the
/// settlement PUT.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentObject {
    pub network: Network,
    pub address: String,
    pub amount: MoneyAmount,
    pub currency: String,
    pub transaction_id: String,
}
