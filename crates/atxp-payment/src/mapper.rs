//! DestinationMappers (spec §4.6): pipeline stage 2, transforming a destination
//! list without changing the payment's semantics.

use crate::error::PaymentPipelineError;
use async_trait::async_trait;
use atxp_types::{Network, PaymentDestination, SourceAddress};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

/// Transforms the destination list; receives the current source-address list for
/// mappers that need to know what the payer can pay from (none of the two
/// reference mappers use it today, but the contract carries it per spec §4.4).
#[async_trait]
pub trait DestinationMapper: Send + Sync {
    async fn map(
        &self,
        destinations: &[PaymentDestination],
        source_addresses: &[SourceAddress],
    ) -> Result<Vec<PaymentDestination>, PaymentPipelineError>;
}

/// Returns the input destination list unchanged.
pub struct IdentityMapper;

#[async_trait]
impl DestinationMapper for IdentityMapper {
    async fn map(
        &self,
        destinations: &[PaymentDestination],
        _source_addresses: &[SourceAddress],
    ) -> Result<Vec<PaymentDestination>, PaymentPipelineError> {
        Ok(destinations.to_vec())
    }
}

#[derive(Debug, Deserialize)]
struct DiscoveredAddress {
    address: String,
    network: String,
}

/// For a destination whose address names an account resolvable via the ATXP
/// address-discovery endpoint, expands it into one destination per returned
/// `{address, network}` entry, inheriting amount and currency (spec §4.6).
pub struct AtxpAddressDiscoveryMapper {
    http: Client,
    basic_auth_token: String,
}

impl AtxpAddressDiscoveryMapper {
    pub fn new(http: Client, basic_auth_token: impl Into<String>) -> Self {
        AtxpAddressDiscoveryMapper {
            http,
            basic_auth_token: basic_auth_token.into(),
        }
    }

    async fn discover(&self, origin: &Url, currency: &str) -> Result<Vec<DiscoveredAddress>, PaymentPipelineError> {
        let mut url = origin.clone();
        url.set_path("/addresses");
        url.query_pairs_mut().append_pair("currency", currency);

        let response = self
            .http
            .get(url.clone())
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Basic {}", STANDARD.encode(&self.basic_auth_token)),
            )
            .send()
            .await
            .map_err(PaymentPipelineError::Http)?;
        if !response.status().is_success() {
            return Err(PaymentPipelineError::MapperFailed {
                reason: format!("address-discovery endpoint {url} returned {}", response.status()),
            });
        }
        let addresses: Vec<DiscoveredAddress> = response.json().await.map_err(PaymentPipelineError::Http)?;
        if addresses.is_empty() {
            return Err(PaymentPipelineError::MapperFailed {
                reason: format!("address-discovery endpoint {url} returned an empty list"),
            });
        }
        Ok(addresses)
    }
}

#[async_trait]
impl DestinationMapper for AtxpAddressDiscoveryMapper {
    async fn map(
        &self,
        destinations: &[PaymentDestination],
        _source_addresses: &[SourceAddress],
    ) -> Result<Vec<PaymentDestination>, PaymentPipelineError> {
        let mut mapped = Vec::new();
        for destination in destinations {
            // Addresses without a scheme are assumed to be plain hosts reachable over
            // HTTPS; tests may supply a full `http://` URL against a local mock server.
            let candidate = if destination.address.contains("://") {
                destination.address.clone()
            } else {
                format!("https://{}", destination.address)
            };
            let origin = Url::parse(&candidate).map_err(|e| PaymentPipelineError::MapperFailed {
                reason: format!("destination address {} is not a resolvable origin: {e}", destination.address),
            })?;
            let discovered = self.discover(&origin, &destination.currency).await?;
            for entry in discovered {
                let network = Network::parse_normalized(&entry.network).ok_or_else(|| {
                    PaymentPipelineError::MapperFailed {
                        reason: format!("address-discovery returned unknown network {}", entry.network),
                    }
                })?;
                mapped.push(PaymentDestination {
                    network,
                    address: entry.address,
                    amount: destination.amount,
                    currency: destination.currency.clone(),
                    payment_request_id: destination.payment_request_id.clone(),
                    account_id: destination.account_id.clone(),
                });
            }
        }
        Ok(mapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atxp_types::MoneyAmount;
    use std::str::FromStr;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn destination(address: &str) -> PaymentDestination {
        PaymentDestination {
            network: Network::Solana,
            address: address.to_string(),
            amount: MoneyAmount::from_str("0.01").unwrap(),
            currency: "USDC".into(),
            payment_request_id: "req-1".into(),
            account_id: "bdj".into(),
        }
    }

    #[tokio::test]
    async fn identity_mapper_passes_through_unchanged() {
        let mapper = IdentityMapper;
        let input = vec![destination("addr1")];
        let output = mapper.map(&input, &[]).await.unwrap();
        assert_eq!(output, input);
    }

    #[tokio::test]
    async fn address_discovery_mapper_expands_into_one_destination_per_entry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/addresses"))
            .and(query_param("currency", "USDC"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"address": "SolRecv1", "network": "solana"},
                {"address": "0xRecv2", "network": "ethereum"},
            ])))
            .mount(&server)
            .await;

        let mapper = AtxpAddressDiscoveryMapper::new(Client::new(), "token");
        let input = vec![destination(&server.uri())];
        let output = mapper.map(&input, &[]).await.unwrap();
        assert_eq!(output.len(), 2);
        assert_eq!(output[0].address, "SolRecv1");
        assert_eq!(output[1].network, Network::Base);
    }

    #[tokio::test]
    async fn address_discovery_mapper_fails_hard_on_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/addresses"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let mapper = AtxpAddressDiscoveryMapper::new(Client::new(), "token");
        let input = vec![destination(&server.uri())];
        let error = mapper.map(&input, &[]).await.unwrap_err();
        assert!(matches!(error, PaymentPipelineError::MapperFailed { .. }));
    }
}
