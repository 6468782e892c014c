//! PaymentPipeline (spec §4.4): the 3-stage orchestration from a parsed
//! payment-required signal to a recorded settlement.

use crate::error::PaymentPipelineError;
use crate::mapper::DestinationMapper;
use crate::maker::{PaymentMaker, SourceAddressQuery};
use atxp_types::jwt::{self, JwtClaims};
use atxp_types::{
    MoneyAmount, Network, PaymentDestination, PaymentDestinationWire, PaymentObject,
    PaymentRequestRecord, PaymentRequestRecordWire, ProspectivePayment, SourceAddress, UnixTimestamp,
};
use reqwest::Client;
use std::collections::HashSet;
use std::str::FromStr;
use url::Url;

/// Invoked after fetching the payment-request record, before any on-chain action.
/// Returning `false` aborts the pipeline and the caller sees the original response.
pub type ApprovalCallback<'a> = dyn Fn(&ProspectivePayment) -> bool + Send + Sync + 'a;

/// Observer hook invoked once a payment has actually been dispatched (spec §4.4
/// step 7's `onPayment`). Failures are logged and swallowed by the caller.
pub type PaymentObserver<'a> = dyn Fn(&ProspectivePayment) + Send + Sync + 'a;

pub struct PaymentPipeline<'a> {
    http: Client,
    makers: Vec<Box<dyn PaymentMaker>>,
    mappers: Vec<Box<dyn DestinationMapper>>,
    approve: Box<ApprovalCallback<'a>>,
    on_payment: Option<Box<PaymentObserver<'a>>>,
}

/// The pipeline's terminal outcome, short of a hard error.
pub enum PipelineOutcome {
    /// A payment was made and settled; the caller should retry the original request.
    Settled,
    /// The approval callback declined the payment.
    Declined,
    /// No configured maker could handle any mapped destination.
    NoCompatibleMaker,
}

impl<'a> PaymentPipeline<'a> {
    pub fn new(
        http: Client,
        makers: Vec<Box<dyn PaymentMaker>>,
        mappers: Vec<Box<dyn DestinationMapper>>,
        approve: impl Fn(&ProspectivePayment) -> bool + Send + Sync + 'a,
    ) -> Self {
        PaymentPipeline {
            http,
            makers,
            mappers,
            approve: Box::new(approve),
            on_payment: None,
        }
    }

    pub fn with_observer(mut self, observer: impl Fn(&ProspectivePayment) + Send + Sync + 'a) -> Self {
        self.on_payment = Some(Box::new(observer));
        self
    }

    /// The first configured maker, used by the interceptor to sign the
    /// `/authorize` JWT (spec §4.2: "authenticated by a JWT produced by a
    /// PaymentMaker"). `None` if no makers are configured.
    pub fn primary_signer(&self) -> Option<&dyn atxp_types::jwt::JwtSigner> {
        self.makers
            .first()
            .map(|maker| &**maker as &dyn atxp_types::jwt::JwtSigner)
    }

    /// Runs the full pipeline for a payment-request URL discovered by the MCP
    /// error parser. `account_id` scopes the prospective-payment record only;
    /// the pipeline itself is stateless across calls.
    #[cfg_attr(feature = "telemetry", tracing::instrument(skip(self), fields(%payment_request_url)))]
    pub async fn run(
        &self,
        account_id: &str,
        payment_request_url: &Url,
        payment_request_id: &str,
        memo: Option<&str>,
    ) -> Result<PipelineOutcome, PaymentPipelineError> {
        let record = self.fetch_record(payment_request_url).await?;
        let destinations = self.to_payment_destinations(&record, payment_request_id, account_id)?;

        let representative = &destinations[0];
        let mut prospective = ProspectivePayment {
            account_id: account_id.to_string(),
            resource_url: record.resource.clone(),
            resource_name: record.resource_name.clone(),
            network: representative.network,
            currency: representative.currency.clone(),
            amount: representative.amount,
            issuer: record.iss.clone(),
        };

        if !(self.approve)(&prospective) {
            #[cfg(feature = "telemetry")]
            tracing::info!("payment declined by approval callback");
            return Ok(PipelineOutcome::Declined);
        }

        let query = SourceAddressQuery {
            amount: representative.amount,
            currency: representative.currency.clone(),
            receiver: Some(representative.address.clone()),
            memo: memo.map(str::to_string),
        };
        let source_addresses = self.collect_source_addresses(&query).await;

        let mapped_destinations = self.apply_mappers(&destinations, &source_addresses).await?;
        if mapped_destinations.is_empty() {
            #[cfg(feature = "telemetry")]
            tracing::warn!("all destinations were dropped by mappers; no payment attempted");
            return Ok(PipelineOutcome::NoCompatibleMaker);
        }

        let Some((payment_object, maker_index)) =
            self.dispatch(&mapped_destinations, memo, Some(payment_request_id)).await
        else {
            #[cfg(feature = "telemetry")]
            tracing::warn!("no configured payment maker could handle any mapped destination");
            return Ok(PipelineOutcome::NoCompatibleMaker);
        };

        prospective.network = payment_object.network;
        prospective.currency = payment_object.currency.clone();
        prospective.amount = payment_object.amount;
        if let Some(observer) = &self.on_payment {
            observer(&prospective);
        }

        self.settle(payment_request_url, payment_request_id, &payment_object, maker_index)
            .await?;
        Ok(PipelineOutcome::Settled)
    }

    async fn fetch_record(&self, url: &Url) -> Result<PaymentRequestRecord, PaymentPipelineError> {
        let response = self.http.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(PaymentPipelineError::FetchFailed {
                url: url.to_string(),
                reason: format!("payment-request endpoint returned {}", response.status()),
            });
        }
        let wire: PaymentRequestRecordWire = response.json().await?;
        Ok(wire.into())
    }

    fn to_payment_destinations(
        &self,
        record: &PaymentRequestRecord,
        payment_request_id: &str,
        account_id: &str,
    ) -> Result<Vec<PaymentDestination>, PaymentPipelineError> {
        if record.destinations.is_empty() {
            return Err(PaymentPipelineError::InvalidRecord {
                reason: "payment-request record carried no destinations".into(),
            });
        }
        record
            .destinations
            .iter()
            .map(|wire| self.validate_destination(wire, payment_request_id, account_id))
            .collect()
    }

    fn validate_destination(
        &self,
        wire: &PaymentDestinationWire,
        payment_request_id: &str,
        account_id: &str,
    ) -> Result<PaymentDestination, PaymentPipelineError> {
        if wire.network.is_empty() {
            return Err(PaymentPipelineError::InvalidRecord {
                reason: "destination missing network".into(),
            });
        }
        let network = Network::parse_normalized(&wire.network).ok_or_else(|| PaymentPipelineError::InvalidRecord {
            reason: format!("unknown network {}", wire.network),
        })?;
        let amount = MoneyAmount::from_str(&wire.amount).map_err(|e| PaymentPipelineError::InvalidRecord {
            reason: format!("invalid amount {}: {e}", wire.amount),
        })?;
        if wire.currency.is_empty() {
            return Err(PaymentPipelineError::InvalidRecord {
                reason: "destination missing currency".into(),
            });
        }
        Ok(PaymentDestination {
            network,
            address: wire.address.clone(),
            amount,
            currency: wire.currency.clone(),
            payment_request_id: payment_request_id.to_string(),
            account_id: account_id.to_string(),
        })
    }

    /// Stage 1: collect candidate source addresses, preserving maker insertion
    /// order and deduplicating by (network, address). A maker that errors is
    /// logged and skipped, not propagated.
    async fn collect_source_addresses(&self, query: &SourceAddressQuery) -> Vec<SourceAddress> {
        let mut seen = HashSet::new();
        let mut addresses = Vec::new();
        for maker in &self.makers {
            match maker.get_source_addresses(query).await {
                Ok(candidates) => {
                    for candidate in candidates {
                        let key = (candidate.network, candidate.address.clone());
                        if seen.insert(key) {
                            addresses.push(candidate);
                        }
                    }
                }
                Err(error) => {
                    #[cfg(feature = "telemetry")]
                    tracing::warn!(%error, "payment maker failed to enumerate source addresses; skipping");
                    #[cfg(not(feature = "telemetry"))]
                    let _ = error;
                }
            }
        }
        addresses
    }

    /// Stage 2: run destination mappers sequentially, each receiving the prior
    /// stage's full output and accumulating across all input destinations.
    async fn apply_mappers(
        &self,
        destinations: &[PaymentDestination],
        source_addresses: &[SourceAddress],
    ) -> Result<Vec<PaymentDestination>, PaymentPipelineError> {
        let mut current = destinations.to_vec();
        for mapper in &self.mappers {
            current = mapper.map(&current, source_addresses).await?;
        }
        Ok(current)
    }

    /// Stage 3: try each maker in configured order; the first to return a
    /// settlement wins. Returns the winning maker's index so settlement can ask
    /// the same maker for its JWT.
    async fn dispatch(
        &self,
        destinations: &[PaymentDestination],
        memo: Option<&str>,
        payment_request_id: Option<&str>,
    ) -> Option<(PaymentObject, usize)> {
        for (index, maker) in self.makers.iter().enumerate() {
            match maker.make_payment(destinations, memo, payment_request_id).await {
                Ok(Some(object)) => return Some((object, index)),
                Ok(None) => continue,
                Err(error) => {
                    #[cfg(feature = "telemetry")]
                    tracing::warn!(%error, "payment maker failed to make payment; trying next maker");
                    #[cfg(not(feature = "telemetry"))]
                    let _ = error;
                    continue;
                }
            }
        }
        None
    }

    async fn settle(
        &self,
        payment_request_url: &Url,
        payment_request_id: &str,
        payment_object: &PaymentObject,
        maker_index: usize,
    ) -> Result<(), PaymentPipelineError> {
        let maker = &self.makers[maker_index];
        let now = UnixTimestamp::now().as_secs();
        let claims = JwtClaims::new(maker.account_id(), now, jwt::MAX_EXPIRY_SECONDS)
            .with_payment_request_id(Some(payment_request_id.to_string()))
            .with_code_challenge(Some(String::new()));
        let jwt_token = maker
            .sign_jwt(claims)
            .await
            .map_err(|e| PaymentPipelineError::InvalidRecord { reason: e.to_string() })?;

        let body = serde_json::json!({
            "transactionId": payment_object.transaction_id,
            "network": payment_object.network,
            "currency": payment_object.currency,
        });
        let response = self
            .http
            .put(payment_request_url.clone())
            .bearer_auth(jwt_token)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentPipelineError::SettlementFailed {
                url: payment_request_url.to_string(),
                status,
                body,
            });
        }
        Ok(())
    }
}
