//! The PaymentMaker contract (spec §4.5): the polymorphic per-chain signer and
//! submitter every payment pipeline dispatches against.

use crate::error::PaymentMakerError;
use atxp_types::jwt::JwtSigner;
use atxp_types::{MoneyAmount, PaymentDestination, PaymentObject, SourceAddress};
use async_trait::async_trait;

/// Parameters for [`PaymentMaker::get_source_addresses`]: the amount and currency
/// the pipeline intends to pay, plus context a maker may use to filter candidates.
#[derive(Debug, Clone)]
pub struct SourceAddressQuery {
    pub amount: MoneyAmount,
    pub currency: String,
    pub receiver: Option<String>,
    pub memo: Option<String>,
}

/// Every chain-specific signer/submitter implements this, plus [`JwtSigner`] for
/// the `/authorize` and settlement JWTs (spec §4.5's `generateJWT`).
#[async_trait]
pub trait PaymentMaker: JwtSigner {
    /// Enumerates addresses this maker can pay from, given the pipeline's intent.
    async fn get_source_addresses(
        &self,
        query: &SourceAddressQuery,
    ) -> Result<Vec<SourceAddress>, PaymentMakerError>;

    /// Attempts to pay one of `destinations`. Returns `Ok(None)` when none of the
    /// destinations are on a network/currency this maker handles — the pipeline
    /// tries the next maker in that case, not an error path.
    async fn make_payment(
        &self,
        destinations: &[PaymentDestination],
        memo: Option<&str>,
        payment_request_id: Option<&str>,
    ) -> Result<Option<PaymentObject>, PaymentMakerError>;

    /// Every `PaymentMaker` doubles as a [`JwtSigner`]; this hands back `self`
    /// as one without requiring trait-upcasting from a `dyn PaymentMaker`.
    fn as_jwt_signer(&self) -> &dyn JwtSigner
    where
        Self: Sized,
    {
        self
    }
}
