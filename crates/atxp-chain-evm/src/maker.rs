//! EOA ERC-20 transfer submission for an EVM-compatible chain (spec §4.5:
//! "EOA main-wallet variant. Directly submits a token `transfer` via the
//! provider and waits for ≥2 confirmations.").
//!
//! Grounded in the reference payment-rail EVM provider's filler-stack +
//! wallet-signed-provider shape (`Eip155ChainProvider`), simplified down to
//! a single-signer, single-RPC provider since ATXP has no round-robin or
//! nonce-manager needs of its own.

use alloy_network::{EthereumWallet, TransactionBuilder};
use alloy_primitives::{Address, U256};
use alloy_provider::{Provider, ProviderBuilder};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::sol;
use async_trait::async_trait;
use atxp_payment::{PaymentMaker, PaymentMakerError, SourceAddressQuery};
use atxp_types::jwt::{self, JwtAlgorithm, JwtClaims, JwtSigner};
use atxp_types::{MoneyAmount, Network, PaymentDestination, PaymentObject, SourceAddress};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function transfer(address to, uint256 amount) external returns (bool);
        function balanceOf(address owner) external view returns (uint256);
        function decimals() external view returns (uint8);
    }
}

const REQUIRED_CONFIRMATIONS: u64 = 2;

fn usdc_address(network: Network) -> Option<&'static str> {
    match network {
        Network::Base => Some("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
        Network::Polygon => Some("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359"),
        Network::Worldchain => Some("0x79A02482A880bCE3F13e09Da970dC34db4CD24d1"),
        Network::Solana => None,
    }
}

/// Confirmation and receipt-timeout policy (spec §4.5: "defaults suited to
/// production and reduced values for test").
#[derive(Debug, Clone, Copy)]
pub struct EvmConfirmationPolicy {
    pub required_confirmations: u64,
    pub receipt_timeout: Duration,
}

impl Default for EvmConfirmationPolicy {
    fn default() -> Self {
        EvmConfirmationPolicy {
            required_confirmations: REQUIRED_CONFIRMATIONS,
            receipt_timeout: Duration::from_secs(120),
        }
    }
}

impl From<&atxp_types::AtxpConfig> for EvmConfirmationPolicy {
    fn from(config: &atxp_types::AtxpConfig) -> Self {
        EvmConfirmationPolicy {
            receipt_timeout: config.confirmation_timeout(),
            ..EvmConfirmationPolicy::default()
        }
    }
}

pub struct EvmPaymentMaker {
    signer: PrivateKeySigner,
    rpc_url: Url,
    network: Network,
    policy: EvmConfirmationPolicy,
}

impl EvmPaymentMaker {
    pub fn new(signer: PrivateKeySigner, rpc_url: Url, network: Network) -> Self {
        EvmPaymentMaker {
            signer,
            rpc_url,
            network,
            policy: EvmConfirmationPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: EvmConfirmationPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn address(&self) -> Address {
        self.signer.address()
    }

    fn provider(&self) -> impl Provider {
        let wallet = EthereumWallet::from(self.signer.clone());
        ProviderBuilder::new().wallet(wallet).connect_http(self.rpc_url.clone())
    }
}

#[async_trait]
impl JwtSigner for EvmPaymentMaker {
    fn account_id(&self) -> String {
        self.address().to_string()
    }

    async fn sign_jwt(
        &self,
        claims: JwtClaims,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let input = jwt::signing_input(JwtAlgorithm::Es256k, &claims)?;
        let hash = alloy_primitives::keccak256(input.encoded.as_bytes());
        let signature = self.signer.sign_hash(&hash).await?;
        Ok(jwt::assemble(input, &signature.as_bytes()))
    }
}

#[async_trait]
impl PaymentMaker for EvmPaymentMaker {
    async fn get_source_addresses(
        &self,
        _query: &SourceAddressQuery,
    ) -> Result<Vec<SourceAddress>, PaymentMakerError> {
        Ok(vec![SourceAddress {
            network: self.network,
            address: self.address().to_string(),
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
        if destination.currency != "USDC" {
            return Err(PaymentMakerError::network_message(format!(
                "unsupported currency {} on {} (only USDC is supported)",
                destination.currency, self.network
            )));
        }
        let Some(token_address) = usdc_address(self.network) else {
            return Err(PaymentMakerError::network_message(format!(
                "no USDC contract known for {}",
                self.network
            )));
        };
        let token_address = Address::from_str(token_address)
            .map_err(|e| PaymentMakerError::network_message(format!("invalid USDC contract address: {e}")))?;
        let destination_address = Address::from_str(&destination.address).map_err(|e| {
            PaymentMakerError::network_message(format!("invalid EVM address {}: {e}", destination.address))
        })?;

        let provider = self.provider();
        let contract = IERC20::new(token_address, &provider);

        let amount_minor_units = destination.amount.to_minor_units(6);
        let amount = U256::from(amount_minor_units);

        let balance = contract
            .balanceOf(self.address())
            .call()
            .await
            .map_err(|e| PaymentMakerError::network("failed to query USDC balance", e))?;
        if balance < amount {
            return Err(PaymentMakerError::InsufficientFunds {
                currency: destination.currency.clone(),
                required: decimal_from_u256(amount),
                available: decimal_from_u256(balance),
                network: self.network,
            });
        }

        let pending_tx = contract
            .transfer(destination_address, amount)
            .send()
            .await
            .map_err(|e| PaymentMakerError::network("failed to submit USDC transfer", e))?;
        let transaction_hash = *pending_tx.tx_hash();

        let receipt = tokio::time::timeout(
            self.policy.receipt_timeout,
            pending_tx
                .with_required_confirmations(self.policy.required_confirmations)
                .get_receipt(),
        )
        .await
        .map_err(|_| PaymentMakerError::network_message("timed out waiting for transfer confirmations"))?
        .map_err(|e| PaymentMakerError::network("failed to confirm USDC transfer", e))?;

        if !receipt.status() {
            return Err(PaymentMakerError::network_message(format!(
                "USDC transfer {transaction_hash} reverted"
            )));
        }

        Ok(Some(PaymentObject {
            network: self.network,
            address: destination.address.clone(),
            amount: destination.amount,
            currency: destination.currency.clone(),
            transaction_id: transaction_hash.to_string(),
        }))
    }
}

fn decimal_from_u256(value: U256) -> rust_decimal::Decimal {
    rust_decimal::Decimal::from_str(&value.to_string())
        .unwrap_or(rust_decimal::Decimal::ZERO)
        / rust_decimal::Decimal::new(1_000_000, 0)
}

/// A narrow bundler/spend-permission collaborator the smart-wallet variant
/// depends on, representing the out-of-scope user-operation infrastructure
/// (spec §1, §4.5). Implementations submit a user-operation bundling a
/// spend-permission draw followed by the token transfer.
#[async_trait]
pub trait SpendPermissionBundler: Send + Sync {
    /// Submits a user-operation exercising `spend_permission_id` to transfer
    /// `amount_minor_units` of `token` to `destination`, appending `memo` as
    /// trailing calldata on the transfer call. Returns the mined transaction hash.
    async fn submit_spend(
        &self,
        token: Address,
        destination: Address,
        amount_minor_units: u64,
        spend_permission_id: &str,
        memo: &[u8],
    ) -> Result<String, PaymentMakerError>;
}

/// EVM smart-wallet / spend-permission `PaymentMaker` variant (spec §4.5). Its
/// bundler integration is out of scope; this wires the contract to whatever
/// [`SpendPermissionBundler`] the caller supplies.
pub struct EvmSmartWalletPaymentMaker {
    ephemeral_signer: PrivateKeySigner,
    network: Network,
    spend_permission_id: String,
    bundler: Box<dyn SpendPermissionBundler>,
    propagation_delay: Duration,
}

impl EvmSmartWalletPaymentMaker {
    pub fn new(
        ephemeral_signer: PrivateKeySigner,
        network: Network,
        spend_permission_id: impl Into<String>,
        bundler: Box<dyn SpendPermissionBundler>,
    ) -> Self {
        EvmSmartWalletPaymentMaker {
            ephemeral_signer,
            network,
            spend_permission_id: spend_permission_id.into(),
            bundler,
            propagation_delay: Duration::from_secs(5),
        }
    }
}

#[async_trait]
impl JwtSigner for EvmSmartWalletPaymentMaker {
    fn account_id(&self) -> String {
        self.ephemeral_signer.address().to_string()
    }

    async fn sign_jwt(
        &self,
        claims: JwtClaims,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let input = jwt::signing_input(JwtAlgorithm::Eip1271, &claims)?;
        let hash = alloy_primitives::keccak256(input.encoded.as_bytes());
        let signature = self.ephemeral_signer.sign_hash(&hash).await?;
        Ok(jwt::assemble(input, &signature.as_bytes()))
    }
}

#[async_trait]
impl PaymentMaker for EvmSmartWalletPaymentMaker {
    async fn get_source_addresses(
        &self,
        _query: &SourceAddressQuery,
    ) -> Result<Vec<SourceAddress>, PaymentMakerError> {
        Ok(vec![SourceAddress {
            network: self.network,
            address: self.ephemeral_signer.address().to_string(),
        }])
    }

    async fn make_payment(
        &self,
        destinations: &[PaymentDestination],
        memo: Option<&str>,
        _payment_request_id: Option<&str>,
    ) -> Result<Option<PaymentObject>, PaymentMakerError> {
        let Some(destination) = destinations.iter().find(|d| d.network == self.network) else {
            return Ok(None);
        };
        let Some(token_address) = usdc_address(self.network) else {
            return Ok(None);
        };
        let token_address = Address::from_str(token_address)
            .map_err(|e| PaymentMakerError::network_message(format!("invalid USDC contract address: {e}")))?;
        let destination_address = Address::from_str(&destination.address).map_err(|e| {
            PaymentMakerError::network_message(format!("invalid EVM address {}: {e}", destination.address))
        })?;
        let amount_minor_units: u64 = destination
            .amount
            .to_minor_units(6)
            .try_into()
            .map_err(|_| PaymentMakerError::network_message("amount exceeds u64 minor-unit range"))?;

        let transaction_id = self
            .bundler
            .submit_spend(
                token_address,
                destination_address,
                amount_minor_units,
                &self.spend_permission_id,
                memo.unwrap_or_default().as_bytes(),
            )
            .await?;

        tokio::time::sleep(self.propagation_delay).await;

        Ok(Some(PaymentObject {
            network: self.network,
            address: destination.address.clone(),
            amount: destination.amount,
            currency: destination.currency.clone(),
            transaction_id,
        }))
    }
}
