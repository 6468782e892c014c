//! SPL token transfer, confirmation polling, and EdDSA JWT signing for an
//! ed25519 Solana keypair (spec §4.5: "at minimum one ed25519-based maker").
//!
//! Grounded in the transfer-building sequence of the reference x402 Solana
//! client: derive mint/token-program, derive both ATAs, build a
//! `transfer_checked` instruction, fetch a recent blockhash, sign, submit,
//! and wait for confirmation.

use async_trait::async_trait;
use atxp_payment::{PaymentMaker, PaymentMakerError, SourceAddressQuery};
use atxp_types::jwt::{self, JwtAlgorithm, JwtClaims, JwtSigner};
use atxp_types::{MoneyAmount, Network, PaymentDestination, PaymentObject, SourceAddress};
use solana_account::Account;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_keypair::Keypair;
use solana_message::{v0::Message as MessageV0, VersionedMessage};
use solana_pubkey::Pubkey;
use solana_signer::Signer;
use solana_transaction::versioned::VersionedTransaction;
use spl_token::solana_program::program_pack::Pack;
use std::str::FromStr;
use std::time::Duration;

/// Mainnet USDC mint (spec's worked examples always settle in USDC).
const USDC_MINT_SOLANA: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

/// Propagation and retry delays (spec §4.5: "default 5s, 15s on failure fallback").
#[derive(Debug, Clone, Copy)]
pub struct SolanaConfirmationPolicy {
    pub propagation_delay: Duration,
    pub failed_confirmation_delay: Duration,
    pub poll_timeout: Duration,
}

impl Default for SolanaConfirmationPolicy {
    fn default() -> Self {
        SolanaConfirmationPolicy {
            propagation_delay: Duration::from_secs(5),
            failed_confirmation_delay: Duration::from_secs(15),
            poll_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&atxp_types::AtxpConfig> for SolanaConfirmationPolicy {
    fn from(config: &atxp_types::AtxpConfig) -> Self {
        SolanaConfirmationPolicy {
            propagation_delay: config.propagation_delay(),
            poll_timeout: config.confirmation_timeout(),
            ..SolanaConfirmationPolicy::default()
        }
    }
}

pub struct SolanaPaymentMaker {
    keypair: Keypair,
    rpc_client: RpcClient,
    mint: Pubkey,
    policy: SolanaConfirmationPolicy,
}

impl SolanaPaymentMaker {
    pub fn new(keypair: Keypair, rpc_url: impl Into<String>) -> Self {
        SolanaPaymentMaker {
            keypair,
            rpc_client: RpcClient::new(rpc_url.into()),
            mint: Pubkey::from_str(USDC_MINT_SOLANA).expect("hardcoded USDC mint is valid"),
            policy: SolanaConfirmationPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: SolanaConfirmationPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn address(&self) -> String {
        self.keypair.pubkey().to_string()
    }

    async fn token_program_for_mint(&self) -> Result<Pubkey, PaymentMakerError> {
        let account: Account = self
            .rpc_client
            .get_account(&self.mint)
            .await
            .map_err(|e| PaymentMakerError::network("failed to fetch USDC mint account", e))?;
        if account.owner == spl_token::id() {
            Ok(spl_token::id())
        } else if account.owner == spl_token_2022::id() {
            Ok(spl_token_2022::id())
        } else {
            Err(PaymentMakerError::network_message(format!(
                "mint {} is owned by an unrecognized token program",
                self.mint
            )))
        }
    }

    async fn balance(&self, owner: &Pubkey, token_program: &Pubkey) -> Result<u64, PaymentMakerError> {
        let ata = spl_associated_token_account::get_associated_token_address_with_program_id(
            owner,
            &self.mint,
            token_program,
        );
        match self.rpc_client.get_token_account_balance(&ata).await {
            Ok(balance) => balance
                .amount
                .parse::<u64>()
                .map_err(|e| PaymentMakerError::network_message(format!("malformed balance amount: {e}"))),
            Err(_) => Ok(0),
        }
    }

    async fn transfer(&self, destination: &Pubkey, amount_minor_units: u64) -> Result<String, PaymentMakerError> {
        let token_program = self.token_program_for_mint().await?;
        let source_owner = self.keypair.pubkey();

        let source_ata = spl_associated_token_account::get_associated_token_address_with_program_id(
            &source_owner,
            &self.mint,
            &token_program,
        );
        let destination_ata = spl_associated_token_account::get_associated_token_address_with_program_id(
            destination,
            &self.mint,
            &token_program,
        );

        let transfer_ix = spl_token::instruction::transfer_checked(
            &token_program,
            &source_ata,
            &self.mint,
            &destination_ata,
            &source_owner,
            &[],
            amount_minor_units,
            6,
        )
        .map_err(|e| PaymentMakerError::network("failed to build transfer_checked instruction", e))?;

        let recent_blockhash = self
            .rpc_client
            .get_latest_blockhash()
            .await
            .map_err(|e| PaymentMakerError::network("failed to fetch recent blockhash", e))?;

        let message = MessageV0::try_compile(&source_owner, &[transfer_ix], &[], recent_blockhash)
            .map_err(|e| PaymentMakerError::network_message(format!("failed to compile message: {e:?}")))?;
        let transaction = VersionedTransaction::try_new(VersionedMessage::V0(message), &[&self.keypair])
            .map_err(|e| PaymentMakerError::network_message(format!("failed to sign transaction: {e}")))?;

        let signature = tokio::time::timeout(
            self.policy.poll_timeout,
            self.rpc_client.send_and_confirm_transaction(&transaction),
        )
        .await
        .map_err(|_| PaymentMakerError::network_message("timed out waiting for transaction confirmation"))?
        .map_err(|e| PaymentMakerError::network("failed to submit or confirm transfer", e))?;

        Ok(signature.to_string())
    }
}

#[async_trait]
impl JwtSigner for SolanaPaymentMaker {
    fn account_id(&self) -> String {
        self.address()
    }

    async fn sign_jwt(
        &self,
        claims: JwtClaims,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        let input = jwt::signing_input(JwtAlgorithm::EdDSA, &claims)?;
        let signature = self.keypair.sign_message(input.encoded.as_bytes());
        Ok(jwt::assemble(input, signature.as_ref()))
    }
}

#[async_trait]
impl PaymentMaker for SolanaPaymentMaker {
    async fn get_source_addresses(
        &self,
        _query: &SourceAddressQuery,
    ) -> Result<Vec<SourceAddress>, PaymentMakerError> {
        Ok(vec![SourceAddress {
            network: Network::Solana,
            address: self.address(),
        }])
    }

    async fn make_payment(
        &self,
        destinations: &[PaymentDestination],
        _memo: Option<&str>,
        _payment_request_id: Option<&str>,
    ) -> Result<Option<PaymentObject>, PaymentMakerError> {
        let Some(destination) = destinations.iter().find(|d| d.network == Network::Solana) else {
            return Ok(None);
        };
        if destination.currency != "USDC" {
            return Err(PaymentMakerError::network_message(format!(
                "unsupported currency {} on Solana (only USDC is supported)",
                destination.currency
            )));
        }

        let destination_pubkey = Pubkey::from_str(&destination.address)
            .map_err(|e| PaymentMakerError::network_message(format!("invalid Solana address {}: {e}", destination.address)))?;
        let amount_minor_units: u64 = destination
            .amount
            .to_minor_units(6)
            .try_into()
            .map_err(|_| PaymentMakerError::network_message("amount exceeds u64 minor-unit range"))?;

        let token_program = self.token_program_for_mint().await?;
        let available_minor = self.balance(&self.keypair.pubkey(), &token_program).await?;
        if available_minor < amount_minor_units {
            return Err(PaymentMakerError::InsufficientFunds {
                currency: destination.currency.clone(),
                required: decimal_from_minor_units(amount_minor_units),
                available: decimal_from_minor_units(available_minor),
                network: Network::Solana,
            });
        }

        let transaction_id = self.transfer(&destination_pubkey, amount_minor_units).await?;

        Ok(Some(PaymentObject {
            network: Network::Solana,
            address: destination.address.clone(),
            amount: destination.amount,
            currency: destination.currency.clone(),
            transaction_id,
        }))
    }
}

fn decimal_from_minor_units(minor_units: u64) -> rust_decimal::Decimal {
    rust_decimal::Decimal::new(minor_units as i64, 6)
}
