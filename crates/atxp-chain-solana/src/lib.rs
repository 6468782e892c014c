//! The ed25519/Solana [`PaymentMaker`](atxp_payment::PaymentMaker) reference
//! implementation: SPL token transfer, confirmation polling, EdDSA JWTs.

mod maker;

pub use maker::{SolanaConfirmationPolicy, SolanaPaymentMaker};
