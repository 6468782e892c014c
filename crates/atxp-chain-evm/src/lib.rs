//! EVM [`PaymentMaker`](atxp_payment::PaymentMaker) reference implementations:
//! an EOA-signed ERC-20 transfer maker, and a smart-wallet/spend-permission
//! stub wired behind a narrow bundler trait.

mod maker;

pub use maker::{
    EvmConfirmationPolicy, EvmPaymentMaker, EvmSmartWalletPaymentMaker, SpendPermissionBundler,
};
