//! Shared data model for ATXP: the entities described in spec §3, the payment
//! network registry, arbitrary-precision money amounts, and the JWT wire format
//! used to authenticate both the `/authorize` call and the settlement PUT.

pub mod config;
pub mod jwt;
pub mod model;
pub mod money;
pub mod network;
pub mod timestamp;

pub use config::{AtxpConfig, LiteralOrEnv};
pub use model::*;
pub use money::{MoneyAmount, MoneyAmountError};
pub use network::{Network, NetworkFamily};
pub use timestamp::UnixTimestamp;
