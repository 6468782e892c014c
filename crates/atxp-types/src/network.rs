//! Payment network registry.
//!
//! ATXP routes a payment destination to a compatible [`PaymentMaker`](crate placeholder)
//! by its [`Network`] and [`NetworkFamily`]. This mirrors the CAIP-2-flavored network
//! registries used elsewhere in the payment-rail ecosystem, scoped down to the handful
//! of chains ATXP ships reference makers for.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A blockchain network ATXP knows how to pay on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Solana,
    Base,
    Polygon,
    Worldchain,
}

/// Coarse chain family, used to filter which [`PaymentMaker`] can even attempt a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkFamily {
    Evm,
    Svm,
}

impl Network {
    pub fn family(self) -> NetworkFamily {
        match self {
            Network::Solana => NetworkFamily::Svm,
            Network::Base | Network::Polygon | Network::Worldchain => NetworkFamily::Evm,
        }
    }

    /// Parses a network tag from the wire, normalizing known aliases.
    ///
    /// `ethereum` is a historical alias some resource servers still emit for `base`
    /// (spec requires the ATXP destination mapper to normalize it).
    pub fn parse_normalized(raw: &str) -> Option<Network> {
        match raw.to_ascii_lowercase().as_str() {
            "solana" => Some(Network::Solana),
            "base" | "ethereum" => Some(Network::Base),
            "polygon" => Some(Network::Polygon),
            "worldchain" | "world-chain" => Some(Network::Worldchain),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Network::Solana => "solana",
            Network::Base => "base",
            Network::Polygon => "polygon",
            Network::Worldchain => "worldchain",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
