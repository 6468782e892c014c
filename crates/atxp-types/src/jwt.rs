//! Hand-rolled JWT wire format (spec §6).
//!
//! ATXP JWTs authenticate a single `/authorize` call or a settlement PUT; they are
//! never verified locally, only built and handed to an HTTP call, so this module
//! only needs to produce the `header.payload` signing input and assemble the final
//! compact token once a [`PaymentMaker`](crate placeholder) has signed that input.
//! The algorithm varies with the signer's key type, so signing itself lives with
//! each chain's payment maker rather than here.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;

pub const ATXP_ISSUER: &str = "atxp.ai";
pub const ATXP_AUDIENCE: &str = "https://auth.atxp.ai";
/// Upper bound on JWT lifetime (spec §4.5 / §6: "Expiry ≤ 2 minutes").
pub const MAX_EXPIRY_SECONDS: i64 = 120;

/// The signature algorithm a key type produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwtAlgorithm {
    /// ed25519 keys (Solana payment makers).
    EdDSA,
    /// secp256k1 EOA signers (EVM payment makers).
    Es256k,
    /// EIP-1271 smart-contract-wallet signers.
    Eip1271,
}

impl JwtAlgorithm {
    fn header_alg(self) -> &'static str {
        match self {
            JwtAlgorithm::EdDSA => "EdDSA",
            JwtAlgorithm::Es256k => "ES256K",
            JwtAlgorithm::Eip1271 => "EIP1271",
        }
    }
}

#[derive(Debug, Serialize)]
struct JwtHeader {
    alg: &'static str,
    typ: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct JwtClaims {
    pub sub: String,
    pub iss: &'static str,
    pub aud: &'static str,
    pub iat: i64,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

impl JwtClaims {
    pub fn new(subject: impl Into<String>, now: i64, expiry_seconds: i64) -> Self {
        let expiry_seconds = expiry_seconds.min(MAX_EXPIRY_SECONDS);
        JwtClaims {
            sub: subject.into(),
            iss: ATXP_ISSUER,
            aud: ATXP_AUDIENCE,
            iat: now,
            exp: now + expiry_seconds,
            payment_request_id: None,
            code_challenge: None,
            account_id: None,
        }
    }

    pub fn with_payment_request_id(mut self, id: Option<String>) -> Self {
        self.payment_request_id = id;
        self
    }

    pub fn with_code_challenge(mut self, challenge: Option<String>) -> Self {
        if challenge.as_deref() != Some("") {
            self.code_challenge = challenge;
        }
        self
    }
}

/// The base64url-encoded `header.payload` bytes a signer must sign over.
pub struct JwtSigningInput {
    pub encoded: String,
}

/// Builds the signing input for a JWT with the given algorithm and claims.
pub fn signing_input(alg: JwtAlgorithm, claims: &JwtClaims) -> Result<JwtSigningInput, JwtError> {
    let header = JwtHeader {
        alg: alg.header_alg(),
        typ: "JWT",
    };
    let header_json = serde_json::to_vec(&header).map_err(JwtError::Encode)?;
    let payload_json = serde_json::to_vec(claims).map_err(JwtError::Encode)?;
    let header_b64 = URL_SAFE_NO_PAD.encode(header_json);
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload_json);
    Ok(JwtSigningInput {
        encoded: format!("{header_b64}.{payload_b64}"),
    })
}

/// Appends a raw signature to a signing input, producing the compact JWT string.
pub fn assemble(signing_input: JwtSigningInput, signature: &[u8]) -> String {
    let sig_b64 = URL_SAFE_NO_PAD.encode(signature);
    format!("{}.{}", signing_input.encoded, sig_b64)
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("failed to encode JWT segment")]
    Encode(#[source] serde_json::Error),
}

/// The narrow signing capability the OAuth `/authorize` call and settlement PUT
/// both need from a payment maker, without either crate depending on the full
/// chain-specific payment machinery. Implemented by each chain's `PaymentMaker`.
#[async_trait::async_trait]
pub trait JwtSigner: Send + Sync {
    /// The subject address this signer authenticates as (JWT `sub` claim).
    fn account_id(&self) -> String;

    /// Signs `claims` and returns a compact JWT. Boxed error: callers across crate
    /// boundaries only need to log and classify failures, never match on variants.
    async fn sign_jwt(
        &self,
        claims: JwtClaims,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_clamped_to_two_minutes() {
        let claims = JwtClaims::new("addr", 1_000, 10_000);
        assert_eq!(claims.exp - claims.iat, MAX_EXPIRY_SECONDS);
    }

    #[test]
    fn empty_code_challenge_is_dropped_not_serialized() {
        let claims = JwtClaims::new("addr", 1_000, 60).with_code_challenge(Some(String::new()));
        assert!(claims.code_challenge.is_none());
    }

    #[test]
    fn signing_input_is_dot_joined_base64url_segments() {
        let claims = JwtClaims::new("addr", 1_000, 60);
        let input = signing_input(JwtAlgorithm::EdDSA, &claims).unwrap();
        let parts: Vec<&str> = input.encoded.split('.').collect();
        assert_eq!(parts.len(), 2);
        let token = assemble(input, b"sig-bytes");
        assert_eq!(token.split('.').count(), 3);
    }
}
