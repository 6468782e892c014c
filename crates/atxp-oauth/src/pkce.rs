//! PKCE (RFC 7636) code verifier/challenge generation, S256 only (spec §4.2).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Length of the random code verifier in bytes before base64url encoding.
/// 32 bytes encodes to 43 characters, within RFC 7636's 43-128 character range.
const VERIFIER_BYTES: usize = 32;

pub struct PkcePair {
    pub code_verifier: String,
    pub code_challenge: String,
}

/// Generates a fresh `(code_verifier, code_challenge)` pair using the S256 method.
pub fn generate() -> PkcePair {
    let mut bytes = [0u8; VERIFIER_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    let code_verifier = URL_SAFE_NO_PAD.encode(bytes);
    let code_challenge = challenge_from_verifier(&code_verifier);
    PkcePair {
        code_verifier,
        code_challenge,
    }
}

/// Derives the S256 code challenge from a verifier: `base64url(sha256(verifier))`.
pub fn challenge_from_verifier(code_verifier: &str) -> String {
    let digest = Sha256::digest(code_verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Generates a random `state` parameter for the authorization request.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_verifier_is_within_rfc_length_bounds() {
        let pair = generate();
        assert!(pair.code_verifier.len() >= 43 && pair.code_verifier.len() <= 128);
    }

    #[test]
    fn challenge_is_deterministic_given_verifier() {
        let pair = generate();
        assert_eq!(challenge_from_verifier(&pair.code_verifier), pair.code_challenge);
    }

    #[test]
    fn two_generated_pairs_differ() {
        let a = generate();
        let b = generate();
        assert_ne!(a.code_verifier, b.code_verifier);
    }

    #[test]
    fn known_vector_matches_rfc7636_appendix_b() {
        // RFC 7636 Appendix B example.
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = challenge_from_verifier(verifier);
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }
}
