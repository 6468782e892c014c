//! Typed, environment-aware client configuration (spec §4.2's discovery
//! "strict mode" knob plus the confirmation/propagation timing knobs the
//! per-chain payment makers default their policies from), modeled on
//! `x402_types::config`'s literal-or-env resolution.
//!
//! # Environment variable resolution
//!
//! [`LiteralOrEnv`] lets a config value be given either literally or as a
//! `$VAR` / `${VAR}` reference resolved against the process environment at
//! deserialize time, so secrets and deployment-specific URLs never need to
//! be checked into a config file:
//!
//! ```json
//! {
//!   "redirect_uri": "https://myapp.example/callback",
//!   "allowed_issuers": ["${ATXP_ISSUER_URL}"]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// A transparent wrapper that resolves environment variable references
/// during deserialization, falling back to a literal value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn from_literal(value: T) -> Self {
        Self(value)
    }

    pub fn into_inner(self) -> T {
        self.0
    }

    /// Returns the referenced variable name if `s` matches `$VAR` or `${VAR}` syntax.
    fn parse_env_var_syntax(s: &str) -> Option<String> {
        if let Some(braced) = s.strip_prefix("${") {
            braced.strip_suffix('}').map(str::to_string)
        } else if let Some(rest) = s.strip_prefix('$') {
            (!rest.is_empty() && rest.chars().all(|c| c.is_alphanumeric() || c == '_'))
                .then(|| rest.to_string())
        } else {
            None
        }
    }
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for LiteralOrEnv<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let value = if let Some(var_name) = Self::parse_env_var_syntax(&s) {
            std::env::var(&var_name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "environment variable '{var_name}' not found (referenced as '{s}')"
                ))
            })?
        } else {
            s
        };
        value
            .parse::<T>()
            .map(LiteralOrEnv)
            .map_err(|e| serde::de::Error::custom(format!("failed to parse value: {e}")))
    }
}

impl<T: Serialize> Serialize for LiteralOrEnv<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

fn default_confirmation_timeout_secs() -> u64 {
    60
}

fn default_propagation_delay_secs() -> u64 {
    5
}

/// Deserializable, environment-aware configuration for an ATXP client: the
/// OAuth discovery allow-list and redirect URI, plus the typed timing knobs
/// the per-chain `PaymentMaker`s default their confirmation policies from.
#[derive(Debug, Clone, Deserialize)]
pub struct AtxpConfig {
    pub redirect_uri: LiteralOrEnv<Url>,
    #[serde(default)]
    pub allowed_issuers: Vec<LiteralOrEnv<Url>>,
    #[serde(default)]
    pub strict_discovery: bool,
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    #[serde(default = "default_propagation_delay_secs")]
    pub propagation_delay_secs: u64,
}

impl AtxpConfig {
    pub fn new(redirect_uri: Url) -> Self {
        AtxpConfig {
            redirect_uri: LiteralOrEnv::from_literal(redirect_uri),
            allowed_issuers: Vec::new(),
            strict_discovery: false,
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            propagation_delay_secs: default_propagation_delay_secs(),
        }
    }

    pub fn with_allowed_issuer(mut self, issuer: Url) -> Self {
        self.allowed_issuers.push(LiteralOrEnv::from_literal(issuer));
        self
    }

    pub fn with_strict_discovery(mut self, strict: bool) -> Self {
        self.strict_discovery = strict;
        self
    }

    pub fn with_confirmation_timeout_secs(mut self, secs: u64) -> Self {
        self.confirmation_timeout_secs = secs;
        self
    }

    pub fn with_propagation_delay_secs(mut self, secs: u64) -> Self {
        self.propagation_delay_secs = secs;
        self
    }

    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    pub fn allowed_issuer_strings(&self) -> Vec<String> {
        self.allowed_issuers.iter().map(|issuer| issuer.as_str().to_string()).collect()
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn propagation_delay(&self) -> Duration {
        Duration::from_secs(self.propagation_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_redirect_uri_and_defaults() {
        let json = r#"{"redirect_uri": "https://client.example/callback"}"#;
        let config: AtxpConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.redirect_uri().as_str(), "https://client.example/callback");
        assert_eq!(config.confirmation_timeout_secs, 60);
        assert_eq!(config.propagation_delay_secs, 5);
        assert!(!config.strict_discovery);
    }

    #[test]
    fn braced_env_var_syntax_resolves_allowed_issuer() {
        std::env::set_var("ATXP_TEST_ISSUER", "https://auth.atxp.ai");
        let json = r#"{
            "redirect_uri": "https://client.example/callback",
            "allowed_issuers": ["${ATXP_TEST_ISSUER}"]
        }"#;
        let config: AtxpConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.allowed_issuer_strings(), vec!["https://auth.atxp.ai/".to_string()]);
        std::env::remove_var("ATXP_TEST_ISSUER");
    }

    #[test]
    fn unbraced_env_var_syntax_is_also_supported() {
        std::env::set_var("ATXP_TEST_REDIRECT", "https://client.example/callback");
        let json = r#"{"redirect_uri": "$ATXP_TEST_REDIRECT"}"#;
        let config: AtxpConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.redirect_uri().as_str(), "https://client.example/callback");
        std::env::remove_var("ATXP_TEST_REDIRECT");
    }

    #[test]
    fn missing_env_var_is_a_deserialize_error() {
        let json = r#"{"redirect_uri": "$ATXP_DEFINITELY_MISSING_VAR"}"#;
        let result: Result<AtxpConfig, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
