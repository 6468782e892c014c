//! OAuth subflow error taxonomy (spec §7).

use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    /// The resource returned 401 with a parseable `WWW-Authenticate` header or body
    /// naming the resource-server URL. Recoverable by the OAuth flow.
    #[error("authentication required for resource {resource_url}")]
    AuthenticationRequired { resource_url: String },

    /// The discovered issuer is not in the caller-configured allow-list. Fatal.
    #[error("authorization server {issuer} is not in the configured allow-list")]
    UnknownAuthorizationServer { issuer: Url },

    #[error("failed to discover authorization server for {resource_url}: {reason}")]
    DiscoveryFailed { resource_url: String, reason: String },

    #[error("dynamic client registration failed against {issuer}: {reason}")]
    RegistrationFailed { issuer: Url, reason: String },

    #[error("authorize call failed: {reason}")]
    AuthorizeFailed { reason: String },

    /// The authorize endpoint rejected `client_id` (401/403), most likely because
    /// the authorization server forgot or revoked a previously registered client.
    #[error("authorization server rejected client_id with status {status}")]
    StaleClientRegistration { status: u16 },

    #[error("token exchange failed: {reason}")]
    TokenExchangeFailed { reason: String },

    #[error("no PKCE record found for state {state} (expired or never issued)")]
    PkceNotFound { state: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}
