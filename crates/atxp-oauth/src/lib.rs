//! OAuth2 protected-resource discovery, dynamic client registration, PKCE, and
//! the `redirect=false` authorize variant used to authenticate MCP requests.

mod client;
mod db;
mod discovery;
mod error;
mod pkce;
mod registration;

pub use client::{AuthenticationRequired, OAuthClient, OAuthClientConfig};
pub use db::{InMemoryOAuthDb, OAuthDb, DEFAULT_ACCESS_TOKEN_TTL, PKCE_TTL};
pub use discovery::{discover, AuthorizationServer};
pub use error::OAuthError;
pub use pkce::{challenge_from_verifier, generate as generate_pkce, generate_state, PkcePair};
pub use registration::RegistrationLocks;
