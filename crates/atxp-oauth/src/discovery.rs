//! Authorization-server discovery via OAuth2 Protected Resource Metadata,
//! with the resource-host fallback and allow-list enforcement (spec §4.2).

use crate::error::OAuthError;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

#[derive(Debug, Deserialize)]
struct ProtectedResourceMetadata {
    authorization_servers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorizationServerMetadata {
    issuer: String,
    #[serde(default)]
    authorization_endpoint: Option<String>,
    #[serde(default)]
    token_endpoint: Option<String>,
    #[serde(default)]
    registration_endpoint: Option<String>,
}

/// The authorization server's resolved, allow-list-checked endpoints.
#[derive(Debug, Clone)]
pub struct AuthorizationServer {
    pub issuer: Url,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub registration_endpoint: Option<Url>,
}

fn protected_resource_metadata_url(resource_url: &Url) -> Url {
    let mut prm = resource_url.clone();
    prm.set_query(None);
    prm.set_fragment(None);
    prm.set_path(&format!(
        "/.well-known/oauth-protected-resource{}",
        resource_url.path()
    ));
    prm
}

fn authorization_server_metadata_url(origin: &Url) -> Url {
    let mut meta = origin.clone();
    meta.set_query(None);
    meta.set_fragment(None);
    meta.set_path("/.well-known/oauth-authorization-server");
    meta
}

/// Runs the full discovery fallback chain described in spec §4.2 and checks the
/// resolved issuer against `allowed_issuers`. `strict` disables the resource-host
/// fallback when the PRM document is missing (404).
#[cfg_attr(feature = "telemetry", tracing::instrument(skip(http, allowed_issuers), fields(%resource_url)))]
pub async fn discover(
    http: &Client,
    resource_url: &Url,
    strict: bool,
    allowed_issuers: &[String],
) -> Result<AuthorizationServer, OAuthError> {
    let issuer_url = resolve_issuer(http, resource_url, strict).await?;

    let issuer_origin = format!(
        "{}://{}{}",
        issuer_url.scheme(),
        issuer_url.host_str().unwrap_or_default(),
        issuer_url
            .port()
            .map(|p| format!(":{p}"))
            .unwrap_or_default()
    );
    if !allowed_issuers.iter().any(|allowed| allowed == &issuer_origin || allowed == issuer_url.as_str()) {
        return Err(OAuthError::UnknownAuthorizationServer { issuer: issuer_url });
    }

    let as_metadata_url = authorization_server_metadata_url(&issuer_url);
    let response = http
        .get(as_metadata_url.clone())
        .send()
        .await
        .map_err(OAuthError::Http)?;
    if !response.status().is_success() {
        return Err(OAuthError::DiscoveryFailed {
            resource_url: resource_url.to_string(),
            reason: format!(
                "authorization server metadata at {as_metadata_url} returned {}",
                response.status()
            ),
        });
    }
    let metadata: AuthorizationServerMetadata = response.json().await.map_err(OAuthError::Http)?;

    let issuer = Url::parse(&metadata.issuer).map_err(|e| OAuthError::DiscoveryFailed {
        resource_url: resource_url.to_string(),
        reason: format!("invalid issuer URL in metadata: {e}"),
    })?;
    let authorization_endpoint = metadata
        .authorization_endpoint
        .as_deref()
        .map(Url::parse)
        .transpose()
        .map_err(|e| OAuthError::DiscoveryFailed {
            resource_url: resource_url.to_string(),
            reason: format!("invalid authorization_endpoint: {e}"),
        })?
        .unwrap_or_else(|| issuer.join("authorize").unwrap());
    let token_endpoint = metadata
        .token_endpoint
        .as_deref()
        .map(Url::parse)
        .transpose()
        .map_err(|e| OAuthError::DiscoveryFailed {
            resource_url: resource_url.to_string(),
            reason: format!("invalid token_endpoint: {e}"),
        })?
        .unwrap_or_else(|| issuer.join("token").unwrap());
    let registration_endpoint = metadata
        .registration_endpoint
        .as_deref()
        .map(Url::parse)
        .transpose()
        .map_err(|e| OAuthError::DiscoveryFailed {
            resource_url: resource_url.to_string(),
            reason: format!("invalid registration_endpoint: {e}"),
        })?;

    Ok(AuthorizationServer {
        issuer,
        authorization_endpoint,
        token_endpoint,
        registration_endpoint,
    })
}

async fn resolve_issuer(http: &Client, resource_url: &Url, strict: bool) -> Result<Url, OAuthError> {
    let prm_url = protected_resource_metadata_url(resource_url);
    let prm_response = http.get(prm_url.clone()).send().await.map_err(OAuthError::Http)?;

    if prm_response.status().is_success() {
        let metadata: ProtectedResourceMetadata =
            prm_response.json().await.map_err(OAuthError::Http)?;
        let first = metadata.authorization_servers.into_iter().next().ok_or_else(|| {
            OAuthError::DiscoveryFailed {
                resource_url: resource_url.to_string(),
                reason: "protected resource metadata contained no authorization_servers entries".into(),
            }
        })?;
        return Url::parse(&first).map_err(|e| OAuthError::DiscoveryFailed {
            resource_url: resource_url.to_string(),
            reason: format!("invalid authorization server URL {first}: {e}"),
        });
    }

    if prm_response.status().as_u16() != 404 {
        return Err(OAuthError::DiscoveryFailed {
            resource_url: resource_url.to_string(),
            reason: format!("protected resource metadata returned {}", prm_response.status()),
        });
    }
    if strict {
        return Err(OAuthError::DiscoveryFailed {
            resource_url: resource_url.to_string(),
            reason: "protected resource metadata returned 404 and strict discovery is enabled".into(),
        });
    }

    let mut origin = resource_url.clone();
    origin.set_path("");
    origin.set_query(None);
    origin.set_fragment(None);
    let fallback_url = authorization_server_metadata_url(&origin);
    let fallback_response = http
        .get(fallback_url.clone())
        .send()
        .await
        .map_err(OAuthError::Http)?;
    if !fallback_response.status().is_success() {
        return Err(OAuthError::DiscoveryFailed {
            resource_url: resource_url.to_string(),
            reason: format!("resource-host fallback {fallback_url} returned {}", fallback_response.status()),
        });
    }
    let metadata: AuthorizationServerMetadata =
        fallback_response.json().await.map_err(OAuthError::Http)?;
    Url::parse(&metadata.issuer).map_err(|e| OAuthError::DiscoveryFailed {
        resource_url: resource_url.to_string(),
        reason: format!("invalid issuer URL in fallback metadata: {e}"),
    })
}
