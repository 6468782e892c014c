//! Reqwest middleware for transparent ATXP payment and OAuth remediation.
//!
//! [`Interceptor`] wraps a `reqwest` client and automatically resolves two
//! kinds of remediable failures on an MCP request: a `401` naming a resource
//! server to authorize against (spec §4.2), and an MCP payment-required
//! signal naming a payment-request record to pay and settle (spec §4.4). On
//! success it retries the original request exactly once.
//!
//! ## Quickstart
//!
//! ```rust,ignore
//! use atxp_reqwest::{Interceptor, InterceptorExt};
//! use atxp_oauth::{InMemoryOAuthDb, OAuthClient, OAuthClientConfig};
//! use atxp_payment::PaymentPipeline;
//! use reqwest::Client;
//!
//! let oauth = OAuthClient::new(Client::new(), Box::new(InMemoryOAuthDb::new()), config);
//! let pipeline = PaymentPipeline::new(Client::new(), makers, mappers, |_| true);
//! let interceptor = Interceptor::new("bdj", oauth, pipeline);
//!
//! let http_client = Client::new().with_atxp(interceptor).build();
//! let response = http_client.post("https://example.com/mcp").send().await?;
//! ```

mod builder;
mod error;
mod interceptor;

pub use builder::{InterceptorBuilder, InterceptorExt};
pub use error::InterceptError;
pub use interceptor::{AuthorizeFailureObserver, AuthorizeObserver, Interceptor, PaymentFailureObserver};
