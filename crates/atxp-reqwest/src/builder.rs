//! Builder utilities for attaching the [`Interceptor`] to a `reqwest` client,
//! modeled on the reference payment-rail client's `ReqwestWithPaymentsBuilder`.

use reqwest::{Client, ClientBuilder};
use reqwest_middleware as rqm;

use crate::interceptor::Interceptor;

/// Adds [`Interceptor`] middleware to a `reqwest` client or builder.
pub trait InterceptorExt<A> {
    fn with_atxp(self, interceptor: Interceptor) -> InterceptorBuilder<A>;
}

impl InterceptorExt<Client> for Client {
    fn with_atxp(self, interceptor: Interceptor) -> InterceptorBuilder<Client> {
        InterceptorBuilder {
            inner: self,
            interceptor,
        }
    }
}

impl InterceptorExt<ClientBuilder> for ClientBuilder {
    fn with_atxp(self, interceptor: Interceptor) -> InterceptorBuilder<ClientBuilder> {
        InterceptorBuilder {
            inner: self,
            interceptor,
        }
    }
}

/// Builder for a `reqwest` client wrapped with ATXP's OAuth/payment middleware.
pub struct InterceptorBuilder<A> {
    inner: A,
    interceptor: Interceptor,
}

impl InterceptorBuilder<Client> {
    pub fn build(self) -> rqm::ClientWithMiddleware {
        rqm::ClientBuilder::new(self.inner).with(self.interceptor).build()
    }
}

impl InterceptorBuilder<ClientBuilder> {
    pub fn build(self) -> Result<rqm::ClientWithMiddleware, reqwest::Error> {
        let client = self.inner.build()?;
        Ok(rqm::ClientBuilder::new(client).with(self.interceptor).build())
    }
}
