//! JSON-over-HTTP batch publisher.

use super::{Delivery, PublishError, PublishFuture, Publisher};
use crate::aggregator::Batch;
use reqwest::{Client, Method, Url};
use std::time::Duration;

/// Request method used to send batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum HttpMethod {
    #[default]
    Post,
    Put,
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
        }
    }
}

/// Sends each batch as a JSON request body.
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    client: Client,
    url: Url,
    method: Method,
}

impl HttpPublisher {
    /// Build a publisher for `url`.
    ///
    /// `timeout` bounds each request. With `accept_invalid_certs` the TLS
    /// certificate of the endpoint is not verified, for endpoints using
    /// self-signed certificates.
    pub fn new(
        url: Url,
        method: HttpMethod,
        timeout: Duration,
        accept_invalid_certs: bool,
    ) -> Result<Self, PublishError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PublishError::Config(format!(
                "unsupported URL scheme '{}'",
                url.scheme()
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            url,
            method: method.into(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Publisher for HttpPublisher {
    fn publish<'a>(&'a self, batch: &'a Batch) -> PublishFuture<'a> {
        Box::pin(async move {
            let response = self
                .client
                .request(self.method.clone(), self.url.clone())
                .json(batch)
                .send()
                .await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok(Delivery { status, body })
        })
    }
}
