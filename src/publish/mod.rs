//! Batch delivery.
//!
//! The [`Publisher`] trait is the seam between the aggregation loop and the
//! outside world. [`http::HttpPublisher`] is the real implementation; tests
//! substitute their own.

pub mod http;

use crate::aggregator::Batch;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// A batch that reached the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub status: u16,
    pub body: String,
}

impl Delivery {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Errors from delivering a batch.
#[derive(Error, Debug)]
pub enum PublishError {
    /// The request could not be built or sent, or the response not read.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// Configuration rejected when creating the publisher.
    #[error("Invalid publisher configuration: {0}")]
    Config(String),
}

/// Boxed future returned by [`Publisher::publish`].
pub type PublishFuture<'a> = Pin<Box<dyn Future<Output = Result<Delivery, PublishError>> + Send + 'a>>;

/// Delivers batches. Implementations must be shareable across the publish
/// tasks spawned by the run loop.
pub trait Publisher: Send + Sync {
    fn publish<'a>(&'a self, batch: &'a Batch) -> PublishFuture<'a>;
}
