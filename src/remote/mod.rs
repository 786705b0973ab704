//! Backend collaborator: the reqwest client and the seams the rest of the crate talks to.

pub mod api_types;
mod client;
mod http;

use async_trait::async_trait;
use color_eyre::Result;
use std::sync::Arc;

use crate::queue::PendingSubmission;

pub use client::BackendClient;
pub use http::{Method, Request, Response};

/// Anything that can answer a request on behalf of the backend.
#[async_trait]
pub trait Upstream: Send + Sync {
  /// Send a request. Errors mean the backend could not be reached;
  /// non-2xx answers are returned as responses.
  async fn send(&self, request: &Request) -> Result<Response>;
}

/// Destination of replayed submissions.
#[async_trait]
pub trait SubmissionSink: Send + Sync {
  /// Write a submission and its photos. Must be idempotent per submission id.
  async fn push_submission(&self, submission: &PendingSubmission) -> Result<()>;
}

#[async_trait]
impl<T: SubmissionSink + ?Sized> SubmissionSink for Arc<T> {
  async fn push_submission(&self, submission: &PendingSubmission) -> Result<()> {
    (**self).push_submission(submission).await
  }
}
