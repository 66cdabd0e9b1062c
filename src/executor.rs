//! The pluggable request-execution capability.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{error::RequestError, outcome::Response, target::TargetDescriptor};

/// Executes one request against one target.
///
/// This is the only place where a run performs external I/O. Implementations
/// are shared by every worker and must be cheap to call concurrently; keep
/// connection pools and clients inside the executor.
///
/// The pool enforces `timeout` on its own as well, so an implementation that
/// ignores it still cannot hang a worker.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
///
/// use async_trait::async_trait;
/// use shooter::{RequestError, RequestExecutor, Response, TargetDescriptor};
///
/// struct Echo;
///
/// #[async_trait]
/// impl RequestExecutor for Echo {
///     async fn execute(&self, target: &TargetDescriptor, _: Duration) -> Result<Response, RequestError> {
///         Ok(Response::new(200, target.template.path.len() as u64))
///     }
/// }
/// ```
#[async_trait]
pub trait RequestExecutor: Send + Sync + 'static {
    /// Sends one request and waits for its response.
    async fn execute(&self, target: &TargetDescriptor, timeout: Duration) -> Result<Response, RequestError>;
}

#[async_trait]
impl<E: RequestExecutor + ?Sized> RequestExecutor for Arc<E> {
    async fn execute(&self, target: &TargetDescriptor, timeout: Duration) -> Result<Response, RequestError> {
        (**self).execute(target, timeout).await
    }
}
