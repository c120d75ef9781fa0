//! Executor seam between the processor and the remote API.

use std::future::Future;

use async_trait::async_trait;

use crate::op::OperationRecord;

/// Failure reported by an executor; its message becomes `last_error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ExecutorError {
    message: String,
}

impl ExecutorError {
    /// Wraps a failure message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for ExecutorError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for ExecutorError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Performs the remote side effect of one queued operation.
///
/// Implementations enforce their own transport timeouts; the processor also
/// applies `QueueConfig::execute_timeout_ms` when set.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Applies `op` remotely.
    async fn execute(&self, op: &OperationRecord) -> Result<(), ExecutorError>;
}

/// Any `Fn(OperationRecord) -> impl Future` closure is an executor.
#[async_trait]
impl<F, Fut> Executor for F
where
    F: Fn(OperationRecord) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ExecutorError>> + Send + 'static,
{
    async fn execute(&self, op: &OperationRecord) -> Result<(), ExecutorError> {
        (self)(op.clone()).await
    }
}
