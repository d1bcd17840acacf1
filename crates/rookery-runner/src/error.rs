//! Runner errors.

use rookery_provider::ProviderError;

/// Errors from runner construction and execution.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
  /// The serialized job config could not be parsed.
  #[error("invalid runner config: {message}")]
  Config { message: String },

  /// The underlying store operation failed.
  #[error("runner store operation failed")]
  Store(#[from] ProviderError),

  /// The task panicked or was aborted before completing.
  #[error("runner task did not complete: {message}")]
  Aborted { message: String },

  /// The completion watcher was waited on more than once.
  #[error("completion already consumed")]
  AlreadyWaited,
}
