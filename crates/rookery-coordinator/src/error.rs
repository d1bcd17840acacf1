//! Coordinator errors.

use rookery_coordination::CoordinationError;
use rookery_metadata::MetadataError;
use rookery_provider::ProviderError;
use rookery_runner::RunnerError;

/// Errors from job discovery, locking, and workflow execution.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
  /// A coordination-service operation failed; includes lock acquisition
  /// failures and lost-ownership aborts.
  #[error(transparent)]
  Coordination(#[from] CoordinationError),

  /// A metadata call failed.
  #[error(transparent)]
  Metadata(#[from] MetadataError),

  /// Provider resolution or a store operation failed.
  #[error(transparent)]
  Provider(#[from] ProviderError),

  /// A runner failed to start or complete.
  #[error(transparent)]
  Runner(#[from] RunnerError),

  /// The job record is gone; a racing coordinator already completed it.
  #[error("job '{key}' does not exist")]
  JobNotFound { key: String },

  /// Zero keys were deleted; the job record was already removed.
  #[error("job '{key}' already deleted")]
  JobAlreadyDeleted { key: String },

  /// The job record bytes could not be parsed.
  #[error("could not deserialize job record for '{key}': {message}")]
  Serialization { key: String, message: String },

  /// An upstream source has not reached READY.
  #[error("source '{name}.{variant}' not ready")]
  DependencyNotReady { name: String, variant: String },

  /// An upstream source reached FAILED; the workflow cannot succeed.
  #[error("source '{name}.{variant}' failed")]
  DependencyFailed { name: String, variant: String },

  /// Upstream sources did not become ready within the configured wait.
  #[error("upstream sources not ready after {waited_secs}s")]
  DependencyTimeout { waited_secs: u64 },

  /// A template escape references a key with no mapping.
  #[error("no table mapping for template key '{key}'")]
  UnresolvedReference { key: String },

  /// A template escape is malformed (unterminated, or missing the
  /// name.variant separator where one is required).
  #[error("malformed template reference '{key}'")]
  MalformedReference { key: String },

  /// A primary-table registration with no source table name set.
  #[error("source '{name}.{variant}' has no source table name")]
  MissingSourceName { name: String, variant: String },

  /// The job references a resource kind with no workflow.
  #[error("resource kind '{kind}' has no workflow")]
  UnsupportedResourceType { kind: &'static str },

  /// The training set already exists in the offline store.
  #[error("training set '{name}.{variant}' already exists")]
  AlreadyExists { name: String, variant: String },

  /// The resource is already READY or FAILED; duplicate trigger.
  #[error("{kind} '{name}.{variant}' already set to {status}")]
  AlreadyTerminal {
    kind: &'static str,
    name: String,
    variant: String,
    status: String,
  },

  /// Workflow wrapper: which job failed and why.
  #[error("{kind} job for '{name}.{variant}' failed")]
  WorkflowExecution {
    kind: &'static str,
    name: String,
    variant: String,
    #[source]
    source: Box<CoordinatorError>,
  },

  /// A background task observed an unrecoverable condition.
  #[error("coordinator instance shut down: {reason}")]
  Fatal { reason: String },

  /// A lock release failed, leaving the session ambiguous. Fatal to the
  /// coordinator instance.
  #[error("lock release failed for job '{key}'")]
  LockReleaseFailed {
    key: String,
    #[source]
    source: CoordinationError,
  },
}

impl CoordinatorError {
  /// True when the instance must stop: an ambiguous lock session or a dead
  /// watch subscription cannot be recovered in-process.
  pub fn is_fatal(&self) -> bool {
    matches!(
      self,
      Self::Fatal { .. }
        | Self::LockReleaseFailed { .. }
        | Self::Coordination(CoordinationError::WatchClosed { .. })
    )
  }
}
