//! Rookery Coordination
//!
//! Client contract against the distributed coordination service: a
//! consensus-backed key-value store with lease-bound mutexes and prefix
//! watches. Job discovery, mutual exclusion, and crash recovery all flow
//! through this seam.
//!
//! [`EtcdCoordination`] is the production backend. [`InMemoryCoordination`]
//! exists for tests only; multi-instance deployments require a real
//! coordination service because the lock table is the cluster-wide source
//! of mutual-exclusion truth.

mod etcd;
mod memory;

pub use etcd::EtcdCoordination;
pub use memory::InMemoryCoordination;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Errors from coordination-service operations.
#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
  /// The lock could not be acquired.
  #[error("failed to acquire lock '{key}': {message}")]
  LockAcquisition { key: String, message: String },

  /// The lock's lease lapsed or was taken over; the guarded operation did
  /// not run.
  #[error("no longer owner of lock '{key}'")]
  NotOwner { key: String },

  /// Releasing a lock failed, leaving the session ambiguous.
  #[error("failed to release lock '{key}': {message}")]
  ReleaseFailed { key: String, message: String },

  /// The watch subscription ended.
  #[error("watch on '{prefix}' closed: {message}")]
  WatchClosed { prefix: String, message: String },

  /// The coordination service itself failed.
  #[error("coordination backend error: {message}")]
  Backend { message: String },
}

/// A change observed on a watched key prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
  /// A key was created. The only event that schedules work.
  Created { key: String, value: Vec<u8> },
  /// An existing key was overwritten.
  Updated { key: String },
  /// A key was deleted.
  Deleted { key: String },
}

/// A held, lease-bound mutex.
///
/// Every state-changing operation is a single transaction conditioned on
/// "this session still owns the lock"; a lapsed lease surfaces as
/// [`CoordinationError::NotOwner`] with no mutation performed. This is what
/// keeps a stale holder and its fresh successor from both mutating the same
/// job record.
#[async_trait]
pub trait HeldLock: Send + Sync {
  /// Read a key, guarded by lock ownership.
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoordinationError>;

  /// Write a key, guarded by lock ownership.
  async fn put(&self, key: &str, value: &[u8]) -> Result<(), CoordinationError>;

  /// Delete a key, guarded by lock ownership. Returns whether the key
  /// existed.
  async fn delete(&self, key: &str) -> Result<bool, CoordinationError>;

  /// Release the lock and end its session.
  async fn release(&self) -> Result<(), CoordinationError>;
}

/// Client contract against the coordination service.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
  /// Write a key unconditionally. Used by the enqueue path, not by
  /// workflow execution.
  async fn put(&self, key: &str, value: &[u8]) -> Result<(), CoordinationError>;

  /// List all keys under a prefix with their values.
  async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, CoordinationError>;

  /// Subscribe to changes under a prefix. The stream ends only on
  /// subscription failure, which the caller must treat as fatal.
  async fn watch_prefix(
    &self,
    prefix: &str,
  ) -> Result<mpsc::Receiver<WatchEvent>, CoordinationError>;

  /// Open a session bound to a lease of roughly `ttl` and block until the
  /// named mutex is acquired. The lease is renewed for as long as the
  /// holder is alive; a crashed holder's lock frees itself on expiry.
  async fn lock(&self, key: &str, ttl: Duration) -> Result<Box<dyn HeldLock>, CoordinationError>;
}
