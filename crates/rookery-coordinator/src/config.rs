//! Coordinator configuration.

use std::time::Duration;

/// Tunables for one coordinator instance.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
  /// A job whose stored attempt count exceeds this is marked FAILED and
  /// consumed without running its workflow. Failed jobs are retried only
  /// through re-discovery, so with the default of 1 a job gets its initial
  /// run plus one retry before being written off.
  pub max_job_attempts: u32,

  /// How often the dependency wait re-polls metadata.
  pub dependency_poll_interval: Duration,

  /// How long the dependency wait may poll before giving up.
  pub dependency_timeout: Duration,

  /// Cap on concurrently executing jobs in this instance.
  pub max_concurrent_jobs: usize,

  /// Lease TTL for per-job locks. Short, so a crashed holder's job frees
  /// itself quickly.
  pub lock_ttl: Duration,
}

impl Default for CoordinatorConfig {
  fn default() -> Self {
    Self {
      max_job_attempts: 1,
      dependency_poll_interval: Duration::from_secs(1),
      dependency_timeout: Duration::from_secs(300),
      max_concurrent_jobs: 32,
      lock_ttl: Duration::from_secs(1),
    }
  }
}
