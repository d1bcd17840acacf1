//! The durable job record and its coordination-service key scheme.

use serde::{Deserialize, Serialize};

use crate::types::ResourceId;

/// Prefix under which every job record lives in the coordination service.
pub const JOB_PREFIX: &str = "JOB_";

/// A durable work item: a resource that still needs orchestrated execution.
///
/// Created by the resource-registration path, incremented by the coordinator
/// before each execution attempt, and deleted only on successful completion.
/// A record that is never deleted remains an at-least-once work item for the
/// next watcher pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorJob {
  pub resource: ResourceId,
  pub attempts: u32,
}

impl CoordinatorJob {
  pub fn new(resource: ResourceId) -> Self {
    Self {
      resource,
      attempts: 0,
    }
  }

  pub fn serialize(&self) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(self)
  }

  pub fn deserialize(bytes: &[u8]) -> Result<Self, serde_json::Error> {
    serde_json::from_slice(bytes)
  }
}

impl ResourceId {
  /// The coordination-service key under which this resource's job record is
  /// stored.
  pub fn job_key(&self) -> String {
    format!(
      "JOB__{}__{}__{}",
      self.kind.as_str(),
      self.name,
      self.variant
    )
  }
}

/// The key of the distributed lock guarding one job's execution.
pub fn lock_key(job_key: &str) -> String {
  format!("LOCK_{job_key}")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::ResourceKind;

  #[test]
  fn job_key_carries_the_job_prefix() {
    let id = ResourceId::new("raw", "v1", ResourceKind::Source);
    let key = id.job_key();
    assert!(key.starts_with(JOB_PREFIX));
    assert_eq!(key, "JOB__SOURCE_VARIANT__raw__v1");
    assert_eq!(lock_key(&key), "LOCK_JOB__SOURCE_VARIANT__raw__v1");
  }

  #[test]
  fn job_record_round_trips() {
    let job = CoordinatorJob::new(ResourceId::new("f", "v1", ResourceKind::Feature));
    let bytes = job.serialize().unwrap();
    assert_eq!(CoordinatorJob::deserialize(&bytes).unwrap(), job);
  }
}
