//! The job spawner seam: which backend executes a serialized job spec.

use std::fmt;
use std::sync::Arc;

use rookery_provider::ProviderResolver;

use crate::training_set::{TrainingSetRunner, TrainingSetRunnerConfig};
use crate::{Runner, RunnerError};

/// The kinds of heavyweight jobs a spawner can be asked to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
  CreateTrainingSet,
}

impl fmt::Display for JobKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::CreateTrainingSet => f.write_str("CREATE_TRAINING_SET"),
    }
  }
}

/// Selects an execution backend for a job specification.
///
/// The coordinator never constructs runners directly; a remote backend (a
/// container-based worker pool) implements the same trait.
pub trait JobSpawner: Send + Sync {
  fn get_job_runner(
    &self,
    kind: JobKind,
    serialized_config: &[u8],
  ) -> Result<Box<dyn Runner>, RunnerError>;
}

/// In-process spawner: runs jobs as tokio tasks inside the coordinator.
pub struct MemoryJobSpawner {
  resolver: Arc<dyn ProviderResolver>,
}

impl MemoryJobSpawner {
  pub fn new(resolver: Arc<dyn ProviderResolver>) -> Self {
    Self { resolver }
  }
}

impl JobSpawner for MemoryJobSpawner {
  fn get_job_runner(
    &self,
    kind: JobKind,
    serialized_config: &[u8],
  ) -> Result<Box<dyn Runner>, RunnerError> {
    match kind {
      JobKind::CreateTrainingSet => {
        let config = TrainingSetRunnerConfig::deserialize(serialized_config)?;
        Ok(Box::new(TrainingSetRunner {
          resolver: self.resolver.clone(),
          config,
        }))
      }
    }
  }
}
