//! Rookery Runner
//!
//! Execution backends for the coordinator's heavyweight work. A [`Runner`]
//! starts a task and hands back a [`CompletionWatcher`], a blocking handle
//! for its success or failure; a [`JobSpawner`] selects the backend (the
//! in-process [`MemoryJobSpawner`] here, a remote worker pool elsewhere)
//! for a serialized job spec.

mod error;
mod materialize;
mod spawner;
mod training_set;
mod watcher;

pub use error::RunnerError;
pub use materialize::MaterializeRunner;
pub use spawner::{JobKind, JobSpawner, MemoryJobSpawner};
pub use training_set::{TrainingSetRunner, TrainingSetRunnerConfig};
pub use watcher::SpawnedWatcher;

use async_trait::async_trait;

/// Blocking handle for a running task.
#[async_trait]
pub trait CompletionWatcher: Send + Sync {
  /// Block until the underlying task finishes or fails.
  async fn wait(&self) -> Result<(), RunnerError>;
}

/// A unit of heavyweight compute, possibly executing remotely.
#[async_trait]
pub trait Runner: Send + Sync {
  /// Start the task. The returned watcher observes its completion.
  async fn run(&self) -> Result<Box<dyn CompletionWatcher>, RunnerError>;
}
