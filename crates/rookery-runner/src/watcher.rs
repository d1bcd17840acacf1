//! Completion watcher over a spawned tokio task.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::{CompletionWatcher, RunnerError};

/// A [`CompletionWatcher`] wrapping the join handle of a spawned task.
pub struct SpawnedWatcher {
  handle: Mutex<Option<JoinHandle<Result<(), RunnerError>>>>,
}

impl SpawnedWatcher {
  pub fn new(handle: JoinHandle<Result<(), RunnerError>>) -> Self {
    Self {
      handle: Mutex::new(Some(handle)),
    }
  }
}

#[async_trait]
impl CompletionWatcher for SpawnedWatcher {
  async fn wait(&self) -> Result<(), RunnerError> {
    let handle = self
      .handle
      .lock()
      .await
      .take()
      .ok_or(RunnerError::AlreadyWaited)?;
    handle.await.map_err(|e| RunnerError::Aborted {
      message: e.to_string(),
    })?
  }
}
