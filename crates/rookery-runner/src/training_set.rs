//! Training-set creation runner.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use rookery_provider::{ProviderResolver, TrainingSetDef};

use crate::watcher::SpawnedWatcher;
use crate::{CompletionWatcher, Runner, RunnerError};

/// Serialized job specification for training-set creation.
///
/// Carries everything a worker needs to resolve the offline store on its own,
/// so the same bytes work for the in-process backend and a remote one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSetRunnerConfig {
  pub offline_type: String,
  pub offline_config: Vec<u8>,
  pub def: TrainingSetDef,
}

impl TrainingSetRunnerConfig {
  pub fn serialize(&self) -> Result<Vec<u8>, RunnerError> {
    serde_json::to_vec(self).map_err(|e| RunnerError::Config {
      message: e.to_string(),
    })
  }

  pub fn deserialize(bytes: &[u8]) -> Result<Self, RunnerError> {
    serde_json::from_slice(bytes).map_err(|e| RunnerError::Config {
      message: e.to_string(),
    })
  }
}

/// Creates a training set in the offline store named by its config.
pub struct TrainingSetRunner {
  pub resolver: Arc<dyn ProviderResolver>,
  pub config: TrainingSetRunnerConfig,
}

#[async_trait]
impl Runner for TrainingSetRunner {
  async fn run(&self) -> Result<Box<dyn CompletionWatcher>, RunnerError> {
    let provider = self
      .resolver
      .resolve(&self.config.offline_type, &self.config.offline_config)?;
    let store = provider.as_offline_store()?;
    let def = self.config.def.clone();

    let handle = tokio::spawn(async move {
      let table = def.id.table_name();
      store.create_training_set(def).await?;
      info!(table = %table, "training_set_created");
      Ok(())
    });

    Ok(Box::new(SpawnedWatcher::new(handle)))
  }
}

#[cfg(test)]
mod tests {
  use rookery_provider::{
    MemoryOfflineStore, OfflineResourceId, OfflineResourceType, Provider, StaticProviderResolver,
  };

  use super::*;

  #[tokio::test]
  async fn creates_training_set_via_resolved_store() {
    let offline = Arc::new(MemoryOfflineStore::new());
    let resolver = Arc::new(
      StaticProviderResolver::new()
        .register(Provider::offline("MEMORY_OFFLINE", offline.clone())),
    );

    let def = TrainingSetDef {
      id: OfflineResourceId::new("ts", "v1", OfflineResourceType::TrainingSet),
      label: OfflineResourceId::new("l", "v1", OfflineResourceType::Label),
      features: vec![OfflineResourceId::new(
        "f",
        "v1",
        OfflineResourceType::Feature,
      )],
    };
    let config = TrainingSetRunnerConfig {
      offline_type: "MEMORY_OFFLINE".to_string(),
      offline_config: Vec::new(),
      def: def.clone(),
    };

    let runner = TrainingSetRunner {
      resolver,
      config: TrainingSetRunnerConfig::deserialize(&config.serialize().unwrap()).unwrap(),
    };
    runner.run().await.unwrap().wait().await.unwrap();

    assert_eq!(offline.training_set(&def.id), Some(def));
  }
}
