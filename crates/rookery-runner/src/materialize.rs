//! Feature materialization: offline rows into the online store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use rookery_provider::{FeatureRow, OfflineResourceId, OfflineStore, OnlineStore};

use crate::watcher::SpawnedWatcher;
use crate::{CompletionWatcher, Runner, RunnerError};

/// Copies a feature's values from an offline store into an online store,
/// deduplicated per entity to the value at the latest timestamp.
pub struct MaterializeRunner {
  pub offline: Arc<dyn OfflineStore>,
  pub online: Arc<dyn OnlineStore>,
  pub id: OfflineResourceId,
}

#[async_trait]
impl Runner for MaterializeRunner {
  async fn run(&self) -> Result<Box<dyn CompletionWatcher>, RunnerError> {
    let offline = self.offline.clone();
    let online = self.online.clone();
    let id = self.id.clone();

    let handle = tokio::spawn(async move {
      let rows = offline.feature_rows(&id).await?;
      let total = rows.len();
      let latest = latest_per_entity(rows);

      debug!(
        feature = %id.name,
        variant = %id.variant,
        rows = total,
        entities = latest.len(),
        "materialization_deduplicated"
      );

      for (entity, row) in latest {
        online.set(&id.name, &id.variant, &entity, row.value).await?;
      }

      info!(
        feature = %id.name,
        variant = %id.variant,
        "materialization_completed"
      );
      Ok(())
    });

    Ok(Box::new(SpawnedWatcher::new(handle)))
  }
}

/// Keep, for each entity, the row with the latest timestamp.
fn latest_per_entity(rows: Vec<FeatureRow>) -> HashMap<String, FeatureRow> {
  let mut latest: HashMap<String, FeatureRow> = HashMap::new();
  for row in rows {
    match latest.get(&row.entity) {
      Some(existing) if existing.timestamp >= row.timestamp => {}
      _ => {
        latest.insert(row.entity.clone(), row);
      }
    }
  }
  latest
}
