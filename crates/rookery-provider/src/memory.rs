//! In-memory offline and online stores.
//!
//! These record the operations the coordinator issues instead of executing
//! SQL, which makes them both the standalone-mode backend and the
//! instrumentation used by the integration tests (invocation counts, created
//! tables, written values).

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::{FeatureRow, OfflineResourceId, TransformationConfig, TrainingSetDef};
use crate::{OfflineStore, OnlineStore};

#[derive(Default)]
struct OfflineInner {
  /// target table name -> source table it was registered from
  primary_tables: HashMap<String, String>,
  /// target table name -> resolved query
  transformations: HashMap<String, String>,
  training_sets: HashMap<String, TrainingSetDef>,
  feature_data: HashMap<(String, String), Vec<FeatureRow>>,
}

/// An in-memory [`OfflineStore`].
#[derive(Default)]
pub struct MemoryOfflineStore {
  inner: Mutex<OfflineInner>,
  transformation_calls: AtomicUsize,
  register_primary_calls: AtomicUsize,
}

impl MemoryOfflineStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Seed the rows backing a feature, for materialization tests.
  pub fn seed_feature_rows(&self, name: &str, variant: &str, rows: Vec<FeatureRow>) {
    let mut inner = self.inner.lock().expect("offline store lock poisoned");
    inner
      .feature_data
      .insert((name.to_string(), variant.to_string()), rows);
  }

  /// Pre-create a training set, for duplicate-detection tests.
  pub fn seed_training_set(&self, def: TrainingSetDef) {
    let mut inner = self.inner.lock().expect("offline store lock poisoned");
    inner.training_sets.insert(def.id.table_name(), def);
  }

  pub fn transformation_query(&self, id: &OfflineResourceId) -> Option<String> {
    let inner = self.inner.lock().expect("offline store lock poisoned");
    inner.transformations.get(&id.table_name()).cloned()
  }

  pub fn primary_source_table(&self, id: &OfflineResourceId) -> Option<String> {
    let inner = self.inner.lock().expect("offline store lock poisoned");
    inner.primary_tables.get(&id.table_name()).cloned()
  }

  pub fn training_set(&self, id: &OfflineResourceId) -> Option<TrainingSetDef> {
    let inner = self.inner.lock().expect("offline store lock poisoned");
    inner.training_sets.get(&id.table_name()).cloned()
  }

  /// How many times `create_transformation` has been invoked.
  pub fn transformation_calls(&self) -> usize {
    self.transformation_calls.load(Ordering::SeqCst)
  }

  /// How many times `register_primary_from_source_table` has been invoked.
  pub fn register_primary_calls(&self) -> usize {
    self.register_primary_calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl OfflineStore for MemoryOfflineStore {
  async fn create_transformation(&self, config: TransformationConfig) -> Result<(), ProviderError> {
    self.transformation_calls.fetch_add(1, Ordering::SeqCst);
    let mut inner = self.inner.lock().expect("offline store lock poisoned");
    inner
      .transformations
      .insert(config.target.table_name(), config.query);
    Ok(())
  }

  async fn register_primary_from_source_table(
    &self,
    id: &OfflineResourceId,
    source_table: &str,
  ) -> Result<(), ProviderError> {
    self.register_primary_calls.fetch_add(1, Ordering::SeqCst);
    let mut inner = self.inner.lock().expect("offline store lock poisoned");
    inner
      .primary_tables
      .insert(id.table_name(), source_table.to_string());
    Ok(())
  }

  async fn get_training_set(&self, id: &OfflineResourceId) -> Result<(), ProviderError> {
    let inner = self.inner.lock().expect("offline store lock poisoned");
    if inner.training_sets.contains_key(&id.table_name()) {
      Ok(())
    } else {
      Err(ProviderError::NotFound {
        what: "training set",
        name: id.table_name(),
      })
    }
  }

  async fn create_training_set(&self, def: TrainingSetDef) -> Result<(), ProviderError> {
    let mut inner = self.inner.lock().expect("offline store lock poisoned");
    let table = def.id.table_name();
    if inner.training_sets.contains_key(&table) {
      return Err(ProviderError::AlreadyExists {
        what: "training set",
        name: table,
      });
    }
    inner.training_sets.insert(table, def);
    Ok(())
  }

  async fn feature_rows(&self, id: &OfflineResourceId) -> Result<Vec<FeatureRow>, ProviderError> {
    let inner = self.inner.lock().expect("offline store lock poisoned");
    inner
      .feature_data
      .get(&(id.name.clone(), id.variant.clone()))
      .cloned()
      .ok_or_else(|| ProviderError::NotFound {
        what: "feature data",
        name: format!("{}.{}", id.name, id.variant),
      })
  }
}

/// An in-memory [`OnlineStore`].
#[derive(Debug, Default)]
pub struct MemoryOnlineStore {
  values: Mutex<HashMap<(String, String, String), serde_json::Value>>,
}

impl MemoryOnlineStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.values.lock().expect("online store lock poisoned").len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[async_trait]
impl OnlineStore for MemoryOnlineStore {
  async fn set(
    &self,
    feature: &str,
    variant: &str,
    entity: &str,
    value: serde_json::Value,
  ) -> Result<(), ProviderError> {
    let mut values = self.values.lock().expect("online store lock poisoned");
    values.insert(
      (feature.to_string(), variant.to_string(), entity.to_string()),
      value,
    );
    Ok(())
  }

  async fn get(
    &self,
    feature: &str,
    variant: &str,
    entity: &str,
  ) -> Result<serde_json::Value, ProviderError> {
    let values = self.values.lock().expect("online store lock poisoned");
    values
      .get(&(feature.to_string(), variant.to_string(), entity.to_string()))
      .cloned()
      .ok_or_else(|| ProviderError::NotFound {
        what: "online value",
        name: format!("{feature}.{variant}/{entity}"),
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::OfflineResourceType;

  #[tokio::test]
  async fn create_training_set_rejects_duplicates() {
    let store = MemoryOfflineStore::new();
    let def = TrainingSetDef {
      id: OfflineResourceId::new("ts", "v1", OfflineResourceType::TrainingSet),
      label: OfflineResourceId::new("l", "v1", OfflineResourceType::Label),
      features: vec![],
    };

    assert!(store.get_training_set(&def.id).await.is_err());
    store.create_training_set(def.clone()).await.unwrap();
    assert!(store.get_training_set(&def.id).await.is_ok());

    let err = store.create_training_set(def).await.unwrap_err();
    assert!(matches!(err, ProviderError::AlreadyExists { .. }));
  }

  #[tokio::test]
  async fn online_store_round_trips_values() {
    let store = MemoryOnlineStore::new();
    store
      .set("f", "v1", "user-1", serde_json::json!(42.5))
      .await
      .unwrap();
    let value = store.get("f", "v1", "user-1").await.unwrap();
    assert_eq!(value, serde_json::json!(42.5));
  }
}
