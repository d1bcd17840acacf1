//! Rookery Provider
//!
//! Backing-store capability contracts. A [`Provider`] is resolved from a
//! provider type plus serialized config and exposes its capabilities through
//! [`Provider::as_offline_store`] and [`Provider::as_online_store`]; a
//! provider that lacks a capability reports it instead of panicking.
//!
//! The concrete SQL dialects live behind the [`OfflineStore`] trait and are
//! not part of this crate; [`MemoryOfflineStore`] and [`MemoryOnlineStore`]
//! implement the contracts in memory for tests and standalone mode.

mod error;
mod memory;
mod resolver;
mod types;

pub use error::ProviderError;
pub use memory::{MemoryOfflineStore, MemoryOnlineStore};
pub use resolver::{Provider, ProviderResolver, StaticProviderResolver};
pub use types::{
  FeatureRow, OfflineResourceId, OfflineResourceType, TransformationConfig, TrainingSetDef,
};

use async_trait::async_trait;

/// Batch/historical capability of a provider.
#[async_trait]
pub trait OfflineStore: Send + Sync {
  /// Create a transformation table by running the resolved query.
  async fn create_transformation(&self, config: TransformationConfig) -> Result<(), ProviderError>;

  /// Register an existing table in the backing store as a primary table.
  async fn register_primary_from_source_table(
    &self,
    id: &OfflineResourceId,
    source_table: &str,
  ) -> Result<(), ProviderError>;

  /// Check for an existing training set. `Ok(())` means it exists;
  /// [`ProviderError::NotFound`] means it does not.
  async fn get_training_set(&self, id: &OfflineResourceId) -> Result<(), ProviderError>;

  /// Materialize a training set from its definition.
  async fn create_training_set(&self, def: TrainingSetDef) -> Result<(), ProviderError>;

  /// Read the rows backing a feature, for materialization into an online
  /// store.
  async fn feature_rows(&self, id: &OfflineResourceId) -> Result<Vec<FeatureRow>, ProviderError>;
}

/// Low-latency point-lookup capability of a provider.
#[async_trait]
pub trait OnlineStore: Send + Sync + std::fmt::Debug {
  /// Write one entity's value for a feature variant.
  async fn set(
    &self,
    feature: &str,
    variant: &str,
    entity: &str,
    value: serde_json::Value,
  ) -> Result<(), ProviderError>;

  /// Read one entity's value for a feature variant.
  async fn get(
    &self,
    feature: &str,
    variant: &str,
    entity: &str,
  ) -> Result<serde_json::Value, ProviderError>;
}
