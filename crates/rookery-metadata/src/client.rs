//! The metadata client contract.

use async_trait::async_trait;

use crate::types::{
  FeatureVariant, LabelVariant, NameVariant, ProviderEntry, ResourceId, SourceVariant,
  TrainingSetVariant,
};

/// Error type for metadata operations.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
  /// The requested resource does not exist.
  #[error("{kind} '{name}.{variant}' not found")]
  NotFound {
    kind: &'static str,
    name: String,
    variant: String,
  },

  /// The requested provider entry does not exist.
  #[error("provider '{name}' not found")]
  ProviderNotFound { name: String },

  /// The metadata service failed.
  #[error("metadata backend error: {message}")]
  Backend { message: String },
}

impl MetadataError {
  pub fn not_found(kind: &'static str, nv: &NameVariant) -> Self {
    Self::NotFound {
      kind,
      name: nv.name.clone(),
      variant: nv.variant.clone(),
    }
  }
}

/// Client contract against the authoritative metadata service.
///
/// Status writes are last-writer-wins; only the lock holder for a resource's
/// job is expected to write its status during the job's lifetime.
#[async_trait]
pub trait MetadataClient: Send + Sync {
  /// Fetch a source variant.
  async fn get_source_variant(&self, nv: &NameVariant) -> Result<SourceVariant, MetadataError>;

  /// Fetch several source variants in one call.
  async fn get_source_variants(
    &self,
    nvs: &[NameVariant],
  ) -> Result<Vec<SourceVariant>, MetadataError>;

  /// Fetch a feature variant.
  async fn get_feature_variant(&self, nv: &NameVariant) -> Result<FeatureVariant, MetadataError>;

  /// Fetch a label variant.
  async fn get_label_variant(&self, nv: &NameVariant) -> Result<LabelVariant, MetadataError>;

  /// Fetch a training set variant.
  async fn get_training_set_variant(
    &self,
    nv: &NameVariant,
  ) -> Result<TrainingSetVariant, MetadataError>;

  /// Fetch a provider entry by name.
  async fn get_provider(&self, name: &str) -> Result<ProviderEntry, MetadataError>;

  /// Overwrite a resource's status field.
  ///
  /// `status` is either a lifecycle value or, on workflow failure, the
  /// stringified error. Operators read the failure reason directly off the
  /// resource status.
  async fn set_status(&self, id: &ResourceId, status: &str) -> Result<(), MetadataError>;
}
