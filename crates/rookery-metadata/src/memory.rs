//! In-memory metadata client for tests and standalone mode.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::client::{MetadataClient, MetadataError};
use crate::types::{
  FeatureVariant, LabelVariant, NameVariant, ProviderEntry, ResourceId, ResourceKind,
  SourceVariant, TrainingSetVariant,
};

#[derive(Default)]
struct Inner {
  sources: HashMap<NameVariant, SourceVariant>,
  features: HashMap<NameVariant, FeatureVariant>,
  labels: HashMap<NameVariant, LabelVariant>,
  training_sets: HashMap<NameVariant, TrainingSetVariant>,
  providers: HashMap<String, ProviderEntry>,
}

/// An in-memory [`MetadataClient`].
///
/// Holds all resource definitions behind one `RwLock`. Registration helpers
/// mirror what the gateway's create-request path would write.
#[derive(Default)]
pub struct InMemoryMetadata {
  inner: RwLock<Inner>,
}

impl InMemoryMetadata {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn create_source_variant(&self, source: SourceVariant) {
    let mut inner = self.inner.write().await;
    inner.sources.insert(source.name_variant(), source);
  }

  pub async fn create_feature_variant(&self, feature: FeatureVariant) {
    let mut inner = self.inner.write().await;
    let nv = NameVariant::new(feature.name.clone(), feature.variant.clone());
    inner.features.insert(nv, feature);
  }

  pub async fn create_label_variant(&self, label: LabelVariant) {
    let mut inner = self.inner.write().await;
    inner.labels.insert(label.name_variant(), label);
  }

  pub async fn create_training_set_variant(&self, ts: TrainingSetVariant) {
    let mut inner = self.inner.write().await;
    let nv = NameVariant::new(ts.name.clone(), ts.variant.clone());
    inner.training_sets.insert(nv, ts);
  }

  pub async fn create_provider(&self, provider: ProviderEntry) {
    let mut inner = self.inner.write().await;
    inner.providers.insert(provider.name.clone(), provider);
  }

  /// Read back a resource's raw stored status string.
  pub async fn stored_status(&self, id: &ResourceId) -> Option<String> {
    let inner = self.inner.read().await;
    let nv = id.name_variant();
    match id.kind {
      ResourceKind::Source => inner.sources.get(&nv).map(|r| r.status.clone()),
      ResourceKind::Feature => inner.features.get(&nv).map(|r| r.status.clone()),
      ResourceKind::Label => inner.labels.get(&nv).map(|r| r.status.clone()),
      ResourceKind::TrainingSet => inner.training_sets.get(&nv).map(|r| r.status.clone()),
      ResourceKind::Entity | ResourceKind::Provider => None,
    }
  }
}

#[async_trait]
impl MetadataClient for InMemoryMetadata {
  async fn get_source_variant(&self, nv: &NameVariant) -> Result<SourceVariant, MetadataError> {
    let inner = self.inner.read().await;
    inner
      .sources
      .get(nv)
      .cloned()
      .ok_or_else(|| MetadataError::not_found("source", nv))
  }

  async fn get_source_variants(
    &self,
    nvs: &[NameVariant],
  ) -> Result<Vec<SourceVariant>, MetadataError> {
    let inner = self.inner.read().await;
    nvs
      .iter()
      .map(|nv| {
        inner
          .sources
          .get(nv)
          .cloned()
          .ok_or_else(|| MetadataError::not_found("source", nv))
      })
      .collect()
  }

  async fn get_feature_variant(&self, nv: &NameVariant) -> Result<FeatureVariant, MetadataError> {
    let inner = self.inner.read().await;
    inner
      .features
      .get(nv)
      .cloned()
      .ok_or_else(|| MetadataError::not_found("feature", nv))
  }

  async fn get_label_variant(&self, nv: &NameVariant) -> Result<LabelVariant, MetadataError> {
    let inner = self.inner.read().await;
    inner
      .labels
      .get(nv)
      .cloned()
      .ok_or_else(|| MetadataError::not_found("label", nv))
  }

  async fn get_training_set_variant(
    &self,
    nv: &NameVariant,
  ) -> Result<TrainingSetVariant, MetadataError> {
    let inner = self.inner.read().await;
    inner
      .training_sets
      .get(nv)
      .cloned()
      .ok_or_else(|| MetadataError::not_found("training set", nv))
  }

  async fn get_provider(&self, name: &str) -> Result<ProviderEntry, MetadataError> {
    let inner = self.inner.read().await;
    inner
      .providers
      .get(name)
      .cloned()
      .ok_or_else(|| MetadataError::ProviderNotFound {
        name: name.to_string(),
      })
  }

  async fn set_status(&self, id: &ResourceId, status: &str) -> Result<(), MetadataError> {
    let mut inner = self.inner.write().await;
    let nv = id.name_variant();
    let slot = match id.kind {
      ResourceKind::Source => inner.sources.get_mut(&nv).map(|r| &mut r.status),
      ResourceKind::Feature => inner.features.get_mut(&nv).map(|r| &mut r.status),
      ResourceKind::Label => inner.labels.get_mut(&nv).map(|r| &mut r.status),
      ResourceKind::TrainingSet => inner.training_sets.get_mut(&nv).map(|r| &mut r.status),
      ResourceKind::Entity | ResourceKind::Provider => None,
    };
    match slot {
      Some(slot) => {
        *slot = status.to_string();
        Ok(())
      }
      None => Err(MetadataError::NotFound {
        kind: "resource",
        name: nv.name,
        variant: nv.variant,
      }),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{ResourceStatus, SourceDefinition};

  fn primary_source(name: &str, variant: &str) -> SourceVariant {
    SourceVariant {
      name: name.to_string(),
      variant: variant.to_string(),
      definition: SourceDefinition::PrimaryTable {
        table_name: "tbl".to_string(),
      },
      provider: "offline".to_string(),
      status: ResourceStatus::Created.as_str().to_string(),
    }
  }

  #[tokio::test]
  async fn set_status_overwrites_with_error_text() {
    let metadata = InMemoryMetadata::new();
    metadata.create_source_variant(primary_source("raw", "v1")).await;

    let id = ResourceId::new("raw", "v1", ResourceKind::Source);
    metadata.set_status(&id, "dependency failed").await.unwrap();

    assert_eq!(
      metadata.stored_status(&id).await.as_deref(),
      Some("dependency failed")
    );
    let source = metadata
      .get_source_variant(&NameVariant::new("raw", "v1"))
      .await
      .unwrap();
    assert_eq!(source.status(), ResourceStatus::Failed);
  }

  #[tokio::test]
  async fn missing_source_is_not_found() {
    let metadata = InMemoryMetadata::new();
    let err = metadata
      .get_source_variant(&NameVariant::new("missing", "v1"))
      .await
      .unwrap_err();
    assert!(matches!(err, MetadataError::NotFound { .. }));
  }
}
